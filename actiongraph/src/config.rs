//! Profiler configuration.

use actiongraph_callgraph::CodeGranularity;

/// Configuration for a [`Profiler`](crate::Profiler).
///
/// The defaults aim the worker at two percent overhead, sampling up to ten
/// concurrent tasks at line granularity no more often than every 100ms.
#[derive(Debug, Clone)]
pub struct Config {
    /// Opaque tag added to emitted records under the `"source"` key, when
    /// set. Usually a hostname or application name.
    pub source_name: Option<String>,
    /// How many concurrent tasks to profile at once. Tasks arriving beyond
    /// the cap are not tracked; a slot opens when a tracked task finishes.
    pub simultaneous_tasks_profiled: usize,
    /// Upper bound on the fraction of wall time the sampling worker may
    /// consume, in `(0, 1]`.
    pub max_overhead: f64,
    /// The smallest interval between sampling passes, in seconds.
    pub time_granularity: f64,
    /// The granularity instructions identify code at.
    pub code_granularity: CodeGranularity,
    /// Record mid-action log messages in call graphs, not just action
    /// starts and ends.
    pub store_all_logs: bool,
    /// Hard cap on root-action opens per run; `None` is unlimited. A knob
    /// for tests and bounded offline runs.
    pub max_actions_per_run: Option<usize>,
    /// Module prefixes elided from captured stacks: the profiler's own
    /// modules and the log framework's action machinery.
    pub stack_filters: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            source_name: None,
            simultaneous_tasks_profiled: 10,
            max_overhead: 0.02,
            time_granularity: 0.1,
            code_granularity: CodeGranularity::Line,
            store_all_logs: false,
            max_actions_per_run: None,
            stack_filters: vec!["actiongraph".to_owned()],
        }
    }
}

impl Config {
    /// Checks the numeric bounds.
    pub fn validate(&self) -> Result<(), String> {
        if self.simultaneous_tasks_profiled == 0 {
            return Err("simultaneous_tasks_profiled must be at least 1".to_owned());
        }
        if !(self.max_overhead > 0.0 && self.max_overhead <= 1.0) {
            return Err(format!(
                "max_overhead must lie in (0, 1]: {}",
                self.max_overhead
            ));
        }
        if self.time_granularity.is_nan() || self.time_granularity < 0.0 {
            return Err(format!(
                "time_granularity must be non-negative: {}",
                self.time_granularity
            ));
        }
        Ok(())
    }

    /// Constructs a configuration by parsing supplied text arguments.
    ///
    /// Most commonly, this uses `std::env::args()` as the supplied
    /// iterator. Overhead accepts a fraction (`0.02`) or a percentage
    /// (`2%`).
    #[cfg(feature = "getopts")]
    pub fn from_args<I: Iterator<Item = String>>(args: I) -> Result<Config, String> {
        let mut opts = getopts::Options::new();
        opts.optopt(
            "s",
            "source-name",
            "name of the data source - usually hostname or app name",
            "NAME",
        );
        opts.optopt(
            "n",
            "tasks-profiled",
            "number of concurrent tasks to profile at once",
            "NUM",
        );
        opts.optopt(
            "v",
            "max-overhead",
            "most performance overhead the profiler may add, as a fraction or percentage",
            "FRAC",
        );
        opts.optopt(
            "t",
            "time-granularity",
            "time granularity the profiler should aim for, in seconds",
            "SECS",
        );
        opts.optopt(
            "c",
            "code-granularity",
            "level at which to measure performance: file, method, or line",
            "LEVEL",
        );
        opts.optflag(
            "l",
            "all-logs",
            "store all logs in call graphs, not just action start and end messages",
        );

        let matches = opts.parse(args).map_err(|error| format!("{error:?}"))?;

        let mut config = Config::default();
        if let Some(name) = matches.opt_str("s") {
            config.source_name = Some(name);
        }
        if let Some(tasks) = matches.opt_str("n") {
            config.simultaneous_tasks_profiled = tasks
                .parse()
                .map_err(|error| format!("invalid task count {tasks:?}: {error}"))?;
        }
        if let Some(overhead) = matches.opt_str("v") {
            config.max_overhead = parse_fraction(&overhead)?;
        }
        if let Some(granularity) = matches.opt_str("t") {
            config.time_granularity = granularity
                .parse()
                .map_err(|error| format!("invalid time granularity {granularity:?}: {error}"))?;
        }
        if let Some(level) = matches.opt_str("c") {
            config.code_granularity = level.parse()?;
        }
        config.store_all_logs = matches.opt_present("l");
        config.validate()?;
        Ok(config)
    }
}

/// Parses `0.02` or `2%` into a fraction.
#[cfg(feature = "getopts")]
fn parse_fraction(text: &str) -> Result<f64, String> {
    let (digits, scale) = match text.strip_suffix('%') {
        Some(digits) => (digits, 100.0),
        None => (text, 1.0),
    };
    let value: f64 = digits
        .trim()
        .parse()
        .map_err(|error| format!("invalid overhead {text:?}: {error}"))?;
    Ok(value / scale)
}

#[cfg(test)]
mod tests {

    use actiongraph_callgraph::CodeGranularity;

    use super::Config;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(10, config.simultaneous_tasks_profiled);
        assert_eq!(CodeGranularity::Line, config.code_granularity);
        assert!(!config.store_all_logs);
        assert_eq!(None, config.max_actions_per_run);
    }

    #[test]
    fn bounds_are_enforced() {
        let mut config = Config {
            simultaneous_tasks_profiled: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
        config.simultaneous_tasks_profiled = 1;

        config.max_overhead = 0.0;
        assert!(config.validate().is_err());
        config.max_overhead = 1.5;
        assert!(config.validate().is_err());
        config.max_overhead = 1.0;
        assert!(config.validate().is_ok());

        config.time_granularity = -0.1;
        assert!(config.validate().is_err());
    }

    #[cfg(feature = "getopts")]
    #[test]
    fn args_parse() {
        let args = [
            "-s",
            "api-host",
            "-n",
            "4",
            "-v",
            "5%",
            "-t",
            "0.05",
            "-c",
            "method",
            "-l",
        ];
        let config = Config::from_args(args.iter().map(|arg| (*arg).to_owned())).unwrap();
        assert_eq!(Some("api-host".to_owned()), config.source_name);
        assert_eq!(4, config.simultaneous_tasks_profiled);
        assert!((config.max_overhead - 0.05).abs() < 1e-12);
        assert!((config.time_granularity - 0.05).abs() < 1e-12);
        assert_eq!(CodeGranularity::Method, config.code_granularity);
        assert!(config.store_all_logs);
    }

    #[cfg(feature = "getopts")]
    #[test]
    fn bad_args_are_reported() {
        assert!(Config::from_args(["-n", "zero"].iter().map(|a| (*a).to_owned())).is_err());
        assert!(Config::from_args(["-c", "word"].iter().map(|a| (*a).to_owned())).is_err());
        assert!(Config::from_args(["-v", "150%"].iter().map(|a| (*a).to_owned())).is_err());
    }
}
