//! Stack snapshots and instruction extraction.
//!
//! A [`Frame`] is an owned snapshot of one call frame, captured at message
//! or sample time; nothing here retains pointers into any runtime. A frame
//! chain renders to a list of textual *instructions* — code-location keys
//! whose equality drives the merge of consecutive samples into one tree.

use std::str::FromStr;

/// One captured call frame. Chains are ordered outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Source file of the executing code.
    pub file: String,
    /// Function or method name.
    pub method: String,
    /// Line number within `file`.
    pub line: u32,
    /// Module path the code belongs to; used only for eliding frames.
    pub module: String,
}

impl Frame {
    /// Creates a frame snapshot.
    pub fn new(
        file: impl Into<String>,
        method: impl Into<String>,
        line: u32,
        module: impl Into<String>,
    ) -> Self {
        Frame {
            file: file.into(),
            method: method.into(),
            line,
            module: module.into(),
        }
    }

    /// Renders this frame as an instruction at the requested granularity.
    pub fn instruction(&self, granularity: CodeGranularity) -> String {
        match granularity {
            CodeGranularity::File => self.file.clone(),
            CodeGranularity::Method => format!("{}:{}", self.file, self.method),
            CodeGranularity::Line => format!("{}:{}:{}", self.file, self.method, self.line),
        }
    }
}

/// The level at which the profiler identifies code locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeGranularity {
    /// Whole source files: `path`.
    File,
    /// Methods within files: `path:method`.
    Method,
    /// Individual lines: `path:method:line`.
    #[default]
    Line,
}

impl FromStr for CodeGranularity {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "file" => Ok(CodeGranularity::File),
            "method" => Ok(CodeGranularity::Method),
            "line" => Ok(CodeGranularity::Line),
            other => Err(format!("unknown code granularity: {other}")),
        }
    }
}

/// Extracts the instruction list for a frame chain, outermost first.
///
/// Frames whose module equals one of the `elide` prefixes, or lives beneath
/// one (`prefix::…` or `prefix.…`), are dropped: the profiler's own modules
/// and the log framework's action machinery must not appear in user-visible
/// stacks. An empty result is legal and charges the sample to the root.
pub fn extract_stack(
    frames: &[Frame],
    granularity: CodeGranularity,
    elide: &[String],
) -> Vec<String> {
    frames
        .iter()
        .filter(|frame| !elide.iter().any(|prefix| module_within(&frame.module, prefix)))
        .map(|frame| frame.instruction(granularity))
        .collect()
}

/// True when `module` is `prefix` or a submodule of it. Both `::` and `.`
/// separate path segments, so snapshots from foreign runtimes filter too.
fn module_within(module: &str, prefix: &str) -> bool {
    match module.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with("::") || rest.starts_with('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {

    use super::{extract_stack, module_within, CodeGranularity, Frame};

    fn chain() -> Vec<Frame> {
        vec![
            Frame::new("src/main.rs", "main", 10, "app"),
            Frame::new("src/business/app.rs", "init", 5, "app::business"),
            Frame::new("src/action.rs", "start_action", 100, "structlog::action"),
            Frame::new("src/profiler.rs", "emit", 42, "actiongraph::profiler"),
        ]
    }

    fn elide() -> Vec<String> {
        vec!["structlog".to_owned(), "actiongraph".to_owned()]
    }

    #[test]
    fn granularities() {
        let frame = Frame::new("src/main.rs", "main", 10, "app");
        assert_eq!("src/main.rs", frame.instruction(CodeGranularity::File));
        assert_eq!("src/main.rs:main", frame.instruction(CodeGranularity::Method));
        assert_eq!("src/main.rs:main:10", frame.instruction(CodeGranularity::Line));
    }

    #[test]
    fn granularity_parsing() {
        assert_eq!(Ok(CodeGranularity::File), "file".parse());
        assert_eq!(Ok(CodeGranularity::Method), "method".parse());
        assert_eq!(Ok(CodeGranularity::Line), "line".parse());
        assert!("lines".parse::<CodeGranularity>().is_err());
    }

    #[test]
    fn profiler_and_framework_frames_are_elided() {
        let stack = extract_stack(&chain(), CodeGranularity::Method, &elide());
        assert_eq!(
            vec!["src/main.rs:main", "src/business/app.rs:init"],
            stack
        );
    }

    #[test]
    fn prefix_matching_is_per_segment() {
        assert!(module_within("structlog", "structlog"));
        assert!(module_within("structlog::action", "structlog"));
        assert!(module_within("structlog.action", "structlog"));
        assert!(!module_within("structlogger", "structlog"));
    }

    #[test]
    fn empty_chains_are_legal() {
        let stack = extract_stack(&[], CodeGranularity::Line, &elide());
        assert!(stack.is_empty());
    }
}
