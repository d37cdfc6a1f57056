//! Wall-clock anchoring and formatting.

use chrono::{NaiveDateTime, TimeDelta, Timelike};
use serde::Serializer;

/// Derives the wall-clock reading `seconds` after `anchor`.
///
/// Negative offsets clamp to the anchor: a root pins the wall clock from its
/// first observation, and every later reading is derived from monotonic
/// deltas, so a wall clock that jumps backwards cannot reorder the tree.
pub fn wall_after(anchor: NaiveDateTime, seconds: f64) -> NaiveDateTime {
    let nanos = (seconds.max(0.0) * 1e9).round() as i64;
    anchor + TimeDelta::nanoseconds(nanos)
}

/// Formats a wall timestamp as `YYYY-MM-DDTHH:MM:SS`, with the `.ffffff`
/// microsecond suffix only when the microsecond part is non-zero.
pub fn format_wall(time: &NaiveDateTime) -> String {
    if time.nanosecond() / 1_000 == 0 {
        time.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        time.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

/// Serializes a wall timestamp through [`format_wall`].
pub fn serialize_wall<S: Serializer>(
    time: &NaiveDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_wall(time))
}

#[cfg(test)]
mod tests {

    use chrono::NaiveDate;

    use super::{format_wall, wall_after};

    fn base() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(1988, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[test]
    fn whole_seconds_elide_microseconds() {
        assert_eq!("1988-01-01T09:00:00", format_wall(&base()));
        assert_eq!("1988-01-01T09:00:01", format_wall(&wall_after(base(), 1.0)));
    }

    #[test]
    fn fractional_seconds_render_microseconds() {
        assert_eq!(
            "1988-01-01T09:00:00.500000",
            format_wall(&wall_after(base(), 0.5))
        );
        assert_eq!(
            "1988-01-01T09:00:02.000001",
            format_wall(&wall_after(base(), 2.000001))
        );
    }

    #[test]
    fn negative_offsets_clamp_to_the_anchor() {
        assert_eq!(base(), wall_after(base(), -30.0));
    }
}
