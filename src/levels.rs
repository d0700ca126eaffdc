//! Severity names used to colour list rows.
//!
//! Records carry free-form `level` strings. A small set of aliases is folded into
//! canonical severities; anything else is shown uncoloured.

/// Map an incoming level string to a canonical severity.
///
/// Returns `None` for unknown levels, including the `unknown` default.
pub fn canonical_level(value: &str) -> Option<&'static str> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "trace" | "verbose" => Some("trace"),
        "debug" | "dbg" => Some("debug"),
        "info" | "information" | "notice" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" | "err" => Some("error"),
        "fatal" | "critical" | "crit" | "panic" | "alert" | "emergency" => Some("fatal"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("INFO", Some("info"))]
    #[case(" Warning ", Some("warn"))]
    #[case("err", Some("error"))]
    #[case("CRITICAL", Some("fatal"))]
    #[case("unknown", None)]
    #[case("", None)]
    fn folds_aliases(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(canonical_level(input), expected);
    }

    #[test]
    fn canonical_levels_map_to_themselves() {
        for level in ["trace", "debug", "info", "warn", "error", "fatal"] {
            assert_eq!(canonical_level(level), Some(level));
        }
    }
}
