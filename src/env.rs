//! Configuration read from environment variables.

use tracing::warn;

/// Interpret a string value such as "1" or "no" as a boolean.
pub fn str_as_bool(s: &str) -> bool {
    match s {
        "1" | "true" | "t" | "yes" | "y" => true,
        "0" | "false" | "f" | "no" | "n" => false,
        _ => {
            warn!(value = s, "unrecognized boolean value");
            false
        }
    }
}

/// Return whether a feature flag controlled by an environment variable is
/// enabled.
pub fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .as_ref()
        .map(|s| str_as_bool(s))
        .unwrap_or(default)
}

/// Read an unsigned integer setting from an environment variable.
///
/// Returns `default` if the variable is unset or is not a valid integer.
pub fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(s) => s.trim().parse().unwrap_or_else(|_| {
            warn!(name, value = s.as_str(), "ignoring invalid integer setting");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use opgraph_testing::TestCases;

    use super::{env_flag, env_usize, str_as_bool};

    #[test]
    fn test_str_as_bool() {
        #[derive(Debug)]
        struct Case {
            value: &'static str,
            expected: bool,
        }

        let cases = [
            Case {
                value: "1",
                expected: true,
            },
            Case {
                value: "yes",
                expected: true,
            },
            Case {
                value: "n",
                expected: false,
            },
            Case {
                value: "false",
                expected: false,
            },
            Case {
                value: "maybe",
                expected: false,
            },
        ];

        cases.test_each(|case| assert_eq!(str_as_bool(case.value), case.expected))
    }

    #[test]
    fn test_unset_variables_use_default() {
        assert!(env_flag("OPGRAPH_TEST_UNSET_FLAG", true));
        assert!(!env_flag("OPGRAPH_TEST_UNSET_FLAG", false));
        assert_eq!(env_usize("OPGRAPH_TEST_UNSET_COUNT", 7), 7);
    }
}
