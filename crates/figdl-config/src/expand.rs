//! `${VAR}` expansion for configuration strings.

use crate::ConfigError;

/// Expand `${VAR}` and `${VAR:-default}` references in `value`.
///
/// Bare `$VAR` is left alone. An unset variable without a default is an
/// error naming `field`.
pub(crate) fn expand_env(value: &str, field: &str) -> Result<String, ConfigError> {
    if !value.contains("${") {
        return Ok(value.to_owned());
    }

    shellexpand::env_with_context(value, |var| -> Result<Option<String>, LookupError> {
        std::env::var(var).map(Some).map_err(|_| LookupError {
            var_name: var.to_owned(),
        })
    })
    .map(std::borrow::Cow::into_owned)
    .map_err(|e| ConfigError::EnvVar {
        field: field.to_owned(),
        message: format!("${{{}}} not set", e.cause.var_name),
    })
}

struct LookupError {
    var_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_in_url() {
        // SAFETY: test runs single-threaded per test function
        unsafe {
            std::env::set_var("FIGDL_TEST_RELAY_HOST", "relay.local:8765");
        }
        let result = expand_env("http://${FIGDL_TEST_RELAY_HOST}/compress", "compression.relay_url");
        assert_eq!(result.unwrap(), "http://relay.local:8765/compress");
        unsafe {
            std::env::remove_var("FIGDL_TEST_RELAY_HOST");
        }
    }

    #[test]
    fn test_default_used_when_unset() {
        // SAFETY: test runs single-threaded per test function
        unsafe {
            std::env::remove_var("FIGDL_TEST_UNSET_DIR");
        }
        let result = expand_env("${FIGDL_TEST_UNSET_DIR:-assets}", "export.output_dir").unwrap();
        assert_eq!(result, "assets");
    }

    #[test]
    fn test_missing_var_names_field() {
        // SAFETY: test runs single-threaded per test function
        unsafe {
            std::env::remove_var("FIGDL_TEST_MISSING");
        }
        let err = expand_env("${FIGDL_TEST_MISSING}", "api.base_url").unwrap_err();
        assert!(matches!(err, ConfigError::EnvVar { .. }));
        let message = err.to_string();
        assert!(message.contains("FIGDL_TEST_MISSING"));
        assert!(message.contains("api.base_url"));
    }

    #[test]
    fn test_literals_unchanged() {
        assert_eq!(expand_env("output", "export.output_dir").unwrap(), "output");
        assert_eq!(expand_env("$HOME/x", "export.output_dir").unwrap(), "$HOME/x");
    }
}
