use serde::{Deserialize, Serialize};

/// Error text used when a failed result carries no explanation
pub const UNKNOWN_ERROR: &str = "unknown error";

/// Outcome of a single plugin execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The plugin wants the machine rebooted once the whole batch is done
    #[serde(default, alias = "reboot")]
    pub reboot_requested: bool,
}

impl ExecutionResult {
    /// Successful result with a message
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            reboot_requested: false,
        }
    }

    /// Successful result without a message
    pub fn done() -> Self {
        Self {
            success: true,
            message: None,
            error: None,
            reboot_requested: false,
        }
    }

    /// Failed result with an error description
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            reboot_requested: false,
        }
    }

    /// Mark the result as requesting a reboot after the batch
    pub fn with_reboot(mut self) -> Self {
        self.reboot_requested = true;
        self
    }

    /// Error text for a failed result, falling back to [`UNKNOWN_ERROR`]
    pub fn error_message(&self) -> &str {
        self.error
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or(UNKNOWN_ERROR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_without_error_text_falls_back() {
        let result = ExecutionResult {
            success: false,
            message: None,
            error: None,
            reboot_requested: false,
        };
        assert_eq!(result.error_message(), UNKNOWN_ERROR);

        let blank = ExecutionResult::failure("  ");
        assert_eq!(blank.error_message(), UNKNOWN_ERROR);
    }

    #[test]
    fn builders_populate_the_matching_field() {
        let ok = ExecutionResult::success("applied").with_reboot();
        assert!(ok.success);
        assert_eq!(ok.message.as_deref(), Some("applied"));
        assert!(ok.error.is_none());
        assert!(ok.reboot_requested);

        let failed = ExecutionResult::failure("disk full");
        assert!(!failed.success);
        assert!(failed.message.is_none());
        assert_eq!(failed.error_message(), "disk full");
        assert!(!failed.reboot_requested);
    }

    #[test]
    fn reboot_key_is_accepted_when_deserializing() {
        let result: ExecutionResult =
            toml::from_str("success = true\nmessage = \"ok\"\nreboot = true\n").unwrap();
        assert!(result.reboot_requested);
        assert_eq!(result.message.as_deref(), Some("ok"));
    }
}
