use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScreeningError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{tool} executable not found. Set {setting_key} (in settings or environment) to its full path, or add it to PATH")]
    ToolUnavailable {
        tool: String,
        setting_key: String,
    },

    #[error("{tool} failed: {detail}")]
    ToolExecutionFailed {
        tool: String,
        detail: String,
    },

    #[error("{tool} ran but its output could not be parsed. See log: {}", log_path.display())]
    UnparsableOutput {
        tool: String,
        log_path: PathBuf,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScreeningError {
    /// Build a `ToolExecutionFailed` from captured process output,
    /// preferring stderr and falling back to stdout.
    pub fn execution_failed(tool: &str, stderr: &str, stdout: &str) -> Self {
        let detail = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
        ScreeningError::ToolExecutionFailed {
            tool: tool.to_string(),
            detail: detail.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScreeningError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_failed_prefers_stderr() {
        let err = ScreeningError::execution_failed("vina", "bad receptor\n", "some stdout");
        assert_eq!(err.to_string(), "vina failed: bad receptor");
    }

    #[test]
    fn test_execution_failed_falls_back_to_stdout() {
        let err = ScreeningError::execution_failed("obabel", "  ", "0 molecules converted");
        assert_eq!(err.to_string(), "obabel failed: 0 molecules converted");
    }

    #[test]
    fn test_tool_unavailable_names_setting_key() {
        let err = ScreeningError::ToolUnavailable {
            tool: "AutoDock Vina".to_string(),
            setting_key: "VINA_PATH".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("AutoDock Vina"));
        assert!(msg.contains("VINA_PATH"));
    }
}
