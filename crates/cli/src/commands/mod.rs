pub mod chat;
pub mod config;
pub mod migrate;
pub mod report;
pub mod seed;

use serde_json::json;

/// What a finished subcommand hands back to `run`: a single line of JSON for
/// the terminal and the process exit code.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::emit(command, None, message.into(), 0)
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::emit(command, Some(error_class), message.into(), exit_code)
    }

    fn emit(command: &str, error_class: Option<&str>, message: String, exit_code: u8) -> Self {
        let payload = json!({
            "command": command,
            "status": if error_class.is_none() { "ok" } else { "error" },
            "error_class": error_class,
            "message": message,
        });
        Self { exit_code, output: payload.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::CommandResult;

    #[test]
    fn success_payload_carries_ok_status_and_no_error_class() {
        let result = CommandResult::success("migrate", "applied 1 migration");
        assert_eq!(result.exit_code, 0);

        let payload: Value = serde_json::from_str(&result.output).expect("json output");
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert!(payload["error_class"].is_null());
        assert_eq!(payload["message"], "applied 1 migration");
    }

    #[test]
    fn failure_payload_carries_class_and_exit_code() {
        let result = CommandResult::failure("seed", "db_connectivity", "no such host", 4);
        assert_eq!(result.exit_code, 4);

        let payload: Value = serde_json::from_str(&result.output).expect("json output");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "db_connectivity");
    }
}
