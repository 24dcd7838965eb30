use crate::errors::GameError;
use crate::log_retention::enforce_total_budget;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

static RUN_LOG: OnceLock<Mutex<Option<JsonlLogger>>> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub ts_ms: i64,
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), GameError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| GameError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            ts_ms: event.ts_ms,
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| GameError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| GameError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| GameError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| GameError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            let _ = enforce_total_budget(parent, self.budget_bytes)?;
        }

        Ok(())
    }
}

/// Routes `append_run_log` to `logger` for the rest of the process.
pub fn init_run_log(logger: JsonlLogger) {
    let slot = RUN_LOG.get_or_init(|| Mutex::new(None));
    if let Ok(mut guard) = slot.lock() {
        *guard = Some(logger);
    }
}

/// Best-effort structured event; silently dropped before `init_run_log`.
pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let Some(slot) = RUN_LOG.get() else {
        return;
    };
    let Ok(guard) = slot.lock() else {
        return;
    };
    if let Some(logger) = guard.as_ref() {
        let _ = logger.append(&LogEvent {
            ts_ms: crate::record_store::system_time_unix(),
            level,
            event_type,
            payload,
        });
    }
}

pub fn structured_fallback_line(screen: &str, state: &str, message: &str) -> String {
    format!(
        "screen={screen} state={state} message={} ",
        message.replace('\n', "\\n")
    )
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

#[cfg(test)]
mod tests {
    use super::{structured_fallback_line, truncate_json, JsonlLogger, LogEvent};
    use serde_json::json;

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 20;
        logger.budget_bytes = 1024;

        logger
            .append(&LogEvent {
                ts_ms: 1,
                level: "info",
                event_type: "session.won",
                payload: json!({"text": "abcdefghijklmnopqrstuvwxyz"}),
            })
            .expect("append");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"event_type\":\"session.won\""));
        assert!(text.contains("..."));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        let value = truncate_json(json!({"name": "가나다라마바사"}), 14);
        let text = value.as_str().expect("string");
        assert!(text.ends_with("..."));
    }

    #[test]
    fn fallback_line_is_deterministic() {
        let line = structured_fallback_line("game", "in_progress", "hello\nworld");
        assert_eq!(line, "screen=game state=in_progress message=hello\\nworld ");
    }
}
