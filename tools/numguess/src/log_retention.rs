use crate::errors::GameError;
use std::fs;
use std::path::{Path, PathBuf};

/// Deletes the oldest files in `dir` until its total size fits `budget_bytes`.
pub fn enforce_total_budget(dir: &Path, budget_bytes: u64) -> Result<Vec<PathBuf>, GameError> {
    let mut files = fs::read_dir(dir)
        .map_err(|e| GameError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_log_file(path))
        .collect::<Vec<_>>();

    files.sort_by_key(|path| fs::metadata(path).ok().and_then(|m| m.modified().ok()));

    let mut total = files
        .iter()
        .filter_map(|path| fs::metadata(path).ok().map(|meta| meta.len()))
        .sum::<u64>();

    let mut deleted = Vec::new();
    for path in files {
        if total <= budget_bytes {
            break;
        }
        let len = fs::metadata(&path)
            .map_err(|e| GameError::Io(e.to_string()))?
            .len();
        fs::remove_file(&path).map_err(|e| GameError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}

// The log directory is shared with the record database by default.
fn is_log_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("jsonl" | "log")
    )
}

#[cfg(test)]
mod tests {
    use super::enforce_total_budget;
    use std::fs;

    #[test]
    fn prunes_oldest_logs_until_budget_is_met() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.jsonl"), vec![0u8; 40]).expect("a");
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(dir.path().join("b.jsonl"), vec![0u8; 40]).expect("b");

        let deleted = enforce_total_budget(dir.path(), 50).expect("pruned");
        assert_eq!(deleted.len(), 1);
        assert!(deleted[0].ends_with("a.jsonl"));
    }

    #[test]
    fn never_touches_non_log_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("records.sqlite"), vec![0u8; 400]).expect("db");
        fs::write(dir.path().join("run.jsonl"), vec![0u8; 10]).expect("log");

        let deleted = enforce_total_budget(dir.path(), 50).expect("pruned");
        assert!(deleted.is_empty());
        assert!(dir.path().join("records.sqlite").exists());
    }
}
