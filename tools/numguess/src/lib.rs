pub mod config;
pub mod errors;
pub mod game;
pub mod log_retention;
pub mod logging;
pub mod record;
pub mod record_store;
pub mod runtime;
pub mod session;
pub mod timer;
pub mod tui;
pub mod types;
pub mod win;

use clap::{error::ErrorKind, Parser, ValueEnum};
use config::{load_config, AppConfig, CliOverrides};
use errors::GameError;
use game::{GameController, GameSettings};
use logging::{append_run_log, init_run_log, structured_fallback_line, JsonlLogger};
use record_store::{MemoryRecordStore, RecordStore, SqliteRecordStore};
use runtime::ProductionRuntime;
use serde_json::json;
use std::sync::Arc;
use tui::leaderboard_lines;
use types::{LeaderboardMode, PersistPolicy, StoreBackend};

#[derive(Debug, Clone, Parser)]
#[command(name = "numguess")]
#[command(about = "Guess the hidden number from 1 to 100 and chase the leaderboard")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,
    /// sqlite file holding the leaderboard
    #[arg(long)]
    pub db: Option<std::path::PathBuf>,
    /// keep records in memory for this run only
    #[arg(long, default_value_t = false)]
    pub memory_store: bool,
    #[arg(long, value_enum)]
    pub persist_policy: Option<CliPersistPolicy>,
    #[arg(long, value_enum)]
    pub leaderboard: Option<CliLeaderboard>,
    /// start a game right away as this player
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long, default_value_t = false)]
    pub show_leaderboard: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliPersistPolicy {
    Always,
    NewBestOnly,
}

impl From<CliPersistPolicy> for PersistPolicy {
    fn from(value: CliPersistPolicy) -> Self {
        match value {
            CliPersistPolicy::Always => PersistPolicy::Always,
            CliPersistPolicy::NewBestOnly => PersistPolicy::NewBestOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliLeaderboard {
    Best,
    #[value(name = "top10")]
    Top10,
}

impl From<CliLeaderboard> for LeaderboardMode {
    fn from(value: CliLeaderboard) -> Self {
        match value {
            CliLeaderboard::Best => LeaderboardMode::Best,
            CliLeaderboard::Top10 => LeaderboardMode::Top10,
        }
    }
}

pub fn run() -> Result<i32, GameError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| GameError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &std::path::Path,
    runtime: &ProductionRuntime,
) -> Result<i32, GameError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(GameError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        db_path: cli.db.clone(),
        memory_store: cli.memory_store,
        persist_policy: cli.persist_policy.map(Into::into),
        leaderboard: cli.leaderboard.map(Into::into),
    };
    let cfg = load_config(&overrides, cwd, runtime.file_system.as_ref())?;

    let mut logger = JsonlLogger::new(&cfg.logging.path);
    logger.max_payload_bytes = cfg.logging.max_payload_bytes;
    logger.budget_bytes = cfg.logging.budget_bytes;
    init_run_log(logger);
    append_run_log(
        "info",
        "run.started",
        json!({
            "store": cfg.store.path.display().to_string(),
            "persist_policy": cfg.records.persist_policy.as_str(),
            "leaderboard": cfg.display.leaderboard.as_str(),
        }),
    );

    let store = open_store(&cfg, runtime)?;

    if cli.show_leaderboard {
        let records = store.query_top(cfg.display.leaderboard.limit())?;
        if records.is_empty() {
            runtime.terminal.write_line("leaderboard is empty")?;
        }
        for line in leaderboard_lines(&records) {
            runtime.terminal.write_line(&line)?;
        }
        return Ok(0);
    }

    let settings = GameSettings {
        persist_policy: cfg.records.persist_policy,
        leaderboard: cfg.display.leaderboard,
    };
    let mut controller = GameController::new(store, settings);
    let summary = controller.run_interactive(runtime.terminal.as_ref(), cli.name.as_deref())?;

    append_run_log(
        "info",
        "run.finished",
        json!({
            "games_won": summary.games_won,
            "games_abandoned": summary.games_abandoned,
        }),
    );
    runtime.terminal.write_line(&structured_fallback_line(
        "exit",
        "done",
        &format!(
            "won={} abandoned={}",
            summary.games_won, summary.games_abandoned
        ),
    ))?;
    Ok(0)
}

fn open_store(
    cfg: &AppConfig,
    runtime: &ProductionRuntime,
) -> Result<Arc<dyn RecordStore>, GameError> {
    match cfg.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryRecordStore::new())),
        StoreBackend::Sqlite => {
            if let Some(parent) = cfg.store.path.parent() {
                runtime.file_system.create_dir_all(parent)?;
            }
            Ok(Arc::new(SqliteRecordStore::open(&cfg.store.path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{FakeFileSystem, FakeTerminal};
    use std::ffi::OsString;

    #[test]
    fn show_leaderboard_prepares_the_store_directory_through_the_runtime() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = FakeFileSystem::default();
        let terminal = FakeTerminal::new(false);
        let runtime = ProductionRuntime {
            file_system: Arc::new(fs.clone()),
            terminal: Arc::new(terminal.clone()),
        };
        let args = ["numguess", "--show-leaderboard", "--db", "data/records.sqlite"]
            .map(OsString::from);

        let code = run_with_runtime(&args, dir.path(), &runtime).expect("run");
        assert_eq!(code, 0);
        assert_eq!(fs.created_dirs(), vec![dir.path().join("data")]);
        assert_eq!(terminal.written_lines(), vec!["leaderboard is empty".to_string()]);
        assert!(dir.path().join("data/records.sqlite").exists());
    }
}
