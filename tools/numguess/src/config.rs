use crate::errors::GameError;
use crate::runtime::FileSystem;
use crate::types::{LeaderboardMode, PersistPolicy, StoreBackend};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub memory_store: bool,
    pub persist_policy: Option<PersistPolicy>,
    pub leaderboard: Option<LeaderboardMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub records: RecordsConfig,
    pub display: DisplayConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordsConfig {
    pub persist_policy: PersistPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayConfig {
    pub leaderboard: LeaderboardMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                backend: StoreBackend::Sqlite,
                path: PathBuf::from(".cache/numguess/records.sqlite"),
            },
            records: RecordsConfig {
                persist_policy: PersistPolicy::NewBestOnly,
            },
            display: DisplayConfig {
                leaderboard: LeaderboardMode::Best,
            },
            logging: LoggingConfig {
                path: PathBuf::from(".cache/numguess/run.jsonl"),
                max_payload_bytes: crate::logging::DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: crate::logging::DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialAppConfig {
    store: Option<PartialStoreConfig>,
    records: Option<PartialRecordsConfig>,
    display: Option<PartialDisplayConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialStoreConfig {
    backend: Option<StoreBackend>,
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialRecordsConfig {
    persist_policy: Option<PersistPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialDisplayConfig {
    leaderboard: Option<LeaderboardMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

/// Defaults, then the TOML file, then CLI flags; relative paths resolve
/// against `process_cwd`.
pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<AppConfig, GameError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| GameError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;

    cfg.store.path = absolutize_path(process_cwd, &cfg.store.path);
    cfg.logging.path = absolutize_path(process_cwd, &cfg.logging.path);
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(store) = partial.store {
        if let Some(backend) = store.backend {
            cfg.store.backend = backend;
        }
        if let Some(path) = store.path {
            cfg.store.path = path;
        }
    }

    if let Some(records) = partial.records {
        if let Some(policy) = records.persist_policy {
            cfg.records.persist_policy = policy;
        }
    }

    if let Some(display) = partial.display {
        if let Some(leaderboard) = display.leaderboard {
            cfg.display.leaderboard = leaderboard;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(path) = logging.path {
            cfg.logging.path = path;
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(path) = &overrides.db_path {
        cfg.store.backend = StoreBackend::Sqlite;
        cfg.store.path = path.clone();
    }
    if overrides.memory_store {
        cfg.store.backend = StoreBackend::Memory;
    }
    if let Some(policy) = overrides.persist_policy {
        cfg.records.persist_policy = policy;
    }
    if let Some(leaderboard) = overrides.leaderboard {
        cfg.display.leaderboard = leaderboard;
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), GameError> {
    if cfg.store.backend == StoreBackend::Sqlite && cfg.store.path.as_os_str().is_empty() {
        return Err(GameError::InvalidConfig(
            "store.path is required for the sqlite backend".to_string(),
        ));
    }

    if cfg.logging.path.as_os_str().is_empty() {
        return Err(GameError::InvalidConfig(
            "logging.path must not be empty".to_string(),
        ));
    }

    if cfg.logging.max_payload_bytes == 0 {
        return Err(GameError::InvalidConfig(
            "logging.max_payload_bytes must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeFileSystem;

    fn load(text: &str, overrides: CliOverrides) -> Result<AppConfig, GameError> {
        let fs = FakeFileSystem::with_file("/cfg.toml", text);
        let overrides = CliOverrides {
            config_path: Some(PathBuf::from("/cfg.toml")),
            ..overrides
        };
        load_config(&overrides, Path::new("/work"), &fs)
    }

    #[test]
    fn defaults_resolve_relative_paths_against_cwd() {
        let cfg = load("", CliOverrides::default()).expect("defaults");
        assert_eq!(cfg.store.backend, StoreBackend::Sqlite);
        assert_eq!(
            cfg.store.path,
            PathBuf::from("/work/.cache/numguess/records.sqlite")
        );
        assert_eq!(cfg.records.persist_policy, PersistPolicy::NewBestOnly);
        assert_eq!(cfg.display.leaderboard, LeaderboardMode::Best);
        assert_eq!(cfg.logging.path, PathBuf::from("/work/.cache/numguess/run.jsonl"));
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let cfg = load(
            r#"
[store]
path = "/data/records.sqlite"
[records]
persist_policy = "always"
[display]
leaderboard = "top10"
[logging]
max_payload_bytes = 512
"#,
            CliOverrides::default(),
        )
        .expect("config");
        assert_eq!(cfg.store.path, PathBuf::from("/data/records.sqlite"));
        assert_eq!(cfg.records.persist_policy, PersistPolicy::Always);
        assert_eq!(cfg.display.leaderboard, LeaderboardMode::Top10);
        assert_eq!(cfg.logging.max_payload_bytes, 512);
        assert_eq!(cfg.logging.budget_bytes, crate::logging::DEFAULT_DISK_BUDGET_BYTES);
    }

    #[test]
    fn cli_flags_win_over_the_file() {
        let cfg = load(
            "[records]\npersist_policy = \"always\"\n[display]\nleaderboard = \"top10\"\n",
            CliOverrides {
                persist_policy: Some(PersistPolicy::NewBestOnly),
                leaderboard: Some(LeaderboardMode::Best),
                memory_store: true,
                ..CliOverrides::default()
            },
        )
        .expect("config");
        assert_eq!(cfg.records.persist_policy, PersistPolicy::NewBestOnly);
        assert_eq!(cfg.display.leaderboard, LeaderboardMode::Best);
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn parse_and_validation_errors_are_reported() {
        let err = load("[records]\npersist_policy = \"sometimes\"\n", CliOverrides::default())
            .expect_err("bad enum");
        assert!(matches!(err, GameError::ConfigParse(_)));

        let err = load("[store]\ncolour = \"red\"\n", CliOverrides::default())
            .expect_err("unknown key");
        assert!(matches!(err, GameError::ConfigParse(_)));

        let err = load("[logging]\nmax_payload_bytes = 0\n", CliOverrides::default())
            .expect_err("zero payload");
        assert!(matches!(err, GameError::InvalidConfig(message) if message.contains("max_payload_bytes")));

        let err = load("[store]\npath = \"\"\n", CliOverrides::default()).expect_err("empty path");
        assert!(matches!(err, GameError::InvalidConfig(_)));
    }

    #[test]
    fn missing_config_file_is_an_io_error() {
        let fs = FakeFileSystem::default();
        let overrides = CliOverrides {
            config_path: Some(PathBuf::from("/missing.toml")),
            ..CliOverrides::default()
        };
        let err = load_config(&overrides, Path::new("/work"), &fs).expect_err("missing");
        assert!(matches!(err, GameError::Io(_)));
    }

    #[test]
    fn read_failure_surfaces_unchanged() {
        let fs = FakeFileSystem::with_file("/cfg.toml", "[display]\nleaderboard = \"top10\"\n");
        fs.set_fail_next(GameError::Io("permission denied".to_string()));
        let overrides = CliOverrides {
            config_path: Some(PathBuf::from("/cfg.toml")),
            ..CliOverrides::default()
        };
        let err = load_config(&overrides, Path::new("/work"), &fs).expect_err("read fails");
        assert!(matches!(err, GameError::Io(message) if message == "permission denied"));

        let cfg = load_config(&overrides, Path::new("/work"), &fs).expect("second read ok");
        assert_eq!(cfg.display.leaderboard, LeaderboardMode::Top10);
    }
}
