use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Higher,
    Lower,
    Correct,
}

impl Feedback {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Higher => "higher",
            Self::Lower => "lower",
            Self::Correct => "correct",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Higher => "UP",
            Self::Lower => "DOWN",
            Self::Correct => "CORRECT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Won,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Won => "won",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guess {
    pub value: u32,
    pub feedback: Feedback,
}

/// Which wins get written to the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistPolicy {
    /// Only wins that beat the current rank-1 record are inserted.
    NewBestOnly,
    /// Every win is inserted; the new-record badge still needs superiority.
    Always,
}

impl PersistPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewBestOnly => "new_best_only",
            Self::Always => "always",
        }
    }

    pub fn should_persist(self, new_best: bool) -> bool {
        match self {
            Self::NewBestOnly => new_best,
            Self::Always => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderboardMode {
    Best,
    Top10,
}

impl LeaderboardMode {
    pub fn limit(self) -> usize {
        match self {
            Self::Best => 1,
            Self::Top10 => 10,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Best => "best",
            Self::Top10 => "top10",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}
