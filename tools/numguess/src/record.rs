use crate::errors::GameError;
use serde::{Deserialize, Serialize};

pub const NAME_MAX_CHARS: usize = 10;

/// Ranking key of a finished game. Derived `Ord` compares attempts first,
/// then seconds, both ascending: the smaller score is the better one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Score {
    pub attempts: u32,
    pub seconds: u64,
}

impl Score {
    pub fn new(attempts: u32, seconds: u64) -> Self {
        Self { attempts, seconds }
    }
}

/// A persisted leaderboard entry. `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub name: String,
    pub attempts: u32,
    pub seconds: u64,
    pub created_at: i64,
}

impl Record {
    pub fn score(&self) -> Score {
        Score::new(self.attempts, self.seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub name: String,
    pub attempts: u32,
    pub seconds: u64,
}

impl NewRecord {
    pub fn score(&self) -> Score {
        Score::new(self.attempts, self.seconds)
    }

    /// Normalizes the name and checks the row constraints the store enforces.
    pub fn validated(self) -> Result<Self, GameError> {
        let name = validate_player_name(&self.name)?;
        if self.attempts == 0 {
            return Err(GameError::Database(
                "record attempts must be positive".to_string(),
            ));
        }
        Ok(Self { name, ..self })
    }
}

/// Strict superiority: fewer attempts, or equal attempts in less time.
pub fn is_superior(candidate: Score, other: Score) -> bool {
    candidate < other
}

/// A win is a new best when the board is empty or it strictly beats rank 1.
pub fn is_new_best(candidate: Score, best: Option<Score>) -> bool {
    best.map_or(true, |best| is_superior(candidate, best))
}

pub fn validate_player_name(raw: &str) -> Result<String, GameError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(GameError::EmptyName);
    }
    if trimmed.chars().count() > NAME_MAX_CHARS {
        return Err(GameError::NameTooLong {
            max: NAME_MAX_CHARS,
        });
    }
    Ok(trimmed.to_string())
}

pub fn sort_ranked(records: &mut [Record]) {
    records.sort_by(|a, b| {
        a.score()
            .cmp(&b.score())
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}
