use crate::logging::append_run_log;
use crate::record::{is_new_best, Record};
use crate::record_store::RecordStore;
use crate::session::WinTicket;
use crate::types::PersistPolicy;
use serde_json::json;

/// Result of settling a win against the record store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WinOutcome {
    pub previous_best: Option<Record>,
    pub new_best: bool,
    pub persisted: bool,
    /// Re-queried board after a successful insert; `None` means unchanged.
    pub leaderboard: Option<Vec<Record>>,
}

/// Compares the win against rank 1, persists it per `policy`, and refreshes
/// the board once the insert has completed. Store failures never escape:
/// a failed fetch counts as an empty board and a failed insert is logged.
pub fn settle_win(
    store: &dyn RecordStore,
    policy: PersistPolicy,
    ticket: &WinTicket,
    leaderboard_limit: usize,
) -> WinOutcome {
    let previous_best = fetch_best(store);
    let new_best = is_new_best(ticket.score(), previous_best.as_ref().map(Record::score));

    let mut outcome = WinOutcome {
        previous_best,
        new_best,
        persisted: false,
        leaderboard: None,
    };

    if !policy.should_persist(new_best) {
        append_run_log(
            "info",
            "win.not_persisted",
            json!({
                "generation": ticket.generation,
                "policy": policy.as_str(),
                "attempts": ticket.attempts,
                "seconds": ticket.seconds,
            }),
        );
        return outcome;
    }

    match store.insert(ticket.to_new_record()) {
        Ok(record) => {
            append_run_log(
                "info",
                "win.persisted",
                json!({
                    "generation": ticket.generation,
                    "record_id": record.id,
                    "new_best": new_best,
                }),
            );
            outcome.persisted = true;
            outcome.leaderboard = Some(fetch_leaderboard(store, leaderboard_limit));
        }
        Err(error) => {
            append_run_log(
                "error",
                "win.insert_failed",
                json!({
                    "generation": ticket.generation,
                    "error": error.to_string(),
                }),
            );
        }
    }
    outcome
}

pub fn fetch_best(store: &dyn RecordStore) -> Option<Record> {
    fetch_leaderboard(store, 1).into_iter().next()
}

/// Top-`limit` records; an unreachable store reads as an empty board.
pub fn fetch_leaderboard(store: &dyn RecordStore, limit: usize) -> Vec<Record> {
    match store.query_top(limit) {
        Ok(records) => records,
        Err(error) => {
            append_run_log(
                "warn",
                "leaderboard.fetch_failed",
                json!({
                    "limit": limit,
                    "error": error.to_string(),
                }),
            );
            Vec::new()
        }
    }
}
