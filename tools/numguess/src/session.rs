use crate::errors::GameError;
use crate::logging::append_run_log;
use crate::record::{validate_player_name, NewRecord, Score};
use crate::types::{Feedback, Guess, SessionStatus};
use crate::win::WinOutcome;
use rand::Rng;
use serde_json::json;
use std::collections::VecDeque;

pub const MIN_NUMBER: u32 = 1;
pub const MAX_NUMBER: u32 = 100;

/// Everything the win procedure needs, captured at the instant of the win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WinTicket {
    pub generation: u64,
    pub name: String,
    pub attempts: u32,
    pub seconds: u64,
}

impl WinTicket {
    pub fn score(&self) -> Score {
        Score::new(self.attempts, self.seconds)
    }

    pub fn to_new_record(&self) -> NewRecord {
        NewRecord {
            name: self.name.clone(),
            attempts: self.attempts,
            seconds: self.seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuessResult {
    pub guess: Guess,
    pub attempts: u32,
    pub win: Option<WinTicket>,
}

/// One play-through. Every mutation goes through the methods below; async
/// completions and timer ticks carry the `generation` they were issued for
/// and are dropped when it no longer matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    status: SessionStatus,
    player_name: String,
    target: Option<u32>,
    guesses: VecDeque<Guess>,
    elapsed_seconds: u64,
    generation: u64,
    outcome: Option<WinOutcome>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            status: SessionStatus::NotStarted,
            player_name: String::new(),
            target: None,
            guesses: VecDeque::new(),
            elapsed_seconds: 0,
            generation: 0,
            outcome: None,
        }
    }
}

impl Session {
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    pub fn target(&self) -> Option<u32> {
        self.target
    }

    /// Most recent guess first.
    pub fn guesses(&self) -> &VecDeque<Guess> {
        &self.guesses
    }

    pub fn attempts(&self) -> u32 {
        self.guesses.len() as u32
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn outcome(&self) -> Option<&WinOutcome> {
        self.outcome.as_ref()
    }

    fn transition(&mut self, next: SessionStatus) -> Result<(), GameError> {
        validate_transition(self.status, next)?;
        self.status = next;
        Ok(())
    }

    /// Starts a game for `name` and returns the new generation.
    pub fn start<R: Rng + ?Sized>(&mut self, name: &str, rng: &mut R) -> Result<u64, GameError> {
        let name = validate_player_name(name)?;
        validate_transition(self.status, SessionStatus::InProgress)?;

        let target = rng.random_range(MIN_NUMBER..=MAX_NUMBER);
        self.generation = self.generation.wrapping_add(1);
        self.player_name = name;
        self.target = Some(target);
        self.guesses.clear();
        self.elapsed_seconds = 0;
        self.outcome = None;
        self.transition(SessionStatus::InProgress)?;

        append_run_log(
            "info",
            "session.started",
            json!({
                "generation": self.generation,
                "player": self.player_name,
            }),
        );
        Ok(self.generation)
    }

    pub fn submit_guess(&mut self, raw: &str) -> Result<GuessResult, GameError> {
        if self.status != SessionStatus::InProgress {
            return Err(GameError::NotInProgress);
        }
        let value = parse_guess(raw)?;
        let target = self.target.ok_or(GameError::NotInProgress)?;

        let feedback = evaluate_guess(value, target);
        let guess = Guess { value, feedback };
        self.guesses.push_front(guess);
        let attempts = self.attempts();

        append_run_log(
            "debug",
            "session.guess",
            json!({
                "generation": self.generation,
                "attempt": attempts,
                "feedback": feedback.as_str(),
            }),
        );

        let win = if feedback == Feedback::Correct {
            self.transition(SessionStatus::Won)?;
            append_run_log(
                "info",
                "session.won",
                json!({
                    "generation": self.generation,
                    "player": self.player_name,
                    "attempts": attempts,
                    "seconds": self.elapsed_seconds,
                }),
            );
            Some(WinTicket {
                generation: self.generation,
                name: self.player_name.clone(),
                attempts,
                seconds: self.elapsed_seconds,
            })
        } else {
            None
        };

        Ok(GuessResult {
            guess,
            attempts,
            win,
        })
    }

    /// Advances the clock by one second. Returns false for stale or frozen ticks.
    pub fn tick(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.status != SessionStatus::InProgress {
            return false;
        }
        self.elapsed_seconds = self.elapsed_seconds.saturating_add(1);
        true
    }

    pub fn apply_win_outcome(&mut self, generation: u64, outcome: WinOutcome) -> bool {
        if generation != self.generation || self.status != SessionStatus::Won {
            append_run_log(
                "debug",
                "session.win_outcome_dropped",
                json!({
                    "generation": generation,
                    "current_generation": self.generation,
                    "status": self.status.as_str(),
                }),
            );
            return false;
        }
        self.outcome = Some(outcome);
        true
    }

    /// Returns to the main screen. A no-op when nothing is running.
    pub fn reset(&mut self) -> Result<u64, GameError> {
        if self.status == SessionStatus::NotStarted {
            return Ok(self.generation);
        }
        let previous = self.status;
        self.transition(SessionStatus::NotStarted)?;
        self.generation = self.generation.wrapping_add(1);
        self.player_name.clear();
        self.target = None;
        self.guesses.clear();
        self.elapsed_seconds = 0;
        self.outcome = None;

        append_run_log(
            "info",
            "session.reset",
            json!({
                "generation": self.generation,
                "from": previous.as_str(),
            }),
        );
        Ok(self.generation)
    }
}

pub fn evaluate_guess(value: u32, target: u32) -> Feedback {
    match value.cmp(&target) {
        std::cmp::Ordering::Less => Feedback::Higher,
        std::cmp::Ordering::Greater => Feedback::Lower,
        std::cmp::Ordering::Equal => Feedback::Correct,
    }
}

pub fn parse_guess(raw: &str) -> Result<u32, GameError> {
    let invalid = GameError::InvalidGuess {
        min: MIN_NUMBER,
        max: MAX_NUMBER,
    };
    let value = raw.trim().parse::<i64>().map_err(|_| invalid)?;
    if !(i64::from(MIN_NUMBER)..=i64::from(MAX_NUMBER)).contains(&value) {
        return Err(GameError::InvalidGuess {
            min: MIN_NUMBER,
            max: MAX_NUMBER,
        });
    }
    u32::try_from(value).map_err(|_| GameError::InvalidGuess {
        min: MIN_NUMBER,
        max: MAX_NUMBER,
    })
}

pub fn validate_transition(from: SessionStatus, to: SessionStatus) -> Result<(), GameError> {
    use SessionStatus as S;

    let allowed = match from {
        S::NotStarted => matches!(to, S::InProgress),
        S::InProgress => matches!(to, S::Won | S::NotStarted),
        S::Won => matches!(to, S::NotStarted),
    };

    if !allowed {
        return Err(GameError::IllegalTransition(format!(
            "{} -> {}",
            from.as_str(),
            to.as_str()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn started(seed: u64) -> Session {
        let mut session = Session::default();
        let mut rng = StdRng::seed_from_u64(seed);
        session.start("kim", &mut rng).expect("start");
        session
    }

    #[test]
    fn feedback_matches_three_way_comparison_for_whole_range() {
        for target in MIN_NUMBER..=MAX_NUMBER {
            for guess in MIN_NUMBER..=MAX_NUMBER {
                let feedback = evaluate_guess(guess, target);
                assert_eq!(feedback == Feedback::Correct, guess == target);
                assert_eq!(feedback == Feedback::Higher, guess < target);
                assert_eq!(feedback == Feedback::Lower, guess > target);
            }
        }
    }

    #[test]
    fn start_rejects_blank_names_without_changing_state() {
        let mut session = Session::default();
        let mut rng = StdRng::seed_from_u64(1);
        let err = session.start("   ", &mut rng).expect_err("blank");
        assert!(matches!(err, GameError::EmptyName));
        assert_eq!(session, Session::default());
    }

    #[test]
    fn start_initializes_a_fresh_session() {
        let session = started(3);
        assert_eq!(session.status(), SessionStatus::InProgress);
        assert_eq!(session.player_name(), "kim");
        assert!(session.guesses().is_empty());
        assert_eq!(session.elapsed_seconds(), 0);
        let target = session.target().expect("target");
        assert!((MIN_NUMBER..=MAX_NUMBER).contains(&target));
    }

    #[test]
    fn start_is_illegal_while_a_game_is_running() {
        let mut session = started(3);
        let mut rng = StdRng::seed_from_u64(4);
        let err = session.start("lee", &mut rng).expect_err("running");
        assert!(matches!(err, GameError::IllegalTransition(_)));
        assert_eq!(session.player_name(), "kim");
    }

    #[test]
    fn invalid_guesses_leave_state_untouched() {
        let mut session = started(5);
        session.tick(session.generation());
        let before = session.clone();
        for raw in ["0", "101", "abc", "3.5", "", "-4", "99999999999999999999"] {
            let err = session.submit_guess(raw).expect_err(raw);
            assert!(err.is_user_input(), "{raw} should be a user input error");
            assert_eq!(session, before);
        }
    }

    #[test]
    fn guesses_are_recorded_most_recent_first() {
        let mut session = started(8);
        let target = session.target().expect("target");
        let misses = (MIN_NUMBER..=MAX_NUMBER)
            .filter(|value| *value != target)
            .take(4)
            .collect::<Vec<_>>();
        for value in &misses {
            let result = session.submit_guess(&value.to_string()).expect("guess");
            assert!(result.win.is_none());
        }
        assert_eq!(session.attempts(), 4);
        assert_eq!(session.guesses()[0].value, misses[3]);
        assert_eq!(session.guesses()[3].value, misses[0]);
    }

    #[test]
    fn correct_guess_wins_and_freezes_the_clock() {
        let mut session = started(13);
        let generation = session.generation();
        let target = session.target().expect("target");
        let miss = if target == MAX_NUMBER { 1 } else { MAX_NUMBER };
        session.submit_guess(&miss.to_string()).expect("miss");
        assert!(session.tick(generation));
        assert!(session.tick(generation));

        let result = session.submit_guess(&format!(" {target} ")).expect("hit");
        let ticket = result.win.expect("win ticket");
        assert_eq!(session.status(), SessionStatus::Won);
        assert_eq!(ticket.attempts, 2);
        assert_eq!(ticket.seconds, 2);
        assert_eq!(ticket.name, "kim");
        assert_eq!(ticket.generation, generation);
        assert_eq!(session.guesses()[0].feedback, Feedback::Correct);
        assert_eq!(
            session
                .guesses()
                .iter()
                .filter(|g| g.feedback == Feedback::Correct)
                .count(),
            1
        );

        assert!(!session.tick(generation));
        assert_eq!(session.elapsed_seconds(), 2);
        assert!(matches!(
            session.submit_guess("50"),
            Err(GameError::NotInProgress)
        ));
    }

    #[test]
    fn stale_ticks_from_an_abandoned_game_are_dropped() {
        let mut session = started(21);
        let old = session.generation();
        session.tick(old);
        session.submit_guess("50").ok();
        session.reset().expect("abandon");
        assert_eq!(session.status(), SessionStatus::NotStarted);
        assert!(session.target().is_none());

        let mut rng = StdRng::seed_from_u64(22);
        let fresh = session.start("lee", &mut rng).expect("restart");
        assert_ne!(old, fresh);
        assert_eq!(session.elapsed_seconds(), 0);
        assert!(session.guesses().is_empty());
        assert!(!session.tick(old));
        assert_eq!(session.elapsed_seconds(), 0);
        assert!(session.tick(fresh));
        assert_eq!(session.elapsed_seconds(), 1);
    }

    #[test]
    fn win_outcome_is_only_applied_to_the_matching_won_session() {
        let mut session = started(30);
        let target = session.target().expect("target");
        let ticket = session
            .submit_guess(&target.to_string())
            .expect("hit")
            .win
            .expect("won");

        assert!(!session.apply_win_outcome(ticket.generation + 1, WinOutcome::default()));
        assert!(session.outcome().is_none());
        assert!(session.apply_win_outcome(ticket.generation, WinOutcome::default()));
        assert!(session.outcome().is_some());

        session.reset().expect("continue");
        assert!(!session.apply_win_outcome(ticket.generation, WinOutcome::default()));
    }

    #[test]
    fn transition_validator_rejects_invalid_edges() {
        let err = validate_transition(SessionStatus::NotStarted, SessionStatus::Won)
            .expect_err("must reject");
        assert!(matches!(err, GameError::IllegalTransition(message) if message.contains("not_started -> won")));
        assert!(validate_transition(SessionStatus::Won, SessionStatus::NotStarted).is_ok());
        assert!(validate_transition(SessionStatus::Won, SessionStatus::InProgress).is_err());
    }

    #[test]
    fn targets_cover_the_range_roughly_uniformly() {
        let mut session = Session::default();
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut counts = [0u32; MAX_NUMBER as usize];
        let trials = 50_000;
        for _ in 0..trials {
            session.start("kim", &mut rng).expect("start");
            let target = session.target().expect("target");
            counts[(target - MIN_NUMBER) as usize] += 1;
            session.reset().expect("reset");
        }
        let expected = trials / MAX_NUMBER;
        assert!(counts.iter().all(|count| *count > 0), "both endpoints reachable");
        for count in counts {
            assert!(
                count > expected * 7 / 10 && count < expected * 13 / 10,
                "bucket count {count} too far from {expected}"
            );
        }
    }
}
