use crate::errors::GameError;
use crate::logging::{append_run_log, structured_fallback_line};
use crate::record::Record;
use crate::record_store::RecordStore;
use crate::runtime::Terminal;
use crate::session::{GuessResult, Session, WinTicket};
use crate::timer::{SessionTimer, TICK_INTERVAL};
use crate::tui::{
    leaderboard_lines, render_game, render_main, render_won, won_badges, GameView, MainView,
    WonView, FRAME_HEIGHT, FRAME_WIDTH,
};
use crate::types::{LeaderboardMode, PersistPolicy, SessionStatus};
use crate::win::{fetch_leaderboard, settle_win, WinOutcome};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub const QUIT_COMMAND: &str = ":q";

/// Everything that reaches the controller from outside the input thread.
#[derive(Debug)]
pub enum GameEvent {
    Tick { generation: u64 },
    WinSettled { generation: u64, outcome: WinOutcome },
    LeaderboardLoaded { request: u64, records: Vec<Record> },
    /// A background job ended without reporting, e.g. a panicking store.
    JobLost { job: &'static str },
}

/// Sends the job's result, or `JobLost` if the job unwinds first.
struct JobReport {
    events: UnboundedSender<GameEvent>,
    job: &'static str,
    sent: bool,
}

impl JobReport {
    fn new(events: UnboundedSender<GameEvent>, job: &'static str) -> Self {
        Self {
            events,
            job,
            sent: false,
        }
    }

    fn send(mut self, event: GameEvent) {
        self.sent = true;
        let _ = self.events.send(event);
    }
}

impl Drop for JobReport {
    fn drop(&mut self) {
        if !self.sent {
            let _ = self.events.send(GameEvent::JobLost { job: self.job });
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameSettings {
    pub persist_policy: PersistPolicy,
    pub leaderboard: LeaderboardMode,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            persist_policy: PersistPolicy::NewBestOnly,
            leaderboard: LeaderboardMode::Best,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GameSummary {
    pub games_won: u32,
    pub games_abandoned: u32,
}

/// Owns the single session and routes input, ticks and store completions into it.
pub struct GameController {
    settings: GameSettings,
    store: Arc<dyn RecordStore>,
    session: Session,
    timer: Option<SessionTimer>,
    tick_interval: Duration,
    events_tx: UnboundedSender<GameEvent>,
    events_rx: UnboundedReceiver<GameEvent>,
    rng: StdRng,
    leaderboard: Vec<Record>,
    leaderboard_request: u64,
    pending_jobs: usize,
    notice: Option<String>,
    summary: GameSummary,
}

impl GameController {
    pub fn new(store: Arc<dyn RecordStore>, settings: GameSettings) -> Self {
        Self::with_rng(store, settings, StdRng::from_os_rng())
    }

    pub fn with_rng(store: Arc<dyn RecordStore>, settings: GameSettings, rng: StdRng) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            settings,
            store,
            session: Session::default(),
            timer: None,
            tick_interval: TICK_INTERVAL,
            events_tx,
            events_rx,
            rng,
            leaderboard: Vec::new(),
            leaderboard_request: 0,
            pending_jobs: 0,
            notice: None,
            summary: GameSummary::default(),
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn leaderboard(&self) -> &[Record] {
        &self.leaderboard
    }

    pub fn summary(&self) -> GameSummary {
        self.summary
    }

    pub fn timer_running(&self) -> bool {
        self.timer.as_ref().is_some_and(SessionTimer::is_running)
    }

    pub fn pending_jobs(&self) -> usize {
        self.pending_jobs
    }

    pub fn start(&mut self, name: &str) -> Result<u64, GameError> {
        let generation = self.session.start(name, &mut self.rng)?;
        self.replace_timer(Some(SessionTimer::start_with_interval(
            generation,
            self.tick_interval,
            self.events_tx.clone(),
        )));
        Ok(generation)
    }

    pub fn submit_guess(&mut self, raw: &str) -> Result<GuessResult, GameError> {
        // Ticks queued while the player was typing belong to this game's time.
        self.drain_events();
        let result = self.session.submit_guess(raw)?;
        if let Some(ticket) = &result.win {
            self.replace_timer(None);
            self.summary.games_won += 1;
            self.spawn_win_settlement(ticket.clone());
        }
        Ok(result)
    }

    /// Gives up the running game, or leaves the won screen.
    pub fn reset(&mut self) -> Result<u64, GameError> {
        if self.session.status() == SessionStatus::InProgress {
            self.summary.games_abandoned += 1;
        }
        self.replace_timer(None);
        self.session.reset()
    }

    /// Re-reads the leaderboard in the background; only the latest request applies.
    pub fn request_leaderboard(&mut self) {
        self.leaderboard_request = self.leaderboard_request.wrapping_add(1);
        let request = self.leaderboard_request;
        let limit = self.settings.leaderboard.limit();
        let store = Arc::clone(&self.store);
        let report = JobReport::new(self.events_tx.clone(), "leaderboard");
        self.pending_jobs += 1;
        thread::spawn(move || {
            let records = fetch_leaderboard(store.as_ref(), limit);
            report.send(GameEvent::LeaderboardLoaded { request, records });
        });
    }

    fn spawn_win_settlement(&mut self, ticket: WinTicket) {
        let store = Arc::clone(&self.store);
        let report = JobReport::new(self.events_tx.clone(), "win_settlement");
        let policy = self.settings.persist_policy;
        let limit = self.settings.leaderboard.limit();
        self.pending_jobs += 1;
        thread::spawn(move || {
            let outcome = settle_win(store.as_ref(), policy, &ticket, limit);
            report.send(GameEvent::WinSettled {
                generation: ticket.generation,
                outcome,
            });
        });
    }

    fn replace_timer(&mut self, next: Option<SessionTimer>) {
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
        self.timer = next;
    }

    pub fn handle_event(&mut self, event: GameEvent) {
        match event {
            GameEvent::Tick { generation } => {
                self.session.tick(generation);
            }
            GameEvent::WinSettled {
                generation,
                outcome,
            } => {
                self.pending_jobs = self.pending_jobs.saturating_sub(1);
                let board = outcome.leaderboard.clone();
                if self.session.apply_win_outcome(generation, outcome) {
                    if let Some(board) = board {
                        self.leaderboard = board;
                    }
                }
            }
            GameEvent::LeaderboardLoaded { request, records } => {
                self.pending_jobs = self.pending_jobs.saturating_sub(1);
                if request == self.leaderboard_request {
                    self.leaderboard = records;
                } else {
                    append_run_log(
                        "debug",
                        "leaderboard.stale_dropped",
                        json!({ "request": request, "latest": self.leaderboard_request }),
                    );
                }
            }
            GameEvent::JobLost { job } => {
                self.pending_jobs = self.pending_jobs.saturating_sub(1);
                append_run_log("error", "job.lost", json!({ "job": job }));
            }
        }
    }

    /// Applies every event already queued without blocking.
    pub fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    /// Blocks until every background store job has reported back.
    pub fn wait_for_store(&mut self) {
        while self.pending_jobs > 0 {
            let Some(event) = self.events_rx.blocking_recv() else {
                break;
            };
            self.handle_event(event);
        }
        self.drain_events();
    }

    pub fn shutdown(&mut self) {
        self.replace_timer(None);
    }

    /// Line-driven game loop until `:q` on the main screen or end of input.
    pub fn run_interactive(
        &mut self,
        terminal: &dyn Terminal,
        initial_name: Option<&str>,
    ) -> Result<GameSummary, GameError> {
        self.request_leaderboard();
        self.wait_for_store();
        if let Some(name) = initial_name {
            self.start_or_notice(name)?;
        }

        loop {
            self.drain_events();
            match self.session.status() {
                SessionStatus::NotStarted => {
                    self.render(terminal)?;
                    let Some(line) = terminal.read_line("name> ")? else {
                        break;
                    };
                    if line.trim() == QUIT_COMMAND {
                        break;
                    }
                    self.start_or_notice(&line)?;
                }
                SessionStatus::InProgress => {
                    self.render(terminal)?;
                    let Some(line) = terminal.read_line("guess> ")? else {
                        self.reset()?;
                        break;
                    };
                    if line.trim() == QUIT_COMMAND {
                        let answer = terminal.read_line("Give up this game? [y/N] ")?;
                        if answer
                            .as_deref()
                            .map(|a| a.trim().eq_ignore_ascii_case("y"))
                            .unwrap_or(false)
                        {
                            self.reset()?;
                            self.request_leaderboard();
                            self.wait_for_store();
                        }
                        continue;
                    }
                    match self.submit_guess(&line) {
                        Ok(result) => {
                            if result.win.is_some() {
                                self.render(terminal)?;
                                self.wait_for_store();
                            }
                        }
                        Err(error) if error.is_user_input() => {
                            self.notice = Some(error.to_string());
                        }
                        Err(error) => return Err(error),
                    }
                }
                SessionStatus::Won => {
                    self.render(terminal)?;
                    let line = terminal.read_line("Press Enter to continue ")?;
                    self.reset()?;
                    if line.is_none() {
                        break;
                    }
                    self.request_leaderboard();
                    self.wait_for_store();
                }
            }
        }

        self.shutdown();
        Ok(self.summary)
    }

    fn start_or_notice(&mut self, name: &str) -> Result<(), GameError> {
        match self.start(name) {
            Ok(_) => Ok(()),
            Err(error) if error.is_user_input() => {
                self.notice = Some(error.to_string());
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    pub fn render(&mut self, terminal: &dyn Terminal) -> Result<(), GameError> {
        let notice = self.notice.take();
        if terminal.stdin_is_tty() {
            let frame = self.render_frame(notice.as_deref())?;
            return terminal.draw(&frame);
        }
        for line in self.fallback_lines(notice.as_deref()) {
            terminal.write_line(&line)?;
        }
        Ok(())
    }

    pub fn render_frame(&self, notice: Option<&str>) -> Result<String, GameError> {
        match self.session.status() {
            SessionStatus::NotStarted => render_main(
                &MainView {
                    leaderboard: &self.leaderboard,
                    mode: self.settings.leaderboard,
                    notice,
                },
                FRAME_WIDTH,
                FRAME_HEIGHT,
            ),
            SessionStatus::InProgress => {
                let guesses = self.session.guesses().iter().copied().collect::<Vec<_>>();
                render_game(
                    &GameView {
                        player: self.session.player_name(),
                        elapsed_seconds: self.session.elapsed_seconds(),
                        guesses: &guesses,
                        notice,
                    },
                    FRAME_WIDTH,
                    FRAME_HEIGHT,
                )
            }
            SessionStatus::Won => render_won(
                &WonView {
                    player: self.session.player_name(),
                    attempts: self.session.attempts(),
                    seconds: self.session.elapsed_seconds(),
                    outcome: self.session.outcome(),
                },
                self.settings.leaderboard,
                FRAME_WIDTH,
                FRAME_HEIGHT,
            ),
        }
    }

    fn fallback_lines(&self, notice: Option<&str>) -> Vec<String> {
        let status = self.session.status();
        let mut lines = Vec::new();
        if let Some(notice) = notice {
            lines.push(structured_fallback_line("notice", status.as_str(), notice));
        }
        match status {
            SessionStatus::NotStarted => {
                if self.leaderboard.is_empty() {
                    lines.push(structured_fallback_line(
                        "main",
                        status.as_str(),
                        "leaderboard empty",
                    ));
                }
                for entry in leaderboard_lines(&self.leaderboard) {
                    lines.push(structured_fallback_line("main", status.as_str(), &entry));
                }
            }
            SessionStatus::InProgress => {
                let last = self
                    .session
                    .guesses()
                    .front()
                    .map(|g| format!(" last={} {}", g.value, g.feedback.as_str()))
                    .unwrap_or_default();
                lines.push(structured_fallback_line(
                    "game",
                    status.as_str(),
                    &format!(
                        "attempts={} seconds={}{last}",
                        self.session.attempts(),
                        self.session.elapsed_seconds()
                    ),
                ));
            }
            SessionStatus::Won => {
                let result = match self.session.outcome() {
                    Some(outcome) => won_badges(outcome),
                    None => "pending".to_string(),
                };
                lines.push(structured_fallback_line(
                    "won",
                    status.as_str(),
                    &format!(
                        "attempts={} seconds={} result={result}",
                        self.session.attempts(),
                        self.session.elapsed_seconds()
                    ),
                ));
            }
        }
        lines
    }
}

impl Drop for GameController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NewRecord;
    use crate::record_store::MemoryRecordStore;

    fn controller(store: Arc<MemoryRecordStore>, policy: PersistPolicy) -> GameController {
        GameController::with_rng(
            store,
            GameSettings {
                persist_policy: policy,
                leaderboard: LeaderboardMode::Top10,
            },
            StdRng::seed_from_u64(11),
        )
        .with_tick_interval(Duration::from_secs(3600))
    }

    fn win(game: &mut GameController) -> GuessResult {
        let target = game.session().target().expect("target");
        game.submit_guess(&target.to_string()).expect("hit")
    }

    #[test]
    fn start_runs_one_timer_and_win_stops_it() {
        let store = Arc::new(MemoryRecordStore::new());
        let mut game = controller(Arc::clone(&store), PersistPolicy::NewBestOnly);
        game.start("kim").expect("start");
        assert!(game.timer_running());

        let result = win(&mut game);
        assert!(result.win.is_some());
        assert!(!game.timer_running());
        game.wait_for_store();

        let outcome = game.session().outcome().expect("settled");
        assert!(outcome.new_best);
        assert!(outcome.persisted);
        assert_eq!(game.leaderboard().len(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(game.summary().games_won, 1);
    }

    #[test]
    fn ticks_from_an_abandoned_game_never_reach_the_new_one() {
        let store = Arc::new(MemoryRecordStore::new());
        let mut game = controller(store, PersistPolicy::NewBestOnly);
        let old = game.start("kim").expect("start");
        game.handle_event(GameEvent::Tick { generation: old });
        assert_eq!(game.session().elapsed_seconds(), 1);

        game.reset().expect("abandon");
        let fresh = game.start("kim").expect("restart");
        assert_eq!(game.session().elapsed_seconds(), 0);
        assert!(game.session().guesses().is_empty());

        game.handle_event(GameEvent::Tick { generation: old });
        assert_eq!(game.session().elapsed_seconds(), 0);
        game.handle_event(GameEvent::Tick { generation: fresh });
        assert_eq!(game.session().elapsed_seconds(), 1);
        assert_eq!(game.summary().games_abandoned, 1);
    }

    #[test]
    fn late_win_settlement_is_dropped_after_reset() {
        let store = Arc::new(MemoryRecordStore::new());
        let mut game = controller(Arc::clone(&store), PersistPolicy::Always);
        game.start("kim").expect("start");
        win(&mut game);
        game.reset().expect("continue before store answers");
        game.start("lee").expect("next game");

        game.wait_for_store();
        assert_eq!(game.session().status(), SessionStatus::InProgress);
        assert!(game.session().outcome().is_none());
        assert_eq!(store.len(), 1, "the insert itself still completed");
    }

    #[test]
    fn store_outage_still_reaches_the_won_screen() {
        let store = Arc::new(MemoryRecordStore::new());
        store.fail_inserts(true);
        store.fail_queries(true);
        let mut game = controller(Arc::clone(&store), PersistPolicy::Always);
        game.start("kim").expect("start");
        win(&mut game);
        game.wait_for_store();

        assert_eq!(game.session().status(), SessionStatus::Won);
        let outcome = game.session().outcome().expect("settled");
        assert!(outcome.new_best);
        assert!(!outcome.persisted);
        assert_eq!(store.insert_attempts(), 1);
    }

    #[test]
    fn only_the_latest_leaderboard_request_applies() {
        let store = Arc::new(MemoryRecordStore::new());
        store
            .insert(NewRecord {
                name: "kim".to_string(),
                attempts: 3,
                seconds: 9,
            })
            .expect("seed");
        let mut game = controller(store, PersistPolicy::NewBestOnly);
        game.request_leaderboard();
        game.request_leaderboard();
        assert_eq!(game.pending_jobs(), 2);
        game.wait_for_store();
        assert_eq!(game.pending_jobs(), 0);
        assert_eq!(game.leaderboard().len(), 1);

        game.handle_event(GameEvent::LeaderboardLoaded {
            request: 1,
            records: Vec::new(),
        });
        assert_eq!(game.leaderboard().len(), 1, "stale response ignored");
    }

    struct PanickingStore;

    impl RecordStore for PanickingStore {
        fn insert(&self, _record: NewRecord) -> Result<Record, GameError> {
            panic!("insert blew up");
        }

        fn query_top(&self, _limit: usize) -> Result<Vec<Record>, GameError> {
            panic!("query blew up");
        }
    }

    #[test]
    fn panicking_store_jobs_do_not_hang_the_controller() {
        let mut game = GameController::with_rng(
            Arc::new(PanickingStore),
            GameSettings::default(),
            StdRng::seed_from_u64(5),
        )
        .with_tick_interval(Duration::from_secs(3600));

        game.request_leaderboard();
        game.wait_for_store();
        assert_eq!(game.pending_jobs(), 0);
        assert!(game.leaderboard().is_empty());

        game.start("kim").expect("start");
        win(&mut game);
        game.wait_for_store();
        assert_eq!(game.pending_jobs(), 0);
        assert_eq!(game.session().status(), SessionStatus::Won);
        assert!(game.session().outcome().is_none());
    }

    #[test]
    fn ticks_queued_before_the_winning_guess_are_counted() {
        let store = Arc::new(MemoryRecordStore::new());
        let mut game = controller(store, PersistPolicy::NewBestOnly);
        let generation = game.start("kim").expect("start");
        for _ in 0..3 {
            game.events_tx
                .send(GameEvent::Tick { generation })
                .expect("queue tick");
        }

        let ticket = win(&mut game).win.expect("won");
        assert_eq!(ticket.seconds, 3);
        assert_eq!(game.session().elapsed_seconds(), 3);
    }

    #[test]
    fn real_timer_advances_the_clock() {
        let store = Arc::new(MemoryRecordStore::new());
        let mut game = controller(store, PersistPolicy::NewBestOnly)
            .with_tick_interval(Duration::from_millis(5));
        game.start("kim").expect("start");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while game.session().elapsed_seconds() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
            game.drain_events();
        }
        assert!(game.session().elapsed_seconds() >= 2);
        game.reset().expect("reset");
        assert!(!game.timer_running());
    }
}
