use crate::game::GameEvent;
use crate::logging::append_run_log;
use serde_json::json;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Periodic elapsed-time source bound to one session generation.
///
/// The worker thread waits on its cancel channel with a timeout, so `cancel`
/// wakes it immediately and joins it: once `cancel` returns, no further tick
/// for this generation is sent. Ticks already queued on the event channel are
/// dropped by the session's generation check.
pub struct SessionTimer {
    generation: u64,
    cancel_tx: Option<mpsc::Sender<()>>,
    join: Option<thread::JoinHandle<()>>,
}

impl SessionTimer {
    pub fn start(generation: u64, events: UnboundedSender<GameEvent>) -> Self {
        Self::start_with_interval(generation, TICK_INTERVAL, events)
    }

    pub fn start_with_interval(
        generation: u64,
        interval: Duration,
        events: UnboundedSender<GameEvent>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let join = thread::spawn(move || loop {
            match cancel_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if events.send(GameEvent::Tick { generation }).is_err() {
                        break;
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        append_run_log(
            "debug",
            "timer.started",
            json!({ "generation": generation }),
        );
        Self {
            generation,
            cancel_tx: Some(cancel_tx),
            join: Some(join),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    pub fn cancel(&mut self) {
        let Some(cancel_tx) = self.cancel_tx.take() else {
            return;
        };
        let _ = cancel_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        append_run_log(
            "debug",
            "timer.cancelled",
            json!({ "generation": self.generation }),
        );
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
