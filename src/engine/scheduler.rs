//! Timer capability used by the ticker, the ready timeout and reconnection grace
//!
//! Everything time-based goes through [`Scheduler`], so tests can run on
//! Tokio's paused clock instead of waiting in real time.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// One-shot task
pub type Task = BoxFuture<'static, ()>;

/// Repeating task; returning `Break` stops the timer
pub type RepeatingTask = Box<dyn FnMut() -> BoxFuture<'static, ControlFlow<()>> + Send>;

pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`
    fn after(&self, delay: Duration, task: Task) -> CancelToken;

    /// Run `task` every `period`, first fire one period from now
    fn every(&self, period: Duration, task: RepeatingTask) -> CancelToken;
}

/// Handle to a scheduled timer. Cancelling is idempotent and a task that has
/// already started running is allowed to complete.
#[derive(Clone, Debug)]
pub struct CancelToken {
    cancel: Arc<watch::Sender<bool>>,
    finished: Arc<AtomicBool>,
}

impl CancelToken {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        let token = Self {
            cancel: Arc::new(tx),
            finished: Arc::new(AtomicBool::new(false)),
        };
        (token, rx)
    }

    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// True while the timer may still fire
    pub fn is_active(&self) -> bool {
        !self.is_cancelled() && !self.finished.load(Ordering::Acquire)
    }

    fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

/// Resolves once the token is cancelled. If every token clone was dropped the
/// timer can no longer be cancelled, so this never resolves.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Scheduler backed by the Tokio runtime timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn after(&self, delay: Duration, task: Task) -> CancelToken {
        let (token, mut rx) = CancelToken::new();
        let handle = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled(&mut rx) => {}
                _ = tokio::time::sleep(delay) => task.await,
            }
            handle.mark_finished();
        });
        token
    }

    fn every(&self, period: Duration, mut task: RepeatingTask) -> CancelToken {
        let (token, mut rx) = CancelToken::new();
        let handle = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled(&mut rx) => break,
                    _ = ticker.tick() => {
                        if task().await.is_break() {
                            break;
                        }
                    }
                }
            }
            handle.mark_finished();
        });
        token
    }
}
