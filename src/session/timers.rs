use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Handle of one armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// Timer and clock source of a session controller
///
/// A fired timer is reported back as `SessionEvent::TimerFired(handle)`.
pub trait Scheduler: Send {
    /// Time elapsed since the scheduler was created
    fn now(&self) -> Duration;

    fn after(&mut self, delay: Duration) -> TimerHandle;

    fn cancel(&mut self, handle: TimerHandle);
}

/// Callback fired when a timer expires
pub type TimerEmitter = Arc<dyn Fn(TimerHandle) + Send + Sync>;

/// Scheduler backed by `tokio::time`
pub struct TokioScheduler {
    origin: Instant,
    next: u64,
    pending: HashMap<TimerHandle, JoinHandle<()>>,
    emit: TimerEmitter,
}

impl TokioScheduler {
    pub fn new(emit: TimerEmitter) -> Self {
        Self {
            origin: Instant::now(),
            next: 0,
            pending: HashMap::new(),
            emit,
        }
    }

    /// Number of timers that have not fired or been cancelled
    pub fn armed(&self) -> usize {
        self.pending.values().filter(|t| !t.is_finished()).count()
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn after(&mut self, delay: Duration) -> TimerHandle {
        self.pending.retain(|_, task| !task.is_finished());

        let handle = TimerHandle(self.next);
        self.next += 1;

        let emit = Arc::clone(&self.emit);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            emit(handle);
        });
        self.pending.insert(handle, task);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(task) = self.pending.remove(&handle) {
            task.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, task) in self.pending.drain() {
            task.abort();
        }
    }
}
