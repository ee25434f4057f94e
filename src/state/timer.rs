//! Countdown and scheduled-task primitives.
//!
//! The countdown never decrements a stored value: remaining time is derived
//! on every read from a captured absolute deadline, so it stays correct when
//! the process is suspended between ticks.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A global countdown anchored to an absolute deadline.
#[derive(Debug, Clone, Copy)]
pub struct Countdown {
    deadline: Instant,
    total: Duration,
}

impl Countdown {
    /// Start a countdown of the given length from now.
    pub fn start(total: Duration) -> Self {
        Self {
            deadline: Instant::now() + total,
            total,
        }
    }

    /// Remaining time, clamped to zero.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Elapsed time, clamped to the countdown length.
    pub fn elapsed(&self) -> Duration {
        self.total.saturating_sub(self.remaining())
    }

    /// True once the deadline has passed.
    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Owned handle to a background task; aborting on drop keeps interval work
/// from outliving the component that started it.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawn a future as an owned scheduled task.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    /// Stop the task immediately.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn countdown_derives_from_deadline() {
        let countdown = Countdown::start(Duration::from_secs(300));
        assert_eq!(countdown.remaining(), Duration::from_secs(300));
        assert!(!countdown.expired());

        tokio::time::advance(Duration::from_millis(299_500)).await;
        assert_eq!(countdown.remaining(), Duration::from_millis(500));

        tokio::time::advance(Duration::from_millis(750)).await;
        assert!(countdown.expired());
        assert_eq!(countdown.remaining(), Duration::ZERO);
        assert_eq!(countdown.elapsed(), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_task_stops_on_drop() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<u32>();
        let task = ScheduledTask::spawn(async move {
            let mut ticks = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticks.tick().await;
                if tx.send(1).is_err() {
                    break;
                }
            }
        });

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(rx.recv().await.is_some());
        drop(task);

        tokio::time::advance(Duration::from_secs(5)).await;
        while rx.try_recv().is_ok() {}
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
