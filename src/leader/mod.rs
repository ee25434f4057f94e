//! Cross-tab leader election over a shared TTL lease.
//!
//! Exactly one tab per station should own the control channel at steady
//! state. The leader renews well inside the lease TTL; followers poll and
//! take over when the lease is missing or expired. Change notifications from
//! the medium update beliefs immediately instead of waiting for the next
//! poll. The protocol favors availability: brief dual-leadership around
//! simultaneous expiry is tolerated.

pub mod lease;
pub mod medium;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::leader::lease::LeaderLease;
use crate::leader::medium::LeaseMedium;
use crate::state::timer::ScheduledTask;

/// How long a lease lives without renewal.
pub const LEASE_TTL: Duration = Duration::from_secs(3);
/// Leader renewal cadence, well inside the TTL.
pub const RENEW_INTERVAL: Duration = Duration::from_secs(1);
/// Follower poll cadence.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1_500);

/// Wall-clock source, injectable so lease expiry is testable.
pub trait Clock: Send + Sync {
    /// Current unix time in milliseconds.
    fn now_ms(&self) -> u64;
}

/// The real wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64
    }
}

/// One tab's participant in the election.
pub struct LeaderElector {
    tab_id: Uuid,
    medium: Arc<dyn LeaseMedium>,
    clock: Arc<dyn Clock>,
}

/// Handle to a running elector: leadership watch plus graceful resignation.
pub struct LeaderHandle {
    tab_id: Uuid,
    medium: Arc<dyn LeaseMedium>,
    status: Arc<watch::Sender<bool>>,
    task: ScheduledTask,
}

impl LeaderHandle {
    /// The tab id this elector claims leases under.
    pub fn tab_id(&self) -> Uuid {
        self.tab_id
    }

    /// Whether this tab currently believes it is the leader.
    pub fn is_leader(&self) -> bool {
        *self.status.borrow()
    }

    /// Subscribe to leadership changes.
    pub fn leadership(&self) -> watch::Receiver<bool> {
        self.status.subscribe()
    }

    /// Stop participating and remove the lease if this tab still owns it,
    /// enabling near-instant failover to another tab.
    pub async fn resign(self) {
        self.task.cancel();
        let _ = self.status.send(false);
        if let Err(err) = self.medium.clear_if_owner(self.tab_id).await {
            warn!(error = %err, tab_id = %self.tab_id, "failed to clear lease on resignation");
        }
    }
}

impl LeaderElector {
    /// Elector over the given medium and clock, with a fresh tab id.
    pub fn new(medium: Arc<dyn LeaseMedium>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tab_id: Uuid::new_v4(),
            medium,
            clock,
        }
    }

    /// The tab id this elector claims leases under.
    pub fn tab_id(&self) -> Uuid {
        self.tab_id
    }

    /// Attempt a one-shot acquisition. With `force` the current holder is
    /// overwritten; otherwise only a missing, expired or own lease is taken.
    pub async fn acquire(&self, force: bool) -> bool {
        let observed = match self.medium.load().await {
            Ok(observed) => observed,
            Err(err) => {
                warn!(error = %err, "failed to read lease during acquisition");
                return false;
            }
        };

        let now = self.clock.now_ms();
        let available = force
            || observed
                .as_ref()
                .is_none_or(|lease| lease.is_expired(now) || lease.tab_id == self.tab_id);
        if !available {
            return false;
        }

        let claim = LeaderLease::claim(self.tab_id, now, LEASE_TTL.as_millis() as u64);
        match self.medium.store(claim).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "failed to store lease during acquisition");
                false
            }
        }
    }

    /// Start the election loop, returning the handle that owns it.
    pub fn start(self) -> LeaderHandle {
        let (status_tx, _status_rx) = watch::channel(false);
        let status = Arc::new(status_tx);
        let tab_id = self.tab_id;
        let medium = Arc::clone(&self.medium);
        let task_status = Arc::clone(&status);
        let task = ScheduledTask::spawn(run(self, task_status));
        LeaderHandle {
            tab_id,
            medium,
            status,
            task,
        }
    }

    async fn renew(&self, status: &watch::Sender<bool>) {
        let now = self.clock.now_ms();
        match self.medium.load().await {
            Ok(Some(lease)) if lease.tab_id != self.tab_id && !lease.is_expired(now) => {
                // Someone else holds a live lease: stand down instead of
                // fighting over the slot.
                info!(tab_id = %self.tab_id, holder = %lease.tab_id, "demoted by foreign lease");
                let _ = status.send(false);
            }
            Ok(_) => {
                let claim = LeaderLease::claim(self.tab_id, now, LEASE_TTL.as_millis() as u64);
                if let Err(err) = self.medium.store(claim).await {
                    warn!(error = %err, "lease renewal failed");
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to read lease during renewal");
            }
        }
    }

    async fn react_to_change(&self, status: &watch::Sender<bool>) {
        let leading = *status.borrow();
        let now = self.clock.now_ms();
        match self.medium.load().await {
            Ok(Some(lease)) if lease.tab_id == self.tab_id => {}
            Ok(Some(lease)) if !lease.is_expired(now) => {
                if leading {
                    info!(tab_id = %self.tab_id, holder = %lease.tab_id, "demoted by foreign lease");
                    let _ = status.send(false);
                }
            }
            // Lease vanished or lapsed: claim it now instead of waiting for
            // the next poll tick.
            Ok(_) => {
                if self.acquire(false).await {
                    if !leading {
                        info!(tab_id = %self.tab_id, "acquired leadership after lease vanished");
                    }
                    let _ = status.send(true);
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to read lease after change notification");
            }
        }
    }
}

/// Election loop: renewals while leading, polls while following, immediate
/// reactions to medium changes. Independent of command handling.
async fn run(elector: LeaderElector, status: Arc<watch::Sender<bool>>) {
    let mut changes = elector.medium.changes();
    changes.mark_unchanged();

    let mut renew = tokio::time::interval(RENEW_INTERVAL);
    renew.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut poll = tokio::time::interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = renew.tick() => {
                if *status.borrow() {
                    elector.renew(&status).await;
                }
            }
            _ = poll.tick() => {
                if !*status.borrow() {
                    let acquired = elector.acquire(false).await;
                    if acquired {
                        debug!(tab_id = %elector.tab_id, "acquired leadership on poll");
                        let _ = status.send(true);
                    }
                }
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    // Medium dropped; nothing left to elect over.
                    break;
                }
                elector.react_to_change(&status).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leader::medium::MemoryLeaseMedium;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct MockClock(AtomicU64);

    impl MockClock {
        fn at(ms: u64) -> Arc<Self> {
            Arc::new(Self(AtomicU64::new(ms)))
        }

        fn advance(&self, ms: u64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for MockClock {
        fn now_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    async fn wait_for(receiver: &mut watch::Receiver<bool>, expected: bool) {
        let deadline = Duration::from_secs(30);
        tokio::time::timeout(deadline, async {
            loop {
                if *receiver.borrow_and_update() == expected {
                    return;
                }
                receiver.changed().await.expect("status sender alive");
            }
        })
        .await
        .unwrap_or_else(|_| panic!("leadership never became {expected}"));
    }

    #[tokio::test(start_paused = true)]
    async fn first_tab_acquires_immediately() {
        let medium = Arc::new(MemoryLeaseMedium::new());
        let clock = MockClock::at(1_000_000);
        let handle = LeaderElector::new(medium.clone(), clock).start();

        let mut leadership = handle.leadership();
        wait_for(&mut leadership, true).await;

        let lease = medium.load().await.unwrap().expect("lease stored");
        assert_eq!(lease.tab_id, handle.tab_id());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_is_taken_on_next_poll() {
        let medium = Arc::new(MemoryLeaseMedium::new());
        let clock = MockClock::at(1_000_000);
        let stale = LeaderLease {
            tab_id: Uuid::new_v4(),
            expires_at_ms: 999_000,
        };
        medium.store(stale).await.unwrap();

        let handle = LeaderElector::new(medium.clone(), clock).start();
        let mut leadership = handle.leadership();
        wait_for(&mut leadership, true).await;
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_leader_fails_over_within_ttl() {
        let medium = Arc::new(MemoryLeaseMedium::new());
        let clock = MockClock::at(1_000_000);

        let leader = LeaderElector::new(medium.clone(), clock.clone()).start();
        let mut leader_watch = leader.leadership();
        wait_for(&mut leader_watch, true).await;

        let follower = LeaderElector::new(medium.clone(), clock.clone()).start();
        let mut follower_watch = follower.leadership();

        // Crash the leader: its task stops renewing but the lease remains.
        let crashed_tab = leader.tab_id();
        leader.task.cancel();
        drop(leader);

        // While the lease is still live the follower must not take over.
        tokio::time::advance(POLL_INTERVAL * 3).await;
        assert!(!*follower_watch.borrow_and_update());

        // Once the TTL elapses on the wall clock, the very next poll wins.
        clock.advance(LEASE_TTL.as_millis() as u64 + 100);
        wait_for(&mut follower_watch, true).await;

        let lease = medium.load().await.unwrap().expect("lease stored");
        assert_eq!(lease.tab_id, follower.tab_id());
        assert_ne!(lease.tab_id, crashed_tab);
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_lease_demotes_instantly() {
        let medium = Arc::new(MemoryLeaseMedium::new());
        let clock = MockClock::at(1_000_000);

        let handle = LeaderElector::new(medium.clone(), clock.clone()).start();
        let mut leadership = handle.leadership();
        wait_for(&mut leadership, true).await;

        // A peer force-acquires: this tab observes the change and stands
        // down without waiting for any timer.
        let usurper = LeaderLease::claim(Uuid::new_v4(), clock.now_ms(), 3_000);
        medium.store(usurper).await.unwrap();
        wait_for(&mut leadership, false).await;
    }

    #[tokio::test(start_paused = true)]
    async fn resignation_hands_over_without_waiting_for_expiry() {
        let medium = Arc::new(MemoryLeaseMedium::new());
        let clock = MockClock::at(1_000_000);

        let leader = LeaderElector::new(medium.clone(), clock.clone()).start();
        let mut leader_watch = leader.leadership();
        wait_for(&mut leader_watch, true).await;

        let follower = LeaderElector::new(medium.clone(), clock.clone()).start();
        let mut follower_watch = follower.leadership();
        tokio::time::advance(POLL_INTERVAL).await;
        assert!(!*follower_watch.borrow_and_update());

        // Graceful unload clears the lease; the follower reacts to the
        // vanished lease, not to a timer.
        leader.resign().await;
        wait_for(&mut follower_watch, true).await;
    }
}
