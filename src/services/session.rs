//! Session supervisor: ties leadership, session readiness and authentication
//! to ownership of the broker connection, and owns mode selection.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::dao::Collaborators;
use crate::dao::local::LocalStore;
use crate::error::ServiceError;
use crate::state::events::{NoticeLevel, StationEvent};
use crate::state::timer::ScheduledTask;
use crate::state::{SharedState, StationIdentity};
use crate::state::{mode, runtime::QuizRuntime};
use crate::transport::broker::BrokerWire;
use crate::transport::{BrokerClient, ConnectionStatus};

const AUTH_POLL_INTERVAL: Duration = Duration::from_secs(1);
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// External dependencies of the supervisor.
pub struct SessionDeps {
    /// Wire used to reach the broker.
    pub wire: Arc<dyn BrokerWire>,
    /// HTTP collaborators.
    pub collab: Collaborators,
    /// Local persisted session.
    pub store: LocalStore,
}

/// Supervise the leader session: only while leadership, session readiness
/// and authentication all hold does the transport receive its connection
/// configuration. Demotion or a terminal disconnect tears the connection
/// down again; the loop then waits for the next opportunity.
pub async fn run(state: SharedState, mut leadership: watch::Receiver<bool>, deps: SessionDeps) {
    loop {
        // Wait for this tab to become the leader.
        let was_follower = !*leadership.borrow_and_update();
        while !*leadership.borrow_and_update() {
            if leadership.changed().await.is_err() {
                return;
            }
        }
        if was_follower {
            state
                .hub()
                .broadcast(StationEvent::LeadershipChanged { leader: true });
        }

        // Leadership alone is not enough: the login screen must have left a
        // usable session behind.
        let session = deps.store.load();
        if !session.is_authenticated() {
            sleep(AUTH_POLL_INTERVAL).await;
            continue;
        }
        let Some(user_id) = session.user_id.clone() else {
            sleep(AUTH_POLL_INTERVAL).await;
            continue;
        };
        {
            let mut identity = state.identity().write().await;
            *identity = Some(StationIdentity {
                user_id: user_id.clone(),
            });
        }

        let client = BrokerClient::new(Arc::clone(&deps.wire), format!("station-{user_id}"));
        let mut status = client.status();
        forward_status(&state, &client);

        if let Err(err) = client.connect().await {
            warn!(error = %err, "broker connection failed");
            state
                .hub()
                .notice(NoticeLevel::Warning, "cannot reach the host channel; retrying");
            sleep(CONNECT_RETRY_DELAY).await;
            continue;
        }

        // The dispatcher only runs in the leader tab, for as long as the
        // connection lives.
        let dispatcher = ScheduledTask::spawn(super::dispatcher::run(
            state.clone(),
            client.clone(),
            deps.collab.clone(),
        ));

        // Hold the session until demotion or a terminal disconnect.
        loop {
            tokio::select! {
                changed = leadership.changed() => {
                    if changed.is_err() || !*leadership.borrow_and_update() {
                        info!("leadership lost; releasing the broker connection");
                        state
                            .hub()
                            .broadcast(StationEvent::LeadershipChanged { leader: false });
                        break;
                    }
                }
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *status.borrow_and_update() == ConnectionStatus::Disconnected {
                        warn!("broker connection ended terminally");
                        break;
                    }
                }
            }
        }

        drop(dispatcher);
        client.disconnect().await;

        // Still the leader after a terminal disconnect: pause, then retry
        // the whole connect path. Demoted: the outer loop waits for the next
        // promotion.
        if *leadership.borrow_and_update() {
            sleep(CONNECT_RETRY_DELAY).await;
        }
    }
}

/// Forward transport status transitions onto the event hub.
fn forward_status(state: &SharedState, client: &BrokerClient) {
    let mut status = client.status();
    let state = state.clone();
    tokio::spawn(async move {
        loop {
            let current = *status.borrow_and_update();
            state
                .hub()
                .broadcast(StationEvent::ConnectionChanged { status: current });
            if status.changed().await.is_err() {
                return;
            }
        }
    });
}

/// Operator-facing mode selection: replaces the runtime and starts the tick
/// task for timed modes.
pub async fn select_mode(state: &SharedState, mode_id: &str) -> Result<(), ServiceError> {
    let Some(descriptor) = mode::find(mode_id) else {
        return Err(ServiceError::NotFound(format!("unknown mode `{mode_id}`")));
    };

    state.install_mode(descriptor).await;
    info!(mode = mode_id, "mode selected");

    if descriptor.features.timer.is_some() {
        let ticker = ScheduledTask::spawn(tick_loop(state.clone()));
        let mut guard = state.runtime().write().await;
        if let Some(runtime) = guard.as_mut() {
            runtime.set_ticker(ticker);
        }
    }

    let snapshot = {
        let guard = state.runtime().read().await;
        guard.as_ref().map(QuizRuntime::snapshot)
    };
    if let Some(snapshot) = snapshot {
        state
            .hub()
            .broadcast(StationEvent::RuntimeChanged { snapshot });
    }
    Ok(())
}

/// Periodic countdown publisher. The remaining time is derived from the
/// captured deadline on every tick, so a suspended tab catches up instead of
/// drifting. Ends once the countdown is over; dies with the runtime that
/// owns it.
async fn tick_loop(state: SharedState) {
    let mut ticks = tokio::time::interval(TICK_INTERVAL);
    loop {
        ticks.tick().await;
        let (remaining_ms, elapsed_ms) = {
            let guard = state.runtime().read().await;
            let Some(runtime) = guard.as_ref() else { return };
            let snapshot = runtime.snapshot();
            match (snapshot.time_remaining_ms, snapshot.time_elapsed_ms) {
                (Some(remaining), Some(elapsed)) => (remaining, elapsed),
                _ => continue,
            }
        };

        state.hub().broadcast(StationEvent::TimeTick {
            remaining_ms,
            elapsed_ms,
        });
        if remaining_ms == 0 {
            state.hub().broadcast(StationEvent::TimeExpired);
            return;
        }
    }
}
