//! Single-flight refresh gate and pause registry for one augmented client.

use std::{
    collections::HashSet,
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
};

use futures::{
    channel::oneshot,
    future::{self, BoxFuture, FutureExt, Shared},
};

use crate::{AuthRefreshError, ClientId, FailedRequest};

/// A refresh operation as stored by the coordinator.
pub type RefreshFuture = BoxFuture<'static, Result<(), AuthRefreshError>>;

/// Starts a token refresh for a failed request.
///
/// Closures `Fn(FailedRequest) -> impl Future<Output = Result<(), E>>` implement
/// this trait. Hand-written implementations may return `None` to decline, which
/// the coordinator treats as a failed refresh.
pub trait AuthRefresher: Send + Sync {
    fn start_refresh(&self, failed: &FailedRequest) -> Option<RefreshFuture>;
}

impl<F, Fut, E> AuthRefresher for F
where
    F: Fn(FailedRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: fmt::Display,
{
    fn start_refresh(&self, failed: &FailedRequest) -> Option<RefreshFuture> {
        let refresh = self(failed.clone());
        Some(
            async move {
                refresh
                    .await
                    .map_err(|err| AuthRefreshError::RefreshFailed(err.to_string()))
            }
            .boxed(),
        )
    }
}

/// Handle to the in-flight refresh shared by every waiter.
#[derive(Clone)]
pub struct PendingRefresh {
    generation: u64,
    shared: Shared<RefreshFuture>,
}

impl fmt::Debug for PendingRefresh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRefresh")
            .field("generation", &self.generation)
            .finish()
    }
}

impl PendingRefresh {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Waits for the refresh to settle. Every waiter observes the same result.
    pub async fn settled(&self) -> Result<(), AuthRefreshError> {
        self.shared.clone().await
    }
}

#[derive(Debug, Default)]
enum RefreshSlot {
    #[default]
    Idle,
    Pending(PendingRefresh),
}

#[derive(Debug, Default)]
struct CoordinationState {
    slot: RefreshSlot,
    paused: HashSet<ClientId>,
    queue_marker: Option<u64>,
    next_generation: u64,
}

/// Point-in-time view of the coordination state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoordinationSnapshot {
    /// Generation of the outstanding refresh, if any.
    pub pending_generation: Option<u64>,
    pub paused: Vec<ClientId>,
    pub queue_marker: Option<u64>,
}

impl CoordinationSnapshot {
    pub fn is_refreshing(&self) -> bool {
        self.pending_generation.is_some()
    }
}

/// Owns the refresh slot, the paused set and the queue marker of one
/// augmented client. Never shared between augmented clients.
pub struct RefreshCoordinator {
    refresher: Arc<dyn AuthRefresher>,
    state: Mutex<CoordinationState>,
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("state", &self.snapshot())
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new(refresher: Arc<dyn AuthRefresher>) -> Self {
        Self {
            refresher,
            state: Mutex::new(CoordinationState::default()),
        }
    }

    /// Returns the outstanding refresh, starting one if the slot is idle.
    ///
    /// The refresher runs at most once per idle-to-pending transition. A
    /// refresher that declines yields an already-failed refresh carrying
    /// [`AuthRefreshError::InvalidRefreshResult`].
    pub fn get_or_start_refresh(&self, failed: &FailedRequest) -> PendingRefresh {
        let acquired = Self::join_or_reserve(&mut self.lock_state());
        self.finish(acquired, failed, None)
    }

    /// Enters the refresh flow for `owner` in one step.
    ///
    /// With `pause` set, returns `None` if `owner` is already paused and
    /// otherwise pauses it in the same critical section that joins or starts
    /// the refresh. The refresher is called after the lock is released, so it
    /// may use this coordinator. If it panics the slot is reset and `owner`
    /// unpaused before the panic propagates.
    pub fn begin(
        &self,
        owner: ClientId,
        pause: bool,
        failed: &FailedRequest,
    ) -> Option<PendingRefresh> {
        let acquired = {
            let mut state = self.lock_state();
            if pause && !state.paused.insert(owner) {
                return None;
            }
            Self::join_or_reserve(&mut state)
        };
        Some(self.finish(acquired, failed, pause.then_some(owner)))
    }

    fn join_or_reserve(state: &mut CoordinationState) -> Acquired {
        if let RefreshSlot::Pending(pending) = &state.slot {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                generation = pending.generation,
                "joining in-flight auth refresh"
            );
            return Acquired::Joined(pending.clone());
        }

        let (sender, receiver) = oneshot::channel::<RefreshFuture>();
        let refresh = async move {
            match receiver.await {
                Ok(refresh) => refresh.await,
                Err(_) => Err(AuthRefreshError::RefreshFailed(
                    "auth refresher panicked before returning a refresh operation".to_owned(),
                )),
            }
        }
        .boxed();

        state.next_generation += 1;
        let pending = PendingRefresh {
            generation: state.next_generation,
            shared: refresh.shared(),
        };
        state.slot = RefreshSlot::Pending(pending.clone());
        Acquired::Started(pending, sender)
    }

    fn finish(
        &self,
        acquired: Acquired,
        failed: &FailedRequest,
        owner: Option<ClientId>,
    ) -> PendingRefresh {
        match acquired {
            Acquired::Joined(pending) => pending,
            Acquired::Started(pending, sender) => {
                self.launch(&pending, sender, failed, owner);
                pending
            }
        }
    }

    fn launch(
        &self,
        pending: &PendingRefresh,
        sender: oneshot::Sender<RefreshFuture>,
        failed: &FailedRequest,
        owner: Option<ClientId>,
    ) {
        let mut unwind = ResetOnUnwind {
            coordinator: self,
            owner,
            generation: pending.generation,
            armed: true,
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            generation = pending.generation,
            url = failed.request.url(),
            "starting auth refresh"
        );

        let refresh = match self.refresher.start_refresh(failed) {
            Some(refresh) => refresh,
            None => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    url = failed.request.url(),
                    "auth refresher did not return a refresh operation; treating refresh as failed"
                );
                future::ready(Err(AuthRefreshError::InvalidRefreshResult)).boxed()
            }
        };
        unwind.armed = false;
        let _ = sender.send(refresh);
    }

    /// Marks `client` as paused. Idempotent.
    pub fn pause(&self, client: ClientId) {
        self.lock_state().paused.insert(client);
    }

    /// Removes `client` from the paused set. Idempotent.
    pub fn unpause(&self, client: ClientId) {
        self.lock_state().paused.remove(&client);
    }

    pub fn is_paused(&self, client: ClientId) -> bool {
        self.lock_state().paused.contains(&client)
    }

    /// Returns the active queue marker, installing one if none is set.
    pub fn install_queue_marker(&self) -> u64 {
        let mut state = self.lock_state();
        if let Some(marker) = state.queue_marker {
            return marker;
        }
        let marker = state.next_generation;
        state.queue_marker = Some(marker);
        marker
    }

    /// Clears the refresh slot and queue marker and unpauses `owner`.
    ///
    /// Runs only when the slot is idle or still holds `generation`; a newer
    /// refresh keeps its state. Safe to call any number of times.
    pub fn cleanup(&self, owner: ClientId, generation: u64) {
        self.reset(Some(owner), generation);
    }

    fn reset(&self, owner: Option<ClientId>, generation: u64) {
        let mut state = self.lock_state();
        if let RefreshSlot::Pending(pending) = &state.slot {
            if pending.generation != generation {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    generation,
                    current = pending.generation,
                    "skipping cleanup, a newer auth refresh is in flight"
                );
                return;
            }
        }
        state.slot = RefreshSlot::Idle;
        state.queue_marker = None;
        if let Some(owner) = owner {
            state.paused.remove(&owner);
        }
    }

    pub fn snapshot(&self) -> CoordinationSnapshot {
        let state = self.lock_state();
        let pending_generation = match &state.slot {
            RefreshSlot::Idle => None,
            RefreshSlot::Pending(pending) => Some(pending.generation),
        };
        let mut paused: Vec<ClientId> = state.paused.iter().copied().collect();
        paused.sort();
        CoordinationSnapshot {
            pending_generation,
            paused,
            queue_marker: state.queue_marker,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CoordinationState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            #[cfg(feature = "tracing")]
            tracing::error!("auth refresh state mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

enum Acquired {
    Joined(PendingRefresh),
    Started(PendingRefresh, oneshot::Sender<RefreshFuture>),
}

/// Resets a freshly started slot if the refresher unwinds.
struct ResetOnUnwind<'a> {
    coordinator: &'a RefreshCoordinator,
    owner: Option<ClientId>,
    generation: u64,
    armed: bool,
}

impl Drop for ResetOnUnwind<'_> {
    fn drop(&mut self) {
        if self.armed {
            #[cfg(feature = "tracing")]
            tracing::error!(
                generation = self.generation,
                "auth refresher panicked, resetting refresh state"
            );
            self.coordinator.reset(self.owner, self.generation);
        }
    }
}
