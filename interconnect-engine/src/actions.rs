use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use interconnect_data::NamedValueSet;
use interconnect_proto::ActionState;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// The host-part boundary for peer-originated service actions.
///
/// The engine hands every inbound (non-ping) request to the dispatcher; the
/// returned handle is polled for state changes on each service pass and
/// cancelled when the peer asks.
pub trait ActionDispatcher: Send + Sync {
    fn start_action(
        &self,
        service_name: &str,
        params: Option<&NamedValueSet>,
    ) -> Result<Box<dyn ActionHandle>, ActionStartError>;
}

/// A locally running service action started on behalf of the peer.
pub trait ActionHandle: Send {
    /// The action's current state. Polled once per engine service pass.
    fn state(&self) -> ActionState;

    /// Ask the action to stop. Must be idempotent; completion is still
    /// reported through [`state`](ActionHandle::state).
    fn cancel(&self);
}

impl std::fmt::Debug for dyn ActionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionHandle")
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionStartError {
    #[error("no part provides service {0:?}")]
    UnknownService(String),

    #[error("service {service:?} rejected the request: {reason}")]
    Rejected { service: String, reason: String },
}

/// A dispatcher serving exactly one named service from a handle factory.
/// Compose several behind your own [`ActionDispatcher`] when a part exposes
/// more.
pub struct SingleServiceDispatcher {
    name: String,
    #[allow(clippy::type_complexity)]
    factory: Box<dyn Fn(Option<&NamedValueSet>) -> Box<dyn ActionHandle> + Send + Sync>,
}

impl SingleServiceDispatcher {
    pub fn new(
        name: impl Into<String>,
        factory: impl Fn(Option<&NamedValueSet>) -> Box<dyn ActionHandle> + Send + Sync + 'static,
    ) -> Self {
        SingleServiceDispatcher {
            name: name.into(),
            factory: Box::new(factory),
        }
    }
}

impl ActionDispatcher for SingleServiceDispatcher {
    fn start_action(
        &self,
        service_name: &str,
        params: Option<&NamedValueSet>,
    ) -> Result<Box<dyn ActionHandle>, ActionStartError> {
        if service_name == self.name {
            Ok((self.factory)(params))
        } else {
            Err(ActionStartError::UnknownService(service_name.to_owned()))
        }
    }
}

pub(crate) struct FacetShared {
    state: Mutex<FacetState>,
    completed: Condvar,
    cancel_requested: AtomicBool,
}

struct FacetState {
    current: ActionState,
    done: bool,
}

impl FacetShared {
    pub(crate) fn new() -> Arc<FacetShared> {
        Arc::new(FacetShared {
            state: Mutex::new(FacetState {
                current: ActionState::issued(),
                done: false,
            }),
            completed: Condvar::new(),
            cancel_requested: AtomicBool::new(false),
        })
    }

    /// Record a non-terminal state reported by the peer.
    pub(crate) fn set_state(&self, state: ActionState) {
        let mut guard = self.state.lock();
        if !guard.done {
            guard.current = state;
        }
    }

    /// Record the terminal state and wake any waiters. Later completions
    /// are ignored, so "connection severed" cannot overwrite a real result.
    pub(crate) fn complete(&self, state: ActionState) {
        let mut guard = self.state.lock();
        if guard.done {
            return;
        }
        guard.current = state;
        guard.done = true;
        self.completed.notify_all();
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }
}

/// The initiator-side facet of a remote service action.
///
/// Returned when a local part starts an action on the peer; reflects the
/// state stream the peer sends back. Dropping the facet does not cancel the
/// action.
#[derive(Clone)]
pub struct RemoteActionFacet {
    uuid: Uuid,
    shared: Arc<FacetShared>,
}

impl RemoteActionFacet {
    pub(crate) fn new(uuid: Uuid, shared: Arc<FacetShared>) -> Self {
        RemoteActionFacet { uuid, shared }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The most recently observed state.
    pub fn state(&self) -> ActionState {
        self.shared.state.lock().current.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.shared.state.lock().done
    }

    /// Block until the action reaches a terminal state, or until the
    /// timeout elapses (`None` on timeout).
    pub fn wait_complete(&self, timeout: Duration) -> Option<ActionState> {
        let mut guard = self.shared.state.lock();
        if !guard.done {
            self.shared.completed.wait_for(&mut guard, timeout);
        }
        guard.done.then(|| guard.current.clone())
    }

    /// Flag the action for cancellation; the engine forwards the cancel to
    /// the peer on its next service pass.
    pub fn request_cancel(&self) {
        self.shared.cancel_requested.store(true, Ordering::Release);
    }
}

/// Engine-side record of a locally originated action awaiting peer updates.
pub(crate) struct LocalActionTracker {
    pub facet: Arc<FacetShared>,
    pub cancel_forwarded: bool,
}

/// Engine-side record of a peer-originated action running locally.
pub(crate) struct RemoteActionTracker {
    pub handle: Box<dyn ActionHandle>,
    pub last_reported: ActionState,
}
