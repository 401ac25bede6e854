use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use ahash::RandomState;
use interconnect_data::{NamedValueSet, ValueContainer};
use interconnect_proto::{
    ActionRequest, ActionState, ActionUpdate, MatchRuleSet, ProtocolError, PushFrame, SessionOpen,
    Vpi, VpiKind, PING_SERVICE_NAME,
};
use interconnect_table::{next_seq, Accessor, Table};
use thiserror::Error;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::actions::{
    ActionDispatcher, FacetShared, LocalActionTracker, RemoteActionFacet, RemoteActionTracker,
};
use crate::config::EndpointConfig;
use crate::pool::FramePool;
use crate::tracking::TrackingTable;
use crate::transport::{PushTransport, TransportError, TransportStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Initial state: the server is enumerating its matching names, the
    /// client is absorbing registration records.
    Registering,
    /// Both sides may propagate freely.
    Connected,
    /// The session is over; the engine does no further work.
    Terminated,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("frame seq {seq} unacknowledged after {waited_ms} ms")]
    AckTimeout { seq: u32, waited_ms: u64 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("session ended by owner: {0}")]
    Ended(String),
}

/// Per-session traffic counters, surfaced in logs and in the ping summary.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub vpis_sent: u64,
    pub vpis_received: u64,
    pub requests_sent: u64,
    pub requests_received: u64,
    pub updates_sent: u64,
    pub updates_received: u64,
    pub pings_sent: u64,
}

impl SessionStats {
    fn summary_values(&self) -> NamedValueSet {
        let mut values = NamedValueSet::new();
        values
            .set("framesSent", ValueContainer::U64(self.frames_sent))
            .set("framesReceived", ValueContainer::U64(self.frames_received))
            .set("vpisSent", ValueContainer::U64(self.vpis_sent))
            .set("vpisReceived", ValueContainer::U64(self.vpis_received));
        values
    }
}

struct FrameTracker {
    seq: u32,
    size: usize,
    sent_at: Instant,
}

/// One endpoint of a propagation session.
///
/// The engine owns its session state exclusively and is driven from a
/// single thread by repeated [`service`](PropagationEngine::service) calls.
/// Each pass performs, in order: inbound drain (value writes staged by the
/// drained frames commit in one atomic batch, then action updates fold),
/// pending cancel forwarding, peer-action state tracking, the outbound
/// table scan, frame packing, idle handling, and the ack-age check.
pub struct PropagationEngine {
    cfg: EndpointConfig,
    role: SessionRole,
    state: SessionState,
    table: Arc<Table>,
    transport: Box<dyn PushTransport>,
    dispatcher: Option<Arc<dyn ActionDispatcher>>,

    /// The name-selection rules the peer supplied at session open (server
    /// side); match-any on the client, whose own selection happens against
    /// its configured rules.
    peer_rules: MatchRuleSet,
    peer_name: String,

    tracking: TrackingTable,
    local_actions: HashMap<Uuid, LocalActionTracker, RandomState>,
    remote_actions: HashMap<Uuid, RemoteActionTracker, RandomState>,

    vpi_queue: VecDeque<Vpi>,
    request_queue: VecDeque<ActionRequest>,
    update_queue: VecDeque<ActionUpdate>,
    /// Terminal action updates; packed only once the vpi queue has drained
    /// so an action's table side effects reach the peer first.
    completion_queue: VecDeque<ActionUpdate>,

    pending_pushed: VecDeque<FrameTracker>,
    pending_bytes: usize,

    last_out_seq: u32,
    last_ack_sent: u32,
    last_in_seq: u32,
    last_in_ack: u32,

    last_scan_seq: u32,
    last_scan_at: Option<Instant>,
    force_scan: bool,
    last_activity_at: Instant,
    registration_enumerated: bool,

    abort: Option<SessionError>,
    fault: Option<SessionError>,
    pool: FramePool,
    stats: SessionStats,
}

impl PropagationEngine {
    /// Build the client-side engine. The caller has already opened the
    /// stream with [`session_open`](EndpointConfig)-derived data.
    pub fn client(
        cfg: EndpointConfig,
        table: Arc<Table>,
        transport: Box<dyn PushTransport>,
        dispatcher: Option<Arc<dyn ActionDispatcher>>,
        now: Instant,
    ) -> Self {
        Self::new(
            cfg,
            SessionRole::Client,
            table,
            transport,
            dispatcher,
            MatchRuleSet::match_any(),
            String::new(),
            now,
        )
    }

    /// Build the server-side engine for an accepted session.
    pub fn server(
        cfg: EndpointConfig,
        table: Arc<Table>,
        open: &SessionOpen,
        transport: Box<dyn PushTransport>,
        dispatcher: Option<Arc<dyn ActionDispatcher>>,
        now: Instant,
    ) -> Self {
        Self::new(
            cfg,
            SessionRole::Server,
            table,
            transport,
            dispatcher,
            open.match_rules.clone(),
            open.client_name.clone(),
            now,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        cfg: EndpointConfig,
        role: SessionRole,
        table: Arc<Table>,
        transport: Box<dyn PushTransport>,
        dispatcher: Option<Arc<dyn ActionDispatcher>>,
        peer_rules: MatchRuleSet,
        peer_name: String,
        now: Instant,
    ) -> Self {
        debug!(part = %cfg.part_id, ?role, table = %table.name(), "session starting");
        PropagationEngine {
            cfg,
            role,
            state: SessionState::Registering,
            table,
            transport,
            dispatcher,
            peer_rules,
            peer_name,
            tracking: Default::default(),
            local_actions: Default::default(),
            remote_actions: Default::default(),
            vpi_queue: Default::default(),
            request_queue: Default::default(),
            update_queue: Default::default(),
            completion_queue: Default::default(),
            pending_pushed: Default::default(),
            pending_bytes: 0,
            last_out_seq: 0,
            last_ack_sent: 0,
            last_in_seq: 0,
            last_in_ack: 0,
            last_scan_seq: 0,
            last_scan_at: None,
            force_scan: false,
            last_activity_at: now,
            registration_enumerated: false,
            abort: None,
            fault: None,
            pool: Default::default(),
            stats: Default::default(),
        }
    }

    /// The session-open record a client with this configuration sends.
    pub fn session_open(cfg: &EndpointConfig) -> SessionOpen {
        SessionOpen {
            client_name: cfg.part_id.clone(),
            table_name: cfg.remote_table_name.clone(),
            match_rules: cfg.remote_name_match_rules.clone(),
        }
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.cfg
    }

    /// The local table this engine mirrors.
    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Why the session terminated, once it has.
    pub fn fault(&self) -> Option<&SessionError> {
        self.fault.as_ref()
    }

    pub fn pending_frame_count(&self) -> usize {
        self.pending_pushed.len()
    }

    /// Register the wake callback with the owned transport.
    pub fn set_transport_waker(&mut self, waker: Arc<dyn Fn() + Send + Sync>) {
        self.transport.set_waker(waker);
    }

    /// Terminate the session from the owning side.
    pub fn end_session(&mut self, reason: &str) {
        if self.state != SessionState::Terminated {
            self.teardown(SessionError::Ended(reason.to_owned()));
        }
    }

    /// Start a service action on the peer. The returned facet reflects the
    /// update stream the peer sends back for the generated uuid.
    pub fn start_remote_action(
        &mut self,
        service_name: &str,
        params: Option<NamedValueSet>,
    ) -> RemoteActionFacet {
        let uuid = Uuid::new_v4();
        let shared = FacetShared::new();
        let facet = RemoteActionFacet::new(uuid, Arc::clone(&shared));
        self.enqueue_remote_action(uuid, shared, service_name.to_owned(), params);
        facet
    }

    pub(crate) fn enqueue_remote_action(
        &mut self,
        uuid: Uuid,
        shared: Arc<FacetShared>,
        service_name: String,
        params: Option<NamedValueSet>,
    ) {
        if self.state == SessionState::Terminated {
            shared.complete(ActionState::failed(
                "session terminated; request never reached the peer",
            ));
            return;
        }
        debug!(part = %self.cfg.part_id, %uuid, service = %service_name, "starting remote action");
        self.local_actions.insert(
            uuid,
            LocalActionTracker {
                facet: shared,
                cancel_forwarded: false,
            },
        );
        self.request_queue
            .push_back(ActionRequest::start(uuid, service_name, params));
    }

    /// Run one cooperative service pass. Returns false once the session has
    /// terminated.
    pub fn service(&mut self, now: Instant) -> bool {
        if self.state == SessionState::Terminated {
            return false;
        }

        self.drain_inbound(now);
        self.forward_pending_cancels();
        if self.vpi_queue.is_empty() && self.update_queue.is_empty() {
            self.track_remote_actions();
        }
        self.maybe_scan(now);
        let sent = self.pack_and_send(now);
        if !sent {
            self.idle_pass(now);
        }
        self.check_ack_timeout(now);

        if let Some(reason) = self.abort.take() {
            self.teardown(reason);
            return false;
        }
        true
    }

    // ---- inbound ----

    fn drain_inbound(&mut self, now: Instant) {
        let mut inbound_updates = Vec::new();
        loop {
            if self.abort.is_some() {
                break;
            }
            match self.transport.try_recv() {
                Ok(Some(frame)) => {
                    self.last_activity_at = now;
                    self.stats.frames_received += 1;
                    if let Err(e) = self.process_frame(frame, &mut inbound_updates) {
                        self.abort = Some(e);
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.abort = Some(e.into());
                    break;
                }
            }
        }
        // one atomic table write covers everything staged by the drained
        // burst, so its side effects become visible together
        if self.tracking.any_staged() {
            let mut staged = self.tracking.staged_accessors();
            self.table.set_many(&mut staged, false);
            drop(staged);
            self.tracking.finish_staged();
        }
        // action updates fold after the commit, so any table effects an
        // action implies are visible before its facet moves
        for update in inbound_updates {
            self.process_update(update);
        }
        if self.abort.is_some() {
            return;
        }
        match self.transport.status() {
            TransportStatus::Open => {}
            TransportStatus::Closed => self.abort = Some(TransportError::Closed.into()),
            TransportStatus::Faulted => {
                self.abort =
                    Some(TransportError::Faulted("communication object faulted".into()).into())
            }
        }
    }

    fn process_frame(
        &mut self,
        frame: PushFrame,
        inbound_updates: &mut Vec<ActionUpdate>,
    ) -> Result<(), SessionError> {
        trace!(part = %self.cfg.part_id, seq = frame.seq, ack = frame.ack_seq,
               vpis = frame.vpis.len(), "frame received");
        if frame.ack_seq != 0 {
            self.process_ack(frame.ack_seq)?;
        }
        if frame.seq != 0 {
            self.last_in_seq = frame.seq;
        } else if !frame.vpis.is_empty() {
            return Err(ProtocolError::MissingSeq.into());
        }

        // registration ends at the first server frame with no vpis, or whose
        // leading vpi carries no name
        if self.role == SessionRole::Client
            && self.state == SessionState::Registering
            && (frame.vpis.is_empty() || frame.vpis[0].name.is_none())
        {
            debug!(part = %self.cfg.part_id, names = self.tracking.len(), "registration complete");
            self.state = SessionState::Connected;
        }

        let PushFrame {
            vpis,
            requests,
            updates,
            ..
        } = frame;
        for vpi in vpis {
            self.process_vpi(vpi)?;
        }
        for request in requests {
            self.process_request(request);
        }
        inbound_updates.extend(updates);
        Ok(())
    }

    fn process_ack(&mut self, ack_seq: u32) -> Result<(), SessionError> {
        if ack_seq == self.last_in_ack {
            return Ok(());
        }
        let mut matched = false;
        while let Some(front) = self.pending_pushed.pop_front() {
            self.pending_bytes -= front.size;
            if front.seq == ack_seq {
                matched = true;
                break;
            }
        }
        if !matched {
            return Err(ProtocolError::AckSkipMismatch {
                ack_seq,
                last_processed: self.last_in_ack,
            }
            .into());
        }
        self.last_in_ack = ack_seq;
        Ok(())
    }

    fn stage_inbound(&mut self, index: usize, container: ValueContainer) {
        let item = self.tracking.get_mut(index);
        item.accessor.stage(container);
        item.staged = true;
    }

    fn process_vpi(&mut self, vpi: Vpi) -> Result<(), SessionError> {
        self.stats.vpis_received += 1;
        let kind = vpi.kind()?;
        match (self.role, kind) {
            (SessionRole::Client, VpiKind::Registration) => {
                let conn_name = vpi.name.expect("registration records carry a name");
                if !self.cfg.remote_name_match_rules.matches(&conn_name) {
                    debug!(part = %self.cfg.part_id, name = %conn_name, "dropping non-matching registration");
                    return Ok(());
                }
                let index = match self.tracking.index_of_name(&conn_name) {
                    Some(index) => index,
                    None => {
                        let local = self.local_name_of(&conn_name);
                        let accessor = self.table.get_accessor(&local);
                        let index = self.tracking.insert(accessor, conn_name, 0);
                        // came from the server, so no add-name request is owed
                        self.tracking.get_mut(index).add_request_sent = true;
                        index
                    }
                };
                self.tracking.bind_remote_id(index, vpi.id)?;
                // a value staged before the id was bound can now be flushed
                self.force_scan = true;
                if let Some(container) = vpi.container {
                    self.stage_inbound(index, container);
                }
            }
            (SessionRole::Client, VpiKind::AddNameRequest) => {
                // an echo of our own add-name request; a non-empty container
                // is the server initialising the entry we added
                let conn_name = vpi.name.expect("add-name requests carry a name");
                match (self.tracking.index_of_name(&conn_name), vpi.container) {
                    (Some(index), Some(container)) if !container.is_empty() => {
                        self.stage_inbound(index, container);
                    }
                    _ => {}
                }
            }
            (SessionRole::Server, VpiKind::AddNameRequest) => {
                let conn_name = vpi.name.expect("add-name requests carry a name");
                let index = match self.tracking.index_of_name(&conn_name) {
                    Some(index) => index,
                    None => {
                        let local = self.local_name_of(&conn_name);
                        let accessor = self.table.get_accessor(&local);
                        let id = (self.tracking.len() + 1) as u32;
                        // registration_sent stays false, so the next scan
                        // answers with a registration record binding the id
                        self.tracking.insert(accessor, conn_name, id)
                    }
                };
                if let Some(container) = vpi.container {
                    self.stage_inbound(index, container);
                }
            }
            (SessionRole::Server, VpiKind::Registration) => {
                return Err(ProtocolError::UnexpectedRecord {
                    record: "registration record",
                }
                .into());
            }
            (_, VpiKind::NormalUpdate) => {
                let index = match self.role {
                    SessionRole::Server => self.tracking.index_of_server_id(vpi.id),
                    SessionRole::Client => self.tracking.index_of_remote_id(vpi.id),
                }
                .ok_or(ProtocolError::UnknownUpdateId { id: vpi.id })?;
                let container = vpi.container.unwrap_or(ValueContainer::Empty);
                self.stage_inbound(index, container);
            }
        }
        Ok(())
    }

    fn process_request(&mut self, request: ActionRequest) {
        self.stats.requests_received += 1;
        if request.cancel {
            match self.remote_actions.get(&request.uuid) {
                Some(tracker) => tracker.handle.cancel(),
                None => debug!(uuid = %request.uuid, "cancel for unknown action"),
            }
            return;
        }
        let Some(service_name) = request.service_name else {
            self.completion_queue.push_back(ActionUpdate {
                uuid: request.uuid,
                state: ActionState::failed("request carried no service name"),
            });
            return;
        };
        if service_name == PING_SERVICE_NAME {
            let values = match &request.params {
                Some(params) if !params.is_empty() => self.stats.summary_values(),
                _ => NamedValueSet::new(),
            };
            self.completion_queue.push_back(ActionUpdate {
                uuid: request.uuid,
                state: ActionState::complete(values),
            });
            return;
        }
        if self.remote_actions.contains_key(&request.uuid) {
            debug!(uuid = %request.uuid, "duplicate action request");
            return;
        }
        let started = match &self.dispatcher {
            Some(dispatcher) => dispatcher.start_action(&service_name, request.params.as_ref()),
            None => Err(crate::actions::ActionStartError::UnknownService(
                service_name.clone(),
            )),
        };
        match started {
            Ok(handle) => {
                self.remote_actions.insert(
                    request.uuid,
                    RemoteActionTracker {
                        handle,
                        last_reported: ActionState::issued(),
                    },
                );
            }
            Err(e) => {
                debug!(uuid = %request.uuid, service = %service_name, error = %e, "request not dispatchable");
                self.completion_queue.push_back(ActionUpdate {
                    uuid: request.uuid,
                    state: ActionState::failed(e.to_string()),
                });
            }
        }
    }

    fn process_update(&mut self, update: ActionUpdate) {
        self.stats.updates_received += 1;
        let uuid = update.uuid;
        if update.state.is_terminal() {
            match self.local_actions.remove(&uuid) {
                Some(tracker) => tracker.facet.complete(update.state),
                None => debug!(%uuid, "update for unknown action"),
            }
        } else {
            match self.local_actions.get_mut(&uuid) {
                Some(tracker) => tracker.facet.set_state(update.state),
                None => debug!(%uuid, "update for unknown action"),
            }
        }
    }

    // ---- actions, outbound side ----

    fn forward_pending_cancels(&mut self) {
        for (uuid, tracker) in self.local_actions.iter_mut() {
            if tracker.facet.is_cancel_requested() && !tracker.cancel_forwarded {
                trace!(%uuid, "forwarding cancel");
                self.request_queue.push_back(ActionRequest::cancel(*uuid));
                tracker.cancel_forwarded = true;
            }
        }
    }

    fn track_remote_actions(&mut self) {
        let mut finished = Vec::new();
        for (uuid, tracker) in self.remote_actions.iter_mut() {
            let state = tracker.handle.state();
            if state == tracker.last_reported {
                continue;
            }
            tracker.last_reported = state.clone();
            let update = ActionUpdate { uuid: *uuid, state };
            if update.state.is_terminal() {
                finished.push(*uuid);
                self.completion_queue.push_back(update);
            } else {
                self.update_queue.push_back(update);
            }
        }
        for uuid in finished {
            self.remote_actions.remove(&uuid);
        }
    }

    // ---- name plumbing ----

    /// Outbound: local table name to connection name. `None` when the
    /// configured prefix filters the name out of this session.
    fn conn_name_of(&self, local: &str) -> Option<String> {
        let prefix = &self.cfg.add_remove_local_prefix;
        if prefix.is_empty() {
            Some(local.to_owned())
        } else {
            local.strip_prefix(prefix.as_str()).map(str::to_owned)
        }
    }

    /// Inbound: connection name to local table name.
    fn local_name_of(&self, conn_name: &str) -> String {
        format!("{}{}", self.cfg.add_remove_local_prefix, conn_name)
    }

    fn exports(&self, conn_name: &str) -> bool {
        self.cfg.remote_name_match_rules.matches(conn_name) && self.peer_rules.matches(conn_name)
    }

    // ---- scan ----

    fn maybe_scan(&mut self, now: Instant) {
        if !self.vpi_queue.is_empty() || !self.window_has_room() {
            return;
        }
        let registering = self.state == SessionState::Registering;
        if registering && self.role == SessionRole::Client {
            // no add-name requests or updates may be sent yet
            return;
        }
        if !registering && !self.force_scan {
            if self.table.global_seq() == self.last_scan_seq {
                return;
            }
            if let Some(at) = self.last_scan_at {
                if now.duration_since(at) < self.cfg.nominal_scan_period {
                    return;
                }
            }
        }
        self.scan(now);
    }

    fn scan(&mut self, now: Instant) {
        // capture before reading names so changes made during the scan
        // trigger another one
        self.last_scan_seq = self.table.global_seq();
        self.last_scan_at = Some(now);
        self.force_scan = false;

        for name in self.table.names_range(0, 0) {
            let Some(conn_name) = self.conn_name_of(&name) else {
                continue;
            };
            if !self.exports(&conn_name) || self.tracking.contains_name(&conn_name) {
                continue;
            }
            let accessor = self.table.get_accessor(&name);
            let id = match self.role {
                SessionRole::Server => (self.tracking.len() + 1) as u32,
                SessionRole::Client => 0,
            };
            self.tracking.insert(accessor, conn_name, id);
        }

        // one bulk refresh so every item sees the same table snapshot
        {
            let mut accessors: Vec<&mut Accessor> = self
                .tracking
                .iter_mut()
                .map(|item| &mut item.accessor)
                .collect();
            self.table.update_many(&mut accessors);
        }

        let role = self.role;
        for item in self.tracking.iter_mut() {
            let local_seq = item.accessor.local_seq();
            let vpi = match role {
                SessionRole::Server if !item.registration_sent => {
                    item.registration_sent = true;
                    item.last_sent_seq = local_seq;
                    let container = item
                        .accessor
                        .has_value_been_set()
                        .then(|| item.accessor.value().clone());
                    Some(Vpi::registration(item.id, item.conn_name.clone(), container))
                }
                SessionRole::Client if !item.add_request_sent => {
                    item.add_request_sent = true;
                    item.last_sent_seq = local_seq;
                    let container = item
                        .accessor
                        .has_value_been_set()
                        .then(|| item.accessor.value().clone());
                    Some(Vpi::add_name(item.conn_name.clone(), container))
                }
                _ if item.id != 0 && local_seq != item.last_sent_seq => {
                    item.last_sent_seq = local_seq;
                    Some(Vpi::update(item.id, item.accessor.value().clone()))
                }
                _ => None,
            };
            if let Some(vpi) = vpi {
                self.vpi_queue.push_back(vpi);
            }
        }

        if self.role == SessionRole::Server && self.state == SessionState::Registering {
            self.registration_enumerated = true;
        }
    }

    // ---- outbound ----

    fn window_has_room(&self) -> bool {
        self.pending_pushed.len() < self.cfg.max_pending_frames
            && self.pending_bytes < self.cfg.max_pending_bytes
    }

    fn pack_and_send(&mut self, now: Instant) -> bool {
        let mut sent = false;
        loop {
            if self.abort.is_some() {
                return sent;
            }
            let completions_ready = self.vpi_queue.is_empty() && !self.completion_queue.is_empty();
            let any_work = !self.vpi_queue.is_empty()
                || !self.request_queue.is_empty()
                || !self.update_queue.is_empty()
                || completions_ready;
            if !any_work || !self.window_has_room() {
                break;
            }

            let mut frame = self.pool.acquire();
            frame.ack_seq = self.last_in_seq;
            let size_limit = self.cfg.nominal_max_bytes_per_frame;
            while frame.estimated_content_size() < size_limit {
                let Some(vpi) = self.vpi_queue.pop_front() else {
                    break;
                };
                frame.vpis.push(vpi);
            }
            while frame.estimated_content_size() < size_limit {
                let Some(request) = self.request_queue.pop_front() else {
                    break;
                };
                frame.requests.push(request);
            }
            while frame.estimated_content_size() < size_limit {
                let Some(update) = self.update_queue.pop_front() else {
                    break;
                };
                frame.updates.push(update);
            }
            // completions only ride once every vpi for this scan has been
            // packed, so the action's table effects are delivered first
            if self.vpi_queue.is_empty() {
                while frame.estimated_content_size() < size_limit {
                    let Some(completion) = self.completion_queue.pop_front() else {
                        break;
                    };
                    frame.updates.push(completion);
                }
            }
            if frame.has_no_content() {
                self.pool.release(frame);
                break;
            }
            self.send_tracked(frame, now);
            sent = true;
        }

        // the end-of-registration marker: a content-free frame with a seq,
        // sent once the initial registrations have all been packed
        if self.role == SessionRole::Server
            && self.state == SessionState::Registering
            && self.registration_enumerated
            && self.vpi_queue.is_empty()
            && self.abort.is_none()
            && self.window_has_room()
        {
            let mut frame = self.pool.acquire();
            frame.ack_seq = self.last_in_seq;
            self.send_tracked(frame, now);
            if self.abort.is_none() {
                debug!(part = %self.cfg.part_id, client = %self.peer_name,
                       names = self.tracking.len(), "registration drained");
                self.state = SessionState::Connected;
            }
            sent = true;
        }
        sent
    }

    fn send_tracked(&mut self, mut frame: PushFrame, now: Instant) {
        self.last_out_seq = next_seq(self.last_out_seq);
        frame.seq = self.last_out_seq;
        let size = frame.estimated_content_size();
        match self.transport.push(&frame) {
            Ok(()) => {
                self.pending_pushed.push_back(FrameTracker {
                    seq: frame.seq,
                    size,
                    sent_at: now,
                });
                self.pending_bytes += size;
                self.last_ack_sent = frame.ack_seq;
                self.last_activity_at = now;
                self.stats.frames_sent += 1;
                self.stats.vpis_sent += frame.vpis.len() as u64;
                self.stats.requests_sent += frame.requests.len() as u64;
                self.stats.updates_sent += frame.updates.len() as u64;
                trace!(part = %self.cfg.part_id, seq = frame.seq, ack = frame.ack_seq,
                       vpis = frame.vpis.len(), size, "frame sent");
            }
            Err(e) => self.abort = Some(e.into()),
        }
        self.pool.release(frame);
    }

    fn idle_pass(&mut self, now: Instant) {
        if self.abort.is_some() {
            return;
        }
        if self.last_ack_sent != self.last_in_seq {
            // the peer is owed an ack; send it without a seq of our own
            let mut frame = self.pool.acquire();
            frame.ack_seq = self.last_in_seq;
            match self.transport.push(&frame) {
                Ok(()) => {
                    self.last_ack_sent = frame.ack_seq;
                    self.last_activity_at = now;
                    self.stats.frames_sent += 1;
                    trace!(part = %self.cfg.part_id, ack = frame.ack_seq, "ack-only frame sent");
                }
                Err(e) => self.abort = Some(e.into()),
            }
            self.pool.release(frame);
        } else if now.duration_since(self.last_activity_at) >= self.cfg.idle_ping_after
            && self.window_has_room()
        {
            let mut frame = self.pool.acquire();
            frame.ack_seq = self.last_in_seq;
            self.send_tracked(frame, now);
            self.stats.pings_sent += 1;
            trace!(part = %self.cfg.part_id, "idle ping sent");
        }
    }

    fn check_ack_timeout(&mut self, now: Instant) {
        if self.abort.is_some() {
            return;
        }
        if let Some(front) = self.pending_pushed.front() {
            let waited = now.duration_since(front.sent_at);
            if waited > self.cfg.ack_wait_limit {
                self.abort = Some(SessionError::AckTimeout {
                    seq: front.seq,
                    waited_ms: waited.as_millis() as u64,
                });
            }
        }
    }

    // ---- teardown ----

    fn teardown(&mut self, reason: SessionError) {
        warn!(part = %self.cfg.part_id, %reason, "session terminated");
        for (_, tracker) in self.local_actions.drain() {
            tracker.facet.complete(ActionState::failed("connection severed"));
        }
        // peer-originated actions keep running; they belong to their parts
        self.remote_actions.clear();
        self.vpi_queue.clear();
        self.request_queue.clear();
        self.update_queue.clear();
        self.completion_queue.clear();
        self.pending_pushed.clear();
        self.pending_bytes = 0;
        self.pool.release_all();
        self.transport.close();
        self.fault = Some(reason);
        self.state = SessionState::Terminated;
    }
}
