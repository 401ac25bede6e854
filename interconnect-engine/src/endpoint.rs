use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use interconnect_data::NamedValueSet;
use interconnect_proto::{ActionState, SessionOpen};
use interconnect_table::{Table, TableRegistry};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::actions::{ActionDispatcher, FacetShared, RemoteActionFacet};
use crate::config::EndpointConfig;
use crate::engine::PropagationEngine;
use crate::transport::{PushTransport, TransportError};

enum Command {
    StartAction {
        uuid: Uuid,
        shared: Arc<FacetShared>,
        service_name: String,
        params: Option<NamedValueSet>,
    },
    End {
        reason: String,
    },
}

#[derive(Default)]
struct EndpointShared {
    woken: Mutex<bool>,
    wake: Condvar,
    commands: Mutex<Vec<Command>>,
    terminated: AtomicBool,
}

impl EndpointShared {
    fn wake(&self) {
        let mut woken = self.woken.lock();
        *woken = true;
        self.wake.notify_one();
    }

    fn wait(&self, timeout: Duration) {
        let mut woken = self.woken.lock();
        if !*woken {
            self.wake.wait_for(&mut woken, timeout);
        }
        *woken = false;
    }

    fn take_commands(&self) -> Vec<Command> {
        std::mem::take(&mut *self.commands.lock())
    }

    fn fail_pending_starts(&self, reason: &str) {
        for command in self.take_commands() {
            if let Command::StartAction { shared, .. } = command {
                shared.complete(ActionState::failed(reason));
            }
        }
    }

    fn push_command(&self, command: Command) {
        self.commands.lock().push(command);
        self.wake();
    }
}

fn drive_engine(engine: &mut PropagationEngine, shared: &EndpointShared, stopping: impl Fn() -> bool) {
    let scan_period = engine.config().nominal_scan_period;
    loop {
        for command in shared.take_commands() {
            match command {
                Command::StartAction {
                    uuid,
                    shared,
                    service_name,
                    params,
                } => engine.enqueue_remote_action(uuid, shared, service_name, params),
                Command::End { reason } => engine.end_session(&reason),
            }
        }
        if stopping() {
            engine.end_session("endpoint shutting down");
        }
        if !engine.service(Instant::now()) {
            break;
        }
        shared.wait(scan_period);
    }
}

/// Owns one session's engine and its service thread.
///
/// The thread wakes on inbound transport activity, on local table changes,
/// and at the nominal scan period; it exits when the engine terminates.
pub struct SessionEndpoint {
    shared: Arc<EndpointShared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SessionEndpoint {
    /// Accept an inbound session: resolve the table the client asked for in
    /// the global registry (an empty name selects the default table, an
    /// unknown one is created) and spawn the session's service thread.
    pub fn accept(
        cfg: EndpointConfig,
        open: &SessionOpen,
        transport: Box<dyn PushTransport>,
        dispatcher: Option<Arc<dyn ActionDispatcher>>,
    ) -> io::Result<SessionEndpoint> {
        let table = TableRegistry::global().lookup_or_create(&open.table_name);
        let engine =
            PropagationEngine::server(cfg, table, open, transport, dispatcher, Instant::now());
        SessionEndpoint::spawn(engine)
    }

    /// Spawn the service thread for an already constructed engine. Used
    /// directly on the server side (one endpoint per accepted session);
    /// clients usually go through [`ClientSession`] for reconnect handling.
    pub fn spawn(mut engine: PropagationEngine) -> io::Result<SessionEndpoint> {
        let shared = Arc::new(EndpointShared::default());

        let waker: Arc<dyn Fn() + Send + Sync> = {
            let shared = Arc::clone(&shared);
            Arc::new(move || shared.wake())
        };
        engine.set_transport_waker(waker);

        let table = Arc::clone(engine.table());
        let observer = {
            let shared = Arc::clone(&shared);
            table.observe(move || shared.wake())
        };

        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(format!("interconnect-{}", engine.config().part_id))
            .spawn(move || {
                drive_engine(&mut engine, &thread_shared, || false);
                table.unobserve(observer);
                thread_shared.terminated.store(true, Ordering::Release);
                thread_shared.fail_pending_starts("session terminated");
            })?;

        Ok(SessionEndpoint {
            shared,
            thread: Some(thread),
        })
    }

    /// Start a service action on the peer; see
    /// [`PropagationEngine::start_remote_action`].
    pub fn start_remote_action(
        &self,
        service_name: &str,
        params: Option<NamedValueSet>,
    ) -> RemoteActionFacet {
        let uuid = Uuid::new_v4();
        let shared = FacetShared::new();
        let facet = RemoteActionFacet::new(uuid, Arc::clone(&shared));
        if self.is_terminated() {
            shared.complete(ActionState::failed(
                "session terminated; request never reached the peer",
            ));
            return facet;
        }
        self.shared.push_command(Command::StartAction {
            uuid,
            shared,
            service_name: service_name.to_owned(),
            params,
        });
        facet
    }

    /// Ask the session to end; the service thread tears the stream down on
    /// its next pass.
    pub fn end(&self, reason: &str) {
        self.shared.push_command(Command::End {
            reason: reason.to_owned(),
        });
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::Acquire)
    }

    /// Block until the service thread has exited.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SessionEndpoint {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.end("endpoint dropped");
            let _ = thread.join();
        }
    }
}

/// Produces a fresh transport per connection attempt on the client side.
pub trait SessionConnector: Send {
    fn connect(&mut self, open: &SessionOpen) -> Result<Box<dyn PushTransport>, TransportError>;
}

impl<F> SessionConnector for F
where
    F: FnMut(&SessionOpen) -> Result<Box<dyn PushTransport>, TransportError> + Send,
{
    fn connect(&mut self, open: &SessionOpen) -> Result<Box<dyn PushTransport>, TransportError> {
        self(open)
    }
}

/// The client-side session owner: connects, drives the engine, and after a
/// session or connection failure waits out the reconnect holdoff and tries
/// again, until stopped.
pub struct ClientSession {
    shared: Arc<EndpointShared>,
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ClientSession {
    /// Like [`spawn`](ClientSession::spawn), resolving the local table from
    /// the configured `local_table_name` in the global registry.
    pub fn spawn_from_registry(
        cfg: EndpointConfig,
        connector: impl SessionConnector + 'static,
        dispatcher: Option<Arc<dyn ActionDispatcher>>,
    ) -> io::Result<ClientSession> {
        let table = TableRegistry::global().lookup_or_create(&cfg.local_table_name);
        Self::spawn(cfg, table, connector, dispatcher)
    }

    pub fn spawn(
        cfg: EndpointConfig,
        table: Arc<Table>,
        mut connector: impl SessionConnector + 'static,
        dispatcher: Option<Arc<dyn ActionDispatcher>>,
    ) -> io::Result<ClientSession> {
        let shared = Arc::new(EndpointShared::default());
        let stop = Arc::new(AtomicBool::new(false));

        let thread_shared = Arc::clone(&shared);
        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name(format!("interconnect-{}", cfg.part_id))
            .spawn(move || {
                let open = PropagationEngine::session_open(&cfg);
                while !thread_stop.load(Ordering::Acquire) {
                    match connector.connect(&open) {
                        Ok(mut transport) => {
                            let waker: Arc<dyn Fn() + Send + Sync> = {
                                let shared = Arc::clone(&thread_shared);
                                Arc::new(move || shared.wake())
                            };
                            transport.set_waker(waker);
                            let mut engine = PropagationEngine::client(
                                cfg.clone(),
                                Arc::clone(&table),
                                transport,
                                dispatcher.clone(),
                                Instant::now(),
                            );
                            let observer = {
                                let shared = Arc::clone(&thread_shared);
                                table.observe(move || shared.wake())
                            };
                            let session_stop = Arc::clone(&thread_stop);
                            drive_engine(&mut engine, &thread_shared, || {
                                session_stop.load(Ordering::Acquire)
                            });
                            table.unobserve(observer);
                            debug!(part = %cfg.part_id, fault = ?engine.fault(), "client session over");
                        }
                        Err(e) => {
                            warn!(part = %cfg.part_id, error = %e, "connection attempt failed");
                        }
                    }
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                    // actions started while unconnected cannot reach a peer
                    thread_shared.fail_pending_starts("not connected");
                    thread_shared.wait(cfg.reconnect_holdoff);
                }
                thread_shared.terminated.store(true, Ordering::Release);
                thread_shared.fail_pending_starts("client session stopped");
            })?;

        Ok(ClientSession {
            shared,
            stop,
            thread: Some(thread),
        })
    }

    pub fn start_remote_action(
        &self,
        service_name: &str,
        params: Option<NamedValueSet>,
    ) -> RemoteActionFacet {
        let uuid = Uuid::new_v4();
        let shared = FacetShared::new();
        let facet = RemoteActionFacet::new(uuid, Arc::clone(&shared));
        if self.stop.load(Ordering::Acquire) {
            shared.complete(ActionState::failed("client session stopped"));
            return facet;
        }
        self.shared.push_command(Command::StartAction {
            uuid,
            shared,
            service_name: service_name.to_owned(),
            params,
        });
        facet
    }

    /// Stop reconnecting and end any live session.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.shared.wake();
    }

    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.stop();
            let _ = thread.join();
        }
    }
}
