//! Threaded endpoint wiring: real service threads over the in-process
//! transport, including the client session's connector path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use interconnect_data::ValueContainer;
use interconnect_engine::transport::{mem, PushTransport, TransportError};
use interconnect_engine::{
    ClientSession, EndpointConfig, PropagationEngine, SessionEndpoint,
};
use interconnect_proto::{ActionStateCode, SessionOpen, PING_SERVICE_NAME};
use interconnect_table::Table;
use parking_lot::Mutex;

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

fn mirrored_value(table: &Arc<Table>, name: &str, expected: &ValueContainer) -> bool {
    let mut accessor = table.get_accessor(name);
    accessor.update();
    accessor.value() == expected
}

#[test]
fn threaded_endpoints_mirror_values_and_serve_pings() {
    let server_table = Table::new("S");
    server_table
        .get_accessor("x")
        .set_value(ValueContainer::I32(1));
    let client_table = Table::new("C");

    let (server_half, client_half) = mem::duplex();
    let client_cfg = EndpointConfig::new("client");
    let open = PropagationEngine::session_open(&client_cfg);

    let server = SessionEndpoint::spawn(PropagationEngine::server(
        EndpointConfig::new("server"),
        Arc::clone(&server_table),
        &open,
        Box::new(server_half),
        None,
        Instant::now(),
    ))
    .unwrap();
    let client = SessionEndpoint::spawn(PropagationEngine::client(
        client_cfg,
        Arc::clone(&client_table),
        Box::new(client_half),
        None,
        Instant::now(),
    ))
    .unwrap();

    assert!(wait_for(|| mirrored_value(
        &client_table,
        "x",
        &ValueContainer::I32(1)
    )));

    server_table
        .get_accessor("x")
        .set_value(ValueContainer::I32(2));
    assert!(wait_for(|| mirrored_value(
        &client_table,
        "x",
        &ValueContainer::I32(2)
    )));

    let facet = client.start_remote_action(PING_SERVICE_NAME, None);
    let state = facet.wait_complete(Duration::from_secs(5)).unwrap();
    assert_eq!(state.code, ActionStateCode::Complete);

    client.end("test over");
    client.join();
    // the closed stream takes the server endpoint down as well
    assert!(wait_for(|| server.is_terminated()));
    server.join();
}

#[test]
fn client_session_connects_through_its_connector() {
    let server_table = Table::new("S2");
    server_table
        .get_accessor("k")
        .set_value(ValueContainer::I64(9));
    let client_table = Table::new("C2");

    let accepted: Arc<Mutex<Vec<SessionEndpoint>>> = Default::default();
    let sink = Arc::clone(&accepted);
    let connector_table = Arc::clone(&server_table);
    let connector = move |open: &SessionOpen| {
        let (server_half, client_half) = mem::duplex();
        let endpoint = SessionEndpoint::spawn(PropagationEngine::server(
            EndpointConfig::new("server"),
            Arc::clone(&connector_table),
            open,
            Box::new(server_half),
            None,
            Instant::now(),
        ))
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        sink.lock().push(endpoint);
        Ok(Box::new(client_half) as Box<dyn PushTransport>)
    };

    let client = ClientSession::spawn(
        EndpointConfig::new("client"),
        Arc::clone(&client_table),
        connector,
        None,
    )
    .unwrap();

    assert!(wait_for(|| mirrored_value(
        &client_table,
        "k",
        &ValueContainer::I64(9)
    )));

    client_table
        .get_accessor("back")
        .set_value(ValueContainer::Bool(true));
    assert!(wait_for(|| mirrored_value(
        &server_table,
        "back",
        &ValueContainer::Bool(true)
    )));

    client.stop();
    client.join();
    if let Ok(endpoints) = Arc::try_unwrap(accepted) {
        for endpoint in endpoints.into_inner() {
            endpoint.join();
        }
    }
}
