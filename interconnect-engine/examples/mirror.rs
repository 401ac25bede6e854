//! Two endpoints mirroring a table over the in-process transport.
//!
//! Run with `cargo run --example mirror -p interconnect-engine`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use interconnect_data::{NamedValueSet, ValueContainer};
use interconnect_engine::transport::mem;
use interconnect_engine::{EndpointConfig, PropagationEngine, SessionEndpoint, PING_SERVICE_NAME};
use interconnect_table::Table;

fn main() {
    let server_table = Table::new("plant");
    server_table
        .get_accessor("oven.temperature")
        .set_value(ValueContainer::F64(180.5));
    server_table
        .get_accessor("oven.door_open")
        .set_value(ValueContainer::Bool(false));

    let client_table = Table::new("mirror");

    let (server_half, client_half) = mem::duplex();
    let client_cfg = EndpointConfig::new("hmi");
    let open = PropagationEngine::session_open(&client_cfg);

    let server = SessionEndpoint::spawn(PropagationEngine::server(
        EndpointConfig::new("plant-host"),
        Arc::clone(&server_table),
        &open,
        Box::new(server_half),
        None,
        Instant::now(),
    ))
    .expect("spawn server endpoint");
    let client = SessionEndpoint::spawn(PropagationEngine::client(
        client_cfg,
        Arc::clone(&client_table),
        Box::new(client_half),
        None,
        Instant::now(),
    ))
    .expect("spawn client endpoint");

    // let the registration handshake and first diffusion settle
    std::thread::sleep(Duration::from_millis(500));
    for name in client_table.names_range(0, 0) {
        let mut accessor = client_table.get_accessor(&name);
        accessor.update();
        println!("mirrored {name} = {}", accessor.value());
    }

    // writes keep flowing while the session lives
    server_table
        .get_accessor("oven.temperature")
        .set_value(ValueContainer::F64(181.0));
    std::thread::sleep(Duration::from_millis(500));
    let mut temperature = client_table.get_typed::<f64>("oven.temperature");
    temperature.update();
    println!("temperature now {}", temperature.get());

    // the built-in ping service answers with session counters
    let mut params = NamedValueSet::new();
    params.set("summary", ValueContainer::Bool(true));
    let ping = client.start_remote_action(PING_SERVICE_NAME, Some(params));
    match ping.wait_complete(Duration::from_secs(5)) {
        Some(state) => println!("ping answered: {}", state.values),
        None => println!("ping timed out"),
    }

    client.end("demo over");
    client.join();
    server.join();
}
