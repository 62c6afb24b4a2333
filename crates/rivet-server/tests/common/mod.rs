//! Helpers shared by the server integration suites.

#![allow(dead_code)]

use std::{
    thread,
    time::{Duration, Instant},
};

use rivet_client::Client;
use rivet_server::{Server, Value};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Server on an ephemeral loopback port with a `ping` method bound.
pub fn loopback_server() -> Server {
    let server = Server::with_address("127.0.0.1", 0).unwrap();
    server.bind("ping", |_, _| Ok(Value::Text("pong".to_string()))).unwrap();
    server
}

/// Connect to `server` with read/write timeouts set.
pub fn connect(server: &Server) -> Client {
    let client = Client::connect_timeout(&server.local_addr(), TIMEOUT).unwrap();
    client.set_timeout(Some(TIMEOUT)).unwrap();
    client
}

/// Connect and make one call, so the session is known to be registered and
/// serving when this returns.
pub fn connect_and_ping(server: &Server) -> Client {
    let mut client = connect(server);
    assert_eq!(client.call("ping", vec![]).unwrap(), Value::Text("pong".to_string()));
    client
}

/// Poll `condition` until it holds, failing the test after [`TIMEOUT`].
pub fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}
