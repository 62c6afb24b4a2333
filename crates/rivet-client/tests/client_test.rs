//! Client behavior against a scripted in-process server.
//!
//! The server side is a plain std listener on a thread that reads one frame
//! at a time and answers with whatever the test scripts.

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    thread::{self, JoinHandle},
    time::Duration,
};

use rivet_client::{Client, ClientError, Value};
use rivet_proto::{LENGTH_PREFIX_SIZE, Message, MessageKind};

fn read_message(stream: &mut TcpStream) -> Option<Message> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    stream.read_exact(&mut prefix).ok()?;
    let mut payload = vec![0u8; rivet_proto::payload_len(prefix).unwrap()];
    stream.read_exact(&mut payload).ok()?;
    Some(Message::decode(&payload).unwrap())
}

fn write_message(stream: &mut TcpStream, message: &Message) {
    let mut buf = Vec::new();
    message.encode(&mut buf).unwrap();
    stream.write_all(&buf).unwrap();
}

/// Accept one connection and hand it to `script`.
fn scripted_server<F>(script: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        script(stream);
    });
    (addr, handle)
}

fn connect(addr: SocketAddr) -> Client {
    let client = Client::connect_timeout(&addr, Duration::from_secs(5)).unwrap();
    client.set_timeout(Some(Duration::from_secs(5))).unwrap();
    client
}

#[test]
fn call_returns_result() {
    let (addr, server) = scripted_server(|mut stream| {
        let Some(Message::Request { id, method, params }) = read_message(&mut stream) else {
            panic!("expected a request");
        };
        assert_eq!(method, "echo");
        write_message(&mut stream, &Message::success(id, Value::Array(params)));
    });

    let mut client = connect(addr);
    let result = client.call("echo", vec![Value::Bool(true)]).unwrap();
    assert_eq!(result, Value::Array(vec![Value::Bool(true)]));

    server.join().unwrap();
}

#[test]
fn call_ids_are_sequential() {
    let (addr, server) = scripted_server(|mut stream| {
        for expected in 0..3 {
            let Some(Message::Request { id, .. }) = read_message(&mut stream) else {
                panic!("expected a request");
            };
            assert_eq!(id, expected);
            write_message(&mut stream, &Message::success(id, Value::Null));
        }
    });

    let mut client = connect(addr);
    for _ in 0..3 {
        client.call("ping", vec![]).unwrap();
    }

    server.join().unwrap();
}

#[test]
fn error_response_becomes_rpc_error() {
    let (addr, server) = scripted_server(|mut stream| {
        let Some(Message::Request { id, .. }) = read_message(&mut stream) else {
            panic!("expected a request");
        };
        write_message(&mut stream, &Message::failure(id, Value::Text("boom".to_string())));
    });

    let mut client = connect(addr);
    let err = client.call("explode", vec![]).unwrap_err();
    assert_eq!(err.rpc_message(), Some("boom"));

    server.join().unwrap();
}

#[test]
fn stale_responses_are_skipped() {
    let (addr, server) = scripted_server(|mut stream| {
        let Some(Message::Request { id, .. }) = read_message(&mut stream) else {
            panic!("expected a request");
        };
        write_message(&mut stream, &Message::success(id.wrapping_add(40), Value::Null));
        write_message(&mut stream, &Message::success(id, Value::Integer(7_i64.into())));
    });

    let mut client = connect(addr);
    assert_eq!(client.call("seven", vec![]).unwrap(), Value::Integer(7_i64.into()));

    server.join().unwrap();
}

#[test]
fn server_close_reports_disconnected() {
    let (addr, server) = scripted_server(|mut stream| {
        let _ = read_message(&mut stream);
    });

    let mut client = connect(addr);
    let err = client.call("anything", vec![]).unwrap_err();
    assert!(matches!(err, ClientError::Disconnected), "unexpected error: {err}");

    server.join().unwrap();
}

#[test]
fn server_request_is_unexpected() {
    let (addr, server) = scripted_server(|mut stream| {
        let _ = read_message(&mut stream);
        write_message(&mut stream, &Message::request(0, "reverse", vec![]));
    });

    let mut client = connect(addr);
    let err = client.call("anything", vec![]).unwrap_err();
    assert!(matches!(err, ClientError::UnexpectedMessage(MessageKind::Request)));

    server.join().unwrap();
}

#[test]
fn notify_sends_notification_frame() {
    let (addr, server) = scripted_server(|mut stream| {
        let message = read_message(&mut stream);
        assert_eq!(message, Some(Message::notification("log", vec![Value::Text("hi".into())])));
    });

    let mut client = connect(addr);
    client.notify("log", vec![Value::Text("hi".into())]).unwrap();

    server.join().unwrap();
}
