//! Connection and call logic.

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use rivet_proto::{LENGTH_PREFIX_SIZE, Message, RequestId, Value};

use crate::error::ClientError;

/// Blocking connection to a Rivet server.
#[derive(Debug)]
pub struct Client {
    stream: TcpStream,
    next_id: RequestId,
    buf: Vec<u8>,
}

impl Client {
    /// Connect to `addr`.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        Ok(Self::from_stream(TcpStream::connect(addr)?))
    }

    /// Connect to `addr`, giving up after `timeout`.
    pub fn connect_timeout(addr: &SocketAddr, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self::from_stream(TcpStream::connect_timeout(addr, timeout)?))
    }

    fn from_stream(stream: TcpStream) -> Self {
        Self { stream, next_id: 0, buf: Vec::new() }
    }

    /// Set the read and write timeout. `None` blocks indefinitely.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)?;
        Ok(())
    }

    /// Local address of the connection.
    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.stream.local_addr()?)
    }

    /// Call `method` and wait for its result.
    ///
    /// Responses to other request ids (left over from an earlier call that
    /// failed mid-way) are skipped.
    ///
    /// # Errors
    ///
    /// - `ClientError::Rpc` if the server answered with an error
    /// - `ClientError::Disconnected` if the server closed the connection
    /// - `ClientError::UnexpectedMessage` if the server sent a request or
    ///   notification
    /// - `ClientError::Io` / `ClientError::Protocol` on transport failures
    pub fn call(&mut self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        self.send(&Message::request(id, method, params))?;

        loop {
            match self.receive()? {
                Message::Response { id: got, outcome } if got == id => {
                    return outcome.map_err(ClientError::Rpc);
                },
                Message::Response { id: got, .. } => {
                    tracing::debug!("Skipping response to stale request {}", got);
                },
                other => return Err(ClientError::UnexpectedMessage(other.kind())),
            }
        }
    }

    /// Send a notification. The server sends nothing back.
    pub fn notify(&mut self, method: &str, params: Vec<Value>) -> Result<(), ClientError> {
        self.send(&Message::notification(method, params))
    }

    fn send(&mut self, message: &Message) -> Result<(), ClientError> {
        self.buf.clear();
        message.encode(&mut self.buf)?;
        self.stream.write_all(&self.buf)?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Message, ClientError> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        read_exact(&mut self.stream, &mut prefix)?;

        let len = rivet_proto::payload_len(prefix)?;
        self.buf.clear();
        self.buf.resize(len, 0);
        read_exact(&mut self.stream, &mut self.buf)?;

        Ok(Message::decode(&self.buf)?)
    }
}

/// `read_exact` that reports a closed or reset connection as `Disconnected`.
fn read_exact(stream: &mut TcpStream, buf: &mut [u8]) -> Result<(), ClientError> {
    match stream.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) => match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => Err(ClientError::Disconnected),
            _ => Err(e.into()),
        },
    }
}
