//! Per-connection SOCKS5 negotiation state machine.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use proxy_socks::wire::{self, Command, Decoded};
use proxy_socks::ReplyCode;
use proxy_types::DestAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::Config;
use crate::connect::{self, ConnectError};
use crate::relay;

/// Where a `Connection` is in the negotiation, mirroring the transition table in
/// RFC 1928's framing: a client must greet, be authorized, issue a request, and only
/// then is it allowed to exchange application bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Init,
    Authorized,
    ConnectWait,
    Relaying,
    ClientMustClose,
}

/// Outcome of `Connection::negotiate_greeting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GreetingOutcome {
    Accepted,
    Rejected,
    Malformed,
}

const READ_CHUNK: usize = 4096;

pub struct Connection {
    client: TcpStream,
    inbound: BytesMut,
    peer: SocketAddr,
    config: Arc<Config>,
    status: Status,
}

impl Connection {
    pub fn new(client: TcpStream, peer: SocketAddr, config: Arc<Config>) -> Self {
        Self {
            client,
            inbound: BytesMut::with_capacity(READ_CHUNK),
            peer,
            config,
            status: Status::Init,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Drives the connection from greeting through relay teardown. Every error is
    /// handled internally (a reply is written where the protocol calls for one); the
    /// returned `Result` only distinguishes "ran to a clean close" from "an I/O error
    /// made further communication with the client impossible."
    pub async fn run(mut self) -> std::io::Result<()> {
        let greeting_accepted = tokio::time::timeout(self.config.pregreeting_timeout, self.negotiate_greeting()).await;

        let outcome = match greeting_accepted {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => return Err(e),
            Err(_elapsed) => {
                tracing::debug!(peer = %self.peer, "timed out waiting for greeting");
                return Ok(());
            }
        };

        match outcome {
            GreetingOutcome::Malformed => return Ok(()),
            GreetingOutcome::Rejected => {
                self.status = Status::ClientMustClose;
                return self.wait_for_client_close().await;
            }
            GreetingOutcome::Accepted => {}
        }

        self.status = Status::Authorized;

        let request = match self.read_request().await? {
            Some(request) => request,
            None => return Ok(()),
        };

        if !matches!(request.command, Command::Connect) {
            tracing::debug!(peer = %self.peer, command = ?request.command, "rejecting unsupported command");
            self.write_reply(ReplyCode::CommandNotSupported, &wire::reply_addr_unspecified())
                .await?;
            return Ok(());
        }

        self.status = Status::ConnectWait;

        let connect_result = tokio::select! {
            biased;
            peek = self.client.read(&mut [0u8; 1]) => {
                match peek {
                    Ok(0) => return Ok(()),
                    Ok(_) => {
                        tracing::warn!(peer = %self.peer, "client sent data before CONNECT resolved, closing");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
            result = connect::connect(&request.dst, self.config.connect_timeout) => result,
        };

        let (upstream, bound) = match connect_result {
            Ok(pair) => pair,
            Err(err) => {
                tracing::info!(peer = %self.peer, dest = ?request.dst, error = %err, "upstream connect failed");
                self.write_reply(reply_code_for(&err), &wire::reply_addr_unspecified()).await?;
                return Ok(());
            }
        };

        self.write_reply(ReplyCode::Succeeded, &DestAddr::Ip(bound)).await?;
        self.status = Status::Relaying;

        let Connection { client, inbound, .. } = self;
        let mut upstream = upstream;

        if !inbound.is_empty() {
            // Bytes pipelined by the client right after the request belong to the
            // relayed payload; flush them to upstream before the pump takes over.
            upstream.write_all(&inbound).await?;
        }

        relay::relay(client, upstream).await
    }

    /// Reads and decodes the greeting, replying with the chosen method where one is
    /// owed. A bad version byte or early EOF is `Malformed` (close, no reply, per the
    /// `Init`/`Codec.Greeting=Malformed` row); an acceptable-methods mismatch is
    /// `Rejected` (write `NO_ACCEPTABLE_METHODS`, then `ClientMustClose`).
    async fn negotiate_greeting(&mut self) -> std::io::Result<GreetingOutcome> {
        let greeting = loop {
            match wire::decode_greeting(&self.inbound) {
                Ok(Decoded::Done { value, consumed }) => {
                    let _ = self.inbound.split_to(consumed);
                    break value;
                }
                Ok(Decoded::Need(_)) => {
                    if !self.fill_buffer().await? {
                        return Ok(GreetingOutcome::Malformed);
                    }
                }
                Err(_decode_error) => return Ok(GreetingOutcome::Malformed),
            }
        };

        if greeting.methods.contains(&wire::NO_AUTH_REQUIRED) {
            self.write_raw(&method_selection(wire::NO_AUTH_REQUIRED)).await?;
            Ok(GreetingOutcome::Accepted)
        } else {
            self.write_raw(&method_selection(wire::NO_ACCEPTABLE_METHODS)).await?;
            Ok(GreetingOutcome::Rejected)
        }
    }

    /// Reads and decodes the request. `Ok(None)` means the peer closed before a full
    /// request arrived or sent malformed bytes with no reply owed (bad version byte).
    async fn read_request(&mut self) -> std::io::Result<Option<wire::Request>> {
        loop {
            match wire::decode_request(&self.inbound) {
                Ok(Decoded::Done { value, consumed }) => {
                    let _ = self.inbound.split_to(consumed);
                    return Ok(Some(value));
                }
                Ok(Decoded::Need(_)) => {
                    if !self.fill_buffer().await? {
                        return Ok(None);
                    }
                }
                Err(decode_error) => {
                    let reply_code = ReplyCode::from(decode_error);
                    self.write_reply(reply_code, &wire::reply_addr_unspecified()).await?;
                    return Ok(None);
                }
            }
        }
    }

    /// Appends one read's worth of bytes to the inbound buffer. Returns `false` on EOF.
    async fn fill_buffer(&mut self) -> std::io::Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.client.read(&mut chunk).await?;
        if n == 0 {
            return Ok(false);
        }
        self.inbound.extend_from_slice(&chunk[..n]);
        Ok(true)
    }

    async fn write_reply(&mut self, code: ReplyCode, bound: &DestAddr) -> std::io::Result<()> {
        let mut buf = Vec::new();
        wire::encode_reply(&mut buf, code.to_u8(), bound);
        self.write_raw(&buf).await
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.client.write_all(bytes).await?;
        self.client.flush().await
    }

    /// `ClientMustClose`: the negotiation-failure reply has already been written.
    /// Any further byte from the client is a protocol violation; a grace period
    /// bounds how long we wait for the client to go away on its own.
    async fn wait_for_client_close(mut self) -> std::io::Result<()> {
        let grace = tokio::time::timeout(self.config.close_grace_timeout, self.client.read(&mut [0u8; 1])).await;

        match grace {
            Ok(Ok(0)) => Ok(()),
            Ok(Ok(_)) => {
                tracing::debug!(peer = %self.peer, "client sent data after ClientMustClose, closing");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Ok(()),
        }
    }
}

fn method_selection(method: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    wire::encode_method_selection(&mut buf, method);
    buf
}

/// Maps a failed outbound connect to the reply code sent back to the client.
/// `ConnectError::Dns` collapses to `GeneralFailure` rather than `HostUnreachable`:
/// a name that doesn't resolve isn't known to name an unreachable host.
fn reply_code_for(err: &ConnectError) -> ReplyCode {
    match err {
        ConnectError::Dns => ReplyCode::GeneralSocksServerFailure,
        ConnectError::NetUnreachable => ReplyCode::NetworkUnreachable,
        ConnectError::HostUnreachable => ReplyCode::HostUnreachable,
        ConnectError::ConnectionRefused => ReplyCode::ConnectionRefused,
        ConnectError::TtlExpired => ReplyCode::TtlExpired,
        ConnectError::GeneralFailure => ReplyCode::GeneralSocksServerFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            pregreeting_timeout: std::time::Duration::from_millis(200),
            connect_timeout: std::time::Duration::from_millis(200),
            close_grace_timeout: std::time::Duration::from_millis(200),
            ..Config::default()
        })
    }

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = async { listener.accept().await.unwrap().0 };
        let (a, b) = tokio::join!(connect, accept);
        (a.unwrap(), b)
    }

    #[tokio::test]
    async fn unsupported_command_gets_bad_command_reply_and_closes() {
        let (mut test_side, server_side) = loopback_pair().await;
        let config = test_config();

        let server = tokio::spawn(Connection::new(server_side, "127.0.0.1:0".parse().unwrap(), config).run());

        test_side.write_all(&[5, 1, 0]).await.unwrap(); // greeting: NO_AUTH
        let mut method_reply = [0u8; 2];
        test_side.read_exact(&mut method_reply).await.unwrap();
        assert_eq!(method_reply, [5, 0]);

        // BIND request.
        test_side.write_all(&[5, 2, 0, 1, 127, 0, 0, 1, 0, 80]).await.unwrap();
        let mut reply = [0u8; 10];
        test_side.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 0x07); // CommandNotSupported

        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn no_acceptable_methods_replies_and_then_closes_on_next_byte() {
        let (mut test_side, server_side) = loopback_pair().await;
        let config = test_config();

        let server = tokio::spawn(Connection::new(server_side, "127.0.0.1:0".parse().unwrap(), config).run());

        test_side.write_all(&[5, 1, 0x02]).await.unwrap(); // only username/password offered
        let mut method_reply = [0u8; 2];
        test_side.read_exact(&mut method_reply).await.unwrap();
        assert_eq!(method_reply, [5, 0xFF]);

        test_side.write_all(&[0xAA]).await.unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bad_version_byte_closes_with_no_reply_at_all() {
        let (mut test_side, server_side) = loopback_pair().await;
        let config = test_config();

        let server = tokio::spawn(Connection::new(server_side, "127.0.0.1:0".parse().unwrap(), config).run());

        test_side.write_all(&[4, 1, 0]).await.unwrap(); // SOCKS4 version byte
        server.await.unwrap().unwrap();

        // The server closed its side without writing anything back.
        let mut buf = [0u8; 1];
        let n = test_side.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }
}
