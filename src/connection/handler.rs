//! Connection Handler
//!
//! One task per accepted connection. The task owns the read buffer, the
//! RESP parser, the session state (selected database, subscription index
//! lists), and the write half of the socket. Pipelined commands drain in
//! order from the front of the buffer; pub/sub deliveries arrive through
//! the session's bounded push channel and share the same writer, so
//! replies and pushed messages are serialized.
//!
//! ## Lifecycle
//!
//! ```text
//! accept -> ConnectionHandler::run
//!             loop:
//!               drain complete frames -> dispatch -> write replies
//!               flush
//!               select { socket readable | push frame | shutdown }
//!           on exit: remove subscriptions, close
//! ```

use crate::commands::{dispatch, Session};
use crate::protocol::{frame_to_argv, ParseError, RespParser};
use crate::pubsub::{PushFrame, SUBSCRIBER_BUFFER};
use crate::server::Server;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Maximum bytes buffered for one connection's unparsed input.
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial read buffer capacity.
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Client closed the socket between commands.
    #[error("client disconnected")]
    ClientDisconnected,

    /// Socket closed mid-frame.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("buffer size limit exceeded")]
    BufferFull,

    /// The server is shutting down.
    #[error("server shutting down")]
    Shutdown,
}

/// State and I/O for one client connection.
pub struct ConnectionHandler {
    server: Arc<Server>,
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    parser: RespParser,
    session: Session,
    push_rx: mpsc::Receiver<PushFrame>,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionHandler {
    pub fn new(
        server: Arc<Server>,
        stream: TcpStream,
        addr: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        server.stats().connection_opened();
        let (push_tx, push_rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let session = Session::new(server.next_conn_id(), push_tx);

        Self {
            server,
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
            session,
            push_rx,
            shutdown,
        }
    }

    /// Runs the connection to completion and cleans up its subscriptions.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, conn = self.session.id, "client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => debug!(client = %self.addr, "client session ended"),
            Err(ConnectionError::ClientDisconnected | ConnectionError::Shutdown) => {
                debug!(client = %self.addr, "client disconnected")
            }
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "connection error"),
        }

        // Every subscription this connection holds goes before the
        // connection is reaped.
        self.server.bus().remove_connection(
            self.session.id,
            &self.session.channels,
            &self.session.patterns,
        );
        self.server.stats().connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            // Drain complete pipelined frames in arrival order.
            while let Some(argv) = self.try_parse_command()? {
                let reply = dispatch(&self.server, &mut self.session, &argv);
                let mut bytes = Vec::new();
                reply.serialize_into(&mut bytes);
                self.stream.write_all(&bytes).await?;

                if self.session.should_quit {
                    self.stream.flush().await?;
                    return Ok(());
                }
            }
            self.stream.flush().await?;

            tokio::select! {
                read = read_into(&mut self.stream, &mut self.buffer) => {
                    read?;
                }
                pushed = self.push_rx.recv() => {
                    if let Some(frame) = pushed {
                        self.stream.write_all(&frame).await?;
                        self.stream.flush().await?;
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        self.stream.flush().await?;
                        return Err(ConnectionError::Shutdown);
                    }
                }
            }
        }
    }

    /// Pulls one complete command's argv off the front of the buffer.
    fn try_parse_command(&mut self) -> Result<Option<Vec<bytes::Bytes>>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        match self.parser.parse(&self.buffer) {
            Ok(Some((frame, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed,
                    remaining = self.buffer.len(),
                    "parsed command frame"
                );
                Ok(Some(frame_to_argv(frame)?))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(client = %self.addr, error = %e, "protocol error");
                Err(ConnectionError::Parse(e))
            }
        }
    }
}

/// Reads more bytes from the socket into the buffer.
async fn read_into(
    stream: &mut BufWriter<TcpStream>,
    buffer: &mut BytesMut,
) -> Result<(), ConnectionError> {
    if buffer.len() >= MAX_BUFFER_SIZE {
        return Err(ConnectionError::BufferFull);
    }
    if buffer.capacity() - buffer.len() < 1024 {
        buffer.reserve(4096);
    }

    let n = stream.get_mut().read_buf(buffer).await?;
    if n == 0 {
        return if buffer.is_empty() {
            Err(ConnectionError::ClientDisconnected)
        } else {
            Err(ConnectionError::UnexpectedEof)
        };
    }
    Ok(())
}

/// Runs one accepted connection to completion.
pub async fn handle_connection(
    server: Arc<Server>,
    stream: TcpStream,
    addr: SocketAddr,
    shutdown: watch::Receiver<bool>,
) {
    let handler = ConnectionHandler::new(server, stream, addr, shutdown);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected | ConnectionError::Shutdown => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{Server, ServerConfig};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn spawn_server() -> (SocketAddr, Arc<Server>, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(Server::new(ServerConfig::default()));
        let (shutdown_tx, _) = watch::channel(false);

        let accept_server = Arc::clone(&server);
        let accept_shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let server = Arc::clone(&accept_server);
                let shutdown = accept_shutdown.subscribe();
                tokio::spawn(handle_connection(server, stream, client_addr, shutdown));
            }
        });

        (addr, server, shutdown_tx)
    }

    async fn read_exactly(client: &mut TcpStream, want: usize) -> Vec<u8> {
        let mut buf = vec![0u8; want];
        let mut read = 0;
        while read < want {
            let n = client.read(&mut buf[read..]).await.unwrap();
            assert!(n > 0, "connection closed early");
            read += n;
        }
        buf
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _server, _shutdown) = spawn_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_exactly(&mut client, 7).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_inline_command() {
        let (addr, _server, _shutdown) = spawn_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"PING\r\n").await.unwrap();
        assert_eq!(read_exactly(&mut client, 7).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_set_get_strlen_scenario() {
        let (addr, _server, _shutdown) = spawn_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut client, 5).await, b"+OK\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut client, 9).await, b"$3\r\nbar\r\n");

        client
            .write_all(b"*3\r\n$6\r\nAPPEND\r\n$3\r\nfoo\r\n$3\r\nbaz\r\n")
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut client, 4).await, b":6\r\n");

        client
            .write_all(b"*2\r\n$6\r\nSTRLEN\r\n$3\r\nfoo\r\n")
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut client, 4).await, b":6\r\n");
    }

    #[tokio::test]
    async fn test_pipelined_commands_reply_in_order() {
        let (addr, _server, _shutdown) = spawn_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        // Three INCRs in one write; replies must arrive as 1, 2, 3.
        client
            .write_all(b"*2\r\n$4\r\nINCR\r\n$1\r\nn\r\n*2\r\n$4\r\nINCR\r\n$1\r\nn\r\n*2\r\n$4\r\nINCR\r\n$1\r\nn\r\n")
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut client, 12).await, b":1\r\n:2\r\n:3\r\n");
    }

    #[tokio::test]
    async fn test_expiry_scenario_over_the_wire() {
        let (addr, server, _shutdown) = spawn_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nEX\r\n$1\r\n1\r\n")
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut client, 5).await, b"+OK\r\n");

        server
            .keyspace()
            .clock()
            .advance(std::time::Duration::from_millis(1100));

        client.write_all(b"*2\r\n$3\r\nTTL\r\n$1\r\nk\r\n").await.unwrap();
        assert_eq!(read_exactly(&mut client, 5).await, b":-2\r\n");

        client.write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").await.unwrap();
        assert_eq!(read_exactly(&mut client, 5).await, b"$-1\r\n");
    }

    #[tokio::test]
    async fn test_publish_subscribe_across_connections() {
        let (addr, _server, _shutdown) = spawn_server().await;

        let mut subscriber = TcpStream::connect(addr).await.unwrap();
        subscriber
            .write_all(b"*2\r\n$9\r\nSUBSCRIBE\r\n$2\r\nch\r\n")
            .await
            .unwrap();
        let confirm = read_exactly(&mut subscriber, 31).await;
        assert_eq!(confirm, b"*3\r\n$9\r\nsubscribe\r\n$2\r\nch\r\n:1\r\n");

        let mut publisher = TcpStream::connect(addr).await.unwrap();
        publisher
            .write_all(b"*3\r\n$7\r\nPUBLISH\r\n$2\r\nch\r\n$2\r\nhi\r\n")
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut publisher, 4).await, b":1\r\n");

        let message = read_exactly(&mut subscriber, 33).await;
        assert_eq!(message, b"*3\r\n$7\r\nmessage\r\n$2\r\nch\r\n$2\r\nhi\r\n");
    }

    #[tokio::test]
    async fn test_quit_closes_connection() {
        let (addr, _server, _shutdown) = spawn_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nQUIT\r\n").await.unwrap();
        assert_eq!(read_exactly(&mut client, 5).await, b"+OK\r\n");

        // Server closes its end: the next read returns EOF.
        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_subscriptions_cleaned_up_on_disconnect() {
        let (addr, server, _shutdown) = spawn_server().await;

        let mut subscriber = TcpStream::connect(addr).await.unwrap();
        subscriber
            .write_all(b"*2\r\n$9\r\nSUBSCRIBE\r\n$2\r\nch\r\n")
            .await
            .unwrap();
        let _ = read_exactly(&mut subscriber, 31).await;
        assert_eq!(server.bus().num_sub(&[bytes::Bytes::from("ch")])[0].1, 1);

        drop(subscriber);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(server.bus().num_sub(&[bytes::Bytes::from("ch")])[0].1, 0);
    }

    #[tokio::test]
    async fn test_select_isolates_connections() {
        let (addr, _server, _shutdown) = spawn_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*2\r\n$6\r\nSELECT\r\n$1\r\n1\r\n")
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut client, 5).await, b"+OK\r\n");
        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n")
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut client, 5).await, b"+OK\r\n");

        // A fresh connection starts on database 0 and sees nothing.
        let mut other = TcpStream::connect(addr).await.unwrap();
        other
            .write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut other, 5).await, b"$-1\r\n");
    }
}
