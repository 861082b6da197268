//! Echo server running the engine on top of tokio sockets.
//!
//! Each socket read is handed to the engine as one buffer, and the engine
//! expects whole frames per buffer. A frame larger than [`READ_BUFFER`], or
//! one the peer splits across TCP segments, arrives truncated and the session
//! is closed with 1002. Keep client messages well under that size.

use std::{
    collections::HashMap,
    io,
    net::TcpListener as StdListener,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use clap::Parser;
use ember_socket::{
    ConnectionHandler, ConnectionId, DEFAULT_IDLE_TIMEOUT, DEFAULT_PORT, DEFAULT_QUEUE_DEPTH,
    MessageHandler, Opcode, Reply, SendStatus, ServerConfig, Transport, WebSocketServer,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, tcp::OwnedReadHalf},
    sync::mpsc::{self, UnboundedSender, error::TrySendError},
    task::AbortHandle,
};
use tracing_subscriber::EnvFilter;

/// Upper bound on the size of a frame a client can send, header included.
const READ_BUFFER: usize = 4096;
// frames buffered between the engine and a socket writer
const WRITE_BUFFER: usize = 4;

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1")]
    addr: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds without traffic before a session is dropped
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs())]
    idle_secs: u64,

    /// Frames a connection may queue before sends report backpressure
    #[arg(long, default_value_t = DEFAULT_QUEUE_DEPTH)]
    queue_depth: usize,
}

enum HostEvent {
    Accepted(u64, TcpStream),
    Received(u64, Vec<u8>),
    Sent(u64),
    Closed(u64),
}

struct Session {
    writer: mpsc::Sender<Bytes>,
    reader: AbortHandle,
    idle_ms: Arc<AtomicU64>,
}

struct TokioTransport {
    addr: String,
    listener: Option<StdListener>,
    sessions: HashMap<u64, Session>,
    events: UnboundedSender<HostEvent>,
}

impl TokioTransport {
    fn new(addr: String, events: UnboundedSender<HostEvent>) -> Self {
        Self {
            addr,
            listener: None,
            sessions: HashMap::new(),
            events,
        }
    }

    fn register(&mut self, id: u64, stream: TcpStream) {
        let _ = stream.set_nodelay(true);
        let (read, mut write) = stream.into_split();
        let (tx, mut rx) = mpsc::channel::<Bytes>(WRITE_BUFFER);

        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if let Err(e) = write.write_all(&bytes).await {
                    tracing::warn!(session = id, error = ?e, "writer error");
                    let _ = events.send(HostEvent::Closed(id));
                    return;
                }
                let _ = events.send(HostEvent::Sent(id));
            }
            // sender dropped: the engine disconnected this session
            let _ = write.shutdown().await;
        });

        #[allow(clippy::cast_possible_truncation)]
        let idle_ms = Arc::new(AtomicU64::new(DEFAULT_IDLE_TIMEOUT.as_millis() as u64));
        let reader = tokio::spawn(read_loop(
            id,
            read,
            Arc::clone(&idle_ms),
            self.events.clone(),
        ))
        .abort_handle();

        self.sessions.insert(
            id,
            Session {
                writer: tx,
                reader,
                idle_ms,
            },
        );
    }
}

impl Transport for TokioTransport {
    type Handle = u64;

    fn listen(&mut self, port: u16) -> io::Result<()> {
        let listener = StdListener::bind((self.addr.as_str(), port))?;
        listener.set_nonblocking(true)?;
        tracing::info!(addr = listener.local_addr()?.to_string(), "Listening on");
        self.listener = Some(listener);
        Ok(())
    }

    fn send(&mut self, handle: &u64, bytes: &[u8]) -> io::Result<SendStatus> {
        let session = self
            .sessions
            .get(handle)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        match session.writer.try_send(Bytes::copy_from_slice(bytes)) {
            Ok(()) => Ok(SendStatus::Sent),
            Err(TrySendError::Full(_)) => Ok(SendStatus::Busy),
            Err(TrySendError::Closed(_)) => Err(io::ErrorKind::BrokenPipe.into()),
        }
    }

    fn disconnect(&mut self, handle: &u64) {
        if let Some(session) = self.sessions.remove(handle) {
            session.reader.abort();
            tracing::debug!(session = handle, "session dropped");
        }
    }

    fn set_idle_timeout(&mut self, handle: &u64, timeout: Duration) {
        if let Some(session) = self.sessions.get(handle) {
            #[allow(clippy::cast_possible_truncation)]
            session
                .idle_ms
                .store(timeout.as_millis() as u64, Ordering::Relaxed);
        }
    }
}

async fn read_loop(
    id: u64,
    mut reader: OwnedReadHalf,
    idle_ms: Arc<AtomicU64>,
    events: UnboundedSender<HostEvent>,
) {
    let mut buf = vec![0; READ_BUFFER];
    loop {
        let idle = Duration::from_millis(idle_ms.load(Ordering::Relaxed));
        match tokio::time::timeout(idle, reader.read(&mut buf)).await {
            Err(_) => {
                tracing::info!(session = id, "idle timeout");
                break;
            }
            Ok(Ok(0)) => {
                tracing::info!(session = id, "TCP FIN");
                break;
            }
            Ok(Ok(n)) => {
                if events.send(HostEvent::Received(id, buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(session = id, error = ?e, "reader error");
                break;
            }
        }
    }
    let _ = events.send(HostEvent::Closed(id));
}

async fn accept_loop(listener: TcpListener, events: UnboundedSender<HostEvent>) {
    let mut next_id = 0;
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::debug!(session = next_id, addr = %addr, "tcp accepted");
                if events.send(HostEvent::Accepted(next_id, stream)).is_err() {
                    return;
                }
                next_id += 1;
            }
            Err(e) => tracing::warn!(error = ?e, "accept failed"),
        }
    }
}

struct EchoHandler;

impl MessageHandler for EchoHandler {
    fn on_message(&mut self, id: ConnectionId, opcode: Opcode, payload: &[u8]) -> Option<Reply> {
        let l = payload.len().min(10);
        println!("{id}: got message {opcode:?} {} {:?}", payload.len(), &payload[..l]);
        Some(match opcode {
            Opcode::Text => Reply::Text(String::from_utf8_lossy(payload).into_owned()),
            _ => Reply::Binary(payload.to_vec()),
        })
    }
}

struct Presence;

impl ConnectionHandler for Presence {
    fn on_open(&mut self, id: ConnectionId) {
        println!("{id}: client connected");
    }

    fn on_close(&mut self, id: ConnectionId) {
        println!("{id}: client closed");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ember_socket::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("ember_socket=info".parse().unwrap()),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let config = ServerConfig::default()
        .with_port(args.port)
        .with_idle_timeout(Duration::from_secs(args.idle_secs))
        .with_queue_depth(args.queue_depth);

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut server = WebSocketServer::new(TokioTransport::new(args.addr, events_tx.clone()), config);
    server.set_message_handler(EchoHandler);
    server.set_connection_handler(Presence);
    server.start()?;

    let listener = server
        .transport_mut()
        .listener
        .take()
        .expect("listener is bound by start");
    let listener = TcpListener::from_std(listener).map_err(ember_socket::Error::Bind)?;
    tokio::spawn(accept_loop(listener, events_tx));

    while let Some(event) = events.recv().await {
        let result = match event {
            HostEvent::Accepted(id, stream) => {
                server.transport_mut().register(id, stream);
                server.on_accept(id).map(|_| ())
            }
            HostEvent::Received(id, mut data) => server.on_receive(&id, &mut data),
            HostEvent::Sent(id) => server.on_sent(&id),
            HostEvent::Closed(id) => {
                server.on_disconnect(&id);
                server.transport_mut().disconnect(&id);
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!("{e}");
        }
    }

    Ok(())
}
