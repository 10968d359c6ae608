use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader as AsyncBufReader, ReadHalf,
    WriteHalf,
};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::spawn_blocking;
use tokio::time::{timeout, Instant};

use crate::error::{CartError, CartResult};
use crate::facade::{CartFacade, CartStoreFacade};
use crate::types::{CartOp, IndexKind, Key, Multiset};

type BufferedReader<S> = AsyncBufReader<ReadHalf<S>>;
type StreamWriter<S> = WriteHalf<S>;

const MAX_LINE_LEN: usize = 256;

/// Default bind address of the daemon.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8097";

/// Line-oriented TCP server that exposes the cart store.
///
/// Each connection sends one request per line and gets one response per
/// request:
///
/// ```text
/// PING                      -> PONG
/// ADD <customer> <item>     -> OK
/// REMOVE <customer> <item>  -> OK
/// LIST customer <id>        -> OK <n>, then n lines "<item> <count>"
/// LIST item <id>            -> OK <n>, then n lines "<customer> <count>"
/// ```
///
/// Failures answer `UNAVAILABLE` (shard busy, retry), `NOT_FOUND` or
/// `ERR <message>`.
pub struct CartServer {
    bind_address: SocketAddr,
    limits: ServerLimits,
    state: Arc<ServerState>,
}

/// Handle that exposes server metrics without holding a reference to the server.
#[derive(Clone)]
pub struct CartServerHandle {
    metrics: Arc<ServerMetrics>,
}

/// Snapshot of server metrics.
#[derive(Debug, Clone)]
pub struct ServerMetricsSnapshot {
    pub active_connections: usize,
    pub total_connections: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub average_request_latency_micros: u64,
}

/// Configuration for the cart server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    pub max_connections: usize,
    pub client_idle_timeout: Duration,
}

impl ServerConfig {
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            max_connections: 512,
            client_idle_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.client_idle_timeout = idle_timeout;
        self
    }
}

impl CartServer {
    /// Creates a new server instance bound to the provided store.
    pub fn new(store: CartStoreFacade, config: ServerConfig) -> Result<Self, ServerError> {
        if config.max_connections == 0 {
            return Err(ServerError::InvalidConfig(
                "max_connections must be greater than zero".into(),
            ));
        }
        if config.client_idle_timeout.is_zero() {
            return Err(ServerError::InvalidConfig(
                "client_idle_timeout must be greater than zero".into(),
            ));
        }

        let state = Arc::new(ServerState {
            store,
            idle_timeout: config.client_idle_timeout,
            metrics: Arc::new(ServerMetrics::new()),
        });

        Ok(Self {
            bind_address: config.bind_address,
            limits: ServerLimits {
                max_connections: config.max_connections,
            },
            state,
        })
    }

    /// Starts listening for connections until `shutdown` resolves.
    pub async fn run_until_shutdown<F>(&self, shutdown: F) -> Result<(), ServerError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.bind_address).await?;
        self.run_until_shutdown_with_listener(listener, shutdown)
            .await
    }

    /// Serves on an already bound listener, e.g. one bound to port 0 in tests.
    pub async fn run_until_shutdown_with_listener<F>(
        &self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), ServerError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let local_address = listener.local_addr()?;
        tracing::info!(address = %local_address, "cart server listening");

        let semaphore = Arc::new(Semaphore::new(self.limits.max_connections));
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown signal received; stopping cart server");
                    break;
                }
                accept_res = listener.accept() => {
                    let (socket, peer_addr) = match accept_res {
                        Ok(inner) => inner,
                        Err(err) => {
                            tracing::error!(?err, "failed to accept incoming connection");
                            continue;
                        }
                    };

                    let permit = match semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!(?peer_addr, "maximum concurrent clients reached; dropping connection");
                            drop(socket);
                            continue;
                        }
                    };

                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        let _permit = permit;
                        state.metrics.connection_opened();

                        if let Err(err) = serve_connection(state.clone(), socket, peer_addr).await {
                            tracing::debug!(?peer_addr, ?err, "connection terminated");
                        }

                        state.metrics.connection_closed();
                    });
                }
            }
        }

        Ok(())
    }

    /// Returns a handle that can be used to inspect metrics.
    pub fn handle(&self) -> CartServerHandle {
        CartServerHandle {
            metrics: Arc::clone(&self.state.metrics),
        }
    }
}

impl CartServerHandle {
    pub fn snapshot(&self) -> ServerMetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid server configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug)]
struct ServerLimits {
    max_connections: usize,
}

struct ServerState {
    store: CartStoreFacade,
    idle_timeout: Duration,
    metrics: Arc<ServerMetrics>,
}

#[derive(Debug)]
struct ServerMetrics {
    active_connections: AtomicUsize,
    total_connections: AtomicUsize,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_request_latency_ns: AtomicU64,
}

impl ServerMetrics {
    fn new() -> Self {
        Self {
            active_connections: AtomicUsize::new(0),
            total_connections: AtomicUsize::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            total_request_latency_ns: AtomicU64::new(0),
        }
    }

    fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
        self.total_connections.fetch_add(1, Ordering::AcqRel);
    }

    fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::AcqRel);
    }

    fn request_completed(&self, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::AcqRel);
        let nanos = latency.as_nanos().min(u128::from(u64::MAX)) as u64;
        self.total_request_latency_ns
            .fetch_add(nanos, Ordering::AcqRel);
    }

    fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::AcqRel);
    }

    fn snapshot(&self) -> ServerMetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Acquire);
        let total_latency = self.total_request_latency_ns.load(Ordering::Acquire);
        ServerMetricsSnapshot {
            active_connections: self.active_connections.load(Ordering::Acquire),
            total_connections: self.total_connections.load(Ordering::Acquire),
            total_requests,
            failed_requests: self.failed_requests.load(Ordering::Acquire),
            average_request_latency_micros: if total_requests == 0 {
                0
            } else {
                (total_latency / total_requests) / 1_000
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Ping,
    Apply {
        customer: Key,
        item: Key,
        op: CartOp,
    },
    List {
        index: IndexKind,
        key: Key,
    },
}

enum Reply {
    Pong,
    Done,
    Listing(Multiset),
}

async fn serve_connection<S>(
    state: Arc<ServerState>,
    stream: S,
    peer_addr: SocketAddr,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = AsyncBufReader::new(read_half);

    loop {
        let line = match read_limited_line(&mut reader, state.idle_timeout).await {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(()),
            Err(ConnectionError::Protocol(err)) => {
                send_line(&mut write_half, &format!("ERR {err}")).await.ok();
                state.metrics.record_failure();
                return Err(ConnectionError::Protocol(err));
            }
            Err(err) => return Err(err),
        };

        let start = Instant::now();
        let request = match parse_request(&line) {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(?peer_addr, %err, "rejected malformed request");
                state.metrics.record_failure();
                send_line(&mut write_half, &format!("ERR {err}"))
                    .await
                    .map_err(|_| ConnectionError::Io)?;
                continue;
            }
        };

        let outcome = match request {
            Request::Ping => Ok(Reply::Pong),
            request => {
                let store = state.store.clone();
                match spawn_blocking(move || execute(&store, request)).await {
                    Ok(outcome) => outcome,
                    Err(join_err) => {
                        tracing::error!(?join_err, ?request, "store operation panicked");
                        state.metrics.record_failure();
                        return Err(ConnectionError::Store);
                    }
                }
            }
        };

        if outcome.is_err() {
            state.metrics.record_failure();
        }
        send_line(&mut write_half, &render(&outcome))
            .await
            .map_err(|err| {
                tracing::warn!(?err, "failed to write response");
                ConnectionError::Io
            })?;

        state.metrics.request_completed(start.elapsed());
        tracing::debug!(?peer_addr, ?request, ok = outcome.is_ok(), "served request");
    }
}

fn execute(store: &CartStoreFacade, request: Request) -> CartResult<Reply> {
    match request {
        Request::Ping => Ok(Reply::Pong),
        Request::Apply { customer, item, op } => {
            store.apply(customer, item, op).map(|()| Reply::Done)
        }
        Request::List { index, key } => store.list(index, key).map(Reply::Listing),
    }
}

fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    let mut parts = line.split_ascii_whitespace();
    let command = parts.next().ok_or(ProtocolError::Empty)?;

    let request = match command.to_ascii_uppercase().as_str() {
        "PING" => Request::Ping,
        "ADD" | "REMOVE" => {
            let op = if command.eq_ignore_ascii_case("ADD") {
                CartOp::Add
            } else {
                CartOp::Remove
            };
            Request::Apply {
                customer: parse_key(parts.next(), "customer")?,
                item: parse_key(parts.next(), "item")?,
                op,
            }
        }
        "LIST" => {
            let index = match parts.next() {
                Some(name) if name.eq_ignore_ascii_case("customer") => IndexKind::Customer,
                Some(name) if name.eq_ignore_ascii_case("item") => IndexKind::Item,
                Some(other) => return Err(ProtocolError::UnknownIndex(other.to_string())),
                None => return Err(ProtocolError::MissingArgument("index")),
            };
            Request::List {
                index,
                key: parse_key(parts.next(), index.name())?,
            }
        }
        _ => return Err(ProtocolError::UnknownCommand(command.to_string())),
    };

    if parts.next().is_some() {
        return Err(ProtocolError::TrailingInput);
    }
    Ok(request)
}

fn parse_key(token: Option<&str>, field: &'static str) -> Result<Key, ProtocolError> {
    let token = token.ok_or(ProtocolError::MissingArgument(field))?;
    token.parse().map_err(|_| ProtocolError::InvalidNumber {
        field,
        value: token.to_string(),
    })
}

fn render(outcome: &CartResult<Reply>) -> String {
    match outcome {
        Ok(Reply::Pong) => "PONG".to_string(),
        Ok(Reply::Done) => "OK".to_string(),
        Ok(Reply::Listing(set)) => {
            let mut out = format!("OK {}", set.len());
            for (peer, count) in set.iter() {
                let _ = write!(out, "\n{peer} {count}");
            }
            out
        }
        Err(CartError::Unavailable { .. }) => "UNAVAILABLE".to_string(),
        Err(CartError::NotFound { .. }) => "NOT_FOUND".to_string(),
        Err(err) => format!("ERR {err}"),
    }
}

async fn read_limited_line<S>(
    reader: &mut BufferedReader<S>,
    idle_timeout: Duration,
) -> Result<Option<String>, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut line = Vec::with_capacity(64);
    let deadline = Instant::now() + idle_timeout;

    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .ok_or(ConnectionError::Protocol(ProtocolError::Timeout))?;

        let (bytes_to_consume, finished) = {
            let buf = match timeout(remaining, reader.fill_buf()).await {
                Ok(Ok(chunk)) => chunk,
                Ok(Err(err)) => {
                    tracing::debug!(?err, "failed to read request line");
                    return Err(ConnectionError::Io);
                }
                Err(_) => return Err(ConnectionError::Protocol(ProtocolError::Timeout)),
            };

            if buf.is_empty() {
                // EOF: a partial last line is still a request
                if line.is_empty() {
                    return Ok(None);
                }
                (0, true)
            } else if let Some(idx) = buf.iter().position(|byte| *byte == b'\n') {
                if line.len() + idx > MAX_LINE_LEN {
                    return Err(ConnectionError::Protocol(ProtocolError::LineTooLong));
                }
                line.extend_from_slice(&buf[..idx]);
                (idx + 1, true)
            } else {
                if line.len() + buf.len() > MAX_LINE_LEN {
                    return Err(ConnectionError::Protocol(ProtocolError::LineTooLong));
                }
                line.extend_from_slice(buf);
                (buf.len(), false)
            }
        };

        reader.consume(bytes_to_consume);

        if finished {
            while line.last() == Some(&b'\r') {
                line.pop();
            }
            return String::from_utf8(line)
                .map(Some)
                .map_err(|_| ConnectionError::Protocol(ProtocolError::InvalidUtf8));
        }
    }
}

async fn send_line<S>(writer: &mut StreamWriter<S>, line: &str) -> Result<(), std::io::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[derive(Debug)]
enum ConnectionError {
    Io,
    Protocol(ProtocolError),
    Store,
}

#[derive(thiserror::Error, Debug)]
enum ProtocolError {
    #[error("empty request")]
    Empty,
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("unknown index {0:?}; expected customer or item")]
    UnknownIndex(String),
    #[error("missing {0}")]
    MissingArgument(&'static str),
    #[error("invalid {field} {value:?}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("unexpected trailing input")]
    TrailingInput,
    #[error("request line too long")]
    LineTooLong,
    #[error("request is not valid utf-8")]
    InvalidUtf8,
    #[error("idle timeout")]
    Timeout,
}
