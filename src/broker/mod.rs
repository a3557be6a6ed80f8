//! Broker runtime: identity, TCP acceptor, and session handshake.
//!
//! Data flow: acceptor -> handshake -> registry -> per-connection read loop
//! -> worker pool (keyed by client id) -> dispatcher.

pub mod dispatch;
pub mod pool;
pub mod registry;
pub mod session;

use crate::core::config::BrokerConfig;
use crate::protocol::{
    self, ConnAckPacket, ConnectPacket, ConnectReturnCode, ControlPacket, PacketError,
};
use anyhow::Result;
use pool::WorkerPool;
use registry::ClientRegistry;
use session::Session;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

/// Minimum sleep on temporary accept errors; also the reset value after a
/// successful accept.
pub const ACCEPT_MIN_SLEEP: Duration = Duration::from_millis(100);
/// Cap for the temporary-accept-error backoff.
pub const ACCEPT_MAX_SLEEP: Duration = Duration::from_secs(10);
const BIND_RETRY_SLEEP: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("read connect: {0}")]
    Read(#[from] PacketError),
    #[error("not connect")]
    NotConnect,
    #[error("connect not accepted")]
    NotAccepted,
    #[error("duplicate client identifier")]
    DuplicateClient,
    #[error("write connack: {0}")]
    Write(PacketError),
}

pub struct Broker {
    id: String,
    config: Arc<BrokerConfig>,
    pool: WorkerPool,
    clients: ClientRegistry,
}

/// Handles every connection task needs; cloned per accepted stream.
#[derive(Clone)]
struct ListenerCtx {
    broker_id: String,
    pool: WorkerPool,
    clients: ClientRegistry,
}

impl Broker {
    /// Must be called from within a tokio runtime; worker slots are spawned
    /// here.
    pub fn new(config: BrokerConfig) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            pool: WorkerPool::new(config.worker),
            clients: ClientRegistry::new(),
            config: Arc::new(config),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Start serving. Returns immediately; the listener task runs for the
    /// life of the process. An empty port disables the TCP listener.
    pub fn start(&self) {
        if self.config.port.is_empty() {
            tracing::info!(broker_id = %self.id, "tcp listener disabled (empty port)");
            return;
        }
        let addr = format!("{}:{}", self.config.host, self.config.port);
        tracing::info!(
            broker_id = %self.id,
            workers = self.pool.worker_count(),
            "starting client listener on {addr}"
        );
        let ctx = ListenerCtx {
            broker_id: self.id.clone(),
            pool: self.pool.clone(),
            clients: self.clients.clone(),
        };
        tokio::spawn(async move { client_listener(addr, ctx).await });
    }
}

async fn client_listener(addr: String, ctx: ListenerCtx) {
    let listener = bind_listener(&addr, &ctx.broker_id).await;
    let mut delay = 10 * ACCEPT_MIN_SLEEP;
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                delay = ACCEPT_MIN_SLEEP;
                let ctx = ctx.clone();
                tokio::spawn(async move { handle_connection(stream, peer, ctx).await });
            }
            Err(err) if is_temporary_accept_error(&err) => {
                tracing::error!(
                    "temporary accept error ({err}), sleeping {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                delay = next_accept_delay(delay);
            }
            Err(err) => tracing::error!("accept error: {err}"),
        }
    }
}

/// Retry binding indefinitely so a broker configured with an address not yet
/// assigned to an interface starts working once the address appears.
async fn bind_listener(addr: &str, broker_id: &str) -> TcpListener {
    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                tracing::info!(broker_id, "listening for clients on {addr}");
                return listener;
            }
            Err(err) => {
                tracing::error!("listen on {addr}: {err}");
                tokio::time::sleep(BIND_RETRY_SLEEP).await;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: ListenerCtx) {
    let (mut reader, mut writer) = stream.into_split();
    let connect = match read_connect(&mut reader).await {
        Ok(connect) => connect,
        Err(err) => {
            tracing::error!(%peer, "process connect: {err}");
            return;
        }
    };
    tracing::info!(
        %peer,
        client_id = %connect.client_id,
        clean_session = connect.clean_session,
        keep_alive = connect.keep_alive,
        "mqtt connect"
    );
    if let Err(err) = acknowledge_connect(&ctx.clients, &mut writer, &connect).await {
        tracing::error!(%peer, client_id = %connect.client_id, "process connack: {err}");
        return;
    }
    let session = Session::new(
        connect.client_id.as_str(),
        false,
        writer,
        ctx.clients.clone(),
    );
    ctx.clients.add(session.clone());
    session::read_loop(session, reader, ctx.pool).await;
}

async fn read_connect(reader: &mut OwnedReadHalf) -> Result<ConnectPacket, HandshakeError> {
    match protocol::read_packet(reader).await? {
        ControlPacket::Connect(connect) => Ok(connect),
        _ => Err(HandshakeError::NotConnect),
    }
}

/// CONNECT validation and the CONNACK exchange. Writes go straight to the
/// stream; no session exists yet, so no send lock is involved.
async fn acknowledge_connect(
    clients: &ClientRegistry,
    writer: &mut OwnedWriteHalf,
    connect: &ConnectPacket,
) -> Result<(), HandshakeError> {
    // Accepting a CleanSession=1 connection means no state was restored, so
    // SessionPresent must be 0 [MQTT-3.2.2-1].
    let mut connack = ConnAckPacket {
        session_present: !connect.clean_session,
        return_code: connect.validate(),
    };
    if connack.return_code != ConnectReturnCode::Accepted {
        write_connack(writer, &connack).await?;
        return Err(HandshakeError::NotAccepted);
    }
    if clients.load(&connect.client_id).is_some() {
        // No takeover: the existing session stays, the newcomer is turned
        // away with a single rejection CONNACK.
        connack.return_code = ConnectReturnCode::NotAuthorized;
        write_connack(writer, &connack).await?;
        return Err(HandshakeError::DuplicateClient);
    }
    write_connack(writer, &connack).await
}

async fn write_connack(
    writer: &mut OwnedWriteHalf,
    connack: &ConnAckPacket,
) -> Result<(), HandshakeError> {
    protocol::write_packet(writer, &ControlPacket::ConnAck(connack.clone()))
        .await
        .map_err(HandshakeError::Write)
}

fn next_accept_delay(current: Duration) -> Duration {
    (current * 2).min(ACCEPT_MAX_SLEEP)
}

/// Errors the OS reports for a doomed connection rather than a broken
/// listener; the accept loop backs off and retries on these.
fn is_temporary_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
    )
}
