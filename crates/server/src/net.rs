//! Tokio front end: connection tasks, the serializing hub worker, and
//! frame delivery.
//!
//! One task per connection reads frames and forwards them, as messages,
//! to a single worker that owns the [`Hub`]. The worker applies requests
//! one at a time, so every mutation runs to completion before the next
//! is looked at; cross-room operations never interleave. Outgoing
//! messages ride each connection's unbounded queue, which preserves
//! emission order end to end.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use tabletop_sim::ConnectionId;
use tabletop_wire::{ClientEnvelope, ServerEnvelope, ServerMessage, read_frame, write_frame};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::hub::Hub;

/// Runtime configuration. The bind address is the only knob this core
/// exposes; everything else lives outside the synchronization layer.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

/// Commands flowing into the hub worker. Everything that can touch the
/// registry arrives here, in order.
enum HubCommand {
    Connected {
        conn: ConnectionId,
        tx: mpsc::UnboundedSender<ServerEnvelope>,
    },
    Request {
        conn: ConnectionId,
        envelope: ClientEnvelope,
    },
    Disconnected {
        conn: ConnectionId,
    },
}

/// Bind and serve forever.
pub async fn run(config: ServerConfig) -> io::Result<()> {
    let listener = TcpListener::bind(config.bind).await?;
    info!(addr = %listener.local_addr()?, "listening");
    serve(listener).await
}

/// Serve on an already-bound listener. Split out so tests can bind to an
/// ephemeral port first.
pub async fn serve(listener: TcpListener) -> io::Result<()> {
    let (hub_tx, hub_rx) = mpsc::unbounded_channel();
    tokio::spawn(hub_worker(hub_rx));

    let mut next_conn: ConnectionId = 1;
    loop {
        let (stream, peer) = listener.accept().await?;
        let conn = next_conn;
        next_conn += 1;
        debug!(conn, %peer, "client connected");
        tokio::spawn(connection(conn, stream, hub_tx.clone()));
    }
}

/// The one task that owns all mutable session state.
async fn hub_worker(mut rx: mpsc::UnboundedReceiver<HubCommand>) {
    let mut hub = Hub::new();
    let mut senders: HashMap<ConnectionId, mpsc::UnboundedSender<ServerEnvelope>> =
        HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            HubCommand::Connected { conn, tx } => {
                senders.insert(conn, tx);
            }
            HubCommand::Request { conn, envelope } => {
                let Some(request) = envelope.request else {
                    warn!(conn, "envelope with no request body");
                    continue;
                };
                let (ack, outgoing) = hub.handle_request(conn, request, now_ms());
                // Ack first, then the broadcasts it triggered: callers
                // observe their own effect no later than the room does.
                deliver(
                    &mut senders,
                    conn,
                    ServerEnvelope {
                        correlation: envelope.correlation,
                        message: Some(ServerMessage::Ack(ack)),
                    },
                );
                for out in outgoing {
                    deliver(
                        &mut senders,
                        out.to,
                        ServerEnvelope {
                            correlation: 0,
                            message: Some(out.message),
                        },
                    );
                }
            }
            HubCommand::Disconnected { conn } => {
                senders.remove(&conn);
                for out in hub.handle_disconnect(conn) {
                    deliver(
                        &mut senders,
                        out.to,
                        ServerEnvelope {
                            correlation: 0,
                            message: Some(out.message),
                        },
                    );
                }
            }
        }
    }
}

fn deliver(
    senders: &mut HashMap<ConnectionId, mpsc::UnboundedSender<ServerEnvelope>>,
    to: ConnectionId,
    envelope: ServerEnvelope,
) {
    if let Some(tx) = senders.get(&to) {
        // A failed send means the writer already went away; the
        // disconnect command trailing in the queue cleans up.
        if tx.send(envelope).is_err() {
            senders.remove(&to);
        }
    }
}

/// Per-connection task: pump incoming frames into the worker, and a
/// writer half that drains this connection's ordered outgoing queue.
async fn connection(
    conn: ConnectionId,
    stream: TcpStream,
    hub_tx: mpsc::UnboundedSender<HubCommand>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEnvelope>();
    if hub_tx.send(HubCommand::Connected { conn, tx }).is_err() {
        return;
    }

    let write_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &envelope).await {
                debug!(conn, error = %e, "write failed, dropping connection");
                break;
            }
        }
    });

    loop {
        match read_frame::<_, ClientEnvelope>(&mut reader).await {
            Ok(Some(envelope)) => {
                if hub_tx
                    .send(HubCommand::Request { conn, envelope })
                    .is_err()
                {
                    break;
                }
            }
            Ok(None) => {
                debug!(conn, "client closed");
                break;
            }
            Err(e) => {
                warn!(conn, error = %e, "read failed, dropping connection");
                break;
            }
        }
    }

    if hub_tx.send(HubCommand::Disconnected { conn }).is_err() {
        error!(conn, "hub worker gone during disconnect");
    }
    write_task.abort();
}

/// Wall-clock milliseconds. Lives at the transport boundary; the sim
/// core only ever sees the value.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
