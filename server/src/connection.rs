//! Per-connection task: WebSocket handshake, registration with the tick
//! scheduler, and the two loops (inbound frames, outbound broadcast) that
//! keep a connection alive until it errors out or is told to leave.

use crate::ws::{Engine, MessageKind};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

/// Capacity of a connection's private outbound queue. The tick scheduler
/// only ever `try_send`s into it; a slow reader backs this queue up and
/// eventually starts dropping its own messages rather than stalling a tick.
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Everything a connection task reports to the tick scheduler. The scheduler
/// is the sole owner of `PlayerRegistry` and `World`; this is the only way a
/// connection task can reach them.
pub enum ConnectionEvent {
    Connected {
        remote: Option<String>,
        outbound: mpsc::Sender<Bytes>,
        kick: oneshot::Sender<()>,
        responder: oneshot::Sender<Option<u32>>,
    },
    Frame {
        player_id: u32,
        payload: Bytes,
    },
    Disconnected {
        player_id: u32,
    },
}

/// Drives one accepted socket end to end: handshake, admission, read/write
/// loops, and a final `Disconnected` notice. Runs until the peer closes, a
/// protocol error occurs, or admission is refused.
pub async fn run<S>(io: S, remote: Option<String>, events: mpsc::Sender<ConnectionEvent>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut engine = Engine::new_server(io);
    if let Err(e) = engine.server_handshake().await {
        tracing::debug!(error = %e, ?remote, "handshake failed");
        return;
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Bytes>(OUTBOUND_QUEUE_CAPACITY);
    let (responder_tx, responder_rx) = oneshot::channel();
    let (kick_tx, mut kick_rx) = oneshot::channel();

    if events
        .send(ConnectionEvent::Connected {
            remote: remote.clone(),
            outbound: outbound_tx,
            kick: kick_tx,
            responder: responder_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    let Ok(Some(player_id)) = responder_rx.await else {
        tracing::debug!(?remote, "connection refused by admission control");
        engine.close().await;
        return;
    };

    let writer = engine.writer_handle();
    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = outbound_rx.recv().await {
            if writer.send_message(MessageKind::Binary, &bytes).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut kick_rx => {
                tracing::debug!(player_id, "connection kicked for a bogus message");
                break;
            }
            message = engine.read_message() => {
                match message {
                    Ok(message) => {
                        if message.kind != MessageKind::Binary {
                            tracing::debug!(player_id, kind = ?message.kind, "unexpected opcode, closing");
                            break;
                        }
                        let payload = Bytes::from(message.payload);
                        if events
                            .send(ConnectionEvent::Frame { player_id, payload })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        if !e.is_close_sent() {
                            tracing::debug!(error = %e, player_id, "connection read failed");
                        }
                        break;
                    }
                }
            }
        }
    }

    writer_task.abort();
    let _ = events.send(ConnectionEvent::Disconnected { player_id }).await;
    engine.close().await;
}
