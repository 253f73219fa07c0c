//! A hand-rolled RFC 6455 WebSocket engine: handshake, frame codec, message
//! assembly across continuation frames, masking, strict UTF-8 checking, and
//! close handshake. One `Engine` is bound to exactly one socket and owned by
//! exactly one task; its write half is shared behind a mutex so the tick
//! scheduler can also push broadcast writes without racing the reader's own
//! inline control-frame replies.

mod frame;
mod handshake;
mod utf8;

pub use frame::{CHUNK_SIZE, Opcode};
pub use handshake::compute_accept;

use crate::error::WsError;
use frame::{read_frame_header, read_frame_payload, send_frame};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

/// The kind of an assembled application message — mirrors the two
/// non-control opcodes a message can start with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

/// A fully assembled message: all continuation frames concatenated and, for
/// text messages, validated as UTF-8 from the first byte to the last.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

/// A clonable handle onto a connection's write half. Anyone holding one can
/// send a message without needing to own the `Engine` itself — the tick
/// scheduler keeps one of these per registered player for broadcast writes.
pub struct Writer<S> {
    writer: Arc<Mutex<WriteHalf<S>>>,
    client: bool,
}

impl<S: AsyncWrite + Unpin> Writer<S> {
    pub async fn send_message(&self, kind: MessageKind, payload: &[u8]) -> Result<(), WsError> {
        let mut guard = self.writer.lock().await;
        send_message_frames(&mut *guard, kind, payload, self.client).await
    }
}

impl<S> Clone for Writer<S> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
            client: self.client,
        }
    }
}

async fn send_message_frames<W: AsyncWrite + Unpin>(
    writer: &mut W,
    kind: MessageKind,
    payload: &[u8],
    client: bool,
) -> Result<(), WsError> {
    let opcode = match kind {
        MessageKind::Text => Opcode::Text,
        MessageKind::Binary => Opcode::Bin,
    };
    let mut remaining = payload;
    let mut first = true;
    loop {
        let take = remaining.len().min(CHUNK_SIZE);
        let (chunk, rest) = remaining.split_at(take);
        let fin = rest.is_empty();
        let frame_opcode = if first { opcode } else { Opcode::Cont };
        send_frame(writer, fin, frame_opcode, chunk, client).await?;
        remaining = rest;
        first = false;
        if fin {
            break;
        }
    }
    Ok(())
}

/// Bidirectional WebSocket engine over any async duplex byte stream. `client`
/// selects which side's framing rules apply when sending (servers never mask).
pub struct Engine<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: Arc<Mutex<WriteHalf<S>>>,
    client: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Engine<S> {
    pub fn new_server(io: S) -> Self {
        let (read_half, write_half) = tokio::io::split(io);
        Self {
            reader: BufReader::with_capacity(CHUNK_SIZE, read_half),
            writer: Arc::new(Mutex::new(write_half)),
            client: false,
        }
    }

    pub fn new_client(io: S) -> Self {
        let (read_half, write_half) = tokio::io::split(io);
        Self {
            reader: BufReader::with_capacity(CHUNK_SIZE, read_half),
            writer: Arc::new(Mutex::new(write_half)),
            client: true,
        }
    }

    /// A clonable write handle, shareable with tasks that only ever need to
    /// send (the tick scheduler's broadcast path).
    pub fn writer_handle(&self) -> Writer<S> {
        Writer {
            writer: self.writer.clone(),
            client: self.client,
        }
    }

    pub async fn server_handshake(&mut self) -> Result<(), WsError> {
        let mut guard = self.writer.lock().await;
        handshake::server_handshake(&mut self.reader, &mut *guard).await
    }

    pub async fn client_handshake(&mut self, host: &str, endpoint: &str) -> Result<(), WsError> {
        let mut guard = self.writer.lock().await;
        handshake::client_handshake(&mut self.reader, &mut *guard, host, endpoint).await
    }

    /// Sends one application message, fragmenting payloads larger than
    /// `CHUNK_SIZE` into continuation frames. The first frame carries the
    /// message opcode; every later frame carries `CONT`; the last has `fin=1`.
    pub async fn send_message(&self, kind: MessageKind, payload: &[u8]) -> Result<(), WsError> {
        let mut guard = self.writer.lock().await;
        send_message_frames(&mut *guard, kind, payload, self.client).await
    }

    /// Reads one application message, transparently answering PINGs with
    /// PONGs and dropping unsolicited PONGs, until a non-control message is
    /// fully assembled. Returns `CloseSent` on a CLOSE frame. Only the task
    /// that owns this `Engine` calls this — exactly one reader per connection.
    pub async fn read_message(&mut self) -> Result<Message, WsError> {
        let mut payload = Vec::new();
        let mut kind = None;
        let mut cont = false;
        let mut verify_pos = 0usize;

        loop {
            let header = read_frame_header(&mut self.reader).await?;

            if header.opcode.is_control() {
                match header.opcode {
                    Opcode::Close => return Err(WsError::CloseSent),
                    Opcode::Ping => {
                        let mut echoed = Vec::with_capacity(header.payload_len);
                        read_frame_payload(&mut self.reader, &header, |chunk| {
                            echoed.extend_from_slice(chunk)
                        })
                        .await?;
                        let mut guard = self.writer.lock().await;
                        send_frame(&mut *guard, true, Opcode::Pong, &echoed, self.client).await?;
                    }
                    Opcode::Pong => {
                        read_frame_payload(&mut self.reader, &header, |_| {}).await?;
                    }
                    _ => return Err(WsError::UnexpectedOpcode),
                }
                continue;
            }

            if !cont {
                kind = Some(match header.opcode {
                    Opcode::Text => MessageKind::Text,
                    Opcode::Bin => MessageKind::Binary,
                    _ => return Err(WsError::UnexpectedOpcode),
                });
                cont = true;
            } else if header.opcode != Opcode::Cont {
                return Err(WsError::UnexpectedOpcode);
            }

            read_frame_payload(&mut self.reader, &header, |chunk| {
                payload.extend_from_slice(chunk)
            })
            .await?;

            if kind == Some(MessageKind::Text) {
                verify_pos = utf8::validate_incremental(&payload, verify_pos, header.fin)?;
            }

            if header.fin {
                break;
            }
        }

        Ok(Message {
            kind: kind.expect("a message always starts with TEXT or BIN"),
            payload,
        })
    }

    /// Sends a CLOSE frame, shuts the write half down, drains any remaining
    /// input so the peer's FIN is observed instead of an RST, then drops the
    /// socket.
    pub async fn close(mut self) {
        {
            let mut guard = self.writer.lock().await;
            let _ = send_frame(&mut *guard, true, Opcode::Close, &[], self.client).await;
            let _ = guard.shutdown().await;
        }
        let mut scratch = [0u8; CHUNK_SIZE];
        loop {
            match tokio::io::AsyncReadExt::read(&mut self.reader, &mut scratch).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    }
}
