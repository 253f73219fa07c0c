//! Engine-level errors, one variant per failure mode the WebSocket engine
//! and the byte-stream layer underneath it can raise.

use thiserror::Error;

/// Closed set of everything that can go wrong while driving a connection.
#[derive(Debug, Error)]
pub enum WsError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("control frame too big or fragmented")]
    FrameControlTooBig,

    #[error("reserved frame bits not negotiated")]
    ReservedBitsNotNegotiated,

    #[error("close frame received")]
    CloseSent,

    #[error("unexpected opcode")]
    UnexpectedOpcode,

    #[error("UTF-8 sequence is too short")]
    Utf8Short,

    #[error("UTF-8 sequence is invalid")]
    Utf8Invalid,

    #[error("server handshake: duplicate Sec-WebSocket-Key")]
    HandshakeDuplicateKey,

    #[error("server handshake: Sec-WebSocket-Key is missing")]
    HandshakeNoKey,

    #[error("client handshake: bad Sec-WebSocket-Accept")]
    HandshakeBadAccept,

    #[error("client handshake: duplicate Sec-WebSocket-Accept")]
    HandshakeDuplicateAccept,

    #[error("client handshake: Sec-WebSocket-Accept is missing")]
    HandshakeNoAccept,
}

impl WsError {
    /// CLOSE is a normal termination signal; everything else is worth logging loudly.
    pub fn is_close_sent(&self) -> bool {
        matches!(self, WsError::CloseSent)
    }
}
