//! Frame-level codec: header parse/encode, masking, control-frame policy.

use crate::error::WsError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

pub const CHUNK_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Cont = 0x0,
    Text = 0x1,
    Bin = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    fn from_nibble(n: u8) -> Option<Self> {
        Some(match n {
            0x0 => Self::Cont,
            0x1 => Self::Text,
            0x2 => Self::Bin,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            _ => return None,
        })
    }

    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub payload_len: usize,
    pub mask: [u8; 4],
}

/// Reads and validates one frame header. Rejects unnegotiated reserved bits
/// and oversized/fragmented control frames before the caller ever sees a
/// payload byte.
pub async fn read_frame_header<S: AsyncRead + Unpin>(
    io: &mut BufReader<S>,
) -> Result<FrameHeader, WsError> {
    let mut header = [0u8; 2];
    read_exact_nonzero(io, &mut header).await?;

    let fin = header[0] & 0x80 != 0;
    let rsv1 = header[0] & 0x40 != 0;
    let rsv2 = header[0] & 0x20 != 0;
    let rsv3 = header[0] & 0x10 != 0;
    let opcode_nibble = header[0] & 0x0F;
    let masked = header[1] & 0x80 != 0;
    let len7 = header[1] & 0x7F;

    if rsv1 || rsv2 || rsv3 {
        return Err(WsError::ReservedBitsNotNegotiated);
    }

    let opcode = Opcode::from_nibble(opcode_nibble).ok_or(WsError::UnexpectedOpcode)?;

    let payload_len = match len7 {
        126 => {
            let mut ext = [0u8; 2];
            read_exact_nonzero(io, &mut ext).await?;
            u16::from_be_bytes(ext) as usize
        }
        127 => {
            let mut ext = [0u8; 8];
            read_exact_nonzero(io, &mut ext).await?;
            u64::from_be_bytes(ext) as usize
        }
        n => n as usize,
    };

    if opcode.is_control() && (payload_len > 125 || !fin) {
        return Err(WsError::FrameControlTooBig);
    }

    let mut mask = [0u8; 4];
    if masked {
        read_exact_nonzero(io, &mut mask).await?;
    }

    Ok(FrameHeader {
        fin,
        opcode,
        masked,
        payload_len,
        mask,
    })
}

/// Reads `frame_header.payload_len` bytes in `CHUNK_SIZE` slabs, unmasking in
/// place with the mask cycled over the *entire* frame rather than per chunk,
/// and calls `on_chunk` with each newly read (already unmasked) slice.
pub async fn read_frame_payload<S: AsyncRead + Unpin>(
    io: &mut BufReader<S>,
    header: &FrameHeader,
    mut on_chunk: impl FnMut(&[u8]),
) -> Result<(), WsError> {
    let mut finished = 0usize;
    let mut buf = [0u8; CHUNK_SIZE];
    while finished < header.payload_len {
        let want = (header.payload_len - finished).min(CHUNK_SIZE);
        let chunk = &mut buf[..want];
        read_exact_nonzero(io, chunk).await?;
        if header.masked {
            for (i, byte) in chunk.iter_mut().enumerate() {
                *byte ^= header.mask[(finished + i) % 4];
            }
        }
        on_chunk(chunk);
        finished += want;
    }
    Ok(())
}

/// Writes one frame: `fin`+opcode byte, length in its 7/16/64-bit form, an
/// optional mask (client frames only), then the payload. The server side of
/// this engine always sends `masked = false`.
pub async fn send_frame<S: AsyncWrite + Unpin>(
    io: &mut S,
    fin: bool,
    opcode: Opcode,
    payload: &[u8],
    client: bool,
) -> Result<(), WsError> {
    let mut first = opcode as u8;
    if fin {
        first |= 0x80;
    }
    io.write_all(&[first]).await?;

    let mask_bit = if client { 0x80 } else { 0x00 };
    let len = payload.len();
    if len < 126 {
        io.write_all(&[mask_bit | len as u8]).await?;
    } else if len <= u16::MAX as usize {
        io.write_all(&[mask_bit | 126]).await?;
        io.write_all(&(len as u16).to_be_bytes()).await?;
    } else {
        io.write_all(&[mask_bit | 127]).await?;
        io.write_all(&(len as u64).to_be_bytes()).await?;
    }

    if client {
        let mask = client_mask();
        io.write_all(&mask).await?;
        let mut masked = Vec::with_capacity(payload.len());
        masked.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        io.write_all(&masked).await?;
    } else {
        io.write_all(payload).await?;
    }

    Ok(())
}

/// A small xorshift generator seeded off the clock. The client-masking path
/// only exists for symmetry with the handshake's client side; it is never
/// exercised by the server core, so cryptographic strength is not required.
fn client_mask() -> [u8; 4] {
    use std::time::{SystemTime, UNIX_EPOCH};
    let mut x = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
        .unwrap_or(0x2545F4914F6CDD1D)
        | 1;
    let mut out = [0u8; 4];
    for b in out.iter_mut() {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        *b = x as u8;
    }
    out
}

/// `read_exact` that maps the zero-progress EOF case to `ConnectionClosed`.
async fn read_exact_nonzero<S: AsyncRead + Unpin>(
    io: &mut BufReader<S>,
    buf: &mut [u8],
) -> Result<(), WsError> {
    match io.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(WsError::ConnectionClosed),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader as TokioBufReader;

    #[tokio::test]
    async fn header_round_trips_small_payload() {
        let (mut client, server) = tokio::io::duplex(64);
        send_frame(&mut client, true, Opcode::Bin, b"hi", false)
            .await
            .unwrap();
        let mut reader = TokioBufReader::new(server);
        let header = read_frame_header(&mut reader).await.unwrap();
        assert!(header.fin);
        assert_eq!(header.opcode, Opcode::Bin);
        assert_eq!(header.payload_len, 2);
        assert!(!header.masked);
    }

    #[tokio::test]
    async fn extended_length_round_trips() {
        let payload = vec![7u8; 70_000];
        let (mut client, server) = tokio::io::duplex(1 << 20);
        send_frame(&mut client, true, Opcode::Bin, &payload, false)
            .await
            .unwrap();
        let mut reader = TokioBufReader::new(server);
        let header = read_frame_header(&mut reader).await.unwrap();
        assert_eq!(header.payload_len, payload.len());
        let mut collected = Vec::new();
        read_frame_payload(&mut reader, &header, |chunk| collected.extend_from_slice(chunk))
            .await
            .unwrap();
        assert_eq!(collected, payload);
    }

    #[tokio::test]
    async fn reserved_bits_are_rejected() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&[0xB0, 0x00]).await.unwrap();
        let mut reader = TokioBufReader::new(server);
        let err = read_frame_header(&mut reader).await.unwrap_err();
        assert!(matches!(err, WsError::ReservedBitsNotNegotiated));
    }

    #[tokio::test]
    async fn fragmented_control_frame_is_rejected() {
        let (mut client, server) = tokio::io::duplex(64);
        // PING, fin=0: control frame must not be fragmented.
        client.write_all(&[0x09, 0x00]).await.unwrap();
        let mut reader = TokioBufReader::new(server);
        let err = read_frame_header(&mut reader).await.unwrap_err();
        assert!(matches!(err, WsError::FrameControlTooBig));
    }

    #[tokio::test]
    async fn mask_cycles_over_entire_frame_not_per_chunk() {
        let mask = [0x11, 0x22, 0x33, 0x44];
        let payload: Vec<u8> = (0..10u8).collect();
        let masked: Vec<u8> = payload
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ mask[i % 4])
            .collect();

        let header = FrameHeader {
            fin: true,
            opcode: Opcode::Bin,
            masked: true,
            payload_len: masked.len(),
            mask,
        };

        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&masked).await.unwrap();
        let mut reader = TokioBufReader::new(server);
        let mut collected = Vec::new();
        read_frame_payload(&mut reader, &header, |chunk| collected.extend_from_slice(chunk))
            .await
            .unwrap();
        assert_eq!(collected, payload);
    }
}
