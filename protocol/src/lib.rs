//! The binary wire protocol between the game server and a connected client.
//!
//! Every message on the wire is a single envelope:
//! `{u32 byte_length, u8 kind, payload[...]}`, little-endian, packed, where
//! `byte_length` includes the envelope header itself. "Batch" kinds carry
//! zero or more fixed-size records back to back; "single" kinds carry
//! exactly one fixed-size (possibly empty) payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size in bytes of the envelope header (`u32` length + `u8` kind).
pub const HEADER_SIZE: usize = 5;

/// The one-byte message kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Hello = 0,
    PlayerJoined = 1,
    PlayerLeft = 2,
    PlayerMoving = 3,
    AmmaMoving = 4,
    AmmaThrowing = 5,
    Ping = 6,
    Pong = 7,
    ItemSpawned = 8,
    ItemCollected = 9,
    BombSpawned = 10,
    BombExploded = 11,
}

impl MessageKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Hello,
            1 => Self::PlayerJoined,
            2 => Self::PlayerLeft,
            3 => Self::PlayerMoving,
            4 => Self::AmmaMoving,
            5 => Self::AmmaThrowing,
            6 => Self::Ping,
            7 => Self::Pong,
            8 => Self::ItemSpawned,
            9 => Self::ItemCollected,
            10 => Self::BombSpawned,
            11 => Self::BombExploded,
            _ => return None,
        })
    }
}

/// Errors raised while decoding a message envelope.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("message too short for an envelope header")]
    TooShort,
    #[error("unknown message kind byte {0}")]
    UnknownKind(u8),
    #[error("expected message kind {expected:?}, got {actual:?}")]
    WrongKind {
        expected: MessageKind,
        actual: MessageKind,
    },
    #[error("batch payload length {payload_len} is not a multiple of record size {record_size}")]
    MisalignedBatch {
        payload_len: usize,
        record_size: usize,
    },
    #[error("non-empty payload where an empty one was expected")]
    NotEmpty,
}

/// A fixed-size wire record that can be written into / read out of a batch payload.
pub trait WireEntry: Sized {
    const SIZE: usize;
    fn write_to(&self, buf: &mut BytesMut);
    fn read_from(buf: &mut impl Buf) -> Self;
}

impl WireEntry for u32 {
    const SIZE: usize = 4;
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(*self);
    }
    fn read_from(buf: &mut impl Buf) -> Self {
        buf.get_u32_le()
    }
}

/// Payload of `HELLO`, and of each record in `PLAYER_JOINED`/`PLAYER_MOVING`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerHello {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub dir: f32,
    pub hue: u8,
}

impl WireEntry for PlayerHello {
    const SIZE: usize = 4 + 4 + 4 + 4 + 1;
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.id);
        buf.put_f32_le(self.x);
        buf.put_f32_le(self.y);
        buf.put_f32_le(self.dir);
        buf.put_u8(self.hue);
    }
    fn read_from(buf: &mut impl Buf) -> Self {
        Self {
            id: buf.get_u32_le(),
            x: buf.get_f32_le(),
            y: buf.get_f32_le(),
            dir: buf.get_f32_le(),
            hue: buf.get_u8(),
        }
    }
}

/// A single record of a `PLAYER_JOINED` / `PLAYER_MOVING` batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerEntry {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub dir: f32,
    pub hue: u8,
    pub moving: u8,
}

impl WireEntry for PlayerEntry {
    const SIZE: usize = 4 + 4 + 4 + 4 + 1 + 1;
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.id);
        buf.put_f32_le(self.x);
        buf.put_f32_le(self.y);
        buf.put_f32_le(self.dir);
        buf.put_u8(self.hue);
        buf.put_u8(self.moving);
    }
    fn read_from(buf: &mut impl Buf) -> Self {
        Self {
            id: buf.get_u32_le(),
            x: buf.get_f32_le(),
            y: buf.get_f32_le(),
            dir: buf.get_f32_le(),
            hue: buf.get_u8(),
            moving: buf.get_u8(),
        }
    }
}

/// Payload of the single-record `AMMA_MOVING` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmmaMoving {
    pub direction: u8,
    pub start: bool,
}

impl WireEntry for AmmaMoving {
    const SIZE: usize = 1 + 1;
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.direction);
        buf.put_u8(self.start as u8);
    }
    fn read_from(buf: &mut impl Buf) -> Self {
        Self {
            direction: buf.get_u8(),
            start: buf.get_u8() != 0,
        }
    }
}

/// Payload of `PING`/`PONG`: a client-chosen timestamp echoed back verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp(pub u32);

impl WireEntry for Timestamp {
    const SIZE: usize = 4;
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.0);
    }
    fn read_from(buf: &mut impl Buf) -> Self {
        Self(buf.get_u32_le())
    }
}

/// A record of an `ITEM_SPAWNED` batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemSpawned {
    pub kind: u8,
    pub index: u32,
    pub x: f32,
    pub y: f32,
}

impl WireEntry for ItemSpawned {
    const SIZE: usize = 1 + 4 + 4 + 4;
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind);
        buf.put_u32_le(self.index);
        buf.put_f32_le(self.x);
        buf.put_f32_le(self.y);
    }
    fn read_from(buf: &mut impl Buf) -> Self {
        Self {
            kind: buf.get_u8(),
            index: buf.get_u32_le(),
            x: buf.get_f32_le(),
            y: buf.get_f32_le(),
        }
    }
}

/// A record of a `BOMB_SPAWNED` batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BombSpawned {
    pub index: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub dx: f32,
    pub dy: f32,
    pub dz: f32,
    pub lifetime: f32,
}

impl WireEntry for BombSpawned {
    const SIZE: usize = 4 + 4 * 7;
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.index);
        buf.put_f32_le(self.x);
        buf.put_f32_le(self.y);
        buf.put_f32_le(self.z);
        buf.put_f32_le(self.dx);
        buf.put_f32_le(self.dy);
        buf.put_f32_le(self.dz);
        buf.put_f32_le(self.lifetime);
    }
    fn read_from(buf: &mut impl Buf) -> Self {
        Self {
            index: buf.get_u32_le(),
            x: buf.get_f32_le(),
            y: buf.get_f32_le(),
            z: buf.get_f32_le(),
            dx: buf.get_f32_le(),
            dy: buf.get_f32_le(),
            dz: buf.get_f32_le(),
            lifetime: buf.get_f32_le(),
        }
    }
}

/// A record of a `BOMB_EXPLODED` batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BombExploded {
    pub index: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl WireEntry for BombExploded {
    const SIZE: usize = 4 + 4 * 3;
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.index);
        buf.put_f32_le(self.x);
        buf.put_f32_le(self.y);
        buf.put_f32_le(self.z);
    }
    fn read_from(buf: &mut impl Buf) -> Self {
        Self {
            index: buf.get_u32_le(),
            x: buf.get_f32_le(),
            y: buf.get_f32_le(),
            z: buf.get_f32_le(),
        }
    }
}

/// Encodes a batch message: the envelope followed by `items.len()` fixed-size records.
/// An empty slice still produces a valid envelope with `byte_length == HEADER_SIZE`.
pub fn encode_batch<T: WireEntry>(kind: MessageKind, items: &[T]) -> Bytes {
    let byte_length = HEADER_SIZE + T::SIZE * items.len();
    let mut buf = BytesMut::with_capacity(byte_length);
    buf.put_u32_le(byte_length as u32);
    buf.put_u8(kind as u8);
    for item in items {
        item.write_to(&mut buf);
    }
    buf.freeze()
}

/// Encodes a single-record message (`HELLO`, `AMMA_MOVING`, `PING`, `PONG`).
pub fn encode_single<T: WireEntry>(kind: MessageKind, item: &T) -> Bytes {
    encode_batch(kind, std::slice::from_ref(item))
}

/// Encodes a message with no payload at all (`AMMA_THROWING`).
pub fn encode_empty(kind: MessageKind) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE);
    buf.put_u32_le(HEADER_SIZE as u32);
    buf.put_u8(kind as u8);
    buf.freeze()
}

/// Reads the envelope header, returning `(kind, payload_len)`. Validates
/// `byte_length` against both the header minimum and the actual buffer
/// length, so callers can slice `data[HEADER_SIZE..]` without checking again.
fn read_header(data: &[u8]) -> Result<(MessageKind, usize), ProtocolError> {
    if data.len() < HEADER_SIZE {
        return Err(ProtocolError::TooShort);
    }
    let byte_length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let kind = MessageKind::from_u8(data[4]).ok_or(ProtocolError::UnknownKind(data[4]))?;
    if byte_length < HEADER_SIZE || data.len() < byte_length {
        return Err(ProtocolError::TooShort);
    }
    Ok((kind, byte_length - HEADER_SIZE))
}

/// Verifies an inbound message claims to be `expected` and carries a payload
/// whose length is a multiple of `record_size`. Returns the record count.
pub fn verify_batch(
    data: &[u8],
    expected: MessageKind,
    record_size: usize,
) -> Result<usize, ProtocolError> {
    let (kind, payload_len) = read_header(data)?;
    if kind != expected {
        return Err(ProtocolError::WrongKind {
            expected,
            actual: kind,
        });
    }
    if payload_len % record_size != 0 {
        return Err(ProtocolError::MisalignedBatch {
            payload_len,
            record_size,
        });
    }
    Ok(payload_len / record_size)
}

/// Verifies an inbound message claims to be `expected` and carries an empty payload.
pub fn verify_empty(data: &[u8], expected: MessageKind) -> Result<(), ProtocolError> {
    let (kind, payload_len) = read_header(data)?;
    if kind != expected {
        return Err(ProtocolError::WrongKind {
            expected,
            actual: kind,
        });
    }
    if payload_len != 0 {
        return Err(ProtocolError::NotEmpty);
    }
    Ok(())
}

/// Decodes a single fixed-size record payload of `expected` kind (`AMMA_MOVING`, `PING`).
pub fn decode_single<T: WireEntry>(data: &[u8], expected: MessageKind) -> Result<T, ProtocolError> {
    verify_batch(data, expected, T::SIZE)?;
    let mut payload = &data[HEADER_SIZE..];
    Ok(T::read_from(&mut payload))
}

/// Decodes all records of a batch payload of `expected` kind.
pub fn decode_batch<T: WireEntry>(
    data: &[u8],
    expected: MessageKind,
) -> Result<Vec<T>, ProtocolError> {
    let count = verify_batch(data, expected, T::SIZE)?;
    let mut payload = &data[HEADER_SIZE..];
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(T::read_from(&mut payload));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_has_header_size_exactly() {
        let encoded = encode_batch::<u32>(MessageKind::PlayerLeft, &[]);
        assert_eq!(encoded.len(), HEADER_SIZE);
        let count = verify_batch(&encoded, MessageKind::PlayerLeft, u32::SIZE).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn player_joined_round_trips() {
        let entries = vec![
            PlayerEntry {
                id: 1,
                x: 1.5,
                y: 3.5,
                dir: 0.0,
                hue: 10,
                moving: 0b0001,
            },
            PlayerEntry {
                id: 2,
                x: -2.0,
                y: 0.25,
                dir: 1.25,
                hue: 200,
                moving: 0,
            },
        ];
        let encoded = encode_batch(MessageKind::PlayerJoined, &entries);
        let decoded: Vec<PlayerEntry> = decode_batch(&encoded, MessageKind::PlayerJoined).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let encoded = encode_empty(MessageKind::AmmaThrowing);
        let err = verify_empty(&encoded, MessageKind::Ping).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::WrongKind {
                expected: MessageKind::Ping,
                actual: MessageKind::AmmaThrowing,
            }
        );
    }

    #[test]
    fn misaligned_batch_is_rejected() {
        let mut encoded = encode_batch(MessageKind::PlayerLeft, &[1u32, 2u32]).to_vec();
        // Truncate one byte off the end so payload length is no longer a multiple of 4.
        encoded.truncate(encoded.len() - 1);
        let new_len = encoded.len() as u32;
        encoded[0..4].copy_from_slice(&new_len.to_le_bytes());
        let err = verify_batch(&encoded, MessageKind::PlayerLeft, u32::SIZE).unwrap_err();
        assert!(matches!(err, ProtocolError::MisalignedBatch { .. }));
    }

    #[test]
    fn amma_moving_single_round_trips() {
        let msg = AmmaMoving {
            direction: 2,
            start: true,
        };
        let encoded = encode_single(MessageKind::AmmaMoving, &msg);
        let decoded: AmmaMoving = decode_single(&encoded, MessageKind::AmmaMoving).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn amma_throwing_is_empty() {
        let encoded = encode_empty(MessageKind::AmmaThrowing);
        assert!(verify_empty(&encoded, MessageKind::AmmaThrowing).is_ok());
        assert!(verify_empty(&encoded, MessageKind::Ping).is_err());
    }

    #[test]
    fn spoofed_byte_length_longer_than_buffer_is_rejected() {
        let msg = AmmaMoving {
            direction: 0,
            start: true,
        };
        let mut encoded = encode_single(MessageKind::AmmaMoving, &msg).to_vec();
        // Claim a byte_length far beyond the actual buffer, as a malicious
        // peer sending a truncated frame would.
        encoded[0..4].copy_from_slice(&1_000_000u32.to_le_bytes());
        let err = decode_single::<AmmaMoving>(&encoded, MessageKind::AmmaMoving).unwrap_err();
        assert_eq!(err, ProtocolError::TooShort);
    }
}
