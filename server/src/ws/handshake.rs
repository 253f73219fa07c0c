//! RFC 6455 handshake: server side (used by the core) and client side (kept
//! for engine symmetry, not exercised by the game server itself).

use crate::error::WsError;
use base64::Engine as _;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

const MAGIC_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const PEEK_CAPACITY: usize = 1024;
const CLIENT_HANDSHAKE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

/// SHA-1(key ++ magic GUID), base64-encoded with the standard alphabet and
/// `=` padding. Deterministic per RFC 6455 and independently checkable
/// against the test vector in the RFC.
pub fn compute_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(MAGIC_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Finds a header value by case-sensitive name in a raw HTTP request/response
/// buffer. Returns an error if the name appears more than once.
fn find_header<'a>(buf: &'a [u8], name: &str) -> Result<Option<&'a str>, ()> {
    let text = std::str::from_utf8(buf).map_err(|_| ())?;
    let mut found = None;
    for line in text.split("\r\n").skip(1) {
        if line.is_empty() {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key == name {
            if found.is_some() {
                return Err(());
            }
            found = Some(value.trim());
        }
    }
    Ok(found)
}

/// Reads the request/response headers, consuming exactly the bytes that
/// belong to them from `reader` (mirroring `cws_server_handshake`'s
/// retry-on-short-peek loop). `fill_buf` only triggers a fresh read once its
/// internal buffer is fully consumed, so each chunk must be consumed before
/// looping back, or a header split across TCP segments would spin forever on
/// the same stale bytes.
async fn peek_headers<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Result<Vec<u8>, WsError> {
    let mut peeked = Vec::with_capacity(PEEK_CAPACITY);
    loop {
        let chunk = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Err(WsError::ConnectionClosed);
            }
            available.to_vec()
        };

        // The terminator may straddle the old/new boundary, so rescan the
        // last 3 already-peeked bytes together with the new chunk.
        let rescan_from = peeked.len().saturating_sub(3);
        let mut window = peeked[rescan_from..].to_vec();
        window.extend_from_slice(&chunk);

        if let Some(pos) = window.windows(4).position(|w| w == b"\r\n\r\n") {
            let marker_end_in_chunk = rescan_from + pos + 4 - peeked.len();
            reader.consume(marker_end_in_chunk);
            peeked.extend_from_slice(&chunk[..marker_end_in_chunk]);
            break;
        }

        reader.consume(chunk.len());
        peeked.extend_from_slice(&chunk);

        if peeked.len() >= PEEK_CAPACITY {
            break;
        }
    }
    Ok(peeked)
}

/// Performs the server side of the handshake: peeks the request (via
/// `BufReader::fill_buf`, the async equivalent of `MSG_PEEK`), extracts
/// `Sec-WebSocket-Key`, consumes exactly the request bytes from `reader`, and
/// replies on `writer` with the fixed 101 response.
pub async fn server_handshake<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    reader: &mut BufReader<R>,
    writer: &mut W,
) -> Result<(), WsError> {
    let peeked = peek_headers(reader).await?;

    let header_end = peeked
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + 4)
        .unwrap_or(peeked.len());
    let request = &peeked[..header_end];

    let key = match find_header(request, "Sec-WebSocket-Key") {
        Ok(Some(key)) => key.to_string(),
        Ok(None) => return Err(WsError::HandshakeNoKey),
        Err(()) => return Err(WsError::HandshakeDuplicateKey),
    };

    let accept = compute_accept(&key);
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    );
    writer.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Performs the client side of the handshake: sends a canned upgrade request
/// with a hardcoded key on `writer` and verifies the accept token read back
/// via `reader` matches exactly.
pub async fn client_handshake<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    reader: &mut BufReader<R>,
    writer: &mut W,
    host: &str,
    endpoint: &str,
) -> Result<(), WsError> {
    let request = format!(
        "GET {endpoint} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {CLIENT_HANDSHAKE_KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    );
    writer.write_all(request.as_bytes()).await?;

    let peeked = peek_headers(reader).await?;

    let header_end = peeked
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + 4)
        .unwrap_or(peeked.len());
    let response = &peeked[..header_end];

    let accept = match find_header(response, "Sec-WebSocket-Accept") {
        Ok(Some(accept)) => accept.to_string(),
        Ok(None) => return Err(WsError::HandshakeNoAccept),
        Err(()) => return Err(WsError::HandshakeDuplicateAccept),
    };

    if accept != compute_accept(CLIENT_HANDSHAKE_KEY) {
        return Err(WsError::HandshakeBadAccept);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader as TokioBufReader;

    #[test]
    fn accept_token_matches_rfc_example() {
        assert_eq!(
            compute_accept("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[tokio::test]
    async fn server_handshake_replies_with_matching_accept() {
        let (mut client, server) = tokio::io::duplex(1024);
        client
            .write_all(
                b"GET /ws HTTP/1.1\r\n\
                  Host: localhost\r\n\
                  Upgrade: websocket\r\n\
                  Connection: Upgrade\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                  Sec-WebSocket-Version: 13\r\n\
                  \r\n",
            )
            .await
            .unwrap();

        let (read_half, mut write_half) = tokio::io::split(server);
        let mut reader = TokioBufReader::new(read_half);
        server_handshake(&mut reader, &mut write_half).await.unwrap();

        let mut response = vec![0u8; 1024];
        let n = client.read(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response[..n]);
        assert!(response.contains("101 Switching Protocols"));
        assert!(response.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    #[tokio::test]
    async fn missing_key_is_rejected() {
        let (mut client, server) = tokio::io::duplex(1024);
        client
            .write_all(b"GET /ws HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let (read_half, mut write_half) = tokio::io::split(server);
        let mut reader = TokioBufReader::new(read_half);
        let err = server_handshake(&mut reader, &mut write_half).await.unwrap_err();
        assert!(matches!(err, WsError::HandshakeNoKey));
    }

    #[tokio::test]
    async fn duplicate_key_is_rejected() {
        let (mut client, server) = tokio::io::duplex(1024);
        client
            .write_all(
                b"GET /ws HTTP/1.1\r\n\
                  Sec-WebSocket-Key: aaaaaaaaaaaaaaaaaaaaaa==\r\n\
                  Sec-WebSocket-Key: bbbbbbbbbbbbbbbbbbbbbb==\r\n\
                  \r\n",
            )
            .await
            .unwrap();
        let (read_half, mut write_half) = tokio::io::split(server);
        let mut reader = TokioBufReader::new(read_half);
        let err = server_handshake(&mut reader, &mut write_half).await.unwrap_err();
        assert!(matches!(err, WsError::HandshakeDuplicateKey));
    }

    #[tokio::test]
    async fn handshake_split_across_multiple_writes_still_completes() {
        let (mut client, server) = tokio::io::duplex(1024);
        let request = b"GET /ws HTTP/1.1\r\n\
                         Host: localhost\r\n\
                         Upgrade: websocket\r\n\
                         Connection: Upgrade\r\n\
                         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                         Sec-WebSocket-Version: 13\r\n\
                         \r\n";

        let writer = tokio::spawn(async move {
            for chunk in request.chunks(7) {
                client.write_all(chunk).await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
            client
        });

        let (read_half, mut write_half) = tokio::io::split(server);
        let mut reader = TokioBufReader::new(read_half);
        server_handshake(&mut reader, &mut write_half).await.unwrap();

        let mut client = writer.await.unwrap();
        let mut response = vec![0u8; 1024];
        let n = client.read(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response[..n]);
        assert!(response.contains("101 Switching Protocols"));
        assert!(response.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }
}
