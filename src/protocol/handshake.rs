use base64::engine::{Engine, general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

const KEY_HEADER: &[u8] = b"Sec-WebSocket-Key";
const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Reasons an upgrade request cannot be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// No `Sec-WebSocket-Key` header line in the request.
    MissingKey,
    /// The key header is present but not terminated by CRLF.
    Unterminated,
    /// The key value is empty or not valid UTF-8.
    InvalidKey,
}

impl std::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::MissingKey => "missing Sec-WebSocket-Key header",
            Self::Unterminated => "Sec-WebSocket-Key header is not terminated by CRLF",
            Self::InvalidKey => "Sec-WebSocket-Key value is empty or not UTF-8",
        })
    }
}

impl std::error::Error for HandshakeError {}

/// Finds the `Sec-WebSocket-Key` value in a raw upgrade request.
pub fn extract_key(request: &[u8]) -> Result<&str, HandshakeError> {
    let mut rest = request;
    while !rest.is_empty() {
        let Some(end) = rest.windows(2).position(|w| w == b"\r\n") else {
            // last line has no terminator
            return Err(if key_value(rest).is_some() {
                HandshakeError::Unterminated
            } else {
                HandshakeError::MissingKey
            });
        };

        if let Some(value) = key_value(&rest[..end]) {
            return str::from_utf8(value)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or(HandshakeError::InvalidKey);
        }
        rest = &rest[end + 2..];
    }
    Err(HandshakeError::MissingKey)
}

// header names are case-insensitive
fn key_value(line: &[u8]) -> Option<&[u8]> {
    let colon = line.iter().position(|&b| b == b':')?;
    let (name, value) = line.split_at(colon);
    name.trim_ascii()
        .eq_ignore_ascii_case(KEY_HEADER)
        .then(|| value[1..].trim_ascii())
}

/// Length of the request head up to and including the blank line, if the
/// head is complete. Bytes past it belong to the WebSocket stream.
#[must_use]
pub fn request_len(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// `base64(sha1(key + GUID))`
#[must_use]
pub fn accept_key(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.as_bytes());
    sha.update(GUID.as_bytes());
    BASE64.encode(sha.finalize())
}

/// The 101 response for an upgrade request, or why there is none.
pub(crate) fn respond(request: &[u8]) -> Result<String, HandshakeError> {
    let key = extract_key(request)?;
    let accept = accept_key(key);
    tracing::trace!(key, accept = accept.as_str(), "derived accept key");

    Ok(format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn rfc_accept_vector() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn exact_response() {
        assert_eq!(
            respond(REQUEST).unwrap(),
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"
        );
    }

    #[test]
    fn header_name_is_case_insensitive() {
        let req = b"GET / HTTP/1.1\r\nsec-websocket-key:   abc==  \r\n\r\n";
        assert_eq!(extract_key(req), Ok("abc=="));
    }

    #[test]
    fn missing_key() {
        let req = b"GET / HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\n\r\n";
        assert_eq!(extract_key(req), Err(HandshakeError::MissingKey));
        assert_eq!(extract_key(b""), Err(HandshakeError::MissingKey));
    }

    #[test]
    fn unterminated_key() {
        let req = b"GET / HTTP/1.1\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==";
        assert_eq!(extract_key(req), Err(HandshakeError::Unterminated));
        assert_eq!(respond(req), Err(HandshakeError::Unterminated));
    }

    #[test]
    fn empty_or_binary_key() {
        let req = b"GET / HTTP/1.1\r\nSec-WebSocket-Key: \r\n\r\n";
        assert_eq!(extract_key(req), Err(HandshakeError::InvalidKey));
        let req = b"GET / HTTP/1.1\r\nSec-WebSocket-Key: \xff\xfe\r\n\r\n";
        assert_eq!(extract_key(req), Err(HandshakeError::InvalidKey));
    }

    #[test]
    fn request_head_length() {
        assert_eq!(request_len(REQUEST), Some(REQUEST.len()));

        let mut pipelined = REQUEST.to_vec();
        pipelined.extend_from_slice(&[0x81, 0x80, 1, 2, 3, 4]);
        assert_eq!(request_len(&pipelined), Some(REQUEST.len()));

        assert_eq!(request_len(b"GET / HTTP/1.1\r\nHost: x\r\n"), None);
    }

    #[test]
    fn frame_bytes_are_not_a_handshake() {
        let frame = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        assert!(extract_key(&frame).is_err());
    }
}
