//! Client opening handshake

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::uri::Uri;

/// Upper bound on the response head before the handshake is abandoned
pub const MAX_RESPONSE_HEAD: usize = 16 * 1024;

const HEAD_END: &[u8] = b"\r\n\r\n";
const SWITCHING: &[u8] = b"HTTP/1.1 101";

/// Fresh `Sec-WebSocket-Key`: base64 of 16 random bytes
pub fn generate_key() -> String {
    BASE64.encode(rand::random::<[u8; 16]>())
}

/// Upgrade request for `uri`
pub fn request(uri: &Uri, key: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: WebSocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
        uri.request_target(),
        uri.authority(),
        key
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Header terminator not seen yet
    Incomplete,
    /// Upgrade accepted; frames start at `consumed`
    Accepted { consumed: usize },
    /// Anything other than `HTTP/1.1 101`
    Rejected { status_line: String },
}

/// Inspect the bytes received so far
pub fn check_response(buf: &[u8]) -> HandshakeOutcome {
    let Some(end) = find(buf, HEAD_END) else {
        if buf.len() > MAX_RESPONSE_HEAD {
            return HandshakeOutcome::Rejected {
                status_line: status_line(buf),
            };
        }
        return HandshakeOutcome::Incomplete;
    };

    let head = &buf[..end];
    if find(head, SWITCHING).is_some() {
        HandshakeOutcome::Accepted {
            consumed: end + HEAD_END.len(),
        }
    } else {
        HandshakeOutcome::Rejected {
            status_line: status_line(head),
        }
    }
}

fn status_line(head: &[u8]) -> String {
    let line = head.split(|&b| b == b'\r' || b == b'\n').next().unwrap_or_default();
    String::from_utf8_lossy(line).into_owned()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
