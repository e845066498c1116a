use crate::error::DebuggerError;
use crate::transport::Transport;
use base64::prelude::BASE64_STANDARD;
use base64::prelude::*;
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use std::thread;
use std::time::{Duration, Instant};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const SEC_WEBSOCKET_KEY: &str = "Sec-WebSocket-Key";
const DEBUGGER_PATH: &str = "/jerry-debugger";

// Limit the maximum amount of data read to prevent a denial of service attack.
const MAX_REQUEST_SIZE: usize = 1024;

const HTTP_ACCEPT_RESPONSE: &str = "HTTP/1.1 101 Switching Protocols\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Accept: {}\r\n\
        \r\n";

/// Runs the server side of the HTTP upgrade on a freshly accepted client.
///
/// The request is accumulated with nonblocking reads until it parses as a
/// complete HTTP request, then validated: it must be a `GET` for the
/// debugger endpoint and carry a `Sec-WebSocket-Key` header. On success the
/// 101 response with the accept key is written back and the connection is
/// ready for frames.
pub(crate) fn perform_handshake(
    transport: &mut dyn Transport,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), DebuggerError> {
    let deadline = Instant::now() + timeout;
    let mut request_buf = BytesMut::with_capacity(MAX_REQUEST_SIZE);

    // One byte at a time, so nothing past the request terminator is pulled
    // off the socket; the first frame may already sit right behind it.
    let key = loop {
        let mut byte = [0u8; 1];
        let read = transport.receive(&mut byte)?;

        if read == 0 {
            if Instant::now() >= deadline {
                return Err(DebuggerError::HandshakeTimeout);
            }
            thread::sleep(poll_interval);
            continue;
        }

        if request_buf.len() >= MAX_REQUEST_SIZE {
            return Err(DebuggerError::HandshakeBufferOverflow);
        }
        request_buf.extend_from_slice(&byte);

        if request_buf.ends_with(b"\r\n\r\n") {
            match parse_upgrade_request(&request_buf)? {
                Some(key) => break key,
                None => return Err(DebuggerError::InvalidHandshakeRequest),
            }
        }
    };

    let response = HTTP_ACCEPT_RESPONSE.replace("{}", &generate_websocket_accept_value(&key));
    transport.send(response.as_bytes())
}

/// Returns the websocket key once the buffered request is complete, `None`
/// while more bytes are needed.
fn parse_upgrade_request(buf: &[u8]) -> Result<Option<String>, DebuggerError> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut request = httparse::Request::new(&mut headers);

    match request.parse(buf)? {
        httparse::Status::Partial => Ok(None),
        httparse::Status::Complete(_) => {
            let path_matches = request
                .path
                .map_or(false, |path| path.starts_with(DEBUGGER_PATH));
            if request.method != Some("GET") || !path_matches {
                return Err(DebuggerError::InvalidHandshakeRequest);
            }

            for header in request.headers.iter() {
                if header.name.eq_ignore_ascii_case(SEC_WEBSOCKET_KEY) {
                    let value = std::str::from_utf8(header.value)
                        .map_err(|_| DebuggerError::NoSecWebsocketKey)?;
                    return Ok(Some(value.trim().to_owned()));
                }
            }

            Err(DebuggerError::NoSecWebsocketKey)
        }
    }
}

pub(crate) fn generate_websocket_accept_value(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}
