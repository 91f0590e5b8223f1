//! Frame codec for the LSP base protocol.
//!
//! Wire format: `Content-Length: N\r\n\r\n` followed by exactly N bytes of
//! UTF-8 JSON. N counts bytes after encoding, never characters.
//!
//! Length-prefixed framing has no resynchronization point: once a header or
//! body is misread, every following frame is misread too. Callers therefore
//! treat any decode error as fatal for the stream.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::bridge::protocol::Message;
use crate::error::{BridgeError, BridgeResult};

/// Upper bound on a declared body length (64 MiB).
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// Upper bound on a single header line.
const MAX_HEADER_LINE: usize = 8 * 1024;

/// Serialize a message and prepend its `Content-Length` header.
pub fn encode(message: &Message) -> BridgeResult<Vec<u8>> {
    let mut frame = Vec::new();
    encode_into(message, &mut frame)?;
    Ok(frame)
}

/// Append the encoded frame for `message` to `dst`.
///
/// On error `dst` is left untouched.
pub fn encode_into(message: &Message, dst: &mut Vec<u8>) -> BridgeResult<()> {
    let body = serde_json::to_vec(message).map_err(|e| BridgeError::encoding(e.to_string()))?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    log::trace!(
        target: "tsunagi::codec",
        "Encoding frame: {} body bytes",
        body.len()
    );

    dst.reserve(header.len() + body.len());
    dst.extend_from_slice(header.as_bytes());
    dst.extend_from_slice(&body);
    Ok(())
}

/// Read one frame from `reader` and deserialize its body.
///
/// # Errors
/// - `ConnectionClosed` if the stream ends cleanly before a new frame starts
/// - `Framing` if the header block is malformed or lacks `Content-Length`
/// - `TruncatedStream` if the stream ends inside the body
/// - `Decoding` if the body is not a JSON-RPC message
pub async fn decode<R>(reader: &mut R) -> BridgeResult<Message>
where
    R: AsyncBufRead + Unpin,
{
    let mut header = HeaderBlock::default();
    let mut line = Vec::new();

    let content_length = loop {
        line.clear();
        // One byte past the cap is enough to tell an overlong line apart
        let n = (&mut *reader)
            .take(MAX_HEADER_LINE as u64 + 1)
            .read_until(b'\n', &mut line)
            .await
            .map_err(classify_io_error)?;
        if line.len() > MAX_HEADER_LINE {
            return Err(header_line_too_long());
        }
        if n == 0 || !line.ends_with(b"\n") {
            header.push_partial(n);
            return Err(header.eof());
        }
        if let Some(len) = header.feed(&line)? {
            break len;
        }
    };

    let mut body = vec![0u8; content_length];
    let mut filled = 0;
    while filled < content_length {
        let n = reader
            .read(&mut body[filled..])
            .await
            .map_err(classify_io_error)?;
        if n == 0 {
            return Err(BridgeError::TruncatedStream {
                expected: content_length,
                received: filled,
            });
        }
        filled += n;
    }

    parse_body(&body)
}

/// Decode the first frame contained in `bytes`.
///
/// Trailing bytes after the first frame are ignored.
pub fn decode_slice(bytes: &[u8]) -> BridgeResult<Message> {
    let mut header = HeaderBlock::default();
    let mut pos = 0;

    let content_length = loop {
        let rest = &bytes[pos..];
        let Some(newline) = rest.iter().position(|b| *b == b'\n') else {
            header.push_partial(rest.len());
            return Err(header.eof());
        };
        let line = &rest[..=newline];
        pos += line.len();
        if let Some(len) = header.feed(line)? {
            break len;
        }
    };

    let body = &bytes[pos..];
    if body.len() < content_length {
        return Err(BridgeError::TruncatedStream {
            expected: content_length,
            received: body.len(),
        });
    }
    parse_body(&body[..content_length])
}

fn parse_body(body: &[u8]) -> BridgeResult<Message> {
    serde_json::from_slice(body).map_err(BridgeError::Decoding)
}

fn header_line_too_long() -> BridgeError {
    BridgeError::framing(format!("header line exceeds {} bytes", MAX_HEADER_LINE))
}

/// Map read/write failures that mean "peer is gone" to `ConnectionClosed`.
pub(crate) fn classify_io_error(e: io::Error) -> BridgeError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::WriteZero => BridgeError::ConnectionClosed,
        _ => BridgeError::Io(e),
    }
}

/// Incremental parser for the header block of one frame.
#[derive(Debug, Default)]
struct HeaderBlock {
    content_length: Option<usize>,
    /// Bytes of the header block consumed so far, excluding leading blank lines
    consumed: usize,
}

impl HeaderBlock {
    /// Feed one line including its `\n` terminator.
    ///
    /// Returns the declared body length once the blank terminator line is seen.
    fn feed(&mut self, line: &[u8]) -> BridgeResult<Option<usize>> {
        if line.len() > MAX_HEADER_LINE {
            return Err(header_line_too_long());
        }

        let text = std::str::from_utf8(line)
            .map_err(|_| BridgeError::framing("header line is not valid UTF-8"))?
            .trim_end_matches(['\r', '\n']);

        if text.is_empty() {
            if self.consumed == 0 {
                // Stray separator between frames
                return Ok(None);
            }
            return match self.content_length {
                Some(len) => Ok(Some(len)),
                None => Err(BridgeError::framing("missing Content-Length header")),
            };
        }

        self.consumed += line.len();

        let (name, value) = text
            .split_once(':')
            .ok_or_else(|| BridgeError::framing(format!("malformed header line: {:?}", text)))?;

        if name.trim().eq_ignore_ascii_case("content-length") {
            let len: usize = value.trim().parse().map_err(|_| {
                BridgeError::framing(format!("invalid Content-Length value: {:?}", value.trim()))
            })?;
            if len > MAX_CONTENT_LENGTH {
                return Err(BridgeError::framing(format!(
                    "Content-Length {} exceeds maximum {}",
                    len, MAX_CONTENT_LENGTH
                )));
            }
            match self.content_length {
                Some(previous) if previous != len => {
                    return Err(BridgeError::framing(format!(
                        "conflicting Content-Length headers: {} and {}",
                        previous, len
                    )));
                }
                _ => {}
            }
            self.content_length = Some(len);
        }
        // Other headers (Content-Type) carry nothing the bridge needs

        Ok(None)
    }

    /// Account for an unterminated trailing fragment before EOF.
    fn push_partial(&mut self, n: usize) {
        self.consumed += n;
    }

    /// Error for a stream that ended while this header block was being read.
    fn eof(&self) -> BridgeError {
        match (self.consumed, self.content_length) {
            (0, _) => BridgeError::ConnectionClosed,
            (_, Some(expected)) => BridgeError::TruncatedStream {
                expected,
                received: 0,
            },
            (_, None) => BridgeError::framing("stream ended inside frame header"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    #[test]
    fn encode_formats_with_content_length_header() {
        let message = Message::request(1, "initialize", json!({}));
        let bytes = encode(&message).unwrap();
        let output = String::from_utf8(bytes).unwrap();

        let (header, body) = output.split_once("\r\n\r\n").expect("separator present");
        let content_length: usize = header
            .strip_prefix("Content-Length: ")
            .unwrap()
            .parse()
            .unwrap();

        assert_eq!(body.len(), content_length);
        let parsed: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(parsed["method"], "initialize");
        assert_eq!(parsed["jsonrpc"], "2.0");
    }

    #[test]
    fn content_length_counts_bytes_not_chars() {
        let message = Message::request(2, "hover", json!({"text": "日本語 ü 🦀"}));
        let bytes = encode(&message).unwrap();
        let output = String::from_utf8(bytes).unwrap();
        let (header, body) = output.split_once("\r\n\r\n").unwrap();
        let declared: usize = header["Content-Length: ".len()..].parse().unwrap();

        assert_eq!(declared, body.len());
        assert!(declared > body.chars().count());
    }

    #[tokio::test]
    async fn decode_parses_single_frame() {
        let bytes = frame(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#);
        let mut reader = std::io::Cursor::new(bytes);

        let message = decode(&mut reader).await.unwrap();
        assert_eq!(message, Message::response(1, json!({})));
    }

    #[tokio::test]
    async fn decode_round_trips_encoded_messages() {
        let messages = vec![
            Message::request(1, "ping", json!({})),
            Message::request("abc", "textDocument/hover", json!({"position": {"line": 3}})),
            Message::notification("window/logMessage", json!({"message": "héllo ✓"})),
            Message::response(4, serde_json::Value::Null),
            Message::error_response(5, crate::bridge::protocol::ResponseError::internal("x")),
            Message::error_response(
                6,
                crate::bridge::protocol::ResponseError {
                    code: -1,
                    message: "x".to_string(),
                    data: Some(serde_json::Value::Null),
                },
            ),
        ];

        let mut stream = Vec::new();
        for message in &messages {
            encode_into(message, &mut stream).unwrap();
        }

        let mut reader = std::io::Cursor::new(stream);
        for expected in &messages {
            let decoded = decode(&mut reader).await.unwrap();
            assert_eq!(&decoded, expected);
        }
        assert!(matches!(
            decode(&mut reader).await,
            Err(BridgeError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn decode_accepts_extra_headers_in_any_case() {
        let body = r#"{"jsonrpc":"2.0","method":"exit"}"#;
        let raw = format!(
            "content-length: {}\r\nContent-Type: application/vscode-jsonrpc; charset=utf-8\r\n\r\n{}",
            body.len(),
            body
        );
        let mut reader = std::io::Cursor::new(raw.into_bytes());

        let message = decode(&mut reader).await.unwrap();
        assert_eq!(message.method.as_deref(), Some("exit"));
    }

    #[tokio::test]
    async fn decode_empty_stream_is_connection_closed() {
        let mut reader = std::io::Cursor::new(Vec::<u8>::new());
        assert!(matches!(
            decode(&mut reader).await,
            Err(BridgeError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn decode_fails_on_missing_content_length() {
        let mut reader = std::io::Cursor::new(b"Content-Type: text/plain\r\n\r\n{}".to_vec());
        let err = decode(&mut reader).await.unwrap_err();
        assert!(matches!(err, BridgeError::Framing { .. }), "got {:?}", err);
        assert!(err.to_string().contains("Content-Length"));
    }

    #[tokio::test]
    async fn decode_fails_on_invalid_header() {
        let mut reader = std::io::Cursor::new(b"Invalid header line\r\n\r\n{}".to_vec());
        let err = decode(&mut reader).await.unwrap_err();
        assert!(matches!(err, BridgeError::Framing { .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn decode_fails_on_non_numeric_length() {
        let mut reader = std::io::Cursor::new(b"Content-Length: ten\r\n\r\n{}".to_vec());
        let err = decode(&mut reader).await.unwrap_err();
        assert!(matches!(err, BridgeError::Framing { .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn decode_rejects_oversized_length() {
        let raw = format!("Content-Length: {}\r\n\r\n", MAX_CONTENT_LENGTH + 1);
        let mut reader = std::io::Cursor::new(raw.into_bytes());
        let err = decode(&mut reader).await.unwrap_err();
        assert!(matches!(err, BridgeError::Framing { .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn decode_stops_reading_at_header_line_cap() {
        let mut raw = vec![b'A'; 1024 * 1024];
        raw.push(b'\n');
        let mut reader = std::io::Cursor::new(raw);

        let err = decode(&mut reader).await.unwrap_err();
        assert!(matches!(err, BridgeError::Framing { .. }), "got {:?}", err);
        assert!(
            reader.position() <= MAX_HEADER_LINE as u64 + 1,
            "consumed {} bytes",
            reader.position()
        );
    }

    #[tokio::test]
    async fn decode_reports_truncated_body() {
        let mut reader = std::io::Cursor::new(b"Content-Length: 40\r\n\r\n{\"jsonrpc\"".to_vec());
        let err = decode(&mut reader).await.unwrap_err();
        match err {
            BridgeError::TruncatedStream { expected, received } => {
                assert_eq!(expected, 40);
                assert_eq!(received, 10);
            }
            other => panic!("expected TruncatedStream, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn decode_reports_header_cut_off_after_length() {
        let mut reader = std::io::Cursor::new(b"Content-Length: 12\r\n".to_vec());
        let err = decode(&mut reader).await.unwrap_err();
        assert!(
            matches!(err, BridgeError::TruncatedStream { expected: 12, received: 0 }),
            "got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn decode_reports_invalid_body_as_decoding_error() {
        let mut reader = std::io::Cursor::new(frame("{not json}"));
        let err = decode(&mut reader).await.unwrap_err();
        assert!(matches!(err, BridgeError::Decoding(_)), "got {:?}", err);
    }

    #[test]
    fn decode_slice_matches_async_decode() {
        let message = Message::request(7, "shutdown", json!(null));
        let mut bytes = encode(&message).unwrap();
        bytes.extend_from_slice(b"Content-Length: 2\r\n\r\n{}");

        assert_eq!(decode_slice(&bytes).unwrap(), message);
    }

    #[test]
    fn decode_slice_truncation_counts_available_bytes() {
        let err = decode_slice(b"Content-Length: 5\r\n\r\n{}").unwrap_err();
        assert!(
            matches!(err, BridgeError::TruncatedStream { expected: 5, received: 2 }),
            "got {:?}",
            err
        );
    }

    #[test]
    fn decode_slice_partial_header_without_length_is_framing_error() {
        let err = decode_slice(b"Content-Ty").unwrap_err();
        assert!(matches!(err, BridgeError::Framing { .. }), "got {:?}", err);
    }

    #[test]
    fn classify_io_error_maps_disconnects() {
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(classify_io_error(reset), BridgeError::ConnectionClosed));

        let other = io::Error::other("boom");
        assert!(matches!(classify_io_error(other), BridgeError::Io(_)));
    }
}
