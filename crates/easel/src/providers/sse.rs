use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::errors::LineTooLong;

/// Marker line that ends an OpenAI-style event stream
pub const DONE: &str = "[DONE]";

/// Largest unterminated line held while waiting for its newline
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Split a byte stream into the payloads of its `data:` lines.
///
/// Lines may be split across network frames, so incomplete trailing lines are
/// buffered until the next frame arrives. Anything that is not a `data:` line
/// (comments, `event:` fields, blank separators) is skipped. The `[DONE]`
/// marker is yielded like any other payload so callers can decide what it
/// means. A line that grows past [`MAX_LINE_BYTES`] ends the stream with an
/// error.
pub fn data_lines<S, E>(body: S) -> impl Stream<Item = Result<String, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: From<LineTooLong> + Send + 'static,
{
    bounded_data_lines(body, MAX_LINE_BYTES)
}

fn bounded_data_lines<S, E>(body: S, limit: usize) -> impl Stream<Item = Result<String, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: From<LineTooLong> + Send + 'static,
{
    async_stream::stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(frame) = body.next().await {
            match frame {
                Ok(bytes) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=newline).collect();
                        if let Some(data) = parse_line(&line) {
                            yield Ok(data);
                        }
                    }
                    if buffer.len() > limit {
                        yield Err(E::from(LineTooLong { limit }));
                        return;
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        if let Some(data) = parse_line(&buffer) {
            yield Ok(data);
        }
    }
}

fn parse_line(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
    let data = line.strip_prefix("data:")?;
    Some(data.strip_prefix(' ').unwrap_or(data).to_string())
}
