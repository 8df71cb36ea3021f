//! Line framing for server-sent event response bodies.

use crate::error::{ChatPyeError, Result};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

/// Split a byte body into complete lines.
///
/// Bytes are buffered until a newline arrives, so multibyte characters split
/// across network chunks decode intact.
pub(crate) fn lines<S, B, E>(body: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ChatPyeError> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => buffer.extend_from_slice(bytes.as_ref()),
                Err(e) => {
                    yield Err(e.into());
                    return;
                }
            }

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                match decode(line) {
                    Ok(line) => yield Ok(line),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        if !buffer.is_empty() {
            yield decode(buffer);
        }
    };

    stream.boxed()
}

fn decode(line: Vec<u8>) -> Result<String> {
    String::from_utf8(line)
        .map_err(|e| ChatPyeError::Llm(format!("Stream is not valid UTF-8: {}", e)))
}
