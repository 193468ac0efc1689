//! StreamPipe (C10): re-frames an adapter's [`crate::adapters::ChunkStream`] into the OpenAI
//! `data: <json>\n\n` ... `data: [DONE]\n\n` wire format.
//!
//! Every chunk is flushed as soon as it's produced — chunks are never coalesced, matching the
//! "don't buffer partial tokens" requirement providers and client SDKs alike depend on.
//! Oversize chunks (more than 64 KiB once serialized) are rejected rather than silently
//! truncated, since a truncated chunk would desync the client's own JSON parser.

use futures::{Stream, StreamExt};

use crate::adapters::ChunkStream;
use crate::error::AdapterError;
use crate::models::StreamChunk;

pub const MAX_CHUNK_BYTES: usize = 64 * 1024;

/// One SSE frame of either a chunk or the terminal `[DONE]` marker.
pub enum Frame {
    Data(Vec<u8>),
    Done,
}

impl Frame {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Frame::Data(mut bytes) => {
                let mut framed = Vec::with_capacity(bytes.len() + 8);
                framed.extend_from_slice(b"data: ");
                framed.append(&mut bytes);
                framed.extend_from_slice(b"\n\n");
                framed
            }
            Frame::Done => b"data: [DONE]\n\n".to_vec(),
        }
    }
}

fn encode_chunk(chunk: &StreamChunk) -> Result<Frame, AdapterError> {
    let json = serde_json::to_vec(chunk).map_err(|e| AdapterError::Protocol {
        message: format!("failed to encode stream chunk: {e}"),
    })?;
    if json.len() > MAX_CHUNK_BYTES {
        return Err(AdapterError::Protocol {
            message: format!(
                "stream chunk of {} bytes exceeds the {} byte limit",
                json.len(),
                MAX_CHUNK_BYTES
            ),
        });
    }
    Ok(Frame::Data(json))
}

/// Adapt an adapter's raw chunk stream into a stream of ready-to-write SSE frames, appending
/// the terminal `[DONE]` marker once the upstream stream ends cleanly. Cancellation is the
/// caller's responsibility (drop the stream, or race it against a `CancellationToken` as the
/// adapters already do internally) — this layer performs no I/O of its own.
pub fn frame_stream(
    upstream: ChunkStream,
) -> impl Stream<Item = Result<Frame, AdapterError>> + Send {
    async_stream::stream! {
        let mut upstream = upstream;
        while let Some(item) = upstream.next().await {
            match item {
                Ok(chunk) => yield encode_chunk(&chunk),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        yield Ok(Frame::Done);
    }
}
