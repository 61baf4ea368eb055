//! SSE wire handling on both sides of the proxy: decoding upstream
//! frames into [`UpstreamChunk`] values and encoding downstream chunks
//! as `data:` frames.

use bytes::Bytes;
use serde::Serialize;
use zproxy_protocol::openai::error::ErrorFrame;
use zproxy_protocol::openai::stream::CreateChatCompletionStreamResponse;
use zproxy_protocol::sse::{SseEvent, SseParser};
use zproxy_protocol::upstream::UpstreamChunk;

/// Incremental decoder for the upstream event stream. Malformed frames
/// are dropped rather than aborting the stream.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    sse: SseParser,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<UpstreamChunk> {
        let events = self.sse.push_bytes(chunk);
        decode_events(events)
    }

    pub fn finish(&mut self) -> Vec<UpstreamChunk> {
        let events = self.sse.finish();
        decode_events(events)
    }
}

fn decode_events(events: Vec<SseEvent>) -> Vec<UpstreamChunk> {
    events.iter().filter_map(decode_event).collect()
}

fn decode_event(event: &SseEvent) -> Option<UpstreamChunk> {
    let data = event.data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match serde_json::from_str(data) {
        Ok(chunk) => Some(chunk),
        Err(err) => {
            tracing::debug!(event = "upstream_frame_skipped", error = %err);
            None
        }
    }
}

pub fn done_frame() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

pub fn encode_chunk(chunk: &CreateChatCompletionStreamResponse) -> Bytes {
    encode_json_frame(chunk)
}

pub fn encode_error_frame(frame: &ErrorFrame) -> Bytes {
    encode_json_frame(frame)
}

fn encode_json_frame<T: Serialize>(payload: &T) -> Bytes {
    match serde_json::to_string(payload) {
        Ok(json) => Bytes::from(format!("data: {json}\n\n")),
        // our own output types always serialize; an empty frame is
        // ignored by SSE readers
        Err(_) => Bytes::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_reassemble_across_chunk_boundaries() {
        let frame = "data: {\"type\":\"chat:completion\",\"data\":{\"phase\":\"answer\",\"delta_content\":\"hi\"}}\n\n";
        let mut decoder = StreamDecoder::new();
        let mut chunks = Vec::new();
        chunks.extend(decoder.push_bytes(&Bytes::from(frame[..20].to_string())));
        chunks.extend(decoder.push_bytes(&Bytes::from(frame[20..].to_string())));
        chunks.extend(decoder.finish());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_chat_completion());
    }

    #[test]
    fn malformed_and_terminator_frames_are_skipped() {
        let mut decoder = StreamDecoder::new();
        let input = Bytes::from_static(
            b"data: not json\n\ndata: [DONE]\n\ndata: {\"type\":\"chat:completion\"}\n\n",
        );
        let chunks = decoder.push_bytes(&input);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn encoded_chunks_are_data_framed() {
        let chunk: CreateChatCompletionStreamResponse = serde_json::from_str(
            r#"{"id":"c","object":"chat.completion.chunk","created":1,"model":"m","choices":[]}"#,
        )
        .unwrap();
        let frame = encode_chunk(&chunk);
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("data: {"));
        assert!(text.ends_with("\n\n"));
        assert!(text.contains("chat.completion.chunk"));
    }

    #[test]
    fn done_frame_is_the_literal_terminator() {
        assert_eq!(&done_frame()[..], b"data: [DONE]\n\n");
    }
}
