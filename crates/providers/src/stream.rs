//! Stream normalization.
//!
//! Each dialect runs its own [`StreamNormalizer`] over decoded SSE frames.
//! The [`StreamDriver`] owns the frame decoder and the termination rules:
//!
//! ```text
//!   bytes ──► SseDecoder ──► frames ──► normalizer ──► chunks ──► on_chunk
//!                                          │
//!                              Finished / error / EOF
//!                                          │
//!                      exactly one Done or Error chunk, then the result
//! ```
//!
//! Normalizers never emit `Done` or `Error` themselves.

use chorus_core::error::ProviderError;
use chorus_core::provider::{ChunkSink, CompletionResult, StreamChunk};
use chorus_core::WireDialect;
use futures::{Stream, StreamExt};

use crate::anthropic::MessagesStream;
use crate::local::LocalStream;
use crate::openai_compat::ChatStream;
use crate::sse::{SseDecoder, SseFrame};

/// Chunk callback as seen by normalizers.
pub type Emit<'a> = &'a mut dyn FnMut(StreamChunk);

/// Outcome of feeding one frame.
#[derive(Debug)]
pub enum Progress {
    Pending,
    Finished(CompletionResult),
}

/// A per-dialect incremental state machine.
pub trait StreamNormalizer: Send {
    /// Handle one frame. `Err` aborts the stream.
    fn on_frame(&mut self, frame: &SseFrame, emit: Emit<'_>) -> Result<Progress, ProviderError>;

    /// The stream closed without a terminal event. Resolve with whatever was
    /// accumulated, or a degraded result.
    fn finish(&mut self, emit: Emit<'_>) -> CompletionResult;
}

/// The normalizer for `dialect`.
pub fn normalizer_for(dialect: WireDialect) -> Box<dyn StreamNormalizer> {
    match dialect {
        WireDialect::Messages => Box::new(MessagesStream::new()),
        WireDialect::ChatCompletions => Box::new(ChatStream::new()),
        WireDialect::StatelessLocal | WireDialect::StatefulLocal => {
            Box::new(LocalStream::new(dialect))
        }
    }
}

/// Feeds bytes through the decoder and normalizer, enforcing that exactly
/// one terminal chunk is emitted.
pub struct StreamDriver {
    decoder: SseDecoder,
    normalizer: Box<dyn StreamNormalizer>,
    terminated: bool,
}

impl StreamDriver {
    pub fn new(dialect: WireDialect) -> Self {
        Self {
            decoder: SseDecoder::new(),
            normalizer: normalizer_for(dialect),
            terminated: false,
        }
    }

    /// Feed raw bytes. `Ok(Some(_))` once the stream has resolved.
    pub fn feed(
        &mut self,
        bytes: &[u8],
        emit: Emit<'_>,
    ) -> Result<Option<CompletionResult>, ProviderError> {
        if self.terminated {
            return Ok(None);
        }
        for frame in self.decoder.push(bytes) {
            if let Some(result) = self.handle(&frame, emit)? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    /// End of stream: flush the decoder and resolve.
    pub fn finish(&mut self, emit: Emit<'_>) -> Result<CompletionResult, ProviderError> {
        if let Some(frame) = self.decoder.finish() {
            if let Some(result) = self.handle(&frame, emit)? {
                return Ok(result);
            }
        }
        self.terminated = true;
        let result = self.normalizer.finish(emit);
        emit(StreamChunk::Done);
        Ok(result)
    }

    /// A transport failure: emit the terminal error chunk.
    pub fn fail(&mut self, error: ProviderError, emit: Emit<'_>) -> ProviderError {
        if !self.terminated {
            self.terminated = true;
            emit(StreamChunk::Error {
                message: error.to_string(),
            });
        }
        error
    }

    fn handle(
        &mut self,
        frame: &SseFrame,
        emit: Emit<'_>,
    ) -> Result<Option<CompletionResult>, ProviderError> {
        match self.normalizer.on_frame(frame, emit) {
            Ok(Progress::Pending) => Ok(None),
            Ok(Progress::Finished(result)) => {
                self.terminated = true;
                emit(StreamChunk::Done);
                Ok(Some(result))
            }
            Err(e) => Err(self.fail(e, emit)),
        }
    }
}

/// Drive a live byte stream to completion.
pub async fn drive<S, B, E>(
    dialect: WireDialect,
    mut bytes: S,
    emit: ChunkSink<'_>,
) -> Result<CompletionResult, ProviderError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut driver = StreamDriver::new(dialect);

    while let Some(piece) = bytes.next().await {
        match piece {
            Ok(piece) => {
                if let Some(result) = driver.feed(piece.as_ref(), emit)? {
                    return Ok(result);
                }
            }
            Err(e) => {
                return Err(driver.fail(ProviderError::StreamInterrupted(e.to_string()), emit));
            }
        }
    }

    driver.finish(emit)
}

/// Replay a recorded SSE body through the same path as a live stream.
pub fn replay(
    dialect: WireDialect,
    raw: &str,
    emit: Emit<'_>,
) -> Result<CompletionResult, ProviderError> {
    let mut driver = StreamDriver::new(dialect);
    if let Some(result) = driver.feed(raw.as_bytes(), emit)? {
        return Ok(result);
    }
    driver.finish(emit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::provider::STREAM_ENDED;

    fn collect(dialect: WireDialect, raw: &str) -> (Result<CompletionResult, ProviderError>, Vec<StreamChunk>) {
        let mut chunks = Vec::new();
        let result = replay(dialect, raw, &mut |c| chunks.push(c));
        (result, chunks)
    }

    fn terminal_count(chunks: &[StreamChunk]) -> usize {
        chunks.iter().filter(|c| c.is_terminal()).count()
    }

    #[test]
    fn messages_stream_with_thinking_and_tool() {
        let raw = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":25,\"output_tokens\":1}}}\n\n",
            "event: content_block_start\n",
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"thinking\",\"thinking\":\"\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"Add \"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"them\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"signature_delta\",\"signature\":\"abc\"}}\n\n",
            "event: content_block_stop\n",
            "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: content_block_start\n",
            "data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"calc\",\"input\":{}}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"e\\\":\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"2+2\\\"}\"}}\n\n",
            "event: content_block_stop\n",
            "data: {\"type\":\"content_block_stop\",\"index\":1}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{\"output_tokens\":40}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        let (result, chunks) = collect(WireDialect::Messages, raw);
        let result = result.unwrap();

        assert_eq!(result.reasoning.as_deref(), Some("Add them"));
        assert!(result.text.is_none());
        let calls = result.tool_use.unwrap();
        assert_eq!(calls[0].input["e"], "2+2");
        assert_eq!(result.raw_content[0]["signature"], "abc");
        let stats = result.stats.unwrap();
        assert_eq!((stats.input_tokens, stats.output_tokens), (25, 40));

        assert!(chunks.contains(&StreamChunk::ToolStart {
            id: Some("toolu_1".into()),
            name: "calc".into()
        }));
        assert!(chunks.iter().any(|c| matches!(c, StreamChunk::ToolDone { id, .. } if id == "toolu_1")));
        assert_eq!(terminal_count(&chunks), 1);
        assert_eq!(chunks.last(), Some(&StreamChunk::Done));
    }

    #[test]
    fn chat_stream_accumulates_interleaved_tool_fragments() {
        let raw = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_a\",\"function\":{\"name\":\"search\",\"arguments\":\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"id\":\"call_b\",\"function\":{\"name\":\"calc\",\"arguments\":\"{\\\"e\\\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"q\\\":\\\"rust\\\"}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"function\":{\"arguments\":\":\\\"1\\\"}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":9,\"completion_tokens\":4}}\n\n",
            "data: [DONE]\n\n",
        );
        let (result, chunks) = collect(WireDialect::ChatCompletions, raw);
        let result = result.unwrap();
        let calls = result.tool_use.unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].input["q"], "rust");
        assert_eq!(calls[1].input["e"], "1");
        assert_eq!(result.stats.unwrap().output_tokens, 4);

        let starts = chunks
            .iter()
            .filter(|c| matches!(c, StreamChunk::ToolStart { .. }))
            .count();
        assert_eq!(starts, 2);
        assert_eq!(terminal_count(&chunks), 1);
    }

    #[test]
    fn chat_stream_without_done_still_resolves() {
        let raw = "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n";
        let (result, chunks) = collect(WireDialect::ChatCompletions, raw);
        assert_eq!(result.unwrap().text.as_deref(), Some("partial"));
        assert_eq!(chunks.last(), Some(&StreamChunk::Done));
    }

    #[test]
    fn empty_stream_degrades() {
        for dialect in [
            WireDialect::Messages,
            WireDialect::ChatCompletions,
            WireDialect::StatelessLocal,
            WireDialect::StatefulLocal,
        ] {
            let (result, chunks) = collect(dialect, "");
            assert_eq!(result.unwrap().text.as_deref(), Some(STREAM_ENDED));
            assert_eq!(chunks, vec![StreamChunk::Done]);
        }
    }

    #[test]
    fn stateful_stream_ignores_lifecycle_events() {
        let raw = concat!(
            "event: chat.start\ndata: {\"type\":\"chat.start\"}\n\n",
            "event: model_load.progress\ndata: {\"progress\":0.5}\n\n",
            "event: reasoning.delta\ndata: {\"content\":\"hmm\"}\n\n",
            "event: tool_call.start\ndata: {\"tool\":\"web_search\"}\n\n",
            "event: tool_call.success\ndata: {\"output\":\"ok\"}\n\n",
            "event: message.delta\ndata: {\"content\":\"Hi\"}\n\n",
            "event: chat.end\ndata: {\"result\":{\"response_id\":\"resp_2\",\"output\":[",
            "{\"type\":\"reasoning\",\"content\":\"hmm\"},{\"type\":\"message\",\"content\":\"Hi\"}],",
            "\"stats\":{\"input_tokens\":3,\"total_output_tokens\":2}}}\n\n",
        );
        let (result, chunks) = collect(WireDialect::StatefulLocal, raw);
        let result = result.unwrap();
        assert_eq!(result.text.as_deref(), Some("Hi"));
        assert_eq!(result.response_id.as_deref(), Some("resp_2"));
        assert_eq!(
            chunks,
            vec![
                StreamChunk::Reasoning { delta: "hmm".into() },
                StreamChunk::ToolStart { id: None, name: "web_search".into() },
                StreamChunk::Text { delta: "Hi".into() },
                StreamChunk::Stats { input_tokens: 3, output_tokens: 2 },
                StreamChunk::ResponseId { id: "resp_2".into() },
                StreamChunk::Done,
            ]
        );
    }

    #[test]
    fn in_band_error_emits_single_error_chunk() {
        let raw = "event: error\ndata: {\"error\":{\"message\":\"model crashed\"}}\n\n\
                   event: message.delta\ndata: {\"content\":\"late\"}\n\n";
        let (result, chunks) = collect(WireDialect::StatefulLocal, raw);
        assert!(matches!(result, Err(ProviderError::Backend(m)) if m == "model crashed"));
        assert_eq!(chunks.len(), 1);
        assert!(matches!(&chunks[0], StreamChunk::Error { message } if message.contains("model crashed")));
    }

    #[test]
    fn stateless_stream_uses_completed_payload() {
        let raw = concat!(
            "event: response.created\ndata: {\"type\":\"response.created\"}\n\n",
            "data: {\"type\":\"response.reasoning_text.delta\",\"delta\":\"think\"}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hel\"}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"lo\"}\n\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"output\":[",
            "{\"type\":\"reasoning\",\"content\":[{\"type\":\"reasoning_text\",\"text\":\"think\"}]},",
            "{\"type\":\"message\",\"content\":[{\"type\":\"output_text\",\"text\":\"Hello\"}]}],",
            "\"usage\":{\"input_tokens\":4,\"output_tokens\":2}}}\n\n",
        );
        let (result, chunks) = collect(WireDialect::StatelessLocal, raw);
        let result = result.unwrap();
        assert_eq!(result.text.as_deref(), Some("Hello"));
        assert_eq!(result.reasoning.as_deref(), Some("think"));
        assert_eq!(terminal_count(&chunks), 1);
    }

    #[tokio::test]
    async fn transport_error_emits_error_and_rejects() {
        let pieces: Vec<Result<&[u8], String>> = vec![
            Ok(&b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n"[..]),
            Err("connection reset".to_string()),
        ];
        let mut chunks = Vec::new();
        let result = drive(
            WireDialect::ChatCompletions,
            futures::stream::iter(pieces),
            &mut |c| chunks.push(c),
        )
        .await;
        assert!(matches!(result, Err(ProviderError::StreamInterrupted(_))));
        assert_eq!(chunks.len(), 2);
        assert!(matches!(chunks[1], StreamChunk::Error { .. }));
    }

    #[tokio::test]
    async fn byte_by_byte_delivery_matches_whole_body() {
        let raw = "data: {\"choices\":[{\"delta\":{\"content\":\"<think>X</think>Y\"},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n";
        let pieces: Vec<Result<Vec<u8>, String>> =
            raw.bytes().map(|b| Ok(vec![b])).collect();
        let mut chunks = Vec::new();
        let result = drive(
            WireDialect::ChatCompletions,
            futures::stream::iter(pieces),
            &mut |c| chunks.push(c),
        )
        .await
        .unwrap();
        assert_eq!(result.text.as_deref(), Some("Y"));
        assert_eq!(result.reasoning.as_deref(), Some("X"));
        assert!(chunks.contains(&StreamChunk::Reasoning { delta: "X".into() }));
    }
}
