//! Server-sent events plumbing shared by the HTTP adapters.

use crate::llm::types::{ChunkStream, LLMError, StreamChunk};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;

/// What an adapter makes of one `data:` payload
#[derive(Debug, Clone, PartialEq)]
pub enum SseStep {
    Emit(StreamChunk),
    EmitAndFinish(StreamChunk),
    Finish,
    Skip,
}

/// Splits a byte stream into complete `data:` payloads.
///
/// Bytes are buffered until a newline so multi-byte characters split across
/// network reads are decoded intact.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning the payloads of every line completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(data) = Self::data_payload(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush a trailing line that arrived without a newline
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        Self::data_payload(&line)
    }

    fn data_payload(line: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches(['\r', '\n']);
        line.strip_prefix("data:")
            .map(|data| data.trim_start().to_string())
            .filter(|data| !data.is_empty())
    }
}

struct SseState<S, F> {
    bytes: Pin<Box<S>>,
    lines: SseLineBuffer,
    pending: VecDeque<Result<StreamChunk, LLMError>>,
    finished: bool,
    parse: F,
}

impl<S, F> SseState<S, F>
where
    F: FnMut(&str) -> SseStep,
{
    fn apply(&mut self, data: &str) {
        if self.finished {
            return;
        }
        match (self.parse)(data) {
            SseStep::Emit(chunk) => self.pending.push_back(Ok(chunk)),
            SseStep::EmitAndFinish(chunk) => {
                self.pending.push_back(Ok(chunk));
                self.finished = true;
            }
            SseStep::Finish => self.finished = true,
            SseStep::Skip => {}
        }
    }
}

/// Turn an HTTP body stream into a chunk stream using `parse` per payload.
///
/// Transport errors end the stream after yielding the error.
pub fn chunk_stream<S, B, F>(bytes: S, parse: F) -> ChunkStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    F: FnMut(&str) -> SseStep + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        lines: SseLineBuffer::new(),
        pending: VecDeque::new(),
        finished: false,
        parse,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    for data in state.lines.push(bytes.as_ref()) {
                        state.apply(&data);
                    }
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(LLMError::from(e)));
                    state.finished = true;
                }
                None => {
                    if let Some(data) = state.lines.finish() {
                        state.apply(&data);
                    }
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}
