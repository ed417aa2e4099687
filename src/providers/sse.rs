//! Server-sent-events decoding shared by the streaming adapters.
//!
//! Bytes are buffered until a full line is available so multi-byte UTF-8
//! sequences split across chunks decode correctly. Only `data:` lines are
//! handed to the vendor parser; comments, `event:` and `id:` lines are
//! skipped.
//!
//! The gap between two body chunks is bounded by an idle timeout. A vendor
//! that sends headers and then goes quiet ends the stream with
//! [`ProviderError::Timeout`].

use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::time::Sleep;

use super::{ProviderError, TextStream};
use crate::models::VendorKind;

pub(crate) type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Vendor-specific interpretation of SSE `data:` payloads.
pub(crate) trait EventParser: Send + Unpin + 'static {
    fn vendor(&self) -> VendorKind;

    /// Interpret one payload, returning a text fragment if it carries one.
    fn parse(&mut self, data: &str) -> Result<Option<String>, ProviderError>;

    /// The vendor's terminal event has been seen; nothing further is read.
    fn is_done(&self) -> bool;

    /// Whether a transport EOF right now counts as a normal end.
    fn ended_cleanly(&self) -> bool {
        self.is_done()
    }
}

pub(crate) struct SseTextStream<P> {
    inner: Option<ByteStream>,
    parser: P,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    max_line_bytes: usize,
    idle_timeout: Duration,
    /// Armed while waiting on the transport; dropped whenever a chunk arrives.
    idle: Option<Pin<Box<Sleep>>>,
    terminated: bool,
    /// Raised after fragments decoded before it have been yielded.
    error: Option<ProviderError>,
}

impl<P: EventParser> SseTextStream<P> {
    pub(crate) fn new(
        inner: ByteStream,
        parser: P,
        max_line_bytes: usize,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Some(inner),
            parser,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            max_line_bytes,
            idle_timeout,
            idle: None,
            terminated: false,
            error: None,
        }
    }

    pub(crate) fn boxed(
        response: reqwest::Response,
        parser: P,
        max_line_bytes: usize,
        idle_timeout: Duration,
    ) -> TextStream {
        Box::pin(Self::new(
            Box::pin(response.bytes_stream()),
            parser,
            max_line_bytes,
            idle_timeout,
        ))
    }

    /// Stop reading and release the connection.
    fn terminate(&mut self, error: Option<ProviderError>) {
        self.terminated = true;
        self.inner = None;
        self.idle = None;
        self.buffer.clear();
        self.error = error;
    }

    fn process_line(&mut self, line: &[u8]) -> Result<(), ProviderError> {
        let vendor = self.parser.vendor();
        let line = std::str::from_utf8(line)
            .map_err(|e| ProviderError::stream(vendor, format!("invalid UTF-8 in stream: {e}")))?;
        let line = line.strip_suffix('\r').unwrap_or(line);

        let Some(data) = line.strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.strip_prefix(' ').unwrap_or(data);
        if data.is_empty() {
            return Ok(());
        }

        if let Some(text) = self.parser.parse(data)?
            && !text.is_empty()
        {
            self.pending.push_back(text);
        }
        Ok(())
    }

    fn drain_lines(&mut self) -> Result<(), ProviderError> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.process_line(&line[..line.len() - 1])?;
            if self.parser.is_done() {
                return Ok(());
            }
        }

        if self.buffer.len() > self.max_line_bytes {
            return Err(ProviderError::stream(
                self.parser.vendor(),
                format!("SSE line exceeded {} bytes", self.max_line_bytes),
            ));
        }
        Ok(())
    }
}

impl<P: EventParser> Stream for SseTextStream<P> {
    type Item = Result<String, ProviderError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(text) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(text)));
            }
            if let Some(error) = this.error.take() {
                return Poll::Ready(Some(Err(error)));
            }
            if this.terminated {
                return Poll::Ready(None);
            }
            if this.parser.is_done() {
                this.terminate(None);
                return Poll::Ready(None);
            }

            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };

            match inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.idle = None;
                    this.buffer.extend_from_slice(&chunk);
                    if let Err(e) = this.drain_lines() {
                        this.terminate(Some(e));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    let vendor = this.parser.vendor();
                    this.terminate(Some(ProviderError::stream(
                        vendor,
                        format!("connection dropped: {e}"),
                    )));
                }
                Poll::Ready(None) => {
                    // Flush a final line that arrived without a newline
                    let tail = std::mem::take(&mut this.buffer);
                    let error = match this.process_line(&tail) {
                        Err(e) => Some(e),
                        Ok(()) if !this.parser.ended_cleanly() => Some(ProviderError::stream(
                            this.parser.vendor(),
                            "stream closed before completion",
                        )),
                        Ok(()) => None,
                    };
                    this.terminate(error);
                }
                Poll::Pending => {
                    let timeout = this.idle_timeout;
                    let idle = this
                        .idle
                        .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
                    if idle.as_mut().poll(cx).is_pending() {
                        return Poll::Pending;
                    }
                    let vendor = this.parser.vendor();
                    tracing::debug!(%vendor, ?timeout, "Stream idle timeout");
                    this.terminate(Some(ProviderError::Timeout { vendor, timeout }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;

    /// Emits each payload as text until it sees `END`.
    struct EchoParser {
        done: bool,
    }

    impl EventParser for EchoParser {
        fn vendor(&self) -> VendorKind {
            VendorKind::OpenAi
        }

        fn parse(&mut self, data: &str) -> Result<Option<String>, ProviderError> {
            if data == "END" {
                self.done = true;
                return Ok(None);
            }
            if data == "BOOM" {
                return Err(ProviderError::stream(VendorKind::OpenAi, "vendor error event"));
            }
            Ok(Some(data.to_string()))
        }

        fn is_done(&self) -> bool {
            self.done
        }
    }

    fn sse(chunks: &[&[u8]]) -> SseTextStream<EchoParser> {
        let chunks: Vec<reqwest::Result<Bytes>> = chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let inner: ByteStream = Box::pin(stream::iter(chunks));
        SseTextStream::new(inner, EchoParser { done: false }, 64, IDLE)
    }

    const IDLE: Duration = Duration::from_millis(500);

    /// Yields `chunks`, then never produces anything again.
    fn stalled_after(chunks: &[&[u8]]) -> SseTextStream<EchoParser> {
        let chunks: Vec<reqwest::Result<Bytes>> = chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let inner: ByteStream = Box::pin(stream::iter(chunks).chain(stream::pending()));
        SseTextStream::new(inner, EchoParser { done: false }, 64, IDLE)
    }

    async fn collect(stream: SseTextStream<EchoParser>) -> Vec<Result<String, String>> {
        stream
            .map(|item| item.map_err(|e| e.to_string()))
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let out = collect(sse(&[
            b"data: hel",
            b"lo\n\ndata: wor",
            b"ld\r\n: keep-alive\nevent: x\ndata: END\n",
        ]))
        .await;
        assert_eq!(out, vec![Ok("hello".to_string()), Ok("world".to_string())]);
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        // "é" is 0xC3 0xA9
        let out = collect(sse(&[b"data: caf\xC3", b"\xA9\ndata: END\n"])).await;
        assert_eq!(out, vec![Ok("café".to_string())]);
    }

    #[tokio::test]
    async fn test_data_after_terminal_event_is_ignored() {
        let out = collect(sse(&[b"data: a\ndata: END\ndata: b\n"])).await;
        assert_eq!(out, vec![Ok("a".to_string())]);
    }

    #[tokio::test]
    async fn test_eof_without_terminal_event_is_an_error() {
        let out = collect(sse(&[b"data: a\n", b"data: b"])).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], Ok("a".to_string()));
        assert_eq!(out[1], Ok("b".to_string()));
        assert!(out[2].as_ref().unwrap_err().contains("closed before completion"));
    }

    #[tokio::test]
    async fn test_parser_error_ends_stream() {
        let out = collect(sse(&[b"data: a\ndata: BOOM\ndata: c\n"])).await;
        assert_eq!(out.len(), 2);
        assert!(out[1].as_ref().unwrap_err().contains("vendor error event"));
    }

    #[tokio::test]
    async fn test_oversized_line_is_rejected() {
        let long = [b'x'; 100];
        let out = collect(sse(&[b"data: ", &long])).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].as_ref().unwrap_err().contains("exceeded 64 bytes"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_body_times_out() {
        let out = collect(stalled_after(&[])).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].as_ref().unwrap_err().contains("did not respond"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_after_output_keeps_fragments_then_times_out() {
        let mut stream = stalled_after(&[b"data: a\n", b": keep-alive\n", b"data: b\n"]);

        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        assert_eq!(stream.next().await.unwrap().unwrap(), "b");
        let started = tokio::time::Instant::now();
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { timeout, .. } if timeout == IDLE));
        assert!(started.elapsed() >= IDLE);
        assert!(stream.next().await.is_none());
    }
}
