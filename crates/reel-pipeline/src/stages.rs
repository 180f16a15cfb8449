//! Decode and encode stage workers, and the handles the orchestrator uses
//! to talk to them.
//!
//! Each stage owns its codec and one end of a bounded queue.  `start`
//! blocks until the stage is finished and is meant to run under
//! `spawn_blocking`.
//!
//! Termination is structural:
//! - the source closes its queue on every exit path, so the orchestrator
//!   always sees end of stream;
//! - the sink drops its receiver on failure, so a blocked orchestrator
//!   `put` fails with `ChannelClosed` instead of hanging.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use reel_core::codec_traits::{FrameDecoder, FrameEncoder, FrameWriter};
use reel_core::error::{EngineError, Result};
use reel_core::queue::{self, QueueReceiver, QueueSender};
use reel_core::types::Frame;

use crate::pipeline::PipelineMetrics;
use crate::preview::PreviewFeed;

/// Why a stage stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageEnd {
    /// Input exhausted normally.
    EndOfStream,
    /// The next stage went away first.
    DownstreamClosed,
    /// The codec failed; the stream was ended early.
    Failed,
}

// ─── Source ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SourceStatus {
    done: AtomicBool,
    decoded: AtomicU64,
}

/// Decode stage: pulls frames from a [`FrameDecoder`] into queue A.
pub struct FrameSource<D> {
    decoder: D,
    tx: QueueSender<Frame>,
    status: Arc<SourceStatus>,
    metrics: Arc<PipelineMetrics>,
}

impl<D: FrameDecoder> FrameSource<D> {
    /// Build the stage and the reader the orchestrator consumes from.
    pub fn new(decoder: D, capacity: usize, metrics: Arc<PipelineMetrics>) -> (Self, SourceReader) {
        let (tx, rx) = queue::bounded(capacity);
        let status = Arc::new(SourceStatus::default());
        let reader = SourceReader {
            rx,
            status: status.clone(),
        };
        (
            Self {
                decoder,
                tx,
                status,
                metrics,
            },
            reader,
        )
    }

    /// Decode until end of input, a decoder error, or the reader going away.
    ///
    /// Errors are logged here and never propagated; whatever happens, the
    /// queue is closed exactly once and the decoder is finished.
    pub fn start(self) -> StageEnd {
        let Self {
            mut decoder,
            tx,
            status,
            metrics,
        } = self;
        let mut decoded = 0u64;

        let end = loop {
            let t = Instant::now();
            match decoder.decode_next() {
                Ok(Some(frame)) => {
                    metrics
                        .decode_total_us
                        .fetch_add(t.elapsed().as_micros() as u64, Ordering::Relaxed);
                    if tx.put(frame).is_err() {
                        debug!(frames = decoded, "Decode: downstream closed");
                        break StageEnd::DownstreamClosed;
                    }
                    decoded += 1;
                    status.decoded.store(decoded, Ordering::Release);
                    metrics.frames_decoded.fetch_add(1, Ordering::Relaxed);
                }
                Ok(None) => {
                    info!(frames = decoded, "Decode: EOS");
                    break StageEnd::EndOfStream;
                }
                Err(e) => {
                    error!(error = %e, code = e.error_code(), frames = decoded, "Decode failed, ending stream");
                    break StageEnd::Failed;
                }
            }
        };

        tx.close();
        if let Err(e) = decoder.finish() {
            warn!(error = %e, "Decoder shutdown reported an error");
        }
        status.done.store(true, Ordering::Release);
        end
    }
}

/// Orchestrator-side handle on the decode stage.
pub struct SourceReader {
    rx: QueueReceiver<Frame>,
    status: Arc<SourceStatus>,
}

impl SourceReader {
    /// Next frame, blocking while none is ready.  `None` is end of stream.
    pub fn read(&mut self) -> Option<Frame> {
        self.rx.get()
    }

    /// Whether the decode stage has stopped producing.
    pub fn is_done(&self) -> bool {
        self.status.done.load(Ordering::Acquire)
    }

    pub fn decoded_count(&self) -> u64 {
        self.status.decoded.load(Ordering::Acquire)
    }

    /// Frames waiting in queue A.
    pub fn queued(&self) -> usize {
        self.rx.len()
    }
}

// ─── Sink ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SinkStatus {
    done: AtomicBool,
    encoded: AtomicU64,
    closes: AtomicU32,
}

/// Encode stage: drains queue B into a [`FrameEncoder`], then runs its
/// post-processing.
pub struct FrameSink<E> {
    encoder: E,
    rx: QueueReceiver<Frame>,
    status: Arc<SinkStatus>,
    metrics: Arc<PipelineMetrics>,
}

impl<E: FrameEncoder> FrameSink<E> {
    /// Build the stage and the writer the orchestrator produces into.
    pub fn new(encoder: E, capacity: usize, metrics: Arc<PipelineMetrics>) -> (Self, SinkWriter) {
        let (tx, rx) = queue::bounded(capacity);
        let status = Arc::new(SinkStatus::default());
        let writer = SinkWriter {
            tx: Some(tx),
            status: status.clone(),
            written: 0,
            preview: None,
        };
        (
            Self {
                encoder,
                rx,
                status,
                metrics,
            },
            writer,
        )
    }

    /// Encode until the writer closes or the encoder fails.
    ///
    /// Frames of the wrong geometry are skipped.  Any other encode error
    /// ends the stage and drops the queue so the producer unblocks.
    /// Post-processing only runs after a clean finish; its failure is a
    /// warning.
    pub fn start(self) -> StageEnd {
        let Self {
            mut encoder,
            mut rx,
            status,
            metrics,
        } = self;
        let mut encoded = 0u64;

        let mut end = loop {
            let Some(frame) = rx.get() else {
                info!(frames = encoded, "Encode: EOS, flushing");
                break StageEnd::EndOfStream;
            };
            let t = Instant::now();
            match encoder.encode(frame) {
                Ok(()) => {
                    metrics
                        .encode_total_us
                        .fetch_add(t.elapsed().as_micros() as u64, Ordering::Relaxed);
                    encoded += 1;
                    status.encoded.store(encoded, Ordering::Release);
                    metrics.frames_encoded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e @ EngineError::DimensionMismatch(_)) => {
                    warn!(error = %e, frame = encoded, "Skipping frame with wrong geometry");
                    metrics.frames_rejected.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    error!(error = %e, code = e.error_code(), frames = encoded, "Encode failed, stopping sink");
                    break StageEnd::Failed;
                }
            }
        };
        // Unblocks a producer stuck on a full queue.
        drop(rx);

        if let Err(e) = encoder.finish() {
            error!(error = %e, "Encoder did not finish cleanly");
            end = StageEnd::Failed;
        }
        if end == StageEnd::EndOfStream
            && let Err(e) = encoder.post_process()
        {
            warn!(error = %e, "Post-processing failed; output kept without it");
        }
        status.done.store(true, Ordering::Release);
        end
    }
}

/// Orchestrator-side handle on the encode stage.
///
/// Closing is idempotent: the first [`close`](Self::close) (or drop) ends
/// the stream, later calls do nothing.
pub struct SinkWriter {
    tx: Option<QueueSender<Frame>>,
    status: Arc<SinkStatus>,
    written: u64,
    preview: Option<PreviewFeed>,
}

impl SinkWriter {
    pub(crate) fn with_preview(mut self, feed: PreviewFeed) -> Self {
        self.preview = Some(feed);
        self
    }

    /// Enqueue one output frame, blocking while queue B is full.
    pub fn write(&mut self, frame: Frame) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(EngineError::ChannelClosed)?;
        if let Some(preview) = self.preview.as_mut() {
            preview.offer(&frame);
        }
        tx.put(frame)?;
        self.written += 1;
        Ok(())
    }

    /// End the output stream.
    pub fn close(&mut self) {
        if let Some(tx) = self.tx.take() {
            tx.close();
            self.status.closes.fetch_add(1, Ordering::AcqRel);
            debug!(frames = self.written, "Sink input closed");
        }
        self.preview = None;
    }

    /// Frames accepted by [`write`](Self::write).
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// Whether the encode stage has finished.
    pub fn is_done(&self) -> bool {
        self.status.done.load(Ordering::Acquire)
    }

    pub fn encoded_count(&self) -> u64 {
        self.status.encoded.load(Ordering::Acquire)
    }

    /// Frames waiting in queue B.
    pub fn queued(&self) -> usize {
        self.tx.as_ref().map_or(0, QueueSender::len)
    }

    /// How many times the underlying stream has been closed.  Never above 1.
    pub fn close_count(&self) -> u32 {
        self.status.closes.load(Ordering::Acquire)
    }
}

impl FrameWriter for SinkWriter {
    fn write(&mut self, frame: Frame) -> Result<()> {
        SinkWriter::write(self, frame)
    }
}

impl Drop for SinkWriter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDecoder, MockEncoder, frame};
    use std::thread;

    #[test]
    fn source_delivers_all_frames_then_end_of_stream() {
        let metrics = PipelineMetrics::new();
        let (source, mut reader) = FrameSource::new(MockDecoder::counting(4), 2, metrics.clone());
        let worker = thread::spawn(move || source.start());

        let mut seen = Vec::new();
        while let Some(f) = reader.read() {
            seen.push(f.data()[0]);
        }
        assert_eq!(worker.join().unwrap(), StageEnd::EndOfStream);
        assert_eq!(seen, [0, 1, 2, 3]);
        assert!(reader.is_done());
        assert_eq!(reader.decoded_count(), 4);
        assert_eq!(metrics.snapshot().frames_decoded, 4);
    }

    #[test]
    fn decoder_error_ends_stream_gracefully() {
        let metrics = PipelineMetrics::new();
        let decoder = MockDecoder::counting(10).failing_at(3);
        let (source, mut reader) = FrameSource::new(decoder, 4, metrics);
        let worker = thread::spawn(move || source.start());

        let mut count = 0;
        while reader.read().is_some() {
            count += 1;
        }
        assert_eq!(worker.join().unwrap(), StageEnd::Failed);
        assert_eq!(count, 3);
    }

    #[test]
    fn source_stops_when_reader_is_dropped() {
        let metrics = PipelineMetrics::new();
        let decoder = MockDecoder::counting(200);
        let finished = decoder.finished_flag();
        let (source, reader) = FrameSource::new(decoder, 1, metrics);
        drop(reader);
        assert_eq!(source.start(), StageEnd::DownstreamClosed);
        assert!(finished.load(Ordering::Acquire));
    }

    #[test]
    fn sink_encodes_in_order_and_post_processes() {
        let metrics = PipelineMetrics::new();
        let encoder = MockEncoder::default();
        let probe = encoder.probe();
        let (sink, mut writer) = FrameSink::new(encoder, 2, metrics);
        let worker = thread::spawn(move || sink.start());

        for i in 0..5 {
            writer.write(frame(i)).unwrap();
        }
        writer.close();
        writer.close();

        assert_eq!(worker.join().unwrap(), StageEnd::EndOfStream);
        assert_eq!(probe.values(), [0, 1, 2, 3, 4]);
        assert!(probe.post_processed());
        assert_eq!(writer.close_count(), 1);
        assert_eq!(writer.encoded_count(), 5);
        assert!(writer.is_done());
    }

    #[test]
    fn write_after_close_is_rejected() {
        let (_sink, mut writer) = FrameSink::new(MockEncoder::default(), 1, PipelineMetrics::new());
        writer.close();
        assert!(matches!(writer.write(frame(0)), Err(EngineError::ChannelClosed)));
    }

    #[test]
    fn encoder_failure_unblocks_writer() {
        let metrics = PipelineMetrics::new();
        let encoder = MockEncoder::default().failing_at(2);
        let probe = encoder.probe();
        let (sink, mut writer) = FrameSink::new(encoder, 1, metrics);
        let worker = thread::spawn(move || sink.start());

        let mut result = Ok(());
        for i in 0..100 {
            result = writer.write(frame(i));
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(EngineError::ChannelClosed)));
        assert_eq!(worker.join().unwrap(), StageEnd::Failed);
        assert_eq!(probe.values(), [0, 1]);
        assert!(!probe.post_processed());
    }

    #[test]
    fn wrong_geometry_is_skipped() {
        let metrics = PipelineMetrics::new();
        let encoder = MockEncoder::default().expecting(4, 2);
        let probe = encoder.probe();
        let (sink, mut writer) = FrameSink::new(encoder, 4, metrics.clone());
        let worker = thread::spawn(move || sink.start());

        writer.write(frame(1)).unwrap();
        writer
            .write(Frame::filled(8, 4, reel_core::types::BitDepth::Eight, 2))
            .unwrap();
        writer.write(frame(3)).unwrap();
        drop(writer);

        assert_eq!(worker.join().unwrap(), StageEnd::EndOfStream);
        assert_eq!(probe.values(), [1, 3]);
        assert_eq!(metrics.snapshot().frames_rejected, 1);
    }
}
