//! Periodic PNG snapshots of the newest output frame.
//!
//! The orchestrator side ([`PreviewFeed`]) publishes at most one frame per
//! interval into a `watch` channel; the worker side ([`PreviewWorker`])
//! writes whatever is newest.  Missed frames are fine.  The worker stops
//! once the feed is dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use reel_core::error::{EngineError, Result};
use reel_core::types::{BitDepth, Frame};

pub const DEFAULT_PREVIEW_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, Serialize)]
pub struct PreviewConfig {
    /// PNG file to overwrite with each snapshot.
    pub path: PathBuf,
    #[serde(with = "secs")]
    pub interval: Duration,
}

impl PreviewConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            interval: DEFAULT_PREVIEW_INTERVAL,
        }
    }
}

mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

/// Build a connected feed/worker pair.
pub fn channel(config: PreviewConfig) -> (PreviewFeed, PreviewWorker) {
    let (tx, rx) = watch::channel(None);
    (
        PreviewFeed {
            tx,
            interval: config.interval,
            last: None,
        },
        PreviewWorker {
            rx,
            path: config.path,
        },
    )
}

pub struct PreviewFeed {
    tx: watch::Sender<Option<Arc<Frame>>>,
    interval: Duration,
    last: Option<Instant>,
}

impl PreviewFeed {
    /// Publish `frame` if the interval has elapsed since the last one.
    pub fn offer(&mut self, frame: &Frame) {
        if self.last.is_some_and(|t| t.elapsed() < self.interval) {
            return;
        }
        self.last = Some(Instant::now());
        self.tx.send_replace(Some(Arc::new(frame.clone())));
    }
}

pub struct PreviewWorker {
    rx: watch::Receiver<Option<Arc<Frame>>>,
    path: PathBuf,
}

impl PreviewWorker {
    /// Save snapshots until the feed goes away.  Returns how many were
    /// written.  Write failures are logged and skipped.
    pub async fn run(mut self) -> Result<u64> {
        let mut saved = 0u64;
        while self.rx.changed().await.is_ok() {
            let Some(frame) = self.rx.borrow_and_update().clone() else {
                continue;
            };
            let path = self.path.clone();
            match tokio::task::spawn_blocking(move || save_png(&path, &frame)).await {
                Ok(Ok(())) => saved += 1,
                Ok(Err(e)) => warn!(error = %e, "Preview snapshot failed"),
                Err(join_err) => warn!(%join_err, "Preview task panicked"),
            }
        }
        debug!(snapshots = saved, path = %self.path.display(), "Preview stopped");
        Ok(saved)
    }
}

/// Write `frame` as an 8-bit RGB PNG, replacing `path` atomically.
pub fn save_png(path: &Path, frame: &Frame) -> Result<()> {
    let rgb: Vec<u8> = match frame.depth() {
        BitDepth::Eight => frame.data().to_vec(),
        BitDepth::Sixteen => frame.samples().map(|s| (s >> 8) as u8).collect(),
    };
    let tmp = path.with_extension("tmp.png");
    image::save_buffer(
        &tmp,
        &rgb,
        frame.width(),
        frame.height(),
        image::ExtendedColorType::Rgb8,
    )
    .map_err(|e| EngineError::Pipeline(format!("preview {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_png_round_trips_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.png");
        let frame = Frame::from_samples(2, 1, BitDepth::Eight, [255, 0, 0, 0, 0, 255]).unwrap();
        save_png(&path, &frame).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (2, 1));
        assert_eq!(img.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(img.get_pixel(1, 0).0, [0, 0, 255]);
        assert!(!path.with_extension("tmp.png").exists());
    }

    #[test]
    fn sixteen_bit_frames_keep_the_high_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.png");
        let frame = Frame::from_samples(1, 1, BitDepth::Sixteen, [0xff00, 0x8000, 0x00ff]).unwrap();
        save_png(&path, &frame).unwrap();
        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(0, 0).0, [0xff, 0x80, 0x00]);
    }

    #[test]
    fn feed_throttles_to_interval() {
        let (mut feed, worker) = channel(PreviewConfig {
            path: "unused.png".into(),
            interval: Duration::from_secs(3600),
        });
        let first = Frame::filled(1, 1, BitDepth::Eight, 1);
        let second = Frame::filled(1, 1, BitDepth::Eight, 2);
        feed.offer(&first);
        feed.offer(&second);
        let latest = worker.rx.borrow().clone().unwrap();
        assert_eq!(*latest, first);
    }

    #[tokio::test]
    async fn worker_saves_then_stops_when_feed_drops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.png");
        let (mut feed, worker) = channel(PreviewConfig::new(&path));
        let handle = tokio::spawn(worker.run());

        feed.offer(&Frame::filled(3, 2, BitDepth::Eight, 9));
        drop(feed);

        let saved = handle.await.unwrap().unwrap();
        assert!(saved <= 1);
        if saved == 1 {
            assert!(path.exists());
        }
    }
}
