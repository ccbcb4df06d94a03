//! C5: preload buffer (spec §3 `PreloadSlot`, §4.5).
//!
//! On entering playback of track *i*, the controller spawns a background
//! task here to start demuxing track *i+1* ahead of time, so the track
//! boundary doesn't stall on yt-dlp's startup latency. The buffer a
//! background task fills and the composite reader a controller later reads
//! from are two different consumers of the same underlying bytes; rather
//! than physically moving a live `AsyncRead` out of a running task mid-poll
//! (the classic "who owns this future" problem), both sides share an
//! `Arc<Shared>` guarded by a `parking_lot::Mutex` (spec §5's "preload
//! buffer / inner slot lock / append-only until drained"), and the
//! "composite reader" the controller gets back is a small forwarding task
//! — the same duplex-pipe shape as [`crate::webm`] — that serves the
//! buffer snapshot first, then keeps forwarding whatever the background
//! task appends afterward.

use crate::{
    config::EngineConfig,
    constants::PRELOAD_READ_CHUNK_BYTES,
    error::{Error, Result},
    source::{FetchedAudio, SourceBackend},
    track::Track,
    webm::{self, DemuxOptions},
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    sync::{oneshot, Notify},
};

const COMPOSITE_DUPLEX_CAPACITY: usize = 256 * 1024;

struct Shared {
    buffer: Mutex<Vec<u8>>,
    error: Mutex<Option<String>>,
    done: AtomicBool,
    cancel: AtomicBool,
    data_ready: Notify,
}

impl Shared {
    fn new(initial_capacity_bytes: usize) -> Self {
        Self {
            buffer: Mutex::new(Vec::with_capacity(initial_capacity_bytes)),
            error: Mutex::new(None),
            done: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            data_ready: Notify::new(),
        }
    }
}

/// A in-flight (or completed) preload of the next track's audio.
///
/// At most one of these lives per guild (spec §3 invariant); the controller
/// owns it behind its own `preload lock` (spec §5).
pub struct PreloadSlot {
    track: Track,
    shared: Arc<Shared>,
    ready_rx: Mutex<Option<oneshot::Receiver<()>>>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl PreloadSlot {
    /// Spawns the background fill task for `track`.
    #[must_use]
    pub fn spawn(track: Track, backend: Arc<dyn SourceBackend>, serial: u32, config: EngineConfig) -> Self {
        let shared = Arc::new(Shared::new(config.preload_initial_capacity_bytes));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let fill_track = track.clone();
        let fill_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            run_fill(fill_track, backend, serial, config, fill_shared, ready_tx, cancel_rx).await;
        });

        Self {
            track,
            shared,
            ready_rx: Mutex::new(Some(ready_rx)),
            cancel_tx: Some(cancel_tx),
        }
    }

    /// The track this slot is preloading audio for.
    #[must_use]
    pub fn track(&self) -> &Track {
        &self.track
    }

    /// Whether this slot was built for `url` (spec §3: "if present and its
    /// track URL differs from the next queued track, it is discarded").
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        self.track.url == url
    }

    /// Awaits readiness: `preload_ready_threshold_bytes` buffered, or EOF,
    /// or a read error, whichever comes first (spec §4.5). Returns `false`
    /// if the fill task was cancelled before ever becoming ready.
    pub async fn wait_ready(&self) -> bool {
        let rx = self.ready_rx.lock().take();
        match rx {
            Some(rx) => rx.await.is_ok(),
            // Already consumed by an earlier call; a slot only ever
            // becomes ready once, so treat a repeat wait as satisfied.
            None => true,
        }
    }

    /// Consumes this slot, handing back an `AsyncRead` that first serves
    /// everything buffered so far, then whatever the fill task appends
    /// afterward (spec §4.5 ownership transfer). Returns `None` if the
    /// fill task recorded a read error — the caller should abandon the
    /// preload and start a fresh stream instead (spec §4.5: "If ... validation
    /// fails, the preload is abandoned").
    #[must_use]
    pub fn take(self) -> Option<impl AsyncRead + Send + Unpin> {
        if self.shared.error.lock().is_some() {
            return None;
        }
        Some(composite_reader(self.shared))
    }
}

impl Drop for PreloadSlot {
    fn drop(&mut self) {
        self.shared.cancel.store(true, Ordering::Release);
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn run_fill(
    track: Track,
    backend: Arc<dyn SourceBackend>,
    serial: u32,
    config: EngineConfig,
    shared: Arc<Shared>,
    ready_tx: oneshot::Sender<()>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let mut ready_tx = Some(ready_tx);

    let fetched = tokio::select! {
        biased;
        _ = &mut cancel_rx => {
            finish(&shared, &mut ready_tx, None);
            return;
        },
        fetched = backend.fetch(&track) => fetched,
    };

    let mut reader: Box<dyn AsyncRead + Send + Unpin> = match fetched {
        Ok(FetchedAudio::WebM(raw)) => {
            let options = DemuxOptions {
                normalize: true,
                seek_target_ms: None,
            };
            Box::new(webm::spawn(raw, options, serial, config))
        },
        Ok(FetchedAudio::Ogg(raw)) => raw,
        Err(e) => {
            finish(&shared, &mut ready_tx, Some(e.to_string()));
            return;
        },
    };

    let mut chunk = vec![0u8; PRELOAD_READ_CHUNK_BYTES];
    loop {
        tokio::select! {
            biased;
            _ = &mut cancel_rx => break,
            result = reader.read(&mut chunk) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        let total = {
                            let mut buffer = shared.buffer.lock();
                            buffer.extend_from_slice(&chunk[..n]);
                            buffer.len()
                        };
                        shared.data_ready.notify_waiters();
                        if total >= config.preload_ready_threshold_bytes {
                            if let Some(tx) = ready_tx.take() {
                                let _ = tx.send(());
                            }
                        }
                    },
                    Err(e) => {
                        finish(&shared, &mut ready_tx, Some(Error::from(e).to_string()));
                        return;
                    },
                }
            },
        }
    }

    finish(&shared, &mut ready_tx, None);
}

fn finish(shared: &Shared, ready_tx: &mut Option<oneshot::Sender<()>>, error: Option<String>) {
    if let Some(message) = error {
        *shared.error.lock() = Some(message);
    }
    shared.done.store(true, Ordering::Release);
    shared.data_ready.notify_waiters();
    if let Some(tx) = ready_tx.take() {
        let _ = tx.send(());
    }
}

/// Builds the "captured buffer, then live pipe" reader described in spec
/// §4.5, backed by a forwarding task so the controller just sees a plain
/// `AsyncRead`.
fn composite_reader(shared: Arc<Shared>) -> impl AsyncRead + Send + Unpin {
    let (mut writer, reader) = tokio::io::duplex(COMPOSITE_DUPLEX_CAPACITY);

    tokio::spawn(async move {
        let mut sent = 0usize;
        loop {
            let notified = shared.data_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (chunk, done) = {
                let buffer = shared.buffer.lock();
                (buffer[sent.min(buffer.len())..].to_vec(), shared.done.load(Ordering::Acquire))
            };

            if !chunk.is_empty() {
                sent += chunk.len();
                if writer.write_all(&chunk).await.is_err() {
                    return;
                }
                continue;
            }

            if done {
                return;
            }

            notified.await;
        }
    });

    reader
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::SourceKind;
    use async_trait::async_trait;
    use std::io::Cursor;
    use tokio::io::AsyncReadExt;

    struct StubBackend {
        payload: Vec<u8>,
    }

    #[async_trait]
    impl SourceBackend for StubBackend {
        async fn fetch(&self, _track: &Track) -> Result<FetchedAudio> {
            Ok(FetchedAudio::Ogg(Box::new(Cursor::new(self.payload.clone()))))
        }

        async fn search(&self, _query: &str, _requester: &str) -> Result<Vec<Track>> {
            Ok(Vec::new())
        }

        async fn fetch_playlist(&self, _url: &str, _requester: &str) -> Result<Vec<Track>> {
            Ok(Vec::new())
        }
    }

    fn track() -> Track {
        Track::new("https://example.invalid/a", "A", "1:00", 60, "someone", SourceKind::Twitch)
    }

    #[tokio::test]
    async fn ready_then_take_yields_full_payload() {
        let payload = b"hello preload world".to_vec();
        let backend = Arc::new(StubBackend { payload: payload.clone() });
        let slot = PreloadSlot::spawn(track(), backend, 1, EngineConfig::default());

        assert!(slot.wait_ready().await);
        // Let the background task reach EOF so `take` sees the full buffer.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut reader = slot.take().unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, payload);
    }

    #[tokio::test]
    async fn matches_compares_track_url() {
        let backend = Arc::new(StubBackend { payload: vec![] });
        let slot = PreloadSlot::spawn(track(), backend, 1, EngineConfig::default());
        assert!(slot.matches("https://example.invalid/a"));
        assert!(!slot.matches("https://example.invalid/other"));
    }

    #[tokio::test]
    async fn cancel_stops_fill_task_without_panicking() {
        let backend = Arc::new(StubBackend { payload: vec![0u8; 1024] });
        let slot = PreloadSlot::spawn(track(), backend, 1, EngineConfig::default());
        drop(slot);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
