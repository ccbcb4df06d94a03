//! Lifetime management for source-helper subprocesses.
//!
//! Grounded on the teacher crate's `input::child::ChildContainer`: a
//! subprocess chain (e.g. `yt-dlp | ffmpeg`) is wrapped so that dropping the
//! last reader kills every process in the chain and waits briefly for them
//! to exit, rather than leaking a hung `yt-dlp` per skipped track. Unlike
//! the teacher (whose symphonia decode path reads children synchronously),
//! every read in this engine happens on an async frame-loop task that must
//! stay selectable against control signals (spec §5), so this wraps
//! `tokio::process::Child` and exposes its stdout directly as `AsyncRead`
//! rather than bouncing through a blocking `std::io::Read` adapter.

use std::{
    mem,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    io::{AsyncRead, ReadBuf},
    process::{Child, ChildStdout},
};
use tracing::debug;

/// How long teardown waits for a killed process to actually exit (spec §5:
/// "waits briefly (<= 100 ms) for the reader task to drain").
const TEARDOWN_GRACE: Duration = Duration::from_millis(100);

/// Owns one or more chained child processes and exposes the last one's
/// stdout as an [`AsyncRead`] implementation.
///
/// Build a chain with `vec![ytdlp_child, ffmpeg_child]`: the *last* entry in
/// the vec is the one actually read from; earlier entries exist only so
/// their lifetime (and cleanup) is tied to this container.
pub struct ProcessChain {
    children: Vec<Child>,
    stdout: ChildStdout,
}

impl ProcessChain {
    /// Builds a chain from children ordered first-spawned to last-spawned.
    ///
    /// # Panics
    /// Panics if `children` is empty, or if the last child was not spawned
    /// with a piped stdout.
    #[must_use]
    pub fn new(mut children: Vec<Child>) -> Self {
        let stdout = children
            .last_mut()
            .expect("process chain must have at least one child")
            .stdout
            .take()
            .expect("child spawned with a piped stdout");
        Self { children, stdout }
    }

    #[must_use]
    pub fn single(child: Child) -> Self {
        Self::new(vec![child])
    }
}

impl AsyncRead for ProcessChain {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl Drop for ProcessChain {
    fn drop(&mut self) {
        let children = mem::take(&mut self.children);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(kill_and_wait(children));
        }
        // Outside a runtime there is nothing we can await; the OS reaps the
        // orphaned process tree once this handle is gone.
    }
}

async fn kill_and_wait(mut children: Vec<Child>) {
    // Kill last-to-first: the last process in the chain is the one actually
    // producing output (e.g. ffmpeg reading from yt-dlp's stdout), so
    // killing it first stops consumption before the upstream writer sees a
    // broken pipe.
    for child in children.iter_mut().rev() {
        if let Err(e) = child.start_kill() {
            debug!("error killing source helper process: {:?}", e);
            continue;
        }
        if let Err(e) = tokio::time::timeout(TEARDOWN_GRACE, child.wait()).await {
            debug!(
                "source helper did not exit within teardown grace period: {:?}",
                e
            );
        }
    }
}
