//! The downstream voice transport, as an external collaborator (spec §6,
//! §9 "Shared cyclic ownership" redesign note).
//!
//! Everything past this trait — RTP packetization, encryption, the UDP
//! socket, the Discord voice gateway handshake — is the teacher crate's own
//! `driver`/`ws` machinery, and is explicitly out of scope (spec §1). The
//! controller only ever needs to push a finished Opus packet and flip a
//! "speaking" bit; this is the entire surface it depends on.

use async_trait::async_trait;

/// A sink that accepts RTP-ready Opus packets and a speaking indicator.
///
/// Implementations are expected to wrap a bounded channel (spec §5,
/// §6): `send_packet` blocking when that channel is full is exactly the
/// mechanism the controller's frame loop uses for pacing (spec §4.6.2 step
/// 4 — "this push blocks... so pacing is taken from the transport's drain
/// rate").
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    /// Pushes one 20 ms Opus packet. Resolves once the transport has
    /// accepted it (its own channel had room), or returns
    /// [`crate::error::Error::TransportGone`] if the channel is closed.
    async fn send_packet(&self, packet: Vec<u8>) -> crate::error::Result<()>;

    /// Signals whether the transport should currently report this guild as
    /// speaking.
    async fn set_speaking(&self, speaking: bool);

    /// Reports whether the transport is still connected for this guild.
    /// The controller checks this before starting a track (spec §4.6 step
    /// 5) rather than discovering it mid-stream via a failed send.
    fn is_connected(&self) -> bool;
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_util {
    //! In-memory transport for exercising the controller without a real
    //! voice session (spec §13: "Test-only in-memory implementations of all
    //! three [external collaborators] are provided").

    use super::OutboundTransport;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    /// Records every packet pushed to it and the speaking-flag history.
    pub struct RecordingTransport {
        sender: mpsc::Sender<Vec<u8>>,
        speaking_history: Mutex<Vec<bool>>,
        connected: Mutex<bool>,
    }

    impl RecordingTransport {
        /// Builds a transport with the given outbound channel capacity,
        /// returning it alongside the receiving half a test can drain.
        #[must_use]
        pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
            let (sender, receiver) = mpsc::channel(capacity);
            (
                Self {
                    sender,
                    speaking_history: Mutex::new(Vec::new()),
                    connected: Mutex::new(true),
                },
                receiver,
            )
        }

        /// Marks the transport as disconnected; subsequent sends fail.
        pub fn disconnect(&self) {
            *self.connected.lock() = false;
        }

        /// Every value `set_speaking` was called with, in order.
        #[must_use]
        pub fn speaking_history(&self) -> Vec<bool> {
            self.speaking_history.lock().clone()
        }
    }

    #[async_trait]
    impl OutboundTransport for RecordingTransport {
        async fn send_packet(&self, packet: Vec<u8>) -> crate::error::Result<()> {
            self.sender
                .send(packet)
                .await
                .map_err(|_| crate::error::Error::TransportGone)
        }

        async fn set_speaking(&self, speaking: bool) {
            self.speaking_history.lock().push(speaking);
        }

        fn is_connected(&self) -> bool {
            *self.connected.lock()
        }
    }
}
