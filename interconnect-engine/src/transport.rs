//! The transport seam.
//!
//! A transport is one side of a duplex stream of push frames with in-order
//! one-way delivery in each direction. Concrete bindings (sockets, RPC
//! stacks) live outside this workspace; the [`mem`] module provides the
//! in-process pair used by tests and demos.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use interconnect_proto::PushFrame;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("transport is faulted: {0}")]
    Faulted(String),

    #[error("send failed: {0}")]
    SendFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Open,
    Closed,
    Faulted,
}

/// One endpoint's view of the duplex frame stream.
///
/// `push` must preserve order; `try_recv` must yield inbound frames in
/// arrival order. Implementations buffer inbound frames internally (the
/// buffer is the thread-safe inbound queue the engine drains each pass) and
/// may invoke the registered waker from any thread when a frame arrives.
pub trait PushTransport: Send {
    fn push(&mut self, frame: &PushFrame) -> Result<(), TransportError>;

    fn try_recv(&mut self) -> Result<Option<PushFrame>, TransportError>;

    fn status(&self) -> TransportStatus;

    /// Register a callback invoked when inbound frames arrive or the stream
    /// state changes. Implementations without async delivery may ignore it.
    fn set_waker(&mut self, _waker: Arc<dyn Fn() + Send + Sync>) {}

    fn close(&mut self);
}

/// In-process loopback transport.
pub mod mem {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Shared {
        to_a: Mutex<Inbox>,
        to_b: Mutex<Inbox>,
        closed: AtomicBool,
    }

    #[derive(Default)]
    struct Inbox {
        frames: VecDeque<PushFrame>,
        waker: Option<Arc<dyn Fn() + Send + Sync>>,
    }

    /// One half of an in-process duplex pair.
    pub struct MemTransport {
        shared: Arc<Shared>,
        is_a: bool,
    }

    /// Create a connected pair of in-process transports. Frames pushed on
    /// one half arrive, in order, at the other.
    pub fn duplex() -> (MemTransport, MemTransport) {
        let shared = Arc::new(Shared::default());
        (
            MemTransport {
                shared: Arc::clone(&shared),
                is_a: true,
            },
            MemTransport {
                shared,
                is_a: false,
            },
        )
    }

    impl MemTransport {
        fn peer_inbox(&self) -> &Mutex<Inbox> {
            if self.is_a {
                &self.shared.to_b
            } else {
                &self.shared.to_a
            }
        }

        fn own_inbox(&self) -> &Mutex<Inbox> {
            if self.is_a {
                &self.shared.to_a
            } else {
                &self.shared.to_b
            }
        }
    }

    impl PushTransport for MemTransport {
        fn push(&mut self, frame: &PushFrame) -> Result<(), TransportError> {
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            let waker = {
                let mut inbox = self.peer_inbox().lock();
                inbox.frames.push_back(frame.clone());
                inbox.waker.clone()
            };
            if let Some(waker) = waker {
                waker();
            }
            Ok(())
        }

        fn try_recv(&mut self) -> Result<Option<PushFrame>, TransportError> {
            let frame = self.own_inbox().lock().frames.pop_front();
            match frame {
                Some(frame) => Ok(Some(frame)),
                // drain the stream fully before reporting the close
                None if self.shared.closed.load(Ordering::Acquire) => {
                    Err(TransportError::Closed)
                }
                None => Ok(None),
            }
        }

        fn status(&self) -> TransportStatus {
            if self.shared.closed.load(Ordering::Acquire) {
                TransportStatus::Closed
            } else {
                TransportStatus::Open
            }
        }

        fn set_waker(&mut self, waker: Arc<dyn Fn() + Send + Sync>) {
            self.own_inbox().lock().waker = Some(waker);
        }

        fn close(&mut self) {
            self.shared.closed.store(true, Ordering::Release);
            if let Some(waker) = self.peer_inbox().lock().waker.clone() {
                waker();
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn frames_cross_in_order() {
            let (mut a, mut b) = duplex();
            for seq in 1..=3 {
                a.push(&PushFrame {
                    seq,
                    ..Default::default()
                })
                .unwrap();
            }
            for seq in 1..=3 {
                assert_eq!(b.try_recv().unwrap().unwrap().seq, seq);
            }
            assert_eq!(b.try_recv().unwrap(), None);
        }

        #[test]
        fn close_is_seen_by_both_halves() {
            let (mut a, mut b) = duplex();
            a.push(&PushFrame::default()).unwrap();
            b.close();
            assert_eq!(a.status(), TransportStatus::Closed);
            assert_eq!(a.push(&PushFrame::default()), Err(TransportError::Closed));
            // the frame pushed before the close still drains
            assert!(b.try_recv().unwrap().is_some());
            assert_eq!(b.try_recv(), Err(TransportError::Closed));
        }
    }
}
