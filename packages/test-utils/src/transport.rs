//! In-memory duplex transport for exercising connection loops
//!
//! Provides a [`MockTransport`] that behaves like an upgraded socket from the
//! server's point of view (a `Stream` of inbound frames and a `Sink` for
//! outbound frames), and a [`MockPeer`] that plays the remote client.
//!
//! The transport is generic over the frame and error types so it can stand in
//! for any frame-oriented socket without this crate depending on the crate
//! under test.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use futures_util::{Sink, Stream};
use tokio::sync::mpsc;

/// Lets the peer hold back server writes, like a client that stopped reading
#[derive(Debug, Default)]
struct WriteGate {
    stalled: bool,
    waiter: Option<Waker>,
}

type SharedGate = Arc<Mutex<WriteGate>>;

fn lock(gate: &SharedGate) -> std::sync::MutexGuard<'_, WriteGate> {
    gate.lock().unwrap_or_else(|e| e.into_inner())
}

/// Server half of an in-memory duplex connection
pub struct MockTransport<F, E> {
    incoming: mpsc::UnboundedReceiver<Result<F, E>>,
    outgoing: Option<mpsc::UnboundedSender<F>>,
    gate: SharedGate,
    on_closed: fn() -> E,
}

/// Client half of an in-memory duplex connection
pub struct MockPeer<F, E> {
    to_server: Option<mpsc::UnboundedSender<Result<F, E>>>,
    from_server: mpsc::UnboundedReceiver<F>,
    gate: SharedGate,
}

/// Create a connected transport/peer pair
///
/// `on_closed` builds the error returned by the sink once the peer has gone
/// away or the transport has been closed.
///
/// # Example
///
/// ```rust
/// use murmur_test_utils::mock_transport;
///
/// #[derive(Debug)]
/// struct Gone;
///
/// let (_transport, peer) = mock_transport::<String, Gone>(|| Gone);
/// assert!(peer.send("hello".to_string()));
/// ```
pub fn mock_transport<F, E>(on_closed: fn() -> E) -> (MockTransport<F, E>, MockPeer<F, E>) {
    let (to_server, incoming) = mpsc::unbounded_channel();
    let (outgoing, from_server) = mpsc::unbounded_channel();
    let gate = SharedGate::default();

    (
        MockTransport {
            incoming,
            outgoing: Some(outgoing),
            gate: gate.clone(),
            on_closed,
        },
        MockPeer {
            to_server: Some(to_server),
            from_server,
            gate,
        },
    )
}

impl<F, E> Stream for MockTransport<F, E> {
    type Item = Result<F, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().incoming.poll_recv(cx)
    }
}

impl<F, E> Sink<F> for MockTransport<F, E> {
    type Error = E;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), E>> {
        let this = self.get_mut();
        match &this.outgoing {
            Some(tx) if !tx.is_closed() => {
                let mut gate = lock(&this.gate);
                if gate.stalled {
                    gate.waiter = Some(cx.waker().clone());
                    Poll::Pending
                } else {
                    Poll::Ready(Ok(()))
                }
            }
            _ => Poll::Ready(Err((this.on_closed)())),
        }
    }

    fn start_send(self: Pin<&mut Self>, item: F) -> Result<(), E> {
        let this = self.get_mut();
        match &this.outgoing {
            Some(tx) => tx.send(item).map_err(|_| (this.on_closed)()),
            None => Err((this.on_closed)()),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), E>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), E>> {
        self.get_mut().outgoing = None;
        Poll::Ready(Ok(()))
    }
}

impl<F, E> MockPeer<F, E> {
    /// Deliver a frame to the server; returns false once the server stopped reading
    pub fn send(&self, frame: F) -> bool {
        self.to_server
            .as_ref()
            .map(|tx| tx.send(Ok(frame)).is_ok())
            .unwrap_or(false)
    }

    /// Make the server's next read fail with `error`
    pub fn fail(&self, error: E) -> bool {
        self.to_server
            .as_ref()
            .map(|tx| tx.send(Err(error)).is_ok())
            .unwrap_or(false)
    }

    /// Stop taking server writes; the next write waits until [`MockPeer::resume_writes`]
    pub fn stall_writes(&self) {
        lock(&self.gate).stalled = true;
    }

    /// Let stalled server writes through again
    pub fn resume_writes(&self) {
        let waiter = {
            let mut gate = lock(&self.gate);
            gate.stalled = false;
            gate.waiter.take()
        };
        if let Some(waiter) = waiter {
            waiter.wake();
        }
    }

    /// Simulate the client going away: the server's stream ends
    pub fn disconnect(&mut self) {
        self.to_server = None;
    }

    /// Wait for the next frame written by the server
    ///
    /// Returns `None` once the server has closed or dropped its half.
    pub async fn recv(&mut self) -> Option<F> {
        self.from_server.recv().await
    }

    /// Wait up to `timeout` for the next frame written by the server
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<F> {
        tokio::time::timeout(timeout, self.from_server.recv())
            .await
            .ok()
            .flatten()
    }

    /// Take a frame the server has already written, without waiting
    pub fn try_recv(&mut self) -> Option<F> {
        self.from_server.try_recv().ok()
    }

    /// Drain frames until the server closes its half
    ///
    /// Returns the drained frames, or `None` if the server was still open
    /// after `timeout`.
    pub async fn closed_within(&mut self, timeout: Duration) -> Option<Vec<F>> {
        let mut drained = Vec::new();
        let wait = async {
            while let Some(frame) = self.from_server.recv().await {
                drained.push(frame);
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()?;
        Some(drained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};

    #[derive(Debug, PartialEq)]
    struct Gone;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (mut transport, mut peer) = mock_transport::<&'static str, Gone>(|| Gone);

        assert!(peer.send("from-client"));
        assert_eq!(transport.next().await, Some(Ok("from-client")));

        transport.send("from-server").await.unwrap();
        assert_eq!(peer.recv().await, Some("from-server"));
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream() {
        let (mut transport, mut peer) = mock_transport::<u8, Gone>(|| Gone);
        peer.disconnect();
        assert!(transport.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_is_observed_by_peer() {
        let (mut transport, mut peer) = mock_transport::<u8, Gone>(|| Gone);
        transport.send(1).await.unwrap();
        transport.close().await.unwrap();

        let drained = peer.closed_within(Duration::from_secs(1)).await.unwrap();
        assert_eq!(drained, vec![1]);
        assert_eq!(transport.send(2).await, Err(Gone));
    }

    #[tokio::test]
    async fn test_stalled_writes_wait_for_resume() {
        let (mut transport, mut peer) = mock_transport::<u8, Gone>(|| Gone);
        peer.stall_writes();

        let stalled = tokio::time::timeout(Duration::from_millis(50), transport.send(1)).await;
        assert!(stalled.is_err());
        assert_eq!(peer.try_recv(), None);

        peer.resume_writes();
        transport.send(2).await.unwrap();
        assert_eq!(peer.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_sink_errors_after_peer_dropped() {
        let (mut transport, peer) = mock_transport::<u8, Gone>(|| Gone);
        drop(peer);
        assert_eq!(transport.send(1).await, Err(Gone));
    }
}
