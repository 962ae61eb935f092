//! Shared test utilities for the Murmur workspace
//!
//! This crate provides in-memory stand-ins for external collaborators so the
//! gateway's connection handling can be tested without opening sockets.
//!
//! # Mocks
//!
//! - [`MockTransport`] / [`MockPeer`] - duplex frame transport and its remote client,
//!   which can stall server writes to simulate a client that stopped reading
//!
//! # Example
//!
//! ```rust,ignore
//! use murmur_test_utils::mock_transport;
//!
//! #[tokio::test]
//! async fn test_with_transport() {
//!     let (transport, mut peer) = mock_transport::<Frame, TransportError>(TransportError::closed);
//!     hub.connect("u1", transport).await.unwrap();
//!     peer.send(Frame::Text(r#"{"type":"ping"}"#.into()));
//! }
//! ```

mod transport;

pub use transport::{mock_transport, MockPeer, MockTransport};
