//! HTTP route handlers for the Murmur gateway
//!
//! The only plain HTTP surface is health reporting; the WebSocket upgrade
//! route lives with the hub in [`crate::websocket::handler`].

pub mod health;

pub use health::{health_router, HealthState};
