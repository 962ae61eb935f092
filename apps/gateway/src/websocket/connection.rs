//! Per-session read and write tasks
//!
//! Every admitted session runs exactly two tasks. The read task owns the
//! inbound half of the transport, the write task owns the outbound half and
//! is the only writer. They share nothing but the session itself; when either
//! ends it closes the session (which stops the other) and asks the hub to
//! evict it.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use murmur_shared_config::WebSocketConfig;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};

use super::dispatch::Hub;
use super::inbound::InboundHandler;
use super::session::Session;
use super::transport::{Frame, TransportError};
use crate::error::{GatewayError, GatewayResult};

/// Deadline for a single frame write
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Connection-level settings derived from the hub configuration
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    /// Frames larger than this end the session
    pub max_message_size: usize,

    /// Rolling read deadline, refreshed by every received frame
    pub read_deadline: Duration,

    /// Per-session ping timer; `None` when pings are scheduled centrally
    pub ping_interval: Option<Duration>,

    /// Extra queued payloads folded into one write
    pub max_batch: usize,
}

impl LoopSettings {
    pub fn from_config(config: &WebSocketConfig) -> Self {
        Self {
            max_message_size: config.max_message_size,
            read_deadline: config.connection_timeout,
            ping_interval: (!config.enable_global_ping).then(|| config.session_ping_interval()),
            max_batch: config.message_buffer_size,
        }
    }
}

/// Decode inbound frames until the transport fails, goes quiet, or the
/// session is closed
pub async fn read_loop<R>(session: Arc<Session>, mut stream: R, hub: Hub, settings: LoopSettings)
where
    R: Stream<Item = Result<Frame, TransportError>> + Unpin,
{
    let handler = InboundHandler::new(session.clone(), hub.clone());

    let outcome: GatewayResult<()> = loop {
        let next = tokio::select! {
            _ = session.closed() => break Ok(()),
            next = timeout(settings.read_deadline, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => break Err(GatewayError::HeartbeatTimeout),
            Ok(None) => break Ok(()),
            Ok(Some(Err(e))) => break Err(e.into()),
            Ok(Some(Ok(frame))) => frame,
        };

        if frame.len() > settings.max_message_size {
            break Err(TransportError::new(format!(
                "frame of {} bytes exceeds limit of {}",
                frame.len(),
                settings.max_message_size
            ))
            .into());
        }

        session.touch();

        let flow = match frame {
            Frame::Text(text) => handler.handle_frame(text.as_bytes()).await,
            Frame::Binary(data) => handler.handle_frame(&data).await,
            // Control frames only refresh liveness.
            Frame::Ping(_) | Frame::Pong(_) => ControlFlow::Continue(()),
            Frame::Close => ControlFlow::Break(()),
        };
        if flow.is_break() {
            break Ok(());
        }
    };

    match outcome {
        Ok(()) => tracing::debug!(
            session_id = %session.id(),
            user_id = %session.user_id(),
            "Read loop finished"
        ),
        Err(e) => tracing::info!(
            session_id = %session.id(),
            user_id = %session.user_id(),
            error = %e,
            "Read loop terminated"
        ),
    }

    session.close();
    hub.unregister(session.id()).await;
}

/// Drain the outbound queue onto the transport
///
/// Ends when the queue is closed (eviction), the session is closed, or a
/// write fails. A close frame is sent on the way out.
pub async fn write_loop<S>(
    session: Arc<Session>,
    mut sink: S,
    mut outbound: mpsc::Receiver<Bytes>,
    hub: Hub,
    settings: LoopSettings,
) where
    S: Sink<Frame, Error = TransportError> + Unpin,
{
    let mut ping_timer = settings.ping_interval.map(|period| {
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    });

    let outcome: GatewayResult<()> = loop {
        let frame = tokio::select! {
            _ = session.closed() => break Ok(()),
            payload = outbound.recv() => match payload {
                Some(payload) => coalesce(payload, &mut outbound, settings.max_batch),
                None => break Ok(()),
            },
            _ = tick(&mut ping_timer) => Frame::Ping(Bytes::new()),
            _ = session.ping_requested() => Frame::Ping(Bytes::new()),
        };

        if let Err(e) = write_frame(&mut sink, frame).await {
            break Err(e.into());
        }
    };

    if let Err(e) = &outcome {
        tracing::info!(
            session_id = %session.id(),
            user_id = %session.user_id(),
            error = %e,
            "Write loop terminated"
        );
    }

    // Best effort: the peer may already be gone.
    if outcome.is_ok() {
        let _ = write_frame(&mut sink, Frame::Close).await;
    }
    let _ = timeout(WRITE_DEADLINE, sink.close()).await;

    session.close();
    hub.unregister(session.id()).await;
}

async fn write_frame<S>(sink: &mut S, frame: Frame) -> Result<(), TransportError>
where
    S: Sink<Frame, Error = TransportError> + Unpin,
{
    match timeout(WRITE_DEADLINE, sink.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::new("write deadline exceeded")),
    }
}

/// Fold already-queued payloads into one newline-delimited frame
fn coalesce(first: Bytes, outbound: &mut mpsc::Receiver<Bytes>, max_batch: usize) -> Frame {
    let mut buf = Vec::from(first.as_ref());

    for _ in 0..max_batch {
        match outbound.try_recv() {
            Ok(next) => {
                buf.push(b'\n');
                buf.extend_from_slice(&next);
            }
            Err(_) => break,
        }
    }

    match String::from_utf8(buf) {
        Ok(text) => Frame::Text(text),
        Err(e) => Frame::Binary(Bytes::from(e.into_bytes())),
    }
}

/// Wait for the next tick, or forever when there is no timer
async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
