//! Rallypoint links — TCP relays that carry a group's frames beyond the
//! local multicast domain.
//!
//! Each configured rallypoint gets one task that connects, relays frames in
//! both directions and measures the round trip with Ping frames. A dropped
//! connection is retried after the configured pause; every state change is
//! reported to the engine as a [`TransportEvent::Rallypoint`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use zerocopy::FromBytes;

use talkgroup_core::group::RallypointAddress;
use talkgroup_core::wire::{
    validate_header, Frame, FrameHeader, FrameKind, GroupHash, WireError, FRAME_HEADER_LEN,
};
use talkgroup_engine::{RallypointStatus, TransportEvent, TransportSink};

#[derive(Debug, Clone, Copy)]
pub struct LinkTiming {
    pub reconnect: Duration,
    pub ping: Duration,
}

/// Handle to one rallypoint connection task. Dropping it ends the task.
pub struct RallypointLink {
    id: String,
    outbound: mpsc::UnboundedSender<Bytes>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

struct LinkContext {
    id: String,
    target: String,
    group_id: String,
    hash: GroupHash,
    timing: LinkTiming,
    sink: TransportSink,
}

impl LinkContext {
    fn status(&self, status: RallypointStatus) {
        let _ = self.sink.send(TransportEvent::Rallypoint {
            id: self.id.clone(),
            status,
        });
    }
}

impl RallypointLink {
    pub fn spawn(
        address: &RallypointAddress,
        group_id: &str,
        hash: GroupHash,
        timing: LinkTiming,
        sink: TransportSink,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let ctx = LinkContext {
            id: address.id(),
            target: format!("{}:{}", address.host, address.port),
            group_id: group_id.to_string(),
            hash,
            timing,
            sink,
        };
        let task = tokio::spawn(link_loop(ctx, outbound_rx, connected.clone()));
        Self {
            id: address.id(),
            outbound,
            connected,
            task,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue an encoded frame. Returns false while the link is down.
    pub fn send(&self, frame: Bytes) -> bool {
        self.connected.load(Ordering::Acquire) && self.outbound.send(frame).is_ok()
    }
}

impl Drop for RallypointLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn link_loop(
    ctx: LinkContext,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    connected: Arc<AtomicBool>,
) {
    loop {
        ctx.status(RallypointStatus::Connecting);
        match TcpStream::connect(&ctx.target).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(rallypoint = %ctx.id, error = %e, "TCP_NODELAY failed");
                }
                // Frames queued while the link was down are stale.
                while outbound.try_recv().is_ok() {}
                connected.store(true, Ordering::Release);
                ctx.status(RallypointStatus::Connected);
                tracing::info!(rallypoint = %ctx.id, group = %ctx.group_id, "rallypoint connected");

                if let Err(e) = run_connection(stream, &mut outbound, &ctx).await {
                    tracing::warn!(rallypoint = %ctx.id, error = %e, "rallypoint connection ended");
                }
                connected.store(false, Ordering::Release);
                ctx.status(RallypointStatus::Disconnected);
            }
            Err(e) => {
                tracing::debug!(rallypoint = %ctx.id, error = %e, "rallypoint connect failed");
            }
        }
        ctx.status(RallypointStatus::PausingConnectionAttempt);
        tokio::time::sleep(ctx.timing.reconnect).await;
    }
}

async fn run_connection(
    stream: TcpStream,
    outbound: &mut mpsc::UnboundedReceiver<Bytes>,
    ctx: &LinkContext,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();

    tokio::select! {
        r = read_loop(reader, ctx, reply_tx) => r,
        r = write_loop(writer, outbound, reply_rx, ctx) => r,
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    ctx: &LinkContext,
    replies: mpsc::UnboundedSender<Bytes>,
) -> Result<()> {
    loop {
        let frame = read_frame(&mut reader).await?;
        match frame.kind {
            FrameKind::Ping => {
                let pong = keepalive_frame(FrameKind::Pong, ctx.hash, &frame.payload)?;
                let _ = replies.send(pong);
            }
            FrameKind::Pong => {
                if let Some(rt_ms) = roundtrip_ms(&frame.payload, unix_millis()) {
                    ctx.status(RallypointStatus::Roundtrip { rt_ms });
                }
            }
            _ if frame.group_hash == ctx.hash => {
                let event = TransportEvent::Frame {
                    group_id: ctx.group_id.clone(),
                    frame,
                };
                if ctx.sink.send(event).is_err() {
                    return Ok(());
                }
            }
            _ => tracing::trace!(rallypoint = %ctx.id, "relayed frame for another group"),
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    outbound: &mut mpsc::UnboundedReceiver<Bytes>,
    mut replies: mpsc::UnboundedReceiver<Bytes>,
    ctx: &LinkContext,
) -> Result<()> {
    let mut ping = tokio::time::interval(ctx.timing.ping);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let bytes = tokio::select! {
            Some(bytes) = outbound.recv() => bytes,
            Some(bytes) = replies.recv() => bytes,
            _ = ping.tick() => {
                keepalive_frame(FrameKind::Ping, ctx.hash, &unix_millis().to_be_bytes())?
            }
        };
        writer.write_all(&bytes).await.context("rallypoint write")?;
    }
}

/// Read one header-delimited frame from a stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame> {
    let mut buf = vec![0u8; FRAME_HEADER_LEN];
    reader
        .read_exact(&mut buf)
        .await
        .context("reading frame header")?;
    let header = FrameHeader::read_from(&buf[..]).ok_or(WireError::Truncated)?;
    let (_, length) = validate_header(&header)?;

    buf.resize(FRAME_HEADER_LEN + length, 0);
    reader
        .read_exact(&mut buf[FRAME_HEADER_LEN..])
        .await
        .context("reading frame payload")?;
    Ok(Frame::decode(&buf)?)
}

/// Ping and Pong frames carry the ping's send time and no sender.
fn keepalive_frame(kind: FrameKind, hash: GroupHash, stamp: &[u8]) -> Result<Bytes, WireError> {
    Frame::new(kind, hash, [0u8; 8], stamp.to_vec())
        .encode()
        .map(Bytes::from)
}

/// Round trip of a Pong echoing an 8-byte millisecond stamp.
fn roundtrip_ms(payload: &[u8], now_ms: u64) -> Option<u32> {
    let sent = u64::from_be_bytes(payload.try_into().ok()?);
    Some(now_ms.saturating_sub(sent).min(u32::MAX as u64) as u32)
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
