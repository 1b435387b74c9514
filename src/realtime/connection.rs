//! Connection task: handshake, frame pump and fixed-delay reconnect.

use std::sync::Arc;
use std::time::Duration;

use frames::{Command, Frame, decode_frames, encode_frame, is_heartbeat};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tracing::{debug, error, info, trace, warn};

use super::transport::{Transport, TransportError};
use super::{ConnectionState, RealtimeError, Shared, Topic, subscribe_frame};

const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

// =============================================================================
// LOOP
// =============================================================================

pub(super) async fn run(shared: Arc<Shared>, epoch: u64) {
    let mut reconnects: u32 = 0;

    loop {
        let credential = shared.lock().credential.clone();
        let deadline = shared.config.handshake_timeout;
        let handshake = match tokio::time::timeout(deadline, handshake(&shared, credential)).await {
            Ok(result) => result,
            Err(_) => Err(RealtimeError::Handshake("timed out waiting for CONNECTED".to_owned())),
        };

        match handshake {
            Ok((transport, heartbeat)) => {
                let Some(outbound) = mark_connected(&shared, epoch) else {
                    return;
                };
                reconnects = 0;
                let exit = pump(&shared, transport, outbound, heartbeat).await;
                if matches!(exit, PumpExit::Closed) || !mark_connecting(&shared, epoch) {
                    return;
                }
                match exit {
                    PumpExit::Lost(err) => warn!(epoch, error = %err, "realtime connection lost"),
                    PumpExit::PeerClosed | PumpExit::Closed => {
                        warn!(epoch, "realtime connection closed by peer");
                    }
                }
            }
            Err(err) => warn!(epoch, error = %err, attempt = reconnects + 1, "realtime connect failed"),
        }

        if let Some(max) = shared.config.max_reconnect_attempts {
            if reconnects >= max {
                error!(epoch, max, "realtime reconnect attempts exhausted");
                mark_disconnected(&shared, epoch);
                return;
            }
        }
        reconnects += 1;
        tokio::time::sleep(shared.config.reconnect_delay).await;
        if !is_current(&shared, epoch) {
            return;
        }
        debug!(epoch, reconnects, "realtime reconnecting");
    }
}

async fn handshake(
    shared: &Shared,
    credential: Option<String>,
) -> Result<(Box<dyn Transport>, Option<Duration>), RealtimeError> {
    let mut transport = shared.connector.open().await?;

    let offer = u64::try_from(shared.config.heartbeat.as_millis()).unwrap_or(u64::MAX);
    let mut connect = Frame::new(Command::Connect)
        .with_header("accept-version", ACCEPT_VERSION)
        .with_header("heart-beat", format!("{offer},0"));
    if let Some(token) = credential {
        connect = connect.with_header("Authorization", format!("Bearer {token}"));
    }
    transport.send(&encode_frame(&connect)).await?;

    loop {
        let Some(text) = transport.next().await else {
            return Err(RealtimeError::Handshake("closed before CONNECTED".to_owned()));
        };
        for frame in decode_frames(&text?)? {
            match frame.command {
                Command::Connected => {
                    let heartbeat = negotiate_heartbeat(offer, frame.header("heart-beat"));
                    debug!(version = frame.header("version"), ?heartbeat, "STOMP session established");
                    return Ok((transport, heartbeat));
                }
                Command::Error => {
                    let message = frame.header("message").unwrap_or(frame.body.as_str());
                    return Err(RealtimeError::Handshake(message.to_owned()));
                }
                other => debug!(command = %other, "ignoring frame before CONNECTED"),
            }
        }
    }
}

/// Client send interval: the larger of our offer and the broker's wish to
/// receive, or `None` when either side disables heartbeats.
pub(super) fn negotiate_heartbeat(offer_ms: u64, server: Option<&str>) -> Option<Duration> {
    let wanted = server?.split(',').nth(1)?.trim().parse::<u64>().ok()?;
    if offer_ms == 0 || wanted == 0 {
        return None;
    }
    Some(Duration::from_millis(offer_ms.max(wanted)))
}

enum PumpExit {
    Lost(TransportError),
    PeerClosed,
    /// Our `DISCONNECT` was acknowledged and the socket closed.
    Closed,
}

async fn pump(
    shared: &Shared,
    mut transport: Box<dyn Transport>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    heartbeat: Option<Duration>,
) -> PumpExit {
    let mut beat = heartbeat.map(|every| tokio::time::interval_at(Instant::now() + every, every));

    loop {
        tokio::select! {
            incoming = transport.next() => match incoming {
                Some(Ok(text)) => {
                    if dispatch(shared, &text) {
                        if let Err(err) = transport.close().await {
                            debug!(error = %err, "close after DISCONNECT failed");
                        }
                        if let Some(closing) = shared.lock().closing.take() {
                            let _ = closing.done.send(());
                        }
                        return PumpExit::Closed;
                    }
                }
                Some(Err(err)) => return PumpExit::Lost(err),
                None => return PumpExit::PeerClosed,
            },
            frame = outbound.recv() => {
                let Some(frame) = frame else { return PumpExit::PeerClosed };
                if let Err(err) = transport.send(&encode_frame(&frame)).await {
                    return PumpExit::Lost(err);
                }
            }
            () = next_beat(&mut beat) => {
                trace!("sending heartbeat");
                if let Err(err) = transport.send("\n").await {
                    return PumpExit::Lost(err);
                }
            }
        }
    }
}

async fn next_beat(beat: &mut Option<Interval>) {
    match beat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// =============================================================================
// INBOUND
// =============================================================================

/// Route inbound frames. Returns `true` once the receipt for our
/// `DISCONNECT` arrives.
fn dispatch(shared: &Shared, text: &str) -> bool {
    if is_heartbeat(text) {
        trace!("heartbeat received");
        return false;
    }
    let frames = match decode_frames(text) {
        Ok(frames) => frames,
        Err(e) => {
            let err = RealtimeError::from(e);
            warn!(error = %err, "dropping malformed STOMP payload");
            return false;
        }
    };

    for frame in frames {
        match frame.command {
            Command::Message => deliver(shared, &frame),
            Command::Error => warn!(
                message = frame.header("message").unwrap_or_default(),
                body = %frame.body,
                "broker sent ERROR frame"
            ),
            Command::Receipt => {
                let receipt = frame.header("receipt-id");
                debug!(receipt, "receipt");
                let closing = shared.lock().closing.as_ref().map(|closing| closing.receipt.clone());
                if receipt.is_some() && receipt == closing.as_deref() {
                    return true;
                }
            }
            other => debug!(command = %other, "ignoring unexpected frame"),
        }
    }
    false
}

fn deliver(shared: &Shared, frame: &Frame) {
    let target = {
        let inner = shared.lock();
        let by_id = frame
            .header("subscription")
            .and_then(|id| inner.subscriptions.iter().find(|(_, entry)| entry.id == id));
        let entry = by_id.or_else(|| {
            frame
                .header("destination")
                .and_then(|destination| inner.subscriptions.get_key_value(&Topic::new(destination)))
        });
        entry.map(|(topic, entry)| (topic.clone(), entry.sender.clone()))
    };
    let Some((topic, sender)) = target else {
        debug!(subscription = frame.header("subscription"), "message for unknown subscription dropped");
        return;
    };

    let value = match serde_json::from_str::<Value>(&frame.body) {
        Ok(value) => value,
        Err(e) => {
            let err = RealtimeError::Decode(e);
            warn!(%topic, error = %err, "dropping undecodable message");
            return;
        }
    };
    if sender.send(value).is_err() {
        trace!(%topic, "message had no live receivers");
    }
}

// =============================================================================
// STATE TRANSITIONS
// =============================================================================

fn is_current(shared: &Shared, epoch: u64) -> bool {
    shared.lock().epoch == epoch
}

/// Open the outbound queue, queue re-subscriptions and fire `on_ready`.
fn mark_connected(shared: &Shared, epoch: u64) -> Option<mpsc::UnboundedReceiver<Frame>> {
    let (ready, rx) = {
        let mut inner = shared.lock();
        if inner.epoch != epoch {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        for (topic, entry) in &inner.subscriptions {
            let _ = tx.send(subscribe_frame(&entry.id, topic));
        }
        let resubscribed = inner.subscriptions.len();
        inner.outbound = Some(tx);
        shared.set_state(ConnectionState::Connected);
        info!(epoch, resubscribed, "realtime connected");
        (std::mem::take(&mut inner.pending_ready), rx)
    };

    for callback in ready {
        callback();
    }
    Some(rx)
}

fn mark_connecting(shared: &Shared, epoch: u64) -> bool {
    let mut inner = shared.lock();
    if inner.epoch != epoch {
        return false;
    }
    inner.outbound = None;
    shared.set_state(ConnectionState::Connecting);
    true
}

fn mark_disconnected(shared: &Shared, epoch: u64) {
    let mut inner = shared.lock();
    if inner.epoch != epoch {
        return;
    }
    inner.outbound = None;
    inner.credential = None;
    inner.subscriptions.clear();
    inner.pending_ready.clear();
    inner.task = None;
    shared.set_state(ConnectionState::Disconnected);
}
