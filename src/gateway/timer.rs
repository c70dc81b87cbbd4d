//! Keep-alive timer wheel and ADVERTISE beacon
//!
//! A periodic scan posts `Timeout` events into packet-events; the handler
//! applies the state changes. The scan itself never mutates a client.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

use crate::client::ClientStatus;
use crate::event::{Event, TimeoutKind};
use crate::protocol::{Advertise, SnPacket};

use super::GatewayContext;

/// Scan cadence
const SCAN_PERIOD: Duration = Duration::from_secs(1);
/// How long a Lost client keeps its registry slot
const GC_GRACE: Duration = Duration::from_secs(10);
/// Lifetime of a one-shot courtesy slot
const EPHEMERAL_LIFETIME: Duration = Duration::from_secs(5);

pub(super) async fn run(ctx: Arc<GatewayContext>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(SCAN_PERIOD);
    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                debug!("timer wheel stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        let mut keep_alive_expired = Vec::new();
        let mut expired = Vec::new();
        ctx.registry.for_each(|handle, c| {
            if c.ephemeral {
                if c.created_at.elapsed() > EPHEMERAL_LIFETIME {
                    expired.push(handle);
                }
                return;
            }
            if c.status == ClientStatus::Lost {
                if c.lost_at.map(|t| t.elapsed() > GC_GRACE).unwrap_or(true) {
                    expired.push(handle);
                }
                return;
            }
            if let Some(deadline) = c.keep_alive_deadline() {
                if c.last_activity.elapsed() > deadline {
                    keep_alive_expired.push(handle);
                }
            }
        });

        for handle in keep_alive_expired {
            if !ctx
                .packet_events
                .post(Event::Timeout(handle, TimeoutKind::KeepAlive))
                .await
            {
                return;
            }
        }
        for handle in expired {
            if !ctx
                .packet_events
                .post(Event::Timeout(handle, TimeoutKind::Expire))
                .await
            {
                return;
            }
        }
    }
}

/// Periodic ADVERTISE broadcast carrying the gateway id and the interval
/// until the next beacon.
pub(super) async fn advertise(ctx: Arc<GatewayContext>, mut shutdown: broadcast::Receiver<()>) {
    let interval = Duration::from_secs(ctx.params.advertise_interval.max(1) as u64);
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately, announcing the gateway at startup.
    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                debug!("advertise beacon stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        let beacon = SnPacket::Advertise(Advertise {
            gw_id: ctx.params.gateway_id,
            duration: ctx.params.advertise_interval,
        });
        // Broadcasts may be shed under overload; unicast traffic never is.
        if !ctx.client_send.try_post(Event::Broadcast(beacon)) {
            debug!("client-send queue full, ADVERTISE skipped");
        }
    }
}
