use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use tracing::{debug, warn};

use super::{Inner, types::OpCode};
use crate::common::types::now_ms;

/// Heartbeats go out at this fraction of the advertised interval.
const HEARTBEAT_NUMERATOR: u32 = 3;
const HEARTBEAT_DENOMINATOR: u32 = 4;

/// `None` when the interval cannot be represented as a `Duration`.
pub(crate) fn heartbeat_period(interval_ms: f64) -> Option<Duration> {
    let interval = Duration::try_from_secs_f64(interval_ms / 1_000.0).ok()?;
    let period = interval.checked_mul(HEARTBEAT_NUMERATOR)? / HEARTBEAT_DENOMINATOR;
    Some(period.max(Duration::from_millis(1)))
}

/// Sends op 3 immediately and then every `period` until the session is
/// cancelled. A failed send tears the session down.
pub(super) fn spawn_heartbeat(inner: Arc<Inner>, period: Duration) {
    let tasks = inner.tasks.clone();
    tasks.spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = inner.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let now = now_ms();
            inner.last_heartbeat.store(now, Ordering::Relaxed);
            if let Err(e) = inner.send_message(OpCode::Heartbeat, &now) {
                if !inner.cancel.is_cancelled() {
                    warn!("[{}] Heartbeat failed: {}", inner.guild_id, e);
                    inner.teardown();
                }
                break;
            }
            debug!("[{}] Voice heartbeat", inner.guild_id);
        }
    });
}
