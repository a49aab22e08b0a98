//! Background reconnect and heartbeat loops.
//!
//! # Responsibilities
//! - Periodically retry providers in the retry partition
//! - Periodically heartbeat alive and sub-health providers
//! - Stop on the holder's shutdown signal

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::holder::ConnectionHolder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopKind {
    Reconnect,
    Heartbeat,
}

impl LoopKind {
    fn as_str(&self) -> &'static str {
        match self {
            LoopKind::Reconnect => "reconnect",
            LoopKind::Heartbeat => "heartbeat",
        }
    }
}

pub(crate) fn spawn_loop(
    holder: Arc<ConnectionHolder>,
    kind: LoopKind,
    period: Duration,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(run(holder, kind, period, shutdown))
}

/// Fixed-delay loop: the next tick is scheduled after the previous one finished.
async fn run(
    holder: Arc<ConnectionHolder>,
    kind: LoopKind,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!(
        service = %holder.service(),
        loop_kind = kind.as_str(),
        period_ms = period.as_millis() as u64,
        "Holder loop starting"
    );

    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match kind {
                    LoopKind::Reconnect => {
                        holder.reconnect_tick().await;
                    }
                    LoopKind::Heartbeat => holder.heartbeat_tick().await,
                }
            }
            _ = shutdown.recv() => {
                tracing::info!(
                    service = %holder.service(),
                    loop_kind = kind.as_str(),
                    "Holder loop received shutdown signal, exiting loop"
                );
                break;
            }
        }
    }
}
