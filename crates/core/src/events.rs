//! Typed engine events and the sink interface observers plug into.
//!
//! The engine never depends on anyone consuming these; sinks are for
//! notification and dashboard layers that live outside the workspace.

use crate::types::{Asset, Outcome};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    ReferenceCaptured {
        window_id: String,
        asset: Asset,
        price: Decimal,
        method: String,
        at: DateTime<Utc>,
    },
    WindowSkipped {
        window_id: String,
        reason: String,
    },
    OpportunityDetected {
        window_id: String,
        outcome: Outcome,
        quoted: Decimal,
        fair: f64,
        edge: Decimal,
        confidence: f64,
    },
    PositionOpened {
        position_id: String,
        window_id: String,
        outcome: Outcome,
        entry_price: Decimal,
        size: Decimal,
    },
    ExitTriggered {
        position_id: String,
        reason: String,
        quoted: Decimal,
    },
    PositionClosed {
        position_id: String,
        window_id: String,
        realized_pnl: Decimal,
        reason: String,
    },
    ResolutionConfirmed {
        window_id: String,
        winner: Outcome,
    },
}

/// Receives engine events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &EngineEvent);
}

/// Writes every event to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::ReferenceCaptured {
                window_id,
                price,
                method,
                ..
            } => info!(window = %window_id, price = %price, method = %method, "reference captured"),
            EngineEvent::WindowSkipped { window_id, reason } => {
                info!(window = %window_id, reason = %reason, "window skipped")
            }
            EngineEvent::OpportunityDetected {
                window_id,
                outcome,
                quoted,
                fair,
                edge,
                ..
            } => info!(
                window = %window_id,
                outcome = %outcome,
                quoted = %quoted,
                fair = format!("{fair:.4}"),
                edge = %edge,
                "opportunity detected"
            ),
            EngineEvent::PositionOpened {
                position_id,
                entry_price,
                size,
                ..
            } => info!(
                position = %position_id,
                entry = %entry_price,
                size = %size,
                "position opened"
            ),
            EngineEvent::ExitTriggered {
                position_id,
                reason,
                quoted,
            } => info!(
                position = %position_id,
                reason = %reason,
                quoted = %quoted,
                "exit triggered"
            ),
            EngineEvent::PositionClosed {
                position_id,
                realized_pnl,
                reason,
                ..
            } => info!(
                position = %position_id,
                pnl = %realized_pnl,
                reason = %reason,
                "position closed"
            ),
            EngineEvent::ResolutionConfirmed { window_id, winner } => {
                info!(window = %window_id, winner = %winner, "resolution confirmed")
            }
        }
    }
}

/// Forwards events into an unbounded channel; a dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelEventSink {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: &EngineEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: &EngineEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn channel_sink_delivers_events() {
        let (sink, mut rx) = ChannelEventSink::new();
        sink.emit(&EngineEvent::WindowSkipped {
            window_id: "w".to_string(),
            reason: "too old".to_string(),
        });

        match rx.recv().await {
            Some(EngineEvent::WindowSkipped { reason, .. }) => assert_eq!(reason, "too old"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn channel_sink_tolerates_dropped_receiver() {
        let (sink, rx) = ChannelEventSink::new();
        drop(rx);
        sink.emit(&EngineEvent::ResolutionConfirmed {
            window_id: "w".to_string(),
            winner: Outcome::Up,
        });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = EngineEvent::ExitTriggered {
            position_id: "p".to_string(),
            reason: "stop_loss".to_string(),
            quoted: dec!(0.31),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "exit_triggered");
        assert_eq!(json["reason"], "stop_loss");
    }
}
