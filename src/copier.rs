use crate::gateway::TerminalGateway;
use crate::models::{
    EventKind, MarketOrderRequest, PositionMapping, TradeEvent,
};
use crate::tracker::PositionTracker;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Magic number stamped on every mirrored order so they are recognizable on
/// the slave terminal.
const MIRROR_MAGIC: i64 = 888_888;

/// Fallbacks when the bridge cannot supply symbol volume constraints.
const DEFAULT_VOLUME_STEP: f64 = 0.01;
const DEFAULT_VOLUME_MIN: f64 = 0.01;

const EPSILON: f64 = 1e-6;

/// Quantize a raw close volume to the broker's lot grid: floor to the step,
/// clamp up to the minimum, round to 8 decimal places.
pub fn normalize_close_volume(raw_delta: f64, volume_step: f64, volume_min: f64) -> f64 {
    let step = if volume_step > 0.0 {
        volume_step
    } else {
        DEFAULT_VOLUME_STEP
    };
    let min = if volume_min > 0.0 {
        volume_min
    } else {
        DEFAULT_VOLUME_MIN
    };
    let floored = (raw_delta / step).floor() * step;
    let clamped = floored.max(min);
    (clamped * 1e8).round() / 1e8
}

/// Replays detected master events on the slave account, one event fully
/// processed before the next. Nothing propagates past `process_event`: every
/// failure path logs and returns so the executor loop keeps draining.
pub struct ReplicationEngine {
    gateway: Arc<dyn TerminalGateway>,
    tracker: PositionTracker,
    max_slippage: i32,
}

impl ReplicationEngine {
    pub fn new(gateway: Arc<dyn TerminalGateway>, tracker: PositionTracker, max_slippage: i32) -> Self {
        Self {
            gateway,
            tracker,
            max_slippage,
        }
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut PositionTracker {
        &mut self.tracker
    }

    pub async fn process_event(&mut self, event: &TradeEvent) {
        match event.kind {
            EventKind::New => self.handle_new(event).await,
            EventKind::Closed => self.handle_close(event).await,
            EventKind::ModifiedSl => self.handle_modify_sl(event).await,
            EventKind::ModifiedTp => self.handle_modify_tp(event).await,
            EventKind::PartialClose => self.handle_partial_close(event).await,
        }
    }

    async fn handle_new(&mut self, event: &TradeEvent) {
        let Some(pos) = event.position.as_ref() else {
            return;
        };

        // Duplicate guard: a NEW for an already-mapped ticket is a replay.
        if self.tracker.has_mapping(pos.ticket) {
            warn!("#{} already mapped, skip", pos.ticket);
            return;
        }

        let req = MarketOrderRequest {
            symbol: &pos.symbol,
            direction: pos.direction,
            volume: pos.volume,
            stop_loss: pos.stop_loss,
            take_profit: pos.take_profit,
            slippage: self.max_slippage,
            magic_number: MIRROR_MAGIC,
            comment: format!("CT#{}", pos.ticket),
        };

        let result = match self.gateway.place_market_order(&req).await {
            Ok(result) => result,
            Err(e) => {
                error!("Copy failed #{}: {e}", pos.ticket);
                return;
            }
        };
        if !result.success {
            error!("Copy rejected #{}: {}", pos.ticket, result.reason());
            return;
        }
        let Some(slave_ticket) = result.ticket else {
            error!("Copy #{}: order accepted but no slave ticket returned", pos.ticket);
            return;
        };

        self.tracker.add_mapping(PositionMapping {
            master_ticket: pos.ticket,
            slave_ticket,
            symbol: pos.symbol.clone(),
            direction: pos.direction,
            master_volume: pos.volume,
            slave_volume: pos.volume,
            master_open_price: pos.price_open,
            slave_open_price: result.price.unwrap_or(0.0),
            master_sl: pos.stop_loss,
            master_tp: pos.take_profit,
            slave_sl: pos.stop_loss,
            slave_tp: pos.take_profit,
            opened_at: Utc::now().to_rfc3339(),
            risk_percent: 0.0,
        });

        info!(
            "Copied: {} {} {} lot | master #{} -> slave #{}",
            pos.symbol, pos.direction, pos.volume, pos.ticket, slave_ticket
        );
    }

    async fn handle_close(&mut self, event: &TradeEvent) {
        let Some(mapping) = self.tracker.get_mapping(event.master_ticket).cloned() else {
            warn!("No mapping for #{}", event.master_ticket);
            return;
        };

        let result = match self
            .gateway
            .close_position(mapping.slave_ticket, self.max_slippage)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!("Close failed slave #{}: {e}", mapping.slave_ticket);
                return;
            }
        };
        if !result.success {
            // Mapping stays so a later close attempt can still find it.
            error!(
                "Close rejected slave #{}: {}",
                mapping.slave_ticket,
                result.reason()
            );
            return;
        }

        self.tracker.remove_mapping(event.master_ticket);
        info!("Closed: {} | slave #{}", mapping.symbol, mapping.slave_ticket);
    }

    async fn handle_modify_sl(&mut self, event: &TradeEvent) {
        let Some(pos) = event.position.as_ref() else {
            return;
        };
        let Some(mapping) = self.tracker.get_mapping(event.master_ticket).cloned() else {
            warn!("No mapping for #{}", event.master_ticket);
            return;
        };

        match self
            .gateway
            .modify_position(mapping.slave_ticket, Some(pos.stop_loss), None)
            .await
        {
            Ok(result) if result.success => {
                self.tracker
                    .update_sl_tp(event.master_ticket, Some(pos.stop_loss), None);
                info!("SL updated: {} -> {}", mapping.symbol, pos.stop_loss);
            }
            Ok(result) => error!(
                "SL modify rejected slave #{}: {}",
                mapping.slave_ticket,
                result.reason()
            ),
            Err(e) => error!("SL modify failed slave #{}: {e}", mapping.slave_ticket),
        }
    }

    async fn handle_modify_tp(&mut self, event: &TradeEvent) {
        let Some(pos) = event.position.as_ref() else {
            return;
        };
        let Some(mapping) = self.tracker.get_mapping(event.master_ticket).cloned() else {
            warn!("No mapping for #{}", event.master_ticket);
            return;
        };

        match self
            .gateway
            .modify_position(mapping.slave_ticket, None, Some(pos.take_profit))
            .await
        {
            Ok(result) if result.success => {
                self.tracker
                    .update_sl_tp(event.master_ticket, None, Some(pos.take_profit));
                info!("TP updated: {} -> {}", mapping.symbol, pos.take_profit);
            }
            Ok(result) => error!(
                "TP modify rejected slave #{}: {}",
                mapping.slave_ticket,
                result.reason()
            ),
            Err(e) => error!("TP modify failed slave #{}: {e}", mapping.slave_ticket),
        }
    }

    async fn handle_partial_close(&mut self, event: &TradeEvent) {
        let (Some(pos), Some(prev)) = (event.position.as_ref(), event.previous_position.as_ref())
        else {
            return;
        };
        let Some(mapping) = self.tracker.get_mapping(event.master_ticket).cloned() else {
            warn!("No mapping for #{}", event.master_ticket);
            return;
        };

        let raw_delta = prev.volume - pos.volume;

        let (step, min) = match self.gateway.get_symbol_info(&pos.symbol).await {
            Ok(info) => (info.volume_step, info.volume_min),
            Err(e) => {
                warn!(
                    "Symbol info unavailable for {}, using defaults: {e}",
                    pos.symbol
                );
                (DEFAULT_VOLUME_STEP, DEFAULT_VOLUME_MIN)
            }
        };
        let close_volume = normalize_close_volume(raw_delta, step, min);

        // Closing the whole tracked volume (or more) is a plain close.
        if close_volume >= mapping.slave_volume - EPSILON {
            let result = match self
                .gateway
                .close_position(mapping.slave_ticket, self.max_slippage)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    error!("Full close failed slave #{}: {e}", mapping.slave_ticket);
                    return;
                }
            };
            if !result.success {
                error!(
                    "Full close rejected slave #{}: {}",
                    mapping.slave_ticket,
                    result.reason()
                );
                return;
            }
            self.tracker.remove_mapping(event.master_ticket);
            info!(
                "Partial close covered remaining volume, closed slave #{} fully",
                mapping.slave_ticket
            );
            return;
        }

        let result = match self
            .gateway
            .partial_close(mapping.slave_ticket, close_volume, self.max_slippage)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!("Partial close failed slave #{}: {e}", mapping.slave_ticket);
                return;
            }
        };
        if !result.success {
            error!(
                "Partial close rejected slave #{}: {}",
                mapping.slave_ticket,
                result.reason()
            );
            return;
        }

        let new_volume =
            ((mapping.slave_volume - close_volume) * 1e8).round() / 1e8;
        self.tracker
            .update_slave_volume(event.master_ticket, new_volume);
        info!(
            "Partial close: {} closed {} lot, remaining {:.2} lot",
            mapping.symbol, close_volume, new_volume
        );
    }
}
