use crate::models::{EventKind, Position, TradeEvent};
use ahash::AHashMap;
use tracing::info;

/// Tolerance for SL/TP and volume comparisons.
const EPSILON: f64 = 1e-6;

/// Compares consecutive master snapshots and emits the events needed to
/// replay the difference on the slave side.
///
/// Event order within one pass is fixed: NEW (current snapshot order), then
/// CLOSED (previous snapshot order), then per surviving ticket
/// MODIFIED_SL → MODIFIED_TP → PARTIAL_CLOSE. The retained baseline is
/// replaced after every call, whether or not anything changed.
pub struct SnapshotDiffer {
    // Baseline kept in poll order so CLOSED emission order is deterministic;
    // the index gives O(1) ticket lookups.
    previous: Vec<Position>,
    index: AHashMap<i64, usize>,
    initialized: bool,
}

impl Default for SnapshotDiffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotDiffer {
    pub fn new() -> Self {
        Self {
            previous: Vec::new(),
            index: AHashMap::new(),
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The retained baseline, in the order it was observed.
    pub fn snapshot(&self) -> &[Position] {
        &self.previous
    }

    /// Clears the baseline so the next `detect_changes` call re-baselines
    /// silently. Not called on reconnect: a gap in polling keeps the old
    /// baseline and the next diff reports whatever changed across it.
    pub fn reset(&mut self) {
        self.previous.clear();
        self.index.clear();
        self.initialized = false;
        info!("Monitor state reset");
    }

    fn retain(&mut self, snapshot: Vec<Position>) {
        self.index = snapshot
            .iter()
            .enumerate()
            .map(|(i, p)| (p.ticket, i))
            .collect();
        self.previous = snapshot;
    }

    /// Compare `current_positions` against the retained baseline.
    ///
    /// The first call after construction or `reset` stores the snapshot and
    /// returns no events: pre-existing positions are never mirrored.
    pub fn detect_changes(&mut self, current_positions: Vec<Position>) -> Vec<TradeEvent> {
        let mut events: Vec<TradeEvent> = Vec::new();

        if !self.initialized {
            info!(
                "Initial snapshot: {} positions [{}]",
                current_positions.len(),
                current_positions
                    .iter()
                    .map(|p| format!("{} {} {}", p.symbol, p.direction, p.volume))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            self.retain(current_positions);
            self.initialized = true;
            return events;
        }

        let current_index: AHashMap<i64, usize> = current_positions
            .iter()
            .enumerate()
            .map(|(i, p)| (p.ticket, i))
            .collect();

        // 1) NEW: in current but not in previous, in current order.
        for pos in &current_positions {
            if !self.index.contains_key(&pos.ticket) {
                info!(
                    "New position: #{} {} {} {} lot @ {}",
                    pos.ticket, pos.symbol, pos.direction, pos.volume, pos.price_open
                );
                events.push(TradeEvent::new(
                    EventKind::New,
                    pos.ticket,
                    Some(pos.clone()),
                    None,
                ));
            }
        }

        // 2) CLOSED: in previous but not in current, in previous order.
        for pos in &self.previous {
            if !current_index.contains_key(&pos.ticket) {
                info!(
                    "Position closed: #{} {} {} {} lot",
                    pos.ticket, pos.symbol, pos.direction, pos.volume
                );
                events.push(TradeEvent::new(
                    EventKind::Closed,
                    pos.ticket,
                    None,
                    Some(pos.clone()),
                ));
            }
        }

        // 3) Modifications on surviving tickets: SL, then TP, then volume.
        for pos in &current_positions {
            let Some(prev) = self.index.get(&pos.ticket).map(|&i| &self.previous[i]) else {
                continue;
            };

            if (pos.stop_loss - prev.stop_loss).abs() > EPSILON {
                info!(
                    "SL modified: #{} {} SL: {} -> {}",
                    pos.ticket, pos.symbol, prev.stop_loss, pos.stop_loss
                );
                events.push(TradeEvent::new(
                    EventKind::ModifiedSl,
                    pos.ticket,
                    Some(pos.clone()),
                    Some(prev.clone()),
                ));
            }

            if (pos.take_profit - prev.take_profit).abs() > EPSILON {
                info!(
                    "TP modified: #{} {} TP: {} -> {}",
                    pos.ticket, pos.symbol, prev.take_profit, pos.take_profit
                );
                events.push(TradeEvent::new(
                    EventKind::ModifiedTp,
                    pos.ticket,
                    Some(pos.clone()),
                    Some(prev.clone()),
                ));
            }

            if pos.volume < prev.volume - EPSILON {
                info!(
                    "Partial close: #{} {} volume: {} -> {} (closed {:.2})",
                    pos.ticket,
                    pos.symbol,
                    prev.volume,
                    pos.volume,
                    prev.volume - pos.volume
                );
                events.push(TradeEvent::new(
                    EventKind::PartialClose,
                    pos.ticket,
                    Some(pos.clone()),
                    Some(prev.clone()),
                ));
            }
        }

        self.retain(current_positions);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use chrono::Utc;

    fn pos(ticket: i64, volume: f64, sl: f64, tp: f64) -> Position {
        Position {
            ticket,
            symbol: "EURUSD".to_string(),
            direction: Direction::Buy,
            volume,
            price_open: 1.1000,
            price_current: 1.1010,
            stop_loss: sl,
            take_profit: tp,
            profit: 5.0,
            swap: 0.0,
            time: Utc::now(),
            time_update: Utc::now(),
            magic_number: 0,
            comment: String::new(),
        }
    }

    #[test]
    fn first_call_baselines_silently() {
        let mut differ = SnapshotDiffer::new();
        let events = differ.detect_changes(vec![pos(1, 0.5, 0.0, 0.0)]);
        assert!(events.is_empty());
        assert!(differ.is_initialized());
        assert_eq!(differ.snapshot().len(), 1);
    }

    #[test]
    fn detects_new_position() {
        let mut differ = SnapshotDiffer::new();
        differ.detect_changes(vec![]);
        let events = differ.detect_changes(vec![pos(100_001, 0.5, 1.09, 0.0)]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::New);
        assert_eq!(events[0].master_ticket, 100_001);
        assert!(events[0].position.is_some());
        assert!(events[0].previous_position.is_none());
    }

    #[test]
    fn detects_closed_position() {
        let mut differ = SnapshotDiffer::new();
        differ.detect_changes(vec![pos(7, 1.0, 0.0, 0.0)]);
        let events = differ.detect_changes(vec![]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Closed);
        assert!(events[0].position.is_none());
        assert_eq!(events[0].previous_position.as_ref().unwrap().ticket, 7);
    }

    #[test]
    fn unchanged_snapshot_yields_no_events() {
        let mut differ = SnapshotDiffer::new();
        differ.detect_changes(vec![pos(1, 0.5, 1.09, 1.12)]);
        let events = differ.detect_changes(vec![pos(1, 0.5, 1.09, 1.12)]);
        assert!(events.is_empty());
        // And again: idempotent while nothing moves.
        let events = differ.detect_changes(vec![pos(1, 0.5, 1.09, 1.12)]);
        assert!(events.is_empty());
    }

    #[test]
    fn sl_tp_volume_changes_emit_in_fixed_order() {
        let mut differ = SnapshotDiffer::new();
        differ.detect_changes(vec![pos(1, 1.0, 1.09, 1.12)]);
        let events = differ.detect_changes(vec![pos(1, 0.6, 1.095, 1.13)]);
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::ModifiedSl,
                EventKind::ModifiedTp,
                EventKind::PartialClose
            ]
        );
        let pc = &events[2];
        assert_eq!(pc.previous_position.as_ref().unwrap().volume, 1.0);
        assert_eq!(pc.position.as_ref().unwrap().volume, 0.6);
    }

    #[test]
    fn closed_events_follow_previous_snapshot_order() {
        let mut differ = SnapshotDiffer::new();
        differ.detect_changes(vec![
            pos(3, 0.1, 0.0, 0.0),
            pos(1, 0.2, 0.0, 0.0),
            pos(2, 0.3, 0.0, 0.0),
        ]);
        let events = differ.detect_changes(vec![]);
        let tickets: Vec<i64> = events.iter().map(|e| e.master_ticket).collect();
        assert_eq!(tickets, vec![3, 1, 2]);
    }

    #[test]
    fn sub_epsilon_changes_are_ignored() {
        let mut differ = SnapshotDiffer::new();
        differ.detect_changes(vec![pos(1, 1.0, 1.09, 1.12)]);
        let events = differ.detect_changes(vec![pos(1, 1.0 - 1e-9, 1.09 + 1e-9, 1.12)]);
        assert!(events.is_empty());
    }

    #[test]
    fn volume_increase_is_not_partial_close() {
        let mut differ = SnapshotDiffer::new();
        differ.detect_changes(vec![pos(1, 0.5, 0.0, 0.0)]);
        let events = differ.detect_changes(vec![pos(1, 0.7, 0.0, 0.0)]);
        assert!(events.is_empty());
    }

    #[test]
    fn new_and_closed_in_same_pass() {
        let mut differ = SnapshotDiffer::new();
        differ.detect_changes(vec![pos(1, 0.5, 0.0, 0.0)]);
        let events = differ.detect_changes(vec![pos(2, 0.3, 0.0, 0.0)]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::New);
        assert_eq!(events[0].master_ticket, 2);
        assert_eq!(events[1].kind, EventKind::Closed);
        assert_eq!(events[1].master_ticket, 1);
    }

    #[test]
    fn reset_forces_silent_rebaseline() {
        let mut differ = SnapshotDiffer::new();
        differ.detect_changes(vec![pos(1, 0.5, 0.0, 0.0)]);
        differ.reset();
        assert!(!differ.is_initialized());
        let events = differ.detect_changes(vec![pos(2, 0.3, 0.0, 0.0)]);
        assert!(events.is_empty());
    }

    #[test]
    fn baseline_advances_even_when_nothing_changed() {
        let mut differ = SnapshotDiffer::new();
        differ.detect_changes(vec![pos(1, 0.5, 0.0, 0.0)]);
        differ.detect_changes(vec![pos(1, 0.5, 0.0, 0.0)]);
        // Change after the no-op pass is still reported exactly once.
        let events = differ.detect_changes(vec![pos(1, 0.5, 1.10, 0.0)]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::ModifiedSl);
        let events = differ.detect_changes(vec![pos(1, 0.5, 1.10, 0.0)]);
        assert!(events.is_empty());
    }
}
