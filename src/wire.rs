use crate::models::{Direction, EventKind, Position, TradeEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current frame schema version. Bump on any incompatible field change.
pub const WIRE_VERSION: u32 = 1;

/// Decode failures are recoverable: the executor logs them and drops the
/// frame, it never tears down the consuming loop.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed event frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported frame version {found} (expected {WIRE_VERSION})")]
    UnsupportedVersion { found: u32 },
    #[error("bad timestamp {value:?}: {source}")]
    BadTimestamp {
        value: String,
        source: chrono::ParseError,
    },
    #[error("{kind} frame for #{ticket} is missing its {field} position")]
    MissingPosition {
        kind: EventKind,
        ticket: i64,
        field: &'static str,
    },
}

/// Position as carried across the watcher/executor boundary. Timestamps are
/// RFC 3339 strings; an empty string decodes as the Unix epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRecord {
    pub ticket: i64,
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    pub price_open: f64,
    pub price_current: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub profit: f64,
    pub swap: f64,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub time_update: String,
    #[serde(default)]
    pub magic_number: i64,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub v: u32,
    pub event_type: EventKind,
    pub source_ticket: i64,
    pub position: Option<PositionRecord>,
    pub previous_position: Option<PositionRecord>,
}

fn record_from(pos: &Position) -> PositionRecord {
    PositionRecord {
        ticket: pos.ticket,
        symbol: pos.symbol.clone(),
        direction: pos.direction,
        volume: pos.volume,
        price_open: pos.price_open,
        price_current: pos.price_current,
        stop_loss: pos.stop_loss,
        take_profit: pos.take_profit,
        profit: pos.profit,
        swap: pos.swap,
        time: pos.time.to_rfc3339(),
        time_update: pos.time_update.to_rfc3339(),
        magic_number: pos.magic_number,
        comment: pos.comment.clone(),
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, WireError> {
    if value.is_empty() {
        return Ok(DateTime::UNIX_EPOCH);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|source| WireError::BadTimestamp {
            value: value.to_string(),
            source,
        })
}

fn position_from(rec: &PositionRecord) -> Result<Position, WireError> {
    Ok(Position {
        ticket: rec.ticket,
        symbol: rec.symbol.clone(),
        direction: rec.direction,
        volume: rec.volume,
        price_open: rec.price_open,
        price_current: rec.price_current,
        stop_loss: rec.stop_loss,
        take_profit: rec.take_profit,
        profit: rec.profit,
        swap: rec.swap,
        time: parse_time(&rec.time)?,
        time_update: parse_time(&rec.time_update)?,
        magic_number: rec.magic_number,
        comment: rec.comment.clone(),
    })
}

/// Serialize an event into a channel frame.
pub fn encode(event: &TradeEvent) -> String {
    let record = EventRecord {
        v: WIRE_VERSION,
        event_type: event.kind,
        source_ticket: event.master_ticket,
        position: event.position.as_ref().map(record_from),
        previous_position: event.previous_position.as_ref().map(record_from),
    };
    // EventRecord contains no map keys or non-string values that can fail.
    serde_json::to_string(&record).unwrap_or_default()
}

/// Parse and validate a channel frame back into a `TradeEvent`.
pub fn decode(frame: &str) -> Result<TradeEvent, WireError> {
    let record: EventRecord = serde_json::from_str(frame)?;
    if record.v != WIRE_VERSION {
        return Err(WireError::UnsupportedVersion { found: record.v });
    }

    let position = record.position.as_ref().map(position_from).transpose()?;
    let previous_position = record
        .previous_position
        .as_ref()
        .map(position_from)
        .transpose()?;

    // Schema check: every kind needs its mandatory side present.
    let need = |field: &'static str| WireError::MissingPosition {
        kind: record.event_type,
        ticket: record.source_ticket,
        field,
    };
    match record.event_type {
        EventKind::New => {
            if position.is_none() {
                return Err(need("current"));
            }
        }
        EventKind::Closed => {
            if previous_position.is_none() {
                return Err(need("previous"));
            }
        }
        EventKind::ModifiedSl | EventKind::ModifiedTp | EventKind::PartialClose => {
            if position.is_none() {
                return Err(need("current"));
            }
            if previous_position.is_none() {
                return Err(need("previous"));
            }
        }
    }

    Ok(TradeEvent::new(
        record.event_type,
        record.source_ticket,
        position,
        previous_position,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_position() -> Position {
        Position {
            ticket: 100_001,
            symbol: "EURUSD".to_string(),
            direction: Direction::Buy,
            volume: 0.5,
            price_open: 1.0900,
            price_current: 1.0910,
            stop_loss: 1.0850,
            take_profit: 1.1000,
            profit: 5.0,
            swap: -0.12,
            time: Utc::now(),
            time_update: Utc::now(),
            magic_number: 888_888,
            comment: "CT#100001".to_string(),
        }
    }

    #[test]
    fn round_trip_preserves_event() {
        let event = TradeEvent::new(EventKind::New, 100_001, Some(sample_position()), None);
        let decoded = decode(&encode(&event)).unwrap();
        assert_eq!(decoded.kind, EventKind::New);
        assert_eq!(decoded.master_ticket, 100_001);
        let pos = decoded.position.unwrap();
        assert_eq!(pos.symbol, "EURUSD");
        assert_eq!(pos.volume, 0.5);
        assert_eq!(pos.stop_loss, 1.0850);
        assert!(decoded.previous_position.is_none());
    }

    #[test]
    fn frame_uses_expected_field_names() {
        let event = TradeEvent::new(EventKind::New, 100_001, Some(sample_position()), None);
        let frame = encode(&event);
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["v"], 1);
        assert_eq!(value["eventType"], "NEW");
        assert_eq!(value["sourceTicket"], 100_001);
        assert_eq!(value["position"]["priceOpen"], 1.0900);
        assert!(value["previousPosition"].is_null());
    }

    #[test]
    fn malformed_frame_is_a_decode_error() {
        assert!(matches!(
            decode("{not json"),
            Err(WireError::Malformed(_))
        ));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let event = TradeEvent::new(EventKind::New, 1, Some(sample_position()), None);
        let frame = encode(&event).replace("\"v\":1", "\"v\":2");
        assert!(matches!(
            decode(&frame),
            Err(WireError::UnsupportedVersion { found: 2 })
        ));
    }

    #[test]
    fn empty_timestamp_decodes_as_epoch() {
        let mut rec = record_from(&sample_position());
        rec.time = String::new();
        let pos = position_from(&rec).unwrap();
        assert_eq!(pos.time, DateTime::UNIX_EPOCH);
    }

    #[test]
    fn new_frame_without_position_is_rejected() {
        let frame = r#"{"v":1,"eventType":"NEW","sourceTicket":5,"position":null,"previousPosition":null}"#;
        assert!(matches!(
            decode(frame),
            Err(WireError::MissingPosition { ticket: 5, .. })
        ));
    }

    #[test]
    fn closed_frame_requires_previous_position() {
        let event = TradeEvent::new(EventKind::Closed, 7, None, Some(sample_position()));
        let decoded = decode(&encode(&event)).unwrap();
        assert_eq!(decoded.kind, EventKind::Closed);
        assert!(decoded.previous_position.is_some());

        let frame = r#"{"v":1,"eventType":"CLOSED","sourceTicket":7,"position":null,"previousPosition":null}"#;
        assert!(decode(frame).is_err());
    }
}
