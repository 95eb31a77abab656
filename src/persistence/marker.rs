//! Marker record format and file naming.
//!
//! A marker is a JSON-lines audit log. Each line is one [`AuditEntry`]; the
//! deal's structured state is the target of the last `transition` line.
//! File names carry a state tag as well (`<id>_BUY`, `<id>_SELL`,
//! `<id>_PROFIT_<timestamp>`) which is only used when the record itself has
//! no readable transition.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::dealer::OrderSide;

const PROFIT_INFIX: &str = "_PROFIT_";

/// Step of a single instrument's deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DealState {
    NotStarted,
    Buy,
    Sell,
    Profit,
}

impl DealState {
    /// Tag used in marker file names. `NotStarted` has no marker.
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            DealState::NotStarted => None,
            DealState::Buy => Some("BUY"),
            DealState::Sell => Some("SELL"),
            DealState::Profit => Some("PROFIT"),
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "BUY" => Some(DealState::Buy),
            "SELL" => Some(DealState::Sell),
            "PROFIT" => Some(DealState::Profit),
            _ => None,
        }
    }

    /// The step that follows this one, `None` once the deal is done.
    pub fn next(&self) -> Option<Self> {
        match self {
            DealState::NotStarted => Some(DealState::Buy),
            DealState::Buy => Some(DealState::Sell),
            DealState::Sell => Some(DealState::Profit),
            DealState::Profit => None,
        }
    }
}

impl fmt::Display for DealState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DealState::NotStarted => write!(f, "NOT_STARTED"),
            DealState::Buy => write!(f, "BUY"),
            DealState::Sell => write!(f, "SELL"),
            DealState::Profit => write!(f, "PROFIT"),
        }
    }
}

/// One event in a marker's audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// The deal moved to a new step.
    Transition { from: DealState, to: DealState },
    /// A quote was received while waiting on a price condition.
    Quote { price: Decimal },
    /// The execution collaborator reported an order.
    Execution {
        side: OrderSide,
        quantity: Decimal,
        price: Option<Decimal>,
        note: String,
    },
    /// Free-form note.
    Note { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditEntry {
    pub fn now(event: AuditEvent) -> Self {
        Self {
            at: Utc::now(),
            event,
        }
    }
}

/// Parsed content of a marker file.
#[derive(Debug, Clone, Default)]
pub struct MarkerRecord {
    pub entries: Vec<AuditEntry>,
    /// Lines that are not audit entries (blank lines are not counted).
    pub unreadable_lines: usize,
}

impl MarkerRecord {
    /// Parse a marker body. Plain-text lines written by older versions are
    /// counted but otherwise ignored.
    pub fn parse(content: &str) -> Self {
        let mut record = MarkerRecord::default();
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => record.entries.push(entry),
                Err(_) => record.unreadable_lines += 1,
            }
        }
        record
    }

    /// Target of the last recorded transition.
    pub fn last_state(&self) -> Option<DealState> {
        self.entries.iter().rev().find_map(|entry| match entry.event {
            AuditEvent::Transition { to, .. } => Some(to),
            _ => None,
        })
    }

    pub fn quote_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.event, AuditEvent::Quote { .. }))
            .count()
    }

    /// Entries appended after the last transition.
    fn since_last_transition(&self) -> &[AuditEntry] {
        let start = self
            .entries
            .iter()
            .rposition(|e| matches!(e.event, AuditEvent::Transition { .. }))
            .map_or(0, |i| i + 1);
        &self.entries[start..]
    }

    /// Execution for `side` recorded in the current step, if any.
    ///
    /// Used on restart so an order that went out just before a crash is not
    /// sent a second time.
    pub fn pending_execution(&self, side: OrderSide) -> Option<&AuditEntry> {
        self.since_last_transition()
            .iter()
            .find(|e| matches!(&e.event, AuditEvent::Execution { side: s, .. } if *s == side))
    }

    /// Price of the most recent execution on `side`.
    pub fn execution_price(&self, side: OrderSide) -> Option<Decimal> {
        self.entries.iter().rev().find_map(|e| match &e.event {
            AuditEvent::Execution {
                side: s, price, ..
            } if *s == side => *price,
            _ => None,
        })
    }
}

pub(crate) fn marker_prefix(instrument_id: &str) -> String {
    format!("{instrument_id}_")
}

/// File name of an active marker, e.g. `BBG000B9XRY4_BUY`.
pub fn marker_file_name(instrument_id: &str, state: DealState) -> Option<String> {
    state.tag().map(|tag| format!("{instrument_id}_{tag}"))
}

/// File name of an archived record:
/// `<id>_PROFIT_<RFC 3339 timestamp with ':' replaced by '_'>`.
pub fn archive_file_name(instrument_id: &str, completed_at: DateTime<Utc>) -> String {
    let stamp = completed_at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace(':', "_");
    format!("{instrument_id}{PROFIT_INFIX}{stamp}")
}

fn parse_archive_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    let restored = stamp.replace('_', ":");
    if let Ok(ts) = DateTime::parse_from_rfc3339(&restored) {
        return Some(ts.with_timezone(&Utc));
    }
    // Records archived without an offset (local ISO date-time).
    NaiveDateTime::parse_from_str(&restored, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// A finished deal moved into the archive directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedRecord {
    pub instrument_id: String,
    pub completed_at: DateTime<Utc>,
    pub path: PathBuf,
}

impl ArchivedRecord {
    /// Recognise an archive entry by its file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (instrument_id, stamp) = name.rsplit_once(PROFIT_INFIX)?;
        if instrument_id.is_empty() {
            return None;
        }
        Some(Self {
            instrument_id: instrument_id.to_string(),
            completed_at: parse_archive_stamp(stamp)?,
            path: path.to_path_buf(),
        })
    }
}
