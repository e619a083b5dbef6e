//! Control points - named, observable device values
//!
//! Inspired by ScopeFoundry's LoggedQuantity: each control point is a typed value
//! behind a `tokio::sync::watch` channel, so any number of hosts can subscribe to
//! changes while the bridge alone writes to it.
//!
//! # Architecture
//!
//! ```text
//! ControlPoint
//!   ├─ descriptor: PointDescriptor         (name, kind, labels, default, hooks)
//!   ├─ value:  watch::Sender<PointValue>   (current value, change notifications)
//!   └─ status: watch::Sender<PointStatus>  (Uninitialized / Synchronized / Stale)
//! ```
//!
//! The set of points is closed ([`PointId`]) and known at construction time, so
//! hooks are dispatched from an explicit table in [`crate::bridge`] instead of
//! per-point callbacks.

use crate::error::{BridgeError, BridgeResult};
use crate::tables::{OUTPUT_MODE_LABELS, OUTPUT_RANGE_LABELS, SENSOR_TYPE_LABELS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

const NO_LABELS: &[&str] = &[];

// =============================================================================
// Identity
// =============================================================================

/// Every control point the bridge exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointId {
    /// Process temperature, polled periodically.
    Temperature,
    /// Input sensor family.
    Sensor,
    /// First sensor descriptor.
    Si1,
    /// Second sensor descriptor.
    Si2,
    /// Control setpoint.
    Setpoint,
    /// Output channel selector.
    OutputChan,
    /// Output mode of the selected channel.
    OutputMode,
    /// Analog range of the selected channel.
    OutputRange,
    /// Output hardware of the selected channel.
    OutputType,
    /// PID high output limit in percent.
    PidHiLim,
}

impl PointId {
    /// All points in declaration order.
    pub const ALL: [PointId; 10] = [
        PointId::Temperature,
        PointId::Sensor,
        PointId::Si1,
        PointId::Si2,
        PointId::Setpoint,
        PointId::OutputChan,
        PointId::OutputMode,
        PointId::OutputRange,
        PointId::OutputType,
        PointId::PidHiLim,
    ];

    /// Points whose value describes the currently selected output channel.
    pub const CHANNEL_SCOPED: [PointId; 3] =
        [PointId::OutputMode, PointId::OutputRange, PointId::OutputType];

    /// Published name.
    pub fn name(self) -> &'static str {
        match self {
            PointId::Temperature => "temperature",
            PointId::Sensor => "sensor",
            PointId::Si1 => "si1",
            PointId::Si2 => "si2",
            PointId::Setpoint => "setpoint",
            PointId::OutputChan => "output_chan",
            PointId::OutputMode => "output_mode",
            PointId::OutputRange => "output_range",
            PointId::OutputType => "output_type",
            PointId::PidHiLim => "pid_hi_lim",
        }
    }

    /// Look a point up by its published name.
    pub fn from_name(name: &str) -> BridgeResult<Self> {
        Self::ALL
            .into_iter()
            .find(|id| id.name() == name)
            .ok_or_else(|| BridgeError::UnknownPoint(name.to_string()))
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Static declaration of this point.
    pub fn descriptor(self) -> PointDescriptor {
        use PointKind::*;
        let (kind, default, labels, doc, hooks) = match self {
            PointId::Temperature => (
                Float,
                PointValue::Float(0.0),
                NO_LABELS,
                "temperature",
                HookSet::POLL,
            ),
            PointId::Sensor => (
                Enum,
                PointValue::Enum(0),
                SENSOR_TYPE_LABELS,
                "The sensor type of the controller",
                HookSet::STARTUP,
            ),
            PointId::Si1 => (
                Text,
                PointValue::Text(String::new()),
                NO_LABELS,
                "Sensor info 1",
                HookSet::NONE,
            ),
            PointId::Si2 => (
                Text,
                PointValue::Text(String::new()),
                NO_LABELS,
                "Sensor info 2",
                HookSet::NONE,
            ),
            PointId::Setpoint => (
                Float,
                PointValue::Float(0.0),
                NO_LABELS,
                "control setpoint",
                HookSet::STARTUP_WRITE,
            ),
            PointId::OutputChan => (
                Integer,
                PointValue::Integer(3),
                NO_LABELS,
                "output channel",
                HookSet::STARTUP_WRITE,
            ),
            PointId::OutputMode => (
                Enum,
                PointValue::Enum(0),
                OUTPUT_MODE_LABELS,
                "output mode",
                HookSet::WRITE,
            ),
            PointId::OutputRange => (
                Enum,
                PointValue::Enum(0),
                OUTPUT_RANGE_LABELS,
                "Output range",
                HookSet::WRITE,
            ),
            PointId::OutputType => (
                Text,
                PointValue::Text(crate::tables::NO_OUTPUT.to_string()),
                NO_LABELS,
                "Output hardware",
                HookSet::NONE,
            ),
            PointId::PidHiLim => (
                Integer,
                PointValue::Integer(100),
                NO_LABELS,
                "maximum output percentage",
                HookSet::WRITE,
            ),
        };
        PointDescriptor {
            id: self,
            name: self.name(),
            kind,
            default,
            labels,
            doc,
            hooks,
        }
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Values
// =============================================================================

/// Semantic type declared to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointKind {
    /// Floating point number.
    Float,
    /// Integer.
    Integer,
    /// Free text.
    Text,
    /// Index into the point's label list.
    Enum,
}

/// Current value of a control point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PointValue {
    /// Floating point number.
    Float(f64),
    /// Integer.
    Integer(i64),
    /// Free text.
    Text(String),
    /// Index into the label list.
    Enum(u16),
}

impl PointValue {
    /// Kind of this value.
    pub fn kind(&self) -> PointKind {
        match self {
            PointValue::Float(_) => PointKind::Float,
            PointValue::Integer(_) => PointKind::Integer,
            PointValue::Text(_) => PointKind::Text,
            PointValue::Enum(_) => PointKind::Enum,
        }
    }

    /// Numeric view (integers widen to float).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PointValue::Float(v) => Some(*v),
            PointValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer view.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PointValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Enum index view.
    pub fn as_enum(&self) -> Option<u16> {
        match self {
            PointValue::Enum(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PointValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Parse user text for the given point (enum points accept a label or an index).
    pub fn parse_for(id: PointId, text: &str) -> BridgeResult<Self> {
        let descriptor = id.descriptor();
        let text = text.trim();
        let bad =
            |what: &str| BridgeError::invalid(id.name(), format!("{:?} is not {}", text, what));
        match descriptor.kind {
            PointKind::Float => text.parse().map(PointValue::Float).map_err(|_| bad("a number")),
            PointKind::Integer => text
                .parse()
                .map(PointValue::Integer)
                .map_err(|_| bad("an integer")),
            PointKind::Text => Ok(PointValue::Text(text.to_string())),
            PointKind::Enum => {
                if let Some(index) = descriptor.labels.iter().position(|l| *l == text) {
                    return Ok(PointValue::Enum(index as u16));
                }
                text.parse().map(PointValue::Enum).map_err(|_| {
                    bad(&format!("one of {}", descriptor.labels.join(", ")))
                })
            }
        }
    }
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointValue::Float(v) => write!(f, "{}", v),
            PointValue::Integer(v) => write!(f, "{}", v),
            PointValue::Text(v) => write!(f, "{:?}", v),
            PointValue::Enum(v) => write!(f, "#{}", v),
        }
    }
}

// =============================================================================
// Declaration
// =============================================================================

/// Which hooks a point participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSet {
    /// Read once at boot.
    pub startup: bool,
    /// Accepts external writes.
    pub write: bool,
    /// Refreshed periodically.
    pub poll: bool,
}

impl HookSet {
    const NONE: HookSet = HookSet {
        startup: false,
        write: false,
        poll: false,
    };
    const STARTUP: HookSet = HookSet {
        startup: true,
        write: false,
        poll: false,
    };
    const WRITE: HookSet = HookSet {
        startup: false,
        write: true,
        poll: false,
    };
    const STARTUP_WRITE: HookSet = HookSet {
        startup: true,
        write: true,
        poll: false,
    };
    const POLL: HookSet = HookSet {
        startup: false,
        write: false,
        poll: true,
    };
}

/// Static declaration registered with the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointDescriptor {
    /// Identity.
    pub id: PointId,
    /// Published name.
    pub name: &'static str,
    /// Semantic type.
    pub kind: PointKind,
    /// Initial value before synchronization.
    pub default: PointValue,
    /// Enum labels (empty for non-enum points).
    pub labels: &'static [&'static str],
    /// One-line description.
    pub doc: &'static str,
    /// Participating hooks.
    pub hooks: HookSet,
}

impl PointDescriptor {
    /// Points without a write hook reject external writes.
    pub fn read_only(&self) -> bool {
        !self.hooks.write
    }

    /// Check that `value` has this point's kind and, for enums, a valid index.
    pub fn validate(&self, value: &PointValue) -> BridgeResult<()> {
        if value.kind() != self.kind {
            return Err(BridgeError::invalid(
                self.name,
                format!("expected {:?}, got {:?}", self.kind, value.kind()),
            ));
        }
        if let PointValue::Enum(index) = value {
            if usize::from(*index) >= self.labels.len() {
                return Err(BridgeError::invalid(
                    self.name,
                    format!("enum index {} outside 0..{}", index, self.labels.len()),
                ));
            }
        }
        Ok(())
    }

    /// Widen integers written to float points, then [`validate`](Self::validate).
    pub fn coerce(&self, value: PointValue) -> BridgeResult<PointValue> {
        let value = match (self.kind, value) {
            (PointKind::Float, PointValue::Integer(v)) => PointValue::Float(v as f64),
            (_, value) => value,
        };
        self.validate(&value)?;
        Ok(value)
    }

    /// Label for an enum value, if any.
    pub fn label_of(&self, value: &PointValue) -> Option<&'static str> {
        value
            .as_enum()
            .and_then(|i| self.labels.get(usize::from(i)).copied())
    }
}

// =============================================================================
// Status
// =============================================================================

/// Synchronization state of a control point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PointStatus {
    /// Still holding its default; never read from the device.
    Uninitialized,
    /// Value reflects the device as of `at`.
    Synchronized {
        /// Time of the last successful exchange.
        at: DateTime<Utc>,
    },
    /// A refresh failed; the value is the last good one.
    Stale {
        /// Time of the first failed refresh.
        since: DateTime<Utc>,
        /// Error of the most recent failed refresh.
        reason: String,
    },
}

impl PointStatus {
    /// True once the point has been read or written successfully at least once.
    pub fn is_synchronized(&self) -> bool {
        matches!(self, PointStatus::Synchronized { .. })
    }

    /// True after a failed refresh.
    pub fn is_stale(&self) -> bool {
        matches!(self, PointStatus::Stale { .. })
    }
}

// =============================================================================
// ControlPoint
// =============================================================================

/// A named, observable value with synchronization status.
pub struct ControlPoint {
    descriptor: PointDescriptor,
    value: watch::Sender<PointValue>,
    status: watch::Sender<PointStatus>,
}

impl fmt::Debug for ControlPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPoint")
            .field("name", &self.descriptor.name)
            .field("value", &*self.value.borrow())
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl ControlPoint {
    /// Create a point holding its default value.
    pub fn new(id: PointId) -> Self {
        let descriptor = id.descriptor();
        let (value, _) = watch::channel(descriptor.default.clone());
        let (status, _) = watch::channel(PointStatus::Uninitialized);
        Self {
            descriptor,
            value,
            status,
        }
    }

    /// Static declaration.
    pub fn descriptor(&self) -> &PointDescriptor {
        &self.descriptor
    }

    /// Current value (clone).
    pub fn get(&self) -> PointValue {
        self.value.borrow().clone()
    }

    /// Current status (clone).
    pub fn status(&self) -> PointStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to value changes.
    pub fn subscribe(&self) -> watch::Receiver<PointValue> {
        self.value.subscribe()
    }

    /// Subscribe to status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<PointStatus> {
        self.status.subscribe()
    }

    /// Store a value confirmed by the device and mark the point synchronized.
    pub(crate) fn record(&self, value: PointValue) {
        self.value.send_replace(value);
        self.status
            .send_replace(PointStatus::Synchronized { at: Utc::now() });
    }

    /// Keep the value but flag it as stale. Repeated failures keep the first `since`.
    pub(crate) fn mark_stale(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.status.send_modify(|status| {
            let since = match status {
                PointStatus::Stale { since, .. } => *since,
                _ => Utc::now(),
            };
            *status = PointStatus::Stale { since, reason };
        });
    }
}

// =============================================================================
// ChannelConfig
// =============================================================================

/// Output configuration of one channel.
///
/// The selector and the three attributes it governs are always replaced together,
/// so they can never describe different channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Selected output channel.
    pub channel: u8,
    /// Output mode code (index into the mode labels).
    pub mode: u16,
    /// Analog range code (index into the range labels).
    pub range: u16,
    /// Output hardware label.
    pub output_type: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            channel: 3,
            mode: 0,
            range: 0,
            output_type: crate::tables::NO_OUTPUT.to_string(),
        }
    }
}
