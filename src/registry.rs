//! Control point registry.
//!
//! Holds one [`ControlPoint`] per [`PointId`] and the [`ChannelConfig`] aggregate.
//! The output selector and the mode/range/type triple are never written one by one:
//! [`Registry::apply_channel`] replaces the aggregate and then republishes all four
//! points from it.

use crate::error::BridgeResult;
use crate::point::{
    ChannelConfig, ControlPoint, PointDescriptor, PointId, PointStatus, PointValue,
};
use serde::Serialize;
use tokio::sync::watch;

/// Point value and status at one instant, for hosts that poll instead of subscribe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointSnapshot {
    /// Published name.
    pub name: &'static str,
    /// Current value.
    pub value: PointValue,
    /// Enum label of `value`, when the point is enumerated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<&'static str>,
    /// Synchronization state.
    pub status: PointStatus,
}

/// Every control point of the bridge.
#[derive(Debug)]
pub struct Registry {
    points: [ControlPoint; 10],
    channel: watch::Sender<ChannelConfig>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a registry with every point at its default value.
    pub fn new() -> Self {
        let (channel, _) = watch::channel(ChannelConfig::default());
        Self {
            points: PointId::ALL.map(ControlPoint::new),
            channel,
        }
    }

    /// The point for `id`.
    pub fn point(&self, id: PointId) -> &ControlPoint {
        &self.points[id.index()]
    }

    /// Look a point up by its published name.
    pub fn by_name(&self, name: &str) -> BridgeResult<&ControlPoint> {
        PointId::from_name(name).map(|id| self.point(id))
    }

    /// Declarations of every point, in declaration order.
    pub fn descriptors(&self) -> Vec<PointDescriptor> {
        self.points.iter().map(|p| p.descriptor().clone()).collect()
    }

    /// Current value of a point.
    pub fn value(&self, id: PointId) -> PointValue {
        self.point(id).get()
    }

    /// Current status of a point.
    pub fn status(&self, id: PointId) -> PointStatus {
        self.point(id).status()
    }

    /// Subscribe to value changes of a point.
    pub fn subscribe(&self, id: PointId) -> watch::Receiver<PointValue> {
        self.point(id).subscribe()
    }

    /// Current output channel configuration.
    pub fn channel(&self) -> ChannelConfig {
        self.channel.borrow().clone()
    }

    /// Subscribe to output channel configuration changes.
    pub fn subscribe_channel(&self) -> watch::Receiver<ChannelConfig> {
        self.channel.subscribe()
    }

    /// Value, label and status of every point.
    pub fn snapshot(&self) -> Vec<PointSnapshot> {
        self.points
            .iter()
            .map(|p| {
                let value = p.get();
                PointSnapshot {
                    name: p.descriptor().name,
                    label: p.descriptor().label_of(&value),
                    value,
                    status: p.status(),
                }
            })
            .collect()
    }

    /// Store a device-confirmed value for a point outside the channel aggregate.
    pub(crate) fn record(&self, id: PointId, value: PointValue) {
        debug_assert!(
            id != PointId::OutputChan && !PointId::CHANNEL_SCOPED.contains(&id),
            "channel points go through apply_channel"
        );
        self.point(id).record(value);
    }

    pub(crate) fn mark_stale(&self, id: PointId, reason: impl Into<String>) {
        self.point(id).mark_stale(reason);
    }

    /// Replace the channel aggregate, then republish the selector and the triple.
    pub(crate) fn apply_channel(&self, config: ChannelConfig) {
        self.channel.send_replace(config.clone());
        self.point(PointId::OutputChan)
            .record(PointValue::Integer(i64::from(config.channel)));
        self.point(PointId::OutputMode)
            .record(PointValue::Enum(config.mode));
        self.point(PointId::OutputRange)
            .record(PointValue::Enum(config.range));
        self.point(PointId::OutputType)
            .record(PointValue::Text(config.output_type));
    }

    /// Change one attribute of the current channel and republish.
    pub(crate) fn update_channel(&self, update: impl FnOnce(&mut ChannelConfig)) {
        let mut config = self.channel();
        update(&mut config);
        self.apply_channel(config);
    }
}
