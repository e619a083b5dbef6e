//! Message types for actor-based communication
//!
//! Hosts never call the bridge directly. They send a [`BridgeCommand`] to the
//! scheduler task, which runs it in the same loop as startup and polling, and get
//! the result back on a oneshot channel.

use crate::error::BridgeResult;
use crate::point::{PointId, PointValue};
use crate::scheduler::StartupReport;
use tokio::sync::oneshot;

/// Commands that can be sent to the scheduler
#[derive(Debug)]
pub enum BridgeCommand {
    /// Route an external write through the point's write hook
    Write {
        point: PointId,
        value: PointValue,
        response: oneshot::Sender<BridgeResult<()>>,
    },

    /// Run the point's poll hook now instead of waiting for the next tick
    Poll {
        point: PointId,
        response: oneshot::Sender<BridgeResult<()>>,
    },

    /// Re-run echo-enable and every startup hook
    Resync {
        response: oneshot::Sender<StartupReport>,
    },

    /// Stop the scheduler
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

impl BridgeCommand {
    /// Helper to create a Write command
    pub fn write(
        point: PointId,
        value: PointValue,
    ) -> (Self, oneshot::Receiver<BridgeResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Write {
                point,
                value,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a Poll command
    pub fn poll(point: PointId) -> (Self, oneshot::Receiver<BridgeResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Poll { point, response: tx }, rx)
    }

    /// Helper to create a Resync command
    pub fn resync() -> (Self, oneshot::Receiver<StartupReport>) {
        let (tx, rx) = oneshot::channel();
        (Self::Resync { response: tx }, rx)
    }

    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}
