//! Core library for the CN8PT bridge.
//!
//! Keeps a closed set of named control points synchronized with an Omega CN8PT
//! temperature controller that speaks a synchronous ASCII command/response protocol
//! over TCP.
//!
//! # Layers
//!
//! - [`codec`] and [`tables`]: request frames, response decoding, code translation
//! - [`transport`]: one serialized exchange at a time over a fresh connection
//! - [`point`] and [`registry`]: observable control points and their status
//! - [`bridge`]: startup, write and poll hooks per point
//! - [`scheduler`]: the actor loop that drives the hooks, and the host handle
//! - [`sim`]: a simulated controller for tests and `--simulate`

pub mod bridge;
pub mod codec;
pub mod config;
pub mod error;
pub mod error_recovery;
pub mod messages;
pub mod point;
pub mod registry;
pub mod scheduler;
pub mod sim;
pub mod tables;
pub mod transport;

pub use bridge::Cn8ptBridge;
pub use error::{BridgeError, BridgeResult};
pub use point::{PointId, PointStatus, PointValue};
pub use scheduler::{BridgeHandle, Scheduler};
