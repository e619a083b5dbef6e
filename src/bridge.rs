//! Omega CN8PT temperature controller bridge
//!
//! Protocol Overview:
//! - Format: `*<MNEMONIC>[ <PAYLOAD>]\r` (ASCII), one TCP connection per exchange
//! - Response: the echoed mnemonic followed by the payload (echo enabled by `W330 00011`)
//! - Numbers: signed decimals (`+073.50`), two-digit hex limits (`W502 64`),
//!   channel-prefixed codes (`W600 31` = channel 3, mode 1)
//!
//! [`Cn8ptBridge`] owns the mapping between control points and device commands.
//! Every hook goes through [`Cn8ptBridge::startup`], [`Cn8ptBridge::write`] or
//! [`Cn8ptBridge::poll`], which dispatch on [`PointId`].
//!
//! # Example Usage
//!
//! ```no_run
//! use cn8pt_bridge::bridge::Cn8ptBridge;
//! use cn8pt_bridge::point::{PointId, PointValue};
//! use cn8pt_bridge::transport::{Session, TcpConnector};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = Session::new(TcpConnector::new("10.66.50.95", 2000));
//!     let bridge = Cn8ptBridge::new(Arc::new(session));
//!
//!     bridge.enable_echo().await?;
//!     bridge.write(PointId::Setpoint, PointValue::Float(25.0)).await?;
//!     println!("Temperature: {:.2}", bridge.read_temperature().await?);
//!     Ok(())
//! }
//! ```

use crate::codec::{self, Command, Mnemonic, Payload};
use crate::error::{BridgeError, BridgeResult};
use crate::point::{ChannelConfig, PointId, PointValue};
use crate::registry::Registry;
use crate::tables::{self, SensorConfig, OUTPUT_MODE_LABELS, OUTPUT_RANGE_LABELS};
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Payload of the echo-enable command.
pub const ECHO_ON: &str = "00011";

/// Highest valid output channel.
pub const MAX_CHANNEL: u8 = 9;

/// Driver binding the control point registry to one CN8PT controller.
pub struct Cn8ptBridge {
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    /// Held across channel selection and per-channel writes so the aggregate
    /// always describes the channel the device was addressed on.
    channel_lock: Mutex<()>,
}

impl Cn8ptBridge {
    /// Create a bridge with a fresh registry.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_registry(transport, Arc::new(Registry::new()))
    }

    /// Create a bridge that publishes into an existing registry.
    pub fn with_registry(transport: Arc<dyn Transport>, registry: Arc<Registry>) -> Self {
        Self {
            transport,
            registry,
            channel_lock: Mutex::new(()),
        }
    }

    /// The registry this bridge keeps synchronized.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    async fn exchange(&self, command: Command) -> BridgeResult<String> {
        self.transport.execute(&command).await
    }

    // =========================================================================
    // Hook dispatch
    // =========================================================================

    /// Run the startup hook of `id`. Points without one succeed immediately.
    ///
    /// On failure the point keeps its default and stays `Uninitialized`.
    #[instrument(skip_all, fields(point = %id))]
    pub async fn startup(&self, id: PointId) -> BridgeResult<()> {
        match id {
            PointId::Sensor => self.sync_sensor().await.map(|_| ()),
            PointId::Setpoint => self.sync_setpoint().await.map(|_| ()),
            PointId::OutputChan => {
                let channel = self.registry.channel().channel;
                self.select_channel(channel).await.map(|_| ())
            }
            _ => Ok(()),
        }
    }

    /// Route an external write to the device.
    ///
    /// The value is checked before anything reaches the wire. On success the registry
    /// holds the written value; on failure value and status are left untouched.
    #[instrument(skip_all, fields(point = %id, value = %value))]
    pub async fn write(&self, id: PointId, value: PointValue) -> BridgeResult<()> {
        let descriptor = id.descriptor();
        if descriptor.read_only() {
            return Err(BridgeError::ReadOnly(id.name().to_string()));
        }
        let value = descriptor.coerce(value)?;

        match (id, value) {
            (PointId::Setpoint, PointValue::Float(v)) => self.write_setpoint(v).await,
            (PointId::OutputChan, PointValue::Integer(v)) => {
                let channel = u8::try_from(v).map_err(|_| out_of_range_channel(v))?;
                self.select_channel(channel).await.map(|_| ())
            }
            (PointId::OutputMode, PointValue::Enum(v)) => self.write_output_mode(v).await,
            (PointId::OutputRange, PointValue::Enum(v)) => self.write_output_range(v).await,
            (PointId::PidHiLim, PointValue::Integer(v)) => self.write_pid_high_limit(v).await,
            (id, value) => Err(BridgeError::invalid(
                id.name(),
                format!("no write handler for {}", value),
            )),
        }
    }

    /// Run the poll hook of `id`. Points without one succeed immediately.
    ///
    /// A failed poll keeps the last value and marks the point stale.
    pub async fn poll(&self, id: PointId) -> BridgeResult<()> {
        match id {
            PointId::Temperature => match self.read_temperature().await {
                Ok(_) => Ok(()),
                Err(e) => {
                    warn!(point = %id, error = %e, "poll failed; keeping last value");
                    self.registry.mark_stale(id, e.to_string());
                    Err(e)
                }
            },
            _ => Ok(()),
        }
    }

    // =========================================================================
    // Device operations
    // =========================================================================

    /// Turn on command echo so responses can be checked against requests.
    pub async fn enable_echo(&self) -> BridgeResult<()> {
        self.exchange(Command::with_payload(
            Mnemonic::WriteEcho,
            Payload::Raw(ECHO_ON.to_string()),
        ))
        .await?;
        info!("echo enabled");
        Ok(())
    }

    /// Read the sensor configuration and publish `sensor`, `si1` and `si2`.
    pub async fn sync_sensor(&self) -> BridgeResult<SensorConfig> {
        let payload = self
            .exchange(Command::bare(Mnemonic::ReadSensorConfig))
            .await?;
        let config = SensorConfig::decode(&payload)?;
        debug!(?config, "sensor configuration");

        self.registry.record(
            PointId::Sensor,
            PointValue::Enum(u16::from(config.sensor_type.code())),
        );
        self.registry
            .record(PointId::Si1, PointValue::Text(config.info_1.to_string()));
        self.registry
            .record(PointId::Si2, PointValue::Text(config.info_2.to_string()));
        Ok(config)
    }

    /// Read the control setpoint and publish it.
    pub async fn sync_setpoint(&self) -> BridgeResult<f64> {
        let payload = self.exchange(Command::bare(Mnemonic::ReadSetpoint)).await?;
        let setpoint = codec::parse_signed_decimal(Mnemonic::ReadSetpoint, &payload)?;
        self.registry
            .record(PointId::Setpoint, PointValue::Float(setpoint));
        Ok(setpoint)
    }

    /// Write a new control setpoint.
    pub async fn write_setpoint(&self, value: f64) -> BridgeResult<()> {
        if !value.is_finite() {
            return Err(BridgeError::invalid(
                PointId::Setpoint.name(),
                format!("{} is not a finite number", value),
            ));
        }
        self.exchange(Command::with_payload(
            Mnemonic::WriteSetpoint,
            Payload::Decimal(value),
        ))
        .await?;
        self.registry
            .record(PointId::Setpoint, PointValue::Float(value));
        Ok(())
    }

    /// Read the process temperature and publish it.
    pub async fn read_temperature(&self) -> BridgeResult<f64> {
        let payload = self
            .exchange(Command::bare(Mnemonic::ReadTemperature))
            .await?;
        let temperature = codec::parse_signed_decimal(Mnemonic::ReadTemperature, &payload)?;
        self.registry
            .record(PointId::Temperature, PointValue::Float(temperature));
        Ok(temperature)
    }

    /// Write the PID high output limit (percent, sent as a hex byte).
    pub async fn write_pid_high_limit(&self, percent: i64) -> BridgeResult<()> {
        let payload = codec::encode_hex_byte(percent).map_err(|_| {
            BridgeError::invalid(
                PointId::PidHiLim.name(),
                format!("{} is outside 0-255", percent),
            )
        })?;
        self.exchange(Command::with_payload(Mnemonic::WritePidHighLimit, payload))
            .await?;
        self.registry
            .record(PointId::PidHiLim, PointValue::Integer(percent));
        Ok(())
    }

    /// Select an output channel and read its mode, type and range.
    ///
    /// Issues exactly `R600`, `G601`, `R660` for `channel`, in that order. The
    /// selector and the triple are published together only if all three succeed.
    #[instrument(skip(self))]
    pub async fn select_channel(&self, channel: u8) -> BridgeResult<ChannelConfig> {
        if !(1..=MAX_CHANNEL).contains(&channel) {
            return Err(out_of_range_channel(i64::from(channel)));
        }
        let _guard = self.channel_lock.lock().await;

        let payload = self
            .exchange(Command::with_payload(
                Mnemonic::ReadOutputMode,
                Payload::Channel(channel),
            ))
            .await?;
        let mode = decode_label_index(Mnemonic::ReadOutputMode, &payload, OUTPUT_MODE_LABELS)?;

        let payload = self
            .exchange(Command::with_payload(
                Mnemonic::ReadOutputType,
                Payload::Channel(channel),
            ))
            .await?;
        let output_type = tables::output_type_label(&payload).to_string();

        let payload = self
            .exchange(Command::with_payload(
                Mnemonic::ReadOutputRange,
                Payload::Channel(channel),
            ))
            .await?;
        let range =
            decode_label_index(Mnemonic::ReadOutputRange, &payload, OUTPUT_RANGE_LABELS)?;

        let config = ChannelConfig {
            channel,
            mode,
            range,
            output_type,
        };
        info!(?config, "output channel synchronized");
        self.registry.apply_channel(config.clone());
        Ok(config)
    }

    /// Set the output mode of the selected channel.
    pub async fn write_output_mode(&self, mode: u16) -> BridgeResult<()> {
        check_label_index(PointId::OutputMode, mode, OUTPUT_MODE_LABELS)?;
        let _guard = self.channel_lock.lock().await;
        let channel = self.registry.channel().channel;
        self.exchange(Command::with_payload(
            Mnemonic::WriteOutputMode,
            Payload::ChannelCode {
                channel,
                code: mode,
            },
        ))
        .await?;
        self.registry.update_channel(|c| c.mode = mode);
        Ok(())
    }

    /// Set the analog range of the selected channel.
    pub async fn write_output_range(&self, range: u16) -> BridgeResult<()> {
        check_label_index(PointId::OutputRange, range, OUTPUT_RANGE_LABELS)?;
        let _guard = self.channel_lock.lock().await;
        let channel = self.registry.channel().channel;
        self.exchange(Command::with_payload(
            Mnemonic::WriteOutputRange,
            Payload::ChannelCode {
                channel,
                code: range,
            },
        ))
        .await?;
        self.registry.update_channel(|c| c.range = range);
        Ok(())
    }
}

fn out_of_range_channel(value: i64) -> BridgeError {
    BridgeError::invalid(
        PointId::OutputChan.name(),
        format!("channel {} is outside 1-{}", value, MAX_CHANNEL),
    )
}

fn check_label_index(id: PointId, index: u16, labels: &[&str]) -> BridgeResult<()> {
    if usize::from(index) < labels.len() {
        Ok(())
    } else {
        Err(BridgeError::invalid(
            id.name(),
            format!("enum index {} outside 0..{}", index, labels.len()),
        ))
    }
}

fn decode_label_index(mnemonic: Mnemonic, payload: &str, labels: &[&str]) -> BridgeResult<u16> {
    let code = codec::parse_code(mnemonic, payload)?;
    if usize::from(code) < labels.len() {
        Ok(code)
    } else {
        Err(BridgeError::decode(
            mnemonic.as_str(),
            payload,
            "known enum code",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::PointStatus;
    use crate::transport::{MockConnector, Session};
    use tracing_test::traced_test;

    fn bridge_with(
        responder: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> (Cn8ptBridge, MockConnector) {
        let connector = MockConnector::new(responder);
        let session = Session::new(connector.clone());
        (Cn8ptBridge::new(Arc::new(session)), connector)
    }

    fn echo(request: &str) -> Option<String> {
        Some(request[..4].to_string())
    }

    #[tokio::test]
    async fn test_enable_echo_frame() {
        let (bridge, device) = bridge_with(echo);
        bridge.enable_echo().await.unwrap();
        assert_eq!(device.requests(), vec!["W330 00011"]);
    }

    #[tokio::test]
    async fn test_sensor_startup_publishes_descriptors() {
        let (bridge, _) = bridge_with(|_: &str| Some("R100132".into()));
        bridge.startup(PointId::Sensor).await.unwrap();

        let registry = bridge.registry();
        assert_eq!(registry.value(PointId::Sensor), PointValue::Enum(1));
        assert_eq!(registry.value(PointId::Si1), PointValue::Text(String::new()));
        assert_eq!(
            registry.value(PointId::Si2),
            PointValue::Text("385 Curve, 1000 ohms".into())
        );
    }

    #[tokio::test]
    async fn test_setpoint_startup_strips_sign() {
        let (bridge, _) = bridge_with(|_: &str| Some("R400+025.5".into()));
        bridge.startup(PointId::Setpoint).await.unwrap();
        assert_eq!(
            bridge.registry().value(PointId::Setpoint),
            PointValue::Float(25.5)
        );
    }

    #[tokio::test]
    async fn test_failed_startup_stays_uninitialized() {
        let (bridge, _) = bridge_with(|_: &str| Some("R400garbage".into()));
        let err = bridge.startup(PointId::Setpoint).await.unwrap_err();
        assert!(err.is_decode());
        assert_eq!(
            bridge.registry().status(PointId::Setpoint),
            PointStatus::Uninitialized
        );
        assert_eq!(
            bridge.registry().value(PointId::Setpoint),
            PointValue::Float(0.0)
        );
    }

    #[tokio::test]
    async fn test_setpoint_write_frame() {
        let (bridge, device) = bridge_with(echo);
        bridge
            .write(PointId::Setpoint, PointValue::Float(25.0))
            .await
            .unwrap();
        assert_eq!(device.requests(), vec!["W400 25.0"]);
        assert_eq!(
            bridge.registry().value(PointId::Setpoint),
            PointValue::Float(25.0)
        );
    }

    #[tokio::test]
    async fn test_integer_setpoint_write_is_widened() {
        let (bridge, device) = bridge_with(echo);
        bridge
            .write(PointId::Setpoint, PointValue::Integer(30))
            .await
            .unwrap();
        assert_eq!(device.requests(), vec!["W400 30.0"]);
        assert_eq!(
            bridge.registry().value(PointId::Setpoint),
            PointValue::Float(30.0)
        );
    }

    #[tokio::test]
    async fn test_pid_limit_is_hex() {
        let (bridge, device) = bridge_with(echo);
        bridge
            .write(PointId::PidHiLim, PointValue::Integer(37))
            .await
            .unwrap();
        assert_eq!(device.requests(), vec!["W502 25"]);
    }

    #[tokio::test]
    async fn test_pid_limit_out_of_range_never_sent() {
        let (bridge, device) = bridge_with(echo);
        for bad in [-1, 256] {
            let err = bridge
                .write(PointId::PidHiLim, PointValue::Integer(bad))
                .await
                .unwrap_err();
            assert!(matches!(err, BridgeError::InvalidValue { .. }));
        }
        assert!(device.requests().is_empty());
    }

    #[tokio::test]
    async fn test_read_only_points_reject_writes() {
        let (bridge, device) = bridge_with(echo);
        for id in [
            PointId::Temperature,
            PointId::Sensor,
            PointId::Si1,
            PointId::Si2,
            PointId::OutputType,
        ] {
            let value = id.descriptor().default;
            let err = bridge.write(id, value).await.unwrap_err();
            assert!(matches!(err, BridgeError::ReadOnly(_)), "{}", id);
        }
        assert!(device.requests().is_empty());
    }

    #[tokio::test]
    async fn test_mode_write_uses_current_channel() {
        let (bridge, device) = bridge_with(echo);
        bridge
            .write(PointId::OutputMode, PointValue::Enum(1))
            .await
            .unwrap();
        bridge
            .write(PointId::OutputRange, PointValue::Enum(3))
            .await
            .unwrap();
        assert_eq!(device.requests(), vec!["W600 31", "W660 33"]);
        let channel = bridge.registry().channel();
        assert_eq!((channel.mode, channel.range), (1, 3));
    }

    #[tokio::test]
    async fn test_mode_write_rejects_unknown_index() {
        let (bridge, device) = bridge_with(echo);
        let err = bridge
            .write(PointId::OutputMode, PointValue::Enum(8))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidValue { .. }));
        assert!(device.requests().is_empty());
    }

    #[tokio::test]
    async fn test_channel_write_resyncs_triple() {
        let (bridge, device) = bridge_with(|request: &str| {
            let reply = match &request[..4] {
                "R600" => "R6002",
                "G601" => "G601002",
                "R660" => "R6604",
                other => other,
            };
            Some(reply.to_string())
        });
        bridge
            .write(PointId::OutputChan, PointValue::Integer(1))
            .await
            .unwrap();

        assert_eq!(device.requests(), vec!["R600 1", "G601 1", "R660 1"]);
        assert_eq!(
            bridge.registry().channel(),
            ChannelConfig {
                channel: 1,
                mode: 2,
                range: 4,
                output_type: "SSR output".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_channel_out_of_range_rejected() {
        let (bridge, device) = bridge_with(echo);
        for bad in [0, 10, -3] {
            assert!(bridge
                .write(PointId::OutputChan, PointValue::Integer(bad))
                .await
                .is_err());
        }
        assert!(device.requests().is_empty());
    }

    #[tokio::test]
    async fn test_partial_resync_publishes_nothing() {
        let (bridge, _) = bridge_with(|request: &str| match &request[..4] {
            "R600" => Some("R6001".into()),
            "G601" => Some("G601001".into()),
            _ => None,
        });
        assert!(bridge.select_channel(5).await.is_err());
        assert_eq!(bridge.registry().channel(), ChannelConfig::default());
        assert_eq!(
            bridge.registry().status(PointId::OutputChan),
            PointStatus::Uninitialized
        );
    }

    #[tokio::test]
    async fn test_unknown_mode_code_is_decode_failure() {
        let (bridge, _) = bridge_with(|_: &str| Some("R60009".into()));
        let err = bridge.select_channel(3).await.unwrap_err();
        assert!(err.is_decode());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_poll_failure_marks_stale() {
        let (bridge, device) = bridge_with(|_: &str| Some("G110+021.0".into()));
        bridge.poll(PointId::Temperature).await.unwrap();
        assert!(bridge
            .registry()
            .status(PointId::Temperature)
            .is_synchronized());

        device.set_refusing(true);
        assert!(bridge.poll(PointId::Temperature).await.is_err());
        assert!(bridge.registry().status(PointId::Temperature).is_stale());
        assert!(logs_contain("poll failed; keeping last value"));
        assert_eq!(
            bridge.registry().value(PointId::Temperature),
            PointValue::Float(21.0)
        );

        device.set_refusing(false);
        bridge.poll(PointId::Temperature).await.unwrap();
        assert!(bridge
            .registry()
            .status(PointId::Temperature)
            .is_synchronized());
    }

    #[tokio::test]
    async fn test_points_without_hooks_are_noops() {
        let (bridge, device) = bridge_with(echo);
        bridge.startup(PointId::Temperature).await.unwrap();
        bridge.poll(PointId::Setpoint).await.unwrap();
        assert!(device.requests().is_empty());
    }
}
