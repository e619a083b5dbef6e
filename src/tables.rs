//! Translation tables between device codes and display labels.
//!
//! Every lookup here is total: an unknown code, or an unknown context selector,
//! resolves to the documented fallback instead of failing the exchange.

use crate::codec::Mnemonic;
use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};

/// Fallback label for an unrecognised output hardware code.
pub const NO_OUTPUT: &str = "No Output";

/// Labels of the sensor-type enumeration, indexed by device code.
pub const SENSOR_TYPE_LABELS: &[&str] = &["thermocouple", "rtd", "process input", "thermistor"];

/// Labels of the output-mode enumeration, indexed by device code.
pub const OUTPUT_MODE_LABELS: &[&str] = &[
    "off",
    "pid",
    "on-off",
    "retransmit",
    "alarm1",
    "alarm2",
    "ramp soak RE",
    "ramp soak SE",
];

/// Labels of the analog output range enumeration, indexed by device code.
pub const OUTPUT_RANGE_LABELS: &[&str] = &["0-10V", "0-5V", "0-20V", "4-20V", "0-24V"];

/// Input sensor family reported in the first digit of the sensor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorType {
    /// Code 0.
    Thermocouple,
    /// Code 1.
    Rtd,
    /// Code 2.
    ProcessInput,
    /// Code 3.
    Thermistor,
}

impl SensorType {
    /// Map a device code to a sensor type.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SensorType::Thermocouple),
            1 => Some(SensorType::Rtd),
            2 => Some(SensorType::ProcessInput),
            3 => Some(SensorType::Thermistor),
            _ => None,
        }
    }

    /// Device code, which is also the enum index exposed to hosts.
    pub fn code(self) -> u8 {
        match self {
            SensorType::Thermocouple => 0,
            SensorType::Rtd => 1,
            SensorType::ProcessInput => 2,
            SensorType::Thermistor => 3,
        }
    }

    /// Human readable label.
    pub fn label(self) -> &'static str {
        SENSOR_TYPE_LABELS[self.code() as usize]
    }
}

/// First sensor descriptor: thermocouple type, RTD wiring, process input range
/// or thermistor value, depending on the sensor type.
pub fn sensor_info_1(sensor_type: u8, code: u8) -> &'static str {
    match (sensor_type, code) {
        (0, 0) => "J",
        (0, 1) => "K",
        (0, 2) => "T",
        (0, 3) => "E",
        (0, 4) => "N",
        (0, 6) => "R",
        (0, 7) => "S",
        (0, 8) => "B",
        (0, 9) => "C",
        (1, 0) => "2 Wire",
        (1, 1) => "3 Wire",
        (1, 2) => "4 Wire",
        (2, 0) => "4-20 mA",
        (2, 1) => "0-24 mA",
        (2, 5) => "+/- 10 Vdc",
        (2, 6) => "+/- 1.0 Vdc",
        (2, 7) => "+/- 0.1 Vdc",
        (3, 0) => "2.25 K",
        (3, 1) => "5 K",
        (3, 2) => "10 K",
        _ => "",
    }
}

/// Second sensor descriptor: RTD curve or process input scaling mode.
pub fn sensor_info_2(sensor_type: u8, code: u8) -> &'static str {
    match (sensor_type, code) {
        (1, 0) => "385 Curve, 100 ohms",
        (1, 1) => "385 Curve, 500 ohms",
        (1, 2) => "385 Curve, 1000 ohms",
        (1, 3) => "392 Curve, 100 ohms",
        (1, 4) => "3916 Curve, 100 ohms",
        (2, 0) => "Live",
        (2, 1) => "Manual",
        _ => "",
    }
}

/// Label for the three-character output hardware code reported by `G601`.
pub fn output_type_label(code: &str) -> &'static str {
    match code.trim() {
        "000" => "No Output",
        "001" => "Single Poll Relay",
        "002" => "SSR output",
        "004" => "Double Poll Relay",
        "008" => "DC Pulse output",
        "010" => "Analog Output",
        "020" => "Isolated Analog Output",
        _ => NO_OUTPUT,
    }
}

/// Decoded `R100` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorConfig {
    /// Sensor family.
    pub sensor_type: SensorType,
    /// First descriptor (may be empty).
    pub info_1: &'static str,
    /// Second descriptor (may be empty).
    pub info_2: &'static str,
}

impl SensorConfig {
    /// Decode the three-digit sensor configuration payload.
    ///
    /// Digit 0 is the sensor type, digit 1 indexes the first descriptor table and
    /// digit 2 the second. Unknown descriptor codes give empty labels; a missing digit
    /// or an unknown sensor type is a decode failure.
    pub fn decode(payload: &str) -> BridgeResult<Self> {
        let fail =
            || BridgeError::decode(Mnemonic::ReadSensorConfig.as_str(), payload, "three digits");
        let digits: Vec<u8> = payload
            .trim()
            .chars()
            .take(3)
            .map(|c| c.to_digit(10).map(|d| d as u8))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(fail)?;
        let &[stype, si1, si2] = digits.as_slice() else {
            return Err(fail());
        };
        let sensor_type = SensorType::from_code(stype).ok_or_else(fail)?;
        Ok(Self {
            sensor_type,
            info_1: sensor_info_1(stype, si1),
            info_2: sensor_info_2(stype, si2),
        })
    }
}
