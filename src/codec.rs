//! CN8PT command codec
//!
//! Protocol Overview:
//! - Request: `*<MNEMONIC>[ <PAYLOAD>]\r` (ASCII encoded)
//! - Response: `<MNEMONIC><PAYLOAD>` followed by a terminator (echo mode on)
//! - Mnemonic: a fixed 4-character opcode, e.g. `R400` (read setpoint)
//! - Encoding: numbers as signed decimal, limits as two-digit uppercase hex,
//!   per-channel writes as `<channel><code>`
//!
//! The codec is pure: it never touches a socket. [`crate::transport::Session`]
//! frames and strips with these helpers while holding the exchange lock.

use crate::error::{BridgeError, BridgeResult};
use std::fmt;

/// Start-of-frame marker preceding every request.
pub const START_OF_FRAME: char = '*';
/// Termination character ending every request and response.
pub const TERMINATOR: char = '\r';
/// Width of every device opcode.
pub const MNEMONIC_LEN: usize = 4;

/// Device opcodes used by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    /// `R100`: sensor configuration as three digits.
    ReadSensorConfig,
    /// `W330`: communication options; `00011` enables echo.
    WriteEcho,
    /// `R400`: control setpoint.
    ReadSetpoint,
    /// `W400`: control setpoint.
    WriteSetpoint,
    /// `G110`: process temperature.
    ReadTemperature,
    /// `W502`: PID high output limit, hex encoded percentage.
    WritePidHighLimit,
    /// `R600`: output mode of a channel.
    ReadOutputMode,
    /// `W600`: output mode of a channel.
    WriteOutputMode,
    /// `G601`: installed output hardware of a channel.
    ReadOutputType,
    /// `R660`: analog output range of a channel.
    ReadOutputRange,
    /// `W660`: analog output range of a channel.
    WriteOutputRange,
}

impl Mnemonic {
    /// Every opcode the bridge knows about.
    pub const ALL: [Mnemonic; 11] = [
        Mnemonic::ReadSensorConfig,
        Mnemonic::WriteEcho,
        Mnemonic::ReadSetpoint,
        Mnemonic::WriteSetpoint,
        Mnemonic::ReadTemperature,
        Mnemonic::WritePidHighLimit,
        Mnemonic::ReadOutputMode,
        Mnemonic::WriteOutputMode,
        Mnemonic::ReadOutputType,
        Mnemonic::ReadOutputRange,
        Mnemonic::WriteOutputRange,
    ];

    /// Wire representation of the opcode.
    pub fn as_str(self) -> &'static str {
        match self {
            Mnemonic::ReadSensorConfig => "R100",
            Mnemonic::WriteEcho => "W330",
            Mnemonic::ReadSetpoint => "R400",
            Mnemonic::WriteSetpoint => "W400",
            Mnemonic::ReadTemperature => "G110",
            Mnemonic::WritePidHighLimit => "W502",
            Mnemonic::ReadOutputMode => "R600",
            Mnemonic::WriteOutputMode => "W600",
            Mnemonic::ReadOutputType => "G601",
            Mnemonic::ReadOutputRange => "R660",
            Mnemonic::WriteOutputRange => "W660",
        }
    }

    /// Look up an opcode from its wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == s)
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Argument following the mnemonic in a request frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Sent verbatim.
    Raw(String),
    /// Decimal number with at least one fractional digit.
    Decimal(f64),
    /// Two-digit uppercase hexadecimal byte.
    HexByte(u8),
    /// Bare channel selector for per-channel reads.
    Channel(u8),
    /// Channel-prefixed code for per-channel writes.
    ChannelCode {
        /// Output channel (single digit).
        channel: u8,
        /// Device code for the selected option.
        code: u16,
    },
}

impl Payload {
    /// Render the payload exactly as it appears on the wire.
    pub fn render(&self) -> String {
        match self {
            Payload::Raw(s) => s.clone(),
            Payload::Decimal(v) => format_decimal(*v),
            Payload::HexByte(b) => format!("{:02X}", b),
            Payload::Channel(c) => c.to_string(),
            Payload::ChannelCode { channel, code } => channel_payload(*channel, *code),
        }
    }
}

/// One request to the device.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Device opcode.
    pub mnemonic: Mnemonic,
    /// Optional argument.
    pub payload: Option<Payload>,
}

impl Command {
    /// A command without payload.
    pub fn bare(mnemonic: Mnemonic) -> Self {
        Self {
            mnemonic,
            payload: None,
        }
    }

    /// A command carrying a payload.
    pub fn with_payload(mnemonic: Mnemonic, payload: Payload) -> Self {
        Self {
            mnemonic,
            payload: Some(payload),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Some(p) => write!(f, "{} {}", self.mnemonic, p.render()),
            None => write!(f, "{}", self.mnemonic),
        }
    }
}

/// Build the request frame for a command.
///
/// `*R400\r` without payload, `*W400 25.0\r` with one.
pub fn encode_frame(command: &Command) -> String {
    format!("{}{}{}", START_OF_FRAME, command, TERMINATOR)
}

/// Strip the echoed mnemonic and the trailing terminator/whitespace from a raw response.
///
/// Exactly `mnemonic.len()` leading bytes are removed whatever they contain. The caller
/// decides what to do when the echo does not match.
pub fn decode_response(mnemonic: &str, raw: &str) -> BridgeResult<String> {
    let trimmed = raw.trim_end();
    if trimmed.len() < mnemonic.len() {
        return Err(BridgeError::ShortResponse {
            mnemonic: mnemonic.to_string(),
            received: raw.to_string(),
        });
    }
    trimmed
        .get(mnemonic.len()..)
        .map(str::to_string)
        .ok_or_else(|| BridgeError::transport(mnemonic, format!("malformed response {:?}", raw)))
}

/// Whether the response starts with the mnemonic that was sent.
pub fn echo_matches(mnemonic: &str, raw: &str) -> bool {
    raw.starts_with(mnemonic)
}

/// Parse a signed decimal such as `+073.50` or `-012.3`.
///
/// A single leading `+` is discarded; a leading `-` is kept so negative readings
/// stay negative.
pub fn parse_signed_decimal(mnemonic: Mnemonic, payload: &str) -> BridgeResult<f64> {
    let s = payload.trim();
    let s = s.strip_prefix('+').unwrap_or(s);
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(BridgeError::decode(mnemonic.as_str(), payload, "signed decimal")),
    }
}

/// Parse a small non-negative integer code such as `03`.
pub fn parse_code(mnemonic: Mnemonic, payload: &str) -> BridgeResult<u16> {
    let s = payload.trim();
    let s = s.strip_prefix('+').unwrap_or(s);
    s.parse::<u16>()
        .map_err(|_| BridgeError::decode(mnemonic.as_str(), payload, "integer code"))
}

/// Encode a limit as two-digit uppercase hexadecimal, rejecting values outside 0–255.
pub fn encode_hex_byte(value: i64) -> BridgeResult<Payload> {
    u8::try_from(value)
        .map(Payload::HexByte)
        .map_err(|_| BridgeError::invalid("hex byte", format!("{} is outside 0-255", value)))
}

/// Composite per-channel payload `<channel><code>`.
pub fn channel_payload(channel: u8, code: u16) -> String {
    format!("{}{}", channel, code)
}

/// Decimal rendering with at least one fractional digit (`25` becomes `25.0`).
pub fn format_decimal(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_without_payload() {
        let cmd = Command::bare(Mnemonic::ReadTemperature);
        assert_eq!(encode_frame(&cmd), "*G110\r");
    }

    #[test]
    fn test_frame_with_payload() {
        let cmd = Command::with_payload(Mnemonic::WriteEcho, Payload::Raw("00011".into()));
        assert_eq!(encode_frame(&cmd), "*W330 00011\r");

        let cmd = Command::with_payload(
            Mnemonic::WriteOutputMode,
            Payload::ChannelCode { channel: 3, code: 1 },
        );
        assert_eq!(encode_frame(&cmd), "*W600 31\r");

        let cmd = Command::with_payload(Mnemonic::ReadOutputRange, Payload::Channel(2));
        assert_eq!(encode_frame(&cmd), "*R660 2\r");
    }

    #[test]
    fn test_mnemonics_are_four_chars_and_roundtrip() {
        for m in Mnemonic::ALL {
            assert_eq!(m.as_str().len(), MNEMONIC_LEN);
            assert_eq!(Mnemonic::parse(m.as_str()), Some(m));
        }
        assert_eq!(Mnemonic::parse("X999"), None);
    }

    #[test]
    fn test_decode_strips_mnemonic_and_terminator() {
        assert_eq!(decode_response("G110", "G110+073.50\r").unwrap(), "+073.50");
        assert_eq!(decode_response("R400", "R400+025.0 \r\n").unwrap(), "+025.0");
        assert_eq!(decode_response("W400", "W400\r").unwrap(), "");
    }

    #[test]
    fn test_decode_strips_by_length_regardless_of_content() {
        // echo does not match, still exactly four bytes are removed
        assert_eq!(decode_response("R100", "XXXX132\r").unwrap(), "132");
        assert!(!echo_matches("R100", "XXXX132\r"));
        assert!(echo_matches("R100", "R100132\r"));
    }

    #[test]
    fn test_decode_short_response() {
        let err = decode_response("R600", "R6\r").unwrap_err();
        assert!(matches!(err, BridgeError::ShortResponse { .. }));
        assert!(err.is_transport());

        let err = decode_response("R600", "").unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_temperature_sign_stripped() {
        let t = parse_signed_decimal(Mnemonic::ReadTemperature, "+073.50").unwrap();
        assert!((t - 73.5).abs() < 1e-9);
    }

    #[test]
    fn test_negative_reading_kept_negative() {
        let t = parse_signed_decimal(Mnemonic::ReadTemperature, "-012.25").unwrap();
        assert!((t + 12.25).abs() < 1e-9);
    }

    #[test]
    fn test_decimal_rejects_garbage() {
        for bad in ["", "+", "abc", "1.0.0", "NaN", "inf"] {
            let err = parse_signed_decimal(Mnemonic::ReadSetpoint, bad).unwrap_err();
            assert!(err.is_decode(), "{bad:?} should not decode");
        }
    }

    #[test]
    fn test_parse_code() {
        assert_eq!(parse_code(Mnemonic::ReadOutputMode, "03").unwrap(), 3);
        assert_eq!(parse_code(Mnemonic::ReadOutputRange, " 1 ").unwrap(), 1);
        assert!(parse_code(Mnemonic::ReadOutputMode, "-1").is_err());
        assert!(parse_code(Mnemonic::ReadOutputMode, "x").is_err());
    }

    #[test]
    fn test_hex_limit() {
        assert_eq!(encode_hex_byte(37).unwrap().render(), "25");
        assert_eq!(encode_hex_byte(0).unwrap().render(), "00");
        assert_eq!(encode_hex_byte(255).unwrap().render(), "FF");
        assert_eq!(encode_hex_byte(100).unwrap().render(), "64");
        assert!(encode_hex_byte(256).is_err());
        assert!(encode_hex_byte(-1).is_err());
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(25.0), "25.0");
        assert_eq!(format_decimal(-3.0), "-3.0");
        assert_eq!(format_decimal(73.25), "73.25");
    }
}
