//! Simulated CN8PT controller
//!
//! Answers request lines the way the controller does, so the bridge can run
//! without hardware. The same model backs the in-memory [`MockConnector`] used in
//! tests and a real TCP listener for `--simulate`.
//!
//! Behavior:
//! - Echo is off until `W330` enables it; without echo the payload comes back bare.
//! - Temperature moves 10% of the way toward the setpoint on every `G110`.
//! - Nine output channels, each with its own mode, range and output hardware code.
//! - Malformed or unknown requests are answered with `?`.

use crate::bridge::MAX_CHANNEL;
use crate::codec::{Mnemonic, START_OF_FRAME, TERMINATOR};
use crate::transport::MockConnector;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Per-channel output state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimChannel {
    /// Output mode code.
    pub mode: u16,
    /// Analog range code.
    pub range: u16,
    /// Output hardware code as reported by `G601` (e.g. 10 → `"010"`).
    pub hardware: u16,
}

#[derive(Debug)]
struct SimState {
    echo: bool,
    sensor_config: String,
    setpoint: f64,
    temperature: f64,
    pid_high_limit: u8,
    channels: [SimChannel; MAX_CHANNEL as usize],
}

impl Default for SimState {
    fn default() -> Self {
        let mut channels = [SimChannel {
            mode: 0,
            range: 0,
            hardware: 0,
        }; MAX_CHANNEL as usize];
        // Channel 1: relay in PID; channel 3: analog output in PID, 4-20V
        channels[0] = SimChannel {
            mode: 1,
            range: 0,
            hardware: 1,
        };
        channels[2] = SimChannel {
            mode: 1,
            range: 3,
            hardware: 10,
        };
        Self {
            echo: false,
            sensor_config: "132".to_string(),
            setpoint: 25.0,
            temperature: 21.0,
            pid_high_limit: 100,
            channels,
        }
    }
}

/// In-process model of one controller.
#[derive(Debug, Clone, Default)]
pub struct SimulatedCn8pt {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedCn8pt {
    /// Create a controller in its power-on state.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether echo has been enabled.
    pub fn echo_enabled(&self) -> bool {
        self.state().echo
    }

    /// Current setpoint.
    pub fn setpoint(&self) -> f64 {
        self.state().setpoint
    }

    /// Current process temperature.
    pub fn temperature(&self) -> f64 {
        self.state().temperature
    }

    /// Force the process temperature.
    pub fn set_temperature(&self, value: f64) {
        self.state().temperature = value;
    }

    /// Replace the three-digit sensor configuration.
    pub fn set_sensor_config(&self, digits: &str) {
        self.state().sensor_config = digits.to_string();
    }

    /// PID high output limit.
    pub fn pid_high_limit(&self) -> u8 {
        self.state().pid_high_limit
    }

    /// State of output channel `channel` (1-based).
    pub fn channel(&self, channel: u8) -> Option<SimChannel> {
        let index = usize::from(channel).checked_sub(1)?;
        self.state().channels.get(index).copied()
    }

    /// Answer one request line (without start-of-frame marker and terminator).
    ///
    /// Returns the response without terminator.
    pub fn respond(&self, line: &str) -> Option<String> {
        let Some(mnemonic) = line.get(..4).and_then(Mnemonic::parse) else {
            warn!(request = line, "unknown command");
            return Some("?".to_string());
        };
        let arg = line.get(4..).unwrap_or("").trim();

        let mut state = self.state();
        let payload = match state.apply(mnemonic, arg) {
            Some(payload) => payload,
            None => {
                warn!(request = line, "rejected request");
                "?".to_string()
            }
        };
        debug!(request = line, payload = %payload, "simulated exchange");
        if state.echo {
            Some(format!("{}{}", mnemonic.as_str(), payload))
        } else {
            Some(payload)
        }
    }

    /// Connector that talks to this model in memory.
    pub fn connector(&self) -> MockConnector {
        let device = self.clone();
        MockConnector::new(move |line: &str| device.respond(line))
    }

    /// Accept TCP connections and answer one request per connection until the
    /// listener fails.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        info!(address = %listener.local_addr()?, "simulated CN8PT listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let device = self.clone();
            tokio::spawn(async move {
                if let Err(e) = device.handle_connection(stream).await {
                    debug!(%peer, error = %e, "simulated connection ended with error");
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> std::io::Result<()> {
        let mut request = Vec::with_capacity(32);
        let mut byte = [0u8; 1];
        loop {
            if stream.read(&mut byte).await? == 0 {
                return Ok(());
            }
            if byte[0] == TERMINATOR as u8 {
                break;
            }
            request.push(byte[0]);
        }
        let text = String::from_utf8_lossy(&request).into_owned();
        let line = text.strip_prefix(START_OF_FRAME).unwrap_or(text.as_str());
        if let Some(response) = self.respond(line) {
            stream
                .write_all(format!("{}{}", response, TERMINATOR).as_bytes())
                .await?;
            stream.flush().await?;
        }
        Ok(())
    }
}

impl SimState {
    /// Apply a request; `None` means it was rejected.
    fn apply(&mut self, mnemonic: Mnemonic, arg: &str) -> Option<String> {
        match mnemonic {
            Mnemonic::WriteEcho => {
                self.echo = arg.ends_with('1');
                Some(String::new())
            }
            Mnemonic::ReadSensorConfig => Some(self.sensor_config.clone()),
            Mnemonic::ReadSetpoint => Some(format!("{:+06.1}", self.setpoint)),
            Mnemonic::WriteSetpoint => {
                self.setpoint = arg.parse().ok().filter(|v: &f64| v.is_finite())?;
                Some(String::new())
            }
            Mnemonic::ReadTemperature => {
                self.temperature += (self.setpoint - self.temperature) * 0.1;
                Some(format!("{:+07.2}", self.temperature))
            }
            Mnemonic::WritePidHighLimit => {
                self.pid_high_limit = u8::from_str_radix(arg, 16).ok()?;
                Some(String::new())
            }
            Mnemonic::ReadOutputMode => Some(self.channel_mut(arg)?.mode.to_string()),
            Mnemonic::ReadOutputType => Some(format!("{:03}", self.channel_mut(arg)?.hardware)),
            Mnemonic::ReadOutputRange => Some(self.channel_mut(arg)?.range.to_string()),
            Mnemonic::WriteOutputMode => {
                let (channel, code) = split_channel_code(arg)?;
                self.channel_mut(channel)?.mode = code;
                Some(String::new())
            }
            Mnemonic::WriteOutputRange => {
                let (channel, code) = split_channel_code(arg)?;
                self.channel_mut(channel)?.range = code;
                Some(String::new())
            }
        }
    }

    fn channel_mut(&mut self, arg: &str) -> Option<&mut SimChannel> {
        let channel: usize = arg.parse().ok()?;
        self.channels.get_mut(channel.checked_sub(1)?)
    }
}

/// `"31"` → channel `"3"`, code 1.
fn split_channel_code(arg: &str) -> Option<(&str, u16)> {
    let channel = arg.get(..1)?;
    let code = arg.get(1..)?.parse().ok()?;
    Some((channel, code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_off_until_enabled() {
        let device = SimulatedCn8pt::new();
        assert_eq!(device.respond("R400").as_deref(), Some("+025.0"));
        assert_eq!(device.respond("W330 00011").as_deref(), Some("W330"));
        assert!(device.echo_enabled());
        assert_eq!(device.respond("R400").as_deref(), Some("R400+025.0"));
    }

    #[test]
    fn test_temperature_approaches_setpoint() {
        let device = SimulatedCn8pt::new();
        device.respond("W330 00011");
        device.set_temperature(20.0);
        device.respond("W400 30.0");
        assert_eq!(device.respond("G110").as_deref(), Some("G110+021.00"));
        assert!(device.temperature() > 20.0 && device.temperature() < 30.0);
    }

    #[test]
    fn test_channel_commands() {
        let device = SimulatedCn8pt::new();
        device.respond("W330 00011");
        assert_eq!(device.respond("R600 3").as_deref(), Some("R6001"));
        assert_eq!(device.respond("G601 3").as_deref(), Some("G601010"));
        assert_eq!(device.respond("R660 3").as_deref(), Some("R6603"));

        device.respond("W600 25");
        device.respond("W660 24");
        assert_eq!(
            device.channel(2),
            Some(SimChannel {
                mode: 5,
                range: 4,
                hardware: 0
            })
        );
    }

    #[test]
    fn test_pid_limit_hex() {
        let device = SimulatedCn8pt::new();
        device.respond("W502 25");
        assert_eq!(device.pid_high_limit(), 37);
    }

    #[test]
    fn test_rejected_requests() {
        let device = SimulatedCn8pt::new();
        device.respond("W330 00011");
        assert_eq!(device.respond("R600 0").as_deref(), Some("R600?"));
        assert_eq!(device.respond("W400 warm").as_deref(), Some("W400?"));
        assert_eq!(device.respond("X999").as_deref(), Some("?"));
        assert_eq!(device.setpoint(), 25.0);
    }
}
