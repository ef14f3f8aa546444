//! AT command handshake for SiK serial modems

use std::io::{self, Write};
use std::thread;
use std::time::{Duration, Instant};

use fpvlink_config::stack_config_sik::CfgSik;
use fpvlink_core::Frequency;
use fpvlink_msgs::sik::SikPort;
use serialport::SerialPort;

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("cannot open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("serial io: {0}")]
    Io(#[from] io::Error),
    #[error("modem did not enter command mode")]
    NoCommandMode,
    #[error("{command} rejected: {reply:?}")]
    Rejected { command: String, reply: String },
}

/// Radio parameters written to the modem EEPROM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SikRadioParams {
    pub baud_rate: u32,
    pub air_speed: u8,
    pub net_id: u8,
    pub tx_power: u8,
    pub min_freq_khz: u32,
    pub max_freq_khz: u32,
    pub num_channels: u8,
}

impl SikRadioParams {
    /// Hopping band centered on `frequency`
    pub fn from_config(cfg: &CfgSik, frequency: Frequency) -> Self {
        let center_khz = frequency.mhz() * 1000;
        let half_span = cfg.span_khz / 2;
        Self {
            baud_rate: cfg.baud_rate,
            air_speed: cfg.air_speed,
            net_id: cfg.net_id,
            tx_power: cfg.tx_power,
            min_freq_khz: center_khz.saturating_sub(half_span),
            max_freq_khz: center_khz + half_span,
            num_channels: cfg.num_channels,
        }
    }

    /// Commands sent once the modem is in command mode, ending with a reboot
    pub fn at_commands(&self) -> Vec<String> {
        vec![
            format!("ATS2={}", self.air_speed),
            format!("ATS3={}", self.net_id),
            format!("ATS4={}", self.tx_power),
            format!("ATS8={}", self.min_freq_khz),
            format!("ATS9={}", self.max_freq_khz),
            format!("ATS10={}", self.num_channels),
            "AT&W".to_string(),
            "ATZ".to_string(),
        ]
    }
}

/// Blocking reconfiguration of one modem. Only ever called from the worker thread.
pub trait SikHandshake: Send {
    fn configure(&mut self, port: &SikPort, params: &SikRadioParams) -> Result<(), HandshakeError>;
}

/// Handshake over the modem's serial port using the Hayes style AT command set
pub struct SerialAtHandshake {
    /// Silence required around the `+++` escape sequence
    guard_time: Duration,
    reply_timeout: Duration,
}

impl SerialAtHandshake {
    pub fn new() -> Self {
        Self {
            guard_time: Duration::from_millis(1100),
            reply_timeout: Duration::from_millis(1000),
        }
    }

    fn read_reply(&self, port: &mut dyn SerialPort) -> io::Result<String> {
        let deadline = Instant::now() + self.reply_timeout;
        let mut reply = Vec::new();
        let mut buf = [0u8; 64];
        while Instant::now() < deadline {
            match port.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    reply.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&reply);
                    if text.contains("OK") || text.contains("ERROR") {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }
        }
        Ok(String::from_utf8_lossy(&reply).trim().to_string())
    }
}

impl Default for SerialAtHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl SikHandshake for SerialAtHandshake {
    fn configure(&mut self, port: &SikPort, params: &SikRadioParams) -> Result<(), HandshakeError> {
        tracing::info!("SiK: configuring {} on {}", port.interface, port.port);
        let mut serial = serialport::new(&port.port, params.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|source| HandshakeError::Open {
                port: port.port.clone(),
                source,
            })?;

        thread::sleep(self.guard_time);
        serial.write_all(b"+++")?;
        thread::sleep(self.guard_time);
        let reply = self.read_reply(&mut *serial)?;
        if !reply.contains("OK") {
            return Err(HandshakeError::NoCommandMode);
        }

        for command in params.at_commands() {
            serial.write_all(command.as_bytes())?;
            serial.write_all(b"\r\n")?;
            if command == "ATZ" {
                // Modem reboots without answering
                break;
            }
            let reply = self.read_reply(&mut *serial)?;
            tracing::trace!("SiK: {} -> {:?}", command, reply);
            if !reply.contains("OK") {
                return Err(HandshakeError::Rejected { command, reply });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_config() {
        let cfg = CfgSik::default();
        let params = SikRadioParams::from_config(&cfg, Frequency(915));
        assert_eq!(params.min_freq_khz, 908_500);
        assert_eq!(params.max_freq_khz, 921_500);

        let cmds = params.at_commands();
        assert_eq!(cmds[0], "ATS2=64");
        assert_eq!(cmds[3], "ATS8=908500");
        assert_eq!(cmds[cmds.len() - 2], "AT&W");
        assert_eq!(cmds.last().map(String::as_str), Some("ATZ"));
    }
}
