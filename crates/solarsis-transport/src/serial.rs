use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};

use crate::error::{Result, TransportError};
use crate::traits::LinkOpener;

/// Serial port settings.
///
/// Inverters on this protocol family talk 8N1; only the path and speed
/// normally change between deployments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub path: String,
    /// Link speed in baud.
    pub baud_rate: u32,
    /// Data bits (5-8).
    pub data_bits: u8,
    /// Stop bits (1 or 2).
    pub stop_bits: u8,
    /// `none`, `even` or `odd`.
    pub parity: String,
    /// Per-operation timeout handed to the OS driver.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: "/dev/ttyUSB0".to_string(),
            baud_rate: 2400,
            data_bits: 8,
            stop_bits: 1,
            parity: "none".to_string(),
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Reject settings the serial driver cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(TransportError::InvalidConfig(
                "serial port path must not be empty".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(TransportError::InvalidConfig(
                "baud rate must be greater than zero".to_string(),
            ));
        }
        data_bits(self.data_bits)?;
        stop_bits(self.stop_bits)?;
        parity(&self.parity)?;
        Ok(())
    }
}

/// Opens a `tokio-serial` stream for every link (re)open.
#[derive(Debug, Clone)]
pub struct SerialLink {
    config: SerialConfig,
}

impl SerialLink {
    /// Create a serial link opener after validating the settings.
    pub fn new(config: SerialConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Serial settings in use.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }
}

impl LinkOpener for SerialLink {
    type Stream = SerialStream;

    fn open(&mut self) -> Result<Self::Stream> {
        let builder = tokio_serial::new(&self.config.path, self.config.baud_rate)
            .data_bits(data_bits(self.config.data_bits)?)
            .stop_bits(stop_bits(self.config.stop_bits)?)
            .parity(parity(&self.config.parity)?)
            .timeout(self.config.timeout);

        let stream = SerialStream::open(&builder).map_err(|err| TransportError::Open {
            link: self.config.path.clone(),
            message: err.to_string(),
        })?;
        tracing::info!(
            link = %self.config.path,
            baud = self.config.baud_rate,
            "serial port opened"
        );
        Ok(stream)
    }

    fn describe(&self) -> String {
        format!("serial:{}", self.config.path)
    }
}

fn data_bits(bits: u8) -> Result<DataBits> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(TransportError::InvalidConfig(format!(
            "data bits must be 5, 6, 7 or 8 (got {other})"
        ))),
    }
}

fn stop_bits(bits: u8) -> Result<StopBits> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(TransportError::InvalidConfig(format!(
            "stop bits must be 1 or 2 (got {other})"
        ))),
    }
}

fn parity(name: &str) -> Result<Parity> {
    match name.to_ascii_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "even" => Ok(Parity::Even),
        "odd" => Ok(Parity::Odd),
        other => Err(TransportError::InvalidConfig(format!(
            "parity must be none, even or odd (got {other})"
        ))),
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
