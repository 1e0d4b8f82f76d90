//! Broadcaster configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::nmea::SentenceKind;
use crate::transport::TransportMode;

/// Conventional port for NMEA-0183 over IP.
pub const DEFAULT_PORT: u16 = 10110;
pub const DEFAULT_DELAY_SECS: f64 = 0.1;
pub const DEFAULT_ACCEPT_TIMEOUT_SECS: f64 = 60.0;
pub const DEFAULT_WRITE_TIMEOUT_SECS: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BroadcastConfig {
    /// UDP destination, or local bind address in TCP mode
    pub address: String,
    pub port: u16,
    /// Seconds to wait between cycles
    pub delay: f64,
    pub mode: TransportMode,
    /// Seconds to wait for the TCP peer
    pub accept_timeout: f64,
    /// Seconds a single send may block
    pub write_timeout: f64,
    /// Allow sending to a broadcast address
    pub broadcast: bool,
    pub sentences: Vec<SentenceKind>,
    /// Stop after this many cycles; run until cancelled when unset
    pub cycles: Option<u64>,
    /// I2C bus the instruments are attached to
    pub i2c_bus: u8,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            delay: DEFAULT_DELAY_SECS,
            mode: TransportMode::Udp,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT_SECS,
            write_timeout: DEFAULT_WRITE_TIMEOUT_SECS,
            broadcast: true,
            sentences: SentenceKind::DEFAULT_CYCLE.to_vec(),
            cycles: None,
            i2c_bus: 1,
        }
    }
}

impl BroadcastConfig {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml_edit::de::from_str(text)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(Error::Config("address must not be empty".into()));
        }
        if Duration::try_from_secs_f64(self.delay).is_err() {
            return Err(Error::Config(format!("invalid delay {}", self.delay)));
        }
        for (name, secs) in [
            ("accept_timeout", self.accept_timeout),
            ("write_timeout", self.write_timeout),
        ] {
            if secs <= 0.0 || Duration::try_from_secs_f64(secs).is_err() {
                return Err(Error::Config(format!("invalid {name} {secs}")));
            }
        }
        if self.sentences.is_empty() {
            return Err(Error::Config("at least one sentence type is required".into()));
        }
        Ok(())
    }

    /// Selected sentences in transmit order, each at most once.
    pub fn cycle_sentences(&self) -> Vec<SentenceKind> {
        SentenceKind::ORDER
            .into_iter()
            .filter(|kind| self.sentences.contains(kind))
            .collect()
    }

    pub fn delay_duration(&self) -> Duration {
        seconds(self.delay, DEFAULT_DELAY_SECS)
    }

    pub fn accept_timeout_duration(&self) -> Duration {
        seconds(self.accept_timeout, DEFAULT_ACCEPT_TIMEOUT_SECS)
    }

    pub fn write_timeout_duration(&self) -> Duration {
        seconds(self.write_timeout, DEFAULT_WRITE_TIMEOUT_SECS)
    }
}

/// Only reachable with the default for a config that failed `validate`.
fn seconds(secs: f64, default: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_else(|_| Duration::from_secs_f64(default))
}
