//! Console configuration
//!
//! Default instrument parameters loaded from and saved to TOML. The
//! configuration is the parameter store collaborators hand to the
//! acquisition driver; the driver itself only ever sees explicit values.

use serde::{Deserialize, Serialize};

use crate::error::{ConsoleError, Result};

/// Default instrument parameters for the console
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Instrument server address, host:port
    pub server_addr: String,
    /// Excitation frequency in MHz
    pub excitation_frequency_mhz: f64,
    /// Transmit attenuation in dB
    pub attenuation_db: f64,
    /// Gradient DC offsets in mA, order x, y, z, z2
    pub gradient_offsets_ma: [i32; 4],
    /// Complex samples per readout
    pub sample_count: usize,
    /// Acquisition window in ms
    pub sample_time_ms: f64,
    /// Spectral width in Hz
    pub frequency_range_hz: f64,
    /// Offset into the raw readout where the k-space crop window starts
    pub kspace_crop_offset: usize,
    /// Reconstruction center column, instrument default when absent
    pub recon_center: Option<usize>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            server_addr: "192.168.1.101:1001".to_owned(),
            excitation_frequency_mhz: 20.0971,
            attenuation_db: 10.0,
            gradient_offsets_ma: [0, 0, 0, 0],
            sample_count: 50_000,
            sample_time_ms: 20.0,
            frequency_range_hz: 250_000.0,
            kspace_crop_offset: 0,
            recon_center: None,
        }
    }
}

impl ConsoleConfig {
    /// Parse a configuration from TOML text
    ///
    /// Missing keys fall back to their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ConsoleError::Config(e.to_string()))
    }

    /// Serialize the configuration to TOML text
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| ConsoleError::Config(e.to_string()))
    }
}
