//! Legacy bit-packed command codec
//!
//! The legacy instrument protocol packs every command into a single 32-bit
//! little-endian word. The upper 4 bits select the command (the trigger
//! code), the remaining 28 bits carry the operand. `UploadSequence` is the
//! one exception: its word is followed by the raw sequence byte stream,
//! framed out-of-band by the receiver.

use bytes::BufMut;

use crate::error::{ConsoleError, Result};

/// Trigger code for spectrum acquisition
const TAG_TRIGGER_SPECTRUM: u32 = 1;
/// Trigger code for frequency programming
const TAG_SET_FREQUENCY: u32 = 2;
/// Trigger code for attenuation programming
const TAG_SET_ATTENUATION: u32 = 3;
/// Trigger code announcing a sequence upload
const TAG_UPLOAD_SEQUENCE: u32 = 4;
/// Trigger code for gradient offset programming
const TAG_SET_GRADIENT_OFFSET: u32 = 5;
/// Trigger code for 2-D image acquisition
const TAG_TRIGGER_IMAGE: u32 = 6;
/// Trigger code for 1-D projection acquisition
const TAG_TRIGGER_PROJECTION: u32 = 7;

/// Maximum operand value fitting the 28-bit payload field
const MAX_OPERAND: u32 = (1 << 28) - 1;
/// Maximum gradient offset magnitude (20-bit field)
const MAX_GRADIENT_MA: u32 = (1 << 20) - 1;
/// Maximum phase-encode count (12-bit field)
const MAX_PHASE_ENCODES: u32 = (1 << 12) - 1;
/// Attenuation programming granularity in dB per step
const ATTENUATION_STEP_DB: f64 = 0.25;

/// Gradient channel selector
///
/// Z2 is the second-order shim channel present on the gradient amplifier
/// alongside the three imaging axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradientAxis {
    X,
    Y,
    Z,
    Z2,
}

impl GradientAxis {
    /// Wire value of this axis in the gradient offset word
    pub fn code(self) -> u32 {
        match self {
            GradientAxis::X => 0,
            GradientAxis::Y => 1,
            GradientAxis::Z => 2,
            GradientAxis::Z2 => 3,
        }
    }

    /// Convert a wire value back to an axis
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(GradientAxis::X),
            1 => Ok(GradientAxis::Y),
            2 => Ok(GradientAxis::Z),
            3 => Ok(GradientAxis::Z2),
            other => Err(ConsoleError::InvalidAxis(other)),
        }
    }
}

/// Projection axis selector
///
/// Only the three imaging axes may be projected. Validation happens at
/// construction, so an encoded projection command is always well formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionAxis {
    X,
    Y,
    Z,
}

impl ProjectionAxis {
    /// Wire value of this axis in the projection trigger word
    pub fn code(self) -> u32 {
        match self {
            ProjectionAxis::X => 0,
            ProjectionAxis::Y => 1,
            ProjectionAxis::Z => 2,
        }
    }

    /// Convert a wire value back to an axis
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(ProjectionAxis::X),
            1 => Ok(ProjectionAxis::Y),
            2 => Ok(ProjectionAxis::Z),
            other => Err(ConsoleError::InvalidAxis(other)),
        }
    }
}

/// Typed command for the legacy instrument protocol
///
/// Immutable once constructed. Out-of-range operands are rejected by
/// [`Command::word`] before any bytes are produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Program the local oscillator frequency in MHz
    SetFrequency(f64),
    /// Program the transmit attenuation in dB (magnitude, 0.25 dB steps)
    SetAttenuation(f64),
    /// Program one gradient channel's DC offset in milliamps
    SetGradientOffset(GradientAxis, i32),
    /// Upload an assembled pulse-sequence byte stream
    UploadSequence(Vec<u8>),
    /// Trigger a single free-induction-decay readout
    TriggerSpectrum,
    /// Trigger a 1-D projection readout along one axis
    TriggerProjection(ProjectionAxis),
    /// Trigger a 2-D acquisition of `npe` phase-encode lines at the given
    /// repetition time in ms
    TriggerImage(u16, u16),
}

impl Command {
    /// Compute the 32-bit command word
    ///
    /// # Errors
    ///
    /// - [`ConsoleError::InvalidParameter`] - Operand does not fit its bit field
    pub fn word(&self) -> Result<u32> {
        match self {
            Command::SetFrequency(mhz) => {
                let hz = (mhz * 1_000_000.0).round();
                if !(0.0..=MAX_OPERAND as f64).contains(&hz) {
                    return Err(ConsoleError::InvalidParameter(format!(
                        "frequency {mhz} MHz outside encodable range"
                    )));
                }
                Ok((TAG_SET_FREQUENCY << 28) | hz as u32)
            }
            Command::SetAttenuation(db) => {
                let steps = (db.abs() / ATTENUATION_STEP_DB).round();
                if steps > MAX_OPERAND as f64 {
                    return Err(ConsoleError::InvalidParameter(format!(
                        "attenuation {db} dB outside encodable range"
                    )));
                }
                Ok((TAG_SET_ATTENUATION << 28) | steps as u32)
            }
            Command::SetGradientOffset(axis, ma) => {
                let magnitude = ma.unsigned_abs();
                if magnitude > MAX_GRADIENT_MA {
                    return Err(ConsoleError::InvalidParameter(format!(
                        "gradient offset {ma} mA outside encodable range"
                    )));
                }
                let sign = u32::from(*ma < 0);
                Ok((TAG_SET_GRADIENT_OFFSET << 28) | (axis.code() << 24) | (sign << 20) | magnitude)
            }
            Command::UploadSequence(_) => Ok(TAG_UPLOAD_SEQUENCE << 28),
            Command::TriggerSpectrum => Ok(TAG_TRIGGER_SPECTRUM << 28),
            Command::TriggerProjection(axis) => Ok((TAG_TRIGGER_PROJECTION << 28) | axis.code()),
            Command::TriggerImage(npe, tr) => {
                let npe = u32::from(*npe);
                if npe > MAX_PHASE_ENCODES {
                    return Err(ConsoleError::InvalidParameter(format!(
                        "phase-encode count {npe} outside encodable range"
                    )));
                }
                Ok((TAG_TRIGGER_IMAGE << 28) | (npe << 16) | u32::from(*tr))
            }
        }
    }

    /// Encode the command to its full wire byte stream
    ///
    /// For `UploadSequence` the raw sequence bytes follow the command word
    /// with no length prefix.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let word = self.word()?;
        let payload_len = match self {
            Command::UploadSequence(bytes) => bytes.len(),
            _ => 0,
        };
        let mut buf = Vec::with_capacity(4 + payload_len);
        buf.put_u32_le(word);
        if let Command::UploadSequence(bytes) = self {
            buf.extend_from_slice(bytes);
        }
        Ok(buf)
    }

    /// Decode a command word back into a typed command
    ///
    /// `UploadSequence` decodes with an empty payload since its sequence
    /// bytes travel after the word, outside the word itself.
    ///
    /// # Errors
    ///
    /// - [`ConsoleError::InvalidFrame`] - Unknown trigger code
    /// - [`ConsoleError::InvalidAxis`] - Axis field outside the accepted set
    pub fn decode_word(word: u32) -> Result<Self> {
        let operand = word & MAX_OPERAND;
        match word >> 28 {
            TAG_TRIGGER_SPECTRUM => Ok(Command::TriggerSpectrum),
            TAG_SET_FREQUENCY => Ok(Command::SetFrequency(operand as f64 / 1_000_000.0)),
            TAG_SET_ATTENUATION => {
                Ok(Command::SetAttenuation(operand as f64 * ATTENUATION_STEP_DB))
            }
            TAG_UPLOAD_SEQUENCE => Ok(Command::UploadSequence(Vec::new())),
            TAG_SET_GRADIENT_OFFSET => {
                let axis = GradientAxis::from_code(((word >> 24) & 0xF) as u8)?;
                let sign = (word >> 20) & 0xF;
                if sign > 1 {
                    return Err(ConsoleError::InvalidParameter(format!(
                        "gradient sign field {sign} is not 0 or 1"
                    )));
                }
                let magnitude = (word & MAX_GRADIENT_MA) as i32;
                let ma = if sign == 1 { -magnitude } else { magnitude };
                Ok(Command::SetGradientOffset(axis, ma))
            }
            TAG_TRIGGER_IMAGE => {
                let npe = ((word >> 16) & MAX_PHASE_ENCODES) as u16;
                let tr = (word & 0xFFFF) as u16;
                Ok(Command::TriggerImage(npe, tr))
            }
            TAG_TRIGGER_PROJECTION => {
                let axis = ProjectionAxis::from_code((operand & 0xF) as u8)?;
                Ok(Command::TriggerProjection(axis))
            }
            _ => Err(ConsoleError::InvalidFrame {
                expected: 4,
                actual: 4,
            }),
        }
    }
}
