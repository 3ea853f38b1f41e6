//! Structured control packet codec
//!
//! The structured protocol carries richer exchanges than the bit-packed
//! legacy words: a 5-element ordered record
//! `[command_code, packet_index, reserved, version_word, payload]` where
//! `payload` is a string-keyed map. Records are serialized with the
//! MessagePack value model, so both sides can decode them without a shared
//! schema.

use rmpv::Value;

use crate::error::{ConsoleError, Result};

/// Command selector of a structured control packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Parameter write and/or acquisition request
    Request,
    /// Immediately halt the running sequence
    EmergencyStop,
    /// Ask the instrument server to shut down
    CloseServer,
    /// Server reply to a previous request
    Reply,
}

impl ControlCommand {
    /// Wire value of this command
    pub fn code(self) -> u64 {
        match self {
            ControlCommand::Request => 0,
            ControlCommand::EmergencyStop => 1,
            ControlCommand::CloseServer => 2,
            ControlCommand::Reply => 128,
        }
    }

    /// Convert a wire value back to a command
    pub fn from_code(code: u64) -> Result<Self> {
        match code {
            0 => Ok(ControlCommand::Request),
            1 => Ok(ControlCommand::EmergencyStop),
            2 => Ok(ControlCommand::CloseServer),
            128 => Ok(ControlCommand::Reply),
            other => Err(ConsoleError::Packet(format!(
                "unknown command code {other}"
            ))),
        }
    }
}

/// Three-component protocol version
///
/// Packs into a single integer as `major<<16 | minor<<8 | patch`. The byte
/// fields enforce the per-component `< 256` constraint at the type level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl ProtocolVersion {
    pub fn new(major: u8, minor: u8, patch: u8) -> Self {
        ProtocolVersion {
            major,
            minor,
            patch,
        }
    }

    /// Pack the three components into one integer
    pub fn word(self) -> u32 {
        (u32::from(self.major) << 16) | (u32::from(self.minor) << 8) | u32::from(self.patch)
    }

    /// Unpack a version word
    ///
    /// # Errors
    ///
    /// - [`ConsoleError::Packet`] - Bits above the three byte components are set
    pub fn from_word(word: u32) -> Result<Self> {
        if word > 0x00FF_FFFF {
            return Err(ConsoleError::Packet(format!(
                "version word {word:#x} exceeds three byte components"
            )));
        }
        Ok(ProtocolVersion {
            major: (word >> 16) as u8,
            minor: (word >> 8) as u8,
            patch: word as u8,
        })
    }
}

/// One structured control packet
///
/// The payload is an ordered string-keyed map; typical keys are `lo_freq`,
/// `rx_rate`, `tx_size`, `grad_offs_x`, `seq_data`, and `acq`.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlPacket {
    pub command: ControlCommand,
    pub packet_index: u64,
    pub reserved: u64,
    pub version: ProtocolVersion,
    pub payload: Vec<(String, Value)>,
}

impl ControlPacket {
    /// Create a request packet with an empty payload
    pub fn request(packet_index: u64, version: ProtocolVersion) -> Self {
        ControlPacket {
            command: ControlCommand::Request,
            packet_index,
            reserved: 0,
            version,
            payload: Vec::new(),
        }
    }

    /// Append one payload entry, consuming and returning the packet
    pub fn with_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.push((key.into(), value));
        self
    }

    /// Serialize the packet to its wire byte stream
    pub fn encode(&self) -> Result<Vec<u8>> {
        let map = self
            .payload
            .iter()
            .map(|(k, v)| (Value::String(k.clone().into()), v.clone()))
            .collect();
        let record = Value::Array(vec![
            Value::Integer(self.command.code().into()),
            Value::Integer(self.packet_index.into()),
            Value::Integer(self.reserved.into()),
            Value::Integer(u64::from(self.version.word()).into()),
            Value::Map(map),
        ]);
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &record)
            .map_err(|e| ConsoleError::Packet(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a packet from its wire byte stream
    ///
    /// # Errors
    ///
    /// - [`ConsoleError::Packet`] - Truncated stream, wrong record shape,
    ///   unknown command code, or non-string payload keys
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        let record = rmpv::decode::read_value(&mut data)
            .map_err(|e| ConsoleError::Packet(e.to_string()))?;
        let elements = record
            .as_array()
            .ok_or_else(|| ConsoleError::Packet("record is not an array".into()))?;
        if elements.len() != 5 {
            return Err(ConsoleError::Packet(format!(
                "record has {} elements, expected 5",
                elements.len()
            )));
        }

        let int_at = |idx: usize, name: &str| -> Result<u64> {
            elements[idx]
                .as_u64()
                .ok_or_else(|| ConsoleError::Packet(format!("{name} is not an unsigned integer")))
        };
        let command = ControlCommand::from_code(int_at(0, "command code")?)?;
        let packet_index = int_at(1, "packet index")?;
        let reserved = int_at(2, "reserved field")?;
        let version_word = int_at(3, "version word")?;
        if version_word > u64::from(u32::MAX) {
            return Err(ConsoleError::Packet(format!(
                "version word {version_word:#x} overflows 32 bits"
            )));
        }
        let version = ProtocolVersion::from_word(version_word as u32)?;

        let map = elements[4]
            .as_map()
            .ok_or_else(|| ConsoleError::Packet("payload is not a map".into()))?;
        let mut payload = Vec::with_capacity(map.len());
        for (key, value) in map {
            let key = key
                .as_str()
                .ok_or_else(|| ConsoleError::Packet("payload key is not a string".into()))?;
            payload.push((key.to_owned(), value.clone()));
        }

        Ok(ControlPacket {
            command,
            packet_index,
            reserved,
            version,
            payload,
        })
    }
}
