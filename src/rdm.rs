//! RDM (E1.20) frame surface checks.
//!
//! The transceiver validates the outer shell of every RDM frame it receives
//! before handing it up for dispatch: start codes, length fields, and the
//! additive checksum. Parameter semantics live above this crate.

/// The RDM start code.
pub const RDM_START_CODE: u8 = 0xCC;

/// The RDM sub-start code, slot 1 of every request and response.
pub const SUB_START_CODE: u8 = 0x01;

/// Message length of a frame with no parameter data: slots 0 through 23.
pub const MIN_MESSAGE_LENGTH: u8 = 24;

/// Bytes in a complete frame beyond the message length: the two checksum
/// slots.
pub const CHECKSUM_LENGTH: usize = 2;

/// The shortest complete RDM frame on the wire.
pub const MIN_FRAME_SIZE: usize = MIN_MESSAGE_LENGTH as usize + CHECKSUM_LENGTH;

/// Offset of the parameter-data-length slot.
pub const PARAM_DATA_LENGTH_OFFSET: usize = 23;

/// A 6-byte RDM unique identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Uid {
    /// ESTA manufacturer ID.
    pub manufacturer_id: u16,
    /// Device ID, unique within the manufacturer.
    pub device_id: u32,
}

impl Uid {
    /// Builds a UID from its wire form.
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        Self {
            manufacturer_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            device_id: u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        }
    }

    /// Returns the wire form, big-endian as transmitted.
    pub fn to_bytes(&self) -> [u8; 6] {
        let m = self.manufacturer_id.to_be_bytes();
        let d = self.device_id.to_be_bytes();
        [m[0], m[1], d[0], d[1], d[2], d[3]]
    }
}

/// Why a received RDM frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum FrameFault {
    /// Fewer bytes than the smallest legal frame.
    TooShort,
    /// Slot 1 was not the sub-start code.
    SubStartCode,
    /// The message-length slot was below the minimum.
    MessageLength,
    /// The byte count on the wire disagreed with the message length.
    LengthMismatch,
    /// The param-data-length slot disagreed with the message length.
    ParamDataLength,
    /// The additive checksum did not match.
    Checksum,
}

/// Validates the shell of a complete RDM frame.
///
/// `frame` starts at the 0xCC start code and includes the checksum slots.
/// Checks run in the order a receiver can apply them, so the first fault
/// encountered on the wire is the one reported.
pub fn validate_frame(frame: &[u8]) -> Result<(), FrameFault> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(FrameFault::TooShort);
    }
    if frame[1] != SUB_START_CODE {
        return Err(FrameFault::SubStartCode);
    }
    let message_length = frame[2];
    if message_length < MIN_MESSAGE_LENGTH {
        return Err(FrameFault::MessageLength);
    }
    if frame.len() != message_length as usize + CHECKSUM_LENGTH {
        return Err(FrameFault::LengthMismatch);
    }
    let param_data_length = frame[PARAM_DATA_LENGTH_OFFSET];
    if message_length != MIN_MESSAGE_LENGTH + param_data_length {
        return Err(FrameFault::ParamDataLength);
    }
    let declared = u16::from_be_bytes([
        frame[message_length as usize],
        frame[message_length as usize + 1],
    ]);
    if checksum(&frame[..message_length as usize]) != declared {
        return Err(FrameFault::Checksum);
    }
    Ok(())
}

/// The additive 16-bit checksum over `data`.
pub fn checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |sum, &byte| sum.wrapping_add(byte as u16))
}
