//! Firmware / UID image framing.
//!
//! A DFU file for this device is `image ‖ suffix ‖ crc`, where the image is
//! a 20-byte header followed by the raw payload. The suffix and CRC are the
//! standard DFU 1.1 trailer the host tools check before flashing; the header
//! is the device's own, carried through to the bootloader so it can validate
//! the payload before touching flash.

/// Size of the image header on the wire.
pub const IMAGE_HEADER_SIZE: usize = 20;

/// The only header version this device understands.
pub const IMAGE_VERSION: u32 = 1;

/// A model value of zero disables the hardware-model check.
pub const MODEL_UNDEFINED: u16 = 0;

/// Size of the DFU 1.1 suffix, including the CRC.
pub const DFU_SUFFIX_SIZE: usize = 16;

/// bcdDFU for DFU 1.1 files.
pub const DFU_SPECIFICATION: u16 = 0x0100;

/// The `bcdDevice` field; this device does not version its files.
pub const DEVICE_ANY: u16 = 0xffff;

const DFU_SIGNATURE: [u8; 3] = *b"UFD";

/// The image header, little-endian on the wire:
/// `version(4) | size(4) | model(2) | reserved(2) | manufacturer_id(4) |
/// reserved(4)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ImageHeader {
    /// Header layout version; must be [`IMAGE_VERSION`].
    pub version: u32,
    /// Payload size in bytes, excluding this header.
    pub size: u32,
    /// Hardware model the payload targets, or [`MODEL_UNDEFINED`].
    pub model: u16,
    /// ESTA manufacturer ID of the image's producer.
    pub manufacturer_id: u32,
}

impl ImageHeader {
    /// Decodes a header from its wire form. Reserved bytes are ignored.
    pub fn parse(bytes: &[u8; IMAGE_HEADER_SIZE]) -> Self {
        Self {
            version: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            size: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            model: u16::from_le_bytes([bytes[8], bytes[9]]),
            manufacturer_id: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        }
    }

    /// Encodes the header, zeroing the reserved bytes.
    pub fn encode(&self) -> [u8; IMAGE_HEADER_SIZE] {
        let mut out = [0u8; IMAGE_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..8].copy_from_slice(&self.size.to_le_bytes());
        out[8..10].copy_from_slice(&self.model.to_le_bytes());
        out[12..16].copy_from_slice(&self.manufacturer_id.to_le_bytes());
        out
    }
}

/// The DFU 1.1 file suffix, minus the trailing CRC.
///
/// On disk the suffix reads, from the end of the payload:
/// `bcdDevice, idProduct, idVendor, bcdDFU, 'UFD', bLength(16), dwCRC`,
/// all multi-byte fields little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct DfuSuffix {
    /// USB vendor ID the file is intended for.
    pub vendor_id: u16,
    /// USB product ID the file is intended for.
    pub product_id: u16,
}

impl DfuSuffix {
    /// Encodes the 12 suffix bytes that precede the CRC.
    pub fn encode(&self) -> [u8; DFU_SUFFIX_SIZE - 4] {
        let mut out = [0u8; DFU_SUFFIX_SIZE - 4];
        out[0..2].copy_from_slice(&DEVICE_ANY.to_le_bytes());
        out[2..4].copy_from_slice(&self.product_id.to_le_bytes());
        out[4..6].copy_from_slice(&self.vendor_id.to_le_bytes());
        out[6..8].copy_from_slice(&DFU_SPECIFICATION.to_le_bytes());
        out[8..11].copy_from_slice(&DFU_SIGNATURE);
        out[11] = DFU_SUFFIX_SIZE as u8;
        out
    }

    /// Decodes and checks the last 16 bytes of a DFU file. Returns the
    /// suffix and the stored CRC, or `None` if the signature or length
    /// marker is wrong.
    pub fn parse(trailer: &[u8; DFU_SUFFIX_SIZE]) -> Option<(Self, u32)> {
        if trailer[8..11] != DFU_SIGNATURE || trailer[11] != DFU_SUFFIX_SIZE as u8 {
            return None;
        }
        let suffix = Self {
            product_id: u16::from_le_bytes([trailer[2], trailer[3]]),
            vendor_id: u16::from_le_bytes([trailer[4], trailer[5]]),
        };
        let crc = u32::from_le_bytes([trailer[12], trailer[13], trailer[14], trailer[15]]);
        Some((suffix, crc))
    }
}

const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                0xedb8_8320 ^ (crc >> 1)
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Feeds one byte into a running DFU CRC.
pub fn crc_update(crc: u32, byte: u8) -> u32 {
    CRC_TABLE[((crc ^ byte as u32) & 0xff) as usize] ^ (crc >> 8)
}

/// The DFU file CRC over `data`: init 0xFFFFFFFF, reflected polynomial
/// 0xEDB88320, and no final inversion.
pub fn file_crc(data: &[u8]) -> u32 {
    data.iter().fold(0xffff_ffff, |crc, &b| crc_update(crc, b))
}

/// Total size of a DFU file wrapping `payload_len` image bytes.
pub const fn dfu_file_size(payload_len: usize) -> usize {
    payload_len + DFU_SUFFIX_SIZE
}

/// Assembles a complete DFU file into `out`: the payload, the suffix, and
/// the CRC over both. Returns the number of bytes written, or `None` if
/// `out` is too small.
pub fn write_dfu_file(payload: &[u8], suffix: &DfuSuffix, out: &mut [u8]) -> Option<usize> {
    let total = dfu_file_size(payload.len());
    if out.len() < total {
        return None;
    }
    out[..payload.len()].copy_from_slice(payload);
    out[payload.len()..total - 4].copy_from_slice(&suffix.encode());
    let crc = file_crc(&out[..total - 4]);
    out[total - 4..total].copy_from_slice(&crc.to_le_bytes());
    Some(total)
}
