//! Receive-path statistics.
//!
//! The responder keeps a tally of everything it hears, both for diagnostics
//! and for the COMMS_STATUS RDM parameter. Counters are 32 bits and wrap
//! naturally.

/// Sentinel reported for the last-frame checksum before any DMX is seen.
pub const NO_CHECKSUM: u8 = 0xff;

/// Sentinel reported for the slot counts before any DMX is seen.
pub const NO_SLOTS: u16 = 0xffff;

/// Statistics maintained by the receive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ReceiverCounters {
    /// Complete DMX512 frames received.
    pub dmx_frames: u32,
    /// Complete alternate-start-code frames received.
    pub asc_frames: u32,
    /// RDM frames that passed all surface checks.
    pub rdm_frames: u32,
    /// RDM frames shorter than the minimum (COMMS_STATUS short message).
    pub rdm_short_frame: u32,
    /// RDM frames whose byte count disagreed with the declared length
    /// (COMMS_STATUS length mismatch).
    pub rdm_length_mismatch: u32,
    /// RDM frames with a bad sub-start code.
    pub rdm_sub_start_code_invalid: u32,
    /// RDM frames whose message-length field was out of bounds.
    pub rdm_msg_len_invalid: u32,
    /// RDM frames whose param-data length disagreed with the message length.
    pub rdm_param_data_len_invalid: u32,
    /// RDM frames that failed the additive checksum (COMMS_STATUS checksum
    /// failure).
    pub rdm_checksum_invalid: u32,
    /// Additive checksum of the most recent DMX frame.
    pub dmx_last_checksum: u8,
    /// Slot count of the most recent DMX frame.
    pub dmx_last_slot_count: u16,
    /// Smallest DMX frame seen.
    pub dmx_min_slot_count: u16,
    /// Largest DMX frame seen.
    pub dmx_max_slot_count: u16,
}

impl ReceiverCounters {
    /// Returns a zeroed set of counters with the "nothing seen" sentinels.
    pub const fn new() -> Self {
        Self {
            dmx_frames: 0,
            asc_frames: 0,
            rdm_frames: 0,
            rdm_short_frame: 0,
            rdm_length_mismatch: 0,
            rdm_sub_start_code_invalid: 0,
            rdm_msg_len_invalid: 0,
            rdm_param_data_len_invalid: 0,
            rdm_checksum_invalid: 0,
            dmx_last_checksum: NO_CHECKSUM,
            dmx_last_slot_count: NO_SLOTS,
            dmx_min_slot_count: NO_SLOTS,
            dmx_max_slot_count: NO_SLOTS,
        }
    }

    /// Resets everything.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Resets only the counters exposed through COMMS_STATUS.
    pub fn reset_comms_status(&mut self) {
        self.rdm_short_frame = 0;
        self.rdm_length_mismatch = 0;
        self.rdm_checksum_invalid = 0;
    }

    /// Records a completed DMX frame of `slots` slots whose bytes summed to
    /// `checksum`.
    pub fn record_dmx_frame(&mut self, slots: u16, checksum: u8) {
        self.dmx_frames = self.dmx_frames.wrapping_add(1);
        self.dmx_last_slot_count = slots;
        self.dmx_last_checksum = checksum;
        if self.dmx_min_slot_count == NO_SLOTS || slots < self.dmx_min_slot_count {
            self.dmx_min_slot_count = slots;
        }
        if self.dmx_max_slot_count == NO_SLOTS || slots > self.dmx_max_slot_count {
            self.dmx_max_slot_count = slots;
        }
    }
}

impl Default for ReceiverCounters {
    fn default() -> Self {
        Self::new()
    }
}
