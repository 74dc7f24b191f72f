use core::marker::PhantomData;
use usb_device::{class_prelude::*, control::Request};

use crate::hal::{Flash, FlashError};
use crate::image::{ImageHeader, IMAGE_HEADER_SIZE, IMAGE_VERSION, MODEL_UNDEFINED};

const USB_CLASS_APPLICATION_SPECIFIC: u8 = 0xFE;
const USB_SUBCLASS_DFU: u8 = 0x01;
const USB_PROTOCOL_DFU_MODE: u8 = 0x02;

const DFU_DNLOAD: u8 = 0x01;
#[allow(dead_code)]
const DFU_UPLOAD: u8 = 0x02;
const DFU_GETSTATUS: u8 = 0x03;
const DFU_CLRSTATUS: u8 = 0x04;
const DFU_GETSTATE: u8 = 0x05;
const DFU_ABORT: u8 = 0x06;

const DESC_DESCTYPE_DFU: u8 = 0x21;

/// Alternate setting that selects the firmware region.
pub const ALT_SETTING_FIRMWARE: u8 = 0;
/// Alternate setting that selects the UID region.
pub const ALT_SETTING_UID: u8 = 1;

/// The largest block a DNLOAD may carry. Per the USB spec this should be 8,
/// 16, 32 or 64 bytes; the control pipe gives no reason to go higher.
pub const DFU_BLOCK_SIZE: usize = 64;

/// DFU 1.1 device states, as reported by GETSTATE and GETSTATUS.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum DfuState {
    /// Running the application; not used once the bootloader owns the port.
    AppIdle = 0,
    /// Application received DFU_DETACH and awaits a USB reset; unused here.
    AppDetach = 1,
    /// Waiting for requests.
    DfuIdle = 2,
    /// A block is buffered; waiting for GETSTATUS.
    DfuDnloadSync = 3,
    /// Programming a block into flash.
    DfuDnBusy = 4,
    /// Mid-download, expecting the next DNLOAD.
    DfuDnloadIdle = 5,
    /// The final block arrived; waiting for GETSTATUS to start manifestation.
    DfuManifestSync = 6,
    /// Committing the image.
    DfuManifest = 7,
    /// Waiting for a USB reset after manifestation; unused, this device is
    /// manifestation tolerant.
    DfuManifestWaitReset = 8,
    /// Processing an upload; unused, uploads are stalled.
    DfuUploadIdle = 9,
    /// An error occurred. Awaiting CLRSTATUS.
    DfuError = 10,
}

/// DFU 1.1 status codes, the first byte of a GETSTATUS reply.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum DfuStatusCode {
    /// No error condition is present.
    Ok = 0x00,
    /// File is not targeted for use by this device.
    ErrTarget = 0x01,
    /// File fails a vendor-specific verification test.
    ErrFile = 0x02,
    /// Device is unable to write memory.
    ErrWrite = 0x03,
    /// Memory erase failed.
    ErrErase = 0x04,
    /// Memory erase check failed.
    ErrCheckErased = 0x05,
    /// Program memory function failed.
    ErrProg = 0x06,
    /// Programmed memory failed verification.
    ErrVerify = 0x07,
    /// Received an address outside the writable region.
    ErrAddress = 0x08,
    /// DNLOAD with wLength = 0 arrived before the image was complete.
    ErrNotdone = 0x09,
    /// Firmware is corrupt; the device cannot return to run-time operation.
    ErrFirmware = 0x0A,
    /// A vendor-specific error.
    ErrVendor = 0x0B,
    /// Unexpected USB reset signalling.
    ErrUsbr = 0x0C,
    /// Unexpected power-on reset.
    ErrPOR = 0x0D,
    /// Something went wrong, but the device does not know what.
    ErrUnknown = 0x0E,
    /// The device stalled an unexpected request.
    ErrStalledPkt = 0x0F,
}

impl From<FlashError> for DfuStatusCode {
    fn from(e: FlashError) -> Self {
        match e {
            FlashError::Erase => DfuStatusCode::ErrErase,
            // A refused word program surfaces as a programming failure;
            // ErrWrite is reserved for failures buffering the block itself.
            FlashError::Write => DfuStatusCode::ErrProg,
        }
    }
}

/// A flash region reachable through one alternate setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct MemoryRegion {
    /// First byte of the region.
    pub base: u32,
    /// Region length in bytes; a whole number of pages.
    pub size: u32,
}

impl MemoryRegion {
    /// Builds a region from its bounds.
    pub const fn new(base: u32, size: u32) -> Self {
        Self { base, size }
    }

    /// One past the last byte of the region.
    pub const fn end(&self) -> u32 {
        self.base + self.size
    }
}

/// The device a [`DfuClass`] programs: flash access plus the layout and
/// identity constants the protocol needs.
///
/// All methods are called from `usb_dev.poll([])`; run that from the main
/// loop, not from an interrupt, so a stalled flash write never holds up
/// interrupt handling.
pub trait DfuTarget: Flash {
    /// The region behind alternate setting 0.
    const FIRMWARE_REGION: MemoryRegion;

    /// The region behind alternate setting 1. Preserved across firmware
    /// downloads; only written when the host selects it explicitly.
    const UID_REGION: MemoryRegion;

    /// Whether downloads into the UID region are accepted at all.
    const ALLOW_UID_WRITES: bool = true;

    /// The hardware model checked against image headers.
    const HARDWARE_MODEL: u16;

    /// Interface string for alternate setting 0, in the
    /// `@name/address/area` format `dfu-util` expects.
    const FIRMWARE_INFO_STRING: &'static str;

    /// Interface string for alternate setting 1.
    const UID_INFO_STRING: &'static str;

    /// wTransferSize advertised in the functional descriptor. Must not
    /// exceed [`DFU_BLOCK_SIZE`] or the control-endpoint buffer.
    const TRANSFER_SIZE: u16 = DFU_BLOCK_SIZE as u16;

    /// Milliseconds the host should wait after a block is accepted.
    const BLOCK_PROGRAM_TIME_MS: u32 = 1;

    /// Milliseconds the host should wait while the first block triggers the
    /// region erase.
    const REGION_ERASE_TIME_MS: u32 = 250;

    /// Milliseconds the host should wait after the final, empty DNLOAD.
    const MANIFESTATION_TIME_MS: u32 = 1;

    /// wDetachTimeOut in the functional descriptor; unused in DFU mode.
    const DETACH_TIMEOUT: u16 = 250;

    /// Called on every USB bus reset. A bootloader that has finished an
    /// image may restart into the application from here and never return.
    fn usb_reset(&mut self) {}
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Work {
    None,
    ProgramBlock,
    Manifest,
}

struct Download {
    expected_block: u16,
    received: u32,
    header_buf: [u8; IMAGE_HEADER_SIZE],
    header_len: u8,
    header: Option<ImageHeader>,
    write_address: u32,
    word: [u8; 4],
    word_len: u8,
    block: [u8; DFU_BLOCK_SIZE],
    block_len: u16,
    work: Work,
}

impl Download {
    const fn new() -> Self {
        Self {
            expected_block: 0,
            received: 0,
            header_buf: [0; IMAGE_HEADER_SIZE],
            header_len: 0,
            header: None,
            write_address: 0,
            word: [0; 4],
            word_len: 0,
            block: [0; DFU_BLOCK_SIZE],
            block_len: 0,
            work: Work::None,
        }
    }
}

#[derive(Clone, Copy)]
struct DfuStatus {
    status: DfuStatusCode,
    poll_timeout: u32,
    state: DfuState,
}

impl DfuStatus {
    const fn new() -> Self {
        Self {
            status: DfuStatusCode::Ok,
            poll_timeout: 0,
            state: DfuState::DfuIdle,
        }
    }

    fn new_state_ok(&mut self, state: DfuState) {
        self.new_state_status(state, DfuStatusCode::Ok);
    }

    fn new_state_status(&mut self, state: DfuState, status: DfuStatusCode) {
        self.status = status;
        self.state = state;
    }

    fn state(&self) -> DfuState {
        self.state
    }
}

impl From<DfuStatus> for [u8; 6] {
    fn from(dfu: DfuStatus) -> Self {
        [
            // bStatus
            dfu.status as u8,
            // bwPollTimeout
            (dfu.poll_timeout & 0xff) as u8,
            ((dfu.poll_timeout >> 8) & 0xff) as u8,
            ((dfu.poll_timeout >> 16) & 0xff) as u8,
            // bState
            dfu.state as u8,
            // iString: index of a status description, never used.
            0,
        ]
    }
}

/// The DFU 1.1 bootloader class for the gateway.
///
/// Downloads arrive as sequential blocks of up to 64 bytes, numbered from
/// zero. The first 20 bytes of the stream form the image header; once the
/// header validates, the selected region is erased and the remaining bytes
/// are programmed word by word with read-back verification. A zero-length
/// DNLOAD closes the image, and the device is manifestation tolerant, so
/// the host sees `dfuIDLE` again without a bus reset.
pub struct DfuClass<B: UsbBus, T: DfuTarget> {
    if_num: InterfaceNumber,
    firmware_string: StringIndex,
    uid_string: StringIndex,
    alt_setting: u8,
    status: DfuStatus,
    download: Download,
    target: T,
    _bus: PhantomData<B>,
}

impl<B: UsbBus, T: DfuTarget> UsbClass<B> for DfuClass<B, T> {
    fn get_configuration_descriptors(
        &self,
        writer: &mut DescriptorWriter,
    ) -> usb_device::Result<()> {
        writer.interface_alt(
            self.if_num,
            ALT_SETTING_FIRMWARE,
            USB_CLASS_APPLICATION_SPECIFIC,
            USB_SUBCLASS_DFU,
            USB_PROTOCOL_DFU_MODE,
            Some(self.firmware_string),
        )?;
        writer.interface_alt(
            self.if_num,
            ALT_SETTING_UID,
            USB_CLASS_APPLICATION_SPECIFIC,
            USB_SUBCLASS_DFU,
            USB_PROTOCOL_DFU_MODE,
            Some(self.uid_string),
        )?;

        // DFU functional descriptor
        writer.write(
            DESC_DESCTYPE_DFU,
            &[
                // bmAttributes: bitManifestationTolerant | bitCanDnload.
                // No detach (the bootloader already owns the port), no
                // upload.
                0x04 | 0x01,
                // wDetachTimeOut
                (T::DETACH_TIMEOUT & 0xff) as u8,
                (T::DETACH_TIMEOUT >> 8) as u8,
                // wTransferSize
                (T::TRANSFER_SIZE & 0xff) as u8,
                (T::TRANSFER_SIZE >> 8) as u8,
                // bcdDFUVersion
                0x1a,
                0x01,
            ],
        )?;

        Ok(())
    }

    fn get_string(&self, index: StringIndex, lang_id: LangID) -> Option<&str> {
        if lang_id != LangID::EN_US && u16::from(lang_id) != 0 {
            return None;
        }
        if index == self.firmware_string {
            Some(T::FIRMWARE_INFO_STRING)
        } else if index == self.uid_string {
            Some(T::UID_INFO_STRING)
        } else {
            None
        }
    }

    fn get_alt_setting(&mut self, interface: InterfaceNumber) -> Option<u8> {
        if u8::from(interface) == u8::from(self.if_num) {
            Some(self.alt_setting)
        } else {
            None
        }
    }

    fn set_alt_setting(&mut self, interface: InterfaceNumber, alternative: u8) -> bool {
        if u8::from(interface) != u8::from(self.if_num) || alternative > ALT_SETTING_UID {
            return false;
        }
        // The target region cannot move under an image in flight.
        if self.mid_transfer() {
            return false;
        }
        self.alt_setting = alternative;
        self.download = Download::new();
        true
    }

    // Handle control requests to the host.
    fn control_in(&mut self, xfer: ControlIn<B>) {
        let req = *xfer.request();

        if req.request_type != control::RequestType::Class {
            return;
        }
        if req.recipient != control::Recipient::Interface {
            return;
        }
        if req.index != u8::from(self.if_num) as u16 {
            return;
        }

        match req.request {
            DFU_GETSTATUS => {
                self.get_status(xfer, req);
            }
            DFU_GETSTATE => {
                self.get_state(xfer, req);
            }
            // UPLOAD is not supported, so it stalls like any other
            // unexpected request.
            _ => {
                self.status
                    .new_state_status(DfuState::DfuError, DfuStatusCode::ErrStalledPkt);
                xfer.reject().ok();
            }
        }
    }

    // Handle a control request from the host.
    fn control_out(&mut self, xfer: ControlOut<B>) {
        let req = *xfer.request();

        if req.request_type != control::RequestType::Class {
            return;
        }
        if req.recipient != control::Recipient::Interface {
            return;
        }
        if req.index != u8::from(self.if_num) as u16 {
            return;
        }

        match req.request {
            DFU_DNLOAD => {
                self.dnload(xfer, req);
            }
            DFU_CLRSTATUS => {
                self.clear_status(xfer);
            }
            DFU_ABORT => {
                self.abort(xfer);
            }
            _ => {
                self.status
                    .new_state_status(DfuState::DfuError, DfuStatusCode::ErrStalledPkt);
                xfer.reject().ok();
            }
        }
    }

    fn reset(&mut self) {
        // May not return if an image is ready to run.
        self.target.usb_reset();

        // A bus reset in the middle of a transfer abandons the image; the
        // host has to clear the error and start over.
        if self.mid_transfer() {
            self.download = Download::new();
            self.status
                .new_state_status(DfuState::DfuError, DfuStatusCode::ErrStalledPkt);
        }
    }

    fn poll(&mut self) {
        // Flash work happens here, outside the control-transfer callbacks.
        // On success the state only advances if the host already asked via
        // GETSTATUS (DnBusy / Manifest); otherwise it stays in the sync
        // state so an out-of-order DNLOAD still stalls.
        match self.download.work {
            Work::None => {}
            Work::ProgramBlock => {
                self.download.work = Work::None;
                match self.program_block() {
                    Ok(()) => {
                        if self.status.state() == DfuState::DfuDnBusy {
                            self.status.new_state_ok(DfuState::DfuDnloadIdle);
                        }
                    }
                    Err(code) => self.status.new_state_status(DfuState::DfuError, code),
                }
            }
            Work::Manifest => {
                self.download.work = Work::None;
                match self.finish_image() {
                    Ok(()) => {
                        self.download = Download::new();
                        if self.status.state() == DfuState::DfuManifest {
                            self.status.new_state_ok(DfuState::DfuIdle);
                        }
                    }
                    Err(code) => self.status.new_state_status(DfuState::DfuError, code),
                }
            }
        }
    }
}

impl<B: UsbBus, T: DfuTarget> DfuClass<B, T> {
    /// Creates the class with alternate setting 0 (firmware) selected.
    pub fn new(alloc: &UsbBusAllocator<B>, target: T) -> Self {
        Self {
            if_num: alloc.interface(),
            firmware_string: alloc.string(),
            uid_string: alloc.string(),
            alt_setting: ALT_SETTING_FIRMWARE,
            status: DfuStatus::new(),
            download: Download::new(),
            target,
            _bus: PhantomData,
        }
    }

    /// Puts the class in the error state with "unexpected power on reset".
    /// Call right after `new()` when the reset cause warrants it.
    pub fn mark_unexpected_power_on_reset(&mut self) {
        self.status
            .new_state_status(DfuState::DfuError, DfuStatusCode::ErrPOR);
    }

    /// Puts the class in the error state with "firmware corrupt". Call right
    /// after `new()` when the application region failed its sanity check.
    pub fn mark_firmware_corrupt(&mut self) {
        self.status
            .new_state_status(DfuState::DfuError, DfuStatusCode::ErrFirmware);
    }

    /// The current DFU state.
    pub fn state(&self) -> DfuState {
        self.status.state()
    }

    /// The current DFU status code.
    pub fn status_code(&self) -> DfuStatusCode {
        self.status.status
    }

    /// The currently selected alternate setting.
    pub fn alt_setting(&self) -> u8 {
        self.alt_setting
    }

    /// Borrows the target device.
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Mutably borrows the target device.
    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    fn mid_transfer(&self) -> bool {
        matches!(
            self.status.state(),
            DfuState::DfuDnloadSync
                | DfuState::DfuDnBusy
                | DfuState::DfuDnloadIdle
                | DfuState::DfuManifestSync
                | DfuState::DfuManifest
        )
    }

    fn active_region(&self) -> MemoryRegion {
        if self.alt_setting == ALT_SETTING_UID {
            T::UID_REGION
        } else {
            T::FIRMWARE_REGION
        }
    }

    fn reject_with_error(&mut self, xfer: ControlOut<B>, code: DfuStatusCode) {
        self.status.new_state_status(DfuState::DfuError, code);
        xfer.reject().ok();
    }

    fn clear_status(&mut self, xfer: ControlOut<B>) {
        match self.status.state() {
            DfuState::DfuError => {
                self.download = Download::new();
                self.status.new_state_ok(DfuState::DfuIdle);
                xfer.accept().ok();
            }
            _ => {
                self.reject_with_error(xfer, DfuStatusCode::ErrStalledPkt);
            }
        }
    }

    fn abort(&mut self, xfer: ControlOut<B>) {
        match self.status.state() {
            DfuState::DfuIdle
            | DfuState::DfuDnloadSync
            | DfuState::DfuDnloadIdle
            | DfuState::DfuManifestSync => {
                self.download = Download::new();
                self.status.new_state_ok(DfuState::DfuIdle);
                xfer.accept().ok();
            }
            _ => {
                self.reject_with_error(xfer, DfuStatusCode::ErrStalledPkt);
            }
        }
    }

    fn dnload(&mut self, xfer: ControlOut<B>, req: Request) {
        let initial_state = self.status.state();

        if initial_state != DfuState::DfuIdle && initial_state != DfuState::DfuDnloadIdle {
            return self.reject_with_error(xfer, DfuStatusCode::ErrStalledPkt);
        }

        if req.length == 0 {
            // End-of-image marker. Only meaningful once a download actually
            // started, and only if every promised byte arrived.
            if initial_state != DfuState::DfuDnloadIdle {
                return self.reject_with_error(xfer, DfuStatusCode::ErrStalledPkt);
            }
            let header = match self.download.header {
                Some(h) => h,
                None => {
                    return self.reject_with_error(xfer, DfuStatusCode::ErrStalledPkt);
                }
            };
            if self.download.received != header.size + IMAGE_HEADER_SIZE as u32 {
                return self.reject_with_error(xfer, DfuStatusCode::ErrNotdone);
            }
            self.download.work = Work::Manifest;
            self.status.new_state_ok(DfuState::DfuManifestSync);
            xfer.accept().ok();
            return;
        }

        if req.length > T::TRANSFER_SIZE || req.length as usize > DFU_BLOCK_SIZE {
            return self.reject_with_error(xfer, DfuStatusCode::ErrStalledPkt);
        }

        // The host numbers blocks from zero. A skip or replay means we lost
        // sync and the image can no longer be trusted.
        if req.value != self.download.expected_block {
            return self.reject_with_error(xfer, DfuStatusCode::ErrStalledPkt);
        }

        let data = xfer.data();
        if data.is_empty() || data.len() > DFU_BLOCK_SIZE {
            return self.reject_with_error(xfer, DfuStatusCode::ErrStalledPkt);
        }

        self.download.block[..data.len()].copy_from_slice(data);
        self.download.block_len = data.len() as u16;
        self.download.expected_block = self.download.expected_block.wrapping_add(1);
        self.download.work = Work::ProgramBlock;
        self.status.new_state_ok(DfuState::DfuDnloadSync);
        xfer.accept().ok();
    }

    fn get_state(&mut self, xfer: ControlIn<B>, req: Request) {
        // Report the state without any transition. Not answerable while
        // flash work is outstanding.
        if req.length > 0 && self.status.state() != DfuState::DfuDnBusy {
            let v = self.status.state() as u8;
            xfer.accept_with(&[v]).ok();
        } else {
            self.status
                .new_state_status(DfuState::DfuError, DfuStatusCode::ErrStalledPkt);
            xfer.reject().ok();
        }
    }

    fn get_status(&mut self, xfer: ControlIn<B>, req: Request) {
        if req.length >= 6 && self.process() {
            self.status.poll_timeout = self.expected_timeout();
            let v: [u8; 6] = self.status.into();
            xfer.accept_with(&v).ok();
            return;
        }

        self.status
            .new_state_status(DfuState::DfuError, DfuStatusCode::ErrStalledPkt);
        xfer.reject().ok();
    }

    fn expected_timeout(&self) -> u32 {
        match self.download.work {
            Work::ProgramBlock => {
                if self.download.header.is_none() {
                    // The first block also pays for the region erase.
                    T::REGION_ERASE_TIME_MS + T::BLOCK_PROGRAM_TIME_MS
                } else {
                    T::BLOCK_PROGRAM_TIME_MS
                }
            }
            Work::Manifest => T::MANIFESTATION_TIME_MS,
            Work::None => 0,
        }
    }

    // Advance the state machine for a GETSTATUS. Returns false if the
    // request cannot be answered in the current state.
    fn process(&mut self) -> bool {
        match self.status.state() {
            DfuState::DfuDnloadSync => {
                if self.download.work == Work::ProgramBlock {
                    self.status.new_state_ok(DfuState::DfuDnBusy);
                } else {
                    self.status.new_state_ok(DfuState::DfuDnloadIdle);
                }
                true
            }
            DfuState::DfuManifestSync => {
                if self.download.work == Work::Manifest {
                    self.status.new_state_ok(DfuState::DfuManifest);
                } else {
                    // Manifestation tolerant: no bus reset needed to get
                    // back to idle.
                    self.status.new_state_ok(DfuState::DfuIdle);
                }
                true
            }
            DfuState::DfuDnBusy => false,
            _ => true,
        }
    }

    fn validate_header(
        &mut self,
        header: &ImageHeader,
        region: &MemoryRegion,
    ) -> Result<(), DfuStatusCode> {
        if self.alt_setting == ALT_SETTING_UID && !T::ALLOW_UID_WRITES {
            return Err(DfuStatusCode::ErrTarget);
        }
        if header.version != IMAGE_VERSION {
            return Err(DfuStatusCode::ErrTarget);
        }
        if header.size > region.size {
            return Err(DfuStatusCode::ErrAddress);
        }
        if header.model != T::HARDWARE_MODEL && header.model != MODEL_UNDEFINED {
            return Err(DfuStatusCode::ErrTarget);
        }
        Ok(())
    }

    fn erase_region(&mut self, region: &MemoryRegion) -> Result<(), DfuStatusCode> {
        let mut address = region.base;
        while address < region.end() {
            self.target.erase_page(address)?;
            address += T::PAGE_SIZE;
        }
        Ok(())
    }

    fn flush_word(&mut self, region: &MemoryRegion) -> Result<(), DfuStatusCode> {
        let address = self.download.write_address;
        if address + 4 > region.end() {
            return Err(DfuStatusCode::ErrAddress);
        }
        let word = u32::from_le_bytes(self.download.word);
        self.target.write_word(address, word)?;
        if self.target.read_word(address) != word {
            return Err(DfuStatusCode::ErrVerify);
        }
        self.download.write_address = address + 4;
        self.download.word_len = 0;
        Ok(())
    }

    fn program_block(&mut self) -> Result<(), DfuStatusCode> {
        let region = self.active_region();
        let len = self.download.block_len as usize;

        for i in 0..len {
            let byte = self.download.block[i];

            if (self.download.header_len as usize) < IMAGE_HEADER_SIZE {
                // The header is consumed, not written to flash. Nothing is
                // erased until it validates.
                self.download.header_buf[self.download.header_len as usize] = byte;
                self.download.header_len += 1;
                if self.download.header_len as usize == IMAGE_HEADER_SIZE {
                    let buf = self.download.header_buf;
                    let header = ImageHeader::parse(&buf);
                    self.validate_header(&header, &region)?;
                    self.erase_region(&region)?;
                    self.download.header = Some(header);
                    self.download.write_address = region.base;
                }
                continue;
            }

            self.download.word[self.download.word_len as usize] = byte;
            self.download.word_len += 1;
            if self.download.word_len == 4 {
                self.flush_word(&region)?;
            }
        }

        self.download.received += len as u32;
        Ok(())
    }

    fn finish_image(&mut self) -> Result<(), DfuStatusCode> {
        let region = self.active_region();
        if self.download.word_len > 0 {
            // Trailing bytes of the image are padded out to a flash word.
            while self.download.word_len < 4 {
                self.download.word[self.download.word_len as usize] = 0xff;
                self.download.word_len += 1;
            }
            self.flush_word(&region)?;
        }
        Ok(())
    }
}
