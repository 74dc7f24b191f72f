#![allow(unused_variables)]

mod helpers;
use helpers::*;

use usbd_class_tester::prelude::*;

use usb_device::bus::UsbBusAllocator;

use dmx_rdm_gateway::class::{DfuClass, DfuState, DfuStatusCode, DfuTarget, MemoryRegion};
use dmx_rdm_gateway::hal::{Flash, FlashError};
use dmx_rdm_gateway::image::ImageHeader;

const FW_BASE: u32 = 0x9d00_7000;
const UID_BASE: u32 = 0x9d00_6000;
const STORE_BASE: u32 = UID_BASE;
const STORE_SIZE: usize = 0x3000;

pub struct TestFlash {
    memory: Vec<u8>,
    pub fail_erase: bool,
    pub fail_write: bool,
    pub corrupt_read: bool,
    erase_count: u32,
}

impl TestFlash {
    fn new() -> Self {
        Self {
            memory: vec![0u8; STORE_SIZE],
            fail_erase: false,
            fail_write: false,
            corrupt_read: false,
            erase_count: 0,
        }
    }

    pub fn was_erased(&self) -> bool {
        self.erase_count > 0
    }

    pub fn read_bytes(&self, address: u32, len: usize) -> &[u8] {
        let offset = (address - STORE_BASE) as usize;
        &self.memory[offset..offset + len]
    }
}

impl Flash for TestFlash {
    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        if self.fail_erase {
            return Err(FlashError::Erase);
        }
        let offset = (address - STORE_BASE) as usize;
        self.memory[offset..offset + Self::PAGE_SIZE as usize].fill(0xff);
        self.erase_count += 1;
        Ok(())
    }

    fn write_word(&mut self, address: u32, word: u32) -> Result<(), FlashError> {
        if self.fail_write {
            return Err(FlashError::Write);
        }
        let offset = (address - STORE_BASE) as usize;
        self.memory[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
        Ok(())
    }

    fn read_word(&self, address: u32) -> u32 {
        let offset = (address - STORE_BASE) as usize;
        let word = u32::from_le_bytes([
            self.memory[offset],
            self.memory[offset + 1],
            self.memory[offset + 2],
            self.memory[offset + 3],
        ]);
        if self.corrupt_read {
            word.wrapping_add(1)
        } else {
            word
        }
    }
}

const MODEL: u16 = 3;

impl DfuTarget for TestFlash {
    const FIRMWARE_REGION: MemoryRegion = MemoryRegion::new(FW_BASE, 0x2000);
    const UID_REGION: MemoryRegion = MemoryRegion::new(UID_BASE, 0x1000);
    const HARDWARE_MODEL: u16 = MODEL;
    const FIRMWARE_INFO_STRING: &'static str = "@Firmware/0x9d007000/2*4Kg";
    const UID_INFO_STRING: &'static str = "@UID/0x9d006000/1*4Kg";
    const BLOCK_PROGRAM_TIME_MS: u32 = 2;
    const REGION_ERASE_TIME_MS: u32 = 32;
}

/// Same flash, but with UID downloads disabled by configuration.
pub struct LockedUidFlash(TestFlash);

impl Flash for LockedUidFlash {
    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        self.0.erase_page(address)
    }
    fn write_word(&mut self, address: u32, word: u32) -> Result<(), FlashError> {
        self.0.write_word(address, word)
    }
    fn read_word(&self, address: u32) -> u32 {
        self.0.read_word(address)
    }
}

impl DfuTarget for LockedUidFlash {
    const FIRMWARE_REGION: MemoryRegion = MemoryRegion::new(FW_BASE, 0x2000);
    const UID_REGION: MemoryRegion = MemoryRegion::new(UID_BASE, 0x1000);
    const ALLOW_UID_WRITES: bool = false;
    const HARDWARE_MODEL: u16 = MODEL;
    const FIRMWARE_INFO_STRING: &'static str = "@Firmware/0x9d007000/2*4Kg";
    const UID_INFO_STRING: &'static str = "@UID/0x9d006000/1*4Kg";
    const BLOCK_PROGRAM_TIME_MS: u32 = 2;
    const REGION_ERASE_TIME_MS: u32 = 32;
}

struct MkDfu {}

impl UsbDeviceCtx for MkDfu {
    type C<'c> = DfuClass<EmulatedUsbBus, TestFlash>;
    const EP0_SIZE: u8 = 32;

    fn create_class<'a>(
        &mut self,
        alloc: &'a UsbBusAllocator<EmulatedUsbBus>,
    ) -> AnyResult<DfuClass<EmulatedUsbBus, TestFlash>> {
        Ok(DfuClass::new(alloc, TestFlash::new()))
    }
}

struct MkLockedDfu {}

impl UsbDeviceCtx for MkLockedDfu {
    type C<'c> = DfuClass<EmulatedUsbBus, LockedUidFlash>;
    const EP0_SIZE: u8 = 32;

    fn create_class<'a>(
        &mut self,
        alloc: &'a UsbBusAllocator<EmulatedUsbBus>,
    ) -> AnyResult<DfuClass<EmulatedUsbBus, LockedUidFlash>> {
        Ok(DfuClass::new(alloc, LockedUidFlash(TestFlash::new())))
    }
}

const UID_BODY: [u8; 6] = [0x7a, 0x70, 0x00, 0x00, 0x00, 0x01];

#[test]
fn test_simple_get_status() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            let vec = dev.get_status(&mut dfu).expect("vec");
            assert_eq!(vec, status(STATUS_OK, 0, DFU_IDLE));

            let vec = dev.get_state(&mut dfu).expect("vec");
            assert_eq!(vec, [DFU_IDLE]);
        })
        .expect("with_usb");
}

#[test]
fn test_configuration_descriptor() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            let vec = dev
                .device_get_descriptor(&mut dfu, 2, 0, 0, 130)
                .expect("vec");
            assert_eq!(vec.len(), 36);

            let config = &vec[..9];
            let alt0 = &vec[9..18];
            let alt1 = &vec[18..27];
            let func = &vec[27..];

            assert_eq!(config[0], 9);

            // Two alternate settings of the one DFU-mode interface.
            assert_eq!(alt0, &[9, 4, 0, 0, 0, 0xfe, 1, 2, 4]);
            assert_eq!(alt1, &[9, 4, 0, 1, 0, 0xfe, 1, 2, 5]);

            // Functional descriptor: download-capable, manifestation
            // tolerant, no detach, 64-byte transfers, DFU 1.1a.
            assert_eq!(func, &[9, 0x21, 0b0101, 250, 0, 64, 0, 0x1a, 1]);

            let istr = dev.device_get_string(&mut dfu, 4, 0x409).expect("str");
            assert_eq!(istr, TestFlash::FIRMWARE_INFO_STRING);
            let istr = dev.device_get_string(&mut dfu, 5, 0x409).expect("str");
            assert_eq!(istr, TestFlash::UID_INFO_STRING);
        })
        .expect("with_usb");
}

#[test]
fn test_get_set_interface() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            let vec = dev.get_interface(&mut dfu).expect("vec");
            assert_eq!(vec, [0]);

            dev.set_interface(&mut dfu, 1).expect("set");
            let vec = dev.get_interface(&mut dfu).expect("vec");
            assert_eq!(vec, [1]);
            assert_eq!(dfu.alt_setting(), 1);

            // Out of range.
            dev.set_interface(&mut dfu, 2).expect_err("stall");
        })
        .expect("with_usb");
}

#[test]
fn test_firmware_download() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            let body: Vec<u8> = (1..=16).collect();
            let image = make_image(MODEL, &body);

            let vec = dev.download(&mut dfu, 0, &image).expect("vec");
            assert_eq!(vec, []);
            let vec = dev.get_status(&mut dfu).expect("vec");
            assert_eq!(vec, status(STATUS_OK, 0, DFU_DNLOAD_IDLE));

            let vec = dev.download(&mut dfu, 1, &[]).expect("vec");
            assert_eq!(vec, []);
            let vec = dev.get_status(&mut dfu).expect("vec");
            assert_eq!(vec, status(STATUS_OK, 0, DFU_IDLE));

            assert_eq!(dfu.state(), DfuState::DfuIdle);
            assert_eq!(dfu.status_code(), DfuStatusCode::Ok);
            assert_eq!(dfu.target().read_bytes(FW_BASE, 16), &body[..]);
        })
        .expect("with_usb");
}

#[test]
fn test_uid_download() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            dev.set_interface(&mut dfu, 1).expect("set");

            let image = make_image(MODEL, &UID_BODY);
            assert_eq!(image.len(), 26);

            stream_image(&mut dev, &mut dfu, &image, 64).expect("stream");

            assert_eq!(dfu.state(), DfuState::DfuIdle);
            assert_eq!(dfu.status_code(), DfuStatusCode::Ok);
            assert_eq!(dfu.target().read_bytes(UID_BASE, 6), &UID_BODY[..]);
            // The trailing half-word is padded with 0xFF.
            assert_eq!(dfu.target().read_bytes(UID_BASE + 6, 2), &[0xff, 0xff]);
            // The firmware region was never touched.
            assert_eq!(dfu.target().read_bytes(FW_BASE, 4), &[0, 0, 0, 0]);
        })
        .expect("with_usb");
}

#[test]
fn test_odd_block_size() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            dev.set_interface(&mut dfu, 1).expect("set");

            let image = make_image(MODEL, &UID_BODY);
            stream_image(&mut dev, &mut dfu, &image, 7).expect("stream");

            assert_eq!(dfu.state(), DfuState::DfuIdle);
            assert_eq!(dfu.target().read_bytes(UID_BASE, 6), &UID_BODY[..]);
        })
        .expect("with_usb");
}

#[test]
fn test_block_skip() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            dev.set_interface(&mut dfu, 1).expect("set");

            let image = make_image(MODEL, &UID_BODY);
            dev.download(&mut dfu, 0, &image[..20]).expect("vec");
            dev.get_status(&mut dfu).expect("vec");

            // Block 1 goes missing.
            dev.download(&mut dfu, 2, &image[20..]).expect_err("stall");
            assert_eq!(dfu.state(), DfuState::DfuError);
            assert_eq!(dfu.status_code(), DfuStatusCode::ErrStalledPkt);

            dev.clear_status(&mut dfu).expect("vec");
            assert_eq!(dfu.state(), DfuState::DfuIdle);
            assert_eq!(dfu.status_code(), DfuStatusCode::Ok);
        })
        .expect("with_usb");
}

#[test]
fn test_download_without_get_status() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            dev.set_interface(&mut dfu, 1).expect("set");

            let image = make_image(MODEL, &UID_BODY);
            dev.download(&mut dfu, 0, &image[..20]).expect("vec");

            // No GETSTATUS in between: the device is still in DNLOAD_SYNC.
            dev.download(&mut dfu, 1, &image[20..]).expect_err("stall");
            assert_eq!(dfu.state(), DfuState::DfuError);
            assert_eq!(dfu.status_code(), DfuStatusCode::ErrStalledPkt);
        })
        .expect("with_usb");
}

#[test]
fn test_wrong_hardware_model() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            let image = make_image(MODEL + 1, &UID_BODY);

            dev.download(&mut dfu, 0, &image).expect("vec");
            assert_eq!(dfu.state(), DfuState::DfuError);
            assert_eq!(dfu.status_code(), DfuStatusCode::ErrTarget);
            assert!(!dfu.target().was_erased());
        })
        .expect("with_usb");
}

#[test]
fn test_undefined_model_is_accepted() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            dev.set_interface(&mut dfu, 1).expect("set");

            let image = make_image(0, &UID_BODY);
            stream_image(&mut dev, &mut dfu, &image, 64).expect("stream");
            assert_eq!(dfu.state(), DfuState::DfuIdle);
            assert_eq!(dfu.target().read_bytes(UID_BASE, 6), &UID_BODY[..]);
        })
        .expect("with_usb");
}

#[test]
fn test_wrong_header_version() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            let header = ImageHeader {
                version: 2,
                size: 6,
                model: MODEL,
                manufacturer_id: 0x7a70,
            };
            let mut image = header.encode().to_vec();
            image.extend_from_slice(&UID_BODY);

            dev.download(&mut dfu, 0, &image).expect("vec");
            assert_eq!(dfu.state(), DfuState::DfuError);
            assert_eq!(dfu.status_code(), DfuStatusCode::ErrTarget);
            assert!(!dfu.target().was_erased());
        })
        .expect("with_usb");
}

#[test]
fn test_oversized_image() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            dev.set_interface(&mut dfu, 1).expect("set");

            let header = ImageHeader {
                version: 1,
                size: 0x1001,
                model: MODEL,
                manufacturer_id: 0x7a70,
            };
            let mut block = header.encode().to_vec();
            block.extend_from_slice(&[0u8; 16]);

            dev.download(&mut dfu, 0, &block).expect("vec");
            assert_eq!(dfu.state(), DfuState::DfuError);
            assert_eq!(dfu.status_code(), DfuStatusCode::ErrAddress);
            assert!(!dfu.target().was_erased());
        })
        .expect("with_usb");
}

#[test]
fn test_erase_failure_then_retry() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            dev.set_interface(&mut dfu, 1).expect("set");
            dfu.target_mut().fail_erase = true;

            let image = make_image(MODEL, &UID_BODY);
            dev.download(&mut dfu, 0, &image).expect("vec");
            assert_eq!(dfu.state(), DfuState::DfuError);
            assert_eq!(dfu.status_code(), DfuStatusCode::ErrErase);

            dev.clear_status(&mut dfu).expect("vec");
            assert_eq!(dfu.state(), DfuState::DfuIdle);

            // Second attempt with a healthy flash.
            dfu.target_mut().fail_erase = false;
            stream_image(&mut dev, &mut dfu, &image, 64).expect("stream");
            assert_eq!(dfu.state(), DfuState::DfuIdle);
            assert_eq!(dfu.status_code(), DfuStatusCode::Ok);
            assert_eq!(dfu.target().read_bytes(UID_BASE, 6), &UID_BODY[..]);
        })
        .expect("with_usb");
}

#[test]
fn test_program_failure() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            dev.set_interface(&mut dfu, 1).expect("set");
            dfu.target_mut().fail_write = true;

            let image = make_image(MODEL, &UID_BODY);
            dev.download(&mut dfu, 0, &image).expect("vec");
            assert_eq!(dfu.state(), DfuState::DfuError);
            assert_eq!(dfu.status_code(), DfuStatusCode::ErrProg);
        })
        .expect("with_usb");
}

#[test]
fn test_verify_failure() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            dev.set_interface(&mut dfu, 1).expect("set");
            dfu.target_mut().corrupt_read = true;

            let image = make_image(MODEL, &UID_BODY);
            dev.download(&mut dfu, 0, &image).expect("vec");
            assert_eq!(dfu.state(), DfuState::DfuError);
            assert_eq!(dfu.status_code(), DfuStatusCode::ErrVerify);
        })
        .expect("with_usb");
}

#[test]
fn test_incomplete_image() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            dev.set_interface(&mut dfu, 1).expect("set");

            let image = make_image(MODEL, &UID_BODY);
            dev.download(&mut dfu, 0, &image[..25]).expect("vec");
            dev.get_status(&mut dfu).expect("vec");

            dev.download(&mut dfu, 1, &[]).expect_err("stall");
            assert_eq!(dfu.state(), DfuState::DfuError);
            assert_eq!(dfu.status_code(), DfuStatusCode::ErrNotdone);
        })
        .expect("with_usb");
}

#[test]
fn test_zero_length_download_from_idle() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            dev.download(&mut dfu, 0, &[]).expect_err("stall");
            assert_eq!(dfu.state(), DfuState::DfuError);
            assert_eq!(dfu.status_code(), DfuStatusCode::ErrStalledPkt);
            assert!(!dfu.target().was_erased());
        })
        .expect("with_usb");
}

#[test]
fn test_oversize_block() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            let block = [0u8; 65];
            dev.download(&mut dfu, 0, &block).expect_err("stall");
            assert_eq!(dfu.state(), DfuState::DfuError);
            assert_eq!(dfu.status_code(), DfuStatusCode::ErrStalledPkt);
            assert!(!dfu.target().was_erased());
        })
        .expect("with_usb");
}

#[test]
fn test_abort_before_erase() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            dev.set_interface(&mut dfu, 1).expect("set");

            let image = make_image(MODEL, &UID_BODY);
            // Seven bytes is not yet a whole header, so nothing is erased.
            dev.download(&mut dfu, 0, &image[..7]).expect("vec");
            dev.get_status(&mut dfu).expect("vec");

            dev.abort(&mut dfu).expect("vec");
            assert_eq!(dfu.state(), DfuState::DfuIdle);
            assert_eq!(dfu.status_code(), DfuStatusCode::Ok);
            assert!(!dfu.target().was_erased());

            // The aborted transfer leaves no residue; a full download works.
            stream_image(&mut dev, &mut dfu, &image, 64).expect("stream");
            assert_eq!(dfu.target().read_bytes(UID_BASE, 6), &UID_BODY[..]);
        })
        .expect("with_usb");
}

#[test]
fn test_upload_stalls() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            dev.upload(&mut dfu, 0, 64).expect_err("stall");
            assert_eq!(dfu.state(), DfuState::DfuError);
            assert_eq!(dfu.status_code(), DfuStatusCode::ErrStalledPkt);
        })
        .expect("with_usb");
}

#[test]
fn test_unexpected_clear_status() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            dev.clear_status(&mut dfu).expect_err("stall");
            assert_eq!(dfu.state(), DfuState::DfuError);
            assert_eq!(dfu.status_code(), DfuStatusCode::ErrStalledPkt);
        })
        .expect("with_usb");
}

#[test]
fn test_uid_writes_disabled() {
    MkLockedDfu {}
        .with_usb(|mut dfu, mut dev| {
            dev.set_interface(&mut dfu, 1).expect("set");

            let image = make_image(MODEL, &UID_BODY);
            dev.download(&mut dfu, 0, &image).expect("vec");
            assert_eq!(dfu.state(), DfuState::DfuError);
            assert_eq!(dfu.status_code(), DfuStatusCode::ErrTarget);
        })
        .expect("with_usb");
}

#[test]
fn test_power_on_reset_mark() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            dfu.mark_unexpected_power_on_reset();
            let vec = dev.get_status(&mut dfu).expect("vec");
            assert_eq!(vec, status(STATUS_ERR_POR, 0, DFU_ERROR));

            dev.clear_status(&mut dfu).expect("vec");
            let vec = dev.get_status(&mut dfu).expect("vec");
            assert_eq!(vec, status(STATUS_OK, 0, DFU_IDLE));
        })
        .expect("with_usb");
}

#[test]
fn test_firmware_corrupt_mark() {
    MkDfu {}
        .with_usb(|mut dfu, mut dev| {
            dfu.mark_firmware_corrupt();
            assert_eq!(dfu.state(), DfuState::DfuError);
            assert_eq!(dfu.status_code(), DfuStatusCode::ErrFirmware);

            // Downloads are refused until the host clears the error.
            let image = make_image(MODEL, &UID_BODY);
            dev.download(&mut dfu, 0, &image).expect_err("stall");

            dev.clear_status(&mut dfu).expect("vec");
            assert_eq!(dfu.state(), DfuState::DfuIdle);
        })
        .expect("with_usb");
}
