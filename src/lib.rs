#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
//!
//! Firmware core for a USB-attached DMX512/RDM gateway and its DFU
//! bootloader.
//!
//! ## About
//!
//! The gateway bridges a host computer to the EIA-485 lighting bus:
//! 250 kbaud, 8N2, with frames delimited by a break/mark sequence the UART
//! cannot produce or measure on its own. Two engines carry the work:
//!
//! * [`transceiver::Transceiver`] — the line state machine. It manufactures
//!   the BREAK with a GPIO and a 100 ns one-shot timer, feeds the UART from
//!   interrupts, measures incoming breaks with an input-capture unit, and
//!   enforces the E1.11/E1.20 listen windows and back-offs. It runs as a
//!   controller (transmit DMX, originate RDM), a responder (receive and
//!   answer), or in loopback self test.
//! * [`class::DfuClass`] — a DFU 1.1 device class for the `usb-device`
//!   stack, used by the bootloader. Downloads carry a 20-byte image header
//!   that is validated before any flash is touched; blocks are numbered
//!   strictly from zero and programmed word-by-word with read-back
//!   verification. The device is manifestation tolerant.
//!
//! Around them sit the pieces both depend on: [`clock::CoarseClock`] for
//! wraparound-safe 100 µs time, the capability traits in [`hal`] that the
//! firmware implements over real peripherals and the tests implement over
//! emulated ones, the [`image`] framing shared with the host-side packaging
//! tools, and the [`boot`] decision taken at reset.
//!
//! This crate is the protocol and policy layer only. USB endpoint plumbing,
//! pin and clock selection, and the host-facing message transport live in
//! the surrounding firmware.
//!
//! ## Interrupt discipline
//!
//! The `on_*` methods of [`transceiver::Transceiver`] and
//! [`clock::CoarseClock::on_tick`] are the only entry points meant for
//! interrupt context. They run in bounded time, touch no flash, and emit no
//! events; everything observable comes out of `tasks()` and
//! `usb_dev.poll()`, called from the main loop.

pub mod boot;
/// DFU bootloader USB class.
pub mod class;
pub mod clock;
pub mod counters;
pub mod hal;
pub mod image;
pub mod rdm;
pub mod timing;
pub mod transceiver;

#[doc(inline)]
pub use crate::class::{DfuClass, DfuState, DfuStatusCode, DfuTarget, MemoryRegion};

#[doc(inline)]
pub use crate::clock::CoarseClock;

#[doc(inline)]
pub use crate::transceiver::{EventHandler, EventResult, Mode, Operation, Transceiver};
