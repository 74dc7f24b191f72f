//! Hardware capability traits.
//!
//! The protocol engines in this crate never touch registers directly; they
//! drive these traits. The firmware implements them over the real
//! peripherals, the test suite implements them over emulated hardware and
//! calls the same interrupt entry points the real ISRs would.

/// Errors reported by the flash primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum FlashError {
    /// A page erase did not complete.
    Erase,
    /// A word program did not complete.
    Write,
}

/// Raw flash access: page erase, word program, word read.
///
/// Addresses are absolute. Callers are responsible for staying inside a
/// region they own; implementations may still refuse out-of-range addresses.
pub trait Flash {
    /// Size of an erase page in bytes.
    const PAGE_SIZE: u32 = 4096;

    /// Erases the page containing `address`.
    fn erase_page(&mut self, address: u32) -> Result<(), FlashError>;

    /// Programs one 32-bit word.
    fn write_word(&mut self, address: u32, word: u32) -> Result<(), FlashError>;

    /// Reads one 32-bit word. Erased flash reads as 0xFFFFFFFF.
    fn read_word(&self, address: u32) -> u32;
}

/// The edge that produced an input-capture event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum CaptureEdge {
    /// The line went low.
    Falling,
    /// The line went high.
    Rising,
}

/// One input-capture measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct CaptureEvent {
    /// Which edge was seen.
    pub edge: CaptureEdge,
    /// 100 ns ticks since the previous edge. Wraps at 16 bits, so long
    /// periods must be cross-checked against the coarse clock.
    pub ticks: u16,
}

/// The serial-line hardware owned by the transceiver: a UART running
/// 250 kbaud 8N2, the break-generator and driver-enable pins, a one-shot
/// 100 ns-resolution timer, and an input-capture unit watching the RX line.
///
/// Methods prefixed `uart_` may be called from the UART interrupt; the pin
/// and timer methods may be called from the timer interrupt. None of them
/// may block.
pub trait TransceiverHal {
    /// Takes the TX pin away from the UART and drives it to the given level.
    /// `false` is the line's idle (mark) level; `true` holds it in the
    /// break (space) level.
    fn set_break(&mut self, active: bool);

    /// Enables or disables the EIA-485 driver.
    fn set_tx_enable(&mut self, enabled: bool);

    /// Enables or disables the EIA-485 receiver.
    fn set_rx_enable(&mut self, enabled: bool);

    /// Returns the TX pin to the UART and enables the transmitter.
    fn uart_enable_tx(&mut self);

    /// Disables the UART transmitter.
    fn uart_disable_tx(&mut self);

    /// Enables the UART receiver.
    fn uart_enable_rx(&mut self);

    /// Disables the UART receiver and drops any buffered bytes.
    fn uart_disable_rx(&mut self);

    /// Pushes a byte into the TX FIFO. Only valid while
    /// [`uart_tx_full`](TransceiverHal::uart_tx_full) is `false`.
    fn uart_write(&mut self, byte: u8);

    /// True when the TX FIFO cannot take another byte.
    fn uart_tx_full(&self) -> bool;

    /// True once the FIFO and the transmit shift register have drained,
    /// i.e. the last stop bit is on the wire.
    fn uart_tx_idle(&self) -> bool;

    /// Pops a received byte, if any.
    fn uart_read(&mut self) -> Option<u8>;

    /// Returns `true` if a framing or overrun error occurred since the last
    /// call, clearing the condition.
    fn uart_take_errors(&mut self) -> bool;

    /// Masks or unmasks the TX-ready interrupt.
    fn uart_set_tx_interrupt(&mut self, enabled: bool);

    /// Masks or unmasks the RX-ready interrupt.
    fn uart_set_rx_interrupt(&mut self, enabled: bool);

    /// Arms the one-shot timer to fire its interrupt after `ticks` 100 ns
    /// periods. Re-arming before expiry restarts the countdown.
    fn timer_start(&mut self, ticks: u16);

    /// Disarms the one-shot timer.
    fn timer_stop(&mut self);

    /// Starts edge capture on the RX line, both edges.
    fn capture_enable(&mut self);

    /// Stops edge capture and drops any queued events.
    fn capture_disable(&mut self);

    /// Pops the next captured edge, if any.
    fn capture_read(&mut self) -> Option<CaptureEvent>;
}

/// The reset-time environment the boot-entry decision runs in.
pub trait BootEnvironment {
    /// Reads the stored boot-option word.
    fn boot_option(&self) -> crate::boot::BootOption;

    /// Samples the bootloader strap pin. `true` means the pin is in its
    /// "hold in bootloader" state; board polarity is resolved inside the
    /// implementation so a double inversion cannot creep in above it.
    fn bootloader_switch_held(&self) -> bool;

    /// Reads the first word of the application's vector table.
    fn application_reset_vector(&self) -> u32;
}
