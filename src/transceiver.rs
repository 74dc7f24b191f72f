//! The DMX512/RDM line transceiver.
//!
//! A non-blocking state machine that owns the UART, the break-generator and
//! driver-enable pins, a 100 ns one-shot timer and the input-capture unit,
//! all through [`TransceiverHal`]. Interrupt handlers call the `on_*` entry
//! points and must never do more than advance the state machine; completion
//! events and received frames are handed out of [`Transceiver::tasks`],
//! which the main loop calls between interrupts.
//!
//! Every queued operation produces exactly one completion event carrying the
//! caller's token. Timeouts are ordinary results, not errors: an RDM
//! broadcast or DUB that hears nothing completes with
//! [`EventResult::RxTimeout`].

use crate::clock::{CoarseClock, Timestamp};
use crate::counters::ReceiverCounters;
use crate::hal::{CaptureEdge, TransceiverHal};
use crate::rdm;
use crate::timing::*;

/// Largest frame buffered in either direction: a start code plus 512 slots.
pub const FRAME_BUFFER_SIZE: usize = DMX_FRAME_SIZE + 1;

/// The byte looped back over the bus during a self test.
const SELF_TEST_BYTE: u8 = 0x55;

/// Caller-supplied tag returned verbatim in the completion event.
pub type Token = u8;

/// The three operating modes of the transceiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Mode {
    /// Listen to the bus and answer RDM requests.
    Responder,
    /// Drive the bus: send DMX and originate RDM transactions.
    Controller,
    /// Loopback testing of the line hardware.
    SelfTest,
}

/// What kind of operation a completion event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Operation {
    /// A DMX or ASC frame, transmit only.
    TxOnly,
    /// A Discovery Unique Branch request.
    RdmDub,
    /// A broadcast RDM request, no response expected.
    RdmBroadcast,
    /// A unicast RDM request with a listen window for the response.
    RdmWithResponse,
    /// An RDM response sent while in responder mode.
    RdmResponse,
    /// A mode change committed.
    ModeChange,
    /// A loopback self test.
    SelfTest,
}

/// How an operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum EventResult {
    /// The operation completed.
    Ok,
    /// The UART reported a framing or overrun fault while transmitting.
    TxError,
    /// A response was captured; the event carries its bytes.
    RxData,
    /// Nothing was heard inside the listen window.
    RxTimeout,
    /// A response arrived but failed its surface checks.
    RxInvalid,
}

/// A completion event for one queued operation.
#[derive(Debug)]
pub struct TransceiverEvent<'a> {
    /// The token supplied when the operation was queued.
    pub token: Token,
    /// The kind of operation that completed.
    pub op: Operation,
    /// How it went.
    pub result: EventResult,
    /// Captured response bytes, empty unless `result` is
    /// [`EventResult::RxData`] or [`EventResult::RxInvalid`].
    pub data: &'a [u8],
}

/// Receives completion events and responder-mode frames.
///
/// Both methods are called from [`Transceiver::tasks`] only, never from an
/// interrupt. The return value reports whether the handler consumed the
/// byte slice; either way the buffer belongs to the transceiver again once
/// the call returns.
pub trait EventHandler {
    /// A queued operation finished.
    fn on_event(&mut self, event: &TransceiverEvent<'_>) -> bool;

    /// A frame was received in responder mode. `frame[0]` is the start
    /// code; `timestamp` is the coarse time of the last slot.
    fn on_frame(&mut self, frame: &[u8], timestamp: Timestamp) -> bool;
}

/// Run-time timing parameters. All setters validate and leave the value
/// untouched on a rejected input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
struct Config {
    /// TX break, microseconds.
    break_time: u16,
    /// TX mark-after-break, microseconds.
    mark_time: u16,
    /// Broadcast listen window, 100 µs ticks.
    rdm_broadcast_listen: u16,
    /// Unicast response window, 100 µs ticks.
    rdm_response_timeout: u16,
    /// Deadline for the start of a DUB response, 100 ns ticks.
    rdm_dub_response_limit: u32,
    /// Responder turnaround delay, 100 ns ticks.
    rdm_responder_delay: u16,
    /// Extra randomized turnaround, 100 ns ticks.
    rdm_responder_jitter: u16,
}

impl Config {
    const fn new() -> Self {
        Self {
            break_time: DEFAULT_BREAK_TIME,
            mark_time: DEFAULT_MARK_TIME,
            rdm_broadcast_listen: DEFAULT_BROADCAST_LISTEN,
            rdm_response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            rdm_dub_response_limit: DEFAULT_DUB_RESPONSE_LIMIT,
            rdm_responder_delay: DEFAULT_RESPONDER_DELAY,
            rdm_responder_jitter: 0,
        }
    }
}

// Line states. The ISRs own the state while a frame is moving; the main
// loop owns it from TxComplete until the next operation starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    Idle,
    ResponderDelay,
    TxBreak,
    TxMark,
    TxData,
    TxDrain,
    ListenMbb,
    ListenMbbDub,
    RxBreak,
    RxMark,
    RxData,
    TxComplete,
}

struct ActiveFrame {
    token: Token,
    op: Operation,
    include_break: bool,
    len: u16,
    offset: u16,
    buf: [u8; FRAME_BUFFER_SIZE],
}

struct Completion {
    token: Token,
    op: Operation,
    result: EventResult,
    rx_len: u16,
}

struct Receiver {
    buf: [u8; FRAME_BUFFER_SIZE],
    len: u16,
    // Expected total frame length once an RDM message-length slot has been
    // seen; 0 while unknown.
    expected_len: u16,
    last_byte_at: Timestamp,
    break_fall_at: Timestamp,
    frame_ready: bool,
    ready_len: u16,
    ready_at: Timestamp,
}

impl Receiver {
    const fn new() -> Self {
        Self {
            buf: [0; FRAME_BUFFER_SIZE],
            len: 0,
            expected_len: 0,
            last_byte_at: 0,
            break_fall_at: 0,
            frame_ready: false,
            ready_len: 0,
            ready_at: 0,
        }
    }

    fn begin_frame(&mut self, now: Timestamp) {
        self.len = 0;
        self.expected_len = 0;
        self.last_byte_at = now;
    }

    fn push(&mut self, byte: u8) -> bool {
        if (self.len as usize) < FRAME_BUFFER_SIZE {
            self.buf[self.len as usize] = byte;
            self.len += 1;
            true
        } else {
            false
        }
    }
}

/// The DMX/RDM line state machine.
pub struct Transceiver<H: TransceiverHal> {
    hal: H,
    mode: Mode,
    pending_mode: Option<(Mode, Token)>,
    state: LineState,
    config: Config,
    frame: Option<ActiveFrame>,
    completion: Option<Completion>,
    rx: Receiver,
    counters: ReceiverCounters,
    line_errors: u32,
    listen_started: Timestamp,
    backoff_from: Timestamp,
    backoff_ticks: u32,
    break_started: Timestamp,
    break_seen: bool,
    jitter_phase: u16,
}

impl<H: TransceiverHal> Transceiver<H> {
    /// Builds a transceiver and quiesces the line into responder mode.
    pub fn new(hal: H) -> Self {
        let mut t = Self {
            hal,
            mode: Mode::Responder,
            pending_mode: None,
            state: LineState::Idle,
            config: Config::new(),
            frame: None,
            completion: None,
            rx: Receiver::new(),
            counters: ReceiverCounters::new(),
            line_errors: 0,
            listen_started: 0,
            backoff_from: 0,
            backoff_ticks: 0,
            break_started: 0,
            break_seen: false,
            jitter_phase: 0,
        };
        t.reset();
        t
    }

    /// Cancels any in-flight operation and returns to responder mode.
    ///
    /// No completion event is emitted for a cancelled operation; callers
    /// are expected to have stopped issuing work first.
    pub fn reset(&mut self) {
        self.hal.timer_stop();
        self.frame = None;
        self.completion = None;
        self.pending_mode = None;
        self.rx = Receiver::new();
        self.backoff_ticks = 0;
        self.break_seen = false;
        self.mode = Mode::Responder;
        self.enter_responder_listen();
    }

    /// The currently active mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Requests a mode change.
    ///
    /// Returns `false` if another change is still pending. The change
    /// itself commits at the next quiescent point between operations, at
    /// which time a [`Operation::ModeChange`] event carries the token back.
    pub fn set_mode(&mut self, mode: Mode, token: Token) -> bool {
        if self.pending_mode.is_some() {
            return false;
        }
        self.pending_mode = Some((mode, token));
        true
    }

    /// Receive-path statistics.
    pub fn counters(&self) -> &ReceiverCounters {
        &self.counters
    }

    /// Clears all receive-path statistics.
    pub fn reset_counters(&mut self) {
        self.counters.reset();
    }

    /// Clears the COMMS_STATUS subset of the statistics.
    pub fn reset_comms_status_counters(&mut self) {
        self.counters.reset_comms_status();
    }

    /// UART framing/overrun faults seen while receiving.
    pub fn line_error_count(&self) -> u32 {
        self.line_errors
    }

    // Parameter access.

    /// TX break time in microseconds.
    pub fn break_time(&self) -> u16 {
        self.config.break_time
    }

    /// Sets the TX break time in microseconds.
    pub fn set_break_time(&mut self, micros: u16) -> bool {
        if !(MIN_BREAK_TIME..=MAX_BREAK_TIME).contains(&micros) {
            return false;
        }
        self.config.break_time = micros;
        true
    }

    /// TX mark-after-break in microseconds.
    pub fn mark_time(&self) -> u16 {
        self.config.mark_time
    }

    /// Sets the TX mark-after-break in microseconds.
    pub fn set_mark_time(&mut self, micros: u16) -> bool {
        if !(MIN_MARK_TIME..=MAX_MARK_TIME).contains(&micros) {
            return false;
        }
        self.config.mark_time = micros;
        true
    }

    /// Broadcast listen window in 100 µs ticks.
    pub fn rdm_broadcast_listen(&self) -> u16 {
        self.config.rdm_broadcast_listen
    }

    /// Sets the broadcast listen window in 100 µs ticks.
    pub fn set_rdm_broadcast_listen(&mut self, ticks: u16) -> bool {
        if ticks > MAX_BROADCAST_LISTEN {
            return false;
        }
        self.config.rdm_broadcast_listen = ticks;
        true
    }

    /// Unicast response window in 100 µs ticks.
    pub fn rdm_response_timeout(&self) -> u16 {
        self.config.rdm_response_timeout
    }

    /// Sets the unicast response window in 100 µs ticks.
    pub fn set_rdm_response_timeout(&mut self, ticks: u16) -> bool {
        if !(MIN_RESPONSE_TIMEOUT..=MAX_RESPONSE_TIMEOUT).contains(&ticks) {
            return false;
        }
        self.config.rdm_response_timeout = ticks;
        true
    }

    /// DUB response deadline in 100 ns ticks.
    pub fn rdm_dub_response_limit(&self) -> u32 {
        self.config.rdm_dub_response_limit
    }

    /// Sets the DUB response deadline in 100 ns ticks.
    pub fn set_rdm_dub_response_limit(&mut self, ticks: u32) -> bool {
        if !(MIN_DUB_RESPONSE_LIMIT..=MAX_DUB_RESPONSE_LIMIT).contains(&ticks) {
            return false;
        }
        self.config.rdm_dub_response_limit = ticks;
        true
    }

    /// Responder turnaround delay in 100 ns ticks.
    pub fn rdm_responder_delay(&self) -> u16 {
        self.config.rdm_responder_delay
    }

    /// Sets the responder turnaround delay in 100 ns ticks. The jitter is
    /// clamped so delay plus jitter stays inside the E1.20 window.
    pub fn set_rdm_responder_delay(&mut self, ticks: u16) -> bool {
        if !(MIN_RESPONDER_DELAY..=MAX_RESPONDER_DELAY).contains(&ticks) {
            return false;
        }
        self.config.rdm_responder_delay = ticks;
        let headroom = MAX_RESPONDER_DELAY - ticks;
        if self.config.rdm_responder_jitter > headroom {
            self.config.rdm_responder_jitter = headroom;
        }
        true
    }

    /// Responder turnaround jitter in 100 ns ticks.
    pub fn rdm_responder_jitter(&self) -> u16 {
        self.config.rdm_responder_jitter
    }

    /// Sets the responder turnaround jitter in 100 ns ticks. Delay plus
    /// jitter must stay inside the E1.20 window.
    pub fn set_rdm_responder_jitter(&mut self, ticks: u16) -> bool {
        if ticks > MAX_RESPONDER_DELAY - self.config.rdm_responder_delay {
            return false;
        }
        self.config.rdm_responder_jitter = ticks;
        true
    }

    // Queue operations.

    /// Queues a DMX frame. Controller mode only. Slots beyond 512 are
    /// silently dropped.
    pub fn queue_dmx(&mut self, token: Token, slots: &[u8]) -> bool {
        self.queue_with_start_code(token, Operation::TxOnly, NULL_START_CODE, slots)
    }

    /// Queues a frame with an alternate start code. Controller mode only.
    pub fn queue_asc(&mut self, token: Token, start_code: u8, slots: &[u8]) -> bool {
        self.queue_with_start_code(token, Operation::TxOnly, start_code, slots)
    }

    /// Queues an RDM request. `frame` starts at the sub-start code; the RDM
    /// start code is prepended here. Controller mode only.
    pub fn queue_rdm_request(&mut self, token: Token, frame: &[u8], is_broadcast: bool) -> bool {
        let op = if is_broadcast {
            Operation::RdmBroadcast
        } else {
            Operation::RdmWithResponse
        };
        self.queue_with_start_code(token, op, rdm::RDM_START_CODE, frame)
    }

    /// Queues a Discovery Unique Branch request. `frame` starts at the
    /// sub-start code. Controller mode only.
    pub fn queue_rdm_dub(&mut self, token: Token, frame: &[u8]) -> bool {
        self.queue_with_start_code(token, Operation::RdmDub, rdm::RDM_START_CODE, frame)
    }

    /// Queues an RDM response. Responder mode only. `frame` is sent
    /// verbatim; `include_break` selects whether a BREAK/MAB precedes it
    /// (a DUB response carries neither).
    pub fn queue_rdm_response(&mut self, token: Token, frame: &[u8], include_break: bool) -> bool {
        if self.mode != Mode::Responder || !self.can_queue() {
            return false;
        }
        if frame.is_empty() || frame.len() > FRAME_BUFFER_SIZE {
            return false;
        }
        let mut active = ActiveFrame {
            token,
            op: Operation::RdmResponse,
            include_break,
            len: frame.len() as u16,
            offset: 0,
            buf: [0; FRAME_BUFFER_SIZE],
        };
        active.buf[..frame.len()].copy_from_slice(frame);
        self.frame = Some(active);
        true
    }

    /// Queues a loopback self test. Self-test mode only.
    pub fn queue_self_test(&mut self, token: Token) -> bool {
        if self.mode != Mode::SelfTest || !self.can_queue() {
            return false;
        }
        let mut active = ActiveFrame {
            token,
            op: Operation::SelfTest,
            include_break: false,
            len: 1,
            offset: 0,
            buf: [0; FRAME_BUFFER_SIZE],
        };
        active.buf[0] = SELF_TEST_BYTE;
        self.frame = Some(active);
        true
    }

    fn can_queue(&self) -> bool {
        self.pending_mode.is_none() && self.frame.is_none() && self.completion.is_none()
    }

    fn queue_with_start_code(
        &mut self,
        token: Token,
        op: Operation,
        start_code: u8,
        data: &[u8],
    ) -> bool {
        if self.mode != Mode::Controller || !self.can_queue() {
            return false;
        }
        let len = data.len().min(DMX_FRAME_SIZE);
        let mut active = ActiveFrame {
            token,
            op,
            include_break: true,
            len: len as u16 + 1,
            offset: 0,
            buf: [0; FRAME_BUFFER_SIZE],
        };
        active.buf[0] = start_code;
        active.buf[1..1 + len].copy_from_slice(&data[..len]);
        self.frame = Some(active);
        true
    }

    // Main-loop step.

    /// Advances everything that must not run in interrupt context:
    /// completion and frame dispatch, coarse timeouts, mode-change commit,
    /// and starting the next queued frame.
    pub fn tasks<E: EventHandler>(&mut self, clock: &CoarseClock, events: &mut E) {
        self.check_coarse_timeouts(clock);
        self.dispatch_rx_frame(events);
        self.dispatch_completion(events);
        self.commit_mode_change(events);
        self.start_next_frame(clock);
    }

    /// Entry point for the one-shot timer interrupt.
    pub fn on_timer_event(&mut self, clock: &CoarseClock) {
        match self.state {
            LineState::ResponderDelay => {
                let include_break = self
                    .frame
                    .as_ref()
                    .map(|f| f.include_break)
                    .unwrap_or(false);
                if include_break {
                    self.begin_break(clock);
                } else {
                    self.begin_data_phase();
                }
            }
            LineState::TxBreak => {
                self.hal.set_break(false);
                self.state = LineState::TxMark;
                self.hal.timer_start(self.config.mark_time * 10);
            }
            LineState::TxMark => {
                self.begin_data_phase();
            }
            LineState::ListenMbbDub => {
                // Either the response window or the inter-byte gap expired.
                self.hal.timer_stop();
                let result = if self.rx.len > 0 {
                    EventResult::RxData
                } else {
                    EventResult::RxTimeout
                };
                self.finish_listen(clock, result);
            }
            _ => {}
        }
    }

    /// Entry point for the UART interrupt, all three sources.
    pub fn on_uart_event(&mut self, clock: &CoarseClock) {
        if self.hal.uart_take_errors() {
            self.handle_uart_fault(clock);
        }

        if self.state == LineState::TxData {
            self.feed_uart();
        }
        if self.state == LineState::TxDrain && self.hal.uart_tx_idle() {
            self.finish_tx(clock);
        }

        while let Some(byte) = self.hal.uart_read() {
            self.handle_rx_byte(clock, byte);
        }
    }

    /// Entry point for the input-capture interrupt.
    pub fn on_capture_event(&mut self, clock: &CoarseClock) {
        while let Some(event) = self.hal.capture_read() {
            match event.edge {
                CaptureEdge::Falling => {
                    if self.state == LineState::RxData {
                        // The next frame's break also ends this frame.
                        self.end_rx_frame(clock);
                    }
                    if matches!(
                        self.state,
                        LineState::Idle
                            | LineState::ListenMbb
                            | LineState::RxBreak
                            | LineState::RxMark
                            | LineState::RxData
                    ) {
                        self.rx.break_fall_at = clock.now();
                        self.state = LineState::RxBreak;
                    }
                }
                CaptureEdge::Rising => {
                    if self.state != LineState::RxBreak {
                        continue;
                    }
                    // The capture timer is 16 bits; a low period long
                    // enough to wrap it shows up as a small tick count
                    // with a large coarse delta, so both clocks must
                    // agree before the low counts as a BREAK.
                    let in_window = (RX_BREAK_TIME_MIN..=RX_BREAK_TIME_MAX)
                        .contains(&event.ticks)
                        && clock.elapsed(self.rx.break_fall_at) <= RX_BREAK_COARSE_LIMIT;
                    // While a received frame waits for dispatch the buffer
                    // is spoken for; a frame starting in that window is
                    // dropped whole.
                    if in_window && !self.rx.frame_ready {
                        self.rx.begin_frame(clock.now());
                        self.state = LineState::RxMark;
                    } else {
                        self.state = self.listen_base_state();
                    }
                }
            }
        }
    }

    // TX path.

    fn start_next_frame(&mut self, clock: &CoarseClock) {
        if self.state != LineState::Idle
            || self.completion.is_some()
            || self.rx.frame_ready
            || self.frame.is_none()
        {
            return;
        }
        if !self.backoff_elapsed(clock) {
            return;
        }

        let op = match self.frame.as_ref() {
            Some(f) => f.op,
            None => return,
        };

        // Take the line: receiver off unless the operation listens to its
        // own transmission.
        self.hal.capture_disable();
        self.hal.uart_set_rx_interrupt(false);
        self.hal.uart_disable_rx();
        self.hal.set_rx_enable(false);
        self.hal.set_tx_enable(true);

        match op {
            Operation::SelfTest => {
                self.hal.set_rx_enable(true);
                self.hal.uart_enable_rx();
                self.hal.uart_set_rx_interrupt(true);
                self.rx.begin_frame(clock.now());
                self.begin_data_phase();
            }
            Operation::RdmResponse => {
                let delay = self.responder_turnaround();
                self.state = LineState::ResponderDelay;
                self.hal.timer_start(delay);
            }
            _ => {
                self.begin_break(clock);
            }
        }
    }

    fn responder_turnaround(&mut self) -> u16 {
        let delay = self.config.rdm_responder_delay;
        let jitter = self.config.rdm_responder_jitter;
        if jitter == 0 {
            return delay;
        }
        // A rolling phase spreads responses across the jitter window
        // without needing an entropy source.
        self.jitter_phase = self.jitter_phase.wrapping_add(0x9e3);
        delay + self.jitter_phase % (jitter + 1)
    }

    fn backoff_elapsed(&self, clock: &CoarseClock) -> bool {
        if self.backoff_ticks != 0 && !clock.has_elapsed(self.backoff_from, self.backoff_ticks) {
            return false;
        }
        if self.break_seen && !clock.has_elapsed(self.break_started, MIN_BREAK_TO_BREAK) {
            return false;
        }
        true
    }

    fn begin_break(&mut self, clock: &CoarseClock) {
        self.break_started = clock.now();
        self.break_seen = true;
        self.hal.set_break(true);
        self.state = LineState::TxBreak;
        self.hal.timer_start(self.config.break_time * 10);
    }

    fn begin_data_phase(&mut self) {
        self.hal.uart_enable_tx();
        self.state = LineState::TxData;
        self.feed_uart();
        if self.state == LineState::TxData {
            self.hal.uart_set_tx_interrupt(true);
        }
    }

    fn feed_uart(&mut self) {
        let frame = match self.frame.as_mut() {
            Some(f) => f,
            None => return,
        };
        while !self.hal.uart_tx_full() && frame.offset < frame.len {
            self.hal.uart_write(frame.buf[frame.offset as usize]);
            frame.offset += 1;
        }
        if frame.offset == frame.len {
            // Leave the TX interrupt on; it keeps firing until the shift
            // register drains and finish_tx runs.
            self.state = LineState::TxDrain;
        }
    }

    fn finish_tx(&mut self, clock: &CoarseClock) {
        let op = match self.frame.as_ref() {
            Some(f) => f.op,
            None => return,
        };
        self.hal.uart_set_tx_interrupt(false);

        match op {
            Operation::TxOnly => {
                self.hal.uart_disable_tx();
                self.hal.set_tx_enable(false);
                self.complete(clock, EventResult::Ok, 0);
            }
            Operation::RdmResponse => {
                self.hal.uart_disable_tx();
                self.hal.set_tx_enable(false);
                self.complete(clock, EventResult::Ok, 0);
            }
            Operation::RdmBroadcast => {
                self.hal.uart_disable_tx();
                self.hal.set_tx_enable(false);
                self.listen_started = clock.now();
                self.state = LineState::ListenMbb;
            }
            Operation::RdmWithResponse => {
                self.hal.uart_disable_tx();
                self.hal.set_tx_enable(false);
                self.hal.set_rx_enable(true);
                self.hal.uart_enable_rx();
                self.hal.uart_set_rx_interrupt(true);
                self.hal.capture_enable();
                self.rx.begin_frame(clock.now());
                self.listen_started = clock.now();
                self.state = LineState::ListenMbb;
            }
            Operation::RdmDub => {
                self.hal.uart_disable_tx();
                self.hal.set_tx_enable(false);
                self.hal.set_rx_enable(true);
                self.hal.uart_enable_rx();
                self.hal.uart_set_rx_interrupt(true);
                // DUB responses are not break-framed; the one-shot timer
                // bounds the wait for the first byte.
                self.rx.begin_frame(clock.now());
                self.state = LineState::ListenMbbDub;
                self.hal.timer_start(self.config.rdm_dub_response_limit as u16);
            }
            Operation::SelfTest => {
                self.hal.uart_disable_tx();
                self.listen_started = clock.now();
                self.state = LineState::ListenMbb;
            }
            Operation::ModeChange => {}
        }
    }

    fn handle_uart_fault(&mut self, clock: &CoarseClock) {
        match self.state {
            LineState::TxData | LineState::TxDrain => {
                let op = self.frame.as_ref().map(|f| f.op);
                self.hal.uart_set_tx_interrupt(false);
                self.hal.uart_disable_tx();
                self.hal.set_tx_enable(false);
                if op.is_some() {
                    self.complete(clock, EventResult::TxError, 0);
                }
            }
            LineState::RxMark | LineState::RxData => {
                self.line_errors = self.line_errors.wrapping_add(1);
                self.abort_rx();
            }
            LineState::ListenMbbDub => {
                self.line_errors = self.line_errors.wrapping_add(1);
            }
            _ => {}
        }
    }

    // RX path.

    fn handle_rx_byte(&mut self, clock: &CoarseClock, byte: u8) {
        // Self-test loopback bytes can arrive while the transmitter is
        // still draining; stash them wherever the operation stands.
        if let Some(frame) = self.frame.as_ref() {
            if frame.op == Operation::SelfTest {
                self.rx.push(byte);
                self.rx.last_byte_at = clock.now();
                return;
            }
        }

        match self.state {
            LineState::RxMark => {
                self.rx.begin_frame(clock.now());
                self.rx.push(byte);
                self.state = LineState::RxData;
                self.note_rdm_length();
            }
            LineState::RxData => {
                if !self.rx.push(byte) {
                    // Buffer full; the frame is as complete as it gets.
                    self.end_rx_frame(clock);
                    return;
                }
                self.rx.last_byte_at = clock.now();
                self.note_rdm_length();
                if self.rx.expected_len != 0 && self.rx.len == self.rx.expected_len {
                    self.end_rx_frame(clock);
                }
            }
            LineState::ListenMbbDub => {
                self.rx.push(byte);
                self.rx.last_byte_at = clock.now();
                self.hal.timer_start(DUB_INTERBYTE_LIMIT);
            }
            _ => {}
        }
    }

    fn note_rdm_length(&mut self) {
        if self.rx.expected_len != 0 || self.rx.len < 3 {
            return;
        }
        if self.rx.buf[0] != rdm::RDM_START_CODE {
            return;
        }
        let message_length = self.rx.buf[2];
        if message_length >= rdm::MIN_MESSAGE_LENGTH {
            self.rx.expected_len = message_length as u16 + rdm::CHECKSUM_LENGTH as u16;
        }
    }

    fn end_rx_frame(&mut self, clock: &CoarseClock) {
        let len = self.rx.len;
        if len == 0 {
            self.state = self.listen_base_state();
            return;
        }
        if self.controller_listening() {
            let result = if self.rx.buf[0] == rdm::RDM_START_CODE
                && rdm::validate_frame(&self.rx.buf[..len as usize]).is_ok()
            {
                EventResult::RxData
            } else {
                EventResult::RxInvalid
            };
            self.finish_listen(clock, result);
        } else {
            self.record_responder_frame();
            self.state = LineState::Idle;
        }
    }

    fn record_responder_frame(&mut self) {
        let len = self.rx.len;
        let frame = &self.rx.buf[..len as usize];
        let valid = match frame[0] {
            NULL_START_CODE => {
                let slots = len - 1;
                self.counters
                    .record_dmx_frame(slots, rdm::checksum(frame) as u8);
                true
            }
            rdm::RDM_START_CODE => match rdm::validate_frame(frame) {
                Ok(()) => {
                    self.counters.rdm_frames = self.counters.rdm_frames.wrapping_add(1);
                    true
                }
                Err(fault) => {
                    self.count_rdm_fault(fault);
                    false
                }
            },
            _ => {
                self.counters.asc_frames = self.counters.asc_frames.wrapping_add(1);
                true
            }
        };
        if valid && !self.rx.frame_ready {
            self.rx.frame_ready = true;
            self.rx.ready_len = len;
            self.rx.ready_at = self.rx.last_byte_at;
        }
    }

    fn count_rdm_fault(&mut self, fault: rdm::FrameFault) {
        let c = &mut self.counters;
        match fault {
            rdm::FrameFault::TooShort => c.rdm_short_frame = c.rdm_short_frame.wrapping_add(1),
            rdm::FrameFault::SubStartCode => {
                c.rdm_sub_start_code_invalid = c.rdm_sub_start_code_invalid.wrapping_add(1)
            }
            rdm::FrameFault::MessageLength => {
                c.rdm_msg_len_invalid = c.rdm_msg_len_invalid.wrapping_add(1)
            }
            rdm::FrameFault::LengthMismatch => {
                c.rdm_length_mismatch = c.rdm_length_mismatch.wrapping_add(1)
            }
            rdm::FrameFault::ParamDataLength => {
                c.rdm_param_data_len_invalid = c.rdm_param_data_len_invalid.wrapping_add(1)
            }
            rdm::FrameFault::Checksum => {
                c.rdm_checksum_invalid = c.rdm_checksum_invalid.wrapping_add(1)
            }
        }
    }

    fn abort_rx(&mut self) {
        self.rx.len = 0;
        self.rx.expected_len = 0;
        self.state = self.listen_base_state();
    }

    fn controller_listening(&self) -> bool {
        matches!(
            self.frame.as_ref().map(|f| f.op),
            Some(Operation::RdmWithResponse) | Some(Operation::RdmDub)
        )
    }

    fn listen_base_state(&self) -> LineState {
        if self.controller_listening() {
            LineState::ListenMbb
        } else {
            LineState::Idle
        }
    }

    // Completion plumbing.

    fn finish_listen(&mut self, clock: &CoarseClock, result: EventResult) {
        let rx_len = match result {
            EventResult::RxData | EventResult::RxInvalid => self.rx.len,
            _ => 0,
        };
        self.hal.capture_disable();
        self.hal.uart_set_rx_interrupt(false);
        self.hal.uart_disable_rx();
        self.hal.set_rx_enable(false);
        self.hal.set_tx_enable(false);
        self.complete(clock, result, rx_len);
    }

    fn complete(&mut self, clock: &CoarseClock, result: EventResult, rx_len: u16) {
        let frame = match self.frame.take() {
            Some(f) => f,
            None => return,
        };
        self.backoff_from = clock.now();
        self.backoff_ticks = match (frame.op, result) {
            (Operation::RdmDub, _) => DUB_BACKOFF,
            (Operation::RdmBroadcast, _) => BROADCAST_BACKOFF,
            (Operation::RdmWithResponse, EventResult::RxTimeout) => MISSING_RESPONSE_BACKOFF,
            (Operation::TxOnly, _) => NON_RDM_BACKOFF,
            _ => 0,
        };
        self.completion = Some(Completion {
            token: frame.token,
            op: frame.op,
            result,
            rx_len,
        });
        self.state = LineState::TxComplete;
    }

    fn check_coarse_timeouts(&mut self, clock: &CoarseClock) {
        match self.state {
            LineState::ListenMbb => {
                let op = self.frame.as_ref().map(|f| f.op);
                match op {
                    Some(Operation::RdmBroadcast) => {
                        if clock.has_elapsed(
                            self.listen_started,
                            self.config.rdm_broadcast_listen as u32,
                        ) {
                            self.finish_listen(clock, EventResult::RxTimeout);
                        }
                    }
                    Some(Operation::RdmWithResponse) => {
                        if clock.has_elapsed(
                            self.listen_started,
                            self.config.rdm_response_timeout as u32,
                        ) {
                            self.finish_listen(clock, EventResult::RxTimeout);
                        }
                    }
                    Some(Operation::SelfTest) => {
                        if self.rx.len > 0 {
                            let result = if self.rx.buf[0] == SELF_TEST_BYTE {
                                EventResult::Ok
                            } else {
                                EventResult::TxError
                            };
                            self.finish_listen(clock, result);
                        } else if clock.has_elapsed(self.listen_started, SELF_TEST_TIMEOUT) {
                            self.finish_listen(clock, EventResult::RxTimeout);
                        }
                    }
                    _ => {}
                }
            }
            LineState::RxData => {
                let timeout = if self.rx.buf[0] == rdm::RDM_START_CODE {
                    RDM_INTERSLOT_TIMEOUT
                } else {
                    DMX_INTERSLOT_TIMEOUT
                };
                if clock.has_elapsed(self.rx.last_byte_at, timeout) {
                    self.end_rx_frame(clock);
                }
            }
            LineState::RxBreak => {
                // A rising edge that never comes means the line is stuck or
                // the edge was noise.
                if clock.has_elapsed(self.rx.break_fall_at, RX_BREAK_COARSE_LIMIT) {
                    self.abort_rx();
                }
            }
            LineState::RxMark => {
                if clock.has_elapsed(self.rx.last_byte_at, DMX_INTERSLOT_TIMEOUT) {
                    self.abort_rx();
                }
            }
            _ => {}
        }
    }

    fn dispatch_rx_frame<E: EventHandler>(&mut self, events: &mut E) {
        if !self.rx.frame_ready {
            return;
        }
        let len = self.rx.ready_len as usize;
        let timestamp = self.rx.ready_at;
        events.on_frame(&self.rx.buf[..len], timestamp);
        self.rx.frame_ready = false;
        self.rx.ready_len = 0;
        self.rx.len = 0;
        self.rx.expected_len = 0;
    }

    fn dispatch_completion<E: EventHandler>(&mut self, events: &mut E) {
        let completion = match self.completion.take() {
            Some(c) => c,
            None => return,
        };
        let event = TransceiverEvent {
            token: completion.token,
            op: completion.op,
            result: completion.result,
            data: &self.rx.buf[..completion.rx_len as usize],
        };
        events.on_event(&event);

        self.rx.len = 0;
        self.rx.expected_len = 0;
        if self.state == LineState::TxComplete {
            self.state = LineState::Idle;
            if self.mode == Mode::Responder {
                self.enter_responder_listen();
            }
        }
    }

    fn commit_mode_change<E: EventHandler>(&mut self, events: &mut E) {
        if self.state != LineState::Idle
            || self.frame.is_some()
            || self.completion.is_some()
            || self.rx.frame_ready
        {
            return;
        }
        let (mode, token) = match self.pending_mode.take() {
            Some(p) => p,
            None => return,
        };
        self.mode = mode;
        match mode {
            Mode::Responder => self.enter_responder_listen(),
            Mode::Controller | Mode::SelfTest => self.quiesce_line(),
        }
        let event = TransceiverEvent {
            token,
            op: Operation::ModeChange,
            result: EventResult::Ok,
            data: &[],
        };
        events.on_event(&event);
    }

    fn enter_responder_listen(&mut self) {
        self.hal.set_break(false);
        self.hal.uart_set_tx_interrupt(false);
        self.hal.uart_disable_tx();
        self.hal.set_tx_enable(false);
        self.hal.set_rx_enable(true);
        self.hal.uart_enable_rx();
        self.hal.uart_set_rx_interrupt(true);
        self.hal.capture_enable();
        self.state = LineState::Idle;
    }

    fn quiesce_line(&mut self) {
        self.hal.set_break(false);
        self.hal.uart_set_tx_interrupt(false);
        self.hal.uart_set_rx_interrupt(false);
        self.hal.uart_disable_tx();
        self.hal.uart_disable_rx();
        self.hal.capture_disable();
        self.hal.set_tx_enable(false);
        self.hal.set_rx_enable(false);
        self.state = LineState::Idle;
    }
}
