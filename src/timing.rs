//! Wire-level timing constants for DMX512 (E1.11) and RDM (E1.20).
//!
//! Three units appear here, chosen to fit the hardware that measures them:
//! microseconds for user-configurable TX times, 100 ns ticks for the
//! precision timer and input capture, and 100 µs coarse-clock ticks for the
//! longer listen windows and back-offs.

/// DMX/RDM baud rate.
pub const DMX_BAUD: u32 = 250_000;

/// The maximum number of slots in a frame, excluding the start code.
pub const DMX_FRAME_SIZE: usize = 512;

/// The Null Start Code.
pub const NULL_START_CODE: u8 = 0x00;

/// Time on the wire for one 8N2 character, in 100 ns ticks.
pub const BYTE_TIME_TICKS: u16 = 440;

// TX parameters, microseconds.

/// The shortest break a user may configure. DMX1990 allowed 88 µs and later
/// revisions raised it; half of that is still useful on the bench.
pub const MIN_BREAK_TIME: u16 = 44;

/// The longest break a user may configure; bounded by the 16-bit timer.
pub const MAX_BREAK_TIME: u16 = 800;

/// Default TX break, E1.11's recommended 176 µs.
pub const DEFAULT_BREAK_TIME: u16 = 176;

/// The shortest mark-after-break a user may configure (DMX1986 allowed 4 µs).
pub const MIN_MARK_TIME: u16 = 4;

/// The longest mark-after-break a user may configure.
pub const MAX_MARK_TIME: u16 = 800;

/// Default TX mark-after-break.
pub const DEFAULT_MARK_TIME: u16 = 12;

// Receive windows, 100 ns ticks.

/// The shortest low period accepted as a BREAK, E1.20 Table 3-3.
pub const RX_BREAK_TIME_MIN: u16 = 880;

/// The longest low period accepted as a BREAK.
pub const RX_BREAK_TIME_MAX: u16 = 10_000;

/// Coarse-clock bound on a BREAK's low period. A low longer than this has
/// wrapped the 16-bit capture timer at least once, so the measured value is
/// meaningless and the edge pair is treated as noise.
pub const RX_BREAK_COARSE_LIMIT: u32 = 11;

// Listen windows and back-offs, 100 µs coarse ticks.

/// How long a controller waits after a broadcast before the next frame,
/// by default. E1.20 Table 3-2 line 6, rounded up.
pub const DEFAULT_BROADCAST_LISTEN: u16 = 28;

/// Broadcast listen window bounds.
pub const MIN_BROADCAST_LISTEN: u16 = 0;
/// Upper bound for the broadcast listen window.
pub const MAX_BROADCAST_LISTEN: u16 = 50;

/// Default window in which a unicast RDM response must begin.
pub const DEFAULT_RESPONSE_TIMEOUT: u16 = 28;

/// Response window bounds, E1.20 Table 3-2.
pub const MIN_RESPONSE_TIMEOUT: u16 = 10;
/// Upper bound for the response window.
pub const MAX_RESPONSE_TIMEOUT: u16 = 50;

/// Inter-slot timeout inside an RDM frame, E1.20 Table 3-3 (2.1 ms).
pub const RDM_INTERSLOT_TIMEOUT: u32 = 21;

/// Inter-slot timeout inside a DMX or ASC frame, E1.11 Table 6 (1 s).
pub const DMX_INTERSLOT_TIMEOUT: u32 = 10_000;

/// Controller back-off after a DUB, E1.20 Table 3-2 line 2 (5.8 ms).
pub const DUB_BACKOFF: u32 = 58;

/// Controller back-off after a broadcast (176 µs rounded up).
pub const BROADCAST_BACKOFF: u32 = 2;

/// Controller back-off after an expected response never arrived (3 ms).
pub const MISSING_RESPONSE_BACKOFF: u32 = 30;

/// Controller back-off after a non-RDM frame (176 µs rounded up).
pub const NON_RDM_BACKOFF: u32 = 2;

/// Minimum break-to-break time at a controller, E1.11 Table 6 with 1.204 ms
/// rounded up to the coarse grid.
pub const MIN_BREAK_TO_BREAK: u32 = 13;

// DUB and responder turnaround, 100 ns ticks.

/// Default limit for the start of a DUB response (2.9 ms).
pub const DEFAULT_DUB_RESPONSE_LIMIT: u32 = 29_000;

/// DUB response limit bounds.
pub const MIN_DUB_RESPONSE_LIMIT: u32 = 10_000;
/// Upper bound for the DUB response limit.
pub const MAX_DUB_RESPONSE_LIMIT: u32 = 35_000;

/// A DUB response is closed once the line is quiet for two character times.
pub const DUB_INTERBYTE_LIMIT: u16 = 2 * BYTE_TIME_TICKS;

/// Minimum responder turnaround delay, E1.20 Table 3-4 (176 µs).
pub const MIN_RESPONDER_DELAY: u16 = 1760;

/// Maximum responder turnaround delay, E1.20 Table 3-4 (2 ms).
pub const MAX_RESPONDER_DELAY: u16 = 20_000;

/// Default responder turnaround delay.
pub const DEFAULT_RESPONDER_DELAY: u16 = MIN_RESPONDER_DELAY;

/// Coarse-clock window in which a self-test loopback byte must return.
pub const SELF_TEST_TIMEOUT: u32 = 10;
