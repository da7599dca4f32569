//! Protocol constants, time units and engine defaults.
//!
//! The wall-clock unit everywhere in this crate is the 24th of a
//! microsecond, so a tempo can be stored with the same accuracy as in a
//! standard MIDI file (which encodes microseconds per quarter note).

/// Convert a tempo (beats per minute) to a tick period in 1/24 µs.
pub const fn tempo_to_usec24(tempo: u32, tpb: u32) -> u32 {
    60 * 24_000_000 / (tempo * tpb)
}

/// One second, in 1/24 µs.
pub const USEC24_PER_SEC: u32 = 24_000_000;

/// Units per second for absolute (MTC-style) positions. Must be a
/// multiple of all supported quarter-frame frequencies (96, 100, 120).
pub const MTC_SEC: u32 = 2400;

/// MTC counters wrap every 24 hours.
pub const MTC_PERIOD: u32 = 24 * 60 * 60 * MTC_SEC;

/// Frame rate used when rounding measure positions to MTC frames.
pub const DEFAULT_FPS: u32 = 25;

/*
 * controller numbers with special meaning
 */
pub const BANK_HI: u32 = 0;
pub const BANK_LO: u32 = 32;
pub const DATAENT_HI: u32 = 6;
pub const DATAENT_LO: u32 = 38;
pub const NRPN_HI: u32 = 99;
pub const NRPN_LO: u32 = 98;
pub const RPN_HI: u32 = 101;
pub const RPN_LO: u32 = 100;

/*
 * bounds of event parameters
 */
pub const TPU_MAX: u32 = 96 * 40;
pub const TIMESIG_TICS_MAX: u32 = TPU_MAX / 4;
pub const TEMPO_MIN: u32 = tempo_to_usec24(240, TIMESIG_TICS_MAX);
pub const TEMPO_MAX: u32 = tempo_to_usec24(20, 24);

/// Maximum number of MIDI devices.
pub const MAX_DEVS: usize = 16;

/// Maximum number of (dev, ch) pairs.
pub const MAX_CHANS: usize = MAX_DEVS * 16;

/// Maximum number of sequencer events held in tracks.
pub const MAX_SEQEVS: usize = 400_000;

/// Maximum number of frame states tracked simultaneously.
pub const MAX_STATES: usize = 10_000;

/*
 * musical defaults; these must not change, they are part of the
 * project file format
 */
pub const DEFAULT_TPB: u32 = 24;
pub const DEFAULT_BPM: u32 = 4;
pub const DEFAULT_TPU: u32 = 96;
pub const DEFAULT_TEMPO: u32 = 120;
pub const DEFAULT_USEC24: u32 = tempo_to_usec24(DEFAULT_TEMPO, DEFAULT_TPB);

/// Metronome click length, 30 ms in 1/24 µs.
pub const METRO_CLICKLEN: u32 = 24 * 1000 * 30;

pub const METRO_DEV: u8 = 0;
pub const METRO_CHAN: u8 = 9;
pub const METRO_HI_NOTE: u32 = 67;
pub const METRO_HI_VEL: u32 = 127;
pub const METRO_LO_NOTE: u32 = 68;
pub const METRO_LO_VEL: u32 = 90;

/*
 * raw MIDI status bytes handled outside of voice messages
 */
pub const MIDI_SYSEX_START: u8 = 0xf0;
pub const MIDI_QFRAME: u8 = 0xf1;
pub const MIDI_SYSEX_STOP: u8 = 0xf7;
pub const MIDI_TIC: u8 = 0xf8;
pub const MIDI_START: u8 = 0xfa;
pub const MIDI_STOP: u8 = 0xfc;
pub const MIDI_ACK: u8 = 0xfe;

/// Undo history is discarded beyond this many bytes.
pub const UNDO_MAXSIZE: usize = 0x100000;
