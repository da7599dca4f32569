//! Metronome settings and click state. The clicks themselves are sent
//! by the engine, which owns the output path and the timeout queue.

use crate::constants::*;
use crate::core::ev::Ev;
use crate::song::Mode;

#[derive(Clone, Debug)]
pub struct Metro {
    /// Current song mode, kept in sync by the engine.
    pub mode: Mode,
    /// In which modes the metronome is audible (bit per mode).
    pub mask: u32,
    /// Click on the first beat of a measure.
    pub hi: Ev,
    /// Click on the other beats.
    pub lo: Ev,
    /// The click currently sounding, if any.
    pub sounding: Option<Ev>,
}

impl Default for Metro {
    fn default() -> Self {
        Metro {
            mode: Mode::Off,
            mask: 1 << Mode::Rec as u32,
            hi: Ev::note_on(METRO_DEV, METRO_CHAN, METRO_HI_NOTE, METRO_HI_VEL),
            lo: Ev::note_on(METRO_DEV, METRO_CHAN, METRO_LO_NOTE, METRO_LO_VEL),
            sounding: None,
        }
    }
}

impl Metro {
    pub fn new() -> Metro {
        Metro::default()
    }

    /// True if the metronome clicks in the current mode.
    pub fn enabled(&self) -> bool {
        self.mask & (1 << self.mode as u32) != 0
    }

    /// Parse a user mask name.
    pub fn str2mask(name: &str) -> Option<u32> {
        match name {
            "on" => Some((1 << Mode::Play as u32) | (1 << Mode::Rec as u32)),
            "rec" => Some(1 << Mode::Rec as u32),
            "off" => Some(0),
            _ => None,
        }
    }
}
