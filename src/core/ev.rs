//! Canonical, context-free MIDI events.
//!
//! An [`Ev`] is an "extended" MIDI event: standard voice messages plus
//! context-free variants (XCTL, XPC, NRPN, RPN) that fold multi-message
//! MIDI idioms into one record, sequencer meta events (tempo, time
//! signature) and user-defined system-exclusive patterns. The structure
//! is kept small because tracks may store a lot of them.

use crate::constants::*;
use crate::error::{self, LibResult};
use bitflags::bitflags;
use snafu::ensure;
use std::fmt;

/// Number of user-configurable sysex pattern slots.
pub const EV_NPAT: usize = 16;

/// Number of `Cmd` slots, pattern slots included.
pub const EV_NUMCMD: usize = Cmd::Pat0 as usize + EV_NPAT;

/// "Value not recorded" marker for 14-bit parameters.
pub const EV_UNDEF: u32 = 0xffff;

pub const EV_MAXDEV: u8 = (MAX_DEVS - 1) as u8;
pub const EV_MAXCH: u8 = 15;
pub const EV_MAXCOARSE: u32 = 0x7f;
pub const EV_MAXFINE: u32 = 0x3fff;

/// Default velocity of a synthesized note-off.
pub const EV_NOFF_DEFAULTVEL: u32 = 100;
/// Neutral pitch-bend value.
pub const EV_BEND_DEFAULT: u32 = 0x2000;
/// Neutral channel-aftertouch value.
pub const EV_CAT_DEFAULT: u32 = 0;

/*
 * placeholder bytes allowed inside a sysex pattern
 */
pub const PAT_V0_HI: u8 = 0x80;
pub const PAT_V0_LO: u8 = 0x81;
pub const PAT_V1_HI: u8 = 0x82;
pub const PAT_V1_LO: u8 = 0x83;

/// Event (and event-range) selector. The same constants serve both
/// `Ev::cmd` and `EvSpec::cmd`; in a spec, `Null` means "empty set",
/// `Any` means "any voice event" and `NoteOn` stands for the whole
/// note class {NoteOn, NoteOff, KeyAft}.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Cmd {
    /// "null", also the end-of-track marker inside tracks.
    Null = 0,
    /// Only meaningful in specs.
    Any = 1,
    Tempo = 2,
    Timesig = 3,
    Nrpn = 4,
    Rpn = 5,
    Xctl = 6,
    Xpc = 7,
    NoteOff = 8,
    NoteOn = 9,
    KeyAft = 10,
    Ctl = 11,
    Pc = 12,
    ChanAft = 13,
    Bend = 14,
    Pat0 = 16,
    Pat1 = 17,
    Pat2 = 18,
    Pat3 = 19,
    Pat4 = 20,
    Pat5 = 21,
    Pat6 = 22,
    Pat7 = 23,
    Pat8 = 24,
    Pat9 = 25,
    Pat10 = 26,
    Pat11 = 27,
    Pat12 = 28,
    Pat13 = 29,
    Pat14 = 30,
    Pat15 = 31,
}

impl Cmd {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Cmd> {
        match index {
            0 => Some(Cmd::Null),
            1 => Some(Cmd::Any),
            2 => Some(Cmd::Tempo),
            3 => Some(Cmd::Timesig),
            4 => Some(Cmd::Nrpn),
            5 => Some(Cmd::Rpn),
            6 => Some(Cmd::Xctl),
            7 => Some(Cmd::Xpc),
            8 => Some(Cmd::NoteOff),
            9 => Some(Cmd::NoteOn),
            10 => Some(Cmd::KeyAft),
            11 => Some(Cmd::Ctl),
            12 => Some(Cmd::Pc),
            13 => Some(Cmd::ChanAft),
            14 => Some(Cmd::Bend),
            16 => Some(Cmd::Pat0),
            17 => Some(Cmd::Pat1),
            18 => Some(Cmd::Pat2),
            19 => Some(Cmd::Pat3),
            20 => Some(Cmd::Pat4),
            21 => Some(Cmd::Pat5),
            22 => Some(Cmd::Pat6),
            23 => Some(Cmd::Pat7),
            24 => Some(Cmd::Pat8),
            25 => Some(Cmd::Pat9),
            26 => Some(Cmd::Pat10),
            27 => Some(Cmd::Pat11),
            28 => Some(Cmd::Pat12),
            29 => Some(Cmd::Pat13),
            30 => Some(Cmd::Pat14),
            31 => Some(Cmd::Pat15),
            _ => None,
        }
    }

    /// True for user sysex pattern slots.
    pub fn is_pat(self) -> bool {
        self as usize >= Cmd::Pat0 as usize
    }
}

bitflags! {
    /// Role of an event within its frame.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
    pub struct Phase: u8 {
        /// Can open a frame (note-on, bender leaving neutral).
        const FIRST = 1;
        /// Can continue a frame but not close it (key aftertouch).
        const NEXT = 2;
        /// Can close a frame (note-off, bender back to neutral).
        const LAST = 4;
    }
}

bitflags! {
    /// Which addressing fields an event kind uses.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
    pub struct EvFlags: u8 {
        const HAS_DEV = 0x01;
        const HAS_CH = 0x02;
    }
}

/// An extended MIDI event. Parameter meaning depends on `cmd`:
/// note number/velocity, controller number/value, program (v1) and bank
/// (v0) for XPC, NRPN/RPN address (v0) and data entry (v1), bend and
/// aftertouch value (v0), tick period (v0) for tempo, beats per measure
/// (v0) and tics per beat (v1) for time signatures.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Ev {
    pub cmd: Cmd,
    pub dev: u8,
    pub ch: u8,
    pub v0: u32,
    pub v1: u32,
}

impl Default for Cmd {
    fn default() -> Self {
        Cmd::Null
    }
}

impl Ev {
    pub fn new(cmd: Cmd, dev: u8, ch: u8, v0: u32, v1: u32) -> Ev {
        Ev { cmd, dev, ch, v0, v1 }
    }

    pub fn note_on(dev: u8, ch: u8, num: u32, vel: u32) -> Ev {
        Ev::new(Cmd::NoteOn, dev, ch, num, vel)
    }

    pub fn note_off(dev: u8, ch: u8, num: u32) -> Ev {
        Ev::new(Cmd::NoteOff, dev, ch, num, EV_NOFF_DEFAULTVEL)
    }

    pub fn key_aft(dev: u8, ch: u8, num: u32, val: u32) -> Ev {
        Ev::new(Cmd::KeyAft, dev, ch, num, val)
    }

    pub fn ctl(dev: u8, ch: u8, num: u32, val: u32) -> Ev {
        Ev::new(Cmd::Ctl, dev, ch, num, val)
    }

    pub fn xctl(dev: u8, ch: u8, num: u32, val: u32) -> Ev {
        Ev::new(Cmd::Xctl, dev, ch, num, val)
    }

    pub fn pc(dev: u8, ch: u8, prog: u32) -> Ev {
        Ev::new(Cmd::Pc, dev, ch, prog, 0)
    }

    pub fn xpc(dev: u8, ch: u8, bank: u32, prog: u32) -> Ev {
        Ev::new(Cmd::Xpc, dev, ch, bank, prog)
    }

    pub fn nrpn(dev: u8, ch: u8, num: u32, val: u32) -> Ev {
        Ev::new(Cmd::Nrpn, dev, ch, num, val)
    }

    pub fn rpn(dev: u8, ch: u8, num: u32, val: u32) -> Ev {
        Ev::new(Cmd::Rpn, dev, ch, num, val)
    }

    pub fn chan_aft(dev: u8, ch: u8, val: u32) -> Ev {
        Ev::new(Cmd::ChanAft, dev, ch, val, 0)
    }

    pub fn bend(dev: u8, ch: u8, val: u32) -> Ev {
        Ev::new(Cmd::Bend, dev, ch, val, 0)
    }

    pub fn tempo(usec24: u32) -> Ev {
        Ev::new(Cmd::Tempo, 0, 0, usec24, 0)
    }

    pub fn timesig(beats: u32, tics: u32) -> Ev {
        Ev::new(Cmd::Timesig, 0, 0, beats, tics)
    }

    /// Voice events address a (dev, ch) pair and can be sent on the wire.
    pub fn is_voice(&self) -> bool {
        let c = self.cmd.index();
        c >= Cmd::Nrpn.index() && c <= Cmd::Bend.index()
    }

    /// Meta events live on the meta track only.
    pub fn is_meta(&self) -> bool {
        self.cmd == Cmd::Tempo || self.cmd == Cmd::Timesig
    }

    pub fn is_note(&self) -> bool {
        matches!(self.cmd, Cmd::NoteOn | Cmd::NoteOff | Cmd::KeyAft)
    }

    /// User sysex pattern events.
    pub fn is_sx(&self) -> bool {
        self.cmd.is_pat()
    }
}

/// Check whether `ev` belongs to the frame whose last event is `st`:
/// either it is part of the frame or it conflicts with it. Identifying
/// coordinates are (dev, ch) plus v0 where the kind has addressing
/// parameters (note number, controller/parameter number).
pub fn ev_match(st: &Ev, ev: &Ev) -> bool {
    match st.cmd {
        Cmd::NoteOn | Cmd::NoteOff | Cmd::KeyAft => {
            ev.is_note() && st.v0 == ev.v0 && st.ch == ev.ch && st.dev == ev.dev
        }
        Cmd::Xctl | Cmd::Nrpn | Cmd::Rpn => {
            st.cmd == ev.cmd && st.dev == ev.dev && st.ch == ev.ch && st.v0 == ev.v0
        }
        Cmd::Bend | Cmd::ChanAft | Cmd::Xpc => {
            st.cmd == ev.cmd && st.dev == ev.dev && st.ch == ev.ch
        }
        Cmd::Tempo | Cmd::Timesig => st.cmd == ev.cmd,
        _ if st.is_sx() => st.cmd == ev.cmd,
        _ => panic!("ev_match: {:?}: bad event type", st.cmd),
    }
}

/// Static description of an event kind; the lookup table below is
/// consulted instead of branching on the kind at each use.
#[derive(Clone, Debug, Default)]
pub struct EvInfo {
    /// Event name, `None` for unusable slots.
    pub ev_name: Option<String>,
    /// Name used by event ranges, `None` if the kind can't be a range.
    pub spec_name: Option<String>,
    pub flags: EvFlags,
    /// Number of parameters (v0, v1) used by events.
    pub nparams: u8,
    /// Number of parameters used by ranges.
    pub nranges: u8,
    pub v0_min: u32,
    pub v0_max: u32,
    pub v1_min: u32,
    pub v1_max: u32,
    /// Sysex pattern template (pattern slots only).
    pub pattern: Option<Vec<u8>>,
}

impl Default for EvFlags {
    fn default() -> Self {
        EvFlags::empty()
    }
}

/// Describes a controller number: how the state engine treats frames
/// using it. A controller with a default value opens cancellable
/// frames; one without is a plain parameter.
#[derive(Clone, Debug)]
pub struct EvCtl {
    pub name: Option<String>,
    /// Default value, `EV_UNDEF` if the controller is a parameter.
    pub defval: u32,
}

/// The event kind table plus the controller table. The engine owns one
/// instance; pattern registration and controller configuration mutate
/// it at run time, so it is passed by reference instead of living in a
/// static.
pub struct EvDb {
    info: Vec<EvInfo>,
    ctl: Vec<EvCtl>,
}

fn builtin_info(index: usize) -> EvInfo {
    fn entry(
        ev_name: Option<&str>,
        spec_name: Option<&str>,
        flags: EvFlags,
        nparams: u8,
        nranges: u8,
        v0: (u32, u32),
        v1: (u32, u32),
    ) -> EvInfo {
        EvInfo {
            ev_name: ev_name.map(String::from),
            spec_name: spec_name.map(String::from),
            flags,
            nparams,
            nranges,
            v0_min: v0.0,
            v0_max: v0.1,
            v1_min: v1.0,
            v1_max: v1.1,
            pattern: None,
        }
    }
    let chan = EvFlags::HAS_DEV | EvFlags::HAS_CH;
    match Cmd::from_index(index) {
        Some(Cmd::Null) => entry(Some("nil"), Some("none"), EvFlags::empty(), 0, 0, (0, 0), (0, 0)),
        Some(Cmd::Any) => entry(None, Some("any"), chan, 0, 0, (0, 0), (0, 0)),
        Some(Cmd::Tempo) => {
            entry(Some("tempo"), None, EvFlags::empty(), 1, 0, (TEMPO_MIN, TEMPO_MAX), (0, 0))
        }
        Some(Cmd::Timesig) => {
            entry(Some("timesig"), None, EvFlags::empty(), 2, 0, (1, 16), (1, 32))
        }
        Some(Cmd::Nrpn) => {
            entry(Some("nrpn"), Some("nrpn"), chan, 2, 2, (0, EV_MAXFINE), (0, EV_MAXFINE))
        }
        Some(Cmd::Rpn) => {
            entry(Some("rpn"), Some("rpn"), chan, 2, 2, (0, EV_MAXFINE), (0, EV_MAXFINE))
        }
        Some(Cmd::Xctl) => {
            entry(Some("xctl"), Some("xctl"), chan, 2, 1, (0, EV_MAXCOARSE), (0, EV_MAXFINE))
        }
        Some(Cmd::Xpc) => {
            entry(Some("xpc"), Some("xpc"), chan, 2, 2, (0, EV_MAXFINE), (0, EV_MAXCOARSE))
        }
        Some(Cmd::NoteOff) => {
            entry(Some("noff"), None, chan, 2, 0, (0, EV_MAXCOARSE), (0, EV_MAXCOARSE))
        }
        Some(Cmd::NoteOn) => {
            entry(Some("non"), Some("note"), chan, 2, 1, (0, EV_MAXCOARSE), (0, EV_MAXCOARSE))
        }
        Some(Cmd::KeyAft) => {
            entry(Some("kat"), None, chan, 2, 0, (0, EV_MAXCOARSE), (0, EV_MAXCOARSE))
        }
        Some(Cmd::Ctl) => {
            entry(Some("ctl"), Some("ctl"), chan, 2, 1, (0, EV_MAXCOARSE), (0, EV_MAXCOARSE))
        }
        Some(Cmd::Pc) => entry(Some("pc"), Some("pc"), chan, 1, 1, (0, EV_MAXCOARSE), (0, 0)),
        Some(Cmd::ChanAft) => {
            entry(Some("cat"), Some("cat"), chan, 1, 0, (0, EV_MAXCOARSE), (0, 0))
        }
        Some(Cmd::Bend) => entry(Some("bend"), Some("bend"), chan, 1, 0, (0, EV_MAXFINE), (0, 0)),
        _ => EvInfo::default(),
    }
}

impl Default for EvDb {
    fn default() -> Self {
        let info = (0..EV_NUMCMD).map(builtin_info).collect();
        let mut ctl = Vec::with_capacity(EV_MAXCOARSE as usize + 1);
        for _ in 0..=EV_MAXCOARSE {
            ctl.push(EvCtl { name: None, defval: EV_UNDEF });
        }
        let mut db = EvDb { info, ctl };
        db.conf_ctl_unchecked(1, Some("mod"), 0);
        db.conf_ctl_unchecked(7, Some("vol"), EV_UNDEF);
        db.conf_ctl_unchecked(11, Some("expr"), EV_MAXCOARSE << 7);
        db.conf_ctl_unchecked(64, Some("sustain"), 0);
        db
    }
}

impl EvDb {
    pub fn new() -> EvDb {
        EvDb::default()
    }

    pub fn info(&self, cmd: Cmd) -> &EvInfo {
        &self.info[cmd.index()]
    }

    /// The phase of the event within a frame: FIRST if it can open a
    /// frame, NEXT if it can continue one, LAST if it can close one.
    pub fn phase(&self, ev: &Ev) -> Phase {
        match ev.cmd {
            Cmd::NoteOff => Phase::LAST,
            Cmd::NoteOn => Phase::FIRST,
            Cmd::KeyAft => Phase::NEXT,
            Cmd::ChanAft => {
                if ev.v0 != EV_CAT_DEFAULT {
                    Phase::FIRST | Phase::NEXT
                } else {
                    Phase::LAST
                }
            }
            Cmd::Xctl => {
                let defval = self.ctl_defval(ev.v0);
                if defval == EV_UNDEF {
                    Phase::FIRST | Phase::LAST
                } else if ev.v1 != defval {
                    Phase::FIRST | Phase::NEXT
                } else {
                    Phase::LAST
                }
            }
            Cmd::Bend => {
                if ev.v0 != EV_BEND_DEFAULT {
                    Phase::FIRST | Phase::NEXT
                } else {
                    Phase::LAST
                }
            }
            _ => Phase::FIRST | Phase::LAST,
        }
    }

    /// Compare two events matching the same frame, parameter count
    /// taken from the table.
    pub fn ev_eq(&self, e1: &Ev, e2: &Ev) -> bool {
        if e1.cmd != e2.cmd {
            return false;
        }
        let info = self.info(e1.cmd);
        if info.flags.contains(EvFlags::HAS_DEV) && e1.dev != e2.dev {
            return false;
        }
        if info.flags.contains(EvFlags::HAS_CH) && e1.ch != e2.ch {
            return false;
        }
        if info.nparams > 0 && e1.v0 != e2.v0 {
            return false;
        }
        if info.nparams > 1 && e1.v1 != e2.v1 {
            return false;
        }
        true
    }

    /*
     * controller table
     */

    pub fn ctl_defval(&self, num: u32) -> u32 {
        self.ctl[num as usize].defval
    }

    /// True if frames of this controller can be cancelled to a default.
    pub fn ctl_is_frame(&self, num: u32) -> bool {
        self.ctl[num as usize].defval != EV_UNDEF
    }

    pub fn ctl_is_reserved(num: u32) -> bool {
        matches!(
            num,
            BANK_HI | BANK_LO | DATAENT_HI | DATAENT_LO | NRPN_HI | NRPN_LO | RPN_HI | RPN_LO
        )
    }

    fn conf_ctl_unchecked(&mut self, num: u32, name: Option<&str>, defval: u32) {
        let ctl = &mut self.ctl[num as usize];
        ctl.name = name.map(String::from);
        ctl.defval = defval;
    }

    /// Configure a controller name and default value.
    pub fn conf_ctl(&mut self, num: u32, name: Option<&str>, defval: u32) -> crate::Result<()> {
        Ok(self.conf_ctl_inner(num, name, defval)?)
    }

    fn conf_ctl_inner(&mut self, num: u32, name: Option<&str>, defval: u32) -> LibResult<()> {
        ensure!(!Self::ctl_is_reserved(num), error::ReservedController { num });
        self.conf_ctl_unchecked(num, name, defval);
        Ok(())
    }

    /// Reset a controller to the unnamed parameter state.
    pub fn unconf_ctl(&mut self, num: u32) {
        self.conf_ctl_unchecked(num, None, EV_UNDEF);
    }

    pub fn lookup_ctl(&self, name: &str) -> Option<u32> {
        self.ctl
            .iter()
            .position(|c| c.name.as_deref() == Some(name))
            .map(|i| i as u32)
    }

    /*
     * user sysex patterns
     */

    /// Validate and register a sysex pattern in a free slot. The
    /// template must be `F0 ... F7` with 7-bit literals and at most one
    /// occurrence of each placeholder; a `lo` placeholder requires the
    /// matching `hi`.
    pub fn add_pattern(&mut self, name: &str, pattern: Vec<u8>) -> crate::Result<Cmd> {
        Ok(self.add_pattern_inner(name, pattern)?)
    }

    fn add_pattern_inner(&mut self, name: &str, pattern: Vec<u8>) -> LibResult<Cmd> {
        ensure!(
            pattern.len() >= 2
                && pattern[0] == MIDI_SYSEX_START
                && pattern[pattern.len() - 1] == MIDI_SYSEX_STOP,
            error::BadPattern { site: site!(), reason: "must be in the 0xf0 ... 0xf7 format" }
        );
        let mut has = [0u32; 4];
        for &byte in &pattern[1..pattern.len() - 1] {
            match byte {
                PAT_V0_HI => has[0] += 1,
                PAT_V0_LO => has[1] += 1,
                PAT_V1_HI => has[2] += 1,
                PAT_V1_LO => has[3] += 1,
                _ => ensure!(
                    byte <= 0x7f,
                    error::BadPattern { site: site!(), reason: "data byte out of range" }
                ),
            }
        }
        ensure!(
            has.iter().all(|&n| n <= 1),
            error::BadPattern { site: site!(), reason: "duplicate placeholder" }
        );
        ensure!(
            has[1] == 0 || has[0] == 1,
            error::BadPattern { site: site!(), reason: "v0_lo but no v0_hi" }
        );
        ensure!(
            has[3] == 0 || has[2] == 1,
            error::BadPattern { site: site!(), reason: "v1_lo but no v1_hi" }
        );
        let slot = (Cmd::Pat0.index()..EV_NUMCMD)
            .find(|&i| self.info[i].ev_name.is_none())
            .ok_or(error::LibError::NoPatternSlot)?;
        let nparams = (has[0] + has[2]) as u8;
        self.info[slot] = EvInfo {
            ev_name: Some(name.to_string()),
            spec_name: Some(name.to_string()),
            flags: EvFlags::HAS_DEV,
            nparams,
            nranges: nparams,
            v0_min: 0,
            v0_max: EV_MAXFINE,
            v1_min: 0,
            v1_max: EV_MAXFINE,
            pattern: Some(pattern),
        };
        Ok(Cmd::from_index(slot).unwrap())
    }

    pub fn unconf_pattern(&mut self, cmd: Cmd) {
        debug_assert!(cmd.is_pat());
        self.info[cmd.index()] = EvInfo::default();
    }

    pub fn lookup_pattern(&self, name: &str) -> Option<Cmd> {
        (Cmd::Pat0.index()..EV_NUMCMD)
            .find(|&i| self.info[i].ev_name.as_deref() == Some(name))
            .and_then(Cmd::from_index)
    }

    pub fn reset_patterns(&mut self) {
        for i in Cmd::Pat0.index()..EV_NUMCMD {
            self.info[i] = EvInfo::default();
        }
    }

    pub fn lookup_cmd(&self, name: &str) -> Option<Cmd> {
        (0..EV_NUMCMD)
            .find(|&i| self.info[i].ev_name.as_deref() == Some(name))
            .and_then(Cmd::from_index)
    }
}

fn builtin_name(cmd: Cmd) -> &'static str {
    match cmd {
        Cmd::Null => "nil",
        Cmd::Any => "any",
        Cmd::Tempo => "tempo",
        Cmd::Timesig => "timesig",
        Cmd::Nrpn => "nrpn",
        Cmd::Rpn => "rpn",
        Cmd::Xctl => "xctl",
        Cmd::Xpc => "xpc",
        Cmd::NoteOff => "noff",
        Cmd::NoteOn => "non",
        Cmd::KeyAft => "kat",
        Cmd::Ctl => "ctl",
        Cmd::Pc => "pc",
        Cmd::ChanAft => "cat",
        Cmd::Bend => "bend",
        Cmd::Pat0 => "pat0",
        Cmd::Pat1 => "pat1",
        Cmd::Pat2 => "pat2",
        Cmd::Pat3 => "pat3",
        Cmd::Pat4 => "pat4",
        Cmd::Pat5 => "pat5",
        Cmd::Pat6 => "pat6",
        Cmd::Pat7 => "pat7",
        Cmd::Pat8 => "pat8",
        Cmd::Pat9 => "pat9",
        Cmd::Pat10 => "pat10",
        Cmd::Pat11 => "pat11",
        Cmd::Pat12 => "pat12",
        Cmd::Pat13 => "pat13",
        Cmd::Pat14 => "pat14",
        Cmd::Pat15 => "pat15",
    }
}

impl fmt::Display for Ev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = builtin_name(self.cmd);
        match self.cmd {
            Cmd::NoteOn
            | Cmd::NoteOff
            | Cmd::KeyAft
            | Cmd::Ctl
            | Cmd::Nrpn
            | Cmd::Rpn
            | Cmd::Xpc
            | Cmd::Xctl => write!(
                f,
                "{} {{{:x} {:x}}} {:02x} {:02x}",
                name, self.dev, self.ch, self.v0, self.v1
            ),
            Cmd::Bend | Cmd::ChanAft | Cmd::Pc => {
                write!(f, "{} {{{:x} {:x}}} {:02x}", name, self.dev, self.ch, self.v0)
            }
            Cmd::Tempo => write!(f, "{} {}", name, self.v0),
            Cmd::Timesig => write!(f, "{} {} {}", name, self.v0, self.v1),
            _ if self.is_sx() => {
                write!(f, "{} {:x} {:02x} {:02x}", name, self.dev, self.v0, self.v1)
            }
            _ => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_table() {
        let db = EvDb::new();
        assert_eq!(db.phase(&Ev::note_on(0, 0, 60, 100)), Phase::FIRST);
        assert_eq!(db.phase(&Ev::note_off(0, 0, 60)), Phase::LAST);
        assert_eq!(db.phase(&Ev::key_aft(0, 0, 60, 10)), Phase::NEXT);
        assert_eq!(db.phase(&Ev::bend(0, 0, EV_BEND_DEFAULT)), Phase::LAST);
        assert_eq!(db.phase(&Ev::bend(0, 0, 0x1000)), Phase::FIRST | Phase::NEXT);
        assert_eq!(db.phase(&Ev::chan_aft(0, 0, 0)), Phase::LAST);
        assert_eq!(db.phase(&Ev::chan_aft(0, 0, 3)), Phase::FIRST | Phase::NEXT);
        // controller 64 has a default value, 7 is a plain parameter
        assert_eq!(db.phase(&Ev::xctl(0, 0, 64, 10)), Phase::FIRST | Phase::NEXT);
        assert_eq!(db.phase(&Ev::xctl(0, 0, 64, 0)), Phase::LAST);
        assert_eq!(db.phase(&Ev::xctl(0, 0, 7, 99)), Phase::FIRST | Phase::LAST);
        assert_eq!(db.phase(&Ev::tempo(500_000)), Phase::FIRST | Phase::LAST);
    }

    #[test]
    fn match_by_key() {
        let non = Ev::note_on(0, 1, 60, 100);
        assert!(ev_match(&non, &Ev::note_off(0, 1, 60)));
        assert!(!ev_match(&non, &Ev::note_off(0, 1, 61)));
        assert!(!ev_match(&non, &Ev::note_off(0, 2, 60)));
        let x = Ev::xctl(1, 2, 7, 99);
        assert!(ev_match(&x, &Ev::xctl(1, 2, 7, 0)));
        assert!(!ev_match(&x, &Ev::xctl(1, 2, 8, 99)));
        assert!(ev_match(&Ev::bend(0, 0, 42), &Ev::bend(0, 0, EV_BEND_DEFAULT)));
    }

    #[test]
    fn pattern_validation() {
        let mut db = EvDb::new();
        assert!(db.add_pattern("bad", vec![0xf0, 0x01]).is_err());
        assert!(db.add_pattern("bad", vec![0xf0, 0x90, 0xf7]).is_err());
        assert!(db.add_pattern("bad", vec![0xf0, PAT_V0_LO, 0xf7]).is_err());
        let cmd = db
            .add_pattern("master", vec![0xf0, 0x7f, 0x7f, 0x04, 0x01, PAT_V0_LO, PAT_V0_HI, 0xf7])
            .unwrap();
        assert_eq!(cmd, Cmd::Pat0);
        assert_eq!(db.info(cmd).nparams, 1);
        assert_eq!(db.lookup_pattern("master"), Some(cmd));
        db.unconf_pattern(cmd);
        assert_eq!(db.lookup_pattern("master"), None);
    }

    #[test]
    fn reserved_controllers() {
        let mut db = EvDb::new();
        assert!(db.conf_ctl(0, Some("bank"), 0).is_err());
        assert!(db.conf_ctl(10, Some("pan"), 64).is_ok());
        assert_eq!(db.lookup_ctl("pan"), Some(10));
        db.unconf_ctl(10);
        assert_eq!(db.lookup_ctl("pan"), None);
    }
}
