//! Event ranges. An [`EvSpec`] selects a set of events: a kind (with
//! the `Any`, `Null` = empty and note-class extensions described on
//! [`Cmd`]) plus inclusive device, channel and parameter ranges. Specs
//! form the left and right sides of filter rules, so the algebra below
//! (match, equality, intersection, inclusion, structural mapping) is
//! what the filter is built from.

use crate::core::ev::{Cmd, Ev, EvDb, EvFlags, EV_MAXCH, EV_MAXCOARSE, EV_MAXDEV};
use crate::error::{self, LibResult};
use snafu::ensure;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct EvSpec {
    pub cmd: Cmd,
    pub dev_min: u8,
    pub dev_max: u8,
    pub ch_min: u8,
    pub ch_max: u8,
    pub v0_min: u32,
    pub v0_max: u32,
    pub v1_min: u32,
    pub v1_max: u32,
}

impl EvSpec {
    /// The "select everything" range.
    pub fn any() -> EvSpec {
        EvSpec {
            cmd: Cmd::Any,
            dev_min: 0,
            dev_max: EV_MAXDEV,
            ch_min: 0,
            ch_max: EV_MAXCH,
            v0_min: 0,
            v0_max: 0,
            v1_min: 0,
            v1_max: 0,
        }
    }

    /// The empty range.
    pub fn empty() -> EvSpec {
        EvSpec { cmd: Cmd::Null, ..EvSpec::any() }
    }

    /// A range of the given kind covering all devices, channels and
    /// parameter values.
    pub fn with_cmd(db: &EvDb, cmd: Cmd) -> EvSpec {
        let info = db.info(cmd);
        EvSpec {
            cmd,
            dev_min: 0,
            dev_max: EV_MAXDEV,
            ch_min: 0,
            ch_max: EV_MAXCH,
            v0_min: info.v0_min,
            v0_max: info.v0_max,
            v1_min: info.v1_min,
            v1_max: info.v1_max,
        }
    }

    /// The note class {NoteOn, NoteOff, KeyAft}.
    pub fn note() -> EvSpec {
        EvSpec {
            cmd: Cmd::NoteOn,
            v0_min: 0,
            v0_max: EV_MAXCOARSE,
            v1_min: 0,
            v1_max: EV_MAXCOARSE,
            ..EvSpec::any()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cmd == Cmd::Null
    }

    /// Check if the event belongs to this range.
    pub fn matches(&self, db: &EvDb, ev: &Ev) -> bool {
        match self.cmd {
            Cmd::Null => return false,
            Cmd::Any => {}
            Cmd::NoteOn => {
                if !ev.is_note() {
                    return false;
                }
            }
            _ => {
                if self.cmd != ev.cmd {
                    return false;
                }
            }
        }
        let si = db.info(self.cmd);
        let ei = db.info(ev.cmd);
        if si.flags.contains(EvFlags::HAS_DEV)
            && ei.flags.contains(EvFlags::HAS_DEV)
            && (ev.dev < self.dev_min || ev.dev > self.dev_max)
        {
            return false;
        }
        if si.flags.contains(EvFlags::HAS_CH)
            && ei.flags.contains(EvFlags::HAS_CH)
            && (ev.ch < self.ch_min || ev.ch > self.ch_max)
        {
            return false;
        }
        if si.nparams > 0 && ei.nparams > 0 && (ev.v0 < self.v0_min || ev.v0 > self.v0_max) {
            return false;
        }
        if si.nparams > 1 && ei.nparams > 1 && (ev.v1 < self.v1_min || ev.v1 > self.v1_max) {
            return false;
        }
        true
    }

    /// Check if both ranges select the same set.
    pub fn eq(&self, db: &EvDb, other: &EvSpec) -> bool {
        if self.cmd != other.cmd {
            return false;
        }
        let info = db.info(self.cmd);
        if info.flags.contains(EvFlags::HAS_DEV)
            && (self.dev_min != other.dev_min || self.dev_max != other.dev_max)
        {
            return false;
        }
        if info.flags.contains(EvFlags::HAS_CH)
            && (self.ch_min != other.ch_min || self.ch_max != other.ch_max)
        {
            return false;
        }
        if info.nparams > 0 && (self.v0_min != other.v0_min || self.v0_max != other.v0_max) {
            return false;
        }
        if info.nparams > 1 && (self.v1_min != other.v1_min || self.v1_max != other.v1_max) {
            return false;
        }
        true
    }

    /// Check if the two ranges intersect.
    pub fn isec(&self, db: &EvDb, other: &EvSpec) -> bool {
        if self.cmd == Cmd::Null || other.cmd == Cmd::Null {
            return false;
        }
        if self.cmd != Cmd::Any && other.cmd != Cmd::Any && self.cmd != other.cmd {
            return false;
        }
        let i1 = db.info(self.cmd);
        let i2 = db.info(other.cmd);
        if i1.flags.contains(EvFlags::HAS_DEV)
            && i2.flags.contains(EvFlags::HAS_DEV)
            && (self.dev_min > other.dev_max || self.dev_max < other.dev_min)
        {
            return false;
        }
        if i1.flags.contains(EvFlags::HAS_CH)
            && i2.flags.contains(EvFlags::HAS_CH)
            && (self.ch_min > other.ch_max || self.ch_max < other.ch_min)
        {
            return false;
        }
        if i1.nparams > 0
            && i2.nparams > 0
            && (self.v0_min > other.v0_max || self.v0_max < other.v0_min)
        {
            return false;
        }
        if i1.nparams > 1
            && i2.nparams > 1
            && (self.v1_min > other.v1_max || self.v1_max < other.v1_min)
        {
            return false;
        }
        true
    }

    /// Check if this range is included in `other`. Any range includes
    /// itself; the empty range is included in everything.
    pub fn in_spec(&self, db: &EvDb, other: &EvSpec) -> bool {
        if self.cmd == Cmd::Null {
            return true;
        }
        if other.cmd == Cmd::Null {
            return false;
        }
        if self.cmd == Cmd::Any && other.cmd != Cmd::Any {
            return false;
        }
        if other.cmd != Cmd::Any && other.cmd != self.cmd {
            return false;
        }
        let i1 = db.info(self.cmd);
        let i2 = db.info(other.cmd);
        if i1.flags.contains(EvFlags::HAS_DEV)
            && i2.flags.contains(EvFlags::HAS_DEV)
            && (self.dev_min < other.dev_min || self.dev_max > other.dev_max)
        {
            return false;
        }
        if i1.flags.contains(EvFlags::HAS_CH)
            && i2.flags.contains(EvFlags::HAS_CH)
            && (self.ch_min < other.ch_min || self.ch_max > other.ch_max)
        {
            return false;
        }
        if i1.nparams > 0
            && i2.nparams > 0
            && (self.v0_min < other.v0_min || self.v0_max > other.v0_max)
        {
            return false;
        }
        if i1.nparams > 1
            && i2.nparams > 1
            && (self.v1_min < other.v1_min || self.v1_max > other.v1_max)
        {
            return false;
        }
        true
    }
}

impl EvDb {
    /// Check that `from` -> `to` is a structurally valid (bijective)
    /// mapping usable by [`EvDb::map_ev`]: matching use of the `note`
    /// and `any` classes, and range pairs of equal cardinality.
    pub fn is_map(&self, from: &EvSpec, to: &EvSpec) -> crate::Result<()> {
        Ok(self.is_map_inner(from, to)?)
    }

    pub(crate) fn is_map_inner(&self, from: &EvSpec, to: &EvSpec) -> LibResult<()> {
        ensure!(
            (from.cmd == Cmd::NoteOn) == (to.cmd == Cmd::NoteOn),
            error::BadMapping { site: site!(), reason: "note may only be used in both map args" }
        );
        ensure!(
            (from.cmd == Cmd::Any) == (to.cmd == Cmd::Any),
            error::BadMapping { site: site!(), reason: "any may only be used in both map args" }
        );
        let fi = self.info(from.cmd);
        let ti = self.info(to.cmd);
        ensure!(
            !fi.flags.contains(EvFlags::HAS_DEV)
                || from.dev_max - from.dev_min == to.dev_max - to.dev_min,
            error::BadMapping { site: site!(), reason: "dev ranges must have the same size" }
        );
        ensure!(
            !fi.flags.contains(EvFlags::HAS_CH)
                || from.ch_max - from.ch_min == to.ch_max - to.ch_min,
            error::BadMapping { site: site!(), reason: "chan ranges must have the same size" }
        );
        let bad = |reason| error::BadMapping { site: site!(), reason }.fail();
        match (fi.nparams, ti.nparams) {
            (0, 0) => {}
            (0, 1) => {
                if to.v0_max != to.v0_min {
                    return bad("v0 range not empty");
                }
            }
            (0, 2) => {
                if to.v0_max != to.v0_min || to.v1_max != to.v1_min {
                    return bad("v0/v1 ranges not empty");
                }
            }
            (1, 0) => {
                if from.v0_max != from.v0_min {
                    return bad("v0 range not empty");
                }
            }
            (1, 1) => {
                if from.v0_max - from.v0_min != to.v0_max - to.v0_min {
                    return bad("v0 ranges not of the same sizes");
                }
            }
            (1, 2) => {
                if to.v0_max != to.v0_min {
                    return bad("v0 range not empty");
                }
                if from.v0_max - from.v0_min != to.v1_max - to.v1_min {
                    return bad("v0/v1 ranges not of the same sizes");
                }
            }
            (2, 0) => {
                if from.v0_max != from.v0_min || from.v1_max != from.v1_min {
                    return bad("v0/v1 ranges not empty");
                }
            }
            (2, 1) => {
                if from.v0_max != from.v0_min {
                    return bad("v0 range not empty");
                }
                if from.v1_max - from.v1_min != to.v0_max - to.v0_min {
                    return bad("v1/v0 ranges not of the same sizes");
                }
            }
            (2, 2) => {
                if from.v0_max - from.v0_min != to.v0_max - to.v0_min
                    || from.v1_max - from.v1_min != to.v1_max - to.v1_min
                {
                    return bad("v0/v1 ranges not of the same sizes");
                }
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    /// Transform an event matching `from` into the event matching `to`
    /// at the same offsets. `from` and `to` must satisfy
    /// [`EvDb::is_map`]. This runs for every routed event, so it only
    /// does offset arithmetic driven by the kind table.
    pub fn map_ev(&self, input: &Ev, from: &EvSpec, to: &EvSpec) -> Ev {
        let mut out = Ev::default();
        if from.cmd == Cmd::Any {
            out.cmd = input.cmd;
            out.dev = input.dev - from.dev_min + to.dev_min;
            out.ch = input.ch - from.ch_min + to.ch_min;
            out.v0 = input.v0;
            out.v1 = input.v1;
            return out;
        }
        out.cmd = if from.cmd == Cmd::NoteOn { input.cmd } else { to.cmd };
        let oi = self.info(out.cmd);
        let fi = self.info(from.cmd);
        if oi.flags.contains(EvFlags::HAS_DEV) {
            out.dev = to.dev_min;
            if fi.flags.contains(EvFlags::HAS_DEV) {
                out.dev += input.dev - from.dev_min;
            }
        }
        if oi.flags.contains(EvFlags::HAS_CH) {
            out.ch = to.ch_min;
            if fi.flags.contains(EvFlags::HAS_CH) {
                out.ch += input.ch - from.ch_min;
            }
        }
        let ti = self.info(to.cmd);
        match (fi.nparams, ti.nparams) {
            (0, 1) => out.v0 = to.v0_min,
            (0, 2) => {
                out.v0 = to.v0_min;
                out.v1 = to.v1_min;
            }
            (1, 1) => out.v0 = input.v0 - from.v0_min + to.v0_min,
            (1, 2) => {
                out.v0 = to.v0_min;
                out.v1 = input.v0 - from.v0_min + to.v1_min;
            }
            (2, 1) => out.v0 = input.v1 - from.v1_min + to.v0_min,
            (2, 2) => {
                out.v0 = input.v0 - from.v0_min + to.v0_min;
                out.v1 = input.v1 - from.v1_min + to.v1_min;
            }
            _ => {}
        }
        out
    }

    /// Transform a range included in `from` into the corresponding
    /// range included in `to`; same semantics and constraints as
    /// [`EvDb::map_ev`], applied to both range bounds.
    pub fn map_spec(&self, input: &EvSpec, from: &EvSpec, to: &EvSpec) -> EvSpec {
        let mut out = *input;
        if from.cmd == Cmd::Any {
            out.cmd = input.cmd;
            out.dev_min = input.dev_min + to.dev_min - from.dev_min;
            out.dev_max = input.dev_max + to.dev_min - from.dev_min;
            out.ch_min = input.ch_min + to.ch_min - from.ch_min;
            out.ch_max = input.ch_max + to.ch_min - from.ch_min;
            return out;
        }
        out.cmd = if from.cmd == Cmd::NoteOn { input.cmd } else { to.cmd };
        let oi = self.info(out.cmd);
        let fi = self.info(from.cmd);
        if oi.flags.contains(EvFlags::HAS_DEV) {
            if fi.flags.contains(EvFlags::HAS_DEV) {
                out.dev_min = input.dev_min - from.dev_min + to.dev_min;
                out.dev_max = input.dev_max - from.dev_min + to.dev_min;
            } else {
                out.dev_min = to.dev_min;
                out.dev_max = to.dev_max;
            }
        }
        if oi.flags.contains(EvFlags::HAS_CH) {
            if fi.flags.contains(EvFlags::HAS_CH) {
                out.ch_min = input.ch_min - from.ch_min + to.ch_min;
                out.ch_max = input.ch_max - from.ch_min + to.ch_min;
            } else {
                out.ch_min = to.ch_min;
                out.ch_max = to.ch_max;
            }
        }
        let ti = self.info(to.cmd);
        match (fi.nparams, ti.nparams) {
            (0, 1) => {
                out.v0_min = to.v0_min;
                out.v0_max = to.v0_max;
            }
            (0, 2) => {
                out.v0_min = to.v0_min;
                out.v0_max = to.v0_max;
                out.v1_min = to.v1_min;
                out.v1_max = to.v1_max;
            }
            (1, 1) => {
                out.v0_min = input.v0_min + to.v0_min - from.v0_min;
                out.v0_max = input.v0_max + to.v0_min - from.v0_min;
            }
            (1, 2) => {
                out.v0_min = to.v0_min;
                out.v0_max = to.v0_max;
                out.v1_min = input.v0_min + to.v1_min - from.v0_min;
                out.v1_max = input.v0_max + to.v1_min - from.v0_min;
            }
            (2, 1) => {
                out.v0_min = input.v1_min + to.v0_min - from.v1_min;
                out.v0_max = input.v1_max + to.v0_min - from.v1_min;
            }
            (2, 2) => {
                out.v0_min = input.v0_min + to.v0_min - from.v0_min;
                out.v0_max = input.v0_max + to.v0_min - from.v0_min;
                out.v1_min = input.v1_min + to.v1_min - from.v1_min;
                out.v1_max = input.v1_max + to.v1_min - from.v1_min;
            }
            _ => {}
        }
        out
    }
}

impl fmt::Display for EvSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.cmd {
            Cmd::Null => "none",
            Cmd::Any => "any",
            Cmd::NoteOn => "note",
            Cmd::Nrpn => "nrpn",
            Cmd::Rpn => "rpn",
            Cmd::Xctl => "xctl",
            Cmd::Xpc => "xpc",
            Cmd::Ctl => "ctl",
            Cmd::Pc => "pc",
            Cmd::ChanAft => "cat",
            Cmd::Bend => "bend",
            _ => return write!(f, "bad({:?})", self.cmd),
        };
        write!(f, "{}", name)?;
        if self.cmd != Cmd::Null {
            write!(f, " {}:{} {}:{}", self.dev_min, self.dev_max, self.ch_min, self.ch_max)?;
        }
        match self.cmd {
            Cmd::Nrpn | Cmd::Rpn | Cmd::Xctl | Cmd::Xpc | Cmd::NoteOn | Cmd::Ctl => write!(
                f,
                " {}:{} {}:{}",
                self.v0_min, self.v0_max, self.v1_min, self.v1_max
            ),
            Cmd::Pc | Cmd::ChanAft | Cmd::Bend => write!(f, " {}:{}", self.v0_min, self.v0_max),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chan_spec(db: &EvDb, cmd: Cmd, dev: u8, ch: u8) -> EvSpec {
        let mut s = EvSpec::with_cmd(db, cmd);
        s.dev_min = dev;
        s.dev_max = dev;
        s.ch_min = ch;
        s.ch_max = ch;
        s
    }

    #[test]
    fn reflexive_laws() {
        let db = EvDb::new();
        for spec in [
            EvSpec::any(),
            EvSpec::note(),
            EvSpec::with_cmd(&db, Cmd::Xctl),
            chan_spec(&db, Cmd::ChanAft, 1, 3),
        ] {
            assert!(spec.in_spec(&db, &spec));
            assert!(spec.isec(&db, &spec));
            assert!(spec.eq(&db, &spec));
        }
        let empty = EvSpec::empty();
        assert!(empty.in_spec(&db, &empty));
        assert!(!empty.isec(&db, &empty));
    }

    #[test]
    fn inclusion_and_intersection() {
        let db = EvDb::new();
        let narrow = chan_spec(&db, Cmd::NoteOn, 0, 0);
        let wide = EvSpec::note();
        assert!(narrow.in_spec(&db, &wide));
        assert!(!wide.in_spec(&db, &narrow));
        assert!(narrow.isec(&db, &wide));
        assert!(narrow.in_spec(&db, &EvSpec::any()));
        assert!(!EvSpec::any().in_spec(&db, &wide));
        let other = chan_spec(&db, Cmd::NoteOn, 0, 1);
        assert!(!narrow.isec(&db, &other));
    }

    #[test]
    fn note_spec_matches_whole_class() {
        let db = EvDb::new();
        let spec = EvSpec::note();
        assert!(spec.matches(&db, &Ev::note_on(0, 0, 60, 100)));
        assert!(spec.matches(&db, &Ev::note_off(3, 9, 21)));
        assert!(spec.matches(&db, &Ev::key_aft(0, 0, 60, 5)));
        assert!(!spec.matches(&db, &Ev::ctl(0, 0, 7, 100)));
    }

    #[test]
    fn chan_mapping() {
        let db = EvDb::new();
        let mut from = EvSpec::any();
        from.dev_min = 0;
        from.dev_max = 0;
        from.ch_min = 0;
        from.ch_max = 0;
        let mut to = EvSpec::any();
        to.dev_min = 1;
        to.dev_max = 1;
        to.ch_min = 5;
        to.ch_max = 5;
        assert!(db.is_map(&from, &to).is_ok());
        let out = db.map_ev(&Ev::note_on(0, 0, 60, 100), &from, &to);
        assert_eq!(out, Ev::note_on(1, 5, 60, 100));
    }

    #[test]
    fn spec_mapping_translates_v1() {
        let db = EvDb::new();
        // 2-parameter identity mapping must translate, not reflect,
        // the v1 range
        let from = EvSpec::with_cmd(&db, Cmd::Nrpn);
        let mut input = from;
        input.v1_min = 10;
        input.v1_max = 20;
        let out = db.map_spec(&input, &from, &from);
        assert_eq!(out.v1_min, 10);
        assert_eq!(out.v1_max, 20);
    }
}
