//! Frame tracking. A [`State`] holds the last event of a frame in
//! flight (a sounding note, the current value of a controller, the
//! bender position, the current tempo...). A [`StateList`] holds one
//! state per frame, so it describes everything currently sounding on a
//! stream and can be used to cancel or restore the stream at any
//! point.

use crate::core::ev::{ev_match, Cmd, Ev, EvDb, Phase};
use crate::core::spec::EvSpec;
use bitflags::bitflags;
use log::debug;

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
    pub struct StateFlags: u8 {
        /// Just created, never taken by an update.
        const NEW = 1;
        /// Updated within the current tick.
        const CHANGED = 2;
        /// Frame detected as bogus (started in the middle).
        const BOGUS = 4;
        /// Nested frame (a second first-event arrived while the
        /// previous frame was still open).
        const NESTED = 8;
    }
}

/// One frame in flight.
#[derive(Clone, Debug)]
pub struct State {
    /// Last event of the frame.
    pub ev: Ev,
    /// Phase of `ev` within the frame.
    pub phase: Phase,
    /// Maintained by `StateList::update`/`outdate`; read-only for
    /// everyone else.
    pub flags: StateFlags,
    /// Events seen since the last timeout, used for throttling.
    pub nevents: u32,
    /// Free for the owning subsystem (selection tags, source ids).
    pub tag: u32,
    /// Free for the owning subsystem (tic of the first event, idle
    /// counters).
    pub tic: u32,
}

impl State {
    pub(crate) fn from_ev(ev: Ev) -> State {
        State {
            ev,
            phase: Phase::empty(),
            flags: StateFlags::NEW,
            nevents: 0,
            tag: 0,
            tic: 0,
        }
    }

    /// The frame is closed: its last event was a closing one and no
    /// reopening event followed.
    pub fn is_terminated(&self) -> bool {
        self.phase == Phase::LAST
    }

    /// Check if the given event matches this frame.
    pub fn matches(&self, ev: &Ev) -> bool {
        ev_match(&self.ev, ev)
    }

    /// Check if the state belongs to the given range; `None` matches
    /// everything.
    pub fn in_spec(&self, db: &EvDb, spec: Option<&EvSpec>) -> bool {
        match spec {
            None => true,
            Some(spec) => spec.matches(db, &self.ev),
        }
    }

    /// Compare against an event matching the same frame.
    pub fn eq_ev(&self, db: &EvDb, ev: &Ev) -> bool {
        if self.ev.is_voice() {
            match self.ev.cmd {
                Cmd::ChanAft | Cmd::Bend => self.ev.v0 == ev.v0,
                _ => self.ev.cmd == ev.cmd && self.ev.v0 == ev.v0 && self.ev.v1 == ev.v1,
            }
        } else if self.ev.is_sx() {
            if self.ev.cmd != ev.cmd {
                return false;
            }
            let info = db.info(self.ev.cmd);
            !(info.nparams >= 1 && self.ev.v0 != ev.v0)
                && !(info.nparams >= 2 && self.ev.v1 != ev.v1)
        } else if self.ev.cmd == Cmd::Tempo {
            self.ev.v0 == ev.v0
        } else if self.ev.cmd == Cmd::Timesig {
            self.ev.v0 == ev.v0 && self.ev.v1 == ev.v1
        } else {
            panic!("State::eq_ev: not defined for {:?}", self.ev.cmd);
        }
    }

    /// The event that would neutralise this frame as if it never
    /// existed: a note-off for notes, the default value for
    /// aftertouch, bender and known controllers. Closed frames and
    /// frames with no default need nothing.
    pub fn cancel(&self, db: &EvDb) -> Option<Ev> {
        use crate::core::ev::{EV_BEND_DEFAULT, EV_CAT_DEFAULT, EV_UNDEF};
        if self.phase.contains(Phase::LAST) {
            return None;
        }
        match self.ev.cmd {
            Cmd::NoteOn | Cmd::KeyAft => Some(Ev::note_off(self.ev.dev, self.ev.ch, self.ev.v0)),
            Cmd::ChanAft => Some(Ev::chan_aft(self.ev.dev, self.ev.ch, EV_CAT_DEFAULT)),
            Cmd::Xctl => {
                let defval = db.ctl_defval(self.ev.v0);
                if defval == EV_UNDEF {
                    return None;
                }
                Some(Ev::xctl(self.ev.dev, self.ev.ch, self.ev.v0, defval))
            }
            Cmd::Bend => Some(Ev::bend(self.ev.dev, self.ev.ch, EV_BEND_DEFAULT)),
            // other events have their LAST phase bit set, so we never
            // come here
            _ => panic!("State::cancel: unexpected {:?}", self.ev.cmd),
        }
    }

    /// The event that re-establishes this frame after a relocation.
    /// Notes are never restored, neither are bogus frames nor the last
    /// event of a closed frame.
    pub fn restore(&self) -> Option<Ev> {
        if self.flags.contains(StateFlags::BOGUS) || self.ev.is_note() {
            return None;
        }
        if self.phase.contains(Phase::LAST) && !self.phase.contains(Phase::FIRST) {
            return None;
        }
        Some(self.ev)
    }
}

/// The set of frames of one stream. States are kept newest-last and
/// looked up newest-first; real-life lists are a handful of entries, so
/// a vector beats anything fancier.
#[derive(Clone, Debug, Default)]
pub struct StateList {
    states: Vec<State>,
    /// Set whenever a state is updated; cleared by `outdate`.
    pub changed: bool,
}

impl StateList {
    pub fn new() -> StateList {
        StateList::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, index: usize) -> &State {
        &self.states[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut State {
        &mut self.states[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &State> {
        self.states.iter().rev()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut State> {
        self.states.iter_mut().rev()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn remove(&mut self, index: usize) {
        self.states.remove(index);
    }

    /// Keep only the states accepted by the predicate.
    pub fn retain<F: FnMut(&State) -> bool>(&mut self, f: F) {
        self.states.retain(f);
    }

    pub(crate) fn push(&mut self, st: State) -> usize {
        self.states.push(st);
        self.states.len() - 1
    }

    /// Duplicate, keeping per-frame data.
    pub fn dup(&self) -> StateList {
        StateList { states: self.states.clone(), changed: self.changed }
    }

    /// Find the most recent state matching the given event.
    pub fn lookup(&self, ev: &Ev) -> Option<usize> {
        (0..self.states.len()).rev().find(|&i| self.states[i].matches(ev))
    }

    /// Update the frame state for a new event, creating the state if
    /// this opens a new frame. Closed and bogus states matching the
    /// event are purged on the way, so a frequently updated frame
    /// stays cheap to find.
    pub fn update(&mut self, db: &EvDb, ev: &Ev) -> usize {
        let mut phase = db.phase(ev);
        let mut idx = None;
        let mut i = self.states.len();
        while i > 0 {
            i -= 1;
            if self.states[i].matches(ev) {
                let st = &mut self.states[i];
                if !st.is_terminated() && !st.flags.contains(StateFlags::BOGUS) {
                    st.flags.remove(StateFlags::NEW);
                    idx = Some(i);
                    break;
                }
                self.states.remove(i);
            }
        }
        let mut idx = match idx {
            Some(i) => i,
            None => self.push(State::from_ev(*ev)),
        };
        if phase == Phase::FIRST {
            if self.states[idx].flags != StateFlags::NEW {
                // a first event arrived while the frame is still
                // open: open a second, nested frame
                let mut st = State::from_ev(*ev);
                st.flags = StateFlags::NEW | StateFlags::NESTED;
                debug!("statelist: {}: nested frame", ev);
                idx = self.push(st);
            }
        } else if phase == Phase::NEXT || phase == Phase::LAST {
            if self.states[idx].flags == StateFlags::NEW {
                // a mid-frame event without a start: treat the frame
                // as a self-contained bogus one
                self.states[idx].flags.insert(StateFlags::BOGUS);
                phase.insert(Phase::FIRST);
                phase.remove(Phase::NEXT);
                debug!("statelist: {}: missing first event", ev);
            }
        } else if phase == Phase::FIRST | Phase::NEXT {
            if self.states[idx].flags == StateFlags::NEW {
                phase.remove(Phase::NEXT);
            } else {
                phase.remove(Phase::FIRST);
            }
        } else if phase == Phase::FIRST | Phase::LAST {
            // nothing
        } else {
            panic!("StateList::update: bad phase {:?}", phase);
        }
        let st = &mut self.states[idx];
        st.ev = *ev;
        st.phase = phase;
        st.flags.insert(StateFlags::CHANGED);
        self.changed = true;
        idx
    }

    /// Start a new tick (or throttling window): purge closed frames
    /// and clear the CHANGED flags. Frames whose phase is FIRST|LAST
    /// (controllers, tempo changes) are kept, they are restorable.
    pub fn outdate(&mut self) {
        if !self.changed {
            return;
        }
        self.changed = false;
        self.states.retain_mut(|st| {
            if st.is_terminated() {
                false
            } else {
                st.flags.remove(StateFlags::CHANGED);
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_frame_lifecycle() {
        let db = EvDb::new();
        let mut slist = StateList::new();
        let i = slist.update(&db, &Ev::note_on(0, 0, 60, 100));
        assert_eq!(slist.get(i).phase, Phase::FIRST);
        assert!(slist.get(i).flags.contains(StateFlags::NEW));
        let i = slist.update(&db, &Ev::key_aft(0, 0, 60, 20));
        assert_eq!(slist.get(i).phase, Phase::NEXT);
        assert!(!slist.get(i).flags.contains(StateFlags::NEW));
        let i = slist.update(&db, &Ev::note_off(0, 0, 60));
        assert!(slist.get(i).is_terminated());
        slist.outdate();
        assert!(slist.is_empty());
    }

    #[test]
    fn missing_first_is_bogus() {
        let db = EvDb::new();
        let mut slist = StateList::new();
        let i = slist.update(&db, &Ev::note_off(0, 0, 60));
        let st = slist.get(i);
        assert!(st.flags.contains(StateFlags::BOGUS));
        // phase rewritten to a self-contained frame
        assert_eq!(st.phase, Phase::FIRST | Phase::LAST);
    }

    #[test]
    fn nested_note_on() {
        let db = EvDb::new();
        let mut slist = StateList::new();
        slist.update(&db, &Ev::note_on(0, 0, 60, 100));
        let i = slist.update(&db, &Ev::note_on(0, 0, 60, 90));
        assert!(slist.get(i).flags.contains(StateFlags::NESTED));
        assert_eq!(slist.len(), 2);
        // the nested state is found first
        assert_eq!(slist.lookup(&Ev::note_off(0, 0, 60)), Some(i));
    }

    #[test]
    fn controller_sweep() {
        let db = EvDb::new();
        let mut slist = StateList::new();
        // sustain has a default of 0: non-default opens a frame
        let i = slist.update(&db, &Ev::xctl(0, 0, 64, 127));
        assert_eq!(slist.get(i).phase, Phase::FIRST);
        let i = slist.update(&db, &Ev::xctl(0, 0, 64, 64));
        assert_eq!(slist.get(i).phase, Phase::NEXT);
        let i = slist.update(&db, &Ev::xctl(0, 0, 64, 0));
        assert!(slist.get(i).is_terminated());
        // volume is a parameter: restorable, not cancellable
        let i = slist.update(&db, &Ev::xctl(0, 0, 7, 100));
        assert_eq!(slist.get(i).phase, Phase::FIRST | Phase::LAST);
        assert!(slist.get(i).cancel(&db).is_none());
        assert_eq!(slist.get(i).restore(), Some(Ev::xctl(0, 0, 7, 100)));
        slist.outdate();
        // the volume state survives the tick boundary
        assert_eq!(slist.len(), 1);
    }

    #[test]
    fn cancel_events() {
        let db = EvDb::new();
        let mut slist = StateList::new();
        let i = slist.update(&db, &Ev::note_on(0, 1, 60, 100));
        assert_eq!(slist.get(i).cancel(&db), Some(Ev::note_off(0, 1, 60)));
        let i = slist.update(&db, &Ev::bend(2, 3, 0));
        assert_eq!(
            slist.get(i).cancel(&db),
            Some(Ev::bend(2, 3, crate::core::ev::EV_BEND_DEFAULT))
        );
        let i = slist.update(&db, &Ev::xctl(0, 0, 64, 127));
        assert_eq!(slist.get(i).cancel(&db), Some(Ev::xctl(0, 0, 64, 0)));
        // notes are never restored
        let i = slist.update(&db, &Ev::note_on(0, 1, 61, 100));
        assert_eq!(slist.get(i).restore(), None);
    }
}
