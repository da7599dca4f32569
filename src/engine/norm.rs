//! The input normalizer: a stateful sanitizer between the devices and
//! the song. It tags each incoming frame as passing or silent, kills
//! frames that start bogus or nested (cancelling whatever was already
//! emitted for the key), and throttles continuous events to one per
//! time slice, releasing the pending value on a periodic timeout.

use crate::constants::tempo_to_usec24;
use crate::core::ev::{Ev, Phase};
use crate::core::state::{StateFlags, StateList};
use crate::engine::timo::TimoKind;
use crate::engine::Engine;
use log::debug;

/// Throttling window: 1 tick at 120 bpm.
const NORM_TIMO: u32 = tempo_to_usec24(120, 24);

/// Events allowed per window and frame.
const NORM_MAXEV: u32 = 1;

const TAG_PASS: u32 = 1;
const TAG_PENDING: u32 = 2;

/// Normalizer state: one list of frames for the whole input.
#[derive(Debug, Default)]
pub struct Norm {
    pub slist: StateList,
}

impl Engine {
    pub(crate) fn norm_start(&mut self) {
        self.norm.slist = StateList::new();
        self.timo.add(TimoKind::NormFlush, NORM_TIMO);
    }

    /// Counterpart of `norm_start`: cancel everything still sounding,
    /// whether it passed or not.
    pub(crate) fn norm_stop(&mut self) {
        let cancels: Vec<Ev> = self
            .norm
            .slist
            .iter()
            .filter_map(|st| st.cancel(&self.evdb))
            .collect();
        for ca in cancels {
            let idx = self.norm.slist.update(&self.evdb, &ca);
            let ev = self.norm.slist.get(idx).ev;
            self.norm_putev(&ev);
        }
        self.timo.del(TimoKind::NormFlush);
        self.norm.slist.clear();
    }

    /// Shut all passing frames: notes off, modified controllers and
    /// the bender back to defaults.
    pub(crate) fn norm_shut(&mut self) {
        let cancels: Vec<(Ev, Option<Ev>)> = self
            .norm
            .slist
            .iter()
            .filter(|st| st.tag & TAG_PASS != 0)
            .map(|st| (st.ev, st.cancel(&self.evdb)))
            .collect();
        for (key, ca) in cancels {
            if let Some(ca) = ca {
                debug!("norm: {}: cancelled by {}", key, ca);
                let idx = self.norm.slist.update(&self.evdb, &ca);
                let ev = self.norm.slist.get(idx).ev;
                self.norm_putev(&ev);
            }
            if let Some(idx) = self.norm.slist.lookup(&key) {
                self.norm.slist.get_mut(idx).tag &= !TAG_PASS;
            }
        }
    }

    /// Kill all passing frames matching the given event: a bogus
    /// event was received for their key.
    fn norm_kill(&mut self, ev: &Ev) {
        let cancels: Vec<(Ev, Option<Ev>)> = self
            .norm
            .slist
            .iter()
            .filter(|st| {
                st.matches(ev)
                    && st.tag & TAG_PASS != 0
                    && !st.phase.contains(Phase::LAST)
            })
            .map(|st| (st.ev, st.cancel(&self.evdb)))
            .collect();
        for (key, ca) in cancels {
            if let Some(ca) = ca {
                let idx = self.norm.slist.update(&self.evdb, &ca);
                let out = self.norm.slist.get(idx).ev;
                self.norm_putev(&out);
            }
            if let Some(idx) = self.norm.slist.lookup(&key) {
                self.norm.slist.get_mut(idx).tag &= !TAG_PASS;
            }
            debug!("norm: {}: killed", key);
        }
    }

    /// Process one canonical input event.
    pub(crate) fn norm_evcb(&mut self, ev: &Ev) {
        debug_assert!(ev.is_voice() || ev.is_sx());
        let idx = self.norm.slist.update(&self.evdb, ev);
        let st = self.norm.slist.get_mut(idx);
        if st.phase.contains(Phase::FIRST) {
            if st.flags.contains(StateFlags::NEW) {
                st.nevents = 0;
            }
            if st.flags.intersects(StateFlags::BOGUS | StateFlags::NESTED) {
                st.tag = 0;
                debug!("norm: {}: bogus/nested frame", ev);
                self.norm_kill(ev);
                return;
            }
            st.tag = TAG_PASS;
        }
        let st = self.norm.slist.get_mut(idx);
        if st.tag & TAG_PASS == 0 {
            return;
        }
        // throttling: beyond the per-window allowance, delay events
        // that don't change the frame phase
        if st.nevents > NORM_MAXEV
            && (st.phase == Phase::NEXT || st.phase == Phase::FIRST | Phase::LAST)
        {
            st.tag |= TAG_PENDING;
            return;
        }
        st.nevents += 1;
        let out = st.ev;
        self.norm_putev(&out);
    }

    /// Inject an event into the song.
    fn norm_putev(&mut self, ev: &Ev) {
        if !ev.is_voice() && !ev.is_sx() {
            return;
        }
        self.song_evcb(&ev.clone());
        self.flush();
    }

    /// Periodic timeout: reset the window counters and release the
    /// pending events.
    pub(crate) fn norm_timo_cb(&mut self) {
        self.norm.slist.outdate();
        let mut pending: Vec<Ev> = Vec::new();
        for st in self.norm.slist.iter_mut() {
            st.nevents = 0;
            if st.tag & TAG_PENDING != 0 {
                st.tag &= !TAG_PENDING;
                st.nevents = 1;
                pending.push(st.ev);
            }
        }
        for ev in pending {
            self.norm_putev(&ev);
        }
        self.timo.add(TimoKind::NormFlush, NORM_TIMO);
    }
}
