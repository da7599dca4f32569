//! The output mixer: resolves conflicts between concurrent sources
//! writing to the same output frame. Each source has an id and the
//! lower id wins; when a higher-priority source takes a frame over,
//! the loser's frame is cancelled first so nothing is left hanging.
//!
//! Terminated continuous-controller frames are kept for about one
//! second before the key is released, so that e.g. adjusting a
//! controller live briefly masks the same controller played by a
//! track.

use crate::core::ev::{Ev, Phase};
use crate::core::state::{StateFlags, StateList};
use crate::engine::timo::TimoKind;
use crate::engine::Engine;
use log::debug;

/// Purge scan period, in 1/24 µs.
const MIXOUT_TIMO: u32 = 1_000_000;

/// Idle scan periods before a terminated controller frame is purged.
const MIXOUT_MAXTICS: u32 = 24;

/// Source id of live input; lowest, always wins.
pub const PRIO_INPUT: u32 = 0;
/// Source id of channel-config events.
pub const PRIO_CHAN: u32 = 1;
/// Source id of song tracks.
pub const PRIO_TRACK: u32 = 2;

#[derive(Debug, Default)]
pub struct MixOut {
    pub slist: StateList,
}

impl Engine {
    pub(crate) fn mixout_start(&mut self) {
        self.mixout.slist = StateList::new();
        self.timo.add(TimoKind::MixoutPurge, MIXOUT_TIMO);
    }

    pub(crate) fn mixout_stop(&mut self) {
        self.timo.del(TimoKind::MixoutPurge);
        self.mixout.slist.clear();
    }

    /// Mix one event from the given source into the output.
    pub fn mixout_put(&mut self, ev: &Ev, id: u32) {
        if let Some(i) = self.mixout.slist.lookup(ev) {
            let st = self.mixout.slist.get(i);
            if st.tag != id {
                if st.tag < id {
                    debug!("mixout: {} ({}): masked by source {}", ev, id, st.tag);
                    return;
                }
                // the incoming source has priority: close the loser's
                // frame before taking over
                if let Some(ca) = st.cancel(&self.evdb) {
                    debug!("mixout: {} ({}): kicks {}", ev, id, st.ev);
                    self.mixout.slist.update(&self.evdb, &ca);
                    self.put_ev(&ca);
                }
            }
        }
        let i = self.mixout.slist.update(&self.evdb, ev);
        let st = self.mixout.slist.get_mut(i);
        st.tag = id;
        st.tic = 0;
        if st.flags.intersects(StateFlags::BOGUS | StateFlags::NESTED) {
            debug!("mixout: {}: nested or bogus, not sent", ev);
            return;
        }
        self.put_ev(ev);
    }

    /// Periodic purge of frames that are no more used.
    pub(crate) fn mixout_timo_cb(&mut self) {
        let mut i = self.mixout.slist.len();
        while i > 0 {
            i -= 1;
            let st = self.mixout.slist.get_mut(i);
            if st.phase == Phase::LAST {
                self.mixout.slist.remove(i);
            } else if st.phase == Phase::FIRST | Phase::LAST {
                if st.tic >= MIXOUT_MAXTICS {
                    debug!("mixout: {}: timed out", st.ev);
                    self.mixout.slist.remove(i);
                } else {
                    st.flags.remove(StateFlags::CHANGED);
                    st.tic += 1;
                }
            }
        }
        self.timo.add(TimoKind::MixoutPurge, MIXOUT_TIMO);
    }
}
