//! Track cursors. A [`SeqPtr`] walks a [`Track`] tick by tick without
//! rescanning, maintaining a [`StateList`] snapshot of every frame
//! open at the cursor, so a consumer can cancel or restore the stream
//! at the current position at any time.
//!
//! The cursor also supports editing at the current position (insert
//! and remove of events and blank time), which is how recording
//! works, and the two merge primitives used to record over playback:
//! `evmerge1` for the replayed stream and `evmerge2` for the live
//! stream, producing a track that contains the baseline plus the
//! changes.

use crate::constants::{DEFAULT_BPM, DEFAULT_TPU, DEFAULT_USEC24};
use crate::core::ev::{Cmd, Ev, EvDb, Phase};
use crate::core::state::StateList;
use crate::song::track::{SeqEv, Track};

/// Frame-ownership tags used by the merge primitives.
const TAG_REPLAY: u32 = 0;
const TAG_LIVE: u32 = 1;

/// A cursor into a track: the index of the next event, the tics
/// consumed inside its delta, the absolute position, and the frame
/// states at the cursor.
#[derive(Clone, Debug, Default)]
pub struct SeqPtr {
    pub(crate) pos: usize,
    pub(crate) delta: u32,
    pub tic: u32,
    pub statelist: StateList,
}

impl SeqPtr {
    pub fn new() -> SeqPtr {
        SeqPtr::default()
    }

    fn node_delta(&self, track: &Track) -> u32 {
        if self.pos < track.evs.len() {
            track.evs[self.pos].delta
        } else {
            track.eot_delta
        }
    }

    /// True if an event is due at the current position.
    pub fn ev_avail(&self, track: &Track) -> bool {
        self.pos < track.evs.len() && track.evs[self.pos].delta == self.delta
    }

    /// True if the cursor consumed the whole track, blank included.
    pub fn eot(&self, track: &Track) -> bool {
        self.pos == track.evs.len() && self.delta == track.eot_delta
    }

    /// Consume the next event due at the current position and update
    /// the state snapshot; the returned index points into
    /// `self.statelist`.
    pub fn evget(&mut self, db: &EvDb, track: &Track) -> Option<usize> {
        if !self.ev_avail(track) {
            return None;
        }
        let ev = track.evs[self.pos].ev;
        self.pos += 1;
        self.delta = 0;
        let tic = self.tic;
        let i = self.statelist.update(db, &ev);
        if self.statelist.get(i).phase.contains(Phase::FIRST) {
            self.statelist.get_mut(i).tic = tic;
        }
        Some(i)
    }

    /// Remove the next event due at the current position from the
    /// track, accounting for it in `slist` (the baseline state of the
    /// removed stream); the returned index points into `slist`.
    pub fn evdel(
        &mut self,
        db: &EvDb,
        track: &mut Track,
        slist: &mut StateList,
    ) -> Option<usize> {
        if !self.ev_avail(track) {
            return None;
        }
        let se = track.evs.remove(self.pos);
        if self.pos < track.evs.len() {
            track.evs[self.pos].delta += se.delta;
        } else {
            track.eot_delta += se.delta;
        }
        let tic = self.tic;
        let i = slist.update(db, &se.ev);
        if slist.get(i).phase.contains(Phase::FIRST) {
            slist.get_mut(i).tic = tic;
        }
        Some(i)
    }

    /// Insert an event at the current position and update the state
    /// snapshot.
    pub fn evput(&mut self, db: &EvDb, track: &mut Track, ev: &Ev) -> usize {
        let d = self.delta;
        if self.pos < track.evs.len() {
            track.evs[self.pos].delta -= d;
        } else {
            track.eot_delta -= d;
        }
        track.evs.insert(self.pos, SeqEv { delta: d, ev: *ev });
        self.pos += 1;
        self.delta = 0;
        let tic = self.tic;
        let i = self.statelist.update(db, ev);
        if self.statelist.get(i).phase.contains(Phase::FIRST) {
            self.statelist.get_mut(i).tic = tic;
        }
        i
    }

    /// Advance by at most `max` tics of blank; stops early at the next
    /// event or at the end of the track. Returns the tics moved.
    pub fn ticskip(&mut self, track: &Track, max: u32) -> u32 {
        let mut ntics = self.node_delta(track) - self.delta;
        if ntics > max {
            ntics = max;
        }
        self.delta += ntics;
        self.tic += ntics;
        ntics
    }

    /// Insert `ntics` of blank at the current position and step over
    /// it.
    pub fn ticput(&mut self, track: &mut Track, ntics: u32) {
        if self.pos < track.evs.len() {
            track.evs[self.pos].delta += ntics;
        } else {
            track.eot_delta += ntics;
        }
        self.delta += ntics;
        self.tic += ntics;
    }

    /// Advance by `ntics`, consuming any event on the way. Returns the
    /// tics actually moved, which is smaller when the end of the track
    /// is reached.
    pub fn skip(&mut self, db: &EvDb, track: &Track, mut ntics: u32) -> u32 {
        let mut done = 0;
        loop {
            while self.evget(db, track).is_some() {}
            if ntics == 0 {
                break;
            }
            let k = self.ticskip(track, ntics);
            if k == 0 {
                break;
            }
            ntics -= k;
            done += k;
        }
        done
    }

    /// Like `skip`, but grows the trailing blank as needed so the
    /// cursor always lands on the requested position. Used by the
    /// recording cursor.
    pub fn seek(&mut self, db: &EvDb, track: &mut Track, ntics: u32) {
        let mut remaining = ntics;
        loop {
            while self.evget(db, track).is_some() {}
            if remaining == 0 {
                break;
            }
            let k = self.ticskip(track, remaining);
            remaining -= k;
            if remaining > 0 && k == 0 && !self.ev_avail(track) {
                track.eot_delta += remaining;
            }
        }
    }

    /// Current time signature at the cursor, as (beats per measure,
    /// tics per beat).
    pub fn getsign(&self) -> (u32, u32) {
        for st in self.statelist.iter() {
            if st.ev.cmd == Cmd::Timesig {
                return (st.ev.v0, st.ev.v1);
            }
        }
        (DEFAULT_BPM, DEFAULT_TPU / DEFAULT_BPM)
    }

    /// Current tempo at the cursor, as a tick period in 1/24 µs.
    pub fn gettempo(&self) -> u32 {
        for st in self.statelist.iter() {
            if st.ev.cmd == Cmd::Tempo {
                return st.ev.v0;
            }
        }
        DEFAULT_USEC24
    }

    /// Merge an event of the replayed (baseline) stream into the
    /// track at the cursor; `rphase` is the phase of the event in the
    /// replayed stream. The event is dropped while a live frame owns
    /// its key, and so is the rest of a replayed frame whose opening
    /// was dropped. Returns the merged state index, `None` if
    /// dropped.
    pub fn evmerge1(
        &mut self,
        db: &EvDb,
        track: &mut Track,
        ev: &Ev,
        rphase: Phase,
    ) -> Option<usize> {
        match self.statelist.lookup(ev) {
            Some(i) => {
                let st = self.statelist.get(i);
                if st.tag == TAG_LIVE
                    && (!st.is_terminated() || !rphase.contains(Phase::FIRST))
                {
                    return None;
                }
            }
            None => {
                if !rphase.contains(Phase::FIRST) {
                    return None;
                }
            }
        }
        let i = self.evput(db, track, ev);
        self.statelist.get_mut(i).tag = TAG_REPLAY;
        Some(i)
    }

    /// Merge an event of the live stream into the track at the
    /// cursor. If the event opens a frame over an active replayed
    /// frame, the replayed frame is closed in the track and its
    /// cancel event is returned so the caller can silence it.
    pub fn evmerge2(&mut self, db: &EvDb, track: &mut Track, ev: &Ev) -> Option<Ev> {
        let mut rev = None;
        if db.phase(ev).contains(Phase::FIRST) {
            if let Some(i) = self.statelist.lookup(ev) {
                let st = self.statelist.get(i);
                if st.tag == TAG_REPLAY && !st.is_terminated() {
                    if let Some(ca) = st.cancel(db) {
                        self.evput(db, track, &ca);
                        rev = Some(ca);
                    }
                }
            }
        }
        let i = self.evput(db, track, ev);
        self.statelist.get_mut(i).tag = TAG_LIVE;
        rev
    }
}

/// Merge `src` into `dst`: `dst` events form the baseline, `src`
/// events override conflicting baseline frames, exactly as live input
/// overrides replay while recording. The result replaces `dst`.
pub fn track_merge(db: &EvDb, dst: &mut Track, src: &Track) {
    let maxlen = dst.numtic().max(src.numtic());
    let mut out = Track::new();
    let mut wp = SeqPtr::new();
    let mut dp = SeqPtr::new();
    let mut sp = SeqPtr::new();
    loop {
        while dp.ev_avail(dst) {
            let ev = dst.evs[dp.pos].ev;
            let i = dp.evget(db, dst).unwrap();
            let rphase = dp.statelist.get(i).phase;
            wp.evmerge1(db, &mut out, &ev, rphase);
        }
        while sp.ev_avail(src) {
            let ev = src.evs[sp.pos].ev;
            sp.evget(db, src);
            wp.evmerge2(db, &mut out, &ev);
        }
        let d1 = if dp.pos < dst.evs.len() {
            dst.evs[dp.pos].delta - dp.delta
        } else {
            u32::MAX
        };
        let d2 = if sp.pos < src.evs.len() {
            src.evs[sp.pos].delta - sp.delta
        } else {
            u32::MAX
        };
        let step = d1.min(d2);
        if step == u32::MAX {
            break;
        }
        dp.ticskip(dst, step);
        sp.ticskip(src, step);
        wp.ticput(&mut out, step);
    }
    let len = out.numtic();
    if maxlen > len {
        out.eot_delta += maxlen - len;
    }
    dst.swap(&mut out);
}

/// Absolute tic of the first tick of the given measure, walking the
/// meta track for time signature changes.
pub fn track_findmeasure(db: &EvDb, meta: &Track, measure: u32) -> u32 {
    let mut p = SeqPtr::new();
    let (mut m, mut b, mut t) = (0u32, 0u32, 0u32);
    let mut abs = 0u32;
    loop {
        while p.evget(db, meta).is_some() {}
        let (bpm, tpb) = p.getsign();
        let delta = (measure - m) * bpm * tpb - b * tpb - t;
        if delta == 0 {
            break;
        }
        let skipped = p.ticskip(meta, delta);
        if skipped == 0 && !p.ev_avail(meta) {
            // past the end of the meta track: the current signature
            // holds for the rest of the song
            abs += delta;
            break;
        }
        abs += skipped;
        t += skipped;
        b += t / tpb;
        t %= tpb;
        m += b / bpm;
        b %= bpm;
    }
    abs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_track() -> Track {
        let mut t = Track::new();
        let mut p = SeqPtr::new();
        let db = EvDb::new();
        p.seek(&db, &mut t, 10);
        p.evput(&db, &mut t, &Ev::note_on(0, 0, 60, 100));
        p.seek(&db, &mut t, 5);
        p.evput(&db, &mut t, &Ev::note_off(0, 0, 60));
        p.seek(&db, &mut t, 5);
        t
    }

    #[test]
    fn cursor_walk() {
        let db = EvDb::new();
        let t = note_track();
        assert_eq!(t.numtic(), 20);
        let mut p = SeqPtr::new();
        assert_eq!(p.skip(&db, &t, 10), 10);
        assert!(p.ev_avail(&t));
        let i = p.evget(&db, &t).unwrap();
        assert_eq!(p.statelist.get(i).ev, Ev::note_on(0, 0, 60, 100));
        assert_eq!(p.statelist.get(i).tic, 10);
        assert_eq!(p.skip(&db, &t, 100), 10);
        assert!(p.eot(&t));
        // the note-off was consumed on the way
        p.statelist.outdate();
        assert!(p.statelist.is_empty());
    }

    #[test]
    fn seek_extends_blank() {
        let db = EvDb::new();
        let mut t = Track::new();
        let mut p = SeqPtr::new();
        p.seek(&db, &mut t, 96);
        assert_eq!(t.numtic(), 96);
        assert_eq!(p.tic, 96);
    }

    #[test]
    fn evdel_keeps_positions() {
        let db = EvDb::new();
        let mut t = note_track();
        let mut p = SeqPtr::new();
        let mut baseline = StateList::new();
        p.skip(&db, &t, 10);
        let i = p.evdel(&db, &mut t, &mut baseline).unwrap();
        assert_eq!(baseline.get(i).ev, Ev::note_on(0, 0, 60, 100));
        // removing the event must not change the track length
        assert_eq!(t.numtic(), 20);
        assert_eq!(t.numev(), 1);
    }

    #[test]
    fn merge_live_overrides_replay() {
        let db = EvDb::new();
        // baseline: note 60 from tic 0 to 8
        let mut dst = Track::new();
        {
            let mut p = SeqPtr::new();
            p.evput(&db, &mut dst, &Ev::note_on(0, 0, 60, 100));
            p.seek(&db, &mut dst, 8);
            p.evput(&db, &mut dst, &Ev::note_off(0, 0, 60));
        }
        // live: note 60 from tic 4 to 6
        let mut src = Track::new();
        {
            let mut p = SeqPtr::new();
            p.seek(&db, &mut src, 4);
            p.evput(&db, &mut src, &Ev::note_on(0, 0, 60, 90));
            p.seek(&db, &mut src, 2);
            p.evput(&db, &mut src, &Ev::note_off(0, 0, 60));
        }
        track_merge(&db, &mut dst, &src);
        let evs: Vec<(u32, Ev)> = {
            let mut abs = 0;
            dst.events()
                .map(|se| {
                    abs += se.delta;
                    (abs, se.ev)
                })
                .collect()
        };
        // the replayed note is closed when the live one opens, and its
        // own note-off is dropped
        assert_eq!(
            evs,
            vec![
                (0, Ev::note_on(0, 0, 60, 100)),
                (4, Ev::note_off(0, 0, 60)),
                (4, Ev::note_on(0, 0, 60, 90)),
                (6, Ev::note_off(0, 0, 60)),
            ]
        );
        // every note-on is closed
        let mut check = SeqPtr::new();
        check.skip(&db, &dst, dst.numtic());
        check.statelist.outdate();
        assert!(check.statelist.is_empty());
    }

    #[test]
    fn findmeasure_with_signature_change() {
        let db = EvDb::new();
        let mut meta = Track::new();
        let mut p = SeqPtr::new();
        // 4 beats of 24 tics, then 3 beats of 24 tics from measure 1
        p.evput(&db, &mut meta, &Ev::timesig(4, 24));
        p.seek(&db, &mut meta, 96);
        p.evput(&db, &mut meta, &Ev::timesig(3, 24));
        assert_eq!(track_findmeasure(&db, &meta, 0), 0);
        assert_eq!(track_findmeasure(&db, &meta, 1), 96);
        assert_eq!(track_findmeasure(&db, &meta, 2), 96 + 72);
        assert_eq!(track_findmeasure(&db, &meta, 3), 96 + 144);
    }
}
