//! Real-time song logic: the tick callbacks that drive playback and
//! recording, the loop, relocation, the mode ladder and the record
//! merge. These are engine methods because they weave the song model
//! together with the mixer, the normalizer and the clock.

use crate::constants::*;
use crate::core::ev::{Cmd, Ev, Phase};
use crate::core::state::StateFlags;
use crate::engine::mixout::{PRIO_CHAN, PRIO_INPUT, PRIO_TRACK};
use crate::engine::mux::MuxPhase;
use crate::engine::timo::TimoKind;
use crate::engine::Engine;
use crate::song::ptr::{track_findmeasure, track_merge, SeqPtr};
use crate::song::{Loc, Mode, Sysex, TapMode, Tempo};
use log::{debug, info, warn};

/// Input frame selection while recording.
const TAG_OFF: u32 = 0;
/// Playing through, not recorded (e.g. during count-in).
const TAG_PLAY: u32 = 1;
/// Recorded.
const TAG_REC: u32 = 2;

impl Engine {
    /*
     * meta events
     */

    /// Apply a meta event to the current position state; `changed` is
    /// set when the event was just played (an incomplete measure is
    /// then closed).
    fn song_metaput(&mut self, ev: &Ev, changed: bool) {
        match ev.cmd {
            Cmd::Timesig => {
                if changed && (self.song.beat != 0 || self.song.tic != 0) {
                    // found an incomplete measure, skip to the
                    // beginning of the next one
                    self.song.beat = 0;
                    self.song.tic = 0;
                    self.song.measure += 1;
                }
                self.song.bpm = ev.v0;
                self.song.tpb = ev.v1;
            }
            Cmd::Tempo => {
                self.song.tempo = Tempo::new(ev.v0);
                if self.is_open {
                    let t = self.song.tempo_factor as u64 * self.song.tempo.get() as u64 / 0x100;
                    self.change_tempo(t);
                }
            }
            _ => {}
        }
    }

    /*
     * per-track frame sweeps
     */

    /// Cancel all sounding frames of the given track.
    fn song_confcancel(&mut self, tid: u32, prio: u32) {
        let cancels: Vec<Ev> = {
            let db = &self.evdb;
            let t = match self.song.trk_by_id_mut(tid) {
                Some(t) => t,
                None => return,
            };
            let tp = match t.trackptr.as_mut() {
                Some(tp) => tp,
                None => return,
            };
            let mut out = Vec::new();
            for st in tp.statelist.iter_mut() {
                if st.tag != 0 {
                    if let Some(ca) = st.cancel(db) {
                        out.push(ca);
                    }
                    st.tag = 0;
                }
            }
            out
        };
        for ca in cancels {
            self.mixout_put(&ca, prio);
        }
    }

    /// Restore the restorable frames of the given track; with `all`,
    /// unterminated frames (controller sweeps in progress) are
    /// restored too.
    fn song_confrestore(&mut self, tid: u32, all: bool, prio: u32) {
        let restores: Vec<Ev> = {
            let t = match self.song.trk_by_id_mut(tid) {
                Some(t) => t,
                None => return,
            };
            let tp = match t.trackptr.as_mut() {
                Some(tp) => tp,
                None => return,
            };
            let mut out = Vec::new();
            for st in tp.statelist.iter_mut() {
                if st.ev.is_note() || st.tag != 0 {
                    continue;
                }
                if !st.phase.contains(Phase::LAST) && !all {
                    continue;
                }
                if let Some(re) = st.restore() {
                    out.push(re);
                }
                st.tag = 1;
            }
            out
        };
        for re in restores {
            self.mixout_put(&re, prio);
        }
    }

    /*
     * loop
     */

    /// Snapshot the cursors at the loop start so playback can repeat
    /// from there. In-flight notes are dropped, they won't be
    /// restored.
    fn song_loop_init(&mut self) {
        {
            let song = &mut self.song;
            if song.loop_enabled {
                song.loop_mstart = song.curpos;
                song.loop_mend = song.curpos + song.curlen;
            } else {
                song.loop_mstart = 0;
                song.loop_mend = 0;
            }
        }
        if self.song.loop_mstart == self.song.loop_mend {
            return;
        }
        let db = &self.evdb;
        let song = &mut self.song;
        song.loop_tstart = track_findmeasure(db, &song.meta, song.loop_mstart);
        song.loop_tend = track_findmeasure(db, &song.meta, song.loop_mend);
        let qstep = song.curquant / 2;
        if song.loop_tstart > qstep {
            song.loop_tstart -= qstep;
            song.loop_tend -= qstep;
        }
        let mut mp = SeqPtr::new();
        mp.skip(db, &song.meta, song.loop_tstart);
        song.loop_metaptr = Some(mp);
        let tstart = song.loop_tstart;
        for t in song.trks.iter_mut() {
            let mut lp = SeqPtr::new();
            lp.skip(db, &t.track, tstart);
            lp.statelist.retain(|st| !st.ev.is_note());
            lp.statelist.outdate();
            t.loop_ptr = Some(lp);
        }
    }

    fn song_loop_done(&mut self) {
        if self.song.loop_mstart == self.song.loop_mend {
            return;
        }
        self.song.loop_metaptr = None;
        for t in self.song.trks.iter_mut() {
            t.loop_ptr = None;
        }
    }

    /// Restore one track (or the meta track) from its loop-start
    /// snapshot: frames absent from the snapshot are cancelled (all
    /// notes are), differing or missing ones are replayed, and the
    /// cursor jumps back.
    fn song_loop_track(&mut self, tid: Option<u32>) {
        enum Out {
            Trk(Ev),
            Meta(Ev),
        }
        let outs: Vec<Out> = {
            let db = &self.evdb;
            let song = &mut self.song;
            let mute = match tid {
                Some(tid) => song_trk_mute(&song.trks, tid),
                None => false,
            };
            let (sp, lp) = match tid {
                Some(tid) => {
                    let t = match song.trks.iter_mut().find(|t| t.id == tid) {
                        Some(t) => t,
                        None => return,
                    };
                    (t.trackptr.as_mut().unwrap(), t.loop_ptr.as_mut().unwrap())
                }
                None => (
                    song.metaptr.as_mut().unwrap(),
                    song.loop_metaptr.as_mut().unwrap(),
                ),
            };
            let mut outs = Vec::new();

            // cancel frames not present in the snapshot (all notes)
            let keys: Vec<Ev> = sp.statelist.iter().map(|st| st.ev).collect();
            for key in keys {
                if lp.statelist.lookup(&key).is_some() {
                    continue;
                }
                let d = match sp.statelist.lookup(&key) {
                    Some(d) => d,
                    None => continue,
                };
                let ca = match sp.statelist.get(d).cancel(db) {
                    Some(ca) => ca,
                    None => continue,
                };
                let i = sp.statelist.update(db, &ca);
                if sp.statelist.get(i).tag != 0 {
                    outs.push(match tid {
                        Some(_) => Out::Trk(ca),
                        None => Out::Meta(ca),
                    });
                }
            }

            // restore the snapshot frames that differ
            let snap: Vec<(Ev, Option<Ev>)> = lp
                .statelist
                .iter()
                .map(|s| (s.ev, s.restore()))
                .collect();
            for (key, re) in snap {
                if let Some(d) = sp.statelist.lookup(&key) {
                    if sp.statelist.get(d).eq_ev(db, &key) {
                        continue;
                    }
                }
                let re = match re {
                    Some(re) => re,
                    None => continue,
                };
                let i = sp.statelist.update(db, &re);
                let st = sp.statelist.get_mut(i);
                if st.phase.contains(Phase::FIRST) {
                    st.tag = match tid {
                        Some(_) => !mute as u32,
                        None => re.is_meta() as u32,
                    };
                }
                if st.tag != 0 {
                    outs.push(match tid {
                        Some(_) => Out::Trk(re),
                        None => Out::Meta(re),
                    });
                }
            }

            let (sp, lp) = match tid {
                Some(tid) => {
                    let t = song.trks.iter_mut().find(|t| t.id == tid).unwrap();
                    (t.trackptr.as_mut().unwrap(), t.loop_ptr.as_ref().unwrap())
                }
                None => (
                    song.metaptr.as_mut().unwrap(),
                    song.loop_metaptr.as_ref().unwrap(),
                ),
            };
            sp.pos = lp.pos;
            sp.delta = lp.delta;
            sp.tic = lp.tic;
            outs
        };
        for out in outs {
            match out {
                Out::Trk(ev) => self.mixout_put(&ev, PRIO_TRACK),
                Out::Meta(ev) => self.song_metaput(&ev, true),
            }
        }
    }

    /// Start replaying the recording track from the loop start.
    fn song_loop_rec(&mut self) {
        if self.song.playptr.is_some() {
            return;
        }
        let song = &mut self.song;
        let mut pp = SeqPtr::new();
        let n = pp.ticskip(&song.rec, song.loop_tstart);
        if n != song.loop_tstart {
            panic!("song: events before the loop start");
        }
        song.playptr = Some(pp);
        debug!("song: starting replay");
    }

    /// At the loop end: jump every cursor back to the loop start.
    fn song_loop_repeat(&mut self) -> bool {
        if self.song.loop_mstart == self.song.loop_mend
            || self.song.abspos != self.song.loop_tend
        {
            return false;
        }
        self.song.abspos = self.song.loop_tstart;
        self.song.measure -= self.song.loop_mend - self.song.loop_mstart;
        let ids: Vec<u32> = self.song.trks.iter().map(|t| t.id).collect();
        for tid in ids {
            self.song_loop_track(Some(tid));
        }
        self.song_loop_track(None);
        if self.song.mode >= Mode::Rec {
            self.song_loop_rec();
        }
        true
    }

    /*
     * tick movement
     */

    /// Remove the next replayed event from the recording track,
    /// keeping the record cursor consistent (both cursors share the
    /// track). Returns the index into `rec_replay`.
    fn song_replay_evdel(&mut self) -> Option<usize> {
        let db = &self.evdb;
        let song = &mut self.song;
        let pp = song.playptr.as_mut()?;
        let before = pp.pos;
        let d = pp.delta;
        let i = pp.evdel(db, &mut song.rec, &mut song.rec_replay)?;
        let rp = song.recptr.as_mut().unwrap();
        if rp.pos > before {
            rp.pos -= 1;
            if rp.pos == before {
                rp.delta += d;
            }
        }
        Some(i)
    }

    /// Move all cursors one tick forward.
    fn song_ticskip(&mut self) {
        let mut moved = {
            let song = &mut self.song;
            song.metaptr.as_mut().unwrap().ticskip(&song.meta, 1)
        };
        self.song.tic += 1;
        if self.song.tic >= self.song.tpb {
            self.song.tic = 0;
            self.song.beat += 1;
            if self.song.beat >= self.song.bpm {
                self.song.beat = 0;
                self.song.measure += 1;
            }
        }
        self.song.abspos += 1;
        for t in self.song.trks.iter_mut() {
            moved |= t.trackptr.as_mut().unwrap().ticskip(&t.track, 1);
        }
        if self.song.mode >= Mode::Rec {
            {
                let song = &mut self.song;
                if let Some(pp) = song.playptr.as_mut() {
                    pp.ticskip(&song.rec, 1);
                    song.rec_replay.outdate();
                }
                song.recptr.as_mut().unwrap().ticput(&mut song.rec, 1);
                song.rec_input.outdate();
            }

            // terminate recorded frames longer than the loop period
            let period = self.song.loop_tend - self.song.loop_tstart;
            if period != 0 {
                let cancels: Vec<Ev> = {
                    let db = &self.evdb;
                    let mut out = Vec::new();
                    for st in self.song.rec_input.iter_mut() {
                        if st.tag != TAG_REC {
                            continue;
                        }
                        st.tic += 1;
                        if st.tic != period {
                            continue;
                        }
                        if let Some(ca) = st.cancel(db) {
                            out.push(ca);
                        }
                        st.tag = TAG_OFF;
                    }
                    out
                };
                for ca in cancels {
                    {
                        let db = &self.evdb;
                        let song = &mut self.song;
                        let rp = song.recptr.as_mut().unwrap();
                        rp.evmerge2(db, &mut song.rec, &ca);
                    }
                    self.mixout_put(&ca, PRIO_INPUT);
                }
            }
        }
        if self.song_loop_repeat() {
            return;
        }
        if moved == 0 && !self.song.complete {
            info!("song: complete");
            self.song.complete = true;
        }
    }

    /// Play everything due at the current tick.
    fn song_ticplay(&mut self) {
        loop {
            let item = {
                let db = &self.evdb;
                let song = &mut self.song;
                let mp = song.metaptr.as_mut().unwrap();
                mp.evget(db, &song.meta).map(|i| mp.statelist.get(i).ev)
            };
            match item {
                Some(ev) => self.song_metaput(&ev, true),
                None => break,
            }
        }
        if self.song.tic == 0 {
            debug!(
                "song: at {}:{}:{}",
                self.song.measure, self.song.beat, self.song.tic
            );
        }
        let (beat, tic) = (self.song.beat, self.song.tic);
        self.metro_tic(beat, tic);

        let ids: Vec<u32> = self.song.trks.iter().map(|t| t.id).collect();
        for tid in ids {
            loop {
                let out: Option<Option<Ev>> = {
                    let db = &self.evdb;
                    let t = self.song.trks.iter_mut().find(|t| t.id == tid).unwrap();
                    let mute = t.mute;
                    let tp = t.trackptr.as_mut().unwrap();
                    match tp.evget(db, &t.track) {
                        Some(i) => {
                            let st = tp.statelist.get_mut(i);
                            if st.phase.contains(Phase::FIRST) {
                                st.tag = if mute { 0 } else { 1 };
                            }
                            if st.tag != 0 {
                                Some(Some(st.ev))
                            } else {
                                Some(None)
                            }
                        }
                        None => None,
                    }
                };
                match out {
                    Some(Some(ev)) => self.mixout_put(&ev, PRIO_TRACK),
                    Some(None) => continue,
                    None => break,
                }
            }
        }

        // replay the previous pass of the recording track, merging it
        // forward; live input takes precedence over replayed frames
        if self.song.mode >= Mode::Rec && self.song.playptr.is_some() {
            loop {
                let merged: Option<Option<Ev>> = match self.song_replay_evdel() {
                    Some(i) => {
                        let db = &self.evdb;
                        let song = &mut self.song;
                        let st = song.rec_replay.get_mut(i);
                        st.tag = 1;
                        let (ev, rphase) = (st.ev, st.phase);
                        let rp = song.recptr.as_mut().unwrap();
                        match rp.evmerge1(db, &mut song.rec, &ev, rphase) {
                            Some(_) => Some(Some(ev)),
                            None => Some(None),
                        }
                    }
                    None => None,
                };
                match merged {
                    Some(Some(ev)) => self.mixout_put(&ev, PRIO_INPUT),
                    Some(None) => continue,
                    None => break,
                }
            }
        }
    }

    /*
     * clock callbacks
     */

    /// First tick after the start event: the music begins here.
    pub(crate) fn song_startcb(&mut self) {
        debug!("song: start");
        if self.song.mode >= Mode::Play {
            self.song_ticplay();
            self.flush();
        }
        self.song.started = true;
    }

    /// The clock stopped: silence every playing frame.
    pub(crate) fn song_stopcb(&mut self) {
        debug!("song: stop");
        let ids: Vec<u32> = self.song.trks.iter().map(|t| t.id).collect();
        for tid in ids {
            self.song_confcancel(tid, PRIO_TRACK);
        }
    }

    /// The clock moved one tick forward.
    pub(crate) fn song_movecb(&mut self) {
        if self.song.mode >= Mode::Play {
            self.song_ticskip();
            self.song_ticplay();
        }
        self.flush();
    }

    /// A canonical event arrived from the normalizer.
    pub(crate) fn song_evcb(&mut self, ev: &Ev) {
        if self.song.tap_mode != TapMode::Off && self.song.tap_evspec.matches(&self.evdb, ev) {
            self.song_tap(ev);
            return;
        }

        let filtout: Vec<Ev> = match self.song.curfilt.and_then(|id| self.song.filt_by_id(id)) {
            Some(f) => f.filt.apply(&self.evdb, ev),
            None => vec![*ev],
        };
        let clock_running = self.mux.phase != MuxPhase::StartWait;
        for fev in filtout {
            if self.song.mode >= Mode::Rec {
                let tag = {
                    let db = &self.evdb;
                    let song = &mut self.song;
                    let i = song.rec_input.update(db, &fev);
                    let st = song.rec_input.get_mut(i);
                    if st.phase.contains(Phase::FIRST) {
                        st.tic = 0;
                        st.tag = if st.flags.intersects(StateFlags::BOGUS | StateFlags::NESTED) {
                            TAG_OFF
                        } else if clock_running
                            && (song.loop_mstart == song.loop_mend
                                || song.abspos >= song.loop_tstart)
                        {
                            TAG_REC
                        } else {
                            TAG_PLAY
                        };
                    }
                    st.tag
                };
                if tag == TAG_REC {
                    let rev = {
                        let db = &self.evdb;
                        let song = &mut self.song;
                        let rp = song.recptr.as_mut().unwrap();
                        rp.evmerge2(db, &mut song.rec, &fev)
                    };
                    if let Some(rev) = rev {
                        self.mixout_put(&rev, PRIO_INPUT);
                    }
                }
                if tag == TAG_REC || tag == TAG_PLAY {
                    self.mixout_put(&fev, PRIO_INPUT);
                }
            } else {
                self.mixout_put(&fev, PRIO_INPUT);
            }
        }
    }

    /// Tap handling: the first matching event starts playback, or, in
    /// tempo mode, two taps one beat apart set the tempo first.
    fn song_tap(&mut self, ev: &Ev) {
        if !self.evdb.phase(ev).contains(Phase::FIRST) {
            return;
        }
        if self.song.started {
            return;
        }
        if self.song.tap_cnt == 0 {
            if self.song.tap_mode == TapMode::Start {
                info!("song: start triggered");
                self.song.tap_cnt = -1;
                self.tap_trigger();
            } else {
                info!("song: measuring tempo...");
                self.song.tap_time = self.mux.wallclock;
            }
        } else if self.song.tap_mode == TapMode::Tempo && self.song.tap_cnt == 1 {
            let usec24 = ((self.mux.wallclock - self.song.tap_time) / self.song.tpb as u64) as u32;
            if !(TEMPO_MIN..=TEMPO_MAX).contains(&usec24) {
                info!("song: tempo out of range, aborted");
                self.song.tap_cnt = 0;
                return;
            }
            info!(
                "song: start triggered, tempo = {}",
                60 * 24_000_000 / self.song.tpb / usec24
            );
            self.song.tempo = Tempo::new(usec24);
            self.change_tempo(usec24 as u64);
            self.tap_trigger();
            self.song.tap_cnt = -1;
        }
        self.song.tap_cnt += 1;
    }

    fn tap_trigger(&mut self) {
        if self.devs.clksrc.is_none() && self.devs.mtcsrc.is_none() {
            if self.mux.phase == MuxPhase::StartWait {
                self.mtc_start(0);
            }
        } else {
            self.clock_tic();
        }
    }

    /// A sysex message arrived; keep it when recording.
    pub(crate) fn song_sysexcb(&mut self, unit: u8, data: Vec<u8>) {
        if self.song.mode >= Mode::Rec {
            self.song.recsx.push(Sysex { unit, data });
        }
    }

    /*
     * record merge
     */

    /// Stop recording: finalize open frames, fold the unrolled loop
    /// passes, merge the recording into the current track and push one
    /// undo entry.
    fn song_mergerec(&mut self) {
        // there may be no filter closing frames for us: finalize
        // whatever is still open
        let finals: Vec<(u32, Ev)> = {
            let db = &self.evdb;
            let mut out = Vec::new();
            for st in self.song.rec_input.iter_mut() {
                if st.tag != TAG_REC && st.tag != TAG_PLAY {
                    continue;
                }
                if let Some(ca) = st.cancel(db) {
                    out.push((st.tag, ca));
                }
                st.tag = TAG_OFF;
            }
            out
        };
        for (tag, ca) in finals {
            if tag == TAG_REC {
                let db = &self.evdb;
                let song = &mut self.song;
                let rp = song.recptr.as_mut().unwrap();
                rp.evmerge2(db, &mut song.rec, &ca);
            }
            self.mixout_put(&ca, PRIO_INPUT);
        }

        // cancel replayed frames still sounding
        let cancels: Vec<Ev> = {
            let db = &self.evdb;
            let rp = self.song.recptr.as_ref().unwrap();
            rp.statelist.iter().filter_map(|st| st.cancel(db)).collect()
        };
        for ca in cancels {
            self.mixout_put(&ca, PRIO_INPUT);
        }

        if self.song.playptr.is_some() {
            let period = self.song.loop_tend - self.song.loop_tstart;
            let offset =
                (self.song.playptr.as_ref().unwrap().tic - self.song.loop_tstart) % period;

            // consume the replayed material until the loop boundary
            for _ in offset..period {
                self.song_merge_step(None);
            }

            // the remainder is the final merged pass: fold it back to
            // the loop start
            let mut folded = crate::song::track::Track::new();
            let mut lp = SeqPtr::new();
            lp.ticput(&mut folded, self.song.loop_tstart);
            while self.song.rec.numev() > 0 {
                self.song_merge_step(Some((&mut folded, &mut lp)));
            }
            let song = &mut self.song;
            song.rec.swap(&mut folded);
            song.playptr = None;
        }

        if let Some(tid) = self.song.curtrk {
            let name = self.song.trk_by_id(tid).map(|t| t.name.clone()).unwrap_or_default();
            self.song
                .undo_track_save(crate::song::undo::TrackRef::Trk(tid), "record", &name);
            {
                let db = &self.evdb;
                let song = &mut self.song;
                let rec = std::mem::take(&mut song.rec);
                if let Some(t) = song.trks.iter_mut().find(|t| t.id == tid) {
                    track_merge(db, &mut t.track, &rec);
                }
                song.rec = rec;
            }
            self.song.undo_track_diff();
        }
        self.song.rec.clear();

        // recorded sysex goes to the current bank
        let recsx = std::mem::take(&mut self.song.recsx);
        if let Some(xid) = self.song.cursx {
            if let Some(x) = self.song.sx_by_id_mut(xid) {
                x.sx.extend(recsx);
            }
        }
    }

    /// Consume the replayed events due at the current position, then
    /// advance the replay and record cursors one tick. With `fold`,
    /// events whose frame opens here are diverted to the folded track
    /// instead of being merged forward.
    fn song_merge_step(
        &mut self,
        mut fold: Option<(&mut crate::song::track::Track, &mut SeqPtr)>,
    ) {
        let db = &self.evdb;
        let song = &mut self.song;
        loop {
            let pp = song.playptr.as_mut().unwrap();
            let before = pp.pos;
            let d = pp.delta;
            let i = match pp.evdel(db, &mut song.rec, &mut song.rec_replay) {
                Some(i) => i,
                None => break,
            };
            {
                let rp = song.recptr.as_mut().unwrap();
                if rp.pos > before {
                    rp.pos -= 1;
                    if rp.pos == before {
                        rp.delta += d;
                    }
                }
            }
            let st = song.rec_replay.get_mut(i);
            match fold.as_mut() {
                None => {
                    st.tag = 1;
                    let (ev, rphase) = (st.ev, st.phase);
                    let rp = song.recptr.as_mut().unwrap();
                    rp.evmerge1(db, &mut song.rec, &ev, rphase);
                }
                Some((ftrack, fp)) => {
                    if st.phase.contains(Phase::FIRST) {
                        st.tag = 0;
                    }
                    let (ev, rphase, tag) = (st.ev, st.phase, st.tag);
                    if tag != 0 {
                        let rp = song.recptr.as_mut().unwrap();
                        rp.evmerge1(db, &mut song.rec, &ev, rphase);
                    } else {
                        fp.evput(db, ftrack, &ev);
                    }
                }
            }
        }
        song.recptr.as_mut().unwrap().ticput(&mut song.rec, 1);
        if let Some((ftrack, fp)) = fold.as_mut() {
            fp.ticput(ftrack, 1);
        }
        let pp = song.playptr.as_mut().unwrap();
        pp.ticskip(&song.rec, 1);
    }

    /*
     * relocation
     */

    /// Cancel the current state and restore the state of the given
    /// position; the position is a measure number, an MTC position or
    /// a song position pointer. Returns, for MTC, the remaining
    /// fraction of a tick in 1/24 µs (the clock skips it to stay in
    /// sync).
    pub fn song_loc(&mut self, how: Loc, mut target: u32, mut offs: u32) -> u64 {
        self.song.metaptr = Some(SeqPtr::new());
        let mut endpos: u64 = 0;
        match how {
            Loc::Meas => {}
            Loc::Mtc => {
                endpos = target as u64 * (USEC24_PER_SEC / MTC_SEC) as u64;
                offs = 0;
            }
            Loc::Spp => {
                target *= self.song.tics_per_unit / 16;
                offs = 0;
            }
        }
        let mut pos: u64 = 0;
        self.song.abspos = 0;
        self.song.measure = 0;
        self.song.beat = 0;
        self.song.tic = 0;

        loop {
            let (bpm, tpb, usec24) = {
                let mp = self.song.metaptr.as_ref().unwrap();
                let (bpm, tpb) = mp.getsign();
                (bpm, tpb, mp.gettempo())
            };
            let maxdelta = match how {
                Loc::Meas => {
                    (target - self.song.measure) * bpm * tpb
                        - self.song.beat * tpb
                        - self.song.tic
                }
                Loc::Mtc => ((endpos - pos) / usec24 as u64).min(u32::MAX as u64) as u32,
                Loc::Spp => target - self.song.abspos,
            };
            if maxdelta <= offs {
                break;
            }
            let maxdelta = maxdelta - offs;
            let delta = {
                let db = &self.evdb;
                let song = &mut self.song;
                let mp = song.metaptr.as_mut().unwrap();
                let mut delta = mp.ticskip(&song.meta, maxdelta);
                if mp.evget(db, &song.meta).is_none() {
                    mp.statelist.outdate();
                    delta = maxdelta;
                }
                delta
            };
            self.song.tic += delta;
            self.song.beat += self.song.tic / tpb;
            self.song.tic %= tpb;
            self.song.measure += self.song.beat / bpm;
            self.song.beat %= bpm;
            self.song.abspos += delta;
            pos += delta as u64 * usec24 as u64;
        }

        // process all meta events of the current tick so the next
        // tick starts with the right signature and tempo
        {
            let db = &self.evdb;
            let song = &mut self.song;
            let mp = song.metaptr.as_mut().unwrap();
            while mp.evget(db, &song.meta).is_some() {}
            song.complete = mp.eot(&song.meta);
        }

        // move all tracks to the new position
        let abspos = self.song.abspos;
        let restore_all = self.song.mode >= Mode::Play;
        let ids: Vec<u32> = self.song.trks.iter().map(|t| t.id).collect();
        for tid in ids {
            self.song_confcancel(tid, PRIO_TRACK);
            {
                let db = &self.evdb;
                let t = self.song.trks.iter_mut().find(|t| t.id == tid).unwrap();
                let mut tp = SeqPtr::new();
                tp.skip(db, &t.track, abspos);
                for st in tp.statelist.iter_mut() {
                    st.tag = 0;
                }
                if !tp.eot(&t.track) {
                    self.song.complete = false;
                }
                let t = self.song.trks.iter_mut().find(|t| t.id == tid).unwrap();
                t.trackptr = Some(tp);
            }
            self.song_confrestore(tid, restore_all, PRIO_TRACK);
        }

        {
            let song = &mut self.song;
            if song.mode >= Mode::Rec {
                song.rec.clear();
            }
            song.playptr = None;
            song.recptr = Some(SeqPtr::new());
            song.rec_input.clear();
            song.rec_replay.clear();
        }
        if self.song.mode >= Mode::Rec {
            let db = &self.evdb;
            let song = &mut self.song;
            let rp = song.recptr.as_mut().unwrap();
            rp.seek(db, &mut song.rec, abspos);
        }

        // re-establish the meta state at the new position
        let metas: Vec<Ev> = {
            let song = &mut self.song;
            let mp = song.metaptr.as_mut().unwrap();
            let mut out = Vec::new();
            for st in mp.statelist.iter_mut() {
                if st.ev.is_meta() {
                    st.tag = 1;
                    out.push(st.ev);
                } else {
                    st.tag = 0;
                }
            }
            out
        };
        for ev in metas {
            self.song_metaput(&ev, false);
        }

        if self.song.complete {
            info!("song: complete");
        }
        debug!(
            "song: relocated to {}:{}:{} ({})",
            self.song.measure, self.song.beat, self.song.tic, self.song.abspos
        );
        match how {
            Loc::Mtc => endpos - pos,
            _ => 0,
        }
    }

    /// Relocation requested by a device (MTC full frame): move to the
    /// tick just before the given position and return the time to
    /// skip.
    pub(crate) fn song_gotocb(&mut self, how: Loc, target: u32) -> u64 {
        self.song_loc(how, target, 0)
    }

    /*
     * mode ladder and transport requests
     */

    /// Change the engine mode, starting or stopping the machinery the
    /// transition crosses.
    pub fn song_setmode(&mut self, newmode: Mode) {
        let oldmode = self.song.mode;
        self.song.mode = newmode;
        if oldmode >= Mode::Play {
            self.stop_req();
        }
        if newmode < oldmode {
            self.metro_setmode(newmode);
        }
        if oldmode >= Mode::Rec && newmode < Mode::Rec {
            self.song_mergerec();
        }
        if oldmode >= Mode::Play && newmode < Mode::Play {
            self.song_loop_done();
        }
        if oldmode >= Mode::Idle && newmode < Mode::Idle {
            let ids: Vec<u32> = self.song.trks.iter().map(|t| t.id).collect();
            for tid in ids {
                self.song_confcancel(tid, PRIO_TRACK);
                if let Some(t) = self.song.trk_by_id_mut(tid) {
                    t.trackptr = None;
                }
            }
            let song = &mut self.song;
            song.playptr = None;
            song.recptr = None;
            song.metaptr = None;
            song.rec_input.clear();
            song.rec_replay.clear();
            self.norm_shut();
            self.flush();
            self.close();
        }
        if oldmode < Mode::Play && newmode >= Mode::Play {
            self.song.tap_cnt = 0;
            self.song.complete = false;
            self.song_loop_init();
        }
        if oldmode < Mode::Idle && newmode >= Mode::Idle {
            {
                let song = &mut self.song;
                song.abspos = 0;
                song.measure = 0;
                song.beat = 0;
                song.tic = 0;
                for t in song.trks.iter_mut() {
                    t.trackptr = Some(SeqPtr::new());
                }
                song.metaptr = Some(SeqPtr::new());
                song.recptr = Some(SeqPtr::new());
                song.playptr = None;
                song.rec_input.clear();
                song.rec_replay.clear();
            }
            self.open();
            let tpu = self.song.tics_per_unit;
            self.change_ticrate(tpu);
            self.song_playsysex();
            self.song_playconf();
            self.flush();
        }
        if newmode > oldmode {
            self.metro_setmode(newmode);
        }
    }

    /// Move to the given measure. While recording, one measure of
    /// count-in is inserted. With an external MTC source, only the
    /// MMC request is sent; the relocation happens when the full
    /// frame comes back.
    pub fn song_goto(&mut self, mut measure: u32) {
        if self.song.mode >= Mode::Idle {
            if self.song.mode >= Mode::Rec && measure > 0 {
                measure -= 1;
            }
            self.song.started = false;
            let offs = if self.song.mode >= Mode::Play && self.song.tap_mode == TapMode::Off {
                self.song.curquant / 2
            } else {
                0
            };
            if self.song.mode >= Mode::Play && self.devs.mtcsrc.is_some() {
                let mmcpos = self.song.mtcpos(&self.evdb, measure, offs);
                self.goto_req(mmcpos);
            } else {
                self.song_loc(Loc::Meas, measure, offs);
            }
        }
    }

    /// Stop playback/recording and undo everything started.
    pub fn song_stop(&mut self) {
        self.song_setmode(Mode::Off);
    }

    /// Start playing from the current position.
    pub fn song_play(&mut self) {
        let m = if self.song.mode >= Mode::Idle {
            self.song.measure
        } else {
            self.song.curpos
        };
        self.song_setmode(Mode::Play);
        self.song_goto(m);
        let manual = self.song.tap_mode != TapMode::Off;
        self.start_req(manual);
        self.flush();
        debug!("song: waiting for a start event");
    }

    /// Record into the current track.
    pub fn song_record(&mut self) {
        match self.song.curtrk.and_then(|id| self.song.trk_by_id(id)) {
            Some(t) if !t.mute => {}
            _ => warn!("song: no current track (or muted)"),
        }
        let m = if self.song.mode >= Mode::Idle {
            self.song.measure
        } else {
            self.song.curpos
        };
        self.song_setmode(Mode::Rec);
        self.song_goto(m);
        let manual = self.song.tap_mode != TapMode::Off;
        self.start_req(manual);
        self.flush();
        debug!("song: waiting for a start event");
    }

    /// Pass input directly to the output without moving.
    pub fn song_idle(&mut self) {
        let m = if self.song.mode >= Mode::Idle {
            self.song.measure
        } else {
            self.song.curpos
        };
        self.song_setmode(Mode::Idle);
        self.song_goto(m);
        self.flush();
        debug!("song: idling");
    }

    /*
     * mute, channel config, sysex
     */

    /// Mute a track, cancelling whatever it is sounding.
    pub fn song_trkmute(&mut self, tid: u32) {
        if self.song.mode >= Mode::Play {
            self.song_confcancel(tid, PRIO_TRACK);
        }
        if let Some(t) = self.song.trk_by_id_mut(tid) {
            t.mute = true;
        }
    }

    /// Unmute a track, restoring its frames.
    pub fn song_trkunmute(&mut self, tid: u32) {
        if self.song.mode >= Mode::Play {
            self.song_confrestore(tid, true, PRIO_TRACK);
        }
        if let Some(t) = self.song.trk_by_id_mut(tid) {
            t.mute = false;
        }
    }

    /// Play one channel-config event: outputs go through the mixer at
    /// channel priority, inputs through the normalizer as if played.
    fn song_playconfev(&mut self, cid: u32, ev: &Ev) {
        let (dev, ch, is_input) = match self.song.chan_by_id(cid) {
            Some(c) => (c.dev, c.ch, c.is_input),
            None => return,
        };
        if !ev.is_voice() {
            warn!("song: {}: not a voice event, not sent", ev);
            return;
        }
        let mut ev = *ev;
        ev.dev = dev;
        ev.ch = ch;
        if is_input {
            self.norm_evcb(&ev);
        } else {
            self.mixout_put(&ev, PRIO_CHAN);
        }
    }

    /// Send the config events of all channels.
    fn song_playconf(&mut self) {
        let confs: Vec<(u32, Vec<Ev>)> = self
            .song
            .chans
            .iter()
            .map(|c| (c.id, c.conf.events().map(|se| se.ev).collect()))
            .collect();
        for (cid, evs) in confs {
            for ev in evs {
                self.song_playconfev(cid, &ev);
            }
        }
        self.flush();
    }

    /// Send all stored sysex messages.
    fn song_playsysex(&mut self) {
        let msgs: Vec<Sysex> = self
            .song
            .sxs
            .iter()
            .flat_map(|x| x.sx.iter().cloned())
            .collect();
        for m in msgs {
            self.send_raw(m.unit, &m.data);
            self.flush();
        }
    }

    /// Add a config event to a channel and play it right away.
    pub fn song_confev(&mut self, cid: u32, ev: &Ev) {
        if let Some(c) = self.song.chan_by_id_mut(cid) {
            c.conf.confev(ev);
        }
        if self.is_open {
            self.song_playconfev(cid, ev);
            self.flush();
        }
    }

    /// Remove the config events matching the given range.
    pub fn song_unconfev(&mut self, cid: u32, spec: &crate::core::spec::EvSpec) {
        let db = &self.evdb;
        if let Some(c) = self.song.chans.iter_mut().find(|c| c.id == cid) {
            c.conf.unconfev(db, spec);
        }
    }

    /*
     * metronome
     */

    /// Called on every tick; clicks on beat boundaries.
    pub(crate) fn metro_tic(&mut self, beat: u32, tic: u32) {
        if !self.song.metro.enabled() || tic != 0 {
            return;
        }
        if self.song.metro.sounding.is_some() {
            // the previous click is still sounding: finish it now
            self.timo.del(TimoKind::MetroClickOff);
            self.metro_click_off();
        }
        let ev = if beat == 0 { self.song.metro.hi } else { self.song.metro.lo };
        self.song.metro.sounding = Some(ev);
        self.put_ev(&ev);
        self.timo.add(TimoKind::MetroClickOff, METRO_CLICKLEN);
    }

    /// Timeout: end the sounding click.
    pub(crate) fn metro_click_off(&mut self) {
        if let Some(ev) = self.song.metro.sounding.take() {
            let off = Ev::note_off(ev.dev, ev.ch, ev.v0);
            self.put_ev(&off);
        }
    }

    fn metro_shut(&mut self) {
        if self.song.metro.sounding.is_some() {
            self.timo.del(TimoKind::MetroClickOff);
            self.metro_click_off();
        }
    }

    pub fn metro_setmode(&mut self, mode: Mode) {
        let was = self.song.metro.enabled();
        self.song.metro.mode = mode;
        if was && !self.song.metro.enabled() {
            self.metro_shut();
        }
    }

    pub fn metro_setmask(&mut self, mask: u32) {
        let was = self.song.metro.enabled();
        self.song.metro.mask = mask;
        if was && !self.song.metro.enabled() {
            self.metro_shut();
        }
    }
}

fn song_trk_mute(trks: &[crate::song::SongTrk], tid: u32) -> bool {
    trks.iter().find(|t| t.id == tid).map(|t| t.mute).unwrap_or(false)
}
