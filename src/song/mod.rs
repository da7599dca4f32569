//! The song data model: named tracks, channels, filters and sysex
//! banks, the meta track carrying tempo and time signature changes,
//! the recording track, the playback position and the loop, tap and
//! undo settings. The real-time behaviour (tick callbacks, record
//! merge, relocation) lives in the engine, which owns a `Song`.

mod metro;
pub mod ptr;
pub mod track;
pub mod undo;

pub use metro::Metro;

use crate::constants::*;
use crate::core::ev::{Cmd, EvDb};
use crate::core::filt::Filt;
use crate::core::spec::EvSpec;
use crate::core::state::StateList;
use crate::error::{self, LibResult};
use ptr::SeqPtr;
use snafu::ensure;
use track::Track;
use undo::UndoEntry;

clamp!(Tempo, u32, TEMPO_MIN, TEMPO_MAX, DEFAULT_USEC24, pub);

/// Engine mode ladder; transitions to a higher mode start more
/// machinery.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Mode {
    Off = 0,
    Idle = 1,
    Play = 2,
    Rec = 3,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TapMode {
    Off,
    Start,
    Tempo,
}

/// Position units understood by the relocation request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Loc {
    /// Measure number.
    Meas,
    /// MTC position in `MTC_SEC` units.
    Mtc,
    /// Song position pointer, in 1/16 notes.
    Spp,
}

/// A whole system-exclusive message, `F0 ... F7`.
#[derive(Clone, Debug, PartialEq)]
pub struct Sysex {
    pub unit: u8,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct SongTrk {
    pub id: u32,
    pub name: String,
    pub track: Track,
    /// Default filter used when this track is selected.
    pub curfilt: Option<u32>,
    pub mute: bool,
    /// Playback cursor, present while the engine is started.
    pub trackptr: Option<SeqPtr>,
    /// Cursor snapshot at the loop start.
    pub loop_ptr: Option<SeqPtr>,
}

#[derive(Debug)]
pub struct SongChan {
    pub id: u32,
    pub name: String,
    pub dev: u8,
    pub ch: u8,
    /// Events to restore the channel state (bank, program, volume...).
    pub conf: Track,
    pub is_input: bool,
    /// Output channels own a filter routing every input to them.
    pub filt: Option<u32>,
}

#[derive(Debug)]
pub struct SongFilt {
    pub id: u32,
    pub name: String,
    pub filt: Filt,
}

#[derive(Debug)]
pub struct SongSx {
    pub id: u32,
    pub name: String,
    pub sx: Vec<Sysex>,
}

#[derive(Debug)]
pub struct Song {
    pub mode: Mode,
    pub trks: Vec<SongTrk>,
    pub chans: Vec<SongChan>,
    pub filts: Vec<SongFilt>,
    pub sxs: Vec<SongSx>,
    /// Tempo and time-signature track.
    pub meta: Track,
    /// The recording destination.
    pub rec: Track,
    /// Sysex messages received while recording.
    pub recsx: Vec<Sysex>,

    pub tics_per_unit: u32,
    /// Current signature and tempo at the playback position.
    pub tpb: u32,
    pub bpm: u32,
    pub tempo: Tempo,
    /// Fixed-point tempo scaling, 0x100 is 1.0.
    pub tempo_factor: u32,

    pub metro: Metro,

    /// Playback position.
    pub tic: u32,
    pub beat: u32,
    pub measure: u32,
    pub abspos: u32,

    pub curtrk: Option<u32>,
    pub curfilt: Option<u32>,
    pub cursx: Option<u32>,
    pub curin: Option<u32>,
    pub curout: Option<u32>,
    /// Current position/length selection, in measures.
    pub curpos: u32,
    pub curlen: u32,
    pub curquant: u32,
    pub curev: EvSpec,
    pub loop_enabled: bool,

    pub tap_mode: TapMode,
    pub tap_evspec: EvSpec,
    pub tap_cnt: i32,
    pub tap_time: u64,

    pub started: bool,
    pub complete: bool,

    /*
     * run-time state, valid while the engine is started
     */
    pub metaptr: Option<SeqPtr>,
    pub recptr: Option<SeqPtr>,
    /// Replay cursor over the recording track while loop-recording.
    pub playptr: Option<SeqPtr>,
    pub rec_input: StateList,
    pub rec_replay: StateList,
    pub loop_mstart: u32,
    pub loop_mend: u32,
    pub loop_tstart: u32,
    pub loop_tend: u32,
    pub loop_metaptr: Option<SeqPtr>,

    pub(crate) undo: Vec<UndoEntry>,
    pub undo_size: usize,
    next_id: u32,
}

impl Default for Song {
    fn default() -> Self {
        let mut meta = Track::new();
        {
            let db = EvDb::new();
            let mut mp = SeqPtr::new();
            let tpb = DEFAULT_TPU / DEFAULT_BPM;
            mp.evput(&db, &mut meta, &crate::core::ev::Ev::timesig(DEFAULT_BPM, tpb));
            mp.evput(&db, &mut meta, &crate::core::ev::Ev::tempo(tempo_to_usec24(DEFAULT_TEMPO, tpb)));
        }
        Song {
            mode: Mode::Off,
            trks: Vec::new(),
            chans: Vec::new(),
            filts: Vec::new(),
            sxs: Vec::new(),
            meta,
            rec: Track::new(),
            recsx: Vec::new(),
            tics_per_unit: DEFAULT_TPU,
            tpb: DEFAULT_TPU / DEFAULT_BPM,
            bpm: DEFAULT_BPM,
            tempo: Tempo::default(),
            tempo_factor: 0x100,
            metro: Metro::new(),
            tic: 0,
            beat: 0,
            measure: 0,
            abspos: 0,
            curtrk: None,
            curfilt: None,
            cursx: None,
            curin: None,
            curout: None,
            curpos: 0,
            curlen: 0,
            curquant: 0,
            curev: EvSpec::any(),
            loop_enabled: false,
            tap_mode: TapMode::Off,
            tap_evspec: EvSpec::empty(),
            tap_cnt: 0,
            tap_time: 0,
            started: false,
            complete: false,
            metaptr: None,
            recptr: None,
            playptr: None,
            rec_input: StateList::new(),
            rec_replay: StateList::new(),
            loop_mstart: 0,
            loop_mend: 0,
            loop_tstart: 0,
            loop_tend: 0,
            loop_metaptr: None,
            undo: Vec::new(),
            undo_size: 0,
            next_id: 0,
        }
    }
}

impl Song {
    pub fn new() -> Song {
        Song::default()
    }

    fn new_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /*
     * tracks
     */

    /// Create a track; it becomes the current one and inherits the
    /// current filter.
    pub fn trknew(&mut self, name: &str) -> crate::Result<u32> {
        Ok(self.trknew_inner(name)?)
    }

    fn trknew_inner(&mut self, name: &str) -> LibResult<u32> {
        ensure!(
            self.trklookup(name).is_none(),
            error::DuplicateName { name: name.to_string() }
        );
        let id = self.new_id();
        self.trks.push(SongTrk {
            id,
            name: name.to_string(),
            track: Track::new(),
            curfilt: self.curfilt,
            mute: false,
            trackptr: None,
            loop_ptr: None,
        });
        self.curtrk = Some(id);
        Ok(id)
    }

    pub fn trkdel(&mut self, id: u32) {
        if self.curtrk == Some(id) {
            self.curtrk = None;
        }
        self.trks.retain(|t| t.id != id);
    }

    pub fn trklookup(&self, name: &str) -> Option<u32> {
        self.trks.iter().find(|t| t.name == name).map(|t| t.id)
    }

    pub fn trk_by_id(&self, id: u32) -> Option<&SongTrk> {
        self.trks.iter().find(|t| t.id == id)
    }

    pub fn trk_by_id_mut(&mut self, id: u32) -> Option<&mut SongTrk> {
        self.trks.iter_mut().find(|t| t.id == id)
    }

    /*
     * channels
     */

    /// Create a channel. An output channel gets a filter of the same
    /// name, with a route from every input channel.
    pub fn channew(
        &mut self,
        db: &EvDb,
        name: &str,
        dev: u8,
        ch: u8,
        is_input: bool,
    ) -> crate::Result<u32> {
        Ok(self.channew_inner(db, name, dev, ch, is_input)?)
    }

    fn channew_inner(
        &mut self,
        db: &EvDb,
        name: &str,
        dev: u8,
        ch: u8,
        is_input: bool,
    ) -> LibResult<u32> {
        ensure!(
            self.chanlookup(name, is_input).is_none(),
            error::DuplicateName { name: name.to_string() }
        );
        let filt = if is_input {
            None
        } else {
            let fid = match self.filtlookup(name) {
                Some(fid) => fid,
                None => self.filtnew_inner(name)?,
            };
            let mut dst = EvSpec::any();
            dst.dev_min = dev;
            dst.dev_max = dev;
            dst.ch_min = ch;
            dst.ch_max = ch;
            let inputs: Vec<(u8, u8)> = self
                .chans
                .iter()
                .filter(|c| c.is_input)
                .map(|c| (c.dev, c.ch))
                .collect();
            let f = self.filt_by_id_mut(fid).unwrap();
            for (idev, ich) in inputs {
                let mut src = EvSpec::any();
                src.dev_min = idev;
                src.dev_max = idev;
                src.ch_min = ich;
                src.ch_max = ich;
                f.filt.map_new_inner(db, &src, &dst)?;
            }
            Some(fid)
        };
        let id = self.new_id();
        self.chans.push(SongChan {
            id,
            name: name.to_string(),
            dev,
            ch,
            conf: Track::new(),
            is_input,
            filt,
        });
        if is_input {
            self.curin = Some(id);
        } else {
            self.curout = Some(id);
            if let Some(c) = self.chans.last() {
                self.curfilt = c.filt;
            }
        }
        Ok(id)
    }

    pub fn chandel(&mut self, id: u32) {
        let filt = self.chan_by_id(id).and_then(|c| c.filt);
        if self.curin == Some(id) {
            self.curin = None;
        }
        if self.curout == Some(id) {
            self.curout = None;
        }
        self.chans.retain(|c| c.id != id);
        if let Some(fid) = filt {
            self.filtdel(fid);
        }
    }

    pub fn chanlookup(&self, name: &str, is_input: bool) -> Option<u32> {
        self.chans
            .iter()
            .find(|c| c.is_input == is_input && c.name == name)
            .map(|c| c.id)
    }

    pub fn chanlookup_bynum(&self, dev: u8, ch: u8, is_input: bool) -> Option<u32> {
        self.chans
            .iter()
            .find(|c| c.is_input == is_input && c.dev == dev && c.ch == ch)
            .map(|c| c.id)
    }

    pub fn chan_by_id(&self, id: u32) -> Option<&SongChan> {
        self.chans.iter().find(|c| c.id == id)
    }

    pub fn chan_by_id_mut(&mut self, id: u32) -> Option<&mut SongChan> {
        self.chans.iter_mut().find(|c| c.id == id)
    }

    /*
     * filters
     */

    pub fn filtnew(&mut self, name: &str) -> crate::Result<u32> {
        Ok(self.filtnew_inner(name)?)
    }

    fn filtnew_inner(&mut self, name: &str) -> LibResult<u32> {
        ensure!(
            self.filtlookup(name).is_none(),
            error::DuplicateName { name: name.to_string() }
        );
        let id = self.new_id();
        self.filts.push(SongFilt { id, name: name.to_string(), filt: Filt::new() });
        self.curfilt = Some(id);
        Ok(id)
    }

    pub fn filtdel(&mut self, id: u32) {
        if self.curfilt == Some(id) {
            self.curfilt = None;
        }
        for t in self.trks.iter_mut() {
            if t.curfilt == Some(id) {
                t.curfilt = None;
            }
        }
        if self.curout.and_then(|c| self.chan_by_id(c)).and_then(|c| c.filt) == Some(id) {
            self.curout = None;
        }
        self.filts.retain(|f| f.id != id);
    }

    pub fn filtlookup(&self, name: &str) -> Option<u32> {
        self.filts.iter().find(|f| f.name == name).map(|f| f.id)
    }

    pub fn filt_by_id(&self, id: u32) -> Option<&SongFilt> {
        self.filts.iter().find(|f| f.id == id)
    }

    pub fn filt_by_id_mut(&mut self, id: u32) -> Option<&mut SongFilt> {
        self.filts.iter_mut().find(|f| f.id == id)
    }

    /*
     * sysex banks
     */

    pub fn sxnew(&mut self, name: &str) -> crate::Result<u32> {
        Ok(self.sxnew_inner(name)?)
    }

    fn sxnew_inner(&mut self, name: &str) -> LibResult<u32> {
        ensure!(
            self.sxlookup(name).is_none(),
            error::DuplicateName { name: name.to_string() }
        );
        let id = self.new_id();
        self.sxs.push(SongSx { id, name: name.to_string(), sx: Vec::new() });
        self.cursx = Some(id);
        Ok(id)
    }

    pub fn sxdel(&mut self, id: u32) {
        if self.cursx == Some(id) {
            self.cursx = None;
        }
        self.sxs.retain(|x| x.id != id);
    }

    pub fn sxlookup(&self, name: &str) -> Option<u32> {
        self.sxs.iter().find(|x| x.name == name).map(|x| x.id)
    }

    pub fn sx_by_id_mut(&mut self, id: u32) -> Option<&mut SongSx> {
        self.sxs.iter_mut().find(|x| x.id == id)
    }

    /// Check that no track, channel config or filter still uses the
    /// given event kind; used before unregistering a sysex pattern.
    pub fn ev_in_use(&self, cmd: Cmd) -> bool {
        self.trks.iter().any(|t| t.track.evcnt(cmd) > 0)
            || self.chans.iter().any(|c| c.conf.evcnt(cmd) > 0)
            || self.filts.iter().any(|f| f.filt.evcnt(cmd) > 0)
    }

    /// Song length in measures: the length of the longest track,
    /// walked against the meta track.
    pub fn endpos(&self, db: &EvDb) -> u32 {
        let maxlen = self.trks.iter().map(|t| t.track.numtic()).max().unwrap_or(0);
        let mut mp = SeqPtr::new();
        let mut m = 0;
        let mut len = 0;
        while len < maxlen {
            while mp.evget(db, &self.meta).is_some() {}
            let (bpm, tpb) = mp.getsign();
            let tpm = bpm * tpb;
            let delta = mp.skip(db, &self.meta, tpm);
            if delta < tpm {
                // past the end of the meta track
                m += (maxlen - len + tpm - 1) / tpm;
                break;
            }
            len += tpm;
            m += 1;
        }
        m
    }

    /// Convert a measure number (minus a quantization offset in tics)
    /// to an MTC position in `MTC_SEC` units, using the tempo at each
    /// point of the meta track and rounding down to a frame boundary.
    pub fn mtcpos(&self, db: &EvDb, measure: u32, offs: u32) -> u32 {
        let mut p = SeqPtr::new();
        let mut pos: u64 = 0;
        let (mut meas, mut beat, mut tic) = (0u32, 0u32, 0u32);
        loop {
            while p.evget(db, &self.meta).is_some() {}
            let (bpm, tpb) = p.getsign();
            let usec24 = p.gettempo() as u64;
            let mut delta = (measure - meas) * bpm * tpb - beat * tpb - tic;
            if delta <= offs {
                break;
            }
            delta -= offs;
            let mut done = p.ticskip(&self.meta, delta);
            if done == 0 && !p.ev_avail(&self.meta) {
                // past the end of the meta track: the tempo holds
                done = delta;
            }
            tic += done;
            beat += tic / tpb;
            tic %= tpb;
            meas += beat / bpm;
            beat %= bpm;
            pos += done as u64 * usec24;
        }
        // round down to a frame, wrap every 24 hours
        pos -= pos % (USEC24_PER_SEC as u64 / DEFAULT_FPS as u64);
        pos %= USEC24_PER_SEC as u64 * 3600 * 24;
        (pos / (USEC24_PER_SEC as u64 / MTC_SEC as u64)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_song_has_meta() {
        let song = Song::new();
        assert_eq!(song.meta.numev(), 2);
        assert_eq!(song.tempo.get(), tempo_to_usec24(120, 24));
    }

    #[test]
    fn output_chan_gets_routed_filter(){
        let db = EvDb::new();
        let mut song = Song::new();
        song.channew(&db, "in0", 0, 0, true).unwrap();
        song.channew(&db, "out0", 1, 5, false).unwrap();
        let fid = song.filtlookup("out0").unwrap();
        assert_eq!(song.curfilt, Some(fid));
        let f = song.filt_by_id(fid).unwrap();
        let out = f.filt.apply(&db, &crate::core::ev::Ev::note_on(0, 0, 60, 100));
        assert_eq!(out, vec![crate::core::ev::Ev::note_on(1, 5, 60, 100)]);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut song = Song::new();
        song.trknew("a").unwrap();
        assert!(song.trknew("a").is_err());
    }

    #[test]
    fn endpos_counts_measures() {
        let db = EvDb::new();
        let mut song = Song::new();
        let id = song.trknew("t0").unwrap();
        {
            let t = song.trk_by_id_mut(id).unwrap();
            let mut p = SeqPtr::new();
            p.seek(&db, &mut t.track, 97);
        }
        // 97 tics at 4x24 tics per measure: 2 measures
        assert_eq!(song.endpos(&db), 2);
    }
}
