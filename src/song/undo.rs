//! Undo. Each user-visible operation pushes one labelled entry
//! (possibly preceded by unlabelled dependent entries) onto the undo
//! stack; popping restores entries until a labelled one has been
//! applied. Track entries hold diffs against the saved snapshot, and
//! the whole history is capped in memory.

use crate::constants::UNDO_MAXSIZE;
use crate::core::filt::Filt;
use crate::song::track::TrackData;
use crate::song::{Song, SongFilt, SongTrk};
use log::{info, warn};

/// Which track a track entry applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrackRef {
    Trk(u32),
    Meta,
}

#[derive(Debug)]
pub enum UndoOp {
    /// Restore a track from a diff.
    Track { target: TrackRef, data: TrackData },
    /// Restore a track name.
    TrackRename { id: u32, name: String },
    /// Re-add a deleted track.
    TrackDel { trk: Box<SongTrk> },
    /// Remove a created track.
    TrackNew { id: u32 },
    /// Restore a filter's rules.
    Filt { id: u32, data: Filt },
    /// Restore a filter name.
    FiltRename { id: u32, name: String },
    /// Re-add a deleted filter, restoring the tracks that used it.
    FiltDel { filt: Box<SongFilt>, trks: Vec<u32> },
    /// Remove a created filter.
    FiltNew { id: u32 },
}

#[derive(Debug)]
pub struct UndoEntry {
    /// Operation label; `None` for dependent entries popped together
    /// with the labelled one below them.
    pub func: Option<&'static str>,
    pub name: String,
    pub size: usize,
    pub op: UndoOp,
}

impl Song {
    pub(crate) fn undo_push(&mut self, entry: UndoEntry) {
        self.undo_size += entry.size;
        self.undo.push(entry);

        // discard the oldest entries once over the memory cap
        let mut size = 0;
        let mut keep = 0;
        for (i, u) in self.undo.iter().enumerate().rev() {
            size += u.size;
            if size > UNDO_MAXSIZE {
                keep = i + 1;
                break;
            }
        }
        if keep > 0 {
            for u in self.undo.drain(..keep) {
                self.undo_size -= u.size;
            }
        }
    }

    /// Save the current contents of a track, labelled with the
    /// operation about to modify it.
    pub fn undo_track_save(&mut self, target: TrackRef, func: &'static str, name: &str) {
        let track = match target {
            TrackRef::Meta => &self.meta,
            TrackRef::Trk(id) => match self.trk_by_id(id) {
                Some(t) => &t.track,
                None => return,
            },
        };
        let data = TrackData::save(track);
        let size = data.size();
        self.undo_push(UndoEntry {
            func: Some(func),
            name: name.to_string(),
            size,
            op: UndoOp::Track { target, data },
        });
    }

    /// Shrink the entry pushed by `undo_track_save` to a diff, now
    /// that the operation is done.
    pub fn undo_track_diff(&mut self) {
        let entry = match self.undo.last_mut() {
            Some(e) => e,
            None => {
                warn!("undo: no data to diff");
                return;
            }
        };
        let (target, data) = match &mut entry.op {
            UndoOp::Track { target, data } => (*target, data),
            _ => {
                warn!("undo: top entry is not a track");
                return;
            }
        };
        let track = match target {
            TrackRef::Meta => &self.meta,
            TrackRef::Trk(id) => match self.trks.iter().find(|t| t.id == id) {
                Some(t) => &t.track,
                None => return,
            },
        };
        data.diff_against(track);
        let size = data.size();
        self.undo_size = self.undo_size + size - entry.size;
        entry.size = size;
    }

    /// Rename a track, undoably.
    pub fn undo_trk_rename(&mut self, id: u32, new_name: &str, func: &'static str) {
        let old = match self.trks.iter_mut().find(|t| t.id == id) {
            Some(t) => std::mem::replace(&mut t.name, new_name.to_string()),
            None => return,
        };
        self.undo_push(UndoEntry {
            func: Some(func),
            name: old.clone(),
            size: old.len(),
            op: UndoOp::TrackRename { id, name: old },
        });
    }

    /// Delete a track, undoably.
    pub fn undo_trk_del(&mut self, id: u32, func: &'static str) {
        let pos = match self.trks.iter().position(|t| t.id == id) {
            Some(pos) => pos,
            None => return,
        };
        if self.curtrk == Some(id) {
            self.curtrk = None;
        }
        let trk = self.trks.remove(pos);
        let size = trk.track.numev() * std::mem::size_of::<crate::song::track::SeqEv>();
        self.undo_push(UndoEntry {
            func: Some(func),
            name: trk.name.clone(),
            size,
            op: UndoOp::TrackDel { trk: Box::new(trk) },
        });
    }

    /// Create a track, undoably.
    pub fn undo_trk_new(&mut self, name: &str, func: &'static str) -> crate::Result<u32> {
        let id = self.trknew(name)?;
        self.undo_push(UndoEntry {
            func: Some(func),
            name: name.to_string(),
            size: 0,
            op: UndoOp::TrackNew { id },
        });
        Ok(id)
    }

    /// Rename a filter, undoably.
    pub fn undo_filt_rename(&mut self, id: u32, new_name: &str, func: &'static str) {
        let old = match self.filts.iter_mut().find(|f| f.id == id) {
            Some(f) => std::mem::replace(&mut f.name, new_name.to_string()),
            None => return,
        };
        self.undo_push(UndoEntry {
            func: Some(func),
            name: old.clone(),
            size: old.len(),
            op: UndoOp::FiltRename { id, name: old },
        });
    }

    /// Delete a filter, undoably; the tracks using it are remembered
    /// and re-pointed at it on undo.
    pub fn undo_filt_del(&mut self, id: u32, func: &'static str) {
        let pos = match self.filts.iter().position(|f| f.id == id) {
            Some(pos) => pos,
            None => return,
        };
        let mut trks = Vec::new();
        for t in self.trks.iter_mut() {
            if t.curfilt == Some(id) {
                t.curfilt = None;
                trks.push(t.id);
            }
        }
        if self.curfilt == Some(id) {
            self.curfilt = None;
        }
        let filt = self.filts.remove(pos);
        let size = filt.filt.size();
        self.undo_push(UndoEntry {
            func: Some(func),
            name: filt.name.clone(),
            size,
            op: UndoOp::FiltDel { filt: Box::new(filt), trks },
        });
    }

    /// Create a filter, undoably.
    pub fn undo_filt_new(&mut self, name: &str, func: &'static str) -> crate::Result<u32> {
        let id = self.filtnew(name)?;
        self.undo_push(UndoEntry {
            func: Some(func),
            name: name.to_string(),
            size: 0,
            op: UndoOp::FiltNew { id },
        });
        Ok(id)
    }

    /// Save a filter's rules before modifying them.
    pub fn undo_filt_save(&mut self, id: u32, func: &'static str, name: &str) {
        let filt = match self.filt_by_id(id) {
            Some(f) => f.filt.clone(),
            None => return,
        };
        let size = filt.size();
        self.undo_push(UndoEntry {
            func: Some(func),
            name: name.to_string(),
            size,
            op: UndoOp::Filt { id, data: filt },
        });
    }

    /// Undo one user operation; entries are applied until a labelled
    /// one was restored.
    pub fn undo_pop(&mut self) {
        while let Some(u) = self.undo.pop() {
            self.undo_size -= u.size;
            let done = u.func.is_some();
            if let Some(func) = u.func {
                info!("undo: {} {}", func, u.name);
            }
            match u.op {
                UndoOp::Track { target, data } => {
                    let track = match target {
                        TrackRef::Meta => Some(&mut self.meta),
                        TrackRef::Trk(id) => {
                            self.trks.iter_mut().find(|t| t.id == id).map(|t| &mut t.track)
                        }
                    };
                    match track {
                        Some(t) => data.restore(t),
                        None => warn!("undo: target track is gone"),
                    }
                }
                UndoOp::TrackRename { id, name } => {
                    if let Some(t) = self.trks.iter_mut().find(|t| t.id == id) {
                        t.name = name;
                    }
                }
                UndoOp::TrackDel { trk } => {
                    let id = trk.id;
                    self.trks.push(*trk);
                    if self.curtrk.is_none() {
                        self.curtrk = Some(id);
                    }
                }
                UndoOp::TrackNew { id } => {
                    if self.curtrk == Some(id) {
                        self.curtrk = None;
                    }
                    self.trks.retain(|t| t.id != id);
                }
                UndoOp::Filt { id, data } => {
                    if let Some(f) = self.filts.iter_mut().find(|f| f.id == id) {
                        f.filt = data;
                    }
                }
                UndoOp::FiltRename { id, name } => {
                    if let Some(f) = self.filts.iter_mut().find(|f| f.id == id) {
                        f.name = name;
                    }
                }
                UndoOp::FiltDel { filt, trks } => {
                    let id = filt.id;
                    self.filts.push(*filt);
                    for tid in trks {
                        if let Some(t) = self.trks.iter_mut().find(|t| t.id == tid) {
                            t.curfilt = Some(id);
                        }
                    }
                    if self.curfilt.is_none() {
                        self.curfilt = Some(id);
                    }
                }
                UndoOp::FiltNew { id } => {
                    if self.curfilt == Some(id) {
                        self.curfilt = None;
                    }
                    self.filts.retain(|f| f.id != id);
                }
            }
            if done {
                break;
            }
        }
    }

    pub fn undo_clear(&mut self) {
        self.undo.clear();
        self.undo_size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ev::{Ev, EvDb};
    use crate::song::ptr::SeqPtr;

    #[test]
    fn record_undo_restores_track() {
        let db = EvDb::new();
        let mut song = Song::new();
        let id = song.trknew("t0").unwrap();
        song.undo_track_save(TrackRef::Trk(id), "record", "t0");
        {
            let t = song.trk_by_id_mut(id).unwrap();
            let mut p = SeqPtr::new();
            p.evput(&db, &mut t.track, &Ev::note_on(0, 0, 60, 100));
            p.seek(&db, &mut t.track, 24);
            p.evput(&db, &mut t.track, &Ev::note_off(0, 0, 60));
        }
        song.undo_track_diff();
        assert_eq!(song.trk_by_id(id).unwrap().track.numev(), 2);
        song.undo_pop();
        assert!(song.trk_by_id(id).unwrap().track.is_empty());
        // nothing left to undo
        song.undo_pop();
    }

    #[test]
    fn rename_and_delete_round_trip() {
        let mut song = Song::new();
        let id = song.undo_trk_new("t0", "tnew").unwrap();
        song.undo_trk_rename(id, "lead", "tren");
        assert_eq!(song.trklookup("lead"), Some(id));
        song.undo_trk_del(id, "tdel");
        assert!(song.trklookup("lead").is_none());
        song.undo_pop(); // undo the delete
        assert_eq!(song.trklookup("lead"), Some(id));
        song.undo_pop(); // undo the rename
        assert_eq!(song.trklookup("t0"), Some(id));
        song.undo_pop(); // undo the creation
        assert!(song.trklookup("t0").is_none());

        let fid = song.undo_filt_new("f0", "fnew").unwrap();
        song.undo_filt_rename(fid, "keys", "fren");
        song.undo_filt_del(fid, "fdel");
        assert!(song.filtlookup("keys").is_none());
        song.undo_pop();
        assert_eq!(song.filtlookup("keys"), Some(fid));
    }

    #[test]
    fn history_is_capped() {
        let mut song = Song::new();
        let id = song.trknew("t0").unwrap();
        {
            let t = song.trk_by_id_mut(id).unwrap();
            let db = EvDb::new();
            let mut p = SeqPtr::new();
            for n in 0..2000u32 {
                p.evput(&db, &mut t.track, &Ev::note_on(0, 0, n % 128, 100));
                p.evput(&db, &mut t.track, &Ev::note_off(0, 0, n % 128));
            }
        }
        for _ in 0..50 {
            song.undo_track_save(TrackRef::Trk(id), "fill", "t0");
        }
        assert!(song.undo_size <= UNDO_MAXSIZE + 4000 * std::mem::size_of::<crate::song::track::SeqEv>());
        assert!(song.undo.len() < 50);
    }
}
