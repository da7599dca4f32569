//! Tracks. A track is a sequence of events with delta-time offsets:
//! each clock tick marks the beginning of a delta and each event plays
//! after its delta of ticks. A track may end with blank space after
//! the last event, kept in `eot_delta`, so a track has a length in
//! ticks independent of its events.

use crate::core::ev::{ev_match, Cmd, Ev, EvDb};
use crate::core::spec::EvSpec;
use log::warn;

/// One event plus the number of tics before it is played.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SeqEv {
    pub delta: u32,
    pub ev: Ev,
}

#[derive(Clone, Debug, Default)]
pub struct Track {
    pub(crate) evs: Vec<SeqEv>,
    /// Trailing blank space, in tics.
    pub(crate) eot_delta: u32,
}

impl Track {
    pub fn new() -> Track {
        Track::default()
    }

    /// True if the track has no events and no blank space.
    pub fn is_empty(&self) -> bool {
        self.evs.is_empty() && self.eot_delta == 0
    }

    /// Remove all events and blank space.
    pub fn clear(&mut self) {
        self.evs.clear();
        self.eot_delta = 0;
    }

    /// Exchange the contents of two tracks.
    pub fn swap(&mut self, other: &mut Track) {
        std::mem::swap(self, other);
    }

    /// Remove the trailing blank space.
    pub fn chomp(&mut self) {
        self.eot_delta = 0;
    }

    /// Shift the origin forward.
    pub fn shift(&mut self, ntics: u32) {
        match self.evs.first_mut() {
            Some(se) => se.delta += ntics,
            None => self.eot_delta += ntics,
        }
    }

    /// Number of events.
    pub fn numev(&self) -> usize {
        self.evs.len()
    }

    /// Length in tics, blank space included.
    pub fn numtic(&self) -> u32 {
        self.evs.iter().map(|se| se.delta).sum::<u32>() + self.eot_delta
    }

    pub fn events(&self) -> impl Iterator<Item = &SeqEv> {
        self.evs.iter()
    }

    /// Move all voice events to the given (dev, ch) pair.
    pub fn set_chan(&mut self, dev: u8, ch: u8) {
        for se in self.evs.iter_mut() {
            if se.ev.is_voice() {
                se.ev.dev = dev;
                se.ev.ch = ch;
            }
        }
    }

    /// Fill a map of used (dev, ch) pairs.
    pub fn chanmap(&self, map: &mut [bool]) {
        for e in map.iter_mut() {
            *e = false;
        }
        for se in self.evs.iter() {
            if se.ev.is_voice() {
                let (dev, ch) = (se.ev.dev as usize, se.ev.ch as usize);
                if dev >= crate::constants::MAX_DEVS || ch >= 16 {
                    warn!("track: bogus dev/ch pair, stopping");
                    break;
                }
                map[dev * 16 + ch] = true;
            }
        }
    }

    /// Number of events of the given kind.
    pub fn evcnt(&self, cmd: Cmd) -> u32 {
        self.evs.iter().filter(|se| se.ev.cmd == cmd).count() as u32
    }

    /// Record a config event: the last event of each frame class is
    /// enough, so an existing matching event is replaced in place,
    /// otherwise the event is added at the beginning of the track.
    pub fn confev(&mut self, ev: &Ev) {
        if !ev.is_voice() {
            warn!("track: {}: not a voice event, not configured", ev);
            return;
        }
        for se in self.evs.iter_mut() {
            if ev_match(&se.ev, ev) {
                se.ev = *ev;
                return;
            }
        }
        self.evs.insert(0, SeqEv { delta: 0, ev: *ev });
    }

    /// Remove config events matching the given range.
    pub fn unconfev(&mut self, db: &EvDb, spec: &EvSpec) {
        self.evs.retain(|se| !spec.matches(db, &se.ev));
    }
}

/// Snapshot of a track used by the undo machinery; shrunk to a diff by
/// `TrackData::diff_against`.
#[derive(Clone, Debug)]
pub struct TrackData {
    /// Index of the first differing event.
    pub pos: usize,
    /// Events to reinsert at `pos` (removed by the change).
    pub evs: Vec<SeqEv>,
    /// Saved trailing blank, restored with the events.
    pub eot_delta: u32,
    /// Number of events the change inserted at `pos`.
    pub nins: usize,
}

impl TrackData {
    /// Full snapshot: restoring it replaces the whole track.
    pub fn save(track: &Track) -> TrackData {
        TrackData {
            pos: 0,
            evs: track.evs.clone(),
            eot_delta: track.eot_delta,
            nins: track.evs.len(),
        }
    }

    /// Memory used, for the undo size cap.
    pub fn size(&self) -> usize {
        self.evs.len() * std::mem::size_of::<SeqEv>()
    }

    /// Shrink a full snapshot into a diff against the track's current
    /// contents, using the longest common prefix and suffix.
    pub fn diff_against(&mut self, track: &Track) {
        let old = &self.evs;
        let new = &track.evs;
        let mut start = 0;
        while start < old.len() && start < new.len() && old[start] == new[start] {
            start += 1;
        }
        let mut end1 = old.len();
        let mut end2 = new.len();
        while end1 > start && end2 > start && old[end1 - 1] == new[end2 - 1] {
            end1 -= 1;
            end2 -= 1;
        }
        self.evs = old[start..end1].to_vec();
        self.pos = start;
        self.nins = end2 - start;
    }

    /// Undo the change this diff describes.
    pub fn restore(self, track: &mut Track) {
        let start = self.pos.min(track.evs.len());
        let end = (start + self.nins).min(track.evs.len());
        track.evs.splice(start..end, self.evs);
        track.eot_delta = self.eot_delta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(n: u32) -> Ev {
        Ev::note_on(0, 0, n, 100)
    }

    fn track_of(deltas: &[(u32, u32)]) -> Track {
        let mut t = Track::new();
        for &(delta, n) in deltas {
            t.evs.push(SeqEv { delta, ev: ev(n) });
        }
        t
    }

    #[test]
    fn length_includes_blank() {
        let mut t = track_of(&[(0, 60), (10, 61)]);
        t.eot_delta = 5;
        assert_eq!(t.numtic(), 15);
        assert_eq!(t.numev(), 2);
        t.chomp();
        assert_eq!(t.numtic(), 10);
        t.shift(3);
        assert_eq!(t.numtic(), 13);
    }

    #[test]
    fn confev_replaces_matching() {
        let mut t = Track::new();
        t.confev(&Ev::xctl(0, 0, 7, 100));
        t.confev(&Ev::xctl(0, 0, 1, 10));
        t.confev(&Ev::xctl(0, 0, 7, 50));
        assert_eq!(t.numev(), 2);
        assert!(t.evs.iter().any(|se| se.ev == Ev::xctl(0, 0, 7, 50)));
    }

    #[test]
    fn diff_and_restore() {
        let orig = track_of(&[(0, 60), (4, 61), (4, 62), (4, 63)]);
        let mut data = TrackData::save(&orig);
        let mut modified = orig.clone();
        // replace the middle event and append one
        modified.evs[2] = SeqEv { delta: 4, ev: ev(70) };
        modified.evs.push(SeqEv { delta: 1, ev: ev(71) });
        data.diff_against(&modified);
        assert_eq!(data.pos, 2);
        assert_eq!(data.evs.len(), 2);
        assert_eq!(data.nins, 3);
        data.restore(&mut modified);
        assert_eq!(modified.evs, orig.evs);
    }
}
