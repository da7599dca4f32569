//! A simple MIDI filter. Rewrites input events according to a set of
//! user-configurable rules: a source range -> destination ranges map,
//! plus per-range velocity curves and transpositions applied to notes.
//!
//! Sources are kept ordered by narrowness and the first matching one
//! wins, so for any two coresident sources either one contains the
//! other or they are disjoint; inserting a rule removes anything that
//! would break this.

use crate::core::ev::{Cmd, Ev, EvDb};
use crate::core::spec::EvSpec;
use crate::error::LibResult;
use log::{debug, warn};

#[derive(Clone, Debug)]
struct Node<T> {
    es: EvSpec,
    data: T,
}

/// Find or create the node for `from` such that it comes after the
/// narrower ranges and before the broader ones. Conflicting nodes
/// (intersecting, neither containing the other) are removed first.
fn mksrc<T: Default>(nodes: &mut Vec<Node<T>>, db: &EvDb, from: &EvSpec) -> usize {
    nodes.retain(|s| {
        let conflict = s.es.isec(db, from) && !from.in_spec(db, &s.es);
        if conflict {
            debug!("filt: {}: source removed (intersects)", s.es);
        }
        !conflict
    });
    let mut pos = nodes.len();
    for (i, s) in nodes.iter().enumerate() {
        if from.eq(db, &s.es) {
            return i;
        }
        if from.in_spec(db, &s.es) {
            pos = i;
            break;
        }
    }
    nodes.insert(pos, Node { es: *from, data: T::default() });
    pos
}

/// Velocity adjusted by a curve with the given weight; the weight is
/// in 1..127, 64 is neutral.
fn vcurve(nweight: u32, x: u32) -> u32 {
    if x == 0 {
        return 0;
    }
    let nweight = nweight - 1;
    if x <= nweight {
        if nweight == 0 {
            127
        } else {
            1 + (126 - nweight) * (x - 1) / nweight
        }
    } else if nweight == 126 {
        1
    } else {
        127 - nweight * (127 - x) / (126 - nweight)
    }
}

/// The rule set of one input.
#[derive(Clone, Debug, Default)]
pub struct Filt {
    map: Vec<Node<Vec<EvSpec>>>,
    vcurve: Vec<Node<u32>>,
    transp: Vec<Node<u32>>,
}

impl Filt {
    pub fn new() -> Filt {
        Filt::default()
    }

    /// Remove all rules.
    pub fn reset(&mut self) {
        self.map.clear();
        self.vcurve.clear();
        self.transp.clear();
    }

    /// Add a rule mapping events in the `from` range to events in the
    /// `to` range. An `EMPTY` destination drops the source. The pair
    /// must be a structurally valid mapping, else the rule is
    /// rejected.
    pub fn map_new(&mut self, db: &EvDb, from: &EvSpec, to: &EvSpec) -> crate::Result<()> {
        Ok(self.map_new_inner(db, from, to)?)
    }

    pub(crate) fn map_new_inner(&mut self, db: &EvDb, from: &EvSpec, to: &EvSpec) -> LibResult<()> {
        if !to.is_empty() {
            db.is_map_inner(from, to)?;
        }
        let s = mksrc(&mut self.map, db, from);
        let dsts = &mut self.map[s].data;
        let mut i = 0;
        let mut found = false;
        while i < dsts.len() {
            if dsts[i].eq(db, to) {
                found = true;
                i += 1;
                continue;
            }
            if dsts[i].isec(db, to) || to.is_empty() || dsts[i].is_empty() {
                debug!("filt: {} > {}: destination removed", from, dsts[i]);
                dsts.remove(i);
                continue;
            }
            i += 1;
        }
        if !found {
            dsts.push(*to);
        }
        Ok(())
    }

    /// Remove all rules included in the `from` -> `to` pair.
    pub fn map_del(&mut self, db: &EvDb, from: &EvSpec, to: &EvSpec) {
        for s in self.map.iter_mut() {
            if s.es.in_spec(db, from) {
                let es = s.es;
                s.data.retain(|d| {
                    let rm = d.in_spec(db, to);
                    if rm {
                        debug!("filt: {} > {}: rule removed", es, d);
                    }
                    !rm
                });
            }
        }
        self.map.retain(|s| !s.data.is_empty());
    }

    /// Match the event against the sources, in order; the first
    /// matching source generates one output event per destination,
    /// then note events go through the velocity curve and the
    /// transposition.
    pub fn apply(&self, db: &EvDb, ev: &Ev) -> Vec<Ev> {
        let mut out = Vec::new();
        for s in self.map.iter() {
            if !s.es.matches(db, ev) {
                continue;
            }
            for d in s.data.iter() {
                if d.is_empty() {
                    continue;
                }
                out.push(db.map_ev(ev, &s.es, d));
            }
            break;
        }
        if !ev.is_note() {
            return out;
        }
        for mapped in out.iter_mut() {
            for d in self.vcurve.iter() {
                if d.es.matches(db, mapped) {
                    mapped.v1 = vcurve(d.data, mapped.v1);
                    break;
                }
            }
            for d in self.transp.iter() {
                if d.es.matches(db, mapped) {
                    mapped.v0 = (mapped.v0 + d.data) & 0x7f;
                    break;
                }
            }
        }
        out
    }

    /// Set a transposition (semitones, may be negative) for notes in
    /// the given range; the range must cover all note numbers.
    pub fn transp(&mut self, db: &EvDb, from: &EvSpec, plus: i32) {
        if from.cmd != Cmd::Any && from.cmd != Cmd::NoteOn {
            warn!("filt: transpose set must contain notes");
            return;
        }
        if from.cmd == Cmd::NoteOn && (from.v0_min != 0 || from.v0_max != 0x7f) {
            warn!("filt: transpose note range must be full");
            return;
        }
        let s = mksrc(&mut self.transp, db, from);
        self.transp[s].data = (plus as u32) & 0x7f;
    }

    /// Set a velocity curve weight (-63..63, 0 is neutral) for notes
    /// in the given range.
    pub fn vcurve(&mut self, db: &EvDb, from: &EvSpec, weight: i32) {
        if from.cmd != Cmd::Any && from.cmd != Cmd::NoteOn {
            warn!("filt: velocity curve set must contain notes");
            return;
        }
        let s = mksrc(&mut self.vcurve, db, from);
        self.vcurve[s].data = ((64 - weight) as u32) & 0x7f;
    }

    /// Rewrite the source side of all rules: ranges included in `from`
    /// are mapped onto `to` (and the other way around if `swap` is
    /// set).
    pub fn chgin(&mut self, db: &EvDb, from: &EvSpec, to: &EvSpec, swap: bool) {
        let old = std::mem::take(&mut self.map);
        for s in old.into_iter().rev() {
            let newspec = if s.es.in_spec(db, from) {
                db.map_spec(&s.es, from, to)
            } else if swap && s.es.in_spec(db, to) {
                db.map_spec(&s.es, to, from)
            } else {
                s.es
            };
            debug!("filt: source {} -> {}", s.es, newspec);
            for d in s.data.iter() {
                if let Err(e) = self.map_new_inner(db, &newspec, d) {
                    warn!("filt: {} > {}: dropped: {}", newspec, d, e);
                }
            }
        }
    }

    /// Rewrite the destination side of all rules, as `chgin` does for
    /// sources.
    pub fn chgout(&mut self, db: &EvDb, from: &EvSpec, to: &EvSpec, swap: bool) {
        let old = std::mem::take(&mut self.map);
        for s in old.into_iter().rev() {
            for d in s.data.iter() {
                let newspec = if d.in_spec(db, from) {
                    db.map_spec(d, from, to)
                } else if swap && d.in_spec(db, to) {
                    db.map_spec(d, to, from)
                } else {
                    *d
                };
                debug!("filt: destination {} -> {}", d, newspec);
                if let Err(e) = self.map_new_inner(db, &s.es, &newspec) {
                    warn!("filt: {} > {}: dropped: {}", s.es, newspec, e);
                }
            }
        }
    }

    /// Number of rules involving the given event kind, used to check
    /// whether a pattern slot is still referenced.
    pub fn evcnt(&self, cmd: Cmd) -> u32 {
        let mut cnt = 0;
        for s in self.map.iter() {
            if s.es.cmd == cmd {
                cnt += 1;
            }
            cnt += s.data.iter().filter(|d| d.cmd == cmd).count() as u32;
        }
        cnt
    }

    /// Rough memory footprint, used for undo accounting.
    pub fn size(&self) -> usize {
        let node = std::mem::size_of::<Node<Vec<EvSpec>>>();
        let spec = std::mem::size_of::<EvSpec>();
        self.map.iter().map(|s| node + s.data.len() * spec).sum::<usize>()
            + (self.vcurve.len() + self.transp.len()) * std::mem::size_of::<Node<u32>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chan(dev: u8, ch: u8) -> EvSpec {
        let mut s = EvSpec::any();
        s.dev_min = dev;
        s.dev_max = dev;
        s.ch_min = ch;
        s.ch_max = ch;
        s
    }

    #[test]
    fn first_match_wins_and_empty_drops() {
        let db = EvDb::new();
        let mut f = Filt::new();
        // route channel 0 to channel 1, but drop its notes
        f.map_new(&db, &chan(0, 0), &chan(0, 1)).unwrap();
        let mut notes = EvSpec::note();
        notes.dev_max = 0;
        notes.ch_max = 0;
        f.map_new(&db, &notes, &EvSpec::empty()).unwrap();
        assert!(f.apply(&db, &Ev::note_on(0, 0, 60, 100)).is_empty());
        assert_eq!(
            f.apply(&db, &Ev::ctl(0, 0, 7, 100)),
            vec![Ev::ctl(0, 1, 7, 100)]
        );
    }

    #[test]
    fn conflicting_source_is_replaced() {
        let db = EvDb::new();
        let mut f = Filt::new();
        let mut a = EvSpec::note();
        a.dev_max = 0;
        a.ch_min = 0;
        a.ch_max = 3;
        let mut b = a;
        b.ch_min = 2;
        b.ch_max = 5;
        f.map_new(&db, &a, &a).unwrap();
        // b intersects a without inclusion: a must go away
        f.map_new(&db, &b, &b).unwrap();
        assert!(f.apply(&db, &Ev::note_on(0, 0, 60, 100)).is_empty());
        assert_eq!(
            f.apply(&db, &Ev::note_on(0, 2, 60, 100)),
            vec![Ev::note_on(0, 2, 60, 100)]
        );
    }

    #[test]
    fn transpose_wraps() {
        let db = EvDb::new();
        let mut f = Filt::new();
        f.map_new(&db, &EvSpec::any(), &EvSpec::any()).unwrap();
        f.transp(&db, &EvSpec::note(), -2);
        let out = f.apply(&db, &Ev::note_on(0, 0, 1, 100));
        assert_eq!(out[0].v0, (1u32.wrapping_sub(2)) & 0x7f);
        assert_eq!(out[0].v0, 127);
    }

    #[test]
    fn vcurve_boundaries() {
        // zero velocity is never changed, the curve stays in 1..127
        assert_eq!(vcurve(64, 0), 0);
        assert_eq!(vcurve(1, 1), 127);
        assert_eq!(vcurve(127, 126), 1);
        assert_eq!(vcurve(64, 64), 64);
        for w in 1..=127 {
            for x in 1..=127 {
                let y = vcurve(w, x);
                assert!((1..=127).contains(&y), "vcurve({}, {}) = {}", w, x, y);
            }
        }
    }

    #[test]
    fn chgin_rewrites_sources() {
        let db = EvDb::new();
        let mut f = Filt::new();
        f.map_new(&db, &chan(0, 0), &chan(1, 0)).unwrap();
        f.chgin(&db, &chan(0, 0), &chan(0, 5), false);
        assert!(f.apply(&db, &Ev::note_on(0, 0, 60, 100)).is_empty());
        assert_eq!(
            f.apply(&db, &Ev::note_on(0, 5, 60, 100)),
            vec![Ev::note_on(1, 0, 60, 100)]
        );
    }
}
