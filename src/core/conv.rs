//! Conversions between plain MIDI events (CTL, PC) and the
//! context-free kinds (XCTL, XPC, NRPN, RPN).
//!
//! Standard MIDI messages aren't context free: the meaning of a "data
//! entry" controller depends on the last NRPN/RPN address, a program
//! change depends on the last bank select pair, and fine controller
//! values depend on the coarse half. Dealing with such contexts would
//! complicate every consumer (filters, tracks), so each stream
//! direction keeps the pending halves in a [`StateList`] and exchanges
//! only self-contained events with the rest of the system.

use crate::constants::*;
use crate::core::ev::{Cmd, Ev, EV_UNDEF};
use crate::core::state::{State, StateList};
use bitflags::bitflags;

bitflags! {
    /// Which collapses this stream direction performs.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
    pub struct ConvFlags: u8 {
        const XPC = 1;
        const NRPN = 2;
        const RPN = 4;
    }
}

impl Default for ConvFlags {
    fn default() -> Self {
        ConvFlags::all()
    }
}

/// True if the given (7-bit) controller number is the coarse half of a
/// 14-bit pair on this stream. `xctlset` is a 32-bit map kept
/// per-device.
pub fn is_fine(xctlset: u32, num: u32) -> bool {
    num < 32 && xctlset & (1 << num) != 0
}

fn chan_match(e1: &Ev, e2: &Ev) -> bool {
    e1.ch == e2.ch && e1.dev == e2.dev
}

/// Record the value of a controller, creating the state if needed.
fn set_ctl(slist: &mut StateList, ev: &Ev) {
    for st in slist.iter_mut() {
        if st.ev.v0 == ev.v0 && chan_match(&st.ev, ev) {
            st.ev.v1 = ev.v1;
            return;
        }
    }
    slist.push(State::from_ev(*ev));
}

/// The recorded value of controller `num` on the same channel as `ev`,
/// or `EV_UNDEF`.
fn get_ctl(slist: &StateList, ev: &Ev, num: u32) -> u32 {
    for st in slist.iter() {
        if st.ev.v0 == num && chan_match(&st.ev, ev) {
            return st.ev.v1;
        }
    }
    EV_UNDEF
}

/// Forget the recorded value of controller `num` on the same channel
/// as `ev`.
fn rm_ctl(slist: &mut StateList, ev: &Ev, num: u32) {
    let mut i = slist.len();
    while i > 0 {
        i -= 1;
        let st = slist.get(i);
        if st.ev.v0 == num && chan_match(&st.ev, ev) {
            slist.remove(i);
            return;
        }
    }
}

/// The 14-bit value of a (high, low) controller pair, or `EV_UNDEF` if
/// either half is missing.
fn get_pair(slist: &StateList, ev: &Ev, hi: u32, lo: u32) -> u32 {
    let vlo = get_ctl(slist, ev, lo);
    if vlo == EV_UNDEF {
        return EV_UNDEF;
    }
    let vhi = get_ctl(slist, ev, hi);
    if vhi == EV_UNDEF {
        return EV_UNDEF;
    }
    vlo + (vhi << 7)
}

/// Convert an old-style event (CTL, PC) into a context-free one.
/// Returns `None` while a multi-message sequence is incomplete; the
/// message completing it yields the collapsed event.
pub fn pack_ev(slist: &mut StateList, xctlset: u32, flags: ConvFlags, ev: &Ev) -> Option<Ev> {
    if ev.cmd == Cmd::Pc {
        let bank = if flags.contains(ConvFlags::XPC) {
            get_pair(slist, ev, BANK_HI, BANK_LO)
        } else {
            0
        };
        return Some(Ev::xpc(ev.dev, ev.ch, bank, ev.v0));
    }
    if ev.cmd != Cmd::Ctl {
        return Some(*ev);
    }
    match ev.v0 {
        BANK_HI if flags.contains(ConvFlags::XPC) => {
            rm_ctl(slist, ev, BANK_LO);
            set_ctl(slist, ev);
            None
        }
        RPN_HI if flags.contains(ConvFlags::RPN) => {
            rm_ctl(slist, ev, NRPN_LO);
            rm_ctl(slist, ev, RPN_LO);
            set_ctl(slist, ev);
            None
        }
        NRPN_HI if flags.contains(ConvFlags::NRPN) => {
            rm_ctl(slist, ev, RPN_LO);
            rm_ctl(slist, ev, NRPN_LO);
            set_ctl(slist, ev);
            None
        }
        DATAENT_HI if flags.intersects(ConvFlags::RPN | ConvFlags::NRPN) => {
            rm_ctl(slist, ev, DATAENT_LO);
            set_ctl(slist, ev);
            None
        }
        BANK_LO if flags.contains(ConvFlags::XPC) => {
            set_ctl(slist, ev);
            None
        }
        NRPN_LO if flags.contains(ConvFlags::NRPN) => {
            rm_ctl(slist, ev, RPN_LO);
            set_ctl(slist, ev);
            None
        }
        RPN_LO if flags.contains(ConvFlags::RPN) => {
            rm_ctl(slist, ev, NRPN_LO);
            set_ctl(slist, ev);
            None
        }
        DATAENT_LO if flags.intersects(ConvFlags::RPN | ConvFlags::NRPN) => {
            let (cmd, num) = {
                let num = get_pair(slist, ev, NRPN_HI, NRPN_LO);
                if num != EV_UNDEF {
                    (Cmd::Nrpn, num)
                } else {
                    let num = get_pair(slist, ev, RPN_HI, RPN_LO);
                    if num == EV_UNDEF {
                        return None;
                    }
                    (Cmd::Rpn, num)
                }
            };
            let hi = get_ctl(slist, ev, DATAENT_HI);
            if hi == EV_UNDEF {
                return None;
            }
            Some(Ev::new(cmd, ev.dev, ev.ch, num, ev.v1 + (hi << 7)))
        }
        num if num < 32 && is_fine(xctlset, num) => {
            // coarse half of a 14-bit pair: hold it back until the
            // fine half arrives
            set_ctl(slist, ev);
            None
        }
        num if (32..64).contains(&num) && is_fine(xctlset, num - 32) => {
            let hi = get_ctl(slist, ev, num - 32);
            if hi == EV_UNDEF {
                return None;
            }
            Some(Ev::xctl(ev.dev, ev.ch, num - 32, ev.v1 + (hi << 7)))
        }
        num => Some(Ev::xctl(ev.dev, ev.ch, num, ev.v1 << 7)),
    }
}

/// Convert a context-free event into the (up to 4) old-style events
/// that encode it, reusing the recorded context to skip redundant
/// messages: the coarse half only if it changed, the bank pair only if
/// the bank changed, the NRPN/RPN address only if the address changed.
pub fn unpack_ev(slist: &mut StateList, xctlset: u32, flags: ConvFlags, ev: &Ev) -> Vec<Ev> {
    let mut out = Vec::with_capacity(4);
    match ev.cmd {
        Cmd::Xctl => {
            // reserved controller numbers are handled by the
            // collapsed kinds when the conversion is enabled
            let reserved = match ev.v0 {
                BANK_HI | BANK_LO => flags.contains(ConvFlags::XPC),
                NRPN_HI | NRPN_LO => flags.contains(ConvFlags::NRPN),
                RPN_HI | RPN_LO => flags.contains(ConvFlags::RPN),
                DATAENT_HI | DATAENT_LO => {
                    flags.intersects(ConvFlags::NRPN | ConvFlags::RPN)
                }
                _ => false,
            };
            if reserved {
                return out;
            }
            if is_fine(xctlset, ev.v0) {
                let hi = ev.v1 >> 7;
                if get_ctl(slist, ev, ev.v0) != hi {
                    let coarse = Ev::ctl(ev.dev, ev.ch, ev.v0, hi);
                    set_ctl(slist, &coarse);
                    out.push(coarse);
                }
                out.push(Ev::ctl(ev.dev, ev.ch, ev.v0 + 32, ev.v1 & 0x7f));
            } else {
                out.push(Ev::ctl(ev.dev, ev.ch, ev.v0, ev.v1 >> 7));
            }
        }
        Cmd::Xpc => {
            if flags.contains(ConvFlags::XPC)
                && ev.v0 != EV_UNDEF
                && get_pair(slist, ev, BANK_HI, BANK_LO) != ev.v0
            {
                let hi = Ev::ctl(ev.dev, ev.ch, BANK_HI, ev.v0 >> 7);
                set_ctl(slist, &hi);
                out.push(hi);
                let lo = Ev::ctl(ev.dev, ev.ch, BANK_LO, ev.v0 & 0x7f);
                set_ctl(slist, &lo);
                out.push(lo);
            }
            out.push(Ev::pc(ev.dev, ev.ch, ev.v1));
        }
        Cmd::Nrpn => {
            if !flags.contains(ConvFlags::NRPN) {
                return out;
            }
            if get_pair(slist, ev, NRPN_HI, NRPN_LO) != ev.v0 {
                rm_ctl(slist, ev, RPN_HI);
                rm_ctl(slist, ev, RPN_LO);
                let hi = Ev::ctl(ev.dev, ev.ch, NRPN_HI, ev.v0 >> 7);
                set_ctl(slist, &hi);
                out.push(hi);
                let lo = Ev::ctl(ev.dev, ev.ch, NRPN_LO, ev.v0 & 0x7f);
                set_ctl(slist, &lo);
                out.push(lo);
            }
            out.push(Ev::ctl(ev.dev, ev.ch, DATAENT_HI, ev.v1 >> 7));
            out.push(Ev::ctl(ev.dev, ev.ch, DATAENT_LO, ev.v1 & 0x7f));
        }
        Cmd::Rpn => {
            if !flags.contains(ConvFlags::RPN) {
                return out;
            }
            if get_pair(slist, ev, RPN_HI, RPN_LO) != ev.v0 {
                rm_ctl(slist, ev, NRPN_HI);
                rm_ctl(slist, ev, NRPN_LO);
                let hi = Ev::ctl(ev.dev, ev.ch, RPN_HI, ev.v0 >> 7);
                set_ctl(slist, &hi);
                out.push(hi);
                let lo = Ev::ctl(ev.dev, ev.ch, RPN_LO, ev.v0 & 0x7f);
                set_ctl(slist, &lo);
                out.push(lo);
            }
            out.push(Ev::ctl(ev.dev, ev.ch, DATAENT_HI, ev.v1 >> 7));
            out.push(Ev::ctl(ev.dev, ev.ch, DATAENT_LO, ev.v1 & 0x7f));
        }
        _ => out.push(*ev),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack_all(slist: &mut StateList, flags: ConvFlags, evs: &[Ev]) -> Vec<Ev> {
        evs.iter().filter_map(|ev| pack_ev(slist, 0, flags, ev)).collect()
    }

    #[test]
    fn bank_and_prog_collapse() {
        let mut slist = StateList::new();
        let evs = [
            Ev::ctl(0, 0, BANK_HI, 1),
            Ev::ctl(0, 0, BANK_LO, 2),
            Ev::pc(0, 0, 5),
        ];
        let out = pack_all(&mut slist, ConvFlags::all(), &evs);
        assert_eq!(out, vec![Ev::xpc(0, 0, (1 << 7) | 2, 5)]);
    }

    #[test]
    fn nrpn_collapse() {
        let mut slist = StateList::new();
        let evs = [
            Ev::ctl(0, 0, NRPN_HI, 0),
            Ev::ctl(0, 0, NRPN_LO, 7),
            Ev::ctl(0, 0, DATAENT_HI, 10),
            Ev::ctl(0, 0, DATAENT_LO, 3),
        ];
        let out = pack_all(&mut slist, ConvFlags::all(), &evs);
        assert_eq!(out, vec![Ev::nrpn(0, 0, 7, (10 << 7) | 3)]);
    }

    #[test]
    fn rpn_collapse_and_priority() {
        let mut slist = StateList::new();
        // an RPN address cancels a pending NRPN address
        let evs = [
            Ev::ctl(0, 0, NRPN_HI, 1),
            Ev::ctl(0, 0, NRPN_LO, 1),
            Ev::ctl(0, 0, RPN_HI, 0),
            Ev::ctl(0, 0, RPN_LO, 2),
            Ev::ctl(0, 0, DATAENT_HI, 0),
            Ev::ctl(0, 0, DATAENT_LO, 64),
        ];
        let out = pack_all(&mut slist, ConvFlags::all(), &evs);
        assert_eq!(out, vec![Ev::rpn(0, 0, 2, 64)]);
    }

    #[test]
    fn xctl_fine_pair() {
        let mut slist = StateList::new();
        let xctlset = 1 << 1; // controller 1 is 14-bit
        assert_eq!(
            pack_ev(&mut slist, xctlset, ConvFlags::all(), &Ev::ctl(0, 0, 1, 0x12)),
            None
        );
        assert_eq!(
            pack_ev(&mut slist, xctlset, ConvFlags::all(), &Ev::ctl(0, 0, 33, 0x34)),
            Some(Ev::xctl(0, 0, 1, (0x12 << 7) | 0x34))
        );
        // 7-bit controllers scale up to the full range
        assert_eq!(
            pack_ev(&mut slist, 0, ConvFlags::all(), &Ev::ctl(0, 0, 7, 100)),
            Some(Ev::xctl(0, 0, 7, 100 << 7))
        );
    }

    #[test]
    fn disabled_conversions_pass_through() {
        let mut slist = StateList::new();
        let out = pack_ev(&mut slist, 0, ConvFlags::empty(), &Ev::ctl(0, 0, BANK_HI, 1));
        // without XPC conversion, bank select is an ordinary 7-bit
        // controller
        assert_eq!(out, Some(Ev::xctl(0, 0, BANK_HI, 1 << 7)));
    }

    #[test]
    fn unpack_context_skips_redundant_messages() {
        let mut slist = StateList::new();
        let flags = ConvFlags::all();
        let ev = Ev::nrpn(1, 2, 0x185, 0x203);
        let out = unpack_ev(&mut slist, 0, flags, &ev);
        assert_eq!(
            out,
            vec![
                Ev::ctl(1, 2, NRPN_HI, 0x185 >> 7),
                Ev::ctl(1, 2, NRPN_LO, 0x185 & 0x7f),
                Ev::ctl(1, 2, DATAENT_HI, 0x203 >> 7),
                Ev::ctl(1, 2, DATAENT_LO, 0x203 & 0x7f),
            ]
        );
        // same address again: only the data entry pair is emitted
        let out = unpack_ev(&mut slist, 0, flags, &Ev::nrpn(1, 2, 0x185, 0x100));
        assert_eq!(
            out,
            vec![
                Ev::ctl(1, 2, DATAENT_HI, 2),
                Ev::ctl(1, 2, DATAENT_LO, 0),
            ]
        );
    }

    #[test]
    fn pack_unpack_round_trip() {
        let mut istate = StateList::new();
        let mut ostate = StateList::new();
        let flags = ConvFlags::all();
        let evs = [
            Ev::note_on(0, 0, 60, 100),
            Ev::xctl(0, 0, 7, 99 << 7),
            Ev::xpc(0, 0, 130, 5),
            Ev::nrpn(0, 0, 7, 1283),
            Ev::rpn(0, 0, 0, 2),
            Ev::bend(0, 0, 0x2000),
        ];
        for ev in &evs {
            let wire = unpack_ev(&mut ostate, 0, flags, ev);
            let packed: Vec<Ev> = wire
                .iter()
                .filter_map(|w| pack_ev(&mut istate, 0, flags, w))
                .collect();
            assert_eq!(packed, vec![*ev], "round trip of {}", ev);
        }
    }
}
