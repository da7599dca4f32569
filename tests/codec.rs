//! Byte-level codec scenarios: raw MIDI in, canonical events out, and
//! back.

mod utils;

use midi_seq::constants::*;
use midi_seq::core::{pack_ev, unpack_ev, Cmd, ConvFlags, Ev, EvDb, StateList};
use midi_seq::engine::dev::{DevIn, DevMode, MidiDev};
use utils::{enable_logging, LoopbackDev};

fn input_dev() -> MidiDev {
    let (ops, _) = LoopbackDev::new();
    let mut dev = MidiDev::new(0, DevMode::IN | DevMode::OUT, ops);
    dev.open();
    dev
}

/// Parse raw bytes and run every voice event through the canonical
/// conversion, as the engine input path does.
fn canonicalize(bytes: &[u8]) -> (Vec<Ev>, StateList) {
    let mut dev = input_dev();
    let mut slist = StateList::new();
    let mut out = Vec::new();
    for item in dev.input(bytes) {
        if let DevIn::Ev(ev) = item {
            if let Some(rev) = pack_ev(&mut slist, 0, ConvFlags::all(), &ev) {
                out.push(rev);
            }
        }
    }
    (out, slist)
}

#[test]
fn bank_prog_collapses_to_xpc() {
    enable_logging();
    let (out, slist) = canonicalize(&[0xb0, 0x00, 0x01, 0xb0, 0x20, 0x02, 0xc0, 0x05]);
    assert_eq!(out, vec![Ev::xpc(0, 0, (1 << 7) | 2, 5)]);
    // the bank context stays recorded
    assert_eq!(slist.len(), 2);
}

#[test]
fn nrpn_with_data_entry() {
    enable_logging();
    let (out, _) = canonicalize(&[
        0xb0, 0x63, 0x00, 0xb0, 0x62, 0x07, 0xb0, 0x06, 0x0a, 0xb0, 0x26, 0x03,
    ]);
    assert_eq!(out, vec![Ev::nrpn(0, 0, 7, (10 << 7) | 3)]);
}

#[test]
fn rpn_with_data_entry() {
    enable_logging();
    let (out, _) = canonicalize(&[
        0xb0, 0x65, 0x00, 0xb0, 0x64, 0x02, 0xb0, 0x06, 0x00, 0xb0, 0x26, 0x40,
    ]);
    assert_eq!(out, vec![Ev::rpn(0, 0, 2, 0x40)]);
}

#[test]
fn note_off_shares_running_status() {
    enable_logging();
    let (ops, wrote) = LoopbackDev::new();
    let mut dev = MidiDev::new(0, DevMode::OUT, ops);
    dev.open();
    let db = EvDb::new();
    dev.put_ev(&db, &Ev::note_on(0, 0, 0x60, 0x40));
    dev.put_ev(&db, &Ev::note_off(0, 0, 0x60));
    dev.flush();
    assert_eq!(*wrote.borrow(), vec![0x90, 0x60, 0x40, 0x60, 0x00]);
}

#[test]
fn voice_round_trip_through_wire() {
    enable_logging();
    let db = EvDb::new();
    let evs = [
        Ev::note_on(0, 3, 64, 99),
        Ev::note_off(0, 3, 64),
        Ev::xctl(0, 1, 1, 20 << 7),
        Ev::xpc(0, 2, 0x203, 17),
        Ev::nrpn(0, 0, 0x123, 0x456),
        Ev::rpn(0, 0, 0, 12),
        Ev::chan_aft(0, 5, 33),
        Ev::bend(0, 6, 0x1234),
    ];
    // encode to bytes, parse back, re-canonicalize: each event
    // survives once both directions share the priming context
    let (ops, wrote) = LoopbackDev::new();
    let mut dev = MidiDev::new(0, DevMode::OUT, ops);
    dev.open();
    let mut ostate = StateList::new();
    for ev in &evs {
        for wire in unpack_ev(&mut ostate, 0, ConvFlags::all(), ev) {
            dev.put_ev(&db, &wire);
        }
    }
    dev.flush();
    let (out, _) = canonicalize(&wrote.borrow());
    assert_eq!(out, evs.to_vec());
}

#[test]
fn sysex_pattern_round_trip() {
    enable_logging();
    let mut db = EvDb::new();
    let cmd = db
        .add_pattern(
            "master",
            vec![
                MIDI_SYSEX_START,
                0x7f,
                0x7f,
                0x04,
                0x01,
                midi_seq::core::ev::PAT_V0_LO,
                midi_seq::core::ev::PAT_V0_HI,
                MIDI_SYSEX_STOP,
            ],
        )
        .unwrap();
    assert_eq!(cmd, Cmd::Pat0);
    let ev = Ev::new(cmd, 0, 0, 0x1234, 0);
    let (ops, wrote) = LoopbackDev::new();
    let mut dev = MidiDev::new(0, DevMode::OUT, ops);
    dev.open();
    dev.put_ev(&db, &ev);
    dev.flush();
    assert_eq!(
        *wrote.borrow(),
        vec![0xf0, 0x7f, 0x7f, 0x04, 0x01, 0x34, 0x24, 0xf7]
    );
}

#[test]
fn malformed_stream_recovers() {
    enable_logging();
    // aborted sysex, then dangling data bytes, then a valid message
    let (out, _) = canonicalize(&[0xf0, 0x01, 0x02, 0x90, 60, 100]);
    assert_eq!(out, vec![Ev::note_on(0, 0, 60, 100)]);
}
