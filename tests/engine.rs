//! End-to-end engine scenarios: transport, loop, mixer priorities and
//! relocation, driven through a loopback device.

mod utils;

use midi_seq::constants::*;
use midi_seq::core::Ev;
use midi_seq::engine::dev::DevMode;
use midi_seq::engine::mixout::{PRIO_INPUT, PRIO_TRACK};
use midi_seq::engine::Engine;
use midi_seq::song::ptr::SeqPtr;
use std::cell::RefCell;
use std::rc::Rc;
use utils::{contains_seq, enable_logging, find_seq, voice_bytes, LoopbackDev};

const TICK: u32 = DEFAULT_USEC24; // 500000, 120 bpm at 24 tpb

fn engine_with_dev() -> (Engine, Rc<RefCell<Vec<u8>>>) {
    enable_logging();
    let mut engine = Engine::new();
    let (ops, wrote) = LoopbackDev::new();
    engine.devs.attach(0, DevMode::IN | DevMode::OUT, ops).unwrap();
    // plain status bytes make the assertions below readable
    engine.devs.by_unit_mut(0).unwrap().runst = false;
    (engine, wrote)
}

/// Put `(delta, ev)` pairs on the track of a fresh song track.
fn fill_track(engine: &mut Engine, name: &str, evs: &[(u32, Ev)]) -> u32 {
    let tid = engine.song.trknew(name).unwrap();
    let db = &engine.evdb;
    let t = engine.song.trk_by_id_mut(tid).unwrap();
    let mut p = SeqPtr::new();
    for &(delta, ev) in evs {
        p.seek(db, &mut t.track, delta);
        p.evput(db, &mut t.track, &ev);
    }
    tid
}

fn run_ticks(engine: &mut Engine, n: u32) {
    for _ in 0..n {
        engine.timer_tick(TICK);
    }
}

#[test]
fn play_starts_and_stops_cleanly() {
    let (mut engine, wrote) = engine_with_dev();
    fill_track(
        &mut engine,
        "t0",
        &[(0, Ev::note_on(0, 0, 60, 100)), (10, Ev::note_off(0, 0, 60))],
    );
    engine.song_play();
    // internal clock: the first tick fires after the start delay
    engine.timer_tick(8_000_000);
    let bytes = voice_bytes(&wrote.borrow());
    assert!(contains_seq(&bytes, &[0x90, 60, 100]), "note-on played");
    run_ticks(&mut engine, 5);
    // stopping mid-note must close it
    engine.song_stop();
    let bytes = voice_bytes(&wrote.borrow());
    assert!(contains_seq(&bytes, &[0x90, 60, 0]), "note-off on stop");
}

#[test]
fn loop_wrap_closes_and_replays_notes() {
    let (mut engine, wrote) = engine_with_dev();
    // the note-off lies beyond the loop end
    fill_track(
        &mut engine,
        "t0",
        &[(0, Ev::note_on(0, 0, 0x3c, 0x40)), (200, Ev::note_off(0, 0, 0x3c))],
    );
    engine.song.loop_enabled = true;
    engine.song.curpos = 0;
    engine.song.curlen = 1; // one measure = 96 tics
    engine.song_play();
    engine.timer_tick(8_000_000);
    {
        let bytes = voice_bytes(&wrote.borrow());
        assert!(contains_seq(&bytes, &[0x90, 0x3c, 0x40]));
        assert!(!contains_seq(&bytes, &[0x90, 0x3c, 0x00]));
    }
    // play through the loop end
    run_ticks(&mut engine, 96);
    let bytes = voice_bytes(&wrote.borrow());
    let off = find_seq(&bytes, &[0x90, 0x3c, 0x00]).expect("note closed at the wrap");
    let second_on = bytes[off..]
        .windows(3)
        .position(|w| w == [0x90, 0x3c, 0x40]);
    assert!(second_on.is_some(), "note replayed on the new pass");
    engine.song_stop();
}

#[test]
fn mixer_lower_id_wins_then_releases() {
    let (mut engine, wrote) = engine_with_dev();
    engine.open();
    let track_ev = Ev::xctl(0, 0, 7, 10 << 7);
    let input_ev = Ev::xctl(0, 0, 7, 20 << 7);
    engine.mixout_put(&input_ev, PRIO_INPUT);
    engine.mixout_put(&track_ev, PRIO_TRACK);
    engine.flush();
    let bytes = voice_bytes(&wrote.borrow());
    assert!(contains_seq(&bytes, &[0xb0, 7, 20]), "input value sent");
    assert!(!contains_seq(&bytes, &[0xb0, 7, 10]), "track value masked");

    // the input frame is idle: after 24 purge periods the key is
    // released and the track value is honoured again
    for _ in 0..26 {
        engine.timer_tick(1_000_000);
    }
    engine.mixout_put(&track_ev, PRIO_TRACK);
    engine.flush();
    let bytes = voice_bytes(&wrote.borrow());
    assert!(contains_seq(&bytes, &[0xb0, 7, 10]), "track value honoured");
    engine.close();
}

#[test]
fn mixer_takeover_cancels_loser() {
    let (mut engine, wrote) = engine_with_dev();
    engine.open();
    // a track note is kicked by a live note on the same key
    engine.mixout_put(&Ev::note_on(0, 0, 60, 100), PRIO_TRACK);
    engine.mixout_put(&Ev::note_on(0, 0, 60, 90), PRIO_INPUT);
    engine.flush();
    let bytes = voice_bytes(&wrote.borrow());
    let off = find_seq(&bytes, &[0x90, 60, 0]).expect("loser cancelled");
    assert!(
        find_seq(&bytes[off..], &[0x90, 60, 90]).is_some(),
        "cancel precedes the takeover"
    );
    engine.close();
}

#[test]
fn relocation_cancels_notes_and_restores_controllers() {
    let (mut engine, wrote) = engine_with_dev();
    fill_track(
        &mut engine,
        "t0",
        &[
            // sustain on: a 14-bit controller value, 127 on the wire
            (0, Ev::xctl(0, 0, 64, 127 << 7)),
            (10, Ev::note_on(0, 0, 0x3c, 0x40)),
            (490, Ev::note_off(0, 0, 0x3c)),
        ],
    );
    engine.song_play();
    engine.timer_tick(8_000_000);
    run_ticks(&mut engine, 20);
    {
        let bytes = voice_bytes(&wrote.borrow());
        assert!(contains_seq(&bytes, &[0xb0, 64, 127]), "sustain set");
        assert!(contains_seq(&bytes, &[0x90, 0x3c, 0x40]), "note held");
        wrote.borrow_mut().clear();
    }
    engine.song_goto(4);
    let bytes = voice_bytes(&wrote.borrow());
    let off = find_seq(&bytes, &[0x90, 0x3c, 0x00]).expect("held note cancelled");
    assert!(
        find_seq(&bytes[off..], &[0xb0, 64, 127]).is_some(),
        "sustain restored after the jump"
    );
    engine.song_stop();
}

#[test]
fn device_error_shuts_sounding_input() {
    let (mut engine, wrote) = engine_with_dev();
    engine.open();
    // live note through the normalizer, song idle (pass-through)
    engine.dev_input(0, &[0x90, 61, 100]);
    {
        let bytes = voice_bytes(&wrote.borrow());
        assert!(contains_seq(&bytes, &[0x90, 61, 100]));
    }
    engine.dev_error(0);
    let bytes = voice_bytes(&wrote.borrow());
    assert!(contains_seq(&bytes, &[0x90, 61, 0]), "note shut on error");
}

#[test]
fn record_then_merge_into_track() {
    let (mut engine, wrote) = engine_with_dev();
    let tid = fill_track(&mut engine, "t0", &[]);
    engine.song_record();
    engine.timer_tick(8_000_000);
    run_ticks(&mut engine, 96);
    // play a short live note while recording
    engine.dev_input(0, &[0x90, 65, 100]);
    run_ticks(&mut engine, 12);
    engine.dev_input(0, &[0x80, 65, 0]);
    run_ticks(&mut engine, 4);
    engine.song_stop();
    let t = engine.song.trk_by_id(tid).unwrap();
    assert_eq!(t.track.evcnt(midi_seq::core::Cmd::NoteOn), 1);
    assert_eq!(t.track.evcnt(midi_seq::core::Cmd::NoteOff), 1);
    // the merge pushed one undoable operation
    engine.song.undo_pop();
    assert!(engine.song.trk_by_id(tid).unwrap().track.is_empty());
    let _ = wrote;
}

#[test]
fn external_clock_drives_ticks() {
    let (mut engine, wrote) = engine_with_dev();
    engine.devs.by_unit_mut(0).unwrap().sendclk = false;
    engine.devs.clksrc = Some(0);
    fill_track(
        &mut engine,
        "t0",
        &[(0, Ev::note_on(0, 0, 60, 100)), (1, Ev::note_off(0, 0, 60))],
    );
    engine.song_play();
    {
        let bytes = voice_bytes(&wrote.borrow());
        assert!(!contains_seq(&bytes, &[0x90, 60, 100]), "armed, not started");
    }
    // the device resolution matches ours: one tick per 0xf8
    engine.devs.by_unit_mut(0).unwrap().ticrate = DEFAULT_TPU;
    engine.dev_input(0, &[0xfa, 0xf8, 0xf8]);
    let bytes = voice_bytes(&wrote.borrow());
    assert!(contains_seq(&bytes, &[0x90, 60, 100]), "started by MIDI clock");
    engine.song_stop();
}
