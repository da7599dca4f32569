//! Generic MIDI devices. A device is whatever implements the
//! [`DeviceOps`] capability surface (an ALSA port, a raw fd, a pipe, a
//! test loopback); this module owns everything device-independent: the
//! registry indexed by unit number, the byte parser turning the input
//! stream into events, the encoder turning events back into bytes with
//! running status, the output buffer, and the MTC (time code) parser.

use crate::constants::*;
use crate::core::conv::ConvFlags;
use crate::core::ev::{Cmd, Ev, EvDb, EV_NOFF_DEFAULTVEL, PAT_V0_HI, PAT_V0_LO, PAT_V1_HI, PAT_V1_LO};
use crate::error::{self, LibResult};
use bitflags::bitflags;
use log::{debug, trace, warn};
use snafu::ensure;

/// Size of the per-device output buffer.
pub const DEV_BUFLEN: usize = 1024;

/// Output active-sense period: send 0xFE after 250 ms of silence.
pub const DEV_OSENSTO: u32 = 250 * 24_000;

/// Input active-sense timeout: a device that sent 0xFE once is
/// declared stuck after 350 ms of silence.
pub const DEV_ISENSTO: u32 = 350 * 24_000;

/// MTC quarter-frame silence timeout.
pub const MTC_TIMO: u32 = USEC24_PER_SEC;

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
    pub struct DevMode: u8 {
        const IN = 1;
        const OUT = 2;
    }
}

/// The only interface the engine consumes from a device driver. The
/// embedding event loop owns `poll(2)`; `pollfd` appends the entries
/// to watch and `revents` reads the result back.
pub trait DeviceOps {
    fn open(&mut self);
    fn close(&mut self);
    /// Append the descriptors to poll, return how many were added.
    fn pollfd(&self, pfds: &mut Vec<libc::pollfd>, events: i16) -> usize;
    /// Collect the events of the entries appended by `pollfd`.
    fn revents(&self, pfds: &[libc::pollfd]) -> i16;
    fn read(&mut self, buf: &mut [u8]) -> usize;
    fn write(&mut self, buf: &[u8]) -> usize;
    /// True once the device reached end-of-file or failed.
    fn eof(&self) -> bool;
}

/// Items produced by the input parser; the engine routes them.
#[derive(Clone, Debug, PartialEq)]
pub enum DevIn {
    Tic,
    Start,
    Stop,
    Ack,
    Ev(Ev),
    Sysex(Vec<u8>),
    Qframe(u8),
}

/// What the MTC state machine asks the clock to do.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MtcCmd {
    /// Move the clock forward by this many 1/24 µs.
    Tick(u32),
    /// (Re)start at the given absolute position, in MTC_SEC units.
    Start(u32),
    Stop,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum MtcState {
    Stop,
    Start,
    Run,
}

/// MTC parser: consumes quarter-frame data bytes and full-frame sysex
/// messages, tracks the absolute position and verifies it against the
/// reassembled one every eighth quarter frame.
#[derive(Debug)]
pub struct Mtc {
    /// Timecode units per quarter frame, 0 when the rate is unknown.
    tps: u32,
    qfr: usize,
    nibble: [u8; 8],
    pos: u32,
    state: MtcState,
    /// Remaining 1/24 µs before the source is declared stopped.
    pub timo: u32,
}

impl Mtc {
    fn new() -> Mtc {
        Mtc { tps: 0, qfr: 0, nibble: [0; 8], pos: 0, state: MtcState::Stop, timo: 0 }
    }

    /// Set the rate from the 2-bit fps code of a full-frame message;
    /// 24, 25 and 30 fps are supported.
    fn setfps(&mut self, id: u8) -> bool {
        self.tps = match id {
            0 => MTC_SEC / (24 * 4),
            1 => MTC_SEC / (25 * 4),
            3 => MTC_SEC / (30 * 4),
            _ => {
                if self.tps != 0 {
                    warn!("mtc: {}: unsupported frame rate", id);
                }
                0
            }
        };
        self.tps != 0
    }

    /// Quarter-frame silence timeout expired.
    pub fn expire(&mut self) -> MtcCmd {
        debug!("mtc: stopped (timeout)");
        self.state = MtcState::Stop;
        MtcCmd::Stop
    }

    /// Handle a quarter frame data byte.
    pub fn tick(&mut self, data: u8) -> Vec<MtcCmd> {
        let mut out = Vec::new();
        if self.state == MtcState::Stop {
            return out;
        }
        if (data >> 4) as usize != self.qfr {
            debug!("mtc: quarter frame out of sequence");
            return out;
        }
        if self.state == MtcState::Run {
            self.pos += self.tps;
            if self.pos >= MTC_PERIOD {
                self.pos -= MTC_PERIOD;
            }
            out.push(MtcCmd::Tick(self.tps * (USEC24_PER_SEC / MTC_SEC)));
        } else {
            self.state = MtcState::Run;
            out.push(MtcCmd::Tick(0));
        }
        self.nibble[self.qfr] = data & 0xf;
        self.qfr += 1;
        if self.qfr < 8 {
            return out;
        }
        self.qfr = 0;
        self.timo = MTC_TIMO;
        let n = &self.nibble;
        let mut pos = self.tps * 4 * (n[0] as u32 + ((n[1] as u32) << 4))
            + MTC_SEC * (n[2] as u32 + ((n[3] as u32) << 4))
            + MTC_SEC * 60 * (n[4] as u32 + ((n[5] as u32) << 4))
            + MTC_SEC * 3600 * (n[6] as u32 + (((n[7] & 1) as u32) << 4));
        // the full position was transmitted over the previous 7
        // quarter frames
        pos += 7 * self.tps;
        if pos >= MTC_PERIOD {
            pos -= MTC_PERIOD;
        }
        if pos != self.pos {
            let mut delta = pos as i64 - self.pos as i64;
            if delta < -(MTC_PERIOD as i64) / 2 {
                delta += MTC_PERIOD as i64;
            }
            if delta >= MTC_PERIOD as i64 / 2 {
                delta -= MTC_PERIOD as i64;
            }
            debug!("mtc: went off by {} units", delta);
            if delta > 0 && delta < MTC_SEC as i64 / 6 {
                out.push(MtcCmd::Tick(delta as u32 * (USEC24_PER_SEC / MTC_SEC)));
                self.pos = pos;
            } else {
                self.state = MtcState::Stop;
                out.push(MtcCmd::Stop);
            }
        }
        out
    }

    /// Handle a full-frame sysex message.
    pub fn full(&mut self, data: &[u8]) -> Option<MtcCmd> {
        if data.len() != 10 {
            return None;
        }
        if data[1] != 0x7f || data[2] != 0x7f || data[3] != 0x01 || data[4] != 0x01 {
            return None;
        }
        if !self.setfps(data[5] >> 5) {
            return None;
        }
        self.qfr = 0;
        self.pos = MTC_SEC * 3600 * (data[5] & 0x1f) as u32
            + MTC_SEC * 60 * data[6] as u32
            + MTC_SEC * data[7] as u32
            + self.tps * 4 * data[8] as u32;
        self.state = MtcState::Start;
        debug!("mtc: start at {}", self.pos);
        Some(MtcCmd::Start(self.pos))
    }
}

/// Bytes per voice message for each status nibble 0x8..0xf.
const EVLEN: [usize; 8] = [2, 2, 2, 2, 1, 1, 2, 0];

fn evlen(status: u8) -> usize {
    EVLEN[((status >> 4) & 7) as usize]
}

/// A registered MIDI device: user-visible settings, sense counters,
/// the input parser state and the buffered output encoder.
pub struct MidiDev {
    pub unit: u8,
    pub mode: DevMode,
    /// Send clock ticks and start/stop to this device.
    pub sendclk: bool,
    /// Send MMC messages to this device.
    pub sendmmc: bool,
    /// Device clock resolution, in ticks per whole note.
    pub ticrate: u32,
    pub ticdelta: u32,
    /// 14-bit controller maps, per direction.
    pub ixctlset: u32,
    pub oxctlset: u32,
    /// Enabled canonical conversions, per direction.
    pub ievset: ConvFlags,
    pub oevset: ConvFlags,
    pub eof: bool,
    /// Use running status on output.
    pub runst: bool,
    /// Flush after every message.
    pub sync: bool,
    /// Input sense: 0 when sensing is off, else remaining 1/24 µs.
    pub isensto: u32,
    /// Output sense: remaining 1/24 µs before an active-sense byte.
    pub osensto: u32,
    pub imtc: Mtc,
    istatus: u8,
    icount: usize,
    idata: [u8; 2],
    isysex: Option<Vec<u8>>,
    obuf: [u8; DEV_BUFLEN],
    oused: usize,
    ostatus: u8,
    ops: Box<dyn DeviceOps>,
}

impl MidiDev {
    pub fn new(unit: u8, mode: DevMode, ops: Box<dyn DeviceOps>) -> MidiDev {
        MidiDev {
            unit,
            mode,
            sendclk: false,
            sendmmc: true,
            ticrate: DEFAULT_TPU,
            ticdelta: 0,
            ixctlset: 0,
            oxctlset: 0,
            ievset: ConvFlags::all(),
            oevset: ConvFlags::all(),
            eof: true,
            runst: true,
            sync: false,
            isensto: 0,
            osensto: DEV_OSENSTO,
            imtc: Mtc::new(),
            istatus: 0,
            icount: 0,
            idata: [0; 2],
            isysex: None,
            obuf: [0; DEV_BUFLEN],
            oused: 0,
            ostatus: 0,
            ops,
        }
    }

    pub fn open(&mut self) {
        self.eof = false;
        self.oused = 0;
        self.istatus = 0;
        self.ostatus = 0;
        self.isysex = None;
        self.imtc = Mtc::new();
        self.ops.open();
        self.eof = self.ops.eof();
    }

    pub fn close(&mut self) {
        self.ops.close();
        if self.oused > 0 {
            warn!("dev {}: closed with unflushed output", self.unit);
        }
        self.eof = true;
    }

    pub fn pollfd(&self, pfds: &mut Vec<libc::pollfd>, events: i16) -> usize {
        self.ops.pollfd(pfds, events)
    }

    pub fn revents(&self, pfds: &[libc::pollfd]) -> i16 {
        self.ops.revents(pfds)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.ops.read(buf);
        if self.ops.eof() {
            self.eof = true;
        }
        n
    }

    /// Write out the buffered bytes.
    pub fn flush(&mut self) {
        if !self.eof {
            if self.oused > 0 {
                trace!("dev {}: flush {} bytes", self.unit, self.oused);
            }
            let mut todo = &self.obuf[..self.oused];
            let had_output = self.oused > 0;
            while !todo.is_empty() {
                let count = self.ops.write(todo);
                if self.ops.eof() {
                    self.eof = true;
                    break;
                }
                todo = &todo[count..];
            }
            if had_output {
                self.osensto = DEV_OSENSTO;
            }
        }
        self.oused = 0;
    }

    /*
     * input parser
     */

    /// Decode a chunk of the input byte stream. Malformed sequences
    /// are logged and dropped; the parser state resets and decoding
    /// continues.
    pub fn input(&mut self, buf: &[u8]) -> Vec<DevIn> {
        let mut out = Vec::new();
        if !self.mode.contains(DevMode::IN) {
            warn!("dev {}: received data from output-only device", self.unit);
            return out;
        }
        for &data in buf {
            if data >= 0xf8 {
                match data {
                    MIDI_TIC => out.push(DevIn::Tic),
                    MIDI_START => out.push(DevIn::Start),
                    MIDI_STOP => out.push(DevIn::Stop),
                    MIDI_ACK => out.push(DevIn::Ack),
                    _ => trace!("dev {}: {:#04x}: skipped unimplemented message", self.unit, data),
                }
            } else if data >= 0x80 {
                if self.istatus >= 0x80 && self.icount > 0 && self.icount < evlen(self.istatus) {
                    // the midi spec says messages can be aborted by a
                    // status byte
                    debug!("dev {}: {:#04x}: skipped aborted message", self.unit, self.istatus);
                }
                self.istatus = data;
                self.icount = 0;
                match data {
                    MIDI_SYSEX_START => {
                        if self.isysex.is_some() {
                            debug!("dev {}: previous sysex aborted", self.unit);
                        }
                        self.isysex = Some(vec![data]);
                    }
                    MIDI_SYSEX_STOP => {
                        if let Some(mut sx) = self.isysex.take() {
                            sx.push(data);
                            out.push(DevIn::Sysex(sx));
                        }
                        self.istatus = 0;
                    }
                    _ => {
                        // a sysex without its stop byte is aborted
                        if self.isysex.take().is_some() {
                            debug!("dev {}: current sysex aborted", self.unit);
                        }
                    }
                }
            } else if self.istatus >= 0x80 && self.istatus < 0xf0 {
                self.idata[self.icount] = data;
                self.icount += 1;
                if self.icount == evlen(self.istatus) {
                    self.icount = 0;
                    let cmd = Cmd::from_index((self.istatus >> 4) as usize).unwrap();
                    let ch = self.istatus & 0x0f;
                    let ev = if cmd == Cmd::NoteOn && self.idata[1] == 0 {
                        // note-on with zero velocity is a note-off
                        Ev::new(
                            Cmd::NoteOff,
                            self.unit,
                            ch,
                            self.idata[0] as u32,
                            EV_NOFF_DEFAULTVEL,
                        )
                    } else if cmd == Cmd::Bend {
                        Ev::new(
                            cmd,
                            self.unit,
                            ch,
                            ((self.idata[1] as u32) << 7) + self.idata[0] as u32,
                            0,
                        )
                    } else {
                        Ev::new(cmd, self.unit, ch, self.idata[0] as u32, self.idata[1] as u32)
                    };
                    out.push(DevIn::Ev(ev));
                }
            } else if self.istatus == MIDI_SYSEX_START {
                if let Some(sx) = self.isysex.as_mut() {
                    sx.push(data);
                }
            } else if self.istatus == MIDI_QFRAME {
                // MIDI uses running status for voice messages only
                out.push(DevIn::Qframe(data));
                self.istatus = 0;
            }
        }
        out
    }

    /*
     * output encoder
     */

    fn out(&mut self, data: u8) {
        if !self.mode.contains(DevMode::OUT) {
            return;
        }
        if self.oused == DEV_BUFLEN {
            self.flush();
        }
        self.obuf[self.oused] = data;
        self.oused += 1;
    }

    fn put_status(&mut self, status: u8) {
        if !self.runst || status != self.ostatus {
            self.ostatus = status;
            self.out(status);
        }
    }

    pub fn put_start(&mut self) {
        self.out(MIDI_START);
        if self.sync {
            self.flush();
        }
    }

    pub fn put_stop(&mut self) {
        self.out(MIDI_STOP);
        if self.sync {
            self.flush();
        }
    }

    pub fn put_tic(&mut self) {
        self.out(MIDI_TIC);
        if self.sync {
            self.flush();
        }
    }

    pub fn put_ack(&mut self) {
        self.out(MIDI_ACK);
        if self.sync {
            self.flush();
        }
    }

    /// Encode and buffer a voice or sysex pattern event. A note-off
    /// is sent as note-on with zero velocity so it can share running
    /// status with note-ons.
    pub fn put_ev(&mut self, db: &EvDb, ev: &Ev) {
        if ev.is_sx() {
            let pattern = match db.info(ev.cmd).pattern.as_ref() {
                Some(p) => p.clone(),
                None => panic!("put_ev: unconfigured sysex pattern {:?}", ev.cmd),
            };
            for &p in pattern.iter() {
                match p {
                    PAT_V0_HI => self.out((ev.v0 >> 7) as u8),
                    PAT_V0_LO => self.out((ev.v0 & 0x7f) as u8),
                    PAT_V1_HI => self.out((ev.v1 >> 7) as u8),
                    PAT_V1_LO => self.out((ev.v1 & 0x7f) as u8),
                    _ => self.out(p),
                }
            }
            // raw sysex invalidates running status
            self.ostatus = 0;
        } else if ev.is_voice() {
            match ev.cmd {
                Cmd::NoteOff => {
                    self.put_status(ev.ch + ((Cmd::NoteOn as u8) << 4));
                    self.out(ev.v0 as u8);
                    self.out(0);
                }
                Cmd::Bend => {
                    self.put_status(ev.ch + ((Cmd::Bend as u8) << 4));
                    self.out((ev.v0 & 0x7f) as u8);
                    self.out((ev.v0 >> 7) as u8);
                }
                _ => {
                    let status = ev.ch + ((ev.cmd as u8) << 4);
                    self.put_status(status);
                    self.out(ev.v0 as u8);
                    if evlen(status) == 2 {
                        self.out(ev.v1 as u8);
                    }
                }
            }
        } else {
            panic!("put_ev: {}: only voice events can be sent", ev);
        }
        if self.sync {
            self.flush();
        }
    }

    /// Buffer raw bytes (sysex messages); resets running status since
    /// the buffer isn't parsed.
    pub fn send_raw(&mut self, buf: &[u8]) {
        if !self.mode.contains(DevMode::OUT) {
            return;
        }
        for &b in buf {
            if self.oused == DEV_BUFLEN {
                self.flush();
            }
            self.obuf[self.oused] = b;
            self.oused += 1;
        }
        self.ostatus = 0;
        if self.sync {
            self.flush();
        }
    }
}

/// The process-wide device registry, indexed by unit number, plus the
/// designated clock and MTC sources.
pub struct DevTable {
    devs: Vec<Option<MidiDev>>,
    pub clksrc: Option<u8>,
    pub mtcsrc: Option<u8>,
}

impl DevTable {
    pub fn new() -> DevTable {
        let mut devs = Vec::with_capacity(MAX_DEVS);
        for _ in 0..MAX_DEVS {
            devs.push(None);
        }
        DevTable { devs, clksrc: None, mtcsrc: None }
    }

    /// Register a device on the given unit.
    pub fn attach(&mut self, unit: u8, mode: DevMode, ops: Box<dyn DeviceOps>) -> crate::Result<()> {
        Ok(self.attach_inner(unit, mode, ops)?)
    }

    fn attach_inner(&mut self, unit: u8, mode: DevMode, ops: Box<dyn DeviceOps>) -> LibResult<()> {
        ensure!((unit as usize) < MAX_DEVS, error::BadUnit { unit });
        ensure!(self.devs[unit as usize].is_none(), error::UnitExists { unit });
        self.devs[unit as usize] = Some(MidiDev::new(unit, mode, ops));
        Ok(())
    }

    /// Unregister the device on the given unit; the clock and MTC
    /// masters cannot be detached.
    pub fn detach(&mut self, unit: u8) -> crate::Result<()> {
        Ok(self.detach_inner(unit)?)
    }

    fn detach_inner(&mut self, unit: u8) -> LibResult<()> {
        ensure!(
            (unit as usize) < MAX_DEVS && self.devs[unit as usize].is_some(),
            error::NoSuchUnit { unit }
        );
        ensure!(
            self.clksrc != Some(unit) && self.mtcsrc != Some(unit),
            error::MasterInUse { unit }
        );
        self.devs[unit as usize] = None;
        Ok(())
    }

    pub fn by_unit(&self, unit: u8) -> Option<&MidiDev> {
        self.devs.get(unit as usize).and_then(|d| d.as_ref())
    }

    pub fn by_unit_mut(&mut self, unit: u8) -> Option<&mut MidiDev> {
        self.devs.get_mut(unit as usize).and_then(|d| d.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = &MidiDev> {
        self.devs.iter().filter_map(|d| d.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MidiDev> {
        self.devs.iter_mut().filter_map(|d| d.as_mut())
    }

    pub fn units(&self) -> Vec<u8> {
        self.devs.iter().filter_map(|d| d.as_ref().map(|d| d.unit)).collect()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Loopback device: `write` appends to a shared byte log, `read`
    /// drains bytes pushed by the test.
    pub struct Loopback {
        pub wrote: Rc<RefCell<Vec<u8>>>,
        pub to_read: Rc<RefCell<Vec<u8>>>,
        pub eof: bool,
    }

    impl Loopback {
        pub fn new() -> (Box<Loopback>, Rc<RefCell<Vec<u8>>>) {
            let wrote = Rc::new(RefCell::new(Vec::new()));
            let dev = Loopback {
                wrote: wrote.clone(),
                to_read: Rc::new(RefCell::new(Vec::new())),
                eof: false,
            };
            (Box::new(dev), wrote)
        }
    }

    impl DeviceOps for Loopback {
        fn open(&mut self) {}
        fn close(&mut self) {}
        fn pollfd(&self, _pfds: &mut Vec<libc::pollfd>, _events: i16) -> usize {
            0
        }
        fn revents(&self, _pfds: &[libc::pollfd]) -> i16 {
            0
        }
        fn read(&mut self, buf: &mut [u8]) -> usize {
            let mut src = self.to_read.borrow_mut();
            let n = src.len().min(buf.len());
            buf[..n].copy_from_slice(&src[..n]);
            src.drain(..n);
            n
        }
        fn write(&mut self, buf: &[u8]) -> usize {
            self.wrote.borrow_mut().extend_from_slice(buf);
            buf.len()
        }
        fn eof(&self) -> bool {
            self.eof
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::Loopback;
    use super::*;

    fn test_dev() -> (MidiDev, std::rc::Rc<std::cell::RefCell<Vec<u8>>>) {
        let (ops, wrote) = Loopback::new();
        let mut dev = MidiDev::new(0, DevMode::IN | DevMode::OUT, ops);
        dev.open();
        (dev, wrote)
    }

    #[test]
    fn parse_running_status() {
        let (mut dev, _) = test_dev();
        let out = dev.input(&[0x90, 60, 100, 61, 100]);
        assert_eq!(
            out,
            vec![
                DevIn::Ev(Ev::note_on(0, 0, 60, 100)),
                DevIn::Ev(Ev::note_on(0, 0, 61, 100)),
            ]
        );
    }

    #[test]
    fn parse_note_on_zero_velocity() {
        let (mut dev, _) = test_dev();
        let out = dev.input(&[0x91, 60, 0]);
        assert_eq!(
            out,
            vec![DevIn::Ev(Ev::new(Cmd::NoteOff, 0, 1, 60, EV_NOFF_DEFAULTVEL))]
        );
    }

    #[test]
    fn parse_realtime_interleaved() {
        let (mut dev, _) = test_dev();
        // a clock tick may interrupt a voice message
        let out = dev.input(&[0x90, 60, 0xf8, 100]);
        assert_eq!(
            out,
            vec![DevIn::Tic, DevIn::Ev(Ev::note_on(0, 0, 60, 100))]
        );
    }

    #[test]
    fn parse_sysex() {
        let (mut dev, _) = test_dev();
        let out = dev.input(&[0xf0, 0x7f, 0x01, 0xf7]);
        assert_eq!(out, vec![DevIn::Sysex(vec![0xf0, 0x7f, 0x01, 0xf7])]);
        // aborted sysex is dropped
        let out = dev.input(&[0xf0, 0x7f, 0x90, 60, 100]);
        assert_eq!(out, vec![DevIn::Ev(Ev::note_on(0, 0, 60, 100))]);
    }

    #[test]
    fn encode_running_status() {
        let db = EvDb::new();
        let (mut dev, wrote) = test_dev();
        dev.put_ev(&db, &Ev::note_on(0, 0, 0x60, 0x40));
        dev.put_ev(&db, &Ev::note_off(0, 0, 0x60));
        dev.flush();
        // the note-off shares the note-on status, velocity 0
        assert_eq!(*wrote.borrow(), vec![0x90, 0x60, 0x40, 0x60, 0x00]);
    }

    #[test]
    fn encode_no_running_status() {
        let db = EvDb::new();
        let (mut dev, wrote) = test_dev();
        dev.runst = false;
        dev.put_ev(&db, &Ev::note_on(0, 1, 60, 100));
        dev.put_ev(&db, &Ev::note_on(0, 1, 61, 100));
        dev.flush();
        assert_eq!(*wrote.borrow(), vec![0x91, 60, 100, 0x91, 61, 100]);
    }

    #[test]
    fn encode_bend_14bit(){
        let db = EvDb::new();
        let (mut dev, wrote) = test_dev();
        dev.put_ev(&db, &Ev::bend(0, 2, 0x2000));
        dev.flush();
        assert_eq!(*wrote.borrow(), vec![0xe2, 0x00, 0x40]);
    }

    #[test]
    fn mtc_full_then_quarter_frames() {
        let mut mtc = Mtc::new();
        // 25 fps, 00:00:01:00
        let cmd = mtc.full(&[0xf0, 0x7f, 0x7f, 0x01, 0x01, 1 << 5, 0, 1, 0, 0xf7]);
        assert_eq!(cmd, Some(MtcCmd::Start(MTC_SEC)));
        // first quarter frame starts the run
        assert_eq!(mtc.tick(0x00), vec![MtcCmd::Tick(0)]);
        // a quarter frame at 25 fps is 24 units
        let unit = (MTC_SEC / 100) * (USEC24_PER_SEC / MTC_SEC);
        for i in 1..8u8 {
            let out = mtc.tick((i << 4) | nibble_of(MTC_SEC, i));
            // position agrees with the reassembled one: no stop, no
            // extra nudge
            assert_eq!(out, vec![MtcCmd::Tick(unit)]);
        }
    }

    fn nibble_of(pos: u32, index: u8) -> u8 {
        // encode an absolute MTC_SEC position as the given
        // quarter-frame payload nibble at 25 fps
        let frames = (pos / (MTC_SEC / 25)) % 25;
        let secs = (pos / MTC_SEC) % 60;
        let mins = (pos / (MTC_SEC * 60)) % 60;
        let hours = (pos / (MTC_SEC * 3600)) % 24;
        let fields = [
            frames & 0xf,
            frames >> 4,
            secs & 0xf,
            secs >> 4,
            mins & 0xf,
            mins >> 4,
            hours & 0xf,
            (hours >> 4) | (1 << 1), // 25 fps code
        ];
        fields[index as usize] as u8
    }
}
