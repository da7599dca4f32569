//! The multiplexer: drives the tick clock and fans events in and out
//! of the devices.
//!
//! The clock unit is the 24th of a microsecond, so the tempo is kept
//! with the same accuracy as in standard MIDI files. The transport
//! moves through the phases STARTWAIT -> START -> FIRST -> NEXT -> STOP:
//! waiting for a start event, waiting for the first tick, playing the
//! first tick, steady state, idle. The tick source is either the
//! internal timer, a device sending MIDI clock (`clksrc`), or a
//! device sending MTC (`mtcsrc`); the three are mutually exclusive.

use crate::constants::*;
use crate::core::conv::{pack_ev, unpack_ev};
use crate::core::ev::Ev;
use crate::core::state::StateList;
use crate::engine::dev::{DevIn, DevMode, MtcCmd, DEV_ISENSTO};
use crate::engine::Engine;
use crate::song::Loc;
use log::{debug, warn};

/// Transport phase of the tick clock.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum MuxPhase {
    /// Armed, waiting for a start event.
    StartWait = 0,
    /// Start received, waiting for the first tick.
    Start = 1,
    /// First tick consumed, music starts here.
    First = 2,
    /// Steady state, each tick advances the song.
    Next = 3,
    /// Idle, sync events ignored.
    Stop = 4,
}

/// Delay between the internally generated start event and the first
/// tick: one tick at 30 bpm.
pub const MUX_START_DELAY: u64 = (USEC24_PER_SEC as u64) / 3;

/// Clock and conversion state of the multiplexer.
#[derive(Debug)]
pub struct Mux {
    pub phase: MuxPhase,
    /// Phase to restore when an external stop arrives.
    pub reqphase: MuxPhase,
    /// Sequencer resolution, in ticks per whole note.
    pub ticrate: u32,
    /// Current tick period, in 1/24 µs.
    pub ticlength: u64,
    /// Time into the current tick / deadline of the next one.
    pub curpos: u64,
    pub nextpos: u64,
    pub curtic: u32,
    /// Monotonic time since the engine opened, in 1/24 µs.
    pub wallclock: u64,
    /// Don't generate the internal start; wait for the tap event.
    pub manualstart: bool,
    /// Canonical-conversion contexts, per direction.
    pub istate: StateList,
    pub ostate: StateList,
}

impl Default for Mux {
    fn default() -> Self {
        Mux {
            phase: MuxPhase::Stop,
            reqphase: MuxPhase::Stop,
            ticrate: DEFAULT_TPU,
            ticlength: DEFAULT_USEC24 as u64,
            curpos: 0,
            nextpos: 0,
            curtic: 0,
            wallclock: 0,
            manualstart: false,
            istate: StateList::new(),
            ostate: StateList::new(),
        }
    }
}

/// Where a device's poll entries landed in the shared pollfd vector.
#[derive(Clone, Copy, Debug)]
pub struct PollMap {
    pub unit: u8,
    pub start: usize,
    pub count: usize,
}

impl Engine {
    /// Open all devices and start the clock machinery. Must be called
    /// before anything moves.
    pub fn open(&mut self) {
        self.timo.clear();
        self.mux = Mux::default();
        self.mixout_start();
        self.norm_start();
        for dev in self.devs.iter_mut() {
            dev.ticdelta = dev.ticrate;
            dev.isensto = 0;
            dev.osensto = crate::engine::dev::DEV_OSENSTO;
            dev.open();
        }
        self.is_open = true;
    }

    /// Flush and close all devices, quiescing pending frames.
    pub fn close(&mut self) {
        self.norm_stop();
        self.mixout_stop();
        self.flush();
        for dev in self.devs.iter_mut() {
            dev.close();
        }
        self.is_open = false;
        self.mux.istate.clear();
        self.mux.ostate.clear();
        self.timo.clear();
    }

    pub(crate) fn chgphase(&mut self, phase: MuxPhase) {
        if self.mux.phase != phase {
            debug!("mux: phase {:?} -> {:?}", self.mux.phase, phase);
        }
        self.mux.phase = phase;
    }

    /// Send a tick to all devices transmitting real-time events,
    /// scaled to each device's resolution.
    fn send_tic(&mut self) {
        let clksrc = self.devs.clksrc;
        let ticrate = self.mux.ticrate;
        for dev in self.devs.iter_mut() {
            if dev.sendclk && Some(dev.unit) != clksrc {
                while dev.ticdelta >= ticrate {
                    dev.put_tic();
                    dev.ticdelta -= ticrate;
                }
                dev.ticdelta += dev.ticrate;
            }
        }
    }

    fn send_start(&mut self) {
        let clksrc = self.devs.clksrc;
        for dev in self.devs.iter_mut() {
            if dev.sendclk && Some(dev.unit) != clksrc {
                dev.ticdelta = dev.ticrate;
                // send a spurious tick just before the start event in
                // order to notify that we are the master
                dev.put_tic();
                dev.put_start();
            }
        }
    }

    fn send_stop(&mut self) {
        let clksrc = self.devs.clksrc;
        for dev in self.devs.iter_mut() {
            if dev.sendclk && Some(dev.unit) != clksrc {
                dev.put_stop();
            }
        }
    }

    /// Send a voice event to the device it addresses; this is the only
    /// route to the wire.
    pub fn put_ev(&mut self, ev: &Ev) {
        if !ev.is_voice() && !ev.is_sx() {
            panic!("put_ev: {}: only voice events allowed", ev);
        }
        let (oxctlset, oevset) = match self.devs.by_unit(ev.dev) {
            Some(dev) => (dev.oxctlset, dev.oevset),
            None => return,
        };
        let revs = unpack_ev(&mut self.mux.ostate, oxctlset, oevset, ev);
        let db = &self.evdb;
        let dev = self.devs.by_unit_mut(ev.dev).unwrap();
        for rev in revs.iter() {
            dev.put_ev(db, rev);
        }
    }

    /// Send raw bytes (sysex) to the given device.
    pub fn send_raw(&mut self, unit: u8, buf: &[u8]) {
        if buf.is_empty() {
            return;
        }
        if let Some(dev) = self.devs.by_unit_mut(unit) {
            dev.send_raw(buf);
        }
    }

    /// Flush the output buffers of all devices.
    pub fn flush(&mut self) {
        for dev in self.devs.iter_mut() {
            dev.flush();
        }
    }

    pub fn phase(&self) -> MuxPhase {
        self.mux.phase
    }

    /// Change the tempo; the tick in progress is stretched or
    /// shrunk accordingly.
    pub fn change_tempo(&mut self, ticlength: u64) {
        if self.mux.phase == MuxPhase::First || self.mux.phase == MuxPhase::Next {
            self.mux.nextpos += ticlength;
            self.mux.nextpos -= self.mux.ticlength;
        }
        self.mux.ticlength = ticlength;
    }

    pub fn change_ticrate(&mut self, tpu: u32) {
        self.mux.ticrate = tpu;
    }

    /*
     * MTC-driven clock: used both by the external MTC source and by
     * the internal timer, which emulates one
     */

    /// The MTC timer started (full frame message or internal start).
    pub(crate) fn mtc_start(&mut self, mtcpos: u32) {
        if self.devs.clksrc.is_some() {
            return;
        }
        if self.mux.phase >= MuxPhase::Start && self.mux.phase <= MuxPhase::Next {
            debug!("mux: mtc start triggered stop");
            self.mtc_stop();
        }
        if self.mux.phase == MuxPhase::Stop {
            debug!("mux: ignored mtc start (stopped)");
            return;
        }
        // an external source dictates the position; the internal one
        // has already been set up by the start request
        if self.devs.mtcsrc.is_some() {
            self.mux.nextpos = self.mux.ticlength;
            self.mux.curpos = self.song_gotocb(Loc::Mtc, mtcpos);
            if self.mux.curpos >= self.mux.ticlength {
                warn!("mux: mtc offset larger than one tick");
            }
        }
        debug!("mux: generated clock start");
        self.send_start();
        self.clock_start();
        self.flush();
    }

    /// The MTC timer moved `delta` 1/24 µs forward.
    pub(crate) fn mtc_tick(&mut self, delta: u32) {
        if self.devs.clksrc.is_some() {
            return;
        }
        self.mux.curpos += delta as u64;
        while self.mux.curpos >= self.mux.nextpos {
            self.mux.curpos -= self.mux.nextpos;
            self.mux.nextpos = self.mux.ticlength;
            self.send_tic();
            self.clock_tic();
            self.flush();
        }
    }

    /// The MTC timer stopped.
    pub(crate) fn mtc_stop(&mut self) {
        if self.devs.clksrc.is_some() {
            return;
        }
        if self.mux.phase >= MuxPhase::Start {
            debug!("mux: generated clock stop");
            self.send_stop();
            self.clock_stop();
            self.flush();
        }
    }

    /*
     * tick clock callbacks, whatever the source
     */

    /// A tick arrived (external MIDI clock byte or MTC division).
    pub(crate) fn clock_tic(&mut self) {
        loop {
            if let Some(cs) = self.devs.clksrc {
                let ticrate = self.mux.ticrate;
                let dev = self.devs.by_unit_mut(cs).unwrap();
                if dev.ticdelta < dev.ticrate {
                    dev.ticdelta += ticrate;
                    break;
                }
            }
            if self.mux.phase == MuxPhase::First {
                self.chgphase(MuxPhase::Next);
            } else if self.mux.phase == MuxPhase::Start {
                self.chgphase(MuxPhase::First);
            }
            if self.mux.phase == MuxPhase::Next {
                self.mux.curtic += 1;
                self.song_movecb();
            } else if self.mux.phase == MuxPhase::First {
                self.mux.curtic = 0;
                self.song_startcb();
            }
            let cs = match self.devs.clksrc {
                None => break,
                Some(cs) => cs,
            };
            let dev = self.devs.by_unit_mut(cs).unwrap();
            let ticrate = dev.ticrate;
            dev.ticdelta -= ticrate;
        }
    }

    /// A start event arrived.
    pub(crate) fn clock_start(&mut self) {
        debug!("mux: got start event");
        if self.mux.phase != MuxPhase::StartWait {
            warn!("mux: ignored start event (not armed)");
            return;
        }
        // started by an external device: move to the beginning
        if self.devs.clksrc.is_some() {
            self.mux.curpos = 0;
            self.mux.nextpos = self.mux.ticlength;
            self.song_gotocb(Loc::Meas, 0);
        }
        self.chgphase(MuxPhase::Start);
    }

    /// A stop event arrived.
    pub(crate) fn clock_stop(&mut self) {
        debug!("mux: got stop event");
        let reqphase = self.mux.reqphase;
        self.chgphase(reqphase);
        self.song_stopcb();
    }

    /// An active-sense byte arrived: arm the input watchdog.
    pub(crate) fn sense_in(&mut self, unit: u8) {
        if let Some(dev) = self.devs.by_unit_mut(unit) {
            if dev.isensto == 0 {
                debug!("dev {}: sensing enabled", unit);
                dev.isensto = DEV_ISENSTO;
            }
        }
    }

    /// A voice event arrived: collapse it to canonical form and pass
    /// it to the normalizer.
    pub(crate) fn ev_in(&mut self, unit: u8, ev: &Ev) {
        let (ixctlset, ievset) = match self.devs.by_unit(unit) {
            Some(dev) => (dev.ixctlset, dev.ievset),
            None => return,
        };
        if let Some(rev) = pack_ev(&mut self.mux.istate, ixctlset, ievset, ev) {
            self.norm_evcb(&rev);
        }
    }

    /// A complete sysex message arrived: real-time MMC messages are
    /// discarded, user patterns are decoded into events, anything
    /// else goes to the song (recording).
    pub(crate) fn sysex_in(&mut self, unit: u8, data: Vec<u8>) {
        // discard real-time messages, they should not be recorded
        if data.len() >= 6 && data[0] == 0xf0 && data[1] == 0x7f && data[3] == 1 {
            return;
        }
        if let Some(ev) = self.match_pattern(unit, &data) {
            self.norm_evcb(&ev);
            return;
        }
        self.song_sysexcb(unit, data);
    }

    fn match_pattern(&self, unit: u8, data: &[u8]) -> Option<Ev> {
        use crate::core::ev::{Cmd, PAT_V0_HI, PAT_V0_LO, PAT_V1_HI, PAT_V1_LO};
        'pattern: for index in Cmd::Pat0.index()..crate::core::ev::EV_NUMCMD {
            let cmd = Cmd::from_index(index).unwrap();
            let pattern = match self.evdb.info(cmd).pattern.as_ref() {
                Some(p) => p,
                None => continue,
            };
            let mut ev = Ev::new(cmd, unit, 0, 0, 0);
            let mut bytes = data.iter();
            for &p in pattern.iter() {
                let &q = match bytes.next() {
                    Some(q) => q,
                    None => continue 'pattern,
                };
                match p {
                    PAT_V0_HI => ev.v0 |= (q as u32) << 7,
                    PAT_V0_LO => ev.v0 |= q as u32,
                    PAT_V1_HI => ev.v1 |= (q as u32) << 7,
                    PAT_V1_LO => ev.v1 |= q as u32,
                    _ => {
                        if p != q {
                            continue 'pattern;
                        }
                    }
                }
            }
            if bytes.next().is_none() {
                return Some(ev);
            }
        }
        None
    }

    /// An input device failed: quiesce everything it may have left
    /// sounding.
    pub fn dev_error(&mut self, _unit: u8) {
        self.norm_shut();
        self.flush();
    }

    /*
     * transport requests
     */

    /// Arm the clock: wait for a start event, or generate one if we
    /// are the master. With `manual`, the internal start waits for
    /// the tap event.
    pub fn start_req(&mut self, manual: bool) {
        self.mux.reqphase = MuxPhase::StartWait;
        if self.mux.phase != MuxPhase::Stop {
            panic!("start_req: bad state");
        }
        self.chgphase(MuxPhase::StartWait);
        self.mux.manualstart = manual;
        if self.devs.clksrc.is_none() && self.devs.mtcsrc.is_none() {
            self.mux.curpos = 0;
            self.mux.nextpos = MUX_START_DELAY;
            if !manual {
                debug!("mux: generated mtc start");
                self.mtc_start(0);
            }
        } else {
            self.mux.curpos = 0;
            self.mux.nextpos = self.mux.ticlength;
        }
        const MMC_START: [u8; 6] = [0xf0, 0x7f, 0x7f, 0x06, 0x02, 0xf7];
        for dev in self.devs.iter_mut() {
            if dev.sendmmc {
                dev.send_raw(&MMC_START);
            }
        }
    }

    /// Stop the clock.
    pub fn stop_req(&mut self) {
        self.mux.reqphase = MuxPhase::Stop;
        if self.mux.phase > MuxPhase::Start && self.mux.phase < MuxPhase::Stop {
            self.send_stop();
        }
        if self.mux.phase < MuxPhase::Stop {
            self.clock_stop();
        }
        const MMC_STOP: [u8; 6] = [0xf0, 0x7f, 0x7f, 0x06, 0x01, 0xf7];
        for dev in self.devs.iter_mut() {
            if dev.sendmmc {
                dev.send_raw(&MMC_STOP);
            }
        }
    }

    /// Ask the MTC master to relocate; the actual relocation happens
    /// when its full-frame message comes back.
    pub fn goto_req(&mut self, mtcpos: u32) {
        let reloc: [u8; 13] = [
            0xf0,
            0x7f,
            0x7f,
            0x06,
            0x44,
            0x06,
            0x01,
            ((mtcpos / (3600 * MTC_SEC)) % 24) as u8,
            ((mtcpos / (60 * MTC_SEC)) % 60) as u8,
            ((mtcpos / MTC_SEC) % 60) as u8,
            ((mtcpos / (MTC_SEC / 24)) % 24) as u8,
            ((mtcpos / (MTC_SEC / 24 / 100)) % 100) as u8,
            0xf7,
        ];
        for dev in self.devs.iter_mut() {
            if dev.sendmmc {
                dev.send_raw(&reloc);
            }
        }
    }

    /*
     * timer and input plumbing
     */

    /// The periodic timer elapsed by `delta` 1/24 µs: fire timeouts,
    /// maintain the sense and MTC watchdogs, and drive the internal
    /// clock when no external source is configured.
    pub fn timer_tick(&mut self, delta: u32) {
        self.mux.wallclock += delta as u64;

        for kind in self.timo.update(delta) {
            self.dispatch_timo(kind);
        }

        let mut acks: Vec<u8> = Vec::new();
        let mut mtc_expired = false;
        let mtcsrc = self.devs.mtcsrc;
        for dev in self.devs.iter_mut() {
            if dev.isensto > 0 {
                if dev.isensto <= delta {
                    dev.isensto = 0;
                    warn!("dev {}: sensing timeout, disabled", dev.unit);
                } else {
                    dev.isensto -= delta;
                }
            }
            if dev.osensto > 0 {
                if dev.osensto <= delta {
                    acks.push(dev.unit);
                } else {
                    dev.osensto -= delta;
                }
            }
            if dev.imtc.timo > 0 {
                if dev.imtc.timo <= delta {
                    dev.imtc.timo = 0;
                    dev.imtc.expire();
                    if Some(dev.unit) == mtcsrc {
                        mtc_expired = true;
                    }
                } else {
                    dev.imtc.timo -= delta;
                }
            }
        }
        for unit in acks {
            if let Some(dev) = self.devs.by_unit_mut(unit) {
                dev.put_ack();
                dev.flush();
                dev.osensto = crate::engine::dev::DEV_OSENSTO;
            }
        }
        if mtc_expired {
            self.mtc_stop();
        }

        // no external source: emulate the MTC timer internally
        if self.devs.mtcsrc.is_none() && self.devs.clksrc.is_none() {
            match self.mux.phase {
                MuxPhase::Start => {
                    self.mux.curpos += delta as u64;
                    if self.mux.curpos >= self.mux.nextpos {
                        self.mux.curpos = 0;
                        self.mux.nextpos = 0;
                        self.mtc_tick(0);
                    }
                }
                MuxPhase::First | MuxPhase::Next => {
                    self.mtc_tick(delta);
                }
                // STARTWAIT only persists while a manual (tap) start
                // is pending
                MuxPhase::StartWait | MuxPhase::Stop => {}
            }
        }
    }

    fn dispatch_timo(&mut self, kind: crate::engine::timo::TimoKind) {
        use crate::engine::timo::TimoKind;
        match kind {
            TimoKind::NormFlush => self.norm_timo_cb(),
            TimoKind::MixoutPurge => self.mixout_timo_cb(),
            TimoKind::MetroClickOff => self.metro_click_off(),
        }
    }

    /// Decode a chunk of bytes read from the given device and route
    /// the content.
    pub fn dev_input(&mut self, unit: u8, buf: &[u8]) {
        let items = match self.devs.by_unit_mut(unit) {
            Some(dev) => dev.input(buf),
            None => return,
        };
        let clksrc = self.devs.clksrc;
        let mtcsrc = self.devs.mtcsrc;
        for item in items {
            match item {
                DevIn::Tic => {
                    if clksrc == Some(unit) {
                        self.clock_tic();
                    }
                }
                DevIn::Start => {
                    if clksrc == Some(unit) {
                        let dev = self.devs.by_unit_mut(unit).unwrap();
                        dev.ticdelta = dev.ticrate;
                        self.clock_start();
                    }
                }
                DevIn::Stop => {
                    if clksrc == Some(unit) {
                        self.clock_stop();
                    }
                }
                DevIn::Ack => self.sense_in(unit),
                DevIn::Ev(ev) => self.ev_in(unit, &ev),
                DevIn::Qframe(data) => {
                    if mtcsrc == Some(unit) {
                        let cmds = self.devs.by_unit_mut(unit).unwrap().imtc.tick(data);
                        for cmd in cmds {
                            self.apply_mtc(cmd);
                        }
                    }
                }
                DevIn::Sysex(data) => {
                    if mtcsrc == Some(unit) {
                        let cmd = self.devs.by_unit_mut(unit).unwrap().imtc.full(&data);
                        if let Some(cmd) = cmd {
                            self.apply_mtc(cmd);
                        }
                    }
                    self.sysex_in(unit, data);
                }
            }
        }
    }

    fn apply_mtc(&mut self, cmd: MtcCmd) {
        match cmd {
            MtcCmd::Tick(delta) => self.mtc_tick(delta),
            MtcCmd::Start(pos) => self.mtc_start(pos),
            MtcCmd::Stop => self.mtc_stop(),
        }
    }

    /// Fill the pollfd vector with the descriptors of all readable
    /// devices; the caller polls and hands the result to
    /// [`Engine::dispatch_pollfds`].
    pub fn fill_pollfds(&mut self, pfds: &mut Vec<libc::pollfd>) -> Vec<PollMap> {
        let mut map = Vec::new();
        for dev in self.devs.iter() {
            if !dev.mode.contains(DevMode::IN) || dev.eof {
                continue;
            }
            let start = pfds.len();
            let count = dev.pollfd(pfds, libc::POLLIN);
            map.push(PollMap { unit: dev.unit, start, count });
        }
        map
    }

    /// Read and decode the devices `poll(2)` flagged as ready.
    pub fn dispatch_pollfds(&mut self, map: &[PollMap], pfds: &[libc::pollfd]) {
        let mut buf = [0u8; 1024];
        for m in map {
            let slice = &pfds[m.start..m.start + m.count];
            let (revents, nread, eof) = {
                let dev = match self.devs.by_unit_mut(m.unit) {
                    Some(dev) => dev,
                    None => continue,
                };
                let revents = dev.revents(slice);
                if revents & libc::POLLIN != 0 {
                    let n = dev.read(&mut buf);
                    (revents, n, dev.eof)
                } else {
                    (revents, 0, dev.eof)
                }
            };
            if revents & libc::POLLIN != 0 {
                if eof {
                    self.dev_error(m.unit);
                    continue;
                }
                if let Some(dev) = self.devs.by_unit_mut(m.unit) {
                    if dev.isensto > 0 {
                        dev.isensto = DEV_ISENSTO;
                    }
                }
                let data = buf[..nread].to_vec();
                self.dev_input(m.unit, &data);
            }
            if revents & libc::POLLHUP != 0 {
                if let Some(dev) = self.devs.by_unit_mut(m.unit) {
                    dev.eof = true;
                }
                self.dev_error(m.unit);
            }
        }
    }
}
