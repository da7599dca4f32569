#![allow(dead_code)]

use log::LevelFilter;
use midi_seq::engine::dev::DeviceOps;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::sync::Once;

static LOGGER: Once = Once::new();

pub fn enable_logging() {
    LOGGER.call_once(logger_init)
}

fn logger_init() {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} [{}] - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Warn)
        .init();
}

/// A device backed by two byte vectors: whatever the engine writes is
/// captured, and tests can queue bytes for the engine to read.
pub struct LoopbackDev {
    pub wrote: Rc<RefCell<Vec<u8>>>,
    pub to_read: Rc<RefCell<Vec<u8>>>,
}

impl LoopbackDev {
    pub fn new() -> (Box<LoopbackDev>, Rc<RefCell<Vec<u8>>>) {
        let wrote = Rc::new(RefCell::new(Vec::new()));
        let dev = LoopbackDev {
            wrote: wrote.clone(),
            to_read: Rc::new(RefCell::new(Vec::new())),
        };
        (Box::new(dev), wrote)
    }
}

impl DeviceOps for LoopbackDev {
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
        false
    }
}

/// Strip sysex messages and system real-time bytes, keeping only the
/// voice messages; clock ticks and active-sense bytes interleave with
/// everything on a running engine.
pub fn voice_bytes(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut in_sysex = false;
    for &b in raw {
        if b == 0xf0 {
            in_sysex = true;
            continue;
        }
        if b == 0xf7 {
            in_sysex = false;
            continue;
        }
        if b >= 0xf8 {
            continue;
        }
        if !in_sysex {
            out.push(b);
        }
    }
    out
}

/// True if `needle` occurs as a contiguous run of `haystack`.
pub fn contains_seq(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Position of the first occurrence of `needle` in `haystack`.
pub fn find_seq(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
