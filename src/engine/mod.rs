//! The real-time engine. Everything mutable at run time (the event
//! tables, the timeout queue, the device registry, the clock, the
//! normalizer, the mixer and the song) is owned by a single
//! [`Engine`] value driven by the embedding event loop. All callbacks
//! (device input, timer, transport requests) are methods on it, run
//! to completion, and flush their output before returning; there are
//! no threads and no locks.

pub mod dev;
pub mod mixout;
pub mod mux;
pub mod norm;
mod song;
pub mod timo;

use crate::core::ev::EvDb;
use crate::song::Song;
use dev::DevTable;
use mixout::MixOut;
use mux::Mux;
use norm::Norm;
use timo::TimoQueue;

pub struct Engine {
    pub evdb: EvDb,
    pub timo: TimoQueue,
    pub devs: DevTable,
    pub mux: Mux,
    pub norm: Norm,
    pub mixout: MixOut,
    pub song: Song,
    /// True between `open` and `close`.
    pub is_open: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Engine {
            evdb: EvDb::new(),
            timo: TimoQueue::new(),
            devs: DevTable::new(),
            mux: Mux::default(),
            norm: Norm::default(),
            mixout: MixOut::default(),
            song: Song::new(),
            is_open: false,
        }
    }
}

impl Engine {
    pub fn new() -> Engine {
        Engine::default()
    }
}
