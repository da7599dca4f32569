/*!
The `core` module holds the context-free event model and the stream
state machinery built on it: canonical events and their metadata
tables, event ranges, frame states, the raw ⇄ canonical codec and the
rule-based filter. Nothing here knows about devices, clocks or songs.
!*/

pub mod conv;
pub mod ev;
pub mod filt;
pub mod spec;
pub mod state;

pub use conv::{pack_ev, unpack_ev, ConvFlags};
pub use ev::{ev_match, Cmd, Ev, EvDb, Phase};
pub use filt::Filt;
pub use spec::EvSpec;
pub use state::{State, StateFlags, StateList};
