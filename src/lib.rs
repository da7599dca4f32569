/*!
`midi_seq` is the scheduling and state-tracking core of a MIDI
sequencer/filter: it drives playback, recording and live pass-through
of MIDI events while maintaining a coherent picture of what is
currently sounding on every device, so transport commands, tempo
changes, muting and overlapping sources never leave hanging notes or
stuck controllers.

The crate is organized in three layers:

- [`core`] is the canonical event model: context-free events, event
  ranges, frame states and the conversions from and to raw MIDI.
- [`song`] is the song model: delta-time tracks, cursors, the meta
  track, the undo history.
- [`engine`] is the real-time side: the device registry, the tick
  clock with its transport phases, the input normalizer, the priority
  mixer, and the song playback/record logic, all owned by a single
  [`engine::Engine`] driven by the embedding poll loop.
!*/

#[macro_use]
mod error;
#[macro_use]
mod clamp;

pub mod constants;
pub mod core;
pub mod engine;
pub mod song;

pub use error::{Error, Result};
