//! Plan stream protocol: the phase state machine, the typed message set,
//! and the two wire codecs shared by server and client.
//!
//! The server pushes [`StreamMessage`]s; a client feeds raw bytes into a
//! [`PlanStreamReader`], which splits them into messages and drives its own
//! [`PlanStreamState`] so both sides agree on the phase without any side
//! channel.

pub mod message;
pub mod state;
pub mod wire;

#[cfg(test)]
mod tests;

pub use message::{BuildInfo, StreamMessage};
pub use state::{Phase, PlanStreamState, StreamEvent};
pub use wire::{
    FrameDecoder, JsonLineDecoder, PlanStreamReader, SentinelDecoder, WireFormat, SENTINEL_ABORT,
    SENTINEL_BUILD, SENTINEL_DESCRIBE, SENTINEL_ERROR, SENTINEL_FINISHED, SEPARATOR,
};
