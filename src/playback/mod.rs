//! Clip playback on top of the registry: a bounded queue of pre-encoded
//! clips and the driver that joins, plays and leaves.

pub mod queue;

pub use queue::{PLAY_QUEUE_CAPACITY, PlayQueue, Player, QueuedClip};
