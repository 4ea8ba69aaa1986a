pub mod codec;
pub mod constants;
pub mod params;
pub mod pipeline;

pub use codec::OpusFrameEncoder;
pub use params::{FrameDuration, OpusParams};
pub use pipeline::{DecoderCommand, Transcoder};
