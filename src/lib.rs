pub mod audio;
pub mod common;
pub mod configs;
pub mod gateway;
pub mod playback;
pub mod server;
