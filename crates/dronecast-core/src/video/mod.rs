pub mod decoder;
pub mod ffmpeg;
pub mod frame;
pub mod slot;
pub mod source;
pub mod worker;
