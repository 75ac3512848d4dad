//! Audio decoding and canonical WAV handling.

pub mod decode;
pub mod wav;

pub use decode::{DecodedAudio, codec_available, decode_file};
