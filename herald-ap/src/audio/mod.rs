//! Audio decode and output
//!
//! Files are decoded whole into interleaved stereo f32, resampled to the
//! output device rate and played from memory. Announcement clips are short,
//! so no streaming decode is needed.

pub mod decoder;
pub mod output;
pub mod resampler;

pub use decoder::{decode_file, DecodedClip};
pub use output::{OutputDevice, PlaybackCursor};
pub use resampler::resample;

/// Channel count of every decoded clip
pub const CLIP_CHANNELS: u16 = 2;
