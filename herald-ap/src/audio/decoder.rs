//! Audio decoder using symphonia
//!
//! Decodes any format symphonia supports to interleaved stereo f32.

use crate::error::{Error, Result};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// A fully decoded clip
#[derive(Debug, Clone)]
pub struct DecodedClip {
    /// Interleaved stereo samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedClip {
    pub fn frames(&self) -> usize {
        self.samples.len() / super::CLIP_CHANNELS as usize
    }
}

/// Decode an entire audio file
///
/// Mono sources are duplicated to both channels; channels beyond the first
/// two are dropped.
pub fn decode_file(path: &Path) -> Result<DecodedClip> {
    debug!("Decoding file: {}", path.display());

    let file = std::fs::File::open(path)
        .map_err(|e| Error::Playback(format!("Failed to open file {}: {}", path.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Playback(format!("Unsupported format {}: {}", path.display(), e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Playback(format!("No audio track in {}", path.display())))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::Playback("Sample rate not found".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Playback(format!("Failed to create decoder: {}", e)))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                warn!("Error reading packet: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                push_stereo(buf.samples(), spec.channels.count(), &mut samples);
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Decode error: {}", e);
            }
            Err(e) => {
                return Err(Error::Playback(format!(
                    "Decoding {} failed: {}",
                    path.display(),
                    e
                )))
            }
        }
    }

    if samples.is_empty() {
        return Err(Error::Playback(format!("{} contains no audio", path.display())));
    }

    debug!(
        "Decoded {} frames at {}Hz from {}",
        samples.len() / 2,
        sample_rate,
        path.display()
    );
    Ok(DecodedClip {
        samples,
        sample_rate,
    })
}

/// Append interleaved `channels`-wide samples as stereo
fn push_stereo(input: &[f32], channels: usize, output: &mut Vec<f32>) {
    match channels {
        0 => {}
        1 => {
            output.reserve(input.len() * 2);
            for &s in input {
                output.push(s);
                output.push(s);
            }
        }
        n => {
            output.reserve(input.len() / n * 2);
            for frame in input.chunks_exact(n) {
                output.push(frame[0]);
                output.push(frame[1]);
            }
        }
    }
}
