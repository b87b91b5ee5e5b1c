//! Offline rendering to WAV.

use crate::error::RenderError;
use std::path::Path;

/// Write `channels` as an interleaved 32-bit float WAV file.
///
/// Shorter channels are padded with silence to the longest one.
pub fn write_wav(
    path: impl AsRef<Path>,
    channels: &[Vec<f32>],
    sample_rate: u32,
) -> Result<(), RenderError> {
    if channels.is_empty() {
        return Err(RenderError::Empty);
    }
    let spec = hound::WavSpec {
        channels: channels.len() as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;

    let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
    for i in 0..frames {
        for ch in channels {
            writer.write_sample(ch.get(i).copied().unwrap_or(0.0))?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Read a float WAV back as one vector per channel.
pub fn read_wav(path: impl AsRef<Path>) -> Result<(Vec<Vec<f32>>, u32), RenderError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let count = spec.channels as usize;
    let mut channels = vec![Vec::with_capacity(reader.len() as usize / count.max(1)); count];
    for (i, sample) in reader.samples::<f32>().enumerate() {
        channels[i % count].push(sample?);
    }
    Ok((channels, spec.sample_rate))
}
