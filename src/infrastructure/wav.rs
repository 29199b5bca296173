use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::domain::PracticeError;

/// MIME type of clips produced by the recorder.
pub const WAV_MIME: &str = "audio/wav";

/// Basic facts about a decodable clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipInfo {
    pub sample_rate: u32,
    pub frames: u32,
    pub duration_secs: f32,
}

/// Encode float samples as little-endian PCM16 bytes.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let value = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn mono_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Wrap recorded PCM16 chunks into a single WAV clip.
pub fn assemble_wav(chunks: &[Vec<u8>], sample_rate: u32) -> Result<Vec<u8>, PracticeError> {
    let pcm: Vec<u8> = chunks.iter().flatten().copied().collect();
    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = WavWriter::new(&mut cursor, mono_spec(sample_rate))?;
        for pair in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Encode float samples directly into a WAV clip.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, PracticeError> {
    assemble_wav(&[encode_pcm16(samples)], sample_rate)
}

/// Fully decode a clip to verify it is playable and report its duration.
pub fn verify_wav(bytes: &[u8]) -> Result<ClipInfo, PracticeError> {
    let (samples, sample_rate) = decode_wav(bytes)?;
    if sample_rate == 0 {
        return Err(PracticeError::DecodeOrValidationFailure(
            "clip reports a zero sample rate".to_string(),
        ));
    }
    let frames = samples.len() as u32;
    Ok(ClipInfo {
        sample_rate,
        frames,
        duration_secs: frames as f32 / sample_rate as f32,
    })
}

/// Decode a WAV clip into mono float samples.
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32), PracticeError> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let mono = if channels > 1 {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        interleaved
    };
    Ok((mono, spec.sample_rate))
}
