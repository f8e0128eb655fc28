use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use tracing::debug;

use crate::{Speech, VoiceError};

/// Encode speech as a mono 16-bit PCM WAV file.
pub fn encode_wav(speech: &Speech) -> Result<Vec<u8>, VoiceError> {
    if speech.samples.is_empty() {
        return Err(VoiceError::EmptyAudio);
    }
    let spec = WavSpec {
        channels: 1,
        sample_rate: speech.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for sample in &speech.samples {
            writer.write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Decode a WAV file into mono float samples, averaging multi-channel input.
///
/// WAV written to a pipe keeps the placeholder sizes its writer could not seek
/// back to patch, so the data chunk ends wherever the bytes do.
pub fn decode_wav(bytes: &[u8]) -> Result<Speech, VoiceError> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => read_available(reader.samples::<f32>())?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1) as u32)) as f32;
            read_available(reader.samples::<i32>().map(|s| s.map(|v| v as f32 / scale)))?
        }
    };

    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };
    if samples.is_empty() {
        return Err(VoiceError::EmptyAudio);
    }
    Ok(Speech {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Collect samples up to the first read error. The error only surfaces when
/// nothing could be read at all.
fn read_available<I>(samples: I) -> Result<Vec<f32>, hound::Error>
where
    I: Iterator<Item = Result<f32, hound::Error>>,
{
    let mut out = Vec::new();
    for sample in samples {
        match sample {
            Ok(value) => out.push(value),
            Err(err) if out.is_empty() => return Err(err),
            Err(err) => {
                debug!("wav data ends after {} samples: {err}", out.len());
                break;
            }
        }
    }
    Ok(out)
}

/// Mono PCM16 WAV with the header `espeak-ng --stdout` writes to a pipe: the
/// RIFF and data sizes are left at their `0x7ffff000` placeholder.
#[cfg(test)]
pub(crate) fn streamed_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    const PLACEHOLDER: u32 = 0x7fff_f000;
    let mut wav = Vec::new();
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(PLACEHOLDER + 36).to_le_bytes());
    wav.extend_from_slice(b"WAVEfmt ");
    wav.extend_from_slice(&16_u32.to_le_bytes());
    wav.extend_from_slice(&1_u16.to_le_bytes());
    wav.extend_from_slice(&1_u16.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    wav.extend_from_slice(&2_u16.to_le_bytes());
    wav.extend_from_slice(&16_u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&PLACEHOLDER.to_le_bytes());
    for sample in samples {
        wav.extend_from_slice(&sample.to_le_bytes());
    }
    wav
}
