use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Rate the transcription service works best with.
pub const TRANSCRIPTION_SAMPLE_RATE: u32 = 16_000;
const MIN_CLIENT_SAMPLE_RATE: u32 = 8_000;
const MAX_CLIENT_SAMPLE_RATE: u32 = 192_000;
/// Longest accepted recording.
pub const MAX_RECORDING_SECS: usize = 120;
const RESAMPLER_CHUNK: usize = 1024;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AudioError {
    #[error("recording is not valid base64")]
    InvalidEncoding,
    #[error("recording is empty")]
    Empty,
    #[error("unsupported sample rate {0} Hz")]
    UnsupportedSampleRate(u32),
    #[error("recording is too long")]
    TooLong,
    #[error("resampling failed: {0}")]
    Resample(String),
}

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> Result<FastFixedIn<f32>, AudioError> {
    FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )
    .map_err(|e| AudioError::Resample(e.to_string()))
}

/// Decodes base64 little-endian PCM16 into f32 samples in `-1.0..=1.0`.
/// A trailing odd byte is ignored.
pub fn decode_f32_from_base64_i16(base64_fragment: &str) -> Result<Vec<f32>, AudioError> {
    let pcm16_bytes = base64::engine::general_purpose::STANDARD
        .decode(base64_fragment.trim())
        .map_err(|_| AudioError::InvalidEncoding)?;
    Ok(pcm16_bytes
        .chunks_exact(2)
        .map(|chunk| {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect())
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Mono resampling. The resampler's delay is trimmed so the output lines up
/// with the input.
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>, AudioError> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = create_resampler(from as f64, to as f64, RESAMPLER_CHUNK)?;
    let expected = (samples.len() as f64 * to as f64 / from as f64).round() as usize;
    let mut out = Vec::with_capacity(expected + RESAMPLER_CHUNK);
    let err = |e: rubato::ResampleError| AudioError::Resample(e.to_string());

    let mut pos = 0;
    while samples.len() - pos >= resampler.input_frames_next() {
        let frames = resampler.input_frames_next();
        let input: [&[f32]; 1] = [&samples[pos..pos + frames]];
        let chunk = resampler.process(&input[..], None).map_err(err)?;
        out.extend_from_slice(&chunk[0]);
        pos += frames;
    }
    if pos < samples.len() {
        let input: [&[f32]; 1] = [&samples[pos..]];
        let chunk = resampler
            .process_partial(Some(&input[..]), None)
            .map_err(err)?;
        out.extend_from_slice(&chunk[0]);
    }
    let tail = resampler
        .process_partial::<&[f32]>(None, None)
        .map_err(err)?;
    out.extend_from_slice(&tail[0]);

    let delay = resampler.output_delay().min(out.len());
    out.drain(..delay);
    out.truncate(expected);
    Ok(out)
}

/// Wraps mono PCM16 samples in a WAV container.
pub fn wav_from_i16(samples: &[i16], sample_rate: u32) -> Bytes {
    let data_len = (samples.len() * 2) as u32;
    let mut wav = BytesMut::with_capacity(44 + data_len as usize);
    wav.put_slice(b"RIFF");
    wav.put_u32_le(36 + data_len);
    wav.put_slice(b"WAVE");
    wav.put_slice(b"fmt ");
    wav.put_u32_le(16);
    wav.put_u16_le(1); // PCM
    wav.put_u16_le(1); // mono
    wav.put_u32_le(sample_rate);
    wav.put_u32_le(sample_rate * 2);
    wav.put_u16_le(2);
    wav.put_u16_le(16);
    wav.put_slice(b"data");
    wav.put_u32_le(data_len);
    for sample in samples {
        wav.put_i16_le(*sample);
    }
    wav.freeze()
}

/// Turns a client recording (base64 PCM16 at `sample_rate`) into a 16 kHz WAV
/// ready for transcription.
pub fn voice_to_wav(audio_base64: &str, sample_rate: u32) -> Result<Bytes, AudioError> {
    if !(MIN_CLIENT_SAMPLE_RATE..=MAX_CLIENT_SAMPLE_RATE).contains(&sample_rate) {
        return Err(AudioError::UnsupportedSampleRate(sample_rate));
    }
    let samples = decode_f32_from_base64_i16(audio_base64)?;
    if samples.is_empty() {
        return Err(AudioError::Empty);
    }
    if samples.len() > sample_rate as usize * MAX_RECORDING_SECS {
        return Err(AudioError::TooLong);
    }
    let resampled = resample(&samples, sample_rate, TRANSCRIPTION_SAMPLE_RATE)?;
    Ok(wav_from_i16(
        &convert_f32_to_i16(&resampled),
        TRANSCRIPTION_SAMPLE_RATE,
    ))
}
