//! Input decoding
//!
//! Turns a file or an in-memory byte stream into an [`AudioBuffer`] with
//! symphonia. Any container/codec symphonia was built with is accepted; the
//! rest of the crate only ever sees interleaved f32 PCM.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use crate::types::AudioBuffer;

/// Errors raised while decoding input audio
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("No audio track found")]
    NoAudioTrack,

    /// Only mono and stereo are handled
    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(usize),

    #[error("Decoded stream contains no samples")]
    Empty,
}

/// Result type for decoding
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Decode an audio file
pub fn decode_file(path: &Path) -> DecodeResult<AudioBuffer> {
    let file = File::open(path)?;
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    log::info!("Decode: Loading {:?}", path);
    decode_source(Box::new(file), hint)
}

/// Decode audio held in memory
///
/// `extension_hint` (e.g. "mp3") helps the probe but is not required.
pub fn decode_bytes(bytes: &[u8], extension_hint: Option<&str>) -> DecodeResult<AudioBuffer> {
    let mut hint = Hint::new();
    if let Some(ext) = extension_hint {
        hint.with_extension(ext);
    }
    log::info!("Decode: Loading {} bytes from memory", bytes.len());
    decode_source(Box::new(Cursor::new(bytes.to_vec())), hint)
}

fn decode_source(source: Box<dyn MediaSource>, hint: Hint) -> DecodeResult<AudioBuffer> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| match e {
            SymphoniaError::IoError(io) => DecodeError::Io(io),
            other => DecodeError::UnsupportedFormat(other.to_string()),
        })?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::UnsupportedCodec(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut channels: Option<usize> = None;
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut buf_frames = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                log::warn!("Decode: Stream reset requested, stopping at {} samples", samples.len());
                break;
            }
            Err(e) => {
                log::warn!("Decode: Error reading packet: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Decode: Skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => {
                log::warn!("Decode: Error decoding packet: {}", e);
                break;
            }
        };

        let spec = *decoded.spec();
        let count = spec.channels.count();
        if count == 0 || count > 2 {
            return Err(DecodeError::UnsupportedChannels(count));
        }
        if channels.is_none() {
            channels = Some(count);
        }
        if sample_rate.is_none() {
            sample_rate = Some(spec.rate);
        }

        // Packets can grow past the first one's capacity
        let frames = decoded.capacity();
        if sample_buf.is_none() || frames > buf_frames {
            sample_buf = Some(SampleBuffer::new(frames as u64, spec));
            buf_frames = frames;
        }
        if let Some(buf) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }
    }

    let (Some(channels), Some(sample_rate)) = (channels, sample_rate) else {
        return Err(DecodeError::Empty);
    };
    if samples.is_empty() || sample_rate == 0 {
        return Err(DecodeError::Empty);
    }

    let buffer = AudioBuffer::new(samples, sample_rate, channels as u16);
    log::info!(
        "Decode: {} frames, {} Hz, {} ch ({:.2}s)",
        buffer.frames(),
        sample_rate,
        channels,
        buffer.duration_secs()
    );
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::write_wav;

    fn sine(frames: usize, sample_rate: u32, channels: u16) -> AudioBuffer {
        let samples = (0..frames)
            .flat_map(|i| {
                let v = 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sample_rate as f32).sin();
                std::iter::repeat(v).take(channels as usize)
            })
            .collect();
        AudioBuffer::new(samples, sample_rate, channels)
    }

    fn wav_bytes(buffer: &AudioBuffer) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        write_wav(buffer, &mut cursor).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_decode_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let source = sine(4410, 44100, 2);
        std::fs::write(&path, wav_bytes(&source)).unwrap();

        let decoded = decode_file(&path).unwrap();
        assert_eq!(decoded.sample_rate(), 44100);
        assert_eq!(decoded.channels(), 2);
        assert_eq!(decoded.frames(), 4410);
        for (a, b) in source.samples().iter().zip(decoded.samples()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_decode_mono_bytes() {
        let source = sine(800, 8000, 1);
        let decoded = decode_bytes(&wav_bytes(&source), Some("wav")).unwrap();
        assert_eq!(decoded.channels(), 1);
        assert_eq!(decoded.sample_rate(), 8000);
        assert_eq!(decoded.frames(), 800);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = decode_file(Path::new("/definitely/not/here.wav")).unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        assert!(decode_bytes(b"this is not audio at all, just text", Some("wav")).is_err());
        assert!(decode_bytes(&[], None).is_err());
    }
}
