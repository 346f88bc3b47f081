//! Audio segmentation at quiet points.
//!
//! The pipeline only relies on [`AudioBoundaryDetector`] returning spans that
//! tile the clip; [`SilenceSplitter`] is the built-in energy based detector.

use crate::defaults;
use crate::pipeline::types::{Chunk, Payload, Span};
use crate::segment::SegmentError;
use std::io::{Cursor, Read};
use tracing::debug;

/// Decoded mono PCM audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decode a WAV stream, mixing all channels down to mono.
    pub fn from_wav_reader<R: Read>(reader: R) -> Result<Self, SegmentError> {
        let wav_reader = hound::WavReader::new(reader).map_err(|e| SegmentError::AudioDecode {
            message: format!("Failed to parse WAV data: {}", e),
        })?;

        let spec = wav_reader.spec();
        let channels = spec.channels.max(1) as usize;
        let interleaved = read_samples(wav_reader, spec)?;

        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                    (sum / channels as i32) as i16
                })
                .collect()
        };

        Ok(Self::new(samples, spec.sample_rate))
    }

    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self, SegmentError> {
        Self::from_wav_reader(Cursor::new(bytes))
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Encode a range of this clip as a standalone 16-bit mono WAV file.
    pub fn encode_span(&self, span: Span) -> Result<Vec<u8>, SegmentError> {
        encode_wav(&self.samples[span.start..span.end], self.sample_rate)
    }
}

fn read_samples<R: Read>(
    mut reader: hound::WavReader<R>,
    spec: hound::WavSpec,
) -> Result<Vec<i16>, SegmentError> {
    let decode_err = |e: hound::Error| SegmentError::AudioDecode {
        message: format!("Failed to read WAV samples: {}", e),
    };

    match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(decode_err),
        (hound::SampleFormat::Int, bits) if bits <= 32 => {
            let shift = bits as i32 - 16;
            reader
                .samples::<i32>()
                .map(|s| {
                    s.map(|v| {
                        if shift >= 0 {
                            (v >> shift) as i16
                        } else {
                            (v << -shift) as i16
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(decode_err)
        }
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<Vec<_>, _>>()
            .map_err(decode_err),
        (format, bits) => Err(SegmentError::AudioDecode {
            message: format!("Unsupported WAV format: {:?} {}-bit", format, bits),
        }),
    }
}

/// Encode mono 16-bit PCM samples as a WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, SegmentError> {
    let encode_err = |e: hound::Error| SegmentError::AudioEncode {
        message: e.to_string(),
    };

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(encode_err)?;
        for &sample in samples {
            writer.write_sample(sample).map_err(encode_err)?;
        }
        writer.finalize().map_err(encode_err)?;
    }
    Ok(cursor.into_inner())
}

/// Finds chunk boundaries in an audio clip.
///
/// Implementations must return spans that start at 0, end at the clip
/// length, and are contiguous and non-overlapping.
pub trait AudioBoundaryDetector: Send + Sync {
    fn boundaries(&self, clip: &AudioClip) -> Vec<Span>;
}

/// Configuration for [`SilenceSplitter`].
#[derive(Debug, Clone, PartialEq)]
pub struct SilenceSplitterConfig {
    /// Longest allowed chunk in seconds.
    pub max_chunk_secs: u32,
    /// How far back from each window's end to look for a quiet frame.
    pub search_window_secs: u32,
    /// Frame length for energy measurement.
    pub frame_ms: u32,
}

impl Default for SilenceSplitterConfig {
    fn default() -> Self {
        Self {
            max_chunk_secs: defaults::MAX_AUDIO_SECS,
            search_window_secs: defaults::SEARCH_WINDOW_SECS,
            frame_ms: defaults::SILENCE_FRAME_MS,
        }
    }
}

/// Cuts audio at the quietest frame near each window's end.
#[derive(Debug, Clone, Default)]
pub struct SilenceSplitter {
    config: SilenceSplitterConfig,
}

impl SilenceSplitter {
    pub fn new(config: SilenceSplitterConfig) -> Self {
        Self { config }
    }
}

impl AudioBoundaryDetector for SilenceSplitter {
    fn boundaries(&self, clip: &AudioClip) -> Vec<Span> {
        let total = clip.samples.len();
        let rate = clip.sample_rate as usize;
        // A zero limit would cut every sample into its own chunk.
        let max = (self.config.max_chunk_secs.max(1) as usize * rate).max(1);

        if total <= max {
            return vec![Span::new(0, total)];
        }

        let frame = (self.config.frame_ms as usize * rate / 1000).max(1);
        let search = (self.config.search_window_secs as usize * rate).min(max);

        let mut spans = Vec::new();
        let mut start = 0;
        while total - start > max {
            let limit = start + max;
            let search_from = limit.saturating_sub(search).max(start + 1);
            let cut = quietest_point(&clip.samples, search_from, limit, frame).unwrap_or(limit);
            spans.push(Span::new(start, cut));
            start = cut;
        }
        spans.push(Span::new(start, total));
        spans
    }
}

/// Root mean square energy normalized to 0.0..=1.0.
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Centre of the lowest-energy frame within `[from, to)`.
fn quietest_point(samples: &[i16], from: usize, to: usize, frame: usize) -> Option<usize> {
    if to.saturating_sub(from) < frame {
        return None;
    }

    let step = (frame / 2).max(1);
    let mut best: Option<(f32, usize)> = None;
    let mut offset = from;
    while offset + frame <= to {
        let energy = calculate_rms(&samples[offset..offset + frame]);
        // Ties go to the later frame to keep chunks long.
        if best.is_none_or(|(lowest, _)| energy <= lowest) {
            best = Some((energy, offset + frame / 2));
        }
        offset += step;
    }
    best.map(|(_, centre)| centre)
}

/// Turn a clip into WAV-encoded chunks using `detector` for boundaries.
pub fn segment_audio(
    clip: &AudioClip,
    detector: &dyn AudioBoundaryDetector,
) -> Result<Vec<Chunk>, SegmentError> {
    if clip.samples.is_empty() {
        return Err(SegmentError::EmptyInput);
    }

    let spans = detector.boundaries(clip);
    validate_spans(&spans, clip.samples.len())?;

    let chunks = spans
        .into_iter()
        .enumerate()
        .map(|(index, span)| Ok(Chunk::new(index, Payload::Audio(clip.encode_span(span)?), span)))
        .collect::<Result<Vec<_>, SegmentError>>()?;

    debug!(
        "Segmented {:.1}s of audio into {} chunks",
        clip.duration_secs(),
        chunks.len()
    );
    Ok(chunks)
}

fn validate_spans(spans: &[Span], total: usize) -> Result<(), SegmentError> {
    let invalid = |message: String| Err(SegmentError::InvalidBoundaries { message });

    let mut expected_start = 0;
    for span in spans {
        if span.start != expected_start {
            return invalid(format!(
                "span starts at {} but previous ended at {}",
                span.start, expected_start
            ));
        }
        if span.is_empty() {
            return invalid(format!("empty span at {}", span.start));
        }
        expected_start = span.end;
    }
    if expected_start != total {
        return invalid(format!(
            "spans end at {} but clip has {} samples",
            expected_start, total
        ));
    }
    Ok(())
}
