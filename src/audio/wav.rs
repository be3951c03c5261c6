//! RIFF/WAVE parsing and merging.
//!
//! Segments are parsed into borrowed views over their `fmt ` and `data` chunks, checked
//! for identical formats, and joined into a single canonical container
//! (`RIFF` header, one `fmt ` chunk, one `data` chunk). This module knows nothing about
//! utterances; it works purely on byte buffers.

use thiserror::Error;

/// Smallest buffer that can hold a header, a 16-byte `fmt ` chunk and a `data` chunk header.
pub const MIN_WAV_SIZE: usize = 44;

/// Size of the `RIFF` + size + `WAVE` header.
const RIFF_HEADER_SIZE: usize = 12;

/// Size of a chunk id + chunk size header.
const CHUNK_HEADER_SIZE: usize = 8;

/// Minimum size of a PCM `fmt ` chunk body.
const MIN_FMT_SIZE: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WavError {
    #[error("WAV data is too short ({0} bytes)")]
    TooShort(usize),

    #[error("Invalid WAV header")]
    InvalidHeader,

    #[error("Invalid WAV fmt chunk ({0} bytes)")]
    InvalidFmtChunk(usize),

    #[error("WAV fmt/data chunk was not found")]
    MissingChunk,

    #[error("No WAV segments to merge")]
    NoSegments,

    #[error("WAV segments have different audio formats and cannot be merged (segment 0: {first}, segment {index}: {other})")]
    FormatMismatch { index: usize, first: WavFormat, other: WavFormat },

    #[error("merged WAV would exceed the 4 GiB RIFF limit")]
    TooLarge,
}

/// Format descriptor read from the `fmt ` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub audio_format: u16, // 1 = PCM
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl std::fmt::Display for WavFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "format={} channels={} rate={} Hz byte_rate={} block_align={} bits={}",
            self.audio_format, self.channels, self.sample_rate, self.byte_rate, self.block_align, self.bits_per_sample
        )
    }
}

impl WavFormat {
    fn from_fmt_chunk(chunk: &[u8]) -> Result<Self, WavError> {
        if chunk.len() < MIN_FMT_SIZE {
            return Err(WavError::InvalidFmtChunk(chunk.len()));
        }
        Ok(Self {
            audio_format: read_u16(chunk, 0),
            channels: read_u16(chunk, 2),
            sample_rate: read_u32(chunk, 4),
            byte_rate: read_u32(chunk, 8),
            block_align: read_u16(chunk, 12),
            bits_per_sample: read_u16(chunk, 14),
        })
    }
}

/// A parsed WAV segment borrowing from its source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSegment<'a> {
    pub format: WavFormat,
    pub fmt_chunk: &'a [u8], // Body of the `fmt ` chunk (copied verbatim on merge)
    pub data: &'a [u8],      // Body of the `data` chunk
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Parse a WAV container.
///
/// Walks the sub-chunks after the 12-byte header, honouring the pad byte that follows
/// odd-sized chunks. A chunk whose declared size overruns the buffer ends the walk.
///
/// # Errors
/// Returns an error if the buffer is shorter than [`MIN_WAV_SIZE`], the header is not
/// `RIFF`/`WAVE`, the `fmt ` chunk is too small, or either `fmt ` or `data` is missing.
pub fn parse(bytes: &[u8]) -> Result<WavSegment<'_>, WavError> {
    if bytes.len() < MIN_WAV_SIZE {
        return Err(WavError::TooShort(bytes.len()));
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(WavError::InvalidHeader);
    }

    let mut offset = RIFF_HEADER_SIZE;
    let mut fmt: Option<(&[u8], WavFormat)> = None;
    let mut data: Option<&[u8]> = None;

    while offset + CHUNK_HEADER_SIZE <= bytes.len() {
        let chunk_id = &bytes[offset..offset + 4];
        let chunk_size = read_u32(bytes, offset + 4) as usize;
        let start = offset + CHUNK_HEADER_SIZE;
        let Some(end) = start.checked_add(chunk_size).filter(|end| *end <= bytes.len()) else {
            break;
        };

        match chunk_id {
            b"fmt " => {
                let chunk = &bytes[start..end];
                fmt = Some((chunk, WavFormat::from_fmt_chunk(chunk)?));
            }
            b"data" => data = Some(&bytes[start..end]),
            _ => {}
        }

        offset = end + (chunk_size % 2);
    }

    match (fmt, data) {
        (Some((fmt_chunk, format)), Some(data)) => Ok(WavSegment { format, fmt_chunk, data }),
        _ => Err(WavError::MissingChunk),
    }
}

/// Merge parsed segments into one container.
///
/// The `fmt ` chunk is copied from the first segment; the `data` chunk is the in-order
/// concatenation of every segment's payload.
///
/// # Errors
/// Returns [`WavError::NoSegments`] for an empty slice and [`WavError::FormatMismatch`]
/// when any segment's format differs from the first one.
pub fn merge(segments: &[WavSegment<'_>]) -> Result<Vec<u8>, WavError> {
    let first = segments.first().ok_or(WavError::NoSegments)?;

    if let Some((index, other)) = segments.iter().enumerate().skip(1).find(|(_, s)| s.format != first.format) {
        return Err(WavError::FormatMismatch { index, first: first.format, other: other.format });
    }

    let data_size: usize = segments.iter().map(|s| s.data.len()).sum();
    let fmt_size = first.fmt_chunk.len();
    // The fmt chunk is re-emitted with its pad byte when its size is odd.
    let fmt_padding = fmt_size % 2;
    let total_size = RIFF_HEADER_SIZE + CHUNK_HEADER_SIZE + fmt_size + fmt_padding + CHUNK_HEADER_SIZE + data_size;

    let riff_size = u32::try_from(total_size - CHUNK_HEADER_SIZE).map_err(|_| WavError::TooLarge)?;
    let data_size_field = u32::try_from(data_size).map_err(|_| WavError::TooLarge)?;
    let fmt_size_field = u32::try_from(fmt_size).map_err(|_| WavError::TooLarge)?;

    let mut merged = Vec::with_capacity(total_size);
    merged.extend_from_slice(b"RIFF");
    merged.extend_from_slice(&riff_size.to_le_bytes());
    merged.extend_from_slice(b"WAVE");
    merged.extend_from_slice(b"fmt ");
    merged.extend_from_slice(&fmt_size_field.to_le_bytes());
    merged.extend_from_slice(first.fmt_chunk);
    if fmt_padding == 1 {
        merged.push(0);
    }
    merged.extend_from_slice(b"data");
    merged.extend_from_slice(&data_size_field.to_le_bytes());
    for segment in segments {
        merged.extend_from_slice(segment.data);
    }

    Ok(merged)
}

/// Parse and merge raw WAV buffers in order.
///
/// # Errors
/// Returns the first parse error, or any error from [`merge`].
pub fn merge_bytes<B: AsRef<[u8]>>(buffers: &[B]) -> Result<Vec<u8>, WavError> {
    let segments = buffers.iter().map(|b| parse(b.as_ref())).collect::<Result<Vec<_>, _>>()?;
    merge(&segments)
}
