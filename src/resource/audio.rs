//! Whole-buffer audio decoding for cached sounds
//!
//! Supports:
//! - RIFF WAVE, 8-bit and 16-bit PCM, any channel count and rate
//! - Ogg Vorbis through `lewton`
//!
//! Output is always interleaved signed 16-bit PCM.

use std::io::{Cursor, Read};

use lewton::inside_ogg::OggStreamReader;

use super::error::DecodeError;

// Little-endian chunk ids
const RIFF_ID: u32 = 0x46464952; // "RIFF"
const WAVE_ID: u32 = 0x45564157; // "WAVE"
const FMT_ID: u32 = 0x20746d66; // "fmt "
const DATA_ID: u32 = 0x61746164; // "data"

const WAVE_FORMAT_PCM: u16 = 1;

/// Interleaved 16-bit PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

/// Decode a complete WAV or Ogg Vorbis file, picked by its magic bytes
pub fn decode_audio(data: &[u8]) -> Result<DecodedAudio, DecodeError> {
    match data.get(..4) {
        Some(b"RIFF") => decode_wav(data),
        Some(b"OggS") => decode_ogg(data),
        _ => Err(DecodeError::UnsupportedFormat(
            "not a WAV or Ogg Vorbis stream".to_string(),
        )),
    }
}

struct WavFormat {
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16, DecodeError> {
    let mut buf = [0u8; 2];
    cursor
        .read_exact(&mut buf)
        .map_err(|e| DecodeError::InvalidData(format!("Failed to read u16: {}", e)))?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, DecodeError> {
    let mut buf = [0u8; 4];
    cursor
        .read_exact(&mut buf)
        .map_err(|e| DecodeError::InvalidData(format!("Failed to read u32: {}", e)))?;
    Ok(u32::from_le_bytes(buf))
}

fn parse_format(cursor: &mut Cursor<&[u8]>, size: u32) -> Result<WavFormat, DecodeError> {
    if size < 16 {
        return Err(DecodeError::InvalidData("Format chunk too small".to_string()));
    }
    let format = read_u16(cursor)?;
    let channels = read_u16(cursor)?;
    let sample_rate = read_u32(cursor)?;
    let _byte_rate = read_u32(cursor)?;
    let _block_align = read_u16(cursor)?;
    let bits_per_sample = read_u16(cursor)?;

    if format != WAVE_FORMAT_PCM {
        return Err(DecodeError::UnsupportedFormat(format!(
            "WAV format tag {}",
            format
        )));
    }
    if channels == 0 {
        return Err(DecodeError::InvalidData("WAV has no channels".to_string()));
    }
    if bits_per_sample != 8 && bits_per_sample != 16 {
        return Err(DecodeError::UnsupportedFormat(format!(
            "{}-bit WAV",
            bits_per_sample
        )));
    }

    // Skip any extension bytes, chunks are word aligned
    let extra = u64::from(size - 16 + (size & 1));
    cursor.set_position(cursor.position() + extra);

    Ok(WavFormat {
        channels,
        sample_rate,
        bits_per_sample,
    })
}

fn decode_wav(data: &[u8]) -> Result<DecodedAudio, DecodeError> {
    let mut cursor = Cursor::new(data);
    if read_u32(&mut cursor)? != RIFF_ID {
        return Err(DecodeError::InvalidData("Not a RIFF file".to_string()));
    }
    let _riff_size = read_u32(&mut cursor)?;
    if read_u32(&mut cursor)? != WAVE_ID {
        return Err(DecodeError::InvalidData("Not a WAVE file".to_string()));
    }

    let mut format = None;
    loop {
        let id = read_u32(&mut cursor)?;
        let size = read_u32(&mut cursor)?;
        match id {
            FMT_ID => format = Some(parse_format(&mut cursor, size)?),
            DATA_ID => {
                let format = format.ok_or_else(|| {
                    DecodeError::InvalidData("data chunk before fmt chunk".to_string())
                })?;
                let start = cursor.position() as usize;
                let end = start.saturating_add(size as usize).min(data.len());
                return Ok(DecodedAudio {
                    sample_rate: format.sample_rate,
                    channels: format.channels,
                    samples: pcm_to_i16(&data[start..end], format.bits_per_sample),
                });
            }
            _ => {
                let skip = u64::from(size) + u64::from(size & 1);
                cursor.set_position(cursor.position() + skip);
            }
        }
    }
}

fn pcm_to_i16(pcm: &[u8], bits_per_sample: u16) -> Vec<i16> {
    if bits_per_sample == 8 {
        // 8-bit WAV is unsigned
        pcm.iter().map(|&b| ((b as i16) - 128) << 8).collect()
    } else {
        pcm.chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }
}

fn decode_ogg(data: &[u8]) -> Result<DecodedAudio, DecodeError> {
    let mut reader = OggStreamReader::new(Cursor::new(data))?;
    let sample_rate = reader.ident_hdr.audio_sample_rate;
    let channels = u16::from(reader.ident_hdr.audio_channels);

    let mut samples = Vec::new();
    while let Some(packet) = reader.read_dec_packet_itl()? {
        samples.extend_from_slice(&packet);
    }

    Ok(DecodedAudio {
        sample_rate,
        channels,
        samples,
    })
}

/// Build a PCM WAV file in memory
#[cfg(test)]
pub(crate) fn wav_bytes(sample_rate: u32, channels: u16, bits: u16, pcm: &[u8]) -> Vec<u8> {
    let block_align = channels * (bits / 8);
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + pcm.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(pcm.len() as u32).to_le_bytes());
    out.extend_from_slice(pcm);
    out
}
