// Resource Type Definitions
// Decoded, cacheable forms of pack resources

use std::ops::Deref;
use std::time::Duration;

use image::ImageFormat;

use super::audio::decode_audio;
use super::error::DecodeError;
use super::loader::{CacheLoadable, LoadContext};

/// Magic bytes of the raw texture container
pub const RAW_TEXTURE_MAGIC: &[u8; 4] = b"RGBA";
const RAW_TEXTURE_HEADER: usize = 12;

/// Raw bytes, cached as-is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferResource {
    pub data: Vec<u8>,
}

impl Deref for BufferResource {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl CacheLoadable for BufferResource {
    type Options = ();

    fn load(_ctx: &LoadContext<'_>, data: Vec<u8>, _options: ()) -> Result<Self, DecodeError> {
        Ok(BufferResource { data })
    }

    fn byte_size(&self) -> usize {
        self.data.len()
    }
}

/// Which decoder turns texture bytes into pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureDecoder {
    /// Raw container if the magic matches, otherwise let `image` guess
    #[default]
    Auto,
    /// Force a specific `image` format
    Image(ImageFormat),
    /// Raw container only
    Raw,
}

/// Decoded RGBA8 texture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureResource {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA8 pixels
    pub pixels: Vec<u8>,
}

impl TextureResource {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, DecodeError> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| DecodeError::InvalidData(format!("texture {}x{} too large", width, height)))?;
        if pixels.len() != expected {
            return Err(DecodeError::InvalidData(format!(
                "texture {}x{} needs {} pixel bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// RGBA value at (x, y), if in bounds
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y as usize) * (self.width as usize) + x as usize) * 4;
        Some([
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ])
    }

    /// Serialize into the raw container (`RGBA`, width, height, pixels)
    pub fn to_raw_container(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RAW_TEXTURE_HEADER + self.pixels.len());
        out.extend_from_slice(RAW_TEXTURE_MAGIC);
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.pixels);
        out
    }

    fn from_raw_container(mut data: Vec<u8>) -> Result<Self, DecodeError> {
        if data.len() < RAW_TEXTURE_HEADER || &data[..4] != RAW_TEXTURE_MAGIC {
            return Err(DecodeError::InvalidData("not a raw RGBA texture".to_string()));
        }
        let width = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let height = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        data.drain(..RAW_TEXTURE_HEADER);
        Self::new(width, height, data)
    }

    fn from_image(data: &[u8], format: Option<ImageFormat>) -> Result<Self, DecodeError> {
        let image = match format {
            Some(format) => image::load_from_memory_with_format(data, format)?,
            None => image::load_from_memory(data)?,
        };
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }
}

impl CacheLoadable for TextureResource {
    type Options = TextureDecoder;

    fn load(ctx: &LoadContext<'_>, data: Vec<u8>, decoder: TextureDecoder) -> Result<Self, DecodeError> {
        log::debug!("Decoding texture {} with {:?}", ctx.id(), decoder);
        match decoder {
            TextureDecoder::Auto if data.starts_with(RAW_TEXTURE_MAGIC) => {
                Self::from_raw_container(data)
            }
            TextureDecoder::Auto => Self::from_image(&data, None),
            TextureDecoder::Image(format) => Self::from_image(&data, Some(format)),
            TextureDecoder::Raw => Self::from_raw_container(data),
        }
    }

    fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

/// Fully decoded sound, interleaved 16-bit PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundResource {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl SoundResource {
    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }
}

impl CacheLoadable for SoundResource {
    type Options = ();

    fn load(_ctx: &LoadContext<'_>, data: Vec<u8>, _options: ()) -> Result<Self, DecodeError> {
        let audio = decode_audio(&data)?;
        Ok(SoundResource {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            samples: audio.samples,
        })
    }

    fn byte_size(&self) -> usize {
        self.samples.len() * std::mem::size_of::<i16>()
    }
}
