//! Still-image encoder producing baseline JPEG.

use jpeg_encoder::{ColorType, SamplingFactor};

use crate::{
    EncodedPacket, PixelFormat, VideoFrame,
    codec::{EncodeContext, EncodeParams, StillEncoder},
};

pub const DEFAULT_QUALITY: u8 = 85;

pub struct JpegEncoder {
    quality: u8,
}

impl JpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY)
    }
}

impl StillEncoder for JpegEncoder {
    fn name(&self) -> &str {
        "jpeg"
    }

    fn open(&self, params: EncodeParams) -> anyhow::Result<Box<dyn EncodeContext>> {
        if params.width == 0 || params.height == 0 {
            anyhow::bail!("invalid video size {}x{}", params.width, params.height);
        }
        if params.width > u16::MAX as u32 || params.height > u16::MAX as u32 {
            anyhow::bail!(
                "{}x{} exceeds the jpeg size limit",
                params.width,
                params.height
            );
        }
        Ok(Box::new(JpegEncodeContext {
            params,
            quality: self.quality,
        }))
    }
}

struct JpegEncodeContext {
    params: EncodeParams,
    quality: u8,
}

impl EncodeContext for JpegEncodeContext {
    fn encode(&mut self, frame: &VideoFrame) -> anyhow::Result<Vec<EncodedPacket>> {
        if frame.width() != self.params.width || frame.height() != self.params.height {
            anyhow::bail!(
                "frame {}x{} does not match encoder {}x{}",
                frame.width(),
                frame.height(),
                self.params.width,
                self.params.height
            );
        }

        let (pixels, color_type) = interleave(frame);
        let mut out = Vec::new();
        let mut encoder = jpeg_encoder::Encoder::new(&mut out, self.quality);
        match frame.format().chroma_shift() {
            (1, 1) => encoder.set_sampling_factor(SamplingFactor::F_2_2),
            (1, 0) => encoder.set_sampling_factor(SamplingFactor::F_2_1),
            _ => encoder.set_sampling_factor(SamplingFactor::F_1_1),
        }
        encoder
            .encode(
                &pixels,
                frame.width() as u16,
                frame.height() as u16,
                color_type,
            )
            .map_err(|e| anyhow::anyhow!("jpeg encode: {}", e))?;

        Ok(vec![EncodedPacket::new(out).with_pts(frame.pts())])
    }
}

/// Packs the frame into the contiguous layout the jpeg encoder expects.
/// Limited-range YUV is expanded to full range on the way.
fn interleave(frame: &VideoFrame) -> (Vec<u8>, ColorType) {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let format = frame.format();

    match format {
        PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
            let mut out = Vec::with_capacity(width * height * 3);
            for y in 0..height {
                out.extend_from_slice(&frame.plane(0).row(y)[..width * 3]);
            }
            let color_type = if format == PixelFormat::Rgb24 {
                ColorType::Rgb
            } else {
                ColorType::Bgr
            };
            (out, color_type)
        }
        PixelFormat::Gray8 => {
            let mut out = Vec::with_capacity(width * height);
            for y in 0..height {
                out.extend_from_slice(&frame.plane(0).row(y)[..width]);
            }
            (out, ColorType::Luma)
        }
        _ => {
            let (sx, sy) = format.chroma_shift();
            let full_range = format.is_full_range();
            let mut out = Vec::with_capacity(width * height * 3);
            for y in 0..height {
                let luma = frame.plane(0).row(y);
                let cy = y >> sy;
                for x in 0..width {
                    let cx = x >> sx;
                    let (cb, cr) = if format == PixelFormat::Nv12 {
                        let uv = frame.plane(1).row(cy);
                        (uv[cx * 2], uv[cx * 2 + 1])
                    } else {
                        (frame.plane(1).row(cy)[cx], frame.plane(2).row(cy)[cx])
                    };
                    if full_range {
                        out.extend_from_slice(&[luma[x], cb, cr]);
                    } else {
                        out.extend_from_slice(&[
                            expand_luma(luma[x]),
                            expand_chroma(cb),
                            expand_chroma(cr),
                        ]);
                    }
                }
            }
            (out, ColorType::Ycbcr)
        }
    }
}

fn expand_luma(v: u8) -> u8 {
    ((v as i32 - 16) * 255 / 219).clamp(0, 255) as u8
}

fn expand_chroma(v: u8) -> u8 {
    ((v as i32 - 128) * 255 / 224 + 128).clamp(0, 255) as u8
}
