use std::{fmt, sync::Arc};

/// Registers FFmpeg components when the `ffmpeg` feature is enabled. Call once at
/// startup before building a codec registry.
pub fn init() -> anyhow::Result<()> {
    #[cfg(feature = "ffmpeg")]
    {
        ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))?;
    }
    Ok(())
}

pub mod codec;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frame;
pub mod jpeg;
pub mod packet;
pub mod ps;
#[cfg(feature = "ffmpeg")]
pub mod scaler;

pub use codec::{
    DecodeContext, Decoded, EncodeContext, EncodeParams, Flow, SendReceive, StillEncoder,
    VideoDecoder, decode_latest,
};
pub use frame::{PixelFormat, Plane, VideoFrame};
pub use packet::EncodedPacket;

/// Numeric video codec identifier as reported by the engine (AVCodecID numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodecId(pub i32);

impl CodecId {
    pub const NONE: CodecId = CodecId(0);
    pub const MJPEG: CodecId = CodecId(7);
    pub const MPEG4: CodecId = CodecId(12);
    pub const H264: CodecId = CodecId(27);

    pub fn name(&self) -> &'static str {
        match *self {
            CodecId::NONE => "none",
            CodecId::MJPEG => "mjpeg",
            CodecId::MPEG4 => "mpeg4",
            CodecId::H264 => "h264",
            _ => "unknown",
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

impl From<i32> for CodecId {
    fn from(value: i32) -> Self {
        CodecId(value)
    }
}

/// Input codecs the pipeline tries to register decoders for.
pub const SUPPORTED_DECODERS: [CodecId; 2] = [CodecId::H264, CodecId::MPEG4];

/// Looks up a decoder for `id` in the compiled-in backends.
pub fn find_decoder(id: CodecId) -> Option<Arc<dyn VideoDecoder>> {
    #[cfg(feature = "ffmpeg")]
    {
        if let Some(decoder) = ffmpeg::FfmpegDecoder::find(id) {
            return Some(Arc::new(decoder));
        }
    }
    log::debug!("no decoder backend for {}", id);
    None
}

/// The still-image encoder used for every decoded frame.
pub fn still_encoder(quality: u8) -> Arc<dyn StillEncoder> {
    Arc::new(jpeg::JpegEncoder::new(quality))
}
