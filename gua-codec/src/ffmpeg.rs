//! FFmpeg-backed video decoders.

use ffmpeg_next::{codec, format::Pixel};

use crate::{
    CodecId, PixelFormat, Plane, VideoFrame,
    codec::{DecodeContext, Decoded, Flow, SendReceive, VideoDecoder, decode_latest},
    scaler::Scaler,
};

pub struct FfmpegDecoder {
    id: CodecId,
    codec: ffmpeg_next::Codec,
}

impl FfmpegDecoder {
    pub fn find(id: CodecId) -> Option<Self> {
        let codec_id = match id {
            CodecId::H264 => codec::Id::H264,
            CodecId::MPEG4 => codec::Id::MPEG4,
            _ => return None,
        };
        ffmpeg_next::decoder::find(codec_id).map(|codec| Self { id, codec })
    }
}

unsafe impl Send for FfmpegDecoder {}
unsafe impl Sync for FfmpegDecoder {}

impl VideoDecoder for FfmpegDecoder {
    fn codec_id(&self) -> CodecId {
        self.id
    }

    fn name(&self) -> &str {
        self.codec.name()
    }

    fn open(&self) -> anyhow::Result<Box<dyn DecodeContext>> {
        let decoder = codec::Context::new_with_codec(self.codec)
            .decoder()
            .video()?;
        Ok(Box::new(FfmpegDecodeContext {
            decoder,
            scaler: None,
        }))
    }
}

struct FfmpegDecodeContext {
    decoder: ffmpeg_next::decoder::Video,
    scaler: Option<Scaler>,
}

unsafe impl Send for FfmpegDecodeContext {}

fn is_again(err: &ffmpeg_next::Error) -> bool {
    matches!(err, ffmpeg_next::Error::Other { errno } if *errno == ffmpeg_next::util::error::EAGAIN)
}

impl SendReceive for ffmpeg_next::decoder::Video {
    type Frame = ffmpeg_next::frame::Video;

    fn send(&mut self, packet: &[u8]) -> anyhow::Result<Flow<()>> {
        match self.send_packet(&ffmpeg_next::Packet::copy(packet)) {
            Ok(()) => Ok(Flow::Ready(())),
            Err(ffmpeg_next::Error::Eof) => Ok(Flow::Eof),
            Err(err) if is_again(&err) => Ok(Flow::Again),
            Err(err) => Err(err.into()),
        }
    }

    fn receive(&mut self) -> anyhow::Result<Flow<Self::Frame>> {
        let mut frame = ffmpeg_next::frame::Video::empty();
        match self.receive_frame(&mut frame) {
            Ok(()) => Ok(Flow::Ready(frame)),
            Err(ffmpeg_next::Error::Eof) => Ok(Flow::Eof),
            Err(err) if is_again(&err) => Ok(Flow::Again),
            Err(err) => Err(err.into()),
        }
    }
}

impl DecodeContext for FfmpegDecodeContext {
    fn decode(&mut self, packet: &[u8]) -> anyhow::Result<Decoded> {
        match decode_latest(&mut self.decoder, packet)? {
            Flow::Ready(frame) => Ok(Decoded::Frame(self.convert(&frame)?)),
            Flow::Again => Ok(Decoded::Again),
            Flow::Eof => Ok(Decoded::Eof),
        }
    }
}

impl FfmpegDecodeContext {
    fn convert(&mut self, frame: &ffmpeg_next::frame::Video) -> anyhow::Result<VideoFrame> {
        if let Some(format) = pixel_format(frame.format()) {
            return copy_frame(frame, format);
        }

        if !self.scaler.as_ref().is_some_and(|s| s.matches(frame)) {
            log::debug!(
                "scaling {:?} {}x{} to yuv420p",
                frame.format(),
                frame.width(),
                frame.height()
            );
            self.scaler = Some(Scaler::new(frame.format(), frame.width(), frame.height())?);
        }
        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("scaler not initialized"))?;
        let scaled = scaler.run(frame)?;
        copy_frame(&scaled, PixelFormat::Yuv420p)
    }
}

fn pixel_format(format: Pixel) -> Option<PixelFormat> {
    match format {
        Pixel::YUV420P => Some(PixelFormat::Yuv420p),
        Pixel::YUVJ420P => Some(PixelFormat::Yuvj420p),
        Pixel::YUV422P => Some(PixelFormat::Yuv422p),
        Pixel::YUVJ422P => Some(PixelFormat::Yuvj422p),
        Pixel::NV12 => Some(PixelFormat::Nv12),
        Pixel::RGB24 => Some(PixelFormat::Rgb24),
        Pixel::BGR24 => Some(PixelFormat::Bgr24),
        Pixel::GRAY8 => Some(PixelFormat::Gray8),
        _ => None,
    }
}

fn copy_frame(frame: &ffmpeg_next::frame::Video, format: PixelFormat) -> anyhow::Result<VideoFrame> {
    let planes = (0..format.plane_count())
        .map(|i| Plane::new(frame.data(i).to_vec(), frame.stride(i)))
        .collect();
    Ok(
        VideoFrame::new(frame.width(), frame.height(), format, planes)?
            .with_pts(frame.pts())
            .with_key(frame.is_key()),
    )
}
