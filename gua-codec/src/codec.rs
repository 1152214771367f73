//! Opaque decode/encode context contracts.
//!
//! A decoder or still encoder is a long-lived, shareable factory; every
//! pipeline invocation acquires its own context from it, uses it exclusively
//! and releases it by dropping it.

use crate::{CodecId, EncodedPacket, PixelFormat, VideoFrame};

/// Result of feeding one packet to a decode context.
#[derive(Debug)]
pub enum Decoded {
    Frame(VideoFrame),
    /// The decoder needs more input before it can output a frame.
    Again,
    /// The decoder has been drained.
    Eof,
}

pub trait VideoDecoder: Send + Sync {
    fn codec_id(&self) -> CodecId;

    fn name(&self) -> &str;

    /// Acquires a fresh context and opens it with default parameters.
    fn open(&self) -> anyhow::Result<Box<dyn DecodeContext>>;
}

pub trait DecodeContext: Send {
    fn decode(&mut self, packet: &[u8]) -> anyhow::Result<Decoded>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    pub const STILL: TimeBase = TimeBase { num: 1, den: 1 };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeParams {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub time_base: TimeBase,
}

impl EncodeParams {
    /// Dimensions and pixel format follow the decoded frame; the time base is 1/1.
    pub fn for_frame(frame: &VideoFrame) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            pixel_format: frame.format(),
            time_base: TimeBase::STILL,
        }
    }
}

pub trait StillEncoder: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, params: EncodeParams) -> anyhow::Result<Box<dyn EncodeContext>>;
}

pub trait EncodeContext: Send {
    /// Encodes one frame into zero or more packets.
    fn encode(&mut self, frame: &VideoFrame) -> anyhow::Result<Vec<EncodedPacket>>;
}

/// Result of one call into a send/receive style codec.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow<T> {
    Ready(T),
    /// Input queue full on send, or no output ready on receive.
    Again,
    Eof,
}

/// Decoder that takes packets and hands out frames through separate queues.
pub trait SendReceive {
    type Frame;

    fn send(&mut self, packet: &[u8]) -> anyhow::Result<Flow<()>>;

    fn receive(&mut self) -> anyhow::Result<Flow<Self::Frame>>;
}

/// Feeds `packet` and drains every frame that is ready, returning the newest.
///
/// When the decoder refuses the packet because its output is full, the
/// output is drained and the packet is sent once more; a second refusal is
/// an error, so no packet is ever silently skipped.
pub fn decode_latest<D: SendReceive>(
    decoder: &mut D,
    packet: &[u8],
) -> anyhow::Result<Flow<D::Frame>> {
    let mut latest = None;
    match decoder.send(packet)? {
        Flow::Ready(()) => {}
        Flow::Eof => return Ok(Flow::Eof),
        Flow::Again => {
            let eof = drain(decoder, &mut latest)?;
            match decoder.send(packet)? {
                Flow::Ready(()) => {}
                Flow::Again => anyhow::bail!("decoder refused packet after draining output"),
                Flow::Eof => return Ok(finish(latest, true)),
            }
            if eof {
                return Ok(finish(latest, true));
            }
        }
    }
    let eof = drain(decoder, &mut latest)?;
    Ok(finish(latest, eof))
}

/// Receives until the decoder runs dry. Returns whether it reported EOF.
fn drain<D: SendReceive>(decoder: &mut D, latest: &mut Option<D::Frame>) -> anyhow::Result<bool> {
    loop {
        match decoder.receive()? {
            Flow::Ready(frame) => *latest = Some(frame),
            Flow::Again => return Ok(false),
            Flow::Eof => return Ok(true),
        }
    }
}

fn finish<F>(latest: Option<F>, eof: bool) -> Flow<F> {
    match latest {
        Some(frame) => Flow::Ready(frame),
        None if eof => Flow::Eof,
        None => Flow::Again,
    }
}
