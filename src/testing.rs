//! Codec and consumer doubles shared by the test suites.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use gua_codec::{
    CodecId, DecodeContext, Decoded, EncodeContext, EncodeParams, EncodedPacket, PixelFormat,
    Plane, StillEncoder, VideoDecoder, VideoFrame,
};

use crate::dispatch::Consumer;

pub const CONFIG_PACKET: &[u8] = b"CFG";
pub const EOF_PACKET: &[u8] = b"EOF";

/// Decodes packets into 8x8 gray frames filled with the first payload byte.
///
/// With `needs_config` a context only decodes after it has seen
/// [`CONFIG_PACKET`], like a stream whose parameter sets arrive once.
pub struct FakeDecoder {
    id: CodecId,
    needs_config: bool,
    opens: Arc<AtomicUsize>,
}

impl FakeDecoder {
    pub fn new(id: CodecId) -> Self {
        Self {
            id,
            needs_config: false,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn stateful(id: CodecId) -> Self {
        Self {
            needs_config: true,
            ..Self::new(id)
        }
    }

    pub fn opens(&self) -> Arc<AtomicUsize> {
        self.opens.clone()
    }
}

impl VideoDecoder for FakeDecoder {
    fn codec_id(&self) -> CodecId {
        self.id
    }

    fn name(&self) -> &str {
        "fake"
    }

    fn open(&self) -> anyhow::Result<Box<dyn DecodeContext>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDecodeContext {
            configured: !self.needs_config,
        }))
    }
}

struct FakeDecodeContext {
    configured: bool,
}

impl DecodeContext for FakeDecodeContext {
    fn decode(&mut self, packet: &[u8]) -> anyhow::Result<Decoded> {
        if packet.is_empty() {
            return Ok(Decoded::Again);
        }
        if packet == EOF_PACKET {
            return Ok(Decoded::Eof);
        }
        if packet == CONFIG_PACKET {
            self.configured = true;
            return Ok(Decoded::Again);
        }
        if !self.configured {
            anyhow::bail!("no parameter sets");
        }
        if packet[0] == 0xFF {
            anyhow::bail!("corrupt packet");
        }
        let frame = VideoFrame::new(
            8,
            8,
            PixelFormat::Gray8,
            vec![Plane::new(vec![packet[0]; 64], 8)],
        )?;
        Ok(Decoded::Frame(frame))
    }
}

/// Decoder whose contexts never open.
pub struct BrokenDecoder(pub CodecId);

impl VideoDecoder for BrokenDecoder {
    fn codec_id(&self) -> CodecId {
        self.0
    }

    fn name(&self) -> &str {
        "broken"
    }

    fn open(&self) -> anyhow::Result<Box<dyn DecodeContext>> {
        anyhow::bail!("no such device")
    }
}

/// Splits every frame into `parts` packets of the frame's first plane.
pub struct SplitEncoder {
    pub parts: usize,
}

impl StillEncoder for SplitEncoder {
    fn name(&self) -> &str {
        "split"
    }

    fn open(&self, params: EncodeParams) -> anyhow::Result<Box<dyn EncodeContext>> {
        Ok(Box::new(SplitEncodeContext {
            parts: self.parts,
            params,
        }))
    }
}

struct SplitEncodeContext {
    parts: usize,
    params: EncodeParams,
}

impl EncodeContext for SplitEncodeContext {
    fn encode(&mut self, frame: &VideoFrame) -> anyhow::Result<Vec<EncodedPacket>> {
        anyhow::ensure!(frame.width() == self.params.width, "size mismatch");
        let data = frame.plane(0).data();
        let chunk = data.len().div_ceil(self.parts.max(1));
        Ok(data
            .chunks(chunk)
            .take(self.parts)
            .map(|c| EncodedPacket::new(c.to_vec()))
            .collect())
    }
}

/// Collects every dispatched still.
#[derive(Default, Clone)]
pub struct RecordingConsumer {
    received: Arc<Mutex<Vec<(String, Bytes)>>>,
}

impl RecordingConsumer {
    pub fn received(&self) -> Vec<(String, Bytes)> {
        self.received.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

impl Consumer for RecordingConsumer {
    fn on_consume(&self, callee_id: &str, data: Bytes) {
        self.received
            .lock()
            .unwrap()
            .push((callee_id.to_string(), data));
    }
}
