//! Decode → still-encode → dispatch for decode events raised by the engine.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use gua_codec::{
    CodecId, DecodeContext, Decoded, EncodeParams, StillEncoder, VideoDecoder, VideoFrame,
};

use crate::{
    config::{DecodeMode, PipelineConfig},
    dispatch::ConsumerDispatch,
    lock,
};

/// Decoders by codec id plus the single still encoder. Built once, read-only
/// afterwards.
#[derive(Default, Clone)]
pub struct CodecRegistry {
    decoders: HashMap<CodecId, Arc<dyn VideoDecoder>>,
    encoder: Option<Arc<dyn StillEncoder>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every supported decoder the build provides and the JPEG
    /// encoder. Missing decoders leave their slot empty.
    pub fn with_defaults(config: &PipelineConfig) -> Self {
        let mut registry = Self::new();
        for id in gua_codec::SUPPORTED_DECODERS {
            match gua_codec::find_decoder(id) {
                Some(decoder) => {
                    log::info!("decoder {} registered for {}", decoder.name(), id);
                    registry.decoders.insert(id, decoder);
                }
                None => log::warn!("decoder for {} not found", id),
            }
        }
        registry.encoder = Some(gua_codec::still_encoder(config.jpeg_quality));
        registry
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn VideoDecoder>) -> Self {
        self.decoders.insert(decoder.codec_id(), decoder);
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn StillEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn decoder(&self, id: CodecId) -> Option<&Arc<dyn VideoDecoder>> {
        self.decoders.get(&id)
    }

    pub fn encoder(&self) -> Option<&Arc<dyn StillEncoder>> {
        self.encoder.as_ref()
    }

    pub fn decoder_ids(&self) -> Vec<CodecId> {
        let mut ids: Vec<_> = self.decoders.keys().copied().collect();
        ids.sort();
        ids
    }
}

/// Decode notification as raised by the engine. The payload is borrowed from
/// the engine and only valid during the callback.
#[derive(Debug, Clone, Copy)]
pub struct RawDecodeEvent<'a> {
    pub callee_id: &'a str,
    pub codec_id: CodecId,
    pub packet_index: i32,
    pub total_len: i32,
    pub remaining_len: i32,
    pub payload: &'a [u8],
}

impl RawDecodeEvent<'_> {
    /// Copies the payload so the event can outlive the callback.
    pub fn to_owned_event(&self) -> DecodeEvent {
        DecodeEvent {
            callee_id: self.callee_id.to_string(),
            codec_id: self.codec_id,
            packet_index: self.packet_index,
            total_len: self.total_len,
            remaining_len: self.remaining_len,
            payload: Bytes::copy_from_slice(self.payload),
        }
    }

    fn is_partial(&self) -> bool {
        self.remaining_len > 0 || (self.total_len > 0 && (self.payload.len() as i64) < self.total_len as i64)
    }
}

/// A decode event that owns its payload.
#[derive(Debug, Clone)]
pub struct DecodeEvent {
    pub callee_id: String,
    pub codec_id: CodecId,
    pub packet_index: i32,
    pub total_len: i32,
    pub remaining_len: i32,
    pub payload: Bytes,
}

impl DecodeEvent {
    pub fn as_raw(&self) -> RawDecodeEvent<'_> {
        RawDecodeEvent {
            callee_id: &self.callee_id,
            codec_id: self.codec_id,
            packet_index: self.packet_index,
            total_len: self.total_len,
            remaining_len: self.remaining_len,
            payload: &self.payload,
        }
    }
}

/// What became of one decode event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// `packets` stills totalling `bytes` bytes reached the consumer.
    Delivered { packets: usize, bytes: usize },
    /// Stills were produced but no consumer is set.
    Discarded { packets: usize },
    UnknownCodec,
    NoEncoder,
    OpenFailed,
    NeedMoreData,
    EndOfStream,
    DecodeFailed,
    EncodeFailed,
}

struct Session {
    codec_id: CodecId,
    context: Box<dyn DecodeContext>,
}

pub struct TranscodePipeline {
    registry: CodecRegistry,
    mode: DecodeMode,
    dispatch: ConsumerDispatch,
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl TranscodePipeline {
    pub fn new(registry: CodecRegistry, mode: DecodeMode) -> Self {
        Self {
            registry,
            mode,
            dispatch: ConsumerDispatch::new(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    pub fn dispatch(&self) -> &ConsumerDispatch {
        &self.dispatch
    }

    pub fn mode(&self) -> DecodeMode {
        self.mode
    }

    /// Runs one event through decode, encode and dispatch. Failures are logged
    /// and reported in the outcome; nothing is raised to the caller.
    pub fn handle(&self, event: &RawDecodeEvent<'_>) -> DecodeOutcome {
        let Some(decoder) = self.registry.decoder(event.codec_id) else {
            log::warn!(
                "decoder not found for {}, callee {} packet {}",
                event.codec_id,
                event.callee_id,
                event.packet_index
            );
            return DecodeOutcome::UnknownCodec;
        };

        if event.is_partial() {
            log::debug!(
                "partial packet {} for {}: {} of {} bytes, {} remaining",
                event.packet_index,
                event.callee_id,
                event.payload.len(),
                event.total_len,
                event.remaining_len
            );
        }

        let outcome = match self.mode {
            DecodeMode::PerEvent => match decoder.open() {
                Ok(mut context) => self.transcode(event, context.as_mut()),
                Err(e) => {
                    log::error!("open decoder {} error: {:#}", decoder.name(), e);
                    DecodeOutcome::OpenFailed
                }
            },
            DecodeMode::PerSession => self.transcode_in_session(event, decoder),
        };

        if outcome == DecodeOutcome::EndOfStream && self.mode == DecodeMode::PerSession {
            self.end_session(event.callee_id);
        }
        log::trace!(
            "{} packet {}: {:?}",
            event.callee_id,
            event.packet_index,
            outcome
        );
        outcome
    }

    fn transcode_in_session(
        &self,
        event: &RawDecodeEvent<'_>,
        decoder: &Arc<dyn VideoDecoder>,
    ) -> DecodeOutcome {
        let existing = lock(&self.sessions).get(event.callee_id).cloned();
        let session = match existing {
            Some(session) => session,
            None => {
                let context = match decoder.open() {
                    Ok(context) => context,
                    Err(e) => {
                        log::error!("open decoder {} error: {:#}", decoder.name(), e);
                        return DecodeOutcome::OpenFailed;
                    }
                };
                log::info!("session {} opened with {}", event.callee_id, event.codec_id);
                let session = Arc::new(Mutex::new(Session {
                    codec_id: event.codec_id,
                    context,
                }));
                lock(&self.sessions)
                    .entry(event.callee_id.to_string())
                    .or_insert(session)
                    .clone()
            }
        };

        // held until dispatch so stills of one session reach the consumer in order
        let mut session = lock(&session);
        if session.codec_id != event.codec_id {
            log::info!(
                "session {} codec changed: {} -> {}",
                event.callee_id,
                session.codec_id,
                event.codec_id
            );
            match decoder.open() {
                Ok(context) => {
                    session.context = context;
                    session.codec_id = event.codec_id;
                }
                Err(e) => {
                    log::error!("open decoder {} error: {:#}", decoder.name(), e);
                    return DecodeOutcome::OpenFailed;
                }
            }
        }
        self.transcode(event, session.context.as_mut())
    }

    fn transcode(&self, event: &RawDecodeEvent<'_>, context: &mut dyn DecodeContext) -> DecodeOutcome {
        let frame = match context.decode(event.payload) {
            Ok(Decoded::Frame(frame)) => frame,
            Ok(Decoded::Again) => return DecodeOutcome::NeedMoreData,
            Ok(Decoded::Eof) => return DecodeOutcome::EndOfStream,
            Err(e) => {
                log::error!(
                    "decode {} packet {} ({}) error: {:#}",
                    event.callee_id,
                    event.packet_index,
                    event.codec_id,
                    e
                );
                return DecodeOutcome::DecodeFailed;
            }
        };

        let packets = match self.encode(&frame) {
            Ok(packets) => packets,
            Err(outcome) => return outcome,
        };
        drop(frame);

        let count = packets.len();
        let mut bytes = 0;
        let mut delivered = 0;
        for packet in packets {
            let data = packet.into_data();
            let len = data.len();
            if self.dispatch.dispatch(event.callee_id, data) {
                delivered += 1;
                bytes += len;
            }
        }

        if delivered == 0 && count > 0 {
            DecodeOutcome::Discarded { packets: count }
        } else {
            DecodeOutcome::Delivered {
                packets: delivered,
                bytes,
            }
        }
    }

    fn encode(
        &self,
        frame: &VideoFrame,
    ) -> Result<Vec<gua_codec::EncodedPacket>, DecodeOutcome> {
        let Some(encoder) = self.registry.encoder() else {
            log::warn!("no still encoder registered");
            return Err(DecodeOutcome::NoEncoder);
        };
        let mut context = encoder.open(EncodeParams::for_frame(frame)).map_err(|e| {
            log::error!("open encoder {} for {} error: {:#}", encoder.name(), frame, e);
            DecodeOutcome::OpenFailed
        })?;
        context.encode(frame).map_err(|e| {
            log::error!("encode {} error: {:#}", frame, e);
            DecodeOutcome::EncodeFailed
        })
    }

    /// Releases the decode context kept for `callee_id`.
    pub fn end_session(&self, callee_id: &str) -> bool {
        let removed = lock(&self.sessions).remove(callee_id).is_some();
        if removed {
            log::info!("session {} closed", callee_id);
        }
        removed
    }

    pub fn clear_sessions(&self) {
        let sessions = std::mem::take(&mut *lock(&self.sessions));
        if !sessions.is_empty() {
            log::info!("{} sessions closed", sessions.len());
        }
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
