//! Codec enumeration on a worker, handed off through a bounded channel.

use std::sync::{Arc, mpsc};

use tokio_stream::wrappers::ReceiverStream;

use crate::{context::ContextInner, engine::CodecDescriptor};

/// Entries requested from the engine per enumeration.
pub const CODEC_INFO_CAPACITY: usize = 128;

const HANDOFF_CAPACITY: usize = 8;

/// Finite sequence of codecs from one engine query. Ends early, with nothing
/// yielded, when the query fails.
pub struct CodecInfoIter {
    rx: mpsc::Receiver<CodecDescriptor>,
}

impl Iterator for CodecInfoIter {
    type Item = CodecDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

fn query(ctx: &ContextInner, mut send: impl FnMut(CodecDescriptor) -> bool) {
    if ctx.is_closing() {
        log::warn!("codec info requested while closing");
        return;
    }
    let permit = ctx.gate.ensure_registered();
    match ctx.engine(&permit).enum_codecs(CODEC_INFO_CAPACITY) {
        Ok(codecs) => {
            log::debug!("{} codecs enumerated", codecs.len());
            for codec in codecs {
                if !send(codec) {
                    break;
                }
            }
        }
        Err(status) => log::error!("enum codecs error: {}", status),
    }
}

pub(crate) fn iter(ctx: Arc<ContextInner>) -> CodecInfoIter {
    let (tx, rx) = mpsc::sync_channel(HANDOFF_CAPACITY);
    let spawned = std::thread::Builder::new()
        .name("gua-codec-info".to_string())
        .spawn(move || {
            query(&ctx, |codec| tx.send(codec).is_ok());
            // release before the channel closes
            ctx.gate.release();
            drop(tx);
        });
    if let Err(e) = spawned {
        log::error!("spawn codec info worker: {}", e);
    }
    CodecInfoIter { rx }
}

/// Needs a tokio runtime.
pub(crate) fn stream(ctx: Arc<ContextInner>) -> ReceiverStream<CodecDescriptor> {
    let (tx, rx) = tokio::sync::mpsc::channel(HANDOFF_CAPACITY);
    tokio::task::spawn_blocking(move || {
        query(&ctx, |codec| tx.blocking_send(codec).is_ok());
        ctx.gate.release();
        drop(tx);
    });
    ReceiverStream::new(rx)
}
