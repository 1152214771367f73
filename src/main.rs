use std::{
    io::Read,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::StreamExt;
use gua::{
    Account, AccountInfo, GuaContext, Handlers, RawDecodeEvent, RegStartedHandler,
    RegStateHandler,
    config::{AppConfig, ReplayConfig},
    engine::loopback::LoopbackEngine,
    sink::FileSink,
};
use gua_codec::{CodecId, ps::PsDemuxer};
use tokio_util::sync::CancellationToken;

/// Plays every configured target once the account is registered.
struct ServiceCallback {
    targets: Vec<String>,
    played: AtomicBool,
}

impl RegStartedHandler for ServiceCallback {
    fn on_reg_started(&self, account: &Account, renew: bool) {
        log::info!("account {} registration started, renew: {}", account.id(), renew);
    }
}

impl RegStateHandler for ServiceCallback {
    fn on_reg_state(&self, account: &Account, info: &AccountInfo) {
        log::info!("account {} registration state: {}", account.id(), info);
        if !info.reg_is_active() || self.played.swap(true, Ordering::AcqRel) {
            return;
        }
        for target in &self.targets {
            match account.make_play(target) {
                Ok(call) => log::info!("play {} started as call {}", target, call.id),
                Err(e) => log::error!("play {} error: {}", target, e),
            }
        }
    }
}

/// Feeds a PS capture through the engine's decode path, as a media thread would.
fn replay(engine: &LoopbackEngine, config: &ReplayConfig, cancel: &CancellationToken) -> anyhow::Result<()> {
    let mut file = std::fs::File::open(&config.path)?;
    let mut demuxer = PsDemuxer::with_video_codec(CodecId::H264);
    let mut buf = vec![0u8; config.chunk_size.max(1)];
    let mut frames = 0usize;

    let mut push = |frame: gua_codec::ps::PsFrame| {
        engine.push_decode(RawDecodeEvent {
            callee_id: &config.callee_id,
            codec_id: frame.codec_id,
            packet_index: frame.index as i32,
            total_len: frame.expected_len as i32,
            remaining_len: frame.remaining() as i32,
            payload: &frame.data,
        });
        frames += 1;
    };

    while !cancel.is_cancelled() {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        for frame in demuxer.push(&buf[..n]) {
            push(frame);
        }
    }
    if let Some(frame) = demuxer.finish() {
        push(frame);
    }

    log::info!(
        "replay of '{}' done: {} frames, {} bytes skipped",
        config.path.display(),
        frames,
        demuxer.skipped_bytes()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(&path)?,
        None => AppConfig::default(),
    };

    env_logger::Builder::new()
        .filter_level(config.endpoint.log.level_filter())
        .parse_default_env()
        .init();
    gua_codec::init()?;
    std::fs::create_dir_all(&config.output_dir)?;

    let engine = Arc::new(LoopbackEngine::new());
    engine.set_auto_register(true);

    let service = Arc::new(ServiceCallback {
        targets: config.targets.clone(),
        played: AtomicBool::new(false),
    });
    let ctx = GuaContext::builder(engine.clone())
        .handlers(Handlers::service(service))
        .pipeline(config.pipeline)
        .build();
    ctx.set_consumer(Arc::new(FileSink::new(&config.output_dir)))?;

    ctx.create()?;
    ctx.init(&config.endpoint)?;
    ctx.set_null_snd_dev()?;
    ctx.transport_create(config.transport.kind, Some(&config.transport))?;
    ctx.start()?;

    let mut codecs = ctx.codec_info_stream();
    while let Some(codec) = codecs.next().await {
        log::info!("codec {}", codec);
    }

    let account = match &config.account {
        Some(account) => Some(ctx.create_account(account, true)?),
        None => None,
    };

    let cancel = CancellationToken::new();

    let replay_task = config.replay.clone().map(|replay_config| {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = replay(&engine, &replay_config, &cancel) {
                log::error!("replay '{}' error: {:#}", replay_config.path.display(), e);
            }
            replay_config.callee_id
        })
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    if let Some(task) = replay_task {
        match task.await {
            Ok(callee_id) => {
                ctx.end_session(&callee_id);
            }
            Err(e) => log::error!("replay task error: {}", e),
        }
    }
    if let Some(account) = account {
        if let Err(e) = account.shutdown() {
            log::error!("account shutdown error: {}", e);
        }
    }
    ctx.destroy()?;
    Ok(())
}
