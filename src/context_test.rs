// ============================================================================
// Context Scenario Tests
// ============================================================================

use std::{
    sync::{Arc, Mutex, mpsc},
    time::Duration,
};

use futures::StreamExt;
use gua_codec::{CodecId, DecodeContext, VideoDecoder};

use super::GuaContext;
use crate::{
    account::Account,
    callback::{Handlers, RegStartedHandler, RegStateHandler},
    config::{
        AccountConfig, AuthCredInfo, CredentialDataType, EndpointConfig, TransportConfig,
        TransportKind,
    },
    engine::{Engine, EngineState, Status, loopback::LoopbackEngine},
    error::GuaError,
    pipeline::{CodecRegistry, RawDecodeEvent},
    registration::{AccountInfo, RegistrationState, StatusCode},
    testing::{FakeDecoder, RecordingConsumer, SplitEncoder},
};

fn running_context(handlers: Handlers) -> (Arc<LoopbackEngine>, GuaContext, RecordingConsumer) {
    let engine = Arc::new(LoopbackEngine::new());
    let registry = CodecRegistry::new()
        .with_decoder(Arc::new(FakeDecoder::new(CodecId::H264)))
        .with_encoder(Arc::new(SplitEncoder { parts: 2 }));
    let ctx = GuaContext::builder(engine.clone())
        .handlers(handlers)
        .registry(registry)
        .build();

    let consumer = RecordingConsumer::default();
    ctx.set_consumer(Arc::new(consumer.clone())).unwrap();
    ctx.create().unwrap();
    ctx.init(&EndpointConfig::default()).unwrap();
    ctx.set_null_snd_dev().unwrap();
    ctx.transport_create(TransportKind::Udp, None).unwrap();
    ctx.start().unwrap();
    (engine, ctx, consumer)
}

fn alice() -> AccountConfig {
    let mut config = AccountConfig::default();
    config
        .set_id_uri("sip:alice@example.com")
        .set_registrar_uri("sip:registrar.example.com")
        .set_registrar_timeout_secs(3600);
    config
        .add_auth_cred(AuthCredInfo::new(
            "digest",
            "*",
            "alice",
            CredentialDataType::Plain,
            "secret",
        ))
        .unwrap();
    config
}

fn decode_event<'a>(callee_id: &'a str, codec_id: CodecId, payload: &'a [u8]) -> RawDecodeEvent<'a> {
    RawDecodeEvent {
        callee_id,
        codec_id,
        packet_index: 0,
        total_len: payload.len() as i32,
        remaining_len: 0,
        payload,
    }
}

// ------------------------------------------------------------------------
// Registration
// ------------------------------------------------------------------------

#[test]
fn test_alice_registers_then_fails_auth() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handlers = Handlers::new().on_reg_state(move |account: &Account, info: &AccountInfo| {
        sink.lock()
            .unwrap()
            .push((account.id(), info.reg_is_active()));
    });
    let (engine, ctx, _) = running_context(handlers);

    let account = ctx.create_account(&alice(), false).unwrap();
    assert!(account.is_valid());
    assert_eq!(account.registration_state(), RegistrationState::Unregistered);
    assert!(account.registration().is_none());

    engine.notify_reg_started(account.id(), false);
    assert_eq!(account.registration_state(), RegistrationState::Registering);

    assert!(engine.notify_reg_state(account.id(), 200, 3600));
    let info = account.registration().unwrap();
    assert!(info.reg_is_active());
    assert_eq!(info.reg_expires_secs, 3600);
    assert_eq!(info.uri, "sip:alice@example.com");
    assert!(account.info().unwrap().reg_is_active());
    assert_eq!(account.registration_state(), RegistrationState::Registered);

    assert!(engine.notify_reg_state(account.id(), 401, 3600));
    let info = account.registration().unwrap();
    assert!(!info.reg_is_active());
    assert_ne!(info.reg_last_err, 0);
    assert_eq!(info.reg_status_text, "Unauthorized");
    assert_eq!(
        account.registration_state(),
        RegistrationState::Failed(StatusCode::UNAUTHORIZED)
    );

    assert_eq!(
        *seen.lock().unwrap(),
        vec![(account.id(), true), (account.id(), false)]
    );
}

struct Service {
    started: Mutex<Vec<bool>>,
    states: Mutex<Vec<StatusCode>>,
}

impl RegStartedHandler for Service {
    fn on_reg_started(&self, _account: &Account, renew: bool) {
        self.started.lock().unwrap().push(renew);
    }
}

impl RegStateHandler for Service {
    fn on_reg_state(&self, _account: &Account, info: &AccountInfo) {
        self.states.lock().unwrap().push(info.reg_status);
    }
}

#[test]
fn test_service_receives_both_notification_kinds() {
    let service = Arc::new(Service {
        started: Mutex::new(Vec::new()),
        states: Mutex::new(Vec::new()),
    });
    let (engine, ctx, _) = running_context(Handlers::service(service.clone()));
    let account = ctx.create_account(&alice(), true).unwrap();

    engine.notify_reg_started(account.id(), false);
    engine.notify_reg_state(account.id(), 200, 60);
    engine.notify_reg_started(account.id(), true);
    engine.notify_reg_state(account.id(), 200, 60);

    assert_eq!(*service.started.lock().unwrap(), vec![false, true]);
    assert_eq!(*service.states.lock().unwrap(), vec![StatusCode::OK, StatusCode::OK]);
    assert!(account.is_default());
    assert_eq!(ctx.default_account().map(|a| a.id()), Some(account.id()));
}

#[test]
fn test_notification_for_engine_side_account_is_attached() {
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let handlers = Handlers::new().on_reg_state(move |_: &Account, _: &AccountInfo| {
        *counter.lock().unwrap() += 1;
    });
    let (engine, ctx, _) = running_context(handlers);

    let id = engine.acc_add(&alice(), false).unwrap();
    assert!(ctx.account(id).is_none());
    engine.notify_reg_state(id, 200, 3600);

    let account = ctx.account(id).unwrap();
    assert_eq!(account.registration_state(), RegistrationState::Registered);
    assert_eq!(*calls.lock().unwrap(), 1);
    assert_eq!(ctx.accounts().len(), 1);
}

#[test]
fn test_handler_panic_does_not_escape() {
    let handlers = Handlers::new().on_reg_state(|_: &Account, info: &AccountInfo| {
        if info.reg_status == StatusCode::OK {
            panic!("handler bug");
        }
    });
    let (engine, ctx, _) = running_context(handlers);
    let account = ctx.create_account(&alice(), false).unwrap();

    engine.notify_reg_state(account.id(), 200, 3600);
    assert_eq!(account.registration_state(), RegistrationState::Registered);

    engine.notify_reg_state(account.id(), 403, 3600);
    assert_eq!(
        account.registration_state(),
        RegistrationState::Failed(StatusCode(403))
    );
}

#[test]
fn test_auto_registration_triggers_play() {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let handlers = Handlers::new().on_reg_state(move |account: &Account, info: &AccountInfo| {
        if info.reg_is_active() {
            let call = account.make_play("sip:34020000001320000001@32010100");
            let _ = tx.lock().unwrap().send(call.map(|c| c.id));
        }
    });
    let (engine, ctx, _) = running_context(handlers);
    engine.set_auto_register(true);

    ctx.create_account(&alice(), false).unwrap();
    let call = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(call.is_ok());

    let plays = engine.plays();
    assert_eq!(plays.len(), 1);
    assert_eq!(plays[0].1, "sip:34020000001320000001@32010100");
    assert_eq!(plays[0].2.audio_count, 0);
    assert_eq!(plays[0].2.flags, 0);
}

// ------------------------------------------------------------------------
// Accounts and lifecycle
// ------------------------------------------------------------------------

#[test]
fn test_create_account_errors() {
    let (engine, ctx, _) = running_context(Handlers::new());

    let mut bad = alice();
    bad.set_id_uri("alice@example.com");
    let err = ctx.create_account(&bad, false).unwrap_err();
    assert_eq!(err.to_string(), "create account error: 171039");
    assert_eq!(err.status(), Some(Status::INVALID_URI));

    let mut crowded = alice();
    crowded.credentials = vec![AuthCredInfo::default(); 9];
    assert!(matches!(
        ctx.create_account(&crowded, false),
        Err(GuaError::TooManyCredentials { max: 8 })
    ));
    assert_eq!(engine.count("acc_add"), 1);
}

#[test]
fn test_shutdown_deletes_once() {
    let (engine, ctx, _) = running_context(Handlers::new());
    let account = ctx.create_account(&alice(), false).unwrap();

    account.shutdown().unwrap();
    assert_eq!(engine.count("acc_del"), 1);
    assert!(!account.is_valid());

    account.shutdown().unwrap();
    assert_eq!(engine.count("acc_del"), 1);
}

#[test]
fn test_shutdown_of_invalid_account_is_noop() {
    let (engine, ctx, _) = running_context(Handlers::new());
    let account = ctx.create_account(&alice(), false).unwrap();

    assert!(engine.invalidate(account.id()));
    account.shutdown().unwrap();
    assert_eq!(engine.count("acc_del"), 0);
}

#[test]
fn test_operations_on_invalidated_account() {
    let (engine, ctx, _) = running_context(Handlers::new());
    let account = ctx.create_account(&alice(), false).unwrap();
    let id = account.id();
    assert!(engine.invalidate(id));

    assert!(matches!(
        account.make_play("sip:cam@example.com"),
        Err(GuaError::InvalidAccount(acc)) if acc == id.0
    ));
    assert!(matches!(account.set_default(), Err(GuaError::InvalidAccount(_))));
    assert!(matches!(account.info(), Err(GuaError::InvalidAccount(_))));
    assert!(engine.plays().is_empty());
    assert_eq!(engine.count("acc_set_default"), 0);
}

#[test]
fn test_shutdown_after_destroy_is_noop() {
    let (engine, ctx, _) = running_context(Handlers::new());
    let account = ctx.create_account(&alice(), false).unwrap();

    ctx.destroy().unwrap();
    assert!(ctx.is_closing());
    assert!(!account.is_valid());
    account.shutdown().unwrap();
    assert_eq!(engine.count("acc_del"), 0);
    assert_eq!(engine.state(), EngineState::Null);

    assert!(matches!(account.make_play("sip:cam@example.com"), Err(GuaError::Closing)));
    assert!(matches!(ctx.create_account(&alice(), false), Err(GuaError::Closing)));

    // second destroy does not reach the engine
    ctx.destroy().unwrap();
    assert_eq!(engine.count("destroy"), 1);
}

#[test]
fn test_engine_command_errors_carry_status() {
    let engine = Arc::new(LoopbackEngine::new());
    let ctx = GuaContext::builder(engine.clone())
        .registry(CodecRegistry::new())
        .build();

    let err = ctx.init(&EndpointConfig::default()).unwrap_err();
    assert_eq!(err.to_string(), "init error: 70013");

    ctx.create().unwrap();
    engine.fail("transport_create", Status::INVALID_ARG);
    ctx.init(&EndpointConfig::default()).unwrap();
    let mut config = TransportConfig::default();
    config.set_port(5060);
    let err = ctx
        .transport_create(TransportKind::Udp, Some(&config))
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::INVALID_ARG));
}

#[test]
fn test_consumer_fixed_after_start() {
    let (_, ctx, _) = running_context(Handlers::new());
    let other = RecordingConsumer::default();
    assert!(matches!(
        ctx.set_consumer(Arc::new(other)),
        Err(GuaError::PipelineActive)
    ));
}

// ------------------------------------------------------------------------
// Decode path
// ------------------------------------------------------------------------

#[test]
fn test_unknown_codec_event_yields_nothing() {
    let (engine, _ctx, consumer) = running_context(Handlers::new());
    engine.push_decode(decode_event("cam-1", CodecId(999), &[1, 2, 3]));
    engine.push_decode(decode_event("cam-1", CodecId::MPEG4, &[1, 2, 3]));
    assert_eq!(consumer.len(), 0);
}

#[test]
fn test_decode_from_foreign_thread() {
    let (engine, ctx, consumer) = running_context(Handlers::new());
    let before = engine.thread_registrations();

    let worker = {
        let engine = engine.clone();
        std::thread::spawn(move || {
            let payload = vec![7u8; 32];
            for _ in 0..3 {
                engine.push_decode(decode_event("34020000001320000002", CodecId::H264, &payload));
            }
        })
    };
    worker.join().unwrap();

    let received = consumer.received();
    assert_eq!(received.len(), 6);
    assert!(received.iter().all(|(callee, _)| callee == "34020000001320000002"));
    assert_eq!(received.iter().map(|(_, d)| d.len()).sum::<usize>(), 3 * 64);
    assert_eq!(engine.thread_registrations(), before + 1);
    assert_eq!(ctx.pipeline().session_count(), 1);
    assert!(ctx.end_session("34020000001320000002"));
}

#[test]
fn test_decode_dropped_while_closing() {
    let (engine, ctx, consumer) = running_context(Handlers::new());
    ctx.destroy().unwrap();
    engine.push_decode(decode_event("cam-1", CodecId::H264, &[1]));
    assert_eq!(consumer.len(), 0);
}

/// H264 decoder whose `open` parks until the test lets it continue.
struct GatedDecoder {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl VideoDecoder for GatedDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::H264
    }

    fn name(&self) -> &str {
        "gated"
    }

    fn open(&self) -> anyhow::Result<Box<dyn DecodeContext>> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(5));
        FakeDecoder::new(CodecId::H264).open()
    }
}

#[test]
fn test_destroy_waits_for_running_decode() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let registry = CodecRegistry::new()
        .with_decoder(Arc::new(GatedDecoder {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        }))
        .with_encoder(Arc::new(SplitEncoder { parts: 1 }));
    let engine = Arc::new(LoopbackEngine::new());
    let ctx = Arc::new(GuaContext::builder(engine.clone()).registry(registry).build());
    let consumer = RecordingConsumer::default();
    ctx.set_consumer(Arc::new(consumer.clone())).unwrap();
    ctx.create().unwrap();
    ctx.init(&EndpointConfig::default()).unwrap();
    ctx.start().unwrap();

    let media = {
        let engine = engine.clone();
        std::thread::spawn(move || {
            engine.push_decode(decode_event("cam-1", CodecId::H264, &[5u8; 8]));
        })
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let teardown = {
        let ctx = ctx.clone();
        std::thread::spawn(move || {
            let result = ctx.destroy();
            let _ = done_tx.send(());
            result
        })
    };

    // the decode is still inside the pipeline, so the engine must stay up
    assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert!(ctx.is_closing());
    assert_eq!(engine.state(), EngineState::Running);

    release_tx.send(()).unwrap();
    media.join().unwrap();
    teardown.join().unwrap().unwrap();

    assert_eq!(engine.state(), EngineState::Null);
    assert_eq!(engine.count("destroy"), 1);
    assert_eq!(ctx.pipeline().session_count(), 0);
    assert_eq!(consumer.len(), 1);
}

// ------------------------------------------------------------------------
// Codec info
// ------------------------------------------------------------------------

#[test]
fn test_codec_info_iterator() {
    let (engine, ctx, _) = running_context(Handlers::new());
    let codecs: Vec<_> = ctx.codec_info().collect();
    assert_eq!(codecs.len(), 4);
    assert_eq!(codecs[0].id, "H264/97");

    engine.fail("enum_codecs", Status::NOT_FOUND);
    assert_eq!(ctx.codec_info().count(), 0);
}

#[test]
fn test_codec_info_respects_capacity() {
    let codecs = (0..200)
        .map(|i| crate::engine::CodecDescriptor {
            id: format!("codec/{}", i),
            desc: String::new(),
            priority: 1,
        })
        .collect();
    let engine = Arc::new(LoopbackEngine::with_codecs(codecs));
    let ctx = GuaContext::builder(engine.clone())
        .registry(CodecRegistry::new())
        .build();
    ctx.create().unwrap();
    ctx.init(&EndpointConfig::default()).unwrap();

    assert_eq!(ctx.codec_info().count(), crate::codec_info::CODEC_INFO_CAPACITY);
}

#[test]
fn test_codec_info_workers_do_not_accumulate() {
    let (_, ctx, _) = running_context(Handlers::new());
    let before = ctx.thread_gate().registered_count();

    for _ in 0..5 {
        assert_eq!(ctx.codec_info().count(), 4);
    }
    assert_eq!(ctx.thread_gate().registered_count(), before);
}

#[tokio::test]
async fn test_codec_info_stream() {
    let (_, ctx, _) = running_context(Handlers::new());
    let codecs: Vec<_> = ctx.codec_info_stream().collect().await;
    assert_eq!(codecs.len(), 4);
    assert_eq!(codecs[1].id, "PCMU/8000/1");
}
