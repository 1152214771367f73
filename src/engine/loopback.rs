//! In-process engine.
//!
//! Validates commands the way the telephony engine does, keeps account and
//! registration state, and lets callers raise registration and decode
//! notifications from any thread. Every command is recorded.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use super::{
    AccountId, CallId, CodecDescriptor, Engine, EngineEvents, EngineResult, EngineState, Status,
    TransportId, is_sip_uri,
};
use crate::{
    config::{
        AccountConfig, CallSetting, EndpointConfig, MAX_CREDENTIALS, TransportConfig,
        TransportKind,
    },
    lock,
    pipeline::RawDecodeEvent,
    registration::{AccountInfo, StatusCode},
};

/// Engine error space for SIP status codes.
const SIP_ERRNO_START: i32 = 170000;

const AUTO_REGISTER_DELAY: Duration = Duration::from_millis(20);

struct LoopbackAccount {
    reg_timeout_secs: u32,
    info: AccountInfo,
}

struct LoopbackState {
    state: EngineState,
    accounts: BTreeMap<AccountId, LoopbackAccount>,
    default_acc: Option<AccountId>,
    next_acc: i32,
    next_transport: i32,
    next_call: i32,
    transports: Vec<(TransportId, TransportKind, u16)>,
    codecs: Vec<CodecDescriptor>,
    failures: HashMap<&'static str, Status>,
    commands: Vec<&'static str>,
    plays: Vec<(AccountId, String, CallSetting)>,
}

impl LoopbackState {
    fn set_state(&mut self, new_state: EngineState) {
        log::info!("engine state changed: {} --> {}", self.state, new_state);
        self.state = new_state;
    }

    fn require(&self, allowed: impl Fn(EngineState) -> bool) -> EngineResult<()> {
        if allowed(self.state) {
            Ok(())
        } else {
            Err(Status::INVALID_OP)
        }
    }

    fn snapshot(&self, acc: AccountId) -> Option<AccountInfo> {
        self.accounts.get(&acc).map(|a| AccountInfo {
            is_default: self.default_acc == Some(acc),
            ..a.info.clone()
        })
    }
}

struct Shared {
    state: Mutex<LoopbackState>,
    events: Mutex<Option<Weak<dyn EngineEvents>>>,
    thread_registrations: AtomicUsize,
    auto_register: AtomicBool,
}

impl Shared {
    fn events(&self) -> Option<Arc<dyn EngineEvents>> {
        lock(&self.events).as_ref().and_then(Weak::upgrade)
    }

    fn command(&self, op: &'static str) -> EngineResult<std::sync::MutexGuard<'_, LoopbackState>> {
        let mut state = lock(&self.state);
        state.commands.push(op);
        match state.failures.get(op) {
            Some(status) => Err(*status),
            None => Ok(state),
        }
    }

    fn notify_reg_started(&self, acc: AccountId, renew: bool) {
        if let Some(events) = self.events() {
            events.on_reg_started(acc, renew);
        }
    }

    fn notify_reg_state(&self, acc: AccountId, status: u16, expires: u32) -> bool {
        let info = {
            let mut state = lock(&self.state);
            let Some(account) = state.accounts.get_mut(&acc) else {
                return false;
            };
            let code = StatusCode(status);
            account.info.reg_status = code;
            account.info.reg_status_text = code.reason().to_string();
            account.info.reg_expires_secs = expires;
            account.info.reg_last_err = if code.is_success() || code.is_provisional() {
                0
            } else {
                SIP_ERRNO_START + status as i32
            };
            let active = account.info.reg_is_active();
            account.info.online_status = active;
            account.info.online_status_text = if active { "Online" } else { "Offline" }.to_string();
            state.snapshot(acc)
        };

        match (info, self.events()) {
            (Some(info), Some(events)) => {
                events.on_reg_state(acc, info);
                true
            }
            (Some(_), None) => true,
            _ => false,
        }
    }
}

pub struct LoopbackEngine {
    shared: Arc<Shared>,
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::with_codecs(default_codecs())
    }

    pub fn with_codecs(codecs: Vec<CodecDescriptor>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LoopbackState {
                    state: EngineState::Null,
                    accounts: BTreeMap::new(),
                    default_acc: None,
                    next_acc: 0,
                    next_transport: 0,
                    next_call: 0,
                    transports: Vec::new(),
                    codecs,
                    failures: HashMap::new(),
                    commands: Vec::new(),
                    plays: Vec::new(),
                }),
                events: Mutex::new(None),
                thread_registrations: AtomicUsize::new(0),
                auto_register: AtomicBool::new(false),
            }),
        }
    }

    /// Answers every registration with 200 from a worker thread shortly after
    /// the account is added.
    pub fn set_auto_register(&self, enabled: bool) {
        self.shared.auto_register.store(enabled, Ordering::Relaxed);
    }

    /// Makes every later `op` command fail with `status`.
    pub fn fail(&self, op: &'static str, status: Status) {
        lock(&self.shared.state).failures.insert(op, status);
    }

    pub fn clear_failure(&self, op: &'static str) {
        lock(&self.shared.state).failures.remove(op);
    }

    /// Commands received so far, in order.
    pub fn commands(&self) -> Vec<&'static str> {
        lock(&self.shared.state).commands.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        lock(&self.shared.state)
            .commands
            .iter()
            .filter(|c| **c == op)
            .count()
    }

    pub fn plays(&self) -> Vec<(AccountId, String, CallSetting)> {
        lock(&self.shared.state).plays.clone()
    }

    pub fn transports(&self) -> Vec<(TransportId, TransportKind, u16)> {
        lock(&self.shared.state).transports.clone()
    }

    pub fn thread_registrations(&self) -> usize {
        self.shared.thread_registrations.load(Ordering::Relaxed)
    }

    pub fn account_ids(&self) -> Vec<AccountId> {
        lock(&self.shared.state).accounts.keys().copied().collect()
    }

    pub fn notify_reg_started(&self, acc: AccountId, renew: bool) {
        self.shared.notify_reg_started(acc, renew);
    }

    /// Records a registration answer and notifies. Returns false for an
    /// unknown account.
    pub fn notify_reg_state(&self, acc: AccountId, status: u16, expires: u32) -> bool {
        self.shared.notify_reg_state(acc, status, expires)
    }

    pub fn push_decode(&self, event: RawDecodeEvent<'_>) {
        if let Some(events) = self.shared.events() {
            events.on_decode(event);
        }
    }

    /// Drops an account on the engine side only, as a global shutdown would.
    pub fn invalidate(&self, acc: AccountId) -> bool {
        let mut state = lock(&self.shared.state);
        if state.default_acc == Some(acc) {
            state.default_acc = None;
        }
        state.accounts.remove(&acc).is_some()
    }

    fn spawn_registration(&self, acc: AccountId, expires: u32) {
        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name(format!("loopback-reg-{}", acc))
            .spawn(move || {
                std::thread::sleep(AUTO_REGISTER_DELAY);
                shared.notify_reg_started(acc, false);
                shared.notify_reg_state(acc, StatusCode::OK.0, expires);
            });
        if let Err(e) = spawned {
            log::error!("spawn registration worker for account {}: {}", acc, e);
        }
    }
}

impl Engine for LoopbackEngine {
    fn attach(&self, events: Weak<dyn EngineEvents>) {
        *lock(&self.shared.events) = Some(events);
    }

    fn register_thread(&self, name: &str) -> EngineResult<()> {
        if let Some(status) = lock(&self.shared.state).failures.get("register_thread") {
            return Err(*status);
        }
        self.shared.thread_registrations.fetch_add(1, Ordering::Relaxed);
        log::trace!("thread {} registered", name);
        Ok(())
    }

    fn create(&self) -> EngineResult<()> {
        let mut state = self.shared.command("create")?;
        state.require(|s| s == EngineState::Null)?;
        state.set_state(EngineState::Created);
        Ok(())
    }

    fn init(&self, config: &EndpointConfig) -> EngineResult<()> {
        let mut state = self.shared.command("init")?;
        state.require(|s| s == EngineState::Created)?;
        log::debug!(
            "init endpoint {}, max calls {}, log level {}",
            config.user_agent,
            config.max_calls,
            config.log.level
        );
        state.set_state(EngineState::Init);
        Ok(())
    }

    fn start(&self) -> EngineResult<()> {
        let mut state = self.shared.command("start")?;
        state.require(|s| s == EngineState::Init)?;
        state.set_state(EngineState::Starting);
        state.set_state(EngineState::Running);
        Ok(())
    }

    fn destroy(&self) -> EngineResult<()> {
        let mut state = self.shared.command("destroy")?;
        if state.state == EngineState::Null {
            return Ok(());
        }
        state.set_state(EngineState::Closing);
        state.accounts.clear();
        state.default_acc = None;
        state.transports.clear();
        state.set_state(EngineState::Null);
        Ok(())
    }

    fn state(&self) -> EngineState {
        lock(&self.shared.state).state
    }

    fn set_null_snd_dev(&self) -> EngineResult<()> {
        let state = self.shared.command("set_null_snd_dev")?;
        state.require(|s| s >= EngineState::Init && s < EngineState::Closing)
    }

    fn transport_create(
        &self,
        kind: TransportKind,
        config: &TransportConfig,
    ) -> EngineResult<TransportId> {
        let mut state = self.shared.command("transport_create")?;
        state.require(|s| s >= EngineState::Init && s < EngineState::Closing)?;
        let id = TransportId(state.next_transport);
        state.next_transport += 1;
        state.transports.push((id, kind, config.port));
        Ok(id)
    }

    fn acc_add(&self, config: &AccountConfig, make_default: bool) -> EngineResult<AccountId> {
        let acc = {
            let mut state = self.shared.command("acc_add")?;
            state.require(|s| s >= EngineState::Init && s < EngineState::Closing)?;
            if !is_sip_uri(&config.id_uri) {
                return Err(Status::INVALID_URI);
            }
            if !config.reg_uri.is_empty() && !is_sip_uri(&config.reg_uri) {
                return Err(Status::INVALID_URI);
            }
            if config.credentials.len() > MAX_CREDENTIALS {
                return Err(Status::TOO_MANY);
            }

            let acc = AccountId(state.next_acc);
            state.next_acc += 1;
            state.accounts.insert(
                acc,
                LoopbackAccount {
                    reg_timeout_secs: config.reg_timeout_secs,
                    info: AccountInfo {
                        uri: config.id_uri.clone(),
                        reg_is_configured: !config.reg_uri.is_empty(),
                        online_status_text: "Offline".to_string(),
                        ..Default::default()
                    },
                },
            );
            if make_default {
                state.default_acc = Some(acc);
            }
            acc
        };

        if !config.reg_uri.is_empty() && self.shared.auto_register.load(Ordering::Relaxed) {
            self.spawn_registration(acc, config.reg_timeout_secs);
        }
        Ok(acc)
    }

    fn acc_is_valid(&self, acc: AccountId) -> bool {
        lock(&self.shared.state).accounts.contains_key(&acc)
    }

    fn acc_set_default(&self, acc: AccountId) -> EngineResult<()> {
        let mut state = self.shared.command("acc_set_default")?;
        if !state.accounts.contains_key(&acc) {
            return Err(Status::INVALID_ARG);
        }
        state.default_acc = Some(acc);
        Ok(())
    }

    fn acc_get_default(&self) -> Option<AccountId> {
        lock(&self.shared.state).default_acc
    }

    fn acc_del(&self, acc: AccountId) -> EngineResult<()> {
        let mut state = self.shared.command("acc_del")?;
        if state.accounts.remove(&acc).is_none() {
            return Err(Status::INVALID_ARG);
        }
        if state.default_acc == Some(acc) {
            state.default_acc = None;
        }
        Ok(())
    }

    fn acc_get_info(&self, acc: AccountId) -> EngineResult<AccountInfo> {
        let state = self.shared.command("acc_get_info")?;
        state.snapshot(acc).ok_or(Status::INVALID_ARG)
    }

    fn enum_codecs(&self, capacity: usize) -> EngineResult<Vec<CodecDescriptor>> {
        let state = self.shared.command("enum_codecs")?;
        state.require(|s| s >= EngineState::Init && s < EngineState::Closing)?;
        Ok(state.codecs.iter().take(capacity).cloned().collect())
    }

    fn call_make_play(
        &self,
        acc: AccountId,
        dst_uri: &str,
        setting: &CallSetting,
    ) -> EngineResult<CallId> {
        let mut state = self.shared.command("call_make_play")?;
        state.require(|s| s == EngineState::Running)?;
        if !state.accounts.contains_key(&acc) {
            return Err(Status::INVALID_ARG);
        }
        if !is_sip_uri(dst_uri) {
            return Err(Status::INVALID_URI);
        }
        let call = CallId(state.next_call);
        state.next_call += 1;
        state.plays.push((acc, dst_uri.to_string(), *setting));
        log::debug!(
            "play {} from account {} (timeout {}s)",
            dst_uri,
            acc,
            state.accounts.get(&acc).map(|a| a.reg_timeout_secs).unwrap_or_default()
        );
        Ok(call)
    }
}

fn default_codecs() -> Vec<CodecDescriptor> {
    [
        ("H264/97", "H.264", 128),
        ("PCMU/8000/1", "", 127),
        ("PCMA/8000/1", "", 126),
        ("speex/8000/1", "", 125),
    ]
    .into_iter()
    .map(|(id, desc, priority)| CodecDescriptor {
        id: id.to_string(),
        desc: desc.to_string(),
        priority,
    })
    .collect()
}
