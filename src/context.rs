use std::{
    cell::Cell,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Condvar, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio_stream::wrappers::ReceiverStream;

use crate::{
    account::{Account, AccountDirectory, AccountEntry},
    callback::Handlers,
    codec_info::{self, CodecInfoIter},
    config::{AccountConfig, EndpointConfig, MAX_CREDENTIALS, PipelineConfig, TransportConfig, TransportKind},
    dispatch::Consumer,
    engine::{AccountId, CodecDescriptor, Engine, EngineEvents, EngineState, TransportId},
    error::{GuaError, Result},
    lock,
    pipeline::{CodecRegistry, RawDecodeEvent, TranscodePipeline},
    registration::AccountInfo,
    thread_gate::{ThreadGate, ThreadPermit},
};

thread_local! {
    /// Notification bodies currently running on this thread.
    static CALLBACK_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Counts notification bodies that are executing, so teardown can wait for them.
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

struct InFlightGuard<'a>(&'a InFlight);

impl InFlight {
    fn enter(&self) -> InFlightGuard<'_> {
        *lock(&self.count) += 1;
        CALLBACK_DEPTH.with(|depth| depth.set(depth.get() + 1));
        InFlightGuard(self)
    }

    /// Blocks until only the calling thread's own callbacks are still running.
    fn wait_idle(&self) {
        let own = CALLBACK_DEPTH.with(Cell::get);
        let mut count = lock(&self.count);
        while *count > own {
            count = self
                .idle
                .wait(count)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        CALLBACK_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
        let mut count = lock(&self.0.count);
        *count = count.saturating_sub(1);
        self.0.idle.notify_all();
    }
}

pub(crate) struct ContextInner {
    me: Weak<ContextInner>,
    engine: Arc<dyn Engine>,
    pub(crate) gate: ThreadGate,
    pub(crate) accounts: AccountDirectory,
    handlers: Handlers,
    pub(crate) pipeline: TranscodePipeline,
    closing: AtomicBool,
    in_flight: InFlight,
}

impl ContextInner {
    /// Engine access is only handed out to registered threads.
    pub(crate) fn engine(&self, _permit: &ThreadPermit) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    fn account(&self, id: AccountId) -> Account {
        Account::new(id, self.me.clone())
    }

    /// The engine may notify before `acc_add` has returned, so ids it still
    /// reports as valid are adopted.
    fn account_entry(&self, permit: &ThreadPermit, id: AccountId) -> Option<Arc<AccountEntry>> {
        if let Some(entry) = self.accounts.get(id) {
            return Some(entry);
        }
        if self.engine(permit).acc_is_valid(id) {
            log::debug!("account {} attached from notification", id);
            return Some(self.accounts.insert(id));
        }
        None
    }

    /// Runs a callback body without letting a panic reach the engine thread.
    /// The body counts as in flight until it returns; it must check
    /// `is_closing` itself.
    fn guarded(&self, name: &str, f: impl FnOnce()) {
        let _in_flight = self.in_flight.enter();
        if catch_unwind(AssertUnwindSafe(f)).is_err() {
            log::error!("{} callback panicked", name);
        }
    }
}

impl EngineEvents for ContextInner {
    fn on_reg_started(&self, acc: AccountId, renew: bool) {
        self.guarded("reg started", || {
            let permit = self.gate.ensure_registered();
            if self.is_closing() {
                return;
            }
            let Some(entry) = self.account_entry(&permit, acc) else {
                log::warn!("reg started for unknown account {}", acc);
                return;
            };

            let _delivery = lock(&entry.delivery);
            {
                let mut record = lock(&entry.record);
                let state = record.state.on_started(renew);
                log::debug!("account {} registration {:?} -> {:?}", acc, record.state, state);
                record.state = state;
            }
            if let Some(handler) = self.handlers.reg_started() {
                handler.on_reg_started(&self.account(acc), renew);
            }
        });
    }

    fn on_reg_state(&self, acc: AccountId, info: AccountInfo) {
        self.guarded("reg state", || {
            let permit = self.gate.ensure_registered();
            if self.is_closing() {
                return;
            }
            let Some(entry) = self.account_entry(&permit, acc) else {
                log::warn!("reg state for unknown account {}", acc);
                return;
            };

            let _delivery = lock(&entry.delivery);
            {
                let mut record = lock(&entry.record);
                let state = record.state.on_info(&info);
                if state != record.state {
                    log::info!("account {} registration {:?} -> {:?}", acc, record.state, state);
                }
                record.state = state;
                record.info = Some(info.clone());
            }
            if let Some(handler) = self.handlers.reg_state() {
                handler.on_reg_state(&self.account(acc), &info);
            }
        });
    }

    fn on_decode(&self, event: RawDecodeEvent<'_>) {
        self.guarded("decode", || {
            let _permit = self.gate.ensure_registered();
            if self.is_closing() {
                log::debug!("decode event for {} dropped while closing", event.callee_id);
                return;
            }
            self.pipeline.handle(&event);
        });
    }
}

pub struct GuaContextBuilder {
    engine: Arc<dyn Engine>,
    handlers: Handlers,
    pipeline: PipelineConfig,
    registry: Option<CodecRegistry>,
}

impl GuaContextBuilder {
    pub fn handlers(mut self, handlers: Handlers) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn pipeline(mut self, config: PipelineConfig) -> Self {
        self.pipeline = config;
        self
    }

    /// Replaces the default codec registry.
    pub fn registry(mut self, registry: CodecRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> GuaContext {
        let registry = self
            .registry
            .unwrap_or_else(|| CodecRegistry::with_defaults(&self.pipeline));
        let inner = Arc::new_cyclic(|me| ContextInner {
            me: me.clone(),
            gate: ThreadGate::new(self.engine.clone()),
            engine: self.engine,
            accounts: AccountDirectory::default(),
            handlers: self.handlers,
            pipeline: TranscodePipeline::new(registry, self.pipeline.decode_mode),
            closing: AtomicBool::new(false),
            in_flight: InFlight::default(),
        });
        let events: Weak<ContextInner> = Arc::downgrade(&inner);
        inner.engine.attach(events);
        GuaContext { inner }
    }
}

/// Owns one engine instance together with the accounts, handlers and decode
/// pipeline bound to it.
pub struct GuaContext {
    inner: Arc<ContextInner>,
}

impl GuaContext {
    pub fn builder(engine: Arc<dyn Engine>) -> GuaContextBuilder {
        GuaContextBuilder {
            engine,
            handlers: Handlers::default(),
            pipeline: PipelineConfig::default(),
            registry: None,
        }
    }

    pub fn new(engine: Arc<dyn Engine>, handlers: Handlers) -> Self {
        Self::builder(engine).handlers(handlers).build()
    }

    fn engine_call<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&dyn Engine) -> std::result::Result<T, crate::engine::Status>,
    ) -> Result<T> {
        if self.inner.is_closing() {
            return Err(GuaError::Closing);
        }
        let permit = self.inner.gate.ensure_registered();
        f(self.inner.engine(&permit)).map_err(GuaError::engine(op))
    }

    pub fn create(&self) -> Result<()> {
        self.engine_call("create", |engine| engine.create())
    }

    pub fn init(&self, config: &EndpointConfig) -> Result<()> {
        self.engine_call("init", |engine| engine.init(config))
    }

    pub fn set_null_snd_dev(&self) -> Result<()> {
        self.engine_call("set null sound device", |engine| engine.set_null_snd_dev())
    }

    pub fn transport_create(
        &self,
        kind: TransportKind,
        config: Option<&TransportConfig>,
    ) -> Result<TransportId> {
        let default = TransportConfig::default();
        let config = config.unwrap_or(&default);
        let id = self.engine_call("create transport", |engine| {
            engine.transport_create(kind, config)
        })?;
        log::info!("transport {} created: {:?} port {}", id, kind, config.port);
        Ok(id)
    }

    /// Starts the engine. The consumer is fixed from here on.
    pub fn start(&self) -> Result<()> {
        self.engine_call("start", |engine| engine.start())?;
        self.inner.pipeline.dispatch().activate();
        Ok(())
    }

    /// Tears the engine down. Account shutdowns and new notifications become
    /// no-ops first, notifications already running are waited for, then the
    /// engine is destroyed from a registered thread.
    pub fn destroy(&self) -> Result<()> {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            log::warn!("context already closing");
            return Ok(());
        }
        self.inner.in_flight.wait_idle();
        let permit = self.inner.gate.ensure_registered();
        let result = self
            .inner
            .engine(&permit)
            .destroy()
            .map_err(GuaError::engine("destroy"));
        self.inner.pipeline.clear_sessions();
        self.inner.accounts.clear();
        log::info!("context destroyed");
        result
    }

    pub fn is_closing(&self) -> bool {
        self.inner.is_closing()
    }

    pub fn state(&self) -> EngineState {
        let permit = self.inner.gate.ensure_registered();
        self.inner.engine(&permit).state()
    }

    pub fn set_consumer(&self, consumer: Arc<dyn Consumer>) -> Result<()> {
        self.inner.pipeline.dispatch().set(consumer)
    }

    pub fn create_account(&self, config: &AccountConfig, make_default: bool) -> Result<Account> {
        if config.credentials.len() > MAX_CREDENTIALS {
            return Err(GuaError::TooManyCredentials {
                max: MAX_CREDENTIALS,
            });
        }
        let id = self.engine_call("create account", |engine| {
            engine.acc_add(config, make_default)
        })?;
        self.inner.accounts.insert(id);
        log::info!("account {} created for {}", id, config.id_uri);
        Ok(self.inner.account(id))
    }

    pub fn account(&self, id: AccountId) -> Option<Account> {
        self.inner
            .accounts
            .contains(id)
            .then(|| self.inner.account(id))
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.inner
            .accounts
            .ids()
            .into_iter()
            .map(|id| self.inner.account(id))
            .collect()
    }

    pub fn default_account(&self) -> Option<Account> {
        let permit = self.inner.gate.ensure_registered();
        let id = self.inner.engine(&permit).acc_get_default()?;
        self.account(id)
    }

    /// Enumerates codecs from a worker thread.
    pub fn codec_info(&self) -> CodecInfoIter {
        codec_info::iter(self.inner.clone())
    }

    /// Async variant of [`GuaContext::codec_info`]; needs a tokio runtime.
    pub fn codec_info_stream(&self) -> ReceiverStream<CodecDescriptor> {
        codec_info::stream(self.inner.clone())
    }

    /// Releases the decoder kept for a session that has ended.
    pub fn end_session(&self, callee_id: &str) -> bool {
        self.inner.pipeline.end_session(callee_id)
    }

    pub fn pipeline(&self) -> &TranscodePipeline {
        &self.inner.pipeline
    }

    pub fn thread_gate(&self) -> &ThreadGate {
        &self.inner.gate
    }

    pub(crate) fn inner(&self) -> &Arc<ContextInner> {
        &self.inner
    }
}

#[cfg(test)]
#[path = "context_test.rs"]
mod context_test;
