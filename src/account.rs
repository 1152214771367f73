use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use crate::{
    config::CallSetting,
    context::ContextInner,
    engine::{AccountId, CallId, EngineState},
    error::{GuaError, Result},
    lock,
    registration::{AccountInfo, RegistrationState},
    thread_gate::ThreadPermit,
};

/// Handle to an engine account. Validity is re-checked on every operation.
#[derive(Clone)]
pub struct Account {
    id: AccountId,
    ctx: Weak<ContextInner>,
}

/// Outbound media session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Call {
    pub id: CallId,
    pub account: AccountId,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account").field("id", &self.id).finish()
    }
}

impl Account {
    pub(crate) fn new(id: AccountId, ctx: Weak<ContextInner>) -> Self {
        Self { id, ctx }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    fn context(&self) -> Result<Arc<ContextInner>> {
        match self.ctx.upgrade() {
            Some(ctx) if !ctx.is_closing() => Ok(ctx),
            _ => Err(GuaError::Closing),
        }
    }

    fn ensure_valid(&self, ctx: &ContextInner, permit: &ThreadPermit) -> Result<()> {
        if ctx.engine(permit).acc_is_valid(self.id) {
            Ok(())
        } else {
            Err(GuaError::InvalidAccount(self.id.0))
        }
    }

    pub fn is_valid(&self) -> bool {
        let Ok(ctx) = self.context() else {
            return false;
        };
        let permit = ctx.gate.ensure_registered();
        ctx.engine(&permit).acc_is_valid(self.id)
    }

    pub fn set_default(&self) -> Result<()> {
        let ctx = self.context()?;
        let permit = ctx.gate.ensure_registered();
        self.ensure_valid(&ctx, &permit)?;
        ctx.engine(&permit)
            .acc_set_default(self.id)
            .map_err(GuaError::engine("set default account"))
    }

    pub fn is_default(&self) -> bool {
        let Ok(ctx) = self.context() else {
            return false;
        };
        let permit = ctx.gate.ensure_registered();
        ctx.engine(&permit).acc_get_default() == Some(self.id)
    }

    /// Queries the engine for a fresh snapshot.
    pub fn info(&self) -> Result<AccountInfo> {
        let ctx = self.context()?;
        let permit = ctx.gate.ensure_registered();
        self.ensure_valid(&ctx, &permit)?;
        ctx.engine(&permit)
            .acc_get_info(self.id)
            .map_err(GuaError::engine("account get info"))
    }

    /// Snapshot from the last "registration state changed" notification.
    pub fn registration(&self) -> Option<AccountInfo> {
        let ctx = self.ctx.upgrade()?;
        let entry = ctx.accounts.get(self.id)?;
        let record = lock(&entry.record);
        record.info.clone()
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.ctx
            .upgrade()
            .and_then(|ctx| ctx.accounts.get(self.id))
            .map(|entry| lock(&entry.record).state)
            .unwrap_or_default()
    }

    /// Opens a receive-only video session to `dst_uri`.
    pub fn make_play(&self, dst_uri: &str) -> Result<Call> {
        self.make_call(dst_uri, &CallSetting::play())
    }

    pub fn make_call(&self, dst_uri: &str, setting: &CallSetting) -> Result<Call> {
        let ctx = self.context()?;
        let permit = ctx.gate.ensure_registered();
        self.ensure_valid(&ctx, &permit)?;
        let id = ctx
            .engine(&permit)
            .call_make_play(self.id, dst_uri, setting)
            .map_err(GuaError::engine("make play"))?;
        log::info!("account {} play {} as call {}", self.id, dst_uri, id);
        Ok(Call {
            id,
            account: self.id,
        })
    }

    /// Deletes the account from the engine. A no-op once the account is gone
    /// or the context has started closing.
    pub fn shutdown(&self) -> Result<()> {
        let Some(ctx) = self.ctx.upgrade() else {
            return Ok(());
        };
        if ctx.is_closing() || !ctx.accounts.contains(self.id) {
            log::debug!("account {} shutdown skipped", self.id);
            return Ok(());
        }

        let permit = ctx.gate.ensure_registered();
        let engine = ctx.engine(&permit);
        if engine.state() >= EngineState::Closing || !engine.acc_is_valid(self.id) {
            ctx.accounts.remove(self.id);
            return Ok(());
        }

        engine
            .acc_del(self.id)
            .map_err(GuaError::engine("delete account"))?;
        ctx.accounts.remove(self.id);
        log::info!("account {} shutdown", self.id);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct Registration {
    pub state: RegistrationState,
    pub info: Option<AccountInfo>,
}

pub(crate) struct AccountEntry {
    /// Serializes notification delivery for one account.
    pub delivery: Mutex<()>,
    pub record: Mutex<Registration>,
}

/// Accounts created through, or reported to, one context.
#[derive(Default)]
pub(crate) struct AccountDirectory {
    entries: Mutex<HashMap<AccountId, Arc<AccountEntry>>>,
}

impl AccountDirectory {
    pub fn insert(&self, id: AccountId) -> Arc<AccountEntry> {
        lock(&self.entries)
            .entry(id)
            .or_insert_with(|| {
                Arc::new(AccountEntry {
                    delivery: Mutex::new(()),
                    record: Mutex::new(Registration::default()),
                })
            })
            .clone()
    }

    pub fn get(&self, id: AccountId) -> Option<Arc<AccountEntry>> {
        lock(&self.entries).get(&id).cloned()
    }

    pub fn contains(&self, id: AccountId) -> bool {
        lock(&self.entries).contains_key(&id)
    }

    pub fn remove(&self, id: AccountId) -> bool {
        lock(&self.entries).remove(&id).is_some()
    }

    pub fn ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<_> = lock(&self.entries).keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}
