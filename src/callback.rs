use std::sync::Arc;

use crate::{account::Account, registration::AccountInfo};

pub trait RegStartedHandler: Send + Sync {
    fn on_reg_started(&self, account: &Account, renew: bool);
}

/// Runs on the engine's callback thread once per "registration state changed"
/// notification. Must not block.
pub trait RegStateHandler: Send + Sync {
    fn on_reg_state(&self, account: &Account, info: &AccountInfo);
}

impl<F> RegStartedHandler for F
where
    F: Fn(&Account, bool) + Send + Sync,
{
    fn on_reg_started(&self, account: &Account, renew: bool) {
        self(account, renew)
    }
}

impl<F> RegStateHandler for F
where
    F: Fn(&Account, &AccountInfo) + Send + Sync,
{
    fn on_reg_state(&self, account: &Account, info: &AccountInfo) {
        self(account, info)
    }
}

/// Notification handlers wired into a context. Only the kinds that are set
/// are delivered.
#[derive(Clone, Default)]
pub struct Handlers {
    reg_started: Option<Arc<dyn RegStartedHandler>>,
    reg_state: Option<Arc<dyn RegStateHandler>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wires both notification kinds to one service object.
    pub fn service<T>(service: Arc<T>) -> Self
    where
        T: RegStartedHandler + RegStateHandler + 'static,
    {
        Self {
            reg_started: Some(service.clone()),
            reg_state: Some(service),
        }
    }

    pub fn on_reg_started(mut self, handler: impl RegStartedHandler + 'static) -> Self {
        self.reg_started = Some(Arc::new(handler));
        self
    }

    pub fn on_reg_state(mut self, handler: impl RegStateHandler + 'static) -> Self {
        self.reg_state = Some(Arc::new(handler));
        self
    }

    pub fn reg_started(&self) -> Option<&Arc<dyn RegStartedHandler>> {
        self.reg_started.as_ref()
    }

    pub fn reg_state(&self) -> Option<&Arc<dyn RegStateHandler>> {
        self.reg_state.as_ref()
    }
}
