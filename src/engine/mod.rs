//! Boundary to the telephony engine.
//!
//! [`Engine`] is the outbound command set, [`EngineEvents`] the inbound
//! notifications. Engine threads call into [`EngineEvents`] concurrently and
//! at any time; every command blocks until the engine replies.

use std::{
    fmt::{Display, Formatter},
    sync::Weak,
};

use crate::{
    config::{AccountConfig, CallSetting, EndpointConfig, TransportConfig, TransportKind},
    pipeline::RawDecodeEvent,
    registration::AccountInfo,
};

pub mod loopback;

/// Numeric engine status, 0 on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    pub const SUCCESS: Status = Status(0);
    pub const INVALID_ARG: Status = Status(70004);
    pub const NOT_FOUND: Status = Status(70006);
    pub const TOO_MANY: Status = Status(70010);
    pub const INVALID_OP: Status = Status(70013);
    pub const INVALID_URI: Status = Status(171039);

    pub fn is_success(&self) -> bool {
        self.0 == 0
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type EngineResult<T> = std::result::Result<T, Status>;

macro_rules! engine_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub i32);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

engine_id!(AccountId);
engine_id!(TransportId);
engine_id!(CallId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum EngineState {
    #[default]
    Null,
    Created,
    Init,
    Starting,
    Running,
    Closing,
}

impl EngineState {
    pub fn name(&self) -> &'static str {
        match self {
            EngineState::Null => "NULL",
            EngineState::Created => "CREATED",
            EngineState::Init => "INIT",
            EngineState::Starting => "STARTING",
            EngineState::Running => "RUNNING",
            EngineState::Closing => "CLOSING",
        }
    }
}

impl Display for EngineState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of the engine's codec table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub id: String,
    pub desc: String,
    pub priority: u8,
}

impl Display for CodecDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.desc.is_empty() {
            write!(f, "{} priority: {}", self.id, self.priority)
        } else {
            write!(f, "{} ({}) priority: {}", self.id, self.desc, self.priority)
        }
    }
}

/// Commands issued to the engine. Callers must have registered the current
/// thread with the engine first.
pub trait Engine: Send + Sync {
    /// Hands the engine the sink for its notifications.
    fn attach(&self, _events: Weak<dyn EngineEvents>) {}

    fn register_thread(&self, name: &str) -> EngineResult<()>;

    fn create(&self) -> EngineResult<()>;

    fn init(&self, config: &EndpointConfig) -> EngineResult<()>;

    fn start(&self) -> EngineResult<()>;

    fn destroy(&self) -> EngineResult<()>;

    fn state(&self) -> EngineState;

    fn set_null_snd_dev(&self) -> EngineResult<()>;

    fn transport_create(
        &self,
        kind: TransportKind,
        config: &TransportConfig,
    ) -> EngineResult<TransportId>;

    fn acc_add(&self, config: &AccountConfig, make_default: bool) -> EngineResult<AccountId>;

    fn acc_is_valid(&self, acc: AccountId) -> bool;

    fn acc_set_default(&self, acc: AccountId) -> EngineResult<()>;

    fn acc_get_default(&self) -> Option<AccountId>;

    fn acc_del(&self, acc: AccountId) -> EngineResult<()>;

    fn acc_get_info(&self, acc: AccountId) -> EngineResult<AccountInfo>;

    /// Returns at most `capacity` codecs.
    fn enum_codecs(&self, capacity: usize) -> EngineResult<Vec<CodecDescriptor>>;

    fn call_make_play(
        &self,
        acc: AccountId,
        dst_uri: &str,
        setting: &CallSetting,
    ) -> EngineResult<CallId>;
}

/// Notifications raised on engine threads.
pub trait EngineEvents: Send + Sync {
    fn on_reg_started(&self, acc: AccountId, renew: bool);

    fn on_reg_state(&self, acc: AccountId, info: AccountInfo);

    /// The payload is only valid for the duration of the call.
    fn on_decode(&self, event: RawDecodeEvent<'_>);
}

pub(crate) fn is_sip_uri(uri: &str) -> bool {
    let rest = uri
        .strip_prefix("sip:")
        .or_else(|| uri.strip_prefix("sips:"));
    match rest {
        Some(rest) => !rest.is_empty() && !rest.contains(char::is_whitespace),
        None => false,
    }
}
