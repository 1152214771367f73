use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod account;
pub mod callback;
pub mod codec_info;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod pipeline;
pub mod registration;
pub mod sink;
pub mod thread_gate;

#[cfg(test)]
pub(crate) mod testing;

pub use account::{Account, Call};
pub use callback::{Handlers, RegStartedHandler, RegStateHandler};
pub use config::{
    AccountConfig, AuthCredInfo, CallSetting, CredentialDataType, DecodeMode, EndpointConfig,
    PipelineConfig, TransportConfig, TransportKind,
};
pub use context::{GuaContext, GuaContextBuilder};
pub use dispatch::Consumer;
pub use engine::{AccountId, CodecDescriptor, Engine, EngineEvents, EngineState, Status};
pub use error::{GuaError, Result};
pub use pipeline::{CodecRegistry, DecodeEvent, DecodeOutcome, RawDecodeEvent};
pub use registration::{AccountInfo, RegistrationState, StatusCode};

/// Locks `mutex`, recovering the data if a callback panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
