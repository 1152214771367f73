//! C entry points for a native engine.
//!
//! The engine passes the pointer from [`GuaContext::user_data`] back with every
//! notification. Payload pointers are only read for the duration of the call.

use std::{
    ffi::{c_char, c_int, c_uint, c_void},
    panic::{AssertUnwindSafe, catch_unwind},
};

use gua_codec::CodecId;

use crate::{
    context::{ContextInner, GuaContext},
    engine::{AccountId, EngineEvents},
    pipeline::RawDecodeEvent,
    registration::{AccountInfo, StatusCode},
};

pub const CALLEE_ID_LEN: usize = 64;

/// Borrowed `(pointer, length)` string.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GuaStr {
    pub ptr: *const c_char,
    pub slen: isize,
}

impl GuaStr {
    /// # Safety
    /// `ptr` must be null or point to `slen` readable bytes.
    unsafe fn to_string_lossy(&self) -> String {
        if self.ptr.is_null() || self.slen <= 0 {
            return String::new();
        }
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr.cast::<u8>(), self.slen as usize) };
        String::from_utf8_lossy(bytes).into_owned()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GuaAccInfo {
    pub is_default: c_int,
    pub acc_uri: GuaStr,
    pub has_registration: c_int,
    pub expires: c_uint,
    pub status: c_int,
    pub status_text: GuaStr,
    pub reg_last_err: c_int,
    pub online_status: c_int,
    pub online_status_text: GuaStr,
}

impl GuaAccInfo {
    /// # Safety
    /// All strings must satisfy [`GuaStr`]'s contract.
    unsafe fn to_account_info(&self) -> AccountInfo {
        unsafe {
            AccountInfo {
                is_default: self.is_default != 0,
                uri: self.acc_uri.to_string_lossy(),
                reg_is_configured: self.has_registration > 0,
                reg_expires_secs: self.expires,
                reg_status: StatusCode(self.status.clamp(0, u16::MAX as c_int) as u16),
                reg_status_text: self.status_text.to_string_lossy(),
                reg_last_err: self.reg_last_err,
                online_status: self.online_status != 0,
                online_status_text: self.online_status_text.to_string_lossy(),
            }
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GuaDecodeInfo {
    /// NUL-terminated unless all bytes are used.
    pub callee_id: [c_char; CALLEE_ID_LEN],
    pub video_codec_id: c_int,
    pub index: c_int,
    pub total_len: c_int,
    pub remain_len: c_int,
    pub data: *const u8,
    pub len: c_int,
}

impl GuaDecodeInfo {
    pub fn callee_id(&self) -> String {
        let bytes: Vec<u8> = self
            .callee_id
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// # Safety
    /// `data` must be null or point to `len` readable bytes.
    unsafe fn payload(&self) -> &[u8] {
        if self.data.is_null() || self.len <= 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.data, self.len as usize) }
    }
}

impl GuaContext {
    /// Pointer handed to the engine as callback user data. Valid while this
    /// context is alive; destroy the engine before dropping the context.
    pub fn user_data(&self) -> *const c_void {
        std::sync::Arc::as_ptr(self.inner()).cast()
    }
}

/// # Safety
/// `user_data` must be null or come from a live [`GuaContext::user_data`].
unsafe fn context<'a>(user_data: *const c_void) -> Option<&'a ContextInner> {
    unsafe { user_data.cast::<ContextInner>().as_ref() }
}

fn trampoline(name: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        log::error!("{} trampoline panicked", name);
    }
}

/// # Safety
/// `user_data` must come from a live [`GuaContext::user_data`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gua_on_reg_started(user_data: *const c_void, acc_id: c_int, renew: c_int) {
    let Some(ctx) = (unsafe { context(user_data) }) else {
        return;
    };
    trampoline("reg started", || ctx.on_reg_started(AccountId(acc_id), renew != 0));
}

/// # Safety
/// `user_data` must come from a live [`GuaContext::user_data`]; `info` must be
/// null or valid for the duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gua_on_reg_state(
    user_data: *const c_void,
    acc_id: c_int,
    info: *const GuaAccInfo,
) {
    let Some(ctx) = (unsafe { context(user_data) }) else {
        return;
    };
    let Some(info) = (unsafe { info.as_ref() }) else {
        log::warn!("reg state for account {} without info", acc_id);
        return;
    };
    let info = unsafe { info.to_account_info() };
    trampoline("reg state", || ctx.on_reg_state(AccountId(acc_id), info));
}

/// # Safety
/// `user_data` must come from a live [`GuaContext::user_data`]; `info` and its
/// payload must be null or valid for the duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gua_on_decode(user_data: *const c_void, info: *const GuaDecodeInfo) {
    let Some(ctx) = (unsafe { context(user_data) }) else {
        return;
    };
    let Some(info) = (unsafe { info.as_ref() }) else {
        return;
    };
    let callee_id = info.callee_id();
    let payload = unsafe { info.payload() };
    trampoline("decode", || {
        ctx.on_decode(RawDecodeEvent {
            callee_id: &callee_id,
            codec_id: CodecId(info.video_codec_id),
            packet_index: info.index,
            total_len: info.total_len,
            remaining_len: info.remain_len,
            payload,
        })
    });
}
