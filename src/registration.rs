use std::fmt::{Display, Formatter};

/// Expiry value the engine reports when no expiry was negotiated.
pub const EXPIRES_NOT_SPECIFIED: u32 = u32::MAX;

/// SIP status code of the last registration transaction. 0 until the first
/// final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);

    pub fn class(&self) -> u16 {
        self.0 / 100
    }

    pub fn is_provisional(&self) -> bool {
        self.class() == 1
    }

    pub fn is_success(&self) -> bool {
        self.class() == 2
    }

    pub fn reason(&self) -> &'static str {
        match self.0 {
            100 => "Trying",
            200 => "OK",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            407 => "Proxy Authentication Required",
            408 => "Request Timeout",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "",
        }
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registration snapshot of one account, produced by a single engine query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub is_default: bool,
    pub uri: String,
    /// A registrar is configured for the account.
    pub reg_is_configured: bool,
    pub reg_expires_secs: u32,
    pub reg_status: StatusCode,
    pub reg_status_text: String,
    pub reg_last_err: i32,
    pub online_status: bool,
    pub online_status_text: String,
}

impl Default for AccountInfo {
    fn default() -> Self {
        Self {
            is_default: false,
            uri: String::new(),
            reg_is_configured: false,
            reg_expires_secs: EXPIRES_NOT_SPECIFIED,
            reg_status: StatusCode::default(),
            reg_status_text: String::new(),
            reg_last_err: 0,
            online_status: false,
            online_status_text: String::new(),
        }
    }
}

impl AccountInfo {
    /// The account holds a live, successful registration.
    pub fn reg_is_active(&self) -> bool {
        self.reg_is_configured
            && self.reg_expires_secs > 0
            && self.reg_expires_secs != EXPIRES_NOT_SPECIFIED
            && self.reg_status.is_success()
    }
}

impl Display for AccountInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "uri: {}, default: {}, registered: {}, status: {} {}, expires: {}, last error: {}, online: {}",
            self.uri,
            self.is_default,
            self.reg_is_active(),
            self.reg_status,
            self.reg_status_text,
            self.reg_expires_secs,
            self.reg_last_err,
            self.online_status_text,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationState {
    #[default]
    Unregistered,
    Registering,
    Registered,
    Renewing,
    Failed(StatusCode),
}

impl RegistrationState {
    pub fn on_started(self, renew: bool) -> Self {
        match (self, renew) {
            (RegistrationState::Registered | RegistrationState::Renewing, true) => {
                RegistrationState::Renewing
            }
            _ => RegistrationState::Registering,
        }
    }

    /// Applies a "registration state changed" snapshot. `Failed` only clears on
    /// a new "registration started".
    pub fn on_info(self, info: &AccountInfo) -> Self {
        if let RegistrationState::Failed(_) = self {
            return self;
        }
        if !info.reg_is_configured {
            return RegistrationState::Unregistered;
        }
        let status = info.reg_status;
        if status.0 == 0 || status.is_provisional() {
            return self;
        }
        if !status.is_success() {
            return RegistrationState::Failed(status);
        }
        if info.reg_is_active() {
            RegistrationState::Registered
        } else {
            RegistrationState::Unregistered
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(
            self,
            RegistrationState::Registered | RegistrationState::Renewing
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(configured: bool, expires: u32, status: u16) -> AccountInfo {
        AccountInfo {
            reg_is_configured: configured,
            reg_expires_secs: expires,
            reg_status: StatusCode(status),
            ..Default::default()
        }
    }

    #[test]
    fn test_reg_is_active_table() {
        assert!(!info(false, 3600, 200).reg_is_active());
        assert!(!info(true, 0, 200).reg_is_active());
        assert!(info(true, 3600, 200).reg_is_active());
        assert!(!info(true, 3600, 404).reg_is_active());
        assert!(!info(true, EXPIRES_NOT_SPECIFIED, 200).reg_is_active());
        assert!(info(true, 60, 202).reg_is_active());
        assert!(!info(true, 3600, 0).reg_is_active());
    }

    #[test]
    fn test_state_transitions() {
        let state = RegistrationState::default().on_started(false);
        assert_eq!(state, RegistrationState::Registering);

        let state = state.on_info(&info(true, 3600, 100));
        assert_eq!(state, RegistrationState::Registering);

        let state = state.on_info(&info(true, 3600, 200));
        assert_eq!(state, RegistrationState::Registered);

        let state = state.on_started(true);
        assert_eq!(state, RegistrationState::Renewing);
        assert!(state.is_registered());

        let state = state.on_info(&info(true, 3600, 200));
        assert_eq!(state, RegistrationState::Registered);

        // unregister answers 200 with expires 0
        let state = state.on_info(&info(true, 0, 200));
        assert_eq!(state, RegistrationState::Unregistered);
    }

    #[test]
    fn test_failed_is_sticky_until_restart() {
        let state = RegistrationState::Registered.on_info(&info(true, 3600, 401));
        assert_eq!(state, RegistrationState::Failed(StatusCode::UNAUTHORIZED));

        assert_eq!(state.on_info(&info(true, 3600, 200)), state);
        assert_eq!(state.on_started(true), RegistrationState::Registering);
    }

    #[test]
    fn test_unconfigured_is_unregistered() {
        let state = RegistrationState::Registering.on_info(&info(false, 0, 0));
        assert_eq!(state, RegistrationState::Unregistered);
    }
}
