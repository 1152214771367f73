use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GuaError, Result};

/// Fixed size of the engine's credential table.
pub const MAX_CREDENTIALS: usize = 8;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Engine log verbosity, 0..=6.
    pub level: u8,
    /// Console verbosity, 0..=6. Also drives the process logger.
    pub console_level: u8,
    pub filename: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: 5,
            console_level: 4,
            filename: None,
        }
    }
}

impl LogConfig {
    pub fn set_level(&mut self, level: u8) -> &mut Self {
        self.level = level.min(6);
        self
    }

    pub fn set_console_level(&mut self, level: u8) -> &mut Self {
        self.console_level = level.min(6);
        self
    }

    /// Maps the engine's 0..=6 scale onto `log` levels.
    pub fn level_filter(&self) -> log::LevelFilter {
        match self.console_level {
            0 => log::LevelFilter::Off,
            1 => log::LevelFilter::Error,
            2 => log::LevelFilter::Warn,
            3 => log::LevelFilter::Info,
            4 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EndpointConfig {
    pub user_agent: String,
    pub max_calls: u32,
    pub log: LogConfig,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("gua/{}", env!("CARGO_PKG_VERSION")),
            max_calls: 4,
            log: LogConfig::default(),
        }
    }
}

impl EndpointConfig {
    pub fn log_config(&mut self) -> &mut LogConfig {
        &mut self.log
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Udp,
    Tcp,
    Tls,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// 0 lets the engine pick a port.
    pub port: u16,
    pub bound_addr: Option<String>,
    pub public_addr: Option<String>,
}

impl TransportConfig {
    pub fn set_port(&mut self, port: u16) -> &mut Self {
        self.port = port;
        self
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialDataType {
    #[default]
    Plain,
    Digest,
    Aka,
}

impl CredentialDataType {
    pub fn code(&self) -> i32 {
        match self {
            CredentialDataType::Plain => 0,
            CredentialDataType::Digest => 1,
            CredentialDataType::Aka => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(CredentialDataType::Plain),
            1 => Some(CredentialDataType::Digest),
            2 => Some(CredentialDataType::Aka),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AuthCredInfo {
    pub scheme: String,
    pub realm: String,
    pub username: String,
    #[serde(default)]
    pub data_type: CredentialDataType,
    pub data: String,
}

impl AuthCredInfo {
    pub fn new(
        scheme: impl Into<String>,
        realm: impl Into<String>,
        username: impl Into<String>,
        data_type: CredentialDataType,
        data: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            realm: realm.into(),
            username: username.into(),
            data_type,
            data: data.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AccountConfig {
    pub id_uri: String,
    pub reg_uri: String,
    pub reg_timeout_secs: u32,
    pub credentials: Vec<AuthCredInfo>,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            id_uri: String::new(),
            reg_uri: String::new(),
            reg_timeout_secs: 300,
            credentials: Vec::new(),
        }
    }
}

impl AccountConfig {
    pub fn set_id_uri(&mut self, uri: impl Into<String>) -> &mut Self {
        self.id_uri = uri.into();
        self
    }

    pub fn set_registrar_uri(&mut self, uri: impl Into<String>) -> &mut Self {
        self.reg_uri = uri.into();
        self
    }

    pub fn set_registrar_timeout_secs(&mut self, secs: u32) -> &mut Self {
        self.reg_timeout_secs = secs;
        self
    }

    pub fn add_auth_cred(&mut self, cred: AuthCredInfo) -> Result<&mut Self> {
        if self.credentials.len() >= MAX_CREDENTIALS {
            return Err(GuaError::TooManyCredentials {
                max: MAX_CREDENTIALS,
            });
        }
        self.credentials.push(cred);
        Ok(self)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CallSetting {
    pub audio_count: u32,
    pub video_count: u32,
    pub flags: u32,
}

impl Default for CallSetting {
    fn default() -> Self {
        Self {
            audio_count: 1,
            video_count: 1,
            flags: 0,
        }
    }
}

impl CallSetting {
    /// Receive-only video: no audio channel, no flags.
    pub fn play() -> Self {
        Self {
            audio_count: 0,
            video_count: 1,
            flags: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// One decode context per session, kept across packets.
    #[default]
    PerSession,
    /// A fresh decode context for every packet. Only correct for intra-only streams.
    PerEvent,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub decode_mode: DecodeMode,
    pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decode_mode: DecodeMode::default(),
            jpeg_quality: gua_codec::jpeg::DEFAULT_QUALITY,
        }
    }
}

/// Process configuration for the `gua` binary.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub endpoint: EndpointConfig,
    pub transport: TransportConfig,
    pub pipeline: PipelineConfig,
    pub account: Option<AccountConfig>,
    /// Destinations to play once the account is registered.
    pub targets: Vec<String>,
    pub output_dir: PathBuf,
    /// PS capture replayed through the decode path.
    pub replay: Option<ReplayConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            transport: TransportConfig::default(),
            pipeline: PipelineConfig::default(),
            account: None,
            targets: Vec::new(),
            output_dir: PathBuf::from("."),
            replay: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplayConfig {
    pub path: PathBuf,
    pub callee_id: String,
    /// Read size per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_chunk_size() -> usize {
    1400
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
