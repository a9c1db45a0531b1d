//! Error types for the member exporter

use grammers_client::InvocationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session is locked by another process")]
    SessionLocked,

    #[error("Failed to acquire session lock: {0}")]
    LockError(String),

    #[error("Session storage error: {0}")]
    SessionError(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited by Telegram, retry in {0} seconds")]
    FloodWait(u32),

    #[error("Permission denied: {0}. Ensure you are an administrator of the channel")]
    PermissionDenied(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("No members could be fetched from {0}")]
    NoMembers(String),

    #[error("Telegram API error: {0}")]
    TelegramError(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// RPC error names that mean the account cannot list this channel's members.
const PERMISSION_ERRORS: &[&str] = &[
    "CHAT_ADMIN_REQUIRED",
    "CHANNEL_PRIVATE",
    "CHAT_FORBIDDEN",
    "CHAT_WRITE_FORBIDDEN",
    "USER_NOT_PARTICIPANT",
];

const CHANNEL_ERRORS: &[&str] = &[
    "CHANNEL_INVALID",
    "USERNAME_INVALID",
    "USERNAME_NOT_OCCUPIED",
    "INVITE_HASH_INVALID",
    "INVITE_HASH_EXPIRED",
    "PEER_ID_INVALID",
];

const AUTH_ERRORS: &[&str] = &[
    "AUTH_KEY_UNREGISTERED",
    "AUTH_KEY_INVALID",
    "SESSION_REVOKED",
    "SESSION_EXPIRED",
    "USER_DEACTIVATED",
    "USER_DEACTIVATED_BAN",
];

impl From<InvocationError> for Error {
    fn from(err: InvocationError) -> Self {
        if let InvocationError::Rpc(rpc) = &err {
            let name = rpc.name.as_str();
            if name == "FLOOD_WAIT" || name == "FLOOD_PREMIUM_WAIT" {
                return Error::FloodWait(rpc.value.unwrap_or(0));
            }
            if PERMISSION_ERRORS.contains(&name) {
                return Error::PermissionDenied(name.to_string());
            }
            if CHANNEL_ERRORS.contains(&name) {
                return Error::ChannelNotFound(name.to_string());
            }
            if AUTH_ERRORS.contains(&name) {
                return Error::Auth(format!(
                    "{} (the saved session is no longer valid, delete the .session file and log in again)",
                    name
                ));
            }
        }
        Error::TelegramError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Export(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for Error {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        Error::Export(err.to_string())
    }
}

impl Error {
    /// Whether a failed participant page should abort the whole fetch rather
    /// than only the current search query.
    pub fn is_fatal_for_fetch(&self) -> bool {
        matches!(
            self,
            Error::PermissionDenied(_)
                | Error::Auth(_)
                | Error::FloodWait(_)
                | Error::ChannelNotFound(_)
        )
    }
}
