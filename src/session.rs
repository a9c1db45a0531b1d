//! Session management for the Telegram client
//!
//! Provides:
//! - File-based session locking to prevent two exports sharing one session
//! - Opening (or creating) the persistent session database
//! - Client creation with the configured API id

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use grammers_client::client::updates::UpdatesLike;
use grammers_client::Client;
use grammers_mtsender::SenderPool;
use grammers_session::storages::SqliteSession;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};

/// Session lock guard that ensures exclusive access to the Telegram session.
pub struct SessionLock {
    path: PathBuf,
    lock_file: Option<File>,
}

impl SessionLock {
    /// Acquire an exclusive lock next to the session file.
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::LockError(format!("Failed to open lock file: {}", e)))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "Session lock acquired");
                Ok(Self {
                    path,
                    lock_file: Some(lock_file),
                })
            }
            Err(_) => Err(Error::SessionLocked),
        }
    }

    /// Release the lock manually
    pub fn release(&mut self) {
        if let Some(file) = self.lock_file.take() {
            let _ = file.unlock();
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Open the session database, creating it on first run.
pub fn open_session<P: AsRef<Path>>(path: P) -> Result<Arc<SqliteSession>> {
    let path = path.as_ref();
    let existed = path.exists();
    let session = SqliteSession::open(path).map_err(|e| {
        Error::SessionError(format!("Failed to open {}: {}", path.display(), e))
    })?;
    if existed {
        debug!(path = %path.display(), "Loaded existing session");
    } else {
        info!(path = %path.display(), "Created new session file");
    }
    Ok(Arc::new(session))
}

/// Holder for SenderPool components and Client
pub struct TelegramClient {
    pub client: Client,
    // Updates are not consumed, but the channel must stay open for the runner.
    _updates: mpsc::UnboundedReceiver<UpdatesLike>,
    _runner_handle: tokio::task::JoinHandle<()>,
}

impl TelegramClient {
    /// Create a new TelegramClient from session
    pub fn connect(session: Arc<SqliteSession>, api_id: i32) -> Self {
        let pool = SenderPool::new(session, api_id);

        // Client keeps its own pool handle, so build it before destructuring
        let client = Client::new(&pool);

        let SenderPool { runner, updates, .. } = pool;

        let runner_handle = tokio::spawn(async move {
            runner.run().await;
        });

        Self {
            client,
            _updates: updates,
            _runner_handle: runner_handle,
        }
    }
}

impl std::ops::Deref for TelegramClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

/// Open the configured session and connect a client with it.
pub fn get_client(config: &Config) -> Result<TelegramClient> {
    let session = open_session(config.session_file())?;
    Ok(TelegramClient::connect(session, config.api_id))
}
