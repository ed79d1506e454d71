//! Persistent storage for the bearer credential.
//!
//! Read by the gateway on every request; written only by login and logout.

use std::path::PathBuf;
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::error::ClientResult;

pub trait CredentialStore: Send + Sync {
  fn load(&self) -> Option<String>;
  fn save(&self, token: &str) -> ClientResult<()>;
  fn clear(&self) -> ClientResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
  token: RwLock<Option<String>>,
}

impl MemoryCredentialStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_token(token: impl Into<String>) -> Self {
    Self { token: RwLock::new(Some(token.into())) }
  }
}

impl CredentialStore for MemoryCredentialStore {
  fn load(&self) -> Option<String> {
    self.token.read().unwrap_or_else(|p| p.into_inner()).clone()
  }

  fn save(&self, token: &str) -> ClientResult<()> {
    *self.token.write().unwrap_or_else(|p| p.into_inner()) = Some(token.to_string());
    Ok(())
  }

  fn clear(&self) -> ClientResult<()> {
    *self.token.write().unwrap_or_else(|p| p.into_inner()) = None;
    Ok(())
  }
}

/// Token kept in a plain file, one line, survives restarts.
#[derive(Clone, Debug)]
pub struct FileCredentialStore {
  path: PathBuf,
}

impl FileCredentialStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

impl CredentialStore for FileCredentialStore {
  fn load(&self) -> Option<String> {
    match std::fs::read_to_string(&self.path) {
      Ok(s) => {
        let t = s.trim();
        if t.is_empty() { None } else { Some(t.to_string()) }
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
      Err(e) => {
        warn!(target: "session", path = %self.path.display(), error = %e, "Failed to read stored credential");
        None
      }
    }
  }

  fn save(&self, token: &str) -> ClientResult<()> {
    if let Some(dir) = self.path.parent() {
      if !dir.as_os_str().is_empty() {
        std::fs::create_dir_all(dir)?;
      }
    }
    std::fs::write(&self.path, token)?;
    debug!(target: "session", path = %self.path.display(), "Credential stored");
    Ok(())
  }

  fn clear(&self) -> ClientResult<()> {
    match std::fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }
}
