//! Staged answer images.
//!
//! A `CapturedImage` pairs the raw file with a preview handle allocated from a
//! `PreviewRegistry`. The handle releases itself when the image is dropped, so
//! removing, clearing or resetting staged images releases each preview exactly
//! once without any bookkeeping at the call sites.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::trace;
use uuid::Uuid;

use crate::config::UploadLimits;
use crate::error::{ClientError, ClientResult};

/// One image part of a multipart upload.
#[derive(Clone, PartialEq)]
pub struct ImageUpload {
  pub file_name: String,
  pub mime: String,
  pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ImageUpload {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ImageUpload")
      .field("file_name", &self.file_name)
      .field("mime", &self.mime)
      .field("len", &self.bytes.len())
      .finish()
  }
}

impl ImageUpload {
  pub fn new(file_name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
    Self { file_name: file_name.into(), mime: mime.into(), bytes }
  }

  /// Read an image from disk, guessing the MIME type from its content (falling back to the extension).
  pub async fn from_path(path: impl AsRef<Path>) -> ClientResult<Self> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await?;
    let file_name = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "answer.jpg".into());
    let mime = match sniff_mime(&bytes) {
      Some(m) => m.to_string(),
      None => mime_guess::from_path(path).first_or_octet_stream().essence_str().to_string(),
    };
    Ok(Self::new(file_name, mime, bytes))
  }

  pub fn len(&self) -> usize {
    self.bytes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
  if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
    Some("image/jpeg")
  } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
    Some("image/png")
  } else {
    None
  }
}

/// Check a single upload against the configured size and type limits.
pub fn validate_upload(upload: &ImageUpload, limits: &UploadLimits) -> ClientResult<()> {
  if upload.is_empty() {
    return Err(ClientError::Validation(format!("Image '{}' is empty.", upload.file_name)));
  }
  if upload.len() > limits.max_image_bytes {
    return Err(ClientError::Validation(format!(
      "Image '{}' is larger than {} MB.",
      upload.file_name,
      limits.max_image_bytes / (1024 * 1024)
    )));
  }
  if !limits.allowed_types.iter().any(|t| t.eq_ignore_ascii_case(&upload.mime)) {
    return Err(ClientError::Validation(format!(
      "Unsupported image type '{}'. Allowed: {}.",
      upload.mime,
      limits.allowed_types.join(", ")
    )));
  }
  Ok(())
}

/// Tracks which preview references are live. Views resolve a reference
/// string to the image while it is registered.
#[derive(Clone, Debug, Default)]
pub struct PreviewRegistry {
  inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
  live: HashSet<Uuid>,
  released: u64,
}

impl PreviewRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn allocate(&self) -> PreviewHandle {
    let id = Uuid::new_v4();
    self.lock().live.insert(id);
    trace!(target: "answer", preview = %id, "Preview allocated");
    PreviewHandle { id, registry: self.clone() }
  }

  pub fn is_live(&self, reference: &str) -> bool {
    parse_reference(reference).map(|id| self.lock().live.contains(&id)).unwrap_or(false)
  }

  pub fn live_count(&self) -> usize {
    self.lock().live.len()
  }

  /// Total number of previews released since the registry was created.
  pub fn released_count(&self) -> u64 {
    self.lock().released
  }

  fn release(&self, id: Uuid) {
    let mut inner = self.lock();
    if inner.live.remove(&id) {
      inner.released += 1;
      trace!(target: "answer", preview = %id, "Preview released");
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
    self.inner.lock().unwrap_or_else(|p| p.into_inner())
  }
}

const PREVIEW_SCHEME: &str = "preview://";

fn parse_reference(reference: &str) -> Option<Uuid> {
  reference.strip_prefix(PREVIEW_SCHEME).and_then(|s| Uuid::parse_str(s).ok())
}

/// Owned preview reference; released on drop.
#[derive(Debug)]
pub struct PreviewHandle {
  id: Uuid,
  registry: PreviewRegistry,
}

impl PreviewHandle {
  pub fn reference(&self) -> String {
    format!("{PREVIEW_SCHEME}{}", self.id)
  }
}

impl Drop for PreviewHandle {
  fn drop(&mut self) {
    self.registry.release(self.id);
  }
}

/// Client-only staging object between capture and submission.
#[derive(Debug)]
pub struct CapturedImage {
  upload: ImageUpload,
  preview: PreviewHandle,
  captured_at: DateTime<Utc>,
}

impl CapturedImage {
  pub fn new(upload: ImageUpload, registry: &PreviewRegistry) -> Self {
    Self { upload, preview: registry.allocate(), captured_at: Utc::now() }
  }

  pub fn upload(&self) -> &ImageUpload {
    &self.upload
  }

  pub fn preview_ref(&self) -> String {
    self.preview.reference()
  }

  pub fn captured_at(&self) -> DateTime<Utc> {
    self.captured_at
  }
}
