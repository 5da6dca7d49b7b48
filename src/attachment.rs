//! File attachments sent inline with a user message

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::audio::{from_wire_text, to_wire_text};
use crate::transport::{InlineBinary, Part};

/// Largest file accepted as an attachment
pub const MAX_ATTACHMENT_BYTES: usize = 20 * 1024 * 1024;

/// A file ready to travel as an inline binary part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Original file name, shown in the transcript
    pub name: String,
    pub mime_type: String,
    /// Base64-encoded file contents
    pub data: String,
}

impl Attachment {
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: to_wire_text(bytes),
        }
    }

    /// Read and validate a file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let mime_type = mime_type_for(path)
            .with_context(|| format!("Unsupported attachment type: {}", path.display()))?;

        let size = std::fs::metadata(path)
            .with_context(|| format!("Failed to read attachment: {}", path.display()))?
            .len();
        if size > MAX_ATTACHMENT_BYTES as u64 {
            bail!(
                "Attachment {} is {} bytes, limit is {}",
                path.display(),
                size,
                MAX_ATTACHMENT_BYTES
            );
        }

        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read attachment: {}", path.display()))?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());

        let attachment = Self::from_bytes(name, mime_type, &bytes);
        attachment.validate()?;

        Ok(attachment)
    }

    /// Check type, size and encoding
    pub fn validate(&self) -> Result<()> {
        if !is_accepted_mime_type(&self.mime_type) {
            bail!("Attachment type {} is not accepted", self.mime_type);
        }

        let size = self.decoded_len();
        if size > MAX_ATTACHMENT_BYTES {
            bail!(
                "Attachment {} is {} bytes, limit is {}",
                self.name,
                size,
                MAX_ATTACHMENT_BYTES
            );
        }

        from_wire_text(&self.data)
            .with_context(|| format!("Attachment {} is not valid base64", self.name))?;

        Ok(())
    }

    /// Size of the file once base64 is stripped
    pub fn decoded_len(&self) -> usize {
        let padding = self.data.bytes().rev().take_while(|&b| b == b'=').count();
        (self.data.len() / 4 * 3).saturating_sub(padding)
    }

    pub fn into_part(self) -> Part {
        Part::InlineBinary(InlineBinary {
            mime_type: self.mime_type,
            data: self.data,
        })
    }
}

/// Images and PDFs only
pub fn is_accepted_mime_type(mime_type: &str) -> bool {
    mime_type.starts_with("image/") || mime_type == "application/pdf"
}

/// Infer a MIME type from the file extension
pub fn mime_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(mime)
}
