use std::fs;
use std::path::Path;

use crate::error::ChatError;

/// A local file attached to the next message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    name: String,
    size: u64,
    contents: Result<String, ChatError>,
}

impl Attachment {
    /// Read `path` for attaching.
    ///
    /// Files over `max_bytes` are refused outright. A file that cannot be
    /// decoded as UTF-8 is still attached; the failure travels with the
    /// message as an inline note.
    pub fn load(path: &Path, max_bytes: u64) -> Result<Self, ChatError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let metadata = fs::metadata(path).map_err(|e| ChatError::AttachmentRead {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        if !metadata.is_file() {
            return Err(ChatError::AttachmentRead {
                name,
                reason: "not a regular file".to_string(),
            });
        }

        let size = metadata.len();
        if size > max_bytes {
            log::info!("refusing attachment {} ({} bytes)", name, size);
            return Err(ChatError::AttachmentTooLarge {
                name,
                size,
                limit: max_bytes,
            });
        }

        let contents = match fs::read(path) {
            Ok(bytes) => String::from_utf8(bytes).map_err(|e| ChatError::AttachmentRead {
                name: name.clone(),
                reason: e.utf8_error().to_string(),
            }),
            Err(e) => Err(ChatError::AttachmentRead {
                name: name.clone(),
                reason: e.to_string(),
            }),
        };
        if let Err(e) = &contents {
            log::warn!("{}", e);
        }

        Ok(Self {
            name,
            size,
            contents,
        })
    }

    pub fn from_text(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            size: text.len() as u64,
            contents: Ok(text.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn contents(&self) -> Result<&str, &ChatError> {
        self.contents.as_deref()
    }
}

/// Build the text sent to the backend for a user turn.
pub fn compose_message(text: &str, attachment: Option<&Attachment>) -> String {
    let text = text.trim();
    let Some(attachment) = attachment else {
        return text.to_string();
    };

    let mut message = if text.is_empty() {
        format!("Please review the attached file {}.", attachment.name())
    } else {
        text.to_string()
    };

    message.push_str("\n\n");
    match attachment.contents() {
        Ok(contents) => {
            message.push_str(&format!("[File: {}]\n", attachment.name()));
            message.push_str(contents);
        }
        Err(e) => {
            message.push_str(&format!("[File: {}] ({})", attachment.name(), e));
        }
    }
    message
}
