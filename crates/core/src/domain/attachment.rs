use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::request::ExceptionRequestId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    MedicalCertificate,
    Supporting,
    Other,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MedicalCertificate => "medical_certificate",
            Self::Supporting => "supporting",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "medical_certificate" => Some(Self::MedicalCertificate),
            "supporting" => Some(Self::Supporting),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    pub request_id: ExceptionRequestId,
    pub file_name: String,
    pub relative_path: String,
    pub content_type: Option<String>,
    pub kind: AttachmentKind,
    pub sha256: String,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAttachment {
    pub file_name: String,
    pub content_type: Option<String>,
    pub kind: AttachmentKind,
    pub bytes: Vec<u8>,
}

/// Keeps only the final path component and rejects names that would escape the
/// request's attachment directory.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let candidate = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if candidate.is_empty() || candidate == "." || candidate == ".." {
        return None;
    }
    if candidate.chars().any(char::is_control) {
        return None;
    }
    Some(candidate.to_string())
}

pub fn relative_path(request_id: &ExceptionRequestId, file_name: &str) -> String {
    format!("attachments/{}/{}", request_id.0, file_name)
}

pub fn content_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}
