//! Attachment storage: bytes on the local filesystem under a configured root,
//! metadata in `exception_request_attachment`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use attendance_core::domain::attachment::{
    self, Attachment, AttachmentId, AttachmentKind, NewAttachment,
};
use attendance_core::domain::request::ExceptionRequestId;
use attendance_core::errors::StoreError;
use attendance_core::ports::AttachmentStore;

use crate::repositories::{decode_error, parse_timestamp, RepositoryError};
use crate::DbPool;

const ATTACHMENT_COLUMNS: &str =
    "id, request_id, file_name, relative_path, content_type, kind, sha256, size_bytes, uploaded_at";

/// Files addressed by their root-relative path.
#[derive(Clone, Debug)]
pub struct AttachmentFiles {
    root: PathBuf,
}

impl AttachmentFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes the bytes next to their final location. Nothing is visible at
    /// `relative_path` until the returned file is persisted.
    pub async fn stage(
        &self,
        relative_path: &str,
        bytes: &[u8],
    ) -> Result<StagedFile, RepositoryError> {
        let target = self.root.join(relative_path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = target.with_extension(format!("upload-{}", Uuid::new_v4().simple()));
        tokio::fs::write(&staging, bytes).await?;
        Ok(StagedFile { staging, target })
    }

    pub async fn read(&self, relative_path: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        match tokio::fs::read(self.root.join(relative_path)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}

#[derive(Debug)]
pub struct StagedFile {
    staging: PathBuf,
    target: PathBuf,
}

impl StagedFile {
    pub async fn persist(&self) -> Result<(), RepositoryError> {
        tokio::fs::rename(&self.staging, &self.target).await?;
        Ok(())
    }

    /// Removes the staging copy if it is still there.
    pub async fn discard(self) {
        if let Err(error) = tokio::fs::remove_file(&self.staging).await {
            if error.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    event_name = "attachment.staging_cleanup_failed",
                    path = %self.staging.display(),
                    error = %error,
                    "could not remove staged attachment"
                );
            }
        }
    }
}

pub struct SqlAttachmentStore {
    pool: DbPool,
    files: AttachmentFiles,
}

impl SqlAttachmentStore {
    pub fn new(pool: DbPool, files: AttachmentFiles) -> Self {
        Self { pool, files }
    }

    /// Stages the bytes, then records metadata and moves the file into place
    /// inside one transaction. An upload reusing a file name within the same
    /// request replaces the earlier record.
    pub async fn save_file(
        &self,
        request_id: &ExceptionRequestId,
        upload: NewAttachment,
        uploaded_at: DateTime<Utc>,
    ) -> Result<Attachment, RepositoryError> {
        let metadata = Attachment {
            id: AttachmentId(Uuid::new_v4().to_string()),
            request_id: request_id.clone(),
            relative_path: attachment::relative_path(request_id, &upload.file_name),
            file_name: upload.file_name,
            content_type: upload.content_type,
            kind: upload.kind,
            sha256: attachment::content_digest(&upload.bytes),
            size_bytes: upload.bytes.len() as u64,
            uploaded_at,
        };

        let staged = self.files.stage(&metadata.relative_path, &upload.bytes).await?;
        let recorded = self.record(&metadata, &staged).await;
        staged.discard().await;
        recorded?;

        tracing::debug!(
            event_name = "attachment.stored",
            request_id = %request_id.0,
            attachment_id = %metadata.id.0,
            size_bytes = metadata.size_bytes,
            "attachment stored"
        );
        Ok(metadata)
    }

    async fn record(
        &self,
        metadata: &Attachment,
        staged: &StagedFile,
    ) -> Result<(), RepositoryError> {
        let size_bytes = i64::try_from(metadata.size_bytes).map_err(decode_error)?;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM exception_request_attachment WHERE request_id = ? AND file_name = ?",
        )
        .bind(&metadata.request_id.0)
        .bind(&metadata.file_name)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO exception_request_attachment
                 (id, request_id, file_name, relative_path, content_type, kind, sha256,
                  size_bytes, uploaded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&metadata.id.0)
        .bind(&metadata.request_id.0)
        .bind(&metadata.file_name)
        .bind(&metadata.relative_path)
        .bind(metadata.content_type.as_deref())
        .bind(metadata.kind.as_str())
        .bind(&metadata.sha256)
        .bind(size_bytes)
        .bind(metadata.uploaded_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        staged.persist().await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn find(&self, id: &AttachmentId) -> Result<Option<Attachment>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM exception_request_attachment WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(attachment_from_row).transpose()
    }

    pub async fn list_for_request(
        &self,
        request_id: &ExceptionRequestId,
    ) -> Result<Vec<Attachment>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM exception_request_attachment
             WHERE request_id = ?
             ORDER BY uploaded_at ASC, id ASC"
        ))
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(attachment_from_row).collect()
    }

    pub async fn read_file(&self, attachment: &Attachment) -> Result<Vec<u8>, RepositoryError> {
        let bytes = self.files.read(&attachment.relative_path).await?.ok_or_else(|| {
            RepositoryError::NotFound { entity: "attachment_file", id: attachment.id.0.clone() }
        })?;
        if attachment::content_digest(&bytes) != attachment.sha256 {
            tracing::warn!(
                event_name = "attachment.digest_mismatch",
                attachment_id = %attachment.id.0,
                relative_path = %attachment.relative_path,
                "stored attachment content does not match its digest"
            );
            return Err(RepositoryError::ContentMismatch { id: attachment.id.0.clone() });
        }
        Ok(bytes)
    }
}

fn attachment_from_row(row: &SqliteRow) -> Result<Attachment, RepositoryError> {
    let kind: String = row.try_get("kind").map_err(decode_error)?;
    let size_bytes: i64 = row.try_get("size_bytes").map_err(decode_error)?;
    let uploaded_at: String = row.try_get("uploaded_at").map_err(decode_error)?;

    Ok(Attachment {
        id: AttachmentId(row.try_get("id").map_err(decode_error)?),
        request_id: ExceptionRequestId(row.try_get("request_id").map_err(decode_error)?),
        file_name: row.try_get("file_name").map_err(decode_error)?,
        relative_path: row.try_get("relative_path").map_err(decode_error)?,
        content_type: row.try_get("content_type").map_err(decode_error)?,
        kind: AttachmentKind::parse(&kind)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown attachment kind `{kind}`")))?,
        sha256: row.try_get("sha256").map_err(decode_error)?,
        size_bytes: u64::try_from(size_bytes).map_err(decode_error)?,
        uploaded_at: parse_timestamp(&uploaded_at)?,
    })
}

#[async_trait::async_trait]
impl AttachmentStore for SqlAttachmentStore {
    async fn save_file(
        &self,
        request_id: &ExceptionRequestId,
        upload: NewAttachment,
        uploaded_at: DateTime<Utc>,
    ) -> Result<Attachment, StoreError> {
        Ok(SqlAttachmentStore::save_file(self, request_id, upload, uploaded_at).await?)
    }

    async fn find(&self, id: &AttachmentId) -> Result<Option<Attachment>, StoreError> {
        Ok(SqlAttachmentStore::find(self, id).await?)
    }

    async fn list_for_request(
        &self,
        request_id: &ExceptionRequestId,
    ) -> Result<Vec<Attachment>, StoreError> {
        Ok(SqlAttachmentStore::list_for_request(self, request_id).await?)
    }

    async fn read_file(&self, attachment: &Attachment) -> Result<Vec<u8>, StoreError> {
        Ok(SqlAttachmentStore::read_file(self, attachment).await?)
    }
}

#[cfg(test)]
mod tests {
    use attendance_core::domain::attachment::{AttachmentKind, NewAttachment};
    use attendance_core::domain::request::ExceptionRequestId;
    use chrono::Utc;

    use super::{AttachmentFiles, SqlAttachmentStore};
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn staged_file_appears_only_once_persisted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = AttachmentFiles::new(dir.path());

        let staged = files.stage("attachments/ER-1/note.pdf", b"scan").await.expect("stage");
        assert!(files.read("attachments/ER-1/note.pdf").await.expect("read").is_none());

        staged.persist().await.expect("persist");
        staged.discard().await;
        let stored = files.read("attachments/ER-1/note.pdf").await.expect("read");
        assert_eq!(stored.as_deref(), Some(&b"scan"[..]));
        let entries = std::fs::read_dir(dir.path().join("attachments/ER-1")).expect("dir").count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn failed_metadata_write_leaves_existing_file_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = AttachmentFiles::new(dir.path());
        let existing = files.stage("attachments/ER-404/note.pdf", b"old").await.expect("stage");
        existing.persist().await.expect("persist");

        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let store = SqlAttachmentStore::new(pool, files.clone());

        let upload = NewAttachment {
            file_name: "note.pdf".to_string(),
            content_type: None,
            kind: AttachmentKind::Supporting,
            bytes: b"new".to_vec(),
        };
        let result =
            store.save_file(&ExceptionRequestId("ER-404".to_string()), upload, Utc::now()).await;

        assert!(result.is_err(), "unknown request violates the foreign key");
        let stored = files.read("attachments/ER-404/note.pdf").await.expect("read");
        assert_eq!(stored.as_deref(), Some(&b"old"[..]));
        let request_dir = dir.path().join("attachments/ER-404");
        let entries = std::fs::read_dir(request_dir).expect("dir").count();
        assert_eq!(entries, 1, "staging copy removed");
    }

    #[tokio::test]
    async fn read_reports_missing_files_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = AttachmentFiles::new(dir.path());

        assert!(files.read("attachments/ER-1/gone.pdf").await.expect("read").is_none());
    }
}
