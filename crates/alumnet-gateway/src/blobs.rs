use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use alumnet_db::Database;
use alumnet_types::models::Attachment;

/// The external file store, seen from the messaging core: opaque ids in,
/// attachment references out.
pub trait BlobStore: Send + Sync {
    /// Resolve ids uploaded by `uploader_id`. Unknown ids and ids uploaded by
    /// someone else are absent from the result.
    fn resolve(&self, uploader_id: Uuid, ids: &[String]) -> Result<Vec<Attachment>>;
}

/// Reads the metadata table the upload service fills in.
pub struct DbBlobStore {
    db: Arc<Database>,
}

impl DbBlobStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl BlobStore for DbBlobStore {
    fn resolve(&self, uploader_id: Uuid, ids: &[String]) -> Result<Vec<Attachment>> {
        let rows = self.db.uploads_by(uploader_id, ids)?;
        Ok(rows
            .into_iter()
            .map(|row| Attachment {
                id: row.id,
                filename: row.filename,
                content_type: row.content_type,
                size_bytes: row.size_bytes,
                url: row.url,
            })
            .collect())
    }
}
