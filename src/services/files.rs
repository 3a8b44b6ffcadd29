//! File upload, download and deletion.
//!
//! Content goes to a [`FileStore`] under the file's id; the `resources`
//! row keeps its hash, size and content type. Uploading content whose hash
//! is already stored returns the existing file instead of a duplicate.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::links::LinkShortService;
use super::result::{found, ServiceResult};
use crate::config::{FilesConfig, LinksConfig};
use crate::db::{Database, EntityId, Include, QueryOptions, UnitOfWork};
use crate::models::{Author, ContentType, File};
use crate::storage::FileStore;
use crate::{Result, SciError};

/// Metadata of an upload; the content is passed separately as a stream.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub author_id: EntityId,
    pub description: Option<String>,
}

impl UploadRequest {
    pub fn new(file_name: impl Into<String>, author_id: EntityId) -> Self {
        Self {
            file_name: file_name.into(),
            author_id,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A file and a reader over its content.
pub struct Download {
    pub file: File,
    pub content: Box<dyn AsyncRead + Send + Unpin>,
}

/// MIME essence and lowercase extension for `file_name`.
fn content_type_of(file_name: &str) -> (String, Option<String>) {
    let mime = mime_guess::from_path(file_name).first_or_octet_stream();
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    (mime.essence_str().to_string(), extension)
}

pub struct FileService {
    db: Database,
    store: Arc<dyn FileStore>,
    config: FilesConfig,
    links: LinkShortService,
    cancel: CancellationToken,
}

impl FileService {
    pub fn new(
        db: Database,
        store: Arc<dyn FileStore>,
        config: FilesConfig,
        links: LinksConfig,
    ) -> Self {
        Self {
            links: LinkShortService::new(db.clone(), links),
            db,
            store,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.links = self.links.with_cancellation(token.clone());
        self.cancel = token;
        self
    }

    fn unit_of_work(&self) -> UnitOfWork {
        UnitOfWork::with_cancellation(self.db.clone(), self.cancel.clone())
    }

    /// Store `content` as a new file.
    ///
    /// Content over the configured size limit is rejected. Content already
    /// stored under another file returns that file.
    pub async fn upload(
        &self,
        request: &UploadRequest,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<File> {
        let file_name = request.file_name.trim();
        if file_name.is_empty() {
            return Err(SciError::Validation("file name is empty".to_string()));
        }

        let uow = self.unit_of_work();
        if !uow.repository::<Author>().exists(request.author_id).await? {
            return Err(SciError::NotFound(format!("Author {}", request.author_id)));
        }

        let mut file = File::new(file_name, request.author_id);
        file.resource.description = request.description.clone();
        let blob = file.resource.id.to_string();

        let max = self.config.max_upload_bytes();
        let mut limited = (&mut *content).take(max.saturating_add(1));
        let stored = self.store.write(&blob, &mut limited).await?;
        if stored.size > max {
            self.discard_blob(&blob).await;
            return Err(SciError::Validation(format!(
                "file is larger than {} MB",
                self.config.max_upload_size_mb
            )));
        }

        let files = uow.repository::<File>();
        if let Some(existing) = files.get_by_hash(&stored.hash, &QueryOptions::new()).await? {
            info!(id = %existing.resource.id, hash = %stored.hash, "upload matches stored file");
            self.discard_blob(&blob).await;
            return Ok(existing);
        }

        match self.record(&uow, &mut file, stored.size, stored.hash).await {
            Ok(()) => {
                info!(id = %file.resource.id, size = file.size, "stored upload");
                Ok(file)
            }
            Err(e) => {
                self.discard_blob(&blob).await;
                Err(e)
            }
        }
    }

    async fn record(&self, uow: &UnitOfWork, file: &mut File, size: u64, hash: String) -> Result<()> {
        let (mime, extension) = content_type_of(&file.resource.title);
        let content_types = uow.repository::<ContentType>();
        let content_type = match content_types.get_by_name(&mime, &QueryOptions::new()).await? {
            Some(existing) => existing,
            None => {
                let created = ContentType::new(mime, extension.as_deref());
                content_types.add(&created)?;
                debug!(name = %created.name, "new content type");
                created
            }
        };

        let link = self
            .links
            .register_in(uow, &format!("/files/{}", file.resource.id))
            .await?;

        file.size = size;
        file.hash = Some(hash);
        file.content_type_id = Some(content_type.id);
        file.short_link = Some(link.hash);
        uow.repository::<File>().add(file)?;
        uow.try_save_context().await?;
        file.content_type = Some(content_type);
        Ok(())
    }

    async fn discard_blob(&self, blob: &str) {
        if let Err(e) = self.store.delete(blob).await {
            warn!(blob, error = %e, "Failed to delete stored content");
        }
    }

    /// Open the content of file `id`.
    pub async fn download(&self, id: EntityId) -> Result<Download> {
        let uow = self.unit_of_work();
        let file = uow
            .repository::<File>()
            .get_by_id(id, &QueryOptions::new().include(Include::ContentType))
            .await?
            .ok_or_else(|| SciError::NotFound(format!("File {id}")))?;
        let content = self.store.open_read(&id.to_string()).await?;
        Ok(Download { file, content })
    }

    /// Soft delete file `id` and remove its content.
    pub async fn remove(&self, id: EntityId) -> Result<()> {
        let uow = self.unit_of_work();
        let files = uow.repository::<File>();
        let file = files
            .get_by_id(id, &QueryOptions::new())
            .await?
            .ok_or_else(|| SciError::NotFound(format!("File {id}")))?;
        files.delete(&file)?;
        uow.try_save_context().await?;

        if !self.store.delete(&id.to_string()).await? {
            warn!(%id, "Deleted file had no stored content");
        }
        info!(%id, "deleted file");
        Ok(())
    }

    pub async fn get_file(&self, id: EntityId) -> ServiceResult<File> {
        let uow = self.unit_of_work();
        let options = QueryOptions::new()
            .include(Include::ContentType)
            .include(Include::Author)
            .include(Include::Tags);
        found(uow.repository::<File>().get_by_id(id, &options).await, "File")
    }

    pub async fn add_file(
        &self,
        request: &UploadRequest,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> ServiceResult<File> {
        self.upload(request, content).await.into()
    }

    pub async fn delete(&self, id: EntityId) -> ServiceResult<()> {
        self.remove(id).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Link;
    use crate::services::ResultCode;
    use crate::storage::LocalFileStore;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        service: FileService,
        author: Author,
    }

    async fn fixture(max_upload_size_mb: u64) -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Database::open_sqlite(dir.path().join("files.db")).await.unwrap();
        db.migrate().await.unwrap();
        let store = LocalFileStore::new(dir.path().join("blobs")).await.unwrap();

        let author = Author::new("Ada");
        let uow = UnitOfWork::new(db.clone());
        uow.repository::<Author>().add(&author).unwrap();
        uow.try_save_context().await.unwrap();

        let config = FilesConfig {
            max_upload_size_mb,
            ..FilesConfig::default()
        };
        let service = FileService::new(db, Arc::new(store), config, LinksConfig::default());
        Fixture {
            _dir: dir,
            service,
            author,
        }
    }

    #[test]
    fn test_content_type_of() {
        assert_eq!(
            content_type_of("notes.PDF"),
            ("application/pdf".to_string(), Some("pdf".to_string()))
        );
        assert_eq!(
            content_type_of("README"),
            ("application/octet-stream".to_string(), None)
        );
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let f = fixture(1).await;
        let request = UploadRequest::new("lecture.txt", f.author.id).with_description("week 1");
        let mut content: &[u8] = b"Newton's laws";
        let file = f.service.upload(&request, &mut content).await.unwrap();

        assert_eq!(file.size, 13);
        assert_eq!(file.resource.description.as_deref(), Some("week 1"));
        assert_eq!(file.hash.as_deref().map(str::len), Some(64));
        assert!(file.short_link.is_some());
        assert_eq!(file.content_type.as_ref().unwrap().name, "text/plain");

        let mut download = f.service.download(file.resource.id).await.unwrap();
        let mut text = String::new();
        download.content.read_to_string(&mut text).await.unwrap();
        assert_eq!(text, "Newton's laws");
        assert_eq!(download.file.content_type_id, file.content_type_id);
    }

    #[tokio::test]
    async fn test_duplicate_content_returns_existing_file() {
        let f = fixture(1).await;
        let mut first: &[u8] = b"same bytes";
        let a = f
            .service
            .upload(&UploadRequest::new("a.txt", f.author.id), &mut first)
            .await
            .unwrap();
        let mut second: &[u8] = b"same bytes";
        let b = f
            .service
            .upload(&UploadRequest::new("b.txt", f.author.id), &mut second)
            .await
            .unwrap();
        assert_eq!(a.resource.id, b.resource.id);

        let uow = UnitOfWork::new(f.service.db.clone());
        assert_eq!(uow.repository::<File>().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected() {
        let f = fixture(1).await;
        let data = vec![0u8; 1024 * 1024 + 1];
        let mut content: &[u8] = &data;
        let result = f
            .service
            .add_file(&UploadRequest::new("big.bin", f.author.id), &mut content)
            .await;
        assert_eq!(result.code, ResultCode::Validation);

        let uow = UnitOfWork::new(f.service.db.clone());
        assert_eq!(uow.repository::<File>().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_author_rejected() {
        let f = fixture(1).await;
        let mut content: &[u8] = b"x";
        let result = f
            .service
            .add_file(&UploadRequest::new("x.txt", EntityId::new()), &mut content)
            .await;
        assert!(result.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_content() {
        let f = fixture(1).await;
        let mut content: &[u8] = b"temporary";
        let file = f
            .service
            .upload(&UploadRequest::new("tmp.txt", f.author.id), &mut content)
            .await
            .unwrap();

        assert!(f.service.delete(file.resource.id).await.succeeded);
        assert!(f.service.get_file(file.resource.id).await.is_not_found());
        assert!(matches!(
            f.service.download(file.resource.id).await,
            Err(SciError::NotFound(_))
        ));
        assert!(f.service.delete(file.resource.id).await.is_not_found());
    }

    #[tokio::test]
    async fn test_failed_record_leaves_no_link() {
        let f = fixture(1).await;
        let uow = f.service.unit_of_work();
        // no such author, so the insert fails after the link is staged
        let mut file = File::new("orphan.pdf", EntityId::new());
        let result = f
            .service
            .record(&uow, &mut file, 3, "feed".to_string())
            .await;
        assert!(result.is_err());

        let check = UnitOfWork::new(f.service.db.clone());
        assert_eq!(check.repository::<Link>().count().await.unwrap(), 0);
        assert_eq!(check.repository::<ContentType>().count().await.unwrap(), 0);
        assert_eq!(check.repository::<File>().count().await.unwrap(), 0);
    }
}
