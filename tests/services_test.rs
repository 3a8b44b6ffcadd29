//! Services working together on one database.

mod common;

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use scimaterials::config::{FilesConfig, LinksConfig};
use scimaterials::services::{
    CategoryService, FileService, LinkShortService, NewUrl, ResultCode, UploadRequest, UrlService,
};
use scimaterials::{File, LocalFileStore, QueryOptions, UnitOfWork};

use common::{create_author, setup_db};

#[tokio::test]
async fn test_uploaded_file_has_working_short_link() {
    let (dir, db) = setup_db().await;
    let author = create_author(&db, "Ada").await;
    let store = LocalFileStore::new(dir.path().join("files")).await.unwrap();
    let files = FileService::new(
        db.clone(),
        Arc::new(store),
        FilesConfig::default(),
        LinksConfig::default(),
    );
    let links = LinkShortService::new(db.clone(), LinksConfig::default());

    let mut content: &[u8] = b"%PDF-1.7 lecture";
    let file = files
        .upload(&UploadRequest::new("lecture.pdf", author.id), &mut content)
        .await
        .unwrap();
    assert_eq!(file.content_type.as_ref().unwrap().name, "application/pdf");

    let hash = file.short_link.clone().unwrap();
    let target = links.resolve(&hash).await.data.unwrap();
    assert_eq!(target, format!("/files/{}", file.resource.id));

    let mut download = files.download(file.resource.id).await.unwrap();
    let mut bytes = Vec::new();
    download.content.read_to_end(&mut bytes).await.unwrap();
    assert_eq!(bytes, b"%PDF-1.7 lecture");
}

#[tokio::test]
async fn test_duplicate_upload_found_by_hash() {
    let (dir, db) = setup_db().await;
    let author = create_author(&db, "Ada").await;
    let store = LocalFileStore::new(dir.path().join("files")).await.unwrap();
    let files = FileService::new(
        db.clone(),
        Arc::new(store),
        FilesConfig::default(),
        LinksConfig::default(),
    );

    let mut first: &[u8] = b"identical";
    let original = files
        .upload(&UploadRequest::new("one.txt", author.id), &mut first)
        .await
        .unwrap();
    let mut second: &[u8] = b"identical";
    let duplicate = files
        .upload(&UploadRequest::new("two.txt", author.id), &mut second)
        .await
        .unwrap();
    assert_eq!(duplicate.resource.id, original.resource.id);

    let uow = UnitOfWork::new(db.clone());
    let by_hash = uow
        .repository::<File>()
        .get_by_hash(original.hash.as_deref().unwrap(), &QueryOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_hash.resource.title, "one.txt");
}

#[tokio::test]
async fn test_url_in_category() {
    let (_dir, db) = setup_db().await;
    let author = create_author(&db, "Ada").await;
    let categories = CategoryService::new(db.clone());
    let urls = UrlService::new(db.clone());

    let physics = categories.create("Physics", None, None).await.data.unwrap();
    let url = urls
        .create(&NewUrl::new("Arxiv", "https://arxiv.org", author.id).with_tag("preprint"))
        .await
        .data
        .unwrap();

    let uow = UnitOfWork::new(db.clone());
    uow.repository::<scimaterials::Url>()
        .attach_category(url.resource.id, physics.id)
        .unwrap();
    uow.try_save_context().await.unwrap();

    let loaded = urls.get(url.resource.id).await.data.unwrap();
    assert_eq!(loaded.resource.categories[0].name, "Physics");
    assert_eq!(loaded.resource.tags[0].name, "preprint");
}

#[tokio::test]
async fn test_cancelled_services_report_cancellation() {
    let (_dir, db) = setup_db().await;
    let token = CancellationToken::new();
    token.cancel();

    let categories = CategoryService::new(db.clone()).with_cancellation(token.clone());
    let result = categories.create("Physics", None, None).await;
    assert!(!result.succeeded);
    assert_eq!(result.code, ResultCode::Cancelled);

    let links = LinkShortService::new(db.clone(), LinksConfig::default()).with_cancellation(token);
    assert_eq!(
        links.add_link("https://example.org").await.code,
        ResultCode::Cancelled
    );

    // nothing was written
    let categories = CategoryService::new(db);
    assert!(categories.all().await.data.unwrap().is_empty());
}
