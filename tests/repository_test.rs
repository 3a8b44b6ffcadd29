//! Repository behaviour against a real SQLite database.

mod common;

use scimaterials::db::PageRequest;
use scimaterials::{
    Category, ContentType, EntityId, File, Include, QueryOptions, Tag, UnitOfWork, Url,
};

use common::{create_author, setup_db};

#[tokio::test]
async fn test_add_then_get_by_id_round_trips() {
    let (_dir, db) = setup_db().await;
    let author = create_author(&db, "Marie").await;

    let uow = UnitOfWork::new(db.clone());
    let mut file = File::new("Radioactivity notes", author.id);
    file.size = 2048;
    file.hash = Some("abc123".to_string());
    file.resource.description = Some("Chapter 3".to_string());
    uow.repository::<File>().add(&file).unwrap();
    assert_eq!(uow.try_save_context().await.unwrap(), 1);

    let fresh = UnitOfWork::new(db.clone());
    let loaded = fresh
        .repository::<File>()
        .get_by_id(file.resource.id, &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(loaded, Some(file));
}

#[tokio::test]
async fn test_delete_is_soft() {
    let (_dir, db) = setup_db().await;
    let uow = UnitOfWork::new(db.clone());
    let tags = uow.repository::<Tag>();
    let tag = Tag::new("obsolete");
    tags.add(&tag).unwrap();
    uow.try_save_context().await.unwrap();

    tags.delete_by_id(tag.id).unwrap();
    assert_eq!(uow.try_save_context().await.unwrap(), 1);

    assert_eq!(tags.get_by_id(tag.id, &QueryOptions::new()).await.unwrap(), None);
    assert!(!tags.exists(tag.id).await.unwrap());
    assert_eq!(tags.count().await.unwrap(), 0);

    let deleted = tags
        .get_by_id(tag.id, &QueryOptions::new().with_deleted())
        .await
        .unwrap()
        .unwrap();
    assert!(deleted.is_deleted);
    assert_eq!(deleted.name, "obsolete");
}

#[tokio::test]
async fn test_delete_missing_id_fails_on_save() {
    let (_dir, db) = setup_db().await;
    let uow = UnitOfWork::new(db);
    uow.repository::<Tag>().delete_by_id(EntityId::new()).unwrap();
    assert!(matches!(
        uow.try_save_context().await,
        Err(scimaterials::SciError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_pages_concatenate_to_get_all() {
    let (_dir, db) = setup_db().await;
    let uow = UnitOfWork::new(db.clone());
    let tags = uow.repository::<Tag>();
    for i in 0..23 {
        tags.add(&Tag::new(format!("tag-{i:02}"))).unwrap();
    }
    assert_eq!(uow.try_save_context().await.unwrap(), 23);

    let all = tags.get_all(&QueryOptions::new()).await.unwrap();
    assert_eq!(all.len(), 23);

    let mut paged = Vec::new();
    let mut page_number = 1;
    loop {
        let page = tags
            .get_page(PageRequest::new(page_number, 5), &QueryOptions::new())
            .await
            .unwrap();
        assert_eq!(page.total_count, 23);
        assert_eq!(page.total_pages(), 5);
        let has_next = page.has_next_page();
        paged.extend(page.items);
        if !has_next {
            break;
        }
        page_number += 1;
    }
    assert_eq!(page_number, 5);
    assert_eq!(paged, all);
}

#[tokio::test]
async fn test_invalid_page_request_rejected() {
    let (_dir, db) = setup_db().await;
    let uow = UnitOfWork::new(db);
    let result = uow
        .repository::<Tag>()
        .get_page(PageRequest::new(0, 10), &QueryOptions::new())
        .await;
    assert!(matches!(result, Err(scimaterials::SciError::Validation(_))));
}

#[tokio::test]
async fn test_get_by_hash_finds_file() {
    let (_dir, db) = setup_db().await;
    let author = create_author(&db, "Marie").await;
    let uow = UnitOfWork::new(db.clone());
    let files = uow.repository::<File>();

    let mut file = File::new("dataset.csv", author.id);
    file.hash = Some("abc123".to_string());
    files.add(&file).unwrap();
    files.add(&File::new("other.csv", author.id)).unwrap();
    uow.try_save_context().await.unwrap();

    let found = files
        .get_by_hash("abc123", &QueryOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.resource.id, file.resource.id);
    assert!(files
        .get_by_hash("ffffff", &QueryOptions::new())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_get_by_name() {
    let (_dir, db) = setup_db().await;
    let uow = UnitOfWork::new(db.clone());
    let content_types = uow.repository::<ContentType>();
    let pdf = ContentType::new("application/pdf", Some("pdf"));
    content_types.add(&pdf).unwrap();
    uow.try_save_context().await.unwrap();

    let found = content_types
        .get_by_name("application/pdf", &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(found, Some(pdf));
}

#[tokio::test]
async fn test_resource_kinds_share_table_but_not_rows() {
    let (_dir, db) = setup_db().await;
    let author = create_author(&db, "Marie").await;
    let uow = UnitOfWork::new(db.clone());
    uow.repository::<File>()
        .add(&File::new("a.pdf", author.id))
        .unwrap();
    uow.repository::<Url>()
        .add(&Url::new("Docs", author.id, "https://example.org/"))
        .unwrap();
    uow.try_save_context().await.unwrap();

    assert_eq!(uow.repository::<File>().count().await.unwrap(), 1);
    assert_eq!(uow.repository::<Url>().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_includes_load_related_entities() {
    let (_dir, db) = setup_db().await;
    let author = create_author(&db, "Marie").await;
    let uow = UnitOfWork::new(db.clone());

    let tag = Tag::new("physics");
    let category = Category::new("Physics");
    let url = Url::new("Lecture", author.id, "https://example.org/lecture");
    uow.repository::<Tag>().add(&tag).unwrap();
    uow.repository::<Category>().add(&category).unwrap();
    let urls = uow.repository::<Url>();
    urls.add(&url).unwrap();
    urls.attach_tag(url.resource.id, tag.id).unwrap();
    urls.attach_category(url.resource.id, category.id).unwrap();
    uow.try_save_context().await.unwrap();

    let options = QueryOptions::new()
        .include(Include::Author)
        .include(Include::Tags)
        .include(Include::Categories);
    let loaded = urls.get_by_id(url.resource.id, &options).await.unwrap().unwrap();
    assert_eq!(loaded.resource.author.map(|a| a.id), Some(author.id));
    assert_eq!(loaded.resource.tags, vec![tag.clone()]);
    assert_eq!(loaded.resource.categories.len(), 1);

    let plain = urls
        .get_by_id(url.resource.id, &QueryOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert!(plain.resource.author.is_none());
    assert!(plain.resource.tags.is_empty());

    let tagged = uow
        .repository::<Tag>()
        .get_by_id(tag.id, &QueryOptions::new().include(Include::Resources))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tagged.resource_ids, vec![url.resource.id]);
}

#[tokio::test]
async fn test_detach_and_reattach_tag() {
    let (_dir, db) = setup_db().await;
    let author = create_author(&db, "Marie").await;
    let uow = UnitOfWork::new(db.clone());
    let tag = Tag::new("lab");
    let url = Url::new("Lab sheet", author.id, "https://example.org/lab");
    uow.repository::<Tag>().add(&tag).unwrap();
    let urls = uow.repository::<Url>();
    urls.add(&url).unwrap();
    urls.attach_tag(url.resource.id, tag.id).unwrap();
    uow.try_save_context().await.unwrap();

    let with_tags = QueryOptions::new().include(Include::Tags);
    urls.detach_tag(url.resource.id, tag.id).unwrap();
    uow.try_save_context().await.unwrap();
    let loaded = urls.get_by_id(url.resource.id, &with_tags).await.unwrap().unwrap();
    assert!(loaded.resource.tags.is_empty());

    urls.attach_tag(url.resource.id, tag.id).unwrap();
    uow.try_save_context().await.unwrap();
    let loaded = urls.get_by_id(url.resource.id, &with_tags).await.unwrap().unwrap();
    assert_eq!(loaded.resource.tags.len(), 1);
}

#[tokio::test]
async fn test_category_tree_physics_mechanics() {
    let (_dir, db) = setup_db().await;
    let uow = UnitOfWork::new(db.clone());
    let categories = uow.repository::<Category>();

    let physics = Category::new("Physics");
    let mechanics = Category::new("Mechanics").with_parent(physics.id);
    let optics = Category::new("Optics").with_parent(physics.id);
    let kinematics = Category::new("Kinematics").with_parent(mechanics.id);
    let chemistry = Category::new("Chemistry");
    for category in [&physics, &mechanics, &optics, &kinematics, &chemistry] {
        categories.add(category).unwrap();
    }
    uow.try_save_context().await.unwrap();

    let tree = categories.get_tree(physics.id).await.unwrap().unwrap();
    assert_eq!(tree.category.id, physics.id);
    assert_eq!(tree.children.len(), 2);
    assert_eq!(tree.descendant_count(), 3);
    let mechanics_node = tree.find("Mechanics").unwrap();
    assert_eq!(mechanics_node.children.len(), 1);
    assert_eq!(mechanics_node.children[0].category.name, "Kinematics");
    assert!(tree.find("Chemistry").is_none());

    // deleted subtrees disappear
    categories.delete(&mechanics).unwrap();
    uow.try_save_context().await.unwrap();
    let tree = categories.get_tree(physics.id).await.unwrap().unwrap();
    assert_eq!(tree.descendant_count(), 1);
    assert!(tree.find("Kinematics").is_none());

    let loaded = categories
        .get_by_id(
            kinematics.id,
            &QueryOptions::new().include(Include::Parent),
        )
        .await
        .unwrap()
        .unwrap();
    assert!(loaded.parent.is_none());
}
