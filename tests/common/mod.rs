//! Test helpers for integration tests.
//!
//! Every test gets its own file-backed SQLite database in a temporary
//! directory, removed when the returned [`TempDir`] is dropped.

#![allow(dead_code)]

use tempfile::TempDir;

use scimaterials::{Author, Database, UnitOfWork};

/// Open a fresh database with the current schema.
pub async fn setup_db() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::open_sqlite(dir.path().join("test.db")).await.unwrap();
    db.migrate().await.unwrap();
    (dir, db)
}

/// Store an author named `name` and return it.
pub async fn create_author(db: &Database, name: &str) -> Author {
    let author = Author::new(name);
    let uow = UnitOfWork::new(db.clone());
    uow.repository::<Author>().add(&author).unwrap();
    assert_eq!(uow.try_save_context().await.unwrap(), 1);
    author
}
