//! SciMaterials - persistence core for cataloguing and serving
//! educational and scientific files.
//!
//! Entities are read and staged through [`db::Repository`] instances that
//! share one [`db::UnitOfWork`]; staged changes are written together when
//! the unit of work is saved. The same code runs against SQLite, PostgreSQL
//! and MySQL through the provider table in [`db::Provider`].

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod storage;

pub use config::Config;
pub use db::{
    blocking, Database, DbInitializer, Entity, EntityId, Include, Page, PageRequest, Provider,
    QueryOptions, Repository, TransactionState, UnitOfWork,
};
pub use error::{Result, SciError};
pub use models::{
    Author, Category, CategoryTree, Comment, ContentType, File, FileGroup, Link, Rating, Resource,
    ResourceType, Tag, Url, User,
};
pub use services::{ResultCode, ServiceResult};
pub use storage::{FileStore, LocalFileStore, StoredFile};
