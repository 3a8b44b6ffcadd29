//! Entity model of the SciMaterials catalogue.
//!
//! Every record carries an [`EntityId`](crate::db::EntityId) and a soft
//! delete flag. Files, file groups and urls share the `resources` table
//! and are told apart by their [`ResourceType`].

mod author;
mod category;
mod comment;
mod content_type;
mod link;
mod rating;
mod resource;
mod tag;

pub use author::{Author, User};
pub use category::{Category, CategoryTree};
pub use comment::Comment;
pub use content_type::ContentType;
pub use link::Link;
pub use rating::Rating;
pub use resource::{File, FileGroup, Resource, ResourceBase, ResourceType, Url};
pub use tag::Tag;
