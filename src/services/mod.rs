//! Services built on the unit of work.
//!
//! Each call runs in a unit of work of its own. Calls come in two forms:
//! one returning [`crate::Result`] for composition, and one returning a
//! [`ServiceResult`] for callers that want a structured outcome.

mod categories;
mod files;
mod links;
mod result;
mod urls;

pub use categories::{CategoryService, MAX_CATEGORY_NAME_LENGTH};
pub use files::{Download, FileService, UploadRequest};
pub use links::{link_digest, LinkShortService};
pub use result::{ResultCode, ServiceResult};
pub use urls::{validate_address, NewUrl, UrlService};
