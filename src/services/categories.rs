use tokio_util::sync::CancellationToken;
use tracing::info;

use super::result::{found, ServiceResult};
use crate::db::{Database, EntityId, Include, QueryOptions, UnitOfWork};
use crate::models::{Category, CategoryTree};
use crate::{Result, SciError};

/// Maximum length of a category name, in characters.
pub const MAX_CATEGORY_NAME_LENGTH: usize = 255;

/// Category management.
#[derive(Clone)]
pub struct CategoryService {
    db: Database,
    cancel: CancellationToken,
}

impl CategoryService {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn unit_of_work(&self) -> UnitOfWork {
        UnitOfWork::with_cancellation(self.db.clone(), self.cancel.clone())
    }

    /// Create a category, below `parent_id` if given.
    pub async fn create_category(
        &self,
        name: &str,
        parent_id: Option<EntityId>,
        description: Option<&str>,
    ) -> Result<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SciError::Validation("category name is empty".to_string()));
        }
        if name.chars().count() > MAX_CATEGORY_NAME_LENGTH {
            return Err(SciError::Validation(format!(
                "category name is longer than {MAX_CATEGORY_NAME_LENGTH} characters"
            )));
        }

        let uow = self.unit_of_work();
        let categories = uow.repository::<Category>();

        // names stay reserved by deleted categories
        let taken = categories
            .get_by_name(name, &QueryOptions::new().with_deleted())
            .await?;
        if taken.is_some() {
            return Err(SciError::UniqueViolation(format!("category {name} already exists")));
        }

        let mut category = Category::new(name);
        if let Some(parent_id) = parent_id {
            if !categories.exists(parent_id).await? {
                return Err(SciError::NotFound(format!("Parent category {parent_id}")));
            }
            category = category.with_parent(parent_id);
        }
        if let Some(description) = description {
            category = category.with_description(description);
        }

        categories.add(&category)?;
        uow.try_save_context().await?;
        info!(id = %category.id, name, "created category");
        Ok(category)
    }

    /// Soft delete a category without live subcategories.
    pub async fn delete_category(&self, id: EntityId) -> Result<()> {
        let uow = self.unit_of_work();
        let categories = uow.repository::<Category>();
        let category = categories
            .get_by_id(id, &QueryOptions::new().include(Include::Children))
            .await?
            .ok_or_else(|| SciError::NotFound(format!("Category {id}")))?;
        if !category.children.is_empty() {
            return Err(SciError::Validation(format!(
                "category {} has {} subcategories",
                category.name,
                category.children.len()
            )));
        }
        categories.delete(&category)?;
        uow.try_save_context().await?;
        info!(%id, "deleted category");
        Ok(())
    }

    pub async fn create(
        &self,
        name: &str,
        parent_id: Option<EntityId>,
        description: Option<&str>,
    ) -> ServiceResult<Category> {
        self.create_category(name, parent_id, description).await.into()
    }

    /// Category with its parent and direct children.
    pub async fn get(&self, id: EntityId) -> ServiceResult<Category> {
        let options = QueryOptions::new()
            .include(Include::Parent)
            .include(Include::Children);
        let uow = self.unit_of_work();
        found(uow.repository::<Category>().get_by_id(id, &options).await, "Category")
    }

    pub async fn get_by_name(&self, name: &str) -> ServiceResult<Category> {
        let uow = self.unit_of_work();
        found(
            uow.repository::<Category>()
                .get_by_name(name, &QueryOptions::new())
                .await,
            "Category",
        )
    }

    pub async fn all(&self) -> ServiceResult<Vec<Category>> {
        let uow = self.unit_of_work();
        uow.repository::<Category>()
            .get_all(&QueryOptions::new())
            .await
            .into()
    }

    pub async fn tree(&self, root_id: EntityId) -> ServiceResult<CategoryTree> {
        let uow = self.unit_of_work();
        found(uow.repository::<Category>().get_tree(root_id).await, "Category")
    }

    pub async fn delete(&self, id: EntityId) -> ServiceResult<()> {
        self.delete_category(id).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ResultCode;
    use tempfile::TempDir;

    async fn service() -> (TempDir, CategoryService) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_sqlite(dir.path().join("categories.db")).await.unwrap();
        db.migrate().await.unwrap();
        (dir, CategoryService::new(db))
    }

    #[tokio::test]
    async fn test_create_and_get_with_relations() {
        let (_dir, categories) = service().await;
        let physics = categories.create_category("Physics", None, None).await.unwrap();
        let mechanics = categories
            .create_category("Mechanics", Some(physics.id), Some("classical"))
            .await
            .unwrap();

        let loaded = categories.get(physics.id).await.data.unwrap();
        assert_eq!(loaded.children.len(), 1);
        assert_eq!(loaded.children[0].id, mechanics.id);

        let child = categories.get(mechanics.id).await.data.unwrap();
        assert_eq!(child.parent.as_ref().map(|p| p.id), Some(physics.id));
        assert_eq!(child.description.as_deref(), Some("classical"));
    }

    #[tokio::test]
    async fn test_tree() {
        let (_dir, categories) = service().await;
        let physics = categories.create_category("Physics", None, None).await.unwrap();
        let mechanics = categories
            .create_category("Mechanics", Some(physics.id), None)
            .await
            .unwrap();
        categories
            .create_category("Statics", Some(mechanics.id), None)
            .await
            .unwrap();

        let tree = categories.tree(physics.id).await.data.unwrap();
        assert_eq!(tree.descendant_count(), 2);
        assert!(tree.find("Statics").is_some());
    }

    #[tokio::test]
    async fn test_validation() {
        let (_dir, categories) = service().await;
        assert_eq!(categories.create(" ", None, None).await.code, ResultCode::Validation);
        assert_eq!(
            categories
                .create(&"x".repeat(MAX_CATEGORY_NAME_LENGTH + 1), None, None)
                .await
                .code,
            ResultCode::Validation
        );
        assert!(categories
            .create("Orphan", Some(EntityId::new()), None)
            .await
            .is_not_found());
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let (_dir, categories) = service().await;
        assert!(categories.create("Biology", None, None).await.succeeded);
        assert_eq!(
            categories.create("Biology", None, None).await.code,
            ResultCode::Conflict
        );
    }

    #[tokio::test]
    async fn test_delete_requires_no_children() {
        let (_dir, categories) = service().await;
        let physics = categories.create_category("Physics", None, None).await.unwrap();
        let optics = categories
            .create_category("Optics", Some(physics.id), None)
            .await
            .unwrap();

        assert_eq!(categories.delete(physics.id).await.code, ResultCode::Validation);
        assert!(categories.delete(optics.id).await.succeeded);
        assert!(categories.delete(physics.id).await.succeeded);
        assert!(categories.get(physics.id).await.is_not_found());
        assert!(categories.all().await.data.unwrap().is_empty());
    }
}
