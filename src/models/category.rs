use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::any::AnyRow;

use crate::db::{
    AnyRowExt, DbContext, Entity, EntityId, Include, JoinTable, Named, QueryOptions, Repository,
    SqlValue,
};
use crate::Result;

/// Node of the category hierarchy. Roots have no parent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    pub id: EntityId,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<EntityId>,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<Category>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Category>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource_ids: Vec<EntityId>,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            description: None,
            parent_id: None,
            created_at: Utc::now(),
            is_deleted: false,
            parent: None,
            children: Vec::new(),
            resource_ids: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: EntityId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[async_trait]
impl Entity for Category {
    const TABLE: &'static str = "categories";
    const KIND: &'static str = "category";
    const COLUMNS: &'static [&'static str] = &["name", "description", "parent_id", "created_at"];

    fn id(&self) -> EntityId {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn set_deleted(&mut self, deleted: bool) {
        self.is_deleted = deleted;
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.name.clone().into(),
            self.description.clone().into(),
            self.parent_id.into(),
            self.created_at.into(),
        ]
    }

    fn from_row(row: &AnyRow) -> Result<Self> {
        Ok(Self {
            id: row.id("id")?,
            name: row.text("name")?,
            description: row.opt_text("description")?,
            parent_id: row.opt_id("parent_id")?,
            created_at: row.timestamp("created_at")?,
            is_deleted: row.flag("is_deleted")?,
            parent: None,
            children: Vec::new(),
            resource_ids: Vec::new(),
        })
    }

    async fn load_include(&mut self, ctx: &DbContext, include: Include) -> Result<()> {
        match include {
            Include::Parent => {
                if let Some(parent_id) = self.parent_id {
                    self.parent = ctx.find::<Category>(parent_id).await?.map(Box::new);
                }
            }
            Include::Children => {
                self.children = ctx.find_by::<Category>("parent_id", self.id).await?;
            }
            Include::Resources => {
                self.resource_ids = ctx
                    .find_linked_ids(&JoinTable::RESOURCE_CATEGORIES.reversed(), self.id)
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }
}

impl Named for Category {
    fn name(&self) -> &str {
        &self.name
    }
}

/// A category with its live descendants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTree {
    pub category: Category,
    pub children: Vec<CategoryTree>,
}

impl CategoryTree {
    /// Number of nodes below this one.
    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| 1 + child.descendant_count())
            .sum()
    }

    /// Depth-first search by category name.
    pub fn find(&self, name: &str) -> Option<&CategoryTree> {
        if self.category.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }
}

impl Repository<Category> {
    /// Build the tree rooted at `root_id`.
    ///
    /// Soft-deleted categories and everything below them are left out.
    /// Returns `None` if the root itself is missing or deleted.
    pub async fn get_tree(&self, root_id: EntityId) -> Result<Option<CategoryTree>> {
        let categories = self.get_all(&QueryOptions::new()).await?;

        let mut root = None;
        let mut children_of: HashMap<EntityId, Vec<Category>> = HashMap::new();
        for category in categories {
            if category.id == root_id {
                root = Some(category);
            } else if let Some(parent_id) = category.parent_id {
                children_of.entry(parent_id).or_default().push(category);
            }
        }

        let Some(root) = root else {
            return Ok(None);
        };
        let mut visited = HashSet::new();
        Ok(Some(build_tree(root, &mut children_of, &mut visited)))
    }
}

fn build_tree(
    category: Category,
    children_of: &mut HashMap<EntityId, Vec<Category>>,
    visited: &mut HashSet<EntityId>,
) -> CategoryTree {
    visited.insert(category.id);
    let mut children = Vec::new();
    for child in children_of.remove(&category.id).unwrap_or_default() {
        // a parent cycle must not recurse forever
        if !visited.contains(&child.id) {
            children.push(build_tree(child, children_of, visited));
        }
    }
    CategoryTree { category, children }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(name: &str, children: Vec<CategoryTree>) -> CategoryTree {
        CategoryTree {
            category: Category::new(name),
            children,
        }
    }

    #[test]
    fn test_descendant_count_and_find() {
        let root = tree(
            "Physics",
            vec![tree("Mechanics", vec![tree("Statics", vec![])]), tree("Optics", vec![])],
        );
        assert_eq!(root.descendant_count(), 3);
        assert_eq!(root.find("Statics").unwrap().category.name, "Statics");
        assert!(root.find("Biology").is_none());
    }

    #[test]
    fn test_build_tree_breaks_cycles() {
        let a = Category::new("a");
        let mut b = Category::new("b").with_parent(a.id);
        let a = a.with_parent(b.id);
        b.parent_id = Some(a.id);

        let mut children_of = HashMap::new();
        children_of.insert(a.id, vec![b.clone()]);
        children_of.insert(b.id, vec![a.clone()]);
        let mut visited = HashSet::new();
        let tree = build_tree(a, &mut children_of, &mut visited);
        assert_eq!(tree.descendant_count(), 1);
    }

    #[test]
    fn test_new_category_is_root() {
        let parent = Category::new("Sciences");
        let child = Category::new("Physics").with_parent(parent.id);
        assert!(parent.is_root());
        assert!(!child.is_root());
    }
}
