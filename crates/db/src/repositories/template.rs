//! Template repository.

use std::sync::Arc;

use herald_common::{AppError, AppResult};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait};

use crate::entities::{Template, template};

/// Template repository for database operations.
#[derive(Clone)]
pub struct TemplateRepository {
    db: Arc<DatabaseConnection>,
}

impl TemplateRepository {
    /// Create a new template repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a template by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<template::Model>> {
        Template::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new template.
    pub async fn create(&self, model: template::ActiveModel) -> AppResult<template::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use serde_json::json;

    #[tokio::test]
    async fn test_find_by_id() {
        let template = template::Model {
            id: "tpl1".to_string(),
            name: "welcome".to_string(),
            body: "Hi {{name}}".to_string(),
            variables: json!(["name"]),
            category: Some("marketing".to_string()),
            created_at: Utc::now().into(),
            updated_at: None,
        };
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[template]])
                .into_connection(),
        );

        let repo = TemplateRepository::new(db);
        let result = repo.find_by_id("tpl1").await.unwrap().unwrap();
        assert_eq!(result.body, "Hi {{name}}");
    }
}
