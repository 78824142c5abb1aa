//! Contact repository.

use std::sync::Arc;

use herald_common::{AppError, AppResult};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};

use crate::entities::{Contact, contact, contact::ContactStatus};

/// Contact repository. The dispatch engine only reads contacts.
#[derive(Clone)]
pub struct ContactRepository {
    db: Arc<DatabaseConnection>,
}

impl ContactRepository {
    /// Create a new contact repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a contact by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<contact::Model>> {
        Contact::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Active, not opted-out contacts among `ids`. Row order is unspecified.
    pub async fn find_eligible_by_ids(&self, ids: &[String]) -> AppResult<Vec<contact::Model>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        Contact::find()
            .filter(contact::Column::Id.is_in(ids.iter().cloned()))
            .filter(contact::Column::Status.eq(ContactStatus::Active))
            .filter(contact::Column::OptedOut.eq(false))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new contact.
    pub async fn create(&self, model: contact::ActiveModel) -> AppResult<contact::Model> {
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

    fn create_test_contact(id: &str) -> contact::Model {
        contact::Model {
            id: id.to_string(),
            name: "Ann".to_string(),
            phone: "+1 555 0100".to_string(),
            email: None,
            tags: json!([]),
            status: ContactStatus::Active,
            opted_out: false,
            metadata: json!({"city": "Lisbon"}),
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_find_eligible_empty_ids_skips_query() {
        // No query results appended: a query would fail
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        let repo = ContactRepository::new(db);
        let result = repo.find_eligible_by_ids(&[]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_find_eligible_by_ids() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_contact("c1"), create_test_contact("c2")]])
                .into_connection(),
        );

        let repo = ContactRepository::new(db);
        let result = repo
            .find_eligible_by_ids(&["c1".to_string(), "c2".to_string()])
            .await
            .unwrap();
        assert_eq!(result.len(), 2);
    }
}
