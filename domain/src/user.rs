use crate::{error::Error, users};
use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

pub use entity_api::user::{AuthSession, Backend, Credentials, Role};

/// The administrative capabilities the gateway consumes from the identity provider.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Total number of accounts known to the provider.
    async fn count_users(&self) -> Result<u64, Error>;

    /// Creates an account. `user.password` is plain text; the provider hashes it.
    async fn create_user(&self, user: users::Model) -> Result<users::Model, Error>;
}

/// `IdentityStore` backed by the sea-orm `users` table.
#[derive(Clone)]
pub struct DatabaseIdentityStore {
    db: Arc<DatabaseConnection>,
}

impl DatabaseIdentityStore {
    pub fn new(db: &Arc<DatabaseConnection>) -> Self {
        Self { db: Arc::clone(db) }
    }
}

#[async_trait]
impl IdentityStore for DatabaseIdentityStore {
    async fn count_users(&self) -> Result<u64, Error> {
        Ok(entity_api::user::count(self.db.as_ref()).await?)
    }

    async fn create_user(&self, user: users::Model) -> Result<users::Model, Error> {
        Ok(entity_api::user::create(self.db.as_ref(), user).await?)
    }
}
