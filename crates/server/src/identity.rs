//! Maps external identities onto internal users.
//!
//! Users are keyed by email. The `users.email` unique constraint is the only
//! thing that serialises concurrent first logins: whichever insert loses the
//! race simply reads back the row the winner created.

use crate::entity::user;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, SqlErr, sea_query::OnConflict,
};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone)]
pub struct IdentityResolver {
    db: Arc<DatabaseConnection>,
}

impl IdentityResolver {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Return the user owning `email`, creating it first if there is none.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_or_create(&self, email: &str) -> Result<user::Model, DbErr> {
        if let Some(user) = self.get_by_email(email).await? {
            return Ok(user);
        }

        let candidate = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            created_at: Set(OffsetDateTime::now_utc()),
        };

        match user::Entity::insert(candidate)
            .on_conflict(
                OnConflict::column(user::Column::Email)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(self.db.as_ref())
            .await
        {
            Ok(_) => tracing::info!(email = email, "Created user"),
            Err(DbErr::RecordNotInserted) => {
                tracing::debug!(email = email, "User created concurrently, reusing it")
            }
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                tracing::debug!(email = email, "User created concurrently, reusing it")
            }
            Err(err) => {
                tracing::error!(email = email, error = %err, "Failed to create user");
                return Err(err);
            }
        }

        self.get_by_email(email).await?.ok_or_else(|| {
            DbErr::RecordNotFound(format!("user for {email} missing after upsert"))
        })
    }

    /// Insert a user for `email`. Fails if the email is already taken.
    #[tracing::instrument(skip(self))]
    pub async fn create(&self, email: &str) -> Result<user::Model, DbErr> {
        let user = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            created_at: Set(OffsetDateTime::now_utc()),
        };
        let inserted = user.insert(self.db.as_ref()).await?;
        tracing::info!(email = email, user_id = %inserted.id, "Created user");
        Ok(inserted)
    }

    pub async fn exists_by_email(&self, email: &str) -> Result<bool, DbErr> {
        let count = user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .count(self.db.as_ref())
            .await?;
        Ok(count > 0)
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<user::Model>, DbErr> {
        user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(self.db.as_ref())
            .await
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<user::Model>, DbErr> {
        user::Entity::find_by_id(id).one(self.db.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ConnectOptions, Database};

    async fn setup_test_db() -> Arc<DatabaseConnection> {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1).sqlx_logging(false);
        let db = Database::connect(options).await.expect("connect");
        Migrator::up(&db, None).await.expect("migrate");
        Arc::new(db)
    }

    #[tokio::test]
    async fn resolve_creates_missing_user() {
        let resolver = IdentityResolver::new(setup_test_db().await);

        assert!(!resolver.exists_by_email("a@example.com").await.unwrap());
        let user = resolver.resolve_or_create("a@example.com").await.unwrap();

        assert_eq!(user.email, "a@example.com");
        assert!(resolver.exists_by_email("a@example.com").await.unwrap());
        assert_eq!(resolver.get_by_id(user.id).await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn resolve_is_idempotent() {
        let resolver = IdentityResolver::new(setup_test_db().await);

        let first = resolver.resolve_or_create("a@example.com").await.unwrap();
        let second = resolver.resolve_or_create("a@example.com").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_logins_share_one_user() {
        let resolver = IdentityResolver::new(setup_test_db().await);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve_or_create("new@example.com").await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn emails_are_case_sensitive() {
        let resolver = IdentityResolver::new(setup_test_db().await);

        let lower = resolver.resolve_or_create("a@example.com").await.unwrap();
        let upper = resolver.resolve_or_create("A@example.com").await.unwrap();
        assert_ne!(lower.id, upper.id);
    }

    #[tokio::test]
    async fn plain_create_rejects_duplicate_email() {
        let resolver = IdentityResolver::new(setup_test_db().await);

        resolver.create("a@example.com").await.unwrap();
        let err = resolver.create("a@example.com").await.unwrap_err();
        assert!(matches!(
            err.sql_err(),
            Some(SqlErr::UniqueConstraintViolation(_))
        ));
    }

    #[tokio::test]
    async fn lookups_miss_unknown_users() {
        let resolver = IdentityResolver::new(setup_test_db().await);

        assert!(resolver.get_by_email("nobody@example.com").await.unwrap().is_none());
        assert!(resolver.get_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_logins_on_pooled_database_share_one_user() {
        let path = std::env::temp_dir().join(format!("identity-pool-{}.db", Uuid::new_v4()));
        let mut options = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path.display()));
        options.max_connections(8).sqlx_logging(false);
        let db = Database::connect(options).await.expect("connect");
        Migrator::up(&db, None).await.expect("migrate");
        let resolver = IdentityResolver::new(Arc::new(db));

        let start = Arc::new(tokio::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                let start = start.clone();
                tokio::spawn(async move {
                    start.wait().await;
                    resolver.resolve_or_create("pooled@example.com").await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);

        for suffix in ["", "-wal", "-shm", "-journal"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }
}
