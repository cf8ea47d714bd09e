//! Refresh token persistence and single-use rotation.
//!
//! A refresh token is a row in `refresh_tokens`; its id is the bearer value.
//! Rotation flips `available` from true to false with a conditional update and
//! inserts the successor in the same transaction, so for any token id at most
//! one rotation can ever succeed.

use crate::entity::refresh_token;
use crate::error::RefreshError;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, TransactionTrait, sea_query::Expr,
};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Owns every mutation of a refresh token's availability.
#[derive(Clone)]
pub struct RefreshTokenStore {
    db: Arc<DatabaseConnection>,
    lifetime: Duration,
}

impl RefreshTokenStore {
    /// `lifetime` is the validity window given to every token minted by [`Self::issue`]
    /// and [`Self::rotate`].
    pub fn new(db: Arc<DatabaseConnection>, lifetime: Duration) -> Self {
        Self { db, lifetime }
    }

    /// Insert a new, available refresh token for `user_id`.
    #[tracing::instrument(skip(self))]
    pub async fn create(
        &self,
        user_id: Uuid,
        expires_at: OffsetDateTime,
    ) -> Result<refresh_token::Model, RefreshError> {
        let token = insert_token(self.db.as_ref(), user_id, expires_at).await?;
        tracing::info!(token_id = %token.id, user_id = %user_id, "Created refresh token");
        Ok(token)
    }

    /// Insert a refresh token expiring one lifetime from now.
    pub async fn issue(&self, user_id: Uuid) -> Result<refresh_token::Model, RefreshError> {
        self.create(user_id, OffsetDateTime::now_utc() + self.lifetime)
            .await
    }

    pub async fn find(&self, token_id: Uuid) -> Result<Option<refresh_token::Model>, RefreshError> {
        Ok(refresh_token::Entity::find_by_id(token_id)
            .one(self.db.as_ref())
            .await?)
    }

    /// Redeem `token_id` and return its successor.
    pub async fn rotate(&self, token_id: Uuid) -> Result<refresh_token::Model, RefreshError> {
        self.rotate_at(token_id, OffsetDateTime::now_utc()).await
    }

    /// Redeem `token_id` as if the current time were `now`.
    ///
    /// - unknown id: [`RefreshError::Invalid`]
    /// - already redeemed or invalidated: [`RefreshError::AlreadyUsed`]
    /// - expiry at or before `now`: the token is invalidated, then [`RefreshError::Expired`]
    /// - otherwise the token is invalidated and a new one for the same user is returned
    ///
    /// The conditional update runs before anything is read, so a concurrent rotation of
    /// the same id waits on the row's write lock and then finds nothing left to claim.
    #[tracing::instrument(skip(self))]
    pub async fn rotate_at(
        &self,
        token_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<refresh_token::Model, RefreshError> {
        let txn = self.db.begin().await?;

        let claimed = invalidate(&txn, token_id).await?;

        let Some(current) = refresh_token::Entity::find_by_id(token_id).one(&txn).await? else {
            tracing::warn!(token_id = %token_id, "Refresh token not found");
            return Err(RefreshError::Invalid);
        };

        if claimed == 0 {
            tracing::warn!(token_id = %token_id, "Refresh token already used");
            return Err(RefreshError::AlreadyUsed);
        }

        if current.is_expired_at(now) {
            txn.commit().await?;
            tracing::warn!(
                token_id = %token_id,
                expires_at = %current.expires_at,
                "Refresh token expired, invalidated"
            );
            return Err(RefreshError::Expired);
        }

        let successor = insert_token(&txn, current.user_id, now + self.lifetime).await?;
        txn.commit().await?;

        tracing::info!(
            token_id = %token_id,
            successor_id = %successor.id,
            user_id = %successor.user_id,
            "Rotated refresh token"
        );
        Ok(successor)
    }
}

/// Flip `available` to false if it is still true. Returns the number of rows claimed.
async fn invalidate<C: ConnectionTrait>(conn: &C, token_id: Uuid) -> Result<u64, DbErr> {
    let result = refresh_token::Entity::update_many()
        .col_expr(refresh_token::Column::Available, Expr::value(false))
        .filter(refresh_token::Column::Id.eq(token_id))
        .filter(refresh_token::Column::Available.eq(true))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

async fn insert_token<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    expires_at: OffsetDateTime,
) -> Result<refresh_token::Model, DbErr> {
    refresh_token::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        expires_at: Set(expires_at),
        available: Set(true),
        created_at: Set(OffsetDateTime::now_utc()),
    }
    .insert(conn)
    .await
}
