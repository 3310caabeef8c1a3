use std::collections::HashMap;

use sqlx::PgPool;

use crate::{
    error::AppResult,
    models::{ListMember, MemberRole, MembershipWithList, MovieList},
    stores::MembershipStore,
};

/// Postgres-backed membership store
#[derive(Clone)]
pub struct PgMembershipStore {
    pool: PgPool,
}

impl PgMembershipStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MembershipStore for PgMembershipStore {
    async fn invite_code_exists(&self, code: String) -> AppResult<bool> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM lists WHERE invite_code = $1")
                .bind(&code)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn create_with_owner(
        &self,
        name: String,
        description: Option<String>,
        invite_code: String,
        owner_id: i64,
    ) -> AppResult<MovieList> {
        let mut tx = self.pool.begin().await?;

        let list: MovieList = sqlx::query_as(
            r#"
            INSERT INTO lists (name, description, invite_code, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, description, invite_code, created_by, created_at, deleted_at
            "#,
        )
        .bind(&name)
        .bind(&description)
        .bind(&invite_code)
        .bind(owner_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO list_members (list_id, user_id, role) VALUES ($1, $2, $3)")
            .bind(list.id)
            .bind(owner_id)
            .bind(MemberRole::Owner)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(list_id = list.id, owner_id, "List created with owner membership");

        Ok(list)
    }

    async fn find_by_id(&self, list_id: i64) -> AppResult<Option<MovieList>> {
        let list = sqlx::query_as(
            r#"
            SELECT id, name, description, invite_code, created_by, created_at, deleted_at
            FROM lists
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(list_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(list)
    }

    async fn find_by_invite_code(&self, code: String) -> AppResult<Option<MovieList>> {
        let list = sqlx::query_as(
            r#"
            SELECT id, name, description, invite_code, created_by, created_at, deleted_at
            FROM lists
            WHERE invite_code = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(&code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(list)
    }

    async fn find_membership(&self, list_id: i64, user_id: i64) -> AppResult<Option<ListMember>> {
        let membership = sqlx::query_as(
            "SELECT list_id, user_id, role, added_at FROM list_members WHERE list_id = $1 AND user_id = $2",
        )
        .bind(list_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(membership)
    }

    async fn add_participant_if_not_exists(&self, list_id: i64, user_id: i64) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO list_members (list_id, user_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (list_id, user_id) DO NOTHING
            "#,
        )
        .bind(list_id)
        .bind(user_id)
        .bind(MemberRole::Participant)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_members(&self, list_id: i64) -> AppResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM list_members WHERE list_id = $1")
                .bind(list_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn find_user_memberships(
        &self,
        user_id: i64,
        role: Option<MemberRole>,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<MembershipWithList>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            list_id: i64,
            user_id: i64,
            role: MemberRole,
            added_at: chrono::DateTime<chrono::Utc>,
            l_id: i64,
            l_name: String,
            l_description: Option<String>,
            l_invite_code: String,
            l_created_by: i64,
            l_created_at: chrono::DateTime<chrono::Utc>,
            l_deleted_at: Option<chrono::DateTime<chrono::Utc>>,
        }

        let rows: Vec<Row> = sqlx::query_as(
            r#"
            SELECT m.list_id, m.user_id, m.role, m.added_at,
                   l.id AS l_id, l.name AS l_name, l.description AS l_description,
                   l.invite_code AS l_invite_code, l.created_by AS l_created_by,
                   l.created_at AS l_created_at, l.deleted_at AS l_deleted_at
            FROM list_members m
            JOIN lists l ON l.id = m.list_id
            WHERE m.user_id = $1
              AND l.deleted_at IS NULL
              AND ($2::member_role IS NULL OR m.role = $2)
            ORDER BY l.created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(role)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| MembershipWithList {
                membership: ListMember {
                    list_id: r.list_id,
                    user_id: r.user_id,
                    role: r.role,
                    added_at: r.added_at,
                },
                list: MovieList {
                    id: r.l_id,
                    name: r.l_name,
                    description: r.l_description,
                    invite_code: r.l_invite_code,
                    created_by: r.l_created_by,
                    created_at: r.l_created_at,
                    deleted_at: r.l_deleted_at,
                },
            })
            .collect())
    }

    async fn count_user_memberships(
        &self,
        user_id: i64,
        role: Option<MemberRole>,
    ) -> AppResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM list_members m
            JOIN lists l ON l.id = m.list_id
            WHERE m.user_id = $1
              AND l.deleted_at IS NULL
              AND ($2::member_role IS NULL OR m.role = $2)
            "#,
        )
        .bind(user_id)
        .bind(role)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_members_batch(&self, list_ids: Vec<i64>) -> AppResult<HashMap<i64, i64>> {
        if list_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT list_id, COUNT(*)
            FROM list_members
            WHERE list_id = ANY($1)
            GROUP BY list_id
            "#,
        )
        .bind(&list_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn count_movies_batch(&self, list_ids: Vec<i64>) -> AppResult<HashMap<i64, i64>> {
        if list_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT list_id, COUNT(*)
            FROM list_movies
            WHERE list_id = ANY($1)
            GROUP BY list_id
            "#,
        )
        .bind(&list_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn remove_member(&self, list_id: i64, user_id: i64) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM list_movie_user_data WHERE list_id = $1 AND user_id = $2")
            .bind(list_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM comments WHERE list_id = $1 AND user_id = $2")
            .bind(list_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM list_members WHERE list_id = $1 AND user_id = $2")
            .bind(list_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(list_id, user_id, "Member removed with their ratings and comments");

        Ok(())
    }

    async fn soft_delete_list_if_owner(&self, list_id: i64, user_id: i64) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        // Role re-checked inside the transaction so the verify/delete pair
        // cannot be interleaved with a membership change.
        let membership: Option<(MemberRole,)> =
            sqlx::query_as("SELECT role FROM list_members WHERE list_id = $1 AND user_id = $2 FOR UPDATE")
                .bind(list_id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;

        match membership {
            Some((MemberRole::Owner,)) => {}
            _ => {
                return Err(crate::error::AppError::Forbidden(
                    "only the list owner can delete this list".to_string(),
                ))
            }
        }

        // Tombstone only: memberships, movies, ratings and comments survive.
        sqlx::query("UPDATE lists SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL")
            .bind(list_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(list_id, user_id, "List soft-deleted by owner");

        Ok(())
    }
}
