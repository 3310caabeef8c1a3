use sqlx::PgPool;

use crate::{error::AppResult, models::Comment, stores::CommentStore};

/// Postgres-backed comment store
#[derive(Clone)]
pub struct PgCommentStore {
    pool: PgPool,
}

impl PgCommentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const COMMENT_COLUMNS: &str = "id, list_id, movie_id, user_id, content, created_at, updated_at";

#[async_trait::async_trait]
impl CommentStore for PgCommentStore {
    async fn create_comment(
        &self,
        list_id: i64,
        movie_id: i64,
        user_id: i64,
        content: String,
    ) -> AppResult<Comment> {
        let comment = sqlx::query_as(&format!(
            r#"
            INSERT INTO comments (list_id, movie_id, user_id, content)
            VALUES ($1, $2, $3, $4)
            RETURNING {COMMENT_COLUMNS}
            "#
        ))
        .bind(list_id)
        .bind(movie_id)
        .bind(user_id)
        .bind(&content)
        .fetch_one(&self.pool)
        .await?;
        Ok(comment)
    }

    async fn find_comments(
        &self,
        list_id: i64,
        movie_id: i64,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Comment>, i64)> {
        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM comments WHERE list_id = $1 AND movie_id = $2")
                .bind(list_id)
                .bind(movie_id)
                .fetch_one(&self.pool)
                .await?;

        let comments = sqlx::query_as(&format!(
            r#"
            SELECT {COMMENT_COLUMNS}
            FROM comments
            WHERE list_id = $1 AND movie_id = $2
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(list_id)
        .bind(movie_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((comments, total))
    }

    async fn find_comment(&self, comment_id: i64) -> AppResult<Option<Comment>> {
        let comment = sqlx::query_as(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1"
        ))
        .bind(comment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(comment)
    }

    async fn update_comment(&self, comment_id: i64, content: String) -> AppResult<Comment> {
        let comment = sqlx::query_as(&format!(
            r#"
            UPDATE comments
            SET content = $2, updated_at = now()
            WHERE id = $1
            RETURNING {COMMENT_COLUMNS}
            "#
        ))
        .bind(comment_id)
        .bind(&content)
        .fetch_one(&self.pool)
        .await?;
        Ok(comment)
    }

    async fn delete_comment(&self, comment_id: i64) -> AppResult<()> {
        sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(comment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
