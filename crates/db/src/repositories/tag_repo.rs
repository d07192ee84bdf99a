//! Repository for the `tags` and `annotation_tags` tables.

use sqlx::{PgConnection, PgPool};

use crate::models::tag::Tag;

/// Provides tag rows and per-annotation tag associations.
pub struct TagRepo;

impl TagRepo {
    /// Get-or-create a tag row by name, returning its id.
    pub async fn ensure(conn: &mut PgConnection, name: &str) -> Result<i64, sqlx::Error> {
        // Upsert instead of INSERT .. DO NOTHING so RETURNING always
        // yields a row.
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO tags (name) VALUES ($1)
             ON CONFLICT ON CONSTRAINT uq_tags_name
             DO UPDATE SET name = EXCLUDED.name
             RETURNING id",
        )
        .bind(name)
        .fetch_one(conn)
        .await?;
        Ok(id)
    }

    /// Replace an annotation's tag associations with the given names.
    /// Callers pass an already-deduplicated list.
    pub async fn set_for_annotation(
        conn: &mut PgConnection,
        annotation_id: &str,
        names: &[String],
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM annotation_tags WHERE annotation_id = $1")
            .bind(annotation_id)
            .execute(&mut *conn)
            .await?;

        for name in names {
            let tag_id = Self::ensure(&mut *conn, name).await?;
            sqlx::query(
                "INSERT INTO annotation_tags (annotation_id, tag_id)
                 VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(annotation_id)
            .bind(tag_id)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// List an annotation's tag names, alphabetically.
    pub async fn list_for_annotation(
        pool: &PgPool,
        annotation_id: &str,
    ) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT t.name FROM tags t
             JOIN annotation_tags at ON at.tag_id = t.id
             WHERE at.annotation_id = $1
             ORDER BY t.name",
        )
        .bind(annotation_id)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Find a tag by exact name.
    pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Tag>, sqlx::Error> {
        sqlx::query_as::<_, Tag>("SELECT id, name FROM tags WHERE name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await
    }
}
