//! Tag model.

use serde::Serialize;
use sqlx::FromRow;

/// A row from the `tags` table. Tag names are globally unique; annotations
/// share tag rows through the `annotation_tags` join table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}
