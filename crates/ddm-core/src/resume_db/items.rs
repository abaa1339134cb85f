//! Persistence for the Manager's item map and queue state.
//!
//! Distinct from the `jobs` table (the teacher's original bitmap-segment
//! schema): `items`/`queue_state` store the Item/ItemPart manifest and the
//! queue manager's waiting list as JSON columns, written inside a
//! transaction — the SQL substitute for the source's buffer-first
//! truncate+rewrite (see `SPEC_FULL.md` §4.6/§6).

use anyhow::Result;
use sqlx::Row;

use super::db::{unix_timestamp, ResumeDb};

impl ResumeDb {
    /// Upsert one item row.
    pub async fn save_item(&self, hash: &str, json: &str) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query(
            r#"
            INSERT INTO items (hash, json, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(hash) DO UPDATE SET json = excluded.json, updated_at = excluded.updated_at
            "#,
        )
        .bind(hash)
        .bind(json)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upsert every item in one transaction (the whole-map persist from `Manager::update`).
    pub async fn save_items(&self, items: &[(String, String)]) -> Result<()> {
        let now = unix_timestamp();
        let mut tx = self.pool.begin().await?;
        for (hash, json) in items {
            sqlx::query(
                r#"
                INSERT INTO items (hash, json, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(hash) DO UPDATE SET json = excluded.json, updated_at = excluded.updated_at
                "#,
            )
            .bind(hash)
            .bind(json)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Load every persisted item row as raw `(hash, json)` pairs.
    pub async fn load_items(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT hash, json FROM items")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let hash: String = row.get("hash");
                let json: String = row.get("json");
                (hash, json)
            })
            .collect())
    }

    /// Delete one item row (part of `Manager::flush`/`flush_one`).
    pub async fn delete_item(&self, hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM items WHERE hash = ?1")
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Overwrite the single queue-state row.
    pub async fn save_queue_state(&self, json: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO queue_state (id, json) VALUES (0, ?1)
            ON CONFLICT(id) DO UPDATE SET json = excluded.json
            "#,
        )
        .bind(json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load the persisted queue state, if any was ever saved.
    pub async fn load_queue_state(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT json FROM queue_state WHERE id = 0")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("json")))
    }
}

#[cfg(test)]
mod tests {
    use super::super::db::open_memory;

    #[tokio::test]
    async fn save_and_load_items_roundtrip() {
        let db = open_memory().await.unwrap();
        db.save_item("ab12", r#"{"hash":"ab12"}"#).await.unwrap();
        db.save_item("cd34", r#"{"hash":"cd34"}"#).await.unwrap();
        let items = db.load_items().await.unwrap();
        assert_eq!(items.len(), 2);

        db.delete_item("ab12").await.unwrap();
        let items = db.load_items().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].0, "cd34");
    }

    #[tokio::test]
    async fn save_items_upserts_in_one_transaction() {
        let db = open_memory().await.unwrap();
        db.save_item("ab12", r#"{"v":1}"#).await.unwrap();
        db.save_items(&[
            ("ab12".to_string(), r#"{"v":2}"#.to_string()),
            ("ef56".to_string(), r#"{"v":1}"#.to_string()),
        ])
        .await
        .unwrap();
        let items = db.load_items().await.unwrap();
        assert_eq!(items.len(), 2);
        let ab12 = items.iter().find(|(h, _)| h == "ab12").unwrap();
        assert_eq!(ab12.1, r#"{"v":2}"#);
    }

    #[tokio::test]
    async fn queue_state_roundtrip() {
        let db = open_memory().await.unwrap();
        assert!(db.load_queue_state().await.unwrap().is_none());
        db.save_queue_state(r#"{"max_concurrent":3}"#).await.unwrap();
        assert_eq!(
            db.load_queue_state().await.unwrap().as_deref(),
            Some(r#"{"max_concurrent":3}"#)
        );
        db.save_queue_state(r#"{"max_concurrent":5}"#).await.unwrap();
        assert_eq!(
            db.load_queue_state().await.unwrap().as_deref(),
            Some(r#"{"max_concurrent":5}"#)
        );
    }
}
