use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::db::models::DealRow;
use crate::error::Result;
use crate::types::Deal;

/// Deal persistence on SQLite. Upserts are keyed by the CRM deal id.
#[derive(Clone)]
pub struct DealRepository {
    pool: SqlitePool,
}

impl DealRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file and run migrations.
    pub async fn connect(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database ready at {db_path}");
        Ok(Self::new(pool))
    }

    #[cfg(test)]
    /// Single-connection in-memory database, migrated. Every pooled
    /// connection to `:memory:` would otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Insert or overwrite every deal in one transaction. Returns rows written.
    pub async fn upsert_deals(&self, deals: &[Deal]) -> Result<usize> {
        let synced_at = now_secs();
        let mut tx = self.pool.begin().await?;

        for deal in deals {
            let row = DealRow::from_deal(deal, synced_at)?;
            sqlx::query(
                r#"
                INSERT INTO deals (
                    id, deal_name, amount, stage, contact_id, contact_name, pipeline,
                    closing_date, created_time, modified_time, stage_history, synced_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    deal_name = excluded.deal_name,
                    amount = excluded.amount,
                    stage = excluded.stage,
                    contact_id = excluded.contact_id,
                    contact_name = excluded.contact_name,
                    pipeline = excluded.pipeline,
                    closing_date = excluded.closing_date,
                    created_time = excluded.created_time,
                    modified_time = excluded.modified_time,
                    stage_history = excluded.stage_history,
                    synced_at = excluded.synced_at
                "#,
            )
            .bind(&row.id)
            .bind(&row.deal_name)
            .bind(row.amount)
            .bind(&row.stage)
            .bind(&row.contact_id)
            .bind(&row.contact_name)
            .bind(&row.pipeline)
            .bind(&row.closing_date)
            .bind(&row.created_time)
            .bind(&row.modified_time)
            .bind(&row.stage_history)
            .bind(row.synced_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(deals.len())
    }

    pub async fn load_all(&self) -> Result<Vec<Deal>> {
        let rows = sqlx::query_as::<_, DealRow>(
            r#"
            SELECT id, deal_name, amount, stage, contact_id, contact_name, pipeline,
                   closing_date, created_time, modified_time, stage_history, synced_at
            FROM deals
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DealRow::into_deal).collect())
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deals")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
