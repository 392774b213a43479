use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;

use crate::app_config::{CatalogConfig, DatabaseConfig};

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Insert the seat catalog when the `seats` table is empty. Returns the
    /// number of seats created.
    pub async fn seed_catalog(&self, catalog: &CatalogConfig) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Serialise concurrent bootstraps from several instances.
        sqlx::query("LOCK TABLE seats IN EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seats")
            .fetch_one(&mut *tx)
            .await?;
        if count > 0 {
            tx.rollback().await?;
            return Ok(0);
        }

        let mut created = 0;
        for section in &catalog.sections {
            for n in 1..=catalog.seats_per_section {
                sqlx::query("INSERT INTO seats (section, seat_number) VALUES ($1, $2)")
                    .bind(section)
                    .bind(format!("{:02}", n))
                    .execute(&mut *tx)
                    .await?;
                created += 1;
            }
        }

        tx.commit().await?;
        info!("Initialized {} seats", created);
        Ok(created)
    }
}
