use atlas_core::EntityFeatures;
use chrono::NaiveDate;
use clickhouse::Client;

use super::models::*;
use crate::config::DatabaseConfig;
use crate::error::Result;

/// Parameterized reads of daily news embeddings and market physics
pub struct FeatureRepository {
    client: Client,
    max_entities: u64,
}

impl FeatureRepository {
    pub fn new(client: Client, max_entities: u64) -> Self {
        Self {
            client,
            max_entities,
        }
    }

    /// Connection pooling is handled inside the clickhouse client
    pub fn connect(config: &DatabaseConfig) -> Self {
        let client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database);
        let client = match (&config.user, &config.password) {
            (Some(user), Some(password)) => client.with_user(user).with_password(password),
            (Some(user), None) => client.with_user(user),
            (None, Some(password)) => client.with_password(password),
            (None, None) => client,
        };

        tracing::info!(
            url = %config.url,
            database = %config.database,
            max_entities = config.max_entities,
            "Connecting to Clickhouse"
        );
        Self::new(client, config.max_entities)
    }

    /// Per-ticker embeddings for a day; several articles about the same
    /// ticker are averaged element-wise
    pub async fn get_daily_embeddings(&self, date: NaiveDate) -> Result<Vec<EmbeddingRow>> {
        let rows = self
            .client
            .query(
                r#"
                SELECT
                    ticker,
                    argMax(headline, published_at) AS headline,
                    toFloat64(avg(sentiment)) AS sentiment,
                    avgForEach(embedding) AS embedding
                FROM news_embeddings
                WHERE toDate(published_at) = toDate(?)
                  AND length(embedding) > 0
                GROUP BY ticker
                ORDER BY ticker ASC
                LIMIT ?
                "#,
            )
            .bind(date.to_string())
            .bind(self.max_entities)
            .fetch_all::<EmbeddingRow>()
            .await?;

        Ok(rows)
    }

    /// Closing physics for every ticker traded on a day
    pub async fn get_daily_physics(&self, date: NaiveDate) -> Result<Vec<PhysicsRow>> {
        let rows = self
            .client
            .query(
                r#"
                SELECT
                    ticker,
                    toFloat64(close) AS close,
                    toFloat64(market_cap) AS market_cap,
                    toFloat64(chandrasekhar_mass) AS chandrasekhar_mass,
                    toFloat64(viscosity) AS viscosity,
                    toFloat64(volume) AS volume
                FROM stocks_ohlc
                WHERE date = toDate(?)
                "#,
            )
            .bind(date.to_string())
            .fetch_all::<PhysicsRow>()
            .await?;

        Ok(rows)
    }

    /// A day's frame with physics left-joined; `None` when there is no news
    pub async fn fetch_frame(&self, date: NaiveDate) -> Result<Option<Vec<EntityFeatures>>> {
        let embeddings = self.get_daily_embeddings(date).await?;
        if embeddings.is_empty() {
            return Ok(None);
        }
        let physics = self.get_daily_physics(date).await?;

        tracing::debug!(
            %date,
            tickers = embeddings.len(),
            physics = physics.len(),
            "Fetched daily frame"
        );

        Ok(Some(join_physics(embeddings, physics)))
    }

    /// Check database connectivity
    pub async fn health_check(&self) -> Result<()> {
        self.client.query("SELECT 1").execute().await?;
        Ok(())
    }
}
