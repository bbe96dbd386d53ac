use std::collections::HashMap;

use atlas_core::EntityFeatures;
use clickhouse::Row;
use serde::{Deserialize, Serialize};

/// Attribute keys carried from Clickhouse into the artifact
pub const PHYSICS_ATTRIBUTES: [&str; 5] = [
    "market_cap",
    "chandrasekhar_mass",
    "viscosity",
    "volume",
    "price",
];

/// One ticker's news for one day: articles averaged into a single embedding
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct EmbeddingRow {
    pub ticker: String,
    /// Most recent headline of the day
    pub headline: String,
    /// Mean headline sentiment in [-1, 1]
    pub sentiment: f64,
    pub embedding: Vec<f64>,
}

/// Daily market physics from the stocks_ohlc table
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct PhysicsRow {
    pub ticker: String,
    pub close: f64,
    pub market_cap: f64,
    pub chandrasekhar_mass: f64,
    pub viscosity: f64,
    pub volume: f64,
}

impl PhysicsRow {
    fn values(&self) -> [f64; 5] {
        [
            self.market_cap,
            self.chandrasekhar_mass,
            self.viscosity,
            self.volume,
            self.close,
        ]
    }
}

impl EmbeddingRow {
    /// Entity features with physics left-joined; missing physics become 0
    pub fn into_features(self, physics: Option<&PhysicsRow>) -> EntityFeatures {
        let values = physics.map(PhysicsRow::values).unwrap_or([0.0; 5]);

        let mut features = EntityFeatures::new(self.ticker, self.embedding)
            .with_attribute("sentiment", self.sentiment);
        for (key, value) in PHYSICS_ATTRIBUTES.iter().zip(values) {
            features = features.with_attribute(*key, if value.is_finite() { value } else { 0.0 });
        }
        if !self.headline.is_empty() {
            features = features.with_headline(self.headline);
        }
        features
    }
}

/// Join a day's embeddings with its physics rows by ticker
pub fn join_physics(embeddings: Vec<EmbeddingRow>, physics: Vec<PhysicsRow>) -> Vec<EntityFeatures> {
    let by_ticker: HashMap<String, PhysicsRow> = physics
        .into_iter()
        .map(|row| (row.ticker.clone(), row))
        .collect();

    embeddings
        .into_iter()
        .map(|row| {
            let physics = by_ticker.get(&row.ticker);
            row.into_features(physics)
        })
        .collect()
}
