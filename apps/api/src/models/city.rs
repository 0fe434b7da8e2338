use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A city as stored in the `cities` table. Immutable for the lifetime of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CityRecord {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub country: String,
    pub climate: String,
    pub monthly_cost_usd: f64,
    pub safety_score: f64,
    pub nightlife_rating: f64,
    pub transport_rating: f64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A scored city as returned by the prediction service. The only identity it
/// shares with `CityRecord` is the `(name, country)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub name: String,
    pub country: String,
    #[serde(alias = "score")]
    pub predicted_score: f64,
}

/// A `CityRecord` with its prediction attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedCityRecord {
    #[serde(flatten)]
    pub city: CityRecord,
    pub predicted_score: f64,
    pub ml_enhanced: bool,
    /// Only present when the request identified a user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_saved: Option<bool>,
}

impl EnrichedCityRecord {
    /// The un-enriched form: default score, no enhancement.
    pub fn plain(city: CityRecord) -> Self {
        Self {
            city,
            predicted_score: 0.0,
            ml_enhanced: false,
            is_saved: None,
        }
    }
}
