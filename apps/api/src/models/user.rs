use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SavedCityRow {
    pub user_id: Uuid,
    pub city_id: Uuid,
    pub created_at: DateTime<Utc>,
}
