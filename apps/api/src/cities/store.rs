use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::aggregation::merge::MergeKey;
use crate::aggregation::pagination::PageWindow;
use crate::cities::query::{CityFilter, CityQuery};
use crate::errors::AppError;
use crate::models::city::CityRecord;
use crate::models::user::SavedCityRow;

const CITY_COLUMNS: &str = "c.id, c.slug, c.name, c.country, c.climate, c.monthly_cost_usd, \
     c.safety_score, c.nightlife_rating, c.transport_rating, c.description, c.created_at";

/// Normalized `name_country` expression, kept in step with `MergeKey::new`.
/// Whitespace runs collapse before the trim: `btrim` only strips spaces.
const MERGE_KEY_SQL: &str = "btrim(regexp_replace(lower(c.name), '\\s+', ' ', 'g')) || '_' || \
     btrim(regexp_replace(lower(c.country), '\\s+', ' ', 'g'))";

/// How a single city is addressed in a path: by id or by slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CityRef {
    Id(Uuid),
    Slug(String),
}

impl CityRef {
    pub fn parse(raw: &str) -> Self {
        match Uuid::parse_str(raw) {
            Ok(id) => CityRef::Id(id),
            Err(_) => CityRef::Slug(raw.trim().to_lowercase()),
        }
    }
}

impl fmt::Display for CityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CityRef::Id(id) => write!(f, "{id}"),
            CityRef::Slug(slug) => f.write_str(slug),
        }
    }
}

/// The relational city store. Primary data: any failure here fails the request.
#[async_trait]
pub trait CityStore: Send + Sync {
    /// One page of cities matching `query`, plus the total match count.
    async fn find(
        &self,
        query: &CityQuery,
        window: PageWindow,
    ) -> Result<(Vec<CityRecord>, u64), sqlx::Error>;

    /// All cities whose normalized key is in `keys`, in one round trip.
    async fn find_by_keys(&self, keys: &[MergeKey]) -> Result<Vec<CityRecord>, sqlx::Error>;

    async fn get(&self, city: &CityRef) -> Result<Option<CityRecord>, sqlx::Error>;

    async fn ping(&self) -> Result<(), sqlx::Error>;
}

/// Per-user saved cities.
#[async_trait]
pub trait SavedCities: Send + Sync {
    /// The subset of `city_ids` the user has saved, as one set-membership query.
    async fn saved_among(
        &self,
        user_id: Uuid,
        city_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, sqlx::Error>;

    /// Idempotent: saving twice returns the original row.
    async fn save(&self, user_id: Uuid, city_id: Uuid) -> Result<SavedCityRow, sqlx::Error>;

    /// Returns false when nothing was saved.
    async fn unsave(&self, user_id: Uuid, city_id: Uuid) -> Result<bool, sqlx::Error>;

    async fn list_saved(
        &self,
        user_id: Uuid,
        window: PageWindow,
    ) -> Result<(Vec<CityRecord>, u64), sqlx::Error>;
}

/// Runs a store call under `budget`. A timeout is a storage failure: there is no
/// fallback source for primary records.
pub async fn within_budget<T, F>(budget: Duration, call: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(budget, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(AppError::Storage(format!(
            "record store timed out after {}ms",
            budget.as_millis()
        ))),
    }
}

#[derive(Clone)]
pub struct PgCityStore {
    pool: PgPool,
}

impl PgCityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &CityFilter) {
    if let Some(search) = &filter.search {
        builder
            .push(" AND c.name ILIKE ")
            .push_bind(format!("%{}%", escape_like(search)));
    }
    if let Some(country) = &filter.country {
        builder
            .push(" AND c.country ILIKE ")
            .push_bind(format!("%{}%", escape_like(country)));
    }
    if let Some(climate) = &filter.climate {
        builder
            .push(" AND c.climate ILIKE ")
            .push_bind(format!("%{}%", escape_like(climate)));
    }
    if let Some(min_cost) = filter.min_cost {
        builder.push(" AND c.monthly_cost_usd >= ").push_bind(min_cost);
    }
    if let Some(max_cost) = filter.max_cost {
        builder.push(" AND c.monthly_cost_usd <= ").push_bind(max_cost);
    }
    if let Some(min_safety) = filter.min_safety {
        builder.push(" AND c.safety_score >= ").push_bind(min_safety);
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[async_trait]
impl CityStore for PgCityStore {
    async fn find(
        &self,
        query: &CityQuery,
        window: PageWindow,
    ) -> Result<(Vec<CityRecord>, u64), sqlx::Error> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM cities c WHERE TRUE");
        push_filters(&mut count, &query.filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!(
            "SELECT {CITY_COLUMNS} FROM cities c WHERE TRUE"
        ));
        push_filters(&mut select, &query.filter);
        select
            .push(" ORDER BY c.")
            .push(query.sort.field.column())
            .push(" ")
            .push(query.sort.order.keyword())
            .push(", c.id ASC LIMIT ")
            .push_bind(i64::from(window.limit))
            .push(" OFFSET ")
            .push_bind(i64::try_from(window.offset).unwrap_or(i64::MAX));

        let cities = select
            .build_query_as::<CityRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok((cities, u64::try_from(total).unwrap_or(0)))
    }

    async fn find_by_keys(&self, keys: &[MergeKey]) -> Result<Vec<CityRecord>, sqlx::Error> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = keys.iter().map(|k| k.as_str().to_string()).collect();
        sqlx::query_as::<_, CityRecord>(&format!(
            "SELECT {CITY_COLUMNS} FROM cities c WHERE {MERGE_KEY_SQL} = ANY($1)"
        ))
        .bind(keys)
        .fetch_all(&self.pool)
        .await
    }

    async fn get(&self, city: &CityRef) -> Result<Option<CityRecord>, sqlx::Error> {
        match city {
            CityRef::Id(id) => {
                sqlx::query_as::<_, CityRecord>(&format!(
                    "SELECT {CITY_COLUMNS} FROM cities c WHERE c.id = $1"
                ))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
            }
            CityRef::Slug(slug) => {
                sqlx::query_as::<_, CityRecord>(&format!(
                    "SELECT {CITY_COLUMNS} FROM cities c WHERE c.slug = $1"
                ))
                .bind(slug)
                .fetch_optional(&self.pool)
                .await
            }
        }
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SavedCities for PgCityStore {
    async fn saved_among(
        &self,
        user_id: Uuid,
        city_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, sqlx::Error> {
        if city_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let saved: Vec<Uuid> = sqlx::query_scalar(
            "SELECT city_id FROM saved_cities WHERE user_id = $1 AND city_id = ANY($2)",
        )
        .bind(user_id)
        .bind(city_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(saved.into_iter().collect())
    }

    async fn save(&self, user_id: Uuid, city_id: Uuid) -> Result<SavedCityRow, sqlx::Error> {
        sqlx::query(
            "INSERT INTO saved_cities (user_id, city_id) VALUES ($1, $2) \
             ON CONFLICT (user_id, city_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(city_id)
        .execute(&self.pool)
        .await?;

        sqlx::query_as::<_, SavedCityRow>(
            "SELECT user_id, city_id, created_at FROM saved_cities \
             WHERE user_id = $1 AND city_id = $2",
        )
        .bind(user_id)
        .bind(city_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn unsave(&self, user_id: Uuid, city_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM saved_cities WHERE user_id = $1 AND city_id = $2")
            .bind(user_id)
            .bind(city_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_saved(
        &self,
        user_id: Uuid,
        window: PageWindow,
    ) -> Result<(Vec<CityRecord>, u64), sqlx::Error> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM saved_cities WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        let cities = sqlx::query_as::<_, CityRecord>(&format!(
            "SELECT {CITY_COLUMNS} FROM saved_cities s JOIN cities c ON c.id = s.city_id \
             WHERE s.user_id = $1 ORDER BY s.created_at DESC, c.id ASC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(i64::from(window.limit))
        .bind(i64::try_from(window.offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok((cities, u64::try_from(total).unwrap_or(0)))
    }
}
