//! In-memory stand-ins for the record store and the prediction service.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::aggregation::assembler::{AssemblerSettings, ResultAssembler};
use crate::aggregation::merge::MergeKey;
use crate::aggregation::pagination::PageWindow;
use crate::aggregation::probe::AvailabilityProbe;
use crate::cities::query::{CityQuery, SortField, SortOrder};
use crate::cities::store::{CityRef, CityStore, SavedCities};
use crate::config::Config;
use crate::models::city::{CityRecord, PredictionRecord};
use crate::models::user::SavedCityRow;
use crate::prediction_client::{
    CountryPredictions, PageRequest, PersonalizedPredictions, PredictionError, PredictionSource,
    TopPredictions, UpstreamPagination,
};
use crate::state::AppState;

pub fn city(name: &str, country: &str) -> CityRecord {
    city_with_cost(name, country, 1_500.0)
}

pub fn city_with_cost(name: &str, country: &str, monthly_cost_usd: f64) -> CityRecord {
    CityRecord {
        id: Uuid::new_v4(),
        slug: name.trim().to_lowercase().replace(' ', "-"),
        name: name.to_string(),
        country: country.to_string(),
        climate: "temperate".to_string(),
        monthly_cost_usd,
        safety_score: 7.5,
        nightlife_rating: 6.0,
        transport_rating: 8.0,
        description: None,
        created_at: Utc::now(),
    }
}

pub fn prediction(name: &str, country: &str, predicted_score: f64) -> PredictionRecord {
    PredictionRecord {
        name: name.to_string(),
        country: country.to_string(),
        predicted_score,
    }
}

pub fn personalized_response(
    data: Vec<PredictionRecord>,
    total: u64,
    current_page: u64,
    total_pages: u64,
) -> PersonalizedPredictions {
    let limit = 12;
    PersonalizedPredictions {
        data,
        total,
        limit,
        pagination: UpstreamPagination {
            offset: (current_page.saturating_sub(1)) * u64::from(limit),
            current_page,
            total_pages,
            has_next_page: current_page < total_pages,
            has_prev_page: current_page > 1,
            extra: Map::new(),
        },
    }
}

fn fake_db_error() -> sqlx::Error {
    sqlx::Error::Protocol("fake store failure".to_string())
}

// ────────────────────────────────────────────────────────────────────────────
// FakePredictions
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakePredictions {
    healthy: AtomicBool,
    health_delay: Duration,
    fetch_delay: Duration,
    failing_fetch: bool,
    predictions: Vec<PredictionRecord>,
    personalized: Option<PersonalizedPredictions>,
    health_calls: AtomicUsize,
    top_calls: AtomicUsize,
    country_calls: AtomicUsize,
    last_preferences: Mutex<Option<Value>>,
}

impl FakePredictions {
    pub fn healthy() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn down() -> Self {
        Self::default()
    }

    pub fn with_health_delay(mut self, delay: Duration) -> Self {
        self.health_delay = delay;
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn top_calls(&self) -> usize {
        self.top_calls.load(Ordering::SeqCst)
    }

    pub fn country_calls(&self) -> usize {
        self.country_calls.load(Ordering::SeqCst)
    }

    pub fn last_preferences(&self) -> Option<Value> {
        self.last_preferences.lock().unwrap().clone()
    }

    async fn before_fetch(&self) -> Result<(), PredictionError> {
        tokio::time::sleep(self.fetch_delay).await;
        if self.failing_fetch {
            return Err(PredictionError::Api {
                status: 500,
                message: "model crashed".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PredictionSource for FakePredictions {
    async fn health(&self) -> Result<(), PredictionError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.health_delay).await;
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PredictionError::Api {
                status: 503,
                message: "down".to_string(),
            })
        }
    }

    async fn top_n(&self, limit: u32) -> Result<TopPredictions, PredictionError> {
        self.top_calls.fetch_add(1, Ordering::SeqCst);
        self.before_fetch().await?;
        Ok(TopPredictions {
            data: self
                .predictions
                .iter()
                .take(limit as usize)
                .cloned()
                .collect(),
            total: self.predictions.len() as u64,
        })
    }

    async fn by_country(
        &self,
        country: &str,
        limit: u32,
    ) -> Result<CountryPredictions, PredictionError> {
        self.country_calls.fetch_add(1, Ordering::SeqCst);
        self.before_fetch().await?;
        let data: Vec<_> = self
            .predictions
            .iter()
            .filter(|p| p.country.trim().eq_ignore_ascii_case(country.trim()))
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(CountryPredictions {
            total: data.len() as u64,
            data,
            country: country.to_string(),
        })
    }

    async fn personalized(
        &self,
        preferences: &Value,
        _page: PageRequest,
    ) -> Result<PersonalizedPredictions, PredictionError> {
        *self.last_preferences.lock().unwrap() = Some(preferences.clone());
        self.before_fetch().await?;
        self.personalized.clone().ok_or(PredictionError::Api {
            status: 404,
            message: "no personalized fixture".to_string(),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FakeStore
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeStore {
    cities: Vec<CityRecord>,
    delay: Duration,
    key_lookup_delay: Duration,
    failing: bool,
    /// (user, city) in save order.
    saved: Mutex<Vec<(Uuid, Uuid)>>,
    saved_lookups: AtomicUsize,
}

impl FakeStore {
    pub fn new(cities: Vec<CityRecord>) -> Self {
        Self {
            cities,
            ..Default::default()
        }
    }

    pub fn mark_saved(&self, user_id: Uuid, city_id: Uuid) {
        self.saved.lock().unwrap().push((user_id, city_id));
    }

    pub fn is_saved(&self, user_id: Uuid, city_id: Uuid) -> bool {
        self.saved.lock().unwrap().contains(&(user_id, city_id))
    }

    pub fn saved_lookups(&self) -> usize {
        self.saved_lookups.load(Ordering::SeqCst)
    }

    async fn before_call(&self) -> Result<(), sqlx::Error> {
        tokio::time::sleep(self.delay).await;
        if self.failing {
            return Err(fake_db_error());
        }
        Ok(())
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn page_of(records: Vec<CityRecord>, window: PageWindow) -> (Vec<CityRecord>, u64) {
    let total = records.len() as u64;
    let page = records
        .into_iter()
        .skip(window.offset as usize)
        .take(window.limit as usize)
        .collect();
    (page, total)
}

#[async_trait]
impl CityStore for FakeStore {
    async fn find(
        &self,
        query: &CityQuery,
        window: PageWindow,
    ) -> Result<(Vec<CityRecord>, u64), sqlx::Error> {
        self.before_call().await?;
        let f = &query.filter;
        let mut matched: Vec<CityRecord> = self
            .cities
            .iter()
            .filter(|c| f.search.as_deref().map_or(true, |s| contains_ci(&c.name, s)))
            .filter(|c| f.country.as_deref().map_or(true, |s| contains_ci(&c.country, s)))
            .filter(|c| f.climate.as_deref().map_or(true, |s| contains_ci(&c.climate, s)))
            .filter(|c| f.min_cost.map_or(true, |v| c.monthly_cost_usd >= v))
            .filter(|c| f.max_cost.map_or(true, |v| c.monthly_cost_usd <= v))
            .filter(|c| f.min_safety.map_or(true, |v| c.safety_score >= v))
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            let ordering = match query.sort.field {
                SortField::Name => a.name.cmp(&b.name),
                SortField::Country => a.country.cmp(&b.country),
                SortField::MonthlyCost => a.monthly_cost_usd.total_cmp(&b.monthly_cost_usd),
                SortField::SafetyScore => a.safety_score.total_cmp(&b.safety_score),
                SortField::NightlifeRating => a.nightlife_rating.total_cmp(&b.nightlife_rating),
                SortField::TransportRating => a.transport_rating.total_cmp(&b.transport_rating),
            };
            match query.sort.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        Ok(page_of(matched, window))
    }

    async fn find_by_keys(&self, keys: &[MergeKey]) -> Result<Vec<CityRecord>, sqlx::Error> {
        tokio::time::sleep(self.key_lookup_delay).await;
        self.before_call().await?;
        let keys: HashSet<&MergeKey> = keys.iter().collect();
        Ok(self
            .cities
            .iter()
            .filter(|c| keys.contains(&MergeKey::of_city(c)))
            .cloned()
            .collect())
    }

    async fn get(&self, city: &CityRef) -> Result<Option<CityRecord>, sqlx::Error> {
        self.before_call().await?;
        Ok(self
            .cities
            .iter()
            .find(|c| match city {
                CityRef::Id(id) => c.id == *id,
                CityRef::Slug(slug) => c.slug == *slug,
            })
            .cloned())
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        self.before_call().await
    }
}

#[async_trait]
impl SavedCities for FakeStore {
    async fn saved_among(
        &self,
        user_id: Uuid,
        city_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, sqlx::Error> {
        self.saved_lookups.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        let saved = self.saved.lock().unwrap();
        Ok(city_ids
            .iter()
            .copied()
            .filter(|id| saved.contains(&(user_id, *id)))
            .collect())
    }

    async fn save(&self, user_id: Uuid, city_id: Uuid) -> Result<SavedCityRow, sqlx::Error> {
        self.before_call().await?;
        if !self.is_saved(user_id, city_id) {
            self.mark_saved(user_id, city_id);
        }
        Ok(SavedCityRow {
            user_id,
            city_id,
            created_at: Utc::now(),
        })
    }

    async fn unsave(&self, user_id: Uuid, city_id: Uuid) -> Result<bool, sqlx::Error> {
        self.before_call().await?;
        let mut saved = self.saved.lock().unwrap();
        let before = saved.len();
        saved.retain(|entry| *entry != (user_id, city_id));
        Ok(saved.len() < before)
    }

    async fn list_saved(
        &self,
        user_id: Uuid,
        window: PageWindow,
    ) -> Result<(Vec<CityRecord>, u64), sqlx::Error> {
        self.before_call().await?;
        let saved = self.saved.lock().unwrap().clone();
        let newest_first: Vec<CityRecord> = saved
            .iter()
            .rev()
            .filter(|(user, _)| *user == user_id)
            .filter_map(|(_, city_id)| self.cities.iter().find(|c| c.id == *city_id).cloned())
            .collect();
        Ok(page_of(newest_first, window))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fixture
// ────────────────────────────────────────────────────────────────────────────

/// Fakes wired into an assembler. Configure with the `with_*` methods before
/// calling `assembler()` or `state()`, which share the handles.
pub struct Fixture {
    pub store: Arc<FakeStore>,
    pub predictions: Arc<FakePredictions>,
}

impl Fixture {
    pub fn new(cities: Vec<CityRecord>) -> Self {
        Self {
            store: Arc::new(FakeStore::new(cities)),
            predictions: Arc::new(FakePredictions::healthy()),
        }
    }

    fn store_mut(&mut self) -> &mut FakeStore {
        Arc::get_mut(&mut self.store).expect("configure the fixture before sharing it")
    }

    fn source_mut(&mut self) -> &mut FakePredictions {
        Arc::get_mut(&mut self.predictions).expect("configure the fixture before sharing it")
    }

    pub fn with_predictions(mut self, predictions: Vec<PredictionRecord>) -> Self {
        self.source_mut().predictions = predictions;
        self
    }

    pub fn with_personalized(mut self, response: PersonalizedPredictions) -> Self {
        self.source_mut().personalized = Some(response);
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.source_mut().fetch_delay = delay;
        self
    }

    pub fn with_failing_fetch(mut self) -> Self {
        self.source_mut().failing_fetch = true;
        self
    }

    pub fn with_health_delay(mut self, delay: Duration) -> Self {
        self.source_mut().health_delay = delay;
        self
    }

    pub fn down(mut self) -> Self {
        *self.source_mut().healthy.get_mut() = false;
        self
    }

    pub fn with_store_delay(mut self, delay: Duration) -> Self {
        self.store_mut().delay = delay;
        self
    }

    /// Slows only `find_by_keys`, leaving listings fast.
    pub fn with_key_lookup_delay(mut self, delay: Duration) -> Self {
        self.store_mut().key_lookup_delay = delay;
        self
    }

    pub fn with_failing_store(mut self) -> Self {
        self.store_mut().failing = true;
        self
    }

    pub fn settings() -> AssemblerSettings {
        AssemblerSettings {
            prediction_timeout: Duration::from_secs(2),
            store_timeout: Duration::from_secs(5),
            prediction_fetch_limit: 500,
        }
    }

    pub fn probe(&self) -> Arc<AvailabilityProbe> {
        Arc::new(AvailabilityProbe::new(
            self.predictions.clone(),
            Duration::from_secs(1),
            Duration::ZERO,
        ))
    }

    pub fn assembler(&self) -> ResultAssembler {
        ResultAssembler::new(
            self.store.clone(),
            self.store.clone(),
            self.predictions.clone(),
            self.probe(),
            Self::settings(),
        )
    }

    pub fn state(&self) -> AppState {
        let probe = self.probe();
        AppState {
            assembler: ResultAssembler::new(
                self.store.clone(),
                self.store.clone(),
                self.predictions.clone(),
                probe.clone(),
                Self::settings(),
            ),
            store: self.store.clone(),
            saved: self.store.clone(),
            probe,
            config: test_config(),
        }
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/citywise_test".to_string(),
        database_max_connections: 1,
        prediction_api_url: "http://127.0.0.1:0".to_string(),
        prediction_timeout: Duration::from_secs(2),
        prediction_fetch_limit: 500,
        probe_timeout: Duration::from_secs(1),
        probe_ttl: Duration::ZERO,
        store_timeout: Duration::from_secs(5),
        default_page_limit: 20,
        port: 0,
        rust_log: "debug".to_string(),
    }
}
