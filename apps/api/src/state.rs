use std::sync::Arc;

use crate::aggregation::assembler::ResultAssembler;
use crate::aggregation::probe::AvailabilityProbe;
use crate::cities::store::{CityStore, SavedCities};
use crate::config::Config;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub assembler: ResultAssembler,
    pub store: Arc<dyn CityStore>,
    pub saved: Arc<dyn SavedCities>,
    /// Same probe the assembler uses, so `/health` reads the cached value.
    pub probe: Arc<AvailabilityProbe>,
    pub config: Config,
}
