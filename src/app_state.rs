use crate::{
    Config,
    circulation::CirculationService,
    store::LibraryStore,
    utils::{KeyedRateLimiter, build_rate_limiter},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LibraryStore>,
    pub circulation: CirculationService,
    pub config: Config,
    pub rate_limiter: Arc<KeyedRateLimiter>,
}

impl AppState {
    pub fn new(store: Arc<dyn LibraryStore>, config: Config) -> Self {
        let circulation = CirculationService::new(Arc::clone(&store), config.loan_period_days);
        let rate_limiter = build_rate_limiter(config.rate_limit_per_minute);
        Self {
            store,
            circulation,
            config,
            rate_limiter,
        }
    }
}
