use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use crate::ai::{NutritionAnalyzer, OpenAiAnalyzer};
use crate::config::AppConfig;
use crate::limits::{ConcurrencyGuard, RateLimiter};
use crate::meals::drafts::DraftStore;
use crate::store::{MealStore, MemStore, PgMealStore, PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub meals: Arc<dyn MealStore>,
    pub analyzer: Arc<dyn NutritionAnalyzer>,
    pub limiter: Arc<RateLimiter>,
    pub guard: ConcurrencyGuard,
    pub drafts: Arc<DraftStore>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;

        let analyzer =
            Arc::new(OpenAiAnalyzer::new(config.openai.clone())?) as Arc<dyn NutritionAnalyzer>;

        Ok(Self {
            users: Arc::new(PgUserStore::new(db.clone())),
            meals: Arc::new(PgMealStore::new(db.clone())),
            analyzer,
            limiter: Arc::new(RateLimiter::new(config.limits.rate_limit_per_minute)),
            guard: ConcurrencyGuard::new(),
            drafts: Arc::new(DraftStore::new(Duration::from_secs(
                config.limits.draft_ttl_seconds,
            ))),
            db,
            config,
        })
    }

    /// In-memory stores and a stub analyzer; no external services.
    pub fn fake() -> Self {
        use async_trait::async_trait;
        use bytes::Bytes;

        use crate::ai::NutritionAnalysis;

        struct StubAnalyzer;
        #[async_trait]
        impl NutritionAnalyzer for StubAnalyzer {
            async fn analyze_text(&self, _text: &str, _lang: &str) -> NutritionAnalysis {
                NutritionAnalysis::unrecognized()
            }
            async fn analyze_photo(
                &self,
                _photo: Bytes,
                _caption: Option<&str>,
                _lang: &str,
            ) -> NutritionAnalysis {
                NutritionAnalysis::unrecognized()
            }
        }

        Self::fake_with(AppConfig::for_tests(), Arc::new(StubAnalyzer))
    }

    pub fn fake_with(config: AppConfig, analyzer: Arc<dyn NutritionAnalyzer>) -> Self {
        let db = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .expect("lazy pool ok");

        let mem = Arc::new(MemStore::new());
        Self {
            db,
            users: mem.clone(),
            meals: mem,
            analyzer,
            limiter: Arc::new(RateLimiter::new(config.limits.rate_limit_per_minute)),
            guard: ConcurrencyGuard::new(),
            drafts: Arc::new(DraftStore::new(Duration::from_secs(
                config.limits.draft_ttl_seconds,
            ))),
            config: Arc::new(config),
        }
    }
}
