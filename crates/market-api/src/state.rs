//! # Application State
//!
//! Shared state for the Axum application. Every external collaborator
//! (store, processor, identity provider, search index) is constructed once at
//! startup and injected here; handlers never build clients on demand.

use crate::auth::{AuthUser, ClerkSessions, DisabledIdentity, SharedIdentityProvider};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::rate_limit::ApiRateLimiter;
use crate::search::{AlgoliaIndex, DatabaseSearch, SharedSearchIndex};
use crate::svix::SvixVerifier;
use crate::uploads::UploadPolicy;
use market_core::{
    BoxedPaymentProcessor, MarketError, MarketResult, ProductStatus, SharedStore, User,
};
use market_db::{MemoryStore, PgStore};
use market_stripe::StripeProcessor;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: SharedStore,
    pub processor: BoxedPaymentProcessor,
    pub identity: SharedIdentityProvider,
    pub search: SharedSearchIndex,
    pub limiter: Arc<ApiRateLimiter>,
    /// `None` when `CLERK_WEBHOOK_SECRET` is unset; the user webhook then rejects everything
    pub user_webhooks: Option<Arc<SvixVerifier>>,
    pub uploads: UploadPolicy,
}

impl AppState {
    /// Wire state around an existing store and processor.
    ///
    /// Identity and search are built from `config`; override them with
    /// [`AppState::with_identity`] and [`AppState::with_search`].
    pub fn new(
        config: AppConfig,
        store: SharedStore,
        processor: BoxedPaymentProcessor,
    ) -> MarketResult<Self> {
        let identity: SharedIdentityProvider = match ClerkSessions::from_config(&config.auth)? {
            Some(sessions) => Arc::new(sessions),
            None => {
                warn!("No Clerk session key configured, authenticated routes will return 401");
                Arc::new(DisabledIdentity)
            }
        };

        let search: SharedSearchIndex = match config.search {
            Some(ref search) => Arc::new(AlgoliaIndex::new(search)?),
            None => Arc::new(DatabaseSearch::new(store.clone())),
        };

        let user_webhooks = config
            .auth
            .webhook_secret
            .as_ref()
            .map(|secret| SvixVerifier::new(secret.expose_secret()).map(Arc::new))
            .transpose()?;

        Ok(Self {
            limiter: Arc::new(ApiRateLimiter::new(config.rate_limit)?),
            uploads: UploadPolicy::new(config.uploads),
            config: Arc::new(config),
            store,
            processor,
            identity,
            search,
            user_webhooks,
        })
    }

    /// Build everything from the environment
    pub async fn from_env() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let store: SharedStore = match config.database_url {
            Some(ref url) => {
                let pool = market_db::create_pool(url).await?;
                let store = PgStore::new(pool);
                store.migrate().await?;
                info!("Connected to PostgreSQL");
                Arc::new(store)
            }
            None => {
                warn!("DATABASE_URL not set, using the in-memory store (data is lost on restart)");
                Arc::new(MemoryStore::new())
            }
        };

        let processor = StripeProcessor::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to initialize Stripe: {}", e))?;

        Ok(Self::new(config, store, Arc::new(processor))?)
    }

    pub fn with_identity(mut self, identity: SharedIdentityProvider) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_search(mut self, search: SharedSearchIndex) -> Self {
        self.search = search;
        self
    }

    /// Push the current status of these listings to the search index.
    ///
    /// Failures are logged; the index catches up on the next change.
    pub async fn sync_search(&self, product_ids: &[Uuid]) {
        if product_ids.is_empty() || !self.search.needs_sync() {
            return;
        }
        let products = match self.store.products_by_ids(product_ids).await {
            Ok(products) => products,
            Err(e) => {
                warn!(error = %e, "Could not load listings for search sync");
                return;
            }
        };
        for product in &products {
            let result = match product.status {
                ProductStatus::Available | ProductStatus::Reserved => {
                    self.search.upsert(product).await
                }
                ProductStatus::Sold | ProductStatus::Removed => {
                    self.search.remove(product.id).await
                }
            };
            if let Err(e) = result {
                warn!(product_id = %product.id, error = %e, "Search index sync failed");
            }
        }
    }

    /// The local user behind a verified session
    pub async fn current_user(&self, auth: &AuthUser) -> AppResult<User> {
        self.store
            .user_by_external_id(auth.external_id())
            .await?
            .ok_or_else(|| AppError(MarketError::not_found("user", auth.external_id())))
    }
}
