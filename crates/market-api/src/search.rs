//! # Product Search
//!
//! Listing search goes through a [`SearchIndex`]. With Algolia configured the
//! index is the hosted one; otherwise the database answers queries itself.
//! Index writes are best-effort: a failed sync is logged and the request
//! still succeeds.

use crate::config::SearchConfig;
use async_trait::async_trait;
use market_core::{MarketError, MarketResult, Product, ProductFilter, SharedStore};
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Matching product IDs, best match first
    async fn search(&self, filter: &ProductFilter) -> MarketResult<Vec<Uuid>>;

    async fn upsert(&self, product: &Product) -> MarketResult<()>;

    async fn remove(&self, product_id: Uuid) -> MarketResult<()>;

    fn name(&self) -> &'static str;

    /// False when the index reads the store directly
    fn needs_sync(&self) -> bool {
        true
    }
}

pub type SharedSearchIndex = Arc<dyn SearchIndex>;

/// Fallback used when no hosted index is configured
pub struct DatabaseSearch {
    store: SharedStore,
}

impl DatabaseSearch {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SearchIndex for DatabaseSearch {
    async fn search(&self, filter: &ProductFilter) -> MarketResult<Vec<Uuid>> {
        let products = self.store.list_products(filter).await?;
        Ok(products.into_iter().map(|p| p.id).collect())
    }

    // The database is the source of truth; nothing to sync
    async fn upsert(&self, _product: &Product) -> MarketResult<()> {
        Ok(())
    }

    async fn remove(&self, _product_id: Uuid) -> MarketResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "database"
    }

    fn needs_sync(&self) -> bool {
        false
    }
}

/// Algolia REST client for one index
pub struct AlgoliaIndex {
    client: Client,
    base_url: String,
    app_id: String,
    api_key: SecretString,
    index: String,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "objectID")]
    object_id: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

fn search_error(err: impl std::fmt::Display) -> MarketError {
    MarketError::ProviderError {
        provider: "algolia".to_string(),
        message: err.to_string(),
    }
}

impl AlgoliaIndex {
    pub fn new(config: &SearchConfig) -> MarketResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| MarketError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: format!("https://{}.algolia.net", config.app_id.to_lowercase()),
            app_id: config.app_id.clone(),
            api_key: config.api_key.clone(),
            index: config.index.clone(),
        })
    }

    /// Override the API host (for tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/1/indexes/{}{}", self.base_url, self.index, path))
            .header("X-Algolia-Application-Id", &self.app_id)
            .header("X-Algolia-API-Key", self.api_key.expose_secret())
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> MarketResult<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| MarketError::NetworkError(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(search_error(format!("{status}: {body}")))
        }
    }
}

/// Algolia filter expression for the structured part of a query
pub fn algolia_filters(filter: &ProductFilter) -> String {
    let mut clauses = vec!["status:AVAILABLE".to_string()];
    if let Some(ref category) = filter.category {
        clauses.push(format!("category:\"{}\"", category.replace('"', "")));
    }
    if let Some(condition) = filter.condition {
        clauses.push(format!("condition:{}", condition.as_str()));
    }
    if let Some(min) = filter.min_price {
        clauses.push(format!("price >= {min}"));
    }
    if let Some(max) = filter.max_price {
        clauses.push(format!("price <= {max}"));
    }
    if let Some(seller) = filter.seller_id {
        clauses.push(format!("sellerId:\"{seller}\""));
    }
    clauses.join(" AND ")
}

fn index_record(product: &Product) -> serde_json::Value {
    json!({
        "objectID": product.id.to_string(),
        "title": product.title,
        "description": product.description,
        "category": product.category,
        "condition": product.condition.as_str(),
        "price": product.price.amount,
        "currency": product.price.currency.as_str(),
        "sellerId": product.seller_id.to_string(),
        "status": product.status.as_str(),
        "image": product.images.first(),
        "createdAt": product.created_at.timestamp(),
    })
}

#[async_trait]
impl SearchIndex for AlgoliaIndex {
    #[instrument(skip(self, filter), fields(index = %self.index))]
    async fn search(&self, filter: &ProductFilter) -> MarketResult<Vec<Uuid>> {
        let body = json!({
            "query": filter.text().unwrap_or_default(),
            "filters": algolia_filters(filter),
            "hitsPerPage": filter.limit(),
            "page": filter.page.unwrap_or(0),
            "attributesToRetrieve": ["objectID"],
        });
        let response = self
            .send(self.request(Method::POST, "/query").json(&body))
            .await?;
        let parsed: SearchResponse = response.json().await.map_err(search_error)?;

        let ids: Vec<Uuid> = parsed
            .hits
            .iter()
            .filter_map(|hit| Uuid::parse_str(&hit.object_id).ok())
            .collect();
        debug!(hits = ids.len(), "Search completed");
        Ok(ids)
    }

    async fn upsert(&self, product: &Product) -> MarketResult<()> {
        self.send(
            self.request(Method::PUT, &format!("/{}", product.id))
                .json(&index_record(product)),
        )
        .await?;
        Ok(())
    }

    async fn remove(&self, product_id: Uuid) -> MarketResult<()> {
        self.send(self.request(Method::DELETE, &format!("/{product_id}")))
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "algolia"
    }
}
