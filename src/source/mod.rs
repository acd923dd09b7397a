// src/source/mod.rs
//! Source client for the Agworld user API (JSON:API over HTTPS).
//!
//! Every fetch goes through the shared [`Cache`] first. A miss issues a paced
//! request; `429` widens the pacing delay and surfaces as
//! [`SourceError::RateLimited`], any other failure is answered from the
//! built-in samples, which are cached briefly so the next poll retries upstream.

mod envelope;
pub mod samples;

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use metrics::counter;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::cache::Cache;
use crate::config::SourceConfig;
use crate::domain::{Domain, Filters, RawRecord};
use crate::error::SourceError;

const JSON_API: &str = "application/vnd.api+json";
const USER_AGENT: &str = concat!("agworld-reporter/", env!("CARGO_PKG_VERSION"));

/// Narrow fetch seam the poller depends on.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch(&self, domain: Domain, filters: &Filters) -> Result<Vec<RawRecord>, SourceError>;
    fn name(&self) -> &'static str;
}

/// Records plus whether they are the built-in samples rather than live data.
struct Fetched {
    records: Vec<RawRecord>,
    sample: bool,
}

#[derive(Debug)]
struct Throttle {
    delay: Duration,
    last: Option<Instant>,
}

pub struct SourceClient {
    http: reqwest::Client,
    cfg: SourceConfig,
    cache: Cache,
    throttle: Mutex<Throttle>,
}

impl SourceClient {
    pub fn new(cfg: SourceConfig, cache: Cache) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_API));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_API));
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs.max(1)))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .context("building agworld http client")?;
        Ok(Self {
            http,
            throttle: Mutex::new(Throttle {
                delay: Duration::from_millis(cfg.min_request_interval_ms),
                last: None,
            }),
            cfg,
            cache,
        })
    }

    /// `agworld:<collection>:fetch:<filters>`
    pub fn cache_key(domain: Domain, filters: &Filters) -> String {
        format!("agworld:{}:fetch:{}", domain.collection(), filters.cache_fragment())
    }

    /// Courtesy delay currently enforced between requests.
    pub async fn current_delay(&self) -> Duration {
        self.throttle.lock().await.delay
    }

    fn live_ttl(&self, domain: Domain) -> Duration {
        match domain {
            Domain::Activity => Duration::from_secs(self.cfg.activity_ttl_secs),
            _ => Duration::from_secs(self.cfg.live_ttl_secs),
        }
    }

    fn fallback_ttl(&self) -> Duration {
        Duration::from_secs(self.cfg.fallback_ttl_secs)
    }

    /// Probe the API with a single one-record `companies` request.
    ///
    /// Without an API key this is `false`. A transport failure with a key
    /// configured still counts as usable configuration and returns `true`.
    pub async fn test_connection(&self) -> bool {
        if self.cfg.api_key.is_empty() {
            tracing::warn!(target: "source", "agworld api key not configured");
            return false;
        }
        let url = match self.endpoint(Domain::Company) {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(target: "source", error = %e, "invalid base url");
                return false;
            }
        };
        let params = [("page[size]".to_string(), "1".to_string())];
        match self.get_body(url, &params).await {
            Ok(body) => match serde_json::from_str::<Value>(&body) {
                Ok(v) if v.get("data").is_some() => {
                    tracing::info!(target: "source", "agworld api connection test passed");
                    true
                }
                _ => {
                    tracing::warn!(target: "source", "agworld api returned unexpected response format");
                    false
                }
            },
            Err(e) => {
                tracing::warn!(target: "source", error = %e, "agworld api unreachable, configuration looks valid");
                true
            }
        }
    }

    fn endpoint(&self, domain: Domain) -> Result<Url, SourceError> {
        let base = format!("{}/", self.cfg.base_url.trim_end_matches('/'));
        Url::parse(&base)
            .and_then(|b| b.join(domain.collection()))
            .map_err(|e| SourceError::Transient(format!("bad base url {}: {e}", self.cfg.base_url)))
    }

    /// Wait out the courtesy delay. The lock is held while sleeping so requests stay serialised.
    async fn pace(&self) {
        let mut t = self.throttle.lock().await;
        if let Some(last) = t.last {
            let ready_at = last + t.delay;
            let now = Instant::now();
            if ready_at > now {
                tokio::time::sleep(ready_at - now).await;
            }
        }
        t.last = Some(Instant::now());
    }

    async fn get_body(&self, url: Url, params: &[(String, String)]) -> Result<String, SourceError> {
        self.pace().await;

        let has_token = url.query_pairs().any(|(k, _)| k == "api_token");
        let mut req = self.http.get(url.clone()).query(params);
        if !self.cfg.api_key.is_empty() && !has_token {
            req = req.query(&[("api_token", self.cfg.api_key.as_str())]);
        }
        tracing::debug!(target: "source", %url, "GET");

        let resp = req
            .send()
            .await
            .map_err(|e| SourceError::Transient(format!("request to {url} failed: {e}")))?;
        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let next_delay = {
                let mut t = self.throttle.lock().await;
                t.delay = t.delay.saturating_mul(2);
                t.delay
            };
            tracing::warn!(target: "source", ?next_delay, "rate limited, increasing delay");
            counter!("source_rate_limited_total").increment(1);
            return Err(SourceError::RateLimited { next_delay });
        }
        if !status.is_success() {
            return Err(SourceError::Transient(format!("HTTP {status} from {url}")));
        }
        resp.text()
            .await
            .map_err(|e| SourceError::Transient(format!("reading body from {url}: {e}")))
    }

    /// Read up to `max_pages` pages. A failure after the first page keeps what
    /// was read, except `429`, which always fails the whole fetch.
    async fn fetch_remote(&self, domain: Domain, filters: &Filters) -> Result<Vec<RawRecord>, SourceError> {
        let seasonal = filters.get("season_id").is_some();
        let mut url = self.endpoint(domain)?;
        let mut params = envelope::query_params(filters);
        params.push(("page[size]".into(), self.cfg.page_size.to_string()));

        let mut out = Vec::new();
        for page_no in 1..=self.cfg.max_pages.max(1) {
            let page = match self.get_body(url.clone(), &params).await {
                Ok(body) => envelope::decode_page(domain, &body, seasonal),
                Err(e) => Err(e),
            };
            let page = match page {
                Ok(p) => p,
                Err(e @ SourceError::RateLimited { .. }) => return Err(e),
                Err(e) if page_no > 1 => {
                    tracing::warn!(target: "source", %domain, page = page_no, error = %e, "pagination stopped early, keeping pages read");
                    break;
                }
                Err(e) => return Err(e),
            };
            out.extend(page.records);

            let Some(next) = page.next else { break };
            url = match url.join(&next) {
                Ok(u) => u,
                Err(e) => {
                    tracing::warn!(target: "source", %domain, next = %next, error = %e, "unusable next link");
                    break;
                }
            };
            // the next link already carries paging and filter params
            params.clear();
        }

        if domain == Domain::Activity {
            if let Some(field_id) = filters.get("field_id") {
                out = envelope::filter_activities_by_field(out, field_id);
            }
        }
        tracing::info!(target: "source", %domain, records = out.len(), "fetched from api");
        Ok(out)
    }

    async fn cached(&self, key: &str) -> Option<Vec<RawRecord>> {
        // an empty cached list is treated as a miss
        let hit = self.cache.get::<Vec<RawRecord>>(key).await?;
        (!hit.is_empty()).then_some(hit)
    }

    async fn fetch_direct(&self, domain: Domain, filters: &Filters) -> Result<Fetched, SourceError> {
        let key = Self::cache_key(domain, filters);
        if let Some(hit) = self.cached(&key).await {
            tracing::debug!(target: "source", %domain, "returning cached records");
            let sample = hit == samples::for_domain(domain);
            return Ok(Fetched { records: hit, sample });
        }

        match self.fetch_remote(domain, filters).await {
            Ok(records) => {
                self.cache.set(&key, &records, Some(self.live_ttl(domain))).await;
                Ok(Fetched { records, sample: false })
            }
            Err(e @ SourceError::RateLimited { .. }) => Err(e),
            Err(e) => {
                tracing::warn!(target: "source", %domain, error = %e, "api call failed, using sample data");
                counter!("source_fallback_total", "domain" => domain.as_str()).increment(1);
                let records = samples::for_domain(domain);
                self.cache.set(&key, &records, Some(self.fallback_ttl())).await;
                Ok(Fetched { records, sample: true })
            }
        }
    }

    /// Crops have no endpoint of their own; they are exploded from field records.
    /// Crops built from sample data get the sample TTL.
    async fn fetch_crops(&self, filters: &Filters) -> Result<Vec<RawRecord>, SourceError> {
        let key = Self::cache_key(Domain::Crop, filters);
        if let Some(hit) = self.cached(&key).await {
            return Ok(hit);
        }

        let field_filters: Filters = filters.iter().filter(|(k, _)| *k != "field_id").collect();
        let fields = self.fetch_direct(Domain::Field, &field_filters).await?;
        let mut sample = fields.sample;
        let mut crops = envelope::derive_crops(&fields.records, filters.get("field_id"));
        if crops.is_empty() {
            crops = samples::for_domain(Domain::Crop);
            sample = true;
        }
        let ttl = if sample {
            self.fallback_ttl()
        } else {
            self.live_ttl(Domain::Crop)
        };
        self.cache.set(&key, &crops, Some(ttl)).await;
        Ok(crops)
    }
}

#[async_trait]
impl RecordSource for SourceClient {
    async fn fetch(&self, domain: Domain, filters: &Filters) -> Result<Vec<RawRecord>, SourceError> {
        match domain {
            Domain::Unknown => Err(SourceError::UnsupportedDomain(domain)),
            Domain::Crop => self.fetch_crops(filters).await,
            _ => self.fetch_direct(domain, filters).await.map(|f| f.records),
        }
    }

    fn name(&self) -> &'static str {
        "agworld"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> SourceConfig {
        SourceConfig {
            // nothing listens on port 1
            base_url: "http://127.0.0.1:1/user_api/v1".into(),
            min_request_interval_ms: 0,
            request_timeout_secs: 2,
            ..SourceConfig::default()
        }
    }

    fn offline_client() -> SourceClient {
        SourceClient::new(offline_config(), Cache::in_memory()).unwrap()
    }

    #[test]
    fn cache_key_uses_collection_and_sorted_filters() {
        let f = Filters::new().with("season_id", "7").with("farm_id", "3");
        assert_eq!(
            SourceClient::cache_key(Domain::Activity, &f),
            "agworld:activities:fetch:farm_id=3,season_id=7"
        );
        assert_eq!(
            SourceClient::cache_key(Domain::Field, &Filters::new()),
            "agworld:fields:fetch:all"
        );
    }

    #[tokio::test]
    async fn unknown_domain_is_rejected() {
        let err = offline_client()
            .fetch(Domain::Unknown, &Filters::new())
            .await
            .unwrap_err();
        assert_eq!(err, SourceError::UnsupportedDomain(Domain::Unknown));
    }

    #[tokio::test]
    async fn unreachable_api_serves_samples() {
        let client = offline_client();
        let farms = client.fetch(Domain::Farm, &Filters::new()).await.unwrap();
        assert_eq!(farms, samples::for_domain(Domain::Farm));

        let crops = client.fetch(Domain::Crop, &Filters::new()).await.unwrap();
        assert_eq!(crops.len(), 2);
        assert_eq!(crops[0]["id"], "987654_crop_0");
        assert_eq!(crops[0]["type"], "Wheat");
    }

    #[tokio::test]
    async fn crops_from_sample_fields_expire_with_the_samples() {
        let cache = Cache::in_memory();
        let cfg = SourceConfig {
            fallback_ttl_secs: 1,
            ..offline_config()
        };
        let client = SourceClient::new(cfg, cache.clone()).unwrap();
        client.fetch(Domain::Crop, &Filters::new()).await.unwrap();

        let fields_key = SourceClient::cache_key(Domain::Field, &Filters::new());
        let crops_key = SourceClient::cache_key(Domain::Crop, &Filters::new());
        assert!(cache.exists(&fields_key).await);
        assert!(cache.exists(&crops_key).await);

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(!cache.exists(&fields_key).await);
        assert!(!cache.exists(&crops_key).await, "sample-derived crops outlived the samples");
    }

    #[tokio::test]
    async fn crops_from_cached_sample_fields_get_the_sample_ttl() {
        let cache = Cache::in_memory();
        let cfg = SourceConfig {
            fallback_ttl_secs: 1,
            ..offline_config()
        };
        let client = SourceClient::new(cfg, cache.clone()).unwrap();
        // warm the field cache with samples first, then derive crops from the hit
        client.fetch(Domain::Field, &Filters::new()).await.unwrap();
        client.fetch(Domain::Crop, &Filters::new()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1200)).await;
        let crops_key = SourceClient::cache_key(Domain::Crop, &Filters::new());
        assert!(!cache.exists(&crops_key).await);
    }

    #[tokio::test]
    async fn no_api_key_fails_connection_check() {
        assert!(!offline_client().test_connection().await);
    }
}
