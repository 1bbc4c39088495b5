use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use std::{net::IpAddr, time::Duration};
use tracing::{debug, warn};

/// Settings for the ip-api.com backed resolver
#[derive(Debug, Clone)]
pub struct GeoConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            base_url: "http://ip-api.com".to_string(),
            timeout: Duration::from_millis(1000),
        }
    }
}

/// Resolves a client address to an ISO country code
///
/// Resolution is best-effort: `None` covers every failure mode (network
/// error, non-success status, malformed payload, missing field) and callers
/// treat it as "skip rate limiting".
#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn resolve(&self, addr: IpAddr) -> Option<String>;
}

/// The subset of the ip-api.com JSON payload we read
#[derive(Debug, Deserialize)]
struct GeoPayload {
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
}

/// GeoResolver backed by the ip-api.com HTTP service
pub struct IpApiResolver {
    client: reqwest::Client,
    config: GeoConfig,
}

impl IpApiResolver {
    pub fn new(client: reqwest::Client, config: GeoConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl GeoResolver for IpApiResolver {
    async fn resolve(&self, addr: IpAddr) -> Option<String> {
        let url = format!("{}/json/{}", self.config.base_url.trim_end_matches('/'), addr);

        let response = match self
            .client
            .get(&url)
            .timeout(self.config.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Geolocation request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(
                "Geolocation service returned status {}",
                response.status()
            );
            return None;
        }

        match response.json::<GeoPayload>().await {
            Ok(payload) => match payload.country_code {
                Some(code) if !code.is_empty() => {
                    debug!(%addr, country = %code, "Resolved client country");
                    Some(code)
                }
                _ => None,
            },
            Err(e) => {
                warn!("Failed to parse geolocation payload: {}", e);
                None
            }
        }
    }
}

/// Caching wrapper that memoizes successful lookups per address
///
/// The original design re-resolves every request; memoizing for a short TTL
/// keeps the geolocation service off the per-request critical path. Failed
/// lookups are not cached, so a transient outage does not pin an address to
/// "unresolved" for the full TTL.
pub struct CachingResolver<R> {
    inner: R,
    cache: Cache<IpAddr, String>,
}

impl<R: GeoResolver> CachingResolver<R> {
    pub fn new(inner: R, ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { inner, cache }
    }
}

#[async_trait]
impl<R: GeoResolver> GeoResolver for CachingResolver<R> {
    async fn resolve(&self, addr: IpAddr) -> Option<String> {
        if let Some(code) = self.cache.get(&addr).await {
            return Some(code);
        }

        let code = self.inner.resolve(addr).await?;
        self.cache.insert(addr, code.clone()).await;
        Some(code)
    }
}
