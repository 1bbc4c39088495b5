use anyhow::Result;
use axum::{
    extract::State, http::StatusCode, middleware, response::Json, routing::get, Router,
};
use prometheus::TextEncoder;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use geogate::{
    config::{load_rules_from_file, RuleSet},
    gateway::{admission_gate, proxy_handler, GatewayState},
    geo::{CachingResolver, GeoConfig, GeoResolver, IpApiResolver},
    limiter::RateLimitDecider,
    metrics::Metrics,
    store::ClientStateStore,
};

#[derive(Clone)]
struct AppState {
    metrics: Arc<Metrics>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "geogate=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Country Admission Gateway");

    // Initialize components
    let metrics = Arc::new(Metrics::new()?);
    let rules = load_rules(&metrics)?;
    let decider = create_decider(rules, metrics.clone());

    let upstream_url =
        std::env::var("UPSTREAM_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    info!("Forwarding admitted requests to {}", upstream_url);

    let gateway_state = GatewayState {
        decider,
        client: reqwest::Client::new(),
        upstream_url,
    };

    let app_state = AppState { metrics };

    // Health and metrics stay outside the gate; everything else goes
    // through admission and then to the upstream.
    let gated = Router::new()
        .fallback(proxy_handler)
        .layer(middleware::from_fn_with_state(
            gateway_state.clone(),
            admission_gate,
        ))
        .with_state(gateway_state);

    let app = Router::new()
        .route("/healthcheck", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(app_state)
        .merge(gated);

    let http_addr = std::env::var("HTTP_PORT")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse::<SocketAddr>()?;

    let http_server = start_http_server(app, http_addr);

    // Wait for shutdown signal
    tokio::select! {
        result = http_server => {
            if let Err(e) = result {
                warn!("HTTP server error: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    info!("Service stopped");
    Ok(())
}

async fn start_http_server(app: Router, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn load_rules(metrics: &Metrics) -> Result<RuleSet> {
    match std::env::var("RULES_PATH") {
        Ok(path) => {
            info!("Loading admission rules from: {}", path);
            match load_rules_from_file(&path).and_then(RuleSet::compile) {
                Ok(rules) => {
                    metrics.record_rules_load_success();
                    info!("Loaded {} admission rules", rules.len());
                    Ok(rules)
                }
                Err(e) => {
                    metrics.record_rules_load_error();
                    Err(e.into())
                }
            }
        }
        Err(_) => {
            warn!("RULES_PATH not set, no requests will be rate limited");
            Ok(RuleSet::default())
        }
    }
}

fn create_decider(rules: RuleSet, metrics: Arc<Metrics>) -> Arc<RateLimitDecider> {
    let geo_config = GeoConfig {
        base_url: std::env::var("GEO_API_URL")
            .unwrap_or_else(|_| "http://ip-api.com".to_string()),
        timeout: Duration::from_millis(
            std::env::var("GEO_TIMEOUT_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse::<u64>()
                .unwrap_or(1000),
        ),
    };

    let geo_cache_ttl = std::env::var("GEO_CACHE_TTL_SECS")
        .unwrap_or_else(|_| "300".to_string())
        .parse::<u64>()
        .unwrap_or(300);

    let store_capacity = std::env::var("STORE_MAX_CAPACITY")
        .unwrap_or_else(|_| "100000".to_string())
        .parse::<u64>()
        .unwrap_or(100_000);

    let resolver = IpApiResolver::new(reqwest::Client::new(), geo_config);

    let geo: Arc<dyn GeoResolver> = if geo_cache_ttl == 0 {
        Arc::new(resolver)
    } else {
        Arc::new(CachingResolver::new(
            resolver,
            Duration::from_secs(geo_cache_ttl),
            store_capacity,
        ))
    };

    let store = ClientStateStore::new(store_capacity);
    Arc::new(RateLimitDecider::new(rules, geo, store, metrics))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics) => Ok(metrics),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
