use geogate::{
    config::{load_rules_from_yaml, Rule, RuleSet, RulesConfig},
    gateway::{admission_gate, proxy_handler, GatewayState},
    geo::{GeoConfig, IpApiResolver},
    limiter::RateLimitDecider,
    metrics::Metrics,
    store::ClientStateStore,
    Decision,
};

use axum::{
    body::Body,
    extract::{ConnectInfo, Path},
    http::{Request, StatusCode},
    middleware,
    response::Json,
    routing::get,
    Router,
};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::sleep};
use tower::ServiceExt;

/// Spawn a stand-in for ip-api.com on an ephemeral port
async fn spawn_geo_stub(country: &'static str) -> String {
    let app = Router::new().route(
        "/json/:ip",
        get(move |Path(ip): Path<String>| async move {
            Json(json!({
                "status": "success",
                "countryCode": country,
                "query": ip
            }))
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

/// Spawn a trivial upstream service on an ephemeral port
async fn spawn_upstream_stub() -> String {
    let app = Router::new().route("/orders", get(|| async { "orders ok" }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

fn us_rules(max_requests: u32, window_seconds: u64) -> RuleSet {
    RuleSet::compile(RulesConfig {
        rules: vec![Rule {
            country_code: "US".to_string(),
            max_requests,
            window_seconds,
        }],
    })
    .unwrap()
}

fn decider_with_geo(rules: RuleSet, geo_base_url: String) -> RateLimitDecider {
    let resolver = IpApiResolver::new(
        reqwest::Client::new(),
        GeoConfig {
            base_url: geo_base_url,
            timeout: Duration::from_millis(500),
        },
    );

    RateLimitDecider::new(
        rules,
        Arc::new(resolver),
        ClientStateStore::new(1000),
        Arc::new(Metrics::new().unwrap()),
    )
}

fn request_from(path: &str, addr: &str) -> Request<Body> {
    let mut request = Request::builder().uri(path).body(Body::empty()).unwrap();
    let addr: SocketAddr = format!("{}:50133", addr).parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

#[tokio::test]
async fn test_admission_scenario_through_real_resolver() {
    // Scaled-down window: 3 requests per window admitted, the 4th
    // rejected, admitted again once the window has elapsed with the
    // count reset to 1.
    let geo_url = spawn_geo_stub("US").await;
    let decider = decider_with_geo(us_rules(3, 1), geo_url);
    let addr = "162.254.206.227".parse().unwrap();

    for _ in 0..3 {
        assert_eq!(decider.decide("/orders", addr).await, Decision::Admit);
    }
    assert_eq!(decider.decide("/orders", addr).await, Decision::Reject);

    sleep(Duration::from_millis(1100)).await;
    assert_eq!(decider.decide("/orders", addr).await, Decision::Admit);
}

#[tokio::test]
async fn test_unreachable_geo_service_admits_everything() {
    // Nothing listens on this port; every lookup fails and every request
    // is admitted regardless of the configured rules.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let decider = decider_with_geo(us_rules(1, 60), dead_url);
    let addr = "162.254.206.227".parse().unwrap();

    for _ in 0..5 {
        assert_eq!(decider.decide("/orders", addr).await, Decision::Admit);
    }
}

#[tokio::test]
async fn test_country_without_rule_admits_everything() {
    let geo_url = spawn_geo_stub("DE").await;
    let decider = decider_with_geo(us_rules(1, 60), geo_url);
    let addr = "162.254.206.227".parse().unwrap();

    for _ in 0..5 {
        assert_eq!(decider.decide("/orders", addr).await, Decision::Admit);
    }
}

#[tokio::test]
async fn test_empty_rule_set_admits_everything() {
    let geo_url = spawn_geo_stub("US").await;
    let rules = RuleSet::compile(load_rules_from_yaml("rules: []").unwrap()).unwrap();
    let decider = decider_with_geo(rules, geo_url);
    let addr = "162.254.206.227".parse().unwrap();

    for _ in 0..5 {
        assert_eq!(decider.decide("/orders", addr).await, Decision::Admit);
    }
}

#[tokio::test]
async fn test_gateway_forwards_admitted_and_rejects_exhausted() {
    let geo_url = spawn_geo_stub("US").await;
    let upstream_url = spawn_upstream_stub().await;

    let decider = decider_with_geo(us_rules(2, 60), geo_url);
    let state = GatewayState {
        decider: Arc::new(decider),
        client: reqwest::Client::new(),
        upstream_url,
    };

    let app = Router::new()
        .fallback(proxy_handler)
        .layer(middleware::from_fn_with_state(state.clone(), admission_gate))
        .with_state(state);

    let addr = "162.254.206.227";

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(request_from("/orders", addr))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"orders ok");
    }

    let response = app.oneshot(request_from("/orders", addr)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_rules_yaml_round_trip() {
    let yaml = r#"
rules:
  - country_code: US
    max_requests: 3
    window_seconds: 60
  - country_code: CN
    max_requests: 1
    window_seconds: 10
"#;

    let rules = RuleSet::compile(load_rules_from_yaml(yaml).unwrap()).unwrap();
    assert_eq!(rules.len(), 2);

    let rule = rules.find_rule("cn").unwrap();
    assert_eq!(rule.max_requests, 1);
    assert_eq!(rule.window_seconds, 10);
}
