use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use urbanlens_core_sdk::config::ProxyConfig;
use urbanlens_core_sdk::context::{DatasetContext, DistrictRecord};
use urbanlens_core_sdk::llm::OllamaBackend;
use urbanlens_core_sdk::proxy::FallbackProxy;
use urbanlens_core_sdk::requester::{CompletionRequester, Guidance, RequesterError, RequesterMode};
use urbanlens_core_sdk::server::router;

#[test_log::test(tokio::test)]
async fn server_fallback_mode_surfaces_annotated_reply() {
    let proxy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .and(body_partial_json(json!({"prompt": "Why congestion?", "fallback": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "Too many cars.\n\n_(Used fallback model 'M2')_",
            "model": "M2",
            "used_fallback": true
        })))
        .expect(1)
        .mount(&proxy)
        .await;

    let reply = CompletionRequester::new(proxy.uri())
        .ask("Why congestion?", None)
        .await
        .unwrap();

    assert!(reply.used_fallback);
    assert_eq!(reply.serving_model.as_deref(), Some("M2"));
    assert!(reply.text.ends_with("_(Used fallback model 'M2')_"));
}

#[test_log::test(tokio::test)]
async fn context_summary_is_sent_in_prompt() {
    let proxy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "ok"})))
        .mount(&proxy)
        .await;

    let context = DatasetContext::from_records(&[DistrictRecord {
        name: "Riverside".to_string(),
        indicators: [("flood_risk".to_string(), 0.42)].into_iter().collect(),
    }]);
    CompletionRequester::new(proxy.uri())
        .ask("Where to build?", Some(&context))
        .await
        .unwrap();

    let requests = proxy.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let prompt = body["prompt"].as_str().unwrap();
    assert!(prompt.contains("average flood_risk: 0.42"));
    assert!(prompt.ends_with("Question: Where to build?"));
}

#[test_log::test(tokio::test)]
async fn exhaustion_maps_to_backend_guidance() {
    let proxy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(502).set_body_json(json!({
            "error": "All models failed",
            "details": "M3: connection refused by http://127.0.0.1:11434: error sending request"
        })))
        .mount(&proxy)
        .await;

    let err = CompletionRequester::new(proxy.uri())
        .ask("hi", None)
        .await
        .unwrap_err();

    assert!(matches!(err, RequesterError::Exhausted { .. }));
    assert_eq!(err.guidance(), Guidance::BackendUnreachable);
}

#[test_log::test(tokio::test)]
async fn bad_request_maps_to_validation() {
    let proxy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "Prompt is required"})),
        )
        .mount(&proxy)
        .await;

    let err = CompletionRequester::new(proxy.uri())
        .ask("hi", None)
        .await
        .unwrap_err();
    assert_eq!(err.guidance(), Guidance::InvalidPrompt);
}

#[tokio::test]
async fn unreachable_proxy_maps_to_proxy_guidance() {
    let err = CompletionRequester::new("http://127.0.0.1:9")
        .ask("hi", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RequesterError::ProxyUnreachable(_)));
    assert_eq!(err.guidance(), Guidance::ProxyUnreachable);
}

#[test_log::test(tokio::test)]
async fn slow_proxy_maps_to_timeout_guidance() {
    let proxy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"response": "too late"}))
                .set_delay(Duration::from_millis(1500)),
        )
        .mount(&proxy)
        .await;

    let err = CompletionRequester::new(proxy.uri())
        .with_timeout(Duration::from_millis(200))
        .unwrap()
        .ask("hi", None)
        .await
        .unwrap_err();

    assert!(matches!(err, RequesterError::Timeout(_)));
    assert_eq!(err.guidance(), Guidance::BackendTimeout);
}

#[test_log::test(tokio::test)]
async fn padded_preferred_model_is_not_annotated() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "primary": "M2",
            "candidates": ["M2", "M1"],
            "quiet": []
        })))
        .mount(&proxy)
        .await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .and(body_partial_json(json!({"model": "M1", "fallback": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "Plant trees."})))
        .expect(1)
        .mount(&proxy)
        .await;

    let reply = CompletionRequester::new(proxy.uri())
        .with_mode(RequesterMode::ClientIterated)
        .with_model(Some(" M1 ".to_string()))
        .ask("What cools streets?", None)
        .await
        .unwrap();

    assert_eq!(reply.text, "Plant trees.");
    assert!(!reply.used_fallback);
    assert_eq!(reply.serving_model.as_deref(), Some("M1"));
}

#[test_log::test(tokio::test)]
async fn client_iterated_mode_walks_server_candidates() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "primary": "M1",
            "candidates": ["M1", "M2", "M3"],
            "quiet": []
        })))
        .mount(&proxy)
        .await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .and(body_partial_json(json!({"model": "M1", "fallback": false})))
        .respond_with(ResponseTemplate::new(502).set_body_json(json!({
            "error": "All models failed",
            "details": "M1: request failed: 500 Internal Server Error -> boom"
        })))
        .expect(1)
        .mount(&proxy)
        .await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .and(body_partial_json(json!({"model": "M2", "fallback": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "Increase transit investment.",
            "model": "M2",
            "used_fallback": false
        })))
        .expect(1)
        .mount(&proxy)
        .await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .and(body_partial_json(json!({"model": "M3"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "unused"})))
        .expect(0)
        .mount(&proxy)
        .await;

    let reply = CompletionRequester::new(proxy.uri())
        .with_mode(RequesterMode::ClientIterated)
        .ask("What reduces emissions?", None)
        .await
        .unwrap();

    assert_eq!(
        reply.text,
        "Increase transit investment.\n\n_(Used fallback model 'M2')_"
    );
    assert!(reply.used_fallback);
    assert_eq!(reply.serving_model.as_deref(), Some("M2"));
}

#[test_log::test(tokio::test)]
async fn client_iterated_exhaustion_keeps_last_details() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "primary": "A",
            "candidates": ["A", "B"]
        })))
        .mount(&proxy)
        .await;
    for (model, details) in [
        ("A", "A: request timed out after 20s"),
        ("B", "B: request failed: 404 Not Found -> model 'B' not found"),
    ] {
        Mock::given(method("POST"))
            .and(path("/completion"))
            .and(body_partial_json(json!({"model": model})))
            .respond_with(ResponseTemplate::new(502).set_body_json(json!({
                "error": "All models failed",
                "details": details
            })))
            .mount(&proxy)
            .await;
    }

    let err = CompletionRequester::new(proxy.uri())
        .with_mode(RequesterMode::ClientIterated)
        .ask("hi", None)
        .await
        .unwrap_err();

    match &err {
        RequesterError::Exhausted { details } => assert!(details.starts_with("B: ")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.guidance(), Guidance::NoModelAvailable);
}

#[test_log::test(tokio::test)]
async fn requester_against_real_proxy_end_to_end() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({"model": "M1"})))
        .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
        .mount(&backend)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({"model": "M2"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"response": "Increase transit investment."})),
        )
        .mount(&backend)
        .await;

    let config = ProxyConfig {
        backend_url: backend.uri(),
        default_model: "M1".to_string(),
        fallback_models: vec!["M2".to_string(), "M3".to_string()],
        attempt_timeout_secs: 2,
        ..ProxyConfig::default()
    };
    let backend_client = OllamaBackend::from_config(&config).unwrap();
    let app = router(Arc::new(FallbackProxy::new(Arc::new(config), backend_client)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let base = format!("http://{}", addr);

    for mode in [RequesterMode::ServerFallback, RequesterMode::ClientIterated] {
        let reply = CompletionRequester::new(base.clone())
            .with_mode(mode)
            .with_model(Some("M1".to_string()))
            .ask("What reduces emissions?", None)
            .await
            .unwrap();
        assert_eq!(
            reply.text,
            "Increase transit investment.\n\n_(Used fallback model 'M2')_",
            "mode: {mode:?}"
        );
        assert_eq!(reply.serving_model.as_deref(), Some("M2"));
        assert!(reply.used_fallback);
    }
}
