//! End-to-end routing tests over scripted providers.
//!
//! Verifies that:
//! - A request still succeeds when one of three providers never answers
//! - Each strategy picks the expected answer from a realistic response mix
//! - Failures feed back into the ranking and push a model out of selection
//! - Calls interrupted by a full quorum leave no stats sample
//! - Calls finishing after the deadline record their real outcome
//! - Explicit model lists bypass the ranking
//! - A config file drives the same pipeline

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fail, reply, reply_with_confidence, Script, ScriptedProvider};
use concord::config::Config;
use concord::model::{ConsensusStrategy, Model, ModelKey, RoutingRequest};
use concord::router::{ModelSelector, Router};
use concord::Error;

#[tokio::test(start_paused = true)]
async fn test_one_of_three_providers_times_out() {
    let selector = Arc::new(ModelSelector::new());
    selector.register(Model::new("alpha", "m1"));
    selector.register(Model::new("beta", "m2"));
    selector.register(Model::new("gamma", "m3"));

    let alpha = ScriptedProvider::new("alpha", vec![("m1", reply("Paris", 300))]);
    let beta = ScriptedProvider::new("beta", vec![("m2", reply("Paris", 800))]);
    let gamma = ScriptedProvider::new("gamma", vec![("m3", Script::Hang)]);
    let router = Router::new(selector.clone())
        .with_provider(alpha)
        .with_provider(beta)
        .with_provider(gamma);

    let request = RoutingRequest::new("capital of France?")
        .with_quorum(2, 3)
        .with_timeout(Duration::from_secs(5));
    let result = router.route(request).await.unwrap();

    assert_eq!(result.final_text, "Paris");
    assert_eq!(result.agreement_ratio, 1.0);
    let mut participants: Vec<String> = result
        .participating_models
        .iter()
        .map(ToString::to_string)
        .collect();
    participants.sort();
    assert_eq!(participants, vec!["alpha/m1", "beta/m2"]);

    // The hung call is abandoned one timeout past the deadline.
    tokio::time::sleep(Duration::from_secs(6)).await;
    let hung = selector.get(&ModelKey::new("gamma", "m3")).unwrap();
    assert!(hung.success_rate < 1.0);
    let fast = selector.get(&ModelKey::new("alpha", "m1")).unwrap();
    assert_eq!(fast.success_rate, 1.0);
    assert!((fast.avg_latency - 0.03).abs() < 1e-9);
}

fn mixed_router() -> Router {
    let selector = Arc::new(ModelSelector::new());
    selector.register(Model::new("alpha", "m1").with_weight(1.0));
    selector.register(Model::new("alpha", "m2").with_weight(1.0));
    selector.register(Model::new("beta", "m3").with_weight(5.0));

    let alpha = ScriptedProvider::new(
        "alpha",
        vec![
            ("m1", reply_with_confidence("the sky is blue", 100, 0.6)),
            ("m2", reply_with_confidence("the sky is blue today", 200, 0.7)),
        ],
    );
    let beta = ScriptedProvider::new(
        "beta",
        vec![("m3", reply_with_confidence("it depends on the weather", 300, 0.9))],
    );

    Router::new(selector).with_provider(alpha).with_provider(beta)
}

fn mixed_request(strategy: ConsensusStrategy) -> RoutingRequest {
    RoutingRequest::new("what colour is the sky?")
        .with_strategy(strategy)
        .with_quorum(3, 3)
        .with_timeout(Duration::from_secs(5))
}

#[tokio::test(start_paused = true)]
async fn test_majority_follows_the_agreeing_pair() {
    let result = mixed_router()
        .route(mixed_request(ConsensusStrategy::Majority))
        .await
        .unwrap();

    // Both "sky is blue" answers cluster; the more confident one leads it.
    assert_eq!(result.final_text, "the sky is blue today");
    assert!((result.agreement_ratio - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(result.strategy_used, ConsensusStrategy::Majority);
}

#[tokio::test(start_paused = true)]
async fn test_weighted_follows_the_heavy_model() {
    let result = mixed_router()
        .route(mixed_request(ConsensusStrategy::Weighted))
        .await
        .unwrap();

    assert_eq!(result.final_text, "it depends on the weather");
    // 4.5 / (0.6 + 0.7 + 4.5)
    assert!((result.agreement_ratio - 4.5 / 5.8).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_hybrid_uses_majority_when_agreement_is_high() {
    let result = mixed_router()
        .route(mixed_request(ConsensusStrategy::Hybrid))
        .await
        .unwrap();

    assert_eq!(result.strategy_used, ConsensusStrategy::Hybrid);
    assert_eq!(result.metadata["method_used"], "majority");
    assert_eq!(result.final_text, "the sky is blue today");
}

#[tokio::test(start_paused = true)]
async fn test_best_of_n_trades_confidence_for_latency() {
    let result = mixed_router()
        .route(mixed_request(ConsensusStrategy::BestOfN))
        .await
        .unwrap();

    // 0.9 - 0.03 beats 0.7 - 0.02 and 0.6 - 0.01.
    assert_eq!(result.final_text, "it depends on the weather");
    assert!((result.agreement_ratio - 1.0 / 3.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_failures_push_a_model_out_of_selection() {
    let selector = Arc::new(ModelSelector::new());
    selector.register(Model::new("alpha", "a"));
    selector.register(Model::new("alpha", "b"));
    selector.register(Model::new("gamma", "c"));

    let alpha = ScriptedProvider::new(
        "alpha",
        vec![("a", reply("ok", 100)), ("b", reply("ok", 100))],
    );
    let gamma = ScriptedProvider::new("gamma", vec![("c", fail(500))]);
    let router = Router::new(selector.clone())
        .with_provider(alpha.clone())
        .with_provider(gamma.clone());

    let warmup = RoutingRequest::new("ping")
        .with_quorum(1, 3)
        .with_timeout(Duration::from_secs(5));
    let result = router.route(warmup).await.unwrap();
    assert_eq!(result.metadata["stop_reason"], "all_completed");
    let failed = result.metadata["failed_models"][0].as_str().unwrap();
    assert!(failed.starts_with("gamma/c"), "{}", failed);
    assert_eq!(gamma.calls(), 1);

    let ranked: Vec<String> = {
        let request = RoutingRequest::new("ping").with_quorum(1, 3);
        selector
            .select(&request)
            .unwrap()
            .into_iter()
            .map(|m| m.key.to_string())
            .collect()
    };
    assert_eq!(ranked, vec!["alpha/a", "alpha/b", "gamma/c"]);

    let narrow = RoutingRequest::new("ping")
        .with_quorum(2, 2)
        .with_timeout(Duration::from_secs(5));
    router.route(narrow).await.unwrap();
    assert_eq!(gamma.calls(), 1);
    assert_eq!(alpha.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_models_bypass_ranking() {
    let selector = Arc::new(ModelSelector::new());
    selector.register(Model::new("alpha", "fast").with_weight(10.0));
    selector.register(Model::new("alpha", "slow").with_weight(0.1));
    selector.register(Model::new("alpha", "other").with_weight(0.1));

    let alpha = ScriptedProvider::new(
        "alpha",
        vec![
            ("fast", reply("fast answer", 10)),
            ("slow", reply("slow answer", 100)),
            ("other", reply("slow answer", 120)),
        ],
    );
    let router = Router::new(selector).with_provider(alpha.clone());

    let request = RoutingRequest::new("hi")
        .with_models(vec![
            ModelKey::new("alpha", "slow"),
            ModelKey::new("alpha", "other"),
            ModelKey::new("alpha", "slow"),
        ])
        .with_quorum(2, 2)
        .with_timeout(Duration::from_secs(5));
    let result = router.route(request).await.unwrap();

    assert_eq!(alpha.calls(), 2);
    assert_eq!(result.final_text, "slow answer");
    assert!(!result
        .participating_models
        .contains(&ModelKey::new("alpha", "fast")));
}

#[tokio::test(start_paused = true)]
async fn test_quorum_failure_reports_each_failed_model() {
    let selector = Arc::new(ModelSelector::new());
    selector.register(Model::new("alpha", "a"));
    selector.register(Model::new("alpha", "b"));
    selector.register(Model::new("alpha", "c"));

    let alpha = ScriptedProvider::new(
        "alpha",
        vec![("a", reply("ok", 50)), ("b", fail(50)), ("c", fail(60))],
    );
    let router = Router::new(selector).with_provider(alpha);

    let request = RoutingRequest::new("hi")
        .with_quorum(2, 3)
        .with_timeout(Duration::from_secs(5));
    match router.route(request).await {
        Err(Error::QuorumNotMet {
            required,
            received,
            failures,
        }) => {
            assert_eq!((required, received), (2, 1));
            assert_eq!(failures.len(), 2);
            assert!(failures.iter().all(|f| f.contains("503")));
        }
        other => panic!("expected QuorumNotMet, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_config_driven_selector_feeds_router() {
    let config = Config::parse_str(
        r#"
        [server]
        [routing]
        min_responses = 2
        max_responses = 2
        timeout_secs = 5

        [[providers]]
        name = "alpha"
        url = "https://alpha.example.com/v1"

        [[models]]
        provider = "alpha"
        model_id = "m1"
        [[models]]
        provider = "alpha"
        model_id = "m2"
        weight = 3.0
        "#,
    )
    .unwrap();

    let alpha = ScriptedProvider::new(
        "alpha",
        vec![("m1", reply("forty two", 10)), ("m2", reply("forty two", 20))],
    );
    let router = Router::new(Arc::new(config.build_selector())).with_provider(alpha);

    let result = router
        .route(config.routing.request("meaning of life?"))
        .await
        .unwrap();
    assert_eq!(result.final_text, "forty two");
    assert_eq!(result.metadata["stop_reason"], "max_responses");
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_slow_model_keeps_clean_stats() {
    let selector = Arc::new(ModelSelector::new());
    for id in ["a", "b", "c"] {
        selector.register(Model::new("alpha", id));
    }
    let alpha = ScriptedProvider::new(
        "alpha",
        vec![
            ("a", reply("same", 50)),
            ("b", reply("same", 60)),
            ("c", reply("same", 300)),
        ],
    );
    let router = Router::new(selector.clone()).with_provider(alpha.clone());

    let request = RoutingRequest::new("hi")
        .with_models(vec![
            ModelKey::new("alpha", "a"),
            ModelKey::new("alpha", "b"),
            ModelKey::new("alpha", "c"),
        ])
        .with_quorum(2, 2)
        .with_timeout(Duration::from_secs(5));
    let result = router.route(request).await.unwrap();
    assert_eq!(result.metadata["stop_reason"], "max_responses");
    assert_eq!(alpha.calls(), 3);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let slow = selector.get(&ModelKey::new("alpha", "c")).unwrap();
    assert_eq!(slow.success_rate, 1.0);
    assert_eq!(slow.avg_latency, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_records_real_latency() {
    let selector = Arc::new(ModelSelector::new());
    for id in ["a", "b", "c"] {
        selector.register(Model::new("alpha", id));
    }
    let alpha = ScriptedProvider::new(
        "alpha",
        vec![
            ("a", reply("on time", 100)),
            ("b", reply("on time", 100)),
            ("c", reply("late", 8_000)),
        ],
    );
    let router = Router::new(selector.clone()).with_provider(alpha);

    let request = RoutingRequest::new("hi")
        .with_quorum(2, 3)
        .with_timeout(Duration::from_secs(5));
    let result = router.route(request).await.unwrap();
    assert_eq!(result.metadata["stop_reason"], "timeout");
    assert!(result.individual_responses.iter().all(|r| r.text == "on time"));

    tokio::time::sleep(Duration::from_secs(5)).await;
    let late = selector.get(&ModelKey::new("alpha", "c")).unwrap();
    assert_eq!(late.success_rate, 1.0);
    assert!((late.avg_latency - 0.8).abs() < 1e-6);
}
