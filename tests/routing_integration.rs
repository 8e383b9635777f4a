mod common;

use common::{ScriptedProvider, StreamStep, ask, config_for, manager_with};
use futures::StreamExt;
use llm_relay::config::{FallbackStrategy, RoutingStrategy};
use llm_relay::llm::{ChatOptions, CostTable, LLMError, TokenUsage};
use llm_relay::routing::{CircuitState, RequestContext, STREAM_COST_PER_CHAR_ESTIMATE};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_fallback_to_next_priority() {
    let p1 = Arc::new(ScriptedProvider::failing("p1"));
    let p2 = Arc::new(ScriptedProvider::new("p2", "ok"));
    let manager = manager_with(config_for(&["p1", "p2"]), &[p1.clone(), p2.clone()]).await;

    let response = manager
        .chat(ask("hello"), &RequestContext::new(), ChatOptions::default())
        .await
        .expect("p2 should answer");

    assert_eq!(response.content, "ok");
    assert_eq!(response.metadata["provider"], "p2");

    let p1_metrics = manager.provider_metrics("p1").unwrap();
    let p2_metrics = manager.provider_metrics("p2").unwrap();
    assert_eq!(p1_metrics.failed_requests, 1);
    assert_eq!(p1_metrics.total_requests, 1);
    assert_eq!(p2_metrics.successful_requests, 1);
    // one initial attempt plus three retries against p1
    assert_eq!(p1.calls(), 4);
    assert_eq!(p2.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fail_fast_stops_after_first_candidate() {
    let p1 = Arc::new(ScriptedProvider::failing("p1"));
    let p2 = Arc::new(ScriptedProvider::new("p2", "ok"));
    let mut config = config_for(&["p1", "p2"]);
    config.routing.fallback_strategy = FallbackStrategy::FailFast;
    config.routing.retry_attempts = 0;
    let manager = manager_with(config, &[p1.clone(), p2.clone()]).await;

    let error = manager
        .chat(ask("hello"), &RequestContext::new(), ChatOptions::default())
        .await
        .unwrap_err();

    match &error {
        LLMError::ProviderFailed { provider, .. } => assert_eq!(provider, "p1"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(matches!(error.root(), LLMError::Adapter(_)));
    assert_eq!(p2.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_all_candidates_failing_names_last_provider() {
    let p1 = Arc::new(ScriptedProvider::failing("p1"));
    let p2 = Arc::new(ScriptedProvider::failing("p2"));
    let mut config = config_for(&["p1", "p2"]);
    config.routing.retry_attempts = 0;
    let manager = manager_with(config, &[p1, p2]).await;

    let error = manager
        .chat(ask("hello"), &RequestContext::new(), ChatOptions::default())
        .await
        .unwrap_err();

    assert!(error.to_string().contains("p2"), "{}", error);
    assert_eq!(manager.provider_metrics("p1").unwrap().failed_requests, 1);
    assert_eq!(manager.provider_metrics("p2").unwrap().failed_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_trips_through_retries() {
    let p1 = Arc::new(ScriptedProvider::failing("p1"));
    let mut config = config_for(&["p1"]);
    config.breaker.failure_threshold = 2;
    config.routing.retry_attempts = 3;
    let manager = manager_with(config, &[p1.clone()]).await;

    let error = manager
        .chat(ask("hello"), &RequestContext::new(), ChatOptions::default())
        .await
        .unwrap_err();

    // the breaker opens after two failures and rejects the remaining attempts
    assert_eq!(p1.calls(), 2);
    assert!(matches!(error.root(), LLMError::BreakerOpen { .. }));
    assert_eq!(manager.breaker_state("p1").await, Some(CircuitState::Open));
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_after_reset_timeout() {
    let p1 = Arc::new(ScriptedProvider::failing("p1"));
    let mut config = config_for(&["p1"]);
    config.breaker.failure_threshold = 1;
    config.breaker.reset_timeout_ms = 5_000;
    config.routing.retry_attempts = 0;
    config.cache.enabled = false;
    let manager = manager_with(config, &[p1.clone()]).await;

    assert!(
        manager
            .chat(ask("a"), &RequestContext::critical(), ChatOptions::default())
            .await
            .is_err()
    );
    assert_eq!(manager.breaker_state("p1").await, Some(CircuitState::Open));

    p1.set_failing(false);
    tokio::time::advance(Duration::from_millis(5_001)).await;
    // one failure in two requests keeps the provider out of routing, so clear it
    manager.reset_metrics("p1");

    let response = manager
        .chat(ask("b"), &RequestContext::critical(), ChatOptions::default())
        .await
        .expect("trial call should succeed");
    assert_eq!(response.content, "");
    assert_eq!(manager.breaker_state("p1").await, Some(CircuitState::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_cache_serves_identical_requests() {
    let p1 = Arc::new(ScriptedProvider::new("p1", "cached answer"));
    let manager = manager_with(config_for(&["p1"]), &[p1.clone()]).await;

    let first = manager
        .chat(ask("same"), &RequestContext::new(), ChatOptions::default())
        .await
        .unwrap();
    let second = manager
        .chat(ask("same"), &RequestContext::critical(), ChatOptions::default())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(second.metadata["provider"], "p1");
    assert!(second.metadata["cost"].as_f64().unwrap() > 0.0);
    assert_eq!(p1.calls(), 1);
    assert_eq!(manager.provider_metrics("p1").unwrap().total_requests, 1);

    let status = manager.status().await;
    assert_eq!(status.cache_size, 1);

    // different options miss the cache
    let tuned = ChatOptions {
        temperature: Some(0.1),
        ..Default::default()
    };
    manager
        .chat(ask("same"), &RequestContext::new(), tuned)
        .await
        .unwrap();
    assert_eq!(p1.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cost_ceiling_rejects_before_routing() {
    let p1 = Arc::new(ScriptedProvider::new("p1", "ok"));
    let manager = manager_with(config_for(&["p1"]), &[p1.clone()]).await;

    let error = manager
        .chat(
            ask("expensive"),
            &RequestContext::new().with_max_cost(0.75),
            ChatOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(error, LLMError::CostCeilingExceeded { .. }));
    assert_eq!(p1.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_daily_budget_enforced() {
    // 1000 prompt tokens at 1 USD per 1K
    let p1 = Arc::new(
        ScriptedProvider::new("p1", "ok")
            .with_cost(CostTable::new(1.0, 0.0))
            .with_usage(TokenUsage::new(1000, 0)),
    );
    let mut config = config_for(&["p1"]);
    config.cost_control.daily_budget = 1.0;
    config.cache.enabled = false;
    let manager = manager_with(config, &[p1.clone()]).await;

    let response = manager
        .chat(ask("one"), &RequestContext::new(), ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(response.metadata["cost"], 1.0);
    assert!((manager.status().await.daily_spent - 1.0).abs() < 1e-9);

    let error = manager
        .chat(ask("two"), &RequestContext::new(), ChatOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(error, LLMError::DailyBudgetExceeded { .. }));
    assert_eq!(p1.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_provider_excluded_for_every_strategy() {
    for strategy in [
        RoutingStrategy::Priority,
        RoutingStrategy::RoundRobin,
        RoutingStrategy::Weighted,
        RoutingStrategy::CostOptimized,
        RoutingStrategy::LatencyOptimized,
    ] {
        // p1 is cheapest and highest priority but fails its probe
        let p1 = Arc::new(ScriptedProvider::new("p1", "p1").with_cost(CostTable::new(0.0, 0.0)));
        let p2 = Arc::new(ScriptedProvider::new("p2", "p2"));
        p1.set_healthy(false);

        let mut config = config_for(&["p1", "p2"]);
        config.routing.strategy = strategy;
        config.cache.enabled = false;
        let manager = manager_with(config, &[p1.clone(), p2.clone()]).await;

        let probes = manager.run_health_checks().await;
        assert!(!probes["p1"]);
        assert!(probes["p2"]);

        for i in 0..5 {
            let response = manager
                .chat(ask(&format!("q{}", i)), &RequestContext::new(), ChatOptions::default())
                .await
                .unwrap();
            assert_eq!(response.content, "p2", "strategy {:?}", strategy);
        }
        assert_eq!(p1.calls(), 0, "strategy {:?}", strategy);
        manager.destroy().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_providers_available() {
    let p1 = Arc::new(ScriptedProvider::new("p1", "ok"));
    let manager = manager_with(config_for(&["p1"]), &[p1]).await;

    let error = manager
        .chat(
            ask("hello"),
            &RequestContext::new().with_tags(["vision"]),
            ChatOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(error, LLMError::NoProvidersAvailable));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_a_provider_failure() {
    let slow = Arc::new(ScriptedProvider::new("slow", "late").with_delay(Duration::from_secs(5)));
    let fast = Arc::new(ScriptedProvider::new("fast", "on time"));
    let mut config = config_for(&["slow", "fast"]);
    config.routing.timeout_ms = 1_000;
    config.routing.retry_attempts = 0;
    let manager = manager_with(config, &[slow.clone(), fast]).await;

    let response = manager
        .chat(ask("hurry"), &RequestContext::new(), ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(response.content, "on time");
    assert_eq!(manager.provider_metrics("slow").unwrap().failed_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_queue_preserves_fifo_order() {
    let p1 = Arc::new(ScriptedProvider::new("p1", "ok").with_delay(Duration::from_millis(20)));
    let manager = manager_with(config_for(&["p1"]), &[p1.clone()]).await;
    let context = RequestContext::new();

    let calls = ["first", "second", "third"]
        .map(|prompt| manager.chat(ask(prompt), &context, ChatOptions::default()));
    for result in futures::future::join_all(calls).await {
        result.unwrap();
    }

    assert_eq!(p1.received(), vec!["first", "second", "third"]);
}

#[tokio::test(start_paused = true)]
async fn test_critical_requests_bypass_queue() {
    let slow = Arc::new(ScriptedProvider::new("p1", "ok").with_delay(Duration::from_secs(10)));
    let mut config = config_for(&["p1"]);
    config.routing.timeout_ms = 60_000;
    config.cache.enabled = false;
    let manager = Arc::new(manager_with(config, &[slow.clone()]).await);

    let queued = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .chat(ask("queued"), &RequestContext::new(), ChatOptions::default())
                .await
        })
    };
    let waiting = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .chat(ask("waiting"), &RequestContext::new(), ChatOptions::default())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(manager.status().await.queue_length, 1);

    let started = Instant::now();
    manager
        .chat(ask("urgent"), &RequestContext::critical(), ChatOptions::default())
        .await
        .unwrap();

    // the critical call only waited for its own provider latency
    assert!(started.elapsed() < Duration::from_secs(11));
    assert!(!waiting.is_finished());

    queued.await.unwrap().unwrap();
    waiting.await.unwrap().unwrap();
    assert_eq!(slow.received(), vec!["queued", "urgent", "waiting"]);
}

#[tokio::test(start_paused = true)]
async fn test_stream_routes_to_streaming_provider() {
    let plain = Arc::new(ScriptedProvider::new("plain", "ok"));
    let streaming = Arc::new(
        ScriptedProvider::new("streaming", "").with_stream(vec![
            StreamStep::Delta("Hel"),
            StreamStep::Delta("lo"),
        ]),
    );
    let manager = manager_with(
        config_for(&["plain", "streaming"]),
        &[plain.clone(), streaming.clone()],
    )
    .await;

    let stream = manager
        .chat_stream(ask("hi"), &RequestContext::new(), ChatOptions::default())
        .await
        .unwrap();
    let chunks: Vec<_> = stream.collect().await;

    let text: String = chunks
        .iter()
        .map(|chunk| chunk.as_ref().unwrap().delta_content.clone().unwrap_or_default())
        .collect();
    assert_eq!(text, "Hello");
    for chunk in &chunks {
        assert_eq!(chunk.as_ref().unwrap().metadata["provider"], "streaming");
    }
    let last = chunks.last().unwrap().as_ref().unwrap();
    assert!(last.done);
    assert!(last.metadata.contains_key("estimated_cost"));

    assert_eq!(plain.calls(), 0);
    let expected = 5.0 * STREAM_COST_PER_CHAR_ESTIMATE;
    assert!((manager.status().await.daily_spent - expected).abs() < 1e-12);
    let metrics = manager.provider_metrics("streaming").unwrap();
    assert_eq!(metrics.successful_requests, 1);
    assert!((metrics.total_cost_usd - expected).abs() < 1e-12);
}

#[tokio::test(start_paused = true)]
async fn test_stream_falls_back_before_first_chunk_only() {
    let broken = Arc::new(
        ScriptedProvider::new("broken", "").with_stream(vec![StreamStep::Fail("reset")]),
    );
    let flaky = Arc::new(ScriptedProvider::new("flaky", "").with_stream(vec![
        StreamStep::Delta("partial"),
        StreamStep::Fail("connection dropped"),
        StreamStep::Delta("never"),
    ]));
    let mut config = config_for(&["broken", "flaky"]);
    config.routing.retry_attempts = 0;
    let manager = manager_with(config, &[broken.clone(), flaky.clone()]).await;

    let stream = manager
        .chat_stream(ask("hi"), &RequestContext::new(), ChatOptions::default())
        .await
        .unwrap();
    let chunks: Vec<_> = stream.collect().await;

    assert_eq!(chunks.len(), 2);
    assert_eq!(
        chunks[0].as_ref().unwrap().delta_content.as_deref(),
        Some("partial")
    );
    match &chunks[1] {
        Err(LLMError::ProviderFailed { provider, .. }) => assert_eq!(provider, "flaky"),
        other => panic!("unexpected item: {:?}", other),
    }

    assert_eq!(manager.provider_metrics("broken").unwrap().failed_requests, 1);
    assert_eq!(manager.provider_metrics("flaky").unwrap().failed_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_stream_times_out_after_commit() {
    let stalling = Arc::new(
        ScriptedProvider::new("stalling", "")
            .with_stream(vec![StreamStep::Delta("first"), StreamStep::Stall]),
    );
    let mut config = config_for(&["stalling"]);
    config.routing.retry_attempts = 0;
    config.routing.stream_timeout_ms = 5_000;
    let manager = manager_with(config, &[stalling.clone()]).await;

    let mut stream = manager
        .chat_stream(ask("hi"), &RequestContext::new(), ChatOptions::default())
        .await
        .unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.delta_content.as_deref(), Some("first"));

    let started = Instant::now();
    match stream.next().await {
        Some(Err(error)) => assert!(matches!(error.root(), LLMError::Timeout(_))),
        other => panic!("unexpected item: {:?}", other),
    }
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(stream.next().await.is_none());

    let metrics = manager.provider_metrics("stalling").unwrap();
    assert_eq!(metrics.failed_requests, 1);
    assert_eq!(metrics.successful_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_completed_stream_records_no_token_average() {
    let streaming = Arc::new(ScriptedProvider::new("streaming", "").with_stream(vec![
        StreamStep::Delta("a"),
        StreamStep::Delta("b"),
        StreamStep::Delta("c"),
    ]));
    let manager = manager_with(config_for(&["streaming"]), &[streaming]).await;

    let stream = manager
        .chat_stream(ask("hi"), &RequestContext::new(), ChatOptions::default())
        .await
        .unwrap();
    let chunks: Vec<_> = stream.collect().await;
    assert_eq!(chunks.len(), 3);

    let metrics = manager.provider_metrics("streaming").unwrap();
    assert_eq!(metrics.successful_requests, 1);
    assert_eq!(metrics.average_tokens_per_request, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_embeddings_skip_unsupported_provider() {
    let chat_only = Arc::new(ScriptedProvider::new("chat-only", "ok"));
    let embedder = Arc::new(
        ScriptedProvider::new("embedder", "").with_embeddings(vec![vec![0.1, 0.2], vec![0.3, 0.4]]),
    );
    let manager = manager_with(
        config_for(&["chat-only", "embedder"]),
        &[chat_only.clone(), embedder.clone()],
    )
    .await;

    let vectors = manager
        .embeddings(
            vec!["a".to_string(), "b".to_string()],
            &RequestContext::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    // unsupported is not retried and leaves the breaker alone
    assert_eq!(chat_only.calls(), 1);
    assert_eq!(
        manager.breaker_state("chat-only").await,
        Some(CircuitState::Closed)
    );

    // a missing capability leaves the chat provider's health untouched
    let metrics = manager.provider_metrics("chat-only").unwrap();
    assert_eq!(metrics.failed_requests, 0);
    assert!(metrics.is_healthy());

    let response = manager
        .chat(ask("hi"), &RequestContext::new(), ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(response.metadata["provider"], "chat-only");
    assert_eq!(response.content, "ok");
}

#[tokio::test(start_paused = true)]
async fn test_periodic_health_sweep_feeds_metrics() {
    let p1 = Arc::new(ScriptedProvider::new("p1", "ok"));
    let p2 = Arc::new(ScriptedProvider::new("p2", "ok"));
    p1.set_healthy(false);

    let mut config = config_for(&["p1", "p2"]);
    config.monitoring.enable_health_check = true;
    config.monitoring.health_check_interval_ms = 1_000;
    let manager = manager_with(config, &[p1.clone(), p2.clone()]).await;

    tokio::time::sleep(Duration::from_millis(2_500)).await;

    assert_eq!(p1.health_checks(), 2);
    let metrics = manager.provider_metrics("p1").unwrap();
    assert_eq!(metrics.failed_requests, 2);
    assert!(!metrics.is_healthy());
    assert_eq!(manager.provider_metrics("p2").unwrap().successful_requests, 2);

    let response = manager
        .chat(ask("hello"), &RequestContext::new(), ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(response.metadata["provider"], "p2");
}

#[tokio::test(start_paused = true)]
async fn test_destroy_is_idempotent() {
    let p1 = Arc::new(ScriptedProvider::new("p1", "ok"));
    let manager = manager_with(config_for(&["p1"]), &[p1]).await;
    manager
        .chat(ask("hello"), &RequestContext::new(), ChatOptions::default())
        .await
        .unwrap();

    manager.destroy().await;
    manager.destroy().await;

    let status = manager.status().await;
    assert!(status.providers.is_empty());
    assert!(status.breakers.is_empty());
    assert_eq!(status.cache_size, 0);
    assert_eq!(status.queue_length, 0);
    assert!(manager.is_destroyed());

    let error = manager
        .chat(ask("hello"), &RequestContext::new(), ChatOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(error, LLMError::Shutdown));
}

#[tokio::test(start_paused = true)]
async fn test_preferred_and_excluded_providers() {
    let p1 = Arc::new(ScriptedProvider::new("p1", "one"));
    let p2 = Arc::new(ScriptedProvider::new("p2", "two"));
    let mut config = config_for(&["p1", "p2"]);
    config.cache.enabled = false;
    let manager = manager_with(config, &[p1, p2]).await;

    let preferred = manager
        .chat(ask("a"), &RequestContext::new().prefer("p2"), ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(preferred.content, "two");

    let excluded = manager
        .chat(ask("b"), &RequestContext::new().exclude("p2"), ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(excluded.content, "one");
}

#[tokio::test(start_paused = true)]
async fn test_filtered_preference_is_not_widened() {
    let p1 = Arc::new(ScriptedProvider::new("p1", "one"));
    let p2 = Arc::new(ScriptedProvider::new("p2", "two"));
    let mut config = config_for(&["p1", "p2"]);
    config.cache.enabled = false;
    config.providers[1].tags.insert("coding".to_string());
    let manager = manager_with(config, &[p1.clone(), p2.clone()]).await;

    // excluded
    let error = manager
        .chat(
            ask("a"),
            &RequestContext::new().prefer("p1").exclude("p1"),
            ChatOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(error, LLMError::NoProvidersAvailable));

    // tag mismatch
    let error = manager
        .chat(
            ask("b"),
            &RequestContext::new().prefer("p1").with_tags(["coding"]),
            ChatOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(error, LLMError::NoProvidersAvailable));

    // unhealthy
    p1.set_healthy(false);
    manager.run_health_checks().await;
    let error = manager
        .chat(ask("c"), &RequestContext::new().prefer("p1"), ChatOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(error, LLMError::NoProvidersAvailable));

    assert_eq!(p1.calls(), 0);
    assert_eq!(p2.calls(), 0);
}
