//! Behavior-driven tests for the download pipeline
//!
//! These tests drive `ProxyEndpoint` directly with a scripted upstream and a
//! temporary cache directory, checking what a caller observes at each stage.

use std::fs::File;
use std::time::{Duration, SystemTime};

use tickproxy_core::write_csv;
use tickproxy_server::key_for;
use tickproxy_tests::*;

// =============================================================================
// End-to-end scenarios
// =============================================================================

#[tokio::test]
async fn when_symbol_is_first_requested_system_fetches_and_caches_it() {
    // Given: An upstream returning a three-row table
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());
    let upstream = StubUpstream::returning(FetchOutcome::Table(sample_table(3, 100.0)));
    let endpoint = ProxyEndpoint::new(&config, upstream.clone());

    // When: AAPL is requested for one month
    let response = endpoint
        .handle(request("AAPL", Some("1mo")), &anonymous(), &ClientIdentity::unknown())
        .await
        .expect("served");

    // Then: The fetched rows are returned and exactly one cache file exists for the key
    assert_eq!(response.served_from, ServedFrom::Upstream);
    let csv = response.to_csv().expect("encodes");
    let mut lines = csv.lines();
    assert!(lines.next().expect("header").starts_with("Date"));
    assert_eq!(lines.count(), 3);
    assert_eq!(csv_files(&config.cache_dir), vec![String::from("AAPL_1mo_1d.csv")]);
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test]
async fn when_cached_entry_is_fresh_upstream_is_not_consulted() {
    // Given: A previously served request and an upstream that now fails
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());
    let upstream = StubUpstream::returning(FetchOutcome::Table(sample_table(3, 100.0)));
    let endpoint = ProxyEndpoint::new(&config, upstream.clone());
    let client = ClientIdentity::unknown();

    let first = endpoint
        .handle(request("AAPL", Some("1mo")), &anonymous(), &client)
        .await
        .expect("served");
    upstream.set(FetchOutcome::failed("provider down"));

    // When: The exact request is repeated
    let second = endpoint
        .handle(request("AAPL", Some("1mo")), &anonymous(), &client)
        .await
        .expect("served");

    // Then: The identical body comes from the cache without an upstream call
    assert_eq!(second.served_from, ServedFrom::Cache);
    assert_eq!(second.to_csv().expect("encodes"), first.to_csv().expect("encodes"));
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test]
async fn when_cache_is_busted_new_content_replaces_the_entry() {
    // Given: A cached three-row table and an upstream now returning one row
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());
    let upstream = StubUpstream::returning(FetchOutcome::Table(sample_table(3, 100.0)));
    let endpoint = ProxyEndpoint::new(&config, upstream.clone());
    let client = ClientIdentity::unknown();

    endpoint
        .handle(request("AAPL", Some("1mo")), &anonymous(), &client)
        .await
        .expect("served");
    upstream.set(FetchOutcome::Table(sample_table(1, 250.0)));

    // When: The request is repeated with a forced refresh
    let busted = endpoint
        .handle(
            request("AAPL", Some("1mo")).with_force_refresh(true),
            &anonymous(),
            &client,
        )
        .await
        .expect("served");

    // Then: The new row is served and later plain requests see it from cache
    assert_eq!(busted.served_from, ServedFrom::Upstream);
    assert_eq!(busted.table.len(), 1);

    let plain = endpoint
        .handle(request("AAPL", Some("1mo")), &anonymous(), &client)
        .await
        .expect("served");
    assert_eq!(plain.served_from, ServedFrom::Cache);
    assert_eq!(plain.table, sample_table(1, 250.0));
    assert_eq!(csv_files(&config.cache_dir).len(), 1);
}

// =============================================================================
// Cache freshness
// =============================================================================

fn age_entry(path: &std::path::Path, age: Duration) {
    let file = File::options().write(true).open(path).expect("entry exists");
    file.set_modified(SystemTime::now() - age).expect("set mtime");
}

#[tokio::test]
async fn when_entry_is_exactly_ttl_old_it_is_still_fresh() {
    // Given: A ten-second TTL and an entry aged exactly ten seconds
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ProxyConfig {
        cache_ttl: Duration::from_secs(10),
        ..test_config(dir.path())
    };
    let upstream = StubUpstream::returning(FetchOutcome::Table(sample_table(2, 10.0)));
    let endpoint = ProxyEndpoint::new(&config, upstream.clone());
    let client = ClientIdentity::unknown();

    endpoint
        .handle(request("MSFT", Some("5d")), &anonymous(), &client)
        .await
        .expect("served");
    age_entry(
        &config.cache_dir.join("MSFT_5d_1d.csv"),
        Duration::from_secs(10),
    );

    // When: The request is repeated
    let response = endpoint
        .handle(request("MSFT", Some("5d")), &anonymous(), &client)
        .await
        .expect("served");

    // Then: The cache still answers
    assert_eq!(response.served_from, ServedFrom::Cache);
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test]
async fn when_entry_is_one_second_past_ttl_upstream_is_refetched() {
    // Given: A ten-second TTL and an entry aged eleven seconds
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ProxyConfig {
        cache_ttl: Duration::from_secs(10),
        ..test_config(dir.path())
    };
    let upstream = StubUpstream::returning(FetchOutcome::Table(sample_table(2, 10.0)));
    let endpoint = ProxyEndpoint::new(&config, upstream.clone());
    let client = ClientIdentity::unknown();

    endpoint
        .handle(request("MSFT", Some("5d")), &anonymous(), &client)
        .await
        .expect("served");
    age_entry(
        &config.cache_dir.join("MSFT_5d_1d.csv"),
        Duration::from_secs(11),
    );

    // When: The request is repeated
    let response = endpoint
        .handle(request("MSFT", Some("5d")), &anonymous(), &client)
        .await
        .expect("served");

    // Then: The upstream is asked again
    assert_eq!(response.served_from, ServedFrom::Upstream);
    assert_eq!(upstream.calls(), 2);
}

#[tokio::test]
async fn when_cache_file_is_corrupt_it_is_treated_as_a_miss() {
    // Given: Garbage where the cache entry should be
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());
    std::fs::create_dir_all(&config.cache_dir).expect("mkdir");
    std::fs::write(config.cache_dir.join("AAPL_1mo_1d.csv"), "<html>oops</html>").expect("write");
    let upstream = StubUpstream::returning(FetchOutcome::Table(sample_table(2, 1.0)));
    let endpoint = ProxyEndpoint::new(&config, upstream.clone());

    // When: The key is requested
    let response = endpoint
        .handle(request("AAPL", Some("1mo")), &anonymous(), &ClientIdentity::unknown())
        .await
        .expect("served");

    // Then: The upstream answers and the entry is repaired
    assert_eq!(response.served_from, ServedFrom::Upstream);
    assert_eq!(upstream.calls(), 1);
    let repaired = std::fs::read_to_string(config.cache_dir.join("AAPL_1mo_1d.csv")).expect("read");
    assert!(repaired.starts_with("Date,Open,High,Low,Close"));
}

// =============================================================================
// Degraded fallback
// =============================================================================

#[tokio::test]
async fn when_upstream_fails_a_stale_snapshot_is_served() {
    // Given: An upstream that always fails and one old file for the symbol
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());
    std::fs::create_dir_all(&config.cache_dir).expect("mkdir");
    let stale = sample_table(4, 50.0);
    let key = key_for("AAPL", Some("2023-01-01"), None, None, Some("1d"));
    std::fs::write(
        config.cache_dir.join(key.file_name()),
        write_csv(&stale).expect("encodes"),
    )
    .expect("write");

    let upstream = StubUpstream::returning(FetchOutcome::failed("connection reset"));
    let endpoint = ProxyEndpoint::new(&config, upstream);

    // When: A different range for the same symbol is requested
    let response = endpoint
        .handle(request("aapl", Some("1y")), &anonymous(), &ClientIdentity::unknown())
        .await
        .expect("degraded response");

    // Then: The stale file's content is returned
    assert_eq!(response.served_from, ServedFrom::Fallback);
    assert_eq!(response.table, stale);
}

#[tokio::test]
async fn when_upstream_fails_without_snapshots_caller_gets_bad_gateway() {
    // Given: An upstream that always fails and an empty cache
    let dir = tempfile::tempdir().expect("tempdir");
    let upstream = StubUpstream::returning(FetchOutcome::failed("connection reset"));
    let endpoint = ProxyEndpoint::new(&test_config(dir.path()), upstream);

    // When: A symbol is requested
    let error = endpoint
        .handle(request("AAPL", None), &anonymous(), &ClientIdentity::unknown())
        .await
        .expect_err("nothing to serve");

    // Then: The error names the symbol and the upstream detail
    assert_eq!(error.status().as_u16(), 502);
    assert_eq!(error.to_string(), "failed to fetch data for AAPL: connection reset");
}

#[tokio::test]
async fn when_forced_refresh_fails_upstream_fallback_still_applies() {
    // Given: A cached entry and an upstream that now fails
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());
    let upstream = StubUpstream::returning(FetchOutcome::Table(sample_table(2, 5.0)));
    let endpoint = ProxyEndpoint::new(&config, upstream.clone());
    let client = ClientIdentity::unknown();
    endpoint
        .handle(request("AAPL", Some("1mo")), &anonymous(), &client)
        .await
        .expect("served");
    upstream.set(FetchOutcome::failed("provider down"));

    // When: The cache is bypassed
    let response = endpoint
        .handle(request("AAPL", Some("1mo")).with_force_refresh(true), &anonymous(), &client)
        .await
        .expect("degraded response");

    // Then: The filename search finds the old entry
    assert_eq!(response.served_from, ServedFrom::Fallback);
    assert_eq!(response.table, sample_table(2, 5.0));
}

#[tokio::test]
async fn when_upstream_stalls_the_timeout_counts_as_failure() {
    // Given: An upstream that never answers and a short timeout
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ProxyConfig {
        upstream_timeout: Duration::from_millis(50),
        ..test_config(dir.path())
    };
    let endpoint = ProxyEndpoint::new(&config, StubUpstream::stalled());

    // When: A symbol is requested
    let error = endpoint
        .handle(request("AAPL", None), &anonymous(), &ClientIdentity::unknown())
        .await
        .expect_err("timed out");

    // Then: The request ends as an upstream failure
    assert!(matches!(error, ProxyError::UpstreamUnavailable { .. }));
    assert!(error.to_string().contains("did not respond within 50ms"));
}

#[tokio::test]
async fn when_upstream_has_no_rows_fallback_is_not_attempted() {
    // Given: A snapshot for the symbol and an upstream reporting no data
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());
    let upstream = StubUpstream::returning(FetchOutcome::Table(sample_table(2, 5.0)));
    let endpoint = ProxyEndpoint::new(&config, upstream.clone());
    let client = ClientIdentity::unknown();
    endpoint
        .handle(request("AAPL", Some("1mo")), &anonymous(), &client)
        .await
        .expect("served");
    upstream.set(FetchOutcome::Empty);

    // When: Another range is requested
    let error = endpoint
        .handle(request("AAPL", Some("1y")), &anonymous(), &client)
        .await
        .expect_err("no data");

    // Then: The caller sees not-found rather than stale data
    assert!(matches!(error, ProxyError::NoDataAvailable { .. }));
    assert_eq!(error.status().as_u16(), 404);
}

// =============================================================================
// Gates
// =============================================================================

#[tokio::test]
async fn when_client_exceeds_the_window_it_is_rejected_until_the_window_slides() {
    // Given: At most two requests per two seconds
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ProxyConfig {
        rate_limit_max: 2,
        rate_limit_window: Duration::from_secs(2),
        ..test_config(dir.path())
    };
    let upstream = StubUpstream::returning(FetchOutcome::Table(sample_table(1, 1.0)));
    let endpoint = ProxyEndpoint::new(&config, upstream);
    let client = ClientIdentity::from_addr(Some("192.0.2.7".parse().expect("ip")));

    // When: Three requests arrive within a second
    for _ in 0..2 {
        endpoint
            .handle(request("AAPL", None), &anonymous(), &client)
            .await
            .expect("admitted");
    }
    let error = endpoint
        .handle(request("AAPL", None), &anonymous(), &client)
        .await
        .expect_err("third is over the limit");

    // Then: The third is rejected with a positive retry hint, and admitted after the window
    match error {
        ProxyError::RateLimited { retry_after_secs } => assert!(retry_after_secs > 0),
        other => panic!("expected rate limit, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    endpoint
        .handle(request("AAPL", None), &anonymous(), &client)
        .await
        .expect("admitted again");
}

#[tokio::test]
async fn when_auth_is_configured_wrong_password_matches_missing_credentials_shape() {
    // Given: A configured credential pair
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ProxyConfig {
        credentials: Some(Credential::new("alice", "s3cret")),
        ..test_config(dir.path())
    };
    let upstream = StubUpstream::returning(FetchOutcome::Table(sample_table(1, 1.0)));
    let endpoint = ProxyEndpoint::new(&config, upstream.clone());
    let client = ClientIdentity::unknown();

    // When: Requests arrive without, with wrong and with correct credentials
    let missing = endpoint
        .handle(request("AAPL", None), &CredentialInput::Absent, &client)
        .await
        .expect_err("missing");
    let wrong = endpoint
        .handle(
            request("AAPL", None),
            &CredentialInput::from_authorization(Some(&basic_header("alice", "guess"))),
            &client,
        )
        .await
        .expect_err("wrong");
    let correct = endpoint
        .handle(
            request("AAPL", None),
            &CredentialInput::from_authorization(Some(&basic_header("alice", "s3cret"))),
            &client,
        )
        .await;

    // Then: Both failures are 401 and only the correct pair reaches upstream
    assert_eq!(missing.status(), wrong.status());
    assert_eq!(missing.status().as_u16(), 401);
    assert!(matches!(wrong, ProxyError::AuthenticationInvalid));
    assert!(correct.is_ok());
    assert_eq!(upstream.calls(), 1);
}
