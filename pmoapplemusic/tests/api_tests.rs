//! Integration tests for the HTTP layer of pmoapplemusic

use pmoapplemusic::{
    AddOutcome, AppleMusicApi, AppleMusicError, CatalogSearch, CatalogSearchService, DateOracle,
    DestinationPlaylist,
    HtmlDateOracle, PlaylistManager, RateLimitedClient, RateLimiter, Region, RetryPolicy, TextQuery,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_limiter() -> Arc<RateLimitedClient> {
    Arc::new(RateLimitedClient::new(
        RateLimiter::default(),
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            max_jitter: Duration::ZERO,
        },
    ))
}

fn api_for(server: &MockServer) -> Arc<AppleMusicApi> {
    Arc::new(
        AppleMusicApi::builder()
            .api_base(server.uri())
            .search_base(server.uri())
            .authorization("test-token")
            .media_user_token("test-media-token")
            .cookies("session=abc")
            .timeout(Duration::from_secs(5))
            .limiter(fast_limiter())
            .build()
            .unwrap(),
    )
}

#[tokio::test]
async fn test_credentials_are_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/me/library/playlists"))
        .and(header("authorization", "Bearer test-token"))
        .and(header("media-user-token", "test-media-token"))
        .and(header("cookie", "session=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let manager = PlaylistManager::new(api_for(&mock_server));
    assert!(manager.list_playlists().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_or_create_follows_pagination() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/me/library/playlists"))
        .and(query_param("offset", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "p.jazz", "type": "library-playlists", "attributes": {"name": "Jazz"}}]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/me/library/playlists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "p.rock", "type": "library-playlists", "attributes": {"name": "Rock"}}],
            "next": "/v1/me/library/playlists?offset=1"
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/me/library/playlists"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&mock_server)
        .await;

    let manager = PlaylistManager::new(api_for(&mock_server));
    assert_eq!(manager.get_or_create("Jazz").await.unwrap(), "p.jazz");
}

#[tokio::test]
async fn test_get_or_create_creates_missing_playlist() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/me/library/playlists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/me/library/playlists"))
        .and(body_json(json!({
            "attributes": {
                "name": "Jazz",
                "description": "A new playlist created via API using pmoapplemusic"
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "data": [{"id": "p.new", "type": "library-playlists", "attributes": {"name": "Jazz"}}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let manager = PlaylistManager::new(api_for(&mock_server));
    assert_eq!(manager.get_or_create("Jazz").await.unwrap(), "p.new");
}

#[tokio::test]
async fn test_create_bad_request_is_fatal_and_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/me/library/playlists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/me/library/playlists"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errors": [{"code": "40000", "title": "Invalid Attribute", "detail": "name is too long"}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let manager = PlaylistManager::new(api_for(&mock_server));
    let error = manager.get_or_create("Jazz").await.unwrap_err();
    assert!(matches!(error, AppleMusicError::BadRequest(_)));
    assert!(error.is_fatal());
}

#[tokio::test]
async fn test_listing_forbidden_is_fatal() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/me/library/playlists"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/me/library/playlists"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&mock_server)
        .await;

    let manager = PlaylistManager::new(api_for(&mock_server));
    let error = manager.get_or_create("Jazz").await.unwrap_err();
    assert!(error.is_auth_error());
}

#[tokio::test]
async fn test_membership_of_unknown_playlist_is_empty() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/me/library/playlists/p.new/tracks"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let manager = PlaylistManager::new(api_for(&mock_server));
    assert!(manager.list_catalog_ids("p.new").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_membership_reads_catalog_ids() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/me/library/playlists/p.1/tracks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"id": "i.a", "attributes": {"playParams": {"id": "i.a", "catalogId": "1001"}}},
                {"id": "i.b", "attributes": {"playParams": {"id": "i.b", "catalogId": "1002"}}},
                {"id": "i.c", "attributes": {"playParams": {"id": "i.c"}}}
            ]
        })))
        .mount(&mock_server)
        .await;

    let manager = PlaylistManager::new(api_for(&mock_server));
    let ids = manager.list_catalog_ids("p.1").await.unwrap();
    assert_eq!(ids, HashSet::from(["1001".to_string(), "1002".to_string()]));
}

#[tokio::test]
async fn test_add_song_outcomes() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/me/library/playlists/p.1/tracks"))
        .and(body_json(json!({"data": [{"id": "1001", "type": "songs"}]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/me/library/playlists/p.1/tracks"))
        .and(body_json(json!({"data": [{"id": "1003", "type": "songs"}]})))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&mock_server)
        .await;

    let manager = PlaylistManager::new(api_for(&mock_server));
    let playlist = DestinationPlaylist::new("p.1", "Road", HashSet::from(["1002".to_string()]));

    assert_eq!(manager.add_song("1001", &playlist).await, AddOutcome::Ok);
    assert_eq!(manager.add_song("1002", &playlist).await, AddOutcome::Duplicate);
    assert_eq!(manager.add_song("1003", &playlist).await, AddOutcome::Error);

    assert!(playlist.contains("1001").await);
    assert!(!playlist.contains("1003").await);
    // Déjà ajouté : plus aucun appel réseau
    assert_eq!(manager.add_song("1001", &playlist).await, AddOutcome::Duplicate);
}

#[tokio::test]
async fn test_concurrent_adds_are_not_serialized() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/me/library/playlists/p.1/tracks"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(400)))
        .expect(4)
        .mount(&mock_server)
        .await;

    let manager = PlaylistManager::new(api_for(&mock_server));
    let playlist = DestinationPlaylist::new("p.1", "Road", HashSet::new());

    let started = std::time::Instant::now();
    let outcomes = futures::future::join_all(
        ["1", "2", "3", "4"]
            .into_iter()
            .map(|id| manager.add_song(id, &playlist)),
    )
    .await;
    let elapsed = started.elapsed();

    assert!(outcomes.iter().all(|o| *o == AddOutcome::Ok));
    assert!(elapsed < Duration::from_millis(1200), "adds took {:?}", elapsed);
}

#[tokio::test]
async fn test_same_song_added_once_while_in_flight() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/me/library/playlists/p.1/tracks"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let manager = PlaylistManager::new(api_for(&mock_server));
    let playlist = DestinationPlaylist::new("p.1", "Road", HashSet::new());

    let (first, second) = tokio::join!(
        manager.add_song("1001", &playlist),
        manager.add_song("1001", &playlist)
    );
    let mut outcomes = vec![first, second];
    outcomes.sort_by_key(|o| *o != AddOutcome::Ok);
    assert_eq!(outcomes, vec![AddOutcome::Ok, AddOutcome::Duplicate]);
}

#[tokio::test]
async fn test_isrc_search_not_found_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/catalog/fr/songs"))
        .and(query_param("filter[isrc]", "FR0000000001"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let catalog = CatalogSearchService::new(api_for(&mock_server));
    let results = catalog
        .search_by_identifier("FR0000000001", &Region::new("FR"))
        .await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_not_refetched() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/catalog/fr/songs"))
        .and(query_param("filter[isrc]", "FR0000000002"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"data\": [oops"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let catalog = CatalogSearchService::new(api_for(&mock_server));
    let results = catalog
        .search_by_identifier("FR0000000002", &Region::new("FR"))
        .await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_text_search_returns_first_non_empty_variant() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("term", "So What"))
        .and(query_param("artistTerm", "Miles Davis"))
        .and(query_param("albumTerm", "Kind of Blue"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resultCount": 0, "results": []})))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("term", "So What"))
        .and(query_param("artistTerm", "Miles Davis"))
        .and(query_param("country", "us"))
        .and(query_param("entity", "song"))
        .and(query_param("limit", "15"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resultCount": 1,
            "results": [{
                "trackId": 1440833098,
                "trackName": "So What",
                "artistName": "Miles Davis",
                "collectionName": "Kind of Blue (Legacy Edition)"
            }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let catalog = CatalogSearchService::new(api_for(&mock_server));
    let variants = TextQuery::variants("So What", "Miles Davis", "Kind of Blue");
    let (index, results) = catalog
        .search_by_text(&variants, &Region::new("US"))
        .await
        .unwrap();

    assert_eq!(index, 1);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "1440833098");
}

#[tokio::test]
async fn test_equivalent_resolution() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/catalog/fr/songs"))
        .and(query_param("filter[equivalents]", "1001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "2001", "type": "songs"}]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/catalog/fr/songs"))
        .and(query_param("filter[equivalents]", "1002"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&mock_server)
        .await;

    let catalog = CatalogSearchService::new(api_for(&mock_server));
    let region = Region::new("fr");
    assert_eq!(catalog.resolve_equivalent("1001", &region).await, "2001");
    assert_eq!(catalog.resolve_equivalent("1002", &region).await, "1002");
    assert_eq!(catalog.resolve_equivalent("1003", &region).await, "1003");
}

#[tokio::test]
async fn test_html_oracle_compares_release_dates() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/fr/album/kind-of-blue/1440833094"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><p data-testid="tracklist-footer-description">August 17, 1959
5 songs, 45 minutes</p></body></html>"#,
        ))
        .mount(&mock_server)
        .await;

    let oracle = HtmlDateOracle::new(fast_limiter(), Duration::from_secs(5)).unwrap();
    let url = format!("{}/fr/album/kind-of-blue/1440833094", mock_server.uri());

    assert!(oracle.verify_release_date(&url, "1959-08-17").await);
    assert!(!oracle.verify_release_date(&url, "1959-08-18").await);

    let missing = format!("{}/fr/album/missing/1", mock_server.uri());
    assert!(!oracle.verify_release_date(&missing, "1959-08-17").await);
}
