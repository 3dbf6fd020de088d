//! End-to-end tests driving the Torznab endpoint through the axum router.
//!
//! Outbound services are either unroutable (to exercise the degrade-to-empty
//! paths) or replaced with scripted local HTTP servers.

mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower::ServiceExt;

use common::{MockRoute, drain, empty_nyaa_rss, sample_nyaa_rss, spawn_routed_server};
use tsunagarr::config::Config;
use tsunagarr::models::{AnimeMapping, AnimeTitle};
use tsunagarr::state::SharedState;

const API_KEY: &str = "tsunagarr_api_key";

fn temp_data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tsunagarr-e2e-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// A config whose outbound endpoints all fail fast.
fn test_config(data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.general.data_dir = data_dir.display().to_string();
    config.catalog.url = "http://127.0.0.1:9/catalog.json".to_string();
    config.nyaa.base_url = "http://127.0.0.1:9".to_string();
    config.anilist.api_url = "http://127.0.0.1:9/graphql".to_string();
    config.thexem.base_url = "http://127.0.0.1:9".to_string();
    config
}

fn write_catalog(data_dir: &Path, entries: serde_json::Value) {
    let root = serde_json::json!({ "data": entries });
    std::fs::write(
        data_dir.join("anime-offline-database.json"),
        serde_json::to_vec(&root).unwrap(),
    )
    .unwrap();
}

fn write_mappings(data_dir: &Path, mappings: &[AnimeMapping]) {
    let keyed: HashMap<String, &AnimeMapping> = mappings
        .iter()
        .map(|m| (m.tvdb_id.to_string(), m))
        .collect();
    std::fs::write(
        data_dir.join("mappings.json"),
        serde_json::to_vec(&keyed).unwrap(),
    )
    .unwrap();
}

fn frieren_mapping() -> AnimeMapping {
    AnimeMapping {
        tvdb_id: 424_435,
        anidb_id: Some(17617),
        anilist_id: None,
        mal_id: None,
        titles: AnimeTitle {
            romaji: Some("Sousou no Frieren".to_string()),
            english: Some("Frieren: Beyond Journey's End".to_string()),
            native: None,
            synonyms: vec![],
        },
        total_episodes: 28,
        season_info: vec![],
        last_updated: Utc::now(),
        user_override: false,
    }
}

async fn spawn_app(config: Config) -> Router {
    let state = SharedState::new(config).await.expect("failed to build state");
    tsunagarr::api::router(Arc::new(state))
}

async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).to_string())
}

#[tokio::test]
async fn test_caps_needs_no_auth() {
    let dir = temp_data_dir();
    write_catalog(&dir, serde_json::json!([]));
    let app = spawn_app(test_config(&dir)).await;

    let (status, body) = get(&app, "/api?t=caps").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<caps>"));
    assert!(body.contains("tv-search"));
    assert!(body.contains(r#"supportedParams="q,tvdbid,season,ep""#));
}

#[tokio::test]
async fn test_invalid_api_key_is_403() {
    let dir = temp_data_dir();
    write_catalog(&dir, serde_json::json!([]));
    let app = spawn_app(test_config(&dir)).await;

    let (status, _) = get(&app, "/api?t=search&q=frieren&apikey=wrong").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = get(&app, "/api?t=search&q=frieren").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_query_type_is_400() {
    let dir = temp_data_dir();
    write_catalog(&dir, serde_json::json!([]));
    let app = spawn_app(test_config(&dir)).await;

    let (status, _) = get(&app, &format!("/api?t=music&apikey={API_KEY}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_search_without_query_is_empty_rss() {
    let dir = temp_data_dir();
    write_catalog(&dir, serde_json::json!([]));
    let app = spawn_app(test_config(&dir)).await;

    let (status, body) = get(&app, &format!("/api?t=search&apikey={API_KEY}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<rss"));
    assert!(!body.contains("<item>"));
}

#[tokio::test]
async fn test_mapping_miss_returns_empty_rss() {
    let dir = temp_data_dir();
    write_catalog(&dir, serde_json::json!([]));
    let app = spawn_app(test_config(&dir)).await;

    let (status, body) = get(
        &app,
        &format!("/api?t=tvsearch&tvdbid=99999999&season=1&ep=1&apikey={API_KEY}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<channel>"));
    assert!(!body.contains("<item>"));
}

#[tokio::test]
async fn test_indexer_test_probe_returns_valid_rss() {
    let dir = temp_data_dir();
    write_catalog(&dir, serde_json::json!([]));
    let app = spawn_app(test_config(&dir)).await;

    // Sonarr probes tvsearch with no parameters at all; the indexer is
    // unreachable here, so the feed is valid but empty.
    let (status, body) = get(&app, &format!("/api?t=tvsearch&apikey={API_KEY}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<rss"));
    assert!(body.contains("<channel>"));
}

#[tokio::test]
async fn test_tvsearch_without_params_for_known_series_is_empty() {
    let dir = temp_data_dir();
    write_catalog(&dir, serde_json::json!([]));
    write_mappings(&dir, &[frieren_mapping()]);
    let app = spawn_app(test_config(&dir)).await;

    let (status, body) = get(
        &app,
        &format!("/api?t=tvsearch&tvdbid=424435&apikey={API_KEY}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.contains("<item>"));
}

#[tokio::test]
async fn test_straight_tv_search_with_warm_cache() {
    let dir = temp_data_dir();
    write_catalog(&dir, serde_json::json!([]));
    write_mappings(&dir, &[frieren_mapping()]);

    let (xem_addr, _xem_rx) = spawn_routed_server(vec![MockRoute {
        path_prefix: "/map/single",
        content_type: "application/json",
        body: serde_json::json!({
            "result": "success",
            "data": {"anidb": {"season": 1, "episode": 28, "absolute": 28}}
        })
        .to_string(),
    }])
    .await;

    let (nyaa_addr, mut nyaa_rx) = spawn_routed_server(vec![MockRoute {
        path_prefix: "/?page=rss",
        content_type: "application/xml",
        body: sample_nyaa_rss(),
    }])
    .await;

    let mut config = test_config(&dir);
    config.thexem.base_url = format!("http://{xem_addr}");
    config.nyaa.base_url = format!("http://{nyaa_addr}");
    let app = spawn_app(config).await;

    let (status, body) = get(
        &app,
        &format!("/api?t=tvsearch&tvdbid=424435&season=1&ep=28&apikey={API_KEY}"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<item>"));
    assert!(body.contains(r#"<torznab:attr name="tvdbid" value="424435"/>"#));
    assert!(body.contains(r#"<torznab:attr name="season" value="1"/>"#));
    assert!(body.contains(r#"<torznab:attr name="episode" value="28"/>"#));

    // pubDate fields are RFC 2822
    let pub_date = body
        .split("<pubDate>")
        .nth(1)
        .and_then(|s| s.split("</pubDate>").next())
        .unwrap();
    assert!(chrono::DateTime::parse_from_rfc2822(pub_date).is_ok());

    // Exactly one indexer call, carrying the OR-combined query
    let nyaa_requests = drain(&mut nyaa_rx);
    assert_eq!(nyaa_requests.len(), 1);
    let expected =
        urlencoding::encode(r#"("Sousou no Frieren"|"Frieren: Beyond Journey's End") 28"#)
            .into_owned();
    assert!(
        nyaa_requests[0].contains(&expected),
        "unexpected indexer query: {}",
        nyaa_requests[0]
    );
}

#[tokio::test]
async fn test_bare_number_query_with_sonarr() {
    let dir = temp_data_dir();
    write_catalog(&dir, serde_json::json!([]));

    let mut mapping = frieren_mapping();
    mapping.tvdb_id = 111;
    mapping.titles = AnimeTitle {
        romaji: Some("Test Show".to_string()),
        english: None,
        native: None,
        synonyms: vec!["Test Show S2".to_string()],
    };
    write_mappings(&dir, &[mapping]);

    let episodes = serde_json::json!([
        {"seasonNumber": 1, "episodeNumber": 1, "absoluteEpisodeNumber": 1,
         "monitored": true, "hasFile": true},
        {"seasonNumber": 2, "episodeNumber": 1, "absoluteEpisodeNumber": 14,
         "monitored": true, "hasFile": false},
        {"seasonNumber": 3, "episodeNumber": 1, "absoluteEpisodeNumber": 27,
         "monitored": true, "hasFile": false},
    ]);
    let (sonarr_addr, _sonarr_rx) = spawn_routed_server(vec![
        MockRoute {
            path_prefix: "/api/v3/series",
            content_type: "application/json",
            body: serde_json::json!([{"id": 5, "title": "Test Show", "tvdbId": 111}]).to_string(),
        },
        MockRoute {
            path_prefix: "/api/v3/episode",
            content_type: "application/json",
            body: episodes.to_string(),
        },
    ])
    .await;

    let (nyaa_addr, mut nyaa_rx) = spawn_routed_server(vec![MockRoute {
        path_prefix: "/?page=rss",
        content_type: "application/xml",
        body: empty_nyaa_rss(),
    }])
    .await;

    let mut config = test_config(&dir);
    config.sonarr.url = Some(format!("http://{sonarr_addr}"));
    config.sonarr.api_key = Some("sonarr-key".to_string());
    config.nyaa.base_url = format!("http://{nyaa_addr}");
    let app = spawn_app(config).await;

    let (status, _body) = get(
        &app,
        &format!("/api?t=tvsearch&tvdbid=111&q=01&apikey={API_KEY}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // One combined query: season-scoped title filtered out, both absolute
    // numbers OR-composed.
    let nyaa_requests = drain(&mut nyaa_rx);
    assert_eq!(nyaa_requests.len(), 1);
    let expected = urlencoding::encode(r#""Test Show" (14|27)"#).into_owned();
    assert!(
        nyaa_requests[0].contains(&expected),
        "unexpected indexer query: {}",
        nyaa_requests[0]
    );
}

#[tokio::test]
async fn test_season_zero_sniff_dispatches_special_search() {
    let dir = temp_data_dir();
    write_catalog(&dir, serde_json::json!([]));

    let (nyaa_addr, mut nyaa_rx) = spawn_routed_server(vec![MockRoute {
        path_prefix: "/?page=rss",
        content_type: "application/xml",
        body: empty_nyaa_rss(),
    }])
    .await;

    let mut config = test_config(&dir);
    config.nyaa.base_url = format!("http://{nyaa_addr}");
    let app = spawn_app(config).await;

    let (status, body) = get(
        &app,
        &format!("/api?t=search&q=Kaguya%20sama%2000&apikey={API_KEY}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<rss"));

    // The "00" suffix is stripped and two queries go out: one with the
    // special keywords, one bare to catch differently-labeled specials.
    let nyaa_requests = drain(&mut nyaa_rx);
    assert_eq!(nyaa_requests.len(), 2);

    let keyworded = urlencoding::encode(r#""Kaguya sama" (OVA|Special|OAD|Movie)"#).into_owned();
    let bare = urlencoding::encode(r#""Kaguya sama""#).into_owned();
    assert!(nyaa_requests.iter().any(|r| r.contains(&keyworded)));
    assert!(
        nyaa_requests
            .iter()
            .any(|r| r.contains(&bare) && !r.contains(&keyworded))
    );
}
