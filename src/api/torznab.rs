//! The Torznab endpoint Sonarr talks to, and the RSS rendering behind it.

use anyhow::Result;
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::api::ApiError;
use crate::constants::limits;
use crate::models::SearchResult;
use crate::services::query::paginate;
use crate::services::special::season_zero_query;
use crate::state::SharedState;

const CAPS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<caps>
    <server version="1.0" title="Tsunagarr" />
    <limits max="100" default="100"/>
    <searching>
        <search available="yes" supportedParams="q"/>
        <tv-search available="yes" supportedParams="q,tvdbid,season,ep"/>
    </searching>
    <categories>
        <category id="5000" name="TV">
            <subcat id="5070" name="Anime"/>
        </category>
    </categories>
</caps>"#;

// Last-resort body should RSS rendering itself fail.
const EMPTY_RSS_FALLBACK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom" xmlns:torznab="http://torznab.com/schemas/2015/feed"><channel><title>Tsunagarr</title><description>Anime Torznab proxy for Sonarr</description><link></link></channel></rss>"#;

#[derive(Debug, Default, Deserialize)]
pub struct TorznabParams {
    pub t: Option<String>,
    pub q: Option<String>,
    pub tvdbid: Option<i64>,
    pub season: Option<i64>,
    pub ep: Option<i64>,
    pub apikey: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Request coordinates echoed back as `torznab:attr` elements on each item.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestEcho {
    pub tvdbid: Option<i64>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
}

/// Main Torznab endpoint: `caps`, `search` and `tvsearch`.
pub async fn torznab_api(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<TorznabParams>,
) -> Response {
    let t = params.t.clone().unwrap_or_default();

    // Capabilities are served without authentication.
    if t == "caps" {
        return xml_response(CAPS_XML.to_string());
    }

    if params.apikey.as_deref() != Some(state.config.server.api_key.as_str()) {
        warn!(
            apikey = params.apikey.as_deref().unwrap_or(""),
            "Invalid API key attempt"
        );
        return ApiError::InvalidApiKey.into_response();
    }

    let limit = params
        .limit
        .unwrap_or(limits::MAX_RESULTS_PER_QUERY)
        .min(limits::MAX_RESULTS_PER_QUERY);
    let offset = params.offset.unwrap_or(0);

    match t.as_str() {
        "tvsearch" => handle_tvsearch(&state, &params, limit, offset).await,
        "search" => match params.q.as_deref() {
            None => {
                warn!("search called without query");
                empty_rss(&state)
            }
            Some(q) => {
                if let Some(stripped) = season_zero_query(q) {
                    info!(query = %q, stripped = %stripped, "Season-zero query detected");
                    handle_search(&state, &stripped, true, limit, offset).await
                } else {
                    handle_search(&state, q, false, limit, offset).await
                }
            }
        },
        other => {
            warn!(query_type = %other, "Unknown query type");
            ApiError::UnknownQueryType(other.to_string()).into_response()
        }
    }
}

async fn handle_tvsearch(
    state: &Arc<SharedState>,
    params: &TorznabParams,
    limit: usize,
    offset: usize,
) -> Response {
    let Some(tvdb_id) = params.tvdbid else {
        return match params.q.as_deref() {
            Some(q) => {
                let is_special = params.season == Some(0);
                info!(
                    query = %q,
                    special = is_special,
                    "tvsearch without tvdbid, falling back to generic search"
                );
                handle_search(state, q, is_special, limit, offset).await
            }
            None => {
                // Sonarr probes the indexer with a bare tvsearch during setup.
                info!("tvsearch without tvdbid or query, running indexer-test search");
                handle_search(state, "Frieren", false, limit, offset).await
            }
        };
    };

    match (params.season, params.ep, params.q.as_deref()) {
        (Some(season), Some(episode), _) => {
            info!(tvdb_id = tvdb_id, season = season, episode = episode, "TV search");

            let Some(mapping) = state.resolver.get_mapping(tvdb_id).await else {
                warn!(tvdb_id = tvdb_id, "No mapping found, returning empty results");
                return empty_rss(state);
            };

            let results = state.planner.search_episode(&mapping, season, episode).await;
            info!(tvdb_id = tvdb_id, results = results.len(), "TV search finished");

            let page = paginate(results, limit, offset);
            rss_response(
                state,
                &page,
                RequestEcho {
                    tvdbid: Some(tvdb_id),
                    season: Some(season),
                    episode: Some(episode),
                },
            )
        }
        (_, _, Some(q)) => {
            info!(tvdb_id = tvdb_id, query = %q, "TV search with bare query");

            let Some(mapping) = state.resolver.get_mapping(tvdb_id).await else {
                warn!(tvdb_id = tvdb_id, "No mapping found, returning empty results");
                return empty_rss(state);
            };

            let results = state.special.search_bare_query(&mapping, q).await;
            let page = paginate(results, limit, offset);
            rss_response(
                state,
                &page,
                RequestEcho {
                    tvdbid: Some(tvdb_id),
                    ..RequestEcho::default()
                },
            )
        }
        _ => {
            warn!(tvdb_id = tvdb_id, "tvsearch without season/ep or query");
            empty_rss(state)
        }
    }
}

async fn handle_search(
    state: &Arc<SharedState>,
    query: &str,
    is_special: bool,
    limit: usize,
    offset: usize,
) -> Response {
    info!(query = %query, special = is_special, "Generic search");

    let results = state.planner.generic_search(query, is_special).await;
    let page = paginate(results, limit, offset);
    rss_response(state, &page, RequestEcho::default())
}

fn channel_link(state: &SharedState) -> String {
    format!(
        "http://{}:{}",
        state.config.server.host, state.config.server.port
    )
}

fn xml_response(body: String) -> Response {
    (
        [(axum::http::header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        body,
    )
        .into_response()
}

fn rss_response(state: &SharedState, results: &[SearchResult], echo: RequestEcho) -> Response {
    match render_rss(results, &channel_link(state), echo) {
        Ok(xml) => xml_response(xml),
        Err(e) => {
            error!(error = %e, "Failed to render RSS");
            xml_response(EMPTY_RSS_FALLBACK.to_string())
        }
    }
}

fn empty_rss(state: &SharedState) -> Response {
    rss_response(state, &[], RequestEcho::default())
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_torznab_attr(writer: &mut Writer<Vec<u8>>, name: &str, value: &str) -> Result<()> {
    let mut attr = BytesStart::new("torznab:attr");
    attr.push_attribute(("name", name));
    attr.push_attribute(("value", value));
    writer.write_event(Event::Empty(attr))?;
    Ok(())
}

/// Render results as Torznab-compliant RSS.
pub fn render_rss(results: &[SearchResult], link: &str, echo: RequestEcho) -> Result<String> {
    let mut writer = Writer::new(Vec::new());

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    rss.push_attribute(("xmlns:atom", "http://www.w3.org/2005/Atom"));
    rss.push_attribute(("xmlns:torznab", "http://torznab.com/schemas/2015/feed"));
    writer.write_event(Event::Start(rss))?;

    writer.write_event(Event::Start(BytesStart::new("channel")))?;
    write_text_element(&mut writer, "title", "Tsunagarr")?;
    write_text_element(&mut writer, "description", "Anime Torznab proxy for Sonarr")?;
    write_text_element(&mut writer, "link", link)?;

    for result in results {
        writer.write_event(Event::Start(BytesStart::new("item")))?;

        write_text_element(&mut writer, "title", &result.title)?;
        write_text_element(&mut writer, "guid", &result.guid)?;
        write_text_element(&mut writer, "link", &result.link)?;
        if let Some(info_url) = &result.info_url {
            write_text_element(&mut writer, "comments", info_url)?;
        }
        write_text_element(
            &mut writer,
            "pubDate",
            &result.pub_date.format("%a, %d %b %Y %H:%M:%S +0000").to_string(),
        )?;

        write_torznab_attr(&mut writer, "size", &result.size.to_string())?;
        write_torznab_attr(&mut writer, "seeders", &result.seeders.to_string())?;
        write_torznab_attr(&mut writer, "peers", &result.peers.to_string())?;
        write_torznab_attr(&mut writer, "downloadvolumefactor", "1")?;
        write_torznab_attr(&mut writer, "uploadvolumefactor", "1")?;

        for category in &result.categories {
            write_torznab_attr(&mut writer, "category", &category.to_string())?;
        }

        if let Some(tvdbid) = echo.tvdbid {
            write_torznab_attr(&mut writer, "tvdbid", &tvdbid.to_string())?;
        }
        if let Some(season) = echo.season {
            write_torznab_attr(&mut writer, "season", &season.to_string())?;
        }
        if let Some(episode) = echo.episode {
            write_torznab_attr(&mut writer, "episode", &episode.to_string())?;
        }

        let mut enclosure = BytesStart::new("enclosure");
        enclosure.push_attribute(("url", result.link.as_str()));
        enclosure.push_attribute(("type", "application/x-bittorrent"));
        writer.write_event(Event::Empty(enclosure))?;

        writer.write_event(Event::End(BytesEnd::new("item")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;

    Ok(String::from_utf8(writer.into_inner())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    fn sample_result() -> SearchResult {
        SearchResult {
            title: "[SubsPlease] Sousou no Frieren - 28 (1080p) & more".to_string(),
            guid: "https://nyaa.si/view/1".to_string(),
            link: "https://nyaa.si/download/1.torrent".to_string(),
            info_url: Some("https://nyaa.si/view/1".to_string()),
            pub_date: Utc.with_ymd_and_hms(2024, 3, 29, 12, 0, 0).unwrap(),
            size: 1_500_000_000,
            seeders: 120,
            peers: 4,
            indexer: "nyaa".to_string(),
            categories: SearchResult::default_categories(),
        }
    }

    #[test]
    fn test_render_empty_rss() {
        let xml = render_rss(&[], "http://0.0.0.0:8000", RequestEcho::default()).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<rss"));
        assert!(xml.contains("xmlns:torznab"));
        assert!(xml.contains("<channel>"));
        assert!(!xml.contains("<item>"));
    }

    #[test]
    fn test_render_item_fields() {
        let echo = RequestEcho {
            tvdbid: Some(424_435),
            season: Some(1),
            episode: Some(28),
        };
        let xml = render_rss(&[sample_result()], "http://0.0.0.0:8000", echo).unwrap();

        assert!(xml.contains("<item>"));
        // Text content is XML-escaped
        assert!(xml.contains("&amp; more"));
        assert!(xml.contains("<pubDate>Fri, 29 Mar 2024 12:00:00 +0000</pubDate>"));
        assert!(xml.contains("<comments>https://nyaa.si/view/1</comments>"));
        assert!(xml.contains(r#"<torznab:attr name="size" value="1500000000"/>"#));
        assert!(xml.contains(r#"<torznab:attr name="seeders" value="120"/>"#));
        assert!(xml.contains(r#"<torznab:attr name="peers" value="4"/>"#));
        assert!(xml.contains(r#"<torznab:attr name="downloadvolumefactor" value="1"/>"#));
        assert!(xml.contains(r#"<torznab:attr name="uploadvolumefactor" value="1"/>"#));
        assert!(xml.contains(r#"<torznab:attr name="category" value="5070"/>"#));
        assert!(xml.contains(r#"<torznab:attr name="tvdbid" value="424435"/>"#));
        assert!(xml.contains(r#"<torznab:attr name="season" value="1"/>"#));
        assert!(xml.contains(r#"<torznab:attr name="episode" value="28"/>"#));
        assert!(xml.contains(
            r#"<enclosure url="https://nyaa.si/download/1.torrent" type="application/x-bittorrent"/>"#
        ));
    }

    #[test]
    fn test_rendered_pub_date_is_rfc2822() {
        let xml =
            render_rss(&[sample_result()], "http://0.0.0.0:8000", RequestEcho::default()).unwrap();
        let pub_date = xml
            .split("<pubDate>")
            .nth(1)
            .and_then(|s| s.split("</pubDate>").next())
            .unwrap();
        assert!(chrono::DateTime::parse_from_rfc2822(pub_date).is_ok());
    }

    #[test]
    fn test_caps_xml_shape() {
        assert!(CAPS_XML.contains(r#"<search available="yes" supportedParams="q"/>"#));
        assert!(CAPS_XML.contains(
            r#"<tv-search available="yes" supportedParams="q,tvdbid,season,ep"/>"#
        ));
        assert!(CAPS_XML.contains(r#"<subcat id="5070" name="Anime"/>"#));
        assert!(CAPS_XML.contains(r#"<limits max="100" default="100"/>"#));
    }
}
