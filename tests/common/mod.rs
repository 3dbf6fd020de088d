//! Test helpers: tiny scripted HTTP servers standing in for Nyaa, TheXEM
//! and Sonarr.

#![allow(dead_code)]

use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub struct MockRoute {
    pub path_prefix: &'static str,
    pub content_type: &'static str,
    pub body: String,
}

fn http_response(status: u16, content_type: &str, body: &str) -> String {
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        _ => "Unknown",
    };
    format!(
        "HTTP/1.1 {status} {reason}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn request_target(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .lines()
        .next()
        .unwrap_or("")
        .split(' ')
        .nth(1)
        .unwrap_or("")
        .to_string()
}

/// Serve routed responses forever; every request target is reported on the
/// returned channel.
pub async fn spawn_routed_server(
    routes: Vec<MockRoute>,
) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let mut buf = vec![0u8; 16384];
            let n = socket.read(&mut buf).await.unwrap_or(0);
            let target = request_target(&buf[..n]);
            let _ = tx.send(target.clone());

            let response = routes
                .iter()
                .find(|r| target.starts_with(r.path_prefix))
                .map_or_else(
                    || http_response(404, "text/plain", ""),
                    |r| http_response(200, r.content_type, &r.body),
                );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (addr, rx)
}

/// Serve a fixed sequence of `(status, body)` responses, then stop accepting.
pub async fn spawn_sequence_server(
    responses: Vec<(u16, String)>,
) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for (status, body) in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let mut buf = vec![0u8; 16384];
            let n = socket.read(&mut buf).await.unwrap_or(0);
            let _ = tx.send(request_target(&buf[..n]));

            let response = http_response(status, "application/xml", &body);
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (addr, rx)
}

/// Drain everything currently buffered on a capture channel.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
    let mut targets = Vec::new();
    while let Ok(target) = rx.try_recv() {
        targets.push(target);
    }
    targets
}

/// A small Nyaa RSS feed with two items.
pub fn sample_nyaa_rss() -> String {
    r#"<?xml version="1.0" encoding="utf-8"?>
<rss version="2.0" xmlns:nyaa="https://nyaa.si/xmlns/nyaa">
  <channel>
    <title>Nyaa - Home - Torrent File RSS</title>
    <item>
      <title>[SubsPlease] Sousou no Frieren - 28 (1080p) [ABCD1234].mkv</title>
      <link>https://nyaa.si/download/1.torrent</link>
      <guid isPermaLink="true">https://nyaa.si/view/1</guid>
      <pubDate>Fri, 29 Mar 2024 12:00:00 -0000</pubDate>
      <nyaa:seeders>120</nyaa:seeders>
      <nyaa:leechers>4</nyaa:leechers>
      <nyaa:size>1.4 GiB</nyaa:size>
      <nyaa:categoryId>1_2</nyaa:categoryId>
      <nyaa:infoHash>0123456789abcdef0123456789abcdef01234567</nyaa:infoHash>
      <nyaa:trusted>Yes</nyaa:trusted>
    </item>
    <item>
      <title>[Erai-raws] Sousou no Frieren - 28 [720p]</title>
      <link>https://nyaa.si/download/2.torrent</link>
      <guid isPermaLink="true">https://nyaa.si/view/2</guid>
      <pubDate>Fri, 29 Mar 2024 13:00:00 -0000</pubDate>
      <nyaa:seeders>300</nyaa:seeders>
      <nyaa:leechers>12</nyaa:leechers>
      <nyaa:size>700.0 MiB</nyaa:size>
      <nyaa:categoryId>1_2</nyaa:categoryId>
      <nyaa:infoHash>89abcdef0123456789abcdef0123456789abcdef</nyaa:infoHash>
      <nyaa:trusted>No</nyaa:trusted>
    </item>
  </channel>
</rss>"#
        .to_string()
}

/// An empty Nyaa RSS feed.
pub fn empty_nyaa_rss() -> String {
    r#"<?xml version="1.0" encoding="utf-8"?>
<rss version="2.0" xmlns:nyaa="https://nyaa.si/xmlns/nyaa">
  <channel>
    <title>Nyaa - Home - Torrent File RSS</title>
  </channel>
</rss>"#
        .to_string()
}
