//! Playlist-redirect recovery.
//!
//! Some catalogue "stream" URLs point at a playlist file rather than audio.
//! When the engine rejects one as an unrecognized format, the URL is fetched
//! here, the playlist format is detected and the entry URIs are extracted so
//! the first one can be played instead.

use std::io::Read;
use std::sync::OnceLock;
use std::time::Duration;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tracing::{debug, info};

use crate::error::{Result, ServiceError};

/// Largest playlist body read before giving up.  Real playlists are a few
/// hundred bytes; anything larger is an audio stream.
const MAX_PLAYLIST_BYTES: u64 = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistFormat {
    M3u,
    Pls,
    Xspf,
    Asx,
    Unknown,
}

fn format_from_content_type(content_type: &str) -> PlaylistFormat {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    match mime.as_str() {
        "audio/x-scpls" | "audio/scpls" => PlaylistFormat::Pls,
        "audio/x-mpegurl" | "audio/mpegurl" | "application/x-mpegurl" => PlaylistFormat::M3u,
        "application/xspf+xml" => PlaylistFormat::Xspf,
        "video/x-ms-asf" | "video/x-ms-asx" | "audio/x-ms-wax" => PlaylistFormat::Asx,
        _ => PlaylistFormat::Unknown,
    }
}

fn format_from_url(url: &str) -> PlaylistFormat {
    let lower = url.to_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or("");
    if path.ends_with(".pls") {
        PlaylistFormat::Pls
    } else if path.ends_with(".m3u") {
        PlaylistFormat::M3u
    } else if path.ends_with(".xspf") {
        PlaylistFormat::Xspf
    } else if path.ends_with(".asx") || path.ends_with(".wax") {
        PlaylistFormat::Asx
    } else {
        PlaylistFormat::Unknown
    }
}

fn format_from_body(body: &str) -> PlaylistFormat {
    let head = body.trim_start().to_lowercase();
    if head.starts_with("[playlist]") {
        PlaylistFormat::Pls
    } else if head.starts_with("#extm3u") {
        PlaylistFormat::M3u
    } else if head.contains("<playlist") && head.contains("<tracklist") {
        PlaylistFormat::Xspf
    } else if head.contains("<asx") {
        PlaylistFormat::Asx
    } else if head.lines().any(|l| l.trim().starts_with("http")) {
        PlaylistFormat::M3u
    } else {
        PlaylistFormat::Unknown
    }
}

/// Detect the playlist format from the response content type, then the URL
/// extension, then the body itself.
pub fn detect_format(url: &str, content_type: Option<&str>, body: &str) -> PlaylistFormat {
    [
        content_type.map_or(PlaylistFormat::Unknown, format_from_content_type),
        format_from_url(url),
        format_from_body(body),
    ]
    .into_iter()
    .find(|f| *f != PlaylistFormat::Unknown)
    .unwrap_or(PlaylistFormat::Unknown)
}

/// Extract the base URL (directory) from a full URL
fn base_url(url: &str) -> &str {
    url.rsplit_once('/').map(|(base, _)| base).unwrap_or("")
}

fn make_absolute(uri: &str, base: &str) -> String {
    if uri.contains("://") {
        uri.to_string()
    } else {
        format!("{}/{}", base, uri.trim_start_matches('/'))
    }
}

/// `FileN=` entries of a PLS playlist, in file order.
pub fn parse_pls(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once('=')?;
            let key = key.trim().to_lowercase();
            let value = value.trim();
            (key.starts_with("file") && !value.is_empty()).then(|| value.to_string())
        })
        .collect()
}

/// Non-comment lines of an M3U playlist, made absolute against `base`.
pub fn parse_m3u(body: &str, base: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| make_absolute(line, base))
        .collect()
}

fn unescape_lossy(raw: &str) -> String {
    quick_xml::escape::unescape(raw)
        .map(|text| text.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Value of the `name` attribute of `element`, case-insensitive on the name.
fn attribute_value(element: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref().eq_ignore_ascii_case(name))
        .map(|attr| unescape_lossy(&String::from_utf8_lossy(&attr.value)))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// URIs carried by every `element` of an XML playlist: its `attribute` when
/// one is named, its text otherwise.  Tag and attribute names match
/// case-insensitively.  A malformed document yields what was read before the
/// error.
fn xml_uris(body: &str, element: &[u8], attribute: Option<&[u8]>) -> Vec<String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().check_end_names = false;

    let mut out = Vec::new();
    let mut text: Option<String> = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref().eq_ignore_ascii_case(element) =>
            {
                match attribute {
                    Some(name) => out.extend(attribute_value(&e, name)),
                    None => text = Some(String::new()),
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(text) = text.as_mut() {
                    text.push_str(&unescape_lossy(&String::from_utf8_lossy(&e)));
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(text) = text.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if let Some(text) = text.as_mut() {
                    text.push_str(&unescape_lossy(&format!("&{};", String::from_utf8_lossy(&e))));
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref().eq_ignore_ascii_case(element) => {
                if let Some(uri) = text.take() {
                    let uri = uri.trim();
                    if !uri.is_empty() {
                        out.push(uri.to_string());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                debug!(
                    "playlist: XML error at {}: {}",
                    reader.buffer_position(),
                    e
                );
                break;
            }
            _ => {}
        }
    }
    out
}

/// `<location>` of every XSPF track.
pub fn parse_xspf(body: &str) -> Vec<String> {
    xml_uris(body, b"location", None)
}

/// `href` of every `<ref>` in an ASX playlist.
pub fn parse_asx(body: &str) -> Vec<String> {
    xml_uris(body, b"ref", Some(b"href"))
}

/// Entry URIs of a playlist body in the given format.
pub fn extract_urls(format: PlaylistFormat, url: &str, body: &str) -> Vec<String> {
    match format {
        PlaylistFormat::Pls => parse_pls(body),
        PlaylistFormat::M3u => parse_m3u(body, base_url(url)),
        PlaylistFormat::Xspf => parse_xspf(body),
        PlaylistFormat::Asx => parse_asx(body),
        PlaylistFormat::Unknown => Vec::new(),
    }
}

/// Blocking playlist downloader.  Run on the worker pool; the client is
/// built there on first use.
pub struct PlaylistFetcher {
    timeout: Duration,
    client: OnceLock<reqwest::blocking::Client>,
}

impl PlaylistFetcher {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("openradio/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .build()?;
        Ok(self.client.get_or_init(|| client))
    }

    /// Fetch `url` and return the URIs of the playlist it serves.
    pub fn extract_urls(&self, url: &str) -> Result<Vec<String>> {
        let response = self.client()?.get(url).send()?;
        if !response.status().is_success() {
            return Err(ServiceError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut raw = Vec::new();
        response.take(MAX_PLAYLIST_BYTES).read_to_end(&mut raw)?;
        let body = String::from_utf8_lossy(&raw);

        let format = detect_format(url, content_type.as_deref(), &body);
        debug!("playlist: {} detected as {:?}", url, format);
        if format == PlaylistFormat::Unknown {
            return Err(ServiceError::Playlist(format!("unrecognized playlist at {url}")));
        }

        let urls = extract_urls(format, url, &body);
        info!("Found {} streams associated with {}", urls.len(), url);
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pls_entries_in_order() {
        let body = "[playlist]\nNumberOfEntries=2\nFile1=http://a/1\nTitle1=One\nfile2=http://a/2\n";
        assert_eq!(parse_pls(body), vec!["http://a/1", "http://a/2"]);
    }

    #[test]
    fn test_m3u_skips_comments_and_resolves_relative() {
        let body = "#EXTM3U\n#EXTINF:-1,Radio\nhttp://a/live\n\nrelay/low.mp3\n";
        assert_eq!(
            parse_m3u(body, "http://host/dir"),
            vec!["http://a/live", "http://host/dir/relay/low.mp3"]
        );
    }

    #[test]
    fn test_xspf_locations() {
        let body = r#"<?xml version="1.0"?>
            <playlist version="1" xmlns="http://xspf.org/ns/0/">
              <trackList>
                <track><location>http://x/1?a=1&amp;b=2</location></track>
                <track><Location> http://x/2 </Location></track>
              </trackList>
            </playlist>"#;
        assert_eq!(parse_xspf(body), vec!["http://x/1?a=1&b=2", "http://x/2"]);
    }

    #[test]
    fn test_asx_refs() {
        let body = r#"<ASX version="3.0"><Entry><REF HREF="mms://a/1" /></Entry>
            <Entry><ref href='http://a/2'/></Entry></ASX>"#;
        assert_eq!(parse_asx(body), vec!["mms://a/1", "http://a/2"]);
    }

    #[test]
    fn test_xspf_location_in_cdata() {
        let body = r#"<playlist><trackList><track>
            <location><![CDATA[http://x/a?b=1&c=2]]></location>
            </track></trackList></playlist>"#;
        assert_eq!(parse_xspf(body), vec!["http://x/a?b=1&c=2"]);
    }

    #[test]
    fn test_xspf_character_references_are_resolved() {
        let body = "<playlist><trackList><track><location>http://x/a?b=1&#38;c=2</location></track></trackList></playlist>";
        assert_eq!(parse_xspf(body), vec!["http://x/a?b=1&c=2"]);
    }

    #[test]
    fn test_asx_href_with_spaces_around_equals() {
        let body = r#"<asx version="3.0"><entry><ref href = "http://a/1"/></entry></asx>"#;
        assert_eq!(parse_asx(body), vec!["http://a/1"]);
    }

    #[test]
    fn test_asx_href_entities_are_unescaped() {
        let body = r#"<asx><entry><ref href="http://a/1?x=1&amp;y=2"/></entry></asx>"#;
        assert_eq!(parse_asx(body), vec!["http://a/1?x=1&y=2"]);
    }

    #[test]
    fn test_content_type_wins_over_extension() {
        assert_eq!(
            detect_format("http://a/listen.m3u", Some("audio/x-scpls; charset=utf-8"), ""),
            PlaylistFormat::Pls
        );
    }

    #[test]
    fn test_extension_ignores_query() {
        assert_eq!(
            detect_format("http://a/listen.pls?sid=1", Some("text/plain"), ""),
            PlaylistFormat::Pls
        );
    }

    #[test]
    fn test_body_sniffing() {
        assert_eq!(detect_format("http://a/x", None, "[playlist]\nFile1=http://b"), PlaylistFormat::Pls);
        assert_eq!(detect_format("http://a/x", None, "#EXTM3U\nhttp://b"), PlaylistFormat::M3u);
        assert_eq!(detect_format("http://a/x", None, "http://b/stream\n"), PlaylistFormat::M3u);
        assert_eq!(detect_format("http://a/x", None, "\u{1}\u{2}binary"), PlaylistFormat::Unknown);
    }

    #[test]
    fn test_unknown_format_has_no_urls() {
        assert!(extract_urls(PlaylistFormat::Unknown, "http://a", "http://b").is_empty());
    }
}
