//! Legacy CDDB (freedb/gnudb) client over the HTTP CGI transport.
//!
//! Speaks protocol level 6 (UTF-8): one `cddb query` against the disc's
//! offsets, then one `cddb read` per match.

use crate::http::{self, FetchError, RetryPolicy};
use crate::tags::{current_timestamp_iso, CddbEntry, TagKv, TrackTags};
use crate::toc::DiscToc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CddbError {
    #[error("{0}")]
    Http(#[from] FetchError),
    #[error("CDDB response parse error: {0}")]
    Parse(String),
    #[error("CDDB query failed: {0}")]
    Query(String),
}

/// One configured CDDB endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CddbServer {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub label: String,
}

impl CddbServer {
    /// Base URL recorded as the entry's source, port elided for the
    /// standard HTTP(S) ports.
    pub fn source_url(&self) -> String {
        if self.port == 80 || self.port == 443 {
            format!("http://{}{}", self.host, self.path)
        } else {
            format!("http://{}:{}{}", self.host, self.port, self.path)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CddbMatch {
    category: String,
    discid: String,
}

fn hello_param() -> String {
    format!("hello=cdrip+localhost+cdrip+{}&proto=6", env!("CARGO_PKG_VERSION"))
}

fn query_url(server: &CddbServer, toc: &DiscToc, discid: &str) -> String {
    let mut cmd = format!("cddb+query+{}+{}", discid, toc.tracks.len());
    for track in &toc.tracks {
        cmd.push('+');
        cmd.push_str(&track.start.to_string());
    }
    cmd.push('+');
    cmd.push_str(&toc.length_seconds.to_string());
    format!(
        "http://{}:{}{}?cmd={}&{}",
        server.host,
        server.port,
        server.path,
        cmd,
        hello_param()
    )
}

fn read_url(server: &CddbServer, m: &CddbMatch) -> String {
    format!(
        "http://{}:{}{}?cmd=cddb+read+{}+{}&{}",
        server.host,
        server.port,
        server.path,
        m.category,
        m.discid,
        hello_param()
    )
}

fn parse_match_line(line: &str) -> Option<CddbMatch> {
    let mut parts = line.splitn(3, ' ');
    let category = parts.next()?.trim();
    let discid = parts.next()?.trim();
    if category.is_empty() || discid.is_empty() {
        return None;
    }
    Some(CddbMatch {
        category: category.to_string(),
        discid: discid.to_string(),
    })
}

/// Parse a `cddb query` response into the list of matched discs.
fn parse_query_response(body: &str) -> Result<Vec<CddbMatch>, CddbError> {
    let mut lines = body.lines();
    let status_line = lines
        .next()
        .ok_or_else(|| CddbError::Parse("empty query response".to_string()))?;
    let code = status_line
        .split_whitespace()
        .next()
        .unwrap_or_default();

    match code {
        // Exact match: "200 category discid title..."
        "200" => {
            let rest = status_line.splitn(2, ' ').nth(1).unwrap_or_default();
            Ok(parse_match_line(rest).into_iter().collect())
        }
        // Multiple (210) / inexact (211) matches, one per line until ".".
        "210" | "211" => {
            let mut matches = Vec::new();
            for line in lines {
                let line = line.trim_end();
                if line == "." {
                    break;
                }
                if let Some(m) = parse_match_line(line) {
                    matches.push(m);
                }
            }
            Ok(matches)
        }
        // No match is a normal outcome, not an error.
        "202" => Ok(Vec::new()),
        _ => Err(CddbError::Query(format!(
            "unexpected response: {}",
            status_line
        ))),
    }
}

#[derive(Debug, Default)]
struct CddbRecord {
    artist: String,
    album: String,
    genre: String,
    year: i32,
    track_titles: Vec<(usize, String)>,
}

/// Parse a `cddb read` response body (DTITLE/DYEAR/DGENRE/TTITLEn
/// key-value lines, continuation lines concatenated).
fn parse_read_response(body: &str) -> Result<CddbRecord, CddbError> {
    let mut lines = body.lines();
    let status_line = lines
        .next()
        .ok_or_else(|| CddbError::Parse("empty read response".to_string()))?;
    if !status_line.starts_with("210") {
        return Err(CddbError::Query(format!(
            "unexpected response: {}",
            status_line
        )));
    }

    let mut record = CddbRecord::default();
    let mut dtitle = String::new();
    for line in lines {
        let line = line.trim_end();
        if line == "." {
            break;
        }
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            "DTITLE" => dtitle.push_str(value),
            "DYEAR" => record.year = value.trim().parse().unwrap_or(0),
            "DGENRE" => record.genre = value.trim().to_string(),
            _ => {
                if let Some(index) = key.strip_prefix("TTITLE") {
                    if let Ok(index) = index.parse::<usize>() {
                        match record.track_titles.iter_mut().find(|(i, _)| *i == index) {
                            Some((_, title)) => title.push_str(value),
                            None => record.track_titles.push((index, value.to_string())),
                        }
                    }
                }
            }
        }
    }

    // DTITLE is "artist / album"; a missing separator means both.
    match dtitle.split_once(" / ") {
        Some((artist, album)) => {
            record.artist = artist.trim().to_string();
            record.album = album.trim().to_string();
        }
        None => {
            record.artist = dtitle.trim().to_string();
            record.album = dtitle.trim().to_string();
        }
    }
    Ok(record)
}

fn entry_from_record(
    server: &CddbServer,
    toc: &DiscToc,
    discid: &str,
    record: CddbRecord,
) -> CddbEntry {
    let mut album_tags = Vec::new();
    album_tags.push(TagKv::new("ARTIST", record.artist));
    album_tags.push(TagKv::new("ALBUM", record.album));
    album_tags.push(TagKv::new("GENRE", record.genre));
    if record.year > 0 {
        album_tags.push(TagKv::new("DATE", record.year.to_string()));
    }

    let mut tracks: Vec<TrackTags> = vec![TrackTags::default(); toc.tracks.len()];
    for (i, track) in tracks.iter_mut().enumerate() {
        let title = record
            .track_titles
            .iter()
            .find(|(index, _)| *index == i)
            .map(|(_, title)| title.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("Track {}", i + 1));
        track.tags.push(TagKv::new("TITLE", title));
    }

    CddbEntry {
        cddb_discid: discid.to_string(),
        source_label: server.label.clone(),
        source_url: server.source_url(),
        fetched_at: current_timestamp_iso(),
        album_tags,
        tracks,
        ..Default::default()
    }
}

/// Query one CDDB server for the disc and read every matched record.
pub async fn fetch_entries(toc: &DiscToc, server: &CddbServer) -> Result<Vec<CddbEntry>, CddbError> {
    if toc.tracks.is_empty() {
        return Err(CddbError::Query("invalid TOC".to_string()));
    }
    let discid = toc.cddb_discid.clone().unwrap_or_default();
    if discid.is_empty() {
        return Err(CddbError::Query("disc has no CDDB id".to_string()));
    }

    let url = query_url(server, toc, &discid);
    info!("💿 CDDB: querying {}", server.label);
    let body = http::get_bytes(&server.label, &url, "text/plain", &RetryPolicy::default()).await?;
    let text = String::from_utf8_lossy(&body.bytes).into_owned();
    let matches = parse_query_response(&text)?;
    debug!("{} matched {} disc(s)", server.label, matches.len());

    let mut entries = Vec::new();
    for m in matches {
        let url = read_url(server, &m);
        let body =
            http::get_bytes(&server.label, &url, "text/plain", &RetryPolicy::default()).await?;
        let text = String::from_utf8_lossy(&body.bytes).into_owned();
        let record = parse_read_response(&text)?;
        entries.push(entry_from_record(server, toc, &discid, record));
    }
    Ok(entries)
}
