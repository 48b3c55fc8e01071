//! MusicBrainz web-service client: discid lookup with TOC fuzzy
//! matching, release detail lookup, and by-title release search.

use crate::http::{self, FetchError, RetryPolicy};
use crate::tags::{current_timestamp_iso, CddbEntry, TagKv, TrackTags};
use crate::toc::DiscToc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const MUSICBRAINZ_LABEL: &str = "musicbrainz";

const SEARCH_LIMIT: u32 = 10;

// Includes kept minimal but must contain genres/tags so GENRE can be
// populated. cover-art-archive is not a valid inc for these lookups;
// artwork availability comes from the release response itself.
const DISCID_INC: &str = "recordings+artists+release-groups+genres+tags+url-rels";
const RELEASE_INC: &str =
    "recordings+artists+artist-credits+media+discids+labels+release-groups+genres+tags+url-rels";

#[derive(Debug, Error)]
pub enum MusicBrainzError {
    #[error("MusicBrainz query failed: {0}")]
    Api(String),
    #[error("{0}")]
    Http(#[from] FetchError),
    #[error("MusicBrainz response parse error: {0}")]
    Parse(String),
}

fn get_str<'a>(obj: &'a Value, name: &str) -> &'a str {
    obj.get(name).and_then(Value::as_str).unwrap_or_default()
}

fn get_array<'a>(obj: &'a Value, name: &str) -> Option<&'a Vec<Value>> {
    obj.get(name).and_then(Value::as_array)
}

fn get_i64(obj: &Value, name: &str) -> Option<i64> {
    obj.get(name).and_then(Value::as_i64)
}

fn get_bool(obj: &Value, name: &str) -> bool {
    obj.get(name).and_then(Value::as_bool).unwrap_or(false)
}

/// Concatenate an `artist-credit` array: each credit's name followed by
/// its join phrase.
fn join_artist_credit(credits: Option<&Vec<Value>>) -> String {
    let Some(credits) = credits else {
        return String::new();
    };
    let mut out = String::new();
    for credit in credits {
        let mut name = get_str(credit, "name");
        if name.is_empty() {
            name = credit
                .get("artist")
                .map(|a| get_str(a, "name"))
                .unwrap_or_default();
        }
        out.push_str(name);
        out.push_str(get_str(credit, "joinphrase"));
    }
    out.trim().to_string()
}

fn append_unique(dest: &mut Vec<String>, value: &str) {
    if value.is_empty() {
        return;
    }
    if !dest.iter().any(|v| v == value) {
        dest.push(value.to_string());
    }
}

/// Genres and folksonomy tags from a release or release-group object,
/// order-preserving and deduplicated.
fn collect_genres(obj: &Value, out: &mut Vec<String>) {
    for list_key in ["genres", "tags"] {
        if let Some(items) = get_array(obj, list_key) {
            for item in items {
                append_unique(out, get_str(item, "name"));
            }
        }
    }
    for list_key in ["genre-list", "tag-list"] {
        if let Some(items) = get_array(obj, list_key) {
            for item in items {
                if let Some(name) = item.as_str() {
                    append_unique(out, name);
                }
            }
        }
    }
}

fn extract_discogs_release_id_from_url(url: &str) -> Option<String> {
    let lower = url.to_lowercase();
    let pos = lower.find("/release/")?;
    let digits: String = url[pos + "/release/".len()..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Recover a Discogs release id from the release's URL relationships.
fn extract_discogs_release_id(release: &Value) -> Option<String> {
    let relations = get_array(release, "relations")?;
    for relation in relations {
        if get_str(relation, "type").to_lowercase() != "discogs" {
            continue;
        }
        let resource = relation
            .get("url")
            .map(|u| get_str(u, "resource"))
            .unwrap_or_default();
        if let Some(id) = extract_discogs_release_id_from_url(resource) {
            return Some(id);
        }
    }
    None
}

fn offsets_match(disc: &Value, expected: &[i64]) -> bool {
    let Some(arr) = get_array(disc, "offsets") else {
        return false;
    };
    if expected.is_empty() || arr.len() != expected.len() {
        return false;
    }
    arr.iter()
        .zip(expected)
        .all(|(v, e)| v.as_i64() == Some(*e))
}

fn track_count_matches(medium: &Value, toc: &DiscToc) -> bool {
    matches!(get_i64(medium, "track-count"), Some(count) if count > 0 && count as usize == toc.tracks.len())
}

fn medium_matches(
    medium: &Value,
    toc: &DiscToc,
    offsets: &[i64],
    discid: &str,
    preferred_medium: &str,
) -> bool {
    if !preferred_medium.is_empty() {
        let mid = get_str(medium, "id");
        if !mid.is_empty() && mid == preferred_medium {
            return true;
        }
    }
    if let Some(discs) = get_array(medium, "discs") {
        for disc in discs {
            let did = get_str(disc, "id");
            if !discid.is_empty() && !did.is_empty() && did == discid {
                return true;
            }
            if offsets_match(disc, offsets) {
                return true;
            }
        }
    }
    track_count_matches(medium, toc)
}

/// Pick the media of a release that plausibly correspond to the local
/// disc. An exact disc-id hit trumps everything; then the preferred
/// medium / offsets matches; then any medium with the right track count;
/// finally the first medium as a last resort.
fn select_matching_media<'a>(
    media_array: &'a [Value],
    toc: &DiscToc,
    offsets: &[i64],
    discid: &str,
    preferred_medium: &str,
) -> Vec<&'a Value> {
    if !discid.is_empty() {
        let discid_matches: Vec<&Value> = media_array
            .iter()
            .filter(|medium| {
                get_array(medium, "discs").is_some_and(|discs| {
                    discs.iter().any(|disc| {
                        let did = get_str(disc, "id");
                        !did.is_empty() && did == discid
                    })
                })
            })
            .collect();
        if !discid_matches.is_empty() {
            return discid_matches;
        }
    }

    let mut matches = Vec::new();
    let mut same_tracks = Vec::new();
    for medium in media_array {
        if medium_matches(medium, toc, offsets, discid, preferred_medium) {
            matches.push(medium);
        } else if track_count_matches(medium, toc) {
            same_tracks.push(medium);
        }
    }
    if !matches.is_empty() {
        return matches;
    }
    if !same_tracks.is_empty() {
        return same_tracks;
    }
    media_array.first().into_iter().collect()
}

fn append_tag(tags: &mut Vec<TagKv>, key: &str, value: &str) {
    if !value.is_empty() {
        tags.push(TagKv::new(key, value));
    }
}

fn fill_track_tags(track: &Value, fallback_artist: &str, out: &mut Vec<TagKv>) {
    append_tag(out, "TITLE", get_str(track, "title"));

    let credit_text = join_artist_credit(get_array(track, "artist-credit"));
    let track_artist = if credit_text.is_empty() {
        fallback_artist
    } else {
        credit_text.as_str()
    };
    append_tag(out, "ARTIST", track_artist);
    append_tag(out, "MUSICBRAINZ_TRACKID", get_str(track, "id"));

    if let Some(recording) = track.get("recording") {
        append_tag(out, "MUSICBRAINZ_RECORDINGID", get_str(recording, "id"));
        if let Some(isrcs) = get_array(recording, "isrcs") {
            let values: Vec<&str> = isrcs.iter().filter_map(Value::as_str).collect();
            append_tag(out, "ISRC", &values.join("; "));
        }
        let recording_artist = join_artist_credit(get_array(recording, "artist-credit"));
        // Later ARTIST duplicates win during tag layering.
        append_tag(out, "ARTIST", &recording_artist);
    }
}

/// Build one entry per matching medium of a release JSON object.
fn build_entries_from_release(
    toc: &DiscToc,
    request_url: &str,
    release: &Value,
    offsets: &[i64],
    discid: &str,
    results: &mut Vec<CddbEntry>,
) -> bool {
    let Some(media_array) = get_array(release, "media") else {
        return false;
    };
    let preferred_medium = toc.mb_medium_id.clone().unwrap_or_default();
    let media = select_matching_media(media_array, toc, offsets, discid, &preferred_medium);
    if media.is_empty() {
        return false;
    }

    let release_id = get_str(release, "id");
    let release_title = get_str(release, "title");
    let album_artist = join_artist_credit(get_array(release, "artist-credit"));
    let date = get_str(release, "date");
    let release_country = get_str(release, "country");
    let barcode = get_str(release, "barcode");
    let status = get_str(release, "status");
    let medium_total = media_array.len();
    let release_group = release.get("release-group");
    let release_group_id = release_group.map(|rg| get_str(rg, "id")).unwrap_or_default();
    let discogs_release_id = extract_discogs_release_id(release).unwrap_or_default();

    let mut genres = Vec::new();
    collect_genres(release, &mut genres);
    if let Some(rg) = release_group {
        collect_genres(rg, &mut genres);
    }
    let genre_text = genres.join("; ");

    let has_cover_artwork = release
        .get("cover-art-archive")
        .map(|caa| get_bool(caa, "artwork") || get_bool(caa, "front"))
        .unwrap_or(false);

    for medium in media {
        let mut album_tags = Vec::new();
        let mut track_tags: Vec<Vec<TagKv>> = vec![Vec::new(); toc.tracks.len()];

        append_tag(&mut album_tags, "ALBUM", release_title);
        append_tag(&mut album_tags, "ARTIST", &album_artist);
        append_tag(&mut album_tags, "ALBUMARTIST", &album_artist);
        append_tag(&mut album_tags, "DATE", date);
        append_tag(&mut album_tags, "RELEASECOUNTRY", release_country);
        append_tag(&mut album_tags, "BARCODE", barcode);
        append_tag(&mut album_tags, "RELEASESTATUS", status);
        append_tag(&mut album_tags, "GENRE", &genre_text);
        append_tag(&mut album_tags, "MEDIA", get_str(medium, "format"));
        append_tag(&mut album_tags, "MUSICBRAINZ_RELEASE", release_id);
        append_tag(&mut album_tags, "MUSICBRAINZ_MEDIUM", get_str(medium, "id"));
        append_tag(
            &mut album_tags,
            "MUSICBRAINZ_MEDIUMTITLE",
            get_str(medium, "title"),
        );
        append_tag(
            &mut album_tags,
            "MUSICBRAINZ_RELEASEGROUPID",
            release_group_id,
        );
        append_tag(&mut album_tags, "DISCOGS_RELEASE", &discogs_release_id);
        if let Some(track_total) = get_i64(medium, "track-count").filter(|n| *n > 0) {
            append_tag(&mut album_tags, "TRACKTOTAL", &track_total.to_string());
        }
        if let Some(position) = get_i64(medium, "position").filter(|n| *n > 0) {
            append_tag(&mut album_tags, "DISCNUMBER", &position.to_string());
        }
        if medium_total > 0 {
            append_tag(&mut album_tags, "DISCTOTAL", &medium_total.to_string());
        }

        if let Some(label_info) = get_array(release, "label-info") {
            for li in label_info {
                let label_name = li
                    .get("label")
                    .map(|l| get_str(l, "name"))
                    .unwrap_or_default();
                append_tag(&mut album_tags, "LABEL", label_name);
                append_tag(&mut album_tags, "CATALOGNUMBER", get_str(li, "catalog-number"));
            }
        }

        if let Some(tracks) = get_array(medium, "tracks") {
            let mut fallback_index = 0usize;
            for track in tracks {
                let mut position = get_i64(track, "position").unwrap_or(-1);
                if position <= 0 {
                    position = get_str(track, "number").parse().unwrap_or(-1);
                }
                let index = if position > 0 {
                    (position - 1) as usize
                } else {
                    fallback_index
                };
                if index >= track_tags.len() {
                    continue;
                }
                fill_track_tags(track, &album_artist, &mut track_tags[index]);
                fallback_index += 1;
            }
        }

        let mut entry = CddbEntry {
            cddb_discid: toc.cddb_discid.clone().unwrap_or_default(),
            source_label: MUSICBRAINZ_LABEL.to_string(),
            source_url: request_url.to_string(),
            fetched_at: current_timestamp_iso(),
            album_tags,
            tracks: track_tags
                .into_iter()
                .map(|tags| TrackTags { tags })
                .collect(),
            ..Default::default()
        };
        if has_cover_artwork {
            entry.cover_art.available = true;
            entry.cover_art.is_front = true;
        }
        results.push(entry);
    }

    true
}

/// Deduplication key for MusicBrainz entries: `release[:medium]`.
pub fn release_key(entry: &CddbEntry) -> Option<String> {
    let release = entry.album_tag("MUSICBRAINZ_RELEASE");
    let release = release.trim();
    if release.is_empty() {
        return None;
    }
    let medium = entry.album_tag("MUSICBRAINZ_MEDIUM");
    let medium = medium.trim();
    if medium.is_empty() {
        Some(release.to_string())
    } else {
        Some(format!("{}:{}", release, medium))
    }
}

async fn get_json(url: &str) -> Result<Value, MusicBrainzError> {
    let body =
        http::get_bytes("MusicBrainz", url, "application/json", &RetryPolicy::default()).await?;
    serde_json::from_slice(&body.bytes).map_err(|e| MusicBrainzError::Parse(e.to_string()))
}

fn computed_discid(toc: &DiscToc) -> String {
    if let Some(id) = toc.mb_discid.clone().filter(|id| !id.is_empty()) {
        return id;
    }
    crate::toc::musicbrainz_disc_id(toc)
        .map(|(id, _)| id)
        .unwrap_or_default()
}

async fn fetch_release_details(
    toc: &DiscToc,
    release_id: &str,
    offsets: &[i64],
    discid: &str,
    results: &mut Vec<CddbEntry>,
) -> Result<bool, MusicBrainzError> {
    let url = format!(
        "https://musicbrainz.org/ws/2/release/{}?fmt=json&inc={}",
        release_id, RELEASE_INC
    );
    let root = get_json(&url).await?;
    Ok(build_entries_from_release(
        toc, &url, &root, offsets, discid, results,
    ))
}

/// Query MusicBrainz for the disc described by `toc`. Uses the release
/// endpoint when the TOC already carries a release id, and the discid
/// endpoint otherwise. The `toc` parameter is always included so the
/// server can fuzzy-match unregistered disc ids.
pub async fn fetch_entries(toc: &DiscToc) -> Result<Vec<CddbEntry>, MusicBrainzError> {
    if toc.tracks.is_empty() {
        return Err(MusicBrainzError::Api("invalid TOC".to_string()));
    }
    let (offsets, _) = toc.mb_offsets();
    let discid = computed_discid(toc);
    let release_id = toc.mb_release_id.clone().unwrap_or_default();

    let mut results = Vec::new();

    if !release_id.is_empty() {
        let url = format!(
            "https://musicbrainz.org/ws/2/release/{}?fmt=json&inc={}",
            release_id, RELEASE_INC
        );
        info!("🎵 MusicBrainz: looking up release '{}'", release_id);
        let root = get_json(&url).await?;
        build_entries_from_release(toc, &url, &root, &offsets, &discid, &mut results);
        return Ok(results);
    }

    let toc_param = toc
        .mb_toc_param()
        .ok_or_else(|| MusicBrainzError::Api("unable to build TOC".to_string()))?;
    // Prefer release matches over CD stubs, and allow fuzzy TOC lookups
    // even when a CD stub exists.
    let discid_path = if discid.is_empty() { "-" } else { discid.as_str() };
    let url = format!(
        "https://musicbrainz.org/ws/2/discid/{}?fmt=json&toc={}&cdstubs=no&inc={}",
        discid_path, toc_param, DISCID_INC
    );
    info!("🎵 MusicBrainz: looking up disc id '{}'", discid_path);
    let root = get_json(&url).await?;

    let Some(releases) = get_array(&root, "releases") else {
        return Ok(results);
    };
    let mut any_success = false;
    let mut last_err: Option<MusicBrainzError> = None;
    for release in releases {
        let rid = get_str(release, "id");
        if rid.is_empty() {
            continue;
        }
        match fetch_release_details(toc, rid, &offsets, &discid, &mut results).await {
            Ok(true) => any_success = true,
            Ok(false) => {}
            Err(e) => {
                warn!("MusicBrainz release lookup failed: {}", e);
                last_err = Some(e);
            }
        }
    }
    if !any_success {
        // Fall back to the discid response itself when the per-release
        // detail lookups produced nothing.
        for release in releases {
            build_entries_from_release(toc, &url, release, &offsets, &discid, &mut results);
        }
        if results.is_empty() {
            if let Some(e) = last_err {
                return Err(e);
            }
        }
    }
    debug!("MusicBrainz produced {} entries", results.len());
    Ok(results)
}

/// Lucene query for the by-title fallback search, double quotes removed
/// from the title.
pub fn release_search_query(album_title: &str) -> Option<String> {
    let sanitized: String = album_title.trim().chars().filter(|c| *c != '"').collect();
    if sanitized.is_empty() {
        return None;
    }
    Some(format!("release:\"{}\"", sanitized))
}

fn release_search_url(album_title: &str) -> Option<String> {
    let query = release_search_query(album_title)?;
    let url = reqwest::Url::parse_with_params(
        "https://musicbrainz.org/ws/2/release/",
        &[
            ("fmt", "json"),
            ("limit", &SEARCH_LIMIT.to_string()),
            ("query", &query),
        ],
    )
    .ok()?;
    Some(url.to_string())
}

/// Search releases by album title and build entries from the matches
/// via per-release detail lookups.
pub async fn fetch_entries_by_title(
    toc: &DiscToc,
    album_title: &str,
) -> Result<Vec<CddbEntry>, MusicBrainzError> {
    if toc.tracks.is_empty() {
        return Err(MusicBrainzError::Api("invalid TOC".to_string()));
    }
    let Some(url) = release_search_url(album_title) else {
        return Ok(Vec::new());
    };
    let (offsets, _) = toc.mb_offsets();
    let discid = computed_discid(toc);

    info!("🎵 MusicBrainz: searching releases titled '{}'", album_title);
    let root = get_json(&url).await?;

    let mut results = Vec::new();
    let Some(releases) = get_array(&root, "releases") else {
        return Ok(results);
    };
    let mut any_success = false;
    let mut last_err: Option<MusicBrainzError> = None;
    for release in releases {
        let rid = get_str(release, "id");
        if rid.is_empty() {
            continue;
        }
        match fetch_release_details(toc, rid, &offsets, &discid, &mut results).await {
            Ok(true) => any_success = true,
            Ok(false) => {}
            Err(e) => last_err = Some(e),
        }
    }
    if !any_success {
        if let Some(e) = last_err {
            return Err(e);
        }
    }
    Ok(results)
}
