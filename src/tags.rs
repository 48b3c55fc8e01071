//! Metadata entry model shared by all providers, plus the entry merge
//! used when the user selects several candidates for one disc.

use crate::toc::DiscToc;
use std::collections::BTreeMap;
use std::collections::HashSet;

pub const MAX_FLAC_PICTURE_BYTES: usize = 16 * 1024 * 1024 - 1;

/// One uppercase key / value pair from a metadata source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagKv {
    pub key: String,
    pub value: String,
}

impl TagKv {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into().to_uppercase(),
            value: value.into(),
        }
    }
}

/// Tags for a single track slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackTags {
    pub tags: Vec<TagKv>,
}

/// Front-cover artwork attached to an entry. `available` is set when the
/// provider's metadata promises artwork even before any bytes are
/// downloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub is_front: bool,
    pub available: bool,
}

impl CoverArt {
    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }
}

/// One metadata candidate for a disc, produced by a provider client or
/// the no-metadata fallback stub.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CddbEntry {
    pub cddb_discid: String,
    pub source_label: String,
    pub source_url: String,
    /// ISO-8601 timestamp with offset of when the entry was fetched
    pub fetched_at: String,
    pub album_tags: Vec<TagKv>,
    pub tracks: Vec<TrackTags>,
    pub cover_art: CoverArt,
}

impl CddbEntry {
    /// Look up an album-level tag, empty string when absent.
    pub fn album_tag(&self, key: &str) -> String {
        let key = key.to_uppercase();
        self.album_tags
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.clone())
            .unwrap_or_default()
    }

    /// Look up a track-level tag by zero-based track index.
    pub fn track_tag(&self, track_index: usize, key: &str) -> String {
        let key = key.to_uppercase();
        self.tracks
            .get(track_index)
            .and_then(|tt| tt.tags.iter().find(|kv| kv.key == key))
            .map(|kv| kv.value.clone())
            .unwrap_or_default()
    }

    /// Entries with no source label or URL came from the fallback stub
    /// rather than a real provider.
    pub fn ignores_source(&self) -> bool {
        self.source_label.is_empty() && self.source_url.is_empty()
    }

    /// Album title with the medium suffix used for candidate display.
    pub fn album_media_title(&self) -> String {
        let album = self.album_tag("ALBUM");
        let disctotal: i64 = self
            .album_tag("DISCTOTAL")
            .trim()
            .parse()
            .unwrap_or_default();
        if disctotal <= 1 {
            return album;
        }
        let medium_title = self.album_tag("MUSICBRAINZ_MEDIUMTITLE");
        let medium_title = medium_title.trim();
        if !medium_title.is_empty() {
            if album.is_empty() {
                return medium_title.to_string();
            }
            return format!("{} {}", album, medium_title);
        }
        let discnumber = self.album_tag("DISCNUMBER");
        let discnumber = discnumber.trim();
        if discnumber.is_empty() {
            return album;
        }
        if album.is_empty() {
            return format!("CD{}", discnumber);
        }
        format!("{} CD{}", album, discnumber)
    }
}

/// Current local time as ISO-8601 with UTC offset, the format stored in
/// CDDB_DATE tags.
pub fn current_timestamp_iso() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

/// Stub entry used when no provider produced anything usable: empty
/// album tags and "Track N" titles so the rip can still proceed.
pub fn fallback_entry(toc: &DiscToc) -> CddbEntry {
    let mut entry = CddbEntry {
        cddb_discid: toc
            .cddb_discid
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
        source_label: String::new(),
        source_url: String::new(),
        fetched_at: current_timestamp_iso(),
        ..Default::default()
    };
    for (i, _) in toc.tracks.iter().enumerate() {
        entry.tracks.push(TrackTags {
            tags: vec![TagKv::new("TITLE", format!("Track {}", i + 1))],
        });
    }
    entry
}

/// Tags whose values may hold several `,`/`;` separated tokens.
fn is_multi_value_key(key_upper: &str) -> bool {
    key_upper == "GENRE" || key_upper == "ISRC"
}

pub fn split_multi_values(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Interleave per-entry token lists position by position, dropping
/// case-insensitive duplicates, and rejoin with ";".
fn merge_multi_values_zip(per_entry_tokens: &[Vec<String>]) -> String {
    let max_len = per_entry_tokens.iter().map(Vec::len).max().unwrap_or(0);
    let mut merged: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for pos in 0..max_len {
        for tokens in per_entry_tokens {
            let Some(token) = tokens.get(pos) else {
                continue;
            };
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if seen.insert(token.to_lowercase()) {
                merged.push(token.to_string());
            }
        }
    }
    merged.join(";")
}

fn first_non_empty(values: impl Iterator<Item = String>) -> String {
    values
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
        .unwrap_or_default()
}

fn merge_tag_slice(entry_tags: &[Vec<&TagKv>]) -> Vec<TagKv> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for tags in entry_tags {
        for kv in tags {
            if kv.key.is_empty() || is_multi_value_key(&kv.key) {
                continue;
            }
            let value = kv.value.trim();
            if value.is_empty() || merged.contains_key(&kv.key) {
                continue;
            }
            merged.insert(kv.key.clone(), value.to_string());
        }
    }
    for multi_key in ["GENRE", "ISRC"] {
        let per_entry_tokens: Vec<Vec<String>> = entry_tags
            .iter()
            .map(|tags| {
                tags.iter()
                    .filter(|kv| kv.key == multi_key)
                    .flat_map(|kv| split_multi_values(&kv.value))
                    .collect()
            })
            .collect();
        let value = merge_multi_values_zip(&per_entry_tokens);
        if !value.is_empty() {
            merged.insert(multi_key.to_string(), value);
        }
    }
    merged
        .into_iter()
        .map(|(key, value)| TagKv { key, value })
        .collect()
}

/// Merge several user-selected entries into one virtual entry. First
/// non-empty value wins per single-valued key in selection order;
/// GENRE/ISRC are interleaved and deduplicated case-insensitively.
pub fn merge_entries(toc: &DiscToc, selected: &[&CddbEntry]) -> Option<CddbEntry> {
    if selected.is_empty() {
        return None;
    }

    let mut discid = first_non_empty(selected.iter().map(|e| e.cddb_discid.clone()));
    if discid.is_empty() {
        discid = toc.cddb_discid.clone().unwrap_or_default();
    }
    if discid.is_empty() {
        discid = "unknown".to_string();
    }

    let mut merged = CddbEntry {
        cddb_discid: discid,
        source_label: first_non_empty(selected.iter().map(|e| e.source_label.clone())),
        source_url: first_non_empty(selected.iter().map(|e| e.source_url.clone())),
        fetched_at: first_non_empty(selected.iter().map(|e| e.fetched_at.clone())),
        ..Default::default()
    };

    let album_slices: Vec<Vec<&TagKv>> = selected
        .iter()
        .map(|e| e.album_tags.iter().collect())
        .collect();
    merged.album_tags = merge_tag_slice(&album_slices);

    for ti in 0..toc.tracks.len() {
        let track_slices: Vec<Vec<&TagKv>> = selected
            .iter()
            .map(|e| {
                e.tracks
                    .get(ti)
                    .map(|tt| tt.tags.iter().collect())
                    .unwrap_or_default()
            })
            .collect();
        merged.tracks.push(TrackTags {
            tags: merge_tag_slice(&track_slices),
        });
    }

    Some(merged)
}
