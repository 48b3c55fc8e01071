//! TOC reconstruction from the Vorbis comments of existing FLAC files,
//! so a library can be retagged offline with the same metadata engine
//! a physical disc would use.

use crate::toc::{self, DiscToc, TrackInfo, FRAMES_PER_SECOND, MB_LEAD_IN_FRAMES};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TaggedTocError {
    #[error("Path not found or unsupported: {0}")]
    BadPath(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A FLAC file with the TOC reconstructed from its tags. Invalid items
/// carry a human-readable reason and are skipped by callers.
#[derive(Debug, Clone)]
pub struct TaggedToc {
    pub path: PathBuf,
    pub toc: Option<DiscToc>,
    pub track_number: u32,
    pub valid: bool,
    pub reason: Option<String>,
}

impl TaggedToc {
    fn invalid(path: PathBuf, reason: &str, track_number: u32) -> Self {
        Self {
            path,
            toc: None,
            track_number,
            valid: false,
            reason: Some(reason.to_string()),
        }
    }
}

fn is_flac_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("flac"))
}

/// Lazily walks a directory tree yielding `.flac` files. A plain file
/// path yields itself when it has the right extension.
struct FlacFiles {
    single: Option<PathBuf>,
    stack: Vec<fs::ReadDir>,
}

impl Iterator for FlacFiles {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        if let Some(single) = self.single.take() {
            return Some(single);
        }
        while let Some(dir) = self.stack.last_mut() {
            match dir.next() {
                Some(Ok(dent)) => {
                    let path = dent.path();
                    if path.is_dir() {
                        if let Ok(sub) = fs::read_dir(&path) {
                            self.stack.push(sub);
                        }
                    } else if is_flac_file(&path) {
                        return Some(path);
                    }
                }
                Some(Err(e)) => {
                    warn!("skipping unreadable directory entry: {}", e);
                }
                None => {
                    self.stack.pop();
                }
            }
        }
        None
    }
}

fn flac_files(root: &Path) -> Result<FlacFiles, TaggedTocError> {
    if root.is_dir() {
        Ok(FlacFiles {
            single: None,
            stack: vec![fs::read_dir(root)?],
        })
    } else if root.is_file() {
        Ok(FlacFiles {
            single: is_flac_file(root).then(|| root.to_path_buf()),
            stack: Vec::new(),
        })
    } else {
        Err(TaggedTocError::BadPath(root.display().to_string()))
    }
}

/// Uppercased Vorbis comments of a FLAC file; multi-valued keys keep
/// their first value.
fn read_vorbis_comments(path: &Path) -> Option<BTreeMap<String, String>> {
    let tag = metaflac::Tag::read_from_path(path).ok()?;
    let vc = tag.vorbis_comments()?;
    let mut out = BTreeMap::new();
    for (key, values) in &vc.comments {
        if let Some(value) = values.first() {
            out.insert(key.to_uppercase(), value.clone());
        }
    }
    Some(out)
}

/// CDDB_OFFSETS values are comma or whitespace separated integers.
fn parse_offsets(value: &str) -> Option<Vec<i64>> {
    let mut offsets = Vec::new();
    for token in value.split([',', ' ', '\t']) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        offsets.push(token.parse().ok()?);
    }
    Some(offsets)
}

fn build_tagged_toc(path: PathBuf) -> TaggedToc {
    let Some(tags) = read_vorbis_comments(&path) else {
        return TaggedToc::invalid(path, "Failed to read Vorbis comments", 0);
    };
    let get = |key: &str| -> String {
        tags.get(key).map(|v| v.trim().to_string()).unwrap_or_default()
    };

    let cddb_discid = get("CDDB_DISCID");
    let offsets_raw = get("CDDB_OFFSETS");
    let total_sec_raw = get("CDDB_TOTAL_SECONDS");
    let tracktotal_raw = get("TRACKTOTAL");
    let tracknumber_raw = get("TRACKNUMBER");
    let mb_release_id = get("MUSICBRAINZ_RELEASE");
    let mb_medium_id = get("MUSICBRAINZ_MEDIUM");
    let mb_discid_tag = get("MUSICBRAINZ_DISCID");
    let mb_leadout_tag = get("MUSICBRAINZ_LEADOUT");

    let track_number: u32 = tracknumber_raw.parse().unwrap_or(0);
    let mut track_total: usize = tracktotal_raw.parse().unwrap_or(0);
    let total_seconds: i64 = total_sec_raw.parse().unwrap_or(0);

    let Some(offsets) = parse_offsets(&offsets_raw) else {
        return TaggedToc::invalid(path, "Invalid CDDB_OFFSETS", track_number);
    };
    if track_total == 0 {
        track_total = offsets.len();
    }
    if cddb_discid.is_empty() || offsets.is_empty() || total_seconds <= 0 || track_total == 0 {
        return TaggedToc::invalid(path, "Missing CDDB tags", track_number);
    }
    if track_total != offsets.len() {
        return TaggedToc::invalid(path, "Offsets count mismatch with track total", track_number);
    }

    let disc_frames = total_seconds * FRAMES_PER_SECOND;
    if disc_frames <= 0 {
        return TaggedToc::invalid(path, "Invalid disc length", track_number);
    }
    if offsets.windows(2).any(|w| w[1] <= w[0]) {
        return TaggedToc::invalid(path, "Offsets are not strictly increasing", track_number);
    }

    let mut toc = DiscToc {
        cddb_discid: Some(cddb_discid),
        mb_release_id: (!mb_release_id.is_empty()).then_some(mb_release_id),
        mb_medium_id: (!mb_medium_id.is_empty()).then_some(mb_medium_id),
        mb_discid: (!mb_discid_tag.is_empty()).then_some(mb_discid_tag),
        length_seconds: total_seconds as u32,
        ..Default::default()
    };

    let has_mb_leadout_tag = !mb_leadout_tag.is_empty();
    if let Ok(mb_leadout) = mb_leadout_tag.parse::<i64>() {
        if mb_leadout > MB_LEAD_IN_FRAMES {
            toc.leadout_sector = mb_leadout - MB_LEAD_IN_FRAMES;
        }
    }
    if toc.leadout_sector <= 0 {
        toc.leadout_sector = disc_frames;
    }

    for (i, &start) in offsets.iter().enumerate() {
        let end = match offsets.get(i + 1) {
            Some(next) => next - 1,
            None => disc_frames - 1,
        };
        if end < start {
            return TaggedToc::invalid(path, "Offsets length inconsistency", track_number);
        }
        toc.tracks.push(TrackInfo {
            number: i as u32 + 1,
            start,
            end,
            is_audio: true,
        });
    }

    // A reconstructed disc id enables MusicBrainz lookups later on.
    if toc.mb_discid.is_none() && has_mb_leadout_tag {
        if let Some((discid, _)) = toc::musicbrainz_disc_id(&toc) {
            toc.mb_discid = Some(discid);
        }
    }

    TaggedToc {
        path,
        toc: Some(toc),
        track_number,
        valid: true,
        reason: None,
    }
}

/// Collect a TaggedToc per `.flac` file under `path` (or for the single
/// file). Invalid files are reported, not skipped, so callers can print
/// the reason.
pub fn collect_tagged_tocs(path: &Path) -> Result<Vec<TaggedToc>, TaggedTocError> {
    let mut items = Vec::new();
    for file in flac_files(path)? {
        debug!("inspecting {}", file.display());
        items.push(build_tagged_toc(file));
    }
    Ok(items)
}
