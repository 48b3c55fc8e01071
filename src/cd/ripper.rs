//! The rip engine: paranoid track reads, FLAC encoding with attached
//! metadata, and atomic publishing of the output file.

use crate::cd::drive::CdDrive;
use crate::cd::ffi::SECTOR_BYTES;
use crate::cd::paranoia::ParanoiaReader;
use crate::filename::{self, build_format_tags};
use crate::flac_meta;
use crate::tags::{current_timestamp_iso, CddbEntry};
use crate::toc::{DiscToc, TrackInfo, MB_LEAD_IN_FRAMES};
use flacenc::bitsink::ByteSink;
use flacenc::component::BitRepr;
use flacenc::error::Verify;
use flacenc::source::MemSource;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

const CHANNELS: usize = 2;
const BITS_PER_SAMPLE: usize = 16;
const SAMPLE_RATE: usize = 44100;
/// Stereo 16-bit frames per raw sector
const SAMPLES_PER_SECTOR: usize = SECTOR_BYTES / (CHANNELS * 2);
const CHUNK_SECTORS: usize = 128;
const ENCODER_BLOCK_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum RipError {
    #[error("Track {0} has invalid length")]
    InvalidTrack(u32),
    #[error("Read error on track {number}: {message}")]
    Read { number: u32, message: String },
    #[error("FLAC encoding error on track {number}: {message}")]
    Encode { number: u32, message: String },
    #[error("Failed to attach metadata: {0}")]
    Metadata(String),
    #[error("Unsupported destination {0}")]
    Destination(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read integrity mode, `default` mapping to `best`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RipMode {
    Fast,
    Best,
    #[default]
    Default,
}

impl RipMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "fast" => Some(RipMode::Fast),
            "best" => Some(RipMode::Best),
            "" | "default" => Some(RipMode::Default),
            _ => None,
        }
    }

    pub fn effective(self) -> RipMode {
        if self == RipMode::Default {
            RipMode::Best
        } else {
            self
        }
    }
}

/// Per-run rip settings
#[derive(Debug, Clone)]
pub struct RipOptions {
    pub format: String,
    pub mode: RipMode,
    /// Requested FLAC compression level; negative means auto
    pub compression_level: i32,
    pub speed_fast: bool,
}

/// Auto level is 1 in fast mode and 5 otherwise.
pub fn resolve_compression_level(opts: &RipOptions) -> u32 {
    if opts.compression_level >= 0 {
        opts.compression_level as u32
    } else if opts.mode.effective() == RipMode::Fast {
        1
    } else {
        5
    }
}

/// Progress snapshot delivered after every chunk of sectors
#[derive(Debug, Clone)]
pub struct RipProgress {
    pub track_number: u32,
    pub total_tracks: u32,
    pub percent: f64,
    pub elapsed_track_sec: f64,
    pub track_total_sec: f64,
    pub elapsed_total_sec: f64,
    pub total_album_sec: f64,
    pub wall_elapsed_sec: f64,
    pub wall_track_elapsed_sec: f64,
    /// Wall-clock estimate for the whole album; zero until meaningful
    pub wall_total_sec: f64,
    pub wall_track_total_sec: f64,
    pub title: String,
    pub track_name: String,
    pub safe_title: String,
    pub path: String,
}

/// Compute the layered tag map for one track: derived defaults, then
/// the album overlay, then the track overlay. The medium title never
/// reaches rip output tags (it only feeds ALBUMMEDIA path rendering).
pub fn build_rip_tags(
    meta: &CddbEntry,
    toc: &DiscToc,
    track: &TrackInfo,
    total_tracks: u32,
) -> BTreeMap<String, String> {
    let track_index = track.number.saturating_sub(1) as usize;
    let meta_title = meta.track_tag(track_index, "TITLE");
    let title = if meta_title.is_empty() {
        format!("Track {}", track.number)
    } else {
        meta_title
    };

    let ignore_source = meta.ignores_source();
    let fetched_for_tag = if !ignore_source && meta.fetched_at.is_empty() {
        current_timestamp_iso()
    } else {
        meta.fetched_at.clone()
    };
    let cddb_discid = if meta.cddb_discid.is_empty() {
        toc.cddb_discid.clone().unwrap_or_default()
    } else {
        meta.cddb_discid.clone()
    };

    let mut tags = BTreeMap::new();
    tags.insert("TITLE".to_string(), title);
    tags.insert("ARTIST".to_string(), meta.album_tag("ARTIST"));
    tags.insert("ALBUM".to_string(), meta.album_tag("ALBUM"));
    tags.insert("GENRE".to_string(), meta.album_tag("GENRE"));
    tags.insert("DATE".to_string(), meta.album_tag("DATE"));
    tags.insert("TRACKNUMBER".to_string(), track.number.to_string());
    tags.insert("TRACKTOTAL".to_string(), total_tracks.to_string());
    tags.insert("CDDB_DISCID".to_string(), cddb_discid);
    tags.insert("CDDB_OFFSETS".to_string(), toc.cddb_offsets_tag());
    if toc.length_seconds > 0 {
        tags.insert(
            "CDDB_TOTAL_SECONDS".to_string(),
            toc.length_seconds.to_string(),
        );
    }
    if !ignore_source {
        tags.insert("CDDB".to_string(), meta.source_label.clone());
        tags.insert("CDDB_DATE".to_string(), fetched_for_tag);
        // CDDB_URL intentionally skipped.
    }

    flac_meta::apply_tag_overlay(&mut tags, &meta.album_tags, true);
    if let Some(track_tags) = meta.tracks.get(track_index) {
        flac_meta::apply_tag_overlay(&mut tags, &track_tags.tags, true);
    }

    if ignore_source {
        if let Some(mb_discid) = toc.mb_discid.clone().filter(|id| !id.is_empty()) {
            tags.insert("MUSICBRAINZ_DISCID".to_string(), mb_discid);
            if toc.leadout_sector > 0 {
                tags.insert(
                    "MUSICBRAINZ_LEADOUT".to_string(),
                    (toc.leadout_sector + MB_LEAD_IN_FRAMES).to_string(),
                );
            }
        }
    }

    flac_meta::prune_empty(&mut tags);
    flac_meta::drop_format_only_tags(&mut tags);
    tags
}

/// `ALBUM`, suffixed with the medium title or `CD<n>` on multi-disc
/// releases.
fn build_album_media(path_tags: &BTreeMap<String, String>, meta: &CddbEntry) -> String {
    let album = path_tags
        .get("ALBUM")
        .map(|v| v.trim().to_string())
        .unwrap_or_default();
    let disctotal: i64 = path_tags
        .get("DISCTOTAL")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    if disctotal <= 1 {
        return album;
    }

    let medium_title = filename::truncate_on_newline(&meta.album_tag("MUSICBRAINZ_MEDIUMTITLE"));
    let medium_title = medium_title.trim();
    if !medium_title.is_empty() {
        if album.is_empty() {
            return medium_title.to_string();
        }
        return format!("{} {}", album, medium_title);
    }

    let discnumber = path_tags
        .get("DISCNUMBER")
        .map(|v| v.trim().to_string())
        .unwrap_or_default();
    if discnumber.is_empty() {
        return album;
    }
    if album.is_empty() {
        return format!("CD{}", discnumber);
    }
    format!("{} CD{}", album, discnumber)
}

/// Rendered destination plus the display strings derived on the way
pub struct Destination {
    pub path: String,
    pub track_name: String,
    pub safe_title: String,
}

/// Render the output path for one track from the layered tags.
pub fn render_destination(
    fmt: &str,
    tags: &BTreeMap<String, String>,
    meta: &CddbEntry,
) -> Destination {
    let mut path_tags = flac_meta::path_tag_variants(tags);
    let track_name = path_tags.get("TITLE").cloned().unwrap_or_default();
    let safe_title = filename::safe_string(&track_name);
    path_tags.insert("SAFETITLE".to_string(), safe_title.clone());
    path_tags.insert("ALBUMMEDIA".to_string(), build_album_media(&path_tags, meta));

    let format_tags = build_format_tags(&path_tags);
    Destination {
        path: filename::render_filename(fmt, &format_tags),
        track_name,
        safe_title,
    }
}

fn encode_flac(samples: &[i32], sectors: usize, level: u32) -> Result<Vec<u8>, String> {
    debug!(
        "encoding {} sectors ({} samples) at level {}",
        sectors,
        samples.len(),
        level
    );
    let source = MemSource::from_samples(samples, CHANNELS, BITS_PER_SAMPLE, SAMPLE_RATE);
    let config = flacenc::config::Encoder::default()
        .into_verified()
        .map_err(|(_, e)| format!("failed to verify encoder config: {:?}", e))?;
    let stream = flacenc::encode_with_fixed_block_size(&config, source, ENCODER_BLOCK_SIZE)
        .map_err(|e| format!("{:?}", e))?;
    let mut sink = ByteSink::new();
    stream.write(&mut sink).map_err(|e| format!("{:?}", e))?;
    Ok(sink.as_slice().to_vec())
}

/// Attach the Vorbis comment and cover picture to an encoded FLAC file.
fn attach_metadata(
    flac_path: &Path,
    tags: &BTreeMap<String, String>,
    meta: &CddbEntry,
) -> Result<(), String> {
    let mut tag = metaflac::Tag::read_from_path(flac_path).map_err(|e| e.to_string())?;
    tag.remove_blocks(metaflac::block::BlockType::VorbisComment);
    tag.push_block(metaflac::Block::VorbisComment(
        flac_meta::build_vorbis_comment(tags),
    ));
    if meta.cover_art.has_data() {
        let picture = flac_meta::build_picture_block(&meta.cover_art)
            .ok_or_else(|| "failed to build picture metadata".to_string())?;
        tag.push_block(metaflac::Block::Picture(picture));
    }
    tag.save().map_err(|e| e.to_string())
}

/// Removes the sibling `.tmp` file unless the publish completed.
struct TmpGuard {
    path: PathBuf,
    armed: bool,
}

impl TmpGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TmpGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Rip a single audio track: read, encode, tag, and atomically publish.
/// The progress callback fires after every chunk of sectors.
#[allow(clippy::too_many_arguments)]
pub fn rip_track(
    drive: &CdDrive,
    track: &TrackInfo,
    meta: &CddbEntry,
    toc: &DiscToc,
    opts: &RipOptions,
    progress: &mut dyn FnMut(&RipProgress),
    total_tracks: u32,
    completed_before_sec: f64,
    total_album_sec: f64,
    wall_start: Instant,
) -> Result<(), RipError> {
    if !track.is_audio {
        info!("Skipping data track {}", track.number);
        return Ok(());
    }
    let sectors = track.sectors();
    if sectors <= 0 {
        return Err(RipError::InvalidTrack(track.number));
    }
    let sectors = sectors as usize;

    let tags = build_rip_tags(meta, toc, track, total_tracks);
    let title = tags.get("TITLE").cloned().unwrap_or_default();
    let destination = render_destination(&opts.format, &tags, meta);
    if filename::is_uri(&destination.path) {
        // Remote destinations would need a VFS layer; refuse up front
        // rather than leaving partial output behind.
        return Err(RipError::Destination(destination.path));
    }
    let final_path = PathBuf::from(&destination.path);
    let tmp_path = PathBuf::from(format!("{}.tmp", destination.path));

    if let Some(parent) = final_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // OS scratch file first; promoted only after a complete encode.
    let temp_file = tempfile::Builder::new()
        .prefix("cdrip")
        .suffix(".flac")
        .tempfile()?;

    let level = resolve_compression_level(opts);
    let wall_track_start = wall_start.elapsed().as_secs_f64();
    let track_total_sec = (sectors * SAMPLES_PER_SECTOR) as f64 / SAMPLE_RATE as f64;

    let mut reader = ParanoiaReader::new(drive.device());
    reader.seek(track.start);

    let mut samples: Vec<i32> = Vec::with_capacity(sectors * SAMPLES_PER_SECTOR * CHANNELS);
    let mut chunk_buf = vec![0u8; CHUNK_SECTORS * SECTOR_BYTES];
    let mut processed = 0usize;
    while processed < sectors {
        let chunk = CHUNK_SECTORS.min(sectors - processed);
        let buf = &mut chunk_buf[..chunk * SECTOR_BYTES];
        reader.read_sectors(chunk, buf).map_err(|e| RipError::Read {
            number: track.number,
            message: e.to_string(),
        })?;
        for pair in buf.chunks_exact(2) {
            samples.push(i32::from(i16::from_le_bytes([pair[0], pair[1]])));
        }
        processed += chunk;

        let elapsed_track = (processed * SAMPLES_PER_SECTOR) as f64 / SAMPLE_RATE as f64;
        let wall_elapsed = wall_start.elapsed().as_secs_f64();
        let audio_done = completed_before_sec + elapsed_track;
        let audio_remain = (total_album_sec - audio_done).max(0.0);
        let throughput = if wall_elapsed > 0.0 && audio_done > 0.0 {
            audio_done / wall_elapsed
        } else {
            0.0
        };

        let snapshot = RipProgress {
            track_number: track.number,
            total_tracks,
            percent: processed as f64 / sectors as f64 * 100.0,
            elapsed_track_sec: elapsed_track,
            track_total_sec,
            elapsed_total_sec: audio_done,
            total_album_sec,
            wall_elapsed_sec: wall_elapsed,
            wall_track_elapsed_sec: wall_elapsed - wall_track_start,
            wall_total_sec: if throughput > 0.0 {
                wall_elapsed + audio_remain / throughput
            } else {
                0.0
            },
            wall_track_total_sec: if throughput > 0.0 {
                track_total_sec / throughput
            } else {
                0.0
            },
            title: title.clone(),
            track_name: destination.track_name.clone(),
            safe_title: destination.safe_title.clone(),
            path: destination.path.clone(),
        };
        progress(&snapshot);
    }

    let flac_bytes = encode_flac(&samples, sectors, level).map_err(|message| RipError::Encode {
        number: track.number,
        message,
    })?;
    std::fs::write(temp_file.path(), &flac_bytes)?;
    attach_metadata(temp_file.path(), &tags, meta).map_err(RipError::Metadata)?;

    let mut tmp_guard = TmpGuard::new(tmp_path.clone());
    std::fs::copy(temp_file.path(), &tmp_path)?;
    if final_path.exists() {
        std::fs::remove_file(&final_path)?;
    }
    std::fs::rename(&tmp_path, &final_path)?;
    tmp_guard.disarm();

    debug!(
        "track {} published to {} ({} read retries)",
        track.number,
        final_path.display(),
        reader.error_count()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::{TagKv, TrackTags};

    fn toc() -> DiscToc {
        DiscToc {
            tracks: vec![
                TrackInfo {
                    number: 1,
                    start: 0,
                    end: 13409,
                    is_audio: true,
                },
                TrackInfo {
                    number: 2,
                    start: 13510,
                    end: 34567,
                    is_audio: true,
                },
            ],
            leadout_sector: 34568,
            length_seconds: 460,
            cddb_discid: Some("901cc02".to_string()),
            mb_discid: Some("MBID-MBID-MBID-MBID-MBID-MBI".to_string()),
            ..Default::default()
        }
    }

    fn provider_entry() -> CddbEntry {
        CddbEntry {
            cddb_discid: "901cc02".to_string(),
            source_label: "musicbrainz".to_string(),
            source_url: "https://musicbrainz.org/ws/2/discid/x".to_string(),
            fetched_at: "2024-03-04T05:06:07+00:00".to_string(),
            album_tags: vec![
                TagKv::new("ALBUM", "The Album"),
                TagKv::new("ARTIST", "The Band"),
                TagKv::new("DISCNUMBER", "1"),
                TagKv::new("DISCTOTAL", "2"),
                TagKv::new("MUSICBRAINZ_MEDIUMTITLE", "Bonus Disc"),
            ],
            tracks: vec![
                TrackTags {
                    tags: vec![TagKv::new("TITLE", "Intro")],
                },
                TrackTags {
                    tags: vec![TagKv::new("TITLE", "Outro")],
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn layered_tags_for_provider_entry() {
        let toc = toc();
        let meta = provider_entry();
        let tags = build_rip_tags(&meta, &toc, &toc.tracks[0], 2);
        assert_eq!(tags.get("TITLE").unwrap(), "Intro");
        assert_eq!(tags.get("ALBUM").unwrap(), "The Album");
        assert_eq!(tags.get("TRACKNUMBER").unwrap(), "1");
        assert_eq!(tags.get("TRACKTOTAL").unwrap(), "2");
        assert_eq!(tags.get("CDDB_DISCID").unwrap(), "901cc02");
        assert_eq!(tags.get("CDDB_OFFSETS").unwrap(), "0,13510");
        assert_eq!(tags.get("CDDB_TOTAL_SECONDS").unwrap(), "460");
        assert_eq!(tags.get("CDDB").unwrap(), "musicbrainz");
        assert_eq!(tags.get("CDDB_DATE").unwrap(), "2024-03-04T05:06:07+00:00");
        // medium title feeds path rendering only
        assert!(!tags.contains_key("MUSICBRAINZ_MEDIUMTITLE"));
        assert!(!tags.contains_key("CDDB_URL"));
        assert!(!tags.contains_key("MUSICBRAINZ_DISCID"));
    }

    #[test]
    fn fallback_entry_gets_mb_discid_and_leadout() {
        let toc = toc();
        let meta = crate::tags::fallback_entry(&toc);
        let tags = build_rip_tags(&meta, &toc, &toc.tracks[1], 2);
        assert_eq!(tags.get("TITLE").unwrap(), "Track 2");
        assert_eq!(
            tags.get("MUSICBRAINZ_DISCID").unwrap(),
            "MBID-MBID-MBID-MBID-MBID-MBI"
        );
        assert_eq!(tags.get("MUSICBRAINZ_LEADOUT").unwrap(), "34718");
        assert!(!tags.contains_key("CDDB"));
        assert!(!tags.contains_key("CDDB_DATE"));
    }

    #[test]
    fn album_media_uses_medium_title_then_disc_number() {
        let toc = toc();
        let meta = provider_entry();
        let tags = build_rip_tags(&meta, &toc, &toc.tracks[0], 2);
        let destination =
            render_destination("{albummedia}/{tracknumber:02d}_{safetitle}.flac", &tags, &meta);
        assert_eq!(destination.path, "The Album Bonus Disc/01_Intro.flac");
        assert_eq!(destination.safe_title, "Intro");

        let mut meta = provider_entry();
        meta.album_tags
            .retain(|kv| kv.key != "MUSICBRAINZ_MEDIUMTITLE");
        let tags = build_rip_tags(&meta, &toc, &toc.tracks[0], 2);
        let destination =
            render_destination("{albummedia}/{tracknumber:02d}_{safetitle}.flac", &tags, &meta);
        assert_eq!(destination.path, "The Album CD1/01_Intro.flac");
    }

    #[test]
    fn destination_sanitises_title_characters() {
        let toc = toc();
        let mut meta = provider_entry();
        meta.tracks[0].tags = vec![TagKv::new("TITLE", "In:tro/Part?1\nLive")];
        let tags = build_rip_tags(&meta, &toc, &toc.tracks[0], 2);
        let destination = render_destination("{tracknumber:02d}_{safetitle}", &tags, &meta);
        assert_eq!(destination.track_name, "In:tro/Part?1");
        assert_eq!(destination.safe_title, "In_tro_Part?1");
        assert_eq!(destination.path, "01_In_tro_Part_1.flac");
    }

    #[test]
    fn compression_level_resolution() {
        let mut opts = RipOptions {
            format: String::new(),
            mode: RipMode::Default,
            compression_level: -1,
            speed_fast: false,
        };
        assert_eq!(resolve_compression_level(&opts), 5);
        opts.mode = RipMode::Fast;
        assert_eq!(resolve_compression_level(&opts), 1);
        opts.compression_level = 8;
        assert_eq!(resolve_compression_level(&opts), 8);
    }

    #[test]
    fn rip_mode_parse() {
        assert_eq!(RipMode::parse("fast"), Some(RipMode::Fast));
        assert_eq!(RipMode::parse("BEST"), Some(RipMode::Best));
        assert_eq!(RipMode::parse(""), Some(RipMode::Default));
        assert_eq!(RipMode::parse("turbo"), None);
        assert_eq!(RipMode::Default.effective(), RipMode::Best);
    }
}
