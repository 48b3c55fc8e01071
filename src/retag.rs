//! In-place retagging of existing FLAC files: the whole Vorbis comment
//! chain is replaced, and the pictures too when new cover bytes exist.

use crate::flac_meta;
use crate::tagged_toc::TaggedToc;
use crate::tags::{current_timestamp_iso, CddbEntry};
use crate::toc::MB_LEAD_IN_FRAMES;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RetagError {
    #[error("Invalid retag target")]
    InvalidTarget,
    #[error("Failed to read FLAC metadata: {0}")]
    Read(String),
    #[error("Failed to build picture block")]
    Picture,
    #[error("Failed to write FLAC metadata: {0}")]
    Write(String),
}

/// Layered tag map for the retag path. Unlike the rip path the medium
/// title is preserved (no path rendering happens here), and the
/// MusicBrainz disc id is written whenever the TOC carries one.
pub fn build_retag_tags(tagged: &TaggedToc, entry: &CddbEntry) -> Option<BTreeMap<String, String>> {
    let toc = tagged.toc.as_ref()?;
    let track_number = tagged.track_number;
    let track_total = toc.tracks.len();

    let fetched_at = if entry.fetched_at.is_empty() {
        current_timestamp_iso()
    } else {
        entry.fetched_at.clone()
    };

    let track_title = if track_number > 0 {
        entry.track_tag(track_number as usize - 1, "TITLE")
    } else {
        String::new()
    };
    let track_title = if track_title.is_empty() {
        format!("Track {}", track_number.max(1))
    } else {
        track_title
    };

    let mut tags = BTreeMap::new();
    tags.insert("TITLE".to_string(), track_title);
    tags.insert("ARTIST".to_string(), entry.album_tag("ARTIST"));
    tags.insert("ALBUM".to_string(), entry.album_tag("ALBUM"));
    tags.insert("GENRE".to_string(), entry.album_tag("GENRE"));
    tags.insert("DATE".to_string(), entry.album_tag("DATE"));
    if track_number > 0 {
        tags.insert("TRACKNUMBER".to_string(), track_number.to_string());
    }
    tags.insert("TRACKTOTAL".to_string(), track_total.to_string());
    tags.insert("CDDB_DISCID".to_string(), entry.cddb_discid.clone());
    tags.insert("CDDB_OFFSETS".to_string(), toc.cddb_offsets_tag());
    tags.insert(
        "CDDB_TOTAL_SECONDS".to_string(),
        toc.length_seconds.to_string(),
    );
    tags.insert("CDDB".to_string(), entry.source_label.clone());
    tags.insert("CDDB_DATE".to_string(), fetched_at);
    // CDDB_URL intentionally skipped.

    if let Some(mb_discid) = toc.mb_discid.clone().filter(|id| !id.is_empty()) {
        tags.insert("MUSICBRAINZ_DISCID".to_string(), mb_discid);
        if toc.leadout_sector > 0 {
            tags.insert(
                "MUSICBRAINZ_LEADOUT".to_string(),
                (toc.leadout_sector + MB_LEAD_IN_FRAMES).to_string(),
            );
        }
    }
    if let Some(mb_release) = toc.mb_release_id.clone().filter(|id| !id.is_empty()) {
        tags.entry("MUSICBRAINZ_RELEASE".to_string())
            .or_insert(mb_release);
    }
    if let Some(mb_medium) = toc.mb_medium_id.clone().filter(|id| !id.is_empty()) {
        tags.entry("MUSICBRAINZ_MEDIUM".to_string())
            .or_insert(mb_medium);
    }

    flac_meta::apply_tag_overlay(&mut tags, &entry.album_tags, false);
    if track_number > 0 {
        if let Some(track_tags) = entry.tracks.get(track_number as usize - 1) {
            flac_meta::apply_tag_overlay(&mut tags, &track_tags.tags, false);
        }
    }

    flac_meta::prune_empty(&mut tags);
    flac_meta::drop_format_only_tags(&mut tags);
    Some(tags)
}

/// Rewrite the file's metadata chain with the chosen entry. Every
/// Vorbis comment block is replaced; existing pictures are replaced
/// only when the entry brings new cover bytes. Failures leave the file
/// untouched.
pub fn update_flac_with_entry(tagged: &TaggedToc, entry: &CddbEntry) -> Result<(), RetagError> {
    if !tagged.valid || tagged.toc.is_none() {
        return Err(RetagError::InvalidTarget);
    }
    let tags = build_retag_tags(tagged, entry).ok_or(RetagError::InvalidTarget)?;
    let replace_picture = entry.cover_art.has_data();

    // Build the new blocks before touching the file so any failure here
    // leaves it unmodified.
    let vorbis = flac_meta::build_vorbis_comment(&tags);
    let picture = if replace_picture {
        Some(flac_meta::build_picture_block(&entry.cover_art).ok_or(RetagError::Picture)?)
    } else {
        None
    };

    let mut tag =
        metaflac::Tag::read_from_path(&tagged.path).map_err(|e| RetagError::Read(e.to_string()))?;
    tag.remove_blocks(metaflac::block::BlockType::VorbisComment);
    if replace_picture {
        tag.remove_blocks(metaflac::block::BlockType::Picture);
    }
    tag.push_block(metaflac::Block::VorbisComment(vorbis));
    if let Some(picture) = picture {
        tag.push_block(metaflac::Block::Picture(picture));
    }
    tag.save().map_err(|e| RetagError::Write(e.to_string()))?;

    debug!("retagged {}", tagged.path.display());
    info!("✓ updated {}", tagged.path.display());
    Ok(())
}
