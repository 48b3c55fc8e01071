//! Destination rendering through the rip engine's public surface:
//! layered tags in, sanitised paths out.

use cdrip::cd::ripper::{build_rip_tags, render_destination};
use cdrip::tags::{fallback_entry, CddbEntry, TagKv, TrackTags};
use cdrip::toc::{DiscToc, TrackInfo};
use std::path::Path;

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
        ..Default::default()
    }
}

fn entry() -> CddbEntry {
    CddbEntry {
        cddb_discid: "901cc02".to_string(),
        source_label: "musicbrainz".to_string(),
        source_url: "https://musicbrainz.org".to_string(),
        fetched_at: "2024-02-03T04:05:06+00:00".to_string(),
        album_tags: vec![
            TagKv::new("ALBUM", "The Album"),
            TagKv::new("ARTIST", "The Band"),
            TagKv::new("DATE", "1999"),
        ],
        tracks: vec![
            TrackTags {
                tags: vec![TagKv::new("TITLE", "Intro")],
            },
            TrackTags {
                tags: vec![TagKv::new("TITLE", "Out:ro?")],
            },
        ],
        ..Default::default()
    }
}

fn assert_path_invariants(path: &str) {
    assert!(path.ends_with(".flac"), "missing extension: {}", path);
    assert!(!path.contains(|c: char| c.is_control()));
    for c in "\\:?\"<>|*".chars() {
        assert!(!path.contains(c), "reserved {} in {}", c, path);
    }
    let relative = path.strip_prefix('/').unwrap_or(path);
    for component in relative.split('/') {
        assert!(!component.is_empty(), "empty component in {}", path);
    }
}

#[test]
fn default_template_renders_album_directory() {
    let toc = toc();
    let meta = entry();
    let tags = build_rip_tags(&meta, &toc, &toc.tracks[0], 2);
    let destination = render_destination(
        "{album}/{tracknumber:02d}_{safetitle}.flac",
        &tags,
        &meta,
    );
    assert_eq!(destination.path, "The Album/01_Intro.flac");
    assert_path_invariants(&destination.path);
    assert_eq!(
        Path::new(&destination.path).parent().unwrap(),
        Path::new("The Album")
    );
}

#[test]
fn hostile_titles_never_escape_their_directory() {
    let toc = toc();
    let meta = entry();
    let tags = build_rip_tags(&meta, &toc, &toc.tracks[1], 2);
    for template in [
        "{album}/{tracknumber:02d}_{safetitle}.flac",
        "{artist+album/title:n}",
        "{album}/{title}",
    ] {
        let destination = render_destination(template, &tags, &meta);
        assert_path_invariants(&destination.path);
    }
}

#[test]
fn fallback_entry_renders_track_names() {
    let toc = toc();
    let meta = fallback_entry(&toc);
    let tags = build_rip_tags(&meta, &toc, &toc.tracks[1], 2);
    // The / join inside one token skips the empty ALBUM entirely.
    let destination = render_destination("{album/safetitle}", &tags, &meta);
    assert_eq!(destination.path, "Track 2.flac");
    assert_path_invariants(&destination.path);

    // A literal separator survives an empty directory token, like the
    // template wrote it.
    let destination = render_destination(
        "{album}/{tracknumber:02d}_{safetitle}.flac",
        &tags,
        &meta,
    );
    assert_eq!(destination.path, "/02_Track 2.flac");
}

#[test]
fn mixed_join_operators_with_empty_values() {
    let toc = toc();
    let mut meta = entry();
    meta.album_tags.retain(|kv| kv.key != "ARTIST");
    let tags = build_rip_tags(&meta, &toc, &toc.tracks[0], 2);
    let destination = render_destination("{albumartist+album/safetitle}", &tags, &meta);
    // ALBUMARTIST is absent: the + separator vanishes with it.
    assert_eq!(destination.path, "The Album/Intro.flac");
}

#[test]
fn template_without_tokens_is_a_fixed_name() {
    let toc = toc();
    let meta = entry();
    let tags = build_rip_tags(&meta, &toc, &toc.tracks[0], 2);
    let destination = render_destination("rip_output", &tags, &meta);
    assert_eq!(destination.path, "rip_output.flac");
}
