//! Retagging end to end against handcrafted FLAC files: selection of
//! the track title by TRACKNUMBER, single resulting Vorbis comment
//! block, and idempotence across repeated runs.

mod support;

use cdrip::retag::update_flac_with_entry;
use cdrip::tagged_toc::collect_tagged_tocs;
use cdrip::tags::{CddbEntry, CoverArt, TagKv, TrackTags};

fn flac_with_disc_tags(dir: &std::path::Path, name: &str, extra: &[(&str, &str)]) -> std::path::PathBuf {
    let mut comments: Vec<(&str, &str)> = vec![
        ("CDDB_DISCID", "7a0b2c03"),
        ("CDDB_OFFSETS", "0,13510,27020"),
        ("CDDB_TOTAL_SECONDS", "460"),
        ("TRACKTOTAL", "3"),
    ];
    comments.extend_from_slice(extra);
    let path = dir.join(name);
    support::write_minimal_flac(&path, &comments);
    path
}

fn chosen_entry() -> CddbEntry {
    CddbEntry {
        cddb_discid: "7a0b2c03".to_string(),
        source_label: "gnudb".to_string(),
        source_url: "http://gnudb.gnudb.org/~cddb/cddb.cgi".to_string(),
        fetched_at: "2024-06-07T08:09:10+00:00".to_string(),
        album_tags: vec![
            TagKv::new("ARTIST", "The Band"),
            TagKv::new("ALBUM", "The Album"),
            TagKv::new("GENRE", "Rock"),
            TagKv::new("DATE", "1999"),
        ],
        tracks: vec![
            TrackTags {
                tags: vec![TagKv::new("TITLE", "First")],
            },
            TrackTags {
                tags: vec![TagKv::new("TITLE", "Second")],
            },
            TrackTags {
                tags: vec![TagKv::new("TITLE", "Hello")],
            },
        ],
        ..Default::default()
    }
}

#[test]
fn missing_title_is_filled_from_selected_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = flac_with_disc_tags(dir.path(), "track3.flac", &[("TRACKNUMBER", "3")]);

    let items = collect_tagged_tocs(&path).unwrap();
    assert!(items[0].valid, "reason: {:?}", items[0].reason);
    update_flac_with_entry(&items[0], &chosen_entry()).unwrap();

    let tag = metaflac::Tag::read_from_path(&path).unwrap();
    let vorbis_blocks: Vec<_> = tag
        .blocks()
        .filter(|b| matches!(b, metaflac::Block::VorbisComment(_)))
        .collect();
    assert_eq!(vorbis_blocks.len(), 1);

    let vc = tag.vorbis_comments().unwrap();
    assert_eq!(vc.comments.get("TITLE").unwrap(), &vec!["Hello".to_string()]);
    assert_eq!(
        vc.comments.get("ARTIST").unwrap(),
        &vec!["The Band".to_string()]
    );
    assert_eq!(
        vc.comments.get("TRACKNUMBER").unwrap(),
        &vec!["3".to_string()]
    );
    assert_eq!(
        vc.comments.get("CDDB").unwrap(),
        &vec!["gnudb".to_string()]
    );
    assert!(!vc.comments.contains_key("CDDB_URL"));
}

#[test]
fn retagging_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = flac_with_disc_tags(dir.path(), "track1.flac", &[("TRACKNUMBER", "1")]);

    let items = collect_tagged_tocs(&path).unwrap();
    let entry = chosen_entry();
    update_flac_with_entry(&items[0], &entry).unwrap();
    let first = metaflac::Tag::read_from_path(&path)
        .unwrap()
        .vorbis_comments()
        .cloned()
        .unwrap();

    // Re-collect: the rewritten tags must still describe the same disc.
    let items = collect_tagged_tocs(&path).unwrap();
    assert!(items[0].valid, "reason: {:?}", items[0].reason);
    update_flac_with_entry(&items[0], &entry).unwrap();
    let second = metaflac::Tag::read_from_path(&path)
        .unwrap()
        .vorbis_comments()
        .cloned()
        .unwrap();

    assert_eq!(first.comments, second.comments);
}

#[test]
fn new_cover_replaces_picture_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let path = flac_with_disc_tags(dir.path(), "track2.flac", &[("TRACKNUMBER", "2")]);

    // First pass without cover bytes: no picture block is written.
    let items = collect_tagged_tocs(&path).unwrap();
    update_flac_with_entry(&items[0], &chosen_entry()).unwrap();
    let tag = metaflac::Tag::read_from_path(&path).unwrap();
    assert_eq!(tag.pictures().count(), 0);

    // Second pass with cover bytes: exactly one picture block.
    let mut entry = chosen_entry();
    entry.cover_art = CoverArt {
        data: vec![0xAA; 64],
        mime_type: "image/png".to_string(),
        is_front: true,
        available: true,
    };
    let items = collect_tagged_tocs(&path).unwrap();
    update_flac_with_entry(&items[0], &entry).unwrap();
    let tag = metaflac::Tag::read_from_path(&path).unwrap();
    let pictures: Vec<_> = tag.pictures().collect();
    assert_eq!(pictures.len(), 1);
    assert_eq!(pictures[0].mime_type, "image/png");
    assert_eq!(pictures[0].data, vec![0xAA; 64]);
}

#[test]
fn failed_retag_leaves_the_file_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = flac_with_disc_tags(dir.path(), "victim.flac", &[("TRACKNUMBER", "1")]);
    let before = std::fs::read(&path).unwrap();

    let mut items = collect_tagged_tocs(&path).unwrap();
    items[0].valid = false;
    assert!(update_flac_with_entry(&items[0], &chosen_entry()).is_err());
    assert_eq!(std::fs::read(&path).unwrap(), before);
}
