//! Cross-module metadata behaviors: disc identity derivation feeding
//! the MusicBrainz query, the fuzzy-title fallback, and user-driven
//! entry merging.

use cdrip::album_extractor::extract_album_title_candidates;
use cdrip::musicbrainz::release_search_query;
use cdrip::tags::{merge_entries, CddbEntry, TagKv, TrackTags};
use cdrip::toc::{cddb_disc_id, musicbrainz_disc_id, DiscToc, TrackInfo};

fn two_track_toc() -> DiscToc {
    DiscToc {
        tracks: vec![
            TrackInfo {
                number: 1,
                start: 0,
                end: 13410,
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
        length_seconds: 34568 / 75,
        ..Default::default()
    }
}

#[test]
fn disc_identity_feeds_the_musicbrainz_query() {
    let toc = two_track_toc();
    let cddb = cddb_disc_id(&toc).unwrap();
    assert!(cddb.starts_with('9'));
    assert!(cddb.chars().all(|c| c.is_ascii_hexdigit()));

    let (mb, leadout) = musicbrainz_disc_id(&toc).unwrap();
    assert_eq!(mb.len(), 28);
    assert_eq!(leadout, 34718);

    let toc_param = toc.mb_toc_param().unwrap();
    assert_eq!(toc_param, "1+2+34718+150+13660");
}

#[test]
fn fuzzy_titles_cluster_into_one_search() {
    let entry = |album: &str| CddbEntry {
        source_label: "gnudb".to_string(),
        album_tags: vec![TagKv::new("ALBUM", album)],
        ..Default::default()
    };
    let a = entry("Best of Foo 1999");
    let b = entry("best-of-foo 1999 (special ed.)");
    let candidates = extract_album_title_candidates(&[&a, &b]);
    assert_eq!(candidates, vec!["best of foo 1999".to_string()]);

    let query = release_search_query(&candidates[0]).unwrap();
    assert_eq!(query, "release:\"best of foo 1999\"");
}

#[test]
fn merge_is_stable_for_every_permutation_of_single_valued_keys() {
    let toc = two_track_toc();
    let make = |label: &str, album: &str, genre: &str| CddbEntry {
        cddb_discid: "901cc02".to_string(),
        source_label: label.to_string(),
        source_url: format!("http://{}", label),
        fetched_at: "2024-01-01T00:00:00+00:00".to_string(),
        album_tags: vec![TagKv::new("ALBUM", album), TagKv::new("GENRE", genre)],
        tracks: vec![
            TrackTags {
                tags: vec![TagKv::new("TITLE", format!("{} one", label))],
            },
            TrackTags::default(),
        ],
        ..Default::default()
    };
    let a = make("one", "Album A", "Rock; Pop");
    let b = make("two", "", "rock, Jazz");
    let c = make("three", "Album C", "");

    for perm in [
        vec![&a, &b, &c],
        vec![&b, &a, &c],
        vec![&c, &b, &a],
        vec![&b, &c, &a],
    ] {
        let merged = merge_entries(&toc, &perm).unwrap();
        // First non-empty ALBUM in iteration order wins.
        let expected_album = perm
            .iter()
            .map(|e| e.album_tag("ALBUM"))
            .find(|v| !v.is_empty())
            .unwrap();
        assert_eq!(merged.album_tag("ALBUM"), expected_album);
        // Multi-valued keys: order-preserving union, case-insensitive dedup.
        let genre = merged.album_tag("GENRE");
        let tokens: Vec<&str> = genre.split(';').collect();
        let mut lowered: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
        lowered.sort();
        lowered.dedup();
        assert_eq!(lowered.len(), tokens.len(), "duplicate genre in {}", genre);
        for token in ["rock", "pop", "jazz"] {
            assert!(
                genre.to_lowercase().contains(token),
                "{} missing from {}",
                token,
                genre
            );
        }
    }

    // Running the same merge twice yields identical output.
    let once = merge_entries(&toc, &[&a, &b, &c]).unwrap();
    let twice = merge_entries(&toc, &[&a, &b, &c]).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn merged_entry_keeps_track_slots_aligned() {
    let toc = two_track_toc();
    let mut a = CddbEntry {
        cddb_discid: "901cc02".to_string(),
        source_label: "one".to_string(),
        source_url: "http://one".to_string(),
        tracks: vec![TrackTags::default(), TrackTags::default()],
        ..Default::default()
    };
    a.tracks[1].tags.push(TagKv::new("TITLE", "Outro"));
    let merged = merge_entries(&toc, &[&a]).unwrap();
    assert_eq!(merged.tracks.len(), 2);
    assert_eq!(merged.track_tag(0, "TITLE"), "");
    assert_eq!(merged.track_tag(1, "TITLE"), "Outro");
}
