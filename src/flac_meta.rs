//! Vorbis-comment and PICTURE block construction shared by the rip
//! engine and the retagger.

use crate::cover_pipeline::png_dimensions;
use crate::filename;
use crate::tags::{CoverArt, TagKv, MAX_FLAC_PICTURE_BYTES};
use metaflac::block::{Picture, PictureType, VorbisComment};
use std::collections::BTreeMap;

/// Overlay provider tags onto the layered map: uppercase keys, skip
/// empties, last writer wins.
pub fn apply_tag_overlay(
    map: &mut BTreeMap<String, String>,
    kvs: &[TagKv],
    skip_medium_title: bool,
) {
    for kv in kvs {
        let key = kv.key.to_uppercase();
        if key.is_empty() || kv.value.is_empty() {
            continue;
        }
        if skip_medium_title && key == "MUSICBRAINZ_MEDIUMTITLE" {
            continue;
        }
        map.insert(key, kv.value.clone());
    }
}

pub fn prune_empty(map: &mut BTreeMap<String, String>) {
    map.retain(|_, v| !v.is_empty());
}

/// Keys that only exist to feed path rendering, never written to files.
pub fn drop_format_only_tags(map: &mut BTreeMap<String, String>) {
    map.remove("MUSICBRAINZ_MEDIUMTITLE_RAW");
}

/// Build a Vorbis comment block from the layered tag map.
pub fn build_vorbis_comment(tags: &BTreeMap<String, String>) -> VorbisComment {
    let mut vc = VorbisComment::new();
    for (key, value) in tags {
        vc.comments.insert(key.clone(), vec![value.clone()]);
    }
    vc
}

/// Build a front-cover PICTURE block, validating the size cap and
/// parsing dimensions from the PNG IHDR when applicable. Returns None
/// when there are no bytes to embed or the image is over the cap.
pub fn build_picture_block(art: &CoverArt) -> Option<Picture> {
    if !art.has_data() || art.data.len() > MAX_FLAC_PICTURE_BYTES {
        return None;
    }
    let mut picture = Picture::new();
    picture.picture_type = if art.is_front {
        PictureType::CoverFront
    } else {
        PictureType::Other
    };
    picture.mime_type = if art.mime_type.is_empty() {
        "image/jpeg".to_string()
    } else {
        art.mime_type.clone()
    };
    picture.description = String::new();
    if let Some((width, height, depth)) = png_dimensions(&art.data) {
        picture.width = width;
        picture.height = height;
        picture.depth = depth;
    }
    picture.data = art.data.clone();
    Some(picture)
}

/// Newline-truncated copies of all tags, for path rendering.
pub fn path_tag_variants(tags: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    tags.iter()
        .map(|(k, v)| (k.clone(), filename::truncate_on_newline(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_uppercases_and_skips_empties() {
        let mut map = BTreeMap::new();
        map.insert("TITLE".to_string(), "old".to_string());
        apply_tag_overlay(
            &mut map,
            &[
                TagKv::new("title", "new"),
                TagKv::new("ARTIST", ""),
                TagKv::new("MUSICBRAINZ_MEDIUMTITLE", "Bonus"),
            ],
            true,
        );
        assert_eq!(map.get("TITLE").unwrap(), "new");
        assert!(!map.contains_key("ARTIST"));
        assert!(!map.contains_key("MUSICBRAINZ_MEDIUMTITLE"));

        apply_tag_overlay(&mut map, &[TagKv::new("MUSICBRAINZ_MEDIUMTITLE", "Bonus")], false);
        assert_eq!(map.get("MUSICBRAINZ_MEDIUMTITLE").unwrap(), "Bonus");
    }

    #[test]
    fn vorbis_comment_carries_all_pairs() {
        let mut map = BTreeMap::new();
        map.insert("TITLE".to_string(), "Song".to_string());
        map.insert("TRACKNUMBER".to_string(), "3".to_string());
        let vc = build_vorbis_comment(&map);
        assert_eq!(vc.comments.len(), 2);
        assert_eq!(vc.comments.get("TITLE").unwrap(), &vec!["Song".to_string()]);
    }

    #[test]
    fn picture_block_requires_data_and_respects_cap() {
        let empty = CoverArt::default();
        assert!(build_picture_block(&empty).is_none());

        let mut art = CoverArt {
            data: vec![0u8; 16],
            mime_type: "image/png".to_string(),
            is_front: true,
            available: true,
        };
        let picture = build_picture_block(&art).unwrap();
        assert!(matches!(picture.picture_type, PictureType::CoverFront));
        assert_eq!(picture.mime_type, "image/png");
        // not a real PNG: dimensions stay unset
        assert_eq!(picture.width, 0);

        art.data = vec![0u8; MAX_FLAC_PICTURE_BYTES + 1];
        assert!(build_picture_block(&art).is_none());
    }

    #[test]
    fn picture_block_parses_png_dimensions() {
        let mut png = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut png, 5, 7);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&[0u8; 5 * 7 * 3]).unwrap();
        }
        let art = CoverArt {
            data: png,
            mime_type: "image/png".to_string(),
            is_front: true,
            available: true,
        };
        let picture = build_picture_block(&art).unwrap();
        assert_eq!((picture.width, picture.height, picture.depth), (5, 7, 24));
    }
}
