//! Disc table-of-contents model and disc identifier derivation

use base64::Engine as _;
use sha1::{Digest, Sha1};

/// CD frames (sectors) per second of audio
pub const FRAMES_PER_SECOND: i64 = 75;

/// MusicBrainz counts sector offsets from the start of the lead-in,
/// 150 frames before LBA 0.
pub const MB_LEAD_IN_FRAMES: i64 = 150;

/// A single track as read from the disc TOC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    /// 1-based track number
    pub number: u32,
    /// First sector (absolute LBA)
    pub start: i64,
    /// Last sector, inclusive
    pub end: i64,
    pub is_audio: bool,
}

impl TrackInfo {
    pub fn sectors(&self) -> i64 {
        self.end - self.start + 1
    }

    /// Audio length of this track in seconds
    pub fn seconds(&self) -> f64 {
        self.sectors() as f64 / FRAMES_PER_SECOND as f64
    }
}

/// Table of contents of an audio CD, immutable once built
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscToc {
    pub tracks: Vec<TrackInfo>,
    /// First sector beyond the last audio sample
    pub leadout_sector: i64,
    pub length_seconds: u32,
    pub cddb_discid: Option<String>,
    pub mb_discid: Option<String>,
    pub mb_release_id: Option<String>,
    pub mb_medium_id: Option<String>,
}

impl DiscToc {
    /// Leadout sector, falling back to one past the last track when the
    /// drive did not report one.
    pub fn effective_leadout(&self) -> i64 {
        if self.leadout_sector > 0 {
            self.leadout_sector
        } else {
            self.tracks.last().map(|t| t.end + 1).unwrap_or(0)
        }
    }

    /// Track start offsets in MusicBrainz convention (LBA + 150), plus
    /// the leadout offset. Empty when the TOC has no tracks.
    pub fn mb_offsets(&self) -> (Vec<i64>, i64) {
        if self.tracks.is_empty() {
            return (Vec::new(), 0);
        }
        let leadout = self.effective_leadout() + MB_LEAD_IN_FRAMES;
        let offsets = self
            .tracks
            .iter()
            .map(|t| t.start + MB_LEAD_IN_FRAMES)
            .collect();
        (offsets, leadout)
    }

    /// The `toc` query parameter for MusicBrainz discid lookups:
    /// `first+last+leadout+offset1+...+offsetN`.
    pub fn mb_toc_param(&self) -> Option<String> {
        let (offsets, leadout) = self.mb_offsets();
        if offsets.is_empty() {
            return None;
        }
        let first = self.tracks.first()?.number;
        let last = self.tracks.last()?.number;
        let mut param = format!("{}+{}+{}", first, last, leadout);
        for offset in offsets {
            param.push('+');
            param.push_str(&offset.to_string());
        }
        Some(param)
    }

    /// Raw track start sectors joined with commas, as stored in the
    /// CDDB_OFFSETS Vorbis comment.
    pub fn cddb_offsets_tag(&self) -> String {
        self.tracks
            .iter()
            .map(|t| t.start.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn digit_sum(mut n: i64) -> i64 {
    let mut sum = 0;
    while n > 0 {
        sum += n % 10;
        n /= 10;
    }
    sum
}

/// Compute the legacy CDDB disc id, rendered as lowercase hex without
/// leading zeros (the rendering the legacy library produced).
pub fn cddb_disc_id(toc: &DiscToc) -> Option<String> {
    let first = toc.tracks.first()?;
    let mut checksum = 0i64;
    for track in &toc.tracks {
        checksum += digit_sum(track.start / FRAMES_PER_SECOND);
    }
    let total = i64::from(toc.length_seconds) - first.start / FRAMES_PER_SECOND;
    let id = ((checksum % 0xff) << 24) | ((total & 0xffff) << 8) | toc.tracks.len() as i64;
    Some(format!("{:x}", id as u32))
}

/// Compute the MusicBrainz disc id and the leadout offset (+150) it was
/// derived from. Refuses discs with more than 99 tracks or inconsistent
/// first/last track numbers.
pub fn musicbrainz_disc_id(toc: &DiscToc) -> Option<(String, i64)> {
    if toc.tracks.is_empty() || toc.tracks.len() > 99 {
        return None;
    }
    let first_track = toc.tracks.first()?.number;
    let last_track = toc.tracks.last()?.number;
    if first_track == 0 || last_track < first_track {
        return None;
    }

    // offsets[0] = leadout, [1..=N] track offsets, zero-padded to 100.
    let (track_offsets, leadout) = toc.mb_offsets();
    let mut offsets = [0i64; 100];
    offsets[0] = leadout;
    for (i, offset) in track_offsets.iter().enumerate() {
        offsets[i + 1] = *offset;
    }

    // SHA-1 over the hex string "first(%02X) last(%02X) offsets(%08X x100)".
    // https://musicbrainz.org/doc/Disc_ID_Calculation
    let mut hex = String::with_capacity(2 + 2 + 100 * 8);
    hex.push_str(&format!("{:02X}", first_track));
    hex.push_str(&format!("{:02X}", last_track));
    for offset in offsets {
        hex.push_str(&format!("{:08X}", offset));
    }

    let mut hasher = Sha1::new();
    hasher.update(hex.as_bytes());
    let digest = hasher.finalize();

    let encoded = base64::engine::general_purpose::STANDARD.encode(digest);
    let discid: String = encoded
        .chars()
        .map(|c| match c {
            '+' => '.',
            '/' => '_',
            '=' => '-',
            other => other,
        })
        .collect();
    if discid.is_empty() {
        return None;
    }
    Some((discid, leadout))
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn cddb_id_for_two_track_disc() {
        let toc = two_track_toc();
        // checksum = digitsum(0) + digitsum(180) = 9, total = 460, tracks = 2
        assert_eq!(cddb_disc_id(&toc).unwrap(), "901cc02");
    }

    #[test]
    fn mb_id_has_expected_shape() {
        let toc = two_track_toc();
        let (id, leadout) = musicbrainz_disc_id(&toc).unwrap();
        assert_eq!(id.len(), 28);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'));
        assert_eq!(leadout, 34718);
    }

    #[test]
    fn mb_id_is_stable() {
        let toc = two_track_toc();
        let (a, _) = musicbrainz_disc_id(&toc).unwrap();
        let (b, _) = musicbrainz_disc_id(&toc).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn toc_param_includes_leadout_and_offsets() {
        let toc = two_track_toc();
        assert_eq!(toc.mb_toc_param().unwrap(), "1+2+34718+150+13660");
    }

    #[test]
    fn single_track_disc() {
        let toc = DiscToc {
            tracks: vec![TrackInfo {
                number: 1,
                start: 0,
                end: 225000 - 1,
                is_audio: true,
            }],
            leadout_sector: 225000,
            length_seconds: 3000,
            ..Default::default()
        };
        let (id, _) = musicbrainz_disc_id(&toc).unwrap();
        assert_eq!(id.len(), 28);
        assert!(cddb_disc_id(&toc).is_some());
    }

    #[test]
    fn ninety_nine_tracks_ok_one_hundred_refused() {
        let make = |count: u32| {
            let mut tracks = Vec::new();
            for i in 0..count {
                let start = i64::from(i) * 1500;
                tracks.push(TrackInfo {
                    number: i + 1,
                    start,
                    end: start + 1499,
                    is_audio: true,
                });
            }
            let leadout = i64::from(count) * 1500;
            DiscToc {
                tracks,
                leadout_sector: leadout,
                length_seconds: (leadout / 75) as u32,
                ..Default::default()
            }
        };
        assert!(musicbrainz_disc_id(&make(99)).is_some());
        assert!(musicbrainz_disc_id(&make(100)).is_none());
    }

    #[test]
    fn leadout_falls_back_to_last_track_end() {
        let mut toc = two_track_toc();
        toc.leadout_sector = 0;
        assert_eq!(toc.effective_leadout(), 34568);
    }
}
