//! Cover-art acquisition with policy-driven fallback between the Cover
//! Art Archive and Discogs, feeding everything through the pipeline so
//! embedded pictures always fit the FLAC limits.

use crate::cover_pipeline::{self, CoverPipelineError};
use crate::discogs;
use crate::http::{self, RetryPolicy};
use crate::tags::CddbEntry;
use crate::toc::DiscToc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CoverArtError {
    #[error("{0}")]
    Fetch(String),
    #[error("Failed to normalize cover art image: {0}")]
    Pipeline(#[from] CoverPipelineError),
}

/// Where cover art may come from, per the `cdrip.discogs` setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoverArtPolicy {
    No,
    #[default]
    Always,
    Fallback,
}

impl CoverArtPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        let value = raw.trim().to_lowercase();
        match value.as_str() {
            "" | "always" => Some(CoverArtPolicy::Always),
            "no" => Some(CoverArtPolicy::No),
            "fallback" => Some(CoverArtPolicy::Fallback),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CoverArtPolicy::No => "no",
            CoverArtPolicy::Always => "always",
            CoverArtPolicy::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverSource {
    CoverArtArchive,
    Discogs,
}

impl CoverSource {
    pub fn label(self) -> &'static str {
        match self {
            CoverSource::CoverArtArchive => "Cover Art Archive",
            CoverSource::Discogs => "Discogs",
        }
    }
}

/// Result of one cover acquisition pass over the selected entries
#[derive(Debug, Default)]
pub struct CoverFetchOutcome {
    pub fetched: bool,
    pub source: Option<CoverSource>,
    pub notice: Option<String>,
}

fn attach_normalized(
    entry: &mut CddbEntry,
    bytes: &[u8],
    max_width: u32,
) -> Result<(), CoverArtError> {
    let normalized = cover_pipeline::normalize_image_to_png(bytes, max_width)?;
    entry.cover_art.data = normalized;
    entry.cover_art.mime_type = "image/png".to_string();
    entry.cover_art.is_front = true;
    entry.cover_art.available = true;
    Ok(())
}

/// Try the Cover Art Archive for one entry. Returns Ok(true) when the
/// entry ends up with cover bytes.
async fn fetch_caa_cover(
    entry: &mut CddbEntry,
    toc: &DiscToc,
    max_width: u32,
) -> Result<bool, CoverArtError> {
    if entry.cover_art.has_data() {
        return Ok(true);
    }
    if entry.source_label.to_lowercase() != "musicbrainz" {
        return Ok(false);
    }
    // Respect the provider metadata: no promised artwork, no request.
    if !entry.cover_art.available {
        return Ok(false);
    }

    let mut release_id = entry.album_tag("MUSICBRAINZ_RELEASE");
    if release_id.is_empty() {
        release_id = toc.mb_release_id.clone().unwrap_or_default();
    }
    let release_group_id = entry.album_tag("MUSICBRAINZ_RELEASEGROUPID");
    if release_id.is_empty() && release_group_id.is_empty() {
        return Ok(false);
    }

    let mut last_err: Option<String> = None;
    let mut urls = Vec::new();
    if !release_id.is_empty() {
        urls.push(format!(
            "https://coverartarchive.org/release/{}/front",
            release_id
        ));
    }
    if !release_group_id.is_empty() {
        urls.push(format!(
            "https://coverartarchive.org/release-group/{}/front",
            release_group_id
        ));
    }

    for url in urls {
        match http::get_bytes("Cover Art Archive", &url, "image/*", &RetryPolicy::cover_art())
            .await
        {
            Ok(body) => {
                attach_normalized(entry, &body.bytes, max_width)?;
                return Ok(true);
            }
            Err(e) => {
                debug!("Cover Art Archive miss: {}", e);
                last_err = Some(e.to_string());
            }
        }
    }
    match last_err {
        Some(err) => Err(CoverArtError::Fetch(err)),
        None => Ok(false),
    }
}

/// Try Discogs for one entry, keyed by its DISCOGS_RELEASE album tag.
async fn fetch_discogs_cover(entry: &mut CddbEntry, max_width: u32) -> Result<bool, CoverArtError> {
    if entry.cover_art.has_data() {
        return Ok(true);
    }
    if entry.source_label.to_lowercase() != "musicbrainz" {
        return Ok(false);
    }
    let release_id = entry.album_tag("DISCOGS_RELEASE");
    let release_id = release_id.trim();
    if release_id.is_empty() {
        return Ok(false);
    }

    match discogs::fetch_release_image(release_id).await {
        Ok((bytes, _content_type)) => {
            attach_normalized(entry, &bytes, max_width)?;
            Ok(true)
        }
        Err(discogs::DiscogsError::NoImage(_)) => Ok(false),
        Err(e) => Err(CoverArtError::Fetch(e.to_string())),
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PhaseResult {
    success: bool,
    had_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    CoverArtArchive,
    Discogs,
}

async fn try_phase(
    phase: Phase,
    target: &mut CddbEntry,
    candidates: &mut [CddbEntry],
    toc: &DiscToc,
    max_width: u32,
    outcome: &mut CoverFetchOutcome,
) -> PhaseResult {
    let mut result = PhaseResult::default();
    let use_target_only = candidates.is_empty();
    let count = if use_target_only { 1 } else { candidates.len() };

    for i in 0..count {
        let entry: &mut CddbEntry = if use_target_only {
            &mut *target
        } else {
            &mut candidates[i]
        };
        let had_data = entry.cover_art.has_data();
        let fetched = match phase {
            Phase::CoverArtArchive => fetch_caa_cover(entry, toc, max_width).await,
            Phase::Discogs => fetch_discogs_cover(entry, max_width).await,
        };
        match fetched {
            Ok(true) => {
                if !use_target_only {
                    target.cover_art = candidates[i].cover_art.clone();
                }
                if !had_data {
                    outcome.source = Some(match phase {
                        Phase::CoverArtArchive => CoverSource::CoverArtArchive,
                        Phase::Discogs => CoverSource::Discogs,
                    });
                }
                result.success = true;
                return result;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("cover art fetch failed: {}", e);
                outcome.notice = Some(e.to_string());
                result.had_error = true;
            }
        }
    }
    result
}

/// Acquire cover art for the selected entry according to the policy,
/// consulting the other selected candidates as fallbacks. An existing
/// cover is kept unless the policy is `Always` (which prefers Discogs).
pub async fn ensure_cover_art(
    target: &mut CddbEntry,
    candidates: &mut [CddbEntry],
    toc: &DiscToc,
    policy: CoverArtPolicy,
    max_width: u32,
) -> CoverFetchOutcome {
    let mut outcome = CoverFetchOutcome::default();
    let target_has_cover = target.cover_art.has_data();
    if target_has_cover && policy != CoverArtPolicy::Always {
        outcome.fetched = true;
        return outcome;
    }

    match policy {
        CoverArtPolicy::Always => {
            let discogs =
                try_phase(Phase::Discogs, target, candidates, toc, max_width, &mut outcome).await;
            if discogs.success {
                outcome.fetched = true;
                return outcome;
            }
            // Keep whatever was already attached when Discogs had nothing.
            if target_has_cover {
                outcome.fetched = true;
                return outcome;
            }
            let caa = try_phase(
                Phase::CoverArtArchive,
                target,
                candidates,
                toc,
                max_width,
                &mut outcome,
            )
            .await;
            if caa.success {
                outcome.fetched = true;
                return outcome;
            }
            if caa.had_error {
                let retry =
                    try_phase(Phase::Discogs, target, candidates, toc, max_width, &mut outcome)
                        .await;
                if retry.success {
                    outcome.fetched = true;
                    return outcome;
                }
            }
        }
        CoverArtPolicy::Fallback => {
            let caa = try_phase(
                Phase::CoverArtArchive,
                target,
                candidates,
                toc,
                max_width,
                &mut outcome,
            )
            .await;
            if caa.success {
                outcome.fetched = true;
                return outcome;
            }
            let discogs =
                try_phase(Phase::Discogs, target, candidates, toc, max_width, &mut outcome).await;
            if discogs.success {
                outcome.fetched = true;
                return outcome;
            }
            if discogs.had_error {
                let retry = try_phase(
                    Phase::CoverArtArchive,
                    target,
                    candidates,
                    toc,
                    max_width,
                    &mut outcome,
                )
                .await;
                if retry.success {
                    outcome.fetched = true;
                    return outcome;
                }
            }
        }
        CoverArtPolicy::No => {
            let caa = try_phase(
                Phase::CoverArtArchive,
                target,
                candidates,
                toc,
                max_width,
                &mut outcome,
            )
            .await;
            outcome.fetched = caa.success;
            return outcome;
        }
    }

    outcome
}
