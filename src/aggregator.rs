//! Parallel metadata aggregation across the configured providers.
//!
//! One task per provider; results are joined and flattened in the
//! configured provider order regardless of completion order. When
//! MusicBrainz comes back empty but another provider found something,
//! a fuzzy by-title MusicBrainz search fills the MusicBrainz slot.

use crate::album_extractor::extract_album_title_candidates;
use crate::cddb::{self, CddbServer};
use crate::musicbrainz::{self, MUSICBRAINZ_LABEL};
use crate::tags::CddbEntry;
use crate::toc::DiscToc;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("Invalid TOC provided")]
    InvalidToc,
    #[error("No CDDB servers specified")]
    NoServers,
}

/// What a single provider produced
#[derive(Debug, Default)]
struct ProviderResult {
    entries: Vec<CddbEntry>,
    error: Option<String>,
}

/// Merged result of one aggregation run. `notice` carries the first
/// provider error (the run itself still succeeds when any provider
/// answered).
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub entries: Vec<CddbEntry>,
    pub notice: Option<String>,
}

fn is_musicbrainz(server: &CddbServer) -> bool {
    server.label.to_lowercase() == MUSICBRAINZ_LABEL
}

async fn fetch_one(toc: DiscToc, server: CddbServer) -> ProviderResult {
    if is_musicbrainz(&server) {
        match musicbrainz::fetch_entries(&toc).await {
            Ok(entries) => ProviderResult {
                entries,
                error: None,
            },
            Err(e) => ProviderResult {
                entries: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    } else {
        match cddb::fetch_entries(&toc, &server).await {
            Ok(entries) => ProviderResult {
                entries,
                error: None,
            },
            Err(e) => ProviderResult {
                entries: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }
}

/// Flatten per-provider results in provider order and pick the first
/// error to report.
fn merge_in_order(per_server: Vec<ProviderResult>, title_err: Option<String>) -> FetchOutcome {
    let mut outcome = FetchOutcome::default();
    for result in per_server {
        if let Some(err) = result.error {
            if outcome.notice.is_none() {
                outcome.notice = Some(err);
            }
        }
        outcome.entries.extend(result.entries);
    }
    if outcome.notice.is_none() {
        if let Some(err) = title_err {
            outcome.notice = Some(format!("MusicBrainz title search failed: {}", err));
        }
    }
    outcome
}

/// Insert by-title MusicBrainz entries into the MusicBrainz provider's
/// slot, skipping releases already present there.
fn insert_mb_entries(target: &mut ProviderResult, new_entries: Vec<CddbEntry>) {
    let mut seen: HashSet<String> = target
        .entries
        .iter()
        .filter_map(musicbrainz::release_key)
        .collect();
    for entry in new_entries {
        if let Some(key) = musicbrainz::release_key(&entry) {
            if !seen.insert(key) {
                continue;
            }
        }
        target.entries.push(entry);
    }
}

/// Query every configured provider concurrently and merge the results.
pub async fn fetch_cddb_entries(
    toc: &DiscToc,
    servers: &[CddbServer],
) -> Result<FetchOutcome, AggregateError> {
    if toc.tracks.is_empty() {
        return Err(AggregateError::InvalidToc);
    }
    if servers.is_empty() {
        return Err(AggregateError::NoServers);
    }

    let mut mb_index: Option<usize> = None;
    let mut handles = Vec::with_capacity(servers.len());
    for (i, server) in servers.iter().enumerate() {
        if is_musicbrainz(server) && mb_index.is_none() {
            mb_index = Some(i);
        }
        handles.push(tokio::spawn(fetch_one(toc.clone(), server.clone())));
    }

    let mut per_server = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(result) => per_server.push(result),
            Err(e) => per_server.push(ProviderResult {
                entries: Vec::new(),
                error: Some(format!("provider fetch failed: {}", e)),
            }),
        }
    }

    // Fuzzy fallback: MusicBrainz configured but empty, others not.
    let mut title_err: Option<String> = None;
    if let Some(mb_index) = mb_index {
        let mb_entries: usize = per_server
            .iter()
            .enumerate()
            .filter(|(i, _)| servers.get(*i).is_some_and(is_musicbrainz))
            .map(|(_, r)| r.entries.len())
            .sum();
        let other_entries: Vec<&CddbEntry> = per_server
            .iter()
            .enumerate()
            .filter(|(i, _)| !servers.get(*i).is_some_and(is_musicbrainz))
            .flat_map(|(_, r)| r.entries.iter())
            .collect();

        if mb_entries == 0 && !other_entries.is_empty() {
            let candidates = extract_album_title_candidates(&other_entries);
            if !candidates.is_empty() {
                info!(
                    "MusicBrainz came back empty; trying {} title candidate(s)",
                    candidates.len()
                );
            }
            let mut fetched: Vec<Vec<CddbEntry>> = Vec::new();
            for candidate in &candidates {
                debug!("by-title lookup: \"{}\"", candidate);
                match musicbrainz::fetch_entries_by_title(toc, candidate).await {
                    Ok(entries) => fetched.push(entries),
                    Err(e) => {
                        warn!("by-title lookup failed for \"{}\": {}", candidate, e);
                        title_err = Some(e.to_string());
                    }
                }
            }
            for entries in fetched {
                insert_mb_entries(&mut per_server[mb_index], entries);
            }
        }
    }

    Ok(merge_in_order(per_server, title_err))
}
