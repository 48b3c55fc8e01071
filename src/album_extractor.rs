//! Fuzzy album-title candidate extraction.
//!
//! When MusicBrainz knows nothing about a disc but the legacy CDDB
//! servers do, their album titles are clustered by similarity and each
//! cluster contributes one representative string for a by-title
//! MusicBrainz search.

use crate::tags::CddbEntry;

const MIN_MATCH_LEN: usize = 6;
const MIN_MATCH_RATIO: f64 = 0.6;
const MIN_CANDIDATE_LEN: usize = 6;

/// Lowercase ASCII alphanumerics kept, non-ASCII bytes preserved, every
/// other run collapsed to a single space.
fn normalize_album_title(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_ascii() {
            if ch.is_ascii_alphanumeric() {
                out.push(ch.to_ascii_lowercase());
                last_space = false;
            } else if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out.trim().to_string()
}

/// Length of the longest common contiguous substring, in bytes.
fn longest_common_substring_len(a: &str, b: &str) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let a = a.as_bytes();
    let b = b.as_bytes();
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    let mut best = 0;
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            if a[i - 1] == b[j - 1] {
                curr[j] = prev[j - 1] + 1;
                best = best.max(curr[j]);
            } else {
                curr[j] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    best
}

fn is_similar_title(a: &str, b: &str) -> bool {
    let min_len = a.len().min(b.len());
    if min_len == 0 {
        return false;
    }
    let lcs = longest_common_substring_len(a, b);
    lcs >= MIN_MATCH_LEN && lcs as f64 / min_len as f64 >= MIN_MATCH_RATIO
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn unite(&mut self, a: usize, b: usize) {
        let (mut a, mut b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        if self.rank[a] < self.rank[b] {
            std::mem::swap(&mut a, &mut b);
        }
        self.parent[b] = a;
        if self.rank[a] == self.rank[b] {
            self.rank[a] += 1;
        }
    }
}

/// Longest substring (by bytes, on char boundaries) present in every
/// member of the cluster.
fn common_substring_across(members: &[&str]) -> String {
    let Some(shortest) = members.iter().min_by_key(|s| s.len()) else {
        return String::new();
    };
    let indices: Vec<usize> = shortest
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(shortest.len()))
        .collect();
    let mut best = "";
    for (si, &start) in indices.iter().enumerate() {
        for &end in indices[si + 1..].iter() {
            let candidate = &shortest[start..end];
            if candidate.len() <= best.len() {
                continue;
            }
            if members.iter().all(|m| m.contains(candidate)) {
                best = candidate;
            }
        }
    }
    best.trim().to_string()
}

/// Extract candidate album titles from the entries' ALBUM tags.
/// Titles are normalised, clustered with a union-find over the
/// similarity predicate, and each cluster is reduced to the longest
/// substring shared by all of its members. Candidates shorter than 6
/// characters are dropped; the result is sorted longest first and
/// deduplicated.
pub fn extract_album_title_candidates(entries: &[&CddbEntry]) -> Vec<String> {
    let mut items: Vec<String> = Vec::with_capacity(entries.len());
    for entry in entries {
        let title = entry.album_tag("ALBUM");
        let title = title.trim();
        if title.is_empty() {
            continue;
        }
        let normalized = normalize_album_title(title);
        if normalized.is_empty() {
            continue;
        }
        items.push(normalized);
    }
    if items.is_empty() {
        return Vec::new();
    }

    let mut dsu = DisjointSet::new(items.len());
    for i in 0..items.len() {
        for j in i + 1..items.len() {
            if is_similar_title(&items[i], &items[j]) {
                dsu.unite(i, j);
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
    for i in 0..items.len() {
        let root = dsu.find(i);
        groups[root].push(i);
    }

    let mut candidates = Vec::new();
    for group in groups.iter().filter(|g| !g.is_empty()) {
        let members: Vec<&str> = group.iter().map(|&i| items[i].as_str()).collect();
        let candidate = common_substring_across(&members);
        if candidate.len() < MIN_CANDIDATE_LEN {
            continue;
        }
        candidates.push(candidate);
    }

    candidates.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    candidates.dedup();
    candidates
}
