//! Destination filename rendering: `{KEY[:FORMAT]}` template tokens,
//! safe-string transforms and path sanitising.

use std::collections::BTreeMap;

const TRAILING_TRIM_CHARS: &str = ".,;|~/\\^";
const REPLACE_CHARS: &str = ".:;|/\\^";
const RESERVED_PATH_CHARS: &str = "\\:?\"<>|*";

/// Keys rendered as zero-paddable integers when a `Nd` format is given.
const NUMERIC_FORMAT_KEYS: [&str; 6] = [
    "TRACKNUMBER",
    "TRACKTOTAL",
    "DISCNUMBER",
    "DISCTOTAL",
    "CDDB_TOTAL_SECONDS",
    "MUSICBRAINZ_LEADOUT",
];

pub fn is_numeric_format_key(key_upper: &str) -> bool {
    NUMERIC_FORMAT_KEYS.contains(&key_upper)
}

/// Cut a tag value at the first newline, carriage return, or literal
/// two-character `\n`/`\r` escape.
pub fn truncate_on_newline(s: &str) -> String {
    let mut pos = None;
    for marker in ["\r", "\n", "\\n", "\\r"] {
        if let Some(found) = s.find(marker) {
            pos = Some(pos.map_or(found, |p: usize| p.min(found)));
        }
    }
    match pos {
        Some(p) => s[..p].to_string(),
        None => s.to_string(),
    }
}

/// Newline-truncate, trim trailing punctuation, and replace path-hostile
/// characters with underscores. Used for SAFETITLE and the `:n` format.
pub fn safe_string(s: &str) -> String {
    let mut out = truncate_on_newline(s);
    while out
        .chars()
        .last()
        .is_some_and(|c| TRAILING_TRIM_CHARS.contains(c))
    {
        out.pop();
    }
    out.chars()
        .map(|c| if REPLACE_CHARS.contains(c) { '_' } else { c })
        .collect()
}

/// A tag value as seen by the template renderer
#[derive(Debug, Clone)]
pub enum FormatValue {
    Str(String),
    Numeric { value: i64, raw: String },
}

impl FormatValue {
    fn render(&self, format: &str) -> String {
        match self {
            FormatValue::Str(value) => {
                if format == "n" {
                    safe_string(value)
                } else {
                    value.clone()
                }
            }
            FormatValue::Numeric { value, raw } => {
                if let Some(width_text) = format.strip_suffix('d') {
                    if let Ok(width) = width_text.parse::<usize>() {
                        if width > 0 {
                            return format!("{:0width$}", value, width = width);
                        }
                    }
                }
                raw.clone()
            }
        }
    }
}

pub type FormatTagMap = BTreeMap<String, FormatValue>;

/// Build the renderer's tag map from newline-truncated path tags,
/// promoting numeric-named keys that parse cleanly.
pub fn build_format_tags(path_tags: &BTreeMap<String, String>) -> FormatTagMap {
    let mut format_tags = FormatTagMap::new();
    for (key, value) in path_tags {
        let key_upper = key.to_uppercase();
        if is_numeric_format_key(&key_upper) {
            if let Ok(numeric) = value.trim().parse::<i64>() {
                format_tags.insert(
                    key_upper,
                    FormatValue::Numeric {
                        value: numeric,
                        raw: value.clone(),
                    },
                );
                continue;
            }
        }
        format_tags.insert(key_upper, FormatValue::Str(value.clone()));
    }
    format_tags
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinOperator {
    /// `/`, joins with a path separator
    Path,
    /// `+`, joins with a space
    Space,
}

#[derive(Debug)]
struct FormatSegment {
    key: String,
    format: String,
}

fn parse_segment(token: &str) -> FormatSegment {
    match token.split_once(':') {
        Some((key, format)) => FormatSegment {
            key: key.to_uppercase(),
            format: format.to_string(),
        },
        None => FormatSegment {
            key: token.to_uppercase(),
            format: String::new(),
        },
    }
}

fn render_token(token: &str, tags: &FormatTagMap) -> String {
    let mut segments = Vec::new();
    let mut operators = Vec::new();
    let mut start = 0;
    for (i, ch) in token.char_indices() {
        if ch == '/' || ch == '+' {
            segments.push(parse_segment(&token[start..i]));
            operators.push(if ch == '+' {
                JoinOperator::Space
            } else {
                JoinOperator::Path
            });
            start = i + 1;
        }
    }
    segments.push(parse_segment(&token[start..]));

    let mut out = String::new();
    let mut has_output = false;
    for (i, segment) in segments.iter().enumerate() {
        let value = if segment.key.is_empty() {
            String::new()
        } else {
            tags.get(&segment.key)
                .map(|v| v.render(&segment.format))
                .unwrap_or_default()
        };
        // Empty sub-token values are skipped along with their separator.
        if value.is_empty() {
            continue;
        }
        if has_output && i > 0 {
            out.push(match operators[i - 1] {
                JoinOperator::Path => '/',
                JoinOperator::Space => ' ',
            });
        }
        out.push_str(&value);
        has_output = true;
    }
    out
}

fn sanitize_component(input: &str) -> String {
    let result: String = input
        .chars()
        .map(|c| {
            if c.is_control() || RESERVED_PATH_CHARS.contains(c) || c == '/' {
                '_'
            } else {
                c
            }
        })
        .collect();
    if result.is_empty() {
        "track".to_string()
    } else {
        result
    }
}

fn sanitize_path_components(path: &str, leading_slash: bool) -> String {
    let mut out = String::new();
    if leading_slash {
        out.push('/');
    }
    let mut first = true;
    for part in path.split('/') {
        if !first {
            out.push('/');
        }
        out.push_str(&sanitize_component(part));
        first = false;
    }
    out
}

/// Sanitise every path component. URI scheme and authority are preserved
/// verbatim; only the path portion is rewritten.
pub fn sanitize_path(path: &str) -> String {
    if let Some(scheme_pos) = path.find("://") {
        let scheme = &path[..scheme_pos];
        let rest = &path[scheme_pos + 3..];
        let Some(authority_end) = rest.find('/') else {
            return format!("{}://{}", scheme, rest);
        };
        let authority = &rest[..authority_end];
        let uri_path = &rest[authority_end + 1..];
        return format!(
            "{}://{}{}",
            scheme,
            authority,
            sanitize_path_components(uri_path, true)
        );
    }
    let leading_slash = path.starts_with('/');
    let stripped = if leading_slash { &path[1..] } else { path };
    sanitize_path_components(stripped, leading_slash)
}

pub fn is_uri(path: &str) -> bool {
    path.contains("://")
}

/// Render a destination path from the format template. The container
/// extension is appended when missing and the whole path is sanitised.
pub fn render_filename(fmt: &str, tags: &FormatTagMap) -> String {
    let mut out = String::new();
    let mut rest = fmt;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        if let Some(close) = after.find('}') {
            out.push_str(&rest[..open]);
            out.push_str(&render_token(&after[..close], tags));
            rest = &after[close + 1..];
        } else {
            out.push_str(&rest[..open + 1]);
            rest = after;
        }
    }
    out.push_str(rest);
    if !out.ends_with(".flac") {
        out.push_str(".flac");
    }
    sanitize_path(&out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> FormatTagMap {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        build_format_tags(&map)
    }

    #[test]
    fn renders_zero_padded_numbers() {
        let tags = tags(&[("TRACKNUMBER", "3"), ("SAFETITLE", "Intro")]);
        assert_eq!(
            render_filename("{tracknumber:02d}_{safetitle}", &tags),
            "03_Intro.flac"
        );
    }

    #[test]
    fn numeric_key_with_bad_format_uses_raw() {
        let tags = tags(&[("TRACKNUMBER", "07")]);
        assert_eq!(render_filename("{tracknumber:xd}", &tags), "07.flac");
        assert_eq!(render_filename("{tracknumber}", &tags), "07.flac");
    }

    #[test]
    fn safe_string_format_on_string_keys() {
        let tags = tags(&[("TITLE", "a:b/c.")]);
        assert_eq!(render_filename("{title:n}", &tags), "a_b_c.flac");
    }

    #[test]
    fn join_operators_skip_empty_values() {
        let tags = tags(&[("ALBUM", "The Album"), ("ARTIST", ""), ("TITLE", "Song")]);
        assert_eq!(
            render_filename("{artist/album/title}", &tags),
            "The Album/Song.flac"
        );
        assert_eq!(
            render_filename("{artist+album+title}", &tags),
            "The Album Song.flac"
        );
    }

    #[test]
    fn template_without_tokens_passes_through() {
        let tags = tags(&[]);
        assert_eq!(render_filename("plain", &tags), "plain.flac");
    }

    #[test]
    fn all_tokens_empty_yields_bare_extension_component() {
        let tags = tags(&[]);
        assert_eq!(render_filename("{album/title}", &tags), ".flac");
    }

    #[test]
    fn sanitize_replaces_reserved_and_control_chars() {
        let rendered = sanitize_path("a\u{1}b/c:d?e\"f<g>h|i*j");
        assert!(!rendered.contains(|c: char| c.is_control()));
        for c in "\\:?\"<>|*".chars() {
            assert!(!rendered.contains(c), "{} left in {}", c, rendered);
        }
        assert_eq!(rendered, "a_b/c_d_e_f_g_h_i_j");
    }

    #[test]
    fn empty_components_become_track() {
        assert_eq!(sanitize_path("a//b"), "a/track/b");
    }

    #[test]
    fn uri_authority_is_preserved() {
        assert_eq!(
            sanitize_path("sftp://user@host:22/music/a:b/c"),
            "sftp://user@host:22/music/a_b/c"
        );
        assert_eq!(sanitize_path("sftp://host"), "sftp://host");
    }

    #[test]
    fn truncates_on_real_and_literal_newlines() {
        assert_eq!(truncate_on_newline("abc\ndef"), "abc");
        assert_eq!(truncate_on_newline("abc\\ndef"), "abc");
        assert_eq!(truncate_on_newline("ab\\rc\nd"), "ab");
        assert_eq!(truncate_on_newline("plain"), "plain");
    }

    #[test]
    fn safe_string_trims_trailing_punctuation() {
        assert_eq!(safe_string("Song Title.,;"), "Song Title");
        assert_eq!(safe_string("A|B^C"), "A_B_C");
    }

    #[test]
    fn every_numeric_key_supports_zero_padding() {
        for key in NUMERIC_FORMAT_KEYS {
            let map: BTreeMap<String, String> =
                [(key.to_string(), "7".to_string())].into_iter().collect();
            let format_tags = build_format_tags(&map);
            let template = format!("{{{}:04d}}", key.to_lowercase());
            assert_eq!(render_filename(&template, &format_tags), "0007.flac");
        }
        // Non-numeric keys never pad.
        let tags = tags(&[("TITLE", "7")]);
        assert_eq!(render_filename("{title:04d}", &tags), "7.flac");
    }

    #[test]
    fn extension_appended_once() {
        let tags = tags(&[("SAFETITLE", "Song")]);
        assert_eq!(render_filename("{safetitle}.flac", &tags), "Song.flac");
        assert_eq!(render_filename("{safetitle}", &tags), "Song.flac");
    }
}
