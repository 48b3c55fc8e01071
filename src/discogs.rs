//! Discogs release lookup, used as a cover-art source.

use crate::http::{self, FetchError, RetryPolicy};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DiscogsError {
    #[error("{0}")]
    Http(#[from] FetchError),
    #[error("Discogs response parse error: {0}")]
    Parse(String),
    #[error("Discogs release {0} has no usable image")]
    NoImage(String),
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    images: Option<Vec<ReleaseImage>>,
    thumb: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseImage {
    #[serde(rename = "type")]
    image_type: Option<String>,
    uri: Option<String>,
    uri150: Option<String>,
}

/// Personal access token; image URLs are only served to authenticated
/// requests.
fn discogs_token() -> Option<String> {
    std::env::var("CDRIP_DISCOGS_TOKEN")
        .ok()
        .filter(|t| !t.trim().is_empty())
}

fn release_url(release_id: &str) -> String {
    let base = format!("https://api.discogs.com/releases/{}", release_id);
    match discogs_token() {
        Some(token) => format!("{}?token={}", base, token),
        None => base,
    }
}

fn pick_image_url(release: &ReleaseResponse) -> Option<String> {
    if let Some(images) = &release.images {
        // Primary image first, then anything with a URI.
        for image in images {
            if image.image_type.as_deref() == Some("primary") {
                if let Some(uri) = image.uri.clone().filter(|u| !u.is_empty()) {
                    return Some(uri);
                }
            }
        }
        for image in images {
            if let Some(uri) = image.uri.clone().filter(|u| !u.is_empty()) {
                return Some(uri);
            }
            if let Some(uri) = image.uri150.clone().filter(|u| !u.is_empty()) {
                return Some(uri);
            }
        }
    }
    release.thumb.clone().filter(|u| !u.is_empty())
}

/// Download the front image of a Discogs release. Returns the raw image
/// bytes and the Content-Type when the server reported one.
pub async fn fetch_release_image(
    release_id: &str,
) -> Result<(Vec<u8>, Option<String>), DiscogsError> {
    let url = release_url(release_id);
    debug!("Discogs release lookup: {}", release_id);
    let body =
        http::get_bytes("Discogs", &url, "application/json", &RetryPolicy::default()).await?;
    let release: ReleaseResponse =
        serde_json::from_slice(&body.bytes).map_err(|e| DiscogsError::Parse(e.to_string()))?;

    let image_url =
        pick_image_url(&release).ok_or_else(|| DiscogsError::NoImage(release_id.to_string()))?;

    let image = http::get_bytes("Discogs", &image_url, "image/*", &RetryPolicy::cover_art()).await?;
    Ok((image.bytes, image.content_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_image_preferred() {
        let release: ReleaseResponse = serde_json::from_str(
            r#"{
                "images": [
                    {"type": "secondary", "uri": "https://img/sec.jpg"},
                    {"type": "primary", "uri": "https://img/front.jpg"}
                ],
                "thumb": "https://img/thumb.jpg"
            }"#,
        )
        .unwrap();
        assert_eq!(
            pick_image_url(&release).as_deref(),
            Some("https://img/front.jpg")
        );
    }

    #[test]
    fn falls_back_to_first_image_then_thumb() {
        let release: ReleaseResponse = serde_json::from_str(
            r#"{"images": [{"type": "secondary", "uri": "https://img/sec.jpg"}]}"#,
        )
        .unwrap();
        assert_eq!(
            pick_image_url(&release).as_deref(),
            Some("https://img/sec.jpg")
        );

        let release: ReleaseResponse =
            serde_json::from_str(r#"{"thumb": "https://img/thumb.jpg"}"#).unwrap();
        assert_eq!(
            pick_image_url(&release).as_deref(),
            Some("https://img/thumb.jpg")
        );

        let release: ReleaseResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(pick_image_url(&release), None);
    }
}
