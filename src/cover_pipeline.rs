//! Cover-art normalisation: decode PNG/JPEG (including CMYK and
//! ICC-profiled inputs), convert to sRGB, downscale to the configured
//! width budget, and re-encode as PNG small enough to embed in a FLAC
//! PICTURE block.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, Rgba};
use lcms2::{ColorSpaceSignature, Intent, PixelFormat, Profile, Transform};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

use crate::tags::MAX_FLAC_PICTURE_BYTES;

pub const DEFAULT_MAX_WIDTH: u32 = 512;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Debug, Error)]
pub enum CoverPipelineError {
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Color conversion failed: {0}")]
    Color(String),
    #[error("Failed to encode PNG: {0}")]
    Encode(String),
    #[error("PNG exceeds FLAC picture size limit")]
    PictureTooLarge,
    #[error("Unsupported image format")]
    UnsupportedFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Gray8,
    Rgb8,
    Rgba8,
    Cmyk8,
}

impl PixelLayout {
    fn channels(self) -> usize {
        match self {
            PixelLayout::Gray8 => 1,
            PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 => 4,
            PixelLayout::Cmyk8 => 4,
        }
    }
}

/// A decoded image with everything the colour stage needs carried along
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub pixels: Vec<u8>,
    pub icc_profile: Option<Vec<u8>>,
    /// Adobe APP14 present: CMYK samples are stored inverted
    pub cmyk_inverted: bool,
}

pub fn is_png_data(data: &[u8]) -> bool {
    data.len() >= 8 && data[..8] == PNG_SIGNATURE
}

pub fn is_jpeg_data(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8
}

/// Width, height, and bit depth from a PNG IHDR chunk, used when
/// building the FLAC PICTURE block.
pub fn png_dimensions(data: &[u8]) -> Option<(u32, u32, u32)> {
    if !is_png_data(data) || data.len() < 33 {
        return None;
    }
    let ihdr_len = u32::from_be_bytes(data[8..12].try_into().ok()?);
    if ihdr_len < 13 || &data[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(data[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(data[20..24].try_into().ok()?);
    if width == 0 || height == 0 {
        return None;
    }
    let bit_depth = u32::from(data[24]);
    let channels = match data[25] {
        0 => 1, // grayscale
        2 => 3, // rgb
        3 => 1, // palette
        4 => 2, // gray + alpha
        6 => 4, // rgba
        _ => return None,
    };
    if bit_depth == 0 {
        return None;
    }
    Some((width, height, channels * bit_depth))
}

fn decode_png(input: &[u8]) -> Result<DecodedImage, CoverPipelineError> {
    let mut decoder = png::Decoder::new(Cursor::new(input));
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder
        .read_info()
        .map_err(|e| CoverPipelineError::Decode(e.to_string()))?;

    // Prefer iCCP over the bare sRGB chunk; an sRGB chunk means no
    // transform is needed.
    let info = reader.info();
    let icc_profile = if info.srgb.is_some() {
        None
    } else {
        info.icc_profile.as_ref().map(|c| c.to_vec())
    };

    let mut buf = vec![0u8; reader.output_buffer_size()];
    let frame = reader
        .next_frame(&mut buf)
        .map_err(|e| CoverPipelineError::Decode(e.to_string()))?;
    buf.truncate(frame.buffer_size());
    let (color, _) = reader.output_color_type();

    let width = frame.width;
    let height = frame.height;
    let (layout, pixels) = match color {
        png::ColorType::Grayscale => (PixelLayout::Gray8, buf),
        png::ColorType::Rgb => (PixelLayout::Rgb8, buf),
        png::ColorType::Rgba => (PixelLayout::Rgba8, buf),
        png::ColorType::GrayscaleAlpha => {
            let mut rgba = Vec::with_capacity(buf.len() / 2 * 4);
            for ga in buf.chunks_exact(2) {
                rgba.extend_from_slice(&[ga[0], ga[0], ga[0], ga[1]]);
            }
            (PixelLayout::Rgba8, rgba)
        }
        other => {
            return Err(CoverPipelineError::Decode(format!(
                "unexpected PNG color type {:?}",
                other
            )))
        }
    };

    Ok(DecodedImage {
        width,
        height,
        layout,
        pixels,
        icc_profile,
        cmyk_inverted: false,
    })
}

/// Scan JPEG markers for an Adobe APP14 segment. Its presence marks
/// CMYK data stored inverted.
fn jpeg_has_adobe_marker(data: &[u8]) -> bool {
    if !is_jpeg_data(data) {
        return false;
    }
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return false;
        }
        let marker = data[pos + 1];
        // Start of scan: entropy-coded data follows, no more segments.
        if marker == 0xDA || marker == 0xD9 {
            return false;
        }
        if (0xD0..=0xD8).contains(&marker) || marker == 0x01 {
            pos += 2;
            continue;
        }
        let len = usize::from(u16::from_be_bytes([data[pos + 2], data[pos + 3]]));
        if len < 2 || pos + 2 + len > data.len() {
            return false;
        }
        if marker == 0xEE {
            let payload = &data[pos + 4..pos + 2 + len];
            if payload.len() >= 5 && &payload[..5] == b"Adobe" {
                return true;
            }
        }
        pos += 2 + len;
    }
    false
}

fn decode_jpeg(input: &[u8]) -> Result<DecodedImage, CoverPipelineError> {
    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(input));
    decoder
        .read_info()
        .map_err(|e| CoverPipelineError::Decode(e.to_string()))?;
    let icc_profile = decoder.icc_profile();
    let pixels = decoder
        .decode()
        .map_err(|e| CoverPipelineError::Decode(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| CoverPipelineError::Decode("missing JPEG header info".to_string()))?;

    let layout = match info.pixel_format {
        jpeg_decoder::PixelFormat::L8 => PixelLayout::Gray8,
        jpeg_decoder::PixelFormat::RGB24 => PixelLayout::Rgb8,
        jpeg_decoder::PixelFormat::CMYK32 => PixelLayout::Cmyk8,
        other => {
            return Err(CoverPipelineError::Decode(format!(
                "unsupported JPEG pixel format {:?}",
                other
            )))
        }
    };

    Ok(DecodedImage {
        width: u32::from(info.width),
        height: u32::from(info.height),
        layout,
        pixels,
        icc_profile,
        cmyk_inverted: layout == PixelLayout::Cmyk8 && jpeg_has_adobe_marker(input),
    })
}

/// Decode a PNG or JPEG buffer into a `DecodedImage`.
pub fn decode_image(input: &[u8]) -> Result<DecodedImage, CoverPipelineError> {
    if is_png_data(input) {
        decode_png(input)
    } else if is_jpeg_data(input) {
        decode_jpeg(input)
    } else {
        Err(CoverPipelineError::UnsupportedFormat)
    }
}

fn expand_gray_to_rgb(pixels: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixels.len() * 3);
    for &g in pixels {
        rgb.extend_from_slice(&[g, g, g]);
    }
    rgb
}

/// Device CMYK without a profile: `R = (255-C)(255-K)/255` and friends,
/// after undoing the Adobe inversion when flagged.
fn cmyk_to_rgb_approx(img: &DecodedImage) -> Result<Vec<u8>, CoverPipelineError> {
    let pixel_count = img.width as usize * img.height as usize;
    if img.pixels.len() != pixel_count * 4 {
        return Err(CoverPipelineError::Color(
            "CMYK buffer size mismatch".to_string(),
        ));
    }
    let mut rgb = Vec::with_capacity(pixel_count * 3);
    for cmyk in img.pixels.chunks_exact(4) {
        let [mut c, mut m, mut y, mut k] = [
            u32::from(cmyk[0]),
            u32::from(cmyk[1]),
            u32::from(cmyk[2]),
            u32::from(cmyk[3]),
        ];
        if img.cmyk_inverted {
            c = 255 - c;
            m = 255 - m;
            y = 255 - y;
            k = 255 - k;
        }
        rgb.push(((255 - c) * (255 - k) / 255) as u8);
        rgb.push(((255 - m) * (255 - k) / 255) as u8);
        rgb.push(((255 - y) * (255 - k) / 255) as u8);
    }
    Ok(rgb)
}

fn to_rgb_triples(pixels: &[u8]) -> Vec<[u8; 3]> {
    pixels
        .chunks_exact(3)
        .map(|p| [p[0], p[1], p[2]])
        .collect()
}

fn apply_icc_to_srgb(img: &DecodedImage, icc: &[u8]) -> Result<Vec<u8>, CoverPipelineError> {
    let input_profile =
        Profile::new_icc(icc).map_err(|e| CoverPipelineError::Color(e.to_string()))?;
    let srgb = Profile::new_srgb();
    let pixel_count = img.width as usize * img.height as usize;
    let mut out: Vec<[u8; 3]> = vec![[0; 3]; pixel_count];

    if img.layout == PixelLayout::Cmyk8 {
        let transform: Transform<[u8; 4], [u8; 3]> = Transform::new(
            &input_profile,
            PixelFormat::CMYK_8,
            &srgb,
            PixelFormat::RGB_8,
            Intent::Perceptual,
        )
        .map_err(|e| CoverPipelineError::Color(e.to_string()))?;
        let src: Vec<[u8; 4]> = img
            .pixels
            .chunks_exact(4)
            .map(|p| {
                if img.cmyk_inverted {
                    [255 - p[0], 255 - p[1], 255 - p[2], 255 - p[3]]
                } else {
                    [p[0], p[1], p[2], p[3]]
                }
            })
            .collect();
        transform.transform_pixels(&src, &mut out);
    } else if img.layout == PixelLayout::Gray8
        || input_profile.color_space() == ColorSpaceSignature::GrayData
    {
        // A Gray profile wants single-channel input; derive it from the
        // red channel for RGB(A) layouts.
        let src: Vec<u8> = match img.layout {
            PixelLayout::Gray8 => img.pixels.clone(),
            PixelLayout::Rgb8 => img.pixels.iter().step_by(3).copied().collect(),
            PixelLayout::Rgba8 => img.pixels.iter().step_by(4).copied().collect(),
            PixelLayout::Cmyk8 => unreachable!(),
        };
        let transform: Transform<u8, [u8; 3]> = Transform::new(
            &input_profile,
            PixelFormat::GRAY_8,
            &srgb,
            PixelFormat::RGB_8,
            Intent::Perceptual,
        )
        .map_err(|e| CoverPipelineError::Color(e.to_string()))?;
        transform.transform_pixels(&src, &mut out);
    } else {
        let src: Vec<[u8; 3]> = match img.layout {
            PixelLayout::Rgb8 => to_rgb_triples(&img.pixels),
            PixelLayout::Rgba8 => img
                .pixels
                .chunks_exact(4)
                .map(|p| [p[0], p[1], p[2]])
                .collect(),
            PixelLayout::Gray8 | PixelLayout::Cmyk8 => unreachable!(),
        };
        let transform: Transform<[u8; 3], [u8; 3]> = Transform::new(
            &input_profile,
            PixelFormat::RGB_8,
            &srgb,
            PixelFormat::RGB_8,
            Intent::Perceptual,
        )
        .map_err(|e| CoverPipelineError::Color(e.to_string()))?;
        transform.transform_pixels(&src, &mut out);
    }

    Ok(out.into_iter().flatten().collect())
}

/// Convert the decoded image to sRGB in place. After this the layout is
/// Rgb8 or Rgba8 and no ICC profile remains.
pub fn convert_to_srgb(img: &mut DecodedImage) -> Result<(), CoverPipelineError> {
    if img.width == 0 || img.height == 0 {
        return Err(CoverPipelineError::Color("invalid image dimensions".to_string()));
    }
    let expected = img.width as usize * img.height as usize * img.layout.channels();
    if img.pixels.len() != expected {
        return Err(CoverPipelineError::Color("pixel buffer size mismatch".to_string()));
    }

    if let Some(icc) = img.icc_profile.take() {
        let rgb = apply_icc_to_srgb(img, &icc)?;
        if img.layout == PixelLayout::Rgba8 {
            // Keep the original alpha channel alongside the transformed color.
            let mut rgba = Vec::with_capacity(rgb.len() / 3 * 4);
            for (color, source) in rgb.chunks_exact(3).zip(img.pixels.chunks_exact(4)) {
                rgba.extend_from_slice(&[color[0], color[1], color[2], source[3]]);
            }
            img.pixels = rgba;
            img.layout = PixelLayout::Rgba8;
        } else {
            img.pixels = rgb;
            img.layout = PixelLayout::Rgb8;
        }
        return Ok(());
    }

    match img.layout {
        PixelLayout::Gray8 => {
            img.pixels = expand_gray_to_rgb(&img.pixels);
            img.layout = PixelLayout::Rgb8;
        }
        PixelLayout::Cmyk8 => {
            img.pixels = cmyk_to_rgb_approx(img)?;
            img.layout = PixelLayout::Rgb8;
        }
        PixelLayout::Rgb8 | PixelLayout::Rgba8 => {}
    }
    Ok(())
}

fn resize_pixels(
    pixels: &[u8],
    width: u32,
    height: u32,
    layout: PixelLayout,
    target_w: u32,
    target_h: u32,
) -> Result<Vec<u8>, CoverPipelineError> {
    match layout {
        PixelLayout::Rgb8 => {
            let buf: ImageBuffer<Rgb<u8>, Vec<u8>> =
                ImageBuffer::from_raw(width, height, pixels.to_vec()).ok_or_else(|| {
                    CoverPipelineError::Color("pixel buffer size mismatch".to_string())
                })?;
            Ok(imageops::resize(&buf, target_w, target_h, FilterType::Triangle).into_raw())
        }
        PixelLayout::Rgba8 => {
            let buf: ImageBuffer<Rgba<u8>, Vec<u8>> =
                ImageBuffer::from_raw(width, height, pixels.to_vec()).ok_or_else(|| {
                    CoverPipelineError::Color("pixel buffer size mismatch".to_string())
                })?;
            Ok(imageops::resize(&buf, target_w, target_h, FilterType::Triangle).into_raw())
        }
        _ => Err(CoverPipelineError::Color(
            "resize requires RGB(A) pixels".to_string(),
        )),
    }
}

fn encode_png(
    pixels: &[u8],
    width: u32,
    height: u32,
    layout: PixelLayout,
) -> Result<Vec<u8>, CoverPipelineError> {
    let color = match layout {
        PixelLayout::Rgb8 => png::ColorType::Rgb,
        PixelLayout::Rgba8 => png::ColorType::Rgba,
        _ => {
            return Err(CoverPipelineError::Encode(
                "PNG encode requires RGB(A) pixels".to_string(),
            ))
        }
    };
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(color);
        encoder.set_depth(png::BitDepth::Eight);
        // Declare sRGB; embedding no ICC maximizes player compatibility.
        encoder.set_source_srgb(png::SrgbRenderingIntent::Perceptual);
        let mut writer = encoder
            .write_header()
            .map_err(|e| CoverPipelineError::Encode(e.to_string()))?;
        writer
            .write_image_data(pixels)
            .map_err(|e| CoverPipelineError::Encode(e.to_string()))?;
    }
    Ok(out)
}

/// Normalise an image buffer into an sRGB PNG no wider than
/// `max_width_px` and no larger than the FLAC picture cap. The width
/// budget is halved until the encoded output fits.
pub fn normalize_image_to_png(
    input: &[u8],
    max_width_px: u32,
) -> Result<Vec<u8>, CoverPipelineError> {
    let mut decoded = decode_image(input)?;
    convert_to_srgb(&mut decoded)?;

    let mut effective_max_width = if max_width_px == 0 {
        DEFAULT_MAX_WIDTH
    } else {
        max_width_px
    };
    effective_max_width = effective_max_width.max(1).min(decoded.width);

    loop {
        let target_w = decoded.width.min(effective_max_width);
        let target_h = if target_w == decoded.width {
            decoded.height
        } else {
            let scale = f64::from(target_w) / f64::from(decoded.width);
            ((f64::from(decoded.height) * scale).round() as u32).max(1)
        };

        let png = if target_w == decoded.width && target_h == decoded.height {
            encode_png(&decoded.pixels, decoded.width, decoded.height, decoded.layout)?
        } else {
            let scaled = resize_pixels(
                &decoded.pixels,
                decoded.width,
                decoded.height,
                decoded.layout,
                target_w,
                target_h,
            )?;
            encode_png(&scaled, target_w, target_h, decoded.layout)?
        };

        if png.len() <= MAX_FLAC_PICTURE_BYTES {
            debug!(
                "cover art normalized to {}x{} PNG, {} bytes",
                target_w,
                target_h,
                png.len()
            );
            return Ok(png);
        }
        if effective_max_width <= 1 {
            return Err(CoverPipelineError::PictureTooLarge);
        }
        effective_max_width = (effective_max_width / 2).max(1);
    }
}

/// Small sRGB thumbnail of an image buffer, for the terminal preview.
/// Alpha is dropped; the aspect ratio is preserved within the bounds.
pub fn thumbnail_rgb(input: &[u8], max_w: u32, max_h: u32) -> Option<(u32, u32, Vec<u8>)> {
    let mut decoded = decode_image(input).ok()?;
    convert_to_srgb(&mut decoded).ok()?;

    let rgb = match decoded.layout {
        PixelLayout::Rgb8 => decoded.pixels,
        PixelLayout::Rgba8 => decoded
            .pixels
            .chunks_exact(4)
            .flat_map(|p| [p[0], p[1], p[2]])
            .collect(),
        _ => return None,
    };

    let max_w = max_w.max(1);
    let max_h = max_h.max(1);
    let scale = f64::from(max_w) / f64::from(decoded.width);
    let scale = scale.min(f64::from(max_h) / f64::from(decoded.height));
    let scale = scale.min(1.0);
    let target_w = ((f64::from(decoded.width) * scale) as u32).max(1);
    let target_h = ((f64::from(decoded.height) * scale) as u32).max(1);
    if target_w == decoded.width && target_h == decoded.height {
        return Some((decoded.width, decoded.height, rgb));
    }
    let scaled = resize_pixels(
        &rgb,
        decoded.width,
        decoded.height,
        PixelLayout::Rgb8,
        target_w,
        target_h,
    )
    .ok()?;
    Some((target_w, target_h, scaled))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_rgb(width: u32, height: u32) -> Vec<u8> {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push((x * 255 / width.max(1)) as u8);
                pixels.push((y * 255 / height.max(1)) as u8);
                pixels.push(128);
            }
        }
        pixels
    }

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        encode_png(&gradient_rgb(width, height), width, height, PixelLayout::Rgb8).unwrap()
    }

    #[test]
    fn png_round_trip_keeps_dimensions_and_layout() {
        let png = sample_png(64, 48);
        let decoded = decode_image(&png).unwrap();
        assert_eq!((decoded.width, decoded.height), (64, 48));
        assert_eq!(decoded.layout, PixelLayout::Rgb8);
        assert!(decoded.icc_profile.is_none());
        assert_eq!(decoded.pixels, gradient_rgb(64, 48));
    }

    #[test]
    fn ihdr_dimensions_match_reported_size() {
        let png = sample_png(33, 21);
        assert_eq!(png_dimensions(&png), Some((33, 21, 24)));
        assert_eq!(png_dimensions(b"not a png"), None);
    }

    #[test]
    fn gray_without_profile_duplicates_channels() {
        let mut img = DecodedImage {
            width: 2,
            height: 1,
            layout: PixelLayout::Gray8,
            pixels: vec![10, 200],
            icc_profile: None,
            cmyk_inverted: false,
        };
        convert_to_srgb(&mut img).unwrap();
        assert_eq!(img.layout, PixelLayout::Rgb8);
        assert_eq!(img.pixels, vec![10, 10, 10, 200, 200, 200]);
    }

    #[test]
    fn cmyk_without_profile_uses_naive_formula() {
        let mut img = DecodedImage {
            width: 1,
            height: 1,
            layout: PixelLayout::Cmyk8,
            pixels: vec![0, 255, 255, 0],
            icc_profile: None,
            cmyk_inverted: false,
        };
        convert_to_srgb(&mut img).unwrap();
        // C=0 M=255 Y=255 K=0 is pure red
        assert_eq!(img.pixels, vec![255, 0, 0]);
    }

    #[test]
    fn inverted_cmyk_flag_flips_samples_first() {
        let mut img = DecodedImage {
            width: 1,
            height: 1,
            layout: PixelLayout::Cmyk8,
            pixels: vec![255, 0, 0, 255],
            icc_profile: None,
            cmyk_inverted: true,
        };
        convert_to_srgb(&mut img).unwrap();
        assert_eq!(img.pixels, vec![255, 0, 0]);
    }

    #[test]
    fn adobe_marker_detected_in_crafted_jpeg() {
        // SOI + APP14 "Adobe" segment + EOI
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xEE, 0x00, 0x0E];
        data.extend_from_slice(b"Adobe");
        data.extend_from_slice(&[0, 100, 0, 0, 0, 0, 0]);
        data.extend_from_slice(&[0xFF, 0xD9]);
        assert!(jpeg_has_adobe_marker(&data));

        let plain = [0xFF, 0xD8, 0xFF, 0xD9];
        assert!(!jpeg_has_adobe_marker(&plain));
    }

    #[test]
    fn downscales_to_width_budget() {
        let png = sample_png(64, 32);
        let out = normalize_image_to_png(&png, 32).unwrap();
        let decoded = decode_image(&out).unwrap();
        assert_eq!((decoded.width, decoded.height), (32, 16));
        assert!(out.len() <= MAX_FLAC_PICTURE_BYTES);
    }

    #[test]
    fn image_at_or_under_budget_keeps_size() {
        let png = sample_png(40, 40);
        let out = normalize_image_to_png(&png, 512).unwrap();
        let decoded = decode_image(&out).unwrap();
        assert_eq!((decoded.width, decoded.height), (40, 40));
    }

    #[test]
    fn one_pixel_wide_image_survives() {
        let png = sample_png(1, 8);
        let out = normalize_image_to_png(&png, 512).unwrap();
        let decoded = decode_image(&out).unwrap();
        assert_eq!(decoded.width, 1);
    }

    fn sample_jpeg(width: u32, height: u32, gray: bool) -> Vec<u8> {
        let mut out = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 90);
        if gray {
            let pixels: Vec<u8> = (0..width * height).map(|i| (i % 251) as u8).collect();
            encoder
                .encode(&pixels, width, height, image::ColorType::L8)
                .unwrap();
        } else {
            encoder
                .encode(&gradient_rgb(width, height), width, height, image::ColorType::Rgb8)
                .unwrap();
        }
        out
    }

    #[test]
    fn color_jpeg_decodes_to_rgb() {
        let jpeg = sample_jpeg(48, 32, false);
        let decoded = decode_image(&jpeg).unwrap();
        assert_eq!((decoded.width, decoded.height), (48, 32));
        assert_eq!(decoded.layout, PixelLayout::Rgb8);
        assert!(!decoded.cmyk_inverted);
    }

    #[test]
    fn gray_jpeg_expands_through_the_pipeline() {
        let jpeg = sample_jpeg(16, 16, true);
        let mut decoded = decode_image(&jpeg).unwrap();
        assert_eq!(decoded.layout, PixelLayout::Gray8);
        convert_to_srgb(&mut decoded).unwrap();
        assert_eq!(decoded.layout, PixelLayout::Rgb8);
        assert_eq!(decoded.pixels.len(), 16 * 16 * 3);
    }

    #[test]
    fn jpeg_normalizes_to_png_within_budget() {
        let jpeg = sample_jpeg(64, 64, false);
        let out = normalize_image_to_png(&jpeg, 16).unwrap();
        assert!(is_png_data(&out));
        let decoded = decode_image(&out).unwrap();
        assert_eq!((decoded.width, decoded.height), (16, 16));
    }

    #[test]
    fn gray_png_keeps_gray_layout() {
        let mut png = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut png, 4, 2);
            encoder.set_color(png::ColorType::Grayscale);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&[0, 64, 128, 192, 255, 32, 16, 8]).unwrap();
        }
        let decoded = decode_image(&png).unwrap();
        assert_eq!(decoded.layout, PixelLayout::Gray8);
        assert_eq!(decoded.pixels.len(), 8);
    }

    #[test]
    fn thumbnail_fits_both_bounds() {
        let png = sample_png(100, 50);
        let (w, h, rgb) = thumbnail_rgb(&png, 40, 40).unwrap();
        assert_eq!((w, h), (40, 20));
        assert_eq!(rgb.len(), (w * h * 3) as usize);

        // already small enough: untouched
        let png = sample_png(10, 10);
        let (w, h, _) = thumbnail_rgb(&png, 40, 40).unwrap();
        assert_eq!((w, h), (10, 10));
    }

    #[test]
    fn garbage_input_is_unsupported() {
        assert!(matches!(
            normalize_image_to_png(b"definitely not an image", 512),
            Err(CoverPipelineError::UnsupportedFormat)
        ));
    }
}
