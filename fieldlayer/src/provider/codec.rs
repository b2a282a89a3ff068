//! PNG band packing shared by the HTTP adapters.
//!
//! Both HTTP adapters ask their endpoint for an 8-bit RGBA PNG with
//! red reflectance in R, NIR reflectance in G, cloud probability in B and a
//! data mask in A. A zero alpha marks a pixel without data.

use chrono::NaiveDate;
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;

use super::types::{Imagery, ProviderError};
use crate::coord::BoundingBox;

/// Cloud probability above which a pixel counts toward scene cloud cover.
const SCENE_CLOUD_PROBABILITY: f32 = 0.5;

/// Decodes a band-packed PNG into [`Imagery`].
pub fn decode_png(
    bytes: &[u8],
    bbox: BoundingBox,
    acquired_on: NaiveDate,
    source: &str,
) -> Result<Imagery, ProviderError> {
    let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Png)
        .map_err(|e| ProviderError::Transient(format!("undecodable imagery: {}", e)))?
        .to_rgba8();

    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(ProviderError::NoCoverage("empty raster".to_string()));
    }

    let n = width as usize * height as usize;
    let mut red = Vec::with_capacity(n);
    let mut nir = Vec::with_capacity(n);
    let mut cloud = Vec::with_capacity(n);
    let mut valid = 0usize;
    let mut cloudy = 0usize;

    for px in decoded.pixels() {
        let [r, g, b, a] = px.0;
        if a == 0 {
            red.push(f32::NAN);
            nir.push(f32::NAN);
            cloud.push(f32::NAN);
            continue;
        }
        let c = b as f32 / 255.0;
        valid += 1;
        if c > SCENE_CLOUD_PROBABILITY {
            cloudy += 1;
        }
        red.push(r as f32 / 255.0);
        nir.push(g as f32 / 255.0);
        cloud.push(c);
    }

    if valid == 0 {
        return Err(ProviderError::NoCoverage("raster has no valid pixels".to_string()));
    }

    Ok(Imagery {
        width,
        height,
        bbox,
        acquired_on,
        red,
        nir,
        cloud,
        cloud_cover_pct: cloudy as f64 / valid as f64 * 100.0,
        source: source.to_string(),
    })
}

/// Packs imagery back into the PNG layout [`decode_png`] reads.
pub fn encode_png(imagery: &Imagery) -> Result<Vec<u8>, image::ImageError> {
    let quantize = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let img = RgbaImage::from_fn(imagery.width, imagery.height, |x, y| {
        let i = (y * imagery.width + x) as usize;
        let (r, g, b) = (imagery.red[i], imagery.nir[i], imagery.cloud[i]);
        if r.is_nan() || g.is_nan() {
            image::Rgba([0, 0, 0, 0])
        } else {
            image::Rgba([quantize(r), quantize(g), quantize(b), 255])
        }
    });

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}
