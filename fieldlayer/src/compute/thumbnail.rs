//! Per-land index thumbnails.

use chrono::NaiveDate;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use crate::ids::{LandId, TenantId};

/// Pixel window of a raster, `x0..x1` by `y0..y1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelWindow {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }
}

/// Colour for an index value: brown for bare soil through yellow to green.
fn ramp(value: f32) -> Rgba<u8> {
    let t = ((value + 0.2) / 1.0).clamp(0.0, 1.0);
    let (r, g, b) = if t < 0.5 {
        let k = t / 0.5;
        (140.0 + 100.0 * k, 90.0 + 130.0 * k, 40.0)
    } else {
        let k = (t - 0.5) / 0.5;
        (240.0 - 210.0 * k, 220.0 - 80.0 * k, 40.0 + 10.0 * k)
    };
    Rgba([r as u8, g as u8, b as u8, 255])
}

/// Renders `window` of an index raster as a PNG.
///
/// Pixels for which `include` returns false, and non-finite values, are
/// transparent.
pub fn render_thumbnail(
    values: &[f32],
    raster_width: u32,
    window: PixelWindow,
    include: impl Fn(u32, u32) -> bool,
) -> Result<Vec<u8>, image::ImageError> {
    let img = RgbaImage::from_fn(window.width().max(1), window.height().max(1), |dx, dy| {
        let (x, y) = (window.x0 + dx, window.y0 + dy);
        let v = values
            .get((y * raster_width + x) as usize)
            .copied()
            .unwrap_or(f32::NAN);
        if v.is_finite() && include(x, y) {
            ramp(v)
        } else {
            Rgba([0, 0, 0, 0])
        }
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// Writes thumbnails under a root directory as
/// `<tenant>/<land>/<date>.png`.
#[derive(Debug, Clone)]
pub struct ThumbnailWriter {
    root: PathBuf,
}

impl ThumbnailWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, tenant: &TenantId, land: &LandId, date: NaiveDate) -> PathBuf {
        self.root
            .join(sanitize(tenant.as_str()))
            .join(sanitize(land.as_str()))
            .join(format!("{}.png", date))
    }

    /// Writes `png` and returns a `file://` URL for it.
    pub fn write(
        &self,
        tenant: &TenantId,
        land: &LandId,
        date: NaiveDate,
        png: &[u8],
    ) -> io::Result<String> {
        let path = self.path_for(tenant, land, date);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, png)?;
        Ok(format!("file://{}", path.display()))
    }
}

/// Keeps identifiers from escaping the thumbnail root.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_render_window_dimensions() {
        let values = vec![0.6f32; 16];
        let window = PixelWindow { x0: 1, y0: 1, x1: 3, y1: 4 };
        let png = render_thumbnail(&values, 4, window, |_, _| true).unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (2, 3));
        assert_eq!(img.get_pixel(0, 0)[3], 255);
    }

    #[test]
    fn test_excluded_pixels_are_transparent() {
        let values = vec![0.6f32, f32::NAN, 0.6, 0.6];
        let window = PixelWindow { x0: 0, y0: 0, x1: 2, y1: 2 };
        let png = render_thumbnail(&values, 2, window, |x, _| x == 0).unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(0, 0)[3], 255);
        assert_eq!(img.get_pixel(1, 0)[3], 0);
        assert_eq!(img.get_pixel(1, 1)[3], 0);
    }

    #[test]
    fn test_ramp_runs_brown_to_green() {
        let bare = ramp(-0.2);
        let lush = ramp(0.8);
        assert!(bare[0] > bare[1]);
        assert!(lush[1] > lush[0]);
    }

    #[test]
    fn test_writer_layout_and_sanitizing() {
        let temp = TempDir::new().unwrap();
        let writer = ThumbnailWriter::new(temp.path());
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let url = writer
            .write(&TenantId::from("acme"), &LandId::from("../etc"), day, b"png")
            .unwrap();

        let path = temp.path().join("acme").join("___etc").join("2024-06-01.png");
        assert!(path.exists());
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("2024-06-01.png"));
    }
}
