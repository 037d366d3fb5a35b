// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! In-memory RGB raster with crop and trim.
//!
//! Rasters travel to and from the rasterizer as binary PPM (P6), which is
//! lossless and trivial to decode.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RenderError;

/// Fixed background color; trimming against it is idempotent.
pub const BACKGROUND: [u8; 3] = [255, 255, 255];

/// Border widths removed from each edge before trimming.
///
/// The offsets are in pixels of the rasterized chart, so a region calibrated
/// at one density is wrong at another.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CropRegion {
    #[serde(default)]
    pub left: u32,
    #[serde(default)]
    pub top: u32,
    #[serde(default)]
    pub right: u32,
    #[serde(default)]
    pub bottom: u32,
}

impl fmt::Display for CropRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "left={} top={} right={} bottom={}",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// Inclusive-exclusive pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// 8-bit RGB image, row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl fmt::Debug for Raster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raster")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl Raster {
    /// A raster filled with `color`.
    pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let pixels = color
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = self.offset(x, y);
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        let i = self.offset(x, y);
        self.pixels[i..i + 3].copy_from_slice(&color);
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 3
    }

    /// Decode a binary PPM with maxval 255.
    pub fn from_ppm(data: &[u8]) -> Result<Self, RenderError> {
        let mut pos = 0;
        let mut fields = [0u32; 3];

        let magic = next_token(data, &mut pos).ok_or_else(|| malformed("missing magic"))?;
        if magic != b"P6" {
            return Err(malformed("not a binary PPM (P6)"));
        }

        for field in fields.iter_mut() {
            let token = next_token(data, &mut pos).ok_or_else(|| malformed("truncated header"))?;
            *field = std::str::from_utf8(token)
                .ok()
                .and_then(|t| t.parse().ok())
                .ok_or_else(|| malformed("bad header number"))?;
        }
        let [width, height, maxval] = fields;

        if maxval != 255 {
            return Err(malformed(&format!("unsupported maxval {}", maxval)));
        }

        // Exactly one whitespace byte separates the header from the pixels
        pos += 1;
        let len = width as usize * height as usize * 3;
        let pixels = data
            .get(pos..pos + len)
            .ok_or_else(|| malformed("pixel data shorter than header"))?
            .to_vec();

        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Encode as binary PPM.
    pub fn to_ppm(&self) -> Vec<u8> {
        let mut out = format!("P6\n{} {}\n255\n", self.width, self.height).into_bytes();
        out.extend_from_slice(&self.pixels);
        out
    }

    /// Copy out a sub-rectangle.
    pub fn sub_image(&self, bounds: Bounds) -> Self {
        let mut pixels = Vec::with_capacity(bounds.width as usize * bounds.height as usize * 3);
        for y in bounds.y..bounds.y + bounds.height {
            let start = self.offset(bounds.x, y);
            pixels.extend_from_slice(&self.pixels[start..start + bounds.width as usize * 3]);
        }
        Self {
            width: bounds.width,
            height: bounds.height,
            pixels,
        }
    }

    /// Remove a fixed border. The region must leave at least one pixel.
    pub fn crop(&self, region: CropRegion) -> Result<Self, RenderError> {
        let horizontal = region.left as u64 + region.right as u64;
        let vertical = region.top as u64 + region.bottom as u64;
        if horizontal >= self.width as u64 || vertical >= self.height as u64 {
            return Err(RenderError::CropOutOfBounds {
                region: region.to_string(),
                width: self.width,
                height: self.height,
            });
        }

        Ok(self.sub_image(Bounds {
            x: region.left,
            y: region.top,
            width: self.width - horizontal as u32,
            height: self.height - vertical as u32,
        }))
    }

    /// Bounding box of pixels that differ from `background`, if any.
    pub fn content_bounds(&self, background: [u8; 3]) -> Option<Bounds> {
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0;
        let mut max_y = 0;
        let mut found = false;

        for y in 0..self.height {
            for x in 0..self.width {
                if self.pixel(x, y) != background {
                    found = true;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }

        found.then(|| Bounds {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
        })
    }

    /// Trim background borders. A blank raster is returned unchanged.
    pub fn trim(&self) -> Self {
        match self.content_bounds(BACKGROUND) {
            Some(bounds) => self.sub_image(bounds),
            None => self.clone(),
        }
    }

    /// Crop the fixed border first, then trim what remains.
    pub fn crop_then_trim(&self, crop: Option<CropRegion>) -> Result<Self, RenderError> {
        let cropped = match crop {
            Some(region) => self.crop(region)?,
            None => self.clone(),
        };
        Ok(cropped.trim())
    }
}

fn malformed(reason: &str) -> RenderError {
    RenderError::MalformedRaster {
        reason: reason.to_string(),
    }
}

/// Next whitespace-delimited header token, skipping `#` comments.
fn next_token<'a>(data: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    loop {
        while *pos < data.len() && data[*pos].is_ascii_whitespace() {
            *pos += 1;
        }
        if data.get(*pos) == Some(&b'#') {
            while *pos < data.len() && data[*pos] != b'\n' {
                *pos += 1;
            }
            continue;
        }
        break;
    }

    let start = *pos;
    while *pos < data.len() && !data[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    (*pos > start).then(|| &data[start..*pos])
}

#[cfg(test)]
mod tests {
    use super::*;

    const INK: [u8; 3] = [0, 0, 0];

    /// White 20x10 canvas, black frame at the edges, black box in the middle.
    fn framed() -> Raster {
        let mut raster = Raster::filled(20, 10, BACKGROUND);
        for x in 0..20 {
            raster.set_pixel(x, 0, INK);
        }
        for y in 4..7 {
            for x in 8..12 {
                raster.set_pixel(x, y, INK);
            }
        }
        raster
    }

    #[test]
    fn test_ppm_round_trip_with_comment() {
        let raster = framed();
        let mut ppm = b"P6\n# made by magick\n".to_vec();
        ppm.extend_from_slice(&raster.to_ppm()[3..]);
        assert_eq!(Raster::from_ppm(&ppm).unwrap(), raster);
    }

    #[test]
    fn test_ppm_rejects_short_data() {
        let mut ppm = framed().to_ppm();
        ppm.truncate(ppm.len() - 1);
        assert!(matches!(
            Raster::from_ppm(&ppm),
            Err(RenderError::MalformedRaster { .. })
        ));
        assert!(Raster::from_ppm(b"P3\n1 1\n255\n0 0 0").is_err());
    }

    #[test]
    fn test_trim_finds_content() {
        let trimmed = framed().trim();
        // The top frame row spans the full width
        assert_eq!((trimmed.width(), trimmed.height()), (20, 7));
    }

    #[test]
    fn test_crop_before_trim_removes_frame() {
        let region = CropRegion {
            top: 1,
            ..Default::default()
        };
        let result = framed().crop_then_trim(Some(region)).unwrap();
        assert_eq!((result.width(), result.height()), (4, 3));
        assert_eq!(result.pixel(0, 0), INK);
    }

    #[test]
    fn test_trim_is_idempotent() {
        let crop = CropRegion {
            top: 1,
            ..Default::default()
        };
        let once = framed().crop_then_trim(Some(crop)).unwrap();
        let twice = once.trim();
        assert_eq!(once, twice);
        assert_eq!(
            twice.content_bounds(BACKGROUND),
            Some(Bounds {
                x: 0,
                y: 0,
                width: 4,
                height: 3
            })
        );
    }

    #[test]
    fn test_crop_out_of_bounds() {
        let region = CropRegion {
            left: 10,
            right: 10,
            ..Default::default()
        };
        assert!(matches!(
            framed().crop(region),
            Err(RenderError::CropOutOfBounds { width: 20, height: 10, .. })
        ));
    }

    #[test]
    fn test_blank_raster_trim_unchanged() {
        let blank = Raster::filled(5, 5, BACKGROUND);
        assert_eq!(blank.trim(), blank);
        assert_eq!(blank.content_bounds(BACKGROUND), None);
    }
}
