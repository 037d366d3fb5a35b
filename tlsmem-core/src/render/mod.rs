// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Comparison rendering.
//!
//! Each chart is written twice: the SVG as drawn, and a PNG produced by the
//! rasterizer, cropped by the configured border and trimmed to its content.

pub mod chart;
pub mod magick;
pub mod raster;

use std::fs;
use std::path::{Path, PathBuf};

pub use chart::{render, render_titled, Chart, ChartStyle};
pub use magick::{MagickRasterizer, Rasterizer};
pub use raster::{CropRegion, Raster};

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::trace::Samples;
use crate::types::{CandidateName, ModeName};

/// Samples of several candidates for a single mode.
#[derive(Debug, Clone)]
pub struct SeriesSet {
    mode: ModeName,
    series: Vec<(CandidateName, Samples)>,
}

impl SeriesSet {
    pub fn new(mode: ModeName) -> Self {
        Self {
            mode,
            series: Vec::new(),
        }
    }

    pub fn mode(&self) -> &ModeName {
        &self.mode
    }

    /// Add a candidate's samples taken under `mode`. Samples from another
    /// mode are rejected. A candidate inserted twice keeps its position and
    /// takes the new samples.
    pub fn insert(
        &mut self,
        mode: &ModeName,
        candidate: CandidateName,
        samples: Samples,
    ) -> Result<(), RenderError> {
        if *mode != self.mode {
            return Err(RenderError::ModeMismatch {
                expected: self.mode.to_string(),
                found: mode.to_string(),
            });
        }

        match self.series.iter_mut().find(|(name, _)| *name == candidate) {
            Some((_, existing)) => *existing = samples,
            None => self.series.push((candidate, samples)),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Series in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&CandidateName, &Samples)> {
        self.series.iter().map(|(name, samples)| (name, samples))
    }

    pub fn candidates(&self) -> Vec<CandidateName> {
        self.series.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Paths of a written chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartFiles {
    pub svg: PathBuf,
    pub png: PathBuf,
}

/// Renders series sets to SVG and PNG files.
#[derive(Debug, Clone)]
pub struct Renderer<R> {
    rasterizer: R,
    style: ChartStyle,
    crop: Option<CropRegion>,
}

impl<R: Rasterizer> Renderer<R> {
    pub fn new(rasterizer: R, config: &RenderConfig) -> Self {
        Self {
            rasterizer,
            style: ChartStyle {
                width: config.width,
                height: config.height,
            },
            crop: config.crop,
        }
    }

    /// Rasterize `chart`, crop the configured border, then trim to content.
    pub async fn rasterize(&self, chart: &Chart) -> Result<Raster, RenderError> {
        self.rasterizer.to_raster(&chart.svg).await?.crop_then_trim(self.crop)
    }

    /// Write `<dir>/<stem>.svg` and `<dir>/<stem>.png`.
    pub async fn write_chart(
        &self,
        set: &SeriesSet,
        title: &str,
        dir: &Path,
        stem: &str,
    ) -> Result<ChartFiles, RenderError> {
        let chart = render_titled(set, &self.style, title)?;

        fs::create_dir_all(dir).map_err(|e| RenderError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let svg = dir.join(format!("{}.svg", stem));
        fs::write(&svg, &chart.svg).map_err(|e| RenderError::Io {
            path: svg.clone(),
            source: e,
        })?;

        let raster = self.rasterize(&chart).await?;

        let png = dir.join(format!("{}.png", stem));
        self.rasterizer.encode_png(&raster, &png).await?;

        tracing::debug!(
            title,
            svg = %svg.display(),
            png = %png.display(),
            width = raster.width(),
            height = raster.height(),
            "Chart written"
        );

        Ok(ChartFiles { svg, png })
    }
}
