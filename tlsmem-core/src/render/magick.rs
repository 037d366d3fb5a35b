// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Rasterizer collaborator.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::raster::Raster;
use crate::error::RenderError;

/// Converts vector charts to rasters and rasters to PNG.
#[allow(async_fn_in_trait)]
pub trait Rasterizer {
    async fn to_raster(&self, svg: &str) -> Result<Raster, RenderError>;

    async fn encode_png(&self, raster: &Raster, path: &Path) -> Result<(), RenderError>;
}

/// [`Rasterizer`] backed by ImageMagick.
#[derive(Debug, Clone)]
pub struct MagickRasterizer {
    program: String,
    density: u32,
}

impl MagickRasterizer {
    pub fn new(program: impl Into<String>, density: u32) -> Self {
        Self {
            program: program.into(),
            density,
        }
    }

    /// Feed `input` to the program's stdin and collect stdout.
    async fn pipe(&self, args: &[String], input: &[u8]) -> Result<Vec<u8>, RenderError> {
        let fail = |reason: String| RenderError::Rasterizer {
            program: self.program.clone(),
            reason,
        };

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| fail(format!("spawn: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| fail("stdin not captured".to_string()))?;

        // Write and read concurrently so a large output cannot stall the pipe
        let write = async move {
            let result = stdin.write_all(input).await;
            drop(stdin);
            result
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output.map_err(|e| fail(format!("wait: {}", e)))?;

        if !output.status.success() {
            return Err(fail(format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        written.map_err(|e| fail(format!("write: {}", e)))?;
        Ok(output.stdout)
    }
}

impl Rasterizer for MagickRasterizer {
    async fn to_raster(&self, svg: &str) -> Result<Raster, RenderError> {
        let args: Vec<String> = vec![
            "-density".into(),
            self.density.to_string(),
            "-background".into(),
            "white".into(),
            "svg:-".into(),
            "-flatten".into(),
            "-depth".into(),
            "8".into(),
            "ppm:-".into(),
        ];
        let ppm = self.pipe(&args, svg.as_bytes()).await?;
        Raster::from_ppm(&ppm)
    }

    async fn encode_png(&self, raster: &Raster, path: &Path) -> Result<(), RenderError> {
        let args = vec!["ppm:-".to_string(), format!("png:{}", path.display())];
        self.pipe(&args, &raster.to_ppm()).await?;
        Ok(())
    }
}
