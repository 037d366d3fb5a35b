// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Git fetch collaborator.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use super::cargo::log_tail;
use crate::error::BuildError;

/// Fetches a pinned source revision.
#[allow(async_fn_in_trait)]
pub trait Fetcher {
    /// Check out `rev` of `url` and return the checkout directory.
    async fn fetch(&self, url: &str, rev: &str) -> Result<PathBuf, BuildError>;
}

/// [`Fetcher`] doing a shallow fetch of one ref with `git`.
///
/// Checkouts land in `<cache>/src/<repo>-<rev>` and are reused on later
/// sessions. A fetch is staged in a `.partial` directory and renamed into
/// place so an interrupted fetch is never mistaken for a checkout.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    git: String,
    cache_dir: PathBuf,
}

impl GitFetcher {
    pub fn new(git: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            git: git.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Checkout directory for `url` at `rev`. The readable part is lossy,
    /// so a hash of the exact pair keeps distinct refs apart.
    pub fn checkout_dir(&self, url: &str, rev: &str) -> PathBuf {
        let repo = url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(url)
            .trim_end_matches(".git");
        self.cache_dir
            .join("src")
            .join(format!(
                "{}-{}-{:08x}",
                sanitize(repo),
                sanitize(rev),
                crc32fast::hash(format!("{}@{}", url, rev).as_bytes())
            ))
    }

    async fn git(&self, dir: &Path, args: &[&str], url: &str, rev: &str) -> Result<(), BuildError> {
        let output = Command::new(&self.git)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| BuildError::Spawn {
                program: self.git.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(BuildError::Fetch {
                url: url.to_string(),
                rev: rev.to_string(),
                log: log_tail(&output.stderr),
            });
        }
        Ok(())
    }
}

impl Fetcher for GitFetcher {
    async fn fetch(&self, url: &str, rev: &str) -> Result<PathBuf, BuildError> {
        let checkout = self.checkout_dir(url, rev);
        if checkout.is_dir() {
            tracing::debug!(url, rev, checkout = %checkout.display(), "Reusing checkout");
            return Ok(checkout);
        }

        let mut partial = checkout.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        if partial.exists() {
            fs::remove_dir_all(&partial)
                .map_err(io_err("remove stale partial checkout", &partial))?;
        }
        fs::create_dir_all(&partial).map_err(io_err("create checkout directory", &partial))?;

        tracing::info!(url, rev, "Fetching source");

        self.git(&partial, &["init", "--quiet"], url, rev).await?;
        self.git(&partial, &["fetch", "--quiet", "--depth", "1", url, rev], url, rev)
            .await?;
        self.git(&partial, &["checkout", "--quiet", "FETCH_HEAD"], url, rev)
            .await?;

        fs::rename(&partial, &checkout).map_err(io_err("move checkout into place", &checkout))?;
        Ok(checkout)
    }
}

fn io_err(context: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> BuildError {
    let path = path.to_path_buf();
    move |source| BuildError::Io {
        context,
        path,
        source,
    }
}

fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '-' })
        .collect()
}
