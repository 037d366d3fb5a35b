// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Collaborator discovery.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Resolve `program` to an executable.
///
/// A name containing a path separator must point at an executable file.
/// A bare name is looked up in `PATH`.
pub fn find_program(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }

    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

/// Fail with [`ConfigError::MissingCollaborator`] for the first program that
/// cannot be resolved.
pub fn require_programs<'a>(
    programs: impl IntoIterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    for program in programs {
        match find_program(program) {
            Some(path) => tracing::debug!(program, path = %path.display(), "Collaborator found"),
            None => {
                return Err(ConfigError::MissingCollaborator {
                    program: program.to_string(),
                })
            }
        }
    }
    Ok(())
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
