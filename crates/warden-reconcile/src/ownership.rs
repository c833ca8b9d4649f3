// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tracing::{debug, instrument, warn};
use warden_common_config::PathsConfig;
use warden_system::{Ownership, SystemError, SystemOps};

#[derive(Debug, Error)]
pub enum OwnershipError {
	#[error("I/O error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error(transparent)]
	System(#[from] SystemError),
}

/// Hands every entry of a user's home directory to that user. Symlinks
/// (shared mounts) are skipped: their targets belong to someone else.
pub struct OwnershipReconciler {
	paths: PathsConfig,
	system: Arc<dyn SystemOps>,
}

impl OwnershipReconciler {
	pub fn new(paths: PathsConfig, system: Arc<dyn SystemOps>) -> Self {
		Self { paths, system }
	}

	/// Returns the number of entries re-owned.
	#[instrument(skip(self))]
	pub async fn fix(&self, username: &str) -> Result<usize, OwnershipError> {
		let home = self.paths.home_dir(username);
		let io_err = |source| OwnershipError::Io {
			path: home.clone(),
			source,
		};

		let mut entries = match fs::read_dir(&home).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				warn!(home = %home.display(), "home directory missing, skipping ownership fix");
				return Ok(0);
			}
			Err(e) => return Err(io_err(e)),
		};

		let owner = Ownership::user(username);
		let mut fixed = 0;
		while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
			let path = entry.path();
			// DirEntry::file_type does not follow symlinks
			if entry.file_type().await.map_err(io_err)?.is_symlink() {
				debug!(path = %path.display(), "skipping symlink");
				continue;
			}
			self.system.chown_recursive(&path, &owner).await?;
			fixed += 1;
		}

		debug!(fixed, "ownership reconciled");
		Ok(fixed)
	}
}
