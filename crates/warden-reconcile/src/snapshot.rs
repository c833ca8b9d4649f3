// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted copies of the OS account tables.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument};
use warden_system::{Ownership, SystemError, SystemOps};

/// Account tables that must exist on a live system.
pub const PRIMARY_TABLES: &[&str] = &["passwd", "shadow", "group"];

/// Backup copies written by the account tools; persisted when present.
pub const BACKUP_TABLES: &[&str] = &["passwd-", "shadow-", "group-"];

#[derive(Debug, Error)]
pub enum SnapshotError {
	#[error("account table {0} does not exist")]
	MissingSource(PathBuf),

	#[error("I/O error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error(transparent)]
	System(#[from] SystemError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SnapshotError + '_ {
	move |source| SnapshotError::Io {
		path: path.to_path_buf(),
		source,
	}
}

/// Mode for a restored table: shadow tables are root-only.
pub fn table_mode(table: &str) -> u32 {
	if table.starts_with("shadow") {
		0o600
	} else {
		0o640
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
	/// No persisted passwd table; this is the first boot.
	NothingToRestore,
	Restored { tables: Vec<String> },
}

pub struct AccountSnapshotStore {
	live_dir: PathBuf,
	snapshot_dir: PathBuf,
	system: Arc<dyn SystemOps>,
}

impl AccountSnapshotStore {
	pub fn new(
		live_dir: impl Into<PathBuf>,
		snapshot_dir: impl Into<PathBuf>,
		system: Arc<dyn SystemOps>,
	) -> Self {
		Self {
			live_dir: live_dir.into(),
			snapshot_dir: snapshot_dir.into(),
			system,
		}
	}

	pub fn snapshot_dir(&self) -> &Path {
		&self.snapshot_dir
	}

	/// Whether a usable snapshot exists (persisted passwd present and
	/// non-empty).
	pub async fn has_snapshot(&self) -> Result<bool, SnapshotError> {
		let passwd = self.snapshot_dir.join("passwd");
		match fs::metadata(&passwd).await {
			Ok(meta) => Ok(meta.len() > 0),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
			Err(e) => Err(io_error(&passwd)(e)),
		}
	}

	/// Copy the live account tables into the snapshot directory.
	#[instrument(skip_all, fields(dir = %self.snapshot_dir.display()))]
	pub async fn backup(&self) -> Result<Vec<String>, SnapshotError> {
		fs::create_dir_all(&self.snapshot_dir)
			.await
			.map_err(io_error(&self.snapshot_dir))?;

		let mut copied = Vec::new();
		for table in PRIMARY_TABLES {
			let source = self.live_dir.join(table);
			if !fs::try_exists(&source).await.map_err(io_error(&source))? {
				return Err(SnapshotError::MissingSource(source));
			}
			self.copy_table(&source, table).await?;
			copied.push(table.to_string());
		}
		for table in BACKUP_TABLES {
			let source = self.live_dir.join(table);
			if fs::try_exists(&source).await.map_err(io_error(&source))? {
				self.copy_table(&source, table).await?;
				copied.push(table.to_string());
			}
		}

		debug!(tables = ?copied, "backed up account tables");
		Ok(copied)
	}

	async fn copy_table(&self, source: &Path, table: &str) -> Result<(), SnapshotError> {
		let dest = self.snapshot_dir.join(table);
		fs::copy(source, &dest).await.map_err(io_error(&dest))?;
		Ok(())
	}

	/// Copy the persisted tables over the live ones and fix their ownership
	/// and modes. A no-op on first boot.
	#[instrument(skip_all, fields(dir = %self.snapshot_dir.display()))]
	pub async fn restore(&self) -> Result<RestoreOutcome, SnapshotError> {
		if !self.has_snapshot().await? {
			info!("no account snapshot found, nothing to restore");
			return Ok(RestoreOutcome::NothingToRestore);
		}

		fs::create_dir_all(&self.live_dir)
			.await
			.map_err(io_error(&self.live_dir))?;

		let root = Ownership::root();
		let mut restored = Vec::new();
		for table in PRIMARY_TABLES.iter().chain(BACKUP_TABLES) {
			let source = self.snapshot_dir.join(table);
			if !fs::try_exists(&source).await.map_err(io_error(&source))? {
				continue;
			}
			let dest = self.live_dir.join(table);
			fs::copy(&source, &dest).await.map_err(io_error(&dest))?;
			self.system.chown(&dest, &root).await?;
			fs::set_permissions(&dest, std::fs::Permissions::from_mode(table_mode(table)))
				.await
				.map_err(io_error(&dest))?;
			restored.push(table.to_string());
		}

		info!(tables = ?restored, "restored account tables");
		Ok(RestoreOutcome::Restored { tables: restored })
	}
}
