// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SSH host identity: generated once, then always restored.
//!
//! Clients pin the host keys in their known-hosts files, so the bundle is
//! never regenerated once it has been persisted.

use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument, warn};
use warden_system::{Ownership, SystemError, SystemOps};

#[derive(Debug, Error)]
pub enum HostKeyError {
	#[error("host key bundle {0} exists but contains no host keys")]
	EmptyBundle(PathBuf),

	#[error("host key generation produced no keys in {0}")]
	NothingGenerated(PathBuf),

	#[error("I/O error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error(transparent)]
	System(#[from] SystemError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> HostKeyError + '_ {
	move |source| HostKeyError::Io {
		path: path.to_path_buf(),
		source,
	}
}

/// `ssh_host_<type>_key` or `ssh_host_<type>_key.pub`.
pub fn is_host_key_file(name: &str) -> bool {
	name.starts_with("ssh_host_") && (name.ends_with("_key") || name.ends_with("_key.pub"))
}

pub fn host_key_mode(name: &str) -> u32 {
	if name.ends_with(".pub") {
		0o644
	} else {
		0o600
	}
}

async fn list_host_key_files(dir: &Path) -> Result<Vec<String>, HostKeyError> {
	let mut entries = match fs::read_dir(dir).await {
		Ok(entries) => entries,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
		Err(e) => return Err(io_error(dir)(e)),
	};

	let mut names = Vec::new();
	while let Some(entry) = entries.next_entry().await.map_err(io_error(dir))? {
		let name = entry.file_name().to_string_lossy().into_owned();
		if is_host_key_file(&name) && entry.file_type().await.map_err(io_error(dir))?.is_file() {
			names.push(name);
		}
	}
	names.sort();
	Ok(names)
}

fn staging_path(bundle_dir: &Path) -> PathBuf {
	let mut name = OsString::from(bundle_dir.as_os_str());
	name.push(".partial");
	PathBuf::from(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKeyOutcome {
	/// True when this call generated a new bundle.
	pub generated: bool,
	pub files: Vec<String>,
}

pub struct HostIdentityStore {
	live_dir: PathBuf,
	bundle_dir: PathBuf,
	system: Arc<dyn SystemOps>,
}

impl HostIdentityStore {
	pub fn new(
		live_dir: impl Into<PathBuf>,
		bundle_dir: impl Into<PathBuf>,
		system: Arc<dyn SystemOps>,
	) -> Self {
		Self {
			live_dir: live_dir.into(),
			bundle_dir: bundle_dir.into(),
			system,
		}
	}

	pub fn bundle_dir(&self) -> &Path {
		&self.bundle_dir
	}

	/// Generate the bundle if none is persisted, then install it as the
	/// live host keys.
	#[instrument(skip_all, fields(bundle = %self.bundle_dir.display()))]
	pub async fn ensure_and_restore(&self) -> Result<HostKeyOutcome, HostKeyError> {
		let generated = if fs::try_exists(&self.bundle_dir)
			.await
			.map_err(io_error(&self.bundle_dir))?
		{
			false
		} else {
			self.generate().await?;
			true
		};

		let files = list_host_key_files(&self.bundle_dir).await?;
		if files.is_empty() {
			return Err(HostKeyError::EmptyBundle(self.bundle_dir.clone()));
		}

		fs::create_dir_all(&self.live_dir)
			.await
			.map_err(io_error(&self.live_dir))?;

		let root = Ownership::root();
		for name in &files {
			let dest = self.live_dir.join(name);
			fs::copy(self.bundle_dir.join(name), &dest)
				.await
				.map_err(io_error(&dest))?;
			self.system.chown(&dest, &root).await?;
			fs::set_permissions(&dest, std::fs::Permissions::from_mode(host_key_mode(name)))
				.await
				.map_err(io_error(&dest))?;
		}

		info!(generated, count = files.len(), "host keys installed");
		Ok(HostKeyOutcome { generated, files })
	}

	/// Replace the live keys with freshly generated ones and persist them.
	///
	/// The bundle is assembled in a staging directory and renamed into
	/// place, so the bundle directory only ever exists complete.
	async fn generate(&self) -> Result<(), HostKeyError> {
		warn!("no persisted host key bundle, generating a new host identity");

		for name in list_host_key_files(&self.live_dir).await? {
			let path = self.live_dir.join(&name);
			fs::remove_file(&path).await.map_err(io_error(&path))?;
			debug!(file = %name, "removed stale live host key");
		}

		self.system.generate_host_keys(&self.live_dir).await?;

		let generated = list_host_key_files(&self.live_dir).await?;
		if generated.is_empty() {
			return Err(HostKeyError::NothingGenerated(self.live_dir.clone()));
		}

		let staging = staging_path(&self.bundle_dir);
		if fs::try_exists(&staging).await.map_err(io_error(&staging))? {
			fs::remove_dir_all(&staging)
				.await
				.map_err(io_error(&staging))?;
		}
		fs::create_dir_all(&staging)
			.await
			.map_err(io_error(&staging))?;
		for name in &generated {
			let dest = staging.join(name);
			fs::copy(self.live_dir.join(name), &dest)
				.await
				.map_err(io_error(&dest))?;
		}
		fs::rename(&staging, &self.bundle_dir)
			.await
			.map_err(io_error(&self.bundle_dir))?;

		info!(count = generated.len(), "persisted new host key bundle");
		Ok(())
	}
}
