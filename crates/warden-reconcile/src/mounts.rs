// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use thiserror::Error;
use tokio::fs;
use tracing::{debug, instrument, warn};
use warden_common_config::PathsConfig;

#[derive(Debug, Error)]
#[error("I/O error on {path}: {source}")]
pub struct MountError {
	pub path: PathBuf,
	#[source]
	pub source: std::io::Error,
}

/// A directory under the shared mounts root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
	pub name: String,
	pub target: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountSyncReport {
	pub created: Vec<String>,
	/// Names already taken in the home directory, by a link or anything else.
	pub skipped: Vec<String>,
}

/// Links every shared mount into a user's home directory as
/// `~/<name> -> <mounts_root>/<name>`.
pub struct MountLinker {
	paths: PathsConfig,
}

impl MountLinker {
	pub fn new(paths: PathsConfig) -> Self {
		Self { paths }
	}

	/// Shared mount entries, sorted by name. A missing mounts root has none.
	pub async fn entries(&self) -> Result<Vec<MountEntry>, MountError> {
		let root = &self.paths.mounts_root;
		let io_err = |source| MountError {
			path: root.clone(),
			source,
		};

		let mut dir = match fs::read_dir(root).await {
			Ok(dir) => dir,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!(root = %root.display(), "mounts root missing, nothing to link");
				return Ok(Vec::new());
			}
			Err(e) => return Err(io_err(e)),
		};

		let mut entries = Vec::new();
		while let Some(entry) = dir.next_entry().await.map_err(io_err)? {
			entries.push(MountEntry {
				name: entry.file_name().to_string_lossy().into_owned(),
				target: entry.path(),
			});
		}
		entries.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(entries)
	}

	/// Create missing links. Anything already present under a mount's name
	/// is left alone, wherever it points.
	#[instrument(skip(self))]
	pub async fn sync(&self, username: &str) -> Result<MountSyncReport, MountError> {
		let home = self.paths.home_dir(username);
		if !fs::try_exists(&home).await.map_err(|source| MountError {
			path: home.clone(),
			source,
		})? {
			warn!(home = %home.display(), "home directory missing, skipping mount links");
			return Ok(MountSyncReport::default());
		}

		let mut report = MountSyncReport::default();
		for entry in self.entries().await? {
			let link = home.join(&entry.name);
			match fs::symlink_metadata(&link).await {
				Ok(_) => {
					debug!(name = %entry.name, "name already taken, leaving as is");
					report.skipped.push(entry.name);
				}
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
					fs::symlink(&entry.target, &link)
						.await
						.map_err(|source| MountError {
							path: link.clone(),
							source,
						})?;
					debug!(name = %entry.name, target = %entry.target.display(), "linked shared mount");
					report.created.push(entry.name);
				}
				Err(source) => return Err(MountError { path: link, source }),
			}
		}

		Ok(report)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::Path;

	fn setup(dir: &Path, mounts: &[&str]) -> MountLinker {
		for name in mounts {
			std::fs::create_dir_all(dir.join("mounts").join(name)).unwrap();
		}
		std::fs::create_dir_all(dir.join("home/alice")).unwrap();
		MountLinker::new(PathsConfig::under(dir.join("data"), dir))
	}

	fn links(home: &Path) -> Vec<(String, PathBuf)> {
		let mut links: Vec<_> = std::fs::read_dir(home)
			.unwrap()
			.map(|e| e.unwrap())
			.filter(|e| e.file_type().unwrap().is_symlink())
			.map(|e| {
				(
					e.file_name().to_string_lossy().into_owned(),
					std::fs::read_link(e.path()).unwrap(),
				)
			})
			.collect();
		links.sort();
		links
	}

	#[tokio::test]
	async fn test_sync_links_every_mount() {
		let dir = tempfile::tempdir().unwrap();
		let linker = setup(dir.path(), &["projects", "archive"]);

		let report = linker.sync("alice").await.unwrap();
		assert_eq!(report.created, vec!["archive", "projects"]);
		assert!(report.skipped.is_empty());
		assert_eq!(
			links(&dir.path().join("home/alice")),
			vec![
				("archive".to_string(), dir.path().join("mounts/archive")),
				("projects".to_string(), dir.path().join("mounts/projects")),
			]
		);
	}

	/// Test: Linking twice yields the same link set and no errors.
	///
	/// Why this test is important: mount linking runs on every boot and
	/// every manual sync.
	#[tokio::test]
	async fn test_sync_is_idempotent() {
		let dir = tempfile::tempdir().unwrap();
		let linker = setup(dir.path(), &["projects", "archive"]);
		let home = dir.path().join("home/alice");

		linker.sync("alice").await.unwrap();
		let first = links(&home);
		let report = linker.sync("alice").await.unwrap();

		assert!(report.created.is_empty());
		assert_eq!(report.skipped.len(), 2);
		assert_eq!(links(&home), first);
	}

	#[tokio::test]
	async fn test_existing_file_with_mount_name_is_left_alone() {
		let dir = tempfile::tempdir().unwrap();
		let linker = setup(dir.path(), &["projects"]);
		let home = dir.path().join("home/alice");
		std::fs::write(home.join("projects"), "my own file").unwrap();

		let report = linker.sync("alice").await.unwrap();
		assert_eq!(report.skipped, vec!["projects"]);
		assert_eq!(
			std::fs::read_to_string(home.join("projects")).unwrap(),
			"my own file"
		);
	}

	#[tokio::test]
	async fn test_link_pointing_elsewhere_is_left_alone() {
		let dir = tempfile::tempdir().unwrap();
		let linker = setup(dir.path(), &["projects"]);
		let home = dir.path().join("home/alice");
		std::os::unix::fs::symlink("/nonexistent/elsewhere", home.join("projects")).unwrap();

		let report = linker.sync("alice").await.unwrap();
		assert_eq!(report.skipped, vec!["projects"]);
		assert_eq!(
			std::fs::read_link(home.join("projects")).unwrap(),
			PathBuf::from("/nonexistent/elsewhere")
		);
	}

	#[tokio::test]
	async fn test_missing_mounts_root_links_nothing() {
		let dir = tempfile::tempdir().unwrap();
		let linker = setup(dir.path(), &[]);
		std::fs::remove_dir_all(dir.path().join("mounts")).ok();

		let report = linker.sync("alice").await.unwrap();
		assert_eq!(report, MountSyncReport::default());
	}

	#[tokio::test]
	async fn test_missing_home_is_noop() {
		let dir = tempfile::tempdir().unwrap();
		let linker = setup(dir.path(), &["projects"]);
		let report = linker.sync("ghost").await.unwrap();
		assert_eq!(report, MountSyncReport::default());
	}
}
