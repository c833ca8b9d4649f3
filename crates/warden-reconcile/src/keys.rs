// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authorized key synchronization.
//!
//! Keys are fetched from an external key host (`<host>/<handle>.keys`) and
//! merged into `~/.ssh/authorized_keys`. Merging is strictly additive: a key
//! that disappears upstream, or was added by hand, is never removed.

use std::collections::BTreeSet;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use url::Url;
use warden_common_config::{KeysConfig, PathsConfig};
use warden_system::{SystemError, SystemOps};

#[derive(Debug, Error)]
pub enum KeySyncError {
	#[error("invalid external handle {handle:?}: {reason}")]
	InvalidHandle { handle: String, reason: String },

	#[error("invalid key host URL {url}: {reason}")]
	InvalidHostUrl { url: String, reason: String },

	#[error("failed to build HTTP client: {0}")]
	Client(#[source] reqwest::Error),

	#[error("failed to fetch keys from {url}: {source}")]
	Http {
		url: Url,
		#[source]
		source: reqwest::Error,
	},

	#[error("key host returned {status} for {url}")]
	Status { url: Url, status: u16 },

	#[error("invalid public key: {0}")]
	InvalidKey(String),

	#[error("home directory {0} does not exist")]
	HomeMissing(PathBuf),

	#[error("I/O error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error(transparent)]
	System(#[from] SystemError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> KeySyncError + '_ {
	move |source| KeySyncError::Io {
		path: path.to_path_buf(),
		source,
	}
}

/// Source of a user's public keys.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
	/// Fetch the raw, newline separated key list for `handle`.
	async fn fetch(&self, handle: &str) -> Result<String, KeySyncError>;
}

/// Fetches `<host_url>/<handle>.keys` over HTTP(S).
pub struct HttpKeyFetcher {
	client: reqwest::Client,
	base_url: Url,
}

impl HttpKeyFetcher {
	pub fn new(config: &KeysConfig) -> Result<Self, KeySyncError> {
		let mut base_url =
			Url::parse(&config.host_url).map_err(|e| KeySyncError::InvalidHostUrl {
				url: config.host_url.clone(),
				reason: e.to_string(),
			})?;
		if base_url.cannot_be_a_base() {
			return Err(KeySyncError::InvalidHostUrl {
				url: config.host_url.clone(),
				reason: "cannot be used as a base URL".to_string(),
			});
		}
		// Url::join replaces the last path segment unless the path ends in '/'
		if !base_url.path().ends_with('/') {
			let path = format!("{}/", base_url.path());
			base_url.set_path(&path);
		}

		let client =
			warden_common_http::new_client_with_timeout(config.timeout()).map_err(KeySyncError::Client)?;
		Ok(Self { client, base_url })
	}

	/// URL of the key list for `handle`.
	pub fn keys_url(&self, handle: &str) -> Result<Url, KeySyncError> {
		validate_handle(handle)?;
		self
			.base_url
			.join(&format!("{handle}.keys"))
			.map_err(|e| KeySyncError::InvalidHandle {
				handle: handle.to_string(),
				reason: e.to_string(),
			})
	}
}

#[async_trait]
impl KeyFetcher for HttpKeyFetcher {
	#[instrument(skip(self))]
	async fn fetch(&self, handle: &str) -> Result<String, KeySyncError> {
		let url = self.keys_url(handle)?;
		debug!(url = %url, "fetching public keys");

		let response = self
			.client
			.get(url.clone())
			.send()
			.await
			.map_err(|source| KeySyncError::Http {
				url: url.clone(),
				source,
			})?;

		let status = response.status();
		if !status.is_success() {
			return Err(KeySyncError::Status {
				url,
				status: status.as_u16(),
			});
		}

		response
			.text()
			.await
			.map_err(|source| KeySyncError::Http { url, source })
	}
}

/// Handles become a URL path segment; reject anything that could change
/// which resource is requested.
pub fn validate_handle(handle: &str) -> Result<(), KeySyncError> {
	let invalid = |reason: &str| KeySyncError::InvalidHandle {
		handle: handle.to_string(),
		reason: reason.to_string(),
	};
	if handle.is_empty() {
		return Err(invalid("must not be empty"));
	}
	if handle == "." || handle == ".." {
		return Err(invalid("must not be a relative path component"));
	}
	if handle
		.chars()
		.any(|c| c.is_whitespace() || c.is_control() || matches!(c, '/' | '\\' | '?' | '#' | '%' | ':'))
	{
		return Err(invalid("contains a reserved character"));
	}
	Ok(())
}

/// Result of merging keys into an authorized keys file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
	/// Lines that were not present before.
	pub added: usize,
	/// Distinct lines in the file afterwards.
	pub total: usize,
}

/// A user's `~/.ssh/authorized_keys`.
#[derive(Debug, Clone)]
pub struct AuthorizedKeys {
	path: PathBuf,
}

impl AuthorizedKeys {
	pub fn for_home(home: &Path) -> Self {
		Self {
			path: home.join(".ssh").join("authorized_keys"),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Distinct, non-blank lines currently in the file.
	pub async fn lines(&self) -> Result<BTreeSet<String>, KeySyncError> {
		match fs::read_to_string(&self.path).await {
			Ok(text) => Ok(key_lines(&text)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
			Err(e) => Err(io_error(&self.path)(e)),
		}
	}

	/// Add `incoming` lines, then rewrite the file sorted with duplicates
	/// removed. Existing lines are always kept.
	pub async fn merge(&self, incoming: &str) -> Result<MergeReport, KeySyncError> {
		let existing_text = match fs::read_to_string(&self.path).await {
			Ok(text) => Some(text),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
			Err(e) => return Err(io_error(&self.path)(e)),
		};
		let existing = key_lines(existing_text.as_deref().unwrap_or_default());

		let mut merged = existing.clone();
		merged.extend(key_lines(incoming));
		let report = MergeReport {
			added: merged.len() - existing.len(),
			total: merged.len(),
		};

		let content = render(&merged);
		if existing_text.as_deref() == Some(content.as_str()) {
			debug!(path = %self.path.display(), "authorized keys already up to date");
			return Ok(report);
		}

		self.write(&content).await?;
		debug!(path = %self.path.display(), added = report.added, total = report.total, "merged authorized keys");
		Ok(report)
	}

	/// Replace the file via a temporary sibling so a crash mid-write never
	/// leaves a truncated key list.
	async fn write(&self, content: &str) -> Result<(), KeySyncError> {
		let ssh_dir = self.path.parent().unwrap_or(Path::new("."));
		if !fs::try_exists(ssh_dir).await.map_err(io_error(ssh_dir))? {
			fs::create_dir_all(ssh_dir).await.map_err(io_error(ssh_dir))?;
			fs::set_permissions(ssh_dir, std::fs::Permissions::from_mode(0o700))
				.await
				.map_err(io_error(ssh_dir))?;
		}

		let tmp = self.path.with_extension("tmp");
		let mut file = fs::File::create(&tmp).await.map_err(io_error(&tmp))?;
		file.write_all(content.as_bytes())
			.await
			.map_err(io_error(&tmp))?;
		file.sync_all().await.map_err(io_error(&tmp))?;
		drop(file);
		fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
			.await
			.map_err(io_error(&tmp))?;
		fs::rename(&tmp, &self.path)
			.await
			.map_err(io_error(&self.path))?;
		Ok(())
	}
}

fn key_lines(text: &str) -> BTreeSet<String> {
	text
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.map(str::to_string)
		.collect()
}

fn render(lines: &BTreeSet<String>) -> String {
	let mut content = String::new();
	for line in lines {
		content.push_str(line);
		content.push('\n');
	}
	content
}

/// Outcome of [`KeySynchronizer::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySyncOutcome {
	/// The user has no external handle; nothing was fetched or written.
	Skipped,
	/// The account has no home directory; nothing was fetched or written.
	HomeMissing,
	Merged(MergeReport),
}

pub struct KeySynchronizer {
	paths: PathsConfig,
	fetcher: Arc<dyn KeyFetcher>,
	system: Arc<dyn SystemOps>,
}

impl KeySynchronizer {
	pub fn new(paths: PathsConfig, fetcher: Arc<dyn KeyFetcher>, system: Arc<dyn SystemOps>) -> Self {
		Self {
			paths,
			fetcher,
			system,
		}
	}

	pub fn authorized_keys(&self, username: &str) -> AuthorizedKeys {
		AuthorizedKeys::for_home(&self.paths.home_dir(username))
	}

	/// Keys are only written into a home the account tools created.
	async fn home_exists(&self, username: &str) -> Result<bool, KeySyncError> {
		let home = self.paths.home_dir(username);
		fs::try_exists(&home).await.map_err(io_error(&home))
	}

	/// Merge the keys published for `handle` into the user's authorized keys.
	///
	/// A fetch failure is returned to the caller, which aborts the run.
	#[instrument(skip(self))]
	pub async fn sync(&self, username: &str, handle: &str) -> Result<KeySyncOutcome, KeySyncError> {
		if handle.is_empty() {
			warn!("no external handle, skipping key sync");
			return Ok(KeySyncOutcome::Skipped);
		}
		if !self.home_exists(username).await? {
			warn!("home directory missing, skipping key sync");
			return Ok(KeySyncOutcome::HomeMissing);
		}

		let keys = self.fetcher.fetch(handle).await?;
		let report = self.authorized_keys(username).merge(&keys).await?;
		info!(added = report.added, total = report.total, "synced keys");
		Ok(KeySyncOutcome::Merged(report))
	}

	/// Validate a single public key and merge it into the user's authorized
	/// keys.
	#[instrument(skip(self, raw_key))]
	pub async fn add_key(&self, username: &str, raw_key: &str) -> Result<MergeReport, KeySyncError> {
		let key = raw_key.trim();
		if key.is_empty() {
			return Err(KeySyncError::InvalidKey("key is empty".to_string()));
		}
		if key.lines().count() > 1 {
			return Err(KeySyncError::InvalidKey(
				"expected a single key line".to_string(),
			));
		}

		self
			.system
			.validate_public_key(key)
			.await
			.map_err(|e| match e {
				SystemError::KeyRejected(reason) => KeySyncError::InvalidKey(reason),
				other => KeySyncError::System(other),
			})?;

		if !self.home_exists(username).await? {
			return Err(KeySyncError::HomeMissing(self.paths.home_dir(username)));
		}

		let report = self.authorized_keys(username).merge(key).await?;
		info!(added = report.added, "added key");
		Ok(report)
	}
}
