// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Runtime configuration types with resolved defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::layer::*;
use crate::ConfigError;

pub const DEFAULT_DATA_ROOT: &str = "/data";
pub const DEFAULT_ETC_DIR: &str = "/etc";
pub const DEFAULT_HOST_KEY_DIR: &str = "/etc/ssh";
pub const DEFAULT_USERS_ROOT: &str = "/home";
pub const DEFAULT_MOUNTS_ROOT: &str = "/mounts";
pub const DEFAULT_KEY_HOST_URL: &str = "https://github.com";
pub const DEFAULT_KEY_TIMEOUT_SECS: u64 = 30;

const REGISTRY_FILE_NAME: &str = "users.conf";
const ACCOUNT_SNAPSHOT_DIR_NAME: &str = "etc";
const HOST_KEY_BUNDLE_DIR_NAME: &str = "ssh_host_keys";

/// The final, validated configuration for sftp-warden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WardenConfig {
	pub paths: PathsConfig,
	pub keys: KeysConfig,
	pub accounts: AccountsConfig,
	pub server: ServerConfig,
	pub logging: LoggingConfig,
}

/// Filesystem locations. Persistent state lives under `data_root`; the rest
/// is the live, ephemeral system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathsConfig {
	pub data_root: PathBuf,
	/// Durable user registry.
	pub registry_file: PathBuf,
	/// Persisted copies of passwd/shadow/group.
	pub account_snapshot_dir: PathBuf,
	/// Persisted SSH host key bundle.
	pub host_key_bundle_dir: PathBuf,
	/// Live account tables.
	pub etc_dir: PathBuf,
	/// Live SSH host keys.
	pub host_key_dir: PathBuf,
	pub users_root: PathBuf,
	pub mounts_root: PathBuf,
}

impl PathsConfig {
	/// Derive every path from a data root and a live system root, the same
	/// way the defaults are derived from `/data` and `/`.
	pub fn under(data_root: impl Into<PathBuf>, system_root: &Path) -> Self {
		let data_root = data_root.into();
		Self {
			registry_file: data_root.join(REGISTRY_FILE_NAME),
			account_snapshot_dir: data_root.join(ACCOUNT_SNAPSHOT_DIR_NAME),
			host_key_bundle_dir: data_root.join(HOST_KEY_BUNDLE_DIR_NAME),
			data_root,
			etc_dir: system_root.join(DEFAULT_ETC_DIR.trim_start_matches('/')),
			host_key_dir: system_root.join(DEFAULT_HOST_KEY_DIR.trim_start_matches('/')),
			users_root: system_root.join(DEFAULT_USERS_ROOT.trim_start_matches('/')),
			mounts_root: system_root.join(DEFAULT_MOUNTS_ROOT.trim_start_matches('/')),
		}
	}

	/// Home directory for a provisioned user.
	pub fn home_dir(&self, username: &str) -> PathBuf {
		self.users_root.join(username)
	}
}

impl Default for PathsConfig {
	fn default() -> Self {
		Self::under(DEFAULT_DATA_ROOT, Path::new("/"))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysConfig {
	/// Base URL of the key host; keys are fetched from `<host_url>/<handle>.keys`.
	pub host_url: String,
	pub timeout_secs: u64,
}

impl KeysConfig {
	pub fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout_secs)
	}
}

impl Default for KeysConfig {
	fn default() -> Self {
		Self {
			host_url: DEFAULT_KEY_HOST_URL.to_string(),
			timeout_secs: DEFAULT_KEY_TIMEOUT_SECS,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountsConfig {
	/// Accounts hidden from `list-users`.
	pub system_accounts: Vec<String>,
}

impl Default for AccountsConfig {
	fn default() -> Self {
		Self {
			system_accounts: vec!["root".to_string(), "sshd".to_string()],
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
	/// Program and arguments that replace the process after `init`.
	pub command: Vec<String>,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			command: vec![
				"/usr/sbin/sshd".to_string(),
				"-D".to_string(),
				"-e".to_string(),
			],
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
	#[default]
	Pretty,
	Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
	pub level: String,
	pub format: LogFormat,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self {
			level: "info".to_string(),
			format: LogFormat::Pretty,
		}
	}
}

impl Default for WardenConfig {
	fn default() -> Self {
		Self {
			paths: PathsConfig::default(),
			keys: KeysConfig::default(),
			accounts: AccountsConfig::default(),
			server: ServerConfig::default(),
			logging: LoggingConfig::default(),
		}
	}
}

impl WardenConfig {
	/// Configuration with every path redirected under `root`: persistent data
	/// in `root/data`, the live system tree below `root`.
	pub fn sandboxed(root: &Path) -> Self {
		Self {
			paths: PathsConfig::under(root.join("data"), root),
			..Default::default()
		}
	}

	/// Build the runtime config from a merged layer, filling in defaults.
	pub fn from_layer(layer: ConfigLayer) -> Result<Self, ConfigError> {
		let paths_layer = layer.paths.unwrap_or_default();
		let data_root = paths_layer
			.data_root
			.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_ROOT));
		let derived = PathsConfig::under(data_root.clone(), Path::new("/"));

		let paths = PathsConfig {
			registry_file: paths_layer.registry_file.unwrap_or(derived.registry_file),
			account_snapshot_dir: paths_layer
				.account_snapshot_dir
				.unwrap_or(derived.account_snapshot_dir),
			host_key_bundle_dir: paths_layer
				.host_key_bundle_dir
				.unwrap_or(derived.host_key_bundle_dir),
			etc_dir: paths_layer.etc_dir.unwrap_or(derived.etc_dir),
			host_key_dir: paths_layer.host_key_dir.unwrap_or(derived.host_key_dir),
			users_root: paths_layer.users_root.unwrap_or(derived.users_root),
			mounts_root: paths_layer.mounts_root.unwrap_or(derived.mounts_root),
			data_root,
		};

		let keys_layer = layer.keys.unwrap_or_default();
		let keys = KeysConfig {
			host_url: keys_layer
				.host_url
				.unwrap_or_else(|| DEFAULT_KEY_HOST_URL.to_string()),
			timeout_secs: keys_layer.timeout_secs.unwrap_or(DEFAULT_KEY_TIMEOUT_SECS),
		};

		let accounts = AccountsConfig {
			system_accounts: layer
				.accounts
				.and_then(|a| a.system_accounts)
				.unwrap_or_else(|| AccountsConfig::default().system_accounts),
		};

		let server = ServerConfig {
			command: layer
				.server
				.and_then(|s| s.command)
				.unwrap_or_else(|| ServerConfig::default().command),
		};

		let logging_layer = layer.logging.unwrap_or_default();
		let format = match logging_layer.format.as_deref() {
			None | Some("pretty") => LogFormat::Pretty,
			Some("json") => LogFormat::Json,
			Some(other) => {
				return Err(ConfigError::invalid_value(
					"logging.format",
					format!("expected \"pretty\" or \"json\", got \"{other}\""),
				))
			}
		};
		let logging = LoggingConfig {
			level: logging_layer
				.level
				.unwrap_or_else(|| LoggingConfig::default().level),
			format,
		};

		Ok(Self {
			paths,
			keys,
			accounts,
			server,
			logging,
		})
	}
}
