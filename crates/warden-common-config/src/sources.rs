// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: files, environment, CLI, defaults.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::layer::*;
use crate::ConfigError;

/// System-wide configuration file.
pub const SYSTEM_CONFIG_FILE: &str = "/etc/sftp-warden/config.toml";

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	SystemFile = 20,
	ExplicitFile = 30,
	Environment = 50,
	Cli = 60,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	/// Name for logging
	fn name(&self) -> &'static str;

	/// Precedence level
	fn precedence(&self) -> Precedence;

	/// Load configuration layer from this source
	fn load(&self) -> Result<ConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}
	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		debug!("loading defaults");
		// Defaults are applied during finalization
		Ok(ConfigLayer::default())
	}
}

/// File-based configuration source (TOML).
pub struct FileSource {
	path: PathBuf,
	precedence: Precedence,
	name: &'static str,
	required: bool,
}

impl FileSource {
	/// System config: /etc/sftp-warden/config.toml. Skipped when absent.
	pub fn system() -> Self {
		Self {
			path: PathBuf::from(SYSTEM_CONFIG_FILE),
			precedence: Precedence::SystemFile,
			name: "system-config",
			required: false,
		}
	}

	/// File named on the command line or via `WARDEN_CONFIG`. Must exist.
	pub fn explicit(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			precedence: Precedence::ExplicitFile,
			name: "explicit-config",
			required: true,
		}
	}
}

impl ConfigSource for FileSource {
	fn name(&self) -> &'static str {
		self.name
	}
	fn precedence(&self) -> Precedence {
		self.precedence
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		if !self.path.exists() {
			if self.required {
				return Err(ConfigError::invalid_value(
					"config",
					format!("config file {} does not exist", self.path.display()),
				));
			}
			debug!(path = %self.path.display(), source = self.name, "config file not found, skipping");
			return Ok(ConfigLayer::default());
		}

		debug!(path = %self.path.display(), source = self.name, "loading config file");

		let content = std::fs::read_to_string(&self.path)?;
		let layer: ConfigLayer = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: self.path.clone(),
			source: e,
		})?;

		trace!(source = self.name, "parsed config layer");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: WARDEN_<FIELD>. Empty values are ignored.
pub struct EnvSource {
	vars: Option<Vec<(String, String)>>,
}

impl EnvSource {
	/// Read from the process environment.
	pub fn new() -> Self {
		Self { vars: None }
	}

	/// Read from a fixed set of variables instead of the process environment.
	pub fn with_vars<I, K, V>(vars: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		Self {
			vars: Some(
				vars
					.into_iter()
					.map(|(k, v)| (k.into(), v.into()))
					.collect(),
			),
		}
	}

	fn vars(&self) -> Vec<(String, String)> {
		match &self.vars {
			Some(vars) => vars.clone(),
			None => std::env::vars().collect(),
		}
	}
}

impl Default for EnvSource {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}
	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		debug!("loading environment variables");
		let mut layer = ConfigLayer::default();

		for (key, value) in self.vars() {
			if !key.starts_with("WARDEN_") {
				continue;
			}

			let value = value.trim().to_string();
			if value.is_empty() {
				continue;
			}

			trace!(key = %key, "processing env var");

			match key.as_str() {
				"WARDEN_DATA_ROOT" => paths(&mut layer).data_root = Some(PathBuf::from(value)),
				"WARDEN_REGISTRY_FILE" => paths(&mut layer).registry_file = Some(PathBuf::from(value)),
				"WARDEN_ETC_DIR" => paths(&mut layer).etc_dir = Some(PathBuf::from(value)),
				"WARDEN_HOST_KEY_DIR" => paths(&mut layer).host_key_dir = Some(PathBuf::from(value)),
				"WARDEN_USERS_ROOT" => paths(&mut layer).users_root = Some(PathBuf::from(value)),
				"WARDEN_MOUNTS_ROOT" => paths(&mut layer).mounts_root = Some(PathBuf::from(value)),
				"WARDEN_KEY_HOST_URL" => {
					layer.keys.get_or_insert_with(KeysLayer::default).host_url = Some(value);
				}
				"WARDEN_KEY_TIMEOUT_SECS" => {
					let secs = value.parse::<u64>().map_err(|e| {
						ConfigError::Env(format!("WARDEN_KEY_TIMEOUT_SECS: {e}"))
					})?;
					layer.keys.get_or_insert_with(KeysLayer::default).timeout_secs = Some(secs);
				}
				"WARDEN_LOG_LEVEL" => {
					layer.logging.get_or_insert_with(LoggingLayer::default).level = Some(value);
				}
				"WARDEN_LOG_FORMAT" => {
					layer.logging.get_or_insert_with(LoggingLayer::default).format = Some(value);
				}
				// Consumed by the binary to locate the explicit config file
				"WARDEN_CONFIG" => {}
				_ => {
					trace!(key = %key, "ignoring unknown WARDEN_ env var");
				}
			}
		}

		Ok(layer)
	}
}

fn paths(layer: &mut ConfigLayer) -> &mut PathsLayer {
	layer.paths.get_or_insert_with(PathsLayer::default)
}

/// Overrides supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
	pub log_level: Option<String>,
}

/// Command-line source, highest precedence.
pub struct CliSource {
	overrides: CliOverrides,
}

impl CliSource {
	pub fn new(overrides: CliOverrides) -> Self {
		Self { overrides }
	}
}

impl ConfigSource for CliSource {
	fn name(&self) -> &'static str {
		"cli"
	}
	fn precedence(&self) -> Precedence {
		Precedence::Cli
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		let mut layer = ConfigLayer::default();
		if let Some(level) = &self.overrides.log_level {
			layer.logging = Some(LoggingLayer {
				level: Some(level.clone()),
				format: None,
			});
		}
		Ok(layer)
	}
}
