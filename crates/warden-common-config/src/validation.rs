// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration validation.

use url::Url;

use crate::runtime::WardenConfig;
use crate::ConfigError;

/// Validate a resolved configuration.
pub fn validate_config(config: &WardenConfig) -> Result<(), ConfigError> {
	let paths = &config.paths;
	for (field, path) in [
		("paths.data_root", &paths.data_root),
		("paths.registry_file", &paths.registry_file),
		("paths.account_snapshot_dir", &paths.account_snapshot_dir),
		("paths.host_key_bundle_dir", &paths.host_key_bundle_dir),
		("paths.etc_dir", &paths.etc_dir),
		("paths.host_key_dir", &paths.host_key_dir),
		("paths.users_root", &paths.users_root),
		("paths.mounts_root", &paths.mounts_root),
	] {
		if !path.is_absolute() {
			return Err(ConfigError::invalid_value(
				field,
				format!("path must be absolute, got {}", path.display()),
			));
		}
	}

	let url = Url::parse(&config.keys.host_url)
		.map_err(|e| ConfigError::invalid_value("keys.host_url", e.to_string()))?;
	if url.scheme() != "https" && url.scheme() != "http" {
		return Err(ConfigError::invalid_value(
			"keys.host_url",
			format!("unsupported scheme \"{}\"", url.scheme()),
		));
	}

	if config.keys.timeout_secs == 0 {
		return Err(ConfigError::invalid_value(
			"keys.timeout_secs",
			"must be greater than zero",
		));
	}

	if config.server.command.first().map_or(true, |p| p.is_empty()) {
		return Err(ConfigError::validation("server.command must name a program"));
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::PathBuf;

	#[test]
	fn test_default_config_is_valid() {
		assert!(validate_config(&WardenConfig::default()).is_ok());
	}

	#[test]
	fn test_relative_path_rejected() {
		let mut config = WardenConfig::default();
		config.paths.mounts_root = PathBuf::from("mounts");
		let err = validate_config(&config).unwrap_err();
		assert!(err.to_string().contains("paths.mounts_root"));
	}

	#[test]
	fn test_non_http_key_host_rejected() {
		let mut config = WardenConfig::default();
		config.keys.host_url = "ftp://keys.example.com".to_string();
		assert!(validate_config(&config).is_err());
	}

	#[test]
	fn test_empty_server_command_rejected() {
		let mut config = WardenConfig::default();
		config.server.command.clear();
		assert!(validate_config(&config).is_err());
	}

	#[test]
	fn test_zero_timeout_rejected() {
		let mut config = WardenConfig::default();
		config.keys.timeout_secs = 0;
		assert!(validate_config(&config).is_err());
	}
}
