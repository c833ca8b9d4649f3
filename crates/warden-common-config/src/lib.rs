// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for sftp-warden.
//!
//! This crate provides:
//! - Layered configuration from defaults, TOML files, environment and CLI
//! - Default paths matching the container image layout
//! - Configuration validation

pub mod error;
pub mod layer;
pub mod registry;
pub mod runtime;
pub mod sources;
pub mod validation;

use std::path::PathBuf;

pub use error::ConfigError;
pub use layer::ConfigLayer;
pub use registry::ConfigRegistry;
pub use runtime::{
	AccountsConfig, KeysConfig, LogFormat, LoggingConfig, PathsConfig, ServerConfig, WardenConfig,
};
pub use sources::{CliOverrides, ConfigSource, Precedence};

/// Load configuration from all sources with default precedence.
///
/// `explicit_file` is the file named by `--config` or `WARDEN_CONFIG`; when
/// present it must exist.
pub fn load_config(
	explicit_file: Option<PathBuf>,
	cli: CliOverrides,
) -> Result<WardenConfig, ConfigError> {
	let mut registry = ConfigRegistry::new();

	registry.register(Box::new(sources::DefaultsSource));
	registry.register(Box::new(sources::FileSource::system()));
	if let Some(path) = explicit_file {
		registry.register(Box::new(sources::FileSource::explicit(path)));
	}
	registry.register(Box::new(sources::EnvSource::new()));
	registry.register(Box::new(sources::CliSource::new(cli)));

	registry.load()
}
