// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use warden_common_config::{LogFormat, LoggingConfig};

/// Filter directive in order of precedence: `--log-level`, `RUST_LOG`, then
/// the configured level.
fn filter_directive(cli_level: Option<&str>, rust_log: Option<String>, configured: &str) -> String {
	cli_level
		.map(str::to_string)
		.or(rust_log.filter(|v| !v.trim().is_empty()))
		.unwrap_or_else(|| configured.to_string())
}

/// Diagnostics go to stderr; stdout carries command output only.
pub fn init_tracing(logging: &LoggingConfig, cli_level: Option<&str>) {
	let directive = filter_directive(
		cli_level,
		std::env::var(EnvFilter::DEFAULT_ENV).ok(),
		&logging.level,
	);
	let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));

	match logging.format {
		LogFormat::Json => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().json().with_writer(std::io::stderr))
				.init();
		}
		LogFormat::Pretty => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().with_writer(std::io::stderr))
				.init();
		}
	}
}
