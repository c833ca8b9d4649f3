// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration layer for merging from multiple sources.

use serde::Deserialize;
use std::path::PathBuf;

/// Partial configuration layer - all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
	#[serde(default)]
	pub paths: Option<PathsLayer>,
	#[serde(default)]
	pub keys: Option<KeysLayer>,
	#[serde(default)]
	pub accounts: Option<AccountsLayer>,
	#[serde(default)]
	pub server: Option<ServerLayer>,
	#[serde(default)]
	pub logging: Option<LoggingLayer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsLayer {
	#[serde(default)]
	pub data_root: Option<PathBuf>,
	#[serde(default)]
	pub registry_file: Option<PathBuf>,
	#[serde(default)]
	pub account_snapshot_dir: Option<PathBuf>,
	#[serde(default)]
	pub host_key_bundle_dir: Option<PathBuf>,
	#[serde(default)]
	pub etc_dir: Option<PathBuf>,
	#[serde(default)]
	pub host_key_dir: Option<PathBuf>,
	#[serde(default)]
	pub users_root: Option<PathBuf>,
	#[serde(default)]
	pub mounts_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeysLayer {
	#[serde(default)]
	pub host_url: Option<String>,
	#[serde(default)]
	pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountsLayer {
	#[serde(default)]
	pub system_accounts: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerLayer {
	#[serde(default)]
	pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingLayer {
	#[serde(default)]
	pub level: Option<String>,
	#[serde(default)]
	pub format: Option<String>,
}

impl ConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	pub fn merge(&mut self, other: ConfigLayer) {
		merge_option(&mut self.paths, other.paths, PathsLayer::merge);
		merge_option(&mut self.keys, other.keys, KeysLayer::merge);
		merge_option(&mut self.accounts, other.accounts, AccountsLayer::merge);
		merge_option(&mut self.server, other.server, ServerLayer::merge);
		merge_option(&mut self.logging, other.logging, LoggingLayer::merge);
	}
}

fn merge_option<T, F>(target: &mut Option<T>, source: Option<T>, merge_fn: F)
where
	F: FnOnce(&mut T, T),
{
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}

fn take<T>(target: &mut Option<T>, source: Option<T>) {
	if source.is_some() {
		*target = source;
	}
}

impl PathsLayer {
	fn merge(&mut self, other: PathsLayer) {
		take(&mut self.data_root, other.data_root);
		take(&mut self.registry_file, other.registry_file);
		take(&mut self.account_snapshot_dir, other.account_snapshot_dir);
		take(&mut self.host_key_bundle_dir, other.host_key_bundle_dir);
		take(&mut self.etc_dir, other.etc_dir);
		take(&mut self.host_key_dir, other.host_key_dir);
		take(&mut self.users_root, other.users_root);
		take(&mut self.mounts_root, other.mounts_root);
	}
}

impl KeysLayer {
	fn merge(&mut self, other: KeysLayer) {
		take(&mut self.host_url, other.host_url);
		take(&mut self.timeout_secs, other.timeout_secs);
	}
}

impl AccountsLayer {
	fn merge(&mut self, other: AccountsLayer) {
		take(&mut self.system_accounts, other.system_accounts);
	}
}

impl ServerLayer {
	fn merge(&mut self, other: ServerLayer) {
		take(&mut self.command, other.command);
	}
}

impl LoggingLayer {
	fn merge(&mut self, other: LoggingLayer) {
		take(&mut self.level, other.level);
		take(&mut self.format, other.format);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_merge_prefers_other() {
		let mut base: ConfigLayer = toml::from_str(
			r#"
[paths]
data_root = "/data"
users_root = "/home"
"#,
		)
		.unwrap();
		let over: ConfigLayer = toml::from_str(
			r#"
[paths]
data_root = "/srv/data"
"#,
		)
		.unwrap();

		base.merge(over);
		let paths = base.paths.unwrap();
		assert_eq!(paths.data_root, Some(PathBuf::from("/srv/data")));
		assert_eq!(paths.users_root, Some(PathBuf::from("/home")));
	}

	#[test]
	fn test_merge_into_empty_section() {
		let mut base = ConfigLayer::default();
		let over = ConfigLayer {
			keys: Some(KeysLayer {
				host_url: Some("https://gitlab.com".to_string()),
				timeout_secs: None,
			}),
			..Default::default()
		};

		base.merge(over);
		assert_eq!(
			base.keys.unwrap().host_url.as_deref(),
			Some("https://gitlab.com")
		);
	}

	/// Unknown keys are rejected so a typo in the config file does not
	/// silently fall back to a default path.
	#[test]
	fn test_unknown_key_rejected() {
		let result: Result<ConfigLayer, _> = toml::from_str(
			r#"
[paths]
data_rot = "/data"
"#,
		);
		assert!(result.is_err());
	}

	fn keys_layer(host_url: Option<String>, timeout_secs: Option<u64>) -> ConfigLayer {
		ConfigLayer {
			keys: Some(KeysLayer {
				host_url,
				timeout_secs,
			}),
			..Default::default()
		}
	}

	// Property: merging any sequence of layers yields, per field, the value
	// of the last layer that set it, and None only when no layer did.
	proptest! {
		#[test]
		fn prop_merge_last_set_value_wins(
			layers in prop::collection::vec(
				(
					prop::option::of("https://[a-z]{1,8}\\.example"),
					prop::option::of(1u64..600),
					prop::option::of("(trace|debug|info|warn)"),
				),
				0..8,
			),
		) {
			let mut merged = ConfigLayer::default();
			for (host_url, timeout_secs, level) in &layers {
				let mut layer = keys_layer(host_url.clone(), *timeout_secs);
				layer.logging = Some(LoggingLayer {
					level: level.clone(),
					format: None,
				});
				merged.merge(layer);
			}

			let last_url = layers.iter().rev().find_map(|(u, _, _)| u.clone());
			let last_timeout = layers.iter().rev().find_map(|(_, t, _)| *t);
			let last_level = layers.iter().rev().find_map(|(_, _, l)| l.clone());

			let keys = merged.keys.unwrap_or_default();
			prop_assert_eq!(keys.host_url, last_url);
			prop_assert_eq!(keys.timeout_secs, last_timeout);
			prop_assert_eq!(merged.logging.unwrap_or_default().level, last_level);
		}
	}
}
