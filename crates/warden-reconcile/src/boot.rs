// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The container start sequence and the manual entry points.
//!
//! ```text
//! RESTORE_ACCOUNTS -> CONFIGURE_HOST_KEYS
//!   -> for each record: CREATE_OR_SKIP -> SYNC_KEYS -> FIX_OWNERSHIP -> SYNC_MOUNTS
//!   -> SERVE
//! ```
//!
//! `SERVE` is returned to the caller as [`BootOutcome::LaunchServer`]; the
//! engine never starts the server itself.

use std::fmt;
use std::sync::Arc;

use tracing::{info, instrument};
use warden_common_config::WardenConfig;
use warden_system::{CommandSystem, SystemOps};

use crate::accounts::list_accounts;
use crate::error::Result;
use crate::host_keys::HostIdentityStore;
use crate::keys::{HttpKeyFetcher, KeyFetcher, KeySynchronizer, MergeReport};
use crate::provisioner::{CreateOutcome, Provisioner, UpdateReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStage {
	RestoreAccounts,
	ConfigureHostKeys,
	ProvisionUsers,
	Serve,
}

impl fmt::Display for BootStage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::RestoreAccounts => "restore_accounts",
			Self::ConfigureHostKeys => "configure_host_keys",
			Self::ProvisionUsers => "provision_users",
			Self::Serve => "serve",
		};
		f.write_str(name)
	}
}

/// Terminal action of a successful boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootOutcome {
	/// Replace the current process with the SFTP server.
	LaunchServer { program: String, args: Vec<String> },
}

/// Owns the configuration and every reconciliation component.
pub struct Engine {
	config: WardenConfig,
	host_keys: HostIdentityStore,
	provisioner: Provisioner,
}

impl Engine {
	pub fn new(
		config: WardenConfig,
		system: Arc<dyn SystemOps>,
		fetcher: Arc<dyn KeyFetcher>,
	) -> Self {
		let paths = &config.paths;
		let host_keys = HostIdentityStore::new(
			&paths.host_key_dir,
			&paths.host_key_bundle_dir,
			system.clone(),
		);
		let keys = KeySynchronizer::new(paths.clone(), fetcher, system.clone());
		let provisioner = Provisioner::new(paths.clone(), system, keys);

		Self {
			config,
			host_keys,
			provisioner,
		}
	}

	/// Engine backed by the real system tools and the configured key host.
	pub fn from_config(config: WardenConfig) -> Result<Self> {
		let fetcher = HttpKeyFetcher::new(&config.keys)?;
		Ok(Self::new(
			config,
			Arc::new(CommandSystem::new()),
			Arc::new(fetcher),
		))
	}

	pub fn config(&self) -> &WardenConfig {
		&self.config
	}

	pub fn provisioner(&self) -> &Provisioner {
		&self.provisioner
	}

	/// Run the full start sequence. The first error aborts the boot.
	#[instrument(skip(self))]
	pub async fn boot(&self) -> Result<BootOutcome> {
		info!(stage = %BootStage::RestoreAccounts, "boot stage");
		self.provisioner.snapshot().restore().await?;

		info!(stage = %BootStage::ConfigureHostKeys, "boot stage");
		self.host_keys.ensure_and_restore().await?;

		info!(stage = %BootStage::ProvisionUsers, "boot stage");
		let records = self.provisioner.registry().list_records().await?;
		for record in &records {
			self.provisioner
				.create(&record.username, &record.email, &record.external_handle)
				.await?;
		}

		info!(stage = %BootStage::Serve, users = records.len(), "boot stage");
		Ok(self.launch_server())
	}

	fn launch_server(&self) -> BootOutcome {
		let mut command = self.config.server.command.iter().cloned();
		let program = command.next().unwrap_or_default();
		BootOutcome::LaunchServer {
			program,
			args: command.collect(),
		}
	}

	pub async fn add_user(&self, username: &str, email: &str, handle: &str) -> Result<CreateOutcome> {
		self.provisioner.create(username, email, handle).await
	}

	pub async fn sync(&self) -> Result<Vec<(String, UpdateReport)>> {
		self.provisioner.sync_all().await
	}

	pub async fn add_key(&self, username: &str, raw_key: &str) -> Result<MergeReport> {
		self.provisioner.add_key(username, raw_key).await
	}

	/// Login accounts on the live system, without system accounts.
	pub async fn list_users(&self) -> Result<Vec<String>> {
		list_accounts(
			&self.config.paths.etc_dir.join("passwd"),
			&self.config.accounts.system_accounts,
		)
		.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::keys::KeySyncError;
	use async_trait::async_trait;
	use warden_system::fake::FakeSystem;

	struct NoKeys;

	#[async_trait]
	impl KeyFetcher for NoKeys {
		async fn fetch(&self, _handle: &str) -> std::result::Result<String, KeySyncError> {
			Ok(String::new())
		}
	}

	#[test]
	fn test_stage_names() {
		assert_eq!(BootStage::RestoreAccounts.to_string(), "restore_accounts");
		assert_eq!(BootStage::Serve.to_string(), "serve");
	}

	#[tokio::test]
	async fn test_boot_returns_configured_server_command() {
		let dir = tempfile::tempdir().unwrap();
		let config = WardenConfig::sandboxed(dir.path());
		let fake = Arc::new(FakeSystem::new(&config.paths.etc_dir));
		let engine = Engine::new(config, fake, Arc::new(NoKeys));

		let outcome = engine.boot().await.unwrap();
		assert_eq!(
			outcome,
			BootOutcome::LaunchServer {
				program: "/usr/sbin/sshd".to_string(),
				args: vec!["-D".to_string(), "-e".to_string()],
			}
		);
	}
}
