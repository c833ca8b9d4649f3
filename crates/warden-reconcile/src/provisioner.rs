// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-user provisioning: account creation plus the three reconciliation
//! primitives (keys, ownership, mounts).

use std::sync::Arc;

use tracing::{error, info, instrument, warn};
use warden_common_config::PathsConfig;
use warden_system::{AccountCreation, AccountSpec, SystemOps};

use crate::error::{ReconcileError, Result};
use crate::keys::{KeySyncOutcome, KeySynchronizer, MergeReport};
use crate::mounts::{MountLinker, MountSyncReport};
use crate::ownership::OwnershipReconciler;
use crate::registry::{AddOutcome, Registry, UserRecord};
use crate::snapshot::AccountSnapshotStore;

/// What [`Provisioner::update`] did for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
	pub keys: KeySyncOutcome,
	pub chowned: usize,
	pub mounts: MountSyncReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
	pub account: AccountCreation,
	/// Set only when the account was newly created.
	pub registry: Option<AddOutcome>,
	pub update: UpdateReport,
}

pub struct Provisioner {
	paths: PathsConfig,
	system: Arc<dyn SystemOps>,
	registry: Registry,
	snapshot: AccountSnapshotStore,
	keys: KeySynchronizer,
	ownership: OwnershipReconciler,
	mounts: MountLinker,
}

impl Provisioner {
	pub fn new(
		paths: PathsConfig,
		system: Arc<dyn SystemOps>,
		keys: KeySynchronizer,
	) -> Self {
		Self {
			registry: Registry::new(&paths.registry_file),
			snapshot: AccountSnapshotStore::new(
				&paths.etc_dir,
				&paths.account_snapshot_dir,
				system.clone(),
			),
			ownership: OwnershipReconciler::new(paths.clone(), system.clone()),
			mounts: MountLinker::new(paths.clone()),
			keys,
			system,
			paths,
		}
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	pub fn snapshot(&self) -> &AccountSnapshotStore {
		&self.snapshot
	}

	/// Create the account and register it, then back up the account tables
	/// and run a full update.
	///
	/// Safe to call for an existing user: a failed or redundant account
	/// creation is logged and the backup and update still run.
	#[instrument(skip(self, email), fields(user = %username))]
	pub async fn create(&self, username: &str, email: &str, handle: &str) -> Result<CreateOutcome> {
		let record = UserRecord::new(username, email, handle);
		record.validate()?;

		let spec = AccountSpec {
			username: username.to_string(),
			home: self.paths.home_dir(username),
			comment: email.to_string(),
		};
		let account = match self.system.create_account(&spec).await {
			Ok(AccountCreation::Failed(reason)) => {
				warn!(%reason, "account creation failed, continuing");
				AccountCreation::Failed(reason)
			}
			Ok(creation) => creation,
			Err(e) => {
				error!(error = %e, "could not run account creation, continuing");
				AccountCreation::Failed(e.to_string())
			}
		};

		let registry = if account.is_created() {
			info!("account created");
			Some(self.registry.add(&record).await?)
		} else {
			None
		};

		self.snapshot.backup().await?;
		let update = self.update(username, handle).await?;

		Ok(CreateOutcome {
			account,
			registry,
			update,
		})
	}

	/// Keys, then ownership, then mounts.
	#[instrument(skip(self), fields(user = %username))]
	pub async fn update(&self, username: &str, handle: &str) -> Result<UpdateReport> {
		let keys = self.keys.sync(username, handle).await?;
		let chowned = self.ownership.fix(username).await?;
		let mounts = self.mounts.sync(username).await?;

		Ok(UpdateReport {
			keys,
			chowned,
			mounts,
		})
	}

	/// Add one validated key for a registered user.
	#[instrument(skip(self, raw_key), fields(user = %username))]
	pub async fn add_key(&self, username: &str, raw_key: &str) -> Result<MergeReport> {
		if !self.registry.contains(username).await? {
			return Err(ReconcileError::UnknownUser(username.to_string()));
		}

		let report = self.keys.add_key(username, raw_key).await?;
		self.ownership.fix(username).await?;
		Ok(report)
	}

	/// Update every registered user in file order. The first failure aborts
	/// the run.
	#[instrument(skip(self))]
	pub async fn sync_all(&self) -> Result<Vec<(String, UpdateReport)>> {
		let records = self.registry.list_records().await?;
		let mut reports = Vec::with_capacity(records.len());
		for record in records {
			let report = self
				.update(&record.username, &record.external_handle)
				.await?;
			reports.push((record.username, report));
		}
		info!(users = reports.len(), "sync complete");
		Ok(reports)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::keys::{KeyFetcher, KeySyncError};
	use async_trait::async_trait;
	use std::path::Path;
	use std::sync::Mutex;
	use warden_system::fake::{FakeSystem, SystemCall};

	const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIBbW9ja2tleWZvcnRlc3Rpbmdvbmx5 alice@laptop";

	#[derive(Default)]
	struct RecordingFetcher {
		requests: Mutex<Vec<String>>,
	}

	#[async_trait]
	impl KeyFetcher for RecordingFetcher {
		async fn fetch(&self, handle: &str) -> std::result::Result<String, KeySyncError> {
			self.requests.lock().unwrap().push(handle.to_string());
			Ok(format!("{KEY}\n"))
		}
	}

	struct Fixture {
		_dir: tempfile::TempDir,
		root: std::path::PathBuf,
		fake: Arc<FakeSystem>,
		fetcher: Arc<RecordingFetcher>,
		provisioner: Provisioner,
	}

	fn fixture() -> Fixture {
		let dir = tempfile::tempdir().unwrap();
		let root = dir.path().to_path_buf();
		let paths = PathsConfig::under(root.join("data"), &root);
		let fake = Arc::new(FakeSystem::new(&paths.etc_dir));
		let fetcher = Arc::new(RecordingFetcher::default());
		seed_etc(&paths.etc_dir);
		std::fs::create_dir_all(root.join("mounts/shared")).unwrap();

		let keys = KeySynchronizer::new(paths.clone(), fetcher.clone(), fake.clone());
		let provisioner = Provisioner::new(paths, fake.clone(), keys);
		Fixture {
			_dir: dir,
			root,
			fake,
			fetcher,
			provisioner,
		}
	}

	fn seed_etc(etc: &Path) {
		std::fs::create_dir_all(etc).unwrap();
		std::fs::write(etc.join("passwd"), "root:x:0:0:root:/root:/bin/sh\n").unwrap();
		std::fs::write(etc.join("shadow"), "root:*::0:::::\n").unwrap();
		std::fs::write(etc.join("group"), "root:x:0:\n").unwrap();
	}

	#[tokio::test]
	async fn test_create_new_user() {
		let fx = fixture();
		let outcome = fx
			.provisioner
			.create("alice", "alice@example.com", "alice-gh")
			.await
			.unwrap();

		assert_eq!(outcome.account, AccountCreation::Created);
		assert_eq!(outcome.registry, Some(AddOutcome::Added));
		assert!(matches!(outcome.update.keys, KeySyncOutcome::Merged(_)));
		assert_eq!(outcome.update.mounts.created, vec!["shared"]);
		assert!(fx.provisioner.registry().contains("alice").await.unwrap());

		let persisted = std::fs::read_to_string(fx.root.join("data/etc/passwd")).unwrap();
		assert!(persisted.contains("alice:"));
	}

	/// Test: Creating a user whose account already exists still backs up
	/// and updates.
	///
	/// Why this test is important: boot calls `create` for every registry
	/// record on every start. After a restore the accounts already exist,
	/// and keys, ownership and mounts must still be refreshed.
	#[tokio::test]
	async fn test_create_existing_user_still_backs_up_and_updates() {
		let fx = fixture();
		fx.provisioner
			.create("alice", "alice@example.com", "alice-gh")
			.await
			.unwrap();
		std::fs::remove_dir_all(fx.root.join("data/etc")).unwrap();
		fx.fake.clear_calls();

		let outcome = fx
			.provisioner
			.create("alice", "alice@example.com", "alice-gh")
			.await
			.unwrap();

		assert_eq!(outcome.account, AccountCreation::AlreadyExists);
		assert_eq!(outcome.registry, None);
		assert!(fx.provisioner.snapshot().has_snapshot().await.unwrap());
		assert_eq!(fx.fetcher.requests.lock().unwrap().len(), 2);
		assert!(fx
			.fake
			.calls()
			.iter()
			.any(|c| matches!(c, SystemCall::ChownRecursive(..))));
		assert_eq!(
			fx.provisioner.registry().list_records().await.unwrap().len(),
			1
		);
	}

	#[tokio::test]
	async fn test_create_failure_is_not_fatal() {
		let fx = fixture();
		fx.fake.fail_account_creation("adduser: permission denied");

		let outcome = fx
			.provisioner
			.create("bob", "bob@example.com", "")
			.await
			.unwrap();

		assert!(matches!(outcome.account, AccountCreation::Failed(_)));
		assert_eq!(outcome.registry, None);
		assert_eq!(outcome.update.keys, KeySyncOutcome::Skipped);
		assert!(!fx.provisioner.registry().contains("bob").await.unwrap());
		assert!(fx.root.join("data/etc/passwd").exists());
	}

	#[tokio::test]
	async fn test_create_rejects_invalid_username() {
		let fx = fixture();
		let err = fx
			.provisioner
			.create("bad name", "x@example.com", "")
			.await
			.unwrap_err();
		assert!(matches!(err, ReconcileError::Registry(_)));
		assert!(fx.fake.calls().is_empty());
	}

	/// Test: A failed account creation with a key handle touches nothing
	/// under the home root.
	///
	/// Why this test is important: account creation failures are non-fatal.
	/// If key sync created the home directory anyway, the ownership pass
	/// would chown it to an account that does not exist and abort the run.
	#[tokio::test]
	async fn test_create_failure_with_handle_skips_keys() {
		let fx = fixture();
		fx.fake.fail_account_creation("adduser: permission denied");

		let outcome = fx
			.provisioner
			.create("bob", "bob@example.com", "bob-gh")
			.await
			.unwrap();

		assert_eq!(outcome.update.keys, KeySyncOutcome::HomeMissing);
		assert_eq!(outcome.update.chowned, 0);
		assert!(!fx.root.join("home/bob").exists());
		assert!(fx.fetcher.requests.lock().unwrap().is_empty());
		assert!(!fx
			.fake
			.calls()
			.iter()
			.any(|c| matches!(c, SystemCall::ChownRecursive(..))));
	}

	/// A handle that can never be fetched is refused before the account or
	/// the registry record exist.
	#[tokio::test]
	async fn test_create_rejects_unfetchable_handle() {
		let fx = fixture();
		let err = fx
			.provisioner
			.create("eve", "eve@example.com", "bad/handle")
			.await
			.unwrap_err();

		assert!(matches!(err, ReconcileError::Registry(_)));
		assert!(fx.fake.calls().is_empty());
		assert!(!fx.provisioner.registry().contains("eve").await.unwrap());
	}

	#[tokio::test]
	async fn test_add_key_requires_registered_user() {
		let fx = fixture();
		let err = fx.provisioner.add_key("mallory", KEY).await.unwrap_err();
		assert!(matches!(err, ReconcileError::UnknownUser(name) if name == "mallory"));
	}

	#[tokio::test]
	async fn test_add_key_merges_and_fixes_ownership() {
		let fx = fixture();
		fx.provisioner
			.create("alice", "alice@example.com", "")
			.await
			.unwrap();
		fx.fake.clear_calls();

		let report = fx.provisioner.add_key("alice", KEY).await.unwrap();
		assert_eq!(report.added, 1);
		assert!(fx
			.fake
			.calls()
			.iter()
			.any(|c| matches!(c, SystemCall::ChownRecursive(p, _) if p.ends_with(".ssh"))));
	}

	#[tokio::test]
	async fn test_sync_all_follows_file_order() {
		let fx = fixture();
		for (name, handle) in [("carol", "carol-gh"), ("alice", "alice-gh")] {
			fx.provisioner
				.create(name, &format!("{name}@example.com"), handle)
				.await
				.unwrap();
		}
		fx.fetcher.requests.lock().unwrap().clear();

		let reports = fx.provisioner.sync_all().await.unwrap();
		let users: Vec<_> = reports.iter().map(|(name, _)| name.as_str()).collect();
		assert_eq!(users, vec!["carol", "alice"]);
		assert_eq!(
			*fx.fetcher.requests.lock().unwrap(),
			vec!["carol-gh".to_string(), "alice-gh".to_string()]
		);
	}
}
