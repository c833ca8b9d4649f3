// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::SystemError;

/// Parameters for creating a login account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountSpec {
	pub username: String,
	pub home: PathBuf,
	/// Stored as the account's description (GECOS) field.
	pub comment: String,
}

/// Result of an account creation attempt.
///
/// A failing account tool is reported as a value: callers treat it as a
/// non-fatal condition and carry on reconciling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountCreation {
	Created,
	AlreadyExists,
	Failed(String),
}

impl AccountCreation {
	pub fn is_created(&self) -> bool {
		matches!(self, Self::Created)
	}
}

/// Owner and group to apply to a path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ownership {
	pub user: String,
	pub group: String,
}

impl Ownership {
	pub fn root() -> Self {
		Self::user("root")
	}

	/// The user and their primary group of the same name.
	pub fn user(name: impl Into<String>) -> Self {
		let name = name.into();
		Self {
			group: name.clone(),
			user: name,
		}
	}

	/// `user:group`, as accepted by chown.
	pub fn spec(&self) -> String {
		format!("{}:{}", self.user, self.group)
	}
}

/// Trait abstracting the host-mutating operations the reconciler needs, so
/// reconciliation logic can run against a fake.
#[async_trait]
pub trait SystemOps: Send + Sync {
	/// Create a login account with password authentication disabled.
	async fn create_account(&self, spec: &AccountSpec) -> Result<AccountCreation, SystemError>;

	/// Generate a fresh set of SSH host key pairs into `dir`.
	async fn generate_host_keys(&self, dir: &Path) -> Result<(), SystemError>;

	/// Check that `raw` parses as a single OpenSSH public key.
	async fn validate_public_key(&self, raw: &str) -> Result<(), SystemError>;

	/// Change owner and group of a single path.
	async fn chown(&self, path: &Path, owner: &Ownership) -> Result<(), SystemError>;

	/// Change owner and group of a path and everything below it.
	async fn chown_recursive(&self, path: &Path, owner: &Ownership) -> Result<(), SystemError>;
}
