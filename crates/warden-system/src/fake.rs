// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! In-memory stand-in for [`SystemOps`] used by tests.
//!
//! Accounts live in a `passwd` file under a sandboxed etc directory, so
//! wiping and restoring that directory behaves like a container restart.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::command::HOST_KEY_TYPES;
use crate::error::SystemError;
use crate::ops::{AccountCreation, AccountSpec, Ownership, SystemOps};

const KEY_ALGORITHMS: &[&str] = &[
	"ssh-rsa",
	"ssh-ed25519",
	"ecdsa-sha2-nistp256",
	"ecdsa-sha2-nistp384",
	"ecdsa-sha2-nistp521",
	"sk-ssh-ed25519@openssh.com",
];

static GENERATION: AtomicU64 = AtomicU64::new(0);

/// A recorded call to the fake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SystemCall {
	CreateAccount(String),
	GenerateHostKeys(PathBuf),
	ValidatePublicKey(String),
	Chown(PathBuf, String),
	ChownRecursive(PathBuf, String),
}

pub struct FakeSystem {
	etc_dir: PathBuf,
	calls: Mutex<Vec<SystemCall>>,
	fail_account_creation: Mutex<Option<String>>,
}

impl FakeSystem {
	pub fn new(etc_dir: impl Into<PathBuf>) -> Self {
		Self {
			etc_dir: etc_dir.into(),
			calls: Mutex::new(Vec::new()),
			fail_account_creation: Mutex::new(None),
		}
	}

	/// Make every subsequent account creation fail with `message`.
	pub fn fail_account_creation(&self, message: impl Into<String>) {
		*lock(&self.fail_account_creation) = Some(message.into());
	}

	pub fn calls(&self) -> Vec<SystemCall> {
		lock(&self.calls).clone()
	}

	pub fn clear_calls(&self) {
		lock(&self.calls).clear();
	}

	/// Usernames currently present in the sandboxed passwd file.
	pub fn accounts(&self) -> Vec<String> {
		std::fs::read_to_string(self.etc_dir.join("passwd"))
			.unwrap_or_default()
			.lines()
			.filter_map(|line| line.split(':').next())
			.filter(|name| !name.is_empty())
			.map(str::to_string)
			.collect()
	}

	fn record(&self, call: SystemCall) {
		lock(&self.calls).push(call);
	}

	fn append(&self, table: &str, line: &str) -> std::io::Result<()> {
		std::fs::create_dir_all(&self.etc_dir)?;
		let mut file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(self.etc_dir.join(table))?;
		writeln!(file, "{line}")
	}
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SystemOps for FakeSystem {
	async fn create_account(&self, spec: &AccountSpec) -> Result<AccountCreation, SystemError> {
		self.record(SystemCall::CreateAccount(spec.username.clone()));

		if let Some(message) = lock(&self.fail_account_creation).clone() {
			return Ok(AccountCreation::Failed(message));
		}
		if self.accounts().iter().any(|name| name == &spec.username) {
			return Ok(AccountCreation::AlreadyExists);
		}

		let uid = 1000 + self.accounts().len();
		self.append(
			"passwd",
			&format!(
				"{}:x:{uid}:{uid}:{}:{}:/bin/sh",
				spec.username,
				spec.comment,
				spec.home.display()
			),
		)?;
		self.append("shadow", &format!("{}:!:19000:0:99999:7:::", spec.username))?;
		self.append("group", &format!("{}:x:{uid}:", spec.username))?;
		std::fs::create_dir_all(&spec.home)?;
		Ok(AccountCreation::Created)
	}

	async fn generate_host_keys(&self, dir: &Path) -> Result<(), SystemError> {
		self.record(SystemCall::GenerateHostKeys(dir.to_path_buf()));
		std::fs::create_dir_all(dir)?;

		let nonce = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|d| d.as_nanos())
			.unwrap_or_default();
		let generation = GENERATION.fetch_add(1, Ordering::SeqCst);
		for (kind, _) in HOST_KEY_TYPES {
			let private = dir.join(format!("ssh_host_{kind}_key"));
			std::fs::write(&private, format!("fake {kind} private key {nonce}-{generation}\n"))?;
			std::fs::write(
				dir.join(format!("ssh_host_{kind}_key.pub")),
				format!("fake {kind} public key {nonce}-{generation}\n"),
			)?;
		}
		Ok(())
	}

	async fn validate_public_key(&self, raw: &str) -> Result<(), SystemError> {
		self.record(SystemCall::ValidatePublicKey(raw.to_string()));

		let mut parts = raw.split_whitespace();
		let algorithm = parts.next().unwrap_or_default();
		let blob = parts.next().unwrap_or_default();
		let blob_ok = !blob.is_empty()
			&& blob
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='));

		if KEY_ALGORITHMS.contains(&algorithm) && blob_ok {
			Ok(())
		} else {
			Err(SystemError::KeyRejected(format!(
				"{} is not a public key file",
				raw.trim()
			)))
		}
	}

	async fn chown(&self, path: &Path, owner: &Ownership) -> Result<(), SystemError> {
		self.record(SystemCall::Chown(path.to_path_buf(), owner.spec()));
		Ok(())
	}

	async fn chown_recursive(&self, path: &Path, owner: &Ownership) -> Result<(), SystemError> {
		self.record(SystemCall::ChownRecursive(path.to_path_buf(), owner.spec()));
		Ok(())
	}
}
