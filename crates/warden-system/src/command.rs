// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::ffi::OsString;
use std::io::Write;
use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use crate::error::SystemError;
use crate::ops::{AccountCreation, AccountSpec, Ownership, SystemOps};

/// Host key algorithms generated on first boot, with their key size flags.
pub const HOST_KEY_TYPES: &[(&str, &[&str])] = &[
	("rsa", &["-b", "4096"]),
	("ecdsa", &["-b", "521"]),
	("ed25519", &[]),
];

/// System operations implemented by shelling out to the standard tools
/// (`adduser`, `ssh-keygen`, `chown`).
pub struct CommandSystem;

impl CommandSystem {
	pub fn new() -> Self {
		Self
	}
}

impl Default for CommandSystem {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl SystemOps for CommandSystem {
	async fn create_account(&self, spec: &AccountSpec) -> Result<AccountCreation, SystemError> {
		// -D: no password, so only public key authentication can log in
		let args: Vec<OsString> = vec![
			"-D".into(),
			"-h".into(),
			spec.home.clone().into_os_string(),
			"-g".into(),
			spec.comment.clone().into(),
			spec.username.clone().into(),
		];
		let output = run("adduser", &args).await?;

		if output.status.success() {
			debug!(user = %spec.username, home = %spec.home.display(), "created account");
			return Ok(AccountCreation::Created);
		}

		let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
		Ok(classify_adduser_failure(&stderr))
	}

	async fn generate_host_keys(&self, dir: &Path) -> Result<(), SystemError> {
		tokio::fs::create_dir_all(dir).await?;
		for (kind, extra) in HOST_KEY_TYPES {
			let key_path = dir.join(format!("ssh_host_{kind}_key"));
			let mut args: Vec<OsString> = vec!["-q".into(), "-N".into(), "".into(), "-t".into(), (*kind).into()];
			args.extend(extra.iter().map(OsString::from));
			args.push("-f".into());
			args.push(key_path.into_os_string());
			run_checked("ssh-keygen", &args).await?;
			debug!(kind, dir = %dir.display(), "generated host key");
		}
		Ok(())
	}

	async fn validate_public_key(&self, raw: &str) -> Result<(), SystemError> {
		let mut file = tempfile::NamedTempFile::new()?;
		writeln!(file, "{}", raw.trim())?;
		file.flush()?;

		let args: Vec<OsString> = vec!["-l".into(), "-f".into(), file.path().as_os_str().to_owned()];
		let output = run("ssh-keygen", &args).await?;
		if output.status.success() {
			trace!(
				fingerprint = %String::from_utf8_lossy(&output.stdout).trim(),
				"public key accepted"
			);
			Ok(())
		} else {
			let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
			Err(SystemError::KeyRejected(stderr))
		}
	}

	async fn chown(&self, path: &Path, owner: &Ownership) -> Result<(), SystemError> {
		let args: Vec<OsString> = vec![owner.spec().into(), path.as_os_str().to_owned()];
		run_checked("chown", &args).await?;
		Ok(())
	}

	async fn chown_recursive(&self, path: &Path, owner: &Ownership) -> Result<(), SystemError> {
		let args: Vec<OsString> = vec!["-R".into(), owner.spec().into(), path.as_os_str().to_owned()];
		run_checked("chown", &args).await?;
		Ok(())
	}
}

/// Map a failed `adduser` run to an outcome. Both BusyBox ("in use") and
/// shadow-utils ("already exists") wordings are recognised.
fn classify_adduser_failure(stderr: &str) -> AccountCreation {
	if stderr.contains("in use") || stderr.contains("already exists") {
		AccountCreation::AlreadyExists
	} else {
		AccountCreation::Failed(stderr.to_string())
	}
}

/// Runs a command and returns its output regardless of exit status.
async fn run(cmd: &'static str, args: &[OsString]) -> Result<Output, SystemError> {
	trace!(
		cmd = %format!("{} {}", cmd, display_args(args).join(" ")),
		"running command"
	);

	Command::new(cmd).args(args).output().await.map_err(|e| {
		if e.kind() == std::io::ErrorKind::NotFound {
			warn!(cmd, "command not found in PATH");
			SystemError::ToolNotInstalled(cmd)
		} else {
			SystemError::Io(e)
		}
	})
}

/// Runs a command and fails unless it exits successfully.
async fn run_checked(cmd: &'static str, args: &[OsString]) -> Result<Output, SystemError> {
	let output = run(cmd, args).await?;
	if output.status.success() {
		Ok(output)
	} else {
		Err(SystemError::CommandFailed {
			cmd,
			args: display_args(args),
			stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
		})
	}
}

fn display_args(args: &[OsString]) -> Vec<String> {
	args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_busybox_duplicate_is_already_exists() {
		assert_eq!(
			classify_adduser_failure("adduser: user 'alice' in use"),
			AccountCreation::AlreadyExists
		);
	}

	#[test]
	fn test_shadow_utils_duplicate_is_already_exists() {
		assert_eq!(
			classify_adduser_failure("useradd: user 'alice' already exists"),
			AccountCreation::AlreadyExists
		);
	}

	#[test]
	fn test_other_failure_keeps_message() {
		assert_eq!(
			classify_adduser_failure("adduser: permission denied"),
			AccountCreation::Failed("adduser: permission denied".to_string())
		);
	}

	/// Test: A missing binary is reported as ToolNotInstalled rather than a
	/// generic I/O error.
	#[tokio::test]
	async fn test_missing_tool_reported() {
		let err = run("warden-definitely-not-a-real-tool", &[])
			.await
			.unwrap_err();
		assert!(matches!(err, SystemError::ToolNotInstalled(_)));
	}

	#[test]
	fn test_host_key_types_cover_default_algorithms() {
		let kinds: Vec<&str> = HOST_KEY_TYPES.iter().map(|(k, _)| *k).collect();
		assert_eq!(kinds, vec!["rsa", "ecdsa", "ed25519"]);
	}
}
