// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use thiserror::Error;

use crate::host_keys::HostKeyError;
use crate::keys::KeySyncError;
use crate::mounts::MountError;
use crate::ownership::OwnershipError;
use crate::registry::RegistryError;
use crate::snapshot::SnapshotError;

/// Any error that aborts a reconciliation run.
#[derive(Debug, Error)]
pub enum ReconcileError {
	#[error("registry: {0}")]
	Registry(#[from] RegistryError),

	#[error("account snapshot: {0}")]
	Snapshot(#[from] SnapshotError),

	#[error("host keys: {0}")]
	HostKeys(#[from] HostKeyError),

	#[error("key sync: {0}")]
	Keys(#[from] KeySyncError),

	#[error("ownership: {0}")]
	Ownership(#[from] OwnershipError),

	#[error("mounts: {0}")]
	Mounts(#[from] MountError),

	#[error("user {0} is not in the registry")]
	UnknownUser(String),

	#[error("I/O error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
