// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Reconciliation engine for an SFTP container.
//!
//! The registry file and the persisted snapshots under the data root are the
//! only durable state. Everything else (OS accounts, host keys, authorized
//! keys, ownership, mount links) is rebuilt from them on every start by
//! [`Engine::boot`], and can be refreshed later with [`Engine::sync`].

pub mod accounts;
pub mod boot;
pub mod error;
pub mod host_keys;
pub mod keys;
pub mod mounts;
pub mod ownership;
pub mod provisioner;
pub mod registry;
pub mod snapshot;

pub use accounts::list_accounts;
pub use boot::{BootOutcome, BootStage, Engine};
pub use error::{ReconcileError, Result};
pub use host_keys::{HostIdentityStore, HostKeyError, HostKeyOutcome};
pub use keys::{
	AuthorizedKeys, HttpKeyFetcher, KeyFetcher, KeySyncError, KeySyncOutcome, KeySynchronizer,
	MergeReport,
};
pub use mounts::{MountEntry, MountError, MountLinker, MountSyncReport};
pub use ownership::{OwnershipError, OwnershipReconciler};
pub use provisioner::{CreateOutcome, Provisioner, UpdateReport};
pub use registry::{AddOutcome, Registry, RegistryError, UserRecord};
pub use snapshot::{AccountSnapshotStore, RestoreOutcome, SnapshotError};
