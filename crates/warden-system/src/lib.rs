// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Host-mutating operations behind an injectable interface.
//!
//! [`CommandSystem`] drives the real tools; with the `testing` feature,
//! [`fake::FakeSystem`] provides a sandboxed stand-in.

mod command;
mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
mod ops;

pub use command::{CommandSystem, HOST_KEY_TYPES};
pub use error::SystemError;
pub use ops::{AccountCreation, AccountSpec, Ownership, SystemOps};
