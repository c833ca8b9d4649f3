// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Errors raised by system operations.
#[derive(Debug, Error)]
pub enum SystemError {
	#[error("{0} not found in PATH")]
	ToolNotInstalled(&'static str),

	#[error("{cmd} {} failed: {stderr}", args.join(" "))]
	CommandFailed {
		cmd: &'static str,
		args: Vec<String>,
		stderr: String,
	},

	#[error("public key rejected: {0}")]
	KeyRejected(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}
