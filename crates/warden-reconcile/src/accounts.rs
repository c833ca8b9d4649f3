// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::Path;

use tokio::fs;

use crate::error::{ReconcileError, Result};

/// Usernames from a passwd-format table, in file order, minus `excluded`.
pub fn parse_accounts(text: &str, excluded: &[String]) -> Vec<String> {
	text
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty() && !line.starts_with('#'))
		.filter_map(|line| line.split(':').next())
		.filter(|name| !name.is_empty() && !excluded.iter().any(|e| e.as_str() == *name))
		.map(str::to_string)
		.collect()
}

/// Login accounts present on the live system. A missing table lists none.
pub async fn list_accounts(passwd: &Path, excluded: &[String]) -> Result<Vec<String>> {
	match fs::read_to_string(passwd).await {
		Ok(text) => Ok(parse_accounts(&text, excluded)),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
		Err(source) => Err(ReconcileError::Io {
			path: passwd.to_path_buf(),
			source,
		}),
	}
}
