// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable user registry.
//!
//! A flat, append-only text file: one `username|email|externalHandle`
//! record per line. Blank lines and lines starting with `#` are ignored.
//! Usernames are unique; adding a known username is a no-op.
//!
//! Malformed lines are skipped and logged, the rest of the file is still
//! read. A hand-edited typo must not stop every other user from being
//! reconciled.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, instrument, warn};

use crate::keys::validate_handle;

pub const FIELD_DELIMITER: char = '|';

#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("registry I/O error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid {field}: {reason}")]
	InvalidField { field: &'static str, reason: String },
}

/// Why a registry line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
	#[error("expected at least 2 fields, found {0}")]
	TooFewFields(usize),

	#[error("unexpected non-empty field {0:?}")]
	UnexpectedField(String),

	#[error("invalid username: {0}")]
	InvalidUsername(String),
}

/// One provisioned user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
	pub username: String,
	/// Used as the account description.
	pub email: String,
	/// Key host account; empty means no external key source.
	pub external_handle: String,
}

impl UserRecord {
	pub fn new(
		username: impl Into<String>,
		email: impl Into<String>,
		external_handle: impl Into<String>,
	) -> Self {
		Self {
			username: username.into(),
			email: email.into(),
			external_handle: external_handle.into(),
		}
	}

	pub fn has_external_handle(&self) -> bool {
		!self.external_handle.is_empty()
	}

	/// Serialize as a registry line, without the trailing newline.
	pub fn to_line(&self) -> String {
		format!(
			"{}{FIELD_DELIMITER}{}{FIELD_DELIMITER}{}",
			self.username, self.email, self.external_handle
		)
	}

	/// Check that every field can be stored and later handed to the account
	/// tools unchanged.
	pub fn validate(&self) -> Result<(), RegistryError> {
		validate_username(&self.username).map_err(|reason| RegistryError::InvalidField {
			field: "username",
			reason,
		})?;
		// The email ends up in the passwd GECOS field, which is `:` delimited.
		if let Some(c) = self
			.email
			.chars()
			.find(|c| matches!(c, '|' | ':' | '\n' | '\r'))
		{
			return Err(RegistryError::InvalidField {
				field: "email",
				reason: format!("must not contain {c:?}"),
			});
		}
		if let Some(c) = self
			.external_handle
			.chars()
			.find(|c| *c == FIELD_DELIMITER || c.is_whitespace())
		{
			return Err(RegistryError::InvalidField {
				field: "external handle",
				reason: format!("must not contain {c:?}"),
			});
		}
		// Rejected here, before the record is stored, so a bad handle cannot
		// abort every later boot at fetch time.
		if self.has_external_handle() {
			validate_handle(&self.external_handle).map_err(|e| RegistryError::InvalidField {
				field: "external handle",
				reason: e.to_string(),
			})?;
		}
		Ok(())
	}
}

/// Usernames must be usable verbatim as an account name and a path segment.
pub fn validate_username(username: &str) -> Result<(), String> {
	if username.is_empty() {
		return Err("must not be empty".to_string());
	}
	if username.starts_with('-') {
		return Err(format!("{username:?} must not start with '-'"));
	}
	if username == "." || username == ".." {
		return Err(format!("{username:?} is not a valid name"));
	}
	if let Some(c) = username
		.chars()
		.find(|c| c.is_whitespace() || matches!(*c, ':' | '/' | FIELD_DELIMITER))
	{
		return Err(format!("{username:?} contains {c:?}"));
	}
	Ok(())
}

/// Parse one registry line.
///
/// Returns `Ok(None)` for blank and comment lines. Accepts two fields
/// (handle omitted), three fields, or more when the extra fields are empty
/// (`alice|a@example.com||`).
pub fn parse_line(line: &str) -> Result<Option<UserRecord>, ParseError> {
	let line = line.trim_end_matches(['\r', '\n']);
	if line.trim().is_empty() || line.trim_start().starts_with('#') {
		return Ok(None);
	}

	let fields: Vec<&str> = line.split(FIELD_DELIMITER).map(str::trim).collect();
	if fields.len() < 2 {
		return Err(ParseError::TooFewFields(fields.len()));
	}
	if let Some(extra) = fields.iter().skip(3).find(|f| !f.is_empty()) {
		return Err(ParseError::UnexpectedField(extra.to_string()));
	}

	validate_username(fields[0]).map_err(ParseError::InvalidUsername)?;

	Ok(Some(UserRecord::new(
		fields[0],
		fields[1],
		fields.get(2).copied().unwrap_or_default(),
	)))
}

/// Parse registry text, skipping malformed lines with an error log.
pub fn parse_records(text: &str) -> Vec<UserRecord> {
	text
		.lines()
		.enumerate()
		.filter_map(|(index, line)| match parse_line(line) {
			Ok(record) => record,
			Err(e) => {
				error!(line = index + 1, error = %e, "skipping malformed registry line");
				None
			}
		})
		.collect()
}

/// Outcome of [`Registry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
	Added,
	AlreadyPresent,
}

/// The registry file.
#[derive(Debug, Clone)]
pub struct Registry {
	path: PathBuf,
}

impl Registry {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Read the raw file; a missing file reads as empty.
	async fn read_text(&self) -> Result<String, RegistryError> {
		match fs::read_to_string(&self.path).await {
			Ok(text) => Ok(text),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!(path = %self.path.display(), "registry file not found, treating as empty");
				Ok(String::new())
			}
			Err(source) => Err(RegistryError::Io {
				path: self.path.clone(),
				source,
			}),
		}
	}

	/// Every record, in file order.
	pub async fn list_records(&self) -> Result<Vec<UserRecord>, RegistryError> {
		Ok(parse_records(&self.read_text().await?))
	}

	/// Deduplicated, sorted usernames.
	pub async fn list_usernames(&self) -> Result<BTreeSet<String>, RegistryError> {
		Ok(self
			.list_records()
			.await?
			.into_iter()
			.map(|r| r.username)
			.collect())
	}

	pub async fn contains(&self, username: &str) -> Result<bool, RegistryError> {
		Ok(self.list_usernames().await?.contains(username))
	}

	/// Append a record unless its username is already registered.
	#[instrument(skip_all, fields(user = %record.username))]
	pub async fn add(&self, record: &UserRecord) -> Result<AddOutcome, RegistryError> {
		record.validate()?;

		let existing = self.read_text().await?;
		let known: BTreeSet<String> = parse_records(&existing)
			.into_iter()
			.map(|r| r.username)
			.collect();
		if known.contains(&record.username) {
			warn!("user already in registry, not adding");
			return Ok(AddOutcome::AlreadyPresent);
		}

		let io_err = |source| RegistryError::Io {
			path: self.path.clone(),
			source,
		};

		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent).await.map_err(io_err)?;
		}

		let mut line = String::new();
		if !existing.is_empty() && !existing.ends_with('\n') {
			line.push('\n');
		}
		line.push_str(&record.to_line());
		line.push('\n');

		let mut file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&self.path)
			.await
			.map_err(io_err)?;
		file.write_all(line.as_bytes()).await.map_err(io_err)?;
		file.flush().await.map_err(io_err)?;

		debug!(path = %self.path.display(), "appended registry record");
		Ok(AddOutcome::Added)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn registry_in(dir: &tempfile::TempDir) -> Registry {
		Registry::new(dir.path().join("data/users.conf"))
	}

	#[test]
	fn test_parse_three_fields() {
		let record = parse_line("alice|alice@example.com|alice-gh").unwrap().unwrap();
		assert_eq!(record, UserRecord::new("alice", "alice@example.com", "alice-gh"));
		assert!(record.has_external_handle());
	}

	#[test]
	fn test_parse_trailing_delimiters_mean_no_handle() {
		for line in ["bob|bob@example.com|", "bob|bob@example.com||", "bob|bob@example.com"] {
			let record = parse_line(line).unwrap().unwrap();
			assert_eq!(record.username, "bob");
			assert_eq!(record.external_handle, "", "line {line:?}");
		}
	}

	#[test]
	fn test_parse_skips_blank_and_comment_lines() {
		assert_eq!(parse_line(""), Ok(None));
		assert_eq!(parse_line("   "), Ok(None));
		assert_eq!(parse_line("# alice|a@b|c"), Ok(None));
		assert_eq!(parse_line("\r"), Ok(None));
	}

	#[test]
	fn test_parse_strips_carriage_return() {
		let record = parse_line("carol|c@example.com|carol-gh\r").unwrap().unwrap();
		assert_eq!(record.external_handle, "carol-gh");
	}

	#[test]
	fn test_parse_rejects_malformed() {
		assert_eq!(parse_line("alice"), Err(ParseError::TooFewFields(1)));
		assert!(matches!(
			parse_line("alice|a@b|c|extra"),
			Err(ParseError::UnexpectedField(_))
		));
		assert!(matches!(
			parse_line("|a@b|c"),
			Err(ParseError::InvalidUsername(_))
		));
		assert!(matches!(
			parse_line("bad name|a@b|c"),
			Err(ParseError::InvalidUsername(_))
		));
		assert!(matches!(
			parse_line("-rf|a@b|c"),
			Err(ParseError::InvalidUsername(_))
		));
	}

	/// Malformed lines are skipped; the records around them survive, in
	/// file order.
	#[test]
	fn test_parse_records_skips_malformed_lines() {
		let text = "# users\nalice|a@example.com|alice-gh\ngarbage\n\nbob|b@example.com|\n";
		let records = parse_records(text);
		let names: Vec<_> = records.iter().map(|r| r.username.as_str()).collect();
		assert_eq!(names, vec!["alice", "bob"]);
	}

	#[test]
	fn test_validate_rejects_unstorable_fields() {
		assert!(UserRecord::new("alice", "a|b", "").validate().is_err());
		assert!(UserRecord::new("alice", "a:b", "").validate().is_err());
		assert!(UserRecord::new("alice", "a@b", "x y").validate().is_err());
		assert!(UserRecord::new("../x", "a@b", "").validate().is_err());
		assert!(UserRecord::new("alice", "a@b", "").validate().is_ok());
	}

	/// A handle is refused up front when it could never be fetched.
	#[test]
	fn test_validate_rejects_unfetchable_handle() {
		for handle in ["bad/handle", "..", "a?b", "a#b", "%2e", "evil:x"] {
			let err = UserRecord::new("eve", "eve@example.com", handle)
				.validate()
				.unwrap_err();
			assert!(
				matches!(err, RegistryError::InvalidField { field: "external handle", .. }),
				"{handle:?}"
			);
		}
		assert!(UserRecord::new("eve", "eve@example.com", "eve-gh")
			.validate()
			.is_ok());
	}

	#[tokio::test]
	async fn test_missing_registry_is_empty() {
		let dir = tempfile::tempdir().unwrap();
		let registry = registry_in(&dir);
		assert!(registry.list_records().await.unwrap().is_empty());
		assert!(registry.list_usernames().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_add_then_list() {
		let dir = tempfile::tempdir().unwrap();
		let registry = registry_in(&dir);

		let outcome = registry
			.add(&UserRecord::new("alice", "alice@example.com", "alice-gh"))
			.await
			.unwrap();
		assert_eq!(outcome, AddOutcome::Added);

		let text = std::fs::read_to_string(registry.path()).unwrap();
		assert_eq!(text, "alice|alice@example.com|alice-gh\n");
		assert!(registry.contains("alice").await.unwrap());
	}

	/// Test: Adding a username twice is a no-op the second time.
	///
	/// Why this test is important: the provisioner calls `add` on every
	/// successful account creation; a duplicate record would make the boot
	/// loop reconcile the same user twice with possibly different handles.
	#[tokio::test]
	async fn test_duplicate_add_is_noop() {
		let dir = tempfile::tempdir().unwrap();
		let registry = registry_in(&dir);

		registry
			.add(&UserRecord::new("alice", "alice@example.com", "alice-gh"))
			.await
			.unwrap();
		let outcome = registry
			.add(&UserRecord::new("alice", "other@example.com", ""))
			.await
			.unwrap();

		assert_eq!(outcome, AddOutcome::AlreadyPresent);
		let records = registry.list_records().await.unwrap();
		assert_eq!(records.len(), 1);
		assert_eq!(records[0].email, "alice@example.com");
	}

	#[tokio::test]
	async fn test_add_repairs_missing_trailing_newline() {
		let dir = tempfile::tempdir().unwrap();
		let registry = registry_in(&dir);
		std::fs::create_dir_all(registry.path().parent().unwrap()).unwrap();
		std::fs::write(registry.path(), "alice|a@example.com|alice-gh").unwrap();

		registry
			.add(&UserRecord::new("bob", "b@example.com", ""))
			.await
			.unwrap();

		let names: Vec<_> = registry
			.list_records()
			.await
			.unwrap()
			.into_iter()
			.map(|r| r.username)
			.collect();
		assert_eq!(names, vec!["alice", "bob"]);
	}

	#[tokio::test]
	async fn test_add_rejects_invalid_record() {
		let dir = tempfile::tempdir().unwrap();
		let registry = registry_in(&dir);
		let result = registry.add(&UserRecord::new("", "a@b", "")).await;
		assert!(matches!(result, Err(RegistryError::InvalidField { .. })));
		assert!(!registry.path().exists());
	}

	// Property: however many times names are added, in whatever order, the
	// registry holds each username exactly once and list_usernames is the
	// sorted set of everything added.
	proptest! {
		#![proptest_config(ProptestConfig::with_cases(32))]
		#[test]
		fn prop_registry_dedups(names in prop::collection::vec("[a-d]{1,2}", 1..12)) {
			let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
			let dir = tempfile::tempdir().unwrap();
			let registry = registry_in(&dir);

			rt.block_on(async {
				for name in &names {
					registry
						.add(&UserRecord::new(name.as_str(), "x@example.com", ""))
						.await
						.unwrap();
				}
			});

			let records = rt.block_on(registry.list_records()).unwrap();
			let listed = rt.block_on(registry.list_usernames()).unwrap();
			let expected: BTreeSet<String> = names.iter().cloned().collect();

			prop_assert_eq!(records.len(), expected.len());
			prop_assert_eq!(listed, expected);
		}
	}

	// Property: any valid record survives serialization to a line and back.
	proptest! {
		#[test]
		fn prop_line_parses_back(
			username in "[a-z_][a-z0-9_-]{0,15}",
			email in "[a-z0-9.@+-]{0,20}",
			handle in "[A-Za-z0-9-]{0,20}",
		) {
			let record = UserRecord::new(username, email, handle);
			prop_assert!(record.validate().is_ok());
			let parsed = parse_line(&record.to_line()).unwrap();
			prop_assert_eq!(parsed, Some(record));
		}
	}
}
