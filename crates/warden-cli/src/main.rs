// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod logging;

use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use warden_common_config::{load_config, CliOverrides};
use warden_reconcile::{BootOutcome, Engine};

#[derive(Parser, Debug)]
#[command(name = "sftp-warden", version, about, long_about = None)]
struct Cli {
	/// Configuration file, layered over /etc/sftp-warden/config.toml
	#[arg(long, global = true, env = "WARDEN_CONFIG")]
	config: Option<PathBuf>,

	/// Log filter, e.g. `info` or `warden_reconcile=debug`
	#[arg(long, global = true)]
	log_level: Option<String>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Restore state, provision every registered user, then run the SFTP server
	Init,

	/// Create and provision one user
	AddUser {
		username: String,
		email: String,
		/// Key host account to pull public keys from
		#[arg(default_value = "")]
		handle: String,
	},

	/// Refresh keys, ownership and mounts for every registered user
	Sync,

	/// Add one public key for a registered user
	AddKey { username: String, key: String },

	/// List login accounts, excluding system accounts
	ListUsers,
}

fn main() -> ExitCode {
	let cli = match Cli::try_parse() {
		Ok(cli) => cli,
		Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
		Err(e) => {
			let _ = e.print();
			return ExitCode::FAILURE;
		}
	};

	match run(cli) {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			eprintln!("error: {e:#}");
			ExitCode::FAILURE
		}
	}
}

fn run(cli: Cli) -> Result<()> {
	let config = load_config(
		cli.config,
		CliOverrides {
			log_level: cli.log_level.clone(),
		},
	)
	.context("failed to load configuration")?;
	logging::init_tracing(&config.logging, cli.log_level.as_deref());
	debug!(config = ?config, "resolved configuration");

	let runtime = tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()
		.context("failed to start runtime")?;
	let engine = Engine::from_config(config)?;

	match cli.command {
		Command::Init => {
			let BootOutcome::LaunchServer { program, args } = runtime.block_on(engine.boot())?;
			drop(runtime);
			info!(%program, ?args, "launching SFTP server");
			let err = std::process::Command::new(&program).args(&args).exec();
			Err(err).with_context(|| format!("failed to exec {program}"))
		}
		Command::AddUser {
			username,
			email,
			handle,
		} => {
			let outcome = runtime.block_on(engine.add_user(&username, &email, &handle))?;
			info!(user = %username, account = ?outcome.account, "user provisioned");
			Ok(())
		}
		Command::Sync => {
			let reports = runtime.block_on(engine.sync())?;
			info!(users = reports.len(), "sync finished");
			Ok(())
		}
		Command::AddKey { username, key } => {
			let report = runtime.block_on(engine.add_key(&username, &key))?;
			info!(user = %username, added = report.added, total = report.total, "key added");
			Ok(())
		}
		Command::ListUsers => {
			for user in runtime.block_on(engine.list_users())? {
				println!("{user}");
			}
			Ok(())
		}
	}
}
