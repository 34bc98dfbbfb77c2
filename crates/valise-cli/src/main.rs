//! The `valise` command-line front-end.
//!
//! A thin shell over the library crates: argument parsing, event
//! rendering, and the 1:1 mapping from the error taxonomy to process
//! exit codes live here; all behavior lives in the libraries.

#![warn(clippy::all)]

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use valise_core::Config;

#[derive(Parser, Debug)]
#[command(name = "valise", version, about = "Binary package manager", max_term_width = 100)]
struct Cli {
    /// Root directory for all filesystem operations.
    #[arg(long, short = 'r', global = true, value_name = "DIR")]
    rootdir: Option<PathBuf>,

    /// Alternative configuration directory.
    #[arg(long, short = 'C', global = true, value_name = "DIR")]
    config: Option<PathBuf>,

    /// Prepend a repository to the pool; may repeat.
    #[arg(long, global = true, value_name = "URL")]
    repository: Vec<String>,

    /// Ignore repositories declared in configuration files.
    #[arg(long, global = true)]
    ignore_conf_repos: bool,

    /// Compute and print the transaction without applying it.
    #[arg(long, short = 'n', global = true)]
    dry_run: bool,

    /// Weaken conf-file preservation and dependency checks.
    #[arg(long, short = 'f', global = true)]
    force: bool,

    /// Enable debug diagnostics.
    #[arg(long, short = 'd', global = true)]
    debug: bool,

    /// Enable verbose diagnostics.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install packages by name, pattern, or local archive path.
    Install {
        /// Targets to install.
        #[arg(required = true)]
        targets: Vec<String>,
    },
    /// Remove installed packages.
    Remove {
        /// Packages to remove.
        #[arg(required = true)]
        targets: Vec<String>,
        /// Also drop configuration files and the database record.
        #[arg(long)]
        purge: bool,
    },
    /// Update named packages, or everything with no arguments.
    Update {
        /// Packages to update; empty means update-all.
        targets: Vec<String>,
    },
    /// Reinstall the currently installed version.
    Reinstall {
        /// Packages to reinstall.
        #[arg(required = true)]
        targets: Vec<String>,
    },
    /// Suppress automatic updates for packages.
    Hold {
        /// Packages to hold.
        #[arg(required = true)]
        targets: Vec<String>,
    },
    /// Re-enable automatic updates for packages.
    Unhold {
        /// Packages to release.
        #[arg(required = true)]
        targets: Vec<String>,
    },
    /// List installed packages.
    List,
    /// Show one installed package record.
    Show {
        /// Package name.
        target: String,
    },
    /// List automatically installed packages nothing depends on.
    Orphans,
    /// Inspect or elect alternatives groups.
    Alternatives {
        /// Promote this package's alternatives.
        #[arg(long, short = 's', value_name = "PKGNAME")]
        set: Option<String>,
        /// Restrict the election to one group.
        #[arg(long, short = 'g', value_name = "GROUP", requires = "set")]
        group: Option<String>,
    },
    /// Run the integrity audit.
    Check {
        /// Only audit these packages; empty means all.
        targets: Vec<String>,
        /// Also sweep transaction-era keys out of the pkgdb.
        #[arg(long)]
        clean: bool,
    },
    /// Configure unpacked packages.
    Configure {
        /// Packages to configure.
        targets: Vec<String>,
        /// Configure every unpacked package.
        #[arg(long, short = 'a', conflicts_with = "targets")]
        all: bool,
    },
    /// Promote staged packages into the published indexes.
    Index {
        /// Repository directories to index together.
        #[arg(required = true)]
        repositories: Vec<PathBuf>,
        /// Sign the rewritten indexes with this secret key.
        #[arg(long, value_name = "FILE")]
        seckey: Option<PathBuf>,
        /// Signer identity recorded in the index metadata.
        #[arg(long, value_name = "ID", requires = "seckey")]
        signed_by: Option<String>,
    },
    /// Generate a signing key pair.
    Keygen {
        /// Secret-key output path.
        #[arg(long, short = 's', value_name = "FILE")]
        seckey: PathBuf,
        /// Public-key output path.
        #[arg(long, short = 'p', value_name = "FILE")]
        pubkey: PathBuf,
        /// Read the passphrase from this file.
        #[arg(long, value_name = "FILE")]
        passphrase_file: Option<PathBuf>,
        /// Untrusted comment for the public-key file.
        #[arg(long, short = 'c', default_value = "valise signing key")]
        comment: String,
    },
    /// Sign a file, producing `<file>.minisig`.
    Sign {
        /// File to sign.
        message: PathBuf,
        /// Secret-key file.
        #[arg(long, short = 's', value_name = "FILE")]
        seckey: PathBuf,
        /// Read the passphrase from this file.
        #[arg(long, value_name = "FILE")]
        passphrase_file: Option<PathBuf>,
    },
    /// Verify a detached signature.
    Verify {
        /// Signed file.
        message: PathBuf,
        /// Public-key file.
        #[arg(long, short = 'p', value_name = "FILE")]
        pubkey: PathBuf,
        /// Signature file; defaults to `<file>.minisig`.
        #[arg(long, short = 'x', value_name = "FILE")]
        signature: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    install_tracing(&cli);
    match commands::run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("valise: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn install_tracing(cli: &Cli) {
    let default = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

impl Cli {
    /// Load configuration and fold in the global overrides.
    fn load_config(&self) -> valise_core::Result<Config> {
        let confdir = self
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from("/etc/valise.d"));
        let mut config = Config::load(&confdir)?;
        if self.ignore_conf_repos {
            config.repositories.clear();
        }
        for url in self.repository.iter().rev() {
            config.repositories.insert(0, url.clone());
        }
        if let Some(rootdir) = &self.rootdir {
            config.rootdir = rootdir.clone();
        }
        Ok(config)
    }
}
