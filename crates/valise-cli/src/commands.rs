//! Subcommand dispatch.

use crate::output::{print_transaction, ConsoleSink};
use crate::{Cli, Command};
use std::path::{Path, PathBuf};
use tracing::info;
use valise_core::{Config, Error, Result};
use valise_pkgdb::{alternatives, PkgDb};
use valise_repository::{IdxMeta, Pool, RepoLock, Repository};
use valise_resolver::{plan, PlannerFlags, Request, RequestOp};
use valise_unpack::{commit, CommitFlags};

pub fn run(cli: &Cli) -> Result<()> {
    let config = cli.load_config()?;
    match &cli.command {
        Command::Install { targets } => {
            transact(cli, &config, requests(RequestOp::Install, targets), false)
        }
        Command::Remove { targets, purge } => {
            transact(cli, &config, requests(RequestOp::Remove, targets), *purge)
        }
        Command::Update { targets } => {
            let reqs = if targets.is_empty() {
                vec![Request::new(RequestOp::UpdateAll, "")]
            } else {
                requests(RequestOp::Update, targets)
            };
            transact(cli, &config, reqs, false)
        }
        Command::Reinstall { targets } => {
            transact(cli, &config, requests(RequestOp::Reinstall, targets), false)
        }
        Command::Hold { targets } => {
            transact(cli, &config, requests(RequestOp::Hold, targets), false)
        }
        Command::Unhold { targets } => {
            transact(cli, &config, requests(RequestOp::Unhold, targets), false)
        }
        Command::List => list(&config),
        Command::Show { target } => show(&config, target),
        Command::Orphans => orphans(&config),
        Command::Alternatives { set, group } => alternatives_cmd(&config, set.as_deref(), group.as_deref()),
        Command::Check { targets, clean } => check(&config, targets, *clean),
        Command::Configure { targets, all } => configure(&config, targets, *all, cli.force),
        Command::Index { repositories, seckey, signed_by } => {
            index(&config, repositories, seckey.as_deref(), signed_by.as_deref())
        }
        Command::Keygen { seckey, pubkey, passphrase_file, comment } => {
            keygen(seckey, pubkey, passphrase_file.as_deref(), comment)
        }
        Command::Sign { message, seckey, passphrase_file } => {
            sign(message, seckey, passphrase_file.as_deref())
        }
        Command::Verify { message, pubkey, signature } => {
            verify(message, pubkey, signature.as_deref())
        }
    }
}

fn requests(op: RequestOp, targets: &[String]) -> Vec<Request> {
    targets.iter().map(|target| Request::new(op, target)).collect()
}

fn transact(cli: &Cli, config: &Config, requests: Vec<Request>, purge: bool) -> Result<()> {
    let mut db = PkgDb::open(config)?;
    let pool = Pool::open(config)?;
    let flags = PlannerFlags { force: cli.force, dry_run: cli.dry_run, ..PlannerFlags::default() };
    let sink = ConsoleSink;
    let transaction = plan(&requests, &db, &pool, config, &flags, &sink)?;
    if cli.dry_run {
        print_transaction(&transaction);
        return Ok(());
    }
    if transaction.is_empty() {
        println!("Nothing to do.");
        return Ok(());
    }
    print_transaction(&transaction);
    let commit_flags = CommitFlags { force: cli.force, purge };
    commit(&mut db, config, &transaction, &commit_flags, &sink)
}

fn list(config: &Config) -> Result<()> {
    let db = PkgDb::open(config)?;
    for record in db.records().values() {
        println!("{} {} {}", record.pkgver, record.state, record.short_desc);
    }
    Ok(())
}

fn show(config: &Config, target: &str) -> Result<()> {
    let db = PkgDb::open(config)?;
    let record = db.get(target).ok_or_else(|| Error::not_found(target))?;
    let doc = valise_plist::pkg_to_value(record);
    print!("{}", String::from_utf8_lossy(&valise_plist::to_bytes(&doc)));
    Ok(())
}

fn orphans(config: &Config) -> Result<()> {
    let db = PkgDb::open(config)?;
    for record in db.orphans() {
        println!("{}", record.pkgver);
    }
    Ok(())
}

fn alternatives_cmd(config: &Config, set: Option<&str>, group: Option<&str>) -> Result<()> {
    let mut db = PkgDb::open(config)?;
    match set {
        Some(pkgname) => {
            db.lock()?;
            alternatives::set(&mut db, pkgname, group)?;
            db.update(true, false)?;
            db.unlock();
            Ok(())
        }
        None => {
            for (group, members) in alternatives::list(&db) {
                let rendered: Vec<String> = members
                    .iter()
                    .map(|(pkgname, head)| {
                        if *head {
                            format!("{pkgname} (current)")
                        } else {
                            pkgname.clone()
                        }
                    })
                    .collect();
                println!("{group}: {}", rendered.join(", "));
            }
            Ok(())
        }
    }
}

fn check(config: &Config, targets: &[String], clean: bool) -> Result<()> {
    let db = PkgDb::open(config)?;
    let checks = valise_check::CheckSet::all();
    let reports = if targets.is_empty() {
        valise_check::check_all(&db, config, checks)
    } else {
        let mut reports = Vec::new();
        for target in targets {
            let record = db.get(target).ok_or_else(|| Error::not_found(target))?;
            let report = valise_check::check_package(&db, config, record, checks);
            if !report.issues.is_empty() {
                reports.push(report);
            }
        }
        reports
    };
    for report in &reports {
        for issue in &report.issues {
            println!("{}: {issue}", report.pkgver);
        }
    }
    if clean {
        let touched = valise_check::clean_pkgdb_file(config)?;
        info!(records = touched, "pkgdb cleanup finished");
    }
    if reports.is_empty() {
        Ok(())
    } else {
        Err(Error::StateInconsistent {
            message: format!("{} package(s) failed the audit", reports.len()),
        })
    }
}

fn configure(config: &Config, targets: &[String], all: bool, force: bool) -> Result<()> {
    let mut db = PkgDb::open(config)?;
    db.lock()?;
    let sink = ConsoleSink;
    let result = if all {
        valise_unpack::configure_all(&mut db, config, &sink).map(|count| {
            info!(count, "configured pending packages");
        })
    } else {
        targets.iter().try_for_each(|target| {
            let pkgname = db
                .get(target)
                .map(|r| r.pkgname.clone())
                .ok_or_else(|| Error::not_found(target))?;
            valise_unpack::configure(&mut db, config, &pkgname, false, force, &sink)?;
            db.update(true, false)
        })
    };
    db.unlock();
    result
}

fn index(
    config: &Config,
    repositories: &[PathBuf],
    seckey: Option<&Path>,
    signed_by: Option<&str>,
) -> Result<()> {
    let arch = config.target_arch().to_string();
    let mut locks = Vec::new();
    let mut repos = Vec::new();
    for dir in repositories {
        locks.push(RepoLock::acquire(dir)?);
        repos.push(Repository::open(&dir.to_string_lossy(), dir, &arch)?);
    }
    let promotion = valise_sat::resolve_group(&repos)?;
    for pkgver in &promotion.skipped {
        println!("not updating '{pkgver}'");
    }
    for change in &promotion.changes {
        match change {
            valise_sat::PromotionChange::Added(pkgver) => println!("Adding '{pkgver}'"),
            valise_sat::PromotionChange::Updated { from, to } => {
                println!("Updating from '{from}' to '{to}'");
            }
            valise_sat::PromotionChange::Removed(pkgver) => println!("Removing '{pkgver}'"),
        }
    }
    let signer = match seckey {
        Some(path) => Some(valise_sign::SecretKey::read(path, None)?),
        None => None,
    };
    for (repo, new_index) in repos.iter_mut().zip(promotion.indexes) {
        let promoted: Vec<String> = repo
            .stage
            .iter()
            .filter(|(_, record)| !promotion.skipped.contains(&record.pkgver))
            .map(|(pkgname, _)| pkgname.clone())
            .collect();
        repo.idx = new_index;
        if let Some(signer) = &signer {
            let digest = valise_repository::index_digest(&repo.idx);
            let signature = valise_sign::sign(signer, &digest, &repo.url);
            repo.idxmeta = Some(IdxMeta {
                signed_by: signed_by.unwrap_or("valise").to_string(),
                public_key: signer.public_key().to_bytes(),
                signature: signature.signature_bytes(),
            });
        }
        repo.write_index(&arch)?;
        for pkgname in promoted {
            repo.stage.remove(&pkgname);
        }
        repo.write_stage(&arch)?;
    }
    drop(locks);
    Ok(())
}

fn read_passphrase(path: Option<&Path>) -> Result<Option<String>> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| Error::fs(path, e))?;
            Ok(Some(text.trim_end_matches('\n').to_string()))
        }
        None => Ok(None),
    }
}

fn keygen(
    seckey: &Path,
    pubkey: &Path,
    passphrase_file: Option<&Path>,
    comment: &str,
) -> Result<()> {
    let passphrase = read_passphrase(passphrase_file)?;
    if passphrase.is_none() {
        eprintln!("valise: generating unencrypted secret-key");
    }
    let (secret, public) = valise_sign::generate();
    secret.write(seckey, passphrase.as_deref())?;
    public.write(pubkey, comment)?;
    Ok(())
}

fn sign(message: &Path, seckey: &Path, passphrase_file: Option<&Path>) -> Result<()> {
    let passphrase = read_passphrase(passphrase_file)?;
    let secret = valise_sign::SecretKey::read(seckey, passphrase.as_deref())?;
    let body = std::fs::read(message).map_err(|e| Error::fs(message, e))?;
    let signature = valise_sign::sign(&secret, &body, &format!("file {}", message.display()));
    signature.write(&sig_path(message, None))
}

fn verify(message: &Path, pubkey: &Path, signature: Option<&Path>) -> Result<()> {
    let public = valise_sign::PublicKey::read(pubkey)?;
    let body = std::fs::read(message).map_err(|e| Error::fs(message, e))?;
    let signature = valise_sign::Minisig::read(&sig_path(message, signature))?;
    valise_sign::verify(&public, &body, &signature)?;
    println!("Signature and comment signature verified");
    Ok(())
}

fn sig_path(message: &Path, explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let mut name = message.as_os_str().to_os_string();
            name.push(".minisig");
            PathBuf::from(name)
        }
    }
}
