//! End-to-end commit scenarios against real archives and a temp root.

use pretty_assertions::assert_eq;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use valise_archive::{ArchiveWriter, Compression};
use valise_core::{Config, NoopSink, PkgState};
use valise_pkgdb::PkgDb;
use valise_plist::{FileManifest, Value};
use valise_repository::Pool;
use valise_resolver::{plan, PlannerFlags, Request, RequestOp};
use valise_unpack::{commit, CommitFlags};

struct PayloadFile {
    path: &'static str,
    content: &'static [u8],
    conf: bool,
}

fn sha(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

fn build_pkg(
    dir: &Path,
    pkgver: &str,
    payload: &[PayloadFile],
    install_hook: Option<&str>,
) -> PathBuf {
    let path = dir.join(format!("{pkgver}.noarch.xbps"));
    let mut writer = ArchiveWriter::create(&path, Compression::Zstd, None).unwrap();
    if let Some(body) = install_hook {
        writer
            .append_buffer("INSTALL", format!("#!/bin/sh\n{body}\n").as_bytes(), 0o755)
            .unwrap();
    }

    let mut props = Value::map();
    props.insert("pkgver", Value::from(pkgver));
    props.insert("architecture", Value::from("noarch"));
    writer.append_buffer("props.plist", &valise_plist::to_bytes(&props), 0o644).unwrap();

    let mut manifest = FileManifest::default();
    for file in payload {
        let entry = valise_core::FileEntry {
            path: file.path.to_string(),
            sha256: sha(file.content),
            size: file.content.len() as u64,
            mutable: false,
        };
        if file.conf {
            manifest.conf_files.push(entry);
        } else {
            manifest.files.push(entry);
        }
    }
    let files_doc = valise_plist::manifest_to_value(&manifest);
    writer.append_buffer("files.plist", &valise_plist::to_bytes(&files_doc), 0o644).unwrap();

    for file in payload {
        writer.append_buffer(file.path.trim_start_matches('/'), file.content, 0o644).unwrap();
    }
    writer.finish().unwrap();
    path
}

struct World {
    _dir: tempfile::TempDir,
    config: Config,
    db: PkgDb,
    pool: Pool,
}

impl World {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.rootdir = dir.path().join("root");
        std::fs::create_dir_all(&config.rootdir).unwrap();
        let db = PkgDb::open_at(&config.pkgdb_path(), &config.rootdir).unwrap();
        let pool = Pool::from_repositories("noarch", vec![]);
        Self { _dir: dir, config, db, pool }
    }

    fn archive_dir(&self) -> PathBuf {
        self.config.rootdir.parent().unwrap().to_path_buf()
    }

    fn run(&mut self, requests: &[Request], flags: CommitFlags) {
        let txn = plan(
            requests,
            &self.db,
            &self.pool,
            &self.config,
            &PlannerFlags::default(),
            &NoopSink,
        )
        .unwrap();
        commit(&mut self.db, &self.config, &txn, &flags, &NoopSink).unwrap();
    }

    fn rooted(&self, path: &str) -> PathBuf {
        self.config.rootdir.join(path.trim_start_matches('/'))
    }
}

#[test]
fn install_extracts_files_and_configures() {
    let mut world = World::new();
    let archive = build_pkg(
        &world.archive_dir(),
        "demo-1.0_1",
        &[
            PayloadFile { path: "/usr/bin/demo", content: b"binary v1", conf: false },
            PayloadFile { path: "/etc/demo.conf", content: b"answer=42\n", conf: true },
        ],
        Some("case \"$1\" in post) touch hook-ran-$2 ;; esac"),
    );
    world.run(
        &[Request::new(RequestOp::Install, archive.to_str().unwrap())],
        CommitFlags::default(),
    );

    assert_eq!(std::fs::read(world.rooted("/usr/bin/demo")).unwrap(), b"binary v1");
    assert_eq!(std::fs::read(world.rooted("/etc/demo.conf")).unwrap(), b"answer=42\n");
    // The post hook ran with the rootdir as working directory.
    assert!(world.rooted("hook-ran-demo").exists());
    assert_eq!(world.db.records()["demo"].state, PkgState::Installed);

    // The pkgdb on disk agrees with the in-memory view.
    let reloaded = PkgDb::open_at(&world.config.pkgdb_path(), &world.config.rootdir).unwrap();
    assert_eq!(reloaded.records()["demo"].pkgver, "demo-1.0_1");
    assert_eq!(reloaded.records()["demo"].state, PkgState::Installed);
}

#[test]
fn update_prunes_obsoletes_and_respects_modified_configs() {
    let mut world = World::new();
    let v1 = build_pkg(
        &world.archive_dir(),
        "demo-1.0_1",
        &[
            PayloadFile { path: "/usr/bin/demo", content: b"binary v1", conf: false },
            PayloadFile { path: "/usr/bin/obsolete-tool", content: b"going away", conf: false },
            PayloadFile { path: "/etc/demo.conf", content: b"answer=42\n", conf: true },
        ],
        None,
    );
    world.run(&[Request::new(RequestOp::Install, v1.to_str().unwrap())], CommitFlags::default());

    // The operator edits the configuration file.
    std::fs::write(world.rooted("/etc/demo.conf"), b"answer=7\n").unwrap();

    let v2 = build_pkg(
        &world.archive_dir(),
        "demo-1.1_1",
        &[
            PayloadFile { path: "/usr/bin/demo", content: b"binary v2", conf: false },
            PayloadFile { path: "/etc/demo.conf", content: b"answer=43\n", conf: true },
        ],
        None,
    );
    world.run(&[Request::new(RequestOp::Install, v2.to_str().unwrap())], CommitFlags::default());

    // Obsolete file gone, binary replaced.
    assert!(!world.rooted("/usr/bin/obsolete-tool").exists());
    assert_eq!(std::fs::read(world.rooted("/usr/bin/demo")).unwrap(), b"binary v2");
    // The modified config was never overwritten; the new version sits
    // beside it under the .new-<version> convention.
    assert_eq!(std::fs::read(world.rooted("/etc/demo.conf")).unwrap(), b"answer=7\n");
    assert_eq!(std::fs::read(world.rooted("/etc/demo.conf.new-1.1_1")).unwrap(), b"answer=43\n");
    assert_eq!(world.db.records()["demo"].pkgver, "demo-1.1_1");
}

#[test]
fn unmodified_config_is_overwritten_on_update() {
    let mut world = World::new();
    let v1 = build_pkg(
        &world.archive_dir(),
        "demo-1.0_1",
        &[PayloadFile { path: "/etc/demo.conf", content: b"answer=42\n", conf: true }],
        None,
    );
    world.run(&[Request::new(RequestOp::Install, v1.to_str().unwrap())], CommitFlags::default());

    let v2 = build_pkg(
        &world.archive_dir(),
        "demo-1.1_1",
        &[PayloadFile { path: "/etc/demo.conf", content: b"answer=43\n", conf: true }],
        None,
    );
    world.run(&[Request::new(RequestOp::Install, v2.to_str().unwrap())], CommitFlags::default());

    assert_eq!(std::fs::read(world.rooted("/etc/demo.conf")).unwrap(), b"answer=43\n");
    assert!(!world.rooted("/etc/demo.conf.new-1.1_1").exists());
}

#[test]
fn failing_post_hook_leaves_package_broken() {
    let mut world = World::new();
    let archive = build_pkg(
        &world.archive_dir(),
        "demo-1.0_1",
        &[PayloadFile { path: "/usr/bin/demo", content: b"binary", conf: false }],
        Some("case \"$1\" in post) exit 9 ;; esac"),
    );
    let txn = plan(
        &[Request::new(RequestOp::Install, archive.to_str().unwrap())],
        &world.db,
        &world.pool,
        &world.config,
        &PlannerFlags::default(),
        &NoopSink,
    )
    .unwrap();
    let err = commit(&mut world.db, &world.config, &txn, &CommitFlags::default(), &NoopSink)
        .unwrap_err();
    assert!(matches!(err, valise_core::Error::HookFailed { .. }));

    // The files landed and the broken state was flushed.
    assert!(world.rooted("/usr/bin/demo").exists());
    let reloaded = PkgDb::open_at(&world.config.pkgdb_path(), &world.config.rootdir).unwrap();
    assert_eq!(reloaded.records()["demo"].state, PkgState::Broken);
}

#[test]
fn remove_keeps_modified_configs_until_purged() {
    let mut world = World::new();
    let archive = build_pkg(
        &world.archive_dir(),
        "demo-1.0_1",
        &[
            PayloadFile { path: "/usr/bin/demo", content: b"binary", conf: false },
            PayloadFile { path: "/etc/demo.conf", content: b"answer=42\n", conf: true },
        ],
        None,
    );
    world.run(
        &[Request::new(RequestOp::Install, archive.to_str().unwrap())],
        CommitFlags::default(),
    );
    std::fs::write(world.rooted("/etc/demo.conf"), b"answer=7\n").unwrap();

    world.run(&[Request::new(RequestOp::Remove, "demo")], CommitFlags::default());
    assert!(!world.rooted("/usr/bin/demo").exists());
    assert_eq!(std::fs::read(world.rooted("/etc/demo.conf")).unwrap(), b"answer=7\n");
    assert_eq!(world.db.records()["demo"].state, PkgState::ConfigFiles);

    // Purge with force drops the modified config and the record.
    valise_unpack::remove_package(
        &mut world.db,
        &world.config,
        "demo",
        true,
        true,
        &NoopSink,
    )
    .unwrap();
    assert!(!world.rooted("/etc/demo.conf").exists());
    assert!(world.db.records().get("demo").is_none());
}

#[test]
fn replanning_after_commit_is_empty() {
    let mut world = World::new();
    let archive = build_pkg(
        &world.archive_dir(),
        "demo-1.0_1",
        &[PayloadFile { path: "/usr/bin/demo", content: b"binary", conf: false }],
        None,
    );
    let request = [Request::new(RequestOp::Install, archive.to_str().unwrap())];
    world.run(&request, CommitFlags::default());

    let again = plan(
        &request,
        &world.db,
        &world.pool,
        &world.config,
        &PlannerFlags::default(),
        &NoopSink,
    )
    .unwrap();
    assert!(again.is_empty());
}
