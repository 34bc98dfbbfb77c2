//! End-to-end planner scenarios.

use pretty_assertions::assert_eq;
use valise_core::{Config, Error, NoopSink, PackageRecord, PkgState};
use valise_pkgdb::PkgDb;
use valise_repository::{Pool, Repository};
use valise_resolver::{plan, PlannerFlags, Request, RequestOp, TransactionAction};

fn record(pkgver: &str, depends: &[&str]) -> PackageRecord {
    let mut r = PackageRecord::from_pkgver(pkgver).unwrap();
    r.run_depends = depends.iter().map(ToString::to_string).collect();
    r
}

fn installed(pkgver: &str, depends: &[&str]) -> PackageRecord {
    let mut r = record(pkgver, depends);
    r.state = PkgState::Installed;
    r
}

struct Fixture {
    _dir: tempfile::TempDir,
    db: PkgDb,
    pool: Pool,
    config: Config,
}

impl Fixture {
    fn new(installed_pkgs: Vec<PackageRecord>, pool_pkgs: Vec<PackageRecord>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut db = PkgDb::open_at(&dir.path().join("pkgdb-0.38.plist"), dir.path()).unwrap();
        for pkg in installed_pkgs {
            db.put(pkg).unwrap();
        }
        let pool = Pool::from_repositories(
            "x86_64",
            vec![Repository::in_memory("file:/repo", pool_pkgs)],
        );
        Self { _dir: dir, db, pool, config: Config::default() }
    }

    fn plan(&self, requests: &[Request]) -> Result<valise_resolver::Transaction, Error> {
        plan(requests, &self.db, &self.pool, &self.config, &PlannerFlags::default(), &NoopSink)
    }
}

fn actions(txn: &valise_resolver::Transaction) -> Vec<(String, &'static str)> {
    txn.entries
        .iter()
        .map(|e| (e.record.pkgver.clone(), e.action.as_str()))
        .collect()
}

#[test]
fn trivial_install_plan_orders_dependency_first() {
    let fixture = Fixture::new(
        vec![],
        vec![record("A-1.0", &["B>=1.0"]), record("B-1.0", &[])],
    );
    let txn = fixture.plan(&[Request::new(RequestOp::Install, "A")]).unwrap();
    assert_eq!(
        actions(&txn),
        vec![("B-1.0".to_string(), "install"), ("A-1.0".to_string(), "install")]
    );
    // The dependency was pulled in automatically.
    assert!(txn.entries[0].automatic);
    assert!(!txn.entries[1].automatic);
}

#[test]
fn install_with_replace_removes_the_old_package() {
    let mut new = record("new-1.0", &[]);
    new.replaces = vec!["old>=0".into()];
    let fixture = Fixture::new(vec![installed("old-1.0", &[])], vec![new]);

    let txn = fixture.plan(&[Request::new(RequestOp::Install, "new")]).unwrap();
    assert_eq!(
        actions(&txn),
        vec![("old-1.0".to_string(), "remove"), ("new-1.0".to_string(), "install")]
    );
    assert_eq!(txn.entries[0].replaced_by.as_deref(), Some("new-1.0"));
}

#[test]
fn hold_blocks_update_through_dependency_closure() {
    let mut held = installed("A-1.0", &[]);
    held.hold = true;
    let fixture = Fixture::new(
        vec![held, installed("B-1.0", &[])],
        vec![record("A-1.1", &[]), record("B-1.1", &["A>=1.1"])],
    );
    let err = fixture.plan(&[Request::new(RequestOp::UpdateAll, "")]).unwrap_err();
    match err {
        Error::Held { pkgver } => assert_eq!(pkgver, "A-1.0"),
        other => panic!("expected Held, got {other:?}"),
    }
}

#[test]
fn explicit_request_overrides_hold() {
    let mut held = installed("A-1.0", &[]);
    held.hold = true;
    let fixture = Fixture::new(vec![held], vec![record("A-1.1", &[])]);
    let txn = fixture.plan(&[Request::new(RequestOp::Update, "A")]).unwrap();
    assert_eq!(actions(&txn), vec![("A-1.1".to_string(), "update")]);
    assert!(!txn.entries[0].record.hold);
}

#[test]
fn update_all_skips_held_packages_without_error() {
    let mut held = installed("A-1.0", &[]);
    held.hold = true;
    let fixture =
        Fixture::new(vec![held, installed("C-1.0", &[])], vec![record("A-1.1", &[]), record("C-1.1", &[])]);
    let txn = fixture.plan(&[Request::new(RequestOp::UpdateAll, "")]).unwrap();
    assert_eq!(actions(&txn), vec![("C-1.1".to_string(), "update")]);
}

#[test]
fn reverts_let_a_lower_version_supersede() {
    let mut candidate = record("pkg-1.9", &[]);
    candidate.reverts = vec!["2.0_1".into()];
    let fixture = Fixture::new(vec![installed("pkg-2.0_1", &[])], vec![candidate]);
    let txn = fixture.plan(&[Request::new(RequestOp::UpdateAll, "")]).unwrap();
    assert_eq!(actions(&txn), vec![("pkg-1.9".to_string(), "update")]);
}

#[test]
fn downgrade_without_reverts_is_rejected() {
    let fixture = Fixture::new(vec![installed("pkg-2.0_1", &[])], vec![record("pkg-1.9", &[])]);
    let err = fixture.plan(&[Request::new(RequestOp::Install, "pkg")]).unwrap_err();
    assert!(matches!(err, Error::VersionConflict { .. }));
}

#[test]
fn conflicts_are_hard_errors() {
    let mut newcomer = record("ntpd-1.0", &[]);
    newcomer.conflicts = vec!["chrony>=0".into()];
    let fixture = Fixture::new(vec![installed("chrony-4.3_1", &[])], vec![newcomer]);
    let err = fixture.plan(&[Request::new(RequestOp::Install, "ntpd")]).unwrap_err();
    match err {
        Error::Conflict { pkgver, conflicting } => {
            assert_eq!(pkgver, "ntpd-1.0");
            assert_eq!(conflicting, "chrony-4.3_1");
        }
        other => panic!("expected Conflict, got {other:?}"),
    }
}

#[test]
fn replace_wins_over_conflict_for_the_same_target() {
    let mut newcomer = record("ntpd-1.0", &[]);
    newcomer.conflicts = vec!["chrony>=0".into()];
    newcomer.replaces = vec!["chrony>=0".into()];
    let fixture = Fixture::new(vec![installed("chrony-4.3_1", &[])], vec![newcomer]);
    let txn = fixture.plan(&[Request::new(RequestOp::Install, "ntpd")]).unwrap();
    assert_eq!(
        actions(&txn),
        vec![("chrony-4.3_1".to_string(), "remove"), ("ntpd-1.0".to_string(), "install")]
    );
}

#[test]
fn virtual_provider_tiebreak_prefers_installed() {
    let mut gawk = record("gawk-5.0_1", &[]);
    gawk.provides = vec!["awk-0_1".into()];
    let mut busybox = record("busybox-1.36_1", &[]);
    busybox.provides = vec!["awk-0_1".into()];
    let fixture = Fixture::new(
        vec![installed("busybox-1.36_1", &[])],
        vec![gawk, busybox, record("consumer-1.0", &["awk>=0"])],
    );
    // busybox is installed, so the dependency is already satisfied and
    // nothing else is pulled in.
    let txn = fixture.plan(&[Request::new(RequestOp::Install, "consumer")]).unwrap();
    assert_eq!(actions(&txn), vec![("consumer-1.0".to_string(), "install")]);
}

#[test]
fn missing_dependency_is_a_hard_error() {
    let fixture = Fixture::new(vec![], vec![record("A-1.0", &["nosuchpkg>=1.0"])]);
    let err = fixture.plan(&[Request::new(RequestOp::Install, "A")]).unwrap_err();
    match err {
        Error::DependencyUnsatisfied { pkgver, pattern } => {
            assert_eq!(pkgver, "A-1.0");
            assert_eq!(pattern, "nosuchpkg>=1.0");
        }
        other => panic!("expected DependencyUnsatisfied, got {other:?}"),
    }
}

#[test]
fn remove_with_dependents_requires_force() {
    let fixture = Fixture::new(
        vec![installed("libfoo-1.0_1", &[]), installed("app-1.0_1", &["libfoo>=1.0"])],
        vec![],
    );
    let err = fixture.plan(&[Request::new(RequestOp::Remove, "libfoo")]).unwrap_err();
    assert!(matches!(err, Error::DependencyUnsatisfied { .. }));

    let flags = PlannerFlags { force: true, ..PlannerFlags::default() };
    let txn = plan(
        &[Request::new(RequestOp::Remove, "libfoo")],
        &fixture.db,
        &fixture.pool,
        &fixture.config,
        &flags,
        &NoopSink,
    )
    .unwrap();
    assert_eq!(actions(&txn), vec![("libfoo-1.0_1".to_string(), "remove")]);
}

#[test]
fn planning_never_mutates_the_database() {
    let fixture = Fixture::new(
        vec![installed("app-1.0_1", &[])],
        vec![record("app-1.1_1", &[]), record("extra-1.0_1", &[])],
    );
    let before = fixture.db.to_value();
    fixture.plan(&[Request::new(RequestOp::UpdateAll, "")]).unwrap();
    fixture.plan(&[Request::new(RequestOp::Install, "extra")]).unwrap();
    assert_eq!(fixture.db.to_value(), before);
}

#[test]
fn installing_an_installed_package_is_a_noop() {
    let fixture = Fixture::new(vec![installed("app-1.0_1", &[])], vec![record("app-1.0_1", &[])]);
    let txn = fixture.plan(&[Request::new(RequestOp::Install, "app")]).unwrap();
    assert!(txn.is_empty());
}

#[test]
fn hold_request_emits_hold_entry() {
    let fixture = Fixture::new(vec![installed("app-1.0_1", &[])], vec![]);
    let txn = fixture.plan(&[Request::new(RequestOp::Hold, "app")]).unwrap();
    assert_eq!(txn.entries.len(), 1);
    assert_eq!(txn.entries[0].action, TransactionAction::Hold);
    assert!(txn.entries[0].record.hold);
}

#[test]
fn strict_shlib_mode_fails_on_unresolved_soname() {
    let mut app = record("app-1.0_1", &[]);
    app.shlib_requires = vec!["libmissing.so.1".into()];
    let fixture = Fixture::new(vec![], vec![app]);
    let flags = PlannerFlags { strict_shlibs: true, ..PlannerFlags::default() };
    let err = plan(
        &[Request::new(RequestOp::Install, "app")],
        &fixture.db,
        &fixture.pool,
        &fixture.config,
        &flags,
        &NoopSink,
    )
    .unwrap_err();
    assert!(matches!(err, Error::DependencyUnsatisfied { .. }));

    // Non-strict mode only warns.
    fixture.plan(&[Request::new(RequestOp::Install, "app")]).unwrap();
}

#[test]
fn transaction_sizes_are_computed() {
    let mut a = record("A-1.0", &["B>=1.0"]);
    a.installed_size = 1000;
    a.filename_size = 400;
    let mut b = record("B-1.0", &[]);
    b.installed_size = 500;
    b.filename_size = 200;
    let fixture = Fixture::new(vec![], vec![a, b]);
    let txn = fixture.plan(&[Request::new(RequestOp::Install, "A")]).unwrap();
    assert_eq!(txn.total_installed_size, 1500);
    assert_eq!(txn.total_download_size, 600);
}
