use super::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use ed25519_dalek::{Signer, SigningKey};
use pkgflow_core::{
    DeltaManifest, ErrorCode, InstallMode, InstallOrigin, InstallationKind, StorageLocation,
    TrustTier,
};
use pkgflow_security::{content_digest, SignatureDocument, TrustStore, AUTHOR_SIGNATURE_FILE};
use semver::Version;

use crate::database::{write_plugin_record, write_record};

static TEST_LAYOUT_COUNTER: AtomicU64 = AtomicU64::new(0);

const AUTHOR_SEED: [u8; 32] = [7; 32];
const PARTNER_SEED: [u8; 32] = [11; 32];
const PLATFORM_SEED: [u8; 32] = [13; 32];

const APP_ID: &str = "org.example.notes";

fn test_layout() -> DeviceLayout {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!(
        "pkgflow-installer-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        TEST_LAYOUT_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    DeviceLayout::new(path)
}

fn public_key_hex(seed: [u8; 32]) -> String {
    hex::encode(SigningKey::from_bytes(&seed).verifying_key().to_bytes())
}

fn trust_store() -> TrustStore {
    TrustStore::new()
        .with_root(&public_key_hex(PARTNER_SEED), TrustTier::Partner)
        .with_root(&public_key_hex(PLATFORM_SEED), TrustTier::Platform)
}

fn write_file(dir: &Path, rel: &str, contents: &[u8]) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent");
    }
    fs::write(path, contents).expect("must write file");
}

fn write_descriptor(dir: &Path, id: &str, version: &str, extra: &str) {
    let descriptor = format!(
        "id = \"{id}\"\nname = \"Notes\"\nversion = \"{version}\"\nstart_file = \"index.html\"\nicon = \"icon.png\"\n{extra}"
    );
    write_file(dir, "config.toml", descriptor.as_bytes());
}

fn sign_package(dir: &Path, signers: &[(&str, [u8; 32])]) {
    let payload = content_digest(dir).expect("digest must compute");
    for (file_name, seed) in signers {
        let key = SigningKey::from_bytes(seed);
        let document = SignatureDocument {
            public_key: hex::encode(key.verifying_key().to_bytes()),
            signature: hex::encode(key.sign(&payload).to_bytes()),
        };
        write_file(
            dir,
            file_name,
            document.to_toml_string().expect("must serialize").as_bytes(),
        );
    }
}

fn partner_signed(dir: &Path) {
    sign_package(
        dir,
        &[(AUTHOR_SIGNATURE_FILE, AUTHOR_SEED), ("signature1.toml", PARTNER_SEED)],
    );
}

fn tree_listing(root: &Path) -> Vec<(String, Vec<u8>)> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) {
        for entry in fs::read_dir(dir).expect("must read dir") {
            let path = entry.expect("dir entry").path();
            let rel = path
                .strip_prefix(base)
                .expect("under base")
                .to_string_lossy()
                .replace('\\', "/");
            if path.is_dir() {
                out.push((format!("{rel}/"), Vec::new()));
                walk(base, &path, out);
            } else {
                out.push((rel, fs::read(&path).expect("must read file")));
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

#[derive(Clone, Default)]
struct RecordingExternal {
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingExternal {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, call: String) -> anyhow::Result<()> {
        self.calls.lock().expect("calls lock").push(call);
        Ok(())
    }
}

impl ExternalStorage for RecordingExternal {
    fn pre_install(&self, package_id: &str, _size_bytes: u64) -> anyhow::Result<()> {
        self.record(format!("pre_install {package_id}"))
    }

    fn post_install(&self, package_id: &str, success: bool) -> anyhow::Result<()> {
        self.record(format!("post_install {package_id} {success}"))
    }

    fn disable(&self, package_id: &str) -> anyhow::Result<()> {
        self.record(format!("disable {package_id}"))
    }

    fn enable(&self, package_id: &str) -> anyhow::Result<()> {
        self.record(format!("enable {package_id}"))
    }

    fn remove(&self, package_id: &str) -> anyhow::Result<()> {
        self.record(format!("remove {package_id}"))
    }
}

struct BusyRuntime;

impl AppRuntime for BusyRuntime {
    fn terminate(&self, package_id: &str) -> anyhow::Result<()> {
        Err(anyhow!("{package_id} refused to stop"))
    }
}

#[derive(Clone, Default)]
struct RecordingObserver {
    events: Arc<Mutex<Vec<(f32, String)>>>,
    finished: Arc<Mutex<Vec<(String, ErrorCode)>>>,
}

impl JobObserver for RecordingObserver {
    fn progress(&mut self, percent: f32, description: &str) {
        self.events
            .lock()
            .expect("events lock")
            .push((percent, description.to_string()));
    }

    fn finished(&mut self, id: &str, status: ErrorCode) {
        self.finished
            .lock()
            .expect("finished lock")
            .push((id.to_string(), status));
    }
}

struct Fixture {
    layout: DeviceLayout,
    installer: Installer,
    signals: Arc<MemorySignalSink>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_services(|services| services)
    }

    fn with_services(configure: impl FnOnce(Services) -> Services) -> Self {
        let layout = test_layout();
        let signals = Arc::new(MemorySignalSink::new());
        let services = configure(Services::new(trust_store()).with_signals(signals.clone()));
        let installer = Installer::new(layout.clone(), services);
        Self {
            layout,
            installer,
            signals,
        }
    }

    fn source(&self, label: &str) -> PathBuf {
        let dir = self.layout.prefix().join("sources").join(label);
        fs::create_dir_all(&dir).expect("must create source dir");
        dir
    }

    /// A partner-signed package with `index.html`, `icon.png` and any extra
    /// files.
    fn package(&self, label: &str, version: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let dir = self.source(label);
        write_descriptor(&dir, APP_ID, version, "");
        write_file(&dir, "index.html", format!("v{version}").as_bytes());
        write_file(&dir, "icon.png", b"icon-v1");
        for (rel, contents) in files {
            write_file(&dir, rel, contents);
        }
        partner_signed(&dir);
        dir
    }

    fn run(&self, job: Box<dyn RunnableJob>) -> JobReport {
        let mut runner = self.installer.runner(NoopObserver);
        runner.submit(job).expect("runner must be idle");
        runner.run_until_idle();
        let mut reports = runner.take_reports();
        assert_eq!(reports.len(), 1, "expected exactly one finished job");
        reports.remove(0)
    }

    fn install(&self, source: &Path) -> JobReport {
        self.run(self.installer.install_job(InstallRequest::new(source)))
    }

    fn paths(&self) -> PackagePaths {
        self.layout.package_paths(APP_ID, StorageLocation::Internal)
    }

    fn record(&self) -> Option<PackageRecord> {
        read_record(&self.layout, APP_ID).expect("must read record")
    }

    fn signal_lines(&self) -> Vec<String> {
        self.signals.lines()
    }

    fn tmp_entries(&self) -> usize {
        fs::read_dir(self.layout.tmp_state_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(self.layout.prefix());
    }
}

fn signal(line: &str) -> String {
    format!("{APP_ID} {line}")
}

#[test]
fn install_lays_out_package_and_records_it() {
    let fx = Fixture::new();
    let source = fx.package("v1", "1.0.0", &[("res/app.js", b"run()")]);

    let report = fx.install(&source);
    assert_eq!(report.status, ErrorCode::Success, "{:?}", report.message);
    assert_eq!(report.kind, InstallationKind::Install);
    assert_eq!(report.subject, APP_ID);

    let paths = fx.paths();
    assert_eq!(
        fs::read_to_string(paths.src_dir().join("index.html")).expect("start file"),
        "v1.0.0"
    );
    assert!(paths.src_dir().join("res/app.js").is_file());
    assert!(paths.data_dir().is_dir());
    assert!(paths.shared_res_dir().is_dir());
    let launcher = fs::read_to_string(paths.launcher_path(APP_ID)).expect("launcher");
    assert!(launcher.contains("index.html"));

    let record = fx.record().expect("record must exist");
    assert_eq!(record.version, Version::new(1, 0, 0));
    assert_eq!(record.tier, TrustTier::Partner);
    assert_eq!(record.root, paths.root());
    assert_eq!(record.certificates.len(), 2);
    assert!(record.certificates.iter().any(|cert| cert.is_author));

    let manifest = read_manifest(&fx.layout, APP_ID)
        .expect("must read manifest")
        .expect("manifest must exist");
    assert_eq!(manifest.version, "1.0.0");
    assert_eq!(manifest.exec, paths.launcher_path(APP_ID));
    assert_eq!(fx.tmp_entries(), 0);
    assert!(fx.installer.pending_recoveries().expect("scan").is_empty());
}

#[test]
fn install_emits_one_start_deduplicated_percent_and_one_end() {
    let fx = Fixture::new();
    let source = fx.package("v1", "1.0.0", &[]);
    fx.install(&source);

    let icon = fx.paths().src_dir().join("icon.png");
    let expected = vec![
        signal("start=install"),
        signal("install_percent=20"),
        signal("install_percent=35"),
        signal("install_percent=45"),
        signal("install_percent=60"),
        signal(&format!("icon_path={}", icon.display())),
        signal("install_percent=70"),
        signal("install_percent=80"),
        signal("install_percent=90"),
        signal("install_percent=95"),
        signal("install_percent=100"),
        signal("end=ok"),
    ];
    assert_eq!(fx.signal_lines(), expected);
}

#[test]
fn observer_sees_monotonic_progress_and_one_finish() {
    let fx = Fixture::new();
    let source = fx.package("v1", "1.0.0", &[]);
    let observer = RecordingObserver::default();
    let mut runner = fx.installer.runner(observer.clone());
    runner
        .submit(fx.installer.install_job(InstallRequest::new(&source)))
        .expect("idle runner");
    runner.run_until_idle();

    let events = observer.events.lock().expect("events lock").clone();
    assert!(!events.is_empty());
    assert!(events.windows(2).all(|pair| pair[0].0 < pair[1].0));
    assert_eq!(events.last().map(|event| event.0), Some(100.0));
    assert_eq!(
        observer.finished.lock().expect("finished lock").clone(),
        vec![(APP_ID.to_string(), ErrorCode::Success)]
    );
}

#[test]
fn update_keeps_user_data_and_clears_backup_marker() {
    let fx = Fixture::new();
    fx.install(&fx.package("v1", "1.0.0", &[]));
    let paths = fx.paths();
    write_file(&paths.data_dir(), "notes.txt", b"remember the milk");

    let report = fx.install(&fx.package("v2", "1.1.0", &[]));
    assert_eq!(report.status, ErrorCode::Success, "{:?}", report.message);

    assert_eq!(fx.record().expect("record").version, Version::new(1, 1, 0));
    assert_eq!(
        fs::read_to_string(paths.src_dir().join("index.html")).expect("start file"),
        "v1.1.0"
    );
    assert_eq!(
        fs::read(paths.data_dir().join("notes.txt")).expect("user data"),
        b"remember the milk"
    );
    assert!(!paths.backup_root().exists());
    assert!(read_record(&fx.layout, &backup_id(APP_ID))
        .expect("read backup row")
        .is_none());
    assert!(fx.signal_lines().contains(&signal("start=update")));
    assert_eq!(fx.tmp_entries(), 0);
}

#[test]
fn update_failing_at_database_write_restores_previous_installation() {
    let fx = Fixture::new();
    fx.install(&fx.package("v1", "1.0.0", &[]));
    let paths = fx.paths();
    write_file(&paths.data_dir(), "notes.txt", b"keep me");
    let before = tree_listing(paths.root());
    let record_before = fx.record().expect("record");

    // A directory where the atomic writer stages the record makes the write
    // fail regardless of file permissions.
    let blocker = PathBuf::from(format!("{}.tmp", fx.layout.record_path(APP_ID).display()));
    fs::create_dir_all(&blocker).expect("must create blocker");

    let report = fx.install(&fx.package("v2", "2.0.0", &[]));
    assert_eq!(report.status, ErrorCode::FatalError);

    assert_eq!(tree_listing(paths.root()), before);
    assert!(!paths.backup_root().exists());
    assert_eq!(fx.record().expect("record"), record_before);
    assert!(read_record(&fx.layout, &backup_id(APP_ID))
        .expect("read backup row")
        .is_none());
    let manifest = read_manifest(&fx.layout, APP_ID)
        .expect("read manifest")
        .expect("manifest");
    assert_eq!(manifest.version, "1.0.0");

    let lines = fx.signal_lines();
    let tail: Vec<String> = lines.iter().rev().take(2).rev().cloned().collect();
    assert_eq!(tail, vec![signal("error=61"), signal("end=fail")]);
    assert_eq!(
        lines.iter().filter(|line| **line == signal("start=update")).count(),
        1
    );
    assert_eq!(fx.tmp_entries(), 0);
}

#[test]
fn lower_version_is_rejected_without_touching_installation() {
    let fx = Fixture::new();
    fx.install(&fx.package("v2", "2.0.0", &[]));
    let before = tree_listing(fx.paths().root());

    let report = fx.install(&fx.package("v1", "1.0.0", &[]));
    assert_eq!(report.status, ErrorCode::PackageLowerVersion);
    assert_eq!(tree_listing(fx.paths().root()), before);
    assert_eq!(fx.record().expect("record").version, Version::new(2, 0, 0));
}

#[test]
fn app_control_declaration_needs_platform_tier() {
    let fx = Fixture::new();
    let dir = fx.source("controls");
    write_descriptor(
        &dir,
        APP_ID,
        "1.0.0",
        "app_controls = [{ operation = \"view\", src = \"index.html\" }]\n",
    );
    write_file(&dir, "index.html", b"hello");
    partner_signed(&dir);

    let report = fx.install(&dir);
    assert_eq!(report.status, ErrorCode::PrivilegeLevelViolation);
    assert!(!fx.paths().root().exists());
    assert!(fx.record().is_none());
    assert!(fx.signal_lines().contains(&signal("error=42")));
}

#[test]
fn platform_signed_package_may_declare_app_controls() {
    let fx = Fixture::new();
    let dir = fx.source("platform");
    write_descriptor(
        &dir,
        APP_ID,
        "1.0.0",
        "app_controls = [{ operation = \"view\", src = \"index.html\" }]\n",
    );
    write_file(&dir, "index.html", b"hello");
    sign_package(
        &dir,
        &[
            (AUTHOR_SIGNATURE_FILE, AUTHOR_SEED),
            ("signature1.toml", PARTNER_SEED),
            ("signature2.toml", PLATFORM_SEED),
        ],
    );

    let report = fx.install(&dir);
    assert_eq!(report.status, ErrorCode::Success, "{:?}", report.message);
    assert_eq!(fx.record().expect("record").tier, TrustTier::Platform);
}

#[test]
fn unsigned_package_is_rejected() {
    let fx = Fixture::new();
    let dir = fx.source("unsigned");
    write_descriptor(&dir, APP_ID, "1.0.0", "");
    write_file(&dir, "index.html", b"hello");

    let report = fx.install(&dir);
    assert_eq!(report.status, ErrorCode::SignatureNotFound);
    assert!(fx.record().is_none());
    assert_eq!(fx.tmp_entries(), 0);
}

#[test]
fn preload_install_accepts_untrusted_signature() {
    let fx = Fixture::with_services(|services| Services {
        verifier: Box::new(TrustStore::new()),
        ..services
    });
    let source = fx.package("preload", "1.0.0", &[]);

    let normal = fx.install(&source);
    assert_eq!(normal.status, ErrorCode::SignatureInvalid);

    let request = InstallRequest::new(&source)
        .with_mode(InstallMode::default().with_origin(InstallOrigin::Preload));
    let preload = fx.run(fx.installer.install_job(request));
    assert_eq!(preload.status, ErrorCode::Success, "{:?}", preload.message);
}

#[test]
fn missing_source_fails_with_lazy_start_signal() {
    let fx = Fixture::new();
    let missing = fx.layout.prefix().join("nowhere.wgt");

    let report = fx.install(&missing);
    assert_eq!(report.status, ErrorCode::PackageNotFound);
    assert_eq!(
        fx.signal_lines(),
        vec![
            "nowhere start=install".to_string(),
            "nowhere error=1".to_string(),
            "nowhere end=fail".to_string(),
        ]
    );
}

#[test]
fn expected_id_mismatch_is_an_invalid_argument() {
    let fx = Fixture::new();
    let source = fx.package("v1", "1.0.0", &[]);
    let request = InstallRequest::new(&source).with_expected_id("org.example.other");

    let report = fx.run(fx.installer.install_job(request));
    assert_eq!(report.status, ErrorCode::ArgumentInvalid);
}

#[test]
fn storage_quota_rejects_large_package() {
    let fx = Fixture::with_services(|services| services.with_storage_quota(Some(16)));
    let source = fx.package("big", "1.0.0", &[("res/blob.bin", &[0u8; 64])]);

    let report = fx.install(&source);
    assert_eq!(report.status, ErrorCode::OutOfStorage);
    assert!(!fx.paths().root().exists());
}

#[test]
fn external_install_and_update_drive_external_storage() {
    let external = RecordingExternal::default();
    let fx = Fixture::with_services({
        let external = external.clone();
        move |services| services.with_external(external)
    });
    let mode = InstallMode::default().external();

    let first = fx.run(
        fx.installer
            .install_job(InstallRequest::new(fx.package("v1", "1.0.0", &[])).with_mode(mode)),
    );
    assert_eq!(first.status, ErrorCode::Success, "{:?}", first.message);
    let record = fx.record().expect("record");
    assert_eq!(record.location, StorageLocation::External);
    assert!(record.root.starts_with(fx.layout.external_apps_dir()));

    let second = fx.run(
        fx.installer
            .install_job(InstallRequest::new(fx.package("v2", "1.1.0", &[])).with_mode(mode)),
    );
    assert_eq!(second.status, ErrorCode::Success, "{:?}", second.message);

    assert_eq!(
        external.calls(),
        vec![
            format!("pre_install {APP_ID}"),
            format!("post_install {APP_ID} true"),
            format!("pre_install {APP_ID}"),
            format!("disable {APP_ID}"),
            format!("enable {APP_ID}"),
            format!("post_install {APP_ID} true"),
        ]
    );
}

#[test]
fn installing_to_other_storage_than_installed_is_rejected() {
    let fx = Fixture::new();
    fx.install(&fx.package("v1", "1.0.0", &[]));

    let request = InstallRequest::new(fx.package("v2", "1.1.0", &[]))
        .with_mode(InstallMode::default().external());
    let report = fx.run(fx.installer.install_job(request));
    assert_eq!(report.status, ErrorCode::PackageAlreadyInstalled);
}

#[test]
fn second_job_is_rejected_while_one_is_in_flight() {
    let fx = Fixture::new();
    let source = fx.package("v1", "1.0.0", &[]);
    let mut runner = fx.installer.runner(NoopObserver);

    let handle = runner
        .submit(fx.installer.install_job(InstallRequest::new(&source)))
        .expect("idle runner");
    assert!(runner.run_once());
    assert!(runner.run_once());

    let rejected = runner.submit(fx.installer.uninstall_job(APP_ID));
    assert_eq!(rejected, Err(Busy(handle)));
    assert_eq!(runner.registry().active_handle(), Some(handle));

    runner.run_until_idle();
    let reports = runner.take_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].handle, handle);
    assert_eq!(reports[0].status, ErrorCode::Success);
    assert!(fx.record().is_some());
}

#[test]
fn paused_job_resumes_where_it_stopped() {
    let fx = Fixture::new();
    let source = fx.package("v1", "1.0.0", &[]);
    let mut runner = fx.installer.runner(NoopObserver);
    let handle = runner
        .submit(fx.installer.install_job(InstallRequest::new(&source)))
        .expect("idle runner");

    for _ in 0..3 {
        assert!(runner.run_once());
    }
    assert!(runner.pause(handle));
    runner.run_until_idle();
    assert!(!runner.is_idle());
    assert_eq!(
        runner.registry().get(handle).map(|job| job.state()),
        Some(JobState::Paused(3))
    );
    assert!(fx.record().is_none());

    assert!(runner.resume(handle));
    runner.run_until_idle();
    assert!(runner.is_idle());
    let reports = runner.take_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, ErrorCode::Success);
}

fn delta_package(fx: &Fixture, label: &str, version: &str, delta: &str) -> PathBuf {
    let dir = fx.source(label);
    write_descriptor(&dir, APP_ID, version, "");
    write_file(&dir, ".rds_delta", delta.as_bytes());
    dir
}

#[test]
fn rds_delta_adds_deletes_and_modifies_files() {
    let fx = Fixture::new();
    fx.install(&fx.package(
        "v1",
        "1.0.0",
        &[("data/old.txt", b"old"), ("res/icon.png", b"old-icon")],
    ));

    let dir = delta_package(
        &fx,
        "delta",
        "1.0.1",
        "#add\ndata/new.txt\n#delete\ndata/old.txt\n#modify\nres/icon.png\n",
    );
    write_file(&dir, "data/new.txt", b"new");
    write_file(&dir, "res/icon.png", b"new-icon");
    partner_signed(&dir);

    let report = fx.run(fx.installer.rds_update_job(&dir, APP_ID, InstallMode::default()));
    assert_eq!(report.status, ErrorCode::Success, "{:?}", report.message);

    let src = fx.paths().src_dir();
    assert_eq!(fs::read(src.join("data/new.txt")).expect("added"), b"new");
    assert!(!src.join("data/old.txt").exists());
    assert_eq!(fs::read(src.join("res/icon.png")).expect("modified"), b"new-icon");
    assert_eq!(
        fs::read_to_string(src.join("index.html")).expect("untouched"),
        "v1.0.0"
    );
    assert!(fs::read_to_string(src.join("config.toml"))
        .expect("descriptor")
        .contains("1.0.1"));
    assert_eq!(fx.record().expect("record").version, Version::new(1, 0, 1));
    assert!(!fx.paths().backup_root().exists());
    assert!(fx.signal_lines().contains(&signal("start=update")));
    assert_eq!(fx.signal_lines().last(), Some(&signal("end=ok")));
}

#[test]
fn rds_delta_verification_failure_changes_nothing() {
    let fx = Fixture::new();
    fx.install(&fx.package("v1", "1.0.0", &[("data/old.txt", b"old")]));
    let before = tree_listing(fx.paths().root());
    let record_before = fx.record().expect("record");

    let dir = delta_package(
        &fx,
        "delta",
        "1.0.1",
        "#add\ndata/new.txt\n#delete\ndata/missing.txt\n",
    );
    write_file(&dir, "data/new.txt", b"new");
    partner_signed(&dir);

    let report = fx.run(fx.installer.rds_update_job(&dir, APP_ID, InstallMode::default()));
    assert_eq!(report.status, ErrorCode::RdsDeltaFailure);
    assert_eq!(tree_listing(fx.paths().root()), before);
    assert_eq!(fx.record().expect("record"), record_before);
    assert!(!fx.paths().backup_root().exists());
}

#[test]
fn rds_update_needs_installed_package() {
    let fx = Fixture::new();
    let dir = delta_package(&fx, "delta", "1.0.1", "#add\n");
    partner_signed(&dir);

    let report = fx.run(fx.installer.rds_update_job(&dir, APP_ID, InstallMode::default()));
    assert_eq!(report.status, ErrorCode::RdsDeltaFailure);
    assert!(fx.signal_lines().contains(&signal("start=update")));
}

#[test]
fn delta_patcher_verifies_every_entry_before_mutating() {
    let fx = Fixture::new();
    let installed = fx.source("installed");
    let staged = fx.source("staged");
    write_file(&installed, "keep.txt", b"keep");
    write_file(&installed, "gone.txt", b"gone");
    write_file(&staged, "added.txt", b"added");

    let manifest = DeltaManifest {
        add: vec!["added.txt".to_string()],
        delete: vec!["gone.txt".to_string()],
        modify: vec!["not-staged.txt".to_string()],
    };
    let before = tree_listing(&installed);
    let patcher = DeltaPatcher::new(&staged, &installed, manifest);
    let err = patcher
        .apply(&NoopLabelManager, APP_ID, &installed.join("shared"))
        .expect_err("verification must fail");

    assert_eq!(err.code(), ErrorCode::RdsDeltaFailure);
    assert_eq!(tree_listing(&installed), before);
    assert!(staged.join("added.txt").is_file());
}

#[test]
fn delta_patcher_refuses_to_modify_directories() {
    let fx = Fixture::new();
    let installed = fx.source("installed");
    let staged = fx.source("staged");
    write_file(&installed, "res/keep.png", b"keep");
    write_file(&installed, "data.txt", b"old");
    write_file(&staged, "res/other.png", b"other");
    write_file(&staged, "data.txt/inner.txt", b"inner");

    let before = tree_listing(&installed);
    for entry in ["res", "data.txt"] {
        let manifest = DeltaManifest {
            modify: vec![entry.to_string()],
            ..DeltaManifest::default()
        };
        let patcher = DeltaPatcher::new(&staged, &installed, manifest);
        let err = patcher
            .apply(&NoopLabelManager, APP_ID, &installed.join("shared"))
            .expect_err("directory modify must fail");
        assert_eq!(err.code(), ErrorCode::RdsDeltaFailure);
        assert_eq!(tree_listing(&installed), before);
    }
}

#[test]
fn delta_patcher_rejects_escaping_paths() {
    let fx = Fixture::new();
    let installed = fx.source("installed");
    let staged = fx.source("staged");
    let manifest = DeltaManifest {
        delete: vec!["../outside".to_string()],
        ..DeltaManifest::default()
    };
    let patcher = DeltaPatcher::new(&staged, &installed, manifest);
    assert_eq!(
        patcher.verify().map_err(|err| err.code()),
        Err(ErrorCode::RdsDeltaFailure)
    );
}

#[test]
fn uninstall_removes_files_record_and_manifest() {
    let fx = Fixture::new();
    fx.install(&fx.package("v1", "1.0.0", &[]));

    let report = fx.run(fx.installer.uninstall_job(APP_ID));
    assert_eq!(report.status, ErrorCode::Success, "{:?}", report.message);
    assert!(!fx.paths().root().exists());
    assert!(fx.record().is_none());
    assert!(read_manifest(&fx.layout, APP_ID).expect("read").is_none());

    let lines: Vec<String> = fx
        .signal_lines()
        .into_iter()
        .skip_while(|line| *line != signal("start=uninstall"))
        .collect();
    assert_eq!(lines.first(), Some(&signal("start=uninstall")));
    assert_eq!(lines.last(), Some(&signal("end=ok")));
    assert_eq!(lines.iter().filter(|line| line.contains(" end=")).count(), 1);
}

#[test]
fn uninstall_of_unknown_package_reports_not_found() {
    let fx = Fixture::new();
    let report = fx.run(fx.installer.uninstall_job(APP_ID));
    assert_eq!(report.status, ErrorCode::PackageNotFound);
    assert_eq!(
        fx.signal_lines(),
        vec![
            signal("start=uninstall"),
            signal("error=1"),
            signal("end=fail")
        ]
    );
}

#[test]
fn uninstall_cleans_record_when_files_were_removed_abnormally() {
    let fx = Fixture::new();
    fx.install(&fx.package("v1", "1.0.0", &[]));
    fs::remove_dir_all(fx.paths().root()).expect("must remove files");

    let report = fx.run(fx.installer.uninstall_job(APP_ID));
    assert_eq!(report.status, ErrorCode::Success, "{:?}", report.message);
    assert!(fx.record().is_none());
}

#[test]
fn uninstall_removes_orphaned_files_without_record() {
    let fx = Fixture::new();
    write_file(&fx.paths().src_dir(), "index.html", b"orphan");

    let report = fx.run(fx.installer.uninstall_job(APP_ID));
    assert_eq!(report.status, ErrorCode::Success, "{:?}", report.message);
    assert!(!fx.paths().root().exists());
}

#[test]
fn uninstall_rejects_ids_that_are_not_path_safe() {
    let fx = Fixture::new();
    fx.install(&fx.package("v1", "1.0.0", &[]));
    let before = tree_listing(&fx.layout.apps_dir());

    for id in ["", "..", "a/b", "org.example.notes.backup"] {
        let report = fx.run(fx.installer.uninstall_job(id));
        assert_eq!(report.status, ErrorCode::ArgumentInvalid, "id {id:?}");
        assert_eq!(
            fx.signal_lines().last().map(|line| line.ends_with("end=fail")),
            Some(true)
        );
    }

    assert_eq!(tree_listing(&fx.layout.apps_dir()), before);
    assert!(fx.paths().src_dir().join("index.html").is_file());
    assert!(fx.record().is_some());
}

#[test]
fn uninstall_fails_when_application_cannot_be_stopped() {
    let fx = Fixture::with_services(|services| services.with_runtime(BusyRuntime));
    fx.install(&fx.package("v1", "1.0.0", &[]));

    let report = fx.run(fx.installer.uninstall_job(APP_ID));
    assert_eq!(report.status, ErrorCode::UninstallationFailed);
    assert!(fx.paths().src_dir().join("index.html").is_file());
    assert!(fx.record().is_some());
}

#[test]
fn interrupted_update_blocks_new_jobs_until_recovered() {
    let fx = Fixture::new();
    fx.install(&fx.package("v1", "1.0.0", &[]));
    fs::create_dir_all(fx.paths().backup_root()).expect("must create marker");

    let install = fx.install(&fx.package("v2", "1.1.0", &[]));
    assert_eq!(install.status, ErrorCode::FatalError);
    let uninstall = fx.run(fx.installer.uninstall_job(APP_ID));
    assert_eq!(uninstall.status, ErrorCode::FatalError);
    assert_eq!(
        fx.installer.pending_recoveries().expect("scan"),
        vec![APP_ID.to_string()]
    );
}

#[test]
fn recovery_restores_update_interrupted_after_database_write() {
    let fx = Fixture::new();
    fx.install(&fx.package("v1", "1.0.0", &[]));
    let paths = fx.paths();
    let before = tree_listing(paths.root());
    let previous = fx.record().expect("record");

    begin_backup(&paths).expect("must move root aside");
    write_file(&paths.src_dir(), "index.html", b"half-written");
    write_record(&fx.layout, &backup_id(APP_ID), &previous).expect("must write backup row");
    let mut updated = previous.clone();
    updated.version = Version::new(2, 0, 0);
    write_record(&fx.layout, APP_ID, &updated).expect("must write new record");
    assert_eq!(
        fx.installer.pending_recoveries().expect("scan"),
        vec![APP_ID.to_string()]
    );

    let report = fx.run(fx.installer.recovery_job(APP_ID));
    assert_eq!(report.status, ErrorCode::Success, "{:?}", report.message);

    assert_eq!(tree_listing(paths.root()), before);
    let record = fx.record().expect("record");
    assert_eq!(record.version, Version::new(1, 0, 0));
    assert_eq!(record.tier, TrustTier::Partner);
    assert!(!paths.backup_root().exists());
    assert!(fx.installer.pending_recoveries().expect("scan").is_empty());
}

#[test]
fn recovery_with_only_backup_row_keeps_committed_update() {
    let fx = Fixture::new();
    fx.install(&fx.package("v1", "1.0.0", &[]));
    let current = fx.record().expect("record");
    let mut stale = current.clone();
    stale.version = Version::new(0, 9, 0);
    write_record(&fx.layout, &backup_id(APP_ID), &stale).expect("must write backup row");

    let report = fx.run(fx.installer.recovery_job(APP_ID));
    assert_eq!(report.status, ErrorCode::Success, "{:?}", report.message);
    assert_eq!(fx.record().expect("record").version, Version::new(1, 0, 0));
    assert!(read_record(&fx.layout, &backup_id(APP_ID))
        .expect("read backup row")
        .is_none());
}

#[test]
fn recovery_without_marker_reports_not_found() {
    let fx = Fixture::new();
    let report = fx.run(fx.installer.recovery_job(APP_ID));
    assert_eq!(report.status, ErrorCode::PackageNotFound);
}

#[test]
fn recovery_and_delta_reject_ids_that_are_not_path_safe() {
    let fx = Fixture::new();
    fx.install(&fx.package("v1", "1.0.0", &[]));
    let before = tree_listing(fx.paths().root());

    let recovery = fx.run(fx.installer.recovery_job(".."));
    assert_eq!(recovery.status, ErrorCode::ArgumentInvalid);

    let dir = delta_package(&fx, "delta", "1.0.1", "#add\n");
    partner_signed(&dir);
    let delta = fx.run(fx.installer.rds_update_job(&dir, "", InstallMode::default()));
    assert_eq!(delta.status, ErrorCode::ArgumentInvalid);

    assert_eq!(tree_listing(fx.paths().root()), before);
    assert_eq!(fx.record().expect("record").version, Version::new(1, 0, 0));
}

fn plugin_source(fx: &Fixture, name: &str, requires: &[&str]) -> PathBuf {
    let dir = fx.source(&format!("plugin-{name}"));
    let requires = requires
        .iter()
        .map(|r| format!("\"{r}\""))
        .collect::<Vec<_>>()
        .join(", ");
    write_file(
        &dir,
        "plugin.toml",
        format!("name = \"{name}\"\nlibrary = \"lib{name}.so\"\nrequires = [{requires}]\n")
            .as_bytes(),
    );
    write_file(&dir, &format!("lib{name}.so"), b"\x7fELF");
    dir
}

#[test]
fn waiting_plugin_is_installed_once_its_dependency_arrives() {
    let fx = Fixture::new();
    let consumer = plugin_source(&fx, "consumer", &["provider"]);
    let provider = plugin_source(&fx, "provider", &[]);
    let mut runner = fx.installer.runner(NoopObserver);

    runner
        .submit(fx.installer.plugin_job(&consumer))
        .expect("idle runner");
    runner.run_until_idle();
    let plugins = fx.installer.plugins().expect("plugins");
    assert_eq!(plugins.len(), 1);
    assert_eq!(plugins[0].status, PluginStatus::Waiting);
    assert!(!fx.layout.plugin_dir("consumer").exists());

    runner
        .submit(fx.installer.plugin_job(&provider))
        .expect("idle runner");
    runner.run_until_idle();

    let subjects: Vec<(String, ErrorCode)> = runner
        .take_reports()
        .into_iter()
        .map(|report| (report.subject, report.status))
        .collect();
    assert_eq!(
        subjects,
        vec![
            ("consumer".to_string(), ErrorCode::Success),
            ("provider".to_string(), ErrorCode::Success),
            ("consumer".to_string(), ErrorCode::Success),
        ]
    );
    let plugins = fx.installer.plugins().expect("plugins");
    assert!(plugins
        .iter()
        .all(|plugin| plugin.status == PluginStatus::Installed));
    assert!(fx
        .layout
        .plugin_dir("consumer")
        .join("libconsumer.so")
        .is_file());
    assert_eq!(next_ready_plugin(&fx.layout).expect("scan"), None);
}

#[test]
fn plugin_without_library_fails() {
    let fx = Fixture::new();
    let dir = plugin_source(&fx, "broken", &[]);
    fs::remove_file(dir.join("libbroken.so")).expect("must remove library");

    let report = fx.run(fx.installer.plugin_job(&dir));
    assert_eq!(report.status, ErrorCode::PluginInstallationFailed);
    assert!(fx.installer.plugins().expect("plugins").is_empty());
}

#[test]
fn failed_plugin_registration_restores_waiting_record() {
    let fx = Fixture::new();
    let dir = plugin_source(&fx, "consumer", &[]);
    let waiting = PluginRecord {
        name: "consumer".to_string(),
        library: "libconsumer.so".to_string(),
        requires: vec!["provider".to_string()],
        status: PluginStatus::Waiting,
        source_dir: dir.clone(),
    };
    write_plugin_record(&fx.layout, &waiting).expect("must write record");
    let blocker = PathBuf::from(format!(
        "{}.tmp",
        fx.layout.plugin_record_path("consumer").display()
    ));
    fs::create_dir_all(&blocker).expect("must create blocker");

    let report = fx.run(fx.installer.plugin_job(&dir));
    assert_eq!(report.status, ErrorCode::PluginInstallationFailed);
    assert!(!fx.layout.plugin_dir("consumer").exists());
    fs::remove_dir_all(&blocker).expect("must remove blocker");
    assert_eq!(fx.installer.plugins().expect("plugins"), vec![waiting]);
}

#[test]
fn config_parses_trust_roots_and_storage() {
    let partner = public_key_hex(PARTNER_SEED);
    let raw = format!(
        "prefix = \"/var/lib/pkgflow\"\nsignals = \"stdout\"\n\n[storage]\nquota_bytes = 1048576\n\n[trust]\nrevoked = []\n\n[[trust.roots]]\npublic_key = \"{partner}\"\ntier = \"partner\"\n"
    );
    let config = InstallerConfig::from_toml_str(&raw).expect("config must parse");
    assert_eq!(config.prefix, Some(PathBuf::from("/var/lib/pkgflow")));
    assert_eq!(config.storage.quota_bytes, Some(1_048_576));
    assert_eq!(config.trust.roots.len(), 1);
    assert_eq!(config.trust.roots[0].tier, TrustTier::Partner);
    assert_eq!(config.trust_store().root_count(), 1);
    assert_eq!(
        config.resolve_prefix().expect("prefix"),
        PathBuf::from("/var/lib/pkgflow")
    );
}

#[test]
fn config_rejects_malformed_keys_and_unknown_fields() {
    let bad_key = "[[trust.roots]]\npublic_key = \"abc\"\ntier = \"platform\"\n";
    assert!(InstallerConfig::from_toml_str(bad_key).is_err());
    assert!(InstallerConfig::from_toml_str("prefx = \"/tmp\"\n").is_err());
}

#[test]
fn missing_config_file_yields_default() {
    let layout = test_layout();
    let config = InstallerConfig::load(&layout.prefix().join(CONFIG_FILE_NAME))
        .expect("missing config is not an error");
    assert_eq!(config, InstallerConfig::default());
    assert_eq!(config.signals, "none");
}

#[test]
fn config_signal_file_receives_lines() {
    let layout = test_layout();
    fs::create_dir_all(layout.prefix()).expect("must create prefix");
    let path = layout.prefix().join("signals.log");
    let config = InstallerConfig {
        signals: path.display().to_string(),
        ..InstallerConfig::default()
    };
    let sink = config.signal_sink().expect("sink must open");
    sink.emit(APP_ID, "start", "install");
    drop(sink);
    assert_eq!(
        fs::read_to_string(&path).expect("signal file"),
        format!("{APP_ID} start=install\n")
    );
    let _ = fs::remove_dir_all(layout.prefix());
}

#[test]
fn record_round_trip_keeps_certificates() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("must create dirs");
    let record = PackageRecord {
        id: APP_ID.to_string(),
        name: "Notes".to_string(),
        version: Version::new(3, 1, 4),
        tier: TrustTier::Platform,
        location: StorageLocation::External,
        root: layout.external_apps_dir().join(APP_ID),
        start_file: "index.html".to_string(),
        icon: None,
        certificates: vec![pkgflow_security::CertificateInfo {
            sequence_number: 2,
            is_author: false,
            fingerprint: "0011223344556677".to_string(),
            tier: TrustTier::Platform,
        }],
        installed_at_unix: 1_700_000_000,
    };
    write_record(&layout, APP_ID, &record).expect("must write");
    write_record(&layout, &backup_id(APP_ID), &record).expect("must write backup row");

    assert_eq!(read_record(&layout, APP_ID).expect("read"), Some(record.clone()));
    assert_eq!(list_records(&layout).expect("list"), vec![record]);
    let _ = fs::remove_dir_all(layout.prefix());
}
