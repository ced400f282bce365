mod util;

use std::cell::Cell;
use std::path::Path;

use cakit::backup::{
    self, BackupOptions, CancelFlag, Compression, Datastore, NoProgress, ProgressSink,
};
use cakit::error::CaKitError;

pub type Result<T> = std::result::Result<T, CaKitError>;

/// Cancels once `after` files have been handled.
struct CancelAfter {
    after: usize,
    seen: Cell<usize>,
}

impl CancelAfter {
    fn new(after: usize) -> Self {
        Self {
            after,
            seen: Cell::new(0),
        }
    }
}

impl ProgressSink for CancelAfter {
    fn on_progress(&self, _percent: u8, _item: &str) {
        self.seen.set(self.seen.get() + 1);
    }

    fn is_cancelled(&self) -> bool {
        self.seen.get() >= self.after
    }
}

/// Records every progress callback.
#[derive(Default)]
struct Recorder {
    events: std::cell::RefCell<Vec<(u8, String)>>,
}

impl ProgressSink for Recorder {
    fn on_progress(&self, percent: u8, item: &str) {
        self.events.borrow_mut().push((percent, item.to_string()));
    }
}

fn archived(dir: &Path) -> (Datastore, std::path::PathBuf) {
    let datastore = util::sample_datastore(&dir.join("store"));
    let archive = dir.join("backup.zip");
    backup::backup(&datastore, &archive, &NoProgress).unwrap();
    (datastore, archive)
}

#[test]
fn test_backup_and_restore_round_trip() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let datastore = util::sample_datastore(&dir.path().join("store"));
    let archive = dir.path().join("backup.zip");
    let recorder = Recorder::default();

    let manifest = backup::backup(&datastore, &archive, &recorder)?;
    assert_eq!(manifest.archive_id, util::sample_uuid());
    assert_eq!(manifest.description, util::SAMPLE_DESCRIPTION);
    let names = manifest
        .entries
        .iter()
        .map(|e| e.relative_path.as_str())
        .collect::<Vec<_>>();
    let expected = util::SAMPLE_FILES
        .iter()
        .map(|f| format!("{}/{f}", util::SAMPLE_DESCRIPTION))
        .collect::<Vec<_>>();
    assert_eq!(names, expected);

    let events = recorder.events.borrow();
    assert_eq!(events.len(), util::SAMPLE_FILES.len());
    assert_eq!(events.last().unwrap().0, 100);

    let restore_dir = dir.path().join("restore");
    let base = backup::restore(&archive, &restore_dir, &NoProgress)?;
    assert_eq!(base, restore_dir.join(util::SAMPLE_DESCRIPTION));
    assert_eq!(util::tree(&base), util::tree(&datastore.root));
    Ok(())
}

#[test]
fn test_archive_comment_carries_the_datastore_id() {
    let dir = tempfile::tempdir().unwrap();
    let (_, archive) = archived(dir.path());
    let zip = zip::ZipArchive::new(std::fs::File::open(&archive).unwrap()).unwrap();
    assert_eq!(zip.comment(), util::SAMPLE_ID.as_bytes());
}

#[test]
fn test_stored_archive_restores() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let datastore = util::sample_datastore(&dir.path().join("store"));
    let archive = dir.path().join("stored.zip");
    let options = BackupOptions::builder()
        .compression(Compression::Stored)
        .build();
    backup::backup_with_options(&datastore, &archive, &options, &NoProgress)?;

    let base = backup::restore(&archive, &dir.path().join("restore"), &NoProgress)?;
    assert_eq!(util::tree(&base), util::tree(&datastore.root));
    Ok(())
}

#[test]
fn test_tampered_entry_is_rejected_and_cleaned_up() {
    let dir = tempfile::tempdir().unwrap();
    let (_, archive) = archived(dir.path());
    let tampered = dir.path().join("tampered.zip");
    // Same length as the original CRL so only the digest can tell.
    util::rewrite_archive(
        &archive,
        &tampered,
        Some(("My CA/crl/1.crl", &[0x30, 0x03, 0x02, 0x01, 0x02])),
        None,
    );

    let restore_dir = dir.path().join("restore");
    let err = backup::restore(&tampered, &restore_dir, &NoProgress).unwrap_err();
    match err {
        CaKitError::IntegrityViolation { entry, .. } => assert_eq!(entry, "My CA/crl/1.crl"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!restore_dir.join(util::SAMPLE_DESCRIPTION).exists());
}

#[test]
fn test_corrupted_compressed_entry_is_an_integrity_violation() {
    let dir = tempfile::tempdir().unwrap();
    let (_, archive) = archived(dir.path());
    let corrupted = dir.path().join("corrupted.zip");
    util::flip_compressed_byte(&archive, &corrupted, "My CA/ca_cert.pem");

    let restore_dir = dir.path().join("restore");
    let err = backup::restore(&corrupted, &restore_dir, &NoProgress).unwrap_err();
    match err {
        CaKitError::IntegrityViolation { entry, .. } => assert_eq!(entry, "My CA/ca_cert.pem"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!restore_dir.join(util::SAMPLE_DESCRIPTION).exists());
}

#[test]
fn test_resized_entry_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (_, archive) = archived(dir.path());
    let tampered = dir.path().join("tampered.zip");
    util::rewrite_archive(&archive, &tampered, Some(("My CA/template/t1.xml", b"<x/>")), None);

    let err = backup::inspect(&tampered).unwrap_err();
    assert!(matches!(err, CaKitError::IntegrityViolation { .. }), "{err}");
}

#[test]
fn test_foreign_archive_id_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (_, archive) = archived(dir.path());
    let relabelled = dir.path().join("relabelled.zip");
    util::rewrite_archive(
        &archive,
        &relabelled,
        None,
        Some("00000000-0000-4000-8000-000000000000"),
    );

    let restore_dir = dir.path().join("restore");
    let err = backup::restore(&relabelled, &restore_dir, &NoProgress).unwrap_err();
    assert!(matches!(err, CaKitError::MalformedArchive(_)), "{err}");
    assert!(!restore_dir.join(util::SAMPLE_DESCRIPTION).exists());
}

#[test]
fn test_archive_without_manifest_is_not_a_backup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plain.zip");
    let mut writer = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
    writer
        .start_file("readme.txt", zip::write::SimpleFileOptions::default())
        .unwrap();
    std::io::Write::write_all(&mut writer, b"hello").unwrap();
    writer.set_comment(util::SAMPLE_ID);
    writer.finish().unwrap();

    let err = backup::restore(&path, &dir.path().join("restore"), &NoProgress).unwrap_err();
    assert!(matches!(err, CaKitError::MalformedArchive(_)), "{err}");
}

#[test]
fn test_single_entry_archive_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let archive = util::forge_archive(
        &dir.path().join("single.zip"),
        "My CA",
        &[("My CA/ca_cert.pem", b"cert")],
    );
    let err = backup::inspect(&archive).unwrap_err();
    assert!(matches!(err, CaKitError::MalformedArchive(_)), "{err}");
}

#[test]
fn test_entry_escaping_the_restore_directory_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let archive = util::forge_archive(
        &dir.path().join("escape.zip"),
        "My CA",
        &[
            ("My CA/ca_cert.pem", b"cert"),
            ("My CA/../../escape.txt", b"owned"),
        ],
    );
    let restore_dir = dir.path().join("restore").join("inner");
    std::fs::create_dir_all(&restore_dir).unwrap();

    let err = backup::restore(&archive, &restore_dir, &NoProgress).unwrap_err();
    assert!(matches!(err, CaKitError::PathSafetyViolation { .. }), "{err}");
    assert!(!restore_dir.join("My CA").exists());
    assert!(!dir.path().join("restore").join("escape.txt").exists());
}

#[test]
fn test_description_escaping_the_destination_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let archive = util::forge_archive(
        &dir.path().join("escape.zip"),
        "..",
        &[("../ca_cert.pem", b"cert"), ("../ca_key.p8", b"key")],
    );
    let err = backup::restore(&archive, &dir.path().join("restore"), &NoProgress).unwrap_err();
    assert!(matches!(err, CaKitError::PathSafetyViolation { .. }), "{err}");
}

#[test]
fn test_existing_restore_base_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let (_, archive) = archived(dir.path());
    let restore_dir = dir.path().join("restore");
    let base = restore_dir.join(util::SAMPLE_DESCRIPTION);
    std::fs::create_dir_all(&base).unwrap();
    std::fs::write(base.join("keep.txt"), b"keep").unwrap();

    let err = backup::restore(&archive, &restore_dir, &NoProgress).unwrap_err();
    assert!(matches!(err, CaKitError::InvalidInput(_)), "{err}");
    assert!(base.join("keep.txt").exists());
}

#[test]
fn test_cancelled_backup_removes_the_archive() {
    let dir = tempfile::tempdir().unwrap();
    let datastore = util::sample_datastore(&dir.path().join("store"));
    let archive = dir.path().join("backup.zip");

    let err = backup::backup(&datastore, &archive, &CancelAfter::new(2)).unwrap_err();
    assert!(err.is_cancelled());
    assert!(!archive.exists());
}

#[test]
fn test_cancelled_restore_removes_the_base() {
    let dir = tempfile::tempdir().unwrap();
    let (_, archive) = archived(dir.path());
    let restore_dir = dir.path().join("restore");

    let err = backup::restore(&archive, &restore_dir, &CancelAfter::new(3)).unwrap_err();
    assert!(err.is_cancelled());
    assert!(!restore_dir.join(util::SAMPLE_DESCRIPTION).exists());
}

#[test]
fn test_cancel_flag_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let datastore = util::sample_datastore(&dir.path().join("store"));
    let archive = dir.path().join("backup.zip");
    let flag = CancelFlag::new();
    flag.cancel();

    assert!(matches!(
        backup::backup(&datastore, &archive, &flag),
        Err(CaKitError::Cancelled)
    ));
    assert!(!archive.exists());
}

#[test]
fn test_inspect_reports_the_manifest() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let (_, archive) = archived(dir.path());

    let manifest = backup::inspect(&archive)?;
    assert_eq!(manifest.archive_id, util::sample_uuid());
    assert_eq!(manifest.entries.len(), util::SAMPLE_FILES.len());
    assert!(manifest.total_bytes() > 0);
    assert!(!dir.path().join(util::SAMPLE_DESCRIPTION).exists());
    Ok(())
}

/// The restored CA identity is still a valid credential pair.
#[test]
fn test_restored_credentials_load() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let (_, archive) = archived(dir.path());
    let base = backup::restore(&archive, &dir.path().join("restore"), &NoProgress)?;

    let bundle = cakit::credential::validator::load(
        &util::fast_context(),
        &base.join("ca_cert.pem"),
        &base.join("ca_key.p8"),
        Some(util::UNLOCK_SECRET),
    )?;
    assert_eq!(bundle.certificate().subject().common_name, "Sample Root CA");
    Ok(())
}
