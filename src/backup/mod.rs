//! Tamper-evident backup and restore of a CA datastore.
//!
//! An archive is a zip file. Every datastore file is stored under
//! `description/relative/path`, a trailing `manifest` entry records the size
//! and SHA-512 digest of each file, and the zip comment carries the datastore
//! UUID. Restore checks the comment against the manifest, keeps every target
//! path inside the destination and verifies each file before writing it.
//! Both directions remove their partial output when they fail or are
//! cancelled.

pub mod manifest;

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bon::Builder;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{CaKitError, Result};
use crate::pki;
pub use manifest::{BackupManifest, BackupManifestEntry, MANIFEST_ENTRY};

/// Upper bound on the buffer reserved up front for one restored entry.
const PREALLOCATION_LIMIT: usize = 1 << 20;

/// The directory tree of one CA and the identity it is archived under.
#[derive(Debug, Clone, Builder)]
pub struct Datastore {
    #[builder(into)]
    pub root: PathBuf,
    pub id: Uuid,
    /// Human-readable name, also the top-level directory inside the archive.
    #[builder(into)]
    pub description: String,
}

/// Receives progress and answers whether the caller wants to stop.
///
/// Both engines consult the sink before each file.
pub trait ProgressSink {
    fn on_progress(&self, _percent: u8, _item: &str) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A sink that ignores progress and never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Cancellation flag shareable with the thread running a backup or restore.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl ProgressSink for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Stored,
    #[default]
    Deflated,
}

#[derive(Debug, Clone, Default, Builder)]
pub struct BackupOptions {
    #[builder(default)]
    pub compression: Compression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupState {
    Idle,
    Scanning,
    Writing,
    Complete,
    CancelledCleanup,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreState {
    Idle,
    Opening,
    ManifestCheck,
    Extracting,
    Complete,
    CancelledCleanup,
    Failed,
}

/// Logs every state change of one engine run.
struct StateMachine<S> {
    operation: &'static str,
    state: S,
}

impl<S: Copy + std::fmt::Debug> StateMachine<S> {
    fn new(operation: &'static str, initial: S) -> Self {
        Self {
            operation,
            state: initial,
        }
    }

    fn advance(&mut self, next: S) {
        tracing::debug!(operation = self.operation, from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }
}

/// Removes a partially written file or directory unless disarmed.
struct PartialOutput {
    path: PathBuf,
    is_dir: bool,
    armed: bool,
}

impl PartialOutput {
    fn file(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            is_dir: false,
            armed: true,
        }
    }

    fn dir(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            is_dir: true,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let removed = if self.is_dir {
            std::fs::remove_dir_all(&self.path)
        } else {
            std::fs::remove_file(&self.path)
        };
        match removed {
            Ok(()) => tracing::warn!(path = %self.path.display(), "removed partial output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove partial output")
            }
        }
    }
}

/// Archives every regular file of `datastore` into `target` with default options.
pub fn backup(
    datastore: &Datastore,
    target: &Path,
    progress: &dyn ProgressSink,
) -> Result<BackupManifest> {
    backup_with_options(datastore, target, &BackupOptions::default(), progress)
}

/// Archives every regular file of `datastore` into `target`.
///
/// Files are visited in sorted order. On failure or cancellation `target` is
/// removed and the error (or [`CaKitError::Cancelled`]) is returned.
pub fn backup_with_options(
    datastore: &Datastore,
    target: &Path,
    options: &BackupOptions,
    progress: &dyn ProgressSink,
) -> Result<BackupManifest> {
    let mut machine = StateMachine::new("backup", BackupState::Idle);
    check_description(&datastore.description)?;

    machine.advance(BackupState::Scanning);
    let files = match scan(&datastore.root) {
        Ok(files) => files,
        Err(e) => {
            machine.advance(BackupState::Failed);
            return Err(e);
        }
    };

    machine.advance(BackupState::Writing);
    let mut guard = PartialOutput::file(target);
    match write_archive(datastore, &files, target, options, progress) {
        Ok(manifest) => {
            guard.disarm();
            machine.advance(BackupState::Complete);
            tracing::info!(
                archive = %target.display(),
                id = %datastore.id,
                files = manifest.entries.len(),
                bytes = manifest.total_bytes(),
                "backup complete"
            );
            Ok(manifest)
        }
        Err(e) => {
            machine.advance(if e.is_cancelled() {
                BackupState::CancelledCleanup
            } else {
                BackupState::Failed
            });
            drop(guard);
            Err(e)
        }
    }
}

fn check_description(description: &str) -> Result<()> {
    let trimmed = description.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || description.contains(['/', '\\'])
    {
        return Err(CaKitError::InvalidInput(format!(
            "'{description}' cannot name a backup directory"
        )));
    }
    Ok(())
}

/// A file to archive and its `/`-separated path below the datastore root.
struct ScannedFile {
    path: PathBuf,
    relative: String,
}

fn scan(root: &Path) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let context = format!("scanning {}", root.display());
            match e.into_io_error() {
                Some(source) => CaKitError::io(context, source),
                None => CaKitError::InvalidInput(format!("{context}: filesystem loop")),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| CaKitError::PathSafetyViolation {
                path: entry.path().to_path_buf(),
            })?;
        let parts = relative
            .components()
            .map(|c| match c {
                Component::Normal(part) => part.to_str().ok_or_else(|| {
                    CaKitError::InvalidInput(format!(
                        "{} is not valid UTF-8",
                        entry.path().display()
                    ))
                }),
                _ => Err(CaKitError::PathSafetyViolation {
                    path: entry.path().to_path_buf(),
                }),
            })
            .collect::<Result<Vec<_>>>()?;
        files.push(ScannedFile {
            path: entry.path().to_path_buf(),
            relative: parts.join("/"),
        });
    }
    tracing::debug!(root = %root.display(), files = files.len(), "datastore scanned");
    Ok(files)
}

fn write_archive(
    datastore: &Datastore,
    files: &[ScannedFile],
    target: &Path,
    options: &BackupOptions,
    progress: &dyn ProgressSink,
) -> Result<BackupManifest> {
    let file = File::create(target)
        .map_err(|e| CaKitError::io(format!("creating {}", target.display()), e))?;
    let mut zip = ZipWriter::new(file);
    let method = match options.compression {
        Compression::Stored => CompressionMethod::Stored,
        Compression::Deflated => CompressionMethod::Deflated,
    };
    let mut manifest = BackupManifest::new(datastore.id, datastore.description.clone());

    for (i, scanned) in files.iter().enumerate() {
        if progress.is_cancelled() {
            tracing::debug!(written = i, total = files.len(), "backup cancelled");
            return Err(CaKitError::Cancelled);
        }
        let bytes = std::fs::read(&scanned.path)
            .map_err(|e| CaKitError::io(format!("reading {}", scanned.path.display()), e))?;
        let name = format!("{}/{}", datastore.description, scanned.relative);
        let entry_options = SimpleFileOptions::default()
            .compression_method(method)
            .large_file(bytes.len() as u64 >= u32::MAX as u64);
        zip.start_file(name.as_str(), entry_options)?;
        zip.write_all(&bytes)
            .map_err(|e| CaKitError::io(format!("archiving {name}"), e))?;
        tracing::debug!(entry = %name, bytes = bytes.len(), "file archived");

        manifest.entries.push(BackupManifestEntry {
            relative_path: name,
            size_bytes: bytes.len() as u64,
            digest_hex: pki::sha512_hex(&bytes),
        });
        progress.on_progress(percent(i + 1, files.len()), &scanned.relative);
    }

    zip.start_file(MANIFEST_ENTRY, SimpleFileOptions::default().compression_method(method))?;
    zip.write_all(&manifest.to_json()?)
        .map_err(|e| CaKitError::io("writing the manifest", e))?;
    zip.set_comment(datastore.id.to_string());
    let file = zip.finish()?;
    file.sync_all()
        .map_err(|e| CaKitError::io(format!("flushing {}", target.display()), e))?;
    Ok(manifest)
}

/// Restores `archive` below `destination` and returns the created base
/// directory, `destination/description`.
///
/// Nothing is left behind on failure or cancellation: the base directory is
/// removed recursively before the error is returned.
pub fn restore(archive: &Path, destination: &Path, progress: &dyn ProgressSink) -> Result<PathBuf> {
    let mut machine = StateMachine::new("restore", RestoreState::Idle);
    let mut guard = None;
    let result = run_restore(archive, destination, progress, &mut machine, &mut guard);
    match result {
        Ok(base) => {
            if let Some(guard) = guard.as_mut() {
                guard.disarm();
            }
            machine.advance(RestoreState::Complete);
            tracing::info!(archive = %archive.display(), base = %base.display(), "restore complete");
            Ok(base)
        }
        Err(e) => {
            machine.advance(if e.is_cancelled() {
                RestoreState::CancelledCleanup
            } else {
                RestoreState::Failed
            });
            drop(guard);
            Err(e)
        }
    }
}

fn run_restore(
    archive_path: &Path,
    destination: &Path,
    progress: &dyn ProgressSink,
    machine: &mut StateMachine<RestoreState>,
    guard: &mut Option<PartialOutput>,
) -> Result<PathBuf> {
    machine.advance(RestoreState::Opening);
    let mut archive = open_archive(archive_path)?;

    machine.advance(RestoreState::ManifestCheck);
    let manifest = verified_manifest(&mut archive)?;
    let destination = normalize(&std::path::absolute(destination).map_err(|e| {
        CaKitError::io(format!("resolving {}", destination.display()), e)
    })?);
    let base = normalize(&destination.join(&manifest.description));
    if !is_strict_descendant(&base, &destination) {
        return Err(CaKitError::PathSafetyViolation { path: base });
    }
    if base.exists() {
        return Err(CaKitError::InvalidInput(format!(
            "restore target {} already exists",
            base.display()
        )));
    }
    let plan = manifest
        .entries
        .iter()
        .map(|entry| {
            let target = normalize(&destination.join(&entry.relative_path));
            if is_strict_descendant(&target, &base) {
                Ok((entry, target))
            } else {
                tracing::warn!(entry = %entry.relative_path, "entry escapes the restore directory");
                Err(CaKitError::PathSafetyViolation { path: target })
            }
        })
        .collect::<Result<Vec<_>>>()?;

    machine.advance(RestoreState::Extracting);
    std::fs::create_dir_all(&base)
        .map_err(|e| CaKitError::io(format!("creating {}", base.display()), e))?;
    *guard = Some(PartialOutput::dir(&base));

    for (i, (entry, target)) in plan.iter().enumerate() {
        if progress.is_cancelled() {
            tracing::debug!(restored = i, total = plan.len(), "restore cancelled");
            return Err(CaKitError::Cancelled);
        }
        let bytes = read_verified(&mut archive, entry)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CaKitError::io(format!("creating {}", parent.display()), e))?;
        }
        std::fs::write(target, &bytes)
            .map_err(|e| CaKitError::io(format!("writing {}", target.display()), e))?;
        tracing::debug!(entry = %entry.relative_path, bytes = bytes.len(), "file restored");
        progress.on_progress(percent(i + 1, plan.len()), &entry.relative_path);
    }
    Ok(base)
}

/// Reads and verifies the manifest of `archive` without extracting anything.
///
/// Besides the identity checks done by [`restore`], every listed entry must be
/// present with the recorded size.
pub fn inspect(archive: &Path) -> Result<BackupManifest> {
    let mut zip = open_archive(archive)?;
    let manifest = verified_manifest(&mut zip)?;
    for entry in &manifest.entries {
        let file = zip
            .by_name(&entry.relative_path)
            .map_err(|e| entry_error(entry, e))?;
        check_size(entry, file.size())?;
    }
    Ok(manifest)
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file =
        File::open(path).map_err(|e| CaKitError::io(format!("opening {}", path.display()), e))?;
    Ok(ZipArchive::new(file)?)
}

/// Parses the manifest and cross-checks it against the archive comment.
fn verified_manifest(archive: &mut ZipArchive<File>) -> Result<BackupManifest> {
    let json = {
        let mut file = match archive.by_name(MANIFEST_ENTRY) {
            Ok(file) => file,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(CaKitError::MalformedArchive(
                    "not a recognized backup: no manifest entry".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        let mut json = Vec::new();
        file.read_to_end(&mut json)
            .map_err(|e| CaKitError::io("reading the manifest", e))?;
        json
    };
    let manifest = BackupManifest::from_json(&json)?;

    let comment = std::str::from_utf8(archive.comment())
        .map_err(|_| CaKitError::MalformedArchive("archive identity is not text".to_string()))?;
    let archive_id = Uuid::parse_str(comment.trim()).map_err(|e| {
        CaKitError::MalformedArchive(format!("archive identity '{comment}' is not a UUID: {e}"))
    })?;
    if archive_id != manifest.archive_id {
        return Err(CaKitError::MalformedArchive(format!(
            "archive identity {archive_id} does not match manifest {}",
            manifest.archive_id
        )));
    }
    manifest.check_structure()?;
    tracing::debug!(id = %archive_id, entries = manifest.entries.len(), "manifest verified");
    Ok(manifest)
}

fn entry_error(entry: &BackupManifestEntry, err: zip::result::ZipError) -> CaKitError {
    match err {
        zip::result::ZipError::FileNotFound => CaKitError::IntegrityViolation {
            entry: entry.relative_path.clone(),
            detail: "missing from the archive".to_string(),
        },
        other => other.into(),
    }
}

fn check_size(entry: &BackupManifestEntry, actual: u64) -> Result<()> {
    if actual != entry.size_bytes {
        return Err(CaKitError::IntegrityViolation {
            entry: entry.relative_path.clone(),
            detail: format!(
                "archive holds {actual} bytes, manifest records {}",
                entry.size_bytes
            ),
        });
    }
    Ok(())
}

/// Reads exactly `size_bytes` of an entry and checks its digest.
fn read_verified(archive: &mut ZipArchive<File>, entry: &BackupManifestEntry) -> Result<Vec<u8>> {
    let mut file = archive
        .by_name(&entry.relative_path)
        .map_err(|e| entry_error(entry, e))?;
    check_size(entry, file.size())?;

    let capacity = usize::try_from(entry.size_bytes).map_err(|_| CaKitError::IntegrityViolation {
        entry: entry.relative_path.clone(),
        detail: "entry too large for this platform".to_string(),
    })?;
    // The recorded size is archive-controlled.
    let mut bytes = Vec::with_capacity(capacity.min(PREALLOCATION_LIMIT));
    (&mut file)
        .take(entry.size_bytes)
        .read_to_end(&mut bytes)
        .map_err(|e| read_error(entry, e))?;
    if bytes.len() != capacity {
        return Err(CaKitError::IntegrityViolation {
            entry: entry.relative_path.clone(),
            detail: format!("short read: {} of {capacity} bytes", bytes.len()),
        });
    }
    if !pki::sha512_matches(&bytes, &entry.digest_hex) {
        return Err(CaKitError::IntegrityViolation {
            entry: entry.relative_path.clone(),
            detail: "SHA-512 digest mismatch".to_string(),
        });
    }
    Ok(bytes)
}

/// Corrupt compressed data surfaces as an I/O error from the decoder. It is
/// reported against the entry like any other content mismatch.
fn read_error(entry: &BackupManifestEntry, e: std::io::Error) -> CaKitError {
    match e.kind() {
        ErrorKind::InvalidData | ErrorKind::InvalidInput | ErrorKind::UnexpectedEof => {
            CaKitError::IntegrityViolation {
                entry: entry.relative_path.clone(),
                detail: format!("undecodable entry data: {e}"),
            }
        }
        _ => CaKitError::io(format!("reading {}", entry.relative_path), e),
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total).min(100) as u8
}

/// Resolves `.` and `..` lexically, without touching the file system.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn is_strict_descendant(child: &Path, parent: &Path) -> bool {
    child != parent && child.starts_with(parent)
}
