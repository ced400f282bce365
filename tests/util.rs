#![allow(dead_code)]

use cakit::backup::{BackupManifest, BackupManifestEntry, Datastore, MANIFEST_ENTRY};
use cakit::cert::Certificate;
use cakit::cert::params::{DistinguishedName, Validity};
use cakit::context::CryptoContext;
use cakit::credential::pbe::Pkcs8Cipher;
use cakit::credential::pkcs12::{self, Pkcs12Cipher};
use cakit::credential::{pbe, CandidateKey, CredentialBundle, validator};
use cakit::key::KeyPair;
use cakit::pki;
use cakit::request::InMemoryRequest;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

pub const SAMPLE_ID: &str = "7779894e-226f-4230-81ab-612c4387abff";
pub const SAMPLE_DESCRIPTION: &str = "My CA";
pub const UNLOCK_SECRET: &str = "unlock-secret";

/// Relative paths of the files in [`sample_datastore`].
pub const SAMPLE_FILES: [&str; 5] = [
    "ca_cert.pem",
    "ca_key.p8",
    "crl/1.crl",
    "issued/cert1.p12",
    "template/t1.xml",
];

/// Low iteration counts keep the password-based schemes quick under test.
pub fn fast_context() -> CryptoContext {
    CryptoContext::builder()
        .pbkdf2_iterations(1000)
        .pkcs12_kdf_iterations(1000)
        .mac_iterations(1000)
        .build()
}

pub fn ca_request(common_name: &str, key: &KeyPair) -> InMemoryRequest {
    InMemoryRequest::builder()
        .subject(
            DistinguishedName::builder()
                .common_name(common_name.to_string())
                .organization("CaKit Tests".to_string())
                .build(),
        )
        .key_algorithm(key.algorithm())
        .ca(true)
        .build()
}

pub fn self_signed(common_name: &str, key: &KeyPair) -> Certificate {
    Certificate::new_self_signed(&ca_request(common_name, key), key, Validity::for_days(30))
        .unwrap()
}

/// An RSA CA certificate and its key.
pub fn rsa_ca(common_name: &str) -> (Certificate, KeyPair) {
    let key = KeyPair::generate_rsa(2048).unwrap();
    (self_signed(common_name, &key), key)
}

pub fn bundle_for(certificate: Certificate, key: KeyPair) -> CredentialBundle {
    validator::validate_pair(
        &fast_context(),
        certificate,
        CandidateKey::from_key_pair(key).unwrap(),
    )
    .unwrap()
}

pub fn sample_uuid() -> Uuid {
    Uuid::parse_str(SAMPLE_ID).unwrap()
}

/// Lays out a small CA datastore under `parent/<uuid>` and describes it.
pub fn sample_datastore(parent: &Path) -> Datastore {
    let root = parent.join(SAMPLE_ID);
    let ctx = fast_context();
    let key = KeyPair::generate_ecdsa_p256();
    let cert = self_signed("Sample Root CA", &key);
    let pkcs8 = key.to_pkcs8_der().unwrap();
    let encrypted_key =
        pbe::encrypt_private_key(&ctx, pkcs8.as_bytes(), Pkcs8Cipher::Aes256Cbc, UNLOCK_SECRET)
            .unwrap();
    let keystore = pkcs12::build_pkcs12(
        &ctx,
        std::slice::from_ref(&cert),
        &key,
        Pkcs12Cipher::Aes128,
        "issued",
    )
    .unwrap();

    write_file(&root, "ca_cert.pem", cert.to_pem().unwrap().as_bytes());
    write_file(&root, "ca_key.p8", &encrypted_key);
    write_file(&root, "issued/cert1.p12", &keystore);
    write_file(
        &root,
        "template/t1.xml",
        b"<template name=\"t1\"><subject cn=\"server.local\"/></template>\n",
    );
    write_file(&root, "crl/1.crl", &[0x30, 0x03, 0x02, 0x01, 0x01]);

    Datastore::builder()
        .root(root)
        .id(sample_uuid())
        .description(SAMPLE_DESCRIPTION)
        .build()
}

pub fn write_file(root: &Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// Every file below `root`, keyed by its `/`-separated relative path.
pub fn tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files = walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .components()
                .map(|c| c.as_os_str().to_str().unwrap().to_string())
                .collect::<Vec<_>>()
                .join("/");
            (relative, std::fs::read(e.path()).unwrap())
        })
        .collect::<Vec<_>>();
    files.sort();
    files
}

/// Copies `source` to `target`, replacing the content of `entry` (when
/// given) and the archive comment (when given).
///
/// Entries are re-compressed, so the zip checksums stay consistent and only
/// the manifest can notice the change.
pub fn rewrite_archive(
    source: &Path,
    target: &Path,
    entry: Option<(&str, &[u8])>,
    comment: Option<&str>,
) {
    let mut archive = ZipArchive::new(std::fs::File::open(source).unwrap()).unwrap();
    let original_comment = String::from_utf8(archive.comment().to_vec()).unwrap();
    let mut writer = ZipWriter::new(std::fs::File::create(target).unwrap());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let name = file.name().to_string();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).unwrap();
        if let Some((replaced, new_contents)) = entry {
            if replaced == name {
                contents = new_contents.to_vec();
            }
        }
        writer.start_file(name, SimpleFileOptions::default()).unwrap();
        writer.write_all(&contents).unwrap();
    }
    writer.set_comment(comment.map(str::to_string).unwrap_or(original_comment));
    writer.finish().unwrap();
}

/// Copies `source` to `target` with one bit flipped in the middle of the
/// compressed data of `entry_name`. Nothing is re-encoded, so the damage is
/// only visible once the entry is inflated.
pub fn flip_compressed_byte(source: &Path, target: &Path, entry_name: &str) {
    let compressed_size = {
        let mut archive = ZipArchive::new(std::fs::File::open(source).unwrap()).unwrap();
        let file = archive.by_name(entry_name).unwrap();
        file.compressed_size() as usize
    };
    assert!(compressed_size > 0, "{entry_name} has no compressed data");

    let mut bytes = std::fs::read(source).unwrap();
    let header = bytes
        .windows(4)
        .enumerate()
        .filter(|(_, w)| *w == *b"PK\x03\x04")
        .map(|(offset, _)| offset)
        .find(|&offset| {
            let name_len = u16::from_le_bytes([bytes[offset + 26], bytes[offset + 27]]) as usize;
            bytes.get(offset + 30..offset + 30 + name_len) == Some(entry_name.as_bytes())
        })
        .unwrap();
    let name_len = u16::from_le_bytes([bytes[header + 26], bytes[header + 27]]) as usize;
    let extra_len = u16::from_le_bytes([bytes[header + 28], bytes[header + 29]]) as usize;
    let data_start = header + 30 + name_len + extra_len;

    bytes[data_start + compressed_size / 2] ^= 0x01;
    std::fs::write(target, bytes).unwrap();
}

/// Writes an archive whose manifest lists `entries` verbatim, so restore
/// can be fed paths the backup engine would never produce.
pub fn forge_archive(target: &Path, description: &str, entries: &[(&str, &[u8])]) -> PathBuf {
    let mut manifest = BackupManifest::new(sample_uuid(), description);
    let mut writer = ZipWriter::new(std::fs::File::create(target).unwrap());
    for (name, contents) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(contents).unwrap();
        manifest.entries.push(BackupManifestEntry {
            relative_path: name.to_string(),
            size_bytes: contents.len() as u64,
            digest_hex: pki::sha512_hex(contents),
        });
    }
    writer
        .start_file(MANIFEST_ENTRY, SimpleFileOptions::default())
        .unwrap();
    writer.write_all(&manifest.to_json().unwrap()).unwrap();
    writer.set_comment(SAMPLE_ID);
    writer.finish().unwrap();
    target.to_path_buf()
}
