//! # CaKit - Certificate Authority credential toolkit
//!
//! CaKit handles the credential material of a Certificate Authority, built
//! entirely with rustcrypto libraries (openssl is used only by the tests):
//!
//! - proving that a private key belongs to a certificate before the pair is
//!   trusted ([`credential::validator`]),
//! - exporting certificates, chains, keys and keystores in standard containers
//!   ([`credential::export`]),
//! - describing certificate requests in memory, as PKCS#10 or as on-disk
//!   templates ([`request`]),
//! - backing up and restoring a whole CA datastore as a tamper-evident zip
//!   archive ([`backup`]).
//!
//! ## Supported Key Types
//!
//! - **RSA**: any size the `rsa` crate generates, SHA-256 signatures
//! - **ECDSA**: P-256 and P-384
//! - **Ed25519**
//!
//! ## Export Formats
//!
//! - **Certificate**: DER or PEM
//! - **Chain**: concatenated PEM, or a PKCS#7 certs-only `SignedData` in DER
//! - **PKCS#12**: legacy PBE-SHA1-3DES, or PBES2 with AES-128/192/256
//! - **PKCS#8**: plain or encrypted with PBES2 (3DES, AES) or the SHA-1 based
//!   PKCS#12 schemes (RC4, RC2, 2-key and 3-key 3DES)
//! - **Public key**: SubjectPublicKeyInfo in DER or PEM
//!
//! ## Quick Start
//!
//! ### Validating and Exporting a CA Identity
//!
//! ```rust,no_run
//! use cakit::{
//!     context::CryptoContext,
//!     credential::{
//!         export::{export, Encoding, ExportFormat, ExportOptions},
//!         pkcs12::Pkcs12Cipher,
//!         validator,
//!     },
//! };
//! use std::path::Path;
//!
//! # fn main() -> Result<(), cakit::error::CaKitError> {
//! let ctx = CryptoContext::default();
//! let bundle = validator::load(
//!     &ctx,
//!     Path::new("ca_cert.pem"),
//!     Path::new("ca_key.p8"),
//!     Some("unlock"),
//! )?;
//!
//! let options = ExportOptions::builder()
//!     .format(ExportFormat::Pkcs12 { cipher: Pkcs12Cipher::Aes256 })
//!     .password("export-secret")
//!     .build();
//! let keystore = export(&ctx, &bundle, &options)?;
//! std::fs::write("ca.p12", keystore).unwrap();
//!
//! let chain = export(
//!     &ctx,
//!     &bundle,
//!     &ExportOptions::builder()
//!         .format(ExportFormat::Chain { encoding: Encoding::Pem })
//!         .build(),
//! )?;
//! println!("{}", String::from_utf8_lossy(&chain));
//! # Ok(())
//! # }
//! ```
//!
//! ### Bootstrapping a CA Identity
//!
//! ```rust,no_run
//! use cakit::{
//!     cert::{Certificate, params::{DistinguishedName, Validity}},
//!     key::{KeyAlgorithm, KeyPair},
//!     request::{InMemoryRequest, SubmittedRequest},
//! };
//!
//! # fn main() -> Result<(), cakit::error::CaKitError> {
//! let request = InMemoryRequest::builder()
//!     .subject(
//!         DistinguishedName::builder()
//!             .common_name("Example Root CA".to_string())
//!             .organization("Example Corp".to_string())
//!             .build(),
//!     )
//!     .key_algorithm(KeyAlgorithm::EcdsaP384)
//!     .ca(true)
//!     .build();
//!
//! let key = KeyPair::generate(request.key_algorithm)?;
//! let certificate = Certificate::new_self_signed(&request, &key, Validity::for_days(3650))?;
//! println!("{}", certificate.to_pem()?);
//!
//! // The same request as PKCS#10, for a CA that signs it elsewhere.
//! let csr = SubmittedRequest::create(&request, &key)?;
//! println!("{}", csr.to_pem()?);
//! # Ok(())
//! # }
//! ```
//!
//! ### Backing Up a Datastore
//!
//! ```rust,no_run
//! use cakit::backup::{self, CancelFlag, Datastore};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), cakit::error::CaKitError> {
//! let datastore = Datastore::builder()
//!     .root("/var/lib/ca/7779894e-226f-4230-81ab-612c4387abff")
//!     .id(uuid::Uuid::parse_str("7779894e-226f-4230-81ab-612c4387abff").unwrap())
//!     .description("My CA")
//!     .build();
//!
//! let cancel = CancelFlag::new();
//! let manifest = backup::backup(&datastore, Path::new("my-ca.zip"), &cancel)?;
//! println!("{} files archived", manifest.entries.len());
//!
//! let restored = backup::restore(Path::new("my-ca.zip"), Path::new("/tmp/restore"), &cancel)?;
//! println!("restored into {}", restored.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every operation returns [`error::CaKitError`]. Backup and credential
//! failures share the enum so a caller can tell a cancelled restore from a
//! tampered archive or a mismatched key:
//!
//! ```rust
//! use cakit::{error::CaKitError, key::KeyPair};
//!
//! match KeyPair::from_pkcs8_pem("invalid pem data") {
//!     Ok(_) => println!("Key imported successfully"),
//!     Err(CaKitError::DecodingError(msg)) => println!("Failed to decode key: {}", msg),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`key`]: Key generation, PKCS#8 and SPKI import/export
//! - [`cert`]: Certificates, distinguished names and X.509 extensions
//! - [`credential`]: Credential bundles, pair validation and export
//! - [`request`]: In-memory, PKCS#10 and template certificate requests
//! - [`backup`]: Datastore backup, restore and inspection
//! - [`context`]: Cryptographic settings passed to every operation
//! - [`pki`]: Digests, signing and verification
//! - [`error`]: Error types
//! - [`tbs_certificate`]: Low-level certificate structure manipulation

pub mod backup;
pub mod cert;
pub mod context;
pub mod credential;
pub mod error;
pub mod key;
pub mod pem_utils;
pub mod pki;
pub mod request;
pub mod tbs_certificate;
