//! use cakit::error::CaKitError;

use std::path::PathBuf;

use thiserror::Error;

type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Represents errors that can occur in the CaKit library.
///
/// Credential errors and backup errors share one enum so that a CA
/// collaborator can surface either through a single result type.
#[derive(Debug, Error)]
pub enum CaKitError {
    /// Error during data encoding.
    #[error("Failed to encode data: {0}")]
    EncodingError(String),

    /// Error during data decoding.
    #[error("Failed to decode data: {0}")]
    DecodingError(String),

    /// Error due to invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Error during key generation.
    #[error("Key generation error: {0}")]
    KeyGenerationError(String),

    /// Error related to certificate operations.
    #[error("Certificate error: {0}")]
    CertificateError(String),

    /// A signature did not verify against the supplied public key.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// The private key does not belong to the certificate.
    #[error("Certificate and private key do not match: {0}")]
    CredentialMismatch(String),

    /// An operation needed a private key but the bundle carries none.
    #[error("No private key available for {0}")]
    MissingPrivateKey(&'static str),

    /// A cryptographic primitive failed; the provider error is kept as the source.
    #[error("Cryptographic failure while {context}")]
    Crypto {
        context: String,
        #[source]
        source: BoxedCause,
    },

    /// The archive is not a backup produced by this library, or its metadata is inconsistent.
    #[error("Malformed backup archive: {0}")]
    MalformedArchive(String),

    /// An archived file does not match its manifest record.
    #[error("Integrity violation for entry '{entry}': {detail}")]
    IntegrityViolation { entry: String, detail: String },

    /// A path resolved outside the directory it must stay in.
    #[error("Unsafe path rejected: {}", path.display())]
    PathSafetyViolation { path: PathBuf },

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// File-system or archive I/O failure.
    #[error("I/O error while {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl CaKitError {
    /// Wraps a provider failure, keeping the original error for diagnostics.
    pub fn crypto<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CaKitError::Crypto {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CaKitError::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` when the error is a deliberate cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CaKitError::Cancelled)
    }
}

impl From<der::Error> for CaKitError {
    /// Converts a `der::Error` into a `CaKitError`.
    fn from(err: der::Error) -> Self {
        CaKitError::DecodingError(err.to_string())
    }
}

impl From<rsa::Error> for CaKitError {
    fn from(err: rsa::Error) -> Self {
        CaKitError::crypto("performing an RSA operation", err)
    }
}

impl From<pkcs8::Error> for CaKitError {
    fn from(err: pkcs8::Error) -> Self {
        CaKitError::DecodingError(err.to_string())
    }
}

impl From<pkcs8::spki::Error> for CaKitError {
    fn from(err: pkcs8::spki::Error) -> Self {
        CaKitError::DecodingError(err.to_string())
    }
}

impl From<pem::PemError> for CaKitError {
    fn from(err: pem::PemError) -> Self {
        CaKitError::DecodingError(err.to_string())
    }
}

impl From<std::io::Error> for CaKitError {
    fn from(err: std::io::Error) -> Self {
        CaKitError::io("accessing the file system", err)
    }
}

impl From<zip::result::ZipError> for CaKitError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(source) => CaKitError::io("accessing the archive", source),
            other => CaKitError::MalformedArchive(other.to_string()),
        }
    }
}

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, CaKitError>;
