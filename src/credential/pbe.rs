//! Password-based encryption of private keys.
//!
//! Two families are supported: PBES2 (PBKDF2-HMAC-SHA256 with AES or
//! DES-EDE3 in CBC mode), handled by the `pkcs5` crate, and the SHA-1 based
//! schemes of PKCS#12 appendix C, which derive key and IV with the PKCS#12
//! KDF and are implemented here on top of `des`, `rc2` and `rc4`.

use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::consts::{U5, U16};
use cbc::cipher::{
    BlockDecryptMut, BlockEncryptMut, InnerIvInit, KeyInit, KeyIvInit, StreamCipher,
};
use const_oid::ObjectIdentifier;
use der::asn1::{Any, OctetString};
use der::{Decode, Encode, Sequence};
use pkcs5::pbes2;
use pkcs8::{EncryptedPrivateKeyInfo, PrivateKeyInfo, SecretDocument};
use pkcs12::kdf::{Pkcs12KeyType, derive_key_utf8};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::context::CryptoContext;
use crate::error::{CaKitError, Result};
use crate::key::KeyPair;
use crate::pem_utils;

pub(crate) const ENCRYPTED_PEM_LABEL: &str = "ENCRYPTED PRIVATE KEY";
pub(crate) const PLAIN_PEM_LABEL: &str = "PRIVATE KEY";

/// Encryption applied to an exported PKCS#8 private key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pkcs8Cipher {
    Des3Cbc,
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
    PbeSha1Rc4Key128,
    PbeSha1Rc4Key40,
    PbeSha1Des3,
    PbeSha1Des2,
    PbeSha1Rc2Key128,
    PbeSha1Rc2Key40,
}

impl Pkcs8Cipher {
    pub const ALL: [Pkcs8Cipher; 10] = [
        Pkcs8Cipher::Des3Cbc,
        Pkcs8Cipher::Aes128Cbc,
        Pkcs8Cipher::Aes192Cbc,
        Pkcs8Cipher::Aes256Cbc,
        Pkcs8Cipher::PbeSha1Rc4Key128,
        Pkcs8Cipher::PbeSha1Rc4Key40,
        Pkcs8Cipher::PbeSha1Des3,
        Pkcs8Cipher::PbeSha1Des2,
        Pkcs8Cipher::PbeSha1Rc2Key128,
        Pkcs8Cipher::PbeSha1Rc2Key40,
    ];

    fn scheme(self) -> PbeScheme {
        match self {
            Pkcs8Cipher::Des3Cbc => PbeScheme::Pbes2(Pbes2Cipher::Des3),
            Pkcs8Cipher::Aes128Cbc => PbeScheme::Pbes2(Pbes2Cipher::Aes128),
            Pkcs8Cipher::Aes192Cbc => PbeScheme::Pbes2(Pbes2Cipher::Aes192),
            Pkcs8Cipher::Aes256Cbc => PbeScheme::Pbes2(Pbes2Cipher::Aes256),
            Pkcs8Cipher::PbeSha1Rc4Key128 => PbeScheme::Legacy(LegacyPbe::Rc4Key128),
            Pkcs8Cipher::PbeSha1Rc4Key40 => PbeScheme::Legacy(LegacyPbe::Rc4Key40),
            Pkcs8Cipher::PbeSha1Des3 => PbeScheme::Legacy(LegacyPbe::Des3),
            Pkcs8Cipher::PbeSha1Des2 => PbeScheme::Legacy(LegacyPbe::Des2),
            Pkcs8Cipher::PbeSha1Rc2Key128 => PbeScheme::Legacy(LegacyPbe::Rc2Key128),
            Pkcs8Cipher::PbeSha1Rc2Key40 => PbeScheme::Legacy(LegacyPbe::Rc2Key40),
        }
    }
}

impl std::fmt::Display for Pkcs8Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Pkcs8Cipher::Des3Cbc => "DES3-CBC",
            Pkcs8Cipher::Aes128Cbc => "AES-128-CBC",
            Pkcs8Cipher::Aes192Cbc => "AES-192-CBC",
            Pkcs8Cipher::Aes256Cbc => "AES-256-CBC",
            Pkcs8Cipher::PbeSha1Rc4Key128 => "PBE-SHA1-RC4-128",
            Pkcs8Cipher::PbeSha1Rc4Key40 => "PBE-SHA1-RC4-40",
            Pkcs8Cipher::PbeSha1Des3 => "PBE-SHA1-3DES",
            Pkcs8Cipher::PbeSha1Des2 => "PBE-SHA1-2DES",
            Pkcs8Cipher::PbeSha1Rc2Key128 => "PBE-SHA1-RC2-128",
            Pkcs8Cipher::PbeSha1Rc2Key40 => "PBE-SHA1-RC2-40",
        };
        f.write_str(name)
    }
}

enum PbeScheme {
    Pbes2(Pbes2Cipher),
    Legacy(LegacyPbe),
}

/// Block cipher of a PBES2 scheme. The KDF is always PBKDF2-HMAC-SHA256.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pbes2Cipher {
    Des3,
    Aes128,
    Aes192,
    Aes256,
}

/// Salt and IV for one PBES2 encryption; the parameters borrow from it.
pub(crate) struct Pbes2Material {
    salt: Vec<u8>,
    iv: [u8; 16],
    iterations: u32,
}

impl Pbes2Material {
    pub(crate) fn generate(ctx: &CryptoContext) -> Self {
        Self {
            salt: ctx.random_salt(),
            iv: ctx.random_array(),
            iterations: ctx.pbkdf2_iterations,
        }
    }

    pub(crate) fn parameters(&self, cipher: Pbes2Cipher) -> Result<pbes2::Parameters<'_>> {
        let kdf = pbes2::Pbkdf2Params::hmac_with_sha256(self.iterations, &self.salt)
            .map_err(|e| CaKitError::crypto("building PBKDF2 parameters", pkcs8::Error::from(e)))?;
        let encryption = match cipher {
            Pbes2Cipher::Aes128 => pbes2::EncryptionScheme::Aes128Cbc { iv: &self.iv },
            Pbes2Cipher::Aes192 => pbes2::EncryptionScheme::Aes192Cbc { iv: &self.iv },
            Pbes2Cipher::Aes256 => pbes2::EncryptionScheme::Aes256Cbc { iv: &self.iv },
            Pbes2Cipher::Des3 => {
                let iv: &[u8; 8] = self.iv[..8]
                    .try_into()
                    .map_err(|_| CaKitError::InvalidInput("DES3 IV length".to_string()))?;
                pbes2::EncryptionScheme::DesEde3Cbc { iv }
            }
        };
        Ok(pbes2::Parameters {
            kdf: kdf.into(),
            encryption,
        })
    }
}

/// The password-based schemes of PKCS#12 appendix C (`pbeWithSHAAnd...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LegacyPbe {
    Rc4Key128,
    Rc4Key40,
    Des3,
    Des2,
    Rc2Key128,
    Rc2Key40,
}

/// PKCS12PbeParams.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct LegacyPbeParams {
    salt: OctetString,
    iterations: u32,
}

impl LegacyPbe {
    const ALL: [LegacyPbe; 6] = [
        LegacyPbe::Rc4Key128,
        LegacyPbe::Rc4Key40,
        LegacyPbe::Des3,
        LegacyPbe::Des2,
        LegacyPbe::Rc2Key128,
        LegacyPbe::Rc2Key40,
    ];

    pub(crate) fn oid(self) -> ObjectIdentifier {
        match self {
            LegacyPbe::Rc4Key128 => ObjectIdentifier::new_unwrap("1.2.840.113549.1.12.1.1"),
            LegacyPbe::Rc4Key40 => ObjectIdentifier::new_unwrap("1.2.840.113549.1.12.1.2"),
            LegacyPbe::Des3 => ObjectIdentifier::new_unwrap("1.2.840.113549.1.12.1.3"),
            LegacyPbe::Des2 => ObjectIdentifier::new_unwrap("1.2.840.113549.1.12.1.4"),
            LegacyPbe::Rc2Key128 => ObjectIdentifier::new_unwrap("1.2.840.113549.1.12.1.5"),
            LegacyPbe::Rc2Key40 => ObjectIdentifier::new_unwrap("1.2.840.113549.1.12.1.6"),
        }
    }

    pub(crate) fn from_oid(oid: ObjectIdentifier) -> Option<Self> {
        Self::ALL.into_iter().find(|pbe| pbe.oid() == oid)
    }

    fn key_len(self) -> usize {
        match self {
            LegacyPbe::Rc4Key128 | LegacyPbe::Rc2Key128 | LegacyPbe::Des2 => 16,
            LegacyPbe::Rc4Key40 | LegacyPbe::Rc2Key40 => 5,
            LegacyPbe::Des3 => 24,
        }
    }

    fn is_stream(self) -> bool {
        matches!(self, LegacyPbe::Rc4Key128 | LegacyPbe::Rc4Key40)
    }

    /// Encrypts `plaintext` with a fresh salt and returns the algorithm
    /// identifier that describes it.
    pub(crate) fn encrypt(
        self,
        ctx: &CryptoContext,
        password: &str,
        plaintext: &[u8],
    ) -> Result<(AlgorithmIdentifierOwned, Vec<u8>)> {
        let params = LegacyPbeParams {
            salt: OctetString::new(ctx.random_salt())?,
            iterations: ctx.pkcs12_kdf_iterations,
        };
        let (key, iv) = self.derive(password, &params)?;
        let ciphertext = match self {
            LegacyPbe::Rc4Key128 | LegacyPbe::Rc4Key40 => self.rc4(&key, plaintext)?,
            LegacyPbe::Des3 => cbc::Encryptor::<des::TdesEde3>::new_from_slices(&key, &iv)
                .map_err(|_| invalid_key_len(self))?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            LegacyPbe::Des2 => cbc::Encryptor::<des::TdesEde2>::new_from_slices(&key, &iv)
                .map_err(|_| invalid_key_len(self))?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            LegacyPbe::Rc2Key128 | LegacyPbe::Rc2Key40 => {
                let rc2 = rc2::Rc2::new_with_eff_key_len(&key, key.len() * 8);
                cbc::Encryptor::<rc2::Rc2>::inner_iv_slice_init(rc2, &iv)
                    .map_err(|_| invalid_key_len(self))?
                    .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
            }
        };
        let algorithm = AlgorithmIdentifierOwned {
            oid: self.oid(),
            parameters: Some(Any::encode_from(&params)?),
        };
        Ok((algorithm, ciphertext))
    }

    pub(crate) fn decrypt(
        self,
        parameters: Option<&Any>,
        password: &str,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        let params: LegacyPbeParams = parameters
            .ok_or_else(|| CaKitError::DecodingError(format!("{self:?} parameters missing")))?
            .decode_as()?;
        let (key, iv) = self.derive(password, &params)?;
        let wrong_password =
            |_| CaKitError::DecodingError("wrong password or corrupt ciphertext".to_string());
        match self {
            LegacyPbe::Rc4Key128 | LegacyPbe::Rc4Key40 => self.rc4(&key, ciphertext),
            LegacyPbe::Des3 => cbc::Decryptor::<des::TdesEde3>::new_from_slices(&key, &iv)
                .map_err(|_| invalid_key_len(self))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(wrong_password),
            LegacyPbe::Des2 => cbc::Decryptor::<des::TdesEde2>::new_from_slices(&key, &iv)
                .map_err(|_| invalid_key_len(self))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(wrong_password),
            LegacyPbe::Rc2Key128 | LegacyPbe::Rc2Key40 => {
                let rc2 = rc2::Rc2::new_with_eff_key_len(&key, key.len() * 8);
                cbc::Decryptor::<rc2::Rc2>::inner_iv_slice_init(rc2, &iv)
                    .map_err(|_| invalid_key_len(self))?
                    .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                    .map_err(wrong_password)
            }
        }
    }

    fn derive(self, password: &str, params: &LegacyPbeParams) -> Result<(Vec<u8>, Vec<u8>)> {
        let rounds = i32::try_from(params.iterations).map_err(|_| {
            CaKitError::InvalidInput(format!("iteration count {} too large", params.iterations))
        })?;
        let salt = params.salt.as_bytes();
        let key = derive_key_utf8::<Sha1>(
            password,
            salt,
            Pkcs12KeyType::EncryptionKey,
            rounds,
            self.key_len(),
        )?;
        let iv = if self.is_stream() {
            Vec::new()
        } else {
            derive_key_utf8::<Sha1>(password, salt, Pkcs12KeyType::Iv, rounds, 8)?
        };
        Ok((key, iv))
    }

    fn rc4(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let mut out = data.to_vec();
        match self {
            LegacyPbe::Rc4Key40 => rc4::Rc4::<U5>::new_from_slice(key)
                .map_err(|_| invalid_key_len(self))?
                .apply_keystream(&mut out),
            _ => rc4::Rc4::<U16>::new_from_slice(key)
                .map_err(|_| invalid_key_len(self))?
                .apply_keystream(&mut out),
        }
        Ok(out)
    }
}

fn invalid_key_len(pbe: LegacyPbe) -> CaKitError {
    CaKitError::InvalidInput(format!("derived key does not fit {pbe:?}"))
}

/// `EncryptedPrivateKeyInfo` with an opaque algorithm, so that schemes the
/// `pkcs8` crate does not model can be carried too.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub(crate) struct EncryptedKeyInfo {
    pub algorithm: AlgorithmIdentifierOwned,
    pub data: OctetString,
}

/// Encrypts arbitrary content under PBES2, returning the algorithm identifier
/// to store next to the ciphertext.
pub(crate) fn pbes2_encrypt(
    ctx: &CryptoContext,
    cipher: Pbes2Cipher,
    password: &str,
    plaintext: &[u8],
) -> Result<(AlgorithmIdentifierOwned, Vec<u8>)> {
    let material = Pbes2Material::generate(ctx);
    let scheme = pkcs5::EncryptionScheme::from(material.parameters(cipher)?);
    let ciphertext = scheme
        .encrypt(password, plaintext)
        .map_err(|e| CaKitError::crypto(format!("encrypting with PBES2 {cipher:?}"), pkcs8::Error::from(e)))?;
    let algorithm = AlgorithmIdentifierOwned::from_der(&scheme.to_der()?)?;
    Ok((algorithm, ciphertext))
}

/// Decrypts content protected by PBES2 or one of the legacy PKCS#12 schemes.
pub(crate) fn decrypt_content(
    algorithm: &AlgorithmIdentifierOwned,
    password: &str,
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if algorithm.oid == pbes2::PBES2_OID {
        let encoded = algorithm.to_der()?;
        let scheme = pkcs5::EncryptionScheme::from_der(&encoded)?;
        return scheme
            .decrypt(password, ciphertext)
            .map_err(|e| CaKitError::crypto("decrypting PBES2 content", pkcs8::Error::from(e)));
    }
    let pbe = LegacyPbe::from_oid(algorithm.oid).ok_or_else(|| {
        CaKitError::InvalidInput(format!("unsupported encryption algorithm {}", algorithm.oid))
    })?;
    pbe.decrypt(algorithm.parameters.as_ref(), password, ciphertext)
}

/// Encrypts an unencrypted PKCS#8 document and returns `EncryptedPrivateKeyInfo` DER.
pub fn encrypt_private_key(
    ctx: &CryptoContext,
    pkcs8_der: &[u8],
    cipher: Pkcs8Cipher,
    password: &str,
) -> Result<Vec<u8>> {
    let der = match cipher.scheme() {
        PbeScheme::Pbes2(pbes2_cipher) => {
            let info = PrivateKeyInfo::try_from(pkcs8_der)?;
            let material = Pbes2Material::generate(ctx);
            let doc = info
                .encrypt_with_params(material.parameters(pbes2_cipher)?, password)
                .map_err(|e| CaKitError::crypto(format!("encrypting private key with {cipher}"), e))?;
            doc.as_bytes().to_vec()
        }
        PbeScheme::Legacy(pbe) => {
            let (algorithm, ciphertext) = pbe.encrypt(ctx, password, pkcs8_der)?;
            EncryptedKeyInfo {
                algorithm,
                data: OctetString::new(ciphertext)?,
            }
            .to_der()?
        }
    };
    tracing::debug!(%cipher, "private key encrypted");
    Ok(der)
}

/// Decrypts `EncryptedPrivateKeyInfo` DER produced with any supported scheme.
pub fn decrypt_private_key(encrypted_der: &[u8], password: &str) -> Result<SecretDocument> {
    let info = EncryptedKeyInfo::from_der(encrypted_der)?;
    if info.algorithm.oid == pbes2::PBES2_OID {
        return EncryptedPrivateKeyInfo::try_from(encrypted_der)?
            .decrypt(password)
            .map_err(|e| CaKitError::crypto("decrypting a PBES2 private key", e));
    }
    let plaintext = decrypt_content(&info.algorithm, password, info.data.as_bytes())?;
    Ok(SecretDocument::try_from(plaintext.as_slice())?)
}

/// Returns the unencrypted PKCS#8 DER in `data`.
///
/// `data` may be PEM or DER and may be encrypted; a password is required only
/// when it is.
pub fn private_key_der(data: &[u8], password: Option<&str>) -> Result<SecretDocument> {
    let der = if pem_utils::looks_like_pem(data) {
        let text = std::str::from_utf8(data)
            .map_err(|e| CaKitError::DecodingError(format!("PEM is not UTF-8: {e}")))?;
        let block = pem::parse(text)?;
        match block.tag() {
            PLAIN_PEM_LABEL | ENCRYPTED_PEM_LABEL => block.into_contents(),
            other => {
                return Err(CaKitError::DecodingError(format!(
                    "expected a private key PEM block, found '{other}'"
                )));
            }
        }
    } else {
        data.to_vec()
    };

    if PrivateKeyInfo::try_from(der.as_slice()).is_ok() {
        return Ok(SecretDocument::try_from(der.as_slice())?);
    }
    let password = password.ok_or_else(|| {
        CaKitError::InvalidInput("the private key is encrypted and no password was given".into())
    })?;
    decrypt_private_key(&der, password)
}

/// Imports a PKCS#8 private key in any of the forms the exporter writes.
pub fn import_private_key(data: &[u8], password: Option<&str>) -> Result<KeyPair> {
    let der = private_key_der(data, password)?;
    KeyPair::from_pkcs8_der(der.as_bytes())
}
