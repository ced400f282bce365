//! PKCS#12 keystores (RFC 7292).
//!
//! The writer produces two layouts. The legacy layout puts every certificate
//! into a single PBE-SHA1-3DES `EncryptedData`, shrouds the key with the same
//! scheme and protects the store with an HMAC-SHA1 MAC. The modern layout
//! encrypts each certificate separately under PBES2/AES, shrouds the key with
//! PBES2/AES and uses an HMAC-SHA256 MAC.

use cms::content_info::{CmsVersion, ContentInfo};
use cms::encrypted_data::EncryptedData;
use cms::enveloped_data::EncryptedContentInfo;
use const_oid::ObjectIdentifier;
use const_oid::db::rfc5911::{ID_DATA, ID_ENCRYPTED_DATA};
use const_oid::db::rfc5912::{ID_SHA_1, ID_SHA_256};
use der::asn1::{Any, Null, OctetString, SetOfVec};
use der::{Decode, Encode, Sequence};
use hmac::{Hmac, Mac};
use pkcs12::kdf::{Pkcs12KeyType, derive_key_utf8};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha256;
use x509_cert::attr::Attribute;
use x509_cert::spki::AlgorithmIdentifierOwned;

use super::pbe::{self, LegacyPbe, Pbes2Cipher};
use crate::cert::Certificate;
use crate::context::CryptoContext;
use crate::error::{CaKitError, Result};
use crate::key::KeyPair;

const KEY_BAG: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.12.10.1.1");
const SHROUDED_KEY_BAG: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.12.10.1.2");
const CERT_BAG: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.12.10.1.3");
const X509_CERTIFICATE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.22.1");
const LOCAL_KEY_ID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.21");

/// Cipher protecting a PKCS#12 keystore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pkcs12Cipher {
    /// Classic PBE-SHA1-3DES layout with an HMAC-SHA1 MAC.
    #[default]
    Des3,
    Aes128,
    Aes192,
    Aes256,
}

impl Pkcs12Cipher {
    fn pbes2(self) -> Option<Pbes2Cipher> {
        match self {
            Pkcs12Cipher::Des3 => None,
            Pkcs12Cipher::Aes128 => Some(Pbes2Cipher::Aes128),
            Pkcs12Cipher::Aes192 => Some(Pbes2Cipher::Aes192),
            Pkcs12Cipher::Aes256 => Some(Pbes2Cipher::Aes256),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct Pfx {
    version: u8,
    auth_safe: ContentInfo,
    mac_data: Option<MacData>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct MacData {
    mac: DigestInfo,
    mac_salt: OctetString,
    iterations: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct DigestInfo {
    algorithm: AlgorithmIdentifierOwned,
    digest: OctetString,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct SafeBag {
    bag_id: ObjectIdentifier,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT")]
    bag_value: Any,
    bag_attributes: Option<SetOfVec<Attribute>>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct CertBag {
    cert_id: ObjectIdentifier,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT")]
    cert_value: OctetString,
}

/// What a keystore holds, in bag order.
#[derive(Debug, Clone)]
pub struct Pkcs12Contents {
    pub certificates: Vec<Certificate>,
    pub key: Option<KeyPair>,
}

/// Builds a password-protected keystore holding `chain` and `key`.
pub fn build_pkcs12(
    ctx: &CryptoContext,
    chain: &[Certificate],
    key: &KeyPair,
    cipher: Pkcs12Cipher,
    password: &str,
) -> Result<Vec<u8>> {
    let leaf = chain
        .first()
        .ok_or_else(|| CaKitError::InvalidInput("keystore needs at least one certificate".into()))?;
    let local_key_id = <Sha1 as sha1::Digest>::digest(leaf.public_key_bits()).to_vec();
    let key_der = key.to_pkcs8_der()?;

    let mut auth_safe = Vec::new();
    match cipher.pbes2() {
        None => {
            let bags = chain
                .iter()
                .enumerate()
                .map(|(i, cert)| cert_bag(cert, (i == 0).then_some(local_key_id.as_slice())))
                .collect::<Result<Vec<_>>>()?;
            let (algorithm, ciphertext) =
                LegacyPbe::Des3.encrypt(ctx, password, &bags.to_der()?)?;
            auth_safe.push(encrypted_data(algorithm, ciphertext)?);

            let (algorithm, ciphertext) = LegacyPbe::Des3.encrypt(ctx, password, key_der.as_bytes())?;
            let shrouded = pbe::EncryptedKeyInfo {
                algorithm,
                data: OctetString::new(ciphertext)?,
            };
            auth_safe.push(data(vec![shrouded_key_bag(&shrouded, &local_key_id)?])?);
        }
        Some(pbes2_cipher) => {
            for (i, cert) in chain.iter().enumerate() {
                let bag = cert_bag(cert, (i == 0).then_some(local_key_id.as_slice()))?;
                let (algorithm, ciphertext) =
                    pbe::pbes2_encrypt(ctx, pbes2_cipher, password, &vec![bag].to_der()?)?;
                auth_safe.push(encrypted_data(algorithm, ciphertext)?);
            }
            let (algorithm, ciphertext) =
                pbe::pbes2_encrypt(ctx, pbes2_cipher, password, key_der.as_bytes())?;
            let shrouded = pbe::EncryptedKeyInfo {
                algorithm,
                data: OctetString::new(ciphertext)?,
            };
            auth_safe.push(data(vec![shrouded_key_bag(&shrouded, &local_key_id)?])?);
        }
    }

    let auth_safe_der = auth_safe.to_der()?;
    let mac_salt = ctx.random_salt();
    let mac_digest = match cipher {
        Pkcs12Cipher::Des3 => MacDigest::Sha1,
        _ => MacDigest::Sha256,
    };
    let mac = mac_digest.compute(password, &mac_salt, ctx.mac_iterations, &auth_safe_der)?;

    let pfx = Pfx {
        version: 3,
        auth_safe: ContentInfo {
            content_type: ID_DATA,
            content: Any::encode_from(&OctetString::new(auth_safe_der)?)?,
        },
        mac_data: Some(MacData {
            mac: DigestInfo {
                algorithm: AlgorithmIdentifierOwned {
                    oid: mac_digest.oid(),
                    parameters: Some(Any::encode_from(&Null)?),
                },
                digest: OctetString::new(mac)?,
            },
            mac_salt: OctetString::new(mac_salt)?,
            iterations: ctx.mac_iterations,
        }),
    };
    tracing::debug!(?cipher, certificates = chain.len(), "PKCS#12 keystore built");
    Ok(pfx.to_der()?)
}

/// Opens a keystore written by [`build_pkcs12`] or a compatible tool.
///
/// The MAC is checked before anything is decrypted.
pub fn parse_pkcs12(der: &[u8], password: &str) -> Result<Pkcs12Contents> {
    let pfx = Pfx::from_der(der)?;
    if pfx.auth_safe.content_type != ID_DATA {
        return Err(CaKitError::DecodingError(format!(
            "unsupported PKCS#12 integrity mode {}",
            pfx.auth_safe.content_type
        )));
    }
    let auth_safe_der: OctetString = pfx.auth_safe.content.decode_as()?;
    let auth_safe_der = auth_safe_der.as_bytes();

    if let Some(mac_data) = &pfx.mac_data {
        let digest = MacDigest::from_oid(mac_data.mac.algorithm.oid)?;
        let expected = digest.compute(
            password,
            mac_data.mac_salt.as_bytes(),
            mac_data.iterations,
            auth_safe_der,
        )?;
        if expected != mac_data.mac.digest.as_bytes() {
            return Err(CaKitError::InvalidInput(
                "PKCS#12 MAC mismatch: wrong password or corrupted keystore".to_string(),
            ));
        }
    }

    let mut contents = Pkcs12Contents {
        certificates: Vec::new(),
        key: None,
    };
    for info in Vec::<ContentInfo>::from_der(auth_safe_der)? {
        let safe_contents = match info.content_type {
            ID_DATA => info.content.decode_as::<OctetString>()?.as_bytes().to_vec(),
            ID_ENCRYPTED_DATA => {
                let encrypted: EncryptedData = info.content.decode_as()?;
                let enc = encrypted.enc_content_info;
                let ciphertext = enc.encrypted_content.ok_or_else(|| {
                    CaKitError::DecodingError("EncryptedData without content".to_string())
                })?;
                pbe::decrypt_content(&enc.content_enc_alg, password, ciphertext.as_bytes())?
            }
            other => {
                tracing::warn!(content_type = %other, "skipping unsupported PKCS#12 content");
                continue;
            }
        };
        for bag in Vec::<SafeBag>::from_der(&safe_contents)? {
            match bag.bag_id {
                CERT_BAG => {
                    let cert_bag: CertBag = bag.bag_value.decode_as()?;
                    if cert_bag.cert_id == X509_CERTIFICATE {
                        contents
                            .certificates
                            .push(Certificate::from_der(cert_bag.cert_value.as_bytes())?);
                    }
                }
                SHROUDED_KEY_BAG => {
                    let plain = pbe::decrypt_private_key(&bag.bag_value.to_der()?, password)?;
                    contents.key = Some(KeyPair::from_pkcs8_der(plain.as_bytes())?);
                }
                KEY_BAG => {
                    contents.key = Some(KeyPair::from_pkcs8_der(&bag.bag_value.to_der()?)?);
                }
                other => tracing::debug!(bag = %other, "ignoring PKCS#12 bag"),
            }
        }
    }
    Ok(contents)
}

fn local_key_id_attribute(local_key_id: &[u8]) -> Result<SetOfVec<Attribute>> {
    let attribute = Attribute {
        oid: LOCAL_KEY_ID,
        values: SetOfVec::try_from(vec![Any::encode_from(&OctetString::new(local_key_id)?)?])?,
    };
    Ok(SetOfVec::try_from(vec![attribute])?)
}

fn cert_bag(cert: &Certificate, local_key_id: Option<&[u8]>) -> Result<SafeBag> {
    let bag = CertBag {
        cert_id: X509_CERTIFICATE,
        cert_value: OctetString::new(cert.to_der()?)?,
    };
    Ok(SafeBag {
        bag_id: CERT_BAG,
        bag_value: Any::encode_from(&bag)?,
        bag_attributes: local_key_id.map(local_key_id_attribute).transpose()?,
    })
}

fn shrouded_key_bag(shrouded: &pbe::EncryptedKeyInfo, local_key_id: &[u8]) -> Result<SafeBag> {
    Ok(SafeBag {
        bag_id: SHROUDED_KEY_BAG,
        bag_value: Any::encode_from(shrouded)?,
        bag_attributes: Some(local_key_id_attribute(local_key_id)?),
    })
}

fn data(bags: Vec<SafeBag>) -> Result<ContentInfo> {
    Ok(ContentInfo {
        content_type: ID_DATA,
        content: Any::encode_from(&OctetString::new(bags.to_der()?)?)?,
    })
}

fn encrypted_data(algorithm: AlgorithmIdentifierOwned, ciphertext: Vec<u8>) -> Result<ContentInfo> {
    let encrypted = EncryptedData {
        version: CmsVersion::V0,
        enc_content_info: EncryptedContentInfo {
            content_type: ID_DATA,
            content_enc_alg: algorithm,
            encrypted_content: Some(OctetString::new(ciphertext)?),
        },
        unprotected_attrs: None,
    };
    Ok(ContentInfo {
        content_type: ID_ENCRYPTED_DATA,
        content: Any::encode_from(&encrypted)?,
    })
}

#[derive(Debug, Clone, Copy)]
enum MacDigest {
    Sha1,
    Sha256,
}

impl MacDigest {
    fn oid(self) -> ObjectIdentifier {
        match self {
            MacDigest::Sha1 => ID_SHA_1,
            MacDigest::Sha256 => ID_SHA_256,
        }
    }

    fn from_oid(oid: ObjectIdentifier) -> Result<Self> {
        match oid {
            ID_SHA_1 => Ok(MacDigest::Sha1),
            ID_SHA_256 => Ok(MacDigest::Sha256),
            other => Err(CaKitError::InvalidInput(format!(
                "unsupported PKCS#12 MAC digest {other}"
            ))),
        }
    }

    /// HMAC over `data` keyed with the PKCS#12 KDF (ID 3).
    fn compute(self, password: &str, salt: &[u8], iterations: u32, data: &[u8]) -> Result<Vec<u8>> {
        let rounds = i32::try_from(iterations)
            .map_err(|_| CaKitError::InvalidInput(format!("MAC iteration count {iterations}")))?;
        let bad_key = |_| CaKitError::InvalidInput("MAC key length".to_string());
        let mac = match self {
            MacDigest::Sha1 => {
                let key = derive_key_utf8::<Sha1>(password, salt, Pkcs12KeyType::Mac, rounds, 20)?;
                let mut mac = Hmac::<Sha1>::new_from_slice(&key).map_err(bad_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            MacDigest::Sha256 => {
                let key =
                    derive_key_utf8::<Sha256>(password, salt, Pkcs12KeyType::Mac, rounds, 32)?;
                let mut mac = Hmac::<Sha256>::new_from_slice(&key).map_err(bad_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        };
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::params::{DistinguishedName, Validity};
    use crate::request::InMemoryRequest;

    fn identity(cn: &str) -> (Certificate, KeyPair) {
        let key = KeyPair::generate_ecdsa_p256();
        let request = InMemoryRequest::builder()
            .subject(DistinguishedName {
                common_name: cn.to_string(),
                ..Default::default()
            })
            .key_algorithm(crate::key::KeyAlgorithm::EcdsaP256)
            .ca(true)
            .build();
        let cert = Certificate::new_self_signed(&request, &key, Validity::for_days(10)).unwrap();
        (cert, key)
    }

    fn fast_ctx() -> CryptoContext {
        CryptoContext::builder()
            .pbkdf2_iterations(64)
            .pkcs12_kdf_iterations(64)
            .mac_iterations(64)
            .build()
    }

    #[test]
    fn test_every_cipher_keeps_the_whole_chain() {
        let (leaf, key) = identity("Leaf");
        let (root, _) = identity("Root");
        let chain = vec![leaf.clone(), root.clone()];
        for cipher in [
            Pkcs12Cipher::Des3,
            Pkcs12Cipher::Aes128,
            Pkcs12Cipher::Aes192,
            Pkcs12Cipher::Aes256,
        ] {
            let der = build_pkcs12(&fast_ctx(), &chain, &key, cipher, "changeit").unwrap();
            let contents = parse_pkcs12(&der, "changeit").unwrap();
            assert_eq!(contents.certificates, chain, "{cipher:?}");
            assert_eq!(contents.key.unwrap().public_key(), key.public_key());
        }
    }

    #[test]
    fn test_wrong_password_fails_mac_check() {
        let (cert, key) = identity("Leaf");
        let der = build_pkcs12(&fast_ctx(), &[cert], &key, Pkcs12Cipher::Aes256, "a").unwrap();
        let err = parse_pkcs12(&der, "b").unwrap_err();
        assert!(matches!(err, CaKitError::InvalidInput(_)));
    }

    #[test]
    fn test_modern_layout_has_one_encrypted_data_per_certificate() {
        let (leaf, key) = identity("Leaf");
        let (root, _) = identity("Root");
        let der = build_pkcs12(&fast_ctx(), &[leaf, root], &key, Pkcs12Cipher::Aes128, "x").unwrap();
        let pfx = Pfx::from_der(&der).unwrap();
        let auth: OctetString = pfx.auth_safe.content.decode_as().unwrap();
        let infos = Vec::<ContentInfo>::from_der(auth.as_bytes()).unwrap();
        let types: Vec<_> = infos.iter().map(|i| i.content_type).collect();
        assert_eq!(types, vec![ID_ENCRYPTED_DATA, ID_ENCRYPTED_DATA, ID_DATA]);
        assert_eq!(pfx.mac_data.unwrap().mac.algorithm.oid, ID_SHA_256);
    }
}
