mod util;

use cakit::credential::export::{Encoding, ExportFormat, ExportOptions, export};
use cakit::credential::pbe::{self, Pkcs8Cipher};
use cakit::credential::pkcs12::Pkcs12Cipher;
use cakit::credential::CredentialBundle;
use cakit::key::KeyPair;
use openssl::pkey::PKey;
use openssl::symm::Cipher;

const PASSWORD: &str = "openssl-interop";

fn exported(bundle: &CredentialBundle, format: ExportFormat) -> Vec<u8> {
    let options = ExportOptions::builder()
        .format(format)
        .password(PASSWORD)
        .build();
    export(&util::fast_context(), bundle, &options).unwrap()
}

fn rsa_bundle() -> CredentialBundle {
    let (cert, key) = util::rsa_ca("OpenSSL Interop CA");
    util::bundle_for(cert, key)
}

#[test]
fn test_openssl_reads_pkcs12() {
    let bundle = rsa_bundle();
    let expected_cert = bundle.certificate().to_der().unwrap();

    for cipher in [Pkcs12Cipher::Des3, Pkcs12Cipher::Aes128, Pkcs12Cipher::Aes256] {
        let der = exported(&bundle, ExportFormat::Pkcs12 { cipher });
        let parsed = openssl::pkcs12::Pkcs12::from_der(&der)
            .unwrap()
            .parse2(PASSWORD)
            .unwrap_or_else(|e| panic!("OpenSSL rejected {cipher:?} keystore: {e}"));

        let cert = parsed.cert.expect("leaf certificate");
        assert_eq!(cert.to_der().unwrap(), expected_cert, "{cipher:?}");
        let pkey = parsed.pkey.expect("private key");
        assert!(cert.public_key().unwrap().public_eq(&pkey), "{cipher:?}");
    }
}

#[test]
fn test_openssl_rejects_wrong_pkcs12_password() {
    let der = exported(&rsa_bundle(), ExportFormat::Pkcs12 { cipher: Pkcs12Cipher::Aes256 });
    let pkcs12 = openssl::pkcs12::Pkcs12::from_der(&der).unwrap();
    assert!(pkcs12.parse2("not the password").is_err());
}

#[test]
fn test_openssl_reads_encrypted_pkcs8() {
    let key = KeyPair::generate_ecdsa_p256();
    let expected = PKey::public_key_from_der(&key.public_key().to_der().unwrap()).unwrap();
    let bundle = util::bundle_for(util::self_signed("PKCS8 Interop", &key), key);

    for cipher in [
        Pkcs8Cipher::Des3Cbc,
        Pkcs8Cipher::Aes128Cbc,
        Pkcs8Cipher::Aes192Cbc,
        Pkcs8Cipher::Aes256Cbc,
        Pkcs8Cipher::PbeSha1Des3,
    ] {
        let der = exported(
            &bundle,
            ExportFormat::PrivateKey {
                encoding: Encoding::Der,
                cipher: Some(cipher),
            },
        );
        let pkey = PKey::private_key_from_pkcs8_passphrase(&der, PASSWORD.as_bytes())
            .unwrap_or_else(|e| panic!("OpenSSL rejected {cipher}: {e}"));
        assert!(pkey.public_eq(&expected), "{cipher}");
    }
}

#[test]
fn test_imports_openssl_encrypted_pkcs8() {
    let rsa = openssl::rsa::Rsa::generate(2048).unwrap();
    let pkey = PKey::from_rsa(rsa).unwrap();
    let pem = pkey
        .private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), PASSWORD.as_bytes())
        .unwrap();

    let imported = pbe::import_private_key(&pem, Some(PASSWORD)).unwrap();
    let expected = pkey.public_key_to_der().unwrap();
    assert_eq!(imported.public_key().to_der().unwrap(), expected);
}

#[test]
fn test_openssl_reads_pkcs7_chain() {
    let bundle = rsa_bundle();
    let der = exported(&bundle, ExportFormat::Chain { encoding: Encoding::Der });
    let pkcs7 = openssl::pkcs7::Pkcs7::from_der(&der).unwrap();

    let pem = pkcs7.to_pem().unwrap();
    assert!(String::from_utf8(pem).unwrap().starts_with("-----BEGIN PKCS7-----"));
}

#[test]
fn test_openssl_reads_certificate_and_public_key() {
    let bundle = rsa_bundle();
    let cert_pem = exported(&bundle, ExportFormat::Certificate { encoding: Encoding::Pem });
    let cert = openssl::x509::X509::from_pem(&cert_pem).unwrap();

    let key_pem = exported(&bundle, ExportFormat::PublicKey { encoding: Encoding::Pem });
    let public_key = PKey::public_key_from_pem(&key_pem).unwrap();
    assert!(cert.public_key().unwrap().public_eq(&public_key));
    assert!(cert.verify(&public_key).unwrap());
}
