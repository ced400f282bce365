use cakit::backup::{self, Datastore, ProgressSink};
use cakit::cert::Certificate;
use cakit::cert::params::{DistinguishedName, Validity};
use cakit::context::CryptoContext;
use cakit::credential::export::{Encoding, ExportFormat, ExportOptions, export_to_file};
use cakit::credential::pbe::Pkcs8Cipher;
use cakit::credential::{CandidateKey, validator};
use cakit::key::KeyPair;
use cakit::request::InMemoryRequest;

struct PrintProgress;

impl ProgressSink for PrintProgress {
    fn on_progress(&self, percent: u8, item: &str) {
        println!("{percent:>3}% {item}");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let workdir = std::env::temp_dir().join(format!("cakit-demo-{}", uuid::Uuid::new_v4()));
    let id = uuid::Uuid::new_v4();
    let root = workdir.join("datastore").join(id.to_string());
    std::fs::create_dir_all(&root)?;

    // A fresh CA identity, written the way a datastore keeps it.
    let ctx = CryptoContext::default();
    let key = KeyPair::generate_ecdsa_p256();
    let request = InMemoryRequest::builder()
        .subject(DistinguishedName {
            common_name: "Demo Root CA".to_string(),
            ..Default::default()
        })
        .key_algorithm(key.algorithm())
        .ca(true)
        .build();
    let cert = Certificate::new_self_signed(&request, &key, Validity::for_days(3650))?;
    let bundle = validator::validate_pair(&ctx, cert, CandidateKey::from_key_pair(key)?)?;

    export_to_file(
        &ctx,
        &bundle,
        &ExportOptions::builder()
            .format(ExportFormat::Certificate { encoding: Encoding::Pem })
            .build(),
        &root.join("ca_cert.pem"),
    )?;
    export_to_file(
        &ctx,
        &bundle,
        &ExportOptions::builder()
            .format(ExportFormat::PrivateKey {
                encoding: Encoding::Pem,
                cipher: Some(Pkcs8Cipher::Aes256Cbc),
            })
            .password("demo")
            .build(),
        &root.join("ca_key.p8"),
    )?;
    std::fs::create_dir_all(root.join("template"))?;
    request.to_template("default").save(&root.join("template").join("default.json"))?;

    let datastore = Datastore::builder()
        .root(root)
        .id(id)
        .description("Demo CA")
        .build();
    let archive = workdir.join("demo-ca.zip");
    let manifest = backup::backup(&datastore, &archive, &PrintProgress)?;
    println!(
        "archived {} files ({} bytes) into {}",
        manifest.entries.len(),
        manifest.total_bytes(),
        archive.display()
    );

    let base = backup::restore(&archive, &workdir.join("restored"), &PrintProgress)?;
    let restored = validator::load(
        &ctx,
        &base.join("ca_cert.pem"),
        &base.join("ca_key.p8"),
        Some("demo"),
    )?;
    println!(
        "restored {} into {}",
        restored.certificate().subject().common_name,
        base.display()
    );

    std::fs::remove_dir_all(&workdir)?;
    Ok(())
}
