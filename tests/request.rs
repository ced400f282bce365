use cakit::cert::extensions::{AltName, ExtendedKeyUsageOption};
use cakit::cert::params::DistinguishedName;
use cakit::error::CaKitError;
use cakit::key::{KeyAlgorithm, KeyPair};
use cakit::request::{
    CertificateRequestModel, CrlDistribution, CrlDistributionConfig, InMemoryRequest,
    RequestCapability, RequestTemplate, SubmittedRequest,
};

pub type Result<T> = std::result::Result<T, CaKitError>;

fn issuing_ca_request() -> InMemoryRequest {
    InMemoryRequest::builder()
        .subject(
            DistinguishedName::builder()
                .common_name("Issuing CA".to_string())
                .organization("Example".to_string())
                .country("DE".to_string())
                .build(),
        )
        .key_algorithm(KeyAlgorithm::EcdsaP256)
        .ca(true)
        .extended_key_usage(vec![ExtendedKeyUsageOption::OcspSigning])
        .subject_alt_names(vec![AltName::Uri("https://ca.example.com".to_string())])
        .crl_distribution(CrlDistributionConfig {
            url: "http://crl.example.com/issuing.crl".to_string(),
            issuer_name: None,
        })
        .description("issuing CA of the example hierarchy".to_string())
        .build()
}

fn assert_same_facet(model: &impl RequestCapability, original: &InMemoryRequest) {
    assert_eq!(model.subject(), original.subject);
    assert_eq!(model.key_algorithm(), original.key_algorithm);
    assert!(model.is_ca());
    assert_eq!(model.extended_key_usage(), original.extended_key_usage);
    assert_eq!(model.subject_alt_names(), original.subject_alt_names);
    assert_eq!(
        model.crl_distribution_point().present().map(|p| p.url.clone()),
        Some("http://crl.example.com/issuing.crl".to_string())
    );
}

/// Every request shape reports the same attributes through the shared trait.
#[test]
fn test_all_variants_share_one_capability() -> Result<()> {
    let original = issuing_ca_request();
    let key = KeyPair::generate(original.key_algorithm)?;

    let submitted = SubmittedRequest::from_pem(&SubmittedRequest::create(&original, &key)?.to_pem()?)?;
    let template = original.to_template("issuing");

    let models: Vec<CertificateRequestModel> = vec![
        original.clone().into(),
        submitted.into(),
        template.into(),
    ];
    for model in &models {
        assert_same_facet(model, &original);
    }
    assert_eq!(
        models.iter().map(|m| m.kind()).collect::<Vec<_>>(),
        vec!["in-memory", "pkcs10", "template"]
    );
    Ok(())
}

#[test]
fn test_template_survives_disk() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("issuing.json");
    let original = issuing_ca_request();

    original.to_template("issuing").save(&path)?;
    let loaded = RequestTemplate::load(&path)?;
    assert_eq!(loaded.name, "issuing");
    assert_eq!(loaded.description(), original.description);
    assert_same_facet(&loaded, &original);

    let instantiated = loaded.to_request();
    assert!(instantiated.created_at >= original.created_at);
    Ok(())
}

#[test]
fn test_self_signed_certificate_keeps_the_request() -> Result<()> {
    let original = issuing_ca_request();
    let key = KeyPair::generate(original.key_algorithm)?;
    let cert = cakit::cert::Certificate::new_self_signed(
        &original,
        &key,
        cakit::cert::params::Validity::for_days(365),
    )?;

    assert!(cert.is_ca());
    let recovered = cert.to_request()?;
    assert_same_facet(&recovered, &original);
    Ok(())
}

#[test]
fn test_crl_settings_of_a_leaf_are_not_requested() {
    let mut request = issuing_ca_request();
    request.ca = false;
    assert_eq!(request.crl_distribution_point(), CrlDistribution::NotRequested);
    let extensions = request.extensions().unwrap();
    assert!(
        extensions
            .iter()
            .all(|e| e.oid.to_string() != "2.5.29.31")
    );
}
