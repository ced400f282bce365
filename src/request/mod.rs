//! Certificate request representations.
//!
//! A request reaches the CA in one of three shapes: built in memory, submitted
//! from outside as PKCS#10, or loaded from a template on disk. All three
//! implement [`RequestCapability`]; [`CertificateRequestModel`] is the closed
//! set a CA collaborator stores and dispatches on.

pub mod pkcs10;
pub mod template;

use bon::Builder;
use der::flagset::FlagSet;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::cert::extensions::{
    AltName, BasicConstraints, CrlDistributionPoints, ExtendedKeyUsage, ExtendedKeyUsageOption,
    KeyUsage, KeyUsages, SubjectAltName, SubjectKeyIdentifier, ToAndFromX509Extension,
};
use crate::cert::params::{DistinguishedName, ExtensionParam};
use crate::error::Result;
use crate::key::KeyAlgorithm;

pub use pkcs10::SubmittedRequest;
pub use template::RequestTemplate;

/// CRL distribution point settings as entered by an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrlDistributionConfig {
    pub url: String,
    /// RFC 4514 name of the CRL issuer, when it differs from the CA.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_name: Option<String>,
}

/// Outcome of building the CRL distribution point extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrlDistribution {
    /// The request is not a CA request or carries no CRL configuration.
    NotRequested,
    /// Configuration is present but cannot be turned into an extension.
    Unavailable(String),
    Present(CrlDistributionPoints),
}

impl CrlDistribution {
    /// Evaluates CRL settings. Only CA requests publish a distribution point.
    pub fn evaluate(ca: bool, config: Option<&CrlDistributionConfig>) -> Self {
        let Some(config) = config.filter(|_| ca) else {
            return CrlDistribution::NotRequested;
        };
        let url = config.url.trim();
        if url.is_empty() || !url.contains("://") {
            return CrlDistribution::Unavailable(format!("'{url}' is not an absolute URL"));
        }
        let crl_issuer = match config.issuer_name.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(name) => match DistinguishedName::parse_rfc4514(name) {
                Ok(dn) => Some(dn),
                Err(e) => return CrlDistribution::Unavailable(e.to_string()),
            },
        };
        let points = CrlDistributionPoints {
            url: url.to_string(),
            crl_issuer,
        };
        match points.to_x509_extension_value() {
            Ok(_) => CrlDistribution::Present(points),
            Err(e) => CrlDistribution::Unavailable(e.to_string()),
        }
    }

    pub fn present(&self) -> Option<&CrlDistributionPoints> {
        match self {
            CrlDistribution::Present(points) => Some(points),
            _ => None,
        }
    }
}

/// Accessors shared by every request variant.
pub trait RequestCapability {
    fn subject(&self) -> DistinguishedName;
    fn key_algorithm(&self) -> KeyAlgorithm;
    fn key_usage(&self) -> KeyUsage;
    fn extended_key_usage(&self) -> Vec<ExtendedKeyUsageOption>;
    fn subject_alt_names(&self) -> Vec<AltName>;
    fn is_ca(&self) -> bool;
    fn crl_distribution_point(&self) -> CrlDistribution;
    fn description(&self) -> Option<String>;
    fn created_at(&self) -> OffsetDateTime;
}

/// A request assembled in memory, mutable until it is signed or templated.
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct InMemoryRequest {
    pub subject: DistinguishedName,
    #[builder(default = KeyAlgorithm::Rsa { bits: 2048 })]
    pub key_algorithm: KeyAlgorithm,
    #[builder(default)]
    pub key_usage: KeyUsage,
    #[builder(default)]
    pub extended_key_usage: Vec<ExtendedKeyUsageOption>,
    #[builder(default)]
    pub subject_alt_names: Vec<AltName>,
    #[builder(default)]
    pub ca: bool,
    pub crl_distribution: Option<CrlDistributionConfig>,
    pub description: Option<String>,
    #[builder(default = OffsetDateTime::now_utc())]
    pub created_at: OffsetDateTime,
    /// Extensions this crate does not model, carried through unchanged.
    #[builder(default)]
    pub custom_extensions: Vec<ExtensionParam>,
}

impl InMemoryRequest {
    /// X.509 extensions this request asks for.
    pub fn extensions(&self) -> Result<Vec<ExtensionParam>> {
        let mut extensions = vec![ExtensionParam::from_extension(
            &BasicConstraints {
                is_ca: self.ca,
                max_path_length: None,
            },
            true,
        )?];

        let mut key_usage_flags: FlagSet<KeyUsages> = self.key_usage.0;
        if self.ca {
            key_usage_flags |= KeyUsages::KeyCertSign;
            key_usage_flags |= KeyUsages::CRLSign;
        }
        if !key_usage_flags.is_empty() {
            extensions.push(ExtensionParam::from_extension(
                &KeyUsage(key_usage_flags),
                true,
            )?);
        }

        if !self.extended_key_usage.is_empty() {
            extensions.push(ExtensionParam::from_extension(
                &ExtendedKeyUsage {
                    usage: self.extended_key_usage.clone(),
                },
                false,
            )?);
        }

        if !self.subject_alt_names.is_empty() {
            extensions.push(ExtensionParam::from_extension(
                &SubjectAltName {
                    names: self.subject_alt_names.clone(),
                },
                false,
            )?);
        }

        match self.crl_distribution_point() {
            CrlDistribution::Present(points) => {
                extensions.push(ExtensionParam::from_extension(&points, false)?);
            }
            CrlDistribution::Unavailable(reason) => {
                tracing::warn!(subject = %self.subject, %reason, "CRL distribution point left out");
            }
            CrlDistribution::NotRequested => {}
        }

        extensions.extend(self.custom_extensions.iter().cloned());
        Ok(extensions)
    }

    /// Rebuilds a request from a subject, key algorithm and a list of encoded extensions.
    ///
    /// Key usage bits implied by the CA flag are kept in `key_usage`; subject key
    /// identifiers are dropped because they are recomputed at signing time.
    pub fn from_parts(
        subject: DistinguishedName,
        key_algorithm: KeyAlgorithm,
        extensions: &[ExtensionParam],
    ) -> Result<Self> {
        let mut request = InMemoryRequest::builder()
            .subject(subject)
            .key_algorithm(key_algorithm)
            .build();

        for ext in extensions {
            match ext.oid {
                oid if oid == BasicConstraints::OID => {
                    request.ca = ext.to_extension::<BasicConstraints>()?.is_ca;
                }
                oid if oid == KeyUsage::OID => request.key_usage = ext.to_extension()?,
                oid if oid == ExtendedKeyUsage::OID => {
                    request.extended_key_usage = ext.to_extension::<ExtendedKeyUsage>()?.usage;
                }
                oid if oid == SubjectAltName::OID => {
                    request.subject_alt_names = ext.to_extension::<SubjectAltName>()?.names;
                }
                oid if oid == CrlDistributionPoints::OID => {
                    let points = ext.to_extension::<CrlDistributionPoints>()?;
                    request.crl_distribution = Some(CrlDistributionConfig {
                        url: points.url,
                        issuer_name: points.crl_issuer.map(|dn| dn.to_string()),
                    });
                }
                oid if oid == SubjectKeyIdentifier::OID => {}
                _ => request.custom_extensions.push(ext.clone()),
            }
        }
        Ok(request)
    }

    /// Converts the request into a storable template.
    pub fn to_template(&self, name: impl Into<String>) -> RequestTemplate {
        RequestTemplate::from_request(name, self)
    }
}

impl RequestCapability for InMemoryRequest {
    fn subject(&self) -> DistinguishedName {
        self.subject.clone()
    }

    fn key_algorithm(&self) -> KeyAlgorithm {
        self.key_algorithm
    }

    fn key_usage(&self) -> KeyUsage {
        self.key_usage
    }

    fn extended_key_usage(&self) -> Vec<ExtendedKeyUsageOption> {
        self.extended_key_usage.clone()
    }

    fn subject_alt_names(&self) -> Vec<AltName> {
        self.subject_alt_names.clone()
    }

    fn is_ca(&self) -> bool {
        self.ca
    }

    fn crl_distribution_point(&self) -> CrlDistribution {
        CrlDistribution::evaluate(self.ca, self.crl_distribution.as_ref())
    }

    fn description(&self) -> Option<String> {
        self.description.clone()
    }

    fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }
}

/// The closed set of request variants.
#[derive(Debug, Clone)]
pub enum CertificateRequestModel {
    InMemory(InMemoryRequest),
    Submitted(SubmittedRequest),
    Template(RequestTemplate),
}

impl CertificateRequestModel {
    fn capability(&self) -> &dyn RequestCapability {
        match self {
            CertificateRequestModel::InMemory(request) => request,
            CertificateRequestModel::Submitted(request) => request,
            CertificateRequestModel::Template(template) => template,
        }
    }

    /// Maps any variant onto an in-memory request.
    pub fn to_in_memory(&self) -> InMemoryRequest {
        match self {
            CertificateRequestModel::InMemory(request) => request.clone(),
            CertificateRequestModel::Submitted(request) => request.to_request(),
            CertificateRequestModel::Template(template) => template.to_request(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CertificateRequestModel::InMemory(_) => "in-memory",
            CertificateRequestModel::Submitted(_) => "pkcs10",
            CertificateRequestModel::Template(_) => "template",
        }
    }
}

impl RequestCapability for CertificateRequestModel {
    fn subject(&self) -> DistinguishedName {
        self.capability().subject()
    }

    fn key_algorithm(&self) -> KeyAlgorithm {
        self.capability().key_algorithm()
    }

    fn key_usage(&self) -> KeyUsage {
        self.capability().key_usage()
    }

    fn extended_key_usage(&self) -> Vec<ExtendedKeyUsageOption> {
        self.capability().extended_key_usage()
    }

    fn subject_alt_names(&self) -> Vec<AltName> {
        self.capability().subject_alt_names()
    }

    fn is_ca(&self) -> bool {
        self.capability().is_ca()
    }

    fn crl_distribution_point(&self) -> CrlDistribution {
        self.capability().crl_distribution_point()
    }

    fn description(&self) -> Option<String> {
        self.capability().description()
    }

    fn created_at(&self) -> OffsetDateTime {
        self.capability().created_at()
    }
}

impl From<InMemoryRequest> for CertificateRequestModel {
    fn from(value: InMemoryRequest) -> Self {
        CertificateRequestModel::InMemory(value)
    }
}

impl From<SubmittedRequest> for CertificateRequestModel {
    fn from(value: SubmittedRequest) -> Self {
        CertificateRequestModel::Submitted(value)
    }
}

impl From<RequestTemplate> for CertificateRequestModel {
    fn from(value: RequestTemplate) -> Self {
        CertificateRequestModel::Template(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ca_request() -> InMemoryRequest {
        InMemoryRequest::builder()
            .subject(DistinguishedName {
                common_name: "Issuing CA".to_string(),
                ..Default::default()
            })
            .ca(true)
            .crl_distribution(CrlDistributionConfig {
                url: "http://crl.example.com/ca.crl".to_string(),
                issuer_name: Some("CN=Issuing CA,O=Example".to_string()),
            })
            .build()
    }

    #[test]
    fn test_crl_distribution_requires_ca_flag() {
        let mut request = ca_request();
        assert!(request.crl_distribution_point().present().is_some());
        request.ca = false;
        assert_eq!(request.crl_distribution_point(), CrlDistribution::NotRequested);
    }

    #[test]
    fn test_crl_distribution_unavailable_is_distinct_from_not_requested() {
        let outcome = CrlDistribution::evaluate(
            true,
            Some(&CrlDistributionConfig {
                url: "crl.example.com".to_string(),
                issuer_name: None,
            }),
        );
        assert!(matches!(outcome, CrlDistribution::Unavailable(_)));
        assert_eq!(CrlDistribution::evaluate(true, None), CrlDistribution::NotRequested);
    }

    #[test]
    fn test_extensions_round_trip_through_from_parts() {
        let mut request = ca_request();
        request.extended_key_usage = vec![ExtendedKeyUsageOption::OcspSigning];
        request.subject_alt_names = vec![AltName::Uri("https://ca.example.com".to_string())];
        let extensions = request.extensions().unwrap();
        let rebuilt =
            InMemoryRequest::from_parts(request.subject.clone(), request.key_algorithm, &extensions)
                .unwrap();
        assert!(rebuilt.ca);
        assert!(rebuilt.key_usage.contains(KeyUsages::KeyCertSign));
        assert_eq!(rebuilt.extended_key_usage, request.extended_key_usage);
        assert_eq!(rebuilt.subject_alt_names, request.subject_alt_names);
        assert_eq!(
            rebuilt.crl_distribution.map(|c| c.url),
            Some("http://crl.example.com/ca.crl".to_string())
        );
    }

    #[test]
    fn test_model_dispatches_to_variant() {
        let model = CertificateRequestModel::from(ca_request());
        assert_eq!(model.kind(), "in-memory");
        assert!(model.is_ca());
        assert_eq!(model.subject().common_name, "Issuing CA");
        let template = CertificateRequestModel::from(ca_request().to_template("ca"));
        assert_eq!(template.kind(), "template");
        assert_eq!(template.to_in_memory().subject, model.subject());
    }
}
