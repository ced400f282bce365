use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use const_oid::ObjectIdentifier;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{CrlDistribution, CrlDistributionConfig, InMemoryRequest, RequestCapability};
use crate::cert::extensions::{AltName, ExtendedKeyUsageOption, KeyUsage};
use crate::cert::params::{DistinguishedName, ExtensionParam};
use crate::error::{CaKitError, Result};
use crate::key::KeyAlgorithm;

/// Current on-disk template schema.
pub const TEMPLATE_SCHEMA_VERSION: u32 = 1;

/// A reusable request stored as JSON. Dates are RFC 3339 strings, enumerations
/// are written by name and opaque extension values are base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTemplate {
    pub schema_version: u32,
    pub name: String,
    pub subject: DistinguishedName,
    pub key_algorithm: KeyAlgorithm,
    #[serde(default)]
    pub key_usage: KeyUsage,
    #[serde(default)]
    pub extended_key_usage: Vec<ExtendedKeyUsageOption>,
    #[serde(default)]
    pub subject_alt_names: Vec<AltName>,
    #[serde(default)]
    pub ca: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crl_distribution: Option<CrlDistributionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_extensions: Vec<StoredExtension>,
}

/// An extension the template stores verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredExtension {
    pub oid: String,
    pub critical: bool,
    /// Base64 of the DER extension value.
    pub value: String,
}

impl StoredExtension {
    fn from_param(ext: &ExtensionParam) -> Self {
        Self {
            oid: ext.oid.to_string(),
            critical: ext.critical,
            value: BASE64.encode(&ext.value),
        }
    }

    fn to_param(&self) -> Result<ExtensionParam> {
        let oid = ObjectIdentifier::new(&self.oid)
            .map_err(|e| CaKitError::DecodingError(format!("extension OID '{}': {e}", self.oid)))?;
        let value = BASE64
            .decode(&self.value)
            .map_err(|e| CaKitError::DecodingError(format!("extension {oid} value: {e}")))?;
        Ok(ExtensionParam {
            oid,
            critical: self.critical,
            value,
        })
    }
}

impl RequestTemplate {
    pub fn from_request(name: impl Into<String>, request: &InMemoryRequest) -> Self {
        Self {
            schema_version: TEMPLATE_SCHEMA_VERSION,
            name: name.into(),
            subject: request.subject.clone(),
            key_algorithm: request.key_algorithm,
            key_usage: request.key_usage,
            extended_key_usage: request.extended_key_usage.clone(),
            subject_alt_names: request.subject_alt_names.clone(),
            ca: request.ca,
            crl_distribution: request.crl_distribution.clone(),
            description: request.description.clone(),
            created_at: request.created_at,
            custom_extensions: request
                .custom_extensions
                .iter()
                .map(StoredExtension::from_param)
                .collect(),
        }
    }

    /// Instantiates a fresh request from the template.
    ///
    /// Stored extensions that fail to decode are skipped with a warning;
    /// [`RequestTemplate::from_json`] already rejects them on load.
    pub fn to_request(&self) -> InMemoryRequest {
        let custom_extensions = self
            .custom_extensions
            .iter()
            .filter_map(|ext| match ext.to_param() {
                Ok(param) => Some(param),
                Err(e) => {
                    tracing::warn!(template = %self.name, error = %e, "skipping stored extension");
                    None
                }
            })
            .collect();
        InMemoryRequest {
            subject: self.subject.clone(),
            key_algorithm: self.key_algorithm,
            key_usage: self.key_usage,
            extended_key_usage: self.extended_key_usage.clone(),
            subject_alt_names: self.subject_alt_names.clone(),
            ca: self.ca,
            crl_distribution: self.crl_distribution.clone(),
            description: self.description.clone(),
            created_at: OffsetDateTime::now_utc(),
            custom_extensions,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| CaKitError::EncodingError(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let template: RequestTemplate =
            serde_json::from_str(json).map_err(|e| CaKitError::DecodingError(e.to_string()))?;
        if template.schema_version == 0 || template.schema_version > TEMPLATE_SCHEMA_VERSION {
            return Err(CaKitError::DecodingError(format!(
                "unsupported template schema version {}",
                template.schema_version
            )));
        }
        for ext in &template.custom_extensions {
            ext.to_param()?;
        }
        Ok(template)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)
            .map_err(|e| CaKitError::io(format!("writing template {}", path.display()), e))?;
        tracing::debug!(template = %self.name, path = %path.display(), "template saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| CaKitError::io(format!("reading template {}", path.display()), e))?;
        Self::from_json(&json)
    }
}

impl RequestCapability for RequestTemplate {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::extensions::KeyUsages;

    fn sample() -> RequestTemplate {
        let request = InMemoryRequest::builder()
            .subject(DistinguishedName {
                common_name: "Template CA".to_string(),
                country: Some("NL".to_string()),
                ..Default::default()
            })
            .key_algorithm(KeyAlgorithm::EcdsaP384)
            .key_usage(KeyUsage(KeyUsages::DigitalSignature.into()))
            .ca(true)
            .description("intermediate template".to_string())
            .custom_extensions(vec![ExtensionParam {
                oid: ObjectIdentifier::new_unwrap("1.3.6.1.4.1.99999.1"),
                critical: false,
                value: vec![0x05, 0x00],
            }])
            .build();
        request.to_template("intermediate")
    }

    #[test]
    fn test_json_schema_uses_names_and_strings() {
        let json = sample().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["schemaVersion"], 1);
        assert_eq!(value["keyAlgorithm"]["algorithm"], "ecdsa-p384");
        assert_eq!(value["keyUsage"][0], "digitalSignature");
        assert_eq!(value["customExtensions"][0]["value"], "BQA=");
        assert!(value["createdAt"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_json_round_trip() {
        let template = sample();
        let parsed = RequestTemplate::from_json(&template.to_json().unwrap()).unwrap();
        assert_eq!(parsed, template);
        let request = parsed.to_request();
        assert_eq!(request.custom_extensions.len(), 1);
        assert!(request.ca);
    }

    #[test]
    fn test_future_schema_version_is_rejected() {
        let json = sample().to_json().unwrap().replace(
            "\"schemaVersion\": 1",
            "\"schemaVersion\": 7",
        );
        assert!(RequestTemplate::from_json(&json).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t1.json");
        let template = sample();
        template.save(&path).unwrap();
        assert_eq!(RequestTemplate::load(&path).unwrap(), template);
    }
}
