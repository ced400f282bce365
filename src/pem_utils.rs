use crate::error::{CaKitError, Result};

/// Convert DER‑encoded data into a PEM‑encoded string with the provided label.
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    let pem = pem::Pem::new(label, der);
    pem::encode_config(&pem, pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF))
}

/// Convert a PEM‑encoded string to DER‑encoded bytes.
pub fn pem_to_der(pem_str: &str) -> std::result::Result<Vec<u8>, pem::PemError> {
    let pem = pem::parse(pem_str)?;
    Ok(pem.contents().to_vec())
}

/// Convert a PEM block to DER, insisting on the expected label.
pub fn pem_to_der_labeled(pem_str: &str, label: &str) -> Result<Vec<u8>> {
    let pem = pem::parse(pem_str)?;
    if pem.tag() != label {
        return Err(CaKitError::DecodingError(format!(
            "expected a '{label}' PEM block, found '{}'",
            pem.tag()
        )));
    }
    Ok(pem.contents().to_vec())
}

/// Returns the contents of every block with `label`, in file order.
pub fn pem_blocks(pem_str: &str, label: &str) -> Result<Vec<Vec<u8>>> {
    Ok(pem::parse_many(pem_str)?
        .into_iter()
        .filter(|block| block.tag() == label)
        .map(|block| block.contents().to_vec())
        .collect())
}

/// Heuristic used when a file may hold either PEM text or raw DER.
pub fn looks_like_pem(data: &[u8]) -> bool {
    data.iter()
        .position(|b| !b.is_ascii_whitespace())
        .is_some_and(|start| data[start..].starts_with(b"-----BEGIN "))
}
