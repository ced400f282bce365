use bon::Builder;
use rand_core::{OsRng, RngCore};

/// Cryptographic settings shared by every export and validation call.
///
/// A context is created once by the host application and handed to the
/// operations that need it; nothing in the crate reads global provider state.
#[derive(Clone, Debug, Builder)]
pub struct CryptoContext {
    /// PBKDF2 rounds for PBES2 (AES / DES3-CBC) encryption.
    #[builder(default = 10_000)]
    pub pbkdf2_iterations: u32,
    /// Rounds of the PKCS#12 key derivation used by the legacy SHA-1 PBE schemes.
    #[builder(default = 2048)]
    pub pkcs12_kdf_iterations: u32,
    /// Rounds of the PKCS#12 key derivation for the keystore MAC key.
    #[builder(default = 2048)]
    pub mac_iterations: u32,
    /// Salt length in bytes for every password-based scheme.
    #[builder(default = 16)]
    pub salt_len: usize,
    /// Size of the random challenge signed when proving key possession.
    #[builder(default = 2048)]
    pub challenge_len: usize,
}

impl Default for CryptoContext {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CryptoContext {
    pub fn random_salt(&self) -> Vec<u8> {
        self.random_bytes(self.salt_len)
    }

    pub fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        OsRng.fill_bytes(&mut buf);
        buf
    }

    pub fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut buf = [0u8; N];
        OsRng.fill_bytes(&mut buf);
        buf
    }
}
