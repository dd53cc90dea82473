//! Credential generation: RSA keypair plus certificate-signing request.
//!
//! # What is a CSR? (for beginners)
//!
//! A certificate-signing request is a small signed document that says "here
//! is my public key, and this is the name I want on my certificate".  It is
//! signed with the matching private key, which proves to the bridge that we
//! hold that key, yet the private key itself never leaves this machine.
//!
//! The bridge answers an accepted CSR with a client certificate; together with
//! the private key generated here, that certificate authenticates every later
//! session.
//!
//! # Stable identity
//!
//! The subject common name is the fixed [`CLIENT_COMMON_NAME`].  Re-pairing
//! produces a new keypair (so the CSR bytes differ), but the identity the
//! bridge sees stays the same across versions.

use rand::rngs::OsRng;
use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

/// Modulus size of the generated RSA key.
pub const RSA_KEY_BITS: usize = 2048;

/// Subject common name placed on every CSR.
pub const CLIENT_COMMON_NAME: &str = "bridge-orchestrator";

/// Error type for credential generation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// The keypair could not be generated or encoded (e.g. entropy starvation).
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    /// The CSR could not be built or signed.
    #[error("certificate signing request could not be built: {0}")]
    Csr(String),
}

/// A freshly generated CSR and the private key that signed it.
#[derive(Clone)]
pub struct SigningRequest {
    pub csr_pem: String,
    pub private_key_pem: Zeroizing<String>,
}

impl std::fmt::Debug for SigningRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningRequest")
            .field("csr_pem", &self.csr_pem)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// Produces a keypair and CSR for the pairing handshake.
///
/// The pairing state machine depends on this trait rather than on
/// [`RsaCredentialGenerator`] directly so tests can count invocations and
/// inject failures without paying for real key generation.
pub trait CredentialGenerator: Send + Sync {
    /// Generates a new keypair and a CSR signed with it.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when the primitive fails.  Callers treat
    /// this as fatal to the current pairing attempt.
    fn generate(&self) -> Result<SigningRequest, CredentialError>;
}

/// Generates RSA-2048 keys from the operating system's entropy source.
#[derive(Debug, Clone)]
pub struct RsaCredentialGenerator {
    common_name: String,
}

impl RsaCredentialGenerator {
    pub fn new() -> Self {
        Self {
            common_name: CLIENT_COMMON_NAME.to_string(),
        }
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }
}

impl Default for RsaCredentialGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialGenerator for RsaCredentialGenerator {
    fn generate(&self) -> Result<SigningRequest, CredentialError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| CredentialError::KeyGeneration(e.to_string()))?;

        let private_key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CredentialError::KeyGeneration(format!("failed to encode private key: {e}")))?;

        // rcgen signs the CSR; it needs the key in its own representation.
        let key_pair = KeyPair::from_pem(&private_key_pem)
            .map_err(|e| CredentialError::KeyGeneration(format!("failed to load private key: {e}")))?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(self.common_name.clone()),
        );
        params.distinguished_name = dn;

        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| CredentialError::Csr(format!("failed to sign CSR: {e}")))?;
        let csr_pem = csr
            .pem()
            .map_err(|e| CredentialError::Csr(format!("failed to serialize CSR: {e}")))?;

        debug!("generated {RSA_KEY_BITS}-bit keypair and CSR for {}", self.common_name);

        Ok(SigningRequest {
            csr_pem,
            private_key_pem: Zeroizing::new(String::from(private_key_pem.as_str())),
        })
    }
}
