//! Credential bundle issued by a successful pairing.
//!
//! A bundle is the bridge's root certificate, the client certificate the
//! bridge signed for us, and the private key matching that certificate.  All
//! three are PEM text.
//!
//! # All-or-nothing
//!
//! A bundle with one or two parts is useless (the TLS handshake cannot be
//! completed) and dangerous (it can mix keys from two pairing attempts).  The
//! only way to obtain a [`CredentialBundle`] is through [`CredentialBundle::new`]
//! or [`CredentialBundle::from_parts`], both of which reject partial input.

use std::fmt;

use thiserror::Error;
use zeroize::Zeroizing;

const PEM_ARMOUR: &str = "-----BEGIN ";

/// Reasons a set of credential parts cannot form a bundle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BundleError {
    /// One of the three parts is absent or empty.
    #[error("credential bundle is incomplete: {0} is missing")]
    Missing(&'static str),
    /// A part does not carry PEM armour.
    #[error("credential bundle part {0} is not PEM encoded")]
    NotPem(&'static str),
}

/// Root certificate, client certificate and private key, all PEM encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    root_certificate: String,
    client_certificate: String,
    private_key: Zeroizing<String>,
}

impl CredentialBundle {
    /// Builds a bundle from three complete PEM parts.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Missing`] for an empty part and
    /// [`BundleError::NotPem`] for a part without PEM armour.
    pub fn new(
        root_certificate: impl Into<String>,
        client_certificate: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Result<Self, BundleError> {
        let root_certificate = root_certificate.into();
        let client_certificate = client_certificate.into();
        let private_key = Zeroizing::new(private_key.into());

        check_part("root certificate", &root_certificate)?;
        check_part("client certificate", &client_certificate)?;
        check_part("private key", &private_key)?;

        Ok(Self {
            root_certificate,
            client_certificate,
            private_key,
        })
    }

    /// Builds a bundle from optional parts, as read back from storage.
    ///
    /// Returns `Ok(None)` when every part is absent, `Ok(Some(_))` when every
    /// part is present and valid.
    ///
    /// # Errors
    ///
    /// Any mix of present and absent parts is rejected with
    /// [`BundleError::Missing`] naming the first absent part.
    pub fn from_parts(
        root_certificate: Option<String>,
        client_certificate: Option<String>,
        private_key: Option<String>,
    ) -> Result<Option<Self>, BundleError> {
        let is_blank = |part: &Option<String>| part.as_deref().map_or(true, |s| s.trim().is_empty());

        if is_blank(&root_certificate) && is_blank(&client_certificate) && is_blank(&private_key) {
            return Ok(None);
        }

        let root = root_certificate
            .filter(|s| !s.trim().is_empty())
            .ok_or(BundleError::Missing("root certificate"))?;
        let client = client_certificate
            .filter(|s| !s.trim().is_empty())
            .ok_or(BundleError::Missing("client certificate"))?;
        let key = private_key
            .filter(|s| !s.trim().is_empty())
            .ok_or(BundleError::Missing("private key"))?;

        Self::new(root, client, key).map(Some)
    }

    pub fn root_certificate(&self) -> &str {
        &self.root_certificate
    }

    pub fn client_certificate(&self) -> &str {
        &self.client_certificate
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("root_certificate", &format_args!("{} bytes", self.root_certificate.len()))
            .field("client_certificate", &format_args!("{} bytes", self.client_certificate.len()))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

fn check_part(name: &'static str, value: &str) -> Result<(), BundleError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BundleError::Missing(name));
    }
    if !trimmed.starts_with(PEM_ARMOUR) {
        return Err(BundleError::NotPem(name));
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
