//! Cryptographic helpers.
//!
//! - **`csr`** – Generates the RSA keypair and certificate-signing request
//!   submitted to the bridge during pairing.

pub mod csr;
