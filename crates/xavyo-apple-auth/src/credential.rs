//! Signing credential loading.
//!
//! Apple issues the client secret signing key as a `.p8` file: a PEM
//! envelope around a PKCS#8 P-256 private key.

use std::path::Path;

use jsonwebtoken::{Algorithm, EncodingKey};
use pkcs8::der::asn1::ObjectIdentifier;
use pkcs8::PrivateKeyInfo;
use tracing::debug;

use crate::error::{AppleAuthError, AppleResult};

/// id-ecPublicKey (RFC 5480).
const EC_PUBLIC_KEY_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

/// prime256v1 / secp256r1, the curve ES256 signs with.
const PRIME256V1_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");

/// Private key used to sign client secrets.
///
/// One variant per supported algorithm family. Keys of any other family are
/// rejected when loaded, never at first use.
#[derive(Clone)]
pub enum SigningCredential {
    /// P-256 ECDSA key, signs with ES256.
    Es256(EncodingKey),
}

impl SigningCredential {
    /// Load a credential from PEM-encoded PKCS#8 bytes.
    ///
    /// # Errors
    ///
    /// - `AppleAuthError::CredentialFormat` - the PEM envelope cannot be decoded
    /// - `AppleAuthError::KeyParse` - the enclosed PKCS#8 structure is malformed
    /// - `AppleAuthError::UnsupportedKeyType` - the key is not a P-256 EC key
    pub fn from_pem(data: &[u8]) -> AppleResult<Self> {
        let pem = pem::parse(data).map_err(|e| AppleAuthError::CredentialFormat(e.to_string()))?;

        let info =
            PrivateKeyInfo::try_from(pem.contents()).map_err(|e| AppleAuthError::KeyParse {
                kid: None,
                reason: format!("invalid PKCS#8 private key: {e}"),
            })?;

        if info.algorithm.oid != EC_PUBLIC_KEY_OID {
            return Err(AppleAuthError::UnsupportedKeyType(format!(
                "key algorithm {} is not an elliptic curve key",
                info.algorithm.oid
            )));
        }

        let curve = info
            .algorithm
            .parameters_oid()
            .map_err(|e| AppleAuthError::KeyParse {
                kid: None,
                reason: format!("missing EC curve parameters: {e}"),
            })?;
        if curve != PRIME256V1_OID {
            return Err(AppleAuthError::UnsupportedKeyType(format!(
                "EC curve {curve} is not P-256"
            )));
        }

        debug!("Loaded ES256 signing credential");
        Ok(Self::Es256(EncodingKey::from_ec_der(pem.contents())))
    }

    /// Load a credential from a `.p8` file.
    ///
    /// # Errors
    ///
    /// Returns `AppleAuthError::CredentialIo` if the file cannot be read, then
    /// any error of [`SigningCredential::from_pem`].
    pub fn from_file(path: impl AsRef<Path>) -> AppleResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| AppleAuthError::CredentialIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pem(&data)
    }

    /// The JWS algorithm this credential signs with.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        match self {
            SigningCredential::Es256(_) => Algorithm::ES256,
        }
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        match self {
            SigningCredential::Es256(key) => key,
        }
    }
}

impl std::fmt::Debug for SigningCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredential")
            .field("algorithm", &self.algorithm())
            .finish_non_exhaustive()
    }
}
