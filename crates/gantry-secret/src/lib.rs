//! JWT signing-key material with a create-once-then-reuse lifecycle.
//!
//! The key is minted on the first deployment and injected into the API
//! service's environment. Every later deployment must reuse the exact
//! value: regenerating it would invalidate every outstanding session
//! token. [`JwtSecret::resolve`] implements that continuity by probing
//! the live service's environment before ever generating anything.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use std::fmt;

use gantry_gcloud::{ControlPlane, ControlPlaneError};

/// Environment variable carrying the signing key on the deployed API
/// service. The continuity probe and the deploy call must agree on this
/// name.
pub const JWT_SECRET_ENV: &str = "JWT_SECRET_KEY";

/// Bytes of entropy behind a freshly generated key.
pub const SECRET_ENTROPY_BYTES: usize = 32;

/// Whether a resolved secret was carried over or freshly minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    Reused,
    Generated,
}

/// An opaque URL-safe signing key.
#[derive(Clone, PartialEq, Eq)]
pub struct JwtSecret {
    value: String,
    source: SecretSource,
}

impl JwtSecret {
    /// Generate fresh key material: 32 random bytes, URL-safe base64
    /// without padding.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let mut bytes = [0u8; SECRET_ENTROPY_BYTES];
        rng.fill_bytes(&mut bytes);
        Self {
            value: URL_SAFE_NO_PAD.encode(bytes),
            source: SecretSource::Generated,
        }
    }

    /// Wrap a value read back from a live deployment.
    pub fn reused(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            source: SecretSource::Reused,
        }
    }

    /// Resolve the secret for the next deployment of `service`.
    ///
    /// Reads the live service's environment and reuses a non-empty
    /// `JWT_SECRET_KEY` verbatim. A not-found probe means the service has
    /// never been deployed, which is the only state where generating
    /// fresh material is correct; any other probe failure propagates.
    pub async fn resolve(
        plane: &dyn ControlPlane,
        service: &str,
        region: &str,
    ) -> Result<Self, ControlPlaneError> {
        match plane.service_env(service, region).await {
            Ok(env) => match env.get(JWT_SECRET_ENV).filter(|v| !v.is_empty()) {
                Some(existing) => {
                    tracing::debug!(service, "reusing existing signing key");
                    Ok(Self::reused(existing.clone()))
                }
                None => {
                    tracing::info!(service, "deployed service has no signing key, generating");
                    Ok(Self::generate())
                }
            },
            Err(e) if e.is_not_found() => {
                tracing::info!(service, "service not yet deployed, generating signing key");
                Ok(Self::generate())
            }
            Err(e) => Err(e),
        }
    }

    /// The raw key value, for injection into a deployment's environment.
    pub fn expose(&self) -> &str {
        &self.value
    }

    pub fn source(&self) -> SecretSource {
        self.source
    }
}

// Key material must never end up in logs via derived formatting.
impl fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSecret")
            .field("value", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}
