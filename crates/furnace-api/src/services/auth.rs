//! Origin authentication for trigger requests.
//!
//! Verification never errors: a missing header, an absent secret or a
//! malformed signature all resolve to `false`.

use furnace_core::envelope::{AuthKind, IncomingRequest};
use furnace_core::secret::{API_KEY, GIT_HOOK_SECRET, SecretResolver};
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use sha1::Sha1;
use tracing::{debug, warn};

/// Header carrying the provider's HMAC-SHA1 signature of the raw body.
pub const SIGNATURE_HEADER: &str = "x-hub-signature";
/// Header carrying the shared key on direct triggers.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Verifies that a request comes from the source-control provider or from a
/// caller holding the API key.
#[derive(Clone)]
pub struct Authenticator {
    secrets: SecretResolver,
}

impl Authenticator {
    pub fn new(secrets: SecretResolver) -> Self {
        Self { secrets }
    }

    /// Verify `request` using the mode selected by its origin.
    pub async fn verify(&self, kind: AuthKind, request: &IncomingRequest) -> bool {
        match kind {
            AuthKind::WebhookSignature => self.verify_signature(request).await,
            AuthKind::ApiKey => self.verify_api_key(request).await,
        }
    }

    async fn verify_signature(&self, request: &IncomingRequest) -> bool {
        debug!("Verifying webhook signature");
        let Some(signature) = request.header(SIGNATURE_HEADER) else {
            warn!("Webhook signature header missing");
            return false;
        };
        let Some(secret) = self.secrets.resolve(GIT_HOOK_SECRET).await else {
            warn!("Webhook secret not available; rejecting");
            return false;
        };

        verify_github_signature(secret.expose_secret(), request.raw_body(), Some(signature))
    }

    async fn verify_api_key(&self, request: &IncomingRequest) -> bool {
        debug!("Verifying API key");
        let Some(provided) = request.header(API_KEY_HEADER) else {
            warn!("API key header missing");
            return false;
        };
        let Some(expected) = self.secrets.resolve(API_KEY).await else {
            warn!("API key not available; rejecting");
            return false;
        };

        provided == expected.expose_secret()
    }
}

/// Compute the `sha1=<hex>` signature of `body`.
pub fn sign_github_payload(secret: &str, body: &[u8]) -> String {
    let mut mac = new_mac(secret);
    mac.update(body);
    format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a GitHub `x-hub-signature` value against `body`.
///
/// The digest comparison is constant-time.
pub fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha1=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha1=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let mut mac = new_mac(secret);
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}

fn new_mac(secret: &str) -> Hmac<Sha1> {
    <Hmac<Sha1> as Mac>::new_from_slice(secret.as_bytes()).expect("HMAC can take any size key")
}
