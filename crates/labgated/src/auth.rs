//! Bearer-token authentication for the RPC surface.
//!
//! Every request carries an HMAC-signed JWT in the `token` metadata key.
//! The token's `authKey` claim must equal the daemon's configured auth
//! key; the signature must verify against the configured sign key. Each
//! failure mode is a distinct `Unauthenticated` status so callers can tell
//! a missing credential from a stale or foreign one.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tonic::metadata::MetadataMap;
use tonic::{Request, Status};
use tracing::debug;

use crate::status::code;

/// Metadata key the token travels under.
pub const TOKEN_METADATA_KEY: &str = "token";

/// Claim carrying the caller's auth key.
const AUTH_KEY_CLAIM: &str = "authKey";

/// Why a request failed authentication.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No `token` metadata entry, or an empty one.
    #[error("no authentication token provided")]
    MissingToken,

    /// The token is signed with a non-HMAC algorithm.
    #[error("unexpected signing algorithm")]
    WrongAlgorithm,

    /// The token is not a well-formed JWT or its signature fails.
    #[error("invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// The token verifies but has no `authKey` claim.
    #[error("missing authKey claim")]
    MissingClaim,

    /// The `authKey` claim does not match the configured key.
    #[error("invalid authentication key")]
    KeyMismatch,
}

impl AuthError {
    /// Detail code in the platform numbering: 1 missing, 2 bad key,
    /// 3 format problems.
    #[must_use]
    pub fn detail_code(&self) -> u32 {
        match self {
            Self::MissingToken => 1,
            Self::KeyMismatch => 2,
            Self::WrongAlgorithm | Self::InvalidTokenFormat(_) | Self::MissingClaim => 3,
        }
    }
}

impl From<AuthError> for Status {
    fn from(err: AuthError) -> Self {
        Status::unauthenticated(format!(
            "#{} {err}",
            code::unauthenticated(err.detail_code())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(rename = "authKey")]
    auth_key: Option<String>,
}

/// Verifies bearer tokens against the configured sign and auth keys.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    auth_key: String,
}

impl TokenVerifier {
    /// Creates a verifier from the shared secrets.
    #[must_use]
    pub fn new(sign_key: &str, auth_key: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(sign_key.as_bytes()),
            auth_key: auth_key.to_string(),
        }
    }

    /// Checks the `token` entry of a request's metadata.
    ///
    /// # Errors
    ///
    /// Returns the specific [`AuthError`] for the first check that fails.
    pub fn verify(&self, metadata: &MetadataMap) -> Result<(), AuthError> {
        let token = metadata
            .get(TOKEN_METADATA_KEY)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::MissingToken)?;

        // Tokens are long-lived deployment credentials: no expiry claim to
        // validate, only the signature and the authKey claim.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data =
            jsonwebtoken::decode::<TokenClaims>(token, &self.decoding_key, &validation).map_err(
                |e| match e.kind() {
                    jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => AuthError::WrongAlgorithm,
                    _ => AuthError::InvalidTokenFormat(e.to_string()),
                },
            )?;

        let claim = data.claims.auth_key.ok_or(AuthError::MissingClaim)?;
        if claim != self.auth_key {
            return Err(AuthError::KeyMismatch);
        }
        Ok(())
    }

    /// Tonic interceptor applying [`TokenVerifier::verify`] to every RPC.
    pub fn interceptor(
        self,
    ) -> impl FnMut(Request<()>) -> Result<Request<()>, Status> + Clone + Send + 'static {
        move |request: Request<()>| {
            if let Err(err) = self.verify(request.metadata()) {
                debug!(error = %err, "rejected unauthenticated request");
                return Err(err.into());
            }
            Ok(request)
        }
    }
}

/// Builds a signed token carrying the auth key claim; the client-side
/// counterpart of [`TokenVerifier`].
///
/// # Errors
///
/// Returns an error if HMAC signing fails.
pub fn sign_token(sign_key: &str, auth_key: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let mut claims = std::collections::HashMap::new();
    claims.insert(AUTH_KEY_CLAIM, auth_key);
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(sign_key.as_bytes()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataValue;

    fn metadata_with_token(token: &str) -> MetadataMap {
        let mut metadata = MetadataMap::new();
        metadata.insert(
            TOKEN_METADATA_KEY,
            MetadataValue::try_from(token).expect("metadata value"),
        );
        metadata
    }

    #[test]
    fn valid_token_passes() {
        let verifier = TokenVerifier::new("sign-secret", "auth-secret");
        let token = sign_token("sign-secret", "auth-secret").expect("sign");
        verifier.verify(&metadata_with_token(&token)).expect("verify");
    }

    #[test]
    fn missing_metadata_is_missing_token() {
        let verifier = TokenVerifier::new("sign-secret", "auth-secret");
        assert_eq!(
            verifier.verify(&MetadataMap::new()).unwrap_err(),
            AuthError::MissingToken
        );
    }

    #[test]
    fn empty_token_is_missing_token() {
        let verifier = TokenVerifier::new("sign-secret", "auth-secret");
        assert_eq!(
            verifier.verify(&metadata_with_token("")).unwrap_err(),
            AuthError::MissingToken
        );
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let verifier = TokenVerifier::new("sign-secret", "auth-secret");
        let token = sign_token("some-other-secret", "auth-secret").expect("sign");
        assert!(matches!(
            verifier.verify(&metadata_with_token(&token)).unwrap_err(),
            AuthError::InvalidTokenFormat(_)
        ));
    }

    #[test]
    fn wrong_claim_value_is_key_mismatch() {
        let verifier = TokenVerifier::new("sign-secret", "auth-secret");
        let token = sign_token("sign-secret", "some-other-key").expect("sign");
        assert_eq!(
            verifier.verify(&metadata_with_token(&token)).unwrap_err(),
            AuthError::KeyMismatch
        );
    }

    #[test]
    fn token_without_claim_is_rejected() {
        let empty: std::collections::HashMap<&str, &str> = std::collections::HashMap::new();
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(Algorithm::HS256),
            &empty,
            &jsonwebtoken::EncodingKey::from_secret(b"sign-secret"),
        )
        .expect("sign");

        let verifier = TokenVerifier::new("sign-secret", "auth-secret");
        assert_eq!(
            verifier.verify(&metadata_with_token(&token)).unwrap_err(),
            AuthError::MissingClaim
        );
    }

    #[test]
    fn garbage_token_is_format_error() {
        let verifier = TokenVerifier::new("sign-secret", "auth-secret");
        assert!(matches!(
            verifier
                .verify(&metadata_with_token("not.a.jwt"))
                .unwrap_err(),
            AuthError::InvalidTokenFormat(_)
        ));
    }

    #[test]
    fn detail_codes_are_stable() {
        assert_eq!(AuthError::MissingToken.detail_code(), 1);
        assert_eq!(AuthError::KeyMismatch.detail_code(), 2);
        assert_eq!(AuthError::MissingClaim.detail_code(), 3);
    }
}
