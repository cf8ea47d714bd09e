//! Stateless access tokens.
//!
//! Access tokens are HS256 JWTs signed with the process-wide secret from
//! [`JwtConfig`]. Verification is a pure function of the token, the secret and
//! the current time: there is no revocation list, so a token stays valid until
//! its `exp` passes.

use crate::config::JwtConfig;
use crate::error::TokenError;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind as JwtErrorKind,
};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Claims carried by every access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User id
    pub sub: String,
    pub email: String,
    pub iss: String,
    /// Unique per issued token
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl AccessClaims {
    pub fn user_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| TokenError::Invalid("subject is not a user id".to_string()))
    }
}

#[derive(Clone)]
pub struct AccessTokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    lifetime: Duration,
}

impl AccessTokenCodec {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            lifetime: config.access_token_lifetime(),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Mint a token for `user_id` valid from now until now + lifetime.
    pub fn issue(&self, user_id: Uuid, email: &str) -> Result<String, TokenError> {
        self.issue_at(user_id, email, OffsetDateTime::now_utc())
    }

    /// Mint a token as if the current time were `now`.
    pub fn issue_at(
        &self,
        user_id: Uuid,
        email: &str,
        now: OffsetDateTime,
    ) -> Result<String, TokenError> {
        let issued_at = now.unix_timestamp();
        let claims = AccessClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: issued_at,
            nbf: issued_at,
            exp: (now + self.lifetime).unix_timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to sign access token");
                TokenError::Signing(e.to_string())
            })?;

        tracing::debug!(user_id = %user_id, jti = %claims.jti, "Issued access token");
        Ok(token)
    }

    /// Verify a token (optionally prefixed with `Bearer `) and return the user id it names.
    pub fn verify(&self, token: &str) -> Result<Uuid, TokenError> {
        self.verify_claims(token)?.user_id()
    }

    /// Verify a token and return its full claim set.
    pub fn verify_claims(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let token = strip_scheme(token);

        match decode::<AccessClaims>(token, &self.decoding_key, &self.validation()) {
            Ok(data) => {
                tracing::debug!(jti = %data.claims.jti, "Verified access token");
                Ok(data.claims)
            }
            Err(err) => Err(self.classify(token, err)),
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);
        validation
    }

    fn classify(&self, token: &str, err: jsonwebtoken::errors::Error) -> TokenError {
        match err.kind() {
            JwtErrorKind::InvalidToken
            | JwtErrorKind::Base64(_)
            | JwtErrorKind::Json(_)
            | JwtErrorKind::Utf8(_) => {
                tracing::warn!(error = %err, "Rejected access token with malformed structure");
                TokenError::Malformed
            }
            JwtErrorKind::InvalidSignature => {
                tracing::warn!("Rejected access token with invalid signature");
                TokenError::InvalidSignature
            }
            JwtErrorKind::ExpiredSignature => {
                let expired_at = self
                    .unchecked_claims(token)
                    .and_then(|c| OffsetDateTime::from_unix_timestamp(c.exp).ok());
                tracing::warn!(expired_at = ?expired_at, "Rejected expired access token");
                TokenError::Expired { expired_at }
            }
            JwtErrorKind::ImmatureSignature => {
                let not_before = self
                    .unchecked_claims(token)
                    .and_then(|c| OffsetDateTime::from_unix_timestamp(c.nbf).ok());
                tracing::warn!(not_before = ?not_before, "Rejected access token that is not valid yet");
                TokenError::NotYetValid { not_before }
            }
            _ => {
                tracing::warn!(error = %err, "Rejected access token");
                TokenError::Invalid(err.to_string())
            }
        }
    }

    /// Claims of a token whose signature is already known to be good, ignoring time checks.
    /// Only used to report expiry instants in diagnostics.
    fn unchecked_claims(&self, token: &str) -> Option<AccessClaims> {
        let mut validation = self.validation();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .ok()
            .map(|data| data.claims)
    }
}

fn strip_scheme(token: &str) -> &str {
    let token = token.trim();
    token.strip_prefix("Bearer ").unwrap_or(token).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-test-secret-test-secret!".to_string(),
            issuer: "credential-server-test".to_string(),
            access_token_lifetime_secs: 15 * 60,
            refresh_token_lifetime_secs: 30 * 60,
        }
    }

    fn codec() -> AccessTokenCodec {
        AccessTokenCodec::new(&test_config())
    }

    /// Replace the character at `index` with a different base64url character.
    fn flip_char(token: &str, index: usize) -> String {
        let mut bytes = token.as_bytes().to_vec();
        bytes[index] = if bytes[index] == b'A' { b'B' } else { b'A' };
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn issued_token_verifies_to_user_id() {
        let codec = codec();
        let user_id = Uuid::new_v4();
        let token = codec.issue(user_id, "a@example.com").unwrap();

        assert_eq!(codec.verify(&token).unwrap(), user_id);

        let claims = codec.verify_claims(&token).unwrap();
        assert_eq!(claims.email, "a@example.com");
        assert_eq!(claims.iss, "credential-server-test");
        assert_eq!(claims.exp - claims.iat, 15 * 60);
        assert_eq!(claims.nbf, claims.iat);
    }

    #[test]
    fn bearer_prefix_is_stripped() {
        let codec = codec();
        let user_id = Uuid::new_v4();
        let token = codec.issue(user_id, "a@example.com").unwrap();

        assert_eq!(codec.verify(&format!("Bearer {token}")).unwrap(), user_id);
    }

    #[test]
    fn every_token_gets_a_fresh_id() {
        let codec = codec();
        let user_id = Uuid::new_v4();
        let first = codec.issue(user_id, "a@example.com").unwrap();
        let second = codec.issue(user_id, "a@example.com").unwrap();

        let first = codec.verify_claims(&first).unwrap();
        let second = codec.verify_claims(&second).unwrap();
        assert_ne!(first.jti, second.jti);
    }

    #[test]
    fn token_past_its_lifetime_is_expired() {
        let codec = codec();
        // Issued one second more than a lifetime ago.
        let issued = OffsetDateTime::now_utc() - codec.lifetime() - Duration::seconds(1);
        let token = codec
            .issue_at(Uuid::new_v4(), "a@example.com", issued)
            .unwrap();

        match codec.verify(&token) {
            Err(TokenError::Expired { expired_at }) => {
                let expired_at = expired_at.expect("expiry reported");
                assert_eq!(
                    expired_at.unix_timestamp(),
                    (issued + codec.lifetime()).unix_timestamp()
                );
            }
            other => panic!("expected expired, got {other:?}"),
        }
    }

    #[test]
    fn token_within_its_lifetime_still_verifies() {
        let codec = codec();
        let issued = OffsetDateTime::now_utc() - codec.lifetime() + Duration::seconds(30);
        let user_id = Uuid::new_v4();
        let token = codec.issue_at(user_id, "a@example.com", issued).unwrap();

        assert_eq!(codec.verify(&token).unwrap(), user_id);
    }

    #[test]
    fn token_from_the_future_is_not_valid_yet() {
        let codec = codec();
        let issued = OffsetDateTime::now_utc() + Duration::minutes(5);
        let token = codec
            .issue_at(Uuid::new_v4(), "a@example.com", issued)
            .unwrap();

        assert!(matches!(
            codec.verify(&token),
            Err(TokenError::NotYetValid {
                not_before: Some(_)
            })
        ));
    }

    #[test]
    fn tampered_payload_fails_signature_check() {
        let codec = codec();
        let token = codec.issue(Uuid::new_v4(), "a@example.com").unwrap();
        let header_end = token.find('.').unwrap();
        let payload_end = token.rfind('.').unwrap();

        for index in (header_end + 1)..payload_end {
            let tampered = flip_char(&token, index);
            assert!(
                matches!(codec.verify(&tampered), Err(TokenError::InvalidSignature)),
                "payload byte {index} tampering was not detected"
            );
        }
    }

    #[test]
    fn tampered_signature_fails_signature_check() {
        let codec = codec();
        let token = codec.issue(Uuid::new_v4(), "a@example.com").unwrap();
        let signature_start = token.rfind('.').unwrap() + 1;

        for index in signature_start..token.len() {
            let tampered = flip_char(&token, index);
            assert!(
                matches!(codec.verify(&tampered), Err(TokenError::InvalidSignature)),
                "signature byte {index} tampering was not detected"
            );
        }
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let mut other = test_config();
        other.secret = "another-secret-another-secret-1234".to_string();
        let token = AccessTokenCodec::new(&other)
            .issue(Uuid::new_v4(), "a@example.com")
            .unwrap();

        assert!(matches!(
            codec().verify(&token),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn foreign_issuer_is_rejected() {
        let mut other = test_config();
        other.issuer = "someone-else".to_string();
        let token = AccessTokenCodec::new(&other)
            .issue(Uuid::new_v4(), "a@example.com")
            .unwrap();

        assert!(matches!(codec().verify(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = codec();
        assert!(matches!(codec.verify("not-a-jwt"), Err(TokenError::Malformed)));
        assert!(matches!(codec.verify("Bearer "), Err(TokenError::Malformed)));
        assert!(matches!(
            codec.verify("a.b.c"),
            Err(TokenError::Malformed)
        ));
    }
}
