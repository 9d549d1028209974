//! Structural check of the bearer credential returned by a successful login.
//!
//! The signature is verified by the backend on every request; the client only
//! makes sure the token is well formed and not already expired before storing it.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CredentialError;

/// Claims the client reads from the credential payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_uuid: Option<String>,
    /// RFC 3339 expiry as issued by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    /// Unix seconds, the registered JWT claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CredentialClaims {
    /// Earliest of the declared expiries.
    pub fn expires_at(&self) -> Result<Option<DateTime<Utc>>, CredentialError> {
        let iso = self
            .expires
            .as_deref()
            .map(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| CredentialError::BadClaim("expires"))
            })
            .transpose()?;
        let unix = self
            .exp
            .map(|secs| {
                Utc.timestamp_opt(secs, 0)
                    .single()
                    .ok_or(CredentialError::BadClaim("exp"))
            })
            .transpose()?;
        Ok(match (iso, unix) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        })
    }
}

/// A credential that passed the structural check.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    token: String,
    algorithm: Algorithm,
    claims: CredentialClaims,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Parse and check `token` against the current time.
    pub fn parse(token: &str) -> Result<Self, CredentialError> {
        Self::parse_at(token, Utc::now())
    }

    /// Parse and check `token` against `now`.
    ///
    /// `exp` is also checked against the wall clock while decoding.
    pub fn parse_at(token: &str, now: DateTime<Utc>) -> Result<Self, CredentialError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CredentialError::Empty);
        }
        let segments = token.split('.').filter(|s| !s.is_empty()).count();
        if segments != 3 || token.split('.').count() != 3 {
            return Err(CredentialError::SegmentCount(segments));
        }

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| CredentialError::Header(e.to_string()))?;

        let mut validation = Validation::new(header.alg);
        validation.insecure_disable_signature_validation();
        validation.required_spec_claims.clear();
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.leeway = 0;
        let claims = jsonwebtoken::decode::<CredentialClaims>(
            token,
            &DecodingKey::from_secret(&[]),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => CredentialError::Expired,
            _ => CredentialError::Claims(e.to_string()),
        })?
        .claims;

        let expires_at = claims.expires_at()?;
        if expires_at.is_some_and(|at| at <= now) {
            return Err(CredentialError::Expired);
        }

        Ok(Self {
            token: token.to_string(),
            algorithm: header.alg,
            claims,
            expires_at,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn claims(&self) -> &CredentialClaims {
        &self.claims
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Still usable at `now`. Credentials without an expiry never lapse locally.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}
