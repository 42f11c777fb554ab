//! Signing and verification of access and refresh credentials.
//!
//! Credentials are HS256 JWTs. Each kind has its own key so that a refresh
//! credential can never pass as an access credential and vice versa. The
//! token is self-contained: signature plus embedded `exp` are the only record.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{KeyError, TokenError};
use crate::principal::Principal;

/// Lifetime of an access credential.
pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Lifetime of a refresh credential.
pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Tokens larger than this are rejected before any decoding work.
pub const MAX_TOKEN_SIZE_BYTES: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    Access,
    Refresh,
}

impl CredentialKind {
    pub fn lifetime(self) -> Duration {
        match self {
            CredentialKind::Access => ACCESS_TOKEN_TTL,
            CredentialKind::Refresh => REFRESH_TOKEN_TTL,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CredentialKind::Access => "access",
            CredentialKind::Refresh => "refresh",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT body: the principal plus issue and expiry timestamps (Unix seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(flatten)]
    pub principal: Principal,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    /// Claims for `principal` issued now and expiring after `ttl`.
    pub fn issued_now(principal: Principal, ttl: Duration) -> Self {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        Self {
            principal,
            iat: now,
            exp: now.saturating_add(ttl),
        }
    }
}

/// Result of checking one presented credential.
///
/// Bad signature, expiry and malformed input all collapse into `Invalid`.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    Valid(Principal),
    Invalid,
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid(_))
    }
}

/// Capability the admission gate needs from the credential layer.
pub trait CredentialIssuer: Send + Sync {
    /// Sign a new credential of `kind` for the canonical fields of `principal`.
    fn issue(&self, kind: CredentialKind, principal: &Principal) -> Result<String, TokenError>;

    /// Check signature and expiry of `token` against the key of `kind`.
    fn verify(&self, kind: CredentialKind, token: &str) -> Result<Verification, TokenError>;

    fn issue_access(&self, principal: &Principal) -> Result<String, TokenError> {
        self.issue(CredentialKind::Access, principal)
    }

    fn issue_refresh(&self, principal: &Principal) -> Result<String, TokenError> {
        self.issue(CredentialKind::Refresh, principal)
    }

    fn verify_access(&self, token: &str) -> Result<Verification, TokenError> {
        self.verify(CredentialKind::Access, token)
    }

    fn verify_refresh(&self, token: &str) -> Result<Verification, TokenError> {
        self.verify(CredentialKind::Refresh, token)
    }
}

struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKey {
    fn from_secret(kind: CredentialKind, secret: &[u8]) -> Result<Self, KeyError> {
        if secret.is_empty() {
            return Err(KeyError::Missing(kind));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        })
    }
}

/// Stateless HS256 issuer/verifier holding one key per credential kind.
///
/// Immutable after construction and safe to share across workers.
pub struct TokenIssuer {
    access: SigningKey,
    refresh: SigningKey,
    validation: Validation,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("access_key", &"[REDACTED]")
            .field("refresh_key", &"[REDACTED]")
            .finish()
    }
}

impl TokenIssuer {
    pub fn new(access_secret: &[u8], refresh_secret: &[u8]) -> Result<Self, KeyError> {
        let access = SigningKey::from_secret(CredentialKind::Access, access_secret)?;
        let refresh = SigningKey::from_secret(CredentialKind::Refresh, refresh_secret)?;
        if access_secret == refresh_secret {
            return Err(KeyError::Shared);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is exact; no grace period past `exp`.
        validation.leeway = 0;

        Ok(Self {
            access,
            refresh,
            validation,
        })
    }

    fn key(&self, kind: CredentialKind) -> &SigningKey {
        match kind {
            CredentialKind::Access => &self.access,
            CredentialKind::Refresh => &self.refresh,
        }
    }

    /// Sign caller-provided claims as-is (expiry included).
    pub fn sign_claims(&self, kind: CredentialKind, claims: &Claims) -> Result<String, TokenError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &self.key(kind).encoding,
        )
        .map_err(|source| TokenError::Signing { kind, source })
    }
}

impl CredentialIssuer for TokenIssuer {
    fn issue(&self, kind: CredentialKind, principal: &Principal) -> Result<String, TokenError> {
        let claims = Claims::issued_now(principal.canonical(), kind.lifetime());
        self.sign_claims(kind, &claims)
    }

    fn verify(&self, kind: CredentialKind, token: &str) -> Result<Verification, TokenError> {
        if token.is_empty() || token.len() > MAX_TOKEN_SIZE_BYTES {
            tracing::debug!(kind = %kind, size = token.len(), "credential rejected by size check");
            return Ok(Verification::Invalid);
        }

        match decode::<Claims>(token, &self.key(kind).decoding, &self.validation) {
            Ok(data) => Ok(Verification::Valid(data.claims.principal)),
            Err(source) => match source.kind() {
                ErrorKind::InvalidEcdsaKey
                | ErrorKind::InvalidRsaKey(_)
                | ErrorKind::RsaFailedSigning
                | ErrorKind::InvalidKeyFormat
                | ErrorKind::Crypto(_) => Err(TokenError::Crypto { kind, source }),
                _ => {
                    tracing::debug!(kind = %kind, error = %source, "credential failed verification");
                    Ok(Verification::Invalid)
                }
            },
        }
    }
}
