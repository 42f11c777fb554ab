//! Per-request admission decision.
//!
//! ```text
//! Start ──none presented──────────────────────────────► Rejected(NoCredentials)
//!   │
//!   ├─ access valid ──────────────────────────────────► Admitted (no rotation)
//!   │
//!   ├─ refresh valid ──issue new access + refresh─────► Admitted (rotated)
//!   │
//!   ├─ neither valid ─────────────────────────────────► Rejected(InvalidCredentials)
//!   │
//!   └─ crypto/signing failure ────────────────────────► Rejected(Internal)
//! ```

use std::fmt;
use thiserror::Error;

use crate::error::TokenError;
use crate::principal::Principal;
use crate::token::{CredentialIssuer, TokenIssuer, Verification};

/// Credentials found on an inbound request. Empty strings count as absent.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PresentedCredentials {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl PresentedCredentials {
    pub fn new(access: Option<String>, refresh: Option<String>) -> Self {
        Self {
            access: access.filter(|t| !t.is_empty()),
            refresh: refresh.filter(|t| !t.is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

impl fmt::Debug for PresentedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresentedCredentials")
            .field("access", &self.access.as_ref().map(|_| "[REDACTED]"))
            .field("refresh", &self.refresh.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Fresh pair minted when a refresh credential was exchanged.
#[derive(Clone, PartialEq, Eq)]
pub struct RotatedCredentials {
    pub access: String,
    pub refresh: String,
}

impl fmt::Debug for RotatedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotatedCredentials")
            .field("access", &"[REDACTED]")
            .field("refresh", &"[REDACTED]")
            .finish()
    }
}

/// Which credential got the request admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPath {
    AccessToken,
    Refreshed,
}

impl AdmissionPath {
    pub fn as_str(self) -> &'static str {
        match self {
            AdmissionPath::AccessToken => "access_token",
            AdmissionPath::Refreshed => "refreshed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("authentication required")]
    NoCredentials,

    #[error("authentication failed")]
    InvalidCredentials,

    #[error("internal authentication error: {0}")]
    Internal(String),
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailure::NoCredentials => "no_credentials",
            AuthFailure::InvalidCredentials => "invalid_credentials",
            AuthFailure::Internal(_) => "internal_error",
        }
    }
}

/// Result of the gate for one request. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    Admitted {
        principal: Principal,
        via: AdmissionPath,
        rotated: Option<RotatedCredentials>,
    },
    Rejected(AuthFailure),
}

impl AuthOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AuthOutcome::Admitted { .. })
    }

    pub fn principal(&self) -> Option<&Principal> {
        match self {
            AuthOutcome::Admitted { principal, .. } => Some(principal),
            AuthOutcome::Rejected(_) => None,
        }
    }

    pub fn rotated(&self) -> Option<&RotatedCredentials> {
        match self {
            AuthOutcome::Admitted { rotated, .. } => rotated.as_ref(),
            AuthOutcome::Rejected(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&AuthFailure> {
        match self {
            AuthOutcome::Admitted { .. } => None,
            AuthOutcome::Rejected(failure) => Some(failure),
        }
    }

    /// Whether the client should be told to delete its stored credentials.
    pub fn clears_credentials(&self) -> bool {
        matches!(self, AuthOutcome::Rejected(AuthFailure::InvalidCredentials))
    }

    /// Metrics label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            AuthOutcome::Admitted { via, .. } => via.as_str(),
            AuthOutcome::Rejected(failure) => failure.as_str(),
        }
    }
}

/// Access-first, refresh-as-fallback admission gate.
///
/// Verification is CPU-bound and synchronous; the gate holds no mutable state
/// and can be shared across workers behind an `Arc`.
#[derive(Debug)]
pub struct AuthGate<I = TokenIssuer> {
    issuer: I,
}

impl<I: CredentialIssuer> AuthGate<I> {
    pub fn new(issuer: I) -> Self {
        Self { issuer }
    }

    pub fn issuer(&self) -> &I {
        &self.issuer
    }

    pub fn authenticate(&self, presented: &PresentedCredentials) -> AuthOutcome {
        match self.evaluate(presented) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "credential verification failed unexpectedly");
                AuthOutcome::Rejected(AuthFailure::Internal(e.to_string()))
            }
        }
    }

    fn evaluate(&self, presented: &PresentedCredentials) -> Result<AuthOutcome, TokenError> {
        if presented.is_empty() {
            return Ok(AuthOutcome::Rejected(AuthFailure::NoCredentials));
        }

        if let Some(token) = presented.access.as_deref() {
            if let Verification::Valid(principal) = self.issuer.verify_access(token)? {
                return Ok(AuthOutcome::Admitted {
                    principal,
                    via: AdmissionPath::AccessToken,
                    rotated: None,
                });
            }
        }

        if let Some(token) = presented.refresh.as_deref() {
            if let Verification::Valid(original) = self.issuer.verify_refresh(token)? {
                if !original.extra.is_empty() {
                    tracing::debug!(
                        user_id = %original.user_id,
                        dropped = ?original.extra.keys().collect::<Vec<_>>(),
                        "extension claims not carried into rotated credentials"
                    );
                }

                let principal = original.canonical();
                let rotated = RotatedCredentials {
                    access: self.issuer.issue_access(&principal)?,
                    refresh: self.issuer.issue_refresh(&principal)?,
                };
                tracing::debug!(user_id = %principal.user_id, "rotated credentials from refresh token");

                return Ok(AuthOutcome::Admitted {
                    principal,
                    via: AdmissionPath::Refreshed,
                    rotated: Some(rotated),
                });
            }
        }

        Ok(AuthOutcome::Rejected(AuthFailure::InvalidCredentials))
    }
}
