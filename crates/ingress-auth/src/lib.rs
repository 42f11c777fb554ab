//! Credential handling for the ingress gateway.
//!
//! Two signed, time-bounded credential kinds protect every backend behind the
//! gateway:
//!
//! - **Access** credentials live for 15 minutes and are checked first
//! - **Refresh** credentials live for 7 days and are exchanged for a fresh
//!   access/refresh pair when the access credential is missing or invalid
//!
//! [`TokenIssuer`] signs and verifies both kinds with independent keys.
//! [`AuthGate`] turns the credentials presented on one request into an
//! [`AuthOutcome`]: admitted (possibly with rotated credentials) or rejected.
//!
//! # Quick example
//!
//! ```
//! use ingress_auth::{AuthGate, CredentialIssuer, PresentedCredentials, Principal, TokenIssuer};
//!
//! let issuer = TokenIssuer::new(b"access-secret", b"refresh-secret").unwrap();
//! let refresh = issuer
//!     .issue_refresh(&Principal::new("42", "admin"))
//!     .unwrap();
//!
//! let gate = AuthGate::new(issuer);
//! let outcome = gate.authenticate(&PresentedCredentials::new(None, Some(refresh)));
//!
//! assert!(outcome.is_admitted());
//! assert!(outcome.rotated().is_some());
//! ```

pub mod error;
pub mod gate;
pub mod principal;
pub mod security;
pub mod token;

pub use error::{KeyError, TokenError};
pub use gate::{
    AdmissionPath, AuthFailure, AuthGate, AuthOutcome, PresentedCredentials, RotatedCredentials,
};
pub use principal::Principal;
pub use token::{
    Claims, CredentialIssuer, CredentialKind, TokenIssuer, Verification, ACCESS_TOKEN_TTL,
    MAX_TOKEN_SIZE_BYTES, REFRESH_TOKEN_TTL,
};
