use thiserror::Error;

use crate::token::CredentialKind;

/// Signing-key problems detected while building a [`crate::TokenIssuer`].
///
/// Always fatal at startup; never produced per request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("{0} signing key is missing or empty")]
    Missing(CredentialKind),

    #[error("access and refresh signing keys must be different")]
    Shared,
}

/// Unexpected failures in the signing/verification layer.
///
/// A token that is expired, tampered or malformed is NOT an error: it is
/// reported as [`crate::Verification::Invalid`]. Only failures that say
/// nothing about the presented token end up here.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign {kind} credential: {source}")]
    Signing {
        kind: CredentialKind,
        #[source]
        source: jsonwebtoken::errors::Error,
    },

    #[error("crypto failure while verifying {kind} credential: {source}")]
    Crypto {
        kind: CredentialKind,
        #[source]
        source: jsonwebtoken::errors::Error,
    },
}
