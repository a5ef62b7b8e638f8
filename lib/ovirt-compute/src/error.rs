// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use ovirt_compute_config::ValidationError;
use thiserror::Error;

use crate::platform::RemoteError;

/// Errors surfaced by the compute adapter.
///
/// The type is `Clone` so one failed dial can be handed to every caller that
/// was waiting on it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(
        "The remote system presented a public key signed by an unidentified \
         certificate authority (fingerprint {fingerprint}). If you are sure \
         the remote system is authentic, confirm it and retry."
    )]
    TrustRequired { fingerprint: String },

    #[error("cannot parse certificate bundle: {0}")]
    CertificateParse(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("HTTPS URL is required for API access")]
    HttpsRequired,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("remote API error: {detail}")]
    RemoteApi { status: Option<u16>, detail: String },

    #[error("cannot reach the platform: {0}")]
    Connection(String),

    #[error("{0} is not supported by this platform")]
    Unsupported(&'static str),

    #[error("VM {0} is not running")]
    NotRunning(String),

    /// A creation step failed and the compensating destroy failed too.
    #[error("{original} (cleanup of VM {vm} also failed: {cleanup})")]
    CleanupFailed { vm: String, original: Box<Error>, cleanup: Box<Error> },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Untrusted => Error::Connection(err.to_string()),
            RemoteError::InvalidCertificate(detail) => {
                Error::CertificateParse(detail)
            }
            RemoteError::Transport(detail) => Error::Connection(detail),
            RemoteError::InvalidRequest(detail) => {
                Error::Validation(ValidationError::InvalidRequest(detail))
            }
            RemoteError::Status { status, detail } => match status {
                401 | 403 => Error::Unauthorized(detail),
                404 => Error::NotFound(detail),
                301 | 302 | 307 | 308 => Error::HttpsRequired,
                _ => Error::RemoteApi { status: Some(status), detail },
            },
        }
    }
}
