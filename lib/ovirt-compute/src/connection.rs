// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The memoized connection to the platform and its trust negotiation.
//!
//! A [`ConnectionManager`] dials at most once at a time. Callers that queue
//! up behind a dial in progress receive that dial's handle, or its error if
//! it failed; a caller arriving after a failed dial starts a fresh one. A
//! successful handle is kept for the lifetime of the manager unless trust
//! material changes.
//!
//! When the server's certificate does not verify and nothing is pinned yet,
//! the platform's CA bundle is fetched without verification, pinned, and
//! the dial fails with [`Error::TrustRequired`] carrying its fingerprint.
//! The next dial then trusts exactly that bundle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ovirt_compute_config::{ComputeResourceConfig, Scheme, ValidationError};
use slog::{debug, info, o, warn, Logger};

use crate::platform::{Connector, DialParams, Platform, RemoteError};
use crate::trust::{TrustState, TrustStore};
use crate::Error;

/// Well-known locations of the engine's CA certificate, tried in order.
pub const CA_CERTIFICATE_PATHS: [&str; 2] = [
    "/ovirt-engine/services/pki-resource?resource=ca-certificate&format=X509-PEM-CA",
    "/ca.crt",
];

/// Status a plain-HTTP engine answers an empty POST with when it does not
/// insist on HTTPS. Any 2xx answer means the same.
const HTTPS_NOT_REQUIRED_STATUS: u16 = 406;

/// Where the connection stands, as of the last dial.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    NoCredentials,
    Idle,
    Dialing,
    Connected,
    Untrusted,
    Unauthorized,
    Unreachable,
}

impl ConnectionState {
    fn after_failure(err: &Error) -> Self {
        match err {
            Error::Validation(_) => ConnectionState::NoCredentials,
            Error::TrustRequired { .. } | Error::CertificateParse(_) => {
                ConnectionState::Untrusted
            }
            Error::Unauthorized(_) => ConnectionState::Unauthorized,
            _ => ConnectionState::Unreachable,
        }
    }
}

#[derive(Default)]
struct Slot {
    handle: Option<Arc<dyn Platform>>,
    last_failure: Option<Error>,
}

pub struct ConnectionManager {
    url: String,
    scheme: Scheme,
    user: String,
    password: String,
    datacenter: Option<String>,
    use_v4: bool,
    connector: Arc<dyn Connector>,
    log: Logger,

    slot: tokio::sync::Mutex<Slot>,
    /// Number of dials that have finished, successfully or not.
    dials: AtomicU64,
    trust: Mutex<TrustState>,
    state: Mutex<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(
        config: &ComputeResourceConfig,
        connector: Arc<dyn Connector>,
        log: Logger,
    ) -> Self {
        let state = if config.user.is_empty() || config.password.is_empty() {
            ConnectionState::NoCredentials
        } else {
            ConnectionState::Idle
        };
        Self {
            url: config.url.clone(),
            scheme: config.scheme,
            user: config.user.clone(),
            password: config.password.clone(),
            datacenter: config.datacenter.clone(),
            use_v4: config.use_v4,
            connector,
            log: log.new(o!("component" => "connection")),
            slot: tokio::sync::Mutex::new(Slot::default()),
            dials: AtomicU64::new(0),
            trust: Mutex::new(TrustState::new(config.public_key.clone())),
            state: Mutex::new(state),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    pub fn trust_state(&self) -> TrustState {
        self.trust.lock().unwrap().clone()
    }

    /// Number of dials attempted so far.
    pub fn dial_count(&self) -> u64 {
        self.dials.load(Ordering::Acquire)
    }

    /// Returns the live handle, dialing if there is none.
    pub async fn connection(&self) -> Result<Arc<dyn Platform>, Error> {
        let seen = self.dials.load(Ordering::Acquire);
        let mut slot = self.slot.lock().await;
        if let Some(handle) = &slot.handle {
            return Ok(handle.clone());
        }
        // A dial finished while we waited for the lock; share its outcome.
        if self.dials.load(Ordering::Acquire) != seen {
            if let Some(err) = &slot.last_failure {
                return Err(err.clone());
            }
        }
        self.dial_into(&mut slot, false).await
    }

    /// Drops any cached handle and dials again.
    ///
    /// With `force`, a certificate that fails verification is pinned even if
    /// another bundle is pinned already. The connection is only reported
    /// healthy once the datacenter probe and the HTTPS check have passed.
    pub async fn test_connection(&self, force: bool) -> Result<(), Error> {
        let mut slot = self.slot.lock().await;
        slot.handle = None;
        self.dial_into(&mut slot, force).await.map(|_| ())
    }

    /// Fetches the platform's CA bundle and pins it.
    ///
    /// Without `force` an existing pin is kept. Returns the fingerprint of the
    /// pinned bundle.
    pub async fn pin_remote_certificate(
        &self,
        force: bool,
    ) -> Result<String, Error> {
        {
            let trust = self.trust.lock().unwrap();
            if let (false, Some(fp)) = (force, &trust.fingerprint) {
                return Ok(fp.clone());
            }
        }
        let pem = self.fetch_ca_certificate().await;
        let fingerprint = bundle_fingerprint(&pem)?;

        let mut slot = self.slot.lock().await;
        self.trust.lock().unwrap().pin(pem, fingerprint.clone());
        slot.handle = None;
        slot.last_failure = None;
        info!(self.log, "pinned CA certificate"; "fingerprint" => &fingerprint);
        Ok(fingerprint)
    }

    /// The CA certificate of the platform, for a human to review.
    ///
    /// This is the pinned bundle when there is one. Otherwise the bundle is
    /// fetched without verification, and an empty string is returned if that
    /// fails; such a result must never be used to decide trust.
    pub async fn ca_certificate(&self) -> String {
        if let Some(pem) = self.trust.lock().unwrap().pinned.clone() {
            return pem;
        }
        self.fetch_ca_certificate().await
    }

    async fn fetch_ca_certificate(&self) -> String {
        let origin = origin_of(&self.url);
        for path in CA_CERTIFICATE_PATHS {
            let url = format!("{}{}", origin, path);
            match self.connector.fetch_unverified(&url).await {
                Ok(body) if !body.trim().is_empty() => return body,
                Ok(_) => debug!(self.log, "empty CA response"; "url" => &url),
                Err(e) => {
                    debug!(self.log, "CA fetch failed"; "url" => &url,
                        "error" => %e)
                }
            }
        }
        String::new()
    }

    async fn dial_into(
        &self,
        slot: &mut Slot,
        force: bool,
    ) -> Result<Arc<dyn Platform>, Error> {
        self.set_state(ConnectionState::Dialing);
        let result = self.dial(force).await;
        match &result {
            Ok(handle) => {
                slot.handle = Some(handle.clone());
                slot.last_failure = None;
                self.trust.lock().unwrap().validated = true;
                self.set_state(ConnectionState::Connected);
                info!(self.log, "connected";
                    "api_version" => %handle.api_version());
            }
            Err(e) => {
                slot.last_failure = Some(e.clone());
                self.set_state(ConnectionState::after_failure(e));
                warn!(self.log, "dial failed"; "error" => %e);
            }
        }
        self.dials.fetch_add(1, Ordering::AcqRel);
        result
    }

    async fn dial(&self, force: bool) -> Result<Arc<dyn Platform>, Error> {
        if self.user.is_empty() || self.password.is_empty() {
            return Err(ValidationError::MissingCredentials.into());
        }

        let pinned = self.trust.lock().unwrap().pinned.clone();
        let ca_certificates = match pinned {
            Some(pem) => TrustStore::from_pem_bundle(&pem)?.der_certificates(),
            None => Vec::new(),
        };
        let params = DialParams {
            url: self.url.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            datacenter: self.datacenter.clone(),
            use_v4: self.use_v4,
            ca_certificates,
        };
        debug!(self.log, "dialing"; "params" => ?params);

        let platform = match self.connector.dial(&params).await {
            Ok(platform) => platform,
            Err(e) => return Err(self.classify(e, force).await),
        };
        if let Err(e) = platform.list_datacenters().await {
            return Err(self.classify(e, force).await);
        }
        self.check_https_required().await?;
        Ok(platform)
    }

    async fn classify(&self, err: RemoteError, force: bool) -> Error {
        match err {
            RemoteError::Untrusted => self.trust_required(force).await,
            other => other.into(),
        }
    }

    // The server's chain did not verify. Fetch what it presents so the user
    // can confirm it, and pin it if there is nothing pinned yet.
    async fn trust_required(&self, force: bool) -> Error {
        let pem = self.fetch_ca_certificate().await;
        if pem.is_empty() {
            return Error::Connection(
                "certificate verification failed and the CA certificate \
                 could not be retrieved"
                    .to_string(),
            );
        }
        let fingerprint = match bundle_fingerprint(&pem) {
            Ok(fp) => fp,
            Err(e) => return e,
        };

        let mut trust = self.trust.lock().unwrap();
        if force || !trust.is_pinned() {
            trust.pin(pem, fingerprint.clone());
            info!(self.log, "pinned untrusted CA pending confirmation";
                "fingerprint" => &fingerprint);
        }
        Error::TrustRequired { fingerprint }
    }

    async fn check_https_required(&self) -> Result<(), Error> {
        if self.scheme != Scheme::Http {
            return Ok(());
        }
        match self.connector.probe_plain_http(&self.url).await {
            Ok(status)
                if status == HTTPS_NOT_REQUIRED_STATUS
                    || (200..300).contains(&status) =>
            {
                Ok(())
            }
            Ok(status) => {
                debug!(self.log, "plain HTTP refused"; "status" => status);
                Err(Error::HttpsRequired)
            }
            Err(e) => {
                debug!(self.log, "plain HTTP probe failed"; "error" => %e);
                Err(Error::HttpsRequired)
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }
}

fn bundle_fingerprint(pem: &str) -> Result<String, Error> {
    let store = TrustStore::from_pem_bundle(pem)?;
    Ok(store.fingerprint().unwrap_or_default().to_string())
}

/// `scheme://host[:port]` of `url`.
pub fn origin_of(url: &str) -> &str {
    let after_scheme = url.find("://").map_or(0, |i| i + 3);
    match url[after_scheme..].find('/') {
        Some(i) => &url[..after_scheme + i],
        None => url,
    }
}
