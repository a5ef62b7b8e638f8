// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Certificate bundles pinned by trust-on-first-use.

use base64::Engine;

use crate::Error;

const BEGIN_MARKER: &str = "-----BEGIN";
const END_MARKER: &str = "-----END";

/// One certificate loaded from a pinned bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustedCertificate {
    pub der: Vec<u8>,
    pub fingerprint: String,
}

/// The set of roots a connection will accept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrustStore {
    entries: Vec<TrustedCertificate>,
}

impl TrustStore {
    /// Loads every PEM block of `bundle` into a store.
    ///
    /// A bundle without any block, or with a block that cannot be decoded,
    /// is rejected as a whole.
    pub fn from_pem_bundle(bundle: &str) -> Result<Self, Error> {
        let mut entries = Vec::new();
        for block in bundle.split(BEGIN_MARKER).skip(1) {
            let der = decode_block(block)?;
            entries.push(TrustedCertificate {
                fingerprint: fingerprint(&der),
                der,
            });
        }
        if entries.is_empty() {
            return Err(Error::CertificateParse(
                "no PEM certificate found in bundle".to_string(),
            ));
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TrustedCertificate] {
        &self.entries
    }

    /// Fingerprint of the first certificate, which is the one a user is
    /// asked to confirm.
    pub fn fingerprint(&self) -> Option<&str> {
        self.entries.first().map(|e| e.fingerprint.as_str())
    }

    pub fn der_certificates(&self) -> Vec<Vec<u8>> {
        self.entries.iter().map(|e| e.der.clone()).collect()
    }
}

// `block` is everything after a BEGIN marker, up to the next one.
fn decode_block(block: &str) -> Result<Vec<u8>, Error> {
    let malformed = |reason: &str| {
        Error::CertificateParse(format!("malformed PEM block: {reason}"))
    };

    let (header, rest) = block
        .split_once('\n')
        .ok_or_else(|| malformed("truncated header"))?;
    if !header.trim_end().ends_with("-----") {
        return Err(malformed("bad header"));
    }
    let (body, _) = rest
        .split_once(END_MARKER)
        .ok_or_else(|| malformed("missing END line"))?;

    let encoded: String =
        body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if encoded.is_empty() {
        return Err(malformed("empty body"));
    }
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| malformed(&e.to_string()))
}

/// SHA-256 fingerprint of a DER certificate, as colon separated upper-case
/// hex pairs.
pub fn fingerprint(der: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, der);
    digest
        .as_ref()
        .iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(":")
}

/// Trust material held for one compute resource.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrustState {
    /// The pinned PEM bundle, if any.
    pub pinned: Option<String>,
    /// Fingerprint of the first pinned certificate.
    pub fingerprint: Option<String>,
    /// Set once a dial with the current trust material has succeeded.
    pub validated: bool,
}

impl TrustState {
    pub fn new(pinned: Option<String>) -> Self {
        let fingerprint = pinned
            .as_deref()
            .and_then(|pem| TrustStore::from_pem_bundle(pem).ok())
            .and_then(|store| store.fingerprint().map(String::from));
        Self { pinned, fingerprint, validated: false }
    }

    /// Replaces the pinned bundle. The new material has not been used yet.
    pub fn pin(&mut self, pem: String, fingerprint: String) {
        self.pinned = Some(pem);
        self.fingerprint = Some(fingerprint);
        self.validated = false;
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.is_some()
    }
}
