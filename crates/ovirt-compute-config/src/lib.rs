// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration of an oVirt compute resource.
//!
//! The on-disk form ([`Config`]) is deliberately loose so that a file with a
//! typo still loads and can be reported on; [`ComputeResourceConfig`] is the
//! validated form the adapter runs with. Adapter state that must outlive a
//! process (the pinned certificate bundle and the operating system cache)
//! rides along in the same file and is written back with [`Config::save`].

use std::path::Path;

use ovirt_api_types::{DisplayType, OsDescriptor};
use serde::{Deserialize as _, Deserializer};
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

/// Keyboard layouts the platform's consoles accept.
pub const KEYBOARD_LAYOUTS: &[&str] = &[
    "ar", "da", "de", "de-ch", "en-gb", "en-us", "es", "et", "fi", "fo", "fr",
    "fr-be", "fr-ca", "fr-ch", "hr", "hu", "is", "it", "ja", "lt", "lv", "mk",
    "nl", "nl-be", "no", "pl", "pt", "pt-br", "ru", "sl", "sv", "th", "tr",
];

pub const DEFAULT_KEYBOARD_LAYOUT: &str = "en-us";

/// Configuration for an oVirt compute resource, as stored on disk.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Config {
    /// API endpoint, e.g. `https://engine.example.com/ovirt-engine/api`.
    pub url: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Datacenter id the resource is scoped to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,

    #[serde(default = "default_display_type")]
    pub display_type: String,

    #[serde(default = "default_keyboard_layout")]
    pub keyboard_layout: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, deserialize_with = "deserialize_bool_like")]
    pub use_v4: bool,

    /// Pinned CA bundle (PEM). Written by trust-on-first-use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    #[serde(default)]
    pub capabilities: CapabilityFlags,

    #[serde(default, skip_serializing_if = "OsCapability::is_unknown")]
    pub operating_systems: OsCapability,
}

fn default_display_type() -> String {
    DisplayType::default().to_string()
}

fn default_keyboard_layout() -> String {
    DEFAULT_KEYBOARD_LAYOUT.to_string()
}

/// Tenancy flags the controller keeps with every compute resource.
#[derive(Clone, Default, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct CapabilityFlags {
    #[serde(default)]
    pub locations: bool,
    #[serde(default)]
    pub organizations: bool,
}

/// What is known about the platform's guest OS listing.
#[derive(Clone, Default, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum OsCapability {
    /// Never asked.
    #[default]
    Unknown,
    /// Asked; the platform has no OS listing.
    Unsupported,
    Available {
        #[serde(default, rename = "os")]
        list: Vec<OsDescriptor>,
    },
}

impl OsCapability {
    pub fn is_unknown(&self) -> bool {
        matches!(self, OsCapability::Unknown)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolLike {
    Bool(bool),
    Int(i64),
    Str(String),
}

// The controller stores this flag as whatever its form submitted; only a
// real `true` or a "1" turns it on.
fn deserialize_bool_like<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match BoolLike::deserialize(deserializer)? {
        BoolLike::Bool(b) => b,
        BoolLike::Int(i) => i == 1,
        BoolLike::Str(s) => s == "1" || s.eq_ignore_ascii_case("true"),
    })
}

/// Errors which may be returned when parsing the configuration.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Cannot parse toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Cannot serialize toml: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Problems with a configuration that are reported before any remote call.
#[derive(Clone, Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("URL {url:?} is invalid: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("user and password are required")]
    MissingCredentials,

    #[error("unsupported display type {0:?}, must be one of: vnc, spice")]
    UnsupportedDisplayType(String),

    #[error("unsupported keyboard layout {0:?}")]
    UnsupportedKeyboardLayout(String),

    #[error("The {kind} {value} is not a valid name or id")]
    UnknownReference { kind: &'static str, value: String },

    #[error("{0}")]
    InvalidRequest(String),
}

/// Scheme of the API endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// A validated compute resource configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ComputeResourceConfig {
    pub url: String,
    pub scheme: Scheme,
    pub user: String,
    pub password: String,
    pub datacenter: Option<String>,
    pub display_type: DisplayType,
    pub keyboard_layout: String,
    pub quota: Option<String>,
    pub api_version: Option<String>,
    pub use_v4: bool,
    pub public_key: Option<String>,
    pub capabilities: CapabilityFlags,
    pub operating_systems: OsCapability,
}

impl Config {
    /// Checks the configuration without contacting the platform.
    pub fn validate(&self) -> Result<ComputeResourceConfig, ValidationError> {
        let url = self.url.trim();
        let scheme = parse_endpoint(url)?;

        if self.user.trim().is_empty() || self.password.is_empty() {
            return Err(ValidationError::MissingCredentials);
        }

        let display_type =
            self.display_type.parse::<DisplayType>().map_err(|_| {
                ValidationError::UnsupportedDisplayType(
                    self.display_type.clone(),
                )
            })?;

        let keyboard_layout = self.keyboard_layout.to_lowercase();
        if !KEYBOARD_LAYOUTS.contains(&keyboard_layout.as_str()) {
            return Err(ValidationError::UnsupportedKeyboardLayout(
                self.keyboard_layout.clone(),
            ));
        }

        Ok(ComputeResourceConfig {
            url: url.trim_end_matches('/').to_string(),
            scheme,
            user: self.user.trim().to_string(),
            password: self.password.clone(),
            datacenter: non_blank(&self.datacenter),
            display_type,
            keyboard_layout,
            quota: non_blank(&self.quota),
            api_version: non_blank(&self.api_version),
            use_v4: self.use_v4,
            public_key: non_blank(&self.public_key),
            capabilities: self.capabilities.clone(),
            operating_systems: self.operating_systems.clone(),
        })
    }

    /// Writes the configuration back to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ParseError> {
        let contents = toml::to_string(self)?;
        std::fs::write(path.as_ref(), contents)?;
        Ok(())
    }
}

fn parse_endpoint(url: &str) -> Result<Scheme, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let uri = url.parse::<http::Uri>().map_err(|e| invalid(&e.to_string()))?;
    let scheme = match uri.scheme_str() {
        Some("https") => Scheme::Https,
        Some("http") => Scheme::Http,
        Some(other) => {
            return Err(invalid(&format!("unsupported scheme {other}")))
        }
        None => return Err(invalid("missing scheme")),
    };
    match uri.host() {
        Some(host) if !host.is_empty() => Ok(scheme),
        _ => Err(invalid("missing host")),
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(String::from)
}

/// Parses a TOML file into a configuration object.
pub fn parse<P: AsRef<Path>>(path: P) -> Result<Config, ParseError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let cfg = toml::from_str::<Config>(&contents)?;
    Ok(cfg)
}
