//! API key classes, parsing and generation.
//!
//! Every project holds two independent keys:
//! - public (`sa_...`) for event submission
//! - private (`sa_priv_...`) for dashboard reads

use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::{AuthFailure, Error, Result};
use crate::limits::{
    API_KEY_TOKEN_LEN, PRIVATE_KEY_PATTERN, PRIVATE_KEY_PREFIX, PUBLIC_KEY_PATTERN,
    PUBLIC_KEY_PREFIX,
};

static PUBLIC_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PUBLIC_KEY_PATTERN).expect("invalid public key pattern"));

static PRIVATE_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PRIVATE_KEY_PATTERN).expect("invalid private key pattern"));

/// Which secret a request must present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyClass {
    Public,
    Private,
}

impl KeyClass {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Public => PUBLIC_KEY_PREFIX,
            Self::Private => PRIVATE_KEY_PREFIX,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    fn regex(&self) -> &'static Regex {
        match self {
            Self::Public => &PUBLIC_KEY_REGEX,
            Self::Private => &PRIVATE_KEY_REGEX,
        }
    }
}

/// A key that passed the format check for its class.
///
/// Says nothing about whether a project owns it.
#[derive(Clone)]
pub struct ParsedApiKey {
    raw: String,
    class: KeyClass,
}

impl std::fmt::Debug for ParsedApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedApiKey")
            .field("class", &self.class)
            .field("len", &self.raw.len())
            .finish()
    }
}

impl ParsedApiKey {
    /// Parse a key that must belong to `class`.
    pub fn parse(key: &str, class: KeyClass) -> Result<Self> {
        if key.trim().is_empty() {
            return Err(Error::auth(AuthFailure::MissingHeader));
        }

        if !class.regex().is_match(key) {
            return Err(Error::auth(AuthFailure::InvalidFormat));
        }

        Ok(Self {
            raw: key.to_string(),
            class,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn class(&self) -> KeyClass {
        self.class
    }
}

/// Extract a key of `class` from an `Authorization` header value.
///
/// Only `Bearer <key>` is accepted.
pub fn extract_bearer_key(auth_header: Option<&str>, class: KeyClass) -> Result<ParsedApiKey> {
    let header = match auth_header {
        Some(h) if !h.trim().is_empty() => h,
        _ => return Err(Error::auth(AuthFailure::MissingHeader)),
    };

    let mut parts = header.split_whitespace();
    let scheme = parts.next().unwrap_or_default();
    let key = parts.next();

    if scheme != "Bearer" {
        return Err(Error::auth(AuthFailure::WrongScheme));
    }

    match (key, parts.next()) {
        (Some(key), None) => ParsedApiKey::parse(key, class),
        _ => Err(Error::auth(AuthFailure::WrongScheme)),
    }
}

/// Generate a fresh key of `class`.
pub fn generate_api_key(class: KeyClass) -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_TOKEN_LEN)
        .map(char::from)
        .collect();
    format!("{}{}", class.prefix(), token)
}
