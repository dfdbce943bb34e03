//! Query parameters visible in the page URL.

use std::collections::BTreeMap;
use url::form_urlencoded;

const OAUTH_PARAMS: [&str; 5] = ["code", "state", "scope", "authuser", "prompt"];

/// Parameters the provider appends to the redirect, plus whatever else the
/// page URL carried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    params: BTreeMap<String, String>,
}

impl CallbackParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw query string (without the leading `?`). Later duplicates win.
    pub fn from_query(query: &str) -> Self {
        form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
            .into_owned()
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn code(&self) -> Option<&str> {
        self.get("code").filter(|v| !v.is_empty())
    }

    pub fn state(&self) -> Option<&str> {
        self.get("state").filter(|v| !v.is_empty())
    }

    /// `error` set by the provider when the user denied consent.
    pub fn error(&self) -> Option<&str> {
        self.get("error").filter(|v| !v.is_empty())
    }

    pub fn error_description(&self) -> Option<&str> {
        self.get("error_description")
    }

    /// True when this request is a provider redirect worth processing.
    pub fn has_callback(&self) -> bool {
        (self.code().is_some() && self.state().is_some()) || self.error().is_some()
    }

    /// Drop the one-time callback parameters so a refresh cannot replay them.
    pub fn clear_oauth_params(&mut self) {
        for key in OAUTH_PARAMS {
            self.params.remove(key);
        }
        self.params.remove("error");
        self.params.remove("error_description");
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Re-encode as a query string, empty when no parameters remain.
    pub fn to_query_string(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter())
            .finish()
    }
}

impl FromIterator<(String, String)> for CallbackParams {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().collect(),
        }
    }
}
