//! Ordered header list shared by the probe, engine, and HAR resolver.
//!
//! A plain `HashMap<String, String>` (what `fetch_head`/`resolver` used before)
//! loses insertion order and can't express "add a second `Cookie` line". This
//! keeps both, at the cost of linear lookup, which is fine for the handful of
//! headers a download request carries.

/// One `name: value` request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Ordered collection of headers, case-insensitive on lookup, insertion-order
/// preserving on iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<Header>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: &std::collections::HashMap<String, String>) -> Self {
        let mut list = Self::new();
        for (k, v) in map {
            list.set(k, v);
        }
        list
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|h| (h.name.as_str(), h.value.as_str()))
    }

    /// Value of the first header with this name (case-insensitive), if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Insert a new header, even if one with the same name already exists
    /// (e.g. a second `Cookie` line). Preserves insertion order.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Replace the first existing header with this name, or append if absent.
    /// Idempotent: calling twice with the same value leaves the list unchanged.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(h) = self.entries.iter_mut().find(|h| h.name.eq_ignore_ascii_case(&name)) {
            h.value = value;
        } else {
            self.entries.push(Header { name, value });
        }
    }

    /// `set` only if the header isn't already present.
    pub fn init_or_update(&mut self, name: &str, value: impl Into<String>) {
        if self.get(name).is_none() {
            self.set(name.to_string(), value);
        }
    }

    /// Remove every header whose name is not in `allow`, case-insensitive.
    /// Used by the redirect policy when a hop crosses origins.
    pub fn retain_allowed(&mut self, allow: &[&str]) {
        self.entries
            .retain(|h| allow.iter().any(|a| h.name.eq_ignore_ascii_case(a)));
    }

    /// Apply this header list onto a curl request.
    pub fn apply_to_curl_list(&self) -> Result<curl::easy::List, curl::Error> {
        let mut list = curl::easy::List::new();
        for h in &self.entries {
            list.append(&format!("{}: {}", h.name.trim(), h.value.trim()))?;
        }
        Ok(list)
    }
}

impl FromIterator<(String, String)> for HeaderList {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut list = Self::new();
        for (k, v) in iter {
            list.add(k, v);
        }
        list
    }
}
