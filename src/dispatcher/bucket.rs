//! Bucket key derivation.
//!
//! The server assigns every route to a rate-limit bucket, and "major" ids in the path
//! (channel, guild, webhook) split a route into independent buckets. The key computed here
//! approximates that grouping from information available before the first response:
//! the unformatted path template plus the three scoping ids. Two routes that the server
//! places in one shared bucket still get separate keys, and the HTTP method is ignored,
//! so `GET` and `DELETE` on the same template serialize against each other.

use std::{collections::BTreeMap, fmt};

/// Path parameters that partition a route into separate buckets, in key order.
pub const SCOPING_PARAMS: [&str; 3] = ["channel_id", "guild_id", "webhook_id"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey(String);

impl BucketKey {
    /// Derives the key for `template` under `params`.
    ///
    /// Pure: identical inputs always give identical keys. Missing scoping ids are an
    /// empty placeholder, and non-scoping parameters do not participate.
    pub fn resolve(template: &str, params: &BTreeMap<String, String>) -> Self {
        let mut key = String::with_capacity(template.len() + 32);
        key.push_str(template);
        key.push('/');
        for (i, name) in SCOPING_PARAMS.iter().enumerate() {
            if i > 0 {
                key.push(':');
            }
            if let Some(id) = params.get(*name) {
                key.push_str(id);
            }
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
