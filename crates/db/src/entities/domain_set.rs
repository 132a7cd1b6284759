//! Set of peer domains stored as a JSON array.

use std::collections::BTreeSet;

use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};

/// Ordered, de-duplicated set of peer domains.
///
/// Domains are normalized on insert (trimmed, lowercased, trailing dot
/// removed) so that `Example.COM.` and `example.com` are the same peer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(transparent)]
pub struct DomainSet(BTreeSet<String>);

impl DomainSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Normalize a domain name the way the set stores it.
    #[must_use]
    pub fn normalize(domain: &str) -> String {
        domain.trim().trim_end_matches('.').to_ascii_lowercase()
    }

    /// Insert a domain. Returns `false` if it was already present.
    pub fn insert(&mut self, domain: &str) -> bool {
        self.0.insert(Self::normalize(domain))
    }

    /// Remove a domain. Returns `false` if it was absent.
    pub fn remove(&mut self, domain: &str) -> bool {
        self.0.remove(&Self::normalize(domain))
    }

    #[must_use]
    pub fn contains(&self, domain: &str) -> bool {
        self.0.contains(&Self::normalize(domain))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every domain in `self` is also in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Domains in `self` that are not in `other`, in order.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Vec<String> {
        self.0.difference(&other.0).cloned().collect()
    }

    /// Whether the two sets share any domain.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for DomainSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for domain in iter {
            let domain = domain.as_ref();
            if !Self::normalize(domain).is_empty() {
                set.insert(domain);
            }
        }
        set
    }
}
