// ABOUTME: Discriminator entries and the keyed set a task declares
// ABOUTME: Enforces unique keys and merges discriminators inherited from upstream tasks

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::{DiscriminatorError, Result};
use super::value::DiscriminatorValue;

fn default_discriminating() -> bool {
    true
}

/// One dimension of a task configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discriminator {
    pub key: String,
    pub value: DiscriminatorValue,
    /// Whether the value takes part in the fingerprint
    #[serde(default = "default_discriminating")]
    pub discriminating: bool,
}

impl Discriminator {
    pub fn new(key: impl Into<String>, value: impl Into<DiscriminatorValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            discriminating: true,
        }
    }

    /// Create a value that is recorded on the context but does not affect its identity
    pub fn informational(key: impl Into<String>, value: impl Into<DiscriminatorValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            discriminating: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscriminatorSet {
    entries: BTreeMap<String, Discriminator>,
}

impl DiscriminatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a discriminator, rejecting malformed or duplicate keys
    pub fn insert(&mut self, discriminator: Discriminator) -> Result<()> {
        validate_key(&discriminator.key)?;

        if self.entries.contains_key(&discriminator.key) {
            return Err(DiscriminatorError::DuplicateKey {
                key: discriminator.key,
            });
        }

        self.entries.insert(discriminator.key.clone(), discriminator);
        Ok(())
    }

    /// Builder-style insert of a discriminating value
    pub fn with(
        mut self,
        key: impl Into<String>,
        value: impl Into<DiscriminatorValue>,
    ) -> Result<Self> {
        self.insert(Discriminator::new(key, value))?;
        Ok(self)
    }

    /// Builder-style insert of an informational value
    pub fn with_informational(
        mut self,
        key: impl Into<String>,
        value: impl Into<DiscriminatorValue>,
    ) -> Result<Self> {
        self.insert(Discriminator::informational(key, value))?;
        Ok(self)
    }

    /// Merge the discriminators of an upstream configuration into this set.
    ///
    /// An inherited key that clashes with a different value already in the set is kept
    /// under `<origin>|<key>`, so both values still reach the fingerprint. Informational
    /// values never clash: the value already present wins.
    pub fn inherit(&mut self, origin: &str, upstream: &DiscriminatorSet) -> Result<()> {
        for (key, inherited) in &upstream.entries {
            if self.merge(key, inherited) {
                continue;
            }

            if !inherited.discriminating {
                continue;
            }

            let qualified = qualified_key(origin, key);
            if !self.merge(&qualified, inherited) {
                // two upstreams of the same type disagree on the same key
                let existing = self
                    .entries
                    .get(&qualified)
                    .map(|d| d.value.to_string())
                    .unwrap_or_default();
                return Err(DiscriminatorError::ConflictingInheritance {
                    key: qualified,
                    existing,
                    inherited: inherited.value.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Insert `inherited` under `key` unless a different value is already there.
    /// Returns false on a clash.
    fn merge(&mut self, key: &str, inherited: &Discriminator) -> bool {
        match self.entries.get_mut(key) {
            Some(existing) if existing.value == inherited.value => {
                existing.discriminating |= inherited.discriminating;
                true
            }
            Some(_) => false,
            None => {
                self.entries.insert(
                    key.to_string(),
                    Discriminator {
                        key: key.to_string(),
                        value: inherited.value.clone(),
                        discriminating: inherited.discriminating,
                    },
                );
                true
            }
        }
    }

    /// Build a set from entries, failing on the first invalid or duplicate key
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = Discriminator>,
    {
        let mut set = Self::new();
        for discriminator in entries {
            set.insert(discriminator)?;
        }
        Ok(set)
    }

    pub fn get(&self, key: &str) -> Option<&DiscriminatorValue> {
        self.entries.get(key).map(|d| &d.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries in key order
    pub fn iter(&self) -> impl Iterator<Item = &Discriminator> {
        self.entries.values()
    }

    /// Iterate over the entries that contribute to the fingerprint, in key order
    pub fn discriminating(&self) -> impl Iterator<Item = &Discriminator> {
        self.entries.values().filter(|d| d.discriminating)
    }

    /// Flatten into display strings, used for listings and property records
    pub fn to_string_map(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(key, d)| (key.clone(), d.value.to_string()))
            .collect()
    }
}

/// Key under which a clashing value inherited from `origin` is kept
pub fn qualified_key(origin: &str, key: &str) -> String {
    format!("{}|{}", origin, key)
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(DiscriminatorError::InvalidKey {
            key: key.to_string(),
            reason: "key must not be empty".to_string(),
        });
    }

    if let Some(bad) = key
        .chars()
        .find(|c| *c == '=' || *c == ';' || *c == '|' || c.is_control())
    {
        return Err(DiscriminatorError::InvalidKey {
            key: key.to_string(),
            reason: format!("key contains reserved character {:?}", bad),
        });
    }

    Ok(())
}
