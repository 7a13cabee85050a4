// ABOUTME: Canonical normalization of discriminator sets and SHA-256 fingerprints
// ABOUTME: Produces the deterministic identifiers that address task contexts

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::error::{DiscriminatorError, Result};
use super::set::DiscriminatorSet;

/// Sorted, encoded form of the discriminating entries of a set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalForm(String);

impl CanonicalForm {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a task context: the hex encoded fingerprint of its configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContextId(String);

impl ContextId {
    const HEX_LEN: usize = 64;

    /// Parse an identifier typed by a user or read back from storage
    pub fn parse(value: &str) -> Result<Self> {
        let valid = value.len() == Self::HEX_LEN
            && value
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));

        if !valid {
            return Err(DiscriminatorError::InvalidContextId {
                value: value.to_string(),
            });
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl TryFrom<String> for ContextId {
    type Error = DiscriminatorError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ContextId> for String {
    fn from(id: ContextId) -> Self {
        id.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sort the discriminating entries by key and encode them into one canonical string
pub fn normalize(discriminators: &DiscriminatorSet) -> Result<CanonicalForm> {
    let mut canonical = String::new();

    // BTreeMap iteration is already key-ordered
    for discriminator in discriminators.discriminating() {
        canonical.push_str(&discriminator.key);
        canonical.push('=');
        canonical.push_str(&discriminator.value.encode(&discriminator.key)?);
        canonical.push(';');
    }

    Ok(CanonicalForm(canonical))
}

/// Hash a task type together with a canonical form into a context identifier
pub fn fingerprint(task_type: &str, canonical: &CanonicalForm) -> ContextId {
    let mut hasher = Sha256::new();
    hasher.update(task_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_str().as_bytes());
    ContextId(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discriminator::{Discriminator, DiscriminatorSet};

    fn train_set() -> DiscriminatorSet {
        DiscriminatorSet::new()
            .with("algo", "svm")
            .unwrap()
            .with("seed", 1)
            .unwrap()
            .with("lang", "en")
            .unwrap()
    }

    #[test]
    fn test_normalize_sorts_keys() {
        let canonical = normalize(&train_set()).unwrap();
        assert_eq!(
            canonical.as_str(),
            "algo=s:\"svm\";lang=s:\"en\";seed=i:1;"
        );
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let permuted = DiscriminatorSet::from_entries(vec![
            Discriminator::new("lang", "en"),
            Discriminator::new("seed", 1),
            Discriminator::new("algo", "svm"),
        ])
        .unwrap();

        let a = fingerprint("Train", &normalize(&train_set()).unwrap());
        let b = fingerprint("Train", &normalize(&permuted).unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_depends_on_task_type() {
        let canonical = normalize(&train_set()).unwrap();
        assert_ne!(
            fingerprint("Train", &canonical),
            fingerprint("Evaluate", &canonical)
        );
    }

    #[test]
    fn test_fingerprint_depends_on_values() {
        let other = DiscriminatorSet::new()
            .with("algo", "svm")
            .unwrap()
            .with("seed", 1)
            .unwrap()
            .with("lang", "de")
            .unwrap();

        assert_ne!(
            fingerprint("Train", &normalize(&train_set()).unwrap()),
            fingerprint("Train", &normalize(&other).unwrap())
        );
    }

    #[test]
    fn test_informational_values_do_not_affect_fingerprint() {
        let annotated = train_set().with_informational("note", "rerun").unwrap();

        assert_eq!(
            fingerprint("Train", &normalize(&train_set()).unwrap()),
            fingerprint("Train", &normalize(&annotated).unwrap())
        );
    }

    #[test]
    fn test_task_type_boundary_is_unambiguous() {
        // "ab" + "c=..." must not collide with "a" + "bc=..."
        let c = DiscriminatorSet::new().with("c", 1).unwrap();
        let bc = DiscriminatorSet::new().with("bc", 1).unwrap();

        assert_ne!(
            fingerprint("ab", &normalize(&c).unwrap()),
            fingerprint("a", &normalize(&bc).unwrap())
        );
    }

    #[test]
    fn test_context_id_parse() {
        let id = fingerprint("Train", &normalize(&train_set()).unwrap());
        assert_eq!(ContextId::parse(id.as_str()).unwrap(), id);
        assert_eq!(id.short().len(), 12);

        assert!(ContextId::parse("not-an-id").is_err());
        assert!(ContextId::parse(&id.as_str().to_uppercase()).is_err());
    }

    #[test]
    fn test_context_id_deserialization_is_validated() {
        let id = fingerprint("Train", &normalize(&train_set()).unwrap());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(serde_json::from_str::<ContextId>(&json).unwrap(), id);

        // a hand-edited record must not produce an id that panics in short()
        assert!(serde_json::from_str::<ContextId>("\"abc\"").is_err());
        assert!(serde_json::from_str::<ContextId>("\"\"").is_err());
    }

    #[test]
    fn test_normalize_rejects_nan() {
        let set = DiscriminatorSet::new().with("lr", f64::NAN).unwrap();
        assert!(matches!(
            normalize(&set),
            Err(DiscriminatorError::ValueNotSerializable { .. })
        ));
    }
}
