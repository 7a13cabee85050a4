// ABOUTME: Discriminator model used to fingerprint task configurations
// ABOUTME: Exports value types, discriminator sets, and canonical fingerprinting

pub mod error;
pub mod fingerprint;
pub mod set;
pub mod value;

pub use error::{DiscriminatorError, Result};
pub use fingerprint::{fingerprint, normalize, CanonicalForm, ContextId};
pub use set::{qualified_key, Discriminator, DiscriminatorSet};
pub use value::DiscriminatorValue;
