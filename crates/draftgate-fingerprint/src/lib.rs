//! Draftgate fingerprints
//!
//! Stable version tokens for the draft-and-apply protocol.
//!
//! # Core Concepts
//!
//! - [`RuleConfiguration`]: canonical tagged-union tree of rule parameters
//! - [`RulesFingerprint`]: digest of a canonicalized configuration
//! - [`ScopeFingerprint`]: digest of the full membership of a resolved scope
//! - [`Fingerprint`]: the 32-byte BLAKE3 digest both tokens wrap
//!
//! # Example
//!
//! ```
//! use draftgate_fingerprint::{RuleConfiguration, ScopeFingerprint, TargetId};
//!
//! let rules = RuleConfiguration::new().with("prefix", "X | ");
//! let scope = [TargetId::from("p2"), TargetId::from("p1")];
//!
//! println!("rules {} scope {}", rules.fingerprint(), ScopeFingerprint::of(&scope));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod digest;
mod rules;
mod scope;

pub use digest::{Fingerprint, HashError, RulesFingerprint, ScopeFingerprint};
pub use rules::{fingerprint_json, CanonicalNumber, ConfigurationError, RuleConfiguration, RuleValue};
pub use scope::TargetId;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
