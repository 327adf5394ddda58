//! Core data model
//!
//! Sites, per-stage results (discovery, safety, classification), crawl jobs
//! and operational records. Enums round-trip through their lowercase names,
//! which is also how they are stored.

use thiserror::Error;

/// Validation errors raised while building model values
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid onion address {address:?}: {reason}")]
    InvalidOnionAddress { address: String, reason: String },

    #[error("{field} must be within [0, 1], got {value}")]
    OutOfRange { field: &'static str, value: String },

    #[error("unknown {kind}: {value:?}")]
    UnknownVariant { kind: &'static str, value: String },
}

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum
/// from a single variant/name table.
macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// All variants, in declaration order
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            /// Stable lowercase name
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = $crate::models::ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok($ty::$variant),)+
                    other => Err($crate::models::ModelError::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use string_enum;

mod job;
mod onion;
mod records;
mod site;

pub use job::{CrawlJob, JobStatus, DEFAULT_MAX_RETRIES};
pub use onion::OnionAddress;
pub use records::{
    AuditLog, AuditStatus, ClassificationResult, ContentHash, DiscoveryMethod, DiscoveryResult,
    HashType, ModelType, SafetyAction, SafetyCheckResult, SystemMetrics,
};
pub use site::{RiskLevel, Site, SiteCategory, SiteStatus};

/// Check a unit-interval score
pub(crate) fn check_unit(field: &'static str, value: f64) -> Result<f64, ModelError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ModelError::OutOfRange {
            field,
            value: value.to_string(),
        })
    }
}
