//! Ledger error taxonomy.

use crate::account::PlanTier;
use crate::campaign::CampaignStatus;
use beacon_core::Violations;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the backing document store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Compare-and-swap lost against a concurrent write.
    #[error("version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },

    /// Insert of an id that already exists.
    #[error("duplicate record: {0}")]
    Duplicate(Uuid),

    /// Replace of an id that does not exist.
    #[error("missing record: {0}")]
    Missing(Uuid),

    /// The store could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Input rejected before any mutation.
    #[error(transparent)]
    Validation(#[from] Violations),

    /// A required entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The actor does not own the entity.
    #[error("not allowed to modify {entity} {id}")]
    Forbidden { entity: &'static str, id: Uuid },

    /// The actor's plan does not include the capability.
    #[error("the {plan} plan does not allow {action}")]
    PlanNotAllowed { plan: PlanTier, action: &'static str },

    /// Not enough ad credits.
    #[error("insufficient ad credits: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    /// Metering rejected because the campaign is not billable.
    #[error("campaign {id} is not accepting events (status {status})")]
    CampaignClosed { id: Uuid, status: CampaignStatus },

    /// A lifecycle change the state machine does not allow.
    #[error("cannot move {entity} from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// A store call did not answer in time.
    #[error("{operation} timed out")]
    DependencyTimeout { operation: &'static str },

    /// Compare-and-swap retries ran out.
    #[error("too many concurrent updates to {entity} {id}")]
    Conflict { entity: &'static str, id: Uuid },

    /// Any other store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DependencyTimeout { .. }
                | Self::Conflict { .. }
                | Self::Store(StoreError::Unavailable(_))
        )
    }

    /// Short machine-readable name, used for metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Forbidden { .. } => "forbidden",
            Self::PlanNotAllowed { .. } => "plan_not_allowed",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::CampaignClosed { .. } => "campaign_closed",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::DependencyTimeout { .. } => "timeout",
            Self::Conflict { .. } => "conflict",
            Self::Store(_) => "store",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(LedgerError::DependencyTimeout { operation: "get" }.is_retryable());
        assert!(LedgerError::Store(StoreError::Unavailable("down".into())).is_retryable());
        assert!(!LedgerError::not_found("campaign", "x").is_retryable());
        assert!(!LedgerError::Validation(Violations::single("a", "b")).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = LedgerError::InsufficientFunds {
            required: Decimal::new(50, 0),
            available: Decimal::new(10, 0),
        };
        assert_eq!(
            err.to_string(),
            "insufficient ad credits: required 50, available 10"
        );
        assert_eq!(LedgerError::not_found("lead", "abc").to_string(), "lead not found: abc");
    }
}
