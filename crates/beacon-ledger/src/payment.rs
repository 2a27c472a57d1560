//! Payment processor notifications.

use crate::account::{PlanTier, SubscriptionStatus};
use beacon_core::Violations;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Smallest credit purchase the processor may report.
pub const MIN_CREDIT_PURCHASE: Decimal = dec!(20);

/// A notification delivered (possibly more than once) by the processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentNotification {
    /// Processor-side id; replays carry the same value.
    pub transaction_id: String,
    #[serde(flatten)]
    pub event: PaymentEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentEvent {
    #[serde(rename_all = "camelCase")]
    CreditsPurchased { account_id: Uuid, amount: Decimal },
    #[serde(rename_all = "camelCase")]
    SubscriptionActivated {
        account_id: Uuid,
        plan: PlanTier,
        subscription_id: String,
    },
    #[serde(rename_all = "camelCase")]
    SubscriptionUpdated {
        subscription_id: String,
        status: SubscriptionStatus,
    },
    #[serde(rename_all = "camelCase")]
    SubscriptionCanceled { subscription_id: String },
}

impl PaymentNotification {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns all violated fields.
    pub fn validate(&self) -> Result<(), Violations> {
        let mut v = Violations::new();
        v.require(&self.transaction_id, "transactionId");
        match &self.event {
            PaymentEvent::CreditsPurchased { amount, .. } => {
                v.check(
                    *amount >= MIN_CREDIT_PURCHASE,
                    "amount",
                    format!("must be at least {MIN_CREDIT_PURCHASE}"),
                );
            }
            PaymentEvent::SubscriptionActivated {
                plan,
                subscription_id,
                ..
            } => {
                v.check(*plan != PlanTier::Free, "plan", "must be a paid plan");
                v.require(subscription_id, "subscriptionId");
            }
            PaymentEvent::SubscriptionUpdated {
                subscription_id, ..
            }
            | PaymentEvent::SubscriptionCanceled { subscription_id } => {
                v.require(subscription_id, "subscriptionId");
            }
        }
        v.into_result()
    }
}

/// Result of applying a notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    /// The affected account; `None` when the subscription is unknown.
    pub account_id: Option<Uuid>,
    /// The transaction had already been applied; nothing changed.
    pub duplicate: bool,
    pub ad_credits: Option<Decimal>,
    pub plan: Option<PlanTier>,
}

impl PaymentOutcome {
    pub(crate) fn ignored() -> Self {
        Self {
            account_id: None,
            duplicate: false,
            ad_credits: None,
            plan: None,
        }
    }
}
