//! Accounts, roles, and plan tiers.

use crate::dedup::DedupWindow;
use beacon_core::Violations;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Subscription tier of an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    #[default]
    Free,
    Plus,
    Pro,
    Enterprise,
}

impl PlanTier {
    /// Fraction of gross ad revenue credited to content hosted on this plan.
    #[must_use]
    pub fn revenue_share(self) -> Decimal {
        match self {
            Self::Free => Decimal::ZERO,
            Self::Plus => dec!(0.70),
            Self::Pro => dec!(0.80),
            Self::Enterprise => dec!(0.85),
        }
    }

    #[must_use]
    pub fn can_create_content(self) -> bool {
        self != Self::Free
    }

    #[must_use]
    pub fn can_host_ads(self) -> bool {
        matches!(self, Self::Plus | Self::Pro | Self::Enterprise)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Plus => "plus",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Wholesaler,
    Seller,
    Admin,
}

/// Subscription state as reported by the payment processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    #[default]
    Inactive,
    Canceled,
    PastDue,
    Unpaid,
}

impl SubscriptionStatus {
    /// Whether this status revokes the paid plan.
    #[must_use]
    pub fn revokes_plan(self) -> bool {
        matches!(self, Self::Canceled | Self::Unpaid)
    }
}

/// A user of the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub plan: PlanTier,
    pub subscription_status: SubscriptionStatus,
    pub subscription_id: Option<String>,
    pub ad_credits: Decimal,
    pub company: Option<String>,
    pub created_at: u64,
    /// Transaction and saga keys already applied to this balance.
    #[serde(skip)]
    pub applied: DedupWindow<()>,
}

impl Account {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Input for [`Accounts::open`](crate::Accounts::open).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub plan: PlanTier,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub ad_credits: Decimal,
}

impl NewAccount {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns all violated fields.
    pub fn validate(&self) -> Result<(), Violations> {
        let mut v = Violations::new();
        v.require(&self.name, "name");
        v.max_len(&self.name, "name", 100);
        v.check(is_email(&self.email), "email", "must be a valid email address");
        v.check(
            self.ad_credits >= Decimal::ZERO,
            "adCredits",
            "must not be negative",
        );
        v.into_result()
    }
}

pub(crate) fn is_email(value: &str) -> bool {
    let value = value.trim();
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    }
}
