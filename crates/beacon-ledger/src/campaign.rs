//! Advertising campaigns and their per-event spend rules.

use crate::dedup::DedupWindow;
use crate::error::LedgerError;
use beacon_core::Violations;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Smallest budget a campaign can be funded with.
pub const MIN_BUDGET: Decimal = dec!(20);

/// Maximum campaigns returned by one eligibility query.
pub const ELIGIBLE_LIMIT: usize = 5;

const MAX_TITLE_LENGTH: usize = 100;
const MAX_DESCRIPTION_LENGTH: usize = 500;

/// Product category shared by targeting and content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Fashion,
    Electronics,
    Beauty,
    Home,
    Toys,
    Food,
    #[default]
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallToAction {
    #[default]
    ShopNow,
    LearnMore,
    GetQuote,
    ContactUs,
    BuyWholesale,
}

/// Campaign lifecycle.
///
/// ```text
/// draft ─▶ pending ─▶ active ◀─▶ paused
///              │         │         │
///              ▼         ▼         ▼
///          rejected   completed ◀──┘
/// ```
///
/// Cancelling moves any draft, pending, active or paused campaign to
/// paused and returns its unspent budget. A refunded campaign never
/// becomes active again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    #[default]
    Pending,
    Active,
    Paused,
    Completed,
    Rejected,
}

impl CampaignStatus {
    /// No further metering once here.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }

    /// Transitions an owner may request directly.
    #[must_use]
    pub fn owner_can_move_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Pending) | (Self::Active, Self::Paused) | (Self::Paused, Self::Active)
        )
    }

    /// Transitions a reviewer may apply.
    #[must_use]
    pub fn reviewer_can_move_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active) | (Self::Pending, Self::Rejected)
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a campaign pays for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PricingModel {
    /// Per thousand impressions.
    #[default]
    #[serde(rename = "cpm")]
    PerMille,
    /// Per click.
    #[serde(rename = "cpc")]
    PerClick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    #[serde(rename = "type", default)]
    pub model: PricingModel,
    pub amount: Decimal,
}

impl Pricing {
    #[must_use]
    pub fn per_mille(amount: Decimal) -> Self {
        Self {
            model: PricingModel::PerMille,
            amount,
        }
    }

    #[must_use]
    pub fn per_click(amount: Decimal) -> Self {
        Self {
            model: PricingModel::PerClick,
            amount,
        }
    }

    /// Price of a single event under this model.
    #[must_use]
    pub fn cost_of(&self, event: BillableEvent) -> Decimal {
        match (self.model, event) {
            (PricingModel::PerMille, BillableEvent::Impression) => self.amount / dec!(1000),
            (PricingModel::PerClick, BillableEvent::Click) => self.amount,
            _ => Decimal::ZERO,
        }
    }
}

impl Default for Pricing {
    fn default() -> Self {
        Self::per_mille(dec!(20))
    }
}

/// A metered ad event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BillableEvent {
    Impression,
    Click,
}

impl BillableEvent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Impression => "impression",
            Self::Click => "click",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub total: Decimal,
    pub spent: Decimal,
    /// Stored for reporting only.
    pub daily: Option<Decimal>,
}

impl Budget {
    #[must_use]
    pub fn remaining(&self) -> Decimal {
        (self.total - self.spent).max(Decimal::ZERO)
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.spent >= self.total
    }
}

/// Who a campaign is shown to. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Targeting {
    pub categories: Vec<Category>,
    pub countries: Vec<String>,
    pub regions: Vec<String>,
}

impl Targeting {
    /// Category filters require membership; an empty country list means
    /// every country.
    #[must_use]
    pub fn matches(&self, category: Option<Category>, country: Option<&str>) -> bool {
        let category_ok = category.map_or(true, |c| self.categories.contains(&c));
        let country_ok = country.map_or(true, |c| {
            self.countries.is_empty() || self.countries.iter().any(|t| t.eq_ignore_ascii_case(c))
        });
        category_ok && country_ok
    }
}

/// An advertising campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: Uuid,
    pub owner: Uuid,
    pub campaign_name: String,
    pub title: String,
    pub description: String,
    pub image: String,
    pub video_url: Option<String>,
    pub destination_url: String,
    pub call_to_action: CallToAction,
    pub targeting: Targeting,
    pub budget: Budget,
    pub pricing: Pricing,
    pub impressions: u64,
    pub clicks: u64,
    pub leads: u64,
    pub status: CampaignStatus,
    pub active: bool,
    pub featured: bool,
    pub starts_at: Option<u64>,
    pub ends_at: Option<u64>,
    /// Amount returned to the owner; set at most once.
    pub refunded: Option<Decimal>,
    /// The refund reached the owner's balance.
    #[serde(default)]
    pub refund_paid: bool,
    pub created_at: u64,
    /// Event keys already metered and what each one charged.
    #[serde(skip)]
    pub metered: DedupWindow<Decimal>,
}

impl Campaign {
    /// Whether impressions and clicks are currently charged.
    #[must_use]
    pub fn is_billable(&self) -> bool {
        self.status == CampaignStatus::Active && self.active
    }

    /// Count one event and charge for it, completing the campaign when the
    /// budget runs out. Returns the amount charged.
    ///
    /// The charge is clamped to the remaining budget, so `spent` never
    /// exceeds `total`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::CampaignClosed`] if the campaign is not billable; the
    /// record is left untouched.
    pub fn meter(&mut self, event: BillableEvent) -> Result<Decimal, LedgerError> {
        if !self.is_billable() {
            return Err(LedgerError::CampaignClosed {
                id: self.id,
                status: self.status,
            });
        }

        match event {
            BillableEvent::Impression => self.impressions += 1,
            BillableEvent::Click => self.clicks += 1,
        }

        let charged = self.pricing.cost_of(event).min(self.budget.remaining());
        self.budget.spent += charged;
        if self.budget.is_exhausted() {
            self.status = CampaignStatus::Completed;
            self.active = false;
        }
        Ok(charged)
    }

    /// Count an attributed lead. No spend effect.
    pub fn record_lead(&mut self) {
        self.leads += 1;
    }

    /// Click-through rate in percent, two decimal places.
    #[must_use]
    pub fn ctr(&self) -> Decimal {
        if self.impressions == 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(self.clicks) * dec!(100) / Decimal::from(self.impressions)).round_dp(2)
    }

    /// Spend per lead, two decimal places.
    #[must_use]
    pub fn cpl(&self) -> Decimal {
        if self.leads == 0 {
            return Decimal::ZERO;
        }
        (self.budget.spent / Decimal::from(self.leads)).round_dp(2)
    }

    /// Apply an owner edit.
    ///
    /// # Errors
    ///
    /// Invalid transitions and out-of-range caps are rejected before any
    /// field changes.
    pub fn apply_update(&mut self, update: &CampaignUpdate) -> Result<(), LedgerError> {
        if let Some(daily) = update.daily {
            let mut v = Violations::new();
            v.check(daily > Decimal::ZERO, "daily", "must be positive");
            v.check(daily <= self.budget.total, "daily", "must not exceed the total budget");
            v.into_result()?;
        }

        if let Some(next) = update.status.filter(|next| *next != self.status) {
            if !self.status.owner_can_move_to(next) {
                return Err(self.invalid_transition(next));
            }
            if next == CampaignStatus::Active && self.refunded.is_some() {
                return Err(Violations::single("status", "the budget of this campaign was refunded").into());
            }
            self.set_status(next);
        }
        if let Some(targeting) = &update.targeting {
            self.targeting = targeting.clone();
        }
        if let Some(daily) = update.daily {
            self.budget.daily = Some(daily);
        }
        Ok(())
    }

    pub(crate) fn set_status(&mut self, next: CampaignStatus) {
        self.status = next;
        match next {
            CampaignStatus::Active => self.active = true,
            CampaignStatus::Paused | CampaignStatus::Completed | CampaignStatus::Rejected => {
                self.active = false;
            }
            CampaignStatus::Draft | CampaignStatus::Pending => {}
        }
    }

    pub(crate) fn invalid_transition(&self, next: CampaignStatus) -> LedgerError {
        LedgerError::InvalidTransition {
            entity: "campaign",
            from: self.status.to_string(),
            to: next.to_string(),
        }
    }
}

/// A campaign with its derived read-time metrics.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignView {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub ctr: Decimal,
    pub cpl: Decimal,
}

impl From<Campaign> for CampaignView {
    fn from(campaign: Campaign) -> Self {
        Self {
            ctr: campaign.ctr(),
            cpl: campaign.cpl(),
            campaign,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBudget {
    pub total: Decimal,
    #[serde(default)]
    pub daily: Option<Decimal>,
}

/// Input for creating a campaign.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCampaign {
    pub campaign_name: String,
    pub title: String,
    pub description: String,
    pub image: String,
    #[serde(default)]
    pub video_url: Option<String>,
    pub destination_url: String,
    #[serde(default)]
    pub call_to_action: CallToAction,
    #[serde(default)]
    pub targeting: Targeting,
    pub budget: NewBudget,
    #[serde(default)]
    pub pricing: Pricing,
    /// Keep the campaign as a draft instead of submitting it for review.
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub starts_at: Option<u64>,
    #[serde(default)]
    pub ends_at: Option<u64>,
}

impl NewCampaign {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns all violated fields.
    pub fn validate(&self) -> Result<(), Violations> {
        let mut v = Violations::new();
        v.require(&self.campaign_name, "campaignName");
        v.require(&self.title, "title");
        v.max_len(&self.title, "title", MAX_TITLE_LENGTH);
        v.require(&self.description, "description");
        v.max_len(&self.description, "description", MAX_DESCRIPTION_LENGTH);
        v.require(&self.image, "image");
        v.check(
            is_http_url(&self.destination_url),
            "destinationUrl",
            "must be an http(s) URL",
        );
        v.check(
            self.budget.total >= MIN_BUDGET,
            "budget.total",
            format!("must be at least {MIN_BUDGET}"),
        );
        if let Some(daily) = self.budget.daily {
            v.check(
                daily > Decimal::ZERO && daily <= self.budget.total,
                "budget.daily",
                "must be positive and at most the total budget",
            );
        }
        v.check(self.pricing.amount > Decimal::ZERO, "pricing.amount", "must be positive");
        if let (Some(start), Some(end)) = (self.starts_at, self.ends_at) {
            v.check(end > start, "endsAt", "must be after startsAt");
        }
        v.into_result()
    }

    pub(crate) fn into_campaign(self, id: Uuid, owner: Uuid, now: u64) -> Campaign {
        let status = if self.draft {
            CampaignStatus::Draft
        } else {
            CampaignStatus::Pending
        };
        Campaign {
            id,
            owner,
            campaign_name: self.campaign_name.trim().to_string(),
            title: self.title,
            description: self.description,
            image: self.image,
            video_url: self.video_url,
            destination_url: self.destination_url,
            call_to_action: self.call_to_action,
            targeting: self.targeting,
            budget: Budget {
                total: self.budget.total,
                spent: Decimal::ZERO,
                daily: self.budget.daily,
            },
            pricing: self.pricing,
            impressions: 0,
            clicks: 0,
            leads: 0,
            status,
            active: true,
            featured: false,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            refunded: None,
            refund_paid: false,
            created_at: now,
            metered: DedupWindow::new(),
        }
    }
}

/// Owner edit of a campaign.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignUpdate {
    #[serde(default)]
    pub status: Option<CampaignStatus>,
    #[serde(default)]
    pub targeting: Option<Targeting>,
    #[serde(default)]
    pub daily: Option<Decimal>,
}

fn is_http_url(value: &str) -> bool {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    rest.is_some_and(|host| !host.is_empty())
}
