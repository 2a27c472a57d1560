//! Campaign funding and metering.
//!
//! Spend changes go through a compare-and-swap on the campaign record, so
//! concurrent events on one campaign serialize and the exhaustion check
//! always sees the spend it just added. Operations that touch a second
//! entity (an account balance or a content unit) run that step after the
//! first one commits and key it so that a retry never applies it twice.

use crate::account::Account;
use crate::accounts::Accounts;
use crate::campaign::{
    BillableEvent, Campaign, CampaignStatus, CampaignUpdate, CampaignView, Category, NewCampaign,
    ELIGIBLE_LIMIT,
};
use crate::error::LedgerError;
use crate::gateway::Gateway;
use crate::revenue::{Allocation, RevenueAllocator};
use crate::store::{CampaignOrder, CampaignQuery};
use beacon_core::now_millis;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

/// One delivery of a billable event.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterRequest {
    /// Client-chosen id. Repeating it makes the call idempotent.
    #[serde(default)]
    pub event_id: Option<Uuid>,
    /// Content unit the ad was shown on.
    #[serde(default)]
    pub content_id: Option<Uuid>,
}

/// Result of metering one event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterOutcome {
    /// Campaign state after the event.
    pub campaign: Campaign,
    /// Amount added to `spent` by this event.
    pub charged: Decimal,
    /// The event id had already been metered.
    pub duplicate: bool,
    pub allocation: Option<Allocation>,
}

/// Filters for [`MeteringEngine::find_eligible`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdFilter {
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub country: Option<String>,
}

/// Admin review of a pending campaign.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReviewDecision {
    pub status: CampaignStatus,
    #[serde(default)]
    pub featured: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStats {
    pub total: usize,
    pub active: usize,
    pub impressions: u64,
    pub clicks: u64,
    pub spent: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct OwnedCampaigns {
    pub campaigns: Vec<CampaignView>,
    pub stats: CampaignStats,
}

/// Campaign lifecycle and metering.
#[derive(Clone)]
pub struct MeteringEngine {
    gateway: Gateway,
    accounts: Accounts,
    allocator: RevenueAllocator,
}

impl MeteringEngine {
    pub(crate) fn new(gateway: Gateway, accounts: Accounts, allocator: RevenueAllocator) -> Self {
        Self {
            gateway,
            accounts,
            allocator,
        }
    }

    /// Create a campaign funded from the owner's ad credits.
    ///
    /// The budget is debited first. If storing the campaign then fails,
    /// the debit is reversed.
    ///
    /// # Errors
    ///
    /// Validation failures, [`LedgerError::InsufficientFunds`] when the
    /// balance is below the budget, and store errors.
    pub async fn create_campaign(&self, owner: Uuid, input: NewCampaign) -> Result<Campaign, LedgerError> {
        input.validate()?;
        let id = Uuid::new_v4();
        let total = input.budget.total;
        let campaign = input.into_campaign(id, owner, now_millis());

        let balance = self
            .accounts
            .debit(owner, total, &format!("campaign:{id}:fund"))
            .await?;

        match self.gateway.insert(campaign).await {
            Ok(campaign) => {
                info!(campaign = %id, owner = %owner, budget = %total, %balance, status = %campaign.status, "Campaign created");
                Ok(campaign)
            }
            Err(err) => {
                error!(campaign = %id, error = %err, "Storing campaign failed, reversing funding");
                let key = format!("campaign:{id}:fund-reversal");
                if let Err(undo) = self
                    .gateway
                    .retry("reverse funding", || self.accounts.credit(owner, total, &key))
                    .await
                {
                    error!(campaign = %id, owner = %owner, error = %undo, "Funding reversal failed");
                }
                Err(err)
            }
        }
    }

    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the campaign does not exist.
    pub async fn get_campaign(&self, id: Uuid) -> Result<Campaign, LedgerError> {
        Ok(self.gateway.load::<Campaign>(id).await?.record)
    }

    /// Campaigns of `owner`, newest first, with aggregate stats.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn list_owned(&self, owner: Uuid) -> Result<OwnedCampaigns, LedgerError> {
        let query = CampaignQuery {
            owner: Some(owner),
            order: CampaignOrder::Newest,
            ..CampaignQuery::default()
        };
        let campaigns = self
            .gateway
            .call("find_campaigns", self.gateway.store().find_campaigns(&query))
            .await?;

        let stats = CampaignStats {
            total: campaigns.len(),
            active: campaigns.iter().filter(|c| c.is_billable()).count(),
            impressions: campaigns.iter().map(|c| c.impressions).sum(),
            clicks: campaigns.iter().map(|c| c.clicks).sum(),
            spent: campaigns.iter().map(|c| c.budget.spent).sum(),
        };
        Ok(OwnedCampaigns {
            campaigns: campaigns.into_iter().map(CampaignView::from).collect(),
            stats,
        })
    }

    /// Billable campaigns matching `filter`, featured first then newest,
    /// at most five.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn find_eligible(&self, filter: &AdFilter) -> Result<Vec<Campaign>, LedgerError> {
        let query = CampaignQuery {
            status: Some(CampaignStatus::Active),
            active: Some(true),
            category: filter.category,
            country: filter.country.clone(),
            order: CampaignOrder::FeaturedThenNewest,
            limit: Some(ELIGIBLE_LIMIT),
            ..CampaignQuery::default()
        };
        self.gateway
            .call("find_campaigns", self.gateway.store().find_campaigns(&query))
            .await
    }

    /// Apply an owner edit.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Forbidden`] for non-owners, invalid transitions and
    /// values, and store errors.
    pub async fn update_campaign(
        &self,
        actor: Uuid,
        id: Uuid,
        update: CampaignUpdate,
    ) -> Result<Campaign, LedgerError> {
        let (campaign, ()) = self
            .gateway
            .mutate::<Campaign, _, _>(id, |c| {
                ensure_owner(c, actor)?;
                c.apply_update(&update)
            })
            .await?;
        debug!(campaign = %id, status = %campaign.status, "Campaign updated");
        Ok(campaign)
    }

    /// Approve or reject a pending campaign. Rejection refunds the budget.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Forbidden`] unless `reviewer` is an admin, invalid
    /// transitions, and store errors.
    pub async fn review_campaign(
        &self,
        reviewer: Uuid,
        id: Uuid,
        decision: ReviewDecision,
    ) -> Result<Campaign, LedgerError> {
        let reviewer = self.gateway.load::<Account>(reviewer).await?.record;
        if !reviewer.is_admin() {
            return Err(LedgerError::Forbidden {
                entity: "campaign",
                id,
            });
        }

        let (campaign, refund) = self
            .gateway
            .mutate::<Campaign, _, _>(id, |c| {
                // A repeated rejection only retries the refund payout.
                let repeated = c.status == CampaignStatus::Rejected && decision.status == c.status;
                if !repeated {
                    if !c.status.reviewer_can_move_to(decision.status) {
                        return Err(c.invalid_transition(decision.status));
                    }
                    c.set_status(decision.status);
                }
                if let Some(featured) = decision.featured {
                    c.featured = featured;
                }
                if c.status == CampaignStatus::Rejected {
                    return Ok(Some(settle_refund(c)));
                }
                Ok(None)
            })
            .await?;

        info!(campaign = %id, reviewer = %reviewer.id, status = %campaign.status, "Campaign reviewed");
        match refund {
            Some(refund) => self.pay_refund(campaign, refund).await,
            None => Ok(campaign),
        }
    }

    /// Stop a campaign and return its unspent budget to the owner.
    ///
    /// The refund is paid at most once no matter how often this is called;
    /// calling again after a failed payout retries the payout.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Forbidden`] for non-owners and store errors.
    pub async fn cancel_campaign(&self, actor: Uuid, id: Uuid) -> Result<Campaign, LedgerError> {
        let (campaign, refund) = self
            .gateway
            .mutate::<Campaign, _, _>(id, |c| {
                ensure_owner(c, actor)?;
                if !c.status.is_terminal() {
                    c.set_status(CampaignStatus::Paused);
                }
                c.active = false;
                Ok(settle_refund(c))
            })
            .await?;

        info!(campaign = %id, refund = %refund, "Campaign canceled");
        self.pay_refund(campaign, refund).await
    }

    /// Meter one impression.
    ///
    /// # Errors
    ///
    /// See [`record_click`](Self::record_click).
    pub async fn record_impression(&self, id: Uuid, request: MeterRequest) -> Result<MeterOutcome, LedgerError> {
        self.record(id, BillableEvent::Impression, request).await
    }

    /// Meter one click.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] for an unknown campaign,
    /// [`LedgerError::CampaignClosed`] once the campaign stopped billing,
    /// and store errors. A failure while crediting the content unit is
    /// returned after the campaign side committed; retrying with the same
    /// `event_id` completes it without charging again.
    pub async fn record_click(&self, id: Uuid, request: MeterRequest) -> Result<MeterOutcome, LedgerError> {
        self.record(id, BillableEvent::Click, request).await
    }

    /// Count an attributed lead. Accepted in any status.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] and store errors.
    pub async fn record_lead(&self, id: Uuid) -> Result<Campaign, LedgerError> {
        let (campaign, ()) = self
            .gateway
            .mutate::<Campaign, _, _>(id, |c| {
                c.record_lead();
                Ok(())
            })
            .await?;
        debug!(campaign = %id, leads = campaign.leads, "Lead attributed");
        Ok(campaign)
    }

    async fn record(
        &self,
        id: Uuid,
        event: BillableEvent,
        request: MeterRequest,
    ) -> Result<MeterOutcome, LedgerError> {
        let event_key = format!(
            "{}:{}",
            event.as_str(),
            request.event_id.unwrap_or_else(Uuid::new_v4)
        );
        let window = self.gateway.config().dedup_window;

        let (campaign, (charged, duplicate)) = self
            .gateway
            .mutate::<Campaign, _, _>(id, |c| {
                if let Some(charged) = c.metered.get(&event_key) {
                    return Ok((*charged, true));
                }
                let charged = c.meter(event)?;
                c.metered.record(event_key.as_str(), charged, window);
                Ok((charged, false))
            })
            .await?;

        if !duplicate && campaign.status == CampaignStatus::Completed {
            info!(campaign = %id, spent = %campaign.budget.spent, "Campaign budget exhausted");
        }
        debug!(campaign = %id, event = event.as_str(), %charged, duplicate, "Event metered");

        let allocation = match request.content_id {
            Some(content_id) => {
                self.gateway
                    .retry("allocate revenue", || {
                        self.allocator.allocate(content_id, &event_key, event, charged)
                    })
                    .await?
            }
            None => None,
        };

        Ok(MeterOutcome {
            campaign,
            charged,
            duplicate,
            allocation,
        })
    }

    /// Credit the settled refund, then mark the campaign paid.
    ///
    /// The account's idempotency key only covers a crash between the credit
    /// and the marker write; once the marker is set no credit is attempted.
    async fn pay_refund(&self, campaign: Campaign, refund: Decimal) -> Result<Campaign, LedgerError> {
        if campaign.refund_paid {
            return Ok(campaign);
        }
        if refund > Decimal::ZERO {
            let key = format!("campaign:{}:refund", campaign.id);
            let balance = self
                .gateway
                .retry("refund budget", || {
                    self.accounts.credit(campaign.owner, refund, &key)
                })
                .await?;
            info!(campaign = %campaign.id, owner = %campaign.owner, %refund, %balance, "Budget refunded");
        }

        let (campaign, ()) = self
            .gateway
            .mutate::<Campaign, _, _>(campaign.id, |c| {
                c.refund_paid = true;
                Ok(())
            })
            .await?;
        Ok(campaign)
    }
}

fn ensure_owner(campaign: &Campaign, actor: Uuid) -> Result<(), LedgerError> {
    if campaign.owner == actor {
        Ok(())
    } else {
        Err(LedgerError::Forbidden {
            entity: "campaign",
            id: campaign.id,
        })
    }
}

/// Fix the refund amount on first call and return it on every call.
fn settle_refund(campaign: &mut Campaign) -> Decimal {
    let remaining = campaign.budget.remaining();
    *campaign.refunded.get_or_insert(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::tests::sample_new_campaign;
    use crate::campaign::Pricing;
    use crate::store::{MemoryStore, Table};
    use crate::testing::{advertiser, launch, open, shipment};
    use crate::{Ledger, LedgerConfig, PaymentEvent, PaymentNotification, PlanTier, Role};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn impression() -> MeterRequest {
        MeterRequest::default()
    }

    #[tokio::test]
    async fn test_create_debits_budget() {
        let ledger = Ledger::in_memory();
        let owner = advertiser(&ledger, dec!(100)).await;

        let campaign = ledger
            .metering()
            .create_campaign(owner.id, sample_new_campaign(dec!(60), Pricing::default()))
            .await
            .unwrap();
        assert_eq!(campaign.status, CampaignStatus::Pending);
        assert_eq!(ledger.accounts().get(owner.id).await.unwrap().ad_credits, dec!(40));

        let err = ledger
            .metering()
            .create_campaign(owner.id, sample_new_campaign(dec!(60), Pricing::default()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds { required, available }
                if required == dec!(60) && available == dec!(40)
        ));
        assert_eq!(ledger.accounts().get(owner.id).await.unwrap().ad_credits, dec!(40));
        assert_eq!(ledger.metering().list_owned(owner.id).await.unwrap().stats.total, 1);
    }

    #[tokio::test]
    async fn test_invalid_campaign_has_no_effect() {
        let ledger = Ledger::in_memory();
        let owner = advertiser(&ledger, dec!(100)).await;

        let err = ledger
            .metering()
            .create_campaign(owner.id, sample_new_campaign(dec!(5), Pricing::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ref v) if v.has("budget.total")));
        assert_eq!(ledger.accounts().get(owner.id).await.unwrap().ad_credits, dec!(100));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_after_two_thousand_impressions() {
        let ledger = Ledger::in_memory();
        let owner = advertiser(&ledger, dec!(20)).await;
        let campaign = launch(&ledger, owner.id, dec!(20), Pricing::per_mille(dec!(10))).await;

        for _ in 0..1999 {
            ledger
                .metering()
                .record_impression(campaign.id, impression())
                .await
                .unwrap();
        }
        let last = ledger
            .metering()
            .record_impression(campaign.id, impression())
            .await
            .unwrap();
        assert_eq!(last.campaign.budget.spent, dec!(20));
        assert_eq!(last.campaign.status, CampaignStatus::Completed);
        assert!(!last.campaign.active);

        let err = ledger
            .metering()
            .record_impression(campaign.id, impression())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::CampaignClosed { status: CampaignStatus::Completed, .. }));

        let stored = ledger.metering().get_campaign(campaign.id).await.unwrap();
        assert_eq!(stored.impressions, 2000);
        assert_eq!(stored.budget.spent, dec!(20));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_clicks_never_overspend() {
        let config = LedgerConfig {
            cas_attempts: 10_000,
            ..LedgerConfig::default()
        };
        let ledger = Ledger::new(Arc::new(MemoryStore::new()), config);
        let owner = advertiser(&ledger, dec!(20)).await;
        let campaign = launch(&ledger, owner.id, dec!(20), Pricing::per_click(dec!(1))).await;

        let id = campaign.id;
        let mut tasks = Vec::new();
        for _ in 0..64 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move {
                ledger
                    .metering()
                    .record_click(id, MeterRequest::default())
                    .await
            }));
        }

        let mut charged = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(outcome) => {
                    assert_eq!(outcome.charged, dec!(1));
                    charged += 1;
                }
                Err(err) => assert!(matches!(err, LedgerError::CampaignClosed { .. }), "{err}"),
            }
        }

        let stored = ledger.metering().get_campaign(campaign.id).await.unwrap();
        assert_eq!(charged, 20);
        assert_eq!(stored.clicks, 20);
        assert_eq!(stored.budget.spent, stored.budget.total);
        assert_eq!(stored.status, CampaignStatus::Completed);
    }

    #[tokio::test]
    async fn test_pending_campaign_rejects_metering() {
        let ledger = Ledger::in_memory();
        let owner = advertiser(&ledger, dec!(50)).await;
        let campaign = ledger
            .metering()
            .create_campaign(owner.id, sample_new_campaign(dec!(50), Pricing::default()))
            .await
            .unwrap();

        let err = ledger
            .metering()
            .record_impression(campaign.id, impression())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::CampaignClosed { status: CampaignStatus::Pending, .. }));
        assert_eq!(
            ledger.metering().get_campaign(campaign.id).await.unwrap().impressions,
            0
        );
    }

    #[tokio::test]
    async fn test_unknown_campaign() {
        let ledger = Ledger::in_memory();
        let err = ledger
            .metering()
            .record_click(Uuid::new_v4(), MeterRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { entity: "campaign", .. }));
    }

    #[tokio::test]
    async fn test_impression_credits_pro_host() {
        let ledger = Ledger::in_memory();
        let owner = advertiser(&ledger, dec!(20)).await;
        let host = open(&ledger, PlanTier::Pro, Role::Wholesaler, Decimal::ZERO).await;
        let unit = shipment(&ledger, host.id).await;
        let campaign = launch(&ledger, owner.id, dec!(20), Pricing::per_mille(dec!(10))).await;

        let outcome = ledger
            .metering()
            .record_impression(
                campaign.id,
                MeterRequest {
                    event_id: None,
                    content_id: Some(unit.id),
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.charged, dec!(0.01));
        let allocation = outcome.allocation.unwrap();
        assert_eq!(allocation.credited, dec!(0.008));
        assert_eq!(
            ledger.shipments().get(unit.id).await.unwrap().ad_revenue,
            dec!(0.008)
        );
    }

    #[tokio::test]
    async fn test_click_on_unmonetized_content_counts_without_revenue() {
        let ledger = Ledger::in_memory();
        let owner = advertiser(&ledger, dec!(20)).await;
        let host = open(&ledger, PlanTier::Plus, Role::Wholesaler, Decimal::ZERO).await;
        let unit = shipment(&ledger, host.id).await;
        ledger
            .shipments()
            .update(
                host.id,
                unit.id,
                crate::ContentUpdate {
                    ads_enabled: Some(false),
                    ..crate::ContentUpdate::default()
                },
            )
            .await
            .unwrap();
        let campaign = launch(&ledger, owner.id, dec!(20), Pricing::per_click(dec!(2))).await;

        let outcome = ledger
            .metering()
            .record_click(
                campaign.id,
                MeterRequest {
                    event_id: None,
                    content_id: Some(unit.id),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.charged, dec!(2));
        assert_eq!(outcome.allocation.unwrap().credited, Decimal::ZERO);

        let unit = ledger.shipments().get(unit.id).await.unwrap();
        assert_eq!(unit.clicks, 1);
        assert_eq!(unit.ad_revenue, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_missing_content_is_a_no_op() {
        let ledger = Ledger::in_memory();
        let owner = advertiser(&ledger, dec!(20)).await;
        let campaign = launch(&ledger, owner.id, dec!(20), Pricing::per_click(dec!(1))).await;

        let outcome = ledger
            .metering()
            .record_click(
                campaign.id,
                MeterRequest {
                    event_id: None,
                    content_id: Some(Uuid::new_v4()),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.charged, dec!(1));
        assert!(outcome.allocation.is_none());
    }

    #[tokio::test]
    async fn test_replayed_event_is_charged_once() {
        let ledger = Ledger::in_memory();
        let owner = advertiser(&ledger, dec!(20)).await;
        let host = open(&ledger, PlanTier::Enterprise, Role::Wholesaler, Decimal::ZERO).await;
        let unit = shipment(&ledger, host.id).await;
        let campaign = launch(&ledger, owner.id, dec!(20), Pricing::per_click(dec!(2))).await;

        let request = MeterRequest {
            event_id: Some(Uuid::new_v4()),
            content_id: Some(unit.id),
        };
        let first = ledger.metering().record_click(campaign.id, request).await.unwrap();
        let second = ledger.metering().record_click(campaign.id, request).await.unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(second.charged, dec!(2));
        assert_eq!(second.campaign.clicks, 1);
        assert_eq!(second.campaign.budget.spent, dec!(2));
        assert!(second.allocation.unwrap().duplicate);

        let unit = ledger.shipments().get(unit.id).await.unwrap();
        assert_eq!(unit.clicks, 1);
        assert_eq!(unit.ad_revenue, dec!(1.70));
    }

    #[tokio::test]
    async fn test_cancel_refunds_exactly_once() {
        let ledger = Ledger::in_memory();
        let owner = advertiser(&ledger, dec!(50)).await;
        let campaign = launch(&ledger, owner.id, dec!(50), Pricing::per_click(dec!(5))).await;
        for _ in 0..2 {
            ledger
                .metering()
                .record_click(campaign.id, MeterRequest::default())
                .await
                .unwrap();
        }

        let canceled = ledger.metering().cancel_campaign(owner.id, campaign.id).await.unwrap();
        assert_eq!(canceled.status, CampaignStatus::Paused);
        assert!(!canceled.active);
        assert_eq!(canceled.refunded, Some(dec!(40)));
        assert_eq!(ledger.accounts().get(owner.id).await.unwrap().ad_credits, dec!(40));

        ledger.metering().cancel_campaign(owner.id, campaign.id).await.unwrap();
        assert_eq!(ledger.accounts().get(owner.id).await.unwrap().ad_credits, dec!(40));

        let resume = CampaignUpdate {
            status: Some(CampaignStatus::Active),
            ..CampaignUpdate::default()
        };
        assert!(matches!(
            ledger.metering().update_campaign(owner.id, campaign.id, resume).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_repeated_cancel_pays_nothing_after_key_eviction() {
        let config = LedgerConfig {
            dedup_window: 4,
            ..LedgerConfig::default()
        };
        let ledger = Ledger::new(Arc::new(MemoryStore::new()), config);
        let owner = advertiser(&ledger, dec!(50)).await;
        let campaign = launch(&ledger, owner.id, dec!(50), Pricing::default()).await;

        let canceled = ledger.metering().cancel_campaign(owner.id, campaign.id).await.unwrap();
        assert!(canceled.refund_paid);
        assert_eq!(ledger.accounts().get(owner.id).await.unwrap().ad_credits, dec!(50));

        // Enough later payments to push the refund key out of the window.
        for n in 0..4 {
            ledger
                .accounts()
                .apply_payment(PaymentNotification {
                    transaction_id: format!("tx-{n}"),
                    event: PaymentEvent::CreditsPurchased {
                        account_id: owner.id,
                        amount: dec!(20),
                    },
                })
                .await
                .unwrap();
        }
        assert_eq!(ledger.accounts().get(owner.id).await.unwrap().ad_credits, dec!(130));

        ledger.metering().cancel_campaign(owner.id, campaign.id).await.unwrap();
        assert_eq!(ledger.accounts().get(owner.id).await.unwrap().ad_credits, dec!(130));
    }

    #[tokio::test]
    async fn test_cancel_pending_campaign_blocks_approval() {
        let ledger = Ledger::in_memory();
        let owner = advertiser(&ledger, dec!(30)).await;
        let admin = open(&ledger, PlanTier::Free, Role::Admin, Decimal::ZERO).await;
        let campaign = ledger
            .metering()
            .create_campaign(owner.id, sample_new_campaign(dec!(30), Pricing::default()))
            .await
            .unwrap();

        let canceled = ledger.metering().cancel_campaign(owner.id, campaign.id).await.unwrap();
        assert_eq!(canceled.status, CampaignStatus::Paused);
        assert!(!canceled.active);
        assert_eq!(ledger.accounts().get(owner.id).await.unwrap().ad_credits, dec!(30));

        let approve = ReviewDecision {
            status: CampaignStatus::Active,
            featured: None,
        };
        assert!(matches!(
            ledger.metering().review_campaign(admin.id, campaign.id, approve).await,
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_only_owner_can_edit() {
        let ledger = Ledger::in_memory();
        let owner = advertiser(&ledger, dec!(50)).await;
        let stranger = advertiser(&ledger, Decimal::ZERO).await;
        let campaign = launch(&ledger, owner.id, dec!(50), Pricing::default()).await;

        let pause = CampaignUpdate {
            status: Some(CampaignStatus::Paused),
            ..CampaignUpdate::default()
        };
        assert!(matches!(
            ledger.metering().update_campaign(stranger.id, campaign.id, pause.clone()).await,
            Err(LedgerError::Forbidden { .. })
        ));
        assert!(matches!(
            ledger.metering().cancel_campaign(stranger.id, campaign.id).await,
            Err(LedgerError::Forbidden { .. })
        ));

        let paused = ledger
            .metering()
            .update_campaign(owner.id, campaign.id, pause)
            .await
            .unwrap();
        assert!(!paused.is_billable());
        assert!(ledger
            .metering()
            .record_impression(campaign.id, impression())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_review_requires_admin_and_rejection_refunds() {
        let ledger = Ledger::in_memory();
        let owner = advertiser(&ledger, dec!(30)).await;
        let admin = open(&ledger, PlanTier::Free, Role::Admin, Decimal::ZERO).await;
        let campaign = ledger
            .metering()
            .create_campaign(owner.id, sample_new_campaign(dec!(30), Pricing::default()))
            .await
            .unwrap();

        let reject = ReviewDecision {
            status: CampaignStatus::Rejected,
            featured: None,
        };
        assert!(matches!(
            ledger.metering().review_campaign(owner.id, campaign.id, reject).await,
            Err(LedgerError::Forbidden { .. })
        ));

        let rejected = ledger
            .metering()
            .review_campaign(admin.id, campaign.id, reject)
            .await
            .unwrap();
        assert_eq!(rejected.status, CampaignStatus::Rejected);
        assert_eq!(ledger.accounts().get(owner.id).await.unwrap().ad_credits, dec!(30));

        // Repeating the rejection pays nothing more.
        ledger
            .metering()
            .review_campaign(admin.id, campaign.id, reject)
            .await
            .unwrap();
        assert_eq!(ledger.accounts().get(owner.id).await.unwrap().ad_credits, dec!(30));

        let approve = ReviewDecision {
            status: CampaignStatus::Active,
            featured: None,
        };
        assert!(matches!(
            ledger.metering().review_campaign(admin.id, campaign.id, approve).await,
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_find_eligible_order_and_cap() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone(), LedgerConfig::default());
        let owner = Uuid::new_v4();

        for (created_at, featured, countries, status) in [
            (1, false, vec![], CampaignStatus::Active),
            (2, false, vec!["US".to_string()], CampaignStatus::Active),
            (3, true, vec![], CampaignStatus::Active),
            (4, false, vec!["FR".to_string()], CampaignStatus::Active),
            (5, false, vec![], CampaignStatus::Paused),
            (6, false, vec![], CampaignStatus::Active),
            (7, true, vec!["US".to_string()], CampaignStatus::Active),
            (8, false, vec![], CampaignStatus::Active),
        ] {
            let mut campaign = sample_new_campaign(dec!(20), Pricing::default())
                .into_campaign(Uuid::new_v4(), owner, created_at);
            campaign.featured = featured;
            campaign.targeting.countries = countries;
            campaign.set_status(status);
            store.campaigns.insert(campaign.id, campaign).await.unwrap();
        }

        let found = ledger
            .metering()
            .find_eligible(&AdFilter {
                category: None,
                country: Some("US".into()),
            })
            .await
            .unwrap();
        let order: Vec<u64> = found.iter().map(|c| c.created_at).collect();
        assert_eq!(order, vec![7, 3, 8, 6, 2]);

        let fashion = ledger
            .metering()
            .find_eligible(&AdFilter {
                category: Some(Category::Fashion),
                country: None,
            })
            .await
            .unwrap();
        assert!(fashion.is_empty());
    }

    #[tokio::test]
    async fn test_list_owned_stats_and_lead_count() {
        let ledger = Ledger::in_memory();
        let owner = advertiser(&ledger, dec!(100)).await;
        let campaign = launch(&ledger, owner.id, dec!(50), Pricing::per_click(dec!(1))).await;
        ledger
            .metering()
            .create_campaign(owner.id, sample_new_campaign(dec!(50), Pricing::default()))
            .await
            .unwrap();

        ledger
            .metering()
            .record_click(campaign.id, MeterRequest::default())
            .await
            .unwrap();
        ledger
            .metering()
            .record_impression(campaign.id, MeterRequest::default())
            .await
            .unwrap();
        ledger.metering().record_lead(campaign.id).await.unwrap();

        let owned = ledger.metering().list_owned(owner.id).await.unwrap();
        assert_eq!(
            owned.stats,
            CampaignStats {
                total: 2,
                active: 1,
                impressions: 1,
                clicks: 1,
                spent: dec!(1),
            }
        );
        let view = owned
            .campaigns
            .iter()
            .find(|v| v.campaign.id == campaign.id)
            .unwrap();
        assert_eq!(view.ctr, dec!(100));
        assert_eq!(view.cpl, dec!(1));
    }
}
