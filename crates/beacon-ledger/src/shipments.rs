//! Content unit operations.

use crate::account::{Account, PlanTier};
use crate::content::{ContentUnit, ContentUpdate, NewContent, ShipmentStatus};
use crate::error::LedgerError;
use crate::gateway::Gateway;
use crate::store::ContentQuery;
use beacon_core::now_millis;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

/// Most units returned by one listing.
pub const MAX_LISTING: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStats {
    pub total: usize,
    pub in_transit: usize,
    pub delivered: usize,
    pub views: u64,
    pub revenue: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct OwnedContent {
    pub shipments: Vec<ContentUnit>,
    pub stats: ContentStats,
}

/// Creates and edits content units.
#[derive(Clone)]
pub struct Shipments {
    gateway: Gateway,
}

impl Shipments {
    pub(crate) fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Create a unit for `owner`. Ads start enabled when the owner's plan
    /// can host them.
    ///
    /// # Errors
    ///
    /// Validation failures, [`LedgerError::PlanNotAllowed`] on the free
    /// plan, and store errors.
    pub async fn create(&self, owner: Uuid, input: NewContent) -> Result<ContentUnit, LedgerError> {
        input.validate()?;
        let account = self.gateway.load::<Account>(owner).await?.record;
        if !account.plan.can_create_content() {
            return Err(LedgerError::PlanNotAllowed {
                plan: account.plan,
                action: "creating shipments",
            });
        }

        let unit = input.into_unit(Uuid::new_v4(), owner, account.plan, now_millis());
        let unit = self.gateway.insert(unit).await?;
        info!(content = %unit.id, owner = %owner, ads = unit.ads_enabled, "Shipment created");
        Ok(unit)
    }

    /// Fetch a unit and count the view.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] and store errors.
    pub async fn view(&self, id: Uuid) -> Result<ContentUnit, LedgerError> {
        let (unit, ()) = self
            .gateway
            .mutate::<ContentUnit, _, _>(id, |u| {
                u.views += 1;
                Ok(())
            })
            .await?;
        Ok(unit)
    }

    /// Fetch a unit without counting a view.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] and store errors.
    pub async fn get(&self, id: Uuid) -> Result<ContentUnit, LedgerError> {
        Ok(self.gateway.load::<ContentUnit>(id).await?.record)
    }

    /// Apply an owner edit.
    ///
    /// # Errors
    ///
    /// Validation failures, [`LedgerError::Forbidden`] for non-owners,
    /// [`LedgerError::PlanNotAllowed`] when enabling ads on the free plan,
    /// and store errors.
    pub async fn update(&self, actor: Uuid, id: Uuid, update: ContentUpdate) -> Result<ContentUnit, LedgerError> {
        update.validate()?;
        // The plan only matters when ads are being switched on.
        let plan = if update.ads_enabled == Some(true) {
            let unit = self.gateway.load::<ContentUnit>(id).await?.record;
            unit.ensure_owner(actor)?;
            self.gateway.load::<Account>(actor).await?.record.plan
        } else {
            PlanTier::default()
        };
        let (unit, ()) = self
            .gateway
            .mutate::<ContentUnit, _, _>(id, |u| {
                u.ensure_owner(actor)?;
                u.apply_update(&update, plan)
            })
            .await?;
        debug!(content = %id, progress = unit.progress, status = ?unit.status, "Shipment updated");
        Ok(unit)
    }

    /// Set progress (0 to 100).
    ///
    /// # Errors
    ///
    /// See [`update`](Self::update).
    pub async fn update_progress(&self, actor: Uuid, id: Uuid, progress: u8) -> Result<ContentUnit, LedgerError> {
        self.update(actor, id, ContentUpdate::progress(progress)).await
    }

    /// Hide a unit from listings.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Forbidden`] for non-owners and store errors.
    pub async fn deactivate(&self, actor: Uuid, id: Uuid) -> Result<ContentUnit, LedgerError> {
        let (unit, ()) = self
            .gateway
            .mutate::<ContentUnit, _, _>(id, |u| {
                u.ensure_owner(actor)?;
                u.active = false;
                Ok(())
            })
            .await?;
        info!(content = %id, "Shipment deactivated");
        Ok(unit)
    }

    /// Active units matching `query`, newest first, at most 100.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn list(&self, mut query: ContentQuery) -> Result<Vec<ContentUnit>, LedgerError> {
        query.active = Some(true);
        query.limit = Some(query.limit.unwrap_or(MAX_LISTING).min(MAX_LISTING));
        self.gateway
            .call("find_content", self.gateway.store().find_content(&query))
            .await
    }

    /// Every unit of `owner`, with stats.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn list_owned(&self, owner: Uuid) -> Result<OwnedContent, LedgerError> {
        let query = ContentQuery {
            owner: Some(owner),
            ..ContentQuery::default()
        };
        let shipments = self
            .gateway
            .call("find_content", self.gateway.store().find_content(&query))
            .await?;

        let stats = ContentStats {
            total: shipments.len(),
            in_transit: count_status(&shipments, ShipmentStatus::InTransit),
            delivered: count_status(&shipments, ShipmentStatus::Delivered),
            views: shipments.iter().map(|u| u.views).sum(),
            revenue: shipments.iter().map(|u| u.ad_revenue).sum(),
        };
        Ok(OwnedContent { shipments, stats })
    }
}

fn count_status(units: &[ContentUnit], status: ShipmentStatus) -> usize {
    units.iter().filter(|u| u.status == status).count()
}
