//! # beacon-ledger
//!
//! Monetization accounting for Beacon.
//!
//! - **Metering** - campaign funding, per-event spend, budget exhaustion
//! - **Revenue** - content hosts' share of each billable event
//! - **Leads** - contact requests attributed to campaigns
//! - **Accounts** - balances, plans, payment notifications
//! - **Shipments** - content units that host ads
//!
//! Every per-entity change is a compare-and-swap against a versioned
//! [`Store`]. Changes spanning two entities commit the first one and then
//! apply the second under an idempotency key.

pub mod account;
pub mod accounts;
pub mod campaign;
pub mod content;
pub mod dedup;
pub mod error;
mod gateway;
pub mod lead;
pub mod leads;
pub mod metering;
pub mod payment;
pub mod revenue;
pub mod shipments;
pub mod store;

#[cfg(test)]
mod testing;

use gateway::Gateway;
use std::sync::Arc;

pub use account::{Account, NewAccount, PlanTier, Role, SubscriptionStatus};
pub use accounts::Accounts;
pub use campaign::{
    BillableEvent, Campaign, CampaignStatus, CampaignUpdate, CampaignView, Category, NewCampaign,
    Pricing, PricingModel, Targeting,
};
pub use content::{ContentUnit, ContentUpdate, GeoPoint, NewContent, ShipmentStatus};
pub use error::{LedgerError, StoreError};
pub use gateway::LedgerConfig;
pub use lead::{Lead, LeadKind, LeadSource, LeadStatus, NewLead};
pub use leads::{LeadFilter, LeadPipeline, SubmittedLead};
pub use metering::{AdFilter, MeterOutcome, MeterRequest, MeteringEngine, ReviewDecision};
pub use payment::{PaymentEvent, PaymentNotification, PaymentOutcome};
pub use revenue::{Allocation, RevenueAllocator};
pub use shipments::Shipments;
pub use store::{MemoryStore, Store, StoreCounts};

/// All ledger services over one store.
#[derive(Clone)]
pub struct Ledger {
    gateway: Gateway,
    accounts: Accounts,
    metering: MeteringEngine,
    revenue: RevenueAllocator,
    shipments: Shipments,
    leads: LeadPipeline,
}

impl Ledger {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: LedgerConfig) -> Self {
        let gateway = Gateway::new(store, config);
        let accounts = Accounts::new(gateway.clone());
        let revenue = RevenueAllocator::new(gateway.clone());
        let metering = MeteringEngine::new(gateway.clone(), accounts.clone(), revenue.clone());
        let shipments = Shipments::new(gateway.clone());
        let leads = LeadPipeline::new(gateway.clone(), metering.clone());
        Self {
            gateway,
            accounts,
            metering,
            revenue,
            shipments,
            leads,
        }
    }

    /// A ledger over a fresh [`MemoryStore`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), LedgerConfig::default())
    }

    pub fn accounts(&self) -> &Accounts {
        &self.accounts
    }

    pub fn metering(&self) -> &MeteringEngine {
        &self.metering
    }

    pub fn revenue(&self) -> &RevenueAllocator {
        &self.revenue
    }

    pub fn shipments(&self) -> &Shipments {
        &self.shipments
    }

    pub fn leads(&self) -> &LeadPipeline {
        &self.leads
    }

    /// Platform-wide totals.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn counts(&self) -> Result<StoreCounts, LedgerError> {
        self.gateway
            .call("counts", self.gateway.store().counts())
            .await
    }
}
