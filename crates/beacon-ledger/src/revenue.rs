//! Revenue sharing with content hosts.
//!
//! Each billable event that names a content unit credits the unit's owner
//! with `gross * share`, where `gross` is what the campaign was charged for
//! that event and `share` comes from the owner's plan. Allocation is keyed
//! by the metering event, so re-running it after a partial failure never
//! credits twice.

use crate::account::{Account, PlanTier};
use crate::campaign::BillableEvent;
use crate::content::ContentUnit;
use crate::error::LedgerError;
use crate::gateway::Gateway;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

/// The owner's cut of `gross` on `plan`.
#[must_use]
pub fn owner_share(gross: Decimal, plan: PlanTier) -> Decimal {
    gross * plan.revenue_share()
}

/// What one event credited to a content unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub content_id: Uuid,
    pub credited: Decimal,
    /// Unit revenue after this event.
    pub ad_revenue: Decimal,
    /// The event had already been allocated.
    pub duplicate: bool,
}

/// Credits content units for billable events.
#[derive(Clone)]
pub struct RevenueAllocator {
    gateway: Gateway,
}

impl RevenueAllocator {
    pub(crate) fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Record `event` on the content unit and credit its owner's share of
    /// `gross`.
    ///
    /// Clicks always count toward the unit's click counter. Units with ads
    /// disabled accrue no revenue. Returns `None` if the unit does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Store failures and timeouts.
    pub async fn allocate(
        &self,
        content_id: Uuid,
        event_key: &str,
        event: BillableEvent,
        gross: Decimal,
    ) -> Result<Option<Allocation>, LedgerError> {
        let Some(unit) = self.gateway.find::<ContentUnit>(content_id).await? else {
            debug!(content = %content_id, "Content not found, nothing to allocate");
            return Ok(None);
        };
        let plan = self.owner_plan(unit.record.owner).await?;
        let window = self.gateway.config().dedup_window;

        let (unit, (credited, duplicate)) = self
            .gateway
            .mutate::<ContentUnit, _, _>(content_id, |u| {
                if let Some(credited) = u.credited.get(event_key) {
                    return Ok((*credited, true));
                }
                if event == BillableEvent::Click {
                    u.clicks += 1;
                }
                let credited = if u.ads_enabled {
                    owner_share(gross, plan)
                } else {
                    Decimal::ZERO
                };
                u.ad_revenue += credited;
                u.credited.record(event_key, credited, window);
                Ok((credited, false))
            })
            .await?;

        debug!(
            content = %content_id,
            event = event.as_str(),
            %gross,
            %credited,
            duplicate,
            "Revenue allocated"
        );
        Ok(Some(Allocation {
            content_id,
            credited,
            ad_revenue: unit.ad_revenue,
            duplicate,
        }))
    }

    async fn owner_plan(&self, owner: Uuid) -> Result<PlanTier, LedgerError> {
        match self.gateway.find::<Account>(owner).await? {
            Some(account) => Ok(account.record.plan),
            None => {
                warn!(owner = %owner, "Content owner missing, no share credited");
                Ok(PlanTier::Free)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_owner_share() {
        assert_eq!(owner_share(dec!(10) / dec!(1000), PlanTier::Pro), dec!(0.008));
        assert_eq!(owner_share(dec!(1), PlanTier::Free), Decimal::ZERO);
        assert_eq!(owner_share(dec!(2), PlanTier::Enterprise), dec!(1.70));
    }
}
