//! Lead submission and qualification.
//!
//! Submitting a lead never depends on the campaign it names: counting the
//! lead on the campaign is attempted after the lead is stored, and a
//! failure there is logged and reported as "not attributed".

use crate::error::LedgerError;
use crate::gateway::Gateway;
use crate::lead::{Lead, LeadKind, LeadStatus, NewLead};
use crate::metering::MeteringEngine;
use crate::store::LeadQuery;
use beacon_core::now_millis;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// A stored lead and whether its campaign counted it.
#[derive(Debug, Clone, Serialize)]
pub struct SubmittedLead {
    pub lead: Lead,
    pub attributed: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct LeadFilter {
    #[serde(default)]
    pub status: Option<LeadStatus>,
    #[serde(default)]
    pub kind: Option<LeadKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LeadStats {
    pub total: usize,
    pub new: usize,
    pub qualified: usize,
    pub converted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeadList {
    pub leads: Vec<Lead>,
    pub stats: LeadStats,
}

/// Records leads and drives their workflow.
#[derive(Clone)]
pub struct LeadPipeline {
    gateway: Gateway,
    metering: MeteringEngine,
}

impl LeadPipeline {
    pub(crate) fn new(gateway: Gateway, metering: MeteringEngine) -> Self {
        Self { gateway, metering }
    }

    /// Store a new lead and count it on its campaign, if any.
    ///
    /// # Errors
    ///
    /// Validation failures and errors storing the lead. Campaign errors are
    /// not returned.
    pub async fn submit(&self, input: NewLead) -> Result<SubmittedLead, LedgerError> {
        input.validate()?;
        let lead = input.into_lead(Uuid::new_v4(), now_millis())?;
        let lead = self.gateway.insert(lead).await?;
        info!(lead = %lead.id, recipient = %lead.recipient, campaign = ?lead.campaign_id, "Lead submitted");

        let attributed = match lead.campaign_id {
            Some(campaign_id) => match self.metering.record_lead(campaign_id).await {
                Ok(_) => true,
                Err(err) => {
                    warn!(lead = %lead.id, campaign = %campaign_id, error = %err, "Lead stored without campaign attribution");
                    false
                }
            },
            None => false,
        };
        Ok(SubmittedLead { lead, attributed })
    }

    /// Fetch a lead visible to `actor` (its recipient or seller).
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`], [`LedgerError::Forbidden`] and store
    /// errors.
    pub async fn get(&self, actor: Uuid, id: Uuid) -> Result<Lead, LedgerError> {
        let lead = self.gateway.load::<Lead>(id).await?.record;
        if !lead.is_visible_to(actor) {
            return Err(LedgerError::Forbidden { entity: "lead", id });
        }
        Ok(lead)
    }

    /// Leads received by `recipient` matching `filter`, newest first, with
    /// stats over all of the recipient's leads.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn list(&self, recipient: Uuid, filter: LeadFilter) -> Result<LeadList, LedgerError> {
        let all = self
            .gateway
            .call(
                "find_leads",
                self.gateway.store().find_leads(&LeadQuery::for_recipient(recipient)),
            )
            .await?;

        let stats = LeadStats {
            total: all.len(),
            new: all.iter().filter(|l| l.status == LeadStatus::New).count(),
            qualified: all.iter().filter(|l| l.qualified).count(),
            converted: all
                .iter()
                .filter(|l| l.status == LeadStatus::Converted)
                .count(),
        };

        let query = LeadQuery {
            status: filter.status,
            kind: filter.kind,
            ..LeadQuery::for_recipient(recipient)
        };
        let leads = all.into_iter().filter(|l| query.matches(l)).collect();
        Ok(LeadList { leads, stats })
    }

    /// Change the status, optionally appending a note in the same write.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Forbidden`] unless `actor` is the recipient,
    /// transitions out of a closed status, and store errors.
    pub async fn update_status(
        &self,
        actor: Uuid,
        id: Uuid,
        status: LeadStatus,
        note: Option<String>,
    ) -> Result<Lead, LedgerError> {
        let (lead, ()) = self
            .gateway
            .mutate::<Lead, _, _>(id, |l| {
                l.ensure_recipient(actor)?;
                l.set_status(status)?;
                if let Some(note) = note.as_deref().filter(|n| !n.trim().is_empty()) {
                    l.add_note(note)?;
                }
                Ok(())
            })
            .await?;
        info!(lead = %id, status = %lead.status, qualified = lead.qualified, "Lead status changed");
        Ok(lead)
    }

    /// Move the lead to `qualified`.
    ///
    /// # Errors
    ///
    /// See [`update_status`](Self::update_status).
    pub async fn mark_qualified(&self, actor: Uuid, id: Uuid) -> Result<Lead, LedgerError> {
        self.update_status(actor, id, LeadStatus::Qualified, None).await
    }

    /// Append a note.
    ///
    /// # Errors
    ///
    /// Blank notes, [`LedgerError::Forbidden`] unless `actor` is the
    /// recipient, and store errors.
    pub async fn add_note(&self, actor: Uuid, id: Uuid, note: &str) -> Result<Lead, LedgerError> {
        let (lead, ()) = self
            .gateway
            .mutate::<Lead, _, _>(id, |l| {
                l.ensure_recipient(actor)?;
                l.add_note(note)
            })
            .await?;
        Ok(lead)
    }
}
