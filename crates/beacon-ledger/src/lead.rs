//! Inbound contact requests.

use crate::account::is_email;
use crate::error::LedgerError;
use beacon_core::Violations;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const MAX_MESSAGE_LENGTH: usize = 2000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    Qualified,
    Converted,
    Lost,
}

impl LeadStatus {
    /// Converted and lost leads are closed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converted | Self::Lost)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Qualified => "qualified",
            Self::Converted => "converted",
            Self::Lost => "lost",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadKind {
    #[default]
    WholesaleInquiry,
    ProductInterest,
    ContactRequest,
    QuoteRequest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
    AdClick,
    ShipmentView,
    #[default]
    Direct,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductInterest {
    pub category: Option<String>,
    pub quantity: Option<u32>,
    pub budget: Option<Decimal>,
}

/// A contact request routed to a recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub content_id: Option<Uuid>,
    pub recipient: Uuid,
    pub seller: Option<Uuid>,
    pub kind: LeadKind,
    pub contact: Contact,
    pub message: Option<String>,
    pub product_interest: Option<ProductInterest>,
    pub status: LeadStatus,
    pub notes: Vec<String>,
    pub qualified: bool,
    pub source: LeadSource,
    pub created_at: u64,
}

impl Lead {
    /// Whether `actor` may read this lead.
    #[must_use]
    pub fn is_visible_to(&self, actor: Uuid) -> bool {
        self.recipient == actor || self.seller == Some(actor)
    }

    pub(crate) fn ensure_recipient(&self, actor: Uuid) -> Result<(), LedgerError> {
        if self.recipient == actor {
            Ok(())
        } else {
            Err(LedgerError::Forbidden {
                entity: "lead",
                id: self.id,
            })
        }
    }

    /// Move to `next`. Reaching `qualified` also raises the flag, which is
    /// never lowered again.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidTransition`] when the lead is already closed.
    pub fn set_status(&mut self, next: LeadStatus) -> Result<(), LedgerError> {
        if next == self.status {
            return Ok(());
        }
        if self.status.is_terminal() {
            return Err(LedgerError::InvalidTransition {
                entity: "lead",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next == LeadStatus::Qualified {
            self.qualified = true;
        }
        Ok(())
    }

    /// Append a note.
    ///
    /// # Errors
    ///
    /// Rejects blank notes.
    pub fn add_note(&mut self, note: &str) -> Result<(), LedgerError> {
        let mut v = Violations::new();
        v.require(note, "note");
        v.into_result()?;
        self.notes.push(note.trim().to_string());
        Ok(())
    }
}

/// Input for submitting a lead.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLead {
    #[serde(default)]
    pub campaign_id: Option<Uuid>,
    #[serde(default)]
    pub content_id: Option<Uuid>,
    #[serde(default)]
    pub recipient: Option<Uuid>,
    #[serde(default)]
    pub seller: Option<Uuid>,
    #[serde(default)]
    pub kind: LeadKind,
    #[serde(default)]
    pub contact: Contact,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub product_interest: Option<ProductInterest>,
    #[serde(default)]
    pub source: LeadSource,
}

impl NewLead {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns all violated fields.
    pub fn validate(&self) -> Result<(), Violations> {
        let mut v = Violations::new();
        v.check(self.recipient.is_some(), "recipient", "is required");
        v.require(&self.contact.name, "contact.name");
        v.check(
            is_email(&self.contact.email),
            "contact.email",
            "must be a valid email address",
        );
        if let Some(message) = &self.message {
            v.max_len(message, "message", MAX_MESSAGE_LENGTH);
        }
        v.into_result()
    }

    pub(crate) fn into_lead(self, id: Uuid, now: u64) -> Result<Lead, Violations> {
        let recipient = self
            .recipient
            .ok_or_else(|| Violations::single("recipient", "is required"))?;
        let contact = Contact {
            name: self.contact.name.trim().to_string(),
            email: self.contact.email.trim().to_lowercase(),
            phone: self.contact.phone,
            company: self.contact.company,
        };
        Ok(Lead {
            id,
            campaign_id: self.campaign_id,
            content_id: self.content_id,
            recipient,
            seller: self.seller,
            kind: self.kind,
            contact,
            message: self.message,
            product_interest: self.product_interest,
            status: LeadStatus::New,
            notes: Vec::new(),
            qualified: false,
            source: self.source,
            created_at: now,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_new_lead(recipient: Uuid) -> NewLead {
        NewLead {
            recipient: Some(recipient),
            contact: Contact {
                name: "Grace".into(),
                email: "Grace@Example.COM".into(),
                phone: None,
                company: Some("Hopper Imports".into()),
            },
            message: Some("Need 500 units".into()),
            ..NewLead::default()
        }
    }

    #[test]
    fn test_defaults_and_normalization() {
        let lead = sample_new_lead(Uuid::new_v4())
            .into_lead(Uuid::new_v4(), 1)
            .unwrap();
        assert_eq!(lead.status, LeadStatus::New);
        assert!(!lead.qualified);
        assert_eq!(lead.kind, LeadKind::WholesaleInquiry);
        assert_eq!(lead.source, LeadSource::Direct);
        assert_eq!(lead.contact.email, "grace@example.com");
        assert!(lead.campaign_id.is_none());
    }

    #[test]
    fn test_validation_lists_every_field() {
        let input = NewLead {
            message: Some("x".repeat(2001)),
            ..NewLead::default()
        };
        let err = input.validate().unwrap_err();
        assert!(err.has("recipient"));
        assert!(err.has("contact.name"));
        assert!(err.has("contact.email"));
        assert!(err.has("message"));
    }

    #[test]
    fn test_qualified_flag_is_one_way() {
        let mut lead = sample_new_lead(Uuid::new_v4())
            .into_lead(Uuid::new_v4(), 1)
            .unwrap();
        lead.set_status(LeadStatus::Qualified).unwrap();
        assert!(lead.qualified);

        lead.set_status(LeadStatus::Contacted).unwrap();
        assert_eq!(lead.status, LeadStatus::Contacted);
        assert!(lead.qualified);
    }

    #[test]
    fn test_closed_lead_rejects_transitions() {
        let mut lead = sample_new_lead(Uuid::new_v4())
            .into_lead(Uuid::new_v4(), 1)
            .unwrap();
        lead.set_status(LeadStatus::Lost).unwrap();
        assert!(matches!(
            lead.set_status(LeadStatus::New),
            Err(LedgerError::InvalidTransition { entity: "lead", .. })
        ));
        assert!(lead.set_status(LeadStatus::Lost).is_ok());
    }

    #[test]
    fn test_notes() {
        let mut lead = sample_new_lead(Uuid::new_v4())
            .into_lead(Uuid::new_v4(), 1)
            .unwrap();
        assert!(lead.add_note("  ").is_err());
        lead.add_note(" called back ").unwrap();
        assert_eq!(lead.notes, vec!["called back".to_string()]);
    }
}
