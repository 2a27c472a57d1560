//! Fixtures shared by the unit tests.

use crate::campaign::tests::sample_new_campaign;
use crate::content::tests::sample_new_content;
use crate::{
    Account, Campaign, CampaignStatus, ContentUnit, Ledger, NewAccount, PlanTier, Pricing,
    ReviewDecision, Role,
};
use rust_decimal::Decimal;
use uuid::Uuid;

pub(crate) async fn open(ledger: &Ledger, plan: PlanTier, role: Role, credits: Decimal) -> Account {
    ledger
        .accounts()
        .open(NewAccount {
            name: "Test".into(),
            email: format!("{}@example.com", Uuid::new_v4().simple()),
            role,
            plan,
            company: None,
            ad_credits: credits,
        })
        .await
        .unwrap()
}

pub(crate) async fn advertiser(ledger: &Ledger, credits: Decimal) -> Account {
    open(ledger, PlanTier::Free, Role::Seller, credits).await
}

/// Create a campaign for `owner` and have an admin approve it.
pub(crate) async fn launch(ledger: &Ledger, owner: Uuid, total: Decimal, pricing: Pricing) -> Campaign {
    let campaign = ledger
        .metering()
        .create_campaign(owner, sample_new_campaign(total, pricing))
        .await
        .unwrap();
    let admin = open(ledger, PlanTier::Free, Role::Admin, Decimal::ZERO).await;
    ledger
        .metering()
        .review_campaign(
            admin.id,
            campaign.id,
            ReviewDecision {
                status: CampaignStatus::Active,
                featured: None,
            },
        )
        .await
        .unwrap()
}

pub(crate) async fn shipment(ledger: &Ledger, owner: Uuid) -> ContentUnit {
    ledger
        .shipments()
        .create(owner, sample_new_content())
        .await
        .unwrap()
}
