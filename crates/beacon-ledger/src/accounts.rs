//! Account balances, plans, and payment notifications.

use crate::account::{Account, NewAccount, PlanTier, SubscriptionStatus};
use crate::dedup::DedupWindow;
use crate::error::LedgerError;
use crate::gateway::Gateway;
use crate::payment::{PaymentEvent, PaymentNotification, PaymentOutcome};
use crate::store::Versioned;
use beacon_core::now_millis;
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

/// Account operations.
#[derive(Clone)]
pub struct Accounts {
    gateway: Gateway,
}

impl Accounts {
    pub(crate) fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Create an account.
    ///
    /// # Errors
    ///
    /// Validation failures and store errors.
    pub async fn open(&self, input: NewAccount) -> Result<Account, LedgerError> {
        input.validate()?;
        let account = Account {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            email: input.email.trim().to_lowercase(),
            role: input.role,
            plan: input.plan,
            subscription_status: if input.plan == PlanTier::Free {
                SubscriptionStatus::Inactive
            } else {
                SubscriptionStatus::Active
            },
            subscription_id: None,
            ad_credits: input.ad_credits,
            company: input.company,
            created_at: now_millis(),
            applied: DedupWindow::new(),
        };
        let account = self.gateway.insert(account).await?;
        info!(account = %account.id, role = ?account.role, plan = %account.plan, "Account opened");
        Ok(account)
    }

    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the account does not exist.
    pub async fn get(&self, id: Uuid) -> Result<Account, LedgerError> {
        Ok(self.gateway.load::<Account>(id).await?.record)
    }

    /// Apply a payment processor notification exactly once.
    ///
    /// The transaction id is checked and recorded in the same write as the
    /// balance or plan change, so a replay reports `duplicate` and changes
    /// nothing. A notification for an unknown subscription is ignored.
    ///
    /// # Errors
    ///
    /// Validation failures, a missing account for credit purchases and
    /// activations, and store errors.
    pub async fn apply_payment(
        &self,
        notification: PaymentNotification,
    ) -> Result<PaymentOutcome, LedgerError> {
        notification.validate()?;
        let tx = notification.transaction_id.as_str();

        match &notification.event {
            PaymentEvent::CreditsPurchased { account_id, amount } => {
                let amount = *amount;
                self.apply_once(*account_id, tx, |a| a.ad_credits += amount)
                    .await
            }
            PaymentEvent::SubscriptionActivated {
                account_id,
                plan,
                subscription_id,
            } => {
                let plan = *plan;
                self.apply_once(*account_id, tx, |a| {
                    a.plan = plan;
                    a.subscription_status = SubscriptionStatus::Active;
                    a.subscription_id = Some(subscription_id.clone());
                })
                .await
            }
            PaymentEvent::SubscriptionUpdated {
                subscription_id,
                status,
            } => self.set_subscription_status(subscription_id, *status, tx).await,
            PaymentEvent::SubscriptionCanceled { subscription_id } => {
                self.set_subscription_status(subscription_id, SubscriptionStatus::Canceled, tx)
                    .await
            }
        }
    }

    async fn set_subscription_status(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
        tx: &str,
    ) -> Result<PaymentOutcome, LedgerError> {
        let found: Option<Versioned<Account>> = self
            .gateway
            .call(
                "find_account_by_subscription",
                self.gateway.store().find_account_by_subscription(subscription_id),
            )
            .await?;
        let Some(found) = found else {
            info!(subscription = subscription_id, "No account for subscription, ignoring");
            return Ok(PaymentOutcome::ignored());
        };

        self.apply_once(found.record.id, tx, |a| {
            a.subscription_status = status;
            if status.revokes_plan() {
                a.plan = PlanTier::Free;
            }
        })
        .await
    }

    async fn apply_once<F>(&self, account_id: Uuid, tx: &str, mut change: F) -> Result<PaymentOutcome, LedgerError>
    where
        F: FnMut(&mut Account) + Send,
    {
        let window = self.gateway.config().dedup_window;
        let (account, duplicate) = self
            .gateway
            .mutate::<Account, _, _>(account_id, |a| {
                if a.applied.contains(tx) {
                    return Ok(true);
                }
                change(a);
                a.applied.record(tx, (), window);
                Ok(false)
            })
            .await?;

        if duplicate {
            info!(account = %account_id, transaction = tx, "Payment already applied");
        } else {
            info!(
                account = %account_id,
                transaction = tx,
                credits = %account.ad_credits,
                plan = %account.plan,
                "Payment applied"
            );
        }
        Ok(PaymentOutcome {
            account_id: Some(account.id),
            duplicate,
            ad_credits: Some(account.ad_credits),
            plan: Some(account.plan),
        })
    }

    /// Take `amount` from the balance once per `key`. Returns the new balance.
    pub(crate) async fn debit(&self, account_id: Uuid, amount: Decimal, key: &str) -> Result<Decimal, LedgerError> {
        let window = self.gateway.config().dedup_window;
        let (account, _) = self
            .gateway
            .mutate::<Account, _, _>(account_id, |a| {
                if a.applied.contains(key) {
                    return Ok(());
                }
                if a.ad_credits < amount {
                    return Err(LedgerError::InsufficientFunds {
                        required: amount,
                        available: a.ad_credits,
                    });
                }
                a.ad_credits -= amount;
                a.applied.record(key, (), window);
                Ok(())
            })
            .await?;
        debug!(account = %account_id, %amount, key, balance = %account.ad_credits, "Credits debited");
        Ok(account.ad_credits)
    }

    /// Add `amount` to the balance once per `key`. Returns the new balance.
    pub(crate) async fn credit(&self, account_id: Uuid, amount: Decimal, key: &str) -> Result<Decimal, LedgerError> {
        let window = self.gateway.config().dedup_window;
        let (account, _) = self
            .gateway
            .mutate::<Account, _, _>(account_id, |a| {
                if !a.applied.contains(key) {
                    a.ad_credits += amount;
                    a.applied.record(key, (), window);
                }
                Ok(())
            })
            .await?;
        debug!(account = %account_id, %amount, key, balance = %account.ad_credits, "Credits returned");
        Ok(account.ad_credits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{advertiser, open};
    use crate::{Ledger, Role};
    use rust_decimal_macros::dec;

    fn purchase(tx: &str, account_id: Uuid, amount: Decimal) -> PaymentNotification {
        PaymentNotification {
            transaction_id: tx.into(),
            event: PaymentEvent::CreditsPurchased { account_id, amount },
        }
    }

    #[tokio::test]
    async fn test_replayed_purchase_credits_once() {
        let ledger = Ledger::in_memory();
        let account = advertiser(&ledger, Decimal::ZERO).await;

        let first = ledger
            .accounts()
            .apply_payment(purchase("evt_1", account.id, dec!(50)))
            .await
            .unwrap();
        assert!(!first.duplicate);
        assert_eq!(first.ad_credits, Some(dec!(50)));

        let replay = ledger
            .accounts()
            .apply_payment(purchase("evt_1", account.id, dec!(50)))
            .await
            .unwrap();
        assert!(replay.duplicate);
        assert_eq!(replay.ad_credits, Some(dec!(50)));
        assert_eq!(ledger.accounts().get(account.id).await.unwrap().ad_credits, dec!(50));

        ledger
            .accounts()
            .apply_payment(purchase("evt_2", account.id, dec!(25)))
            .await
            .unwrap();
        assert_eq!(ledger.accounts().get(account.id).await.unwrap().ad_credits, dec!(75));
    }

    #[tokio::test]
    async fn test_purchase_for_unknown_account() {
        let ledger = Ledger::in_memory();
        let err = ledger
            .accounts()
            .apply_payment(purchase("evt_1", Uuid::new_v4(), dec!(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { entity: "account", .. }));
    }

    #[tokio::test]
    async fn test_subscription_lifecycle() {
        let ledger = Ledger::in_memory();
        let account = open(&ledger, PlanTier::Free, Role::Wholesaler, Decimal::ZERO).await;

        let activated = ledger
            .accounts()
            .apply_payment(PaymentNotification {
                transaction_id: "evt_a".into(),
                event: PaymentEvent::SubscriptionActivated {
                    account_id: account.id,
                    plan: PlanTier::Pro,
                    subscription_id: "sub_1".into(),
                },
            })
            .await
            .unwrap();
        assert_eq!(activated.plan, Some(PlanTier::Pro));

        let past_due = ledger
            .accounts()
            .apply_payment(PaymentNotification {
                transaction_id: "evt_b".into(),
                event: PaymentEvent::SubscriptionUpdated {
                    subscription_id: "sub_1".into(),
                    status: SubscriptionStatus::PastDue,
                },
            })
            .await
            .unwrap();
        assert_eq!(past_due.plan, Some(PlanTier::Pro));

        ledger
            .accounts()
            .apply_payment(PaymentNotification {
                transaction_id: "evt_c".into(),
                event: PaymentEvent::SubscriptionCanceled {
                    subscription_id: "sub_1".into(),
                },
            })
            .await
            .unwrap();
        let account = ledger.accounts().get(account.id).await.unwrap();
        assert_eq!(account.plan, PlanTier::Free);
        assert_eq!(account.subscription_status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn test_unknown_subscription_is_ignored() {
        let ledger = Ledger::in_memory();
        let outcome = ledger
            .accounts()
            .apply_payment(PaymentNotification {
                transaction_id: "evt_x".into(),
                event: PaymentEvent::SubscriptionCanceled {
                    subscription_id: "sub_missing".into(),
                },
            })
            .await
            .unwrap();
        assert_eq!(outcome, PaymentOutcome::ignored());
    }

    #[tokio::test]
    async fn test_debit_and_credit_are_keyed() {
        let ledger = Ledger::in_memory();
        let account = advertiser(&ledger, dec!(30)).await;
        let accounts = ledger.accounts();

        assert_eq!(accounts.debit(account.id, dec!(20), "k1").await.unwrap(), dec!(10));
        assert_eq!(accounts.debit(account.id, dec!(20), "k1").await.unwrap(), dec!(10));
        assert!(matches!(
            accounts.debit(account.id, dec!(20), "k2").await,
            Err(LedgerError::InsufficientFunds { .. })
        ));

        assert_eq!(accounts.credit(account.id, dec!(5), "k3").await.unwrap(), dec!(15));
        assert_eq!(accounts.credit(account.id, dec!(5), "k3").await.unwrap(), dec!(15));
    }

    #[tokio::test]
    async fn test_open_normalizes_email() {
        let ledger = Ledger::in_memory();
        let account = ledger
            .accounts()
            .open(NewAccount {
                name: " Ada ".into(),
                email: "Ada@Example.com".into(),
                ..NewAccount::default()
            })
            .await
            .unwrap();
        assert_eq!(account.name, "Ada");
        assert_eq!(account.email, "ada@example.com");
        assert_eq!(account.plan, PlanTier::Free);
        assert_eq!(account.subscription_status, SubscriptionStatus::Inactive);
    }
}
