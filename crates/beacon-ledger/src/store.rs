//! Versioned document store.
//!
//! Every record carries a version. Writers read a [`Versioned`] snapshot,
//! modify a copy, and [`Table::replace`] it only if the version is still
//! current, so per-entity read-modify-write never works from a stale
//! snapshot.

use crate::account::Account;
use crate::campaign::{Campaign, CampaignStatus, Category};
use crate::content::{ContentUnit, ShipmentStatus};
use crate::error::StoreError;
use crate::lead::{Lead, LeadKind, LeadStatus};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

/// A record and the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub record: T,
}

/// Per-entity collection with compare-and-swap writes.
#[async_trait]
pub trait Table<T>: Send + Sync
where
    T: Send + 'static,
{
    async fn get(&self, id: Uuid) -> Result<Option<Versioned<T>>, StoreError>;

    /// Store a new record at version 1.
    async fn insert(&self, id: Uuid, record: T) -> Result<Versioned<T>, StoreError>;

    /// Overwrite a record if it is still at `expected_version`.
    async fn replace(
        &self,
        id: Uuid,
        expected_version: u64,
        record: T,
    ) -> Result<Versioned<T>, StoreError>;
}

/// Campaign listing order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CampaignOrder {
    /// Featured campaigns first, then newest first.
    #[default]
    FeaturedThenNewest,
    Newest,
}

/// Filters for campaign listings. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct CampaignQuery {
    pub owner: Option<Uuid>,
    pub status: Option<CampaignStatus>,
    pub active: Option<bool>,
    pub category: Option<Category>,
    pub country: Option<String>,
    pub order: CampaignOrder,
    pub limit: Option<usize>,
}

impl CampaignQuery {
    /// Whether `campaign` passes every filter.
    #[must_use]
    pub fn matches(&self, campaign: &Campaign) -> bool {
        self.owner.map_or(true, |o| campaign.owner == o)
            && self.status.map_or(true, |s| campaign.status == s)
            && self.active.map_or(true, |a| campaign.active == a)
            && campaign
                .targeting
                .matches(self.category, self.country.as_deref())
    }
}

/// Filters for content listings, newest first.
#[derive(Debug, Clone, Default)]
pub struct ContentQuery {
    pub owner: Option<Uuid>,
    pub active: Option<bool>,
    pub category: Option<Category>,
    /// Matches either end of the route.
    pub country: Option<String>,
    pub status: Option<ShipmentStatus>,
    pub limit: Option<usize>,
}

impl ContentQuery {
    #[must_use]
    pub fn matches(&self, unit: &ContentUnit) -> bool {
        self.owner.map_or(true, |o| unit.owner == o)
            && self.active.map_or(true, |a| unit.active == a)
            && self.category.map_or(true, |c| unit.product.category == c)
            && self
                .country
                .as_deref()
                .map_or(true, |c| unit.touches_country(c))
            && self.status.map_or(true, |s| unit.status == s)
    }
}

/// Filters for a recipient's leads, newest first.
#[derive(Debug, Clone)]
pub struct LeadQuery {
    pub recipient: Uuid,
    pub status: Option<LeadStatus>,
    pub kind: Option<LeadKind>,
    pub limit: Option<usize>,
}

impl LeadQuery {
    #[must_use]
    pub fn for_recipient(recipient: Uuid) -> Self {
        Self {
            recipient,
            status: None,
            kind: None,
            limit: None,
        }
    }

    #[must_use]
    pub fn matches(&self, lead: &Lead) -> bool {
        lead.recipient == self.recipient
            && self.status.map_or(true, |s| lead.status == s)
            && self.kind.map_or(true, |k| lead.kind == k)
    }
}

/// Platform-wide totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub accounts: usize,
    pub active_content: usize,
    pub active_campaigns: usize,
}

/// The durable store the ledger runs against.
#[async_trait]
pub trait Store: Send + Sync {
    fn accounts(&self) -> &dyn Table<Account>;
    fn campaigns(&self) -> &dyn Table<Campaign>;
    fn content(&self) -> &dyn Table<ContentUnit>;
    fn leads(&self) -> &dyn Table<Lead>;

    async fn find_account_by_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Versioned<Account>>, StoreError>;

    async fn find_campaigns(&self, query: &CampaignQuery) -> Result<Vec<Campaign>, StoreError>;

    async fn find_content(&self, query: &ContentQuery) -> Result<Vec<ContentUnit>, StoreError>;

    async fn find_leads(&self, query: &LeadQuery) -> Result<Vec<Lead>, StoreError>;

    async fn counts(&self) -> Result<StoreCounts, StoreError>;
}

/// Something kept in a [`Store`] table.
pub trait Record: Clone + Send + Sync + 'static {
    /// Entity name used in errors and logs.
    const KIND: &'static str;

    fn id(&self) -> Uuid;

    fn table(store: &dyn Store) -> &dyn Table<Self>;
}

impl Record for Account {
    const KIND: &'static str = "account";

    fn id(&self) -> Uuid {
        self.id
    }

    fn table(store: &dyn Store) -> &dyn Table<Self> {
        store.accounts()
    }
}

impl Record for Campaign {
    const KIND: &'static str = "campaign";

    fn id(&self) -> Uuid {
        self.id
    }

    fn table(store: &dyn Store) -> &dyn Table<Self> {
        store.campaigns()
    }
}

impl Record for ContentUnit {
    const KIND: &'static str = "content";

    fn id(&self) -> Uuid {
        self.id
    }

    fn table(store: &dyn Store) -> &dyn Table<Self> {
        store.content()
    }
}

impl Record for Lead {
    const KIND: &'static str = "lead";

    fn id(&self) -> Uuid {
        self.id
    }

    fn table(store: &dyn Store) -> &dyn Table<Self> {
        store.leads()
    }
}

/// In-process table.
pub struct MemoryTable<T> {
    rows: DashMap<Uuid, Versioned<T>>,
}

impl<T: Clone> MemoryTable<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Clone every record matching `keep`.
    pub fn scan<F>(&self, mut keep: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        self.rows
            .iter()
            .filter(|row| keep(&row.record))
            .map(|row| row.record.clone())
            .collect()
    }
}

impl<T: Clone> Default for MemoryTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Table<T> for MemoryTable<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn get(&self, id: Uuid) -> Result<Option<Versioned<T>>, StoreError> {
        Ok(self.rows.get(&id).map(|row| row.clone()))
    }

    async fn insert(&self, id: Uuid, record: T) -> Result<Versioned<T>, StoreError> {
        match self.rows.entry(id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(id)),
            Entry::Vacant(slot) => {
                let row = Versioned { version: 1, record };
                slot.insert(row.clone());
                Ok(row)
            }
        }
    }

    async fn replace(
        &self,
        id: Uuid,
        expected_version: u64,
        record: T,
    ) -> Result<Versioned<T>, StoreError> {
        let mut row = self.rows.get_mut(&id).ok_or(StoreError::Missing(id))?;
        if row.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                found: row.version,
            });
        }
        row.version += 1;
        row.record = record;
        Ok(row.clone())
    }
}

/// In-process [`Store`] backed by [`DashMap`] tables.
#[derive(Default)]
pub struct MemoryStore {
    pub accounts: MemoryTable<Account>,
    pub campaigns: MemoryTable<Campaign>,
    pub content: MemoryTable<ContentUnit>,
    pub leads: MemoryTable<Lead>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn capped<T>(mut rows: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    rows
}

#[async_trait]
impl Store for MemoryStore {
    fn accounts(&self) -> &dyn Table<Account> {
        &self.accounts
    }

    fn campaigns(&self) -> &dyn Table<Campaign> {
        &self.campaigns
    }

    fn content(&self) -> &dyn Table<ContentUnit> {
        &self.content
    }

    fn leads(&self) -> &dyn Table<Lead> {
        &self.leads
    }

    async fn find_account_by_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Versioned<Account>>, StoreError> {
        Ok(self
            .accounts
            .rows
            .iter()
            .find(|row| row.record.subscription_id.as_deref() == Some(subscription_id))
            .map(|row| row.clone()))
    }

    async fn find_campaigns(&self, query: &CampaignQuery) -> Result<Vec<Campaign>, StoreError> {
        let mut rows = self.campaigns.scan(|c| query.matches(c));
        match query.order {
            CampaignOrder::FeaturedThenNewest => rows.sort_by(|a, b| {
                b.featured
                    .cmp(&a.featured)
                    .then(b.created_at.cmp(&a.created_at))
            }),
            CampaignOrder::Newest => rows.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }
        Ok(capped(rows, query.limit))
    }

    async fn find_content(&self, query: &ContentQuery) -> Result<Vec<ContentUnit>, StoreError> {
        let mut rows = self.content.scan(|u| query.matches(u));
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(capped(rows, query.limit))
    }

    async fn find_leads(&self, query: &LeadQuery) -> Result<Vec<Lead>, StoreError> {
        let mut rows = self.leads.scan(|l| query.matches(l));
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(capped(rows, query.limit))
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        Ok(StoreCounts {
            accounts: self.accounts.len(),
            active_content: self.content.scan(|u| u.active).len(),
            active_campaigns: self
                .campaigns
                .scan(|c| c.status == CampaignStatus::Active && c.active)
                .len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row(u32);

    #[tokio::test]
    async fn test_insert_and_get() {
        let table: MemoryTable<Row> = MemoryTable::new();
        let id = Uuid::new_v4();
        let row = table.insert(id, Row(1)).await.unwrap();
        assert_eq!(row.version, 1);
        assert_eq!(table.get(id).await.unwrap(), Some(row));
        assert_eq!(
            table.insert(id, Row(2)).await.unwrap_err(),
            StoreError::Duplicate(id)
        );
        assert_eq!(table.get(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_replace_is_compare_and_swap() {
        let table: MemoryTable<Row> = MemoryTable::new();
        let id = Uuid::new_v4();
        table.insert(id, Row(1)).await.unwrap();

        let updated = table.replace(id, 1, Row(2)).await.unwrap();
        assert_eq!(updated, Versioned { version: 2, record: Row(2) });

        // Stale writer loses.
        assert_eq!(
            table.replace(id, 1, Row(3)).await.unwrap_err(),
            StoreError::VersionConflict { expected: 1, found: 2 }
        );
        assert_eq!(table.get(id).await.unwrap().unwrap().record, Row(2));

        let missing = Uuid::new_v4();
        assert_eq!(
            table.replace(missing, 1, Row(0)).await.unwrap_err(),
            StoreError::Missing(missing)
        );
    }
}
