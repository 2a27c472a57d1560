//! Content units (shipments) that host ads and accrue revenue.

use crate::account::PlanTier;
use crate::campaign::Category;
use crate::dedup::DedupWindow;
use crate::error::LedgerError;
use beacon_core::Violations;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_TITLE_LENGTH: usize = 200;
const MAX_DESCRIPTION_LENGTH: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Pending,
    #[default]
    InTransit,
    Delivered,
    Canceled,
}

/// A named location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    fn validate(&self, field: &str, v: &mut Violations) {
        v.check(
            self.lat.is_finite() && (-90.0..=90.0).contains(&self.lat),
            format!("{field}.lat"),
            "must be within [-90, 90]",
        );
        v.check(
            self.lon.is_finite() && (-180.0..=180.0).contains(&self.lon),
            format!("{field}.lon"),
            "must be within [-180, 180]",
        );
    }

    fn in_country(&self, country: &str) -> bool {
        self.country
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(country))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Product {
    pub name: Option<String>,
    pub category: Category,
    pub image: Option<String>,
    pub price: Option<Decimal>,
    pub quantity: Option<u32>,
}

/// A trackable shipment that can host ads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUnit {
    pub id: Uuid,
    pub owner: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub product: Product,
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub status: ShipmentStatus,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub estimated_arrival: Option<u64>,
    pub actual_arrival: Option<u64>,
    pub progress: u8,
    pub ads_enabled: bool,
    pub views: u64,
    pub clicks: u64,
    pub ad_revenue: Decimal,
    pub active: bool,
    pub featured: bool,
    pub created_at: u64,
    /// Metering event keys already allocated and the amount each credited.
    #[serde(skip)]
    pub credited: DedupWindow<Decimal>,
}

impl ContentUnit {
    pub(crate) fn ensure_owner(&self, actor: Uuid) -> Result<(), LedgerError> {
        if self.owner == actor {
            Ok(())
        } else {
            Err(LedgerError::Forbidden {
                entity: "content",
                id: self.id,
            })
        }
    }

    /// Whether either end of the route is in `country`.
    #[must_use]
    pub fn touches_country(&self, country: &str) -> bool {
        self.origin.in_country(country) || self.destination.in_country(country)
    }

    /// Apply an owner edit that was already validated.
    ///
    /// # Errors
    ///
    /// [`LedgerError::PlanNotAllowed`] when enabling ads on a plan that
    /// cannot host them.
    pub fn apply_update(&mut self, update: &ContentUpdate, plan: PlanTier) -> Result<(), LedgerError> {
        if update.ads_enabled == Some(true) && !plan.can_host_ads() {
            return Err(LedgerError::PlanNotAllowed {
                plan,
                action: "hosting ads",
            });
        }
        if let Some(title) = &update.title {
            self.title = title.trim().to_string();
        }
        if let Some(description) = &update.description {
            self.description = Some(description.clone());
        }
        if let Some(product) = &update.product {
            self.product = product.clone();
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(progress) = update.progress {
            self.progress = progress;
        }
        if let Some(enabled) = update.ads_enabled {
            self.ads_enabled = enabled;
        }
        if let Some(at) = update.actual_arrival {
            self.actual_arrival = Some(at);
        }
        if let Some(at) = update.estimated_arrival {
            self.estimated_arrival = Some(at);
        }
        Ok(())
    }
}

/// Input for creating a content unit.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContent {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub product: Product,
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    #[serde(default)]
    pub status: ShipmentStatus,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub estimated_arrival: Option<u64>,
}

impl NewContent {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns all violated fields.
    pub fn validate(&self) -> Result<(), Violations> {
        let mut v = Violations::new();
        v.require(&self.title, "title");
        v.max_len(self.title.trim(), "title", MAX_TITLE_LENGTH);
        if let Some(description) = &self.description {
            v.max_len(description, "description", MAX_DESCRIPTION_LENGTH);
        }
        self.origin.validate("origin", &mut v);
        self.destination.validate("destination", &mut v);
        v.into_result()
    }

    pub(crate) fn into_unit(self, id: Uuid, owner: Uuid, plan: PlanTier, now: u64) -> ContentUnit {
        ContentUnit {
            id,
            owner,
            title: self.title.trim().to_string(),
            description: self.description,
            product: self.product,
            origin: self.origin,
            destination: self.destination,
            status: self.status,
            tracking_number: self.tracking_number,
            carrier: self.carrier,
            estimated_arrival: self.estimated_arrival,
            actual_arrival: None,
            progress: 0,
            ads_enabled: plan.can_host_ads(),
            views: 0,
            clicks: 0,
            ad_revenue: Decimal::ZERO,
            active: true,
            featured: false,
            created_at: now,
            credited: DedupWindow::new(),
        }
    }
}

/// Owner edit of a content unit.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub product: Option<Product>,
    #[serde(default)]
    pub status: Option<ShipmentStatus>,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub ads_enabled: Option<bool>,
    #[serde(default)]
    pub estimated_arrival: Option<u64>,
    #[serde(default)]
    pub actual_arrival: Option<u64>,
}

impl ContentUpdate {
    /// A progress-only edit.
    #[must_use]
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    /// Check every present field.
    ///
    /// # Errors
    ///
    /// Returns all violated fields.
    pub fn validate(&self) -> Result<(), Violations> {
        let mut v = Violations::new();
        if let Some(title) = &self.title {
            v.require(title, "title");
            v.max_len(title.trim(), "title", MAX_TITLE_LENGTH);
        }
        if let Some(description) = &self.description {
            v.max_len(description, "description", MAX_DESCRIPTION_LENGTH);
        }
        if let Some(progress) = self.progress {
            v.check(progress <= 100, "progress", "must be within [0, 100]");
        }
        v.into_result()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_new_content() -> NewContent {
        NewContent {
            title: "  Sneakers to Lyon ".into(),
            description: Some("200 pairs".into()),
            product: Product {
                category: Category::Fashion,
                ..Product::default()
            },
            origin: GeoPoint {
                city: Some("Shenzhen".into()),
                country: Some("CN".into()),
                lat: 22.5431,
                lon: 114.0579,
            },
            destination: GeoPoint {
                city: Some("Lyon".into()),
                country: Some("FR".into()),
                lat: 45.764,
                lon: 4.8357,
            },
            status: ShipmentStatus::InTransit,
            tracking_number: None,
            carrier: None,
            estimated_arrival: None,
        }
    }

    #[test]
    fn test_new_content_defaults() {
        let unit = sample_new_content().into_unit(Uuid::new_v4(), Uuid::new_v4(), PlanTier::Pro, 7);
        assert_eq!(unit.title, "Sneakers to Lyon");
        assert!(unit.ads_enabled);
        assert!(unit.active);
        assert_eq!(unit.progress, 0);
        assert_eq!(unit.ad_revenue, Decimal::ZERO);
        assert!(unit.touches_country("fr"));
        assert!(!unit.touches_country("US"));
    }

    #[test]
    fn test_new_content_validation() {
        let mut input = sample_new_content();
        input.title = " ".into();
        input.origin.lat = 95.0;
        input.destination.lon = f64::INFINITY;

        let err = input.validate().unwrap_err();
        assert_eq!(err.len(), 3);
        assert!(err.has("title"));
        assert!(err.has("origin.lat"));
        assert!(err.has("destination.lon"));
    }

    #[test]
    fn test_update_progress_range() {
        assert!(ContentUpdate::progress(100).validate().is_ok());
        assert!(ContentUpdate::progress(101).validate().unwrap_err().has("progress"));
    }

    #[test]
    fn test_free_plan_cannot_enable_ads() {
        let mut unit = sample_new_content().into_unit(Uuid::new_v4(), Uuid::new_v4(), PlanTier::Free, 7);
        assert!(!unit.ads_enabled);

        let update = ContentUpdate {
            ads_enabled: Some(true),
            progress: Some(40),
            ..ContentUpdate::default()
        };
        assert!(matches!(
            unit.apply_update(&update, PlanTier::Free),
            Err(LedgerError::PlanNotAllowed { .. })
        ));
        assert_eq!(unit.progress, 0);

        unit.apply_update(&update, PlanTier::Plus).unwrap();
        assert!(unit.ads_enabled);
        assert_eq!(unit.progress, 40);
    }

    #[test]
    fn test_ownership() {
        let owner = Uuid::new_v4();
        let unit = sample_new_content().into_unit(Uuid::new_v4(), owner, PlanTier::Pro, 7);
        assert!(unit.ensure_owner(owner).is_ok());
        assert!(matches!(
            unit.ensure_owner(Uuid::new_v4()),
            Err(LedgerError::Forbidden { entity: "content", .. })
        ));
    }
}
