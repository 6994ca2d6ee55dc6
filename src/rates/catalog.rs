//! Item data used to classify assets.
//!
//! Coupon multipliers and durations come from the cash item catalog, bonus-exp
//! tier tables from the equipment catalog. Both are answered either from
//! configuration or from the data service.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::model::{BonusExpTier, CouponSpec, TimeWindow};
use super::RatesConfig;
use crate::jsonapi::{JsonApiClient, ResolveError};
use crate::tenant::Tenant;

/// Cash item lookups. `None` means the template carries no rate.
#[async_trait]
pub trait CashCatalog: Send + Sync {
    async fn coupon(&self, tenant: &Tenant, template_id: u32) -> Result<Option<CouponSpec>, ResolveError>;
}

/// Equipment lookups. `None` means the template has no bonus-exp table.
#[async_trait]
pub trait EquipmentCatalog: Send + Sync {
    async fn bonus_exp(&self, tenant: &Tenant, template_id: u32) -> Result<Option<Vec<BonusExpTier>>, ResolveError>;
}

// ============================================================================
// Static
// ============================================================================

/// Catalog built from the `rates` configuration section. Same data for every tenant.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    coupons: HashMap<u32, CouponSpec>,
    equipment: HashMap<u32, Vec<BonusExpTier>>,
}

impl StaticCatalog {
    pub fn from_config(config: &RatesConfig) -> Self {
        Self {
            coupons: config
                .coupons
                .iter()
                .map(|c| {
                    (
                        c.template_id,
                        CouponSpec {
                            multiplier: c.multiplier,
                            duration_mins: c.duration_mins,
                            windows: c.windows.clone(),
                        },
                    )
                })
                .collect(),
            equipment: config
                .equipment
                .iter()
                .filter(|e| !e.tiers.is_empty())
                .map(|e| (e.template_id, e.tiers.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl CashCatalog for StaticCatalog {
    async fn coupon(&self, _tenant: &Tenant, template_id: u32) -> Result<Option<CouponSpec>, ResolveError> {
        Ok(self.coupons.get(&template_id).cloned())
    }
}

#[async_trait]
impl EquipmentCatalog for StaticCatalog {
    async fn bonus_exp(&self, _tenant: &Tenant, template_id: u32) -> Result<Option<Vec<BonusExpTier>>, ResolveError> {
        Ok(self.equipment.get(&template_id).cloned())
    }
}

// ============================================================================
// HTTP
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CashItem {
    rate: f64,
    /// Minutes.
    time: u32,
    time_windows: Vec<TimeWindow>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Equipment {
    bonus_exp: Vec<BonusExpTier>,
}

/// Catalog over the data service (`/api/data/cash/items/{id}`, `/api/data/equipment/{id}`).
pub struct HttpCatalog {
    client: JsonApiClient,
}

impl HttpCatalog {
    pub fn new(client: JsonApiClient) -> Self {
        Self { client }
    }
}

/// A missing template is an ordinary answer, not a failure.
fn absent_if_missing<T>(result: Result<T, ResolveError>) -> Result<Option<T>, ResolveError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ResolveError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl CashCatalog for HttpCatalog {
    async fn coupon(&self, tenant: &Tenant, template_id: u32) -> Result<Option<CouponSpec>, ResolveError> {
        let path = format!("data/cash/items/{}", template_id);
        let item = absent_if_missing(self.client.fetch_one::<CashItem>(tenant, "data", &path).await)?;
        Ok(item.map(|r| r.attributes).filter(|a| a.rate > 0.0).map(|a| CouponSpec {
            multiplier: a.rate,
            duration_mins: a.time,
            windows: a.time_windows,
        }))
    }
}

#[async_trait]
impl EquipmentCatalog for HttpCatalog {
    async fn bonus_exp(&self, tenant: &Tenant, template_id: u32) -> Result<Option<Vec<BonusExpTier>>, ResolveError> {
        let path = format!("data/equipment/{}", template_id);
        let item = absent_if_missing(self.client.fetch_one::<Equipment>(tenant, "data", &path).await)?;
        Ok(item.map(|r| r.attributes.bonus_exp).filter(|tiers| !tiers.is_empty()))
    }
}
