//! Per-character rate aggregation.
//!
//! A character's experience, drop and meso multipliers combine:
//! - the world and tenant base rates,
//! - active cash coupons (time-limited, optionally restricted to weekday/hour
//!   windows), composed per rate type by maximum or product,
//! - equipped bonus-exp items whose tier grows with hours actually played
//!   while wearing them.
//!
//! Factors are inserted and removed from asset events; sessions come from
//! login/logout events; a character's first login seeds factors from the
//! inventory. Rates are computed on demand for an instant, so the same
//! factor set and instant always give the same multipliers.
//!
//! Modules:
//! - `model`: factor and result types
//! - `sessions`: playtime session log
//! - `catalog`: coupon and bonus-exp item data
//! - `inventory`: owned assets used to seed untracked characters
//! - `engine`: aggregation, including the midnight retention rule
//! - `tracker`: factor registries and snapshot publication
//! - `consumer`: bus wiring

use chrono::{FixedOffset, NaiveDate};
use serde::Deserialize;
use uuid::Uuid;

use crate::bus::BusError;
use crate::envelope::EnvelopeError;
use crate::jsonapi::ResolveError;
use crate::registry::RegistryError;

pub mod catalog;
pub mod consumer;
pub mod engine;
pub mod inventory;
pub mod model;
pub mod sessions;
pub mod tracker;

pub use catalog::{CashCatalog, EquipmentCatalog, HttpCatalog, StaticCatalog};
pub use engine::Policy;
pub use inventory::{HttpInventory, Inventory, OwnedAsset, StaticInventory};
pub use model::{
    BonusExpTier, Coupon, CouponSpec, EquippedItem, Factor, ItemKey, RateBreakdown, RateType, Rates, TimeWindow,
};
pub use sessions::{Session, SessionLog};
pub use tracker::RateTracker;

/// Result type for rate operations.
pub type Result<T> = std::result::Result<T, RateError>;

#[derive(Debug, thiserror::Error)]
pub enum RateError {
    #[error("Invalid rate configuration: {0}")]
    InvalidConfig(String),

    #[error("Catalog lookup failed: {0}")]
    Catalog(#[from] ResolveError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
}

/// How multiple coupons of one rate type combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponComposition {
    /// Only the strongest coupon applies.
    #[default]
    Max,
    Multiplicative,
}

/// Base multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BaseRates {
    pub exp: f64,
    pub drop: f64,
    pub meso: f64,
}

impl Default for BaseRates {
    fn default() -> Self {
        Self {
            exp: 1.0,
            drop: 1.0,
            meso: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorldRates {
    pub world_id: u8,
    pub rates: BaseRates,
}

/// Per-tenant overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TenantRates {
    pub tenant_id: Uuid,
    pub rates: BaseRates,
    pub coupon_composition: Option<CouponComposition>,
    pub utc_offset_minutes: Option<i32>,
}

/// Inclusive template id range classified as one coupon type.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CouponRange {
    pub rate_type: RateType,
    pub first: u32,
    pub last: u32,
}

/// Catalog entry for a coupon.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CouponEntry {
    pub template_id: u32,
    pub multiplier: f64,
    /// Zero means the coupon never expires.
    pub duration_mins: u32,
    pub windows: Vec<TimeWindow>,
}

/// Catalog entry for a bonus-exp equipment piece.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EquipmentEntry {
    pub template_id: u32,
    pub tiers: Vec<BonusExpTier>,
}

/// Rates service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RatesConfig {
    /// Applies to worlds without their own entry.
    pub base: BaseRates,
    pub worlds: Vec<WorldRates>,
    pub tenants: Vec<TenantRates>,
    pub coupon_composition: CouponComposition,
    /// Offset of the game's local day from UTC.
    pub utc_offset_minutes: i32,
    /// Local dates on which `HOL` coupon windows apply.
    pub holidays: Vec<NaiveDate>,
    pub coupon_ranges: Vec<CouponRange>,
    /// Static catalog, used when no data service endpoint is configured.
    pub coupons: Vec<CouponEntry>,
    pub equipment: Vec<EquipmentEntry>,
    pub sweep_interval_secs: u64,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            base: BaseRates::default(),
            worlds: Vec::new(),
            tenants: Vec::new(),
            coupon_composition: CouponComposition::Max,
            utc_offset_minutes: 0,
            holidays: Vec::new(),
            coupon_ranges: vec![
                CouponRange {
                    rate_type: RateType::Exp,
                    first: 5_210_000,
                    last: 5_219_999,
                },
                CouponRange {
                    rate_type: RateType::Drop,
                    first: 5_360_000,
                    last: 5_369_999,
                },
            ],
            coupons: Vec::new(),
            equipment: Vec::new(),
            sweep_interval_secs: 60,
        }
    }
}

impl RatesConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(RateError::InvalidConfig(msg));

        if self.sweep_interval_secs == 0 {
            return invalid("sweep_interval_secs must be positive".to_string());
        }
        offset(self.utc_offset_minutes)?;
        for t in &self.tenants {
            if let Some(minutes) = t.utc_offset_minutes {
                offset(minutes)?;
            }
        }
        for range in &self.coupon_ranges {
            if range.first > range.last {
                return invalid(format!("coupon range {}..{} is reversed", range.first, range.last));
            }
        }
        for coupon in &self.coupons {
            if coupon.multiplier <= 0.0 {
                return invalid(format!("coupon {} has non-positive multiplier", coupon.template_id));
            }
            for window in &coupon.windows {
                window
                    .validate()
                    .map_err(|e| RateError::InvalidConfig(format!("coupon {}: {}", coupon.template_id, e)))?;
            }
        }
        for item in &self.equipment {
            model::validate_tiers(&item.tiers)
                .map_err(|e| RateError::InvalidConfig(format!("equipment {}: {}", item.template_id, e)))?;
        }
        Ok(())
    }

    /// Coupon type of a template id, if it falls in a coupon range.
    pub fn coupon_type(&self, template_id: u32) -> Option<RateType> {
        self.coupon_ranges
            .iter()
            .find(|r| (r.first..=r.last).contains(&template_id))
            .map(|r| r.rate_type)
    }

    /// Aggregation policy of one tenant in one world.
    pub fn policy(&self, tenant_id: Uuid, world_id: u8) -> Policy {
        let world = self
            .worlds
            .iter()
            .find(|w| w.world_id == world_id)
            .map(|w| w.rates)
            .unwrap_or(self.base);
        let overrides = self.tenants.iter().find(|t| t.tenant_id == tenant_id);
        let tenant = overrides.map(|t| t.rates).unwrap_or_default();
        let minutes = overrides
            .and_then(|t| t.utc_offset_minutes)
            .unwrap_or(self.utc_offset_minutes);

        Policy {
            base: Rates {
                exp: world.exp * tenant.exp,
                drop: world.drop * tenant.drop,
                meso: world.meso * tenant.meso,
            },
            composition: overrides
                .and_then(|t| t.coupon_composition)
                .unwrap_or(self.coupon_composition),
            offset: offset(minutes).unwrap_or_else(|_| engine::utc()),
            holidays: self.holidays.clone(),
        }
    }
}

fn offset(minutes: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(minutes * 60)
        .ok_or_else(|| RateError::InvalidConfig(format!("utc offset of {} minutes is out of range", minutes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_coupon_ranges() {
        let config = RatesConfig::default();
        assert_eq!(config.coupon_type(5_211_000), Some(RateType::Exp));
        assert_eq!(config.coupon_type(5_360_042), Some(RateType::Drop));
        assert_eq!(config.coupon_type(1_002_357), None);
        config.validate().unwrap();
    }

    #[test]
    fn test_unsorted_tiers_rejected() {
        let config = RatesConfig {
            equipment: vec![EquipmentEntry {
                template_id: 1_002_357,
                tiers: vec![
                    BonusExpTier {
                        hours_threshold: 6,
                        bonus_pct: 30,
                    },
                    BonusExpTier {
                        hours_threshold: 2,
                        bonus_pct: 10,
                    },
                ],
            }],
            ..RatesConfig::default()
        };
        assert!(matches!(config.validate(), Err(RateError::InvalidConfig(_))));
    }

    #[test]
    fn test_policy_combines_world_and_tenant() {
        let tenant_id = Uuid::new_v4();
        let config = RatesConfig {
            worlds: vec![WorldRates {
                world_id: 1,
                rates: BaseRates {
                    exp: 2.0,
                    drop: 1.0,
                    meso: 1.5,
                },
            }],
            tenants: vec![TenantRates {
                tenant_id,
                rates: BaseRates {
                    exp: 1.5,
                    ..BaseRates::default()
                },
                coupon_composition: Some(CouponComposition::Multiplicative),
                utc_offset_minutes: Some(-300),
            }],
            ..RatesConfig::default()
        };

        let policy = config.policy(tenant_id, 1);
        assert_eq!(policy.base.exp, 3.0);
        assert_eq!(policy.base.meso, 1.5);
        assert_eq!(policy.composition, CouponComposition::Multiplicative);
        assert_eq!(policy.offset.local_minus_utc(), -300 * 60);

        let other = config.policy(Uuid::new_v4(), 0);
        assert_eq!(other.base, Rates::default());
        assert_eq!(other.composition, CouponComposition::Max);
    }

    #[test]
    fn test_out_of_range_offset_rejected() {
        let config = RatesConfig {
            utc_offset_minutes: 24 * 60,
            ..RatesConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
coupon_composition: multiplicative
utc_offset_minutes: 540
holidays: [2025-01-01]
coupons:
  - template_id: 5211000
    multiplier: 2.0
    duration_mins: 30
    windows:
      - day: SAT
        start_hour: 0
        end_hour: 24
equipment:
  - template_id: 1002357
    tiers:
      - hours_threshold: 2
        bonus_pct: 10
      - hours_threshold: 6
        bonus_pct: 30
"#;
        let config: RatesConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.coupon_composition, CouponComposition::Multiplicative);
        assert_eq!(config.coupons[0].windows[0].day, "SAT");
        assert_eq!(config.equipment[0].tiers.len(), 2);
        assert_eq!(config.sweep_interval_secs, 60);
    }
}
