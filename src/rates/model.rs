//! Rate factors and results.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateType {
    Exp,
    Drop,
    Meso,
}

impl RateType {
    pub const ALL: [RateType; 3] = [RateType::Exp, RateType::Drop, RateType::Meso];
}

impl fmt::Display for RateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RateType::Exp => "exp",
            RateType::Drop => "drop",
            RateType::Meso => "meso",
        })
    }
}

/// One multiplier per rate type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rates {
    pub exp: f64,
    pub drop: f64,
    pub meso: f64,
}

impl Default for Rates {
    fn default() -> Self {
        Self {
            exp: 1.0,
            drop: 1.0,
            meso: 1.0,
        }
    }
}

impl Rates {
    pub fn get(&self, rate_type: RateType) -> f64 {
        match rate_type {
            RateType::Exp => self.exp,
            RateType::Drop => self.drop,
            RateType::Meso => self.meso,
        }
    }

    pub fn scale(&mut self, rate_type: RateType, by: f64) {
        match rate_type {
            RateType::Exp => self.exp *= by,
            RateType::Drop => self.drop *= by,
            RateType::Meso => self.meso *= by,
        }
    }
}

/// Hours of a weekday (or of holidays) during which a coupon applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    /// `MON`..`SUN`, or `HOL` for configured holidays.
    pub day: String,
    #[serde(alias = "start_hour")]
    pub start_hour: u32,
    /// Exclusive; 24 runs through midnight.
    #[serde(alias = "end_hour")]
    pub end_hour: u32,
}

const DAYS: [&str; 8] = ["MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN", "HOL"];

impl TimeWindow {
    pub fn validate(&self) -> Result<(), String> {
        if !DAYS.contains(&self.day.as_str()) {
            return Err(format!("unknown day '{}'", self.day));
        }
        if self.start_hour >= self.end_hour || self.end_hour > 24 {
            return Err(format!("bad hours {}..{}", self.start_hour, self.end_hour));
        }
        Ok(())
    }

    /// Whether local time `at` falls in the window.
    pub fn covers(&self, at: NaiveDateTime, holiday: bool) -> bool {
        let day_matches = if self.day == "HOL" {
            holiday
        } else {
            self.day == day_name(at.weekday())
        };
        day_matches && (self.start_hour..self.end_hour).contains(&at.hour())
    }
}

fn day_name(day: Weekday) -> &'static str {
    DAYS[day.num_days_from_monday() as usize]
}

/// Catalog data of a coupon template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponSpec {
    pub multiplier: f64,
    /// Zero means permanent.
    pub duration_mins: u32,
    #[serde(default)]
    pub windows: Vec<TimeWindow>,
}

/// An owned coupon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub template_id: u32,
    pub rate_type: RateType,
    pub multiplier: f64,
    pub starts_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub windows: Vec<TimeWindow>,
}

impl Coupon {
    pub fn is_expired(&self, t: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= t)
    }

    /// Applies at local time `local` (before expiry is considered).
    pub fn in_window(&self, local: NaiveDateTime, holiday: bool) -> bool {
        self.windows.is_empty() || self.windows.iter().any(|w| w.covers(local, holiday))
    }
}

/// One step of a bonus-exp tier table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BonusExpTier {
    #[serde(alias = "termStart", alias = "hours_threshold")]
    pub hours_threshold: u32,
    #[serde(alias = "incExpR", alias = "bonus_pct")]
    pub bonus_pct: u32,
}

/// Thresholds must be strictly ascending.
pub fn validate_tiers(tiers: &[BonusExpTier]) -> Result<(), String> {
    if tiers.windows(2).any(|w| w[0].hours_threshold >= w[1].hours_threshold) {
        return Err("tier thresholds are not strictly ascending".to_string());
    }
    Ok(())
}

/// An equipped bonus-exp item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquippedItem {
    pub template_id: u32,
    pub tiers: Vec<BonusExpTier>,
    pub equipped_since: DateTime<Utc>,
}

/// One contribution to a character's rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Factor {
    /// `world`, or `item:{templateId}`.
    pub source: String,
    pub rate_type: RateType,
    pub multiplier: f64,
}

impl Factor {
    pub fn item(template_id: u32, rate_type: RateType, multiplier: f64) -> Self {
        Self {
            source: format!("item:{}", template_id),
            rate_type,
            multiplier,
        }
    }
}

/// Rates of one character at one instant, with their sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateBreakdown {
    pub character_id: u32,
    pub computed_at: DateTime<Utc>,
    pub rates: Rates,
    pub factors: Vec<Factor>,
}

/// Registry key of one item held by one character, rendered `{characterId}:{templateId}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub character_id: u32,
    pub template_id: u32,
}

impl ItemKey {
    pub fn new(character_id: u32, template_id: u32) -> Self {
        Self {
            character_id,
            template_id,
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.character_id, self.template_id)
    }
}

impl FromStr for ItemKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (character, template) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed item key '{}'", s))?;
        Ok(Self {
            character_id: character.parse().map_err(|_| format!("malformed item key '{}'", s))?,
            template_id: template.parse().map_err(|_| format!("malformed item key '{}'", s))?,
        })
    }
}
