//! Rate aggregation.
//!
//! Pure functions over a factor set and an instant. Nothing here reads the
//! clock, so equal inputs always give equal multipliers.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};

use super::model::{BonusExpTier, Coupon, EquippedItem, Factor, RateType, Rates};
use super::sessions::{played_hours, Session};
use super::CouponComposition;

/// How one tenant in one world aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    /// World rate times tenant rate.
    pub base: Rates,
    pub composition: CouponComposition,
    /// Offset of the local day used for midnight and coupon windows.
    pub offset: FixedOffset,
    pub holidays: Vec<NaiveDate>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            base: Rates::default(),
            composition: CouponComposition::default(),
            offset: utc(),
            holidays: Vec::new(),
        }
    }
}

pub fn utc() -> FixedOffset {
    Utc.fix()
}

/// The local midnight at or before `t`, as a UTC instant.
pub fn local_midnight(t: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local_midnight = t.with_timezone(&offset).date_naive().and_time(NaiveTime::MIN);
    let utc_midnight = local_midnight - Duration::seconds(i64::from(offset.local_minus_utc()));
    Utc.from_utc_datetime(&utc_midnight)
}

/// `1 + bonusPct/100` of the highest tier reached with `hours` played.
pub fn tier_multiplier(tiers: &[BonusExpTier], hours: i64) -> f64 {
    tiers
        .iter()
        .filter(|tier| i64::from(tier.hours_threshold) <= hours)
        .max_by_key(|tier| tier.hours_threshold)
        .map_or(1.0, |tier| 1.0 + f64::from(tier.bonus_pct) / 100.0)
}

/// Bonus-exp multiplier of one equipped item at `t`.
///
/// Worn since before the last local midnight, the item keeps the better of
/// the tier earned on the previous local day and the tier earned today. The
/// previous day is bounded to the 24 hours before midnight.
pub fn bonus_multiplier(item: &EquippedItem, sessions: &[Session], offset: FixedOffset, t: DateTime<Utc>) -> f64 {
    if t < item.equipped_since {
        return 1.0;
    }
    let midnight = local_midnight(t, offset);
    if item.equipped_since < midnight {
        let day_start = item.equipped_since.max(midnight - Duration::hours(24));
        let before = tier_multiplier(&item.tiers, played_hours(sessions, day_start, midnight));
        let after = tier_multiplier(&item.tiers, played_hours(sessions, midnight, t));
        before.max(after)
    } else {
        tier_multiplier(&item.tiers, played_hours(sessions, item.equipped_since, t))
    }
}

/// Coupons of one type that apply at `t`, composed per policy.
fn coupon_factors(policy: &Policy, coupons: &[Coupon], rate_type: RateType, t: DateTime<Utc>) -> Vec<Factor> {
    let local = t.with_timezone(&policy.offset).naive_local();
    let holiday = policy.holidays.contains(&local.date());

    let mut active: Vec<&Coupon> = coupons
        .iter()
        .filter(|c| c.rate_type == rate_type)
        .filter(|c| c.starts_at <= t && !c.is_expired(t))
        .filter(|c| c.in_window(local, holiday))
        .collect();
    active.sort_by_key(|c| c.template_id);

    let as_factor = |c: &Coupon| Factor::item(c.template_id, rate_type, c.multiplier);
    match policy.composition {
        CouponComposition::Multiplicative => active.into_iter().map(as_factor).collect(),
        CouponComposition::Max => active
            .into_iter()
            .fold(None::<&Coupon>, |best, c| match best {
                Some(b) if b.multiplier >= c.multiplier => Some(b),
                _ => Some(c),
            })
            .map(as_factor)
            .into_iter()
            .collect(),
    }
}

/// Rates and contributing factors of one character at `t`.
pub fn compute(
    policy: &Policy,
    coupons: &[Coupon],
    equipment: &[EquippedItem],
    sessions: &[Session],
    t: DateTime<Utc>,
) -> (Rates, Vec<Factor>) {
    let mut factors = Vec::new();

    for rate_type in RateType::ALL {
        factors.extend(coupon_factors(policy, coupons, rate_type, t));
    }

    let mut equipped: Vec<&EquippedItem> = equipment.iter().collect();
    equipped.sort_by_key(|item| item.template_id);
    for item in equipped {
        let multiplier = bonus_multiplier(item, sessions, policy.offset, t);
        if multiplier > 1.0 {
            factors.push(Factor::item(item.template_id, RateType::Exp, multiplier));
        }
    }

    for rate_type in RateType::ALL {
        let base = policy.base.get(rate_type);
        if base != 1.0 {
            factors.push(Factor {
                source: "world".to_string(),
                rate_type,
                multiplier: base,
            });
        }
    }

    let mut rates = Rates::default();
    for factor in &factors {
        rates.scale(factor.rate_type, factor.multiplier);
    }
    (rates, factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::TimeWindow;

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, d, h, m, 0).unwrap()
    }

    fn tiers() -> Vec<BonusExpTier> {
        vec![
            BonusExpTier {
                hours_threshold: 2,
                bonus_pct: 10,
            },
            BonusExpTier {
                hours_threshold: 6,
                bonus_pct: 30,
            },
        ]
    }

    fn coupon(template_id: u32, rate_type: RateType, multiplier: f64, from: DateTime<Utc>, mins: i64) -> Coupon {
        Coupon {
            template_id,
            rate_type,
            multiplier,
            starts_at: from,
            expires_at: Some(from + Duration::minutes(mins)),
            windows: Vec::new(),
        }
    }

    fn open(from: DateTime<Utc>) -> Vec<Session> {
        vec![Session {
            login_at: from,
            logout_at: None,
        }]
    }

    #[test]
    fn test_tier_selection() {
        assert_eq!(tier_multiplier(&tiers(), 0), 1.0);
        assert_eq!(tier_multiplier(&tiers(), 2), 1.1);
        assert_eq!(tier_multiplier(&tiers(), 5), 1.1);
        assert_eq!(tier_multiplier(&tiers(), 9), 1.3);
        assert_eq!(tier_multiplier(&[], 9), 1.0);
    }

    #[test]
    fn test_local_midnight_honours_offset() {
        let kst = FixedOffset::east_opt(9 * 3600).unwrap();
        // 2025-03-01 16:00 UTC is 2025-03-02 01:00 KST.
        assert_eq!(local_midnight(at(1, 16, 0), kst), at(1, 15, 0));
        assert_eq!(local_midnight(at(1, 16, 0), utc()), at(1, 0, 0));
    }

    #[test]
    fn test_coupon_expiry_boundary() {
        let policy = Policy::default();
        let coupons = [coupon(5_211_000, RateType::Exp, 2.0, at(1, 10, 0), 30)];

        let (rates, factors) = compute(&policy, &coupons, &[], &[], at(1, 10, 10));
        assert_eq!(rates.exp, 2.0);
        assert_eq!(factors, vec![Factor::item(5_211_000, RateType::Exp, 2.0)]);

        let (rates, factors) = compute(&policy, &coupons, &[], &[], at(1, 10, 30));
        assert_eq!(rates.exp, 1.0);
        assert!(factors.is_empty());
    }

    #[test]
    fn test_max_composition_takes_strongest() {
        let policy = Policy::default();
        let coupons = [
            coupon(5_211_000, RateType::Exp, 2.0, at(1, 10, 0), 60),
            coupon(5_211_001, RateType::Exp, 3.0, at(1, 10, 0), 60),
            coupon(5_360_000, RateType::Drop, 2.0, at(1, 10, 0), 60),
        ];
        let (rates, factors) = compute(&policy, &coupons, &[], &[], at(1, 10, 5));
        assert_eq!(rates.exp, 3.0);
        assert_eq!(rates.drop, 2.0);
        assert_eq!(rates.meso, 1.0);
        assert_eq!(factors.len(), 2);
    }

    #[test]
    fn test_multiplicative_composition_stacks() {
        let policy = Policy {
            composition: CouponComposition::Multiplicative,
            ..Policy::default()
        };
        let coupons = [
            coupon(5_211_000, RateType::Exp, 2.0, at(1, 10, 0), 60),
            coupon(5_211_001, RateType::Exp, 1.5, at(1, 10, 0), 60),
        ];
        let (rates, _) = compute(&policy, &coupons, &[], &[], at(1, 10, 5));
        assert_eq!(rates.exp, 3.0);
    }

    #[test]
    fn test_windowed_coupon_outside_window() {
        let policy = Policy::default();
        let mut weekend = coupon(5_211_000, RateType::Exp, 2.0, at(1, 0, 0), 7 * 24 * 60);
        weekend.windows = vec![TimeWindow {
            day: "SAT".to_string(),
            start_hour: 18,
            end_hour: 24,
        }];
        let coupons = [weekend];

        // 2025-03-01 is a Saturday.
        assert_eq!(compute(&policy, &coupons, &[], &[], at(1, 19, 0)).0.exp, 2.0);
        assert_eq!(compute(&policy, &coupons, &[], &[], at(1, 12, 0)).0.exp, 1.0);
        assert_eq!(compute(&policy, &coupons, &[], &[], at(3, 19, 0)).0.exp, 1.0);
    }

    #[test]
    fn test_holiday_window_uses_local_date() {
        let mut policy = Policy {
            offset: FixedOffset::east_opt(9 * 3600).unwrap(),
            ..Policy::default()
        };
        policy.holidays.push(NaiveDate::from_ymd_opt(2025, 3, 2).unwrap());
        let mut holiday = coupon(5_211_000, RateType::Exp, 2.0, at(1, 0, 0), 3 * 24 * 60);
        holiday.windows = vec![TimeWindow {
            day: "HOL".to_string(),
            start_hour: 0,
            end_hour: 24,
        }];
        let coupons = [holiday];

        // 16:00 UTC on the 1st is already the 2nd in local time.
        assert_eq!(compute(&policy, &coupons, &[], &[], at(1, 16, 0)).0.exp, 2.0);
        assert_eq!(compute(&policy, &coupons, &[], &[], at(1, 14, 0)).0.exp, 1.0);
    }

    #[test]
    fn test_base_rates_multiply_through() {
        let policy = Policy {
            base: Rates {
                exp: 2.0,
                drop: 1.0,
                meso: 1.0,
            },
            ..Policy::default()
        };
        let coupons = [coupon(5_211_000, RateType::Exp, 2.0, at(1, 10, 0), 30)];
        let (rates, factors) = compute(&policy, &coupons, &[], &[], at(1, 10, 10));
        assert_eq!(rates.exp, 4.0);
        assert!(factors.iter().any(|f| f.source == "world" && f.rate_type == RateType::Exp));
        assert!(!factors.iter().any(|f| f.source == "world" && f.rate_type == RateType::Drop));
    }

    #[test]
    fn test_bonus_exp_grows_with_playtime() {
        let item = EquippedItem {
            template_id: 1_002_357,
            tiers: tiers(),
            equipped_since: at(1, 8, 0),
        };
        let sessions = open(at(1, 8, 0));
        assert_eq!(bonus_multiplier(&item, &sessions, utc(), at(1, 9, 59)), 1.0);
        assert_eq!(bonus_multiplier(&item, &sessions, utc(), at(1, 10, 0)), 1.1);
        assert_eq!(bonus_multiplier(&item, &sessions, utc(), at(1, 14, 0)), 1.3);
    }

    #[test]
    fn test_midnight_retains_previous_day_tier() {
        let item = EquippedItem {
            template_id: 1_002_357,
            tiers: tiers(),
            equipped_since: at(1, 22, 0),
        };
        let sessions = open(at(1, 22, 0));
        let multiplier = bonus_multiplier(&item, &sessions, utc(), at(2, 0, 30));
        assert!(multiplier >= 1.1);
    }

    #[test]
    fn test_session_closed_a_minute_before_midnight_keeps_its_tier() {
        let item = EquippedItem {
            template_id: 1_002_357,
            tiers: tiers(),
            equipped_since: at(1, 22, 0),
        };
        let sessions = [Session {
            login_at: at(1, 22, 0),
            logout_at: Some(at(1, 23, 59)),
        }];
        assert_eq!(bonus_multiplier(&item, &sessions, utc(), at(2, 0, 30)), 1.1);
    }

    #[test]
    fn test_midnight_does_not_accumulate_across_days() {
        let item = EquippedItem {
            template_id: 1_002_357,
            tiers: tiers(),
            equipped_since: at(1, 20, 0),
        };
        // Four hours before midnight plus four after: eight hours overall,
        // but neither day reaches the six hour tier.
        let sessions = open(at(1, 20, 0));
        assert_eq!(bonus_multiplier(&item, &sessions, utc(), at(2, 4, 0)), 1.1);
    }

    #[test]
    fn test_closed_sessions_never_raise_the_rate() {
        let policy = Policy::default();
        let item = EquippedItem {
            template_id: 1_002_357,
            tiers: tiers(),
            equipped_since: at(1, 18, 0),
        };
        let sessions = [Session {
            login_at: at(1, 18, 0),
            logout_at: Some(at(2, 1, 0)),
        }];
        let coupons = [coupon(5_211_000, RateType::Exp, 2.0, at(1, 18, 0), 12 * 60)];

        let mut previous = f64::MAX;
        for hour in 0..48 {
            let t = at(2, 1, 30) + Duration::hours(hour);
            let (rates, _) = compute(&policy, &coupons, std::slice::from_ref(&item), &sessions, t);
            assert!(rates.exp <= previous, "rate rose at {}", t);
            previous = rates.exp;
        }
    }

    #[test]
    fn test_same_inputs_same_result() {
        let policy = Policy::default();
        let item = EquippedItem {
            template_id: 1_002_357,
            tiers: tiers(),
            equipped_since: at(1, 8, 0),
        };
        let coupons = [coupon(5_211_000, RateType::Exp, 2.0, at(1, 8, 0), 600)];
        let sessions = open(at(1, 8, 0));
        let first = compute(&policy, &coupons, std::slice::from_ref(&item), &sessions, at(1, 11, 0));
        let second = compute(&policy, &coupons, std::slice::from_ref(&item), &sessions, at(1, 11, 0));
        assert_eq!(first, second);
        assert!((first.0.exp - 2.2).abs() < 1e-9);
    }
}
