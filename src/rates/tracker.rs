//! Per-character factor registries.
//!
//! Coupons live in an expiring registry keyed `{characterId}:{templateId}`
//! and are swept when they lapse. Equipped bonus-exp items and sessions live
//! in plain registries. Every change to a character's factor set publishes a
//! fresh snapshot on the character rates topic. Changes that come from the
//! clock alone, a bonus-exp tier reached or a coupon window opening, are
//! picked up by a periodic refresh of every online character.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::catalog::{CashCatalog, EquipmentCatalog};
use super::engine;
use super::inventory::Inventory;
use super::model::{Coupon, EquippedItem, ItemKey, RateBreakdown, Rates};
use super::sessions::SessionLog;
use super::{RatesConfig, Result};
use crate::bus::EventBus;
use crate::envelope::{Envelope, Topic, Topics};
use crate::registry::{ExpiringRegistry, InMemoryRegistry, Sweeper, TenantRegistry};
use crate::tenant::{self, Tenant};
use crate::utils::shutdown::Shutdown;

pub const RATES_CHANGED: &str = "RATES_CHANGED";

/// Tracks rate factors and answers rate queries.
pub struct RateTracker {
    config: RatesConfig,
    cash: Arc<dyn CashCatalog>,
    equipment_catalog: Arc<dyn EquipmentCatalog>,
    coupons: Arc<dyn ExpiringRegistry<ItemKey, Coupon>>,
    equipment: Arc<dyn TenantRegistry<ItemKey, EquippedItem>>,
    sessions: SessionLog,
    /// Rates last published per character.
    snapshots: Arc<dyn TenantRegistry<u32, Rates>>,
    /// Characters seeded from their inventory this session.
    initialized: Arc<dyn TenantRegistry<u32, DateTime<Utc>>>,
    inventory: Option<Arc<dyn Inventory>>,
    bus: Arc<dyn EventBus>,
    topics: Topics,
}

impl RateTracker {
    pub fn new(
        config: RatesConfig,
        cash: Arc<dyn CashCatalog>,
        equipment_catalog: Arc<dyn EquipmentCatalog>,
        bus: Arc<dyn EventBus>,
        topics: Topics,
    ) -> Self {
        Self {
            config,
            cash,
            equipment_catalog,
            coupons: Arc::new(InMemoryRegistry::new()),
            equipment: Arc::new(InMemoryRegistry::new()),
            sessions: SessionLog::in_memory(),
            snapshots: Arc::new(InMemoryRegistry::new()),
            initialized: Arc::new(InMemoryRegistry::new()),
            inventory: None,
            bus,
            topics,
        }
    }

    /// Keep factors in shared registries instead of process memory.
    pub fn with_registries(
        mut self,
        coupons: Arc<dyn ExpiringRegistry<ItemKey, Coupon>>,
        equipment: Arc<dyn TenantRegistry<ItemKey, EquippedItem>>,
        sessions: SessionLog,
    ) -> Self {
        self.coupons = coupons;
        self.equipment = equipment;
        self.sessions = sessions;
        self
    }

    /// Keep published snapshots and seeding marks in shared registries.
    pub fn with_snapshots(
        mut self,
        snapshots: Arc<dyn TenantRegistry<u32, Rates>>,
        initialized: Arc<dyn TenantRegistry<u32, DateTime<Utc>>>,
    ) -> Self {
        self.snapshots = snapshots;
        self.initialized = initialized;
        self
    }

    /// Seed untracked characters from their inventory on login.
    pub fn with_inventory(mut self, inventory: Arc<dyn Inventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn sessions(&self) -> &SessionLog {
        &self.sessions
    }

    // ------------------------------------------------------------------------
    // Asset events
    // ------------------------------------------------------------------------

    /// An item entered a character's inventory. Rate coupons start counting
    /// down at `created_at`. Returns whether the factor set changed.
    pub async fn item_created(
        &self,
        tenant: &Tenant,
        character_id: u32,
        template_id: u32,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        if !self
            .track_coupon(tenant, character_id, template_id, created_at, created_at)
            .await?
        {
            return Ok(false);
        }
        self.publish(tenant, character_id, Utc::now()).await?;
        Ok(true)
    }

    /// Track a coupon unless it has lapsed by `at`.
    async fn track_coupon(
        &self,
        tenant: &Tenant,
        character_id: u32,
        template_id: u32,
        created_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(rate_type) = self.config.coupon_type(template_id) else {
            return Ok(false);
        };
        let Some(spec) = self.cash.coupon(tenant, template_id).await? else {
            debug!(template_id, "Cash item carries no rate");
            return Ok(false);
        };

        let expires_at = (spec.duration_mins > 0)
            .then(|| created_at + chrono::Duration::minutes(i64::from(spec.duration_mins)));
        let coupon = Coupon {
            template_id,
            rate_type,
            multiplier: spec.multiplier,
            starts_at: created_at,
            expires_at,
            windows: spec.windows,
        };
        if coupon.is_expired(at) {
            return Ok(false);
        }

        let key = ItemKey::new(character_id, template_id);
        if self.coupons.get(tenant, &key).await?.as_ref() == Some(&coupon) {
            return Ok(false);
        }

        info!(
            tenant_id = %tenant.id,
            character_id,
            template_id,
            rate_type = %rate_type,
            multiplier = coupon.multiplier,
            expires_at = ?expires_at,
            "Tracking coupon"
        );
        match expires_at {
            Some(at) => self.coupons.put_until(tenant, key, coupon, at).await?,
            None => self.coupons.put(tenant, key, coupon).await?,
        }
        Ok(true)
    }

    /// An item changed slots. Equipment slots are negative.
    pub async fn item_moved(
        &self,
        tenant: &Tenant,
        character_id: u32,
        template_id: u32,
        old_slot: i16,
        new_slot: i16,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let key = ItemKey::new(character_id, template_id);

        let changed = if old_slot > 0 && new_slot < 0 {
            self.track_equipped(tenant, character_id, template_id, now).await?
        } else if old_slot < 0 && new_slot > 0 {
            let removed = self.equipment.remove(tenant, &key).await?.is_some();
            if removed {
                info!(tenant_id = %tenant.id, character_id, template_id, "Bonus-exp item unequipped");
            }
            removed
        } else {
            false
        };

        if changed {
            self.publish(tenant, character_id, now).await?;
        }
        Ok(changed)
    }

    async fn track_equipped(
        &self,
        tenant: &Tenant,
        character_id: u32,
        template_id: u32,
        equipped_since: DateTime<Utc>,
    ) -> Result<bool> {
        let key = ItemKey::new(character_id, template_id);
        if self.equipment.get(tenant, &key).await?.is_some() {
            return Ok(false);
        }
        let Some(tiers) = self.equipment_catalog.bonus_exp(tenant, template_id).await? else {
            return Ok(false);
        };
        info!(tenant_id = %tenant.id, character_id, template_id, tiers = tiers.len(), "Tracking bonus-exp item");
        let item = EquippedItem {
            template_id,
            tiers,
            equipped_since,
        };
        self.equipment.put(tenant, key, item).await?;
        Ok(true)
    }

    /// An item left the inventory; drop any factor it provided.
    pub async fn item_deleted(&self, tenant: &Tenant, character_id: u32, template_id: u32) -> Result<bool> {
        let key = ItemKey::new(character_id, template_id);
        let coupon = self.coupons.remove(tenant, &key).await?.is_some();
        let equipment = self.equipment.remove(tenant, &key).await?.is_some();
        if !(coupon || equipment) {
            return Ok(false);
        }
        info!(tenant_id = %tenant.id, character_id, template_id, "Item factor removed");
        self.publish(tenant, character_id, Utc::now()).await?;
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    pub async fn login(&self, tenant: &Tenant, character_id: u32, world_id: u8, at: DateTime<Utc>) -> Result<()> {
        debug!(tenant_id = %tenant.id, character_id, world_id, "Session opened");
        self.sessions.login(tenant, character_id, world_id, at).await?;
        Ok(())
    }

    pub async fn logout(&self, tenant: &Tenant, character_id: u32, at: DateTime<Utc>) -> Result<()> {
        if self.sessions.logout(tenant, character_id, at).await? {
            debug!(tenant_id = %tenant.id, character_id, "Session closed");
        }
        self.initialized.remove(tenant, &character_id).await?;
        Ok(())
    }

    /// Seed a character's factors from what they already own. Runs once per
    /// session; returns whether anything was seeded.
    pub async fn initialize(&self, tenant: &Tenant, character_id: u32, now: DateTime<Utc>) -> Result<bool> {
        let Some(inventory) = &self.inventory else {
            return Ok(false);
        };
        if self.initialized.get(tenant, &character_id).await?.is_some() {
            return Ok(false);
        }
        self.initialized.put(tenant, character_id, now).await?;

        let assets = match inventory.assets(tenant, character_id).await {
            Ok(assets) => assets,
            Err(e) => {
                warn!(tenant_id = %tenant.id, character_id, error = %e, "Inventory unavailable, rates not seeded");
                self.initialized.remove(tenant, &character_id).await?;
                return Ok(false);
            }
        };

        let mut seeded = 0;
        for asset in &assets {
            let tracked = if asset.is_equipped() {
                let since = asset.equipped_since.unwrap_or_else(|| {
                    warn!(character_id, template_id = asset.template_id, "Equipped item has no equip time, using now");
                    now
                });
                self.track_equipped(tenant, character_id, asset.template_id, since).await
            } else if self.config.coupon_type(asset.template_id).is_some() {
                let created_at = asset.created_at.unwrap_or(now);
                self.track_coupon(tenant, character_id, asset.template_id, created_at, now)
                    .await
            } else {
                continue;
            };
            match tracked {
                Ok(true) => seeded += 1,
                Ok(false) => {}
                Err(e) => warn!(character_id, template_id = asset.template_id, error = %e, "Failed to seed item factor"),
            }
        }

        debug!(tenant_id = %tenant.id, character_id, assets = assets.len(), seeded, "Rate tracking initialized");
        if seeded > 0 {
            self.publish(tenant, character_id, now).await?;
        }
        Ok(seeded > 0)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Rates of a character at `t`.
    pub async fn rates(&self, tenant: &Tenant, character_id: u32, t: DateTime<Utc>) -> Result<RateBreakdown> {
        let coupons: Vec<Coupon> = self
            .coupons
            .entries(tenant)
            .await?
            .into_iter()
            .filter(|(k, _)| k.character_id == character_id)
            .map(|(_, v)| v)
            .collect();
        let equipment: Vec<EquippedItem> = self
            .equipment
            .entries(tenant)
            .await?
            .into_iter()
            .filter(|(k, _)| k.character_id == character_id)
            .map(|(_, v)| v)
            .collect();
        let history = self.sessions.history(tenant, character_id).await?.unwrap_or_default();

        let policy = self.config.policy(tenant.id, history.world_id);
        let (rates, factors) = engine::compute(&policy, &coupons, &equipment, &history.sessions, t);
        Ok(RateBreakdown {
            character_id,
            computed_at: t,
            rates,
            factors,
        })
    }

    async fn publish(&self, tenant: &Tenant, character_id: u32, t: DateTime<Utc>) -> Result<()> {
        let snapshot = self.rates(tenant, character_id, t).await?;
        self.announce(tenant, &snapshot).await
    }

    async fn announce(&self, tenant: &Tenant, snapshot: &RateBreakdown) -> Result<()> {
        let envelope = Envelope::new(
            self.topics.name(Topic::EventCharacterRates),
            snapshot.character_id,
            tenant.clone(),
            RATES_CHANGED,
            snapshot,
        )?;
        self.bus.publish(Arc::new(envelope)).await?;
        self.snapshots
            .put(tenant, snapshot.character_id, snapshot.rates)
            .await?;
        Ok(())
    }

    /// Recompute every online character at `now` and publish those whose
    /// rates moved since their last snapshot. Returns how many were published.
    pub async fn refresh_online(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut published = 0;
        for t in self.sessions.tenants().await? {
            match tenant::scope(t.clone(), self.refresh_tenant(&t, now)).await {
                Ok(count) => published += count,
                Err(e) => warn!(tenant_id = %t.id, error = %e, "Rate refresh failed"),
            }
        }
        Ok(published)
    }

    async fn refresh_tenant(&self, tenant: &Tenant, now: DateTime<Utc>) -> Result<usize> {
        let mut published = 0;
        for character_id in self.sessions.online(tenant).await? {
            let snapshot = self.rates(tenant, character_id, now).await?;
            if self.snapshots.get(tenant, &character_id).await? == Some(snapshot.rates) {
                continue;
            }
            debug!(tenant_id = %tenant.id, character_id, exp = snapshot.rates.exp, "Rates moved with time");
            match self.announce(tenant, &snapshot).await {
                Ok(()) => published += 1,
                Err(e) => warn!(tenant_id = %tenant.id, character_id, error = %e, "Failed to publish rates"),
            }
        }
        Ok(published)
    }

    // ------------------------------------------------------------------------
    // Expiry
    // ------------------------------------------------------------------------

    /// Sweeper callback for a lapsed coupon.
    pub async fn coupon_expired(&self, tenant: &Tenant, key: ItemKey, coupon: Coupon) {
        info!(
            tenant_id = %tenant.id,
            character_id = key.character_id,
            template_id = key.template_id,
            rate_type = %coupon.rate_type,
            "Coupon expired"
        );
        if let Err(e) = self.publish(tenant, key.character_id, Utc::now()).await {
            warn!(tenant_id = %tenant.id, character_id = key.character_id, error = %e, "Failed to publish rates");
        }
    }

    /// Remove lapsed coupons and refresh online characters every sweep
    /// interval until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, shutdown: Shutdown) {
        let every = Duration::from_secs(self.config.sweep_interval_secs);
        let sweeper = Sweeper::new("coupons", Arc::clone(&self.coupons), every);
        let expiring = Arc::clone(&self);
        let sweep = sweeper.run(shutdown.clone(), move |tenant, key, coupon| {
            let tracker = Arc::clone(&expiring);
            async move { tracker.coupon_expired(&tenant, key, coupon).await }
        });
        tokio::join!(sweep, self.run_refresh(shutdown, every));
    }

    async fn run_refresh(self: Arc<Self>, shutdown: Shutdown, every: Duration) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => return,
            }
            match self.refresh_online(Utc::now()).await {
                Ok(0) => {}
                Ok(count) => debug!(count, "Published refreshed rates"),
                Err(e) => warn!(error = %e, "Rate refresh failed"),
            }
        }
    }
}
