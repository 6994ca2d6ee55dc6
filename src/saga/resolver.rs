//! Read-time lookups used before a step's command is built.
//!
//! A failed lookup fails the step before any write is issued.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::actions::{Lookup, Resolved};
use crate::jsonapi::{JsonApiClient, ResolveError};
use crate::tenant::Tenant;

/// Outcome of a character state validation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    pub passed: bool,
    /// Human-readable results of failed conditions.
    #[serde(default)]
    pub details: Vec<String>,
}

impl Validation {
    pub fn passed() -> Self {
        Self {
            passed: true,
            details: Vec::new(),
        }
    }
}

/// Lookups against owning services.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn guild_id_by_name(&self, tenant: &Tenant, world_id: u8, name: &str) -> Result<u32, ResolveError>;

    async fn route_id_by_name(&self, tenant: &Tenant, name: &str) -> Result<Uuid, ResolveError>;

    async fn reactor_id_by_name(
        &self,
        tenant: &Tenant,
        world_id: u8,
        channel_id: u8,
        map_id: u32,
        name: &str,
    ) -> Result<u32, ResolveError>;

    /// Evaluate `conditions` against the character.
    async fn validate_character(
        &self,
        tenant: &Tenant,
        character_id: u32,
        conditions: &[Value],
    ) -> Result<Validation, ResolveError>;
}

/// Run one [`Lookup`].
pub async fn resolve(resolver: &dyn Resolver, tenant: &Tenant, lookup: &Lookup) -> Result<Resolved, ResolveError> {
    match lookup {
        Lookup::GuildByName { world_id, name } => resolver
            .guild_id_by_name(tenant, *world_id, name)
            .await
            .map(Resolved::Guild),
        Lookup::RouteByName { name } => resolver.route_id_by_name(tenant, name).await.map(Resolved::Route),
        Lookup::ReactorByName {
            world_id,
            channel_id,
            map_id,
            name,
        } => resolver
            .reactor_id_by_name(tenant, *world_id, *channel_id, *map_id, name)
            .await
            .map(Resolved::Reactor),
    }
}

// ============================================================================
// HTTP
// ============================================================================

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidationRequest<'a> {
    character_id: u32,
    conditions: &'a [Value],
}

/// Resolver over the peers' JSON:API read endpoints.
pub struct HttpResolver {
    client: JsonApiClient,
}

impl HttpResolver {
    pub fn new(client: JsonApiClient) -> Self {
        Self { client }
    }

    fn parse_id<T: std::str::FromStr>(raw: &str) -> Result<T, ResolveError> {
        raw.parse()
            .map_err(|_| ResolveError::Decode(format!("unexpected resource id '{}'", raw)))
    }
}

#[async_trait]
impl Resolver for HttpResolver {
    async fn guild_id_by_name(&self, tenant: &Tenant, world_id: u8, name: &str) -> Result<u32, ResolveError> {
        let path = format!("guilds?filter[name]={}&filter[worldId]={}", name, world_id);
        let guilds = self.client.fetch::<Named>(tenant, "guilds", &path).await?;
        let guild = guilds
            .data
            .into_vec()
            .into_iter()
            .find(|g| g.attributes.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ResolveError::NotFound(format!("guild '{}'", name)))?;
        Self::parse_id(&guild.id)
    }

    async fn route_id_by_name(&self, tenant: &Tenant, name: &str) -> Result<Uuid, ResolveError> {
        let routes = self.client.fetch::<Named>(tenant, "transports", "transports/instance-routes").await?;
        let route = routes
            .data
            .into_vec()
            .into_iter()
            .find(|r| r.attributes.name == name)
            .ok_or_else(|| ResolveError::NotFound(format!("route '{}'", name)))?;
        Self::parse_id(&route.id)
    }

    async fn reactor_id_by_name(
        &self,
        tenant: &Tenant,
        world_id: u8,
        channel_id: u8,
        map_id: u32,
        name: &str,
    ) -> Result<u32, ResolveError> {
        let path = format!(
            "worlds/{}/channels/{}/maps/{}/reactors",
            world_id, channel_id, map_id
        );
        let reactors = self.client.fetch::<Named>(tenant, "reactors", &path).await?;
        let reactor = reactors
            .data
            .into_vec()
            .into_iter()
            .find(|r| r.attributes.name == name)
            .ok_or_else(|| ResolveError::NotFound(format!("reactor '{}' in map {}", name, map_id)))?;
        Self::parse_id(&reactor.id)
    }

    async fn validate_character(
        &self,
        tenant: &Tenant,
        character_id: u32,
        conditions: &[Value],
    ) -> Result<Validation, ResolveError> {
        let request = ValidationRequest {
            character_id,
            conditions,
        };
        let encoded = serde_json::to_string(&request).map_err(|e| ResolveError::Decode(e.to_string()))?;
        let path = format!("validations?characterId={}&conditions={}", character_id, encoded);
        let result = self.client.fetch_one::<Validation>(tenant, "query-aggregator", &path).await;
        match result {
            Ok(resource) => Ok(resource.attributes),
            Err(ResolveError::NotFound(_)) => Err(ResolveError::NotFound(format!("character {}", character_id))),
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// Static
// ============================================================================

/// In-memory resolver with fixed answers.
///
/// Unknown names resolve to `NotFound`; characters validate as passed unless
/// a result was registered.
#[derive(Default)]
pub struct StaticResolver {
    guilds: RwLock<HashMap<String, u32>>,
    routes: RwLock<HashMap<String, Uuid>>,
    reactors: RwLock<HashMap<(u32, String), u32>>,
    validations: RwLock<HashMap<u32, Validation>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_guild(&self, name: &str, id: u32) {
        self.guilds.write().await.insert(name.to_ascii_lowercase(), id);
    }

    pub async fn add_route(&self, name: &str, id: Uuid) {
        self.routes.write().await.insert(name.to_string(), id);
    }

    pub async fn add_reactor(&self, map_id: u32, name: &str, id: u32) {
        self.reactors.write().await.insert((map_id, name.to_string()), id);
    }

    pub async fn set_validation(&self, character_id: u32, validation: Validation) {
        self.validations.write().await.insert(character_id, validation);
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn guild_id_by_name(&self, _tenant: &Tenant, _world_id: u8, name: &str) -> Result<u32, ResolveError> {
        self.guilds
            .read()
            .await
            .get(&name.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| ResolveError::NotFound(format!("guild '{}'", name)))
    }

    async fn route_id_by_name(&self, _tenant: &Tenant, name: &str) -> Result<Uuid, ResolveError> {
        self.routes
            .read()
            .await
            .get(name)
            .copied()
            .ok_or_else(|| ResolveError::NotFound(format!("route '{}'", name)))
    }

    async fn reactor_id_by_name(
        &self,
        _tenant: &Tenant,
        _world_id: u8,
        _channel_id: u8,
        map_id: u32,
        name: &str,
    ) -> Result<u32, ResolveError> {
        self.reactors
            .read()
            .await
            .get(&(map_id, name.to_string()))
            .copied()
            .ok_or_else(|| ResolveError::NotFound(format!("reactor '{}' in map {}", name, map_id)))
    }

    async fn validate_character(
        &self,
        _tenant: &Tenant,
        character_id: u32,
        _conditions: &[Value],
    ) -> Result<Validation, ResolveError> {
        Ok(self
            .validations
            .read()
            .await
            .get(&character_id)
            .cloned()
            .unwrap_or_else(Validation::passed))
    }
}
