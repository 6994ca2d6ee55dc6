//! The action table.
//!
//! Every action names exactly one command (topic, type, subject key) and
//! how its outcome is observed: a status event with success and failure
//! types, completion on emit, or a synchronous validation. Actions with a
//! defined inverse are compensated in reverse order when a later step fails.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::envelope::{ErrorCode, Topic};

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardItem {
    pub character_id: u32,
    pub template_id: u32,
    pub quantity: u32,
}

impl AwardItem {
    pub fn new(character_id: u32, template_id: u32, quantity: u32) -> Self {
        Self {
            character_id,
            template_id,
            quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestroyAsset {
    pub character_id: u32,
    pub template_id: u32,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardMesos {
    pub character_id: u32,
    pub amount: i32,
    #[serde(default)]
    pub actor_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_type: Option<String>,
}

impl AwardMesos {
    pub fn new(character_id: u32, amount: i32) -> Self {
        Self {
            character_id,
            amount,
            actor_id: 0,
            actor_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardExperience {
    pub character_id: u32,
    pub amount: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience_type: Option<String>,
}

/// Equip (positive to negative slot) or unequip (the reverse).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotMove {
    pub character_id: u32,
    pub source: i16,
    pub destination: i16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeJob {
    pub character_id: u32,
    pub job_id: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_job_id: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillLevel {
    pub character_id: u32,
    pub skill_id: u32,
    pub level: u8,
    pub master_level: u8,
    /// Level before this change; `None` when the skill is new.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_level: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSkill {
    pub character_id: u32,
    pub skill_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warp {
    pub character_id: u32,
    pub world_id: u8,
    pub channel_id: u8,
    pub map_id: u32,
    /// Random spawn portal when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateState {
    pub character_id: u32,
    #[serde(default)]
    pub conditions: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestGuildName {
    pub character_id: u32,
    pub world_id: u8,
    pub channel_id: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub invite_type: String,
    pub originator_id: u32,
    pub target_id: u32,
    pub world_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<u32>,
    /// Guild invites may name the guild instead of carrying its id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCharacter {
    pub account_id: u32,
    pub world_id: u8,
    pub name: String,
    pub job_id: u16,
    #[serde(default)]
    pub gender: u8,
    /// Face, hair, skin and starter equipment, forwarded as-is.
    #[serde(default, flatten)]
    pub appearance: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub character_id: u32,
    #[serde(default = "SendMessage::pink_text")]
    pub message_type: String,
    pub message: String,
}

impl SendMessage {
    pub const PINK_TEXT: &'static str = "PINK_TEXT";

    fn pink_text() -> String {
        Self::PINK_TEXT.to_string()
    }

    pub fn pink(character_id: u32, message: impl Into<String>) -> Self {
        Self {
            character_id,
            message_type: Self::pink_text(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitReactor {
    pub character_id: u32,
    pub world_id: u8,
    pub channel_id: u8,
    pub map_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactor_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactor_name: Option<String>,
    #[serde(default)]
    pub stance: u16,
    #[serde(default)]
    pub skill_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransport {
    pub character_id: u32,
    pub world_id: u8,
    pub channel_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageItem {
    pub account_id: u32,
    pub world_id: u8,
    pub character_id: u32,
    pub template_id: u32,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageMesos {
    pub account_id: u32,
    pub world_id: u8,
    pub amount: i32,
}

/// Asset leaving or entering a character compartment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompartmentTransfer {
    pub character_id: u32,
    pub inventory_type: u8,
    pub asset_id: u32,
    pub template_id: u32,
    pub quantity: u32,
}

/// Composite: deposit into account storage, then release from the character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferToStorage {
    pub account_id: u32,
    pub world_id: u8,
    pub character_id: u32,
    pub inventory_type: u8,
    pub asset_id: u32,
    pub template_id: u32,
    pub quantity: u32,
}

// ============================================================================
// Action kinds and typed actions
// ============================================================================

macro_rules! actions {
    ($($variant:ident($payload:ty) => $wire:literal $(| $alias:literal)*,)+) => {
        /// Wire discriminator of a step action.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum ActionKind {
            $(
                #[serde(rename = $wire $(, alias = $alias)*)]
                $variant,
            )+
        }

        impl ActionKind {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(ActionKind::$variant => $wire,)+
                }
            }
        }

        /// A step action with its typed payload.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Action {
            $($variant($payload),)+
        }

        impl Action {
            /// Decode the payload of `kind`.
            pub fn parse(kind: ActionKind, payload: &Value) -> Result<Self, serde_json::Error> {
                Ok(match kind {
                    $(ActionKind::$variant => Action::$variant(<$payload>::deserialize(payload)?),)+
                })
            }

            pub fn kind(&self) -> ActionKind {
                match self {
                    $(Action::$variant(_) => ActionKind::$variant,)+
                }
            }

            pub fn payload(&self) -> Value {
                let encoded = match self {
                    $(Action::$variant(p) => serde_json::to_value(p),)+
                };
                // Payload types are plain structs of scalars and maps.
                encoded.unwrap_or(Value::Null)
            }
        }
    };
}

actions! {
    AwardItem(AwardItem) => "award_item" | "award_asset",
    DestroyAsset(DestroyAsset) => "destroy_asset",
    AwardMesos(AwardMesos) => "award_mesos",
    AwardExperience(AwardExperience) => "award_experience",
    EquipAsset(SlotMove) => "equip_asset",
    UnequipAsset(SlotMove) => "unequip_asset",
    ChangeJob(ChangeJob) => "change_job",
    CreateSkill(SkillLevel) => "create_skill",
    UpdateSkill(SkillLevel) => "update_skill",
    DeleteSkill(DeleteSkill) => "delete_skill",
    Warp(Warp) => "warp" | "warp_to_portal" | "warp_to_random_portal",
    ValidateState(ValidateState) => "validate_state" | "validate_character_state",
    RequestGuildName(RequestGuildName) => "request_guild_name",
    CreateInvite(Invite) => "create_invite",
    CancelInvite(Invite) => "cancel_invite",
    CreateCharacter(CreateCharacter) => "create_character",
    SendMessage(SendMessage) => "send_message",
    HitReactor(HitReactor) => "hit_reactor",
    StartTransport(StartTransport) => "start_transport" | "start_instance_transport",
    DepositToStorage(StorageItem) => "deposit_to_storage" | "accept_to_storage",
    WithdrawFromStorage(StorageItem) => "withdraw_from_storage",
    UpdateStorageMesos(StorageMesos) => "update_storage_mesos",
    ReleaseFromCharacter(CompartmentTransfer) => "release_from_character",
    AcceptToCharacter(CompartmentTransfer) => "accept_to_character",
    TransferToStorage(TransferToStorage) => "transfer_to_storage",
}

impl From<AwardItem> for Action {
    fn from(p: AwardItem) -> Self {
        Action::AwardItem(p)
    }
}

impl From<AwardMesos> for Action {
    fn from(p: AwardMesos) -> Self {
        Action::AwardMesos(p)
    }
}

impl From<Warp> for Action {
    fn from(p: Warp) -> Self {
        Action::Warp(p)
    }
}

impl From<SendMessage> for Action {
    fn from(p: SendMessage) -> Self {
        Action::SendMessage(p)
    }
}

impl From<StartTransport> for Action {
    fn from(p: StartTransport) -> Self {
        Action::StartTransport(p)
    }
}

impl From<ValidateState> for Action {
    fn from(p: ValidateState) -> Self {
        Action::ValidateState(p)
    }
}

// ============================================================================
// Dispatch description
// ============================================================================

/// A domain command ready to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub topic: Topic,
    pub key: u32,
    pub message_type: &'static str,
    pub body: Value,
}

/// The status event that settles an awaited step.
#[derive(Debug, Clone, PartialEq)]
pub struct Expectation {
    pub topic: Topic,
    /// Partition key the status must carry; `None` accepts any subject.
    pub subject: Option<u32>,
    pub success: &'static [&'static str],
    pub failure: &'static [&'static str],
}

/// How a step is carried out.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Publish, then wait for a matching status event.
    Await { command: Command, expect: Expectation },
    /// Publish; the step completes once the command is accepted by the bus.
    Emit(Command),
    /// Ask the validation service synchronously.
    Validate(ValidateState),
    /// Must be expanded at submit; never dispatched.
    Composite,
}

/// A read-time lookup an action needs before its command can be built.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    GuildByName { world_id: u8, name: String },
    RouteByName { name: String },
    ReactorByName { world_id: u8, channel_id: u8, map_id: u32, name: String },
}

impl Lookup {
    /// Error code when the lookup target does not exist.
    pub fn not_found_code(&self) -> ErrorCode {
        match self {
            Lookup::RouteByName { .. } => ErrorCode::RouteNotFound,
            Lookup::GuildByName { .. } | Lookup::ReactorByName { .. } => ErrorCode::Generic,
        }
    }
}

/// Result of a [`Lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    Guild(u32),
    Route(Uuid),
    Reactor(u32),
}

const ERROR: &[&str] = &["ERROR"];

fn command<B: Serialize>(topic: Topic, key: u32, message_type: &'static str, body: &B) -> Command {
    Command {
        topic,
        key,
        message_type,
        body: serde_json::to_value(body).unwrap_or(Value::Null),
    }
}

fn awaited(command: Command, topic: Topic, success: &'static [&'static str]) -> Dispatch {
    let subject = Some(command.key);
    Dispatch::Await {
        command,
        expect: Expectation {
            topic,
            subject,
            success,
            failure: ERROR,
        },
    }
}

impl Action {
    /// Payload checks beyond decoding.
    pub fn check(&self) -> Result<(), String> {
        match self {
            Action::AwardItem(p) if p.quantity == 0 => Err("award_item quantity must be positive".into()),
            Action::DestroyAsset(p) if p.quantity == 0 => Err("destroy_asset quantity must be positive".into()),
            Action::AwardMesos(p) if p.amount == 0 => Err("award_mesos amount must be non-zero".into()),
            Action::AwardMesos(p) if p.amount == i32::MIN => Err("award_mesos amount has no inverse".into()),
            Action::EquipAsset(p) if !(p.source > 0 && p.destination < 0) => {
                Err("equip_asset moves from an inventory slot to an equipment slot".into())
            }
            Action::UnequipAsset(p) if !(p.source < 0 && p.destination > 0) => {
                Err("unequip_asset moves from an equipment slot to an inventory slot".into())
            }
            Action::CreateSkill(p) | Action::UpdateSkill(p) if p.level > p.master_level && p.master_level > 0 => {
                Err("skill level exceeds master level".into())
            }
            Action::CreateInvite(p) if p.reference_id.is_none() && p.guild_name.is_none() => {
                Err("create_invite needs referenceId or guildName".into())
            }
            Action::CreateCharacter(p) if p.name.trim().is_empty() => Err("create_character name is empty".into()),
            Action::SendMessage(p) if p.message.is_empty() => Err("send_message message is empty".into()),
            Action::HitReactor(p) if p.reactor_id.is_none() && p.reactor_name.is_none() => {
                Err("hit_reactor needs reactorId or reactorName".into())
            }
            Action::StartTransport(p) if p.route_id.is_none() && p.route_name.is_none() => {
                Err("start_transport needs routeId or routeName".into())
            }
            Action::DepositToStorage(p) | Action::WithdrawFromStorage(p) if p.quantity == 0 => {
                Err("storage quantity must be positive".into())
            }
            Action::UpdateStorageMesos(p) if p.amount == 0 => Err("update_storage_mesos amount must be non-zero".into()),
            Action::UpdateStorageMesos(p) if p.amount == i32::MIN => {
                Err("update_storage_mesos amount has no inverse".into())
            }
            Action::ReleaseFromCharacter(p) | Action::AcceptToCharacter(p) if p.quantity == 0 => {
                Err("compartment transfer quantity must be positive".into())
            }
            Action::TransferToStorage(p) if p.quantity == 0 => Err("transfer_to_storage quantity must be positive".into()),
            _ => Ok(()),
        }
    }

    /// Steps a composite action expands into; `None` for plain actions.
    pub fn expand(&self) -> Option<Vec<(&'static str, Action)>> {
        match self {
            Action::TransferToStorage(p) => Some(vec![
                (
                    "accept",
                    Action::DepositToStorage(StorageItem {
                        account_id: p.account_id,
                        world_id: p.world_id,
                        character_id: p.character_id,
                        template_id: p.template_id,
                        quantity: p.quantity,
                        asset_id: Some(p.asset_id),
                    }),
                ),
                (
                    "release",
                    Action::ReleaseFromCharacter(CompartmentTransfer {
                        character_id: p.character_id,
                        inventory_type: p.inventory_type,
                        asset_id: p.asset_id,
                        template_id: p.template_id,
                        quantity: p.quantity,
                    }),
                ),
            ]),
            _ => None,
        }
    }

    /// Read-time lookup still required before dispatch.
    pub fn lookup(&self) -> Option<Lookup> {
        match self {
            Action::CreateInvite(p) if p.reference_id.is_none() => p.guild_name.as_ref().map(|name| Lookup::GuildByName {
                world_id: p.world_id,
                name: name.clone(),
            }),
            Action::StartTransport(p) if p.route_id.is_none() => {
                p.route_name.as_ref().map(|name| Lookup::RouteByName { name: name.clone() })
            }
            Action::HitReactor(p) if p.reactor_id.is_none() => p.reactor_name.as_ref().map(|name| Lookup::ReactorByName {
                world_id: p.world_id,
                channel_id: p.channel_id,
                map_id: p.map_id,
                name: name.clone(),
            }),
            _ => None,
        }
    }

    /// Fill in the id a [`Lookup`] produced.
    pub fn apply(&mut self, resolved: Resolved) {
        match (self, resolved) {
            (Action::CreateInvite(p), Resolved::Guild(id)) => p.reference_id = Some(id),
            (Action::StartTransport(p), Resolved::Route(id)) => p.route_id = Some(id),
            (Action::HitReactor(p), Resolved::Reactor(id)) => p.reactor_id = Some(id),
            _ => {}
        }
    }

    /// Command and outcome observation for this action.
    pub fn dispatch(&self) -> Dispatch {
        use Topic::*;
        match self {
            Action::AwardItem(p) => awaited(
                command(CommandCompartment, p.character_id, "CREATE_ASSET", p),
                EventCompartmentStatus,
                &["CREATED"],
            ),
            Action::DestroyAsset(p) => awaited(
                command(CommandCompartment, p.character_id, "DESTROY", p),
                EventCompartmentStatus,
                &["DESTROYED"],
            ),
            Action::AwardMesos(p) => awaited(
                command(CommandCharacterStat, p.character_id, "AWARD_MESOS", p),
                EventCharacterStatus,
                &["MESOS_UPDATED"],
            ),
            Action::AwardExperience(p) => awaited(
                command(CommandCharacterStat, p.character_id, "AWARD_EXPERIENCE", p),
                EventCharacterStatus,
                &["EXPERIENCE_CHANGED"],
            ),
            Action::EquipAsset(p) => awaited(
                command(CommandCompartment, p.character_id, "EQUIP", p),
                EventCompartmentStatus,
                &["EQUIPPED"],
            ),
            Action::UnequipAsset(p) => awaited(
                command(CommandCompartment, p.character_id, "UNEQUIP", p),
                EventCompartmentStatus,
                &["UNEQUIPPED"],
            ),
            Action::ChangeJob(p) => awaited(
                command(CommandCharacter, p.character_id, "CHANGE_JOB", p),
                EventCharacterStatus,
                &["JOB_CHANGED"],
            ),
            Action::CreateSkill(p) => awaited(
                command(CommandSkill, p.character_id, "REQUEST_CREATE", p),
                EventSkillStatus,
                &["CREATED"],
            ),
            Action::UpdateSkill(p) => awaited(
                command(CommandSkill, p.character_id, "REQUEST_UPDATE", p),
                EventSkillStatus,
                &["UPDATED"],
            ),
            Action::DeleteSkill(p) => awaited(
                command(CommandSkill, p.character_id, "REQUEST_DELETE", p),
                EventSkillStatus,
                &["DELETED"],
            ),
            Action::Warp(p) => awaited(
                command(CommandCharacter, p.character_id, "CHANGE_MAP", p),
                EventCharacterStatus,
                &["MAP_CHANGED"],
            ),
            Action::ValidateState(p) => Dispatch::Validate(p.clone()),
            Action::RequestGuildName(p) => {
                Dispatch::Emit(command(CommandGuild, p.character_id, "REQUEST_NAME", p))
            }
            Action::CreateInvite(p) => awaited(
                command(CommandInvite, p.target_id, "CREATE", p),
                EventInviteStatus,
                &["CREATED"],
            ),
            Action::CancelInvite(p) => Dispatch::Emit(command(CommandInvite, p.target_id, "CANCEL", p)),
            Action::CreateCharacter(p) => Dispatch::Await {
                command: command(CommandCharacter, p.account_id, "CREATE_CHARACTER", p),
                // The created character's id is not known up front.
                expect: Expectation {
                    topic: EventCharacterStatus,
                    subject: None,
                    success: &["CREATED"],
                    failure: &["CREATION_FAILED", "ERROR"],
                },
            },
            Action::SendMessage(p) => {
                Dispatch::Emit(command(CommandSystemMessage, p.character_id, "SEND_MESSAGE", p))
            }
            Action::HitReactor(p) => {
                Dispatch::Emit(command(CommandReactor, p.reactor_id.unwrap_or_default(), "HIT", p))
            }
            Action::StartTransport(p) => awaited(
                command(CommandInstanceTransport, p.character_id, "START", p),
                EventInstanceTransport,
                &["ACCEPTED"],
            ),
            Action::DepositToStorage(p) => awaited(
                command(CommandStorage, p.account_id, "DEPOSIT", p),
                EventStorageStatus,
                &["DEPOSITED"],
            ),
            Action::WithdrawFromStorage(p) => awaited(
                command(CommandStorage, p.account_id, "WITHDRAW", p),
                EventStorageStatus,
                &["WITHDRAWN"],
            ),
            Action::UpdateStorageMesos(p) => awaited(
                command(CommandStorage, p.account_id, "UPDATE_MESOS", p),
                EventStorageStatus,
                &["MESOS_UPDATED"],
            ),
            Action::ReleaseFromCharacter(p) => awaited(
                command(CommandCompartment, p.character_id, "RELEASE", p),
                EventCompartmentStatus,
                &["RELEASED"],
            ),
            Action::AcceptToCharacter(p) => awaited(
                command(CommandCompartment, p.character_id, "ACCEPT", p),
                EventCompartmentStatus,
                &["ACCEPTED"],
            ),
            Action::TransferToStorage(_) => Dispatch::Composite,
        }
    }

    /// The compensating action, if any.
    pub fn inverse(&self) -> Option<Action> {
        match self {
            Action::AwardItem(p) => Some(Action::DestroyAsset(DestroyAsset {
                character_id: p.character_id,
                template_id: p.template_id,
                quantity: p.quantity,
            })),
            Action::AwardMesos(p) => p.amount.checked_neg().map(|amount| {
                Action::AwardMesos(AwardMesos {
                    amount,
                    ..p.clone()
                })
            }),
            Action::EquipAsset(p) => Some(Action::UnequipAsset(SlotMove {
                character_id: p.character_id,
                source: p.destination,
                destination: p.source,
            })),
            Action::UnequipAsset(p) => Some(Action::EquipAsset(SlotMove {
                character_id: p.character_id,
                source: p.destination,
                destination: p.source,
            })),
            Action::ChangeJob(p) => p.previous_job_id.map(|previous| {
                Action::ChangeJob(ChangeJob {
                    character_id: p.character_id,
                    job_id: previous,
                    previous_job_id: Some(p.job_id),
                })
            }),
            Action::CreateSkill(p) => Some(match p.previous_level {
                Some(level) if level > 0 => Action::UpdateSkill(SkillLevel {
                    level,
                    previous_level: Some(p.level),
                    ..p.clone()
                }),
                _ => Action::DeleteSkill(DeleteSkill {
                    character_id: p.character_id,
                    skill_id: p.skill_id,
                }),
            }),
            Action::CreateInvite(p) => Some(Action::CancelInvite(p.clone())),
            Action::DepositToStorage(p) => Some(Action::WithdrawFromStorage(p.clone())),
            Action::WithdrawFromStorage(p) => Some(Action::DepositToStorage(p.clone())),
            Action::UpdateStorageMesos(p) => p.amount.checked_neg().map(|amount| {
                Action::UpdateStorageMesos(StorageMesos {
                    amount,
                    ..p.clone()
                })
            }),
            Action::ReleaseFromCharacter(p) => Some(Action::AcceptToCharacter(p.clone())),
            Action::AcceptToCharacter(p) => Some(Action::ReleaseFromCharacter(p.clone())),
            _ => None,
        }
    }
}
