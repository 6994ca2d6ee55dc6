//! Topic names.
//!
//! Each topic is identified by the environment variable that names it
//! (`COMMAND_TOPIC_SAGA`, `EVENT_TOPIC_SAGA_STATUS`, ...). Resolution order:
//! process environment, then configuration, then the built-in default
//! (`COMMAND_TOPIC_SAGA` → `command.saga`).

use std::collections::HashMap;

use serde::Deserialize;

macro_rules! topics {
    ($($variant:ident => $env:literal,)+) => {
        /// Every topic this fabric produces to or consumes from.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Topic {
            $($variant,)+
        }

        impl Topic {
            pub const ALL: &'static [Topic] = &[$(Topic::$variant,)+];

            /// Environment variable carrying the topic name.
            pub fn env_var(self) -> &'static str {
                match self {
                    $(Topic::$variant => $env,)+
                }
            }
        }
    };
}

topics! {
    CommandSaga => "COMMAND_TOPIC_SAGA",
    EventSagaStatus => "EVENT_TOPIC_SAGA_STATUS",
    CommandCompartment => "COMMAND_TOPIC_COMPARTMENT",
    EventCompartmentStatus => "EVENT_TOPIC_COMPARTMENT_STATUS",
    EventAssetStatus => "EVENT_TOPIC_ASSET_STATUS",
    CommandStorage => "COMMAND_TOPIC_STORAGE",
    EventStorageStatus => "EVENT_TOPIC_STORAGE_STATUS",
    CommandMonster => "COMMAND_TOPIC_MONSTER",
    EventMonsterStatus => "EVENT_TOPIC_MONSTER_STATUS",
    CommandDrop => "COMMAND_TOPIC_DROP",
    EventMapStatus => "EVENT_TOPIC_MAP_STATUS",
    CommandCharacter => "COMMAND_TOPIC_CHARACTER",
    CommandCharacterStat => "COMMAND_TOPIC_CHARACTER_STAT",
    EventCharacterStatus => "EVENT_TOPIC_CHARACTER_STATUS",
    CommandSkill => "COMMAND_TOPIC_SKILL",
    EventSkillStatus => "EVENT_TOPIC_SKILL_STATUS",
    CommandGuild => "COMMAND_TOPIC_GUILD",
    EventGuildStatus => "EVENT_TOPIC_GUILD_STATUS",
    CommandInvite => "COMMAND_TOPIC_INVITE",
    EventInviteStatus => "EVENT_TOPIC_INVITE_STATUS",
    CommandSystemMessage => "COMMAND_TOPIC_SYSTEM_MESSAGE",
    CommandReactor => "COMMAND_TOPIC_REACTOR",
    EventReactorStatus => "EVENT_TOPIC_REACTOR_STATUS",
    CommandInstanceTransport => "COMMAND_TOPIC_INSTANCE_TRANSPORT",
    EventInstanceTransport => "EVENT_TOPIC_INSTANCE_TRANSPORT",
    EventTransportStatus => "EVENT_TOPIC_TRANSPORT_STATUS",
    EventCharacterRates => "EVENT_TOPIC_CHARACTER_RATES",
}

impl Topic {
    /// Built-in name: `EVENT_TOPIC_SAGA_STATUS` → `event.saga.status`.
    pub fn default_name(self) -> String {
        self.env_var()
            .replacen("_TOPIC", "", 1)
            .to_ascii_lowercase()
            .replace('_', ".")
    }
}

/// Topic name overrides keyed by environment variable name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct TopicsConfig(pub HashMap<String, String>);

/// Resolved topic names.
#[derive(Debug, Clone)]
pub struct Topics {
    names: HashMap<Topic, String>,
}

impl Topics {
    /// Resolve names from configuration overlaid by the process environment.
    pub fn resolve(config: &TopicsConfig) -> Self {
        Self::resolve_with(config, |var| std::env::var(var).ok())
    }

    fn resolve_with(config: &TopicsConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let names = Topic::ALL
            .iter()
            .map(|&topic| {
                let name = env(topic.env_var())
                    .or_else(|| config.0.get(topic.env_var()).cloned())
                    .unwrap_or_else(|| topic.default_name());
                (topic, name)
            })
            .collect();
        Self { names }
    }

    pub fn name(&self, topic: Topic) -> &str {
        // Every variant is populated at construction.
        self.names.get(&topic).map(String::as_str).unwrap_or_default()
    }

    /// Reverse lookup from a resolved name.
    pub fn topic_of(&self, name: &str) -> Option<Topic> {
        self.names
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(t, _)| *t)
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::resolve_with(&TopicsConfig::default(), |_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        assert_eq!(Topic::CommandSaga.default_name(), "command.saga");
        assert_eq!(
            Topic::EventSagaStatus.default_name(),
            "event.saga.status"
        );
        assert_eq!(
            Topic::CommandCharacterStat.default_name(),
            "command.character.stat"
        );
    }

    #[test]
    fn test_resolution_order() {
        let mut overrides = HashMap::new();
        overrides.insert("COMMAND_TOPIC_SAGA".to_string(), "cfg.saga".to_string());
        overrides.insert("COMMAND_TOPIC_DROP".to_string(), "cfg.drop".to_string());
        let config = TopicsConfig(overrides);

        let topics = Topics::resolve_with(&config, |var| {
            (var == "COMMAND_TOPIC_SAGA").then(|| "env.saga".to_string())
        });

        assert_eq!(topics.name(Topic::CommandSaga), "env.saga");
        assert_eq!(topics.name(Topic::CommandDrop), "cfg.drop");
        assert_eq!(topics.name(Topic::EventMapStatus), "event.map.status");
    }

    #[test]
    fn test_reverse_lookup() {
        let topics = Topics::default();
        assert_eq!(
            topics.topic_of("event.character.status"),
            Some(Topic::EventCharacterStatus)
        );
        assert_eq!(topics.topic_of("nope"), None);
    }

    #[test]
    fn test_all_topics_resolved() {
        let topics = Topics::default();
        for topic in Topic::ALL {
            assert!(!topics.name(*topic).is_empty());
        }
    }
}
