use serde::{Deserialize, Serialize};

use super::config::SettingsStore;
use super::events::{AvatarChangeEvent, NotificationEvent, Source, TriggerEvent};

/// Reward key that also changes the redeemer's avatar
pub const CHOOSE_AVATAR_KEY: &str = "chooseavatar";

/// Channel-point reward rule: fires when `match` is found in the reward title
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardTrigger {
    #[serde(rename = "match")]
    pub pattern: String,
    pub key: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Bits rule: fires when a cheer reaches `min_bits`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitsThreshold {
    pub min_bits: u64,
    pub key: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Snapshot of the rule configuration at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    pub rewards: Vec<RewardTrigger>,
    pub bits: Vec<BitsThreshold>,
}

/// Source of trigger rules, consulted on every notification
pub trait RuleProvider: Send + Sync {
    fn current_rules(&self) -> RuleSet;
}

impl<S: SettingsStore + ?Sized> RuleProvider for S {
    fn current_rules(&self) -> RuleSet {
        match self.read() {
            Ok(settings) => RuleSet {
                rewards: settings.channel_point_triggers,
                bits: sorted_thresholds(settings.bits_thresholds),
            },
            Err(e) => {
                log::error!("Failed to read trigger rules: {}", e);
                RuleSet::default()
            }
        }
    }
}

/// Sort thresholds ascending by `min_bits`, keeping the order of equal entries
pub fn sorted_thresholds(mut thresholds: Vec<BitsThreshold>) -> Vec<BitsThreshold> {
    thresholds.sort_by_key(|t| t.min_bits);
    thresholds
}

/// Keys of every enabled reward rule whose fragment appears in the title
pub fn match_rewards<'a>(rules: &'a [RewardTrigger], reward_title: &str) -> Vec<&'a RewardTrigger> {
    let title = reward_title.to_lowercase();
    rules
        .iter()
        .filter(|rule| rule.enabled && !rule.pattern.is_empty())
        .filter(|rule| title.contains(&rule.pattern.to_lowercase()))
        .collect()
}

/// Every enabled threshold reached by `bits`, ascending by `min_bits`
pub fn match_bits(rules: &[BitsThreshold], bits: u64) -> Vec<&BitsThreshold> {
    let mut matched: Vec<&BitsThreshold> = rules
        .iter()
        .filter(|rule| rule.enabled && rule.min_bits <= bits)
        .collect();
    matched.sort_by_key(|rule| rule.min_bits);
    matched
}

/// Outcome of evaluating one notification
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub triggers: Vec<TriggerEvent>,
    pub avatar_changes: Vec<AvatarChangeEvent>,
}

/// Evaluate a notification against the provider's current rules
pub fn evaluate(provider: &dyn RuleProvider, notification: &NotificationEvent) -> Evaluation {
    let rules = provider.current_rules();
    let mut evaluation = Evaluation::default();

    match notification {
        NotificationEvent::Reward {
            reward_title,
            user_name,
            user_input,
        } => {
            for rule in match_rewards(&rules.rewards, reward_title) {
                log::info!("Reward '{}' matched rule '{}'", reward_title, rule.key);
                evaluation.triggers.push(TriggerEvent {
                    key: rule.key.clone(),
                    notification: notification.clone(),
                });
                if rule.key == CHOOSE_AVATAR_KEY {
                    evaluation.avatar_changes.push(AvatarChangeEvent {
                        username: user_name.clone(),
                        requested_name: user_input.trim().to_string(),
                        source: Source::Twitch,
                    });
                }
            }
        }
        NotificationEvent::Cheer { bits, .. } => {
            for rule in match_bits(&rules.bits, *bits) {
                log::info!("{} bits reached threshold '{}' ({})", bits, rule.key, rule.min_bits);
                evaluation.triggers.push(TriggerEvent {
                    key: rule.key.clone(),
                    notification: notification.clone(),
                });
            }
        }
    }

    evaluation
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticRules(RuleSet);

    impl RuleProvider for StaticRules {
        fn current_rules(&self) -> RuleSet {
            self.0.clone()
        }
    }

    fn reward(pattern: &str, key: &str, enabled: bool) -> RewardTrigger {
        RewardTrigger {
            pattern: pattern.to_string(),
            key: key.to_string(),
            enabled,
        }
    }

    fn threshold(min_bits: u64, key: &str, enabled: bool) -> BitsThreshold {
        BitsThreshold {
            min_bits,
            key: key.to_string(),
            enabled,
        }
    }

    #[test]
    fn test_choose_avatar_reward() {
        let provider = StaticRules(RuleSet {
            rewards: vec![reward("avatar", CHOOSE_AVATAR_KEY, true)],
            bits: vec![],
        });
        let notification = NotificationEvent::Reward {
            reward_title: "Choose Avatar".to_string(),
            user_name: "viewer".to_string(),
            user_input: " Knight ".to_string(),
        };

        let evaluation = evaluate(&provider, &notification);
        assert_eq!(evaluation.triggers.len(), 1);
        assert_eq!(evaluation.triggers[0].key, CHOOSE_AVATAR_KEY);
        assert_eq!(
            evaluation.avatar_changes,
            vec![AvatarChangeEvent {
                username: "viewer".to_string(),
                requested_name: "Knight".to_string(),
                source: Source::Twitch,
            }]
        );
    }

    #[test]
    fn test_every_matching_reward_fires() {
        let rules = vec![
            reward("heal", "heal", true),
            reward("HEAL", "bigheal", true),
            reward("heal", "disabled", false),
            reward("attack", "attack", true),
        ];
        let keys: Vec<&str> = match_rewards(&rules, "Big Heal for the party")
            .iter()
            .map(|r| r.key.as_str())
            .collect();
        assert_eq!(keys, vec!["heal", "bigheal"]);
    }

    #[test]
    fn test_empty_fragment_never_matches() {
        let rules = vec![reward("", "anything", true)];
        assert!(match_rewards(&rules, "Choose Avatar").is_empty());
    }

    #[test]
    fn test_bits_all_thresholds_in_order() {
        let provider = StaticRules(RuleSet {
            rewards: vec![],
            bits: vec![threshold(100, "b", true), threshold(50, "a", true)],
        });
        let notification = NotificationEvent::Cheer {
            bits: 120,
            user_name: "cheerer".to_string(),
        };

        let keys: Vec<String> = evaluate(&provider, &notification)
            .triggers
            .into_iter()
            .map(|t| t.key)
            .collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_bits_below_and_disabled() {
        let rules = vec![
            threshold(50, "a", false),
            threshold(100, "b", true),
            threshold(500, "c", true),
        ];
        let keys: Vec<&str> = match_bits(&rules, 100).iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["b"]);
        assert!(match_bits(&rules, 10).is_empty());
    }

    #[test]
    fn test_sorted_thresholds_is_stable() {
        let sorted = sorted_thresholds(vec![
            threshold(100, "x", true),
            threshold(10, "y", true),
            threshold(100, "z", true),
        ]);
        let keys: Vec<&str> = sorted.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["y", "x", "z"]);
    }
}
