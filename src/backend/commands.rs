use regex::Regex;
use serde::{Deserialize, Serialize};

/// Chat command words, configurable per stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatCommands {
    pub avatar: String,
    pub attack: String,
    pub cover: String,
    pub heal: String,
    pub aggressive: String,
    pub burst: String,
}

impl Default for ChatCommands {
    fn default() -> Self {
        Self {
            avatar: "!avatar".to_string(),
            attack: "!attack".to_string(),
            cover: "!cover".to_string(),
            heal: "!heal".to_string(),
            aggressive: "!aggressive".to_string(),
            burst: "!burst".to_string(),
        }
    }
}

impl ChatCommands {
    /// (action, command text) pairs in a fixed order
    pub fn actions(&self) -> [(&'static str, &str); 5] {
        [
            ("attack", self.attack.as_str()),
            ("cover", self.cover.as_str()),
            ("heal", self.heal.as_str()),
            ("aggressive", self.aggressive.as_str()),
            ("burst", self.burst.as_str()),
        ]
    }
}

/// What a chat line asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    /// Avatar command with the requested name
    Avatar(String),
    /// Game action by name
    Action(String),
}

/// Parser for avatar and action commands in chat messages
#[derive(Debug)]
pub struct CommandParser {
    avatar: Option<Regex>,
    actions: Vec<(String, String)>,
}

impl CommandParser {
    /// Build a parser for the given command words
    pub fn new(commands: &ChatCommands) -> Self {
        let avatar_command = commands.avatar.trim();
        let avatar = if avatar_command.is_empty() {
            None
        } else {
            let pattern = format!(r"(?i)^{}\s+(.+)$", regex::escape(avatar_command));
            match Regex::new(&pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    log::error!("Invalid avatar command '{}': {}", avatar_command, e);
                    None
                }
            }
        };

        let actions = commands
            .actions()
            .iter()
            .filter(|(_, command)| !command.trim().is_empty())
            .map(|(action, command)| (action.to_string(), command.trim().to_lowercase()))
            .collect();

        Self { avatar, actions }
    }

    /// Avatar commands win over actions; at most one result per message
    pub fn parse(&self, message: &str) -> Option<ParsedCommand> {
        let text = message.trim();
        if text.is_empty() {
            return None;
        }

        if let Some(regex) = &self.avatar {
            if let Some(captures) = regex.captures(text) {
                let requested = captures.get(1)?.as_str().trim();
                if !requested.is_empty() {
                    return Some(ParsedCommand::Avatar(requested.to_string()));
                }
            }
        }

        let first_word = text.split_whitespace().next()?.to_lowercase();
        self.actions
            .iter()
            .find(|(_, command)| *command == first_word)
            .map(|(action, _)| ParsedCommand::Action(action.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avatar_command() {
        let parser = CommandParser::new(&ChatCommands::default());
        assert_eq!(
            parser.parse("!avatar Dark Knight"),
            Some(ParsedCommand::Avatar("Dark Knight".to_string()))
        );
        assert_eq!(
            parser.parse("  !AVATAR   wizard "),
            Some(ParsedCommand::Avatar("wizard".to_string()))
        );
        assert_eq!(parser.parse("!avatar"), None);
    }

    #[test]
    fn test_action_commands() {
        let parser = CommandParser::new(&ChatCommands::default());
        assert_eq!(parser.parse("!attack"), Some(ParsedCommand::Action("attack".to_string())));
        assert_eq!(
            parser.parse("!Heal me please"),
            Some(ParsedCommand::Action("heal".to_string()))
        );
        assert_eq!(parser.parse("!attacker"), None);
        assert_eq!(parser.parse("hello !attack"), None);
        assert_eq!(parser.parse(""), None);
    }

    #[test]
    fn test_custom_commands_are_escaped() {
        let commands = ChatCommands {
            avatar: "?skin".to_string(),
            burst: "".to_string(),
            ..ChatCommands::default()
        };
        let parser = CommandParser::new(&commands);
        assert_eq!(
            parser.parse("?skin robot"),
            Some(ParsedCommand::Avatar("robot".to_string()))
        );
        assert_eq!(parser.parse("xskin robot"), None);
        assert_eq!(parser.parse("!burst"), None);
    }
}
