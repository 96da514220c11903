use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::settings::{ClassRule, Settings};
use crate::types::{Command, CommandClass};

/// Marker of an upstream error page that sometimes lands in the command feed.
const ERROR_PAGE_MARKER: &str = "502 Bad Gateway";

fn location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^(.*?)\s+Location\s+"?\{X=(-?\d+(?:\.\d+)?)\s+Y=(-?\d+(?:\.\d+)?)\s+Z=(-?\d+(?:\.\d+)?)\}"?-(\d{1,10})$"#)
            .unwrap()
    })
}

/// Collapse an embedded `Location "{X=.. Y=.. Z=..}"-<id>` payload to
/// `<head> <x> <y> <z>`. The trailing `-<id>` is always discarded; text that
/// does not match exactly (an id over ten digits, extra trailing text) is
/// only trimmed.
pub fn normalize(text: &str) -> String {
    let text = text.trim();
    match location_re().captures(text) {
        Some(c) => format!("{} {} {} {}", &c[1], &c[2], &c[3], &c[4]),
        None => text.to_string(),
    }
}

/// Prefix table, aliases and sequences used to turn operator input into
/// classified commands.
pub struct CommandTable {
    rules: Vec<ClassRule>,
    fallback: ClassRule,
    aliases: BTreeMap<String, String>,
    sequences: BTreeMap<String, Vec<String>>,
    max_len: usize,
}

impl CommandTable {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut rules = settings.classes.clone();
        // longest prefix first so "#ListSpawnedVehicles" beats a shorter "#List"
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self {
            rules,
            fallback: ClassRule::fallback(),
            aliases: settings.aliases.iter().map(|(k, v)| (k.to_lowercase(), v.clone())).collect(),
            sequences: settings.sequences.iter().map(|(k, v)| (k.to_lowercase(), v.clone())).collect(),
            max_len: settings.channel.max_command_len,
        }
    }

    /// Rule for `text`, falling back to the default action class.
    pub fn rule_for(&self, text: &str) -> &ClassRule {
        let lower = text.trim().to_ascii_lowercase();
        self.rules
            .iter()
            .find(|r| !r.prefix.is_empty() && lower.starts_with(&r.prefix.to_ascii_lowercase()))
            .unwrap_or(&self.fallback)
    }

    /// Rule by class name, used by the timing model.
    pub fn rule_named(&self, name: &str) -> &ClassRule {
        self.rules.iter().find(|r| r.name == name).unwrap_or(&self.fallback)
    }

    pub fn classify(&self, text: &str) -> CommandClass {
        let rule = self.rule_for(text);
        CommandClass {
            name: rule.name.clone(),
            kind: rule.kind,
            category: rule.category.clone(),
        }
    }

    /// Expand operator input: a sequence name yields its commands, an alias
    /// its full command, anything else itself. Names match case-insensitively.
    pub fn expand(&self, input: &str) -> Vec<String> {
        let key = input.trim();
        let name = key.to_lowercase();
        if let Some(seq) = self.sequences.get(&name) {
            return seq.clone();
        }
        if let Some(full) = self.aliases.get(&name) {
            return vec![full.clone()];
        }
        if key.is_empty() {
            return Vec::new();
        }
        vec![key.to_string()]
    }

    /// Validate, normalize and classify one command.
    pub fn prepare(&self, text: &str) -> Result<Command> {
        if text.contains(ERROR_PAGE_MARKER) {
            return Err(Error::InvalidCommand("backend error page".into()));
        }
        let text = normalize(text);
        if text.is_empty() {
            return Err(Error::InvalidCommand("empty command".into()));
        }
        let len = text.chars().count();
        if len > self.max_len {
            return Err(Error::InvalidCommand(format!("{} chars exceeds limit of {}", len, self.max_len)));
        }
        let class = self.classify(&text);
        Ok(Command { text, class })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CommandKind;

    fn table() -> CommandTable {
        CommandTable::from_settings(&Settings::default())
    }

    #[test]
    fn test_classify_by_prefix() {
        let t = table();
        let c = t.classify("#ListSpawnedVehicles true");
        assert_eq!(c.kind, CommandKind::Query);
        assert_eq!(c.category, "spawned");
        assert_eq!(t.classify("#listplayers true").name, "listplayers");
        let action = t.classify("#SetTime 12");
        assert_eq!(action.kind, CommandKind::Action);
        assert_eq!(action.name, "action");
    }

    #[test]
    fn test_normalize_collapses_location() {
        let raw = r#"#Teleport 76561198000000000 Location "{X=-123.5 Y=456 Z=7.25}"-42"#;
        assert_eq!(normalize(raw), "#Teleport 76561198000000000 -123.5 456 7.25");
        assert_eq!(normalize("  #SetTime 08 00 "), "#SetTime 08 00");
    }

    #[test]
    fn test_normalize_leaves_near_misses_alone() {
        let long_id = r#"#Teleport 1 Location "{X=1 Y=2 Z=3}"-12345678901"#;
        assert_eq!(normalize(long_id), long_id);
        let trailing = r#"#Teleport 1 Location "{X=1 Y=2 Z=3}"-5 now"#;
        assert_eq!(normalize(trailing), trailing);
    }

    #[test]
    fn test_prepare_rejects() {
        let t = table();
        assert!(matches!(t.prepare("   "), Err(Error::InvalidCommand(_))));
        assert!(matches!(t.prepare("<h1>502 Bad Gateway</h1>"), Err(Error::InvalidCommand(_))));
        let long = format!("#Announce {}", "x".repeat(200));
        assert!(matches!(t.prepare(&long), Err(Error::InvalidCommand(_))));
        assert_eq!(t.prepare("#Save").unwrap().text, "#Save");
    }

    #[test]
    fn test_expand_alias_and_sequence() {
        let t = table();
        assert_eq!(t.expand("players"), vec!["#ListPlayers true".to_string()]);
        assert_eq!(t.expand("server_reset").len(), 3);
        assert_eq!(t.expand("#SetTime 3"), vec!["#SetTime 3".to_string()]);
        assert!(t.expand("  ").is_empty());
    }

    #[test]
    fn test_expand_ignores_case_of_names() {
        let t = table();
        assert_eq!(t.expand("Players"), vec!["#ListPlayers true".to_string()]);
        assert_eq!(t.expand(" MORNING "), vec!["#SetTime 08 00".to_string()]);
        assert_eq!(t.expand("Admin_Check").len(), 4);
        assert_eq!(t.expand("save"), vec!["#Save".to_string()]);
        // commands themselves keep their case
        assert_eq!(t.expand("#ListPlayers True"), vec!["#ListPlayers True".to_string()]);
    }
}
