//! Contact tags.
//!
//! Tags are the only persisted per-contact state. They behave as a set of
//! independent flags rather than a single state machine: a contact can be
//! `followup` and `hot` and assigned to an employee at the same time.
//!
//! Interactions between flags:
//! - `StopBot` dominates everything else. A stopped contact never reaches
//!   the assistant, whatever other tags it carries.
//! - `Snooze` suppresses one evaluation cycle and is stripped when read.
//! - `Followup` means a follow-up sequence is scheduled for the chat; it is
//!   cleared (and the sequence cancelled) as soon as the contact writes.
//! - At most one lead temperature is held at a time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LeadTemperature {
    Cold,
    Medium,
    Hot,
}

impl LeadTemperature {
    pub fn as_str(self) -> &'static str {
        match self {
            LeadTemperature::Cold => "cold",
            LeadTemperature::Medium => "medium",
            LeadTemperature::Hot => "hot",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "cold" => Some(LeadTemperature::Cold),
            "medium" => Some(LeadTemperature::Medium),
            "hot" => Some(LeadTemperature::Hot),
            _ => None,
        }
    }
}

/// A single contact tag. Unrecognised strings (employee assignments, CRM
/// labels) are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Tag {
    StopBot,
    Idle,
    Snooze,
    Followup,
    Replied,
    Lead(LeadTemperature),
    Other(String),
}

impl Tag {
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        match trimmed.to_lowercase().as_str() {
            "stop bot" | "stopbot" => Tag::StopBot,
            "idle" => Tag::Idle,
            "snooze" => Tag::Snooze,
            "followup" => Tag::Followup,
            "replied" => Tag::Replied,
            other => LeadTemperature::parse(other)
                .map_or_else(|| Tag::Other(trimmed.to_owned()), Tag::Lead),
        }
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Tag::parse(&value)
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.to_string()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::StopBot => f.write_str("stop bot"),
            Tag::Idle => f.write_str("idle"),
            Tag::Snooze => f.write_str("snooze"),
            Tag::Followup => f.write_str("followup"),
            Tag::Replied => f.write_str("replied"),
            Tag::Lead(temp) => f.write_str(temp.as_str()),
            Tag::Other(name) => f.write_str(name),
        }
    }
}

/// Deduplicated set of tags. Adding a present tag and removing an absent
/// one are both no-ops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeSet<Tag>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the tag was not already present.
    pub fn insert(&mut self, tag: Tag) -> bool {
        if let Tag::Lead(_) = tag {
            self.0.retain(|t| !matches!(t, Tag::Lead(_)));
        }
        self.0.insert(tag)
    }

    /// Returns `true` if the tag was present.
    pub fn remove(&mut self, tag: &Tag) -> bool {
        self.0.remove(tag)
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.0.contains(tag)
    }

    pub fn is_stopped(&self) -> bool {
        self.contains(&Tag::StopBot)
    }

    pub fn lead(&self) -> Option<LeadTemperature> {
        self.0.iter().find_map(|t| match t {
            Tag::Lead(temp) => Some(*temp),
            _ => None,
        })
    }

    /// Strip the one-shot `snooze` flag. Returns whether it was set.
    pub fn take_snooze(&mut self) -> bool {
        self.remove(&Tag::Snooze)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

impl FromIterator<Tag> for TagSet {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        let mut set = TagSet::new();
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = &'a Tag;
    type IntoIter = std::collections::btree_set::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_tags_case_insensitively() {
        assert_eq!(Tag::parse("Stop Bot"), Tag::StopBot);
        assert_eq!(Tag::parse(" FOLLOWUP "), Tag::Followup);
        assert_eq!(Tag::parse("Hot"), Tag::Lead(LeadTemperature::Hot));
        assert_eq!(Tag::parse("Aisyah"), Tag::Other("Aisyah".to_owned()));
    }

    #[test]
    fn display_round_trips_through_parse() {
        for raw in ["stop bot", "idle", "snooze", "followup", "replied", "cold", "Farid"] {
            assert_eq!(Tag::parse(raw).to_string(), raw);
        }
    }

    #[test]
    fn adding_existing_tag_is_noop() {
        let mut tags = TagSet::new();
        assert!(tags.insert(Tag::Idle));
        assert!(!tags.insert(Tag::Idle));
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn removing_absent_tag_is_noop() {
        let mut tags: TagSet = [Tag::Idle].into_iter().collect();
        assert!(!tags.remove(&Tag::Snooze));
        assert_eq!(tags.to_strings(), vec!["idle"]);
    }

    #[test]
    fn lead_temperature_is_exclusive() {
        let mut tags = TagSet::new();
        tags.insert(Tag::Lead(LeadTemperature::Cold));
        tags.insert(Tag::Lead(LeadTemperature::Hot));
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.lead(), Some(LeadTemperature::Hot));
    }

    #[test]
    fn take_snooze_strips_flag_once() {
        let mut tags: TagSet = [Tag::Snooze, Tag::Replied].into_iter().collect();
        assert!(tags.take_snooze());
        assert!(!tags.take_snooze());
        assert!(tags.contains(&Tag::Replied));
    }

    #[test]
    fn serializes_as_string_list() {
        let tags: TagSet = [Tag::StopBot, Tag::Other("Farid".to_owned())]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&tags).unwrap();
        assert_eq!(json, r#"["stop bot","Farid"]"#);
        let back: TagSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tags);
    }
}
