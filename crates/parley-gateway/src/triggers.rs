use crate::config::TriggerRule;

/// Keyword table evaluated against each sent reply part of one turn.
/// A rule fires at most once per turn.
#[derive(Debug)]
pub(crate) struct TriggerMatcher<'a> {
    rules: &'a [TriggerRule],
    phrases: Vec<String>,
    fired: Vec<bool>,
}

impl<'a> TriggerMatcher<'a> {
    pub(crate) fn new(rules: &'a [TriggerRule]) -> Self {
        Self {
            rules,
            phrases: rules.iter().map(|r| r.phrase.trim().to_lowercase()).collect(),
            fired: vec![false; rules.len()],
        }
    }

    /// Rules whose phrase occurs in `part` (case-insensitive) and that
    /// have not fired yet this turn.
    pub(crate) fn matches(&mut self, part: &str) -> Vec<&'a TriggerRule> {
        let lowered = part.to_lowercase();
        let mut hits = Vec::new();
        for (i, rule) in self.rules.iter().enumerate() {
            if self.fired[i] || self.phrases[i].is_empty() {
                continue;
            }
            if lowered.contains(&self.phrases[i]) {
                self.fired[i] = true;
                hits.push(rule);
            }
        }
        hits
    }
}
