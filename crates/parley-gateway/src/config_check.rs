use std::collections::HashSet;
use std::path::Path;

use crate::bot_tools::BUILTIN_TOOLS;
use crate::config::{BotConfig, Config, TriggerAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CheckResult {
    pub name: &'static str,
    pub severity: Severity,
    pub passed: bool,
    pub message: String,
}

#[derive(Debug, Default)]
pub(crate) struct CheckReport {
    pub results: Vec<CheckResult>,
}

impl CheckReport {
    fn push(&mut self, name: &'static str, severity: Severity, passed: bool, message: String) {
        self.results.push(CheckResult {
            name,
            severity,
            passed,
            message,
        });
    }

    pub(crate) fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    fn failures(&self, severity: Severity) -> impl Iterator<Item = &CheckResult> {
        self.results
            .iter()
            .filter(move |r| r.severity == severity && !r.passed)
    }

    fn error_count(&self) -> usize {
        self.failures(Severity::Error).count()
    }

    fn warning_count(&self) -> usize {
        self.failures(Severity::Warning).count()
    }

    /// `name: message` for every failed error-level check.
    pub(crate) fn error_messages(&self) -> Vec<String> {
        self.failures(Severity::Error)
            .map(|r| format!("{}: {}", r.name, r.message))
            .collect()
    }

    fn format_result(r: &CheckResult) -> String {
        let icon = if r.severity == Severity::Info {
            "·"
        } else if r.passed {
            "✓"
        } else {
            match r.severity {
                Severity::Warning => "⚠",
                _ => "✗",
            }
        };
        format!("{icon} {}", r.message)
    }

    pub(crate) fn to_summary_string(&self) -> String {
        let mut lines: Vec<String> = self.results.iter().map(Self::format_result).collect();
        let errors = self.error_count();
        let warnings = self.warning_count();
        if errors == 0 && warnings == 0 {
            lines.push("\nall checks passed".to_owned());
        } else {
            lines.push(format!("\n{errors} error(s), {warnings} warning(s)"));
        }
        lines.join("\n")
    }

    pub(crate) fn to_json_value(&self) -> serde_json::Value {
        let checks: Vec<serde_json::Value> = self
            .results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "name": r.name,
                    "severity": r.severity.as_str(),
                    "passed": r.passed,
                    "message": r.message,
                })
            })
            .collect();

        serde_json::json!({
            "passed": !self.has_errors(),
            "errors": self.error_count(),
            "warnings": self.warning_count(),
            "checks": checks,
        })
    }
}

pub(crate) fn validate_config(config_path: &Path) -> CheckReport {
    let mut report = CheckReport::default();

    let config = match Config::load(config_path) {
        Ok(c) => {
            report.push(
                "toml_parse",
                Severity::Error,
                true,
                "config syntax valid".to_owned(),
            );
            c
        }
        Err(e) => {
            report.push("toml_parse", Severity::Error, false, format!("{e:#}"));
            return report;
        }
    };

    validate_loaded(&mut report, &config);
    check_environment(&mut report, &config);
    report
}

/// Checks that depend only on the parsed config, not the environment.
pub(crate) fn validate_parsed(config: &Config) -> CheckReport {
    let mut report = CheckReport::default();
    validate_loaded(&mut report, config);
    report
}

fn validate_loaded(report: &mut CheckReport, config: &Config) {
    report.push(
        "bots_present",
        Severity::Warning,
        !config.bots.is_empty(),
        if config.bots.is_empty() {
            "no [[bots]] configured, webhooks will all return 404".to_owned()
        } else {
            format!("{} bot(s) configured", config.bots.len())
        },
    );

    let mut seen = HashSet::new();
    let duplicates: Vec<&str> = config
        .bots
        .iter()
        .filter(|bot| !seen.insert(bot.id.as_str()))
        .map(|bot| bot.id.as_str())
        .collect();
    report.push(
        "bot_ids_unique",
        Severity::Error,
        duplicates.is_empty(),
        if duplicates.is_empty() {
            "bot ids unique".to_owned()
        } else {
            format!("duplicate bot ids: {}", duplicates.join(", "))
        },
    );

    for bot in &config.bots {
        check_bot(report, bot);
    }
}

fn check_bot(report: &mut CheckReport, bot: &BotConfig) {
    let id_ok = !bot.id.trim().is_empty() && !bot.tenant_id.trim().is_empty();
    report.push(
        "bot_fields",
        Severity::Error,
        id_ok,
        if id_ok {
            format!("bot '{}' → tenant '{}'", bot.id, bot.tenant_id)
        } else {
            "bot id and tenant_id must be non-empty".to_owned()
        },
    );

    report.push(
        "debounce",
        Severity::Error,
        bot.debounce_secs > 0,
        format!("bot '{}': debounce {}s", bot.id, bot.debounce_secs),
    );

    let unknown_tools: Vec<&str> = bot
        .tools
        .iter()
        .map(String::as_str)
        .filter(|name| !BUILTIN_TOOLS.contains(name))
        .collect();
    report.push(
        "tools_known",
        Severity::Error,
        unknown_tools.is_empty(),
        if unknown_tools.is_empty() {
            format!("bot '{}': tools ok", bot.id)
        } else {
            format!(
                "bot '{}': unknown tools: {}",
                bot.id,
                unknown_tools.join(", ")
            )
        },
    );

    for (i, rule) in bot.triggers.iter().enumerate() {
        let problem = if rule.phrase.trim().is_empty() {
            Some("empty phrase".to_owned())
        } else {
            match rule.action {
                TriggerAction::ScheduleFollowup => match rule.sequence.as_deref() {
                    None => Some("schedule_followup needs `sequence`".to_owned()),
                    Some(name) if bot.followup(name).is_none() => {
                        Some(format!("unknown follow-up sequence '{name}'"))
                    }
                    Some(_) => None,
                },
                TriggerAction::AddTags | TriggerAction::RemoveTags if rule.tags.is_empty() => {
                    Some("tag action needs `tags`".to_owned())
                }
                _ => None,
            }
        };
        report.push(
            "trigger",
            Severity::Error,
            problem.is_none(),
            match problem {
                Some(problem) => format!("bot '{}' trigger #{}: {problem}", bot.id, i + 1),
                None => format!("bot '{}' trigger '{}'", bot.id, rule.phrase),
            },
        );
    }

    for seq in &bot.followups {
        report.push(
            "followup_steps",
            Severity::Warning,
            !seq.steps.is_empty(),
            format!(
                "bot '{}' follow-up '{}': {} step(s)",
                bot.id,
                seq.name,
                seq.steps.len()
            ),
        );
    }
}

fn check_environment(report: &mut CheckReport, config: &Config) {
    let key_var = &config.assistant.api_key_env;
    let key_ok = std::env::var(key_var).is_ok();
    report.push(
        "assistant_key",
        Severity::Error,
        key_ok,
        if key_ok {
            format!("{key_var}: present")
        } else {
            format!("{key_var} environment variable not set")
        },
    );

    if let Some(var) = &config.gateway.api_key_env {
        let ok = std::env::var(var).is_ok();
        report.push(
            "gateway_key",
            Severity::Warning,
            ok,
            if ok {
                format!("{var}: present")
            } else {
                format!("{var} environment variable not set")
            },
        );
    }

    let store_path = Path::new(&config.store.path);
    let parent_ok = store_path
        .parent()
        .is_none_or(|p| p.as_os_str().is_empty() || p.is_dir());
    report.push(
        "store_path",
        Severity::Info,
        true,
        if parent_ok {
            format!("store: {}", store_path.display())
        } else {
            format!("store: {} (directory will be created)", store_path.display())
        },
    );
}
