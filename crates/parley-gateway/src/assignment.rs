use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use parley_core::{ContactKey, ConversationStore, Tag, TenantConfig};
use tracing::{info, warn};

/// Per-tenant round-robin over the tenant's employee list.
#[derive(Debug, Default)]
pub(crate) struct RoundRobin {
    counters: Mutex<HashMap<String, usize>>,
}

impl RoundRobin {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn next<'a>(&self, tenant: &str, employees: &'a [String]) -> Option<&'a String> {
        if employees.is_empty() {
            return None;
        }
        let mut counters = self.counters.lock().expect("round-robin mutex poisoned");
        let counter = counters.entry(tenant.to_owned()).or_insert(0);
        let employee = &employees[*counter % employees.len()];
        *counter = counter.wrapping_add(1);
        Some(employee)
    }

    /// Tag the contact with the next employee's name plus `extra_tags`.
    /// Returns the employee, or `None` when the tenant has no employees.
    pub(crate) async fn assign(
        &self,
        store: &dyn ConversationStore,
        contact: &ContactKey,
        tenant: &TenantConfig,
        extra_tags: &[String],
    ) -> Result<Option<String>> {
        let Some(employee) = self.next(&contact.tenant, &tenant.employees) else {
            warn!(tenant = %contact.tenant, "no employees configured, skipping assignment");
            return Ok(None);
        };

        store.add_tag(contact, &Tag::parse(employee)).await?;
        for tag in extra_tags {
            store.add_tag(contact, &Tag::parse(tag)).await?;
        }
        info!(contact = %contact, employee = %employee, "contact assigned");
        Ok(Some(employee.clone()))
    }
}
