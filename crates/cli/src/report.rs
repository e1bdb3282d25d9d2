//! Human-readable output.

use chatnav_adapters::{AdapterRegistry, OrderPolicy, PlatformAdapter};
use chatnav_engine::{projection, ProjectedRow, SequenceUpdate};
use serde::Serialize;
use std::fmt::Write;

use crate::replay::TimedUpdate;

#[derive(Debug, Serialize)]
pub(crate) struct AdapterRow {
    name: &'static str,
    assistant_name: &'static str,
    active: bool,
    order_policy: &'static str,
    observes_attributes: bool,
    debounce_ms: u128,
    streaming_wait_ms: u128,
    priming_attempts: u32,
    fallback_poll_ms: Option<u128>,
}

impl AdapterRow {
    pub(crate) fn new(adapter: &dyn PlatformAdapter, active: bool) -> Self {
        let timing = adapter.timing();
        Self {
            name: adapter.name(),
            assistant_name: adapter.assistant_name(),
            active,
            order_policy: match adapter.order_policy() {
                OrderPolicy::Native => "native",
                OrderPolicy::Renumber => "renumber",
            },
            observes_attributes: adapter.observes_attributes(),
            debounce_ms: timing.debounce.as_millis(),
            streaming_wait_ms: timing.streaming_wait.as_millis(),
            priming_attempts: timing.priming.attempts,
            fallback_poll_ms: timing.fallback_poll.map(|d| d.as_millis()),
        }
    }
}

pub(crate) fn adapters_table(registry: &AdapterRegistry, active: Option<&str>) -> String {
    let mut out = String::new();
    for adapter in registry.iter() {
        let row = AdapterRow::new(adapter.as_ref(), active == Some(adapter.name()));
        let marker = if row.active { '*' } else { ' ' };
        let poll = row
            .fallback_poll_ms
            .map_or_else(|| "-".to_string(), |ms| format!("{ms}ms"));
        let _ = writeln!(
            out,
            "{marker} {:<10} {:<10} debounce {:>4}ms  stream wait {:>4}ms  poll {:<7} {}",
            row.name,
            row.assistant_name,
            row.debounce_ms,
            row.streaming_wait_ms,
            poll,
            row.order_policy,
        );
    }
    out.trim_end().to_string()
}

pub(crate) fn rows_table(rows: &[ProjectedRow], assistant_name: &str) -> String {
    if rows.is_empty() {
        return "(no messages)".to_string();
    }
    let mut out = String::new();
    for row in rows {
        let star = if row.favorite { " *" } else { "" };
        let _ = writeln!(
            out,
            "{}{star}\n    {}",
            projection::heading(row.number, row.role, assistant_name),
            row.preview
        );
    }
    out.trim_end().to_string()
}

pub(crate) fn update_line(timed: &TimedUpdate) -> String {
    let detail = match &timed.update {
        SequenceUpdate::ContextChanged { generation, key, adapter } => format!(
            "context #{generation}: {} ({})",
            key.as_deref().unwrap_or("none"),
            adapter.as_deref().unwrap_or("no adapter")
        ),
        SequenceUpdate::MessagesAdded {
            reason,
            added,
            total,
            ..
        } => format!("{reason:?} pass: +{} ({total} total)", added.len()),
        SequenceUpdate::MessagesRefreshed { refreshed, .. } => {
            format!("refreshed {refreshed} messages")
        }
        SequenceUpdate::FavoriteToggled { id, favorite } => {
            format!("favorite {id}: {favorite}")
        }
        SequenceUpdate::ThemeChanged { theme } => format!("theme {theme}"),
    };
    format!("{:>6}ms  {detail}", timed.at_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatnav_adapters::Role;
    use chatnav_engine::MessageId;

    #[test]
    fn table_marks_active_adapter() {
        let table = adapters_table(&AdapterRegistry::with_builtin(), Some("claude"));
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 7);
        assert!(lines[0].starts_with("  chatgpt"));
        assert!(lines[1].starts_with("* claude"));
    }

    #[test]
    fn rows_show_heading_and_favorite_star() {
        let rows = vec![ProjectedRow {
            id: MessageId::new("a"),
            number: 2,
            role: Role::Assistant,
            preview: "Sure.".to_string(),
            favorite: true,
        }];
        assert_eq!(rows_table(&rows, "Claude"), "2. Claude *\n    Sure.");
        assert_eq!(rows_table(&[], "Claude"), "(no messages)");
    }
}
