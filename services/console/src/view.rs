//! Terminal rendering of session state.
//!
//! The view is a pure function of core snapshots plus its own scroll cursors.
//! It re-renders a list only when the snapshot's `Arc` identity changed, and
//! appends (auto-scroll) rather than reprinting on growth.

use parlance_core::conversation::{ConversationItem, ItemStatus, Role};
use parlance_core::events::{Direction, LogEntry};
use parlance_core::{ConsoleState, SessionManager};
use std::io::Write;
use std::sync::Arc;

pub struct ConsoleView {
    last_items: Option<Arc<Vec<ConversationItem>>>,
    items_rendered: usize,
    last_log: Option<Arc<Vec<LogEntry>>>,
    log_rendered: usize,
    /// Echo the protocol log lines; off by default, toggled by the `log` command.
    pub show_events: bool,
}

impl ConsoleView {
    pub fn new() -> Self {
        Self {
            last_items: None,
            items_rendered: 0,
            last_log: None,
            log_rendered: 0,
            show_events: false,
        }
    }

    /// Writes whatever changed since the previous call.
    pub fn render(&mut self, manager: &SessionManager, out: &mut impl Write) -> std::io::Result<()> {
        let items = manager.conversation_snapshot();
        if self
            .last_items
            .as_ref()
            .is_none_or(|last| !Arc::ptr_eq(last, &items))
        {
            self.render_items(&items, out)?;
            self.last_items = Some(items);
        }

        if self.show_events {
            let log = manager.event_log_snapshot();
            if self
                .last_log
                .as_ref()
                .is_none_or(|last| !Arc::ptr_eq(last, &log))
            {
                self.render_log(&log, out)?;
                self.last_log = Some(log);
            }
        }
        Ok(())
    }

    /// One-off summary of the tool-visible console state.
    pub fn render_status(
        &self,
        manager: &SessionManager,
        state: &ConsoleState,
        out: &mut impl Write,
    ) -> std::io::Result<()> {
        writeln!(out, "connection: {:?}", manager.connection_state())?;
        writeln!(
            out,
            "last user: {}",
            manager.last_user_message().unwrap_or_else(|| "-".to_string())
        )?;
        writeln!(
            out,
            "last assistant: {}",
            manager.last_assistant_message().unwrap_or_else(|| "-".to_string())
        )?;
        if let Some(marker) = state.marker() {
            writeln!(
                out,
                "marker: {} ({}, {}) {}",
                marker.location.as_deref().unwrap_or("?"),
                marker.lat,
                marker.lng,
                marker.temperature.as_deref().unwrap_or("pending"),
            )?;
        }
        for (key, value) in state.memory.snapshot() {
            writeln!(out, "memory[{key}] = {value}")?;
        }
        Ok(())
    }

    fn render_items(
        &mut self,
        items: &Arc<Vec<ConversationItem>>,
        out: &mut impl Write,
    ) -> std::io::Result<()> {
        // Deletions shrink the list; start over rather than guess.
        if items.len() < self.items_rendered {
            self.items_rendered = 0;
            writeln!(out, "--- transcript ---")?;
        }
        let new_items = &items[self.items_rendered..];
        for item in new_items {
            writeln!(out, "{}", format_item(item))?;
        }
        self.items_rendered = items.len();
        Ok(())
    }

    fn render_log(
        &mut self,
        log: &Arc<Vec<LogEntry>>,
        out: &mut impl Write,
    ) -> std::io::Result<()> {
        if log.len() < self.log_rendered {
            self.log_rendered = 0;
        }
        // Aggregation can bump the count of the final entry without growing
        // the list; re-show that line when it happens.
        let start = self.log_rendered.saturating_sub(1).min(log.len());
        for entry in &log[start..] {
            writeln!(out, "{}", format_log_entry(entry))?;
        }
        self.log_rendered = log.len();
        Ok(())
    }
}

impl Default for ConsoleView {
    fn default() -> Self {
        Self::new()
    }
}

fn format_item(item: &ConversationItem) -> String {
    let status = match item.status {
        ItemStatus::Streaming => "…",
        ItemStatus::Completed => " ",
        ItemStatus::Truncated => "✂",
    };
    match item.role {
        Role::Tool => {
            if let Some(call) = &item.tool_call {
                format!("[tool]{status} {}({})", call.name, call.arguments)
            } else {
                format!("[tool]{status} {}", item.tool_output.as_deref().unwrap_or(""))
            }
        }
        role => {
            let text = item.display_text();
            let text = if text.is_empty() { "(audio)" } else { text };
            format!("[{role}]{status} {text}")
        }
    }
}

fn format_log_entry(entry: &LogEntry) -> String {
    let arrow = match entry.direction {
        Direction::Client => "→",
        Direction::Server => "←",
    };
    if entry.count > 1 {
        format!("{arrow} {} (×{})", entry.event_type, entry.count)
    } else {
        format!("{arrow} {}", entry.event_type)
    }
}
