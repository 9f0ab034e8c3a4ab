use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::controller::Insights;
use crate::datetime::{format_project_datetime, iso_date_serde};
use crate::event::{Event, Priority};
use crate::filter::FilterMode;
use crate::notify::NotificationKind;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        Self {
            color: cfg.get_bool("color").unwrap_or(true),
        }
    }

    #[tracing::instrument(skip(self, events, now))]
    pub fn print_event_table(
        &mut self,
        events: &[&Event],
        mode: FilterMode,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        if events.is_empty() {
            writeln!(out, "No events found.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "When".to_string(),
            "Pri".to_string(),
            "Name".to_string(),
            "Status".to_string(),
            "Left".to_string(),
        ];

        let rows = events
            .iter()
            .map(|event| self.event_row(event, now))
            .collect();

        write_table(&mut out, headers, rows)?;
        writeln!(out)?;
        writeln!(out, "{} event(s) shown ({mode})", events.len())?;
        Ok(())
    }

    fn event_row(&self, event: &Event, now: DateTime<Utc>) -> Vec<String> {
        let id = self.paint(&event.id.to_string(), "33");

        let when = format_project_datetime(event.scheduled_at);
        let when = if event.is_past(now) && !event.completed {
            self.paint(&when, "2")
        } else {
            when
        };

        let priority = match event.priority {
            Priority::High => self.paint("H", "31"),
            Priority::Medium => "M".to_string(),
            Priority::Low => "L".to_string(),
        };

        let status = if event.completed {
            self.paint("done", "32")
        } else {
            "open".to_string()
        };

        vec![
            id,
            when,
            priority,
            event.name.clone(),
            status,
            event.time_until(now),
        ]
    }

    #[tracing::instrument(skip(self, event, now))]
    pub fn print_event_info(&mut self, event: &Event, now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id          {}", event.id)?;
        writeln!(out, "name        {}", event.name)?;
        writeln!(
            out,
            "when        {} {}",
            format_project_datetime(event.scheduled_at),
            event.time_until(now)
        )?;
        writeln!(out, "date        {}", iso_date_serde::format(&event.scheduled_at))?;
        writeln!(
            out,
            "description {}",
            event.description.as_deref().unwrap_or("No description")
        )?;
        writeln!(out, "priority    {}", event.priority)?;
        writeln!(out, "completed   {}", if event.completed { "yes" } else { "no" })?;
        Ok(())
    }

    pub fn print_insights(&mut self, insights: &Insights) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let rows = vec![
            vec!["Total".to_string(), insights.total.to_string()],
            vec!["Upcoming".to_string(), insights.upcoming.to_string()],
            vec!["Today".to_string(), insights.today.to_string()],
            vec!["High priority".to_string(), insights.high_priority.to_string()],
        ];
        write_table(&mut out, vec!["Insight".to_string(), "Count".to_string()], rows)?;
        Ok(())
    }

    /// Notifications go to stderr so stdout stays clean for `export`.
    pub fn print_notification(&self, message: &str, kind: NotificationKind) -> anyhow::Result<()> {
        let code = match kind {
            NotificationKind::Reminder => "33",
            NotificationKind::Normal => "32",
        };
        let mut err = io::stderr().lock();
        let text = if self.color && io::stderr().is_terminal() {
            format!("\x1b[{code}m{message}\x1b[0m")
        } else {
            message.to_string()
        };
        writeln!(err, "{text}")?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
