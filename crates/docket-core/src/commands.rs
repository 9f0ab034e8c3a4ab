use std::io::{self, Read};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, instrument, warn};

use crate::cli::Invocation;
use crate::config::Config;
use crate::dashboard::{Dashboard, Notice, arm_reminders};
use crate::event::{Event, EventDraft, EventId, EventPatch, Priority};
use crate::filter::{self, FilterMode};
use crate::notify::{NotificationCenter, NotificationEvent, NotificationKind};
use crate::render::Renderer;
use crate::store::KeyValueStore;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add", "modify", "delete", "toggle", "done", "list", "info", "insights", "remind", "watch",
        "export", "import", "_show", "help", "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(dashboard, cfg, renderer, inv))]
pub fn dispatch<K>(
    mut dashboard: Dashboard<K>,
    cfg: &Config,
    renderer: &mut Renderer,
    inv: Invocation,
) -> anyhow::Result<()>
where
    K: KeyValueStore + Send + 'static,
{
    let now = Utc::now();
    let command = inv.command.as_str();

    debug!(
        command,
        selectors = ?inv.selectors,
        args = ?inv.command_args,
        "dispatching command"
    );

    match command {
        "add" => cmd_add(&mut dashboard, renderer, &inv.command_args, now),
        "modify" => cmd_modify(&mut dashboard, renderer, &inv.selectors, &inv.command_args, now),
        "delete" => cmd_delete(&mut dashboard, renderer, &inv.selectors, now),
        "toggle" | "done" => cmd_toggle(&mut dashboard, renderer, &inv.selectors, now),
        "list" => cmd_list(&mut dashboard, renderer, &inv, now),
        "info" => cmd_info(&dashboard, renderer, &inv.selectors, now),
        "insights" => cmd_insights(&mut dashboard, renderer, now),
        "remind" => cmd_remind(&mut dashboard, renderer, now),
        "watch" => cmd_watch(dashboard, cfg, renderer),
        "export" => cmd_export(&dashboard, &inv, now),
        "import" => cmd_import(&mut dashboard, renderer, now),
        "_show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

#[instrument(skip(dashboard, renderer, args, now))]
fn cmd_add<K: KeyValueStore>(
    dashboard: &mut Dashboard<K>,
    renderer: &mut Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command add");

    let draft = parse_draft(args)?;
    let outcome = dashboard.add(draft, now)?;
    show_notices(renderer, &outcome.notices)?;
    println!("Created event {}.", outcome.value.id);
    Ok(())
}

#[instrument(skip(dashboard, renderer, selectors, args, now))]
fn cmd_modify<K: KeyValueStore>(
    dashboard: &mut Dashboard<K>,
    renderer: &mut Renderer,
    selectors: &[String],
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command modify");

    let id = parse_selector(selectors)?;
    let patch = parse_patch(args)?;
    if patch.is_empty() {
        return Err(anyhow!("modify: nothing to change"));
    }

    let outcome = dashboard.edit(id, patch, now)?;
    show_notices(renderer, &outcome.notices)?;
    println!("Modified event {}.", outcome.value.id);
    Ok(())
}

#[instrument(skip(dashboard, renderer, selectors, now))]
fn cmd_delete<K: KeyValueStore>(
    dashboard: &mut Dashboard<K>,
    renderer: &mut Renderer,
    selectors: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command delete");

    let id = parse_selector(selectors)?;
    let outcome = dashboard.remove(id, now);
    show_notices(renderer, &outcome.notices)?;
    match outcome.value {
        Some(event) => println!("Deleted event {} '{}'.", event.id, event.name),
        None => println!("No event {id}; nothing deleted."),
    }
    Ok(())
}

#[instrument(skip(dashboard, renderer, selectors, now))]
fn cmd_toggle<K: KeyValueStore>(
    dashboard: &mut Dashboard<K>,
    renderer: &mut Renderer,
    selectors: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command toggle");

    let id = parse_selector(selectors)?;
    let outcome = dashboard.toggle(id, now)?;
    show_notices(renderer, &outcome.notices)?;
    let state = if outcome.value.completed {
        "complete"
    } else {
        "incomplete"
    };
    println!("Marked event {} {state}.", outcome.value.id);
    Ok(())
}

#[instrument(skip(dashboard, renderer, inv, now))]
fn cmd_list<K: KeyValueStore>(
    dashboard: &mut Dashboard<K>,
    renderer: &mut Renderer,
    inv: &Invocation,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command list");

    let mode = parse_mode(inv)?;
    dashboard.set_filter(mode);
    let visible = dashboard.visible(now);
    renderer.print_event_table(&visible, mode, now)
}

#[instrument(skip(dashboard, renderer, selectors, now))]
fn cmd_info<K: KeyValueStore>(
    dashboard: &Dashboard<K>,
    renderer: &mut Renderer,
    selectors: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command info");

    let id = parse_selector(selectors)?;
    let event = dashboard
        .controller()
        .get(id)
        .ok_or_else(|| anyhow!("event not found: {id}"))?;
    renderer.print_event_info(event, now)
}

#[instrument(skip(dashboard, renderer, now))]
fn cmd_insights<K: KeyValueStore>(
    dashboard: &mut Dashboard<K>,
    renderer: &mut Renderer,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command insights");

    let insights = dashboard.controller_mut().refresh_insights(now);
    renderer.print_insights(&insights)
}

#[instrument(skip(dashboard, renderer, now))]
fn cmd_remind<K: KeyValueStore>(
    dashboard: &mut Dashboard<K>,
    renderer: &mut Renderer,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command remind");

    let reminders = dashboard.remind(now);
    if reminders.is_empty() {
        println!("No events within the reminder window.");
    }
    for reminder in reminders {
        renderer.print_notification(&reminder.message, NotificationKind::Reminder)?;
    }
    Ok(())
}

/// Arms the reminder scheduler on a single-threaded runtime and prints
/// notifications as they appear, until Ctrl-C.
#[instrument(skip(dashboard, cfg, renderer))]
fn cmd_watch<K>(
    mut dashboard: Dashboard<K>,
    cfg: &Config,
    renderer: &mut Renderer,
) -> anyhow::Result<()>
where
    K: KeyValueStore + Send + 'static,
{
    info!("command watch");

    let timing = cfg.notification_timing()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let period = dashboard.scheduler().period();
    let window = dashboard.scheduler().window();
    // Other invocations write the snapshot; rescan it on every tick.
    dashboard.set_follow_store(true);

    runtime.block_on(async move {
        let shared = dashboard.into_shared();
        let notes = NotificationCenter::new(timing).into_shared();
        let mut rx = notes.lock().subscribe();
        let ticker = arm_reminders(shared, notes.clone(), Utc::now)?;

        println!(
            "Watching for events within {} minutes, checking every {} seconds (Ctrl-C to stop).",
            window.num_minutes(),
            period.as_secs()
        );

        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal.context("failed to listen for Ctrl-C")?;
                    break;
                }
                event = rx.recv() => match event {
                    Ok(NotificationEvent::Shown(note)) => {
                        renderer.print_notification(&note.message, note.kind)?;
                    }
                    Ok(other) => debug!(event = ?other, "notification lifecycle"),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "notification listener fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }

        ticker.abort();
        info!("watch stopped");
        Ok::<(), anyhow::Error>(())
    })
}

#[instrument(skip(dashboard, inv, now))]
fn cmd_export<K: KeyValueStore>(
    dashboard: &Dashboard<K>,
    inv: &Invocation,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command export");

    let mode = parse_mode(inv)?;
    let controller = dashboard.controller();
    let rows: Vec<&Event> = filter::apply_in(controller.events(), mode, now, controller.timezone());
    let out = serde_json::to_string_pretty(&rows)?;
    println!("{out}");
    Ok(())
}

#[instrument(skip(dashboard, renderer, now))]
fn cmd_import<K: KeyValueStore>(
    dashboard: &mut Dashboard<K>,
    renderer: &mut Renderer,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command import");

    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .context("failed reading import data from stdin")?;
    let events: Vec<Event> =
        serde_json::from_str(raw.trim()).context("import expects a JSON array of events")?;

    let applied = dashboard.controller_mut().replace_all(events, now)?;
    if let Some(err) = &applied.persist_error {
        renderer.print_notification(&format!("Warning: {err}"), NotificationKind::Normal)?;
    }
    println!("Imported {} event(s).", applied.value);
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    let mut entries: Vec<(&String, &String)> = cfg.iter().collect();
    entries.sort();
    for (key, value) in entries {
        println!("{key}={value}");
    }
    for file in &cfg.loaded_files {
        println!("# loaded {}", file.display());
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "\
usage: docket [options] [id] <command> [args]

options:
  -v, --verbose        more logging (repeatable)
  -q, --quiet          less logging (repeatable)
  --rc KEY=VALUE       override a setting (also rc.KEY=VALUE)
  --docketrc PATH      read settings from PATH
  --data DIR           keep the event snapshot in DIR

commands:
  add <name...> at:<when> [desc:<text>] [priority:low|medium|high]
  <id> modify [name...] [at:<when>] [desc:<text>] [priority:<p>]
  <id> delete
  <id> toggle | done
  list [all|upcoming|today|high]
  <id> info
  insights
  remind
  watch
  export [mode]
  import < events.json
  _show | help | version

<when> accepts now, today, tomorrow, +30m, +2h, +1d, YYYY-MM-DD,
YYYY-MM-DDTHH:MM, YYYY-MM-DD HH:MM or an RFC 3339 timestamp."
    );
    Ok(())
}

fn show_notices(renderer: &Renderer, notices: &[Notice]) -> anyhow::Result<()> {
    for notice in notices {
        renderer.print_notification(&notice.message, notice.kind)?;
    }
    Ok(())
}

fn parse_selector(selectors: &[String]) -> anyhow::Result<EventId> {
    match selectors {
        [one] => one
            .trim()
            .parse::<EventId>()
            .with_context(|| format!("invalid event id: {one}")),
        [] => Err(anyhow!("an event id is required before the command")),
        _ => Err(anyhow!("exactly one event id expected, got {}", selectors.len())),
    }
}

fn parse_mode(inv: &Invocation) -> anyhow::Result<FilterMode> {
    let mut terms = inv.selectors.iter().chain(inv.command_args.iter());
    let Some(first) = terms.next() else {
        return Ok(FilterMode::All);
    };
    if let Some(extra) = terms.next() {
        return Err(anyhow!("unexpected argument: {extra}"));
    }
    first.parse()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Name(String),
    When(String),
    Description(String),
    Priority(Priority),
}

/// Splits `key:value` fields from the free words that form the name.
#[instrument(skip(args))]
fn parse_fields(args: &[String]) -> anyhow::Result<(Vec<String>, Vec<Field>)> {
    let mut words = Vec::new();
    let mut fields = Vec::new();

    let mut literal = false;
    for arg in args {
        if arg == "--" {
            literal = true;
            continue;
        }

        if !literal && let Some(field) = parse_one_field(arg)? {
            fields.push(field);
            continue;
        }

        words.push(arg.clone());
    }

    Ok((words, fields))
}

fn parse_one_field(tok: &str) -> anyhow::Result<Option<Field>> {
    let Some((key, value)) = tok.split_once(':') else {
        return Ok(None);
    };

    match key.to_ascii_lowercase().as_str() {
        "name" | "title" => Ok(Some(Field::Name(value.to_string()))),
        "at" | "when" | "date" => Ok(Some(Field::When(value.to_string()))),
        "desc" | "description" => Ok(Some(Field::Description(value.to_string()))),
        "pri" | "priority" => Ok(Some(Field::Priority(value.parse()?))),
        _ => Ok(None),
    }
}

fn parse_draft(args: &[String]) -> anyhow::Result<EventDraft> {
    let (words, fields) = parse_fields(args)?;
    let mut draft = EventDraft {
        name: words.join(" "),
        ..EventDraft::default()
    };

    for field in fields {
        match field {
            Field::Name(name) => draft.name = name,
            Field::When(when) => draft.when = when,
            Field::Description(text) => draft.description = Some(text),
            Field::Priority(priority) => draft.priority = Some(priority),
        }
    }

    if draft.when.trim().is_empty() {
        return Err(anyhow!("add: a date/time is required (at:<when>)"));
    }
    Ok(draft)
}

fn parse_patch(args: &[String]) -> anyhow::Result<EventPatch> {
    let (words, fields) = parse_fields(args)?;
    let mut patch = EventPatch::default();
    if !words.is_empty() {
        patch.name = Some(words.join(" "));
    }

    for field in fields {
        match field {
            Field::Name(name) => patch.name = Some(name),
            Field::When(when) => patch.when = Some(when),
            Field::Description(text) => patch.description = Some(text),
            Field::Priority(priority) => patch.priority = Some(priority),
        }
    }
    Ok(patch)
}
