pub mod cli;
pub mod commands;
pub mod config;
pub mod controller;
pub mod dashboard;
pub mod datetime;
pub mod error;
pub mod event;
pub mod filter;
pub mod notify;
pub mod reminder;
pub mod render;
pub mod store;

use std::ffi::OsString;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting docket"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.docketrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let backend =
    store::FileKeyValueStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open event store at \
         {}",
        data_dir.display()
      )
    })?;
  let event_store =
    store::EventStore::with_key(
      backend,
      &cfg.storage_key()
    );

  let controller =
    controller::EventController::open(
      event_store,
      Utc::now()
    );
  let scheduler =
    cfg.reminder_scheduler()?;
  let dashboard =
    dashboard::Dashboard::new(
      controller, scheduler
    );

  let mut renderer =
    render::Renderer::new(&cfg);
  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  commands::dispatch(
    dashboard,
    &cfg,
    &mut renderer,
    inv
  )?;

  info!("done");
  Ok(())
}
