#![forbid(unsafe_code)]
#![forbid(non_ascii_idents)]

mod callback_server;
mod cli;
mod configuration;
mod ldap_server;
mod logging;
mod refresher;
mod tls;

use crate::{
    cli::{Command, HashPasswordOpts, RunOpts},
    configuration::Configuration,
    refresher::{RefreshTrigger, Refresher},
};
use actix::Actor;
use actix_server::{ServerBuilder, ServerHandle};
use anyhow::{Context, Result};
use restldap_backend_handlers::ConfiguredBackend;
use restldap_domain::dit::DitSnapshot;
use restldap_domain_handlers::handler::{BackendHandler, RefreshHandler};
use restldap_ldap::{DirectoryContext, LdapInfo};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

#[instrument(skip_all)]
async fn set_up_server(
    config: Configuration,
    shutdown: CancellationToken,
) -> Result<(ServerBuilder, RefreshTrigger)> {
    info!("Starting restldap version {}", env!("CARGO_PKG_VERSION"));

    let mut ldap_info = LdapInfo::new(
        &config.ldap_base_dn,
        &config.users_ou_name,
        &config.groups_ou_name,
    )
    .with_context(|| {
        format!(
            "Invalid value for ldap_base_dn in configuration: {}",
            &config.ldap_base_dn
        )
    })?;
    ldap_info.respect_control_criticality = config.respect_control_criticality;

    let backend_handler = ConfiguredBackend::open(config.backend, &config.backend_settings()?)
        .with_context(|| format!("while setting up the `{}` backend", config.backend))?;
    let (users, groups) = backend_handler
        .get_data()
        .await
        .context("while loading the initial directory data")?;
    info!(
        users = users.len(),
        groups = groups.len(),
        "Loaded the directory from the `{}` backend",
        config.backend
    );
    let dit = DitSnapshot::new(ldap_info.new_dit(users, groups));

    let refresher = Refresher::new(
        Arc::new(backend_handler.clone()),
        dit.clone(),
        Duration::from_secs(config.update_interval_seconds),
    )
    .start();
    let refresh_trigger = RefreshTrigger::new(refresher.recipient());

    let context = Arc::new(DirectoryContext {
        ldap_info,
        dit,
        backend_handler,
        refresh_handler: Arc::new(refresh_trigger.clone()),
    });
    let server_builder =
        ldap_server::build_ldap_server(&config, context, shutdown, actix_server::Server::build())
            .context("while binding the LDAP server")?;
    let server_builder = if config.callback_options.enabled {
        callback_server::build_callback_server(
            &config.callback_options,
            Arc::new(refresh_trigger.clone()),
            server_builder,
        )
        .context("while binding the callback server")?
    } else {
        server_builder
    };
    Ok((server_builder, refresh_trigger))
}

/// SIGUSR1 forces a refresh, SIGINT and SIGTERM stop the servers.
#[cfg(unix)]
async fn handle_signals(
    refresh_trigger: RefreshTrigger,
    shutdown: CancellationToken,
    server: ServerHandle,
) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut interrupt = signal(SignalKind::interrupt()).context("while listening to SIGINT")?;
    let mut terminate = signal(SignalKind::terminate()).context("while listening to SIGTERM")?;
    let mut user_defined =
        signal(SignalKind::user_defined1()).context("while listening to SIGUSR1")?;
    loop {
        tokio::select! {
            _ = user_defined.recv() => {
                info!("Received SIGUSR1, refreshing the directory");
                refresh_trigger.refresh_now();
            }
            _ = interrupt.recv() => break,
            _ = terminate.recv() => break,
        }
    }
    info!("Shutting down");
    shutdown.cancel();
    server.stop(true).await;
    Ok(())
}

#[cfg(not(unix))]
async fn handle_signals(
    _refresh_trigger: RefreshTrigger,
    shutdown: CancellationToken,
    server: ServerHandle,
) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("while listening to Ctrl-C")?;
    info!("Shutting down");
    shutdown.cancel();
    server.stop(true).await;
    Ok(())
}

async fn run_server_command(opts: RunOpts) -> Result<()> {
    debug!("CLI: {:#?}", &opts);

    let config = configuration::init(opts)?;
    logging::init(&config)?;

    let shutdown = CancellationToken::new();
    let (server, refresh_trigger) = set_up_server(config, shutdown.clone()).await?;
    let server = server.workers(1).disable_signals().run();

    let server_handle = server.handle();
    actix_rt::spawn(async move {
        if let Err(e) = handle_signals(refresh_trigger, shutdown, server_handle).await {
            error!("Error handling signals: {:#}", e);
        }
    });

    server.await.context("while starting the server")
}

fn hash_password_command(opts: HashPasswordOpts) -> Result<()> {
    println!("{}", restldap_auth::ssha::hash_password(&opts.password));
    Ok(())
}

#[actix::main]
async fn main() -> Result<()> {
    let cli_opts = cli::init();
    match cli_opts.command {
        Command::Run(opts) => run_server_command(opts).await,
        Command::HashPassword(opts) => hash_password_command(opts),
    }
}
