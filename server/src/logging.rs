use crate::configuration::Configuration;
use anyhow::Context;
use std::{env, fs::OpenOptions, sync::Mutex};
use tracing_subscriber::{
    filter::EnvFilter, fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt,
};

pub fn init(config: &Configuration) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if config.verbose {
            "reqwest=warn,debug"
        } else {
            "reqwest=warn,info"
        })
    });
    let registry = tracing_subscriber::registry().with(env_filter);

    let raw_logs = env::var("RESTLDAP_RAW_LOG").is_ok();
    let local_tz = env::var("RESTLDAP_LOCAL_TZ_LOG").is_ok();

    if let Some(path) = &config.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("while opening the log file {path}"))?;
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file));
        if local_tz {
            registry
                .with(layer.with_timer(ChronoLocal::rfc_3339()))
                .init();
        } else {
            registry.with(layer).init();
        }
    } else if local_tz {
        registry
            .with(tracing_subscriber::fmt::layer().with_timer(ChronoLocal::rfc_3339()))
            .init();
    } else if raw_logs {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry.with(tracing_forest::ForestLayer::default()).init();
    }

    Ok(())
}
