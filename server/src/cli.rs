use clap::{Parser, Subcommand};
use restldap_backend_handlers::BackendKind;

/// restldap serves, over LDAP, a directory fetched from a REST API or from JSON files.
#[derive(Debug, Parser, Clone)]
#[clap(version, author = "The restldap developers")]
pub struct CLIOpts {
    /// Export
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the LDAP server, and the refresh callback if enabled.
    #[clap(name = "run")]
    Run(RunOpts),
    /// Print the {SSHA} hash of a password, to put in the backend data.
    #[clap(name = "hash-password")]
    HashPassword(HashPasswordOpts),
}

#[derive(Debug, Parser, Clone)]
pub struct GeneralConfigOpts {
    /// Change config file name.
    #[clap(
        short,
        long,
        default_value = "restldap_config.toml",
        env = "RESTLDAP_CONFIG_FILE"
    )]
    pub config_file: String,

    /// Set verbose logging.
    #[clap(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Parser, Clone)]
pub struct RunOpts {
    #[clap(flatten)]
    pub general_config: GeneralConfigOpts,

    /// Change ldap port. Default: 3890
    #[clap(long)]
    pub ldap_port: Option<u16>,

    /// Data source: file, rest or null. Default: null
    #[clap(long)]
    pub backend: Option<BackendKind>,

    #[clap(flatten)]
    pub ldaps_opts: LdapsOpts,

    #[clap(flatten)]
    pub callback_opts: CallbackOpts,
}

#[derive(Debug, Parser, Clone)]
#[clap(next_help_heading = Some("LDAPS"))]
pub struct LdapsOpts {
    /// Serve the LDAP listener over TLS.
    #[clap(long)]
    pub ldaps_enabled: Option<bool>,

    /// Certificate file, in PEM format.
    #[clap(long)]
    pub ldaps_cert_file: Option<String>,

    /// Private key file, in PEM format.
    #[clap(long)]
    pub ldaps_key_file: Option<String>,
}

#[derive(Debug, Parser, Clone)]
#[clap(next_help_heading = Some("Refresh callback"))]
pub struct CallbackOpts {
    /// Enable the HTTP endpoint that triggers a refresh.
    #[clap(long)]
    pub callback_enabled: Option<bool>,

    /// Change the callback port. Default: 8080
    #[clap(long)]
    pub callback_port: Option<u16>,

    /// Token expected in the `Authorization: Token <token>` header.
    #[clap(long)]
    pub callback_auth_token: Option<String>,
}

#[derive(Debug, Parser, Clone)]
pub struct HashPasswordOpts {
    /// Password to hash.
    #[clap(short, long)]
    pub password: String,
}

pub fn init() -> CLIOpts {
    CLIOpts::parse()
}
