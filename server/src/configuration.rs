use crate::cli::{CallbackOpts, GeneralConfigOpts, LdapsOpts, RunOpts};
use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use figment_file_provider_adapter::FileAdapter;
use restldap_backend_handlers::BackendKind;
use secstr::SecUtf8;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LdapsOptions {
    pub enabled: bool,
    pub cert_file: String,
    pub key_file: String,
}

impl std::default::Default for LdapsOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_file: String::from("cert.pem"),
            key_file: String::from("key.pem"),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CallbackOptions {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub auth_token: SecUtf8,
}

impl std::default::Default for CallbackOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::from("0.0.0.0"),
            port: 8080,
            auth_token: SecUtf8::from(""),
        }
    }
}

#[derive(Clone, Deserialize, Serialize, derive_builder::Builder, derive_more::Debug)]
#[builder(pattern = "owned")]
pub struct Configuration {
    #[builder(default = r#"String::from("0.0.0.0")"#)]
    pub ldap_host: String,
    #[builder(default = "3890")]
    pub ldap_port: u16,
    #[builder(default = r#"String::from("dc=example,dc=com")"#)]
    pub ldap_base_dn: String,
    #[builder(default = r#"String::from("users")"#)]
    pub users_ou_name: String,
    #[builder(default = r#"String::from("groups")"#)]
    pub groups_ou_name: String,
    #[builder(default = "false")]
    pub respect_control_criticality: bool,
    #[builder(default = "300")]
    pub update_interval_seconds: u64,
    #[builder(default)]
    pub ldaps_options: LdapsOptions,
    #[builder(default)]
    pub callback_options: CallbackOptions,
    #[builder(default)]
    pub backend: BackendKind,
    /// Settings of each backend, keyed by backend name.
    #[builder(default)]
    #[debug(skip)]
    pub backends: HashMap<String, serde_json::Value>,
    #[builder(default = "false")]
    pub verbose: bool,
    #[builder(default)]
    pub log_file: Option<String>,
}

impl ConfigurationBuilder {
    #[cfg(test)]
    pub fn for_tests() -> Configuration {
        ConfigurationBuilder::default()
            .verbose(true)
            .build()
            .unwrap()
    }
}

impl Configuration {
    /// The settings of the selected backend, as handed to its `read_config`.
    pub fn backend_settings(&self) -> Result<Vec<u8>> {
        let settings = self
            .backends
            .get(&self.backend.to_string())
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        serde_json::to_vec(&settings)
            .with_context(|| format!("while serializing the `{}` backend settings", self.backend))
    }
}

pub trait ConfigOverrider {
    fn override_config(&self, config: &mut Configuration);
}

pub trait TopLevelCommandOpts {
    fn general_config(&self) -> &GeneralConfigOpts;
}

impl TopLevelCommandOpts for RunOpts {
    fn general_config(&self) -> &GeneralConfigOpts {
        &self.general_config
    }
}

impl ConfigOverrider for RunOpts {
    fn override_config(&self, config: &mut Configuration) {
        self.general_config.override_config(config);

        if let Some(port) = self.ldap_port {
            config.ldap_port = port;
        }

        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        self.ldaps_opts.override_config(config);
        self.callback_opts.override_config(config);
    }
}

impl ConfigOverrider for LdapsOpts {
    fn override_config(&self, config: &mut Configuration) {
        if let Some(enabled) = self.ldaps_enabled {
            config.ldaps_options.enabled = enabled;
        }
        if let Some(path) = self.ldaps_cert_file.as_ref() {
            config.ldaps_options.cert_file.clone_from(path);
        }
        if let Some(path) = self.ldaps_key_file.as_ref() {
            config.ldaps_options.key_file.clone_from(path);
        }
    }
}

impl ConfigOverrider for CallbackOpts {
    fn override_config(&self, config: &mut Configuration) {
        if let Some(enabled) = self.callback_enabled {
            config.callback_options.enabled = enabled;
        }
        if let Some(port) = self.callback_port {
            config.callback_options.port = port;
        }
        if let Some(token) = &self.callback_auth_token {
            config.callback_options.auth_token = SecUtf8::from(token.as_str());
        }
    }
}

impl ConfigOverrider for GeneralConfigOpts {
    fn override_config(&self, config: &mut Configuration) {
        if self.verbose {
            config.verbose = true;
        }
    }
}

const ENV_PREFIX: &str = "RESTLDAP_";

fn extract_keys(dict: &figment::value::Dict) -> HashSet<String> {
    use figment::value::{Dict, Value};
    fn process_value(value: &Dict, keys: &mut HashSet<String>, path: &mut Vec<String>) {
        for (key, value) in value {
            match value {
                Value::Dict(_, dict) => {
                    path.push(format!("{}__", key.to_ascii_uppercase()));
                    process_value(dict, keys, path);
                    path.pop();
                }
                _ => {
                    keys.insert(format!(
                        "{ENV_PREFIX}{}{}",
                        path.join(""),
                        key.to_ascii_uppercase()
                    ));
                }
            }
        }
    }
    let mut keys = HashSet::new();
    let mut path = Vec::new();
    process_value(dict, &mut keys, &mut path);
    keys
}

fn expected_keys(dict: &figment::value::Dict) -> HashSet<String> {
    let mut keys = extract_keys(dict);
    // CLI-only values.
    keys.insert(format!("{ENV_PREFIX}CONFIG_FILE"));
    // Unset by default.
    keys.insert(format!("{ENV_PREFIX}LOG_FILE"));
    // Raw logging switches, read by the logging setup.
    keys.insert(format!("{ENV_PREFIX}RAW_LOG"));
    keys.insert(format!("{ENV_PREFIX}LOCAL_TZ_LOG"));
    keys
}

fn is_expected(key: &str, expected_keys: &HashSet<String>) -> bool {
    // Backend settings are free-form.
    expected_keys.contains(key) || key.starts_with(&format!("{ENV_PREFIX}BACKENDS__"))
}

/// Keys ending in `_file` that name a file, not a `FileAdapter` indirection.
const IGNORED_FILE_KEYS: [&str; 3] = ["key_file", "cert_file", "log_file"];

fn env_variable_provider() -> impl figment::Provider {
    FileAdapter::wrap(Env::prefixed(ENV_PREFIX).split("__")).ignore(&IGNORED_FILE_KEYS)
}

fn warn_about_unknown_env_variables(defaults: &Configuration) -> Result<()> {
    use figment::{Profile, Provider};
    let default_data = Serialized::defaults(defaults).data()?;
    let env_data = env_variable_provider().data()?;
    let (Some(default_dict), Some(env_dict)) = (
        default_data.get(&Profile::default()),
        env_data.get(&Profile::default()),
    ) else {
        return Ok(());
    };
    let expected_keys = expected_keys(default_dict);
    let mut unknown = extract_keys(env_dict)
        .into_iter()
        .filter(|k| !is_expected(k, &expected_keys))
        .collect::<Vec<_>>();
    unknown.sort();
    for key in unknown {
        eprintln!("WARNING: Unknown environment variable: {key}");
    }
    Ok(())
}

pub fn init<C>(overrides: C) -> Result<Configuration>
where
    C: TopLevelCommandOpts + ConfigOverrider,
{
    println!(
        "Loading configuration from {}",
        &overrides.general_config().config_file
    );

    let defaults = ConfigurationBuilder::default().build()?;
    let figment_config = Figment::from(Serialized::defaults(&defaults))
        .merge(
            FileAdapter::wrap(Toml::file(&overrides.general_config().config_file))
                .ignore(&IGNORED_FILE_KEYS),
        )
        .merge(env_variable_provider());
    let mut config: Configuration = figment_config
        .extract()
        .context("while reading the configuration")?;

    overrides.override_config(&mut config);
    if config.verbose {
        println!("Configuration: {:#?}", &config);
    }
    warn_about_unknown_env_variables(&defaults)?;
    if config.callback_options.enabled && config.callback_options.auth_token.unsecure().is_empty()
    {
        bail!("The refresh callback is enabled, but `callback_options.auth_token` is empty. Set it, or disable the callback.");
    }
    if config.update_interval_seconds == 0 {
        bail!("`update_interval_seconds` must be positive");
    }
    Ok(config)
}
