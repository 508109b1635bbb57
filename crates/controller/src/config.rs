//! Process configuration
//!
//! Layers an optional TOML file (path from `TE_CONFIG`, default
//! `controller.toml`) under `TE__`-prefixed environment variables, e.g.
//! `TE__API_PORT=9100` or `TE__CONTROLLER__EPSILON=0.2`.

use anyhow::{Context, Result};
use controller_lib::ControllerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "controller.toml";

/// Settings of the controller process
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// API server port for health, metrics and introspection
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Name attached to structured log events
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Capacity of the incoming notification queue
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer_size: usize,

    #[serde(default)]
    pub controller: ControllerConfig,
}

fn default_api_port() -> u16 {
    8080
}

fn default_instance() -> String {
    "te-controller".to_string()
}

fn default_notification_buffer() -> usize {
    1024
}

impl Settings {
    /// Load from the configured file and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("TE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path, true)
    }

    pub fn load_from(path: &Path, with_env: bool) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from(path).required(false));

        if with_env {
            builder = builder.add_source(
                config::Environment::with_prefix("TE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("controller.uplink_port_list")
                    .with_list_parse_key("controller.host_ports")
                    .with_list_parse_key("controller.edge_datapath_ids"),
            );
        }

        let settings: Settings = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.controller.validate()?;
        if settings.notification_buffer_size == 0 {
            anyhow::bail!("notification_buffer_size must be at least 1");
        }
        Ok(settings)
    }
}
