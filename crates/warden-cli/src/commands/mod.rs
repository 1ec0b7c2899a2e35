//! CLI command implementations

pub mod cert;
pub mod config;
pub mod directory;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::Serialize;
use warden_core::config::TenantConfig;
use warden_core::WardenConfig;
use warden_directory::{ConnectionPoolManager, Ldap3Connector, TenantDirectory};

use crate::OutputFormat;

/// Context passed to all commands
pub struct CommandContext {
    pub config: WardenConfig,
    pub output_format: OutputFormat,
}

impl CommandContext {
    pub fn new(config: WardenConfig, output_format: OutputFormat) -> Self {
        Self {
            config,
            output_format,
        }
    }

    /// Check if output should be JSON
    pub fn is_json(&self) -> bool {
        matches!(self.output_format, OutputFormat::Json)
    }

    pub fn tenant(&self, name: &str) -> Result<&TenantConfig> {
        self.config
            .tenant(name)
            .ok_or_else(|| anyhow!("tenant '{}' is not configured", name))
    }

    /// Directory with the named tenant initialised against live LDAP servers
    pub fn directory(&self, tenant: &str) -> Result<TenantDirectory> {
        let tenant = self.tenant(tenant)?;
        let connector = Arc::new(Ldap3Connector::new(&self.config.pool));
        let pools = Arc::new(ConnectionPoolManager::new(connector, self.config.pool.clone()));
        let directory = TenantDirectory::new(pools);
        directory.init_tenant(tenant)?;
        Ok(directory)
    }

    /// Print `value` as JSON, or the text rendering otherwise
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        if self.is_json() {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text());
        }
        Ok(())
    }
}
