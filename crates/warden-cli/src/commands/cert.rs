//! validate-cert command - run a client certificate through the tenant's policy

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::debug;
use warden_certs::trust::load_pem_certificates;
use warden_certs::{CertPathValidator, CrlCacheManager};

use super::CommandContext;

#[derive(Serialize)]
struct ValidationResult {
    tenant: String,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

pub async fn execute(ctx: &CommandContext, tenant: &str, cert: &Path, chain: &[PathBuf]) -> Result<()> {
    let tenant_config = ctx.tenant(tenant)?;

    let mut certs = load_pem_certificates(cert)?;
    for path in chain {
        certs.extend(load_pem_certificates(path)?);
    }
    debug!("Validating chain of {} certificate(s)", certs.len());

    let caches = CrlCacheManager::new();
    let validator = CertPathValidator::for_tenant(tenant_config, &caches, &ctx.config.http)?;
    let outcome = validator.validate(&certs, &tenant_config.cert_policy).await;

    let result = ValidationResult {
        tenant: validator.tenant().to_string(),
        valid: outcome.is_ok(),
        code: outcome.as_ref().err().map(|e| e.code()),
        message: outcome.as_ref().err().map(|e| e.to_string()),
    };
    ctx.emit(&result, || match &result.message {
        None => format!("Certificate accepted for tenant {}", result.tenant),
        Some(message) => message.clone(),
    })?;

    if let Err(e) = outcome {
        bail!("certificate rejected: {}", e.code());
    }
    Ok(())
}
