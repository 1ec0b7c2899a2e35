//! check-config command - validate the loaded configuration

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use super::CommandContext;

#[derive(Serialize)]
struct TenantSummary {
    name: String,
    stores: Vec<String>,
    trust_anchors: usize,
    revocation: bool,
}

pub fn execute(ctx: &CommandContext) -> Result<()> {
    ctx.config.validate()?;
    info!("Configuration is valid");

    let summary: Vec<TenantSummary> = ctx
        .config
        .tenants
        .iter()
        .map(|t| TenantSummary {
            name: t.name.clone(),
            stores: t.stores.iter().map(|s| s.name.clone()).collect(),
            trust_anchors: t.trust_anchors.len(),
            revocation: t.cert_policy.revocation_check_enabled,
        })
        .collect();

    ctx.emit(&summary, || {
        let mut out = format!("{} tenant(s) configured", summary.len());
        for tenant in &summary {
            out.push_str(&format!(
                "\n  {}: stores [{}], {} trust anchor file(s), revocation {}",
                tenant.name,
                tenant.stores.join(", "),
                tenant.trust_anchors,
                if tenant.revocation { "on" } else { "off" }
            ));
        }
        out
    })
}
