//! Directory commands - authenticate, user, groups, attributes

use anyhow::{Context, Result};
use serde::Serialize;
use warden_core::types::PrincipalId;
use warden_directory::TenantDirectory;

use super::CommandContext;

#[derive(Serialize)]
struct AuthenticationResult {
    principal: String,
    authenticated: bool,
}

/// Parse `user`, defaulting to the tenant's first store for a bare name
fn principal(ctx: &CommandContext, tenant: &str, user: &str) -> Result<PrincipalId> {
    let default_domain = ctx
        .tenant(tenant)?
        .stores
        .first()
        .map(|s| s.name.clone())
        .unwrap_or_default();
    Ok(PrincipalId::parse(user, &default_domain)?)
}

async fn finish(directory: TenantDirectory, tenant: &str) {
    directory.clean_tenant(tenant).await;
}

pub async fn authenticate(ctx: &CommandContext, tenant: &str, user: &str, password: &str) -> Result<()> {
    let principal = principal(ctx, tenant, user)?;
    let directory = ctx.directory(tenant)?;

    let result = directory
        .provider_for(tenant, &principal)?
        .authenticate(&principal, password)
        .await;
    finish(directory, tenant).await;

    let id = result.with_context(|| format!("authentication of {} failed", principal))?;
    let output = AuthenticationResult {
        principal: id.upn(),
        authenticated: true,
    };
    ctx.emit(&output, || format!("Authenticated {}", output.principal))
}

pub async fn user(ctx: &CommandContext, tenant: &str, user: &str) -> Result<()> {
    let principal = principal(ctx, tenant, user)?;
    let directory = ctx.directory(tenant)?;

    let result = directory.provider_for(tenant, &principal)?.find_user(&principal).await;
    finish(directory, tenant).await;

    let found = result?;
    ctx.emit(&found, || {
        let mut out = format!("{}", found.id);
        for (label, value) in [
            ("first name", &found.detail.first_name),
            ("last name", &found.detail.last_name),
            ("email", &found.detail.email),
            ("UPN", &found.detail.user_principal_name),
            ("object id", &found.object_id),
        ] {
            if let Some(value) = value {
                out.push_str(&format!("\n  {}: {}", label, value));
            }
        }
        out.push_str(&format!(
            "\n  disabled: {}\n  locked: {}\n  password expired: {}",
            found.disabled, found.locked, found.password_expired
        ));
        out
    })
}

pub async fn groups(ctx: &CommandContext, tenant: &str, user: &str, nested: bool) -> Result<()> {
    let principal = principal(ctx, tenant, user)?;
    let directory = ctx.directory(tenant)?;

    let provider = directory.provider_for(tenant, &principal)?;
    let result = if nested {
        provider.find_nested_parent_groups(&principal).await
    } else {
        provider.find_direct_parent_groups(&principal).await
    };
    finish(directory, tenant).await;

    let info = result?;
    ctx.emit(&info, || {
        let names: Vec<String> = info.groups.iter().map(|g| g.id.netbios()).collect();
        if names.is_empty() {
            format!("{} belongs to no groups", principal)
        } else {
            names.join("\n")
        }
    })
}

pub async fn attributes(ctx: &CommandContext, tenant: &str, user: &str, claims: &[String]) -> Result<()> {
    let principal = principal(ctx, tenant, user)?;
    let directory = ctx.directory(tenant)?;

    let names: Vec<&str> = claims.iter().map(String::as_str).collect();
    let result = directory
        .provider_for(tenant, &principal)?
        .get_attributes(&principal, &names)
        .await;
    finish(directory, tenant).await;

    let values = result?;
    ctx.emit(&values, || {
        values
            .iter()
            .map(|v| format!("{}: {}", v.name, v.values.join(", ")))
            .collect::<Vec<_>>()
            .join("\n")
    })
}
