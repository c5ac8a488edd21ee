use super::{DeploymentSpec, StepContext};
use crate::error::WizardResult;
use crate::platform::{
    match_zone, Platform, PlatformError, PlatformResult, PAGES_DEV_HOST, WORKERS_DEV_HOST,
};
use std::fmt;

/// The two deployment shapes a panel can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentTarget {
    /// One script on the account's `workers.dev` subdomain.
    Worker,
    /// A Pages project whose `_worker.js` entrypoint is the bundle.
    Pages,
}

impl fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentTarget::Worker => write!(f, "workers"),
            DeploymentTarget::Pages => write!(f, "pages"),
        }
    }
}

pub fn panel_url(host: &str) -> String {
    format!("https://{}/panel", host)
}

impl DeploymentTarget {
    pub async fn exists(
        &self,
        platform: &dyn Platform,
        account_id: &str,
        name: &str,
    ) -> PlatformResult<bool> {
        match self {
            DeploymentTarget::Worker => platform.worker_exists(account_id, name).await,
            DeploymentTarget::Pages => platform.pages_project_exists(account_id, name).await,
        }
    }

    /// Upload the bundle in this shape, attach the custom domain if one was
    /// given, and return the panel URL.
    ///
    /// The domain is only attached once the base deployment has succeeded.
    pub async fn deploy(
        &self,
        ctx: &mut StepContext<'_>,
        spec: &DeploymentSpec,
        script: &[u8],
    ) -> WizardResult<String> {
        match self {
            DeploymentTarget::Worker => deploy_worker(ctx, spec, script).await,
            DeploymentTarget::Pages => deploy_pages(ctx, spec, script).await,
        }
    }

    /// Replace the script content only; bindings and settings stay untouched.
    pub async fn update(
        &self,
        platform: &dyn Platform,
        account_id: &str,
        name: &str,
        script: &[u8],
    ) -> PlatformResult<()> {
        match self {
            DeploymentTarget::Worker => {
                platform
                    .update_worker_content(account_id, name, script.to_vec())
                    .await
            }
            DeploymentTarget::Pages => {
                let project = platform.get_pages_project(account_id, name).await?;
                platform
                    .create_pages_deployment(account_id, &project.name, script.to_vec())
                    .await
            }
        }
    }

    pub async fn delete(&self, ctx: &mut StepContext<'_>, name: &str) -> WizardResult<()> {
        let platform = ctx.platform;
        let account_id = ctx.account_id;

        match self {
            DeploymentTarget::Worker => {
                ctx.attempt("Failed to delete panel.", || {
                    platform.delete_worker(account_id, name)
                })
                .await
            }
            DeploymentTarget::Pages => {
                let domains = ctx
                    .attempt("Failed to list project domains.", || {
                        platform.list_pages_domains(account_id, name)
                    })
                    .await?;

                if !domains.is_empty() {
                    ctx.operator.step("Detaching custom domains...");
                }
                for domain in &domains {
                    ctx.attempt("Failed to detach custom domain.", || {
                        platform.delete_pages_domain(account_id, name, &domain.name)
                    })
                    .await?;
                    ctx.operator.success(&format!(
                        "Custom domain {} detached successfully!",
                        domain.name
                    ));
                }

                ctx.attempt("Failed to delete panel.", || {
                    platform.delete_pages_project(account_id, name)
                })
                .await
            }
        }
    }
}

async fn attach_worker_domain(
    platform: &dyn Platform,
    account_id: &str,
    script: &str,
    hostname: &str,
) -> PlatformResult<()> {
    let zones = platform.list_zones(account_id).await?;
    let zone = match_zone(hostname, &zones).ok_or_else(|| {
        PlatformError::Other(format!(
            "Could not find a zone for {} in your account",
            hostname
        ))
    })?;
    platform
        .attach_worker_domain(account_id, &zone.id, hostname, script)
        .await
}

async fn deploy_worker(
    ctx: &mut StepContext<'_>,
    spec: &DeploymentSpec,
    script: &[u8],
) -> WizardResult<String> {
    let platform = ctx.platform;
    let account_id = ctx.account_id;
    let name = spec.name.as_str();
    let bindings = spec.bindings();

    ctx.operator.step("Creating Worker...");
    ctx.attempt("Failed to deploy worker.", || {
        platform.upload_worker(account_id, name, &bindings, script.to_vec())
    })
    .await?;
    ctx.operator.success("Worker created successfully!");

    ctx.attempt("Failed to enable worker subdomain.", || {
        platform.enable_worker_subdomain(account_id, name)
    })
    .await?;
    ctx.operator.success("Worker subdomain enabled successfully!");

    if let Some(domain) = spec.settings.custom_domain.as_deref() {
        ctx.attempt("Failed to add custom domain.", || {
            attach_worker_domain(platform, account_id, name, domain)
        })
        .await?;
        ctx.operator.success("Custom domain added to worker successfully!");
        return Ok(panel_url(domain));
    }

    let subdomain = ctx
        .attempt("Failed to get workers subdomain.", || {
            platform.workers_subdomain(account_id)
        })
        .await?;
    Ok(panel_url(&format!("{}.{}.{}", name, subdomain, WORKERS_DEV_HOST)))
}

async fn deploy_pages(
    ctx: &mut StepContext<'_>,
    spec: &DeploymentSpec,
    script: &[u8],
) -> WizardResult<String> {
    let platform = ctx.platform;
    let account_id = ctx.account_id;
    let name = spec.name.as_str();
    let bindings = spec.bindings();

    // Project names are unique per account; the old one has to go first.
    if spec.replaces_existing {
        ctx.operator.step("Removing existing Pages project...");
        DeploymentTarget::Pages.delete(ctx, name).await?;
        ctx.operator.success("Existing Pages project removed!");
    }

    ctx.operator.step("Creating Pages project...");
    let project = ctx
        .attempt("Failed to create project.", || {
            platform.create_pages_project(account_id, name, &bindings)
        })
        .await?;
    ctx.operator.success("Page created successfully!");

    ctx.operator.step("Deploying Pages project...");
    ctx.attempt("Failed to deploy project.", || {
        platform.create_pages_deployment(account_id, &project.name, script.to_vec())
    })
    .await?;
    ctx.operator.success("Page deployed successfully!");

    if let Some(domain) = spec.settings.custom_domain.as_deref() {
        ctx.attempt("Failed to add custom domain.", || {
            platform.add_pages_domain(account_id, &project.name, domain)
        })
        .await?;
        ctx.operator.success("Custom domain added to pages successfully!");
        ctx.operator.warning(&format!(
            "You should create a CNAME record with Name: {} and Target: {}.{}, otherwise your custom domain will not work.",
            domain, project.name, PAGES_DEV_HOST
        ));
        return Ok(panel_url(domain));
    }

    ctx.operator.success("It takes up to 5 minutes to access panel, please wait...");
    let host = if project.subdomain.is_empty() {
        format!("{}.{}", project.name, PAGES_DEV_HOST)
    } else {
        project.subdomain.clone()
    };
    Ok(panel_url(&host))
}
