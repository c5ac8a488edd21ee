//! Update or delete panels that already exist on the account.

use super::target::DeploymentTarget;
use super::StepContext;
use crate::bundle::BundleSource;
use crate::error::WizardResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelRecord {
    pub name: String,
    pub target: DeploymentTarget,
}

/// Every Worker and Pages project on the account. A failing listing is
/// reported and counts as zero panels of that kind.
pub async fn list_panels(ctx: &mut StepContext<'_>) -> Vec<PanelRecord> {
    let mut panels = Vec::new();

    match ctx.platform.list_workers(ctx.account_id).await {
        Ok(workers) => panels.extend(workers.into_iter().map(|w| PanelRecord {
            name: w.id,
            target: DeploymentTarget::Worker,
        })),
        Err(e) => {
            tracing::warn!(error = %e, "listing workers failed");
            ctx.operator.failure("Failed to get workers list.");
            ctx.operator.info(&e.to_string());
        }
    }

    match ctx.platform.list_pages_projects(ctx.account_id).await {
        Ok(projects) => panels.extend(projects.into_iter().map(|p| PanelRecord {
            name: p.name,
            target: DeploymentTarget::Pages,
        })),
        Err(e) => {
            tracing::warn!(error = %e, "listing pages projects failed");
            ctx.operator.failure("Failed to get pages list.");
            ctx.operator.info(&e.to_string());
        }
    }

    panels
}

fn choose_panel<'p>(
    ctx: &mut StepContext<'_>,
    panels: &'p [PanelRecord],
) -> std::io::Result<&'p PanelRecord> {
    loop {
        let answer = ctx
            .operator
            .ask("Please enter the number you want to modify:")?;
        match answer.parse::<usize>() {
            Ok(index) if (1..=panels.len()).contains(&index) => return Ok(&panels[index - 1]),
            _ => ctx.operator.failure("Invalid selection, please try again."),
        }
    }
}

enum Action {
    Update,
    Delete,
}

fn choose_action(ctx: &mut StepContext<'_>) -> std::io::Result<Action> {
    loop {
        match ctx
            .operator
            .ask("Please enter 1 to update or 2 to delete panel:")?
            .as_str()
        {
            "1" => return Ok(Action::Update),
            "2" => return Ok(Action::Delete),
            _ => ctx
                .operator
                .failure("Wrong selection, Please choose 1 or 2 only!"),
        }
    }
}

/// List, pick, modify; repeat until the operator is done.
pub async fn modify_panels(
    ctx: &mut StepContext<'_>,
    bundle: &dyn BundleSource,
) -> WizardResult<()> {
    let platform = ctx.platform;
    let account_id = ctx.account_id;

    loop {
        ctx.operator.step("Getting panels list...");
        let panels = list_panels(ctx).await;
        if panels.is_empty() {
            ctx.operator.failure("No Workers or Pages found, Exiting...");
            return Ok(());
        }

        ctx.operator
            .success(&format!("Found {} Workers and pages:", panels.len()));
        for (i, panel) in panels.iter().enumerate() {
            ctx.operator
                .info(&format!(" {}. {} - {}", i + 1, panel.name, panel.target));
        }

        let panel = choose_panel(ctx, &panels)?;
        let name = panel.name.as_str();
        let target = panel.target;

        match choose_action(ctx)? {
            Action::Update => {
                ctx.operator.step("Downloading worker.js...");
                let script = ctx
                    .attempt("Failed to download worker.js.", || bundle.load())
                    .await?;
                ctx.attempt("Failed to update panel.", || {
                    target.update(platform, account_id, name, &script)
                })
                .await?;
                ctx.operator.success("Panel updated successfully!");
            }
            Action::Delete => {
                target.delete(ctx, name).await?;
                ctx.operator.success("Panel deleted successfully!");
            }
        }

        if !ctx
            .operator
            .confirm("Would you like to modify another panel?")?
        {
            return Ok(());
        }
    }
}
