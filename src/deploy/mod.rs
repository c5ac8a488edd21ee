//! The wizard state machine: login, then create a panel or modify existing ones.
//!
//! Every external call runs through the [`RetryPolicy`] carried by the
//! [`StepContext`], so a failing step is reported and retried (or the run is
//! aborted) without the step itself knowing about terminal I/O.

pub mod modify;
pub mod settings;
pub mod target;

use crate::auth::Authenticator;
use crate::bundle::BundleSource;
use crate::error::{WizardError, WizardResult};
use crate::operator::{Operator, UrlOpener};
use crate::platform::{Account, Connector, NamespaceRef, PanelBindings, Platform, PlatformError};
use crate::poller::{Probe, ReadinessPoller};
use crate::retry::{RetryPolicy, RETRY_PROMPT};
use chrono::{DateTime, Local, TimeZone};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

pub use settings::{PanelDefaults, PanelSettings};
pub use target::DeploymentTarget;

/// Title of the KV namespace created for a new panel.
pub fn namespace_title<Tz: TimeZone>(now: DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    format!("panel-kv-{}", now.format("%Y-%m-%d_%H-%M-%S"))
}

/// Everything a panel is deployed with. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSpec {
    pub name: String,
    pub settings: PanelSettings,
    pub namespace: NamespaceRef,
    /// A deployment with this name exists and the operator chose to override it.
    pub replaces_existing: bool,
}

impl DeploymentSpec {
    pub fn bindings(&self) -> PanelBindings {
        PanelBindings {
            namespace_id: self.namespace.id.clone(),
            uuid: self.settings.uuid.clone(),
            trojan_password: self.settings.trojan_password.clone(),
            proxy_ips: self.settings.proxy_ips.clone(),
            fallback: self.settings.fallback.clone(),
            sub_path: self.settings.sub_path.clone(),
        }
    }
}

/// Logged-in platform client and the account it acts on, created once per run.
#[derive(Clone)]
pub struct PlatformSession {
    pub platform: Arc<dyn Platform>,
    pub account: Account,
}

/// What one orchestration step needs: who to talk to, where, and how to retry.
pub struct StepContext<'a> {
    pub operator: &'a mut dyn Operator,
    pub retry: RetryPolicy,
    pub platform: &'a dyn Platform,
    pub account_id: &'a str,
}

impl StepContext<'_> {
    pub async fn attempt<T, E, F, Fut>(&mut self, failure: &str, step: F) -> WizardResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.retry.run(&mut *self.operator, failure, step).await
    }
}

/// External collaborators the wizard drives.
#[derive(Clone)]
pub struct Services {
    pub authenticator: Arc<dyn Authenticator>,
    pub connector: Arc<dyn Connector>,
    pub bundle: Arc<dyn BundleSource>,
    pub probe: Arc<dyn Probe>,
    pub opener: Arc<dyn UrlOpener>,
}

#[derive(Debug, Clone, Default)]
pub struct WizardOptions {
    pub retry: RetryPolicy,
    pub poller: ReadinessPoller,
    pub defaults: PanelDefaults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Create,
    Modify,
}

/// A panel that was deployed and answered its readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelDeployment {
    pub name: String,
    pub target: DeploymentTarget,
    pub url: String,
}

pub struct Wizard<O: Operator> {
    operator: O,
    services: Services,
    options: WizardOptions,
    session: Option<PlatformSession>,
}

async fn first_account(platform: &dyn Platform) -> Result<Account, PlatformError> {
    platform
        .list_accounts()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| PlatformError::Other("No Cloudflare account found for this login".into()))
}

impl<O: Operator> Wizard<O> {
    pub fn new(operator: O, services: Services, options: WizardOptions) -> Self {
        Self {
            operator,
            services,
            options,
            session: None,
        }
    }

    pub fn operator(&self) -> &O {
        &self.operator
    }

    pub async fn run(&mut self) -> WizardResult<()> {
        self.operator
            .info("This wizard will help you to deploy or modify BPB Panel on Cloudflare.");
        self.operator
            .info("Please make sure you have a verified Cloudflare account.");

        match self.choose_mode()? {
            Mode::Create => self.create_panel().await.map(|_| ()),
            Mode::Modify => self.modify_panels().await,
        }
    }

    fn choose_mode(&mut self) -> WizardResult<Mode> {
        loop {
            let answer = self.operator.ask(
                "Please enter 1 to create a panel or 2 to modify an existing panel:",
            )?;
            match answer.as_str() {
                "1" => return Ok(Mode::Create),
                "2" => return Ok(Mode::Modify),
                _ => self
                    .operator
                    .failure("Wrong selection, Please choose 1 or 2 only!"),
            }
        }
    }

    /// Log in and resolve the account on first use; later calls reuse both.
    pub async fn ensure_session(&mut self) -> WizardResult<PlatformSession> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }

        let retry = self.options.retry;
        let authenticator = self.services.authenticator.clone();

        self.operator.step("Logging in to Cloudflare...");
        self.operator
            .info("Complete the login in the browser window that opens.");
        let token = retry
            .run(&mut self.operator, "Failed to log in to Cloudflare.", || {
                authenticator.authenticate()
            })
            .await?;
        self.operator.success("Logged in successfully!");
        tracing::debug!(scopes = token.scope.len(), "received access token");

        let platform = self.services.connector.connect(&token);
        let account = retry
            .run(&mut self.operator, "Failed to get Cloudflare account.", || {
                first_account(platform.as_ref())
            })
            .await?;
        tracing::debug!(account = %account.id, "using Cloudflare account");

        let session = PlatformSession { platform, account };
        self.session = Some(session.clone());
        Ok(session)
    }

    /// The create path: settings, namespace, bundle, upload, domain, readiness.
    pub async fn create_panel(&mut self) -> WizardResult<PanelDeployment> {
        let session = self.ensure_session().await?;

        self.operator.step("Get settings...");
        self.operator.info("You can use Workers or Pages to deploy.");
        self.operator.warning(
            "If you choose Pages, sometimes it takes up to 5 minutes until you can access panel, so please keep calm!",
        );
        let target = settings::choose_target(&mut self.operator)?;

        let mut ctx = StepContext {
            operator: &mut self.operator,
            retry: self.options.retry,
            platform: session.platform.as_ref(),
            account_id: &session.account.id,
        };
        let platform = ctx.platform;
        let account_id = ctx.account_id;

        let (name, replaces_existing) = settings::negotiate_name(&mut ctx, target).await?;
        let panel_settings = settings::collect_settings(ctx.operator, &self.options.defaults)?;

        ctx.operator.step("Creating KV namespace...");
        let namespace = ctx
            .attempt("Failed to create KV.", || {
                let title = namespace_title(Local::now());
                async move { platform.create_namespace(account_id, &title).await }
            })
            .await?;
        ctx.operator.success("KV created successfully!");

        ctx.operator.step("Downloading worker.js...");
        let bundle = self.services.bundle.clone();
        let script = ctx
            .attempt("Failed to download worker.js.", || bundle.load())
            .await?;
        ctx.operator.success("Worker downloaded successfully!");

        let spec = DeploymentSpec {
            name,
            settings: panel_settings,
            namespace,
            replaces_existing,
        };
        let url = target.deploy(&mut ctx, &spec, &script).await?;

        self.await_ready(&url).await?;

        Ok(PanelDeployment {
            name: spec.name,
            target,
            url,
        })
    }

    pub async fn modify_panels(&mut self) -> WizardResult<()> {
        let session = self.ensure_session().await?;
        let mut ctx = StepContext {
            operator: &mut self.operator,
            retry: self.options.retry,
            platform: session.platform.as_ref(),
            account_id: &session.account.id,
        };
        modify::modify_panels(&mut ctx, self.services.bundle.as_ref()).await
    }

    /// Poll until the panel answers, then offer to open it.
    async fn await_ready(&mut self, url: &str) -> WizardResult<()> {
        let poller = self.options.poller;
        let probe = self.services.probe.clone();

        self.operator.step("Waiting for the panel to come online...");
        loop {
            let operator = &mut self.operator;
            let result = poller
                .wait_until_ready(probe.as_ref(), url, |attempt, failure| {
                    operator.progress(&format!("Not ready yet ({}), attempt {}", failure, attempt))
                })
                .await;

            match result {
                Ok(attempts) => {
                    tracing::debug!(attempts, %url, "panel is ready");
                    break;
                }
                Err(e) => {
                    self.operator.failure(&e.to_string());
                    if !self.operator.confirm(RETRY_PROMPT)? {
                        return Err(WizardError::Aborted);
                    }
                }
            }
        }

        self.operator.success(&format!("BPB panel is ready -> {}", url));
        if self
            .operator
            .confirm("Would you like to open BPB panel in browser?")?
        {
            if let Err(e) = self.services.opener.open(url) {
                tracing::warn!(error = %e, "could not launch browser");
                self.operator.failure("Failed to open browser.");
                self.operator.info(url);
            }
        }
        Ok(())
    }
}
