//! Interactive collection of everything a new panel needs.

use super::target::DeploymentTarget;
use super::StepContext;
use crate::credentials::{self, ValidationError};
use crate::error::WizardResult;
use crate::operator::Operator;
use std::io;

pub const DEFAULT_PROXY_IPS: &str = "bpb.yousef.isegaro.com";
pub const DEFAULT_FALLBACK: &str = "speed.cloudflare.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelDefaults {
    pub proxy_ips: String,
    pub fallback: String,
}

impl Default for PanelDefaults {
    fn default() -> Self {
        Self {
            proxy_ips: DEFAULT_PROXY_IPS.to_string(),
            fallback: DEFAULT_FALLBACK.to_string(),
        }
    }
}

/// Operator-facing panel parameters, fixed before anything is provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelSettings {
    pub uuid: String,
    pub trojan_password: String,
    pub proxy_ips: String,
    pub fallback: String,
    pub sub_path: String,
    pub custom_domain: Option<String>,
}

pub fn choose_target(operator: &mut dyn Operator) -> io::Result<DeploymentTarget> {
    loop {
        match operator
            .ask("Please enter 1 for Workers or 2 for Pages deployment:")?
            .as_str()
        {
            "1" => return Ok(DeploymentTarget::Worker),
            "2" => return Ok(DeploymentTarget::Pages),
            _ => operator.failure("Wrong selection, Please choose 1 or 2 only!"),
        }
    }
}

/// Pick the panel name: a generated one unless overridden, and confirmed by
/// the operator when a deployment of that kind already exists.
///
/// The flag is true when the operator agreed to override an existing one.
pub async fn negotiate_name(
    ctx: &mut StepContext<'_>,
    target: DeploymentTarget,
) -> WizardResult<(String, bool)> {
    let platform = ctx.platform;
    let account_id = ctx.account_id;

    loop {
        let mut name = credentials::generate_subdomain();
        ctx.operator
            .info(&format!("The random generated name (Subdomain) is: {}", name));

        let answer = ctx
            .operator
            .ask("Please enter a custom name or press ENTER to use generated one:")?;
        if !answer.is_empty() {
            if let Err(e) = credentials::validate_subdomain(&answer) {
                ctx.operator.failure(&e.to_string());
                continue;
            }
            name = answer;
        }

        ctx.operator.step("Checking domain availability...");
        let exists = ctx
            .attempt("Failed to check domain availability.", || {
                target.exists(platform, account_id, &name)
            })
            .await?;

        if exists
            && !ctx.operator.confirm(
                "This already exists! This will RESET all panel settings, would you like to override it?",
            )?
        {
            continue;
        }

        if !exists {
            ctx.operator.success("Available!");
        }
        return Ok((name, exists));
    }
}

/// Show `generated`, then keep asking until the operator accepts it (empty
/// answer) or enters a value `validate` accepts.
fn prompt_value<V>(
    operator: &mut dyn Operator,
    label: &str,
    generated: String,
    validate: V,
) -> io::Result<String>
where
    V: Fn(&str) -> Result<(), ValidationError>,
{
    operator.info(&format!("The random generated {} is: {}", label, generated));
    loop {
        let answer = operator.ask(&format!(
            "Please enter a custom {} or press ENTER to use generated one:",
            label
        ))?;
        if answer.is_empty() {
            return Ok(generated);
        }
        match validate(&answer) {
            Ok(()) => return Ok(answer),
            Err(e) => operator.failure(&e.to_string()),
        }
    }
}

fn prompt_proxy_ips(operator: &mut dyn Operator, default: &str) -> io::Result<String> {
    operator.info(&format!("The default Proxy IP is: {}", default));
    loop {
        let answer =
            operator.ask("Please enter custom Proxy IP/Domains or press ENTER to use default:")?;
        if answer.is_empty() {
            return Ok(default.to_string());
        }
        match credentials::validate_proxy_list(&answer) {
            Ok(()) => return Ok(answer),
            Err(errors) => {
                for e in errors {
                    operator.failure(&e.to_string());
                }
            }
        }
    }
}

pub fn collect_settings(
    operator: &mut dyn Operator,
    defaults: &PanelDefaults,
) -> io::Result<PanelSettings> {
    let uuid = prompt_value(
        operator,
        "UUID",
        credentials::generate_uuid(),
        credentials::validate_uuid,
    )?;
    let trojan_password = prompt_value(
        operator,
        "Trojan password",
        credentials::generate_password(),
        credentials::validate_password,
    )?;
    let proxy_ips = prompt_proxy_ips(operator, &defaults.proxy_ips)?;

    operator.info(&format!("The default Fallback domain is: {}", defaults.fallback));
    let fallback = match operator
        .ask("Please enter a custom Fallback domain or press ENTER to use default:")?
    {
        answer if answer.is_empty() => defaults.fallback.clone(),
        answer => answer,
    };

    let sub_path = prompt_value(
        operator,
        "Subscription path",
        credentials::generate_sub_path(),
        credentials::validate_sub_path,
    )?;

    operator.info(
        "You can set Custom domain ONLY if you registered domain on this cloudflare account.",
    );
    let custom_domain = Some(
        operator.ask("Please enter a custom domain (if you have any) or press ENTER to ignore:")?,
    )
    .filter(|d| !d.is_empty());

    Ok(PanelSettings {
        uuid,
        trojan_password,
        proxy_ips,
        fallback,
        sub_path,
        custom_domain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Script {
        answers: VecDeque<String>,
        failures: Vec<String>,
    }

    impl Script {
        fn new(answers: &[&str]) -> Self {
            Self {
                answers: answers.iter().map(|a| a.to_string()).collect(),
                failures: Vec::new(),
            }
        }
    }

    impl Operator for Script {
        fn ask(&mut self, _prompt: &str) -> io::Result<String> {
            self.answers
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no more answers"))
        }
        fn step(&mut self, _: &str) {}
        fn info(&mut self, _: &str) {}
        fn warning(&mut self, _: &str) {}
        fn success(&mut self, _: &str) {}
        fn failure(&mut self, message: &str) {
            self.failures.push(message.to_string());
        }
        fn progress(&mut self, _: &str) {}
    }

    #[test]
    fn test_choose_target_reprompts_on_invalid_input() {
        let mut op = Script::new(&["3", "", "2"]);
        assert_eq!(choose_target(&mut op).unwrap(), DeploymentTarget::Pages);
        assert_eq!(op.failures.len(), 2);
    }

    #[test]
    fn test_collect_settings_defaults() {
        let mut op = Script::new(&["", "", "", "", "", ""]);
        let settings = collect_settings(&mut op, &PanelDefaults::default()).unwrap();

        assert!(credentials::validate_uuid(&settings.uuid).is_ok());
        assert_eq!(settings.trojan_password.len(), credentials::PASSWORD_LENGTH);
        assert_eq!(settings.proxy_ips, DEFAULT_PROXY_IPS);
        assert_eq!(settings.fallback, DEFAULT_FALLBACK);
        assert_eq!(settings.sub_path.len(), credentials::SUB_PATH_LENGTH);
        assert_eq!(settings.custom_domain, None);
        assert!(op.failures.is_empty());
    }

    #[test]
    fn test_collect_settings_overrides_with_reprompts() {
        let mut op = Script::new(&[
            "not-a-uuid",
            "4f1c0b9e-6a53-4e0c-9d07-0d5a3f0f4c11",
            "pass word",
            "Passw0rd!",
            "1.1.1.1, bad_host",
            "1.1.1.1, proxy.example.com:443",
            "anything goes here",
            "sub/path",
            "sub-path",
            "panel.example.com",
        ]);
        let settings = collect_settings(&mut op, &PanelDefaults::default()).unwrap();

        assert_eq!(settings.uuid, "4f1c0b9e-6a53-4e0c-9d07-0d5a3f0f4c11");
        assert_eq!(settings.trojan_password, "Passw0rd!");
        assert_eq!(settings.proxy_ips, "1.1.1.1, proxy.example.com:443");
        assert_eq!(settings.fallback, "anything goes here");
        assert_eq!(settings.sub_path, "sub-path");
        assert_eq!(settings.custom_domain.as_deref(), Some("panel.example.com"));
        assert_eq!(op.failures.len(), 4);
    }
}
