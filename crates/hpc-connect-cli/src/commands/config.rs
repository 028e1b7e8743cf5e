//! Implementation of the `config` subcommand.

use hpc_connect_config::Config;
use hpc_connect_config::ScopeId;

use crate::cli::ConfigAction;
use crate::overrides::parse_override;

/// Resolves a `--scope NAME` argument into a [`ScopeId`].
fn scope_by_name(name: &str) -> anyhow::Result<ScopeId> {
    ScopeId::ORDER
        .into_iter()
        .find(|scope| scope.name() == name)
        .ok_or_else(|| anyhow::anyhow!("unknown config scope `{name}`, expected one of: {:?}", ScopeId::ORDER.map(ScopeId::name)))
}

/// Runs the `config` subcommand.
pub fn run(action: ConfigAction, mut config: Config) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show { scope } => match scope {
            Some(name) => {
                let id = scope_by_name(&name)?;
                let value = config.scopes().find(|(scope_name, _)| *scope_name == id.name()).map(|(_, value)| value);
                println!("{}", serde_yaml_ng::to_string(&value)?);
            }
            None => {
                // Without `--scope`, print every scope's own unmerged
                // contents rather than just the effective merge, so a user
                // can see which scope a value actually came from.
                let scopes: indexmap::IndexMap<&str, &hpc_connect_config::ConfigValue> = config.scopes().collect();
                println!("{}", serde_yaml_ng::to_string(&scopes)?);
            }
        },
        ConfigAction::Add { scope, entry } => {
            let id = scope_by_name(&scope)?;
            let (path, value) = parse_override(&entry)?;
            config.add(&path, value, id)?;
            println!("added `{entry}` to scope `{scope}`");
        }
    }
    Ok(())
}
