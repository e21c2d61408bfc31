use clap::Subcommand;

use super::resolve::ResolveArgs;
use super::run::RunArgs;
use super::validate::ValidateArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Parse a playbook and report every validation issue
    Validate(ValidateArgs),

    /// Replay a playbook against a fixture page
    Run(RunArgs),

    /// Resolve one step's target and show how it was found
    Resolve(ResolveArgs),
}
