//! Rules command handler.

use super::to_json;
use bundlescope_core::AppResult;
use bundlescope_segment::RuleSet;
use clap::Args;

/// Default security patterns and library signatures.
pub const DEFAULT_RULES: &str = include_str!("../../rules/default.yaml");

/// Print the bundled default rule table
#[derive(Args, Debug)]
pub struct RulesCommand {
    /// Output as JSON instead of the YAML source
    #[arg(long)]
    pub json: bool,
}

impl RulesCommand {
    pub fn execute(&self) -> AppResult<()> {
        if self.json {
            let rules = RuleSet::from_yaml_str(DEFAULT_RULES)?;
            println!("{}", to_json(&rules)?);
        } else {
            print!("{}", DEFAULT_RULES);
        }
        Ok(())
    }
}
