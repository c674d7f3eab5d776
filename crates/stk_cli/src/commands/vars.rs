//! Vars command - Print the resolved variables of a configuration.

use anyhow::Result;
use clap::Args;
use serde_json::Value;

use stk_config::Context;

use super::ConfigArgs;

#[derive(Args)]
pub struct VarsArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Also print the captured process environment (`environ`)
    #[arg(long)]
    pub include_environ: bool,
}

pub fn execute(args: VarsArgs) -> Result<()> {
    let config = args.config.load()?;

    let vars = printable(&config.vars, args.include_environ);
    print!("{}", serde_yaml::to_string(&Value::Object(vars))?);

    Ok(())
}

fn printable(vars: &Context, include_environ: bool) -> Context {
    vars.iter()
        .filter(|(k, _)| include_environ || k.as_str() != "environ")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
