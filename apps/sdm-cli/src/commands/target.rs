// target.rs — Target subcommands: set, list, remove.

use clap::Subcommand;
use sdm_fingerprint::Fingerprint;

use super::fingerprint::extract;
use super::Context;

#[derive(Subcommand)]
pub enum TargetCommands {
    /// Adopt the checkout's current fingerprints as targets.
    Set {
        /// Fingerprint names to adopt (all when omitted).
        names: Vec<String>,
    },
    /// Print the repository's targets.
    List,
    /// Forget one target.
    Remove {
        name: String,
    },
}

pub fn execute(cmd: &TargetCommands, ctx: &Context) -> anyhow::Result<()> {
    let machine = ctx.machine()?;
    let store = machine.targets();

    match cmd {
        TargetCommands::Set { names } => {
            let chosen = select(extract(ctx)?, names)?;
            for fp in &chosen {
                store.put(&ctx.repo, fp.clone())?;
            }
            println!("Set {} target(s) for {}", chosen.len(), ctx.repo);
            for fp in &chosen {
                println!("  {} ({})", fp.name, fp.short_sha());
            }
            Ok(())
        }
        TargetCommands::List => {
            let targets = store.list(&ctx.repo)?;
            println!("{}", serde_json::to_string_pretty(&targets)?);
            Ok(())
        }
        TargetCommands::Remove { name } => {
            if store.remove(&ctx.repo, name)? {
                println!("Removed target {} for {}", name, ctx.repo);
                Ok(())
            } else {
                anyhow::bail!("no target named '{}' for {}", name, ctx.repo)
            }
        }
    }
}

/// The named fingerprints, or all of them when no names are given.
fn select(current: Vec<Fingerprint>, names: &[String]) -> anyhow::Result<Vec<Fingerprint>> {
    if names.is_empty() {
        return Ok(current);
    }
    let mut chosen = Vec::with_capacity(names.len());
    for name in names {
        match current.iter().find(|fp| &fp.name == name) {
            Some(fp) => chosen.push(fp.clone()),
            None => anyhow::bail!("the checkout has no fingerprint named '{}'", name),
        }
    }
    Ok(chosen)
}
