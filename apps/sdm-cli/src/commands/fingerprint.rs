// fingerprint.rs — Fingerprint subcommands: list, check.

use std::sync::Arc;

use clap::Subcommand;
use sdm_core::Deadline;
use sdm_fingerprint::{DiffConfig, DiffWorkflow, Fingerprint};

use super::Context;

#[derive(Subcommand)]
pub enum FingerprintCommands {
    /// Extract every aspect from the checkout.
    List {
        /// Only fingerprints with this name prefix.
        #[arg(long)]
        prefix: Option<String>,
        /// One human-readable line per fingerprint instead of JSON.
        #[arg(long)]
        display: bool,
    },
    /// Compare the checkout with its targets. Never edits the project.
    Check,
}

pub fn execute(cmd: &FingerprintCommands, ctx: &Context) -> anyhow::Result<()> {
    match cmd {
        FingerprintCommands::List { prefix, display } => list(ctx, prefix.as_deref(), *display),
        FingerprintCommands::Check => check(ctx),
    }
}

/// Current fingerprints of the checkout; aspect failures are logged.
pub fn extract(ctx: &Context) -> anyhow::Result<Vec<Fingerprint>> {
    let machine = ctx.machine()?;
    let pass = machine
        .registry()
        .extract_all(ctx.project().as_ref(), Deadline::none());
    for failure in &pass.failures {
        tracing::warn!(aspect = %failure.aspect, error = %failure.error, "aspect extraction failed");
    }
    Ok(pass.fingerprints)
}

fn list(ctx: &Context, prefix: Option<&str>, display: bool) -> anyhow::Result<()> {
    let machine = ctx.machine()?;
    let fingerprints: Vec<Fingerprint> = extract(ctx)?
        .into_iter()
        .filter(|fp| prefix.map_or(true, |p| fp.name.starts_with(p)))
        .collect();

    if !display {
        println!("{}", serde_json::to_string_pretty(&fingerprints)?);
        return Ok(());
    }
    for fp in &fingerprints {
        match machine.registry().owner_of(fp) {
            Ok(aspect) => println!("{:<24} {}", aspect.display_name(), aspect.to_displayable(fp)),
            Err(_) => println!("{:<24} {} ({})", "-", fp.name, fp.short_sha()),
        }
    }
    Ok(())
}

fn check(ctx: &Context) -> anyhow::Result<()> {
    let machine = ctx.machine()?;
    let project = ctx.project();
    let pass = machine.registry().extract_all(project.as_ref(), Deadline::none());
    let mut targets = machine.targets().list(&ctx.repo)?;
    for failure in &pass.failures {
        tracing::warn!(aspect = %failure.aspect, error = %failure.error, "aspect extraction failed");
        // Its targets cannot be checked against a project it could not read.
        targets.retain(|t| {
            machine
                .registry()
                .owner_of(t)
                .map_or(true, |aspect| aspect.name() != failure.aspect)
        });
    }

    // Report-only: whatever the config says, nothing is converged here.
    let config = DiffConfig {
        auto_converge: false,
        ..machine.config().diff.clone()
    };
    let workflow = DiffWorkflow::new(Arc::clone(machine.registry()), config);
    let evaluation = workflow.evaluate(project.as_ref(), &pass.fingerprints, &targets, None, Deadline::none());
    println!("{}", serde_json::to_string_pretty(&evaluation.reports)?);

    let drift = evaluation.drift();
    if !drift.is_empty() {
        let names: Vec<&str> = drift.iter().map(|r| r.fingerprint.as_str()).collect();
        anyhow::bail!("{} drifted from target: {}", ctx.repo, names.join(", "));
    }
    Ok(())
}
