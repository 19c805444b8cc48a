use crate::cli::PruneArgs;
use crate::config::Config;
use crate::sync::SyncEngine;
use anyhow::{bail, Result};

pub async fn execute(engine: &SyncEngine, config: &Config, args: &PruneArgs) -> Result<()> {
    let days = args
        .days
        .unwrap_or(config.messenger.days_to_retain_instructions);
    if days == 0 {
        bail!("--days must be greater than zero");
    }

    if args.confirm {
        print!(
            "Delete instruction batches older than {} days from '{}'? [y/N]: ",
            days, config.database.table_name
        );
        std::io::Write::flush(&mut std::io::stdout())?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if input.trim().to_lowercase() != "y" {
            println!("Operation cancelled.");
            return Ok(());
        }
    }

    let rows = engine.prune_instructions(days).await?;
    println!("✅ Pruned {} instruction batches.", rows);
    Ok(())
}
