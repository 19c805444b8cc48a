use crate::cli::StatusArgs;
use crate::config::Config;
use crate::sync::SyncEngine;
use anyhow::Result;

pub async fn execute(engine: &SyncEngine, config: &Config, args: &StatusArgs) -> Result<()> {
    let store = engine.store();
    let rows = store.count_all().await?;
    let max_id = engine.get_max_instruction_id().await?;

    println!("=== Instruction Store Status ===\n");
    println!("Table:    {}", config.database.table_name);
    println!("Batches:  {}", rows);
    println!("Max id:   {}", max_id);

    if let Some(last_id) = args.last_id {
        let backlog = store.sum_instruction_count_after(last_id).await?;
        let limit = config.messenger.max_processing_instruction_count;
        let cold_boot = engine.is_cold_boot_required(last_id).await?
            || (last_id > 0 && backlog > limit);

        println!();
        println!("Last synced id: {}", last_id);
        println!("Pending:        {} instructions (limit {})", backlog, limit);
        if cold_boot {
            println!("Verdict:        ⚠️ COLD BOOT REQUIRED");
        } else {
            println!("Verdict:        ✅ INCREMENTAL SYNC");
        }
    }

    Ok(())
}
