use crate::cli::PendingArgs;
use crate::instruction::decode_payload;
use crate::sync::SyncEngine;
use crate::utils::redaction::truncate_payload;
use anyhow::Result;

pub async fn execute(engine: &SyncEngine, args: &PendingArgs) -> Result<()> {
    let records = engine.store().fetch_pending(args.after, args.limit).await?;

    if records.is_empty() {
        println!("No instruction batches after id {}.", args.after);
        return Ok(());
    }

    for record in records {
        println!(
            "#{} {} origin={} count={}",
            record.id,
            record.utc_stamp.to_rfc3339(),
            record.origin_identity,
            record.instruction_count
        );

        if !args.decode {
            continue;
        }
        match decode_payload(&record.instructions) {
            Ok(instructions) => {
                for instruction in instructions {
                    println!(
                        "    {} {:?}",
                        instruction.refresher_id, instruction.method
                    );
                }
            }
            Err(e) => println!(
                "    ❌ {} ({})",
                e,
                truncate_payload(&record.instructions)
            ),
        }
    }

    Ok(())
}
