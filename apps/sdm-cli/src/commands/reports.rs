// reports.rs — Read back the JSONL report log.

use sdm_goal::JsonlReportSink;

use super::Context;

pub fn execute(ctx: &Context, limit: Option<usize>) -> anyhow::Result<()> {
    let storage = ctx.config.storage_under(&ctx.state_dir);
    let records = JsonlReportSink::new(&storage.report_log).read_all()?;
    let skip = limit.map_or(0, |n| records.len().saturating_sub(n));
    for record in &records[skip..] {
        println!("{}", serde_json::to_string(record)?);
    }
    Ok(())
}
