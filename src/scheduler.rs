// Batch scheduler: runs independent task pipelines under bounded
// concurrency with cooperative shutdown.
//
// Items are dispatched in discovery order; a fair semaphore bounds how many
// pipelines run at once. With one worker this degenerates to strictly
// sequential processing. Statistics are folded in at a single aggregation
// point behind a mutex, the same single-writer discipline the ledger uses.

use std::sync::Arc;

use log::{info, warn};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::discovery::WorkItem;
use crate::pipeline::{process_file, TaskContext};
use crate::stats::RunStatistics;

/// Run the batch to completion (or until cancellation) and return the
/// final statistics.
pub async fn run_batch(ctx: Arc<TaskContext>, items: Vec<WorkItem>) -> RunStatistics {
    let mut stats_seed = RunStatistics::default();
    stats_seed.total_files = items.len();

    // Skip filtering happens up front so the dispatch loop only sees real
    // work and the skip count is stable regardless of concurrency.
    let mut work = Vec::new();
    if ctx.config.skip_existing {
        for item in items {
            let identity = item.identity();
            let output_path = ctx.output_path_for(&item.path);
            if ctx.ledger.should_skip(&identity, &output_path).await {
                info!("skipping already processed file: {}", item.path.display());
                stats_seed.record_skip();
            } else {
                work.push(item);
            }
        }
    } else {
        work = items;
    }

    if stats_seed.skipped > 0 {
        info!("skipping {} already processed files", stats_seed.skipped);
    }

    let concurrency = ctx.config.workers.max(1);
    info!(
        "processing {} files with {} worker{}",
        work.len(),
        concurrency,
        if concurrency == 1 { "" } else { "s" }
    );

    let stats = Arc::new(Mutex::new(stats_seed));
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut join_set = JoinSet::new();
    let mut unscheduled = 0usize;

    for item in work {
        if ctx.cancel.is_cancelled() {
            unscheduled += 1;
            continue;
        }

        // Hold dispatch until a worker slot frees up, so items start in
        // discovery order. The semaphore is fair, but taking the permit
        // here (not inside the task) is what makes the order strict.
        let permit = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                unscheduled += 1;
                continue;
            }
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break, // semaphore closed; cannot happen in practice
            },
        };

        let ctx = ctx.clone();
        let stats = stats.clone();
        join_set.spawn(async move {
            let report = process_file(&ctx, &item).await;
            // Single aggregation point; serialized across workers.
            stats.lock().await.record(&report);
            drop(permit);
        });
    }

    if unscheduled > 0 {
        info!(
            "shutdown requested; {} queued files were not started",
            unscheduled
        );
    }

    // Let in-flight tasks reach their next cancellation checkpoint and
    // exit; nothing is force-killed from here.
    while let Some(joined) = join_set.join_next().await {
        if let Err(e) = joined {
            warn!("task panicked: {}", e);
        }
    }

    let mut final_stats = stats.lock().await.clone();
    final_stats.interrupted = ctx.cancel.is_cancelled();
    final_stats
}
