use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::FetchError;
use crate::fetch::PageSource;
use crate::parser::RawTable;

/// Concatenated pages for one dataset plus the per-page failures that were
/// dropped along the way.
#[derive(Debug, Default)]
pub struct Aggregated {
    pub table: RawTable,
    pub pages_ok: usize,
    pub failures: Vec<FetchError>,
}

impl Aggregated {
    pub fn pages_failed(&self) -> usize {
        self.failures.len()
    }
}

/// Fetch every locator with at most `concurrency` pages in flight, then
/// concatenate successes in locator order. A failed page is logged and left
/// out; it never aborts the dataset. The progress bar joins `bars` so
/// datasets fetched side by side each keep their own line.
pub async fn fetch_all(
    source: Arc<dyn PageSource>,
    dataset: &str,
    locators: &[String],
    concurrency: usize,
    deadline: Duration,
    bars: &MultiProgress,
) -> Aggregated {
    let total = locators.len();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

    let pb = bars.add(ProgressBar::new(total as u64));
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{prefix:>12} [{elapsed_precise}] {bar:40} {pos}/{len} pages")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_prefix(dataset.to_string());

    // Channel: workers send (position, result), the loop below slots them back in order
    let (tx, mut rx) = tokio::sync::mpsc::channel(total.max(1));

    for (idx, url) in locators.iter().cloned().enumerate() {
        let source = Arc::clone(&source);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            // semaphore is never closed while tasks are live
            let Ok(_permit) = sem.acquire_owned().await else {
                return;
            };
            let outcome = tokio::time::timeout(deadline, source.fetch_table(&url)).await;
            let result = outcome.unwrap_or_else(|_| {
                Err(FetchError::Timeout {
                    url: url.clone(),
                    secs: deadline.as_secs(),
                })
            });
            let _ = tx.send((idx, result)).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut slots: Vec<Option<Result<RawTable, FetchError>>> = (0..total).map(|_| None).collect();
    while let Some((idx, result)) = rx.recv().await {
        slots[idx] = Some(result);
        pb.inc(1);
    }
    pb.finish_and_clear();

    let mut out = Aggregated::default();
    for (idx, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(Ok(table)) => {
                out.pages_ok += 1;
                out.table.extend(table);
            }
            Some(Err(e)) => {
                warn!(dataset, "page {} dropped: {}", idx + 1, e);
                out.failures.push(e);
            }
            // task panicked before reporting
            None => {
                warn!(dataset, "page {} dropped: fetch task aborted", idx + 1);
                out.failures.push(FetchError::Timeout {
                    url: locators[idx].clone(),
                    secs: deadline.as_secs(),
                });
            }
        }
    }

    info!(
        dataset,
        "Fetched {} pages ({} ok, {} failed, {} rows)",
        total,
        out.pages_ok,
        out.pages_failed(),
        out.table.rows.len()
    );
    out
}
