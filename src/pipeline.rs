use std::fmt;
use std::sync::Arc;

use indicatif::MultiProgress;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::{self, Aggregated};
use crate::datasets::DatasetSpec;
use crate::db;
use crate::dedup::dedup;
use crate::fetch::PageSource;
use crate::parser::normalize;
use crate::settings::Settings;

/// Where a dataset is in its run. `Done`, `Skipped` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Aggregating,
    Normalizing,
    Deduplicating,
    Loading,
    Done,
    Skipped,
    Failed,
}

impl State {
    fn can_move_to(self, next: State) -> bool {
        use State::*;
        matches!(
            (self, next),
            (Init, Aggregating)
                | (Init, Failed)
                | (Aggregating, Normalizing)
                | (Aggregating, Skipped)
                | (Normalizing, Deduplicating)
                | (Normalizing, Skipped)
                | (Deduplicating, Loading)
                | (Loading, Done)
                | (Loading, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, State::Done | State::Skipped | State::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Loaded { rows: usize },
    Skipped { reason: String },
    Failed { reason: String },
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Loaded { .. } => "loaded",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub dataset: String,
    pub relation: String,
    pub outcome: Outcome,
    pub pages_ok: usize,
    pub pages_failed: usize,
    pub raw_rows: usize,
    pub duplicates: usize,
}

impl fmt::Display for DatasetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Loaded { rows } => write!(
                f,
                "{:<12} inserted {} rows into `{}` ({}/{} pages, {} duplicates dropped)",
                self.dataset,
                rows,
                self.relation,
                self.pages_ok,
                self.pages_ok + self.pages_failed,
                self.duplicates
            ),
            Outcome::Skipped { reason } => write!(f, "{:<12} skipped: {}", self.dataset, reason),
            Outcome::Failed { reason } => write!(f, "{:<12} failed: {}", self.dataset, reason),
        }
    }
}

/// One dataset moving through the state machine.
struct DatasetRun<'s> {
    spec: &'s DatasetSpec,
    state: State,
    aggregated: Option<Aggregated>,
    report: DatasetReport,
}

impl<'s> DatasetRun<'s> {
    fn new(spec: &'s DatasetSpec) -> Self {
        DatasetRun {
            spec,
            state: State::Init,
            aggregated: None,
            report: DatasetReport {
                dataset: spec.name.to_string(),
                relation: spec.relation.to_string(),
                outcome: Outcome::Loaded { rows: 0 },
                pages_ok: 0,
                pages_failed: 0,
                raw_rows: 0,
                duplicates: 0,
            },
        }
    }

    fn advance(&mut self, next: State) {
        debug_assert!(self.state.can_move_to(next), "{:?} -> {:?}", self.state, next);
        debug!(dataset = self.spec.name, from = ?self.state, to = ?next, "state");
        self.state = next;
    }

    fn skip(&mut self, reason: String) {
        warn!(dataset = self.spec.name, "skipped: {}", reason);
        self.advance(State::Skipped);
        self.report.outcome = Outcome::Skipped { reason };
    }

    fn fail(&mut self, reason: String) {
        warn!(dataset = self.spec.name, "failed: {}", reason);
        self.advance(State::Failed);
        self.report.outcome = Outcome::Failed { reason };
    }
}

pub struct Pipeline<'a> {
    settings: &'a Settings,
    conn: &'a Connection,
    source: Arc<dyn PageSource>,
    run_id: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(settings: &'a Settings, conn: &'a Connection, source: Arc<dyn PageSource>) -> Self {
        let run_id = chrono::Utc::now().format("run-%Y%m%dT%H%M%SZ").to_string();
        Pipeline {
            settings,
            conn,
            source,
            run_id,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run every dataset to a terminal state. One dataset's failure never
    /// stops the others; reports come back in `specs` order.
    pub async fn run(&self, specs: &[DatasetSpec]) -> Vec<DatasetReport> {
        let mut runs: Vec<DatasetRun> = specs.iter().map(DatasetRun::new).collect();

        for run in &mut runs {
            self.initialize(run);
        }
        self.aggregate(&mut runs).await;
        for run in &mut runs {
            self.process(run);
            debug_assert!(run.state.is_terminal());
            self.record(&run.report);
        }

        runs.into_iter().map(|r| r.report).collect()
    }

    fn initialize(&self, run: &mut DatasetRun) {
        let columns: Vec<_> = run.spec.fields.iter().map(|f| (f.name, f.ty)).collect();
        match db::ensure_relation(self.conn, run.spec.relation, &columns) {
            Ok(ensured) => debug!(dataset = run.spec.name, ?ensured, "relation ready"),
            Err(e) => run.fail(format!("cannot prepare `{}`: {}", run.spec.relation, e)),
        }
    }

    /// Fetch all live datasets at once; they share nothing but the source.
    async fn aggregate(&self, runs: &mut [DatasetRun<'_>]) {
        let deadline = self.settings.page_deadline();
        let bars = MultiProgress::new();
        let mut live: Vec<&mut DatasetRun> = runs.iter_mut().filter(|r| r.state == State::Init).collect();
        for run in live.iter_mut() {
            run.advance(State::Aggregating);
        }

        let fetches = live.iter().map(|run| {
            aggregate::fetch_all(
                Arc::clone(&self.source),
                run.spec.name,
                &run.spec.locators,
                self.settings.concurrency,
                deadline,
                &bars,
            )
        });
        let results = futures::future::join_all(fetches).await;

        for (run, agg) in live.into_iter().zip(results) {
            run.report.pages_ok = agg.pages_ok;
            run.report.pages_failed = agg.pages_failed();
            run.report.raw_rows = agg.table.rows.len();
            run.aggregated = Some(agg);
        }
    }

    fn process(&self, run: &mut DatasetRun) {
        if run.state != State::Aggregating {
            return;
        }
        let Some(agg) = run.aggregated.take() else {
            return;
        };
        if agg.pages_ok == 0 {
            run.skip(format!(
                "no data available ({} of {} pages failed)",
                agg.pages_failed(),
                run.spec.locators.len()
            ));
            return;
        }

        run.advance(State::Normalizing);
        let records = match normalize(&agg.table, run.spec) {
            Ok(r) => r,
            Err(e) => {
                run.skip(e.to_string());
                return;
            }
        };

        run.advance(State::Deduplicating);
        let before = records.len();
        let records = dedup(records);
        run.report.duplicates = before - records.len();

        run.advance(State::Loading);
        let names = run.spec.field_names();
        match db::insert_batches(
            self.conn,
            run.spec.relation,
            &names,
            &records,
            self.settings.batch_size,
        ) {
            Ok(rows) => {
                run.advance(State::Done);
                run.report.outcome = Outcome::Loaded { rows };
                info!(
                    dataset = run.spec.name,
                    "Inserted {} rows into {} ({} duplicates dropped)",
                    rows,
                    run.spec.relation,
                    run.report.duplicates
                );
            }
            Err(e) => run.fail(e.to_string()),
        }
    }

    fn record(&self, report: &DatasetReport) {
        let (rows, detail) = match &report.outcome {
            Outcome::Loaded { rows } => (*rows, None),
            Outcome::Skipped { reason } | Outcome::Failed { reason } => (0, Some(reason.as_str())),
        };
        let entry = db::RunEntry {
            run_id: &self.run_id,
            dataset: &report.dataset,
            outcome: report.outcome.label(),
            rows,
            detail,
        };
        if let Err(e) = db::record_run(self.conn, &entry) {
            warn!(dataset = %report.dataset, "could not record run: {}", e);
        }
    }
}
