use folio_core_types::RequestId;
use serde::Serialize;

/// What a run did with one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitOutcome {
    Applied,
    /// Already recorded by an earlier run
    Skipped,
}

/// Final report of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RequestId,
    /// Every unit the run visited with its outcome, in source order
    pub units: Vec<(String, UnitOutcome)>,
    /// Units applied by this run, in application order
    pub executed: Vec<String>,
    /// Units found already recorded
    pub skipped: Vec<String>,
    pub duration_ms: u64,
    /// Nothing was executed; `executed` lists what would have been applied
    pub dry_run: bool,
}

impl RunSummary {
    pub fn new(run_id: RequestId, dry_run: bool) -> Self {
        Self {
            run_id,
            units: Vec::new(),
            executed: Vec::new(),
            skipped: Vec::new(),
            duration_ms: 0,
            dry_run,
        }
    }

    pub fn record(&mut self, unit: &str, outcome: UnitOutcome) {
        self.units.push((unit.to_string(), outcome));
        match outcome {
            UnitOutcome::Applied => self.executed.push(unit.to_string()),
            UnitOutcome::Skipped => self.skipped.push(unit.to_string()),
        }
    }

    pub fn executed_count(&self) -> usize {
        self.executed.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// True when the store was already up to date
    pub fn is_noop(&self) -> bool {
        self.executed.is_empty()
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.dry_run {
            write!(
                f,
                "{} pending (dry run), {} skipped",
                self.executed_count(),
                self.skipped_count()
            )
        } else {
            write!(
                f,
                "{} executed, {} skipped",
                self.executed_count(),
                self.skipped_count()
            )
        }
    }
}
