//! Migration applicator
//!
//! Applies units in name order, exactly once each, with checksum drift
//! detection, out-of-order detection and a run-level lock.

use crate::backend::MigrationStore;
use crate::errors::{checksum_mismatch, lock_held, out_of_order, unknown_record, Result};
use crate::migrations::lock::lock_key;
use crate::migrations::source::UnitSource;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use folio_core::errors::ExError;
use folio_core::{
    log_op_end, log_op_error, log_op_start, MigrationRecord, MigrationUnit, RunSummary,
    UnitOutcome, UnitStatus,
};
use folio_core_types::schema::{OUTCOME_APPLIED, OUTCOME_FAILED, OUTCOME_SKIPPED};
use folio_core_types::RequestId;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Knobs for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Turn drift, unknown records and out-of-order units into errors
    pub strict: bool,
    /// Report pending units without executing them
    pub dry_run: bool,
}

/// Read-only view of the store against the known units
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub units: Vec<UnitReport>,
    /// Records with no matching unit
    pub unknown: Vec<MigrationRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub name: String,
    pub checksum: String,
    pub status: UnitStatus,
}

impl StatusReport {
    pub fn pending(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| !u.status.is_applied())
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }
}

/// Brings a store to the latest schema version
///
/// Owns the store for its whole life; `into_store` hands it back.
pub struct Applicator<S: MigrationStore> {
    store: S,
    options: ApplyOptions,
}

impl<S: MigrationStore> Applicator<S> {
    pub fn new(store: S, options: ApplyOptions) -> Self {
        Self { store, options }
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Apply every pending unit from `source`, in name order
    ///
    /// Stops at the first failing unit; that unit stays unrecorded and later
    /// units are not attempted. The lock is released on every path.
    pub async fn run<U: UnitSource + ?Sized>(&mut self, source: &U) -> Result<RunSummary> {
        let start = Instant::now();
        let run_id = RequestId::new();
        log_op_start!(
            "migrate_run",
            run_id = %run_id,
            backend = self.store.backend_name(),
            table = self.store.table(),
            dry_run = self.options.dry_run
        );

        let result = self.run_guarded(source, run_id.clone()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(mut summary) => {
                summary.duration_ms = duration_ms;
                log_op_end!(
                    "migrate_run",
                    duration_ms = duration_ms,
                    run_id = %run_id,
                    executed = summary.executed_count(),
                    skipped = summary.skipped_count(),
                    dry_run = summary.dry_run
                );
                Ok(summary)
            }
            Err(err) => {
                log_op_error!("migrate_run", err, duration_ms = duration_ms, run_id = %run_id);
                Err(err)
            }
        }
    }

    async fn run_guarded<U: UnitSource + ?Sized>(
        &mut self,
        source: &U,
        run_id: RequestId,
    ) -> Result<RunSummary> {
        let units = source.load()?;

        let key = lock_key(self.store.table());
        if !self.store.try_lock(key).await? {
            return Err(lock_held(self.store.table()));
        }

        let result = self.run_locked(&units, run_id).await;

        if let Err(e) = self.store.unlock(key).await {
            tracing::warn!(error = %e, "failed to release migration lock");
        }
        result
    }

    async fn run_locked(
        &mut self,
        units: &[MigrationUnit],
        run_id: RequestId,
    ) -> Result<RunSummary> {
        let dry_run = self.options.dry_run;

        let records = if dry_run {
            if self.store.record_table_exists().await? {
                self.store.list_records().await?
            } else {
                Vec::new()
            }
        } else {
            self.store.ensure_record_table().await?;
            self.store.list_records().await?
        };

        self.check_records(units, &records)?;

        let mut summary = RunSummary::new(run_id, dry_run);
        let mut last_stamp = records.iter().map(|r| r.applied_at).max();
        let recorded: HashSet<&str> = records.iter().map(|r| r.name.as_str()).collect();

        for unit in units {
            let already = if dry_run {
                recorded.contains(unit.name())
            } else {
                self.lookup(unit.name()).await
            };

            if already {
                tracing::info!(
                    op = "apply_unit",
                    unit = unit.name(),
                    outcome = OUTCOME_SKIPPED,
                    "already applied"
                );
                summary.record(unit.name(), UnitOutcome::Skipped);
                continue;
            }

            if dry_run {
                tracing::info!(op = "apply_unit", unit = unit.name(), "pending (dry run)");
                summary.record(unit.name(), UnitOutcome::Applied);
                continue;
            }

            let unit_start = Instant::now();
            let stamp = next_timestamp(last_stamp);
            match self.store.apply_unit(unit, stamp).await {
                Ok(()) => {
                    last_stamp = Some(stamp);
                    tracing::info!(
                        op = "apply_unit",
                        unit = unit.name(),
                        outcome = OUTCOME_APPLIED,
                        transactional = unit.is_transactional(),
                        duration_ms = unit_start.elapsed().as_millis() as u64,
                        "applied"
                    );
                    summary.record(unit.name(), UnitOutcome::Applied);
                }
                Err(failure) => {
                    let err = failure.into_ex_error(unit.name());
                    log_op_error!(
                        "apply_unit",
                        err,
                        duration_ms = unit_start.elapsed().as_millis() as u64,
                        unit = unit.name(),
                        outcome = OUTCOME_FAILED
                    );
                    return Err(err);
                }
            }
        }

        Ok(summary)
    }

    /// Whether a record exists for `name`. A failed lookup reads as "not recorded".
    async fn lookup(&mut self, name: &str) -> bool {
        match self.store.find_record(name).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::debug!(
                    unit = name,
                    error = %e,
                    "record lookup failed, treating as pending"
                );
                false
            }
        }
    }

    /// Compare records with units before anything is applied
    fn check_records(&self, units: &[MigrationUnit], records: &[MigrationRecord]) -> Result<()> {
        let by_name: HashMap<&str, &MigrationUnit> =
            units.iter().map(|u| (u.name(), u)).collect();

        for record in records {
            let Some(unit) = by_name.get(record.name.as_str()) else {
                self.violation(unknown_record(&record.name))?;
                continue;
            };
            if let Some(recorded) = &record.checksum {
                if recorded != unit.checksum() {
                    self.violation(checksum_mismatch(unit.name(), recorded, unit.checksum()))?;
                }
            }
        }

        let newest_applied = records
            .iter()
            .filter(|r| by_name.contains_key(r.name.as_str()))
            .map(|r| r.name.as_str())
            .max();
        if let Some(newest) = newest_applied {
            let recorded: HashSet<&str> = records.iter().map(|r| r.name.as_str()).collect();
            for unit in units {
                if unit.name() < newest && !recorded.contains(unit.name()) {
                    self.violation(out_of_order(unit.name(), newest))?;
                }
            }
        }

        Ok(())
    }

    fn violation(&self, err: ExError) -> Result<()> {
        if self.options.strict {
            return Err(err);
        }
        tracing::warn!(
            unit = err.unit().unwrap_or_default(),
            err.code = err.code(),
            "{}",
            err.message()
        );
        Ok(())
    }

    /// Per-unit status, without creating the record table
    pub async fn status<U: UnitSource + ?Sized>(&mut self, source: &U) -> Result<StatusReport> {
        let units = source.load()?;
        let records = if self.store.record_table_exists().await? {
            self.store.list_records().await?
        } else {
            Vec::new()
        };

        let unit_names: HashSet<&str> = units.iter().map(|u| u.name()).collect();
        let by_name: HashMap<&str, &MigrationRecord> =
            records.iter().map(|r| (r.name.as_str(), r)).collect();

        let reports = units
            .iter()
            .map(|unit| {
                let status = match by_name.get(unit.name()) {
                    Some(record) => UnitStatus::Applied {
                        applied_at: record.applied_at,
                        drifted: record
                            .checksum
                            .as_deref()
                            .map(|c| c != unit.checksum())
                            .unwrap_or(false),
                    },
                    None => UnitStatus::Pending,
                };
                UnitReport {
                    name: unit.name().to_string(),
                    checksum: unit.checksum().to_string(),
                    status,
                }
            })
            .collect();

        let unknown = records
            .iter()
            .filter(|r| !unit_names.contains(r.name.as_str()))
            .cloned()
            .collect();

        Ok(StatusReport {
            units: reports,
            unknown,
        })
    }
}

/// Record timestamp strictly after `previous`, at microsecond precision
///
/// Both backends store microseconds, so the truncation keeps the stored
/// value equal to the one compared here.
pub fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match previous {
        Some(prev) if now <= prev => prev.trunc_subsecs(6) + Duration::microseconds(1),
        _ => now,
    }
}
