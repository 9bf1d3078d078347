//! Per-block diagnostics and the sinks they are written to.

use std::fmt;
use std::io::{self, Write};

use tracing::warn;

use enkf_core::{BlockFailure, RealizationId, StoreError, TimeStep};

use crate::kernel::Inversion;
use crate::local::BlockId;
use crate::outlier::ObservationStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum BlockStatus {
  Updated,
  /// The block's parameters kept their forecast values.
  Failed(BlockFailure),
}
impl BlockStatus {
  pub fn is_updated(&self) -> bool {
    match *self {
      BlockStatus::Updated => true,
      BlockStatus::Failed(_) => false,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
  pub key: String,
  pub index: usize,
  pub step: TimeStep,
  pub value: f64,
  pub std: f64,
  pub status: ObservationStatus,
  pub response_mean: f64,
  pub response_std: f64,
}

/// Every observation a block looked at, and what became of it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSnapshot {
  pub entries: Vec<SnapshotEntry>,
}

impl UpdateSnapshot {
  pub fn deactivated(&self) -> usize {
    self.entries
      .iter()
      .filter(|e| !e.status.is_active())
      .count()
  }

  pub fn write_table<W>(&self, out: &mut W) -> io::Result<()>
    where W: Write + ?Sized,
  {
    writeln!(out, "  {:<24} {:>14} {:>12} {:>10} {:>14} {:>12}",
             "observation", "value", "std", "status", "mean", "spread")?;
    for e in self.entries.iter() {
      let label = format!("{}[{}]@{}", e.key, e.index, e.step);
      writeln!(out, "  {:<24} {:>14.6e} {:>12.4e} {:>10} {:>14.6e} {:>12.4e}",
               label, e.value, e.std, e.status, e.response_mean, e.response_std)?;
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockReport {
  pub block: BlockId,
  pub name: String,
  /// Observations used after outlier deactivation.
  pub observations: usize,
  pub deactivated: usize,
  pub parameters: usize,
  pub inversion: Option<Inversion>,
  pub status: BlockStatus,
  pub snapshot: UpdateSnapshot,
}

impl fmt::Display for BlockReport {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "block {} `{}`: observations {} (deactivated {}), parameters {}",
           self.block, self.name, self.observations, self.deactivated,
           self.parameters)?;
    if let Some(ref inv) = self.inversion {
      write!(f, ", components {} (truncated {}), condition {:.3e}",
             inv.components, inv.truncated, inv.condition)?;
    }
    match self.status {
      BlockStatus::Updated => write!(f, ": ok"),
      BlockStatus::Failed(ref e) => write!(f, ": FAILED: {}", e),
    }
  }
}

/// Receives block diagnostics as they complete. Calls are serialized.
pub trait DiagnosticSink: Send {
  fn block_completed(&mut self, report: &BlockReport, verbose: bool);

  /// Parameters of `group` could not be written; `blocks` lose their
  /// update. `unrestored` realizations were left holding it.
  fn write_failed(&mut self, group: &str, blocks: &[&str], error: &StoreError,
                  unrestored: &[RealizationId]);
}

/// Writes the one-line-per-block log to any byte stream.
#[derive(Debug)]
pub struct LogStream<W>
  where W: Write + Send,
{
  out: W,
}

impl<W> LogStream<W>
  where W: Write + Send,
{
  pub fn new(out: W) -> LogStream<W> {
    LogStream {
      out: out,
    }
  }

  pub fn into_inner(self) -> W { self.out }

  fn emit(&mut self, report: &BlockReport, verbose: bool) -> io::Result<()> {
    writeln!(self.out, "{}", report)?;
    if verbose {
      report.snapshot.write_table(&mut self.out)?;
    }
    self.out.flush()
  }

  fn emit_write_failure(&mut self, group: &str, blocks: &[&str], error: &StoreError,
                        unrestored: &[RealizationId]) -> io::Result<()> {
    write!(self.out, "write of `{}` FAILED ({}); not updated: {}",
           group, error, blocks.join(", "))?;
    if !unrestored.is_empty() {
      write!(self.out, "; left updated: realizations {:?}", unrestored)?;
    }
    writeln!(self.out)?;
    self.out.flush()
  }
}

impl<W> DiagnosticSink for LogStream<W>
  where W: Write + Send,
{
  fn block_completed(&mut self, report: &BlockReport, verbose: bool) {
    if let Err(e) = self.emit(report, verbose) {
      warn!(error = %e, block = %report.name, "unable to write update log");
    }
  }

  fn write_failed(&mut self, group: &str, blocks: &[&str], error: &StoreError,
                  unrestored: &[RealizationId]) {
    if let Err(e) = self.emit_write_failure(group, blocks, error, unrestored) {
      warn!(error = %e, "unable to write update log");
    }
  }
}

/// Keeps every report, in completion order.
#[derive(Debug, Clone, Default)]
pub struct Collector {
  pub reports: Vec<BlockReport>,
  /// Group, error and the realizations left holding the update.
  pub write_failures: Vec<(String, StoreError, Vec<RealizationId>)>,
}

impl Collector {
  pub fn new() -> Collector { Default::default() }

  /// Reports ordered by block id.
  pub fn sorted(&self) -> Vec<BlockReport> {
    let mut reports = self.reports.clone();
    reports.sort_by_key(|r| r.block);
    reports
  }
}

impl DiagnosticSink for Collector {
  fn block_completed(&mut self, report: &BlockReport, _verbose: bool) {
    self.reports.push(report.clone());
  }
  fn write_failed(&mut self, group: &str, blocks: &[&str], error: &StoreError,
                  unrestored: &[RealizationId]) {
    for report in self.reports.iter_mut() {
      if blocks.contains(&&report.name[..]) && report.status.is_updated() {
        report.status = BlockStatus::Failed(BlockFailure::Io(error.clone()));
      }
    }
    self.write_failures.push((group.to_owned(), error.clone(), unrestored.to_vec()));
  }
}
