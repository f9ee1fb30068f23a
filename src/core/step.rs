use std::{
    cell::Cell,
    collections::BTreeSet,
    time::{Duration, Instant},
};

use indexmap::IndexMap;
use log::{debug, error, info};

use crate::error::BatchError;

use super::{
    build_name,
    coordinator::UpsertCoordinator,
    entity::EntityManager,
    facet::FacetProcessor,
    hierarchy::HierarchyResolver,
    item::{RecordMapper, RecordSource},
    prefetch::Prefetcher,
    tasklet::Tasklet,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    STARTING,
    STARTED,
    SUCCESS,
    ERROR,
}

/// Record counters of an import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub total: usize,
    pub errors: usize,
}

impl ImportStats {
    pub fn success(&self) -> usize {
        self.total.saturating_sub(self.errors)
    }

    pub fn merge(&mut self, other: ImportStats) {
        self.total += other.total;
        self.errors += other.errors;
    }
}

/// Imports one file: reads record batches, maps them, prefetches the
/// natural keys and hands each batch to the [`UpsertCoordinator`].
///
/// Batches run strictly in sequence so a batch's prefetch sees everything
/// committed by the previous one. At the end of input every facet
/// processor is finished, the optional hierarchy sweep runs and the
/// consumed file is handed to the backup tasklet.
pub struct ImportStep<'a, R> {
    name: String,
    domain: String,
    source: &'a dyn RecordSource<R>,
    mapper: &'a dyn RecordMapper<R>,
    manager: &'a dyn EntityManager,
    processors: &'a [Box<dyn FacetProcessor>],
    hierarchy: Option<&'a HierarchyResolver>,
    backup: Option<&'a dyn Tasklet>,
    domains: Vec<String>,
    max_size: usize,
    status: Cell<StepStatus>,
    total: Cell<usize>,
    errors: Cell<usize>,
    duration: Cell<Duration>,
}

impl<R> ImportStep<'_, R> {
    /// Runs the step to the end of input.
    ///
    /// # Returns
    /// - `Ok(ImportStats)` when every record was imported
    /// - `Err(BatchError::Incomplete)` when records failed; all batches ran
    /// - any other `Err` for failures that stop the file (unreadable input,
    ///   failed prefetch, failed backup)
    pub fn execute(&self) -> Result<ImportStats, BatchError> {
        let start = Instant::now();
        let location = self.location();
        info!("Start of import step {}: {} ({})", self.name, location, self.domain);
        self.status.set(StepStatus::STARTED);

        let result = self.run_batches().and_then(|_| self.finish());
        self.duration.set(start.elapsed());

        if let Err(err) = result {
            self.status.set(StepStatus::ERROR);
            if let Err(close_err) = self.source.close() {
                debug!("Closing {} failed: {}", location, close_err);
            }
            error!("Import step {} aborted on {}: {}", self.name, location, err);
            return Err(err);
        }

        let stats = self.stats();
        info!(
            "End of import step {}: {}, {} success, {} error(s), {} total",
            self.name,
            location,
            stats.success(),
            stats.errors,
            stats.total
        );

        if stats.errors > 0 {
            self.status.set(StepStatus::ERROR);
            return Err(BatchError::Incomplete {
                errors: stats.errors,
                total: stats.total,
            });
        }

        self.status.set(StepStatus::SUCCESS);
        Ok(stats)
    }

    fn run_batches(&self) -> Result<(), BatchError> {
        let mut batch_count = 0;

        loop {
            let batch = self.source.read_batch(self.max_size)?;
            if batch.is_exhausted() {
                debug!("End of input after {} batch(es)", batch_count);
                return Ok(());
            }
            batch_count += 1;

            let (records, rejected) = batch.into_parts();
            debug!(
                "Batch {}: {} record(s), {} rejected row(s)",
                batch_count,
                records.len(),
                rejected.len()
            );

            for message in rejected {
                error!("unable to import {} record: {}", self.domain, message);
                self.inc_total(1);
                self.inc_errors(1);
            }

            let mut mapped = IndexMap::with_capacity(records.len());
            for (code, record) in records {
                match self.mapper.map(&code, &record) {
                    Ok(record) => {
                        mapped.insert(code, record);
                    }
                    Err(err) => {
                        error!("unable to import {} with code {}: {}", self.domain, code, err);
                        self.inc_total(1);
                        self.inc_errors(1);
                    }
                }
            }

            let mut codes: BTreeSet<String> = mapped.keys().cloned().collect();
            if let Some(hierarchy) = self.hierarchy {
                codes.extend(hierarchy.parent_codes(mapped.values()));
            }
            let mut map = Prefetcher::new(self.manager, &self.domains).prefetch(&codes)?;

            let stats = UpsertCoordinator::new(&self.domain, self.manager, self.processors)
                .hierarchy(self.hierarchy)
                .import(&mut map, mapped);
            self.inc_total(stats.total);
            self.inc_errors(stats.errors);
        }
    }

    fn finish(&self) -> Result<(), BatchError> {
        for processor in self.processors {
            if let Err(err) = processor.finish() {
                error!("Finishing {} processor failed: {}", processor.facet(), err);
                self.inc_errors(1);
            }
        }

        if let Some(hierarchy) = self.hierarchy {
            if let Err(err) = hierarchy.sweep(self.manager) {
                error!("Removing stale {} nodes failed: {}", self.domain, err);
                self.inc_errors(1);
            }
        }

        self.source.close()?;

        if let Some(backup) = self.backup {
            backup.run()?;
        }
        Ok(())
    }

    fn location(&self) -> String {
        self.source
            .path()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<stream>".to_string())
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_status(&self) -> StepStatus {
        self.status.get()
    }

    pub fn get_duration(&self) -> Duration {
        self.duration.get()
    }

    pub fn stats(&self) -> ImportStats {
        ImportStats {
            total: self.total.get(),
            errors: self.errors.get(),
        }
    }

    fn inc_total(&self, count: usize) {
        self.total.set(self.total.get() + count);
    }

    fn inc_errors(&self, count: usize) {
        self.errors.set(self.errors.get() + count);
    }
}

pub struct ImportStepBuilder<'a, R> {
    name: Option<String>,
    domain: String,
    source: Option<&'a dyn RecordSource<R>>,
    mapper: Option<&'a dyn RecordMapper<R>>,
    manager: Option<&'a dyn EntityManager>,
    processors: &'a [Box<dyn FacetProcessor>],
    hierarchy: Option<&'a HierarchyResolver>,
    backup: Option<&'a dyn Tasklet>,
    domains: Vec<String>,
    max_size: usize,
}

impl<'a, R> ImportStepBuilder<'a, R> {
    pub fn new(domain: &str) -> Self {
        Self {
            name: None,
            domain: domain.to_string(),
            source: None,
            mapper: None,
            manager: None,
            processors: &[],
            hierarchy: None,
            backup: None,
            domains: Vec::new(),
            max_size: 1000,
        }
    }

    pub fn name(mut self, name: String) -> Self {
        self.name = Some(name);
        self
    }

    pub fn source(mut self, source: &'a dyn RecordSource<R>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn mapper(mut self, mapper: &'a dyn RecordMapper<R>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn manager(mut self, manager: &'a dyn EntityManager) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn processors(mut self, processors: &'a [Box<dyn FacetProcessor>]) -> Self {
        self.processors = processors;
        self
    }

    pub fn hierarchy(mut self, hierarchy: Option<&'a HierarchyResolver>) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    pub fn backup(mut self, backup: &'a dyn Tasklet) -> Self {
        self.backup = Some(backup);
        self
    }

    /// Related domains loaded together with the prefetched items.
    pub fn domains(mut self, domains: &[String]) -> Self {
        self.domains = domains.to_vec();
        self
    }

    /// Records per batch (CSV) or element threshold per batch (XML).
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn build(self) -> Result<ImportStep<'a, R>, BatchError> {
        let missing = |what: &str| BatchError::Configuration(format!("import step needs a {}", what));

        if self.max_size == 0 {
            return Err(BatchError::Configuration(
                "batch size must be greater than zero".to_string(),
            ));
        }

        Ok(ImportStep {
            name: self.name.unwrap_or_else(build_name),
            domain: self.domain,
            source: self.source.ok_or_else(|| missing("record source"))?,
            mapper: self.mapper.ok_or_else(|| missing("mapper"))?,
            manager: self.manager.ok_or_else(|| missing("entity manager"))?,
            processors: self.processors,
            hierarchy: self.hierarchy,
            backup: self.backup,
            domains: self.domains,
            max_size: self.max_size,
            status: Cell::new(StepStatus::STARTING),
            total: Cell::new(0),
            errors: Cell::new(0),
            duration: Cell::new(Duration::default()),
        })
    }
}
