use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinSet,
};
use uuid::Uuid;

use crate::{
    config::{ImportConfig, SourceFormat},
    error::BatchError,
    tasklet::{backup::BackupTasklet, cleanup::CleanupTasklet},
};

use super::{
    build_name,
    entity::{EntityManager, ManagerFactory, TypeRegistry},
    facet::{FacetProcessor, ProcessorContext, ProcessorRegistry},
    hierarchy::HierarchyResolver,
    item::{RecordMapper, RecordSource},
    step::{ImportStats, ImportStepBuilder},
    tasklet::Tasklet,
};

/// Type alias for job execution results.
type JobResult<T> = Result<T, BatchError>;

/// Outcome of importing one file.
#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    /// Records attempted before the file finished or stopped.
    pub stats: ImportStats,
    /// Set when the file failed as a whole or had record errors.
    pub error: Option<String>,
    /// The file stopped before all of its records were attempted.
    pub aborted: bool,
    pub duration: Duration,
}

impl FileReport {
    fn new(
        path: PathBuf,
        stats: ImportStats,
        result: JobResult<ImportStats>,
        duration: Duration,
    ) -> Self {
        let (error, aborted) = match result {
            Ok(_) => (None, false),
            Err(BatchError::Incomplete { errors, total }) => (
                Some(format!("{} of {} record(s) failed", errors, total)),
                false,
            ),
            Err(err) => (Some(err.to_string()), true),
        };

        Self {
            path,
            stats,
            error,
            aborted,
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

/// Represents the execution of an import job.
#[derive(Debug)]
pub struct JobExecution {
    pub id: Uuid,
    pub name: String,
    /// The time when the job started executing
    pub start: Instant,
    /// The time when the job finished executing
    pub end: Instant,
    /// The total duration of the job execution
    pub duration: Duration,
    /// One report per file, sorted by path
    pub files: Vec<FileReport>,
    /// Record counters summed over all files
    pub stats: ImportStats,
}

impl JobExecution {
    pub fn is_success(&self) -> bool {
        self.files.iter().all(FileReport::is_success)
    }

    /// Message for an operator when anything failed. Only counts are
    /// included, not the failing codes.
    pub fn notification(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }

        let failed_files = self.files.iter().filter(|file| !file.is_success()).count();
        Some(format!(
            "Import job {} finished with {} error(s) in {} record(s); {} of {} file(s) failed",
            self.name,
            self.stats.errors,
            self.stats.total,
            failed_files,
            self.files.len()
        ))
    }

    /// Surfaces record and file errors as a run-level failure.
    pub fn ensure_complete(&self) -> JobResult<()> {
        if self.is_success() {
            return Ok(());
        }
        Err(BatchError::Incomplete {
            errors: self.stats.errors.max(1),
            total: self.stats.total,
        })
    }
}

struct JobInner {
    id: Uuid,
    name: String,
    config: ImportConfig,
    managers: Arc<dyn ManagerFactory>,
    types: Arc<dyn TypeRegistry>,
    registry: ProcessorRegistry,
}

/// Imports every file of the configured location.
///
/// CSV files are imported one after the other. XML files are fed through a
/// queue to a bounded pool of workers, one file per worker at a time; each
/// worker opens its own entity manager and processors, so files share
/// nothing but the store. A failing file never stops its siblings.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use bulk_import_rs::config::ImportConfig;
/// use bulk_import_rs::core::job::ImportJobBuilder;
/// use bulk_import_rs::item::memory::MemoryStore;
///
/// # fn example() -> Result<(), bulk_import_rs::BatchError> {
/// let config = ImportConfig::from_path("config/product-import.json")?;
/// let store = MemoryStore::new();
///
/// let job = ImportJobBuilder::new()
///     .name("product-import".to_string())
///     .config(config)
///     .managers(Arc::new(store.clone()))
///     .types(Arc::new(store))
///     .build()?;
///
/// let execution = job.run_blocking()?;
/// if let Some(message) = execution.notification() {
///     eprintln!("{}", message);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ImportJob {
    inner: Arc<JobInner>,
}

impl ImportJob {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &ImportConfig {
        &self.inner.config
    }

    /// Import files of the location, sorted by name.
    pub fn files(&self) -> JobResult<Vec<PathBuf>> {
        let location = &self.inner.config.location;
        if location.is_file() {
            return Ok(vec![location.clone()]);
        }

        let extension = self.inner.config.format.extension();
        let entries = fs::read_dir(location).map_err(|err| {
            BatchError::Configuration(format!(
                "unable to read import location {}: {}",
                location.display(),
                err
            ))
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let matches = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
            if path.is_file() && matches {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn processors(&self) -> JobResult<Vec<Box<dyn FacetProcessor>>> {
        let inner = &self.inner;
        inner
            .config
            .facets()
            .into_iter()
            .map(|(facet, processor)| {
                let context = ProcessorContext {
                    domain: inner.config.domain.clone(),
                    facet,
                    managers: inner.managers.clone(),
                    types: inner.types.clone(),
                };
                inner.registry.build(&processor, &context)
            })
            .collect()
    }

    /// Imports one file on the current thread.
    ///
    /// The report carries the records attempted so far even when the file
    /// stopped on a fatal error.
    pub fn import_file(&self, path: &Path) -> FileReport {
        let started = Instant::now();
        let (stats, result) = self
            .import(path)
            .unwrap_or_else(|err| (ImportStats::default(), Err(err)));

        if let Err(err) = &result {
            if !matches!(err, BatchError::Incomplete { .. }) {
                error!(
                    "Import of {} failed after {} record(s): {}",
                    path.display(),
                    stats.total,
                    err
                );
            }
        }
        FileReport::new(path.to_path_buf(), stats, result, started.elapsed())
    }

    /// Opens the file and runs its step. `Err` means the step never started.
    fn import(&self, path: &Path) -> JobResult<(ImportStats, JobResult<ImportStats>)> {
        let config = &self.inner.config;

        match config.format {
            #[cfg(feature = "csv")]
            SourceFormat::Csv => {
                let source = crate::item::csv::csv_reader::CsvRecordSourceBuilder::new()
                    .delimiter(config.delimiter as u8)
                    .skip_lines(config.skip_lines)
                    .key_column(config.code_position()?)
                    .converters(config.converters()?)
                    .duplicates(config.duplicates)
                    .from_path(path)?;
                let mapper = super::mapping::ColumnMapper::new(config.column_mapping()?, config.strict);
                self.run_step(path, &source, &mapper)
            }
            #[cfg(feature = "xml")]
            SourceFormat::Xml => {
                let source = crate::item::xml::xml_reader::XmlRecordSourceBuilder::new()
                    .tag(config.item_tag())
                    .item_depth(config.item_depth)
                    .key_attribute(&config.key_attribute)
                    .duplicates(config.duplicates)
                    .from_path(path)?;
                let facets: Vec<String> =
                    config.facets().into_iter().map(|(facet, _)| facet).collect();
                let mapper = super::mapping::NodeMapper::new(
                    config.domain.as_str(),
                    config.key_attribute.as_str(),
                    &facets,
                    config.strict,
                );
                self.run_step(path, &source, &mapper)
            }
            #[allow(unreachable_patterns)]
            format => Err(BatchError::Configuration(format!(
                "{:?} import is not enabled in this build",
                format
            ))),
        }
    }

    fn run_step<R>(
        &self,
        path: &Path,
        source: &dyn RecordSource<R>,
        mapper: &dyn RecordMapper<R>,
    ) -> JobResult<(ImportStats, JobResult<ImportStats>)> {
        let config = &self.inner.config;
        let manager: Box<dyn EntityManager> = self.inner.managers.manager(&config.domain)?;
        let processors = self.processors()?;
        let hierarchy = config
            .is_tree()
            .then(|| HierarchyResolver::new(&config.domain, config.sweep_children));
        let backup = BackupTasklet::new(config.backup.clone(), path);

        let step = ImportStepBuilder::new(&config.domain)
            .name(format!("{}-{}", self.inner.name, file_name(path)))
            .source(source)
            .mapper(mapper)
            .manager(manager.as_ref())
            .processors(&processors)
            .hierarchy(hierarchy.as_ref())
            .backup(&backup)
            .domains(&config.domains)
            .max_size(config.max_size)
            .build()?;

        let result = step.execute();
        Ok((step.stats(), result))
    }

    fn worker_count(&self, files: usize) -> usize {
        match self.inner.config.format {
            SourceFormat::Csv => 1,
            SourceFormat::Xml => self.inner.config.workers.min(files).max(1),
        }
    }

    /// Runs the job: imports all files through the worker pool, then runs
    /// the optional cleanup pass.
    ///
    /// Returns `Err` only when the job cannot start; failed files and
    /// records are reported in the [`JobExecution`].
    pub async fn run(&self) -> JobResult<JobExecution> {
        let start = Instant::now();
        let started_at = Utc::now();
        let inner = &self.inner;

        info!("Start of job: {}, id: {}", inner.name, inner.id);

        let files = self.files()?;
        let workers = self.worker_count(files.len());
        info!(
            "Importing {} {} file(s) from {} with {} worker(s)",
            files.len(),
            inner.config.format.extension(),
            inner.config.location.display(),
            workers
        );

        let (sender, receiver) = mpsc::channel::<PathBuf>(files.len().max(1));
        for file in files {
            sender
                .send(file)
                .await
                .map_err(|err| BatchError::Configuration(format!("file queue closed: {}", err)))?;
        }
        drop(sender);

        let receiver = Arc::new(Mutex::new(receiver));
        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let job = self.clone();
            let receiver = receiver.clone();
            pool.spawn(async move { job.work(receiver).await });
        }

        let mut reports = Vec::new();
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(worker_reports) => reports.extend(worker_reports),
                Err(err) => error!("Import worker of job {} failed: {}", inner.name, err),
            }
        }
        reports.sort_by(|a, b| a.path.cmp(&b.path));

        if inner.config.cleanup {
            self.cleanup(&reports, started_at).await;
        }

        let mut stats = ImportStats::default();
        for report in &reports {
            stats.merge(report.stats);
        }

        info!(
            "End of job: {}, id: {}: {} success, {} error(s), {} total",
            inner.name,
            inner.id,
            stats.success(),
            stats.errors,
            stats.total
        );

        Ok(JobExecution {
            id: inner.id,
            name: inner.name.clone(),
            start,
            end: Instant::now(),
            duration: start.elapsed(),
            files: reports,
            stats,
        })
    }

    /// Takes files from the queue until it is empty.
    async fn work(&self, receiver: Arc<Mutex<mpsc::Receiver<PathBuf>>>) -> Vec<FileReport> {
        let mut reports = Vec::new();

        loop {
            let next = receiver.lock().await.recv().await;
            let Some(path) = next else {
                break;
            };

            let started = Instant::now();
            let job = self.clone();
            let file = path.clone();
            let report = tokio::task::spawn_blocking(move || job.import_file(&file))
                .await
                .unwrap_or_else(|err| {
                    error!("Import task for {} failed: {}", path.display(), err);
                    FileReport::new(
                        path,
                        ImportStats::default(),
                        Err(BatchError::ItemReader(format!("import task failed: {}", err))),
                        started.elapsed(),
                    )
                });
            reports.push(report);
        }

        reports
    }

    async fn cleanup(&self, reports: &[FileReport], started_at: DateTime<Utc>) {
        if reports.iter().any(FileReport::is_aborted) {
            warn!(
                "Skipping cleanup of {} entities: not every file was imported",
                self.inner.config.domain
            );
            return;
        }

        let tasklet = CleanupTasklet::new(
            self.inner.managers.clone(),
            &self.inner.config.domain,
            started_at,
        );
        match tokio::task::spawn_blocking(move || tasklet.run()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("Cleanup failed: {}", err),
            Err(err) => error!("Cleanup task failed: {}", err),
        }
    }

    /// Runs the job on a dedicated multi-threaded runtime.
    ///
    /// Fails with [`BatchError::Configuration`] when called from within a
    /// tokio runtime; use [`ImportJob::run`] there.
    pub fn run_blocking(&self) -> JobResult<JobExecution> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(BatchError::Configuration(
                "run_blocking called inside an async runtime, await run() instead".to_string(),
            ));
        }

        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(self.run())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Builder for [`ImportJob`].
///
/// `build` validates the configuration and every configured processor name,
/// so configuration errors surface before any file is opened.
#[derive(Default)]
pub struct ImportJobBuilder {
    name: Option<String>,
    config: Option<ImportConfig>,
    managers: Option<Arc<dyn ManagerFactory>>,
    types: Option<Arc<dyn TypeRegistry>>,
    registry: Option<ProcessorRegistry>,
}

impl ImportJobBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: String) -> Self {
        self.name = Some(name);
        self
    }

    pub fn config(mut self, config: ImportConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn managers(mut self, managers: Arc<dyn ManagerFactory>) -> Self {
        self.managers = Some(managers);
        self
    }

    pub fn types(mut self, types: Arc<dyn TypeRegistry>) -> Self {
        self.types = Some(types);
        self
    }

    /// Processors available to the job; defaults to
    /// [`ProcessorRegistry::with_defaults`].
    pub fn registry(mut self, registry: ProcessorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> JobResult<ImportJob> {
        let config = self
            .config
            .ok_or_else(|| BatchError::Configuration("import configuration is required".to_string()))?;
        let managers = self
            .managers
            .ok_or_else(|| BatchError::Configuration("entity managers are required".to_string()))?;
        let types = self
            .types
            .ok_or_else(|| BatchError::Configuration("type registry is required".to_string()))?;
        let registry = self.registry.unwrap_or_else(ProcessorRegistry::with_defaults);

        config.validate()?;
        for (facet, processor) in config.facets() {
            if !registry.contains(&processor) {
                return Err(BatchError::Configuration(format!(
                    "unknown or disallowed processor \"{}\" for facet \"{}\"",
                    processor, facet
                )));
            }
        }

        Ok(ImportJob {
            inner: Arc::new(JobInner {
                id: Uuid::new_v4(),
                name: self.name.unwrap_or_else(build_name),
                config,
                managers,
                types,
                registry,
            }),
        })
    }
}

#[cfg(all(test, feature = "memory", feature = "csv"))]
mod tests {
    use std::{fs, sync::Arc};

    use tempfile::TempDir;

    use super::ImportJobBuilder;
    use crate::{
        config::ImportConfig, core::facet::ProcessorRegistry, error::BatchError,
        item::memory::MemoryStore,
    };

    fn config(location: &std::path::Path) -> ImportConfig {
        let mut config = ImportConfig::new("supplier", location);
        config.mapping.insert(
            "item".to_string(),
            [(0, "supplier.code".to_string()), (1, "supplier.label".to_string())].into(),
        );
        config
    }

    #[test]
    fn disallowed_processor_fails_at_build() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let mut config = config(dir.path());
        config
            .mapping
            .insert("catalog".to_string(), [(2, "catalog.code".to_string())].into());

        let result = ImportJobBuilder::new()
            .config(config)
            .managers(Arc::new(store.clone()))
            .types(Arc::new(store))
            .registry(ProcessorRegistry::with_defaults().only(&["text", "media"]))
            .build();

        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }

    #[test]
    fn files_are_filtered_and_sorted() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.csv"), "").unwrap();
        fs::write(dir.path().join("a.CSV"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        let store = MemoryStore::new();

        let job = ImportJobBuilder::new()
            .config(config(dir.path()))
            .managers(Arc::new(store.clone()))
            .types(Arc::new(store))
            .build()
            .unwrap();

        let names: Vec<String> = job
            .files()
            .unwrap()
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.CSV", "b.csv"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_reports_every_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("1.csv"), "s1,One\ns2,Two\n").unwrap();
        fs::write(dir.path().join("2.csv"), "s3,Three\n,Nameless\n").unwrap();
        let store = MemoryStore::new();

        let job = ImportJobBuilder::new()
            .config(config(dir.path()))
            .managers(Arc::new(store.clone()))
            .types(Arc::new(store.clone()))
            .build()
            .unwrap();

        let execution = job.run().await.unwrap();

        assert_eq!(execution.files.len(), 2);
        assert!(execution.files[0].is_success());
        assert!(!execution.files[1].is_success());
        assert_eq!(execution.stats.total, 4);
        assert_eq!(execution.stats.errors, 1);
        assert!(execution.notification().unwrap().contains("1 error(s)"));
        assert!(execution.ensure_complete().is_err());
        assert_eq!(store.items("supplier").len(), 3);
    }

    #[tokio::test]
    async fn run_blocking_refuses_to_nest_runtimes() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();

        let job = ImportJobBuilder::new()
            .config(config(dir.path()))
            .managers(Arc::new(store.clone()))
            .types(Arc::new(store))
            .build()
            .unwrap();

        assert!(matches!(
            job.run_blocking(),
            Err(BatchError::Configuration(_))
        ));
    }
}
