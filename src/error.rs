use thiserror::Error;

#[derive(Error, Debug)]
/// Batch error
pub enum BatchError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("ItemReader from: {0}")]
    ItemReader(String),

    #[error("{0}")]
    Record(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Tasklet error: {0}")]
    Tasklet(String),

    #[error("{errors} of {total} record(s) could not be imported")]
    Incomplete { errors: usize, total: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
