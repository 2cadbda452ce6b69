use thiserror::Error;

use crate::run::RunId;

/// Main error type for the Hyperloom system
#[derive(Error, Debug)]
pub enum HlError {
    #[error("Search space error: {0}")]
    Domain(#[from] DomainError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("Trainer error: {0}")]
    Trainer(#[from] TrainerError),

    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

}

/// Invalid search space definitions or configurations that fall outside one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("parameter {name}: lower bound {low} must be below upper bound {high}")]
    InvalidBounds { name: String, low: f64, high: f64 },

    #[error("parameter {name}: bounds must be finite")]
    NonFiniteBound { name: String },

    #[error("parameter {name}: range {low}..{high} is too wide to represent")]
    RangeTooWide { name: String, low: f64, high: f64 },

    #[error("parameter {name}: log-uniform lower bound must be positive, got {low}")]
    NonPositiveLogBound { name: String, low: f64 },

    #[error("parameter {name}: categorical choice set is empty")]
    EmptyChoices { name: String },

    #[error("parameter {name} is declared more than once")]
    DuplicateParameter { name: String },

    #[error("search space declares no parameters")]
    EmptySpace,

    #[error("unknown parameter: {name}")]
    UnknownParameter { name: String },

    #[error("missing parameter: {name}")]
    MissingParameter { name: String },

    #[error("parameter {name}: expected {expected} value, got {value}")]
    TypeMismatch {
        name: String,
        expected: String,
        value: String,
    },

    #[error("parameter {name}: value {value} is outside its domain")]
    OutOfDomain { name: String, value: String },
}

/// Run recorder errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error("invalid run {run_id}: {reason}")]
    InvalidRun { run_id: RunId, reason: String },

    #[error("run {run_id} is already sealed")]
    AlreadySealed { run_id: RunId },

    #[error("tracking store unavailable: {message}")]
    Unavailable { message: String },
}

impl RunError {
    pub fn unknown(run_id: RunId) -> Self {
        Self::InvalidRun {
            run_id,
            reason: "no such run".to_string(),
        }
    }

    pub fn sealed(run_id: RunId) -> Self {
        Self::InvalidRun {
            run_id,
            reason: "run is sealed".to_string(),
        }
    }

    /// Store failures are infrastructure problems; everything else is a
    /// caller contract violation.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// A single trial's training failed. Recovered by the orchestrator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrainerError {
    #[error("training failed: {message}")]
    Failed { message: String },

    #[error("invalid hyperparameter {parameter}: {message}")]
    InvalidConfiguration { parameter: String, message: String },

    #[error("trainer panicked: {message}")]
    Panicked { message: String },

    #[error("dataset unusable for training: {message}")]
    Data { message: String },
}

/// Failures outside the scope of a single trial. Fatal to the search.
#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("trial budget must be a positive integer")]
    InvalidBudget,

    #[error("search already ran; orchestrator is in state {state}")]
    InvalidState { state: String },

    #[error("run recorder failure: {0}")]
    Recorder(#[from] RunError),

    #[error("artifact store failure: {message}")]
    ArtifactStore { message: String },

    #[error("proposal engine produced an invalid configuration: {0}")]
    InvalidProposal(#[from] DomainError),

    #[error("search cancelled after {trials_recorded} recorded trials")]
    Cancelled { trials_recorded: usize },

    #[error("trial worker panicked: {message}")]
    WorkerPanicked { message: String },
}

/// Model registry / promotion errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("no usable model: {failed} of {budget} trials failed and the best score is {best_score}")]
    NoUsableModel {
        failed: usize,
        budget: usize,
        best_score: f64,
    },

    #[error("model not found: {name}")]
    NotFound { name: String },

    #[error("registry storage failure: {message}")]
    Storage { message: String },
}

/// Dataset collaborator errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("failed to load dataset: {message}")]
    Load { message: String },

    #[error("target column not found: {column}")]
    MissingColumn { column: String },

    #[error("malformed dataset: {message}")]
    Shape { message: String },

    #[error("dataset is empty")]
    Empty,
}

/// Result type alias for Hyperloom operations
pub type HlResult<T> = Result<T, HlError>;

pub type DomainResult<T> = Result<T, DomainError>;
pub type RunResult<T> = Result<T, RunError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::HlError::Config(format!($($arg)*))
    };
}
