use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Metrics setup failed: {0}")]
    Setup(#[from] SetupError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the one-time metrics export setup. Each variant names the step.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("no OTLP metrics endpoint configured")]
    MissingEndpoint,

    #[error("failed to instantiate metrics exporter: {0}")]
    Exporter(String),

    #[error("failed to build resource descriptor: {0}")]
    Resource(String),

    #[error("failed to build meter provider: {0}")]
    Provider(String),

    #[error("instrument {name} is already registered")]
    DuplicateInstrument { name: String },
}

pub type Result<T> = std::result::Result<T, Error>;
