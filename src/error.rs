use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Detector Error: {0}")]
    Detector(String),

    #[error("Capture Error: {0}")]
    Capture(String),

    #[error("Queue overflow: `{queue}` holds {depth} items (threshold {threshold})")]
    QueueOverflow {
        queue: String,
        depth: usize,
        threshold: usize,
    },

    #[error("Cameras out of sync: primary frame {primary}, secondary frame {secondary}")]
    Desync { primary: u64, secondary: u64 },

    #[error("Malformed line `{line}`: {reason}")]
    Parse { line: String, reason: String },

    #[error("Video Error: {0}")]
    Video(String),

    #[cfg(feature = "opencv")]
    #[error("OpenCV Error: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("Store Error: {0}")]
    Store(String),

    #[error("Worker `{0}` panicked")]
    WorkerPanicked(String),
}

impl Error {
    pub fn parse(line: &str, reason: impl Into<String>) -> Self {
        Error::Parse {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}
