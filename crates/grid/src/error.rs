/// Errors from building, configuring or restoring a grid.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("invalid cell size {width}x{height}")]
    InvalidCellSize { width: u32, height: u32 },
    #[error("invalid world size {width}x{height}")]
    InvalidWorldSize { width: u32, height: u32 },
    #[error("snapshot holds {found} cells, grid geometry needs {expected}")]
    CellCountMismatch { expected: usize, found: usize },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("config parse error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
