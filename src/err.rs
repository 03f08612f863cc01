#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("setup error: {0}")]
    Setup(#[from] crate::fastpass::SetupError),

    #[error("bind error: {0}")]
    Bind(#[from] std::io::Error),
}
