use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShadowError {
    #[error("Image loading error: {0}")]
    ImageLoad(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scene cache serialization error: {0}")]
    SceneCache(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient scene geometry: {0}")]
    InsufficientGeometry(String),

    #[error("Degenerate shadow homography: {0}")]
    DegenerateHomography(String),
}

impl ShadowError {
    /// True for failures that should degrade to "omit the shadow" rather than
    /// abort the surrounding composite.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ShadowError::InsufficientGeometry(_) | ShadowError::DegenerateHomography(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ShadowError>;
