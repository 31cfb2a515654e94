use thiserror::Error;

use crate::config::YearMonth;
use crate::raster::RasterError;

/// Failure of a single pixel during one month.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PixelError {
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("climate input out of range: {0}")]
    DomainInput(String),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invariant violated at pixel {pixel}: {detail}")]
    InvariantViolation { pixel: usize, detail: String },

    #[error("bad climate input at pixel {pixel} in {month}: {detail}")]
    DomainInput {
        pixel: usize,
        month: YearMonth,
        detail: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("cannot {action} while simulation is {state}")]
    InvalidTransition { action: &'static str, state: String },

    #[error(transparent)]
    Raster(#[from] RasterError),
}

impl ModelError {
    pub fn from_pixel(err: PixelError, pixel: usize, month: YearMonth) -> Self {
        match err {
            PixelError::InvariantViolation(detail) => {
                ModelError::InvariantViolation { pixel, detail }
            }
            PixelError::DomainInput(detail) => ModelError::DomainInput {
                pixel,
                month,
                detail,
            },
        }
    }
}
