use serde::Serialize;

use crate::error::AppError;

/// Default page size for list endpoints.
pub const DEFAULT_LIMIT: i64 = 50;
/// Server-side cap on page size, regardless of what the client asks for.
pub const MAX_LIMIT: i64 = 100;

/// Offset pagination echoed back in list responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct Pagination {
    /// Effective page size after clamping.
    #[schema(example = 50)]
    pub limit: u64,
    /// Number of items skipped.
    #[schema(example = 0)]
    pub offset: u64,
    /// Total number of matching items.
    #[schema(example = 47)]
    pub total: u64,
}

/// Clamp `limit` to `1..=MAX_LIMIT` (default [`DEFAULT_LIMIT`]) and reject a
/// negative `offset`.
pub fn page_window(limit: Option<i64>, offset: Option<i64>) -> Result<(u64, u64), AppError> {
    let offset = offset.unwrap_or(0);
    if offset < 0 {
        return Err(AppError::Validation("offset must be >= 0".into()));
    }
    let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Ok((limit as u64, offset as u64))
}
