use super::cursor::ResponseCursor;
use super::repository::ResponseRepository;
use super::types::{ResponseFilter, ResponsePage, ResponseWithToken};
use crate::errors::{DomainResult, ValidationError};

pub const DEFAULT_PAGE_SIZE: usize = 25;
pub const MAX_PAGE_SIZE: usize = 1000;

/// One page of the dashboard's response listing. `after` is the token of the
/// last row the client already has.
pub async fn list_responses(
    repo: &dyn ResponseRepository,
    filter: &ResponseFilter,
    after: Option<&str>,
    page_size: Option<usize>,
) -> DomainResult<ResponsePage> {
    let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(ValidationError::range("pageSize", 1, MAX_PAGE_SIZE).into());
    }

    let cursor = after
        .filter(|token| !token.is_empty())
        .map(ResponseCursor::decode)
        .transpose()?;

    let rows = repo.fetch_page(filter, cursor.as_ref(), page_size).await?;

    let responses = rows
        .into_iter()
        .map(|row| ResponseWithToken {
            token: ResponseCursor::after(&row).encode(),
            row,
        })
        .collect();

    Ok(ResponsePage { responses })
}
