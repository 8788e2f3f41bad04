use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::domains::export::csv_record::{CsvRecord, ExportRecord};
use crate::domains::export::types::ExportError;
use crate::domains::response::{ResponseCursor, ResponseFilter, ResponseRepository, ResponseRow};

pub type RowStream = Pin<Box<dyn Stream<Item = Result<ResponseRow, ExportError>> + Send>>;
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<ExportRecord, ExportError>> + Send>>;

/// Streams every response matching `filter`, one keyset page at a time.
///
/// A spawned task fetches pages into a channel holding at most `page_size`
/// rows, so it runs at most one page ahead of the consumer. Dropping the
/// returned stream stops the task before its next query.
pub fn stream_responses(
    repo: Arc<dyn ResponseRepository>,
    filter: ResponseFilter,
    page_size: usize,
) -> RowStream {
    let page_size = page_size.max(1);
    let (tx, rx) = mpsc::channel(page_size);

    tokio::spawn(async move {
        let mut cursor: Option<ResponseCursor> = None;
        let mut sent = 0usize;

        loop {
            if tx.is_closed() {
                log::debug!("Response stream dropped after {} rows, stopping", sent);
                return;
            }

            let rows = match repo.fetch_page(&filter, cursor.as_ref(), page_size).await {
                Ok(rows) => rows,
                Err(e) => {
                    log::error!("Failed to fetch responses after {} rows: {}", sent, e);
                    let _ = tx.send(Err(ExportError::from(e))).await;
                    return;
                }
            };

            let fetched = rows.len();
            if let Some(last) = rows.last() {
                cursor = Some(ResponseCursor::after(last));
            }

            for row in rows {
                if tx.send(Ok(row)).await.is_err() {
                    log::debug!("Response stream dropped after {} rows, stopping", sent);
                    return;
                }
                sent += 1;
            }

            if fetched < page_size {
                log::debug!("Response stream finished with {} rows", sent);
                return;
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

/// Maps a row stream through the transform stage.
pub fn to_records<T, S>(rows: S) -> RecordStream
where
    T: CsvRecord + Send + 'static,
    S: Stream<Item = Result<T, ExportError>> + Send + 'static,
{
    Box::pin(rows.map(|row| row.map(|row| row.to_record())))
}
