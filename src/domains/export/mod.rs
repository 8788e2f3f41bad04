pub mod csv_record;
pub mod queue_manager;
pub mod repository;
pub mod service;
pub mod streaming;
pub mod types;
pub mod writers;

pub use csv_record::{CsvRecord, ExportRecord};
pub use queue_manager::{ExportQueueManager, JobProcessor};
pub use repository::{ExportJobRepository, SqliteExportJobRepository};
pub use service::{ExportService, ExportSettings};
pub use streaming::{stream_responses, to_records, RowStream};
pub use types::{CsvSchema, ExportError, ExportJob, ExportRequest, ExportStats, ExportStatus};
pub use writers::{csv_byte_stream, CsvConfig, CsvEncoder, StreamingCsvWriter};
