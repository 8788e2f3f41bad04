pub mod cursor;
pub mod repository;
pub mod service;
pub mod types;

pub use cursor::ResponseCursor;
pub use repository::{ResponseRepository, SqliteResponseRepository};
pub use types::{RespondentSpan, ResponseFilter, ResponsePage, ResponseRow};
