pub mod csv_writer;

pub use csv_writer::{csv_byte_stream, CsvConfig, CsvEncoder, StreamingCsvWriter};
