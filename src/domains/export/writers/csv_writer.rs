use crate::domains::export::csv_record::ExportRecord;
use crate::domains::export::types::*;
use futures::future;
use futures::stream::{self, Stream, StreamExt};
use std::cell::RefCell;
use std::io;
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone)]
pub struct CsvConfig {
    pub delimiter: u8,
    pub quote_char: u8,
    /// Prefix the output with a UTF-8 BOM for spreadsheet applications.
    pub bom: bool,
    /// Records written between flushes of the sink.
    pub batch_size: usize,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote_char: b'"',
            bom: false,
            batch_size: 1000,
        }
    }
}

/// Bytes the `csv` writer produced since the last `take`.
#[derive(Debug, Default)]
struct LineBuffer(RefCell<Vec<u8>>);

impl LineBuffer {
    fn take(&self) -> Vec<u8> {
        self.0.take()
    }
}

impl io::Write for LineBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.get_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Turns export records into CSV bytes, one line at a time.
///
/// Fields are quoted only when they contain the delimiter, the quote character
/// or a line break; embedded quotes are doubled. Lines end with `\n`.
pub struct CsvEncoder {
    bom: bool,
    writer: csv::Writer<LineBuffer>,
    schema: CsvSchema,
    header: Option<Vec<String>>,
    dropped_fields: usize,
}

impl CsvEncoder {
    pub fn new(config: CsvConfig, schema: CsvSchema) -> Self {
        let writer = csv::WriterBuilder::new()
            .delimiter(config.delimiter)
            .quote(config.quote_char)
            .quote_style(csv::QuoteStyle::Necessary)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(LineBuffer::default());

        Self {
            bom: config.bom,
            writer,
            schema,
            header: None,
            dropped_fields: 0,
        }
    }

    /// Bytes due before the first record. For a fixed schema this is the
    /// header line, so an empty export still has one. Empty for an inferred
    /// schema. Call once.
    pub fn start(&mut self) -> Result<Vec<u8>, ExportError> {
        match &self.schema {
            CsvSchema::Fixed(columns) if self.header.is_none() => {
                let columns = columns.clone();
                self.write_header(columns)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Encodes one record. With an inferred schema the first call also emits
    /// the header built from that record's keys.
    pub fn encode(&mut self, record: &ExportRecord) -> Result<Vec<u8>, ExportError> {
        let mut out = Vec::new();
        if self.header.is_none() {
            let columns = match &self.schema {
                CsvSchema::Fixed(columns) => columns.clone(),
                CsvSchema::Inferred => record.keys().map(str::to_string).collect(),
            };
            out = self.write_header(columns)?;
        }

        let header = self.header.as_deref().unwrap_or_default();
        let dropped = record
            .keys()
            .filter(|key| !header.iter().any(|column| column == key))
            .count();
        if dropped > 0 {
            log::debug!("Dropping {} field(s) not present in the CSV header", dropped);
            self.dropped_fields += dropped;
        }

        let fields: Vec<&str> = header
            .iter()
            .map(|column| record.get(column).unwrap_or(""))
            .collect();
        out.extend(write_row(&mut self.writer, &fields)?);
        Ok(out)
    }

    pub fn dropped_fields(&self) -> usize {
        self.dropped_fields
    }

    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    fn write_header(&mut self, columns: Vec<String>) -> Result<Vec<u8>, ExportError> {
        let mut out = Vec::new();
        if self.bom {
            out.extend_from_slice(UTF8_BOM);
        }
        out.extend(write_row(&mut self.writer, &columns)?);
        self.header = Some(columns);
        Ok(out)
    }
}

fn write_row<T: AsRef<[u8]>>(
    writer: &mut csv::Writer<LineBuffer>,
    fields: &[T],
) -> Result<Vec<u8>, ExportError> {
    writer
        .write_record(fields)
        .map_err(|e| ExportError::Serialization(e.to_string()))?;
    writer.flush().map_err(|e| ExportError::Io(e.to_string()))?;
    Ok(writer.get_ref().take())
}

impl std::fmt::Debug for CsvEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvEncoder")
            .field("schema", &self.schema)
            .field("header", &self.header)
            .field("dropped_fields", &self.dropped_fields)
            .finish()
    }
}

/// Lazily encodes `records` into CSV chunks: the fixed header (if any), then
/// one chunk per record. Nothing is pulled from `records` until the returned
/// stream is polled. The stream ends after the first error it yields.
pub fn csv_byte_stream<S>(
    records: S,
    mut encoder: CsvEncoder,
) -> impl Stream<Item = Result<Vec<u8>, ExportError>> + Send
where
    S: Stream<Item = Result<ExportRecord, ExportError>> + Send,
{
    let head = match encoder.start() {
        Ok(bytes) if bytes.is_empty() => None,
        other => Some(other),
    };
    let head_failed = matches!(head, Some(Err(_)));

    let body = records.scan((encoder, head_failed), |(encoder, failed), item| {
        if *failed {
            return future::ready(None);
        }
        let chunk = item.and_then(|record| encoder.encode(&record));
        *failed = chunk.is_err();
        future::ready(Some(chunk))
    });

    stream::iter(head).chain(body)
}

/// Streaming CSV writer over any async sink.
pub struct StreamingCsvWriter<W: AsyncWrite + Unpin + Send> {
    inner: W,
    config: CsvConfig,
    encoder: CsvEncoder,
    stats: ExportStats,
    start_time: Instant,
}

impl<W: AsyncWrite + Unpin + Send> StreamingCsvWriter<W> {
    pub fn new(writer: W, config: CsvConfig, schema: CsvSchema) -> Self {
        Self {
            inner: writer,
            encoder: CsvEncoder::new(config.clone(), schema),
            config,
            stats: ExportStats::default(),
            start_time: Instant::now(),
        }
    }

    /// Drains `stream` into the sink. Stops at the first error; bytes already
    /// written stay written.
    pub async fn write_stream<S>(&mut self, stream: S) -> Result<ExportStats, ExportError>
    where
        S: Stream<Item = Result<ExportRecord, ExportError>> + Send,
    {
        let mut stream = std::pin::pin!(stream);

        let head = self.encoder.start()?;
        self.write_bytes(&head).await?;

        let mut since_flush = 0;
        while let Some(result) = stream.next().await {
            let record = result?;
            let bytes = self.encoder.encode(&record)?;
            self.write_bytes(&bytes).await?;
            self.stats.records_written += 1;

            since_flush += 1;
            if since_flush >= self.config.batch_size {
                self.flush().await?;
                since_flush = 0;
                tokio::task::yield_now().await;
            }
        }

        self.flush().await?;

        self.stats.dropped_fields = self.encoder.dropped_fields();
        self.stats.duration_ms = self.start_time.elapsed().as_millis() as u64;
        Ok(self.stats.clone())
    }

    pub async fn flush(&mut self) -> Result<(), ExportError> {
        self.inner
            .flush()
            .await
            .map_err(|e| ExportError::Io(e.to_string()))
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ExportError> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.inner
            .write_all(bytes)
            .await
            .map_err(|e| ExportError::Io(e.to_string()))?;
        self.stats.bytes_written += bytes.len();
        Ok(())
    }
}
