use std::path::PathBuf;
use std::sync::Arc;

use survey_export::config::AppConfig;
use survey_export::database::Database;
use survey_export::domains::export::{
    stream_responses, to_records, CsvConfig, CsvRecord, ExportError, ExportStats, RowStream,
    StreamingCsvWriter,
};
use survey_export::domains::response::{ResponseFilter, ResponseRow, SqliteResponseRepository};
use tokio::io::{AsyncWrite, BufWriter};

const USAGE: &str = "usage: export_responses [--owner EMAIL --survey NAME] [--output PATH]";

#[derive(Debug, PartialEq)]
struct Args {
    filter: ResponseFilter,
    output: Option<PathBuf>,
}

fn parse_args<I: Iterator<Item = String>>(mut args: I) -> Result<Args, String> {
    let mut owner = None;
    let mut survey = None;
    let mut output = None;

    while let Some(flag) = args.next() {
        let mut value = || args.next().ok_or_else(|| format!("{} needs a value", flag));
        match flag.as_str() {
            "--owner" => owner = Some(value()?),
            "--survey" => survey = Some(value()?),
            "--output" | "-o" => output = Some(PathBuf::from(value()?)),
            other => return Err(format!("unknown argument {}", other)),
        }
    }

    let filter = match (owner, survey) {
        (Some(owner), Some(survey)) => ResponseFilter::survey(owner, survey),
        (None, None) => ResponseFilter::All,
        _ => return Err("--owner and --survey go together".to_string()),
    };
    Ok(Args { filter, output })
}

async fn drain<W>(sink: W, rows: RowStream) -> Result<ExportStats, ExportError>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut writer = StreamingCsvWriter::new(sink, CsvConfig::default(), ResponseRow::schema());
    writer.write_stream(to_records(rows)).await
}

async fn run(db: &Database, config: &AppConfig, args: Args) -> Result<ExportStats, ExportError> {
    let repo = Arc::new(SqliteResponseRepository::new(db.pool().clone()));
    let rows = stream_responses(repo, args.filter, config.export_page_size);

    match args.output {
        Some(path) => {
            let file = tokio::fs::File::create(&path).await?;
            log::info!("Writing responses to {}", path.display());
            drain(BufWriter::new(file), rows).await
        }
        None => drain(tokio::io::stdout(), rows).await,
    }
}

#[tokio::main]
async fn main() {
    survey_export::init_logging();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{}\n{}", err, USAGE);
            std::process::exit(2);
        }
    };

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            log::error!("Invalid configuration: {}", err);
            std::process::exit(1);
        }
    };

    let db = match Database::connect(&config).await {
        Ok(db) => db,
        Err(err) => {
            log::error!("Database initialization failed: {}", err);
            std::process::exit(1);
        }
    };

    let result = run(&db, &config, args).await;
    db.close().await;

    match result {
        Ok(stats) => log::info!(
            "Exported {} responses ({} bytes) in {}ms",
            stats.records_written,
            stats.bytes_written,
            stats.duration_ms
        ),
        Err(err) => {
            log::error!("Export failed: {}", err);
            std::process::exit(1);
        }
    }
}
