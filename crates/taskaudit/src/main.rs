//! Taskaudit command line
//!
//! Runs the ingestion API server, applies migrations, ingests local files or
//! endpoints in-process, inspects and manages jobs, and uploads files to a
//! running server.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use taskaudit_common::LogFormat;
use taskaudit_config::ApplicationConfig;
use taskaudit_config::source::ConfigurationLoader;
use taskaudit_ingestion::RecordType;
use taskaudit_upload::PayloadFormat;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use uuid::Uuid;

/// Ingestion and vectorization pipeline for task and feedback records
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML); `taskaudit.toml` is used when present
    #[arg(long, short = 'c', global = true)]
    config_file: Option<PathBuf>,

    /// Log directory; logs go to stderr only unless set here or in config
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the upload and job API server
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1:3000")]
        bind: String,
    },

    /// Apply pending database migrations
    Migrate,

    /// Ingest a file or endpoint in this process and wait for the job to finish
    Ingest {
        #[command(flatten)]
        target: JobTarget,

        /// CSV or JSON file to ingest
        #[arg(long, conflicts_with = "endpoint", required_unless_present = "endpoint")]
        file: Option<PathBuf>,

        /// Payload format; guessed from the file extension when omitted
        #[arg(long, value_enum)]
        format: Option<FormatArg>,

        /// URL returning the rows to ingest
        #[arg(long)]
        endpoint: Option<String>,

        /// JSON pointer to the row array in the endpoint response
        #[arg(long, requires = "endpoint")]
        pointer: Option<String>,

        /// Extra request header for the endpoint, as NAME=VALUE
        #[arg(long = "header", value_parser = parse_header, requires = "endpoint")]
        headers: Vec<(String, String)>,
    },

    /// Show one job
    Status { job_id: Uuid },

    /// List the newest jobs of a project
    List {
        #[arg(long)]
        project: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Cancel a pending or running job
    Cancel { job_id: Uuid },

    /// Delete a finished job and every record it created
    Delete { job_id: Uuid },

    /// Upload a file to a running server, in chunks when it is large
    Upload {
        file: PathBuf,

        #[command(flatten)]
        target: JobTarget,

        #[arg(long, value_enum)]
        format: Option<FormatArg>,

        /// Server URL; defaults to `upload.server_url`
        #[arg(long)]
        server: Option<String>,
    },
}

/// Where the records go and how they are filtered
#[derive(clap::Args, Debug, Clone)]
struct JobTarget {
    /// Project (partition) the records belong to
    #[arg(long)]
    project: String,

    /// Record type: task or feedback
    #[arg(long = "type", default_value = "task")]
    record_type: RecordType,

    /// Keep only rows containing one of these words (repeatable)
    #[arg(long = "keyword")]
    keywords: Vec<String>,

    /// Source tag for rows that carry none
    #[arg(long)]
    source: Option<String>,

    /// Generate embeddings after loading
    #[arg(long)]
    embeddings: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum FormatArg {
    Csv,
    Json,
}

impl From<FormatArg> for PayloadFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Csv => Self::Csv,
            FormatArg::Json => Self::Json,
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("Expected NAME=VALUE, got '{raw}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskaudit_common::initialize_environment();
    let args = Args::parse();

    let mut config = ConfigurationLoader::standard(args.config_file.as_deref()).load()?;
    if let Some(dir) = &args.log_dir {
        config.telemetry.log_dir = Some(dir.display().to_string());
    }
    if matches!(args.command, Command::Serve { .. }) && config.telemetry.log_dir.is_none() {
        config.telemetry.log_dir = Some(get_default_log_dir().display().to_string());
    }

    // Guards flush buffered log lines on drop; keep them for all of main()
    let _guards = init_logging(&config)?;

    commands::run(args.command, &config).await
}

fn init_logging(config: &ApplicationConfig) -> anyhow::Result<Vec<WorkerGuard>> {
    let telemetry = &config.telemetry;
    let format: LogFormat = telemetry
        .log_format
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let (stderr_writer, stderr_guard): (NonBlocking, WorkerGuard) =
        tracing_appender::non_blocking(std::io::stderr());

    let Some(log_dir) = &telemetry.log_dir else {
        taskaudit_common::init_tracing(&telemetry.tracing_level, format, stderr_writer)
            .map_err(|e| anyhow::anyhow!(e))?;
        return Ok(vec![stderr_guard]);
    };

    std::fs::create_dir_all(log_dir)?;
    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        log_dir,
        format!("{}.log", telemetry.service_name),
    );
    let (file_writer, file_guard): (NonBlocking, WorkerGuard) =
        tracing_appender::non_blocking(file_appender);

    taskaudit_common::init_tracing(
        &telemetry.tracing_level,
        format,
        file_writer.and(stderr_writer),
    )
    .map_err(|e| anyhow::anyhow!(e))?;
    Ok(vec![file_guard, stderr_guard])
}

/// Get the default log directory based on the operating system
fn get_default_log_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("LOCALAPPDATA").map_or_else(
            || PathBuf::from("logs"),
            |local| PathBuf::from(local).join("taskaudit").join("logs"),
        )
    }

    #[cfg(target_os = "macos")]
    {
        dirs::home_dir().map_or_else(
            || PathBuf::from("logs"),
            |home| home.join("Library").join("Logs").join("taskaudit"),
        )
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let system_log_dir = std::path::Path::new("/var/log/taskaudit");

        if system_log_dir.exists() && is_writable(system_log_dir) {
            system_log_dir.to_path_buf()
        } else if let Some(data_dir) = dirs::data_dir() {
            data_dir.join("taskaudit").join("logs")
        } else if let Some(home) = dirs::home_dir() {
            home.join(".taskaudit").join("logs")
        } else {
            PathBuf::from("logs")
        }
    }
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn is_writable(path: &std::path::Path) -> bool {
    tempfile::tempfile_in(path).is_ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parsing() {
        assert_eq!(
            parse_header("Authorization = Bearer abc").unwrap(),
            ("Authorization".to_string(), "Bearer abc".to_string())
        );
        assert_eq!(
            parse_header("X-Query=a=b").unwrap(),
            ("X-Query".to_string(), "a=b".to_string())
        );
        assert!(parse_header("no-separator").is_err());
        assert!(parse_header("=value").is_err());
    }

    #[test]
    fn test_ingest_requires_file_or_endpoint() {
        let parsed = Args::try_parse_from(["taskaudit", "ingest", "--project", "p"]);
        assert!(parsed.is_err());

        let parsed = Args::try_parse_from([
            "taskaudit", "ingest", "--project", "p", "--type", "feedback", "--file", "rows.csv",
        ])
        .unwrap();
        match parsed.command {
            Command::Ingest { target, file, .. } => {
                assert_eq!(target.record_type, RecordType::Feedback);
                assert_eq!(file, Some(PathBuf::from("rows.csv")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_pointer_requires_endpoint() {
        let parsed = Args::try_parse_from([
            "taskaudit", "ingest", "--project", "p", "--file", "a.json", "--pointer", "/data",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_command_line_is_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
