use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use medlens_contracts::events::EventWriter;
use medlens_contracts::models::{ModelRegistry, CAPABILITY_VISION};
use medlens_contracts::prompts::Locale;
use medlens_engine::{analyze_upload, CredentialStatus, MedlensConfig, Upload, UploadJob};
use tracing::{info, warn};
use uuid::Uuid;

mod server;

#[derive(Debug, Parser)]
#[command(
    name = "medlens",
    version,
    about = "Medical image analysis and research assistant"
)]
struct Cli {
    /// Config file (defaults to ./medlens.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Append request events as JSON lines to this file
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the upload page
    Serve(ServeArgs),
    /// Analyze one image file and print the report
    Analyze(AnalyzeArgs),
    /// List the allowed models
    Models,
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<String>,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    locale: Option<Locale>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("medlens error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    if let Command::Models = cli.command {
        print_models();
        return Ok(0);
    }

    let mut config = MedlensConfig::load_with_dotenv(cli.config.as_deref())
        .context("failed to load configuration")?;
    let events = cli.events.map(open_events);

    match cli.command {
        Command::Serve(args) => {
            if let Some(bind) = args.bind {
                config.server.bind = bind;
            }
            run_serve(&config, events.as_ref())
        }
        Command::Analyze(args) => {
            if let Some(locale) = args.locale {
                config.general.locale = locale;
            }
            run_analyze(&config, args, events.as_ref())
        }
        Command::Models => Ok(0),
    }
}

fn init_tracing(quiet: bool, verbose: bool) -> Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("MEDLENS_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

fn check_credentials(config: &MedlensConfig) -> Result<CredentialStatus> {
    let status = config
        .credentials()
        .context("set GOOGLE_API_KEY (or MEDLENS_GEMINI__API_KEY) before starting")?;
    if !status.search_enabled {
        warn!("web search disabled (TAVILY_API_KEY unset or search.max_tool_rounds = 0)");
    }
    Ok(status)
}

fn open_events(path: PathBuf) -> EventWriter {
    let writer = EventWriter::new(path, Uuid::new_v4().to_string());
    info!(
        path = %writer.path().display(),
        session_id = writer.session_id(),
        "writing request events"
    );
    writer
}

fn run_serve(config: &MedlensConfig, events: Option<&EventWriter>) -> Result<i32> {
    let credentials = check_credentials(config)?;
    server::serve(config, credentials, events)?;
    Ok(0)
}

fn run_analyze(
    config: &MedlensConfig,
    args: AnalyzeArgs,
    events: Option<&EventWriter>,
) -> Result<i32> {
    check_credentials(config)?;
    let bytes =
        fs::read(&args.image).with_context(|| format!("failed to read {}", args.image.display()))?;
    let upload = Upload {
        bytes,
        file_name: args
            .image
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
    };
    let request_id = Uuid::new_v4().to_string();
    let job = UploadJob {
        request_id: &request_id,
        requested_model: args.model.as_deref(),
        events,
    };

    let outcome = analyze_upload(config, &upload, &job)?;
    if let Some(reason) = outcome.fallback_reason.as_deref() {
        eprintln!("{reason} Using {}.", outcome.model);
    }
    info!(%request_id, model = %outcome.model, "analysis complete");
    println!("{}", outcome.report);
    Ok(0)
}

fn print_models() {
    let registry = ModelRegistry::default();
    for model in registry.by_capability(CAPABILITY_VISION) {
        println!("{}\t{}", model.name, model.label);
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn analyze_accepts_model_and_locale() {
        let cli = Cli::try_parse_from([
            "medlens",
            "--quiet",
            "analyze",
            "--image",
            "torax.png",
            "--model",
            "gemini-2.5-flash-preview-05-20",
            "--locale",
            "en",
        ])
        .expect("parses");
        assert!(cli.quiet);
        match cli.command {
            Command::Analyze(args) => {
                assert_eq!(args.image, PathBuf::from("torax.png"));
                assert_eq!(args.model.as_deref(), Some("gemini-2.5-flash-preview-05-20"));
                assert_eq!(args.locale, Some(Locale::En));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn serve_takes_optional_bind_and_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "medlens",
            "serve",
            "--bind",
            "0.0.0.0:9000",
            "--events",
            "events.jsonl",
        ])
        .expect("parses");
        assert_eq!(cli.events, Some(PathBuf::from("events.jsonl")));
        match cli.command {
            Command::Serve(args) => assert_eq!(args.bind.as_deref(), Some("0.0.0.0:9000")),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn serve_refuses_to_bind_without_primary_key() -> anyhow::Result<()> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let address = listener.local_addr()?;
        drop(listener);
        let mut config = MedlensConfig::default();
        config.server.bind = address.to_string();

        let err = run_serve(&config, None).unwrap_err();
        assert!(format!("{err:#}").contains("GOOGLE_API_KEY"), "{err:#}");
        assert!(std::net::TcpStream::connect(address).is_err());
        Ok(())
    }

    #[test]
    fn analyze_refuses_before_touching_the_image() {
        let args = AnalyzeArgs {
            image: PathBuf::from("/nonexistent/medlens/torax.png"),
            model: None,
            locale: None,
        };

        let err = run_analyze(&MedlensConfig::default(), args, None).unwrap_err();
        let rendered = format!("{err:#}");
        assert!(rendered.contains("GOOGLE_API_KEY"), "{rendered}");
        assert!(!rendered.contains("failed to read"), "{rendered}");
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["medlens", "-v", "-q", "models"]).is_err());
    }

    #[test]
    fn unknown_locale_is_rejected() {
        assert!(
            Cli::try_parse_from(["medlens", "analyze", "--image", "x.png", "--locale", "fr"])
                .is_err()
        );
    }
}
