use clap::Parser;
use log::{debug, error};
use nicodl::config::Config;
use nicodl::{is_unavailable, level_filter, resolve_niconico, DownloadOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Parser, Clone)]
#[command(version, about)]
pub struct Cli {
    /// A watch URL or a video id such as sm9.
    pub url: String,

    #[arg(long = "format", short)]
    pub format: Option<String>,

    #[arg(long = "list-formats", short = 'F', action = clap::ArgAction::SetTrue)]
    pub list_formats: bool,

    #[arg(long = "json", action = clap::ArgAction::SetTrue)]
    pub json: bool,

    /// Keep the session alive until Ctrl-C.
    #[arg(long = "hold", action = clap::ArgAction::SetTrue)]
    pub hold: bool,

    #[arg(long = "user-session")]
    pub user_session: Option<String>,

    #[arg(long = "ffprobe")]
    pub ffprobe: Option<PathBuf>,

    #[arg(long = "timeout", short)]
    pub timeout: Option<u64>,

    #[arg(
        long = "verbosity",
        short,
        default_value = "info",
        value_parser = clap::builder::PossibleValuesParser::new([
            "info", "debug", "error", "none", "full"
        ])
    )]
    pub verbosity: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    env_logger::Builder::new()
        .filter_level(level_filter(&args.verbosity))
        .init();

    let config = Config::load().with_overrides(args.user_session, args.ffprobe, args.timeout);
    if let Some(path) = Config::path() {
        debug!("Config file: {}", path.display());
    }

    let options = DownloadOptions {
        url: args.url,
        format: args.format,
        list_formats: args.list_formats,
        json: args.json,
        hold: args.hold,
        user_session: config.checked_user_session().map(str::to_string),
        user_agent: config.user_agent.clone(),
        ffprobe_path: config
            .ffprobe_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("ffprobe")),
        timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
    };

    match resolve_niconico(options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_unavailable(e.as_ref()) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
