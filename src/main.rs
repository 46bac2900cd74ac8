use clap::{Parser, Subcommand};
use siphon_lib::{load_settings, DirectorySavePicker, FormatSpec, Settings, Siphon, ToolLocator};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "siphon", version, about = "Save audio or video from a media URL")]
struct Cli {
    /// Settings file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print title, duration, thumbnail and uploader as JSON
    Info { url: String },
    /// Download as mp3 (audio) or mp4 (video)
    Download {
        url: String,
        #[arg(long, default_value = "video", value_parser = ["audio", "video", "mp3", "mp4"])]
        format: String,
        /// Where to save; defaults to `video.<ext>` in the download directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let settings = match cli.config.as_deref() {
        Some(path) => load_settings(path).map_err(|error| error.to_string())?,
        None => Settings::default(),
    };
    let download_dir = settings
        .download_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let locator = ToolLocator::from_settings(settings);

    match cli.command {
        Command::Info { url } => {
            let siphon = Siphon::new(locator, DirectorySavePicker { dir: download_dir });
            let info = siphon.get_video_info(url).await?;
            let payload = serde_json::to_string_pretty(&info)
                .map_err(|error| format!("Failed to serialize video info: {error}"))?;
            println!("{payload}");
        }
        Command::Download {
            url,
            format,
            output,
        } => {
            let siphon = match output {
                Some(path) => Siphon::new(locator, move |_: &str, _: FormatSpec| -> Option<PathBuf> {
                    Some(path.clone())
                }),
                None => Siphon::new(locator, DirectorySavePicker { dir: download_dir }),
            };
            let listener = siphon.on_download_progress(|percent| eprint!("\r{percent:>3}%"));
            let response = siphon.download_media(url, format).await;
            tokio::task::yield_now().await;
            listener.unsubscribe();
            eprintln!();
            let payload = serde_json::to_string(&response?)
                .map_err(|error| format!("Failed to serialize result: {error}"))?;
            println!("{payload}");
        }
    }
    Ok(())
}
