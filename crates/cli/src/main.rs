use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Quill — Zulip bot that drafts and files YouTrack issues", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Print the configured project catalog used for issue project resolution.
    Projects {
        /// Config file path (default: QUILL_CONFIG_PATH or ~/.quill/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the bot: long-poll Zulip for messages and dispatch them to handlers.
    Run {
        /// Config file path (default: QUILL_CONFIG_PATH or ~/.quill/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("quill {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Projects { config }) => {
            if let Err(e) = run_projects(config) {
                log::error!("projects failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config }) => {
            if let Err(e) = run_bot(config).await {
                log::error!("run failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_projects(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = lib::config::load_config(config_path)?;
    if config.projects.is_empty() {
        println!("no projects configured in {}", path.display());
        return Ok(());
    }
    for p in &config.projects {
        println!("{}\t{}\t{}\t{}", p.id, p.key, p.name, p.description);
    }
    Ok(())
}

async fn run_bot(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = lib::config::load_config(config_path)?;
    log::info!("loaded config from {}", path.display());
    lib::app::run_app(config).await
}
