//! toolset-attach CLI - attach a terminal to remote toolset instances.
//!
//! This is the main binary entry point. See the `toolset_attach` library
//! for the core functionality.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use crossterm::terminal::disable_raw_mode;
use mimalloc::MiMalloc;
use toolset_attach::{api::ToolsetClient, commands, constants::DEFAULT_PAGE_TAKE, Config};

/// Global allocator.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "toolset-attach")]
#[command(version)]
#[command(about = "Attach a terminal to remote toolset instances")]
struct Cli {
    /// Server URL (overrides config and TOOLSET_SERVER_URL)
    #[arg(long, global = true)]
    server: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach the terminal to an instance (Ctrl-] detaches)
    Attach {
        /// Instance id
        id: String,
    },
    /// Launch a tool
    Launch {
        /// Tool id or name
        tool: String,
        /// Launch argument, NAME=VALUE (VALUE parsed as JSON when valid)
        #[arg(long = "arg", value_name = "NAME=VALUE")]
        args: Vec<String>,
        /// Attach to the new instance once launched
        #[arg(long)]
        attach: bool,
    },
    /// List available tools
    Tools,
    /// List instances
    Instances {
        /// Include finished instances
        #[arg(long)]
        all: bool,
        /// Number of instances to skip
        #[arg(long, default_value_t = 0)]
        skip: u32,
        /// Number of instances to show
        #[arg(long, default_value_t = DEFAULT_PAGE_TAKE)]
        take: u32,
    },
    /// Show one instance
    Show {
        /// Instance id
        id: String,
    },
    /// Print an instance's log
    Log {
        /// Instance id
        id: String,
        /// Fetch the whole log instead of the last 1MB
        #[arg(long)]
        all: bool,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Send a signal to a running instance
    Kill {
        /// Instance id
        id: String,
        /// Signal number or name (e.g. 15, SIGTERM, TERM)
        #[arg(short, long)]
        signal: String,
    },
    /// Save an API token
    Login {
        /// Bearer token
        token: String,
    },
    /// Show the effective configuration
    Config,
}

fn init_logging() {
    // Log to a file so raw-mode output is not interleaved with log lines.
    // Use TOOLSET_LOG_FILE or <config dir>/toolset-attach.log or fallback
    let log_path = if let Ok(path) = std::env::var("TOOLSET_LOG_FILE") {
        PathBuf::from(path)
    } else if let Ok(config_dir) = Config::config_dir() {
        config_dir.join("toolset-attach.log")
    } else {
        PathBuf::from("/tmp/toolset-attach.log")
    };
    match std::fs::File::create(&log_path) {
        Ok(log_file) => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .target(env_logger::Target::Pipe(Box::new(log_file)))
                .format_timestamp_secs()
                .init();
        }
        Err(e) => eprintln!("Warning: logging disabled, cannot create {}: {}", log_path.display(), e),
    }
}

fn load_config(server: Option<String>) -> Result<Config> {
    let mut config = Config::load()?;
    if let Some(server) = server {
        config.server_url = server;
    }
    Ok(config)
}

fn api_client(config: &Config) -> Result<ToolsetClient> {
    ToolsetClient::new(&config.server_url, config.token.clone())
}

fn exit_with(code: i32) {
    if code != 0 {
        std::process::exit(code);
    }
}

fn main() -> Result<()> {
    init_logging();

    // Set up panic hook to log panics and ensure terminal cleanup
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {:?}", panic_info);
        let _ = disable_raw_mode();
        default_hook(panic_info);
    }));

    let cli = Cli::parse();

    match cli.command {
        Commands::Attach { id } => {
            let config = load_config(cli.server)?;
            exit_with(commands::attach::run(&config, &id)?);
        }
        Commands::Launch { tool, args, attach } => {
            let config = load_config(cli.server)?;
            let instance = commands::toolset::launch(&api_client(&config)?, &tool, &args)?;
            if attach {
                exit_with(commands::attach::run(&config, &instance.id)?);
            }
        }
        Commands::Tools => {
            let config = load_config(cli.server)?;
            commands::toolset::tools(&api_client(&config)?)?;
        }
        Commands::Instances { all, skip, take } => {
            let config = load_config(cli.server)?;
            commands::toolset::instances(&api_client(&config)?, all, skip, take)?;
        }
        Commands::Show { id } => {
            let config = load_config(cli.server)?;
            commands::toolset::show(&api_client(&config)?, &id)?;
        }
        Commands::Log { id, all, output } => {
            let config = load_config(cli.server)?;
            commands::toolset::log(&api_client(&config)?, &id, all, output.as_deref())?;
        }
        Commands::Kill { id, signal } => {
            let config = load_config(cli.server)?;
            commands::toolset::kill(&api_client(&config)?, &id, &signal)?;
        }
        Commands::Login { token } => {
            commands::login(&token)?;
        }
        Commands::Config => {
            commands::show_config()?;
        }
    }

    Ok(())
}
