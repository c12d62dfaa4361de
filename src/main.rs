use std::path::PathBuf;
use std::sync::Arc;

use rapport::admin::AdminConsole;
use rapport::config::{AppConfig, RuntimeOverrides};
use rapport::state::SqliteStateStore;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path = PathBuf::from("config.toml");
    if args.first().map(String::as_str) == Some("--config") {
        let Some(path) = args.get(1) else {
            eprintln!("--config needs a path");
            std::process::exit(2);
        };
        config_path = PathBuf::from(path);
        args.drain(..2);
    }

    match args.first().map(String::as_str) {
        Some("--version" | "-V") => {
            println!("rapport {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some("--help" | "-h") | None => {
            print_help();
            return Ok(());
        }
        Some(_) => {}
    }

    let config = if config_path.exists() {
        AppConfig::load(&config_path)?
    } else {
        eprintln!("{} not found; using defaults", config_path.display());
        AppConfig::default()
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config, args))
}

async fn run(config: AppConfig, args: Vec<String>) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStateStore::new(&config.state.db_path).await?);
    let overrides = Arc::new(RuntimeOverrides::new(&config.action_check));
    let console = AdminConsole::new(&config, store, overrides);

    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let report = match args.as_slice() {
        ["list"] => console.list().await?,
        ["view", id] => console.view(id).await?,
        ["set", id, score] => {
            let score: f64 = score
                .parse()
                .map_err(|_| anyhow::anyhow!("not a number: {}", score))?;
            console.set_score(id, score).await?
        }
        _ => {
            eprintln!("Unknown command: {}\n", args.join(" "));
            print_help();
            std::process::exit(2);
        }
    };
    println!("{}", report);
    Ok(())
}

fn print_help() {
    println!("rapport {}", env!("CARGO_PKG_VERSION"));
    println!("{}\n", env!("CARGO_PKG_DESCRIPTION"));
    println!("Usage: rapport [--config PATH] [COMMAND]\n");
    println!("Commands:");
    println!("  list                  List every subject with score and level");
    println!("  view <id>             Show one subject's impression");
    println!("  set <id> <score>      Set a subject's score (creates it if absent)");
    println!("\nOptions:");
    println!("  --config PATH    Config file (default: config.toml)");
    println!("  -h, --help       Print help");
    println!("  -V, --version    Print version");
}
