use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ordlista_rs::web::{self, WebConfig};
use ordlista_rs::{KarpQuery, Settings, SubtypeStore, build_query};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ordlista", about = "Minority-language wordlists on top of Karp", version)]
pub struct Cli {
    /// Emit JSON instead of human-readable tables.
    #[arg(long, global = true)]
    json: bool,

    /// Local settings, layered over the defaults. May be absent.
    #[arg(long, global = true, env = "ORDLISTA_SETTINGS", default_value = "conf/settings.json")]
    settings: PathBuf,

    /// Shipped default settings.
    #[arg(
        long,
        global = true,
        env = "ORDLISTA_DEFAULTS",
        default_value = "conf/settings_default.json"
    )]
    defaults: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, global = true)]
    develop: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "ORDLISTA_ADDR", default_value = "127.0.0.1:4000")]
        addr: SocketAddr,
        /// Base URL of the Karp web service.
        #[arg(long, env = "KARP_URL", default_value = ordlista_rs::karp::DEFAULT_KARP_URL)]
        karp_url: String,
        /// Seconds before an upstream call is abandoned.
        #[arg(long, default_value_t = 30)]
        upstream_timeout: u64,
    },
    /// List the configured modes.
    Modes,
    /// Print the Karp query a search would send.
    Query {
        mode: String,
        /// Search word; empty matches everything.
        #[arg(short, long, default_value = "")]
        q: String,
        /// Comma separated subtypes to restrict to.
        #[arg(short, long, default_value = "")]
        subtypes: String,
        /// Match the word anywhere instead of as a prefix.
        #[arg(long)]
        contains: bool,
        /// Language to search in; defaults to the mode's source language.
        #[arg(short, long)]
        lang: Option<String>,
    },
    /// Inspect or change the published subtypes of a mode.
    #[command(subcommand)]
    Subtypes(SubtypeCommand),
}

#[derive(Subcommand, Debug)]
enum SubtypeCommand {
    /// Show the published subtypes.
    List { mode: String },
    /// Publish a subtype.
    Publish { mode: String, subtype: String },
    /// Withdraw a published subtype.
    Unpublish { mode: String, subtype: String },
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.develop);
    let settings = Settings::load(&cli.settings, &cli.defaults)?;
    match cli.command {
        Command::Serve {
            addr,
            karp_url,
            upstream_timeout,
        } => handle_serve(
            WebConfig {
                addr,
                karp_url,
                upstream_timeout: Duration::from_secs(upstream_timeout),
            },
            settings,
        ),
        Command::Modes => handle_modes(&settings, cli.json),
        Command::Query {
            mode,
            q,
            subtypes,
            contains,
            lang,
        } => handle_query(&settings, &mode, &q, &subtypes, contains, lang, cli.json),
        Command::Subtypes(command) => handle_subtypes(settings, command, cli.json),
    }
}

fn init_tracing(develop: bool) {
    let level = if develop { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_serve(config: WebConfig, settings: Settings) -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(web::serve(config, settings))?;
    Ok(())
}

fn handle_modes(settings: &Settings, as_json: bool) -> Result<(), Box<dyn Error>> {
    let modes = settings.modes();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&json!({ "modes": modes }))?);
        return Ok(());
    }
    let width = modes.iter().map(String::len).max().unwrap_or(4).max("MODE".len());
    println!("{:<width$}  {}", "MODE", "STATUS", width = width);
    println!("{:-<width$}  {}", "", "------", width = width);
    for mode in &modes {
        let status = match settings.profile(mode) {
            Ok(_) => "ok".to_string(),
            Err(err) => err.to_string(),
        };
        println!("{:<width$}  {}", mode, status, width = width);
    }
    Ok(())
}

fn handle_query(
    settings: &Settings,
    mode: &str,
    word: &str,
    subtypes: &str,
    contains: bool,
    lang: Option<String>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let profile = settings.profile(mode)?;
    let lang = lang.unwrap_or_else(|| profile.source_language.clone());
    if !profile.supports_language(&lang) {
        return Err(format!(
            "Unknown language {lang:?} for {mode}; expected one of {}",
            profile.languages.join(", ")
        )
        .into());
    }
    let subtypes: Vec<String> = subtypes
        .split(',')
        .map(str::trim)
        .filter(|subtype| !subtype.is_empty())
        .map(str::to_string)
        .collect();
    let q = build_query(word.trim(), &subtypes, contains, &lang, profile);
    if as_json {
        let query = KarpQuery::search(profile, q, profile.max_size, &lang);
        println!("{}", serde_json::to_string_pretty(&query)?);
    } else {
        println!("{q}");
    }
    Ok(())
}

fn handle_subtypes(
    settings: Settings,
    command: SubtypeCommand,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let store = SubtypeStore::new(Arc::new(settings));
    let (mode, subtypes) = match command {
        SubtypeCommand::List { mode } => {
            let subtypes = store.list(&mode)?;
            (mode, subtypes)
        }
        SubtypeCommand::Publish { mode, subtype } => {
            let subtypes = store.publish(&mode, &subtype)?;
            (mode, subtypes)
        }
        SubtypeCommand::Unpublish { mode, subtype } => {
            let subtypes = store.unpublish(&mode, &subtype)?;
            (mode, subtypes)
        }
    };
    if as_json {
        let payload = json!({ "mode": mode, "subtypes": subtypes });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if subtypes.is_empty() {
        println!("No subtypes are published for {mode}.");
    } else {
        println!("Published subtypes for {mode}:");
        for subtype in &subtypes {
            println!("  {subtype}");
        }
    }
    Ok(())
}
