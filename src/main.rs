use chat_sentry::commands::{top_stop_words, TOP_LIMIT};
use chat_sentry::detector;
use chat_sentry::enforcement::EnforcementPolicy;
use chat_sentry::messaging::bot_api::BotApiClient;
use chat_sentry::{Config, ModerationCoordinator, PolicyStore, SnowballStemmer};
use clap::{Arg, Command};
use log::LevelFilter;
use std::process;
use std::sync::Arc;
use tokio::sync::mpsc;

const EVENT_QUEUE: usize = 256;

#[tokio::main]
async fn main() {
    let matches = Command::new("chat-sentry")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Group chat moderator with a stemmed stop-word list")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/chat-sentry.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Check configuration and startup credentials")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("stats")
                .long("stats")
                .help("Show the persisted stop list and moderation counters")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("test-message")
                .long("test-message")
                .value_name("TEXT")
                .help("Check a message against the persisted policy without changing it")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/chat-sentry.yaml");

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        test_config(&config);
        return;
    }

    if matches.get_flag("stats") {
        show_stats(&config);
        return;
    }

    if let Some(text) = matches.get_one::<String>("test-message") {
        test_message(&config, text);
        return;
    }

    if let Err(e) = run(config).await {
        log::error!("{e:#}");
        process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let chat = config.chat()?;
    let credentials = config.credentials()?;
    let stemmer = Arc::new(SnowballStemmer::russian());

    let store = PolicyStore::open(&config.persist_path, stemmer.as_ref());
    let restarts = store.record_restart();
    log::info!(
        "Starting chat-sentry v{} (lifecycle #{restarts})",
        env!("CARGO_PKG_VERSION")
    );
    let autosave = store.schedule_autosave(config.autosave_interval());

    let client = Arc::new(BotApiClient::new(
        &config.api_base_url,
        &credentials.bot_token(),
        config.request_timeout(),
        config.poll_timeout(),
    )?);

    let (sender, receiver) = mpsc::channel(EVENT_QUEUE);
    let poller = Arc::clone(&client).spawn_poller(sender);

    let coordinator = ModerationCoordinator::new(chat, client, store.shared(), stemmer)
    .with_enforcement(EnforcementPolicy::new(
        config.volume_threshold,
        config.notice_ttl(),
    ))
    .with_call_timeout(config.request_timeout());

    tokio::select! {
        _ = coordinator.run(receiver) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                log::warn!("Failed to listen for shutdown signal: {e}");
            }
            log::info!("Received shutdown signal, saving state...");
        }
    }

    poller.abort();
    autosave.abort();
    store.flush()?;
    log::info!("Policy state saved to {}", store.path().display());
    Ok(())
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(Config::default())
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Set chat_id and provide APP_ID / API_HASH before starting.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

fn test_config(config: &Config) {
    println!("🔍 Testing configuration...");
    println!();
    println!("Chat: {}", config.chat_id);
    println!("State file: {}", config.persist_path);
    println!(
        "Autosave every {}s, notices removed after {}s",
        config.autosave_interval().as_secs(),
        config.notice_ttl_seconds
    );
    println!(
        "Members with more than {} messages are not moderated",
        config.volume_threshold
    );

    if let Err(e) = config.chat() {
        println!("❌ {e}");
        process::exit(1);
    }

    match config.credentials() {
        Ok(credentials) => println!("✅ Credentials present (application {})", credentials.app_id),
        Err(e) => {
            println!("❌ {e}");
            process::exit(1);
        }
    }
}

fn show_stats(config: &Config) {
    let state = PolicyStore::open(&config.persist_path, &SnowballStemmer::russian()).snapshot();

    println!("📊 chat-sentry statistics");
    println!("═══════════════════════════════════════");
    println!("  Lifecycles:        {}", state.restart_count);
    println!("  Messages removed:  {}", state.ban_counter);
    println!("  Stop words:        {}", state.stop_words.len());
    println!("  Restricted letters: {}", state.restricted_letters.len());
    println!();

    let top = top_stop_words(&state, TOP_LIMIT);
    if top.is_empty() {
        println!("📭 No stop word has matched yet");
    } else {
        println!("🎯 Top stop words:");
        for (word, count) in &top {
            println!("  {word:<30} {count:>7}");
        }
    }

    if !state.restricted_letters.is_empty() {
        println!();
        println!("🔤 Restricted letters:");
        for (letter, count) in &state.restricted_letters {
            println!("  {letter:<30} {count:>7}");
        }
    }
}

fn test_message(config: &Config, text: &str) {
    // Detection bumps counters; run it on a copy so nothing is persisted
    let stemmer = SnowballStemmer::russian();
    let mut state = PolicyStore::open(&config.persist_path, &stemmer).snapshot();

    println!("🧪 Testing message: {text}");
    match detector::detect(text, &mut state, &stemmer) {
        Some(violation) => {
            println!("🚨 Result: VIOLATION");
            println!("   Reason: {violation}");
        }
        None => println!("✅ Result: CLEAN"),
    }
}
