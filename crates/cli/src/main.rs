mod intake;

use anyhow::Context;
use clap::{Parser, Subcommand};
use converse::{Dispatched, Dispatcher, InboundMessage, Options, Outcome, Registry, Template};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

#[derive(Parser)]
#[command(name = "converse")]
#[command(about = "Converse CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// List the built-in dialogue templates.
    Templates,

    /// Feed messages to a dialogue from stdin. Each line is `<user> <channel> <text...>`; a user
    /// keeps talking to the same conversation in a channel until the dialogue finishes.
    Chat {
        /// Config file path (default: CONVERSE_CONFIG_PATH or ~/.converse/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// The agent's own user id; lines from it are ignored (overrides config and CONVERSE_AUTHOR_ID).
        #[arg(long, value_name = "ID")]
        author_id: Option<String>,

        /// Template to run.
        #[arg(long, short, default_value = intake::NAME)]
        template: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("converse {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Templates) => match intake::catalog() {
            Ok(catalog) => {
                for name in catalog.names() {
                    println!("{}", name);
                }
            }
            Err(e) => {
                log::error!("templates failed: {}", e);
                std::process::exit(1);
            }
        },
        Some(Commands::Chat {
            config,
            author_id,
            template,
        }) => {
            if let Err(e) = run_chat(config, author_id, template).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_chat(
    config_path: Option<std::path::PathBuf>,
    author_id: Option<String>,
    template_name: String,
) -> anyhow::Result<()> {
    let (config, path) = converse::config::load_config(config_path)?;
    log::info!("using config {}", path.display());

    let mut options = config.options();
    if let Some(id) = author_id {
        options = options.with_author_id(id);
    }
    let options = Arc::new(options);

    let catalog = intake::catalog()?;
    let template = catalog.get(&template_name).with_context(|| {
        format!(
            "unknown template: {} (available: {})",
            template_name,
            catalog.names().join(", ")
        )
    })?;

    let registry = Arc::new(Registry::new());
    let sweeper = config
        .idle_policy()
        .map(|policy| converse::spawn_idle_sweeper(&registry, policy));

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(64);
    // One task per message so a slow dialogue only holds up its own (user, channel).
    let processor = {
        let dispatcher = Dispatcher::new(registry.clone());
        tokio::spawn(async move {
            let mut turns = JoinSet::new();
            while let Some(msg) = inbound_rx.recv().await {
                let dispatcher = dispatcher.clone();
                let template = template.clone();
                let options = options.clone();
                turns.spawn(async move {
                    handle_message(&dispatcher, &template, &options, msg).await;
                });
                while let Some(done) = turns.try_join_next() {
                    if let Err(e) = done {
                        log::error!("chat: dispatch task failed: {}", e);
                    }
                }
            }
            while let Some(done) = turns.join_next().await {
                if let Err(e) = done {
                    log::error!("chat: dispatch task failed: {}", e);
                }
            }
        })
    };

    println!("type `<user> <channel> <text>` per line; /quit to exit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        let Some(msg) = parse_line(input) else {
            eprintln!("expected `<user> <channel> <text>`, got: {}", input);
            continue;
        };
        if inbound_tx.send(msg).await.is_err() {
            log::debug!("chat: processor stopped, no longer reading input");
            break;
        }
    }

    drop(inbound_tx);
    processor.await.context("message processor panicked")?;
    if let Some(handle) = sweeper {
        handle.abort();
    }
    let open = registry.len().await;
    if open > 0 {
        log::info!("chat: dropping {} unfinished conversation(s)", open);
    }
    registry.reset().await;
    Ok(())
}

async fn handle_message(
    dispatcher: &Dispatcher,
    template: &Arc<Template>,
    options: &Arc<Options>,
    msg: InboundMessage,
) {
    match dispatcher.dispatch(template, &msg, options).await {
        Ok(Dispatched::SelfAuthored) => {
            log::debug!("chat: skipped message from the agent itself");
        }
        Ok(Dispatched::Advanced {
            outcome: Outcome::Finished,
            conversation,
            ..
        }) => {
            log::info!("chat: conversation {} finished", conversation);
        }
        Ok(Dispatched::Advanced { .. }) => {}
        Err(e) => {
            log::warn!("chat: {:#}", e);
            println!(
                "[{}] conversation with {} ended after an error",
                msg.channel_id, msg.user_id
            );
        }
    }
}

/// Split `<user> <channel> <text...>`. Text may be empty; user and channel may not.
fn parse_line(line: &str) -> Option<InboundMessage> {
    let (user, rest) = line.trim().split_once(char::is_whitespace)?;
    let rest = rest.trim_start();
    let (channel, text) = rest
        .split_once(char::is_whitespace)
        .unwrap_or((rest, ""));
    if channel.is_empty() {
        return None;
    }
    Some(InboundMessage::new(user, channel, text.trim()))
}
