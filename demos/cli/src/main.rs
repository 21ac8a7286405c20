//! Command-line front end for a studio run.
//!
//! Run with: cargo run -p studio-cli-demo -- prompt="what's the weather in Napoli?"
//!
//! The server is taken from `STUDIO_BASE_URL` (default http://localhost:8080)
//! and `STUDIO_QUERY` (e.g. `?instance=default`), or from a TOML file named by
//! `STUDIO_CONFIG`. Arguments not given as `name=value` are asked for on stdin.

use anyhow::{Context, bail};
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use serde_json::{Map, Value};
use studio_client_core::{ArgSpec, ArgType, ClientConfig, ExecutorEvent, InputSource};
use studio_client_session::ExecutorController;
use studio_client_transport::{HttpTransport, NotificationBridge};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin},
    sync::Mutex,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Preset values from the command line, falling back to stdin prompts.
struct PromptInputs {
    preset: Map<String, Value>,
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl PromptInputs {
    fn new(preset: Map<String, Value>) -> Self {
        Self {
            preset,
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    async fn ask(&self, prompt: &str) -> Option<String> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(prompt.as_bytes()).await.ok()?;
        stdout.flush().await.ok()?;
        let line = self.lines.lock().await.next_line().await.ok().flatten()?;
        let line = line.trim();
        (!line.is_empty()).then(|| line.to_owned())
    }

    async fn confirm(&self, prompt: &str) -> bool {
        self.ask(prompt)
            .await
            .is_some_and(|answer| matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

#[async_trait]
impl InputSource for PromptInputs {
    async fn value_for(&self, arg: &ArgSpec) -> Option<Value> {
        if let Some(value) = self.preset.get(&arg.name) {
            return Some(value.clone());
        }
        // Images can only be preset.
        if arg.arg_type != ArgType::String {
            return None;
        }
        let marker = if arg.required { " (required)" } else { "" };
        self.ask(&format!("{}{marker}: ", arg.name))
            .await
            .map(Value::String)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = load_config()?;
    let preset = parse_assignments(std::env::args().skip(1))?;
    tracing::info!(base_url = %config.base_url, "connecting to studio");

    let transport = HttpTransport::from_config(&config)?;
    let mut controller = ExecutorController::new(transport, &config);
    let printer = tokio::spawn(print_events(controller.events().history_plus_stream()));

    let result = run(&mut controller, PromptInputs::new(preset)).await;

    // Dropping the controller closes the event bus and ends the printer.
    drop(controller);
    printer.await?;
    result
}

async fn run(
    controller: &mut ExecutorController<HttpTransport>,
    inputs: PromptInputs,
) -> anyhow::Result<()> {
    let (bridge, rx) = NotificationBridge::new();
    controller.attach_notifications(rx);

    controller.initialize().await?;
    let mut bridge = match controller.session().thread_id() {
        Some(thread) => bridge.with_thread(thread),
        None => bridge,
    };

    let mut outcome = controller.submit_from(&inputs).await;
    loop {
        match &outcome {
            Ok(Some(last)) => {
                bridge.observe_final(last)?;
                controller.apply_pending_notifications();
            }
            Ok(None) => {}
            Err(e) if e.is_precondition() => return Err(e.clone().into()),
            // Already reported through the event bus.
            Err(_) => {}
        }

        let Some(node) = controller
            .can_resume()
            .then(|| controller.checkpoint().map(|c| c.node.clone()))
            .flatten()
        else {
            break;
        };
        if !inputs.confirm(&format!("resume from {node}? [y/N] ")).await {
            break;
        }
        outcome = controller.resume().await;
    }
    Ok(())
}

async fn print_events(mut events: BoxStream<'static, ExecutorEvent>) {
    while let Some(event) = events.next().await {
        match event {
            ExecutorEvent::Init(data) => {
                let title = data.title.as_deref().unwrap_or(&data.id);
                println!("== {title} ({} args)", data.args.len());
            }
            ExecutorEvent::Result(result) => println!("result: {}", result.value()),
            ExecutorEvent::StateUpdated(update) => println!("state: {update}"),
            ExecutorEvent::Error(message) => eprintln!("error: {message}"),
        }
    }
}

fn load_config() -> anyhow::Result<ClientConfig> {
    let config = match std::env::var("STUDIO_CONFIG") {
        Ok(path) => ClientConfig::load(&path).with_context(|| format!("loading {path}"))?,
        Err(_) => ClientConfig::default(),
    };
    Ok(config.with_env_overrides().validated()?)
}

fn parse_assignments(args: impl Iterator<Item = String>) -> anyhow::Result<Map<String, Value>> {
    let mut values = Map::new();
    for arg in args {
        let Some((name, value)) = arg.split_once('=') else {
            bail!("expected name=value, got {arg:?}");
        };
        values.insert(name.to_owned(), Value::String(value.to_owned()));
    }
    Ok(values)
}
