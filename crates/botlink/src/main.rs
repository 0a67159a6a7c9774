use std::time::Duration;

use botlink::{
    ActionRef, BotClient, ClientConfig, ClientEvent, ConnectionState, Endpoint, FallbackEndpoint,
};
use clap::Parser;
use serde_json::{Map, Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Connect to a local bot server and print its events as JSON lines.
///
/// Examples:
///   botlink --subscribe Twitch:ChatMessage,Follow
///   botlink --port 8081 --action Shoutout --args '{"user":"bob"}'
#[derive(Parser)]
#[command(author, version)]
struct Cli {
    /// Host of the bot server.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port of the bot server.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// `ws` or `wss`.
    #[arg(long, default_value = "ws")]
    protocol: String,

    /// Path of the WebSocket endpoint.
    #[arg(long, default_value = "/")]
    path: String,

    /// Host tried after repeated failures against the primary.
    #[arg(long, requires = "fallback_port")]
    fallback_host: Option<String>,

    #[arg(long, requires = "fallback_host")]
    fallback_port: Option<u16>,

    /// Events to subscribe to, as "Category:Event1,Event2". Repeatable.
    #[arg(short, long = "subscribe", value_name = "CATEGORY:EVENTS", value_parser = parse_subscription)]
    subscriptions: Vec<(String, Vec<String>)>,

    /// Delay before reconnecting, e.g. "5s" or "500ms".
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
    reconnect_delay: Duration,

    /// Timeout for each request.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10s")]
    request_timeout: Duration,

    /// Timeout for each dial.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10s")]
    connect_timeout: Duration,

    /// Run this action once and exit instead of streaming events.
    #[arg(long)]
    action: Option<String>,

    /// JSON object passed as the action's arguments.
    #[arg(long, requires = "action", value_parser = parse_args)]
    args: Option<Map<String, Value>>,

    /// How long `--action` waits for a connection.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    wait: Duration,
}

fn parse_subscription(value: &str) -> Result<(String, Vec<String>), String> {
    let (category, events) = value
        .split_once(':')
        .ok_or_else(|| format!("expected CATEGORY:EVENTS, got {value:?}"))?;
    let events: Vec<String> = events
        .split(',')
        .map(str::trim)
        .filter(|event| !event.is_empty())
        .map(str::to_string)
        .collect();
    if category.trim().is_empty() || events.is_empty() {
        return Err(format!("expected CATEGORY:EVENTS, got {value:?}"));
    }
    Ok((category.trim().to_string(), events))
}

fn parse_args(value: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str(value) {
        Ok(Value::Object(args)) => Ok(args),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(e) => Err(e.to_string()),
    }
}

impl Cli {
    fn config(&self) -> ClientConfig {
        let primary = Endpoint::new(&self.host, self.port)
            .protocol(&self.protocol)
            .path(&self.path);
        let mut config = ClientConfig::new(primary)
            .reconnect_delay(self.reconnect_delay)
            .request_timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            // One-shot runs have no use for the session cache.
            .bootstrap(self.action.is_none());
        if let (Some(host), Some(port)) = (&self.fallback_host, self.fallback_port) {
            config = config.fallback(FallbackEndpoint::new(host, port));
        }
        config
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = BotClient::new(cli.config())?;

    for (category, events) in &cli.subscriptions {
        client.subscribe(category, events.iter().cloned()).await?;
    }

    match &cli.action {
        Some(action) => {
            run_action(&client, action, cli.args.clone().unwrap_or_default(), cli.wait).await
        }
        None => stream_events(&client).await,
    }
}

async fn run_action(
    client: &BotClient,
    action: &str,
    args: Map<String, Value>,
    wait: Duration,
) -> eyre::Result<()> {
    client.connect().await?;
    tokio::time::timeout(wait, client.wait_for_state(ConnectionState::Connected))
        .await
        .map_err(|_| eyre::eyre!("not connected after {}", humantime::format_duration(wait)))??;

    let response = client.do_action(ActionRef::name(action), args).await?;
    println!("{response}");

    client.disconnect().await?;
    Ok(())
}

async fn stream_events(client: &BotClient) -> eyre::Result<()> {
    let mut events = client.events();
    client.connect().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; disconnecting");
                break;
            }
            event = events.recv() => match event {
                Some(ClientEvent::Event { key, event }) => {
                    println!("{}", json!({ "key": key, "event": &*event }));
                }
                Some(ClientEvent::SessionReady) => {
                    let session = client.session();
                    info!(
                        actions = session.actions.len(),
                        commands = session.commands.len(),
                        "Session ready"
                    );
                }
                Some(ClientEvent::Disconnected { reason }) => {
                    warn!(reason = %reason, "Disconnected");
                }
                Some(_) => {}
                None => break,
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}
