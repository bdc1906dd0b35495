use std::{path::PathBuf, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    api::{random_obstacle_distance, DEFAULT_EVENT_LIMIT},
    config::{load_settings_from, SETTINGS_FILE},
    ActivityKind, ClientEvent, ControlClient, NotificationLevel,
};
use shared::domain::Command as Movement;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// How long to keep printing server replies after a one-shot command.
const REPLY_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(about = "Drive a rover through the device-control server")]
struct Cli {
    #[arg(long, default_value = SETTINGS_FILE)]
    config: PathBuf,
    /// Overrides the configured device id.
    #[arg(long)]
    device_id: Option<i64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reads key names (w, a, s, d, ArrowUp, space, Escape, ...) from stdin.
    Drive {
        #[arg(long)]
        duration_ms: Option<u64>,
    },
    Send {
        command: String,
        #[arg(long)]
        duration_ms: Option<u64>,
        #[arg(long)]
        speed: Option<u32>,
    },
    RunTemplate {
        name: String,
    },
    RunSaved {
        name: String,
    },
    /// Saves steps written as `command:duration_ms`, e.g. `forward:1000 right:500`.
    Compose {
        name: String,
        #[arg(required = true)]
        steps: Vec<String>,
    },
    Saved {
        #[arg(long)]
        delete: Option<String>,
    },
    Status {
        #[arg(long, default_value_t = DEFAULT_EVENT_LIMIT)]
        limit: u32,
    },
    SimulateObstacle {
        #[arg(long)]
        distance_cm: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings_from(&cli.config, |key| std::env::var(key).ok());
    if let Some(device_id) = cli.device_id {
        if device_id <= 0 {
            bail!("device id must be positive, got {device_id}");
        }
        settings.device_id = device_id;
    }
    let default_duration_ms = settings.default_duration_ms;

    let client = ControlClient::new(settings).await?;
    let printer = tokio::spawn(print_events(BroadcastStream::new(client.subscribe_events())));

    let outcome = run(&client, cli.command, default_duration_ms).await;
    client.disconnect().await;
    printer.abort();
    outcome
}

async fn run(client: &ControlClient, command: Command, default_duration_ms: u64) -> Result<()> {
    match command {
        Command::Drive { duration_ms } => {
            client.connect_and_wait(CONNECT_TIMEOUT).await?;
            drive(client, duration_ms.unwrap_or(default_duration_ms)).await?;
        }
        Command::Send {
            command,
            duration_ms,
            speed,
        } => {
            client.connect_and_wait(CONNECT_TIMEOUT).await?;
            client
                .dispatcher()
                .send_movement(&command, duration_ms.unwrap_or(default_duration_ms), speed)
                .await?;
            tokio::time::sleep(REPLY_GRACE).await;
        }
        Command::RunTemplate { name } => {
            client.sequences().load_template_named(&name)?;
            execute(client).await?;
        }
        Command::RunSaved { name } => {
            client.sequences().load_saved(&name).await?;
            execute(client).await?;
        }
        Command::Compose { name, steps } => {
            for raw in &steps {
                let (movement, duration_ms) = parse_step(raw)?;
                client.sequences().append(movement, duration_ms)?;
            }
            client.sequences().save(&name).await?;
            println!(
                "saved '{}' ({} steps, {} ms)",
                name.trim(),
                client.sequences().len(),
                client.sequences().total_duration().as_millis()
            );
        }
        Command::Saved { delete } => {
            if let Some(name) = delete {
                if !client.sequences().delete_saved(&name).await? {
                    bail!("no saved sequence named '{name}'");
                }
                println!("deleted '{name}'");
            }
            for summary in client.sequences().saved_sequences().await? {
                println!(
                    "{:<24} {:>3} steps  saved {}",
                    summary.name,
                    summary.step_count,
                    summary.saved_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Command::Status { limit } => status(client, limit).await?,
        Command::SimulateObstacle { distance_cm } => {
            let distance_cm = distance_cm.unwrap_or_else(random_obstacle_distance);
            client
                .api()
                .simulate_obstacle(client.device_id(), distance_cm)
                .await?;
            println!("obstacle simulated at {distance_cm} cm");
        }
    }
    Ok(())
}

async fn drive(client: &ControlClient, duration_ms: u64) -> Result<()> {
    println!("drive mode: one key per line (w/a/s/d, arrows, space to stop), 'quit' to exit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let key = match line.trim() {
            "quit" | "exit" => break,
            "" => " ",
            key => key,
        };
        match client.dispatcher().send_key(key, duration_ms).await {
            Ok(Some(movement)) => info!(command = %movement, "drive: sent"),
            Ok(None) => println!("unbound key: {key}"),
            Err(err) => warn!(%err, "drive: command not sent"),
        }
    }

    let stats = client.session().stats();
    println!(
        "session {}: {} commands confirmed, {} obstacles",
        stats.elapsed_label(),
        stats.command_count,
        stats.obstacle_count
    );
    Ok(())
}

async fn execute(client: &ControlClient) -> Result<()> {
    client.connect_and_wait(CONNECT_TIMEOUT).await?;
    let report = client.sequences().execute().await?;
    println!(
        "sequence finished: {} steps in {:.1}s",
        report.steps_sent,
        report.elapsed.as_secs_f64()
    );
    tokio::time::sleep(REPLY_GRACE).await;
    for entry in client.session().activity(Some(ActivityKind::Movement)).iter().rev() {
        println!("  {}  {}", entry.received_at.format("%H:%M:%S"), entry.summary);
    }
    Ok(())
}

async fn status(client: &ControlClient, limit: u32) -> Result<()> {
    let api = client.api();
    let device_id = client.device_id();

    let health = api.health_check().await.context("API health check failed")?;
    println!("server: {health}");
    match client.sequences().store_health().await {
        Ok(()) => println!("sequence store: ok"),
        Err(err) => println!("sequence store: {err}"),
    }

    let response = api.device(device_id).await?;
    match response.device.filter(|_| response.success) {
        Some(device) => {
            println!(
                "device {}: {} @ {}",
                device_id,
                device.device_name.as_deref().unwrap_or("?"),
                device.client_ip.as_deref().unwrap_or("?")
            );
            if let Some(city) = device.city {
                println!("  location: {city}, {}", device.country.unwrap_or_default());
            }
        }
        None => println!("device {device_id}: not found"),
    }

    let history = api.events(device_id, limit).await?;
    if !history.success || history.events.is_empty() {
        println!("no history");
    }
    for event in &history.events {
        let duration = event
            .duration_ms()
            .map_or_else(|| "-".to_string(), |ms| ms.to_string());
        println!(
            "  {}  {:<20} {} ms",
            event.event_ts.as_deref().unwrap_or("-"),
            event.label(),
            duration
        );
    }
    Ok(())
}

fn parse_step(raw: &str) -> Result<(Movement, u64)> {
    let (command, duration) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("step '{raw}' must look like command:duration_ms"))?;
    let movement = command.trim().parse::<Movement>()?;
    let duration_ms = duration
        .trim()
        .parse::<u64>()
        .with_context(|| format!("invalid duration in step '{raw}'"))?;
    Ok((movement, duration_ms))
}

async fn print_events(mut events: BroadcastStream<ClientEvent>) {
    while let Some(event) = events.next().await {
        let Ok(event) = event else {
            continue;
        };
        match event {
            ClientEvent::ConnectionStateChanged(state) => println!("[channel] {state:?}"),
            ClientEvent::ReconnectScheduled {
                attempt,
                max_attempts,
                delay,
            } => println!(
                "[channel] reconnecting in {}s ({attempt}/{max_attempts})",
                delay.as_secs()
            ),
            ClientEvent::ReconnectExhausted { attempts } => {
                println!("[channel] gave up after {attempts} attempts")
            }
            ClientEvent::Notification(notification) => {
                let tag = match notification.level {
                    NotificationLevel::Info => "info",
                    NotificationLevel::Success => "ok",
                    NotificationLevel::Warning => "warn",
                    NotificationLevel::Error => "error",
                };
                println!("[{tag}] {}", notification.message);
            }
            ClientEvent::Activity(entry) => println!("[activity] {}", entry.summary),
            ClientEvent::SequenceProgress {
                step,
                total,
                command,
            } => println!("[sequence] step {step}/{total}: {}", command.label()),
            ClientEvent::SequenceFinished {
                steps_sent,
                total,
                success,
            } => println!(
                "[sequence] {} ({steps_sent}/{total})",
                if success { "completed" } else { "failed" }
            ),
            ClientEvent::Inbound(_) | ClientEvent::StatsUpdated(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compose_steps() {
        assert_eq!(
            parse_step("forward:1000").expect("step"),
            (Movement::Forward, 1000)
        );
        assert_eq!(
            parse_step(" rotate_left : 250 ").expect("step"),
            (Movement::RotateLeft, 250)
        );
        assert!(parse_step("forward").is_err());
        assert!(parse_step("fly:1000").is_err());
        assert!(parse_step("stop:soon").is_err());
    }

    #[test]
    fn cli_accepts_documented_subcommands() {
        let cli = Cli::try_parse_from(["controller", "--device-id", "3", "run-template", "square"])
            .expect("parse");
        assert_eq!(cli.device_id, Some(3));
        assert!(matches!(cli.command, Command::RunTemplate { name } if name == "square"));

        let cli = Cli::try_parse_from(["controller", "compose", "demo", "forward:1000", "stop:100"])
            .expect("parse");
        assert!(matches!(cli.command, Command::Compose { steps, .. } if steps.len() == 2));

        assert!(Cli::try_parse_from(["controller", "compose", "demo"]).is_err());
    }
}
