use anyhow::Result;
use autodl_claw_app::config::{AppConfig, DEFAULT_CONFIG_PATH};
use autodl_claw_app::App;
use autodl_claw_interfaces::{Interface, Responder, TerminalInterface};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = AppConfig::load_or_default(Path::new(DEFAULT_CONFIG_PATH))?;
    config.apply_env_overrides()?;
    config.validate()?;
    init_tracing(&config.log_level);

    let terminal = Arc::new(TerminalInterface::new(config.terminal_user_id));
    let app = Arc::new(App::open(&config, terminal.clone() as Arc<dyn Responder>)?);

    println!("AutoDL-Claw");
    println!("User identity: {}", terminal.user_id());
    println!("Send /help for commands, !<tool> <json> to call a tool, Ctrl-C to exit.");
    println!();

    app.resume().await;

    loop {
        tokio::select! {
            line = terminal.receive_input() => {
                let Some(line) = line else {
                    info!("Input closed");
                    break;
                };
                let app = app.clone();
                let user_id = terminal.user_id();
                // Long commands such as /refreshall must not block the prompt.
                tokio::spawn(async move { app.handle_line(user_id, &line).await });
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
        }
    }

    app.shutdown().await;
    info!("Shut down");
    Ok(())
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}
