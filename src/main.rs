use std::{
    io::Write,
    path::{Path, PathBuf},
};

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use futures::StreamExt;
use serial_repl::{
    cli::{Cli, Commands, Examples},
    config::Config,
    connection,
    error::Error,
    events::{ErrorMessage, OutputEvent, Transcript},
    logging,
    session::{OutputStream, Session},
    transport::Disconnection,
};
use tracing::{debug, info, Level};

fn read_code(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| eyre!("Could not read {path:?}: {e}"))
}

/// Show the output of a command until it ends.
/// Ctrl-C interrupts the running code.
async fn follow(
    session: &Session,
    mut output: OutputStream,
    disconnection: &Disconnection,
    json: bool,
) -> Result<()> {
    let mut transcript = Transcript::new();
    let mut interrupted = false;
    let mut failure: Option<ErrorMessage> = None;

    loop {
        tokio::select! {
            event = output.next() => {
                let Some(event) = event else {
                    break;
                };

                if let OutputEvent::ErrorMessage(error) = &event {
                    if !(interrupted && error.is_keyboard_interrupt()) {
                        failure = Some(error.clone());
                    }
                }

                if json {
                    println!("{}", serde_json::to_string(&event)?);
                    continue;
                }

                match event {
                    OutputEvent::NormalOutput { chunk, end } => {
                        let mut stdout = std::io::stdout().lock();
                        write!(stdout, "{}", transcript.push(&chunk, end))?;
                        stdout.flush()?;
                    }
                    OutputEvent::ResetPressed => eprintln!("[reset pressed]"),
                    OutputEvent::ErrorMessage(error) => eprintln!("{error}"),
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                info!("Ctrl-C, interrupting");
                interrupted = true;

                match session.interrupt().await {
                    // Raced with the code finishing.
                    Ok(()) | Err(Error::DeviceNotRunning) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    if disconnection.is_disconnected() {
        return Err(eyre!("The device disconnected"));
    }

    match failure {
        Some(error) => Err(eyre!("The code failed: {error}")),
        None => Ok(()),
    }
}

async fn run(cli: &Cli, config: &Config) -> Result<()> {
    if let Commands::Ports = cli.command {
        for port in connection::list_ports(config)? {
            if cli.json {
                println!("{}", serde_json::to_string(&port)?);
            } else {
                println!(
                    "{} ({:04x}:{:04x}) {}",
                    port.path,
                    port.vendor_id,
                    port.product_id,
                    port.product.as_deref().unwrap_or_default()
                );
            }
        }

        return Ok(());
    }

    let connection::Connection {
        session,
        disconnection,
    } = connection::connect(config).await?;

    let outcome = async {
        let output = match &cli.command {
            Commands::Flash { file } => session.flash(&read_code(file)?).await?,
            Commands::Execute { file, code } => {
                let code = match (file, code) {
                    (_, Some(code)) => code.clone(),
                    (Some(file), None) => read_code(file)?,
                    (None, None) => return Err(eyre!("Nothing to execute")),
                };

                session.execute(&code).await?
            }
            Commands::Reboot => session.reboot().await?,
            Commands::Complete { prefix } => {
                let completions = session.completions(prefix).await?;

                if cli.json {
                    println!("{}", serde_json::to_string(&completions)?);
                } else {
                    for completion in completions {
                        println!("{completion}");
                    }
                }

                return Ok(());
            }
            Commands::Ports | Commands::Examples(_) => return Ok(()),
        };

        follow(&session, output, &disconnection, cli.json).await
    }
    .await;

    session.disconnect().await;

    outcome
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    if let Commands::Examples(Examples::Config) = cli.command {
        println!("{}", Config::example().serialize_pretty()?);

        return Ok(());
    }

    logging::init(
        Level::WARN,
        cli.log_dir.clone().map(|dir: PathBuf| (Level::DEBUG, dir)),
    )
    .await;

    let mut config = if let Some(config_path) = &cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };

    if let Some(port) = &cli.port {
        config.port = Some(port.clone());
    }

    run(&cli, &config).await
}
