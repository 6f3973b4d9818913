use anyhow::Context;
use clap::Parser;
use smuffkit::console::{self, ConsoleCommand, ConsoleHost};
use smuffkit::{
    build_coordinator, init_logging, list_ports, start_auto_connect, Config, Coordinator,
    Operation, OperationResult, ToolChangeOutcome, ToolChangeStart, BUILD_DATE, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Operator console for SMuFF filament controllers
#[derive(Debug, Parser)]
#[command(name = "smuffkit", version, about)]
struct Args {
    /// Configuration file (.toml or .json)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Serial port of a single device, overrides the configuration file
    #[arg(short, long, value_name = "PORT")]
    port: Option<String>,

    /// Log raw serial traffic from the start
    #[arg(long)]
    dump: bool,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(port) = &args.port {
        config.has_idex = false;
        config.device.serial = port.clone();
    }
    if args.dump {
        config.device.debug = true;
        if let Some(device_b) = config.device_b.as_mut() {
            device_b.debug = true;
        }
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn print_result(result: OperationResult) {
    match result {
        // already reported through the notifier
        OperationResult::Done
        | OperationResult::Flag(_)
        | OperationResult::Text(_)
        | OperationResult::Response(_) => {}
        OperationResult::Status(snapshot) => match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => println!("{}", json),
            Err(err) => tracing::error!("Failed to render status: {}", err),
        },
        OperationResult::Firmware(info) => println!("{}", info.raw),
        OperationResult::Materials(materials) => {
            for (tool, material) in materials.iter().enumerate() {
                println!(
                    "T{}: {} {} ({}%)",
                    tool, material.material, material.color, material.purge_factor
                );
            }
        }
        OperationResult::Table(values) => {
            for (tool, value) in values.iter().enumerate() {
                println!("T{}: {}", tool, value);
            }
        }
        OperationResult::ToolChange(_) | OperationResult::Ticket(_) => {}
    }
}

/// Run one operation; blocking ones go to the blocking pool and tool changes
/// and tracked commands are driven on the runtime
async fn run_operation(coordinator: Arc<Coordinator>, operation: Operation) {
    let instance = coordinator.active_instance();
    let worker = coordinator.clone();
    let result =
        tokio::task::spawn_blocking(move || worker.execute_on(instance, operation)).await;

    let result = match result {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            println!("!! {}", err);
            return;
        }
        Err(err) => {
            tracing::error!("Operation task failed: {}", err);
            return;
        }
    };

    match result {
        OperationResult::ToolChange(ToolChangeStart::Started(session)) => {
            tokio::spawn(async move {
                match session.run_async().await {
                    ToolChangeOutcome::Completed { tool, elapsed, .. } => {
                        println!("T{} selected in {:.1}s", tool, elapsed.as_secs_f64());
                    }
                    ToolChangeOutcome::Aborted { tool, reason, .. } => {
                        println!("!! Tool change to T{} failed: {}", tool, reason);
                    }
                }
            });
        }
        OperationResult::Ticket(ticket) => {
            tokio::spawn(async move {
                let Some(controller) = coordinator.controller(instance) else {
                    return;
                };
                let outcome = controller
                    .wait_for(&ticket, Duration::from_millis(250))
                    .await;
                println!("{}: {:?}", ticket.command(), outcome);
            });
        }
        other => print_result(other),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging()?;
    tracing::info!("smuffkit {} (built {})", VERSION, BUILD_DATE);

    let config = load_config(&args)?;
    let coordinator = Arc::new(build_coordinator(&config, ConsoleHost::services()));
    start_auto_connect(&config, &coordinator);

    println!("{}", console::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match console::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("!! {}", message);
                continue;
            }
        };

        match command {
            ConsoleCommand::Run(operation) => run_operation(coordinator.clone(), operation).await,
            ConsoleCommand::Instance(instance) => match coordinator.select_instance(instance) {
                Ok(()) => println!("Active instance: {}", instance),
                Err(err) => println!("!! {}", err),
            },
            ConsoleCommand::Ports => match list_ports() {
                Ok(ports) => {
                    for port in ports {
                        println!("{}\t{}", port.port_name, port.description);
                    }
                }
                Err(err) => println!("!! {}", err),
            },
            ConsoleCommand::Help => println!("{}", console::HELP),
            ConsoleCommand::Quit => break,
        }
    }

    let worker = coordinator.clone();
    tokio::task::spawn_blocking(move || worker.disconnect_all()).await?;
    Ok(())
}
