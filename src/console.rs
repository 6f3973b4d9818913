//! Operator console
//!
//! Line based commands read from stdin, and the host collaborators used when
//! the driver runs stand-alone (no printer host around it).

use smuffkit_communication::{Instance, Operation};
use smuffkit_core::{HostError, HostServices, MacroRunner, Notifier, PrintState};
use std::io::Write;
use std::sync::Arc;

/// One parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Run a driver operation on the active instance
    Run(Operation),
    /// Route following operations to another device
    Instance(Instance),
    /// List the serial ports of this machine
    Ports,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  CONNECT | DISCONNECT | CONN            connection control and status
  TOOL <n>                               change to tool n
  LOAD | UNLOAD                          load or unload the selected tool
  CUT | WIPE | HOME | MOTORS | JAM       simple device actions
  LID OPEN|CLOSE                         open or close the lid
  SERVO [<servo>] <angle>                move a servo
  SEND <gcode>                           send a raw GCode line
  PARAM <name> <value>                   change a device setting
  INFO | STATUS | VERSION                firmware, device and driver info
  MATERIALS | SWAPS | SERVOMAPS          re-read configuration tables
  RESET | STATS RESET | DUMP             reset device, statistics, raw dump
  INSTANCE A|B                           select the device (IDEX)
  PORTS | HELP | QUIT";

fn argument<'a>(args: &[&'a str], index: usize, name: &str) -> Result<&'a str, String> {
    args.get(index)
        .copied()
        .ok_or_else(|| format!("Missing {}", name))
}

fn number<T: std::str::FromStr>(text: &str, name: &str) -> Result<T, String> {
    text.trim_start_matches(['T', 't'])
        .parse()
        .map_err(|_| format!("Invalid {} '{}'", name, text))
}

/// Parse one console line
///
/// Returns `Ok(None)` for blank lines.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (keyword, rest) = match line.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (line, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();
    let run = |operation: Operation| -> Result<Option<ConsoleCommand>, String> {
        Ok(Some(ConsoleCommand::Run(operation)))
    };

    match keyword.to_ascii_uppercase().as_str() {
        "CONNECT" => run(Operation::Connect),
        "DISCONNECT" => run(Operation::Disconnect),
        "CONN" => run(Operation::ConnectionStatus),
        "TOOL" | "T" => run(Operation::ChangeTool(number(
            argument(&args, 0, "tool")?,
            "tool",
        )?)),
        "LOAD" => run(Operation::Load),
        "UNLOAD" => run(Operation::Unload),
        "CUT" => run(Operation::Cut),
        "WIPE" => run(Operation::Wipe),
        "HOME" => run(Operation::Home),
        "MOTORS" => run(Operation::MotorsOff),
        "JAM" => run(Operation::ClearJam),
        "LID" => match argument(&args, 0, "OPEN or CLOSE")?.to_ascii_uppercase().as_str() {
            "OPEN" => run(Operation::OpenLid),
            "CLOSE" => run(Operation::CloseLid),
            other => Err(format!("Unknown lid action '{}'", other)),
        },
        "SERVO" => match args.as_slice() {
            [angle] => run(Operation::SetServo {
                servo: None,
                angle: number(angle, "angle")?,
            }),
            [servo, angle] => run(Operation::SetServo {
                servo: Some(number(servo, "servo")?),
                angle: number(angle, "angle")?,
            }),
            _ => Err("Usage: SERVO [<servo>] <angle>".to_string()),
        },
        "SEND" => run(Operation::SendRaw(rest.to_string())),
        "PARAM" => run(Operation::SetParameter {
            name: argument(&args, 0, "parameter name")?.to_string(),
            value: args.get(1..).map(|v| v.join(" ")).unwrap_or_default(),
        }),
        "INFO" => run(Operation::FirmwareInfo),
        "STATUS" => run(Operation::Status),
        "VERSION" => run(Operation::Version),
        "MATERIALS" => run(Operation::Materials),
        "SWAPS" => run(Operation::Swaps),
        "SERVOMAPS" => run(Operation::ServoMaps),
        "RESET" => run(Operation::Reset),
        "STATS" => match args.first().map(|a| a.to_ascii_uppercase()) {
            Some(arg) if arg == "RESET" => run(Operation::ResetStatistics),
            _ => Err("Usage: STATS RESET".to_string()),
        },
        "DUMP" => run(Operation::ToggleRawDump),
        "INSTANCE" => argument(&args, 0, "instance")?
            .parse()
            .map(|instance| Some(ConsoleCommand::Instance(instance)))
            .map_err(|err: smuffkit_core::Error| err.to_string()),
        "PORTS" => Ok(Some(ConsoleCommand::Ports)),
        "HELP" | "?" => Ok(Some(ConsoleCommand::Help)),
        "QUIT" | "EXIT" => Ok(Some(ConsoleCommand::Quit)),
        other => Err(format!("Unknown command '{}', try HELP", other)),
    }
}

/// Host collaborators of the stand-alone console
///
/// Never printing, never paused, always hot enough. Macros are only logged
/// and operator messages go to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleHost;

impl ConsoleHost {
    pub fn services() -> HostServices {
        let host = Arc::new(ConsoleHost);
        HostServices::default()
            .with_macros(host.clone())
            .with_print_state(host.clone())
            .with_notifier(host)
    }
}

impl MacroRunner for ConsoleHost {
    fn run_pre_toolchange(&self, pending_tool: i32) -> Result<(), HostError> {
        tracing::info!("PRE_TOOLCHANGE T={}", pending_tool);
        Ok(())
    }

    fn run_post_toolchange(&self, previous_tool: i32, new_tool: i32) -> Result<(), HostError> {
        tracing::info!("POST_TOOLCHANGE P={} T={}", previous_tool, new_tool);
        Ok(())
    }

    fn select_tool(&self, tool: i32) -> Result<(), HostError> {
        tracing::info!("Device selected T{}", tool);
        Ok(())
    }
}

impl PrintState for ConsoleHost {}

impl Notifier for ConsoleHost {
    fn respond(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(err) = writeln!(stdout, "// {}", text) {
            tracing::warn!("Failed to write to console: {}", err);
        }
    }
}
