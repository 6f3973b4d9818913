//! Periodic state line parser
//!
//! The device sends its state roughly once per second:
//!
//! ```text
//! echo: states: T: T4  S: off  R: off  F: off  F2: off  TMC: -off  SD: off  SC: off  LID: off  I: off  SPL: 0
//! ```
//!
//! Every recognized key is parsed independently; unknown keys are skipped.

use regex::Regex;
use smuffkit_core::{DeviceState, NO_TOOL};
use std::sync::OnceLock;

/// TMC driver state from the `TMC:` token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TmcState {
    pub in_use: bool,
    pub warning: bool,
}

/// Values carried by one periodic state line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatesReport {
    pub tool: Option<i32>,
    pub selector: Option<bool>,
    pub revolver: Option<bool>,
    pub feeder: Option<bool>,
    pub feeder2: Option<bool>,
    pub sd_card: Option<bool>,
    pub config_changed: Option<bool>,
    pub lid: Option<bool>,
    pub idle: Option<bool>,
    pub tmc: Option<TmcState>,
    pub splitter: Option<u32>,
}

impl StatesReport {
    /// Parse the text following `states:`
    pub fn parse(text: &str) -> Self {
        let mut report = StatesReport::default();
        let mut tokens = text.split_whitespace();

        while let Some(key) = tokens.next() {
            if !key.ends_with(':') {
                continue;
            }
            let Some(value) = tokens.next() else {
                break;
            };
            match key {
                "T:" => report.tool = Some(parse_tool_number(value)),
                "S:" => report.selector = Some(is_on(value)),
                "R:" => report.revolver = Some(is_on(value)),
                "F:" => report.feeder = Some(is_on(value)),
                "F2:" => report.feeder2 = Some(is_on(value)),
                "SD:" => report.sd_card = Some(is_on(value)),
                "SC:" => report.config_changed = Some(is_on(value)),
                "LID:" => report.lid = Some(is_on(value)),
                "I:" => report.idle = Some(is_on(value)),
                "TMC:" => {
                    report.tmc = Some(TmcState {
                        in_use: value.starts_with('+'),
                        warning: value.get(1..).is_some_and(is_on),
                    })
                }
                "SPL:" => match value.parse::<u32>() {
                    Ok(bits) => report.splitter = Some(bits),
                    Err(_) => tracing::debug!("Ignoring malformed SPL value '{}'", value),
                },
                _ => {}
            }
        }

        report
    }

    /// Whether the line carried any recognized key
    pub fn is_empty(&self) -> bool {
        *self == StatesReport::default()
    }

    /// Merge the report into the device mirror
    pub fn apply(&self, state: &mut DeviceState) {
        if let Some(tool) = self.tool {
            state.current_tool = tool;
        }
        let endstops = &mut state.endstops;
        for (target, value) in [
            (&mut endstops.selector, self.selector),
            (&mut endstops.revolver, self.revolver),
            (&mut endstops.feeder, self.feeder),
            (&mut endstops.feeder2, self.feeder2),
            (&mut endstops.sd_card_present, self.sd_card),
            (&mut endstops.config_changed, self.config_changed),
            (&mut endstops.lid, self.lid),
            (&mut endstops.idle, self.idle),
        ] {
            if let Some(value) = value {
                *target = value;
            }
        }
        if let Some(tmc) = self.tmc {
            state.uses_tmc = tmc.in_use;
            state.tmc_warning = tmc.warning;
        }
        if let Some(bits) = self.splitter {
            state.apply_splitter_bits(bits);
        }
    }
}

fn is_on(value: &str) -> bool {
    value.eq_ignore_ascii_case("on")
}

fn tool_pattern() -> &'static Regex {
    static TOOL_REGEX: OnceLock<Regex> = OnceLock::new();
    TOOL_REGEX.get_or_init(|| Regex::new(r"[-\d]+").expect("invalid tool number pattern"))
}

/// Extract a tool number from text such as `T3`, `T-1` or `3`
///
/// Returns -1 (no tool) when no number can be found.
pub fn parse_tool_number(text: &str) -> i32 {
    tool_pattern()
        .find(text)
        .and_then(|m| m.as_str().parse::<i32>().ok())
        .unwrap_or(NO_TOOL)
}
