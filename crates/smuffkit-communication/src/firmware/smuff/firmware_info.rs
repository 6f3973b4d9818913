//! Firmware identity parsing (`M115` reply)

use smuffkit_core::FirmwareInfo;
use regex::Regex;
use std::sync::OnceLock;

fn firmware_pattern() -> &'static Regex {
    static FIRMWARE_REGEX: OnceLock<Regex> = OnceLock::new();
    FIRMWARE_REGEX.get_or_init(|| {
        Regex::new(
            r"FIRMWARE_NAME:\s(.*)\sFIRMWARE_VERSION:\s(.*)\sELECTRONICS:\s(.*)\sDATE:\s(.*)\sMODE:\s(.*)\sOPTIONS:\s(.*)",
        )
        .expect("invalid firmware info pattern")
    })
}

/// Parse a `FIRMWARE_...` line
///
/// The raw line is always kept. The individual fields stay `None` when the
/// line does not follow the expected layout.
pub fn parse_firmware_info(line: &str) -> FirmwareInfo {
    let raw = line.trim_end().to_string();
    let mut info = FirmwareInfo {
        raw,
        ..FirmwareInfo::default()
    };

    if let Some(caps) = firmware_pattern().captures(&info.raw) {
        let group = |i: usize| caps.get(i).map(|m| m.as_str().trim().to_string());
        info.version = group(2);
        info.board = group(3);
        info.mode = group(5);
        info.options = group(6);
    } else {
        tracing::warn!("Unrecognized firmware info: [{}]", info.raw);
    }

    info
}
