//! Parsers must accept any input without panicking

use proptest::prelude::*;
use smuffkit_communication::firmware::smuff::{
    parse_firmware_info, response_parser, ConfigBlock, ConfigCategory, StatesReport,
};

fn category() -> impl Strategy<Value = ConfigCategory> {
    prop_oneof![
        Just(ConfigCategory::Basic),
        Just(ConfigCategory::Materials),
        Just(ConfigCategory::ToolSwaps),
        Just(ConfigCategory::ServoMapping),
        Just(ConfigCategory::FeedState),
    ]
}

proptest! {
    #[test]
    fn response_parser_never_panics(line in "\\PC*") {
        let _ = response_parser::parse(&line);
    }

    #[test]
    fn classified_echo_lines_stay_echoes(text in "[a-z ]{0,20}") {
        let parsed = response_parser::parse(&format!("echo: {}", text));
        prop_assert!(parsed.map_or(true, |r| !r.is_terminal()));
    }

    #[test]
    fn states_parser_never_panics(text in "(T: T-?[0-9]{1,3}|S: o(n|ff)|SPL: [0-9]{1,3}|TMC: [-+]?o(n|ff)|[A-Z]{1,3}: \\PC{0,4}| ){0,12}") {
        let report = StatesReport::parse(&text);
        let mut device = smuffkit_core::DeviceState::default();
        report.apply(&mut device);
    }

    #[test]
    fn config_parser_never_panics(category in category(), json in "\\PC*", tools in 0u32..12) {
        let _ = ConfigBlock::parse(&category, &json, tools);
    }

    #[test]
    fn config_parser_tolerates_wrong_shapes(category in category(), value in 0i64..1000, tools in 0u32..6) {
        let json = format!(r#"{{"T0":{},"T1":"x","Tools":{}}}"#, value, value);
        let _ = ConfigBlock::parse(&category, &json, tools);
    }

    #[test]
    fn firmware_info_keeps_raw_line(line in "\\PC*") {
        let info = parse_firmware_info(&line);
        prop_assert_eq!(info.raw, line.trim_end().to_string());
    }
}
