use solarsis_schema::ProtocolSchema;

pub(crate) const SAMPLE_SCHEMA: &str = r#"{
    "query": {
        "QPIGS": {
            "command": "QPIGS",
            "cache": true,
            "influx": true,
            "response": {
                "voltage": 1,
                "frequency": 1,
                "load_watt": 1,
                "battery": { "capacity": 1 }
            }
        },
        "QMOD": {
            "command": "QMOD",
            "callback": "mode_changed",
            "response": { "mode": "" }
        },
        "QID": { "command": "QID" }
    },
    "query_config": {
        "ending_character": "\r",
        "seperator": " ",
        "crc16": true,
        "response_start": "(",
        "crc_length": 2
    },
    "set": {
        "PBATT": {
            "command": "PBATT",
            "variables": { "percent": { "width": 3, "min": 0, "max": 100 } }
        }
    },
    "set_config": {
        "ending_character": "\r",
        "variable_length_fillout": "0",
        "crc16": true,
        "response_start": "(",
        "crc_length": 2
    },
    "raw_config": {
        "ending_character": "\r",
        "seperator": " ",
        "response_start": "(",
        "crc_length": 0
    }
}"#;

pub(crate) fn sample_schema() -> ProtocolSchema {
    ProtocolSchema::from_json_str(SAMPLE_SCHEMA).expect("sample schema loads")
}
