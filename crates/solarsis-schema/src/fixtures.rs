use crate::registry::ProtocolSchema;

/// A small Voltronic-style protocol used across the crate's tests.
pub(crate) const SAMPLE_SCHEMA: &str = r#"{
    "query": {
        "QPIGS": {
            "command": "QPIGS",
            "cache": true,
            "influx": true,
            "response": {
                "grid": { "voltage": 1, "frequency": 1 },
                "output": { "voltage": 1, "frequency": 1 },
                "load_va": 1,
                "load_watt": 1,
                "load_percent": 1,
                "bus_voltage": 1,
                "battery": { "voltage": 1, "charging_current": 1, "capacity": 1 },
                "heatsink_temperature": 1,
                "status": true
            }
        },
        "QMOD": {
            "command": "QMOD",
            "callback": "mode_changed",
            "response": { "mode": "" }
        },
        "QID": {
            "command": "QID",
            "cache": true,
            "response": { "serial": "", "serial_tail": ["serial", 14, 10, 14] }
        },
        "QBMS": {
            "command": "QBMS",
            "hide": true,
            "response": { "voltage": 2, "current": -2, "soc": 1, "cells": { "max": 2 } }
        }
    },
    "query_config": {
        "start_bit": "",
        "ending_character": "\r",
        "seperator": " ",
        "crc16": true,
        "response_start": "(",
        "crc_length": 2
    },
    "set": {
        "POP": {
            "command": "POP",
            "variables": { "source": [2, 0, 2] }
        },
        "PBATT": {
            "command": "PBATT",
            "hide": true,
            "variables": { "percent": { "width": 3, "min": 0, "max": 100 } }
        }
    },
    "set_config": {
        "ending_character": "\r",
        "seperator": "",
        "variable_length_fillout": "0",
        "crc16": true,
        "response_start": "(",
        "crc_length": 2
    },
    "p17": {
        "LON": {
            "command": "006LON",
            "crc16": false,
            "sum_crc": true,
            "variables": { "enable": [1, 0, 1] }
        },
        "MCHGC": {
            "command": "010MCHGC",
            "variables": { "parallel": "", "current": [3, 0, 150] }
        }
    },
    "p17_config": {
        "start_bit": "^S",
        "ending_character": "\r",
        "seperator": ",",
        "variable_length_fillout": "0",
        "response_start": "^",
        "response_header_length": 1,
        "crc_length": 0
    },
    "raw_config": {
        "ending_character": "\r",
        "seperator": " ",
        "response_start": "(",
        "crc_length": 0
    },
    "hex_config": {
        "ending_character": "\r",
        "response_start": "(",
        "crc_length": 0,
        "response_format": "hex_words"
    }
}"#;

pub(crate) fn sample_schema() -> ProtocolSchema {
    ProtocolSchema::from_json_str(SAMPLE_SCHEMA).expect("sample schema loads")
}
