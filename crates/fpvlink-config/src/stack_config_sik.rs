use std::collections::HashMap;

use serde::Deserialize;
use toml::Value;

/// SiK modem reconfiguration settings
#[derive(Debug, Clone)]
pub struct CfgSik {
    /// How often the worker checks for pending work
    pub check_interval_ms: u64,
    /// Handshake failures tolerated before giving up
    pub max_retries: u32,
    /// An external helper tool is considered stuck after this long
    pub helper_tool_timeout_ms: u64,
    pub baud_rate: u32,
    /// Air data rate in kbps (ATS2)
    pub air_speed: u8,
    /// Network id (ATS3), must match on both ends
    pub net_id: u8,
    /// TX power in dBm (ATS4)
    pub tx_power: u8,
    /// Number of hopping channels (ATS10)
    pub num_channels: u8,
    /// Total hopping span around the link frequency in kHz
    pub span_khz: u32,
}

impl Default for CfgSik {
    fn default() -> Self {
        Self {
            check_interval_ms: 500,
            max_retries: 3,
            helper_tool_timeout_ms: 30_000,
            baud_rate: 57_600,
            air_speed: 64,
            net_id: 25,
            tx_power: 20,
            num_channels: 50,
            span_khz: 13_000,
        }
    }
}

#[derive(Default, Deserialize)]
pub struct CfgSikDto {
    pub check_interval_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub helper_tool_timeout_ms: Option<u64>,
    pub baud_rate: Option<u32>,
    pub air_speed: Option<u8>,
    pub net_id: Option<u8>,
    pub tx_power: Option<u8>,
    pub num_channels: Option<u8>,
    pub span_khz: Option<u32>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Patch SiK settings from the TOML file onto defaults
pub fn apply_sik_patch(dst: &mut CfgSik, src: CfgSikDto) {
    if let Some(v) = src.check_interval_ms {
        dst.check_interval_ms = v;
    }
    if let Some(v) = src.max_retries {
        dst.max_retries = v;
    }
    if let Some(v) = src.helper_tool_timeout_ms {
        dst.helper_tool_timeout_ms = v;
    }
    if let Some(v) = src.baud_rate {
        dst.baud_rate = v;
    }
    if let Some(v) = src.air_speed {
        dst.air_speed = v;
    }
    if let Some(v) = src.net_id {
        dst.net_id = v;
    }
    if let Some(v) = src.tx_power {
        dst.tx_power = v;
    }
    if let Some(v) = src.num_channels {
        dst.num_channels = v;
    }
    if let Some(v) = src.span_khz {
        dst.span_khz = v;
    }
}
