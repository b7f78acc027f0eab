// =============================================================================
// Shared types used across the dashboard core
// =============================================================================

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Candle bucket width. The wire form is the short label (`"1s"`, `"1m"`,
/// `"5m"`) used by the analytics backend.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1s")]
    OneSecond,
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Self::OneSecond, Self::OneMinute, Self::FiveMinutes];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneSecond => "1s",
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
        }
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Self::OneMinute
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1s" => Ok(Self::OneSecond),
            "1m" => Ok(Self::OneMinute),
            "5m" => Ok(Self::FiveMinutes),
            other => anyhow::bail!("unsupported timeframe '{other}' (expected 1s, 1m or 5m)"),
        }
    }
}

/// State of the push channel to the analytics backend.
///
/// `Exhausted` is terminal: the gateway gave up after the configured number
/// of reconnect attempts and will not retry on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting { attempt: u32, max_attempts: u32 },
    Exhausted { attempts: u32 },
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Connecting
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Reconnecting {
                attempt,
                max_attempts,
            } => write!(f, "Reconnecting ({attempt}/{max_attempts})"),
            Self::Exhausted { attempts } => {
                write!(f, "Disconnected (gave up after {attempts} attempts)")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_wire_labels() {
        assert_eq!(serde_json::to_string(&Timeframe::OneSecond).unwrap(), "\"1s\"");
        let tf: Timeframe = serde_json::from_str("\"5m\"").unwrap();
        assert_eq!(tf, Timeframe::FiveMinutes);
        assert!(serde_json::from_str::<Timeframe>("\"15m\"").is_err());
    }

    #[test]
    fn timeframe_from_str() {
        assert_eq!("1m".parse::<Timeframe>().unwrap(), Timeframe::OneMinute);
        assert!("1h".parse::<Timeframe>().is_err());
    }

    #[test]
    fn connection_state_serialises_with_tag() {
        let json = serde_json::to_value(ConnectionState::Reconnecting {
            attempt: 2,
            max_attempts: 10,
        })
        .unwrap();
        assert_eq!(json["state"], "reconnecting");
        assert_eq!(json["attempt"], 2);
        assert!(ConnectionState::Exhausted { attempts: 10 }.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());
    }
}
