//! Launch controller configuration.
//!
//! All recognized knobs of the pipeline live in [`LaunchConfig`]: the
//! advertised name to hunt for, the scan window, the countdown shape and
//! the fixed command to deliver. Values are validated once, when the
//! controller is constructed.

use bytes::Bytes;
use std::time::Duration;
use uuid::Uuid;

use crate::ble::uuids::{
    DEFAULT_TARGET_NAME, LAUNCH_COMMAND_PAYLOAD, LAUNCH_COMMAND_UUID, LAUNCH_SERVICE_UUID,
};
use crate::error::{Error, Result};

/// Default scan window.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(10);

/// Default countdown initial value, in whole seconds.
pub const DEFAULT_COUNTDOWN_START: u32 = 10;

/// Default countdown tick period.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

/// How a scan pass reacts to an accepted match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScanMode {
    /// Stop immediately after the first accepted match.
    #[default]
    SingleShot,
    /// Keep scanning and report every match until the window elapses.
    Continuous,
}

/// When a discovered peer is bonded and launched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BondPolicy {
    /// Run the bond/connect/launch sequence as soon as a match is observed.
    #[default]
    Auto,
    /// Only register matches; the caller picks a peer explicitly.
    Manual,
}

/// The fixed command delivered to the launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommandSpec {
    /// Service the command characteristic lives in.
    pub service: Uuid,
    /// Characteristic the payload is written to.
    pub characteristic: Uuid,
    /// The payload bytes. Fixed, never empty.
    pub payload: Bytes,
}

impl CommandSpec {
    /// The canonical launch command.
    pub fn launch() -> Self {
        Self {
            service: LAUNCH_SERVICE_UUID,
            characteristic: LAUNCH_COMMAND_UUID,
            payload: Bytes::from_static(&LAUNCH_COMMAND_PAYLOAD),
        }
    }
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self::launch()
    }
}

/// Configuration for the launch controller.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LaunchConfig {
    /// Advertised name a peripheral must match exactly (case-sensitive).
    pub target_name: String,
    /// How long a discovery pass runs before giving up.
    pub scan_window: Duration,
    /// Single-shot or continuous discovery.
    pub scan_mode: ScanMode,
    /// Automatic or manual bonding on discovery.
    pub bond_policy: BondPolicy,
    /// Countdown initial value, in whole seconds.
    pub countdown_start: u32,
    /// Period between countdown ticks.
    pub tick_period: Duration,
    /// The command to deliver on a ready link.
    pub command: CommandSpec,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            target_name: DEFAULT_TARGET_NAME.to_string(),
            scan_window: DEFAULT_SCAN_WINDOW,
            scan_mode: ScanMode::default(),
            bond_policy: BondPolicy::default(),
            countdown_start: DEFAULT_COUNTDOWN_START,
            tick_period: DEFAULT_TICK_PERIOD,
            command: CommandSpec::launch(),
        }
    }
}

impl LaunchConfig {
    /// Validate the configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.target_name.is_empty() {
            return Err(Error::InvalidParameter {
                name: "target_name".to_string(),
                value: "<empty>".to_string(),
            });
        }
        if self.scan_window.is_zero() {
            return Err(Error::InvalidParameter {
                name: "scan_window".to_string(),
                value: "0".to_string(),
            });
        }
        if self.countdown_start == 0 {
            return Err(Error::InvalidParameter {
                name: "countdown_start".to_string(),
                value: "0".to_string(),
            });
        }
        if self.tick_period.is_zero() {
            return Err(Error::InvalidParameter {
                name: "tick_period".to_string(),
                value: "0".to_string(),
            });
        }
        if self.command.payload.is_empty() {
            return Err(Error::InvalidParameter {
                name: "command.payload".to_string(),
                value: "<empty>".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_is_valid() {
        let config = LaunchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.target_name, "Rocket Launcher");
        assert_eq!(config.scan_window, Duration::from_secs(10));
        assert_eq!(config.countdown_start, 10);
        assert_eq!(config.tick_period, Duration::from_secs(1));
        assert_eq!(config.scan_mode, ScanMode::SingleShot);
        assert_eq!(config.bond_policy, BondPolicy::Auto);
    }

    #[test]
    fn test_launch_command() {
        let command = CommandSpec::launch();
        assert_eq!(command.service, LAUNCH_SERVICE_UUID);
        assert_eq!(command.characteristic, LAUNCH_COMMAND_UUID);
        assert_eq!(&command.payload[..], &[0x01]);
    }

    #[test]
    fn test_validate_rejects_empty_target_name() {
        let config = LaunchConfig {
            target_name: String::new(),
            ..LaunchConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidParameter { name, .. }) if name == "target_name"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config = LaunchConfig {
            scan_window: Duration::ZERO,
            ..LaunchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_countdown() {
        let config = LaunchConfig {
            countdown_start: 0,
            ..LaunchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_payload() {
        let config = LaunchConfig {
            command: CommandSpec {
                payload: Bytes::new(),
                ..CommandSpec::launch()
            },
            ..LaunchConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidParameter { name, .. }) if name == "command.payload"
        ));
    }

    #[test]
    fn test_alternate_variant_is_representable() {
        // The short-window, eleven-count hardware revision.
        let config = LaunchConfig {
            scan_window: Duration::from_secs(5),
            countdown_start: 11,
            ..LaunchConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
