//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants used for launcher communication. The
//! launcher exposes the Nordic LED-Button service; firing is a write to
//! the LED characteristic.

use uuid::Uuid;

/// Launch service UUID (Nordic LED-Button service carried by the launcher).
pub const LAUNCH_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1523_1212_efde_1523_785feabcd123);

/// Launch command characteristic UUID (write, with response).
pub const LAUNCH_COMMAND_UUID: Uuid = Uuid::from_u128(0x0000_1525_1212_efde_1523_785feabcd123);

/// Launcher button-state characteristic UUID (read, notify). Not used by
/// the command pipeline; listed because the launcher advertises it.
pub const LAUNCH_BUTTON_UUID: Uuid = Uuid::from_u128(0x0000_1524_1212_efde_1523_785feabcd123);

/// The fixed fire command payload.
pub const LAUNCH_COMMAND_PAYLOAD: [u8; 1] = [0x01];

/// The advertised name the launcher broadcasts.
pub const DEFAULT_TARGET_NAME: &str = "Rocket Launcher";

/// Check if a service UUID belongs to the launcher.
pub fn is_launch_service(uuid: &Uuid) -> bool {
    *uuid == LAUNCH_SERVICE_UUID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        let service = LAUNCH_SERVICE_UUID.to_string();
        assert!(service.contains("1523"));

        let command = LAUNCH_COMMAND_UUID.to_string();
        assert!(command.contains("1525"));

        // Service and characteristics share the vendor base.
        assert!(service.ends_with("785feabcd123"));
        assert!(command.ends_with("785feabcd123"));
    }

    #[test]
    fn test_is_launch_service() {
        assert!(is_launch_service(&LAUNCH_SERVICE_UUID));
        assert!(!is_launch_service(&LAUNCH_COMMAND_UUID));
        assert!(!is_launch_service(&LAUNCH_BUTTON_UUID));
    }

    #[test]
    fn test_payload_is_fixed_and_non_empty() {
        assert!(!LAUNCH_COMMAND_PAYLOAD.is_empty());
        assert_eq!(LAUNCH_COMMAND_PAYLOAD, [0x01]);
    }
}
