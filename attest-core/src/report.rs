//! User-visible report rendering.
//!
//! The two text blocks of a verification result are a stable format that
//! the Auditor displays verbatim, so the wording here must not drift.

use chrono::{DateTime, Utc};

use crate::codec::OsEnforcedFlags;
use crate::policy::Verified;

// Version 1 of the attestation app has version code 10, and so on.
const APP_VERSION_CODE_OFFSET: i64 = 9;

/// Render an OS version integer as `MM.NN.PP` (80000 becomes `08.00.00`).
#[must_use]
pub fn format_os_version(os_version: i64) -> String {
    let padded = format!("{os_version:06}");
    format!("{}.{}.{}", &padded[0..2], &padded[2..4], &padded[4..6])
}

/// Render a patch level integer as `YYYY-MM` (201801 becomes `2018-01`).
#[must_use]
pub fn format_patch_level(os_patch_level: i64) -> String {
    let padded = format!("{os_patch_level:06}");
    format!("{}-{}", &padded[0..4], &padded[4..6])
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// The TEE-enforced block: facts the bootloader and TEE vouch for.
#[must_use]
pub fn tee_enforced_report(verified: &Verified, now: DateTime<Utc>) -> String {
    let mut report = String::new();
    report.push_str(&format!("Device: {}\n", verified.device_name));
    report.push_str(&format!(
        "OS version: {}\n",
        format_os_version(verified.os_version)
    ));
    report.push_str(&format!(
        "OS patch level: {}\n",
        format_patch_level(verified.os_patch_level)
    ));
    report.push_str(&format!(
        "Time: {}\n",
        now.format("%a %b %d %H:%M:%S UTC %Y")
    ));
    report
}

/// The OS-enforced block: facts only as trustworthy as the running OS.
#[must_use]
pub fn os_enforced_report(app_version: i64, flags: OsEnforcedFlags) -> String {
    let device_admin_state = if flags.device_admin_non_system() {
        "yes, but only system apps"
    } else if flags.device_admin() {
        "yes, with non-system apps"
    } else {
        "no"
    };

    let mut report = String::new();
    report.push_str(&format!(
        "Auditor app version: {}\n",
        app_version - APP_VERSION_CODE_OFFSET
    ));
    report.push_str(&format!(
        "User profile secure: {}\n",
        yes_no(flags.user_profile_secure())
    ));
    report.push_str(&format!(
        "Enrolled fingerprints: {}\n",
        yes_no(flags.enrolled_fingerprints())
    ));
    report.push_str(&format!(
        "Accessibility service(s) enabled: {}\n",
        yes_no(flags.accessibility())
    ));
    report.push_str(&format!(
        "Device administrator(s) enabled: {device_admin_state}\n"
    ));
    report.push_str(&format!(
        "Android Debug Bridge enabled: {}\n",
        yes_no(flags.adb_enabled())
    ));
    report.push_str(&format!(
        "Add users from lock screen: {}\n",
        yes_no(flags.add_users_when_locked())
    ));
    report.push_str(&format!(
        "Disallow new USB peripherals when locked: {}\n",
        yes_no(flags.deny_new_usb())
    ));
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_verified() -> Verified {
        Verified {
            device_name: "Google Pixel 2",
            verified_boot_key: vec![0x19; 32],
            os_version: 80000,
            os_patch_level: 201801,
            app_version: 10,
            is_stock: true,
        }
    }

    #[test]
    fn test_os_version_is_zero_padded() {
        assert_eq!(format_os_version(80000), "08.00.00");
        assert_eq!(format_os_version(80100), "08.01.00");
        assert_eq!(format_os_version(81012), "08.10.12");
    }

    #[test]
    fn test_patch_level_format() {
        assert_eq!(format_patch_level(201801), "2018-01");
        assert_eq!(format_patch_level(201712), "2017-12");
    }

    #[test]
    fn test_tee_enforced_block() {
        // 2018-06-01T00:00:00Z
        let now = DateTime::from_timestamp(1_527_811_200, 0).unwrap();
        let report = tee_enforced_report(&sample_verified(), now);

        assert!(report.contains("Device: Google Pixel 2\n"));
        assert!(report.contains("OS version: 08.00.00\n"));
        assert!(report.contains("OS patch level: 2018-01\n"));
        assert!(report.contains("Time: Fri Jun 01 00:00:00 UTC 2018\n"));
    }

    #[test]
    fn test_os_enforced_block() {
        // user profile secure + ADB enabled
        let flags = OsEnforcedFlags::from_bits(0b0000_1001).unwrap();
        let report = os_enforced_report(10, flags);

        assert!(report.contains("Auditor app version: 1\n"));
        assert!(report.contains("User profile secure: yes\n"));
        assert!(report.contains("Enrolled fingerprints: no\n"));
        assert!(report.contains("Accessibility service(s) enabled: no\n"));
        assert!(report.contains("Device administrator(s) enabled: no\n"));
        assert!(report.contains("Android Debug Bridge enabled: yes\n"));
        assert!(report.contains("Add users from lock screen: no\n"));
        assert!(report.contains("Disallow new USB peripherals when locked: no\n"));
    }

    #[test]
    fn test_device_admin_composite() {
        let system_only = OsEnforcedFlags::from_bits(0b1000_0100).unwrap();
        assert!(os_enforced_report(10, system_only)
            .contains("Device administrator(s) enabled: yes, but only system apps\n"));

        let non_system = OsEnforcedFlags::from_bits(0b0000_0100).unwrap();
        assert!(os_enforced_report(10, non_system)
            .contains("Device administrator(s) enabled: yes, with non-system apps\n"));
    }
}
