//! Compiled-in device catalog.
//!
//! Maps the uppercase-hex SHA-256 fingerprint of a verified-boot public key
//! to the device it belongs to. Two tables: devices running their stock OS
//! (verified boot state `Verified`) and devices running the supported
//! alternative OS (state `SelfSigned`). Compiled in rather than loaded from
//! configuration so trust policy cannot be relaxed at deploy time.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::extension::VerifiedBootState;

/// Which OS family a catalog entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsVariant {
    /// The device's factory OS.
    Stock,
    /// The supported alternative OS.
    AltOs,
}

/// Static description of a supported device model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Human-readable model name.
    pub display_name: &'static str,
    /// Lowest attestation schema version the model ships.
    pub min_attestation_version: i64,
    /// Lowest keymaster version the model ships.
    pub min_keymaster_version: i64,
    /// Whether keys on this model must be rollback resistant.
    pub requires_rollback_resistance: bool,
    /// OS family of this entry.
    pub variant: OsVariant,
}

const BKL_L04: &str = "Huawei Honor View 10 (BKL-L04)";
const PIXEL_2: &str = "Google Pixel 2";
const PIXEL_2_XL: &str = "Google Pixel 2 XL";
const SM_G960U: &str = "Samsung Galaxy S9 (SM-G960U)";
const SM_G965F: &str = "Samsung Galaxy S9+ (SM-G965F)";
const SM_G965_MSM: &str = "Samsung Galaxy S9+ (Snapdragon)";
const H3113: &str = "Sony Xperia XA2 (H3113)";

const fn descriptor(
    display_name: &'static str,
    min_attestation_version: i64,
    min_keymaster_version: i64,
    requires_rollback_resistance: bool,
    variant: OsVariant,
) -> DeviceDescriptor {
    DeviceDescriptor {
        display_name,
        min_attestation_version,
        min_keymaster_version,
        requires_rollback_resistance,
        variant,
    }
}

static ALT_OS_DEVICES: Lazy<HashMap<&'static str, DeviceDescriptor>> = Lazy::new(|| {
    HashMap::from([
        (
            "36D067F8517A2284781B99A2984966BFF02D3F47310F831FCDCC4D792426B6DF",
            descriptor(PIXEL_2, 2, 3, true, OsVariant::AltOs),
        ),
        (
            "815DCBA82BAC1B1758211FF53CAA0B6883CB6C901BE285E1B291C8BDAA12DF75",
            descriptor(PIXEL_2_XL, 2, 3, true, OsVariant::AltOs),
        ),
    ])
});

static STOCK_DEVICES: Lazy<HashMap<&'static str, DeviceDescriptor>> = Lazy::new(|| {
    HashMap::from([
        (
            "5341E6B2646979A70E57653007A1F310169421EC9BDD9F1A5648F75ADE005AF1",
            descriptor(BKL_L04, 2, 3, false, OsVariant::Stock),
        ),
        (
            "1962B0538579FFCE9AC9F507C46AFE3B92055BAC7146462283C85C500BE78D82",
            descriptor(PIXEL_2, 2, 3, true, OsVariant::Stock),
        ),
        (
            "171616EAEF26009FC46DC6D89F3D24217E926C81A67CE65D2E3A9DC27040C7AB",
            descriptor(PIXEL_2_XL, 2, 3, true, OsVariant::Stock),
        ),
        (
            "266869F7CF2FB56008EFC4BE8946C8F84190577F9CA688F59C72DD585E696488",
            descriptor(SM_G960U, 1, 2, false, OsVariant::Stock),
        ),
        (
            "D1C53B7A931909EC37F1939B14621C6E4FD19BF9079D195F86B3CEA47CD1F92D",
            descriptor(SM_G965F, 1, 2, false, OsVariant::Stock),
        ),
        (
            "A4A544C2CFBAEAA88C12360C2E4B44C29722FC8DBB81392A6C1FAEDB7BF63010",
            descriptor(SM_G965_MSM, 1, 2, false, OsVariant::Stock),
        ),
        (
            "4285AD64745CC79B4499817F264DC16BF2AF5163AF6C328964F39E61EC84693E",
            descriptor(H3113, 2, 3, true, OsVariant::Stock),
        ),
    ])
});

/// Look up a device by verified-boot-key fingerprint.
///
/// A `Verified` boot state consults the stock table, `SelfSigned` the
/// alternative-OS table; other states never map to a device.
#[must_use]
pub fn lookup(
    verified_boot_key_hex: &str,
    state: VerifiedBootState,
) -> Option<&'static DeviceDescriptor> {
    match state {
        VerifiedBootState::Verified => STOCK_DEVICES.get(verified_boot_key_hex),
        VerifiedBootState::SelfSigned => ALT_OS_DEVICES.get(verified_boot_key_hex),
        VerifiedBootState::Unverified | VerifiedBootState::Failed => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIXEL_2_XL_STOCK: &str =
        "171616EAEF26009FC46DC6D89F3D24217E926C81A67CE65D2E3A9DC27040C7AB";

    #[test]
    fn test_stock_lookup() {
        let device = lookup(PIXEL_2_XL_STOCK, VerifiedBootState::Verified).unwrap();
        assert_eq!(device.display_name, PIXEL_2_XL);
        assert_eq!(device.variant, OsVariant::Stock);
        assert!(device.requires_rollback_resistance);
    }

    #[test]
    fn test_tables_are_keyed_by_boot_state() {
        // A stock fingerprint is not valid for a self-signed boot.
        assert!(lookup(PIXEL_2_XL_STOCK, VerifiedBootState::SelfSigned).is_none());
        assert!(lookup(
            "815DCBA82BAC1B1758211FF53CAA0B6883CB6C901BE285E1B291C8BDAA12DF75",
            VerifiedBootState::SelfSigned
        )
        .is_some());
    }

    #[test]
    fn test_failed_boot_never_maps() {
        assert!(lookup(PIXEL_2_XL_STOCK, VerifiedBootState::Failed).is_none());
        assert!(lookup(PIXEL_2_XL_STOCK, VerifiedBootState::Unverified).is_none());
    }

    #[test]
    fn test_catalog_sizes() {
        assert_eq!(STOCK_DEVICES.len(), 7);
        assert_eq!(ALT_OS_DEVICES.len(), 2);
    }
}
