//! Content policy over verified attestation metadata.
//!
//! Runs only on chains that already passed signature and root verification.
//! Checks apply in a fixed order and the first failure wins: challenge
//! binding, app identity, OS floors, root of trust, key provenance, then
//! per-device version floors. The output is the distilled [`Verified`]
//! view the pairing layer pins against.

use tracing::debug;

use crate::challenge::ChallengeStore;
use crate::device;
use crate::error::AttestError;
use crate::extension::{KeyDescription, KeyOrigin, SecurityLevel, VerifiedBootState};

/// Package name of the attestation app.
pub const ATTESTATION_APP_PACKAGE_NAME: &str = "co.copperhead.attestation";

/// Minimum supported attestation app version code.
pub const ATTESTATION_APP_MINIMUM_VERSION: i64 = 7;

const ATTESTATION_APP_SIGNATURE_DIGEST_DEBUG: &str =
    "17727D8B61D55A864936B1A7B4A2554A15151F32EBCF44CDAA6E6C3258231890";
const ATTESTATION_APP_SIGNATURE_DIGEST_RELEASE: &str =
    "BE9FDEEE9EB474CEEB57B7795B75B0DFC0970EAA513574BC37A598E153916A8A";

/// Minimum supported OS version (80000 = 8.0.0).
pub const OS_VERSION_MINIMUM: i64 = 80000;

/// Minimum supported OS security patch level (201801 = 2018-01).
pub const OS_PATCH_LEVEL_MINIMUM: i64 = 201801;

/// Outcome of the policy checks: the facts worth pinning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    /// Catalog name of the attesting device model.
    pub device_name: &'static str,
    /// SHA-256 fingerprint of the verified boot key.
    pub verified_boot_key: Vec<u8>,
    /// TEE-attested OS version.
    pub os_version: i64,
    /// TEE-attested OS security patch level.
    pub os_patch_level: i64,
    /// OS-attested version code of the attestation app.
    pub app_version: i64,
    /// Whether the device runs its stock OS.
    pub is_stock: bool,
}

/// Apply all content policies to a parsed attestation.
///
/// `allow_debug_signature` additionally accepts the debug signing key of
/// the attestation app; production builds pass `false`.
pub fn evaluate(
    attestation: &KeyDescription,
    challenges: &ChallengeStore,
    allow_debug_signature: bool,
) -> Result<Verified, AttestError> {
    // Replay prevention comes first: a challenge is spent even when a later
    // check rejects the attestation.
    if !challenges.consume(&attestation.attestation_challenge) {
        return Err(AttestError::ChallengeNotPending);
    }

    // The OS attests which app requested the key; require exactly the
    // attestation app, signed with a known key.
    let app_id = attestation
        .software_enforced
        .attestation_application_id
        .as_ref()
        .ok_or(AttestError::WrongApp)?;
    let [package] = app_id.packages.as_slice() else {
        return Err(AttestError::WrongApp);
    };
    if package.package_name != ATTESTATION_APP_PACKAGE_NAME {
        return Err(AttestError::WrongApp);
    }
    if package.version < ATTESTATION_APP_MINIMUM_VERSION {
        return Err(AttestError::AppTooOld);
    }
    let [digest] = app_id.signature_digests.as_slice() else {
        return Err(AttestError::WrongAppSignature);
    };
    let digest_hex = hex::encode_upper(digest);
    if digest_hex != ATTESTATION_APP_SIGNATURE_DIGEST_RELEASE
        && !(allow_debug_signature && digest_hex == ATTESTATION_APP_SIGNATURE_DIGEST_DEBUG)
    {
        return Err(AttestError::WrongAppSignature);
    }

    let tee = &attestation.tee_enforced;

    let os_version = tee.os_version.ok_or(AttestError::OsTooOld)?;
    if os_version < OS_VERSION_MINIMUM {
        return Err(AttestError::OsTooOld);
    }
    let os_patch_level = tee.os_patch_level.ok_or(AttestError::PatchTooOld)?;
    if os_patch_level < OS_PATCH_LEVEL_MINIMUM {
        return Err(AttestError::PatchTooOld);
    }

    let root_of_trust = tee.root_of_trust.as_ref().ok_or(AttestError::RootOfTrustMissing)?;
    if !root_of_trust.device_locked {
        return Err(AttestError::DeviceNotLocked);
    }
    let is_stock = match root_of_trust.verified_boot_state {
        VerifiedBootState::Verified => true,
        VerifiedBootState::SelfSigned => false,
        VerifiedBootState::Unverified | VerifiedBootState::Failed => {
            return Err(AttestError::UnknownVerifiedBootState)
        }
    };
    let verified_boot_key_hex = hex::encode_upper(&root_of_trust.verified_boot_key);
    let device = device::lookup(&verified_boot_key_hex, root_of_trust.verified_boot_state)
        .ok_or(AttestError::UnknownDevice)?;

    // Key sanity: generated in hardware, bound to the attestation app, and
    // rollback resistant where the model supports it.
    if tee.origin != Some(KeyOrigin::Generated) {
        return Err(AttestError::KeyNotGenerated);
    }
    if tee.all_applications {
        return Err(AttestError::KeyNotAppBound);
    }
    if device.requires_rollback_resistance && !tee.rollback_resistant {
        return Err(AttestError::KeyNotRollbackResistant);
    }

    if attestation.attestation_version < device.min_attestation_version {
        return Err(AttestError::AttestationVersionTooLow);
    }
    if attestation.attestation_security_level != SecurityLevel::TrustedEnvironment {
        return Err(AttestError::SoftwareSecurityLevel);
    }
    if attestation.keymaster_version < device.min_keymaster_version {
        return Err(AttestError::KeymasterVersionTooLow);
    }
    if attestation.keymaster_security_level != SecurityLevel::TrustedEnvironment {
        return Err(AttestError::SoftwareSecurityLevel);
    }

    debug!(
        device = device.display_name,
        os_version,
        os_patch_level,
        is_stock,
        "attestation passed content policy"
    );

    Ok(Verified {
        device_name: device.display_name,
        verified_boot_key: root_of_trust.verified_boot_key.clone(),
        os_version,
        os_patch_level,
        app_version: package.version,
        is_stock,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::extension::{
        AttestationApplicationId, AttestationPackage, AuthorizationList, RootOfTrust,
    };

    const PIXEL_2_KEY: [u8; 32] = [
        0x19, 0x62, 0xB0, 0x53, 0x85, 0x79, 0xFF, 0xCE, 0x9A, 0xC9, 0xF5, 0x07, 0xC4, 0x6A, 0xFE,
        0x3B, 0x92, 0x05, 0x5B, 0xAC, 0x71, 0x46, 0x46, 0x22, 0x83, 0xC8, 0x5C, 0x50, 0x0B, 0xE7,
        0x8D, 0x82,
    ];

    fn release_digest() -> Vec<u8> {
        hex::decode(ATTESTATION_APP_SIGNATURE_DIGEST_RELEASE).unwrap()
    }

    fn stock_pixel_2(challenge: &[u8]) -> KeyDescription {
        KeyDescription {
            attestation_version: 2,
            attestation_security_level: SecurityLevel::TrustedEnvironment,
            keymaster_version: 3,
            keymaster_security_level: SecurityLevel::TrustedEnvironment,
            attestation_challenge: challenge.to_vec(),
            software_enforced: AuthorizationList {
                attestation_application_id: Some(AttestationApplicationId {
                    packages: vec![AttestationPackage {
                        package_name: ATTESTATION_APP_PACKAGE_NAME.into(),
                        version: 10,
                    }],
                    signature_digests: vec![release_digest()],
                }),
                ..AuthorizationList::default()
            },
            tee_enforced: AuthorizationList {
                os_version: Some(80000),
                os_patch_level: Some(201801),
                origin: Some(KeyOrigin::Generated),
                root_of_trust: Some(RootOfTrust {
                    verified_boot_key: PIXEL_2_KEY.to_vec(),
                    device_locked: true,
                    verified_boot_state: VerifiedBootState::Verified,
                }),
                all_applications: false,
                rollback_resistant: true,
                attestation_application_id: None,
            },
        }
    }

    fn issued_store() -> (ChallengeStore, [u8; 32]) {
        let store = ChallengeStore::new(Duration::from_secs(60));
        let challenge = store.issue();
        (store, challenge)
    }

    #[test]
    fn test_accepts_stock_pixel_2() {
        let (store, challenge) = issued_store();
        let verified = evaluate(&stock_pixel_2(&challenge), &store, false).unwrap();

        assert_eq!(verified.device_name, "Google Pixel 2");
        assert_eq!(verified.verified_boot_key, PIXEL_2_KEY.to_vec());
        assert_eq!(verified.os_version, 80000);
        assert_eq!(verified.os_patch_level, 201801);
        assert_eq!(verified.app_version, 10);
        assert!(verified.is_stock);
    }

    #[test]
    fn test_replayed_challenge_fails() {
        let (store, challenge) = issued_store();
        let attestation = stock_pixel_2(&challenge);

        evaluate(&attestation, &store, false).unwrap();
        assert!(matches!(
            evaluate(&attestation, &store, false),
            Err(AttestError::ChallengeNotPending)
        ));
    }

    #[test]
    fn test_challenge_is_spent_even_on_rejection() {
        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        attestation.tee_enforced.root_of_trust.as_mut().unwrap().device_locked = false;

        assert!(matches!(
            evaluate(&attestation, &store, false),
            Err(AttestError::DeviceNotLocked)
        ));
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn test_app_too_old() {
        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        attestation
            .software_enforced
            .attestation_application_id
            .as_mut()
            .unwrap()
            .packages[0]
            .version = 6;

        assert!(matches!(
            evaluate(&attestation, &store, false),
            Err(AttestError::AppTooOld)
        ));
    }

    #[test]
    fn test_wrong_package() {
        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        attestation
            .software_enforced
            .attestation_application_id
            .as_mut()
            .unwrap()
            .packages[0]
            .package_name = "com.example.fake".into();

        assert!(matches!(
            evaluate(&attestation, &store, false),
            Err(AttestError::WrongApp)
        ));
    }

    #[test]
    fn test_two_packages_fail() {
        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        let app = attestation
            .software_enforced
            .attestation_application_id
            .as_mut()
            .unwrap();
        app.packages.push(app.packages[0].clone());

        assert!(matches!(
            evaluate(&attestation, &store, false),
            Err(AttestError::WrongApp)
        ));
    }

    #[test]
    fn test_debug_signature_only_when_allowed() {
        let debug_digest = hex::decode(ATTESTATION_APP_SIGNATURE_DIGEST_DEBUG).unwrap();

        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        attestation
            .software_enforced
            .attestation_application_id
            .as_mut()
            .unwrap()
            .signature_digests = vec![debug_digest.clone()];
        assert!(matches!(
            evaluate(&attestation, &store, false),
            Err(AttestError::WrongAppSignature)
        ));

        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        attestation
            .software_enforced
            .attestation_application_id
            .as_mut()
            .unwrap()
            .signature_digests = vec![debug_digest];
        assert!(evaluate(&attestation, &store, true).is_ok());
    }

    #[test]
    fn test_os_floors() {
        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        attestation.tee_enforced.os_version = Some(71200);
        assert!(matches!(
            evaluate(&attestation, &store, false),
            Err(AttestError::OsTooOld)
        ));

        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        attestation.tee_enforced.os_patch_level = Some(201712);
        assert!(matches!(
            evaluate(&attestation, &store, false),
            Err(AttestError::PatchTooOld)
        ));
    }

    #[test]
    fn test_unlocked_device_fails() {
        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        attestation.tee_enforced.root_of_trust.as_mut().unwrap().device_locked = false;
        assert!(matches!(
            evaluate(&attestation, &store, false),
            Err(AttestError::DeviceNotLocked)
        ));
    }

    #[test]
    fn test_unverified_boot_fails() {
        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        attestation
            .tee_enforced
            .root_of_trust
            .as_mut()
            .unwrap()
            .verified_boot_state = VerifiedBootState::Unverified;
        assert!(matches!(
            evaluate(&attestation, &store, false),
            Err(AttestError::UnknownVerifiedBootState)
        ));
    }

    #[test]
    fn test_unknown_boot_key_fails() {
        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        attestation
            .tee_enforced
            .root_of_trust
            .as_mut()
            .unwrap()
            .verified_boot_key = vec![0u8; 32];
        assert!(matches!(
            evaluate(&attestation, &store, false),
            Err(AttestError::UnknownDevice)
        ));
    }

    #[test]
    fn test_imported_key_fails() {
        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        attestation.tee_enforced.origin = Some(KeyOrigin::Imported);
        assert!(matches!(
            evaluate(&attestation, &store, false),
            Err(AttestError::KeyNotGenerated)
        ));
    }

    #[test]
    fn test_all_applications_key_fails() {
        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        attestation.tee_enforced.all_applications = true;
        assert!(matches!(
            evaluate(&attestation, &store, false),
            Err(AttestError::KeyNotAppBound)
        ));
    }

    #[test]
    fn test_rollback_resistance_required_by_descriptor() {
        // Pixel 2 requires it.
        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        attestation.tee_enforced.rollback_resistant = false;
        assert!(matches!(
            evaluate(&attestation, &store, false),
            Err(AttestError::KeyNotRollbackResistant)
        ));

        // Galaxy S9+ does not.
        let s9_key =
            hex::decode("D1C53B7A931909EC37F1939B14621C6E4FD19BF9079D195F86B3CEA47CD1F92D")
                .unwrap();
        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        attestation.attestation_version = 1;
        attestation.keymaster_version = 2;
        attestation.tee_enforced.rollback_resistant = false;
        attestation
            .tee_enforced
            .root_of_trust
            .as_mut()
            .unwrap()
            .verified_boot_key = s9_key;
        assert!(evaluate(&attestation, &store, false).is_ok());
    }

    #[test]
    fn test_version_floors_from_descriptor() {
        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        attestation.attestation_version = 1;
        assert!(matches!(
            evaluate(&attestation, &store, false),
            Err(AttestError::AttestationVersionTooLow)
        ));

        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        attestation.keymaster_version = 2;
        assert!(matches!(
            evaluate(&attestation, &store, false),
            Err(AttestError::KeymasterVersionTooLow)
        ));
    }

    #[test]
    fn test_software_security_level_fails() {
        for field in 0..2 {
            let (store, challenge) = issued_store();
            let mut attestation = stock_pixel_2(&challenge);
            if field == 0 {
                attestation.attestation_security_level = SecurityLevel::Software;
            } else {
                attestation.keymaster_security_level = SecurityLevel::Software;
            }
            assert!(matches!(
                evaluate(&attestation, &store, false),
                Err(AttestError::SoftwareSecurityLevel)
            ));
        }
    }

    #[test]
    fn test_strongbox_is_rejected_in_v1() {
        let (store, challenge) = issued_store();
        let mut attestation = stock_pixel_2(&challenge);
        attestation.attestation_security_level = SecurityLevel::StrongBox;
        assert!(matches!(
            evaluate(&attestation, &store, false),
            Err(AttestError::SoftwareSecurityLevel)
        ));
    }
}
