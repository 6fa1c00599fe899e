//! Typed view of the Android key-attestation extension.
//!
//! The leaf certificate of an attestation chain carries a `KeyDescription`
//! structure under OID `1.3.6.1.4.1.11129.2.1.17`:
//!
//! <https://developer.android.com/training/articles/security-key-attestation.html#certificate_schema>
//!
//! This module is the library boundary between certificate plumbing and
//! content policy: the policy engine consumes only the typed view below, so
//! it can be tested against hand-built values. Certificate-level access
//! goes through `x509-parser`; the `KeyDescription` body itself uses
//! high-numbered context tags that need a dedicated DER walk.
//!
//! Only the authorization-list entries the policy engine inspects are
//! surfaced; other tags are skipped.

use x509_parser::prelude::*;

use crate::error::AttestError;

/// OID of the Android key-attestation extension.
pub const KEY_ATTESTATION_OID: &str = "1.3.6.1.4.1.11129.2.1.17";

/// Where a key (or the attestation statement about it) is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    /// Enforced by the Android system software only.
    Software,
    /// Enforced by the Trusted Execution Environment.
    TrustedEnvironment,
    /// Enforced by a dedicated hardware security module.
    StrongBox,
}

impl SecurityLevel {
    fn from_value(value: i64) -> Result<Self, AttestError> {
        match value {
            0 => Ok(Self::Software),
            1 => Ok(Self::TrustedEnvironment),
            2 => Ok(Self::StrongBox),
            other => Err(malformed(format!("unknown security level {other}"))),
        }
    }
}

/// Outcome of verified boot as recorded by the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifiedBootState {
    /// Full chain of trust up to a key baked into the device.
    Verified,
    /// Chain of trust rooted in a user-installed key.
    SelfSigned,
    /// Verification was not performed.
    Unverified,
    /// Verification failed.
    Failed,
}

impl VerifiedBootState {
    fn from_value(value: i64) -> Result<Self, AttestError> {
        match value {
            0 => Ok(Self::Verified),
            1 => Ok(Self::SelfSigned),
            2 => Ok(Self::Unverified),
            3 => Ok(Self::Failed),
            other => Err(malformed(format!("unknown verified boot state {other}"))),
        }
    }
}

/// How the attested key came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    /// Generated inside the secure hardware.
    Generated,
    /// Derived inside the secure hardware.
    Derived,
    /// Imported from outside.
    Imported,
    /// Origin not known to the secure hardware.
    Unknown,
}

impl KeyOrigin {
    fn from_value(value: i64) -> Self {
        match value {
            0 => Self::Generated,
            1 => Self::Derived,
            2 => Self::Imported,
            _ => Self::Unknown,
        }
    }
}

/// The root-of-trust entry of the TEE-enforced authorization list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootOfTrust {
    /// Public key the bootloader used to verify system images.
    pub verified_boot_key: Vec<u8>,
    /// Whether the bootloader is locked.
    pub device_locked: bool,
    /// Verified boot outcome.
    pub verified_boot_state: VerifiedBootState,
}

/// One package attested by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationPackage {
    /// Android package name.
    pub package_name: String,
    /// Package version code.
    pub version: i64,
}

/// Identity of the app that requested attestation, as attested by the OS.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttestationApplicationId {
    /// Packages sharing the requesting UID.
    pub packages: Vec<AttestationPackage>,
    /// SHA-256 digests of the signing certificates.
    pub signature_digests: Vec<Vec<u8>>,
}

/// The subset of an authorization list the policy engine inspects.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthorizationList {
    /// OS version (e.g. 80100 for 8.1.0), if present.
    pub os_version: Option<i64>,
    /// OS security patch level (e.g. 201801), if present.
    pub os_patch_level: Option<i64>,
    /// Key origin, if present.
    pub origin: Option<KeyOrigin>,
    /// Root of trust, if present.
    pub root_of_trust: Option<RootOfTrust>,
    /// The key is usable by all applications, not just its creator.
    pub all_applications: bool,
    /// The key is protected against rollback of the secure hardware.
    pub rollback_resistant: bool,
    /// Identity of the requesting app, if present.
    pub attestation_application_id: Option<AttestationApplicationId>,
}

/// Parsed key-attestation extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescription {
    /// Version of the attestation schema.
    pub attestation_version: i64,
    /// Where the attestation statement is produced.
    pub attestation_security_level: SecurityLevel,
    /// Keymaster HAL version.
    pub keymaster_version: i64,
    /// Where keymaster runs.
    pub keymaster_security_level: SecurityLevel,
    /// Challenge supplied when the key was generated.
    pub attestation_challenge: Vec<u8>,
    /// OS-enforced authorizations.
    pub software_enforced: AuthorizationList,
    /// TEE-enforced authorizations.
    pub tee_enforced: AuthorizationList,
}

/// Extract and parse the key-attestation extension of a leaf certificate.
pub fn parse_key_description(leaf: &X509Certificate<'_>) -> Result<KeyDescription, AttestError> {
    let ext = leaf
        .extensions()
        .iter()
        .find(|ext| ext.oid.to_string() == KEY_ATTESTATION_OID)
        .ok_or(AttestError::ExtensionMissing)?;
    parse_from_der(ext.value)
}

// Authorization-list tag numbers, from the Keymaster HAL.
const TAG_ALL_APPLICATIONS: u32 = 600;
const TAG_ORIGIN: u32 = 702;
const TAG_ROLLBACK_RESISTANT: u32 = 703;
const TAG_ROOT_OF_TRUST: u32 = 704;
const TAG_OS_VERSION: u32 = 705;
const TAG_OS_PATCH_LEVEL: u32 = 706;
const TAG_ATTESTATION_APPLICATION_ID: u32 = 709;

// Universal tag numbers.
const TAG_BOOLEAN: u32 = 1;
const TAG_INTEGER: u32 = 2;
const TAG_OCTET_STRING: u32 = 4;
const TAG_ENUMERATED: u32 = 10;
const TAG_SEQUENCE: u32 = 16;
const TAG_SET: u32 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagClass {
    Universal,
    ContextSpecific,
    Other,
}

#[derive(Debug)]
struct Tlv<'a> {
    class: TagClass,
    number: u32,
    value: &'a [u8],
}

struct DerReader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn has_remaining(&self) -> bool {
        self.pos < self.input.len()
    }

    fn byte(&mut self) -> Result<u8, AttestError> {
        let b = *self
            .input
            .get(self.pos)
            .ok_or_else(|| malformed("truncated element"))?;
        self.pos += 1;
        Ok(b)
    }

    fn read(&mut self) -> Result<Tlv<'a>, AttestError> {
        let first = self.byte()?;
        let class = match first >> 6 {
            0 => TagClass::Universal,
            2 => TagClass::ContextSpecific,
            _ => TagClass::Other,
        };

        let mut number = u32::from(first & 0x1f);
        if number == 0x1f {
            number = 0;
            loop {
                let b = self.byte()?;
                number = number
                    .checked_mul(128)
                    .and_then(|n| n.checked_add(u32::from(b & 0x7f)))
                    .ok_or_else(|| malformed("tag number overflow"))?;
                if b & 0x80 == 0 {
                    break;
                }
            }
        }

        let len_byte = self.byte()?;
        let len = if len_byte < 0x80 {
            usize::from(len_byte)
        } else {
            let count = usize::from(len_byte & 0x7f);
            if count == 0 || count > 4 {
                return Err(malformed("unsupported length encoding"));
            }
            let mut len = 0usize;
            for _ in 0..count {
                len = (len << 8) | usize::from(self.byte()?);
            }
            len
        };

        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.input.len())
            .ok_or_else(|| malformed("element length past end of input"))?;
        let value = &self.input[self.pos..end];
        self.pos = end;

        Ok(Tlv {
            class,
            number,
            value,
        })
    }

    fn read_universal(&mut self, tag: u32, what: &str) -> Result<&'a [u8], AttestError> {
        let tlv = self.read()?;
        if tlv.class != TagClass::Universal || tlv.number != tag {
            return Err(malformed(format!("expected {what}")));
        }
        Ok(tlv.value)
    }

    fn read_integer(&mut self, what: &str) -> Result<i64, AttestError> {
        decode_integer(self.read_universal(TAG_INTEGER, what)?)
    }

    fn read_enumerated(&mut self, what: &str) -> Result<i64, AttestError> {
        decode_integer(self.read_universal(TAG_ENUMERATED, what)?)
    }
}

fn malformed(reason: impl Into<String>) -> AttestError {
    AttestError::ExtensionMalformed {
        reason: reason.into(),
    }
}

fn decode_integer(bytes: &[u8]) -> Result<i64, AttestError> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(malformed("integer out of range"));
    }
    let mut value: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in bytes {
        value = (value << 8) | i64::from(b);
    }
    Ok(value)
}

/// Parse a `KeyDescription` from the raw extension value.
pub fn parse_from_der(data: &[u8]) -> Result<KeyDescription, AttestError> {
    let mut outer = DerReader::new(data);
    let body = outer.read_universal(TAG_SEQUENCE, "KeyDescription sequence")?;

    let mut reader = DerReader::new(body);
    let attestation_version = reader.read_integer("attestation version")?;
    let attestation_security_level =
        SecurityLevel::from_value(reader.read_enumerated("attestation security level")?)?;
    let keymaster_version = reader.read_integer("keymaster version")?;
    let keymaster_security_level =
        SecurityLevel::from_value(reader.read_enumerated("keymaster security level")?)?;
    let attestation_challenge = reader
        .read_universal(TAG_OCTET_STRING, "attestation challenge")?
        .to_vec();
    let _unique_id = reader.read_universal(TAG_OCTET_STRING, "unique id")?;
    let software_enforced =
        parse_authorization_list(reader.read_universal(TAG_SEQUENCE, "softwareEnforced")?)?;
    let tee_enforced =
        parse_authorization_list(reader.read_universal(TAG_SEQUENCE, "teeEnforced")?)?;

    Ok(KeyDescription {
        attestation_version,
        attestation_security_level,
        keymaster_version,
        keymaster_security_level,
        attestation_challenge,
        software_enforced,
        tee_enforced,
    })
}

fn parse_authorization_list(data: &[u8]) -> Result<AuthorizationList, AttestError> {
    let mut list = AuthorizationList::default();
    let mut reader = DerReader::new(data);
    while reader.has_remaining() {
        let entry = reader.read()?;
        if entry.class != TagClass::ContextSpecific {
            return Err(malformed("authorization list entry is not context tagged"));
        }
        // Entries are explicitly tagged: the value holds a complete inner
        // element. Presence-only entries wrap a NULL.
        match entry.number {
            TAG_ALL_APPLICATIONS => list.all_applications = true,
            TAG_ROLLBACK_RESISTANT => list.rollback_resistant = true,
            TAG_ORIGIN => {
                list.origin = Some(KeyOrigin::from_value(
                    DerReader::new(entry.value).read_integer("origin")?,
                ));
            }
            TAG_OS_VERSION => {
                list.os_version = Some(DerReader::new(entry.value).read_integer("os version")?);
            }
            TAG_OS_PATCH_LEVEL => {
                list.os_patch_level =
                    Some(DerReader::new(entry.value).read_integer("os patch level")?);
            }
            TAG_ROOT_OF_TRUST => {
                list.root_of_trust = Some(parse_root_of_trust(entry.value)?);
            }
            TAG_ATTESTATION_APPLICATION_ID => {
                let wrapped = DerReader::new(entry.value)
                    .read_universal(TAG_OCTET_STRING, "attestation application id")?;
                list.attestation_application_id = Some(parse_attestation_application_id(wrapped)?);
            }
            _ => {} // tags irrelevant to policy
        }
    }
    Ok(list)
}

fn parse_root_of_trust(data: &[u8]) -> Result<RootOfTrust, AttestError> {
    let body = DerReader::new(data).read_universal(TAG_SEQUENCE, "RootOfTrust sequence")?;
    let mut reader = DerReader::new(body);
    let verified_boot_key = reader
        .read_universal(TAG_OCTET_STRING, "verified boot key")?
        .to_vec();
    let locked = reader.read_universal(TAG_BOOLEAN, "device locked")?;
    let device_locked = locked.first().copied().unwrap_or(0) != 0;
    let verified_boot_state =
        VerifiedBootState::from_value(reader.read_enumerated("verified boot state")?)?;
    Ok(RootOfTrust {
        verified_boot_key,
        device_locked,
        verified_boot_state,
    })
}

fn parse_attestation_application_id(data: &[u8]) -> Result<AttestationApplicationId, AttestError> {
    let body =
        DerReader::new(data).read_universal(TAG_SEQUENCE, "AttestationApplicationId sequence")?;
    let mut reader = DerReader::new(body);

    let mut id = AttestationApplicationId::default();

    let packages = reader.read_universal(TAG_SET, "package info set")?;
    let mut packages_reader = DerReader::new(packages);
    while packages_reader.has_remaining() {
        let info = packages_reader.read_universal(TAG_SEQUENCE, "package info")?;
        let mut info_reader = DerReader::new(info);
        let name = info_reader.read_universal(TAG_OCTET_STRING, "package name")?;
        let package_name = String::from_utf8(name.to_vec())
            .map_err(|_| malformed("package name is not UTF-8"))?;
        let version = info_reader.read_integer("package version")?;
        id.packages.push(AttestationPackage {
            package_name,
            version,
        });
    }

    let digests = reader.read_universal(TAG_SET, "signature digest set")?;
    let mut digests_reader = DerReader::new(digests);
    while digests_reader.has_remaining() {
        id.signature_digests.push(
            digests_reader
                .read_universal(TAG_OCTET_STRING, "signature digest")?
                .to_vec(),
        );
    }

    Ok(id)
}
