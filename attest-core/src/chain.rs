//! Certificate-chain verification.
//!
//! Walks the attestation chain leaf-first: every certificate must be inside
//! its validity window and signed by its successor, the last certificate
//! must be correctly self-signed, and its DER must be byte-identical to the
//! pinned Google key-attestation root. Nothing inside the attestation
//! extension is trusted here.

use once_cell::sync::Lazy;
use x509_parser::prelude::*;
use x509_parser::time::ASN1Time;

use crate::error::AttestError;

/// Required chain length for protocol v1: leaf, two intermediates, root.
pub const CHAIN_LENGTH: usize = 4;

/// The Google hardware key-attestation root certificate.
pub const GOOGLE_ROOT_CERTIFICATE: &str = "-----BEGIN CERTIFICATE-----
MIIFYDCCA0igAwIBAgIJAOj6GWMU0voYMA0GCSqGSIb3DQEBCwUAMBsxGTAXBgNV
BAUTEGY5MjAwOWU4NTNiNmIwNDUwHhcNMTYwNTI2MTYyODUyWhcNMjYwNTI0MTYy
ODUyWjAbMRkwFwYDVQQFExBmOTIwMDllODUzYjZiMDQ1MIICIjANBgkqhkiG9w0B
AQEFAAOCAg8AMIICCgKCAgEAr7bHgiuxpwHsK7Qui8xUFmOr75gvMsd/dTEDDJdS
Sxtf6An7xyqpRR90PL2abxM1dEqlXnf2tqw1Ne4Xwl5jlRfdnJLmN0pTy/4lj4/7
tv0Sk3iiKkypnEUtR6WfMgH0QZfKHM1+di+y9TFRtv6y//0rb+T+W8a9nsNL/ggj
nar86461qO0rOs2cXjp3kOG1FEJ5MVmFmBGtnrKpa73XpXyTqRxB/M0n1n/W9nGq
C4FSYa04T6N5RIZGBN2z2MT5IKGbFlbC8UrW0DxW7AYImQQcHtGl/m00QLVWutHQ
oVJYnFPlXTcHYvASLu+RhhsbDmxMgJJ0mcDpvsC4PjvB+TxywElgS70vE0XmLD+O
JtvsBslHZvPBKCOdT0MS+tgSOIfga+z1Z1g7+DVagf7quvmag8jfPioyKvxnK/Eg
sTUVi2ghzq8wm27ud/mIM7AY2qEORR8Go3TVB4HzWQgpZrt3i5MIlCaY504LzSRi
igHCzAPlHws+W0rB5N+er5/2pJKnfBSDiCiFAVtCLOZ7gLiMm0jhO2B6tUXHI/+M
RPjy02i59lINMRRev56GKtcd9qO/0kUJWdZTdA2XoS82ixPvZtXQpUpuL12ab+9E
aDK8Z4RHJYYfCT3Q5vNAXaiWQ+8PTWm2QgBR/bkwSWc+NpUFgNPN9PvQi8WEg5Um
AGMCAwEAAaOBpjCBozAdBgNVHQ4EFgQUNmHhAHyIBQlRi0RsR/8aTMnqTxIwHwYD
VR0jBBgwFoAUNmHhAHyIBQlRi0RsR/8aTMnqTxIwDwYDVR0TAQH/BAUwAwEB/zAO
BgNVHQ8BAf8EBAMCAYYwQAYDVR0fBDkwNzA1oDOgMYYvaHR0cHM6Ly9hbmRyb2lk
Lmdvb2dsZWFwaXMuY29tL2F0dGVzdGF0aW9uL2NybC8wDQYJKoZIhvcNAQELBQAD
ggIBACDIw41L3KlXG0aMiS//cqrG+EShHUGo8HNsw30W1kJtjn6UBwRM6jnmiwfB
Pb8VA91chb2vssAtX2zbTvqBJ9+LBPGCdw/E53Rbf86qhxKaiAHOjpvAy5Y3m00m
qC0w/Zwvju1twb4vhLaJ5NkUJYsUS7rmJKHHBnETLi8GFqiEsqTWpG/6ibYCv7rY
DBJDcR9W62BW9jfIoBQcxUCUJouMPH25lLNcDc1ssqvC2v7iUgI9LeoM1sNovqPm
QUiG9rHli1vXxzCyaMTjwftkJLkf6724DFhuKug2jITV0QkXvaJWF4nUaHOTNA4u
JU9WDvZLI1j83A+/xnAJUucIv/zGJ1AMH2boHqF8CY16LpsYgBt6tKxxWH00XcyD
CdW2KlBCeqbQPcsFmWyWugxdcekhYsAWyoSf818NUsZdBWBaR/OukXrNLfkQ79Iy
ZohZbvabO/X+MVT3rriAoKc8oE2Uws6DF+60PV7/WIPjNvXySdqspImSN78mflxD
qwLqRBYkA3I75qppLGG9rp7UCdRjxMl8ZDBld+7yvHVgt1cVzJx9xnyGCC23Uaic
MDSXYrB4I4WHXPGjxhZuCuPBLTdOLU8YRvMYdEvYebWHMpvwGCF6bAx3JBpIeOQ1
wDB5y0USicV3YgYGmi+NZfhA4URSh77Yd6uuJOJENRaNVTzk
-----END CERTIFICATE-----";

static GOOGLE_ROOT_DER: Lazy<Vec<u8>> = Lazy::new(|| {
    let (_, pem) = x509_parser::pem::parse_x509_pem(GOOGLE_ROOT_CERTIFICATE.as_bytes())
        .expect("compiled-in root certificate is valid PEM");
    pem.contents
});

/// DER encoding of [`GOOGLE_ROOT_CERTIFICATE`].
#[must_use]
pub fn google_root_der() -> &'static [u8] {
    &GOOGLE_ROOT_DER
}

/// Verify an attestation certificate chain, leaf first, root last.
///
/// `expected_root_der` is the trust anchor the final certificate must equal
/// byte for byte. `now_secs` is the verification wall clock in epoch
/// seconds; no skew compensation is applied.
pub fn verify_chain(
    chain: &[Vec<u8>],
    expected_root_der: &[u8],
    now_secs: i64,
) -> Result<(), AttestError> {
    if chain.len() != CHAIN_LENGTH {
        return Err(AttestError::UnsupportedChainLength {
            length: chain.len(),
        });
    }

    let mut certs = Vec::with_capacity(chain.len());
    for (index, der) in chain.iter().enumerate() {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|_| AttestError::CertificateParse { index })?;
        certs.push(cert);
    }

    let now = ASN1Time::from_timestamp(now_secs)
        .map_err(|_| AttestError::CertExpired { index: 0 })?;

    for index in 0..certs.len() {
        let cert = &certs[index];
        if cert.validity().not_after < now || cert.validity().not_before > now {
            return Err(AttestError::CertExpired { index });
        }
        // The last certificate is checked against its own key: self-signed.
        let issuer = certs.get(index + 1).unwrap_or(cert);
        cert.verify_signature(Some(&issuer.tbs_certificate.subject_pki))
            .map_err(|_| AttestError::InvalidSignatureInChain { index })?;
    }

    if chain[chain.len() - 1] != expected_root_der {
        return Err(AttestError::RootMismatch);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2018-06-01T00:00:00Z, inside every validity window of the pinned root.
    const NOW: i64 = 1_527_811_200;

    fn root_chain() -> Vec<Vec<u8>> {
        vec![google_root_der().to_vec(); CHAIN_LENGTH]
    }

    #[test]
    fn test_root_der_parses() {
        let der = google_root_der();
        let (rest, cert) = X509Certificate::from_der(der).unwrap();
        assert!(rest.is_empty());
        assert!(cert.subject().to_string().contains("f92009e853b6b045"));
    }

    #[test]
    fn test_self_signed_root_chain_verifies() {
        verify_chain(&root_chain(), google_root_der(), NOW).unwrap();
    }

    #[test]
    fn test_rejects_wrong_length() {
        let chain = vec![google_root_der().to_vec(); 3];
        assert!(matches!(
            verify_chain(&chain, google_root_der(), NOW),
            Err(AttestError::UnsupportedChainLength { length: 3 })
        ));
    }

    #[test]
    fn test_rejects_unparseable_certificate() {
        let mut chain = root_chain();
        chain[1] = vec![0xde, 0xad, 0xbe, 0xef];
        assert!(matches!(
            verify_chain(&chain, google_root_der(), NOW),
            Err(AttestError::CertificateParse { index: 1 })
        ));
    }

    #[test]
    fn test_rejects_expired_certificate() {
        // 2030-01-01, past the root's notAfter of 2026-05-24.
        let late = 1_893_456_000;
        assert!(matches!(
            verify_chain(&root_chain(), google_root_der(), late),
            Err(AttestError::CertExpired { index: 0 })
        ));
    }

    #[test]
    fn test_rejects_unpinned_root() {
        let other_root = vec![0x42; 16];
        assert!(matches!(
            verify_chain(&root_chain(), &other_root, NOW),
            Err(AttestError::RootMismatch)
        ));
    }
}
