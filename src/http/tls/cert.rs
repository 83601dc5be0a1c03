//! Certificate helpers
//!
//! Generation of short-lived self-signed certificates for loopback peers, and
//! the subject summary logged after a handshake.

use super::config::TlsError;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509NameBuilder, X509NameRef, X509Ref, X509};

/// Generate a P-256 key and a certificate for `common_name`, valid for a day
///
/// The name is also put in the subjectAltName so hostname checks pass.
pub fn generate_self_signed(common_name: &str) -> Result<(X509, PKey<Private>), TlsError> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let key = PKey::from_ec_key(EcKey::generate(&group)?)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    let name = name.build();

    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    let mut serial = BigNum::new()?;
    serial.rand(64, MsbOption::MAYBE_ZERO, false)?;
    let serial = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(&key)?;
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(1)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    let mut san = SubjectAlternativeName::new();
    match common_name.parse::<std::net::IpAddr>() {
        Ok(_) => san.ip(common_name),
        Err(_) => san.dns(common_name),
    };
    let san = san.build(&builder.x509v3_context(None, None))?;
    builder.append_extension(san)?;

    builder.sign(&key, MessageDigest::sha256())?;
    Ok((builder.build(), key))
}

/// Certificate and key as one PEM document, the layout `cert_file` reads
pub fn to_pem_bundle(cert: &X509Ref, key: &PKey<Private>) -> Result<Vec<u8>, TlsError> {
    let mut pem = cert.to_pem()?;
    pem.extend_from_slice(&key.private_key_to_pem_pkcs8()?);
    Ok(pem)
}

/// Common Name of a certificate subject, `<undef>` when absent
pub fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "<undef>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_self_signed() {
        let (cert, key) = generate_self_signed("race.test").unwrap();
        assert_eq!(common_name(cert.subject_name()), "race.test");
        assert_eq!(common_name(cert.issuer_name()), "race.test");
        assert!(cert.verify(&key).unwrap());
        assert!(cert.not_before() < cert.not_after());

        let sans: Vec<String> = cert
            .subject_alt_names()
            .unwrap()
            .iter()
            .filter_map(|n| n.dnsname().map(str::to_string))
            .collect();
        assert_eq!(sans, vec!["race.test".to_string()]);
    }

    #[test]
    fn test_pem_bundle_parses_back() {
        let (cert, key) = generate_self_signed("127.0.0.1").unwrap();
        let pem = to_pem_bundle(&cert, &key).unwrap();

        let parsed = X509::from_pem(&pem).unwrap();
        assert_eq!(common_name(parsed.subject_name()), "127.0.0.1");
        assert!(PKey::private_key_from_pem(&pem).is_ok());
    }
}
