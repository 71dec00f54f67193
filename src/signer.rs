//! HMAC-SHA256 request signing for API-key authentication (spec §4.3).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A signed request's signature and the timestamp it was computed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub signature_hex: String,
    pub timestamp: i64,
}

/// Compute the HMAC-SHA256 signature for an API-key authenticated request.
///
/// `params` need not be pre-sorted; this function sorts by key then value.
/// The canonical string is:
///
/// ```text
/// METHOD \n PATH \n k1=v1&k2=v2&...&ts=<unix_seconds>
/// ```
///
/// `now` is the current unix timestamp in seconds, supplied by the caller so
/// the signer itself stays a pure function of its inputs (it neither reads
/// nor adjusts for clock skew; a stale timestamp is an upstream rejection,
/// handled by the caller's retry path).
pub fn sign(
    method: &str,
    path: &str,
    params: &[(String, String)],
    access_password: &str,
    now: i64,
) -> Signature {
    let mut sorted: Vec<(String, String)> = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let mut canonical_params: Vec<String> =
        sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    canonical_params.push(format!("ts={now}"));

    let canonical_string = format!(
        "{}\n{}\n{}",
        method.to_ascii_uppercase(),
        path,
        canonical_params.join("&")
    );

    let mut mac = HmacSha256::new_from_slice(access_password.as_bytes())
        .expect("HMAC accepts a key of any length");
    mac.update(canonical_string.as_bytes());
    let signature_hex = hex_lower(&mac.finalize().into_bytes());

    Signature {
        signature_hex,
        timestamp: now,
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String never fails");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_for_same_inputs() {
        let params = vec![("uid".to_string(), "U1".to_string())];
        let a = sign("GET", "/notebooks/list", &params, "SECRET", 1_700_000_000);
        let b = sign("GET", "/notebooks/list", &params, "SECRET", 1_700_000_000);
        assert_eq!(a, b);
    }

    #[test]
    fn param_order_does_not_affect_signature() {
        let p1 = vec![
            ("uid".to_string(), "U1".to_string()),
            ("notebook_id".to_string(), "N1".to_string()),
        ];
        let p2 = vec![
            ("notebook_id".to_string(), "N1".to_string()),
            ("uid".to_string(), "U1".to_string()),
        ];
        let a = sign("GET", "/pages/list", &p1, "SECRET", 100);
        let b = sign("GET", "/pages/list", &p2, "SECRET", 100);
        assert_eq!(a.signature_hex, b.signature_hex);
    }

    #[test]
    fn different_secrets_yield_different_signatures() {
        let params = vec![("uid".to_string(), "U1".to_string())];
        let a = sign("GET", "/notebooks/list", &params, "SECRET1", 100);
        let b = sign("GET", "/notebooks/list", &params, "SECRET2", 100);
        assert_ne!(a.signature_hex, b.signature_hex);
    }

    #[test]
    fn output_is_lowercase_hex() {
        let params = vec![];
        let sig = sign("GET", "/x", &params, "k", 1);
        assert!(sig.signature_hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(sig.signature_hex.len(), 64);
    }

    #[test]
    fn method_is_uppercased_in_canonical_string() {
        let a = sign("get", "/x", &[], "k", 1);
        let b = sign("GET", "/x", &[], "k", 1);
        assert_eq!(a.signature_hex, b.signature_hex);
    }
}
