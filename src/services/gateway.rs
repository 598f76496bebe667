use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

type HmacSha512 = Hmac<Sha512>;

const SIGNATURE_PARAM: &str = "vnp_SecureHash";
const SIGNATURE_TYPE_PARAM: &str = "vnp_SecureHashType";
const RESPONSE_CODE_PARAM: &str = "vnp_ResponseCode";
const TXN_REF_PARAM: &str = "vnp_TxnRef";
const SUCCESS_RESPONSE_CODE: &str = "00";

/// Wire prefix marking an invoice payment in the transaction reference.
/// The gateway only carries an opaque string, so the target type rides
/// along inside it; everywhere past the callback boundary the parsed
/// [`PaymentTarget`] is used instead.
const INVOICE_REF_PREFIX: &str = "INV-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentTarget {
    Rental(Uuid),
    Invoice(Uuid),
}

impl PaymentTarget {
    pub fn parse(reference: &str) -> Option<Self> {
        let reference = reference.trim();
        if let Some(raw) = reference.strip_prefix(INVOICE_REF_PREFIX) {
            return Uuid::parse_str(raw).ok().map(Self::Invoice);
        }
        Uuid::parse_str(reference).ok().map(Self::Rental)
    }
}

impl fmt::Display for PaymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rental(id) => write!(f, "{id}"),
            Self::Invoice(id) => write!(f, "{INVOICE_REF_PREFIX}{id}"),
        }
    }
}

/// Build the outbound signed redirect URL for one payment attempt.
///
/// The parameter set is fixed by the gateway: keys are sorted
/// lexicographically, form-urlencoded, signed with HMAC-SHA512 over the
/// canonical string, and the hex digest is appended as `vnp_SecureHash`.
pub fn build_payment_url(
    config: &AppConfig,
    target: PaymentTarget,
    amount: i64,
    order_info: &str,
    client_ip: &str,
    now: DateTime<Utc>,
) -> AppResult<String> {
    if config.gateway_merchant_code.is_empty() || config.gateway_hash_secret.is_empty() {
        return Err(AppError::Dependency(
            "Payment gateway credentials are not configured.".to_string(),
        ));
    }
    if amount <= 0 {
        return Err(AppError::Validation(
            "Payment amount must be positive.".to_string(),
        ));
    }

    let mut params: BTreeMap<String, String> = BTreeMap::new();
    params.insert("vnp_Version".into(), "2.1.0".into());
    params.insert("vnp_Command".into(), "pay".into());
    params.insert("vnp_TmnCode".into(), config.gateway_merchant_code.clone());
    // Amount travels in minor units (x100).
    params.insert("vnp_Amount".into(), (amount * 100).to_string());
    params.insert("vnp_CurrCode".into(), config.gateway_currency.clone());
    params.insert(TXN_REF_PARAM.into(), target.to_string());
    params.insert("vnp_OrderInfo".into(), order_info.to_string());
    params.insert("vnp_OrderType".into(), "other".into());
    params.insert("vnp_Locale".into(), config.gateway_locale.clone());
    params.insert("vnp_IpAddr".into(), client_ip.to_string());
    params.insert(
        "vnp_CreateDate".into(),
        now.format("%Y%m%d%H%M%S").to_string(),
    );
    params.insert("vnp_ReturnUrl".into(), config.gateway_return_url.clone());

    let canonical = canonical_query(&params);
    let signature = hmac_sha512_hex(&config.gateway_hash_secret, &canonical);

    Ok(format!(
        "{}?{}&{}={}",
        config.gateway_base_url, canonical, SIGNATURE_PARAM, signature
    ))
}

/// A callback whose signature has been verified.
#[derive(Debug, Clone)]
pub struct VerifiedCallback {
    pub target: Option<PaymentTarget>,
    pub raw_reference: String,
    pub response_code: String,
}

impl VerifiedCallback {
    pub fn is_success(&self) -> bool {
        self.response_code == SUCCESS_RESPONSE_CODE
    }
}

/// Verify an inbound callback's signature and extract what the reconciler
/// needs. The signature and signature-type parameters are removed, the
/// remainder re-sorted and re-encoded exactly as for signing, and the MAC
/// compared constant-time. Any mismatch rejects the callback without
/// touching any entity.
pub fn verify_callback(
    secret: &str,
    params: &HashMap<String, String>,
) -> AppResult<VerifiedCallback> {
    let supplied = params
        .get(SIGNATURE_PARAM)
        .map(String::as_str)
        .unwrap_or_default();
    if supplied.is_empty() {
        return Err(AppError::InvalidSignature(
            "Callback is missing its signature.".to_string(),
        ));
    }

    let mut to_sign: BTreeMap<String, String> = params
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    to_sign.remove(SIGNATURE_PARAM);
    to_sign.remove(SIGNATURE_TYPE_PARAM);

    let canonical = canonical_query(&to_sign);

    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::InvalidSignature("Invalid signing key.".to_string()))?;
    mac.update(canonical.as_bytes());

    let supplied_bytes = hex_decode(supplied)
        .map_err(|_| AppError::InvalidSignature("Signature is not valid hex.".to_string()))?;
    mac.verify_slice(&supplied_bytes)
        .map_err(|_| AppError::InvalidSignature("Callback signature mismatch.".to_string()))?;

    let raw_reference = to_sign
        .get(TXN_REF_PARAM)
        .cloned()
        .unwrap_or_default();

    Ok(VerifiedCallback {
        target: PaymentTarget::parse(&raw_reference),
        raw_reference,
        response_code: to_sign
            .get(RESPONSE_CODE_PARAM)
            .cloned()
            .unwrap_or_default(),
    })
}

/// Sorted, form-urlencoded canonical query string (spaces become `+`).
fn canonical_query(params: &BTreeMap<String, String>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

fn hmac_sha512_hex(secret: &str, data: &str) -> String {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(data.as_bytes());
    hex_encode(&mac.finalize().into_bytes())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn hex_decode(hex: &str) -> Result<Vec<u8>, ()> {
    // Wire input: chunk by bytes, never by char boundary.
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err(());
    }
    hex.as_bytes()
        .chunks_exact(2)
        .map(|pair| {
            let hi = hex_val(pair[0])?;
            let lo = hex_val(pair[1])?;
            Ok(hi << 4 | lo)
        })
        .collect()
}

fn hex_val(byte: u8) -> Result<u8, ()> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        _ => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::from_env();
        config.gateway_base_url = "https://pay.example.com/checkout".into();
        config.gateway_merchant_code = "RENTORA01".into();
        config.gateway_hash_secret = "topsecret".into();
        config.gateway_return_url = "http://localhost:8000/v1/payments/callback".into();
        config.gateway_currency = "VND".into();
        config.gateway_locale = "vn".into();
        config
    }

    fn callback_params(secret: &str, reference: &str, response_code: &str) -> HashMap<String, String> {
        let mut signed: BTreeMap<String, String> = BTreeMap::new();
        signed.insert("vnp_Amount".into(), "1500000000".into());
        signed.insert("vnp_TmnCode".into(), "RENTORA01".into());
        signed.insert(TXN_REF_PARAM.into(), reference.into());
        signed.insert(RESPONSE_CODE_PARAM.into(), response_code.into());
        signed.insert("vnp_TransactionNo".into(), "13863891".into());

        let signature = hmac_sha512_hex(secret, &canonical_query(&signed));
        let mut params: HashMap<String, String> = signed.into_iter().collect();
        params.insert(SIGNATURE_PARAM.into(), signature);
        params.insert(SIGNATURE_TYPE_PARAM.into(), "HmacSHA512".into());
        params
    }

    #[test]
    fn parses_invoice_and_rental_references() {
        let id = Uuid::new_v4();
        assert_eq!(
            PaymentTarget::parse(&format!("INV-{id}")),
            Some(PaymentTarget::Invoice(id))
        );
        assert_eq!(
            PaymentTarget::parse(&id.to_string()),
            Some(PaymentTarget::Rental(id))
        );
        assert_eq!(PaymentTarget::parse("INV-not-a-uuid"), None);
        assert_eq!(PaymentTarget::parse("garbage"), None);
    }

    #[test]
    fn reference_round_trips_through_display() {
        let id = Uuid::new_v4();
        for target in [PaymentTarget::Rental(id), PaymentTarget::Invoice(id)] {
            assert_eq!(PaymentTarget::parse(&target.to_string()), Some(target));
        }
    }

    #[test]
    fn canonical_query_sorts_and_encodes() {
        let mut params = BTreeMap::new();
        params.insert("b".to_string(), "two words".to_string());
        params.insert("a".to_string(), "x&y".to_string());
        assert_eq!(canonical_query(&params), "a=x%26y&b=two+words");
    }

    #[test]
    fn builds_signed_redirect_url() {
        let config = test_config();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let rental_id = Uuid::new_v4();

        let url = build_payment_url(
            &config,
            PaymentTarget::Rental(rental_id),
            15_000_000,
            "Contract payment",
            "127.0.0.1",
            now,
        )
        .unwrap();

        assert!(url.starts_with("https://pay.example.com/checkout?"));
        // Minor units: 15,000,000 x 100.
        assert!(url.contains("vnp_Amount=1500000000"));
        assert!(url.contains("vnp_CreateDate=20240301120000"));
        assert!(url.contains(&format!("vnp_TxnRef={rental_id}")));
        assert!(url.contains("&vnp_SecureHash="));

        // The URL's own query must verify as a callback would.
        let query = url.split_once('?').unwrap().1;
        let parsed: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let verified = verify_callback(&config.gateway_hash_secret, &parsed).unwrap();
        assert_eq!(verified.target, Some(PaymentTarget::Rental(rental_id)));
    }

    #[test]
    fn rejects_zero_amount() {
        let config = test_config();
        let err = build_payment_url(
            &config,
            PaymentTarget::Rental(Uuid::new_v4()),
            0,
            "x",
            "127.0.0.1",
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn verifies_valid_callback() {
        let id = Uuid::new_v4();
        let params = callback_params("topsecret", &format!("INV-{id}"), "00");
        let verified = verify_callback("topsecret", &params).unwrap();
        assert_eq!(verified.target, Some(PaymentTarget::Invoice(id)));
        assert!(verified.is_success());
    }

    #[test]
    fn failure_code_is_not_success() {
        let params = callback_params("topsecret", &Uuid::new_v4().to_string(), "24");
        let verified = verify_callback("topsecret", &params).unwrap();
        assert!(!verified.is_success());
    }

    #[test]
    fn rejects_tampered_parameter() {
        let mut params = callback_params("topsecret", &Uuid::new_v4().to_string(), "00");
        params.insert("vnp_Amount".into(), "999".into());
        let err = verify_callback("topsecret", &params).unwrap_err();
        assert!(matches!(err, AppError::InvalidSignature(_)));
    }

    #[test]
    fn rejects_tampered_signature() {
        let mut params = callback_params("topsecret", &Uuid::new_v4().to_string(), "00");
        let sig = params.get_mut(SIGNATURE_PARAM).unwrap();
        *sig = format!("00{}", &sig[2..]);
        assert!(verify_callback("topsecret", &params).is_err());
    }

    #[test]
    fn rejects_wrong_secret_and_missing_signature() {
        let params = callback_params("topsecret", &Uuid::new_v4().to_string(), "00");
        assert!(verify_callback("othersecret", &params).is_err());

        let mut missing = params;
        missing.remove(SIGNATURE_PARAM);
        assert!(verify_callback("topsecret", &missing).is_err());
    }

    #[test]
    fn signature_type_param_is_excluded_from_signing() {
        // Gateways differ on echoing vnp_SecureHashType; its presence or
        // absence must not affect verification.
        let mut params = callback_params("topsecret", &Uuid::new_v4().to_string(), "00");
        params.remove(SIGNATURE_TYPE_PARAM);
        assert!(verify_callback("topsecret", &params).is_ok());
    }

    #[test]
    fn hex_round_trip() {
        assert_eq!(hex_encode(&[0x00, 0xff, 0x1a]), "00ff1a");
        assert_eq!(hex_decode("00ff1a").unwrap(), vec![0x00, 0xff, 0x1a]);
        assert!(hex_decode("abc").is_err());
        assert!(hex_decode("zz").is_err());
        // Multi-byte chars keep the byte length even; must still reject.
        assert!(hex_decode("aüa").is_err());
        assert!(hex_decode("üü").is_err());
    }

    #[test]
    fn rejects_non_ascii_signature() {
        // Anyone can hit the callback with an arbitrary signature value.
        let mut params = callback_params("topsecret", &Uuid::new_v4().to_string(), "00");
        params.insert(SIGNATURE_PARAM.into(), "aüa".into());
        let err = verify_callback("topsecret", &params).unwrap_err();
        assert!(matches!(err, AppError::InvalidSignature(_)));
    }
}
