use super::{error::ProtocolError, responses::Jws};
use crate::key::{AccountKey, Algorithm, Jwk};
use base64::engine::{general_purpose::URL_SAFE_NO_PAD as BASE64, Engine};
use openssl::{
    ecdsa::EcdsaSig,
    hash::MessageDigest,
    pkey::Id,
    sha::{sha256, sha384, sha512},
    sign::Signer,
};
use serde::Serialize;

/// The header of a JSON Web Signature according to
/// [RFC 8555 Section 6.2](https://www.rfc-editor.org/rfc/rfc8555.html#section-6.2)
#[derive(Debug, Serialize)]
struct Header<'h> {
    nonce: &'h str,
    #[serde(rename = "alg")]
    algorithm: Algorithm,
    url: &'h str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'h str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<&'h Jwk>,
}

/// Create a JWS for the request.
///
/// Requests made before the account exists embed the public key (`jwk`), all others reference
/// the account URL (`kid`).
pub(crate) fn sign(
    url: &str,
    nonce: &str,
    payload: &str,
    key: &AccountKey,
    account_url: Option<&str>,
) -> Result<Jws, ProtocolError> {
    let payload = BASE64.encode(payload.as_bytes());

    let header = Header {
        nonce,
        algorithm: key.algorithm(),
        url,
        kid: account_url,
        jwk: match account_url {
            Some(_) => None,
            None => Some(key.jwk()),
        },
    };
    let protected = BASE64.encode(serde_json::to_vec(&header)?);

    let signature = signer(key, &protected, &payload)?;
    let signature = BASE64.encode(signature);

    Ok(Jws {
        protected,
        payload,
        signature,
    })
}

/// Generate the signature for the protected data and message payload
fn signer(key: &AccountKey, protected: &str, payload: &str) -> Result<Vec<u8>, ProtocolError> {
    let data = format!("{protected}.{payload}").into_bytes();
    let private_key = key.private_key();

    if private_key.id() == Id::RSA {
        let sig = Signer::new(MessageDigest::sha256(), private_key)?.sign_oneshot_to_vec(&data)?;
        return Ok(sig);
    }

    let (digest, size) = match key.algorithm() {
        Algorithm::ES384 => (sha384(&data).to_vec(), 48),
        Algorithm::ES512 => (sha512(&data).to_vec(), 66),
        _ => (sha256(&data).to_vec(), 32),
    };

    // JWS wants the raw, fixed-width concatenation of r and s rather than DER
    let sig = EcdsaSig::sign(&digest, &*(private_key.ec_key()?))?;
    let mut result = sig.r().to_vec_padded(size)?;
    result.extend(sig.s().to_vec_padded(size)?);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::sign;
    use crate::key::{make_ecdsa_key, make_rsa_key, AccountKey, Curve};
    use base64::engine::{general_purpose::URL_SAFE_NO_PAD as BASE64, Engine};
    use openssl::{bn::BigNum, ecdsa::EcdsaSig, hash::MessageDigest, sha::sha256, sign::Verifier};
    use serde_json::Value;

    const NONCE: &str = "A272VFpvC1e7H0YZ14_-fLlbt9Gg8bR-dGtl0PqjuGX_-o8";
    const URL: &str = "https://acme-staging-v02.api.letsencrypt.org/acme/new-acct";
    const ACCOUNT_URL: &str = "https://acme-staging-v02.api.letsencrypt.org/acme/acct/0123456";

    fn protected_header(protected: &str) -> Value {
        serde_json::from_slice(&BASE64.decode(protected).unwrap()).unwrap()
    }

    #[test]
    fn header_embeds_jwk_without_account() {
        let key = AccountKey::generate().unwrap();
        let jws = sign(URL, NONCE, "{}", &key, None).unwrap();

        let header = protected_header(&jws.protected);
        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["nonce"], NONCE);
        assert_eq!(header["url"], URL);
        assert_eq!(header["jwk"]["kty"], "EC");
        assert!(header.get("kid").is_none());
        assert_eq!(jws.payload, "e30");
    }

    #[test]
    fn header_references_account() {
        let key = AccountKey::from_pem(&make_rsa_key(2048).unwrap()).unwrap();
        let jws = sign(URL, NONCE, "", &key, Some(ACCOUNT_URL)).unwrap();

        let header = protected_header(&jws.protected);
        assert_eq!(header["alg"], "RS256");
        assert_eq!(header["kid"], ACCOUNT_URL);
        assert!(header.get("jwk").is_none());
        // POST-as-GET carries an empty payload
        assert_eq!(jws.payload, "");
    }

    #[test]
    fn rsa_signature_verifies() {
        let key = AccountKey::from_pem(&make_rsa_key(2048).unwrap()).unwrap();
        let jws = sign(URL, NONCE, "payload", &key, None).unwrap();

        let signature = BASE64.decode(&jws.signature).unwrap();
        let mut verifier = Verifier::new(MessageDigest::sha256(), key.private_key()).unwrap();
        verifier
            .update(format!("{}.{}", jws.protected, jws.payload).as_bytes())
            .unwrap();
        assert!(verifier.verify(&signature).unwrap());
    }

    #[test]
    fn ecdsa_signature_is_fixed_width_and_verifies() {
        let key = AccountKey::from_pem(&make_ecdsa_key(Curve::P256).unwrap()).unwrap();
        let jws = sign(URL, NONCE, "payload", &key, Some(ACCOUNT_URL)).unwrap();

        let signature = BASE64.decode(&jws.signature).unwrap();
        assert_eq!(signature.len(), 64);

        let r = BigNum::from_slice(&signature[..32]).unwrap();
        let s = BigNum::from_slice(&signature[32..]).unwrap();
        let sig = EcdsaSig::from_private_components(r, s).unwrap();
        let digest = sha256(format!("{}.{}", jws.protected, jws.payload).as_bytes());
        let ec = key.private_key().ec_key().unwrap();
        assert!(sig.verify(&digest, &ec).unwrap());
    }

    #[test]
    fn ecdsa_p521_signature_width() {
        let key = AccountKey::from_pem(&make_ecdsa_key(Curve::P521).unwrap()).unwrap();
        let jws = sign(URL, NONCE, "payload", &key, None).unwrap();

        assert_eq!(protected_header(&jws.protected)["alg"], "ES512");
        assert_eq!(BASE64.decode(&jws.signature).unwrap().len(), 132);
    }
}
