//! Key material: private keys, certificate signing requests and ACME account keys

use crate::error::{Error, Result};
use base64::engine::{general_purpose::URL_SAFE_NO_PAD as BASE64, Engine};
use openssl::{
    asn1::{Asn1Object, Asn1OctetString},
    bn::{BigNum, BigNumContext, BigNumRef},
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::{Id, PKey, Private},
    rsa::{Rsa, RsaPrivateKeyBuilder},
    sha::sha256,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509Extension, X509Req},
};
use serde::{ser::SerializeStruct, Deserialize, Serialize, Serializer};
use std::fmt::{Debug, Formatter};

/// OID of the TLS Feature extension ([RFC 7633](https://www.rfc-editor.org/rfc/rfc7633))
const TLS_FEATURE_OID: &str = "1.3.6.1.5.5.7.1.24";

/// DER encoding of `SEQUENCE { INTEGER 5 }`, i.e. the `status_request` feature.
const STATUS_REQUEST: [u8; 5] = [0x30, 0x03, 0x02, 0x01, 0x05];

/// Elliptic curves supported for private keys and account keys
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Curve {
    #[default]
    #[serde(rename = "P-256")]
    P256,
    #[serde(rename = "P-384")]
    P384,
    #[serde(rename = "P-521")]
    P521,
}

impl Curve {
    fn nid(self) -> Nid {
        match self {
            Self::P256 => Nid::X9_62_PRIME256V1,
            Self::P384 => Nid::SECP384R1,
            Self::P521 => Nid::SECP521R1,
        }
    }

    fn from_nid(nid: Nid) -> Option<Self> {
        match nid {
            Nid::X9_62_PRIME256V1 => Some(Self::P256),
            Nid::SECP384R1 => Some(Self::P384),
            Nid::SECP521R1 => Some(Self::P521),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::P256 => "P-256",
            Self::P384 => "P-384",
            Self::P521 => "P-521",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "P-256" => Some(Self::P256),
            "P-384" => Some(Self::P384),
            "P-521" => Some(Self::P521),
            _ => None,
        }
    }
}

/// Generate a PEM-encoded, unencrypted EC P-256 private key
pub fn make_key() -> Result<Vec<u8>> {
    make_ecdsa_key(Curve::P256)
}

/// Generate a PEM-encoded, unencrypted EC private key on the given curve
pub fn make_ecdsa_key(curve: Curve) -> Result<Vec<u8>> {
    let group = EcGroup::from_curve_name(curve.nid())?;
    let key = EcKey::generate(&group)?;
    Ok(key.private_key_to_pem()?)
}

/// Generate a PEM-encoded, unencrypted RSA private key
pub fn make_rsa_key(bits: u32) -> Result<Vec<u8>> {
    let key = Rsa::generate(bits)?;
    Ok(key.private_key_to_pem()?)
}

/// Build a PEM-encoded PKCS#10 certificate signing request.
///
/// Every domain is added as a DNS subject alternative name, in the given order. Duplicates are
/// passed through as-is. When `must_staple` is set, the request asks for the OCSP must-staple
/// TLS feature.
pub fn make_csr<S: AsRef<str>>(
    private_key_pem: &[u8],
    domains: &[S],
    must_staple: bool,
) -> Result<Vec<u8>> {
    if domains.is_empty() {
        return Err(Error::MissingIdentifiers);
    }

    let key = PKey::private_key_from_pem(private_key_pem)?;

    let mut builder = X509Req::builder()?;
    builder.set_pubkey(&key)?;

    let mut extensions = Stack::new()?;

    let mut san = SubjectAlternativeName::new();
    for domain in domains {
        san.dns(domain.as_ref());
    }
    extensions.push(san.build(&builder.x509v3_context(None))?)?;

    if must_staple {
        let oid = Asn1Object::from_str(TLS_FEATURE_OID)?;
        let value = Asn1OctetString::new_from_bytes(&STATUS_REQUEST)?;
        extensions.push(X509Extension::new_from_der(&oid, false, &value)?)?;
    }

    builder.add_extensions(&extensions)?;
    builder.sign(&key, MessageDigest::sha256())?;

    Ok(builder.build().to_pem()?)
}

/// Possible algorithms a JWS can be signed with. Ignores algorithms explicitly denied by
/// [RFC 8555 Section 6.2](https://www.rfc-editor.org/rfc/rfc8555.html#section-6.2), namely:
/// `none` and MAC-based algorithms.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub(crate) enum Algorithm {
    RS256,
    ES256,
    ES384,
    ES512,
}

/// The public half of an account key as a JSON Web Key
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Jwk {
    Rsa { e: String, n: String },
    Ec { crv: Curve, x: String, y: String },
}

// Fields are serialized in lexicographical order per RFC 7638 Section 3
// (https://www.rfc-editor.org/rfc/rfc7638#section-3) so the output doubles as the thumbprint
// input.
impl Serialize for Jwk {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Rsa { e, n } => {
                let mut state = serializer.serialize_struct("Jwk", 3)?;
                state.serialize_field("e", e)?;
                state.serialize_field("kty", "RSA")?;
                state.serialize_field("n", n)?;
                state.end()
            }
            Self::Ec { crv, x, y } => {
                let mut state = serializer.serialize_struct("Jwk", 4)?;
                state.serialize_field("crv", crv)?;
                state.serialize_field("kty", "EC")?;
                state.serialize_field("x", x)?;
                state.serialize_field("y", y)?;
                state.end()
            }
        }
    }
}

/// A JSON Web Key including the private parameters, used for persisting account keys
#[derive(Debug, Default, Deserialize, Serialize)]
pub(crate) struct PrivateJwk {
    kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    qi: Option<String>,
}

/// The key an ACME account signs its requests with.
///
/// RSA keys and EC keys on P-256, P-384 and P-521 are supported.
#[derive(Clone)]
pub struct AccountKey {
    key: PKey<Private>,
    algorithm: Algorithm,
    jwk: Jwk,
}

impl AccountKey {
    /// Generate a fresh EC P-256 account key
    pub fn generate() -> Result<Self> {
        let group = EcGroup::from_curve_name(Curve::P256.nid())?;
        let key = PKey::from_ec_key(EcKey::generate(&group)?)?;
        Self::from_pkey(key)
    }

    /// Wrap an existing private key
    pub fn from_pkey(key: PKey<Private>) -> Result<Self> {
        let (algorithm, jwk) = match key.id() {
            Id::RSA => {
                let rsa = key.rsa()?;
                let jwk = Jwk::Rsa {
                    e: encode(rsa.e()),
                    n: encode(rsa.n()),
                };
                (Algorithm::RS256, jwk)
            }
            Id::EC => {
                let ec = key.ec_key()?;
                let curve = ec
                    .group()
                    .curve_name()
                    .and_then(Curve::from_nid)
                    .ok_or(Error::InvalidAccountKey("unsupported elliptic curve"))?;

                let mut ctx = BigNumContext::new()?;
                let mut x = BigNum::new()?;
                let mut y = BigNum::new()?;
                ec.public_key()
                    .affine_coordinates_gfp(ec.group(), &mut x, &mut y, &mut ctx)?;

                // Coordinates must be the full size of the field, see RFC 7518 Section 6.2.1.2
                let size = ec.group().degree().div_ceil(8) as i32;
                let jwk = Jwk::Ec {
                    crv: curve,
                    x: BASE64.encode(x.to_vec_padded(size)?),
                    y: BASE64.encode(y.to_vec_padded(size)?),
                };
                let algorithm = match curve {
                    Curve::P256 => Algorithm::ES256,
                    Curve::P384 => Algorithm::ES384,
                    Curve::P521 => Algorithm::ES512,
                };
                (algorithm, jwk)
            }
            _ => return Err(Error::InvalidAccountKey("unsupported key type")),
        };

        Ok(AccountKey {
            key,
            algorithm,
            jwk,
        })
    }

    /// Load a PEM-encoded private key
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        Self::from_pkey(PKey::private_key_from_pem(pem)?)
    }

    /// The underlying private key
    pub fn private_key(&self) -> &PKey<Private> {
        &self.key
    }

    pub(crate) fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub(crate) fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    /// The [RFC 7638](https://www.rfc-editor.org/rfc/rfc7638) thumbprint of the public key,
    /// base64url-encoded
    pub fn thumbprint(&self) -> String {
        // The JWK only holds strings, serializing it cannot fail
        let canonical = serde_json::to_vec(&self.jwk).unwrap_or_default();
        BASE64.encode(sha256(&canonical))
    }

    /// The key authorization for a challenge token
    pub fn key_authorization(&self, token: &str) -> String {
        format!("{token}.{}", self.thumbprint())
    }

    /// Export the key, including its private parameters, as a JSON Web Key
    pub(crate) fn to_private_jwk(&self) -> Result<PrivateJwk> {
        let jwk = match &self.jwk {
            Jwk::Rsa { e, n } => {
                let rsa = self.key.rsa()?;
                PrivateJwk {
                    kty: "RSA".into(),
                    n: Some(n.clone()),
                    e: Some(e.clone()),
                    d: Some(encode(rsa.d())),
                    p: rsa.p().map(encode),
                    q: rsa.q().map(encode),
                    dp: rsa.dmp1().map(encode),
                    dq: rsa.dmq1().map(encode),
                    qi: rsa.iqmp().map(encode),
                    ..Default::default()
                }
            }
            Jwk::Ec { crv, x, y } => {
                let ec = self.key.ec_key()?;
                let size = ec.group().degree().div_ceil(8) as i32;
                PrivateJwk {
                    kty: "EC".into(),
                    crv: Some(crv.name().into()),
                    x: Some(x.clone()),
                    y: Some(y.clone()),
                    d: Some(BASE64.encode(ec.private_key().to_vec_padded(size)?)),
                    ..Default::default()
                }
            }
        };
        Ok(jwk)
    }

    /// Import a key from a JSON Web Key holding its private parameters.
    ///
    /// RSA keys may omit all of the CRT parameters (`p`, `q`, `dp`, `dq`, `qi`), the key is then
    /// used from `n`, `e` and `d` alone.
    pub(crate) fn from_private_jwk(jwk: &PrivateJwk) -> Result<Self> {
        let key = match jwk.kty.as_str() {
            "RSA" => PKey::from_rsa(rsa_from_jwk(jwk)?)?,
            "EC" => {
                let curve = jwk
                    .crv
                    .as_deref()
                    .and_then(Curve::from_name)
                    .ok_or(Error::InvalidAccountKey("unsupported elliptic curve"))?;
                let group = EcGroup::from_curve_name(curve.nid())?;
                let public = EcKey::from_public_key_affine_coordinates(
                    &group,
                    &*(decode(&jwk.x, "x")?),
                    &*(decode(&jwk.y, "y")?),
                )
                .map_err(|_| Error::InvalidAccountKey("public point is not on the curve"))?;
                let ec = EcKey::from_private_components(
                    &group,
                    &*(decode(&jwk.d, "d")?),
                    public.public_key(),
                )
                .map_err(|_| Error::InvalidAccountKey("d"))?;
                ec.check_key()
                    .map_err(|_| Error::InvalidAccountKey("inconsistent ec key"))?;
                PKey::from_ec_key(ec)?
            }
            _ => return Err(Error::InvalidAccountKey("unsupported key type")),
        };

        Self::from_pkey(key)
    }
}

fn rsa_from_jwk(jwk: &PrivateJwk) -> Result<Rsa<Private>> {
    let n = decode(&jwk.n, "n")?;
    let e = decode(&jwk.e, "e")?;
    let d = decode(&jwk.d, "d")?;

    let crt = [&jwk.p, &jwk.q, &jwk.dp, &jwk.dq, &jwk.qi];
    if crt.iter().all(|param| param.is_none()) {
        return RsaPrivateKeyBuilder::new(n, e, d)
            .map(RsaPrivateKeyBuilder::build)
            .map_err(|_| Error::InvalidAccountKey("inconsistent rsa key"));
    }

    let rsa = Rsa::from_private_components(
        n,
        e,
        d,
        decode(&jwk.p, "p")?,
        decode(&jwk.q, "q")?,
        decode(&jwk.dp, "dp")?,
        decode(&jwk.dq, "dq")?,
        decode(&jwk.qi, "qi")?,
    )
    .map_err(|_| Error::InvalidAccountKey("inconsistent rsa key"))?;

    match rsa.check_key() {
        Ok(true) => Ok(rsa),
        _ => Err(Error::InvalidAccountKey("inconsistent rsa key")),
    }
}

impl Debug for AccountKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Never print the private parameters
        f.debug_struct("AccountKey")
            .field("algorithm", &self.algorithm)
            .field("thumbprint", &self.thumbprint())
            .finish()
    }
}

fn encode(n: &BigNumRef) -> String {
    BASE64.encode(n.to_vec())
}

fn decode(value: &Option<String>, name: &'static str) -> Result<BigNum> {
    let value = value.as_deref().ok_or(Error::InvalidAccountKey(name))?;
    let bytes = BASE64
        .decode(value)
        .map_err(|_| Error::InvalidAccountKey(name))?;
    BigNum::from_slice(&bytes).map_err(|_| Error::InvalidAccountKey(name))
}
