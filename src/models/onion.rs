//! v3 onion addresses
//!
//! A v3 address is `base32(pubkey || checksum || version)` where the checksum
//! is the first two bytes of `SHA3-256(".onion checksum" || pubkey || 0x03)`.

use super::ModelError;
use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;
use std::str::FromStr;

const ONION_SUFFIX: &str = ".onion";
const ENCODED_LEN: usize = 56;
const VERSION: u8 = 0x03;

/// A checksum-validated v3 onion address, always lowercase with `.onion`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OnionAddress(String);

impl OnionAddress {
    /// Parse an address, a `host:port`, or a full URL pointing at an onion service
    pub fn parse(input: &str) -> Result<Self, ModelError> {
        let invalid = |reason: &str| ModelError::InvalidOnionAddress {
            address: input.to_string(),
            reason: reason.to_string(),
        };

        let host = host_part(input);
        let Some(label) = host.strip_suffix(ONION_SUFFIX) else {
            return Err(invalid("must end with .onion"));
        };
        // Subdomains (www.<addr>.onion) resolve to the same service
        let label = label.rsplit('.').next().unwrap_or(label);

        if label.len() != ENCODED_LEN {
            return Err(invalid("v3 addresses are 56 base32 characters"));
        }

        let decoded = BASE32_NOPAD
            .decode(label.to_ascii_uppercase().as_bytes())
            .map_err(|_| invalid("not base32"))?;
        if decoded.len() != 35 {
            return Err(invalid("decoded length is not 35 bytes"));
        }
        if decoded[34] != VERSION {
            return Err(invalid("version byte is not 3"));
        }

        let mut pubkey = [0u8; 32];
        pubkey.copy_from_slice(&decoded[..32]);
        if checksum(&pubkey) != decoded[32..34] {
            return Err(invalid("checksum mismatch"));
        }

        Ok(Self(format!("{}{}", label, ONION_SUFFIX)))
    }

    /// Derive the address of an Ed25519 public key
    pub fn from_public_key(pubkey: &[u8; 32]) -> Self {
        let mut bytes = [0u8; 35];
        bytes[..32].copy_from_slice(pubkey);
        bytes[32..34].copy_from_slice(&checksum(pubkey));
        bytes[34] = VERSION;
        let encoded = BASE32_NOPAD.encode(&bytes).to_ascii_lowercase();
        Self(format!("{}{}", encoded, ONION_SUFFIX))
    }

    /// Full address including `.onion`
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 56-character service id
    pub fn service_id(&self) -> &str {
        self.0.trim_end_matches(ONION_SUFFIX)
    }

    /// Root URL of the service
    pub fn root_url(&self) -> String {
        format!("http://{}/", self.0)
    }
}

fn checksum(pubkey: &[u8; 32]) -> [u8; 2] {
    let mut hasher = Sha3_256::new();
    hasher.update(b".onion checksum");
    hasher.update(pubkey);
    hasher.update([VERSION]);
    let digest = hasher.finalize();
    [digest[0], digest[1]]
}

/// Reduce a URL or `host:port` to its lowercase host
fn host_part(input: &str) -> String {
    let s = input.trim();
    let s = s.split_once("://").map_or(s, |(_, rest)| rest);
    let s = s.split(['/', '?', '#']).next().unwrap_or(s);
    let s = s.rsplit_once('@').map_or(s, |(_, host)| host);
    let s = s.split(':').next().unwrap_or(s);
    s.trim_end_matches('.').to_ascii_lowercase()
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OnionAddress {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OnionAddress {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OnionAddress> for String {
    fn from(addr: OnionAddress) -> Self {
        addr.0
    }
}

impl AsRef<str> for OnionAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DREAD: &str = "dreadytofatroptsdj6io7l3xptbet6onoyno2yv7jicoxknyazubrad.onion";

    #[test]
    fn test_real_onion_address() {
        let addr = OnionAddress::parse(DREAD).unwrap();
        assert_eq!(addr.as_str(), DREAD);
        assert_eq!(addr.service_id().len(), 56);
    }

    #[test]
    fn test_derived_address_parses() {
        let addr = OnionAddress::from_public_key(&[42u8; 32]);
        assert!(addr.as_str().ends_with(".onion"));
        assert_eq!(addr.as_str().len(), 56 + 6);
        assert_eq!(OnionAddress::parse(addr.as_str()).unwrap(), addr);
    }

    #[test]
    fn test_accepts_urls_and_case() {
        let url = format!("HTTP://{}:8080/forum/index.php?x=1#top", DREAD.to_uppercase());
        assert_eq!(OnionAddress::parse(&url).unwrap().as_str(), DREAD);

        let sub = format!("www.{}", DREAD);
        assert_eq!(OnionAddress::parse(&sub).unwrap().as_str(), DREAD);
    }

    #[test]
    fn test_rejects_bad_checksum() {
        // flip one character in the checksum region
        let mut chars: Vec<char> = DREAD.chars().collect();
        chars[52] = if chars[52] == 'a' { 'b' } else { 'a' };
        let tampered: String = chars.into_iter().collect();
        assert!(OnionAddress::parse(&tampered).is_err());
    }

    #[test]
    fn test_rejects_wrong_shape() {
        assert!(OnionAddress::parse("example.com").is_err());
        assert!(OnionAddress::parse("abcdefghijklmnop.onion").is_err());
        assert!(OnionAddress::parse("").is_err());
    }

    #[test]
    fn test_serde_validates() {
        let json = format!("\"{}\"", DREAD);
        let addr: OnionAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&addr).unwrap(), json);
        assert!(serde_json::from_str::<OnionAddress>("\"nope.onion\"").is_err());
    }
}
