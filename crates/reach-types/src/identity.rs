//! Identity and key management.
//!
//! An agent runs under exactly one secp256k1 identity for the lifetime of the
//! process. Secret keys are accepted as 64 hex characters or as `nsec1...`;
//! peer identifiers as 64 hex characters or `npub1...` (optionally with a
//! `nostr:` prefix). Internally every public key is compared in its
//! canonical lowercase hex form.

use crate::error::{ReachError, ReachResult};
use nostr::nips::nip19::{FromBech32, ToBech32};
use nostr::{Keys, PublicKey, SecretKey};
use zeroize::Zeroizing;

/// Suffix appended to the truncated public key to form the own card id.
const CARD_ID_VERSION: &str = "v1";

/// Number of public key hex characters used in the card id.
const CARD_ID_PREFIX_LEN: usize = 8;

/// The loaded signing identity. Immutable once constructed.
#[derive(Clone)]
pub struct Identity {
    keys: Keys,
    public_key_hex: String,
    npub: String,
}

impl Identity {
    /// Parse a secret key and derive the full identity from it.
    pub fn from_secret(input: &str) -> ReachResult<Self> {
        let secret = parse_secret_key(input)?;
        Ok(Self::from_secret_key(secret))
    }

    /// Build an identity from an already parsed secret key.
    pub fn from_secret_key(secret: SecretKey) -> Self {
        let keys = Keys::new(secret);
        let public_key = keys.public_key();
        let public_key_hex = public_key.to_hex();
        let npub = encode_npub(&public_key).unwrap_or_else(|| public_key_hex.clone());
        Self {
            keys,
            public_key_hex,
            npub,
        }
    }

    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let keys = Keys::generate();
        Self::from_secret_key(keys.secret_key().clone())
    }

    /// The signing keys.
    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// The public key.
    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    /// Canonical lowercase hex public key.
    pub fn public_key_hex(&self) -> &str {
        &self.public_key_hex
    }

    /// Human-shareable `npub1...` form.
    pub fn npub(&self) -> &str {
        &self.npub
    }

    /// Stable identifier of this agent's service card (`<8 hex>-v1`).
    pub fn card_id(&self) -> String {
        format!(
            "{}-{CARD_ID_VERSION}",
            &self.public_key_hex[..CARD_ID_PREFIX_LEN]
        )
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // SECURITY: never print the secret half
        f.debug_struct("Identity")
            .field("public_key", &self.public_key_hex)
            .finish_non_exhaustive()
    }
}

/// Parse a secret key from 64 hex characters or `nsec1...`.
pub fn parse_secret_key(input: &str) -> ReachResult<SecretKey> {
    let trimmed = Zeroizing::new(input.trim().to_string());
    if trimmed.is_empty() {
        return Err(ReachError::InvalidKey("empty key".to_string()));
    }

    if trimmed.starts_with("nsec1") {
        return SecretKey::from_bech32(trimmed.as_str())
            .map_err(|e| ReachError::InvalidKey(format!("invalid nsec: {e}")));
    }

    if !is_hex_64(&trimmed) {
        return Err(ReachError::InvalidKey(
            "secret key must be 64 hex characters or nsec format".to_string(),
        ));
    }
    SecretKey::from_hex(trimmed.as_str()).map_err(|e| ReachError::InvalidKey(e.to_string()))
}

/// Derive the public key belonging to a secret key.
pub fn derive_public_key(secret: &SecretKey) -> PublicKey {
    Keys::new(secret.clone()).public_key()
}

/// Canonicalize a peer identifier (hex or npub) to lowercase hex.
pub fn normalize_peer_id(input: &str) -> ReachResult<String> {
    parse_peer_id(input).map(|pk| pk.to_hex())
}

/// Parse a peer identifier (hex, `npub1...` or `nostr:npub1...`).
pub fn parse_peer_id(input: &str) -> ReachResult<PublicKey> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix("nostr:").unwrap_or(trimmed);

    if trimmed.starts_with("npub1") {
        return PublicKey::from_bech32(trimmed)
            .map_err(|e| ReachError::InvalidPeerId(format!("{}: {e}", short(trimmed))));
    }

    if !is_hex_64(trimmed) {
        return Err(ReachError::InvalidPeerId(format!(
            "{}: expected 64 hex characters or npub",
            short(trimmed)
        )));
    }
    PublicKey::from_hex(trimmed)
        .map_err(|e| ReachError::InvalidPeerId(format!("{}: {e}", short(trimmed))))
}

/// Encode a public key as `npub1...`, if possible.
pub fn encode_npub(public_key: &PublicKey) -> Option<String> {
    public_key.to_bech32().ok()
}

/// Encode a hex public key as `npub1...`, falling back to the hex input.
pub fn npub_from_hex(hex_key: &str) -> String {
    PublicKey::from_hex(hex_key)
        .ok()
        .and_then(|pk| encode_npub(&pk))
        .unwrap_or_else(|| hex_key.to_string())
}

/// Display form of an npub: first 12 and last 8 characters.
pub fn truncate_npub(npub: &str) -> String {
    if npub.len() <= 24 {
        return npub.to_string();
    }
    format!("{}...{}", &npub[..12], &npub[npub.len() - 8..])
}

/// Short prefix of a hex key for log lines.
pub fn short_hex(hex_key: &str) -> &str {
    &hex_key[..hex_key.len().min(8)]
}

fn short(s: &str) -> String {
    s.chars().take(12).collect()
}

fn is_hex_64(s: &str) -> bool {
    s.len() == 64 && hex::decode(s).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET_HEX: &str = "6b911fd37cdf5c81d4c0adb1ab7fa822ed253ab0ad9aa18d77257c88b29b718e";

    #[test]
    fn test_parse_secret_hex_and_nsec_agree() {
        let from_hex = Identity::from_secret(SECRET_HEX).unwrap();
        let nsec = from_hex.keys().secret_key().to_bech32().unwrap();
        let from_nsec = Identity::from_secret(&nsec).unwrap();
        assert_eq!(from_hex.public_key_hex(), from_nsec.public_key_hex());
    }

    #[test]
    fn test_parse_secret_trims_whitespace() {
        let id = Identity::from_secret(&format!("  {SECRET_HEX}\n")).unwrap();
        assert_eq!(id.public_key_hex().len(), 64);
    }

    #[test]
    fn test_parse_secret_rejects_garbage() {
        assert!(matches!(
            parse_secret_key("not-a-key"),
            Err(ReachError::InvalidKey(_))
        ));
        assert!(matches!(parse_secret_key(""), Err(ReachError::InvalidKey(_))));
        assert!(matches!(
            parse_secret_key(&"ab".repeat(31)),
            Err(ReachError::InvalidKey(_))
        ));
        assert!(parse_secret_key("nsec1qqqq").is_err());
    }

    #[test]
    fn test_derive_public_key_matches_identity() {
        let secret = parse_secret_key(SECRET_HEX).unwrap();
        let id = Identity::from_secret(SECRET_HEX).unwrap();
        assert_eq!(derive_public_key(&secret), id.public_key());
    }

    #[test]
    fn test_card_id_format() {
        let id = Identity::from_secret(SECRET_HEX).unwrap();
        let card_id = id.card_id();
        assert!(card_id.ends_with("-v1"));
        assert_eq!(&card_id[..8], &id.public_key_hex()[..8]);
    }

    #[test]
    fn test_normalize_peer_id_hex_and_npub() {
        let id = Identity::generate();
        let hex_key = id.public_key_hex().to_string();

        assert_eq!(normalize_peer_id(&hex_key).unwrap(), hex_key);
        assert_eq!(normalize_peer_id(&hex_key.to_uppercase()).unwrap(), hex_key);
        assert_eq!(normalize_peer_id(id.npub()).unwrap(), hex_key);
        assert_eq!(
            normalize_peer_id(&format!("nostr:{}", id.npub())).unwrap(),
            hex_key
        );
    }

    #[test]
    fn test_normalize_peer_id_rejects_invalid() {
        assert!(matches!(
            normalize_peer_id("npub1invalid"),
            Err(ReachError::InvalidPeerId(_))
        ));
        assert!(matches!(
            normalize_peer_id("abcd"),
            Err(ReachError::InvalidPeerId(_))
        ));
        assert!(normalize_peer_id(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_truncate_npub() {
        let id = Identity::generate();
        let short = truncate_npub(id.npub());
        assert!(short.starts_with("npub1"));
        assert!(short.contains("..."));
        assert_eq!(short.len(), 12 + 3 + 8);
        assert_eq!(truncate_npub("npub1short"), "npub1short");
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let id = Identity::from_secret(SECRET_HEX).unwrap();
        let dbg = format!("{id:?}");
        assert!(!dbg.contains(SECRET_HEX));
        assert!(dbg.contains(id.public_key_hex()));
    }
}
