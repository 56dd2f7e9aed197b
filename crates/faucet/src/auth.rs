//! Request signatures
//!
//! Every state-changing API call is signed by the account it acts for. The
//! signature is an Ethereum `personal_sign` signature (`r || s || v`, hex)
//! over a short message naming the call, its arguments and when it was
//! issued. A signed message is accepted once, and only within
//! `max_age` seconds of the server clock.

use crate::error::{FaucetError, FaucetResult};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use moka::sync::Cache;
use spigot_common::{Address, ADDRESS_LENGTH};
use std::time::Duration;

/// `r || s || v`
pub const SIGNATURE_LENGTH: usize = 65;

const MAX_REMEMBERED_CALLS: u64 = 100_000;

/// Message signed for one call
pub fn call_message(action: &str, args: &[String], issued_at: u64) -> String {
    format!("spigot:{}:{}:{}", action, args.join(","), issued_at)
}

/// EIP-191 digest of `message`
pub fn message_digest(message: &str) -> [u8; 32] {
    let mut data = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    data.extend_from_slice(message.as_bytes());
    keccak_hash::keccak(&data).0
}

/// Address controlled by `key`
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak_hash::keccak(&point.as_bytes()[1..]); // Skip the 0x04 tag
    let mut bytes = [0u8; ADDRESS_LENGTH];
    bytes.copy_from_slice(&hash.0[12..]);
    Address::from(bytes)
}

/// Sign `message` as a wallet would for `personal_sign`
pub fn sign_message(key: &SigningKey, message: &str) -> FaucetResult<String> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(&message_digest(message))
        .map_err(|e| FaucetError::Internal(format!("signing failed: {}", e)))?;

    let mut bytes = signature.to_bytes().to_vec();
    bytes.push(27 + recovery_id.to_byte());
    Ok(format!("0x{}", hex::encode(bytes)))
}

/// Address that produced `signature` over `message`
pub fn recover_signer(message: &str, signature: &str) -> FaucetResult<Address> {
    let hex_digits = signature.strip_prefix("0x").unwrap_or(signature);
    let bytes = hex::decode(hex_digits)
        .map_err(|e| FaucetError::Unauthorized(format!("malformed signature: {}", e)))?;
    if bytes.len() != SIGNATURE_LENGTH {
        return Err(FaucetError::Unauthorized(format!(
            "signature must be {} bytes, got {}",
            SIGNATURE_LENGTH,
            bytes.len()
        )));
    }

    let mut signature = Signature::from_slice(&bytes[..64])
        .map_err(|e| FaucetError::Unauthorized(format!("malformed signature: {}", e)))?;
    let v = bytes[64];
    let mut recovery_id = RecoveryId::from_byte(if v >= 27 { v - 27 } else { v })
        .ok_or_else(|| FaucetError::Unauthorized(format!("invalid recovery id: {}", v)))?;

    // k256 only verifies low-s signatures
    if let Some(normalized) = signature.normalize_s() {
        signature = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    let key = VerifyingKey::recover_from_prehash(&message_digest(message), &signature, recovery_id)
        .map_err(|_| FaucetError::Unauthorized("signature does not match the request".to_string()))?;
    Ok(address_of(&key))
}

/// Checks signed calls and remembers the ones already executed
pub struct Authenticator {
    max_age: u64,
    seen: Cache<String, ()>,
}

impl Authenticator {
    pub fn new(max_age_secs: u64) -> Self {
        // a message stays acceptable from max_age before issue to max_age after
        let ttl = Duration::from_secs(max_age_secs.saturating_mul(2).saturating_add(1));
        Self {
            max_age: max_age_secs,
            seen: Cache::builder()
                .max_capacity(MAX_REMEMBERED_CALLS)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Accepts `signature` if `claimed` signed `message` (issued at
    /// `issued_at`) recently and the message has not been used before.
    pub fn verify(
        &self,
        claimed: &Address,
        message: &str,
        issued_at: u64,
        signature: &str,
        now: u64,
    ) -> FaucetResult<()> {
        if now.abs_diff(issued_at) > self.max_age {
            return Err(FaucetError::Unauthorized(format!(
                "request issued at {} is outside the {}s validity window",
                issued_at, self.max_age
            )));
        }

        let signer = recover_signer(message, signature)?;
        if signer != *claimed {
            return Err(FaucetError::Unauthorized(format!(
                "request for {} was signed by {}",
                claimed, signer
            )));
        }

        let entry = self.seen.entry(message.to_string()).or_insert(());
        if !entry.is_fresh() {
            return Err(FaucetError::Unauthorized("request was already submitted".to_string()));
        }

        Ok(())
    }
}
