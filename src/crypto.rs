//! Entry encryption shared by every device of a user.
//!
//! All keys derive from the user secret with HMAC-SHA256 under a fixed
//! label, so any device holding the secret can decrypt what the others
//! upload while the relay only ever sees the derived user id.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::Context as _;
use hmac::{Hmac, Mac};
use histsync_common::sync::EncryptedHistoryEntry;
use sha2::Sha256;

use crate::history::HistoryEntry;

type HmacSha256 = Hmac<Sha256>;

/// Size of the GCM nonce in bytes.
const NONCE_SIZE: usize = 12;

fn derive(secret: &str, label: &str) -> anyhow::Result<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid user secret: {e}"))?;
    mac.update(label.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn cipher_for(secret: &str) -> anyhow::Result<Aes256Gcm> {
    let key = derive(secret, "encryption_key")?;
    Aes256Gcm::new_from_slice(&key).map_err(|e| anyhow::anyhow!("invalid encryption key: {e}"))
}

/// The identifier the relay knows this user by.
///
/// # Errors
///
/// Returns an error if the secret cannot key the MAC.
pub fn user_id(secret: &str) -> anyhow::Result<String> {
    derive(secret, "user_id").map(hex::encode)
}

/// Seal `entry` under the user secret.
///
/// The returned entry's `device_id` is empty; the submitting device sets it.
///
/// # Errors
///
/// Returns an error if the entry cannot be serialized or sealed.
pub fn encrypt_entry(secret: &str, entry: &HistoryEntry) -> anyhow::Result<EncryptedHistoryEntry> {
    let plaintext = serde_json::to_vec(entry).context("serialize history entry")?;
    let cipher = cipher_for(secret)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_ref())
        .map_err(|_| anyhow::anyhow!("failed to encrypt history entry"))?;
    Ok(EncryptedHistoryEntry {
        encrypted_data: hex::encode(ciphertext),
        nonce: hex::encode(nonce),
        device_id: String::new(),
        user_id: user_id(secret)?,
        date: entry.end_time,
        encrypted_id: uuid::Uuid::new_v4().to_string(),
        read_count: 0,
    })
}

/// Open an entry sealed by [`encrypt_entry`] on any device sharing `secret`.
///
/// # Errors
///
/// Returns an error for malformed hex, a wrong-sized nonce, a failed
/// authentication check (wrong secret or tampering), or an undecodable
/// plaintext.
pub fn decrypt_entry(secret: &str, entry: &EncryptedHistoryEntry) -> anyhow::Result<HistoryEntry> {
    let nonce = hex::decode(&entry.nonce).context("decode nonce")?;
    if nonce.len() != NONCE_SIZE {
        anyhow::bail!(
            "nonce must be {NONCE_SIZE} bytes, got {} (entry {})",
            nonce.len(),
            entry.encrypted_id
        );
    }
    let ciphertext = hex::decode(&entry.encrypted_data).context("decode ciphertext")?;
    let plaintext = cipher_for(secret)?
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
        .map_err(|_| {
            anyhow::anyhow!(
                "failed to decrypt history entry {} (wrong secret or corrupted data)",
                entry.encrypted_id
            )
        })?;
    serde_json::from_slice(&plaintext).context("decode decrypted history entry")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::DateTime;

    use super::*;

    fn sample() -> HistoryEntry {
        HistoryEntry {
            local_username: "alice".to_owned(),
            hostname: "laptop".to_owned(),
            command: "ls -la".to_owned(),
            current_working_directory: "/tmp".to_owned(),
            home_directory: "/home/alice".to_owned(),
            exit_code: 0,
            start_time: DateTime::from_timestamp(1_700_000_000, 5).unwrap(),
            end_time: DateTime::from_timestamp(1_700_000_001, 0).unwrap(),
            device_id: "device-a".to_owned(),
            custom_columns: Vec::new(),
        }
    }

    #[test]
    fn decrypt_recovers_the_entry() {
        let enc = encrypt_entry("secret", &sample()).unwrap();
        assert_eq!(decrypt_entry("secret", &enc).unwrap(), sample());
    }

    #[test]
    fn encryption_is_nondeterministic() {
        let a = encrypt_entry("secret", &sample()).unwrap();
        let b = encrypt_entry("secret", &sample()).unwrap();
        assert_ne!(a.encrypted_data, b.encrypted_data);
        assert_ne!(a.encrypted_id, b.encrypted_id);
    }

    #[test]
    fn encrypted_entry_carries_routing_metadata() {
        let enc = encrypt_entry("secret", &sample()).unwrap();
        assert!(enc.device_id.is_empty());
        assert_eq!(enc.user_id, user_id("secret").unwrap());
        assert_eq!(enc.date, sample().end_time);
        assert!(!enc.encrypted_data.contains("ls -la"));
    }

    #[test]
    fn wrong_secret_fails() {
        let enc = encrypt_entry("secret", &sample()).unwrap();
        let err = decrypt_entry("other", &enc).unwrap_err();
        assert!(err.to_string().contains("wrong secret"), "{err}");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut enc = encrypt_entry("secret", &sample()).unwrap();
        let mut bytes = hex::decode(&enc.encrypted_data).unwrap();
        bytes[0] ^= 0xff;
        enc.encrypted_data = hex::encode(bytes);
        assert!(decrypt_entry("secret", &enc).is_err());
    }

    #[test]
    fn short_nonce_is_rejected() {
        let mut enc = encrypt_entry("secret", &sample()).unwrap();
        enc.nonce = "00".to_owned();
        assert!(decrypt_entry("secret", &enc).is_err());
    }

    #[test]
    fn user_id_is_stable_per_secret() {
        assert_eq!(user_id("a").unwrap(), user_id("a").unwrap());
        assert_ne!(user_id("a").unwrap(), user_id("b").unwrap());
        assert_eq!(user_id("a").unwrap().len(), 64);
    }
}
