//! Read-only decryption of an encrypted secret store with a layered
//! fallback chain (§4.15).
//!
//! Resolution order for `get_secret`:
//! 1. Encrypted vault file (PBKDF2-HMAC-SHA256, 600k iterations; decrypted
//!    once per process and cached).
//! 2. Environment variable.
//! 3. A caller-supplied `.env` file, parsed as `KEY=VALUE` lines.
//! 4. Auto-discovered `.env` in the caller's directory, then one level up.
//! 5. Caller-supplied default.
//!
//! Decrypt failures are non-fatal: they collapse to an empty cache and
//! resolution falls through to later tiers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

const PBKDF2_ITERATIONS: u32 = 600_000;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub vault_path: PathBuf,
    pub salt_path: PathBuf,
}

pub struct VaultClient {
    config: VaultConfig,
    cache: OnceLock<HashMap<String, String>>,
}

impl VaultClient {
    pub fn new(config: VaultConfig) -> Self {
        Self {
            config,
            cache: OnceLock::new(),
        }
    }

    /// Resolve a secret through the full fallback chain.
    pub fn get_secret(&self, key: &str, default: Option<&str>) -> Option<String> {
        if let Some(v) = self.from_vault(key) {
            return Some(v);
        }
        if let Ok(v) = std::env::var(key) {
            if !v.is_empty() {
                return Some(v);
            }
        }
        default.map(|s| s.to_string())
    }

    /// Resolve a secret, additionally consulting an explicit `.env` path and
    /// then auto-discovered `.env` files near `caller_dir`.
    pub fn get_secret_with_env_discovery(
        &self,
        key: &str,
        explicit_env_path: Option<&Path>,
        caller_dir: Option<&Path>,
        default: Option<&str>,
    ) -> Option<String> {
        if let Some(v) = self.from_vault(key) {
            return Some(v);
        }
        if let Ok(v) = std::env::var(key) {
            if !v.is_empty() {
                return Some(v);
            }
        }
        if let Some(path) = explicit_env_path {
            if let Some(v) = read_dotenv_value(path, key) {
                return Some(v);
            }
        }
        if let Some(dir) = caller_dir {
            if let Some(v) = read_dotenv_value(&dir.join(".env"), key) {
                return Some(v);
            }
            if let Some(parent) = dir.parent() {
                if let Some(v) = read_dotenv_value(&parent.join(".env"), key) {
                    return Some(v);
                }
            }
        }
        default.map(|s| s.to_string())
    }

    fn from_vault(&self, key: &str) -> Option<String> {
        let cache = self.cache.get_or_init(|| self.load_and_decrypt().unwrap_or_default());
        cache.get(key).cloned()
    }

    fn master_password(&self) -> Option<String> {
        if let Ok(p) = std::env::var("VAULT_PASSWORD") {
            if !p.is_empty() {
                return Some(p);
            }
        }
        let pw_file = self
            .config
            .vault_path
            .parent()
            .map(|d| d.join(".vault_pw"))?;
        std::fs::read_to_string(pw_file).ok().map(|s| s.trim().to_string())
    }

    fn load_and_decrypt(&self) -> Option<HashMap<String, String>> {
        let password = self.master_password()?;
        let salt = std::fs::read(&self.config.salt_path).ok()?;
        let ciphertext = std::fs::read(&self.config.vault_path).ok()?;
        if ciphertext.len() < NONCE_LEN {
            return None;
        }

        let mut key_bytes = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut key_bytes);

        let cipher = Aes256Gcm::new_from_slice(&key_bytes).ok()?;
        let (nonce_bytes, body) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = cipher.decrypt(nonce, body).ok()?;

        serde_json::from_slice::<HashMap<String, String>>(&plaintext).ok()
    }
}

/// Encrypt a secret map for tests / vault-provisioning tooling. Not used by
/// the read-only resolution path but shares its key-derivation parameters so
/// round-trip tests can exercise the real decrypt path.
pub fn encrypt_vault(
    secrets: &HashMap<String, String>,
    password: &str,
    salt: &[u8],
) -> anyhow::Result<Vec<u8>> {
    use rand::RngCore;

    let mut key_bytes = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key_bytes);
    let cipher = Aes256Gcm::new_from_slice(&key_bytes)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let plaintext = serde_json::to_vec(secrets)?;
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_ref())
        .map_err(|e| anyhow::anyhow!("encryption failed: {}", e))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn read_dotenv_value(path: &Path, key: &str) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            if k.trim() == key {
                let v = v.trim().trim_matches('"').trim_matches('\'');
                return Some(v.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn make_config(dir: &Path) -> VaultConfig {
        VaultConfig {
            vault_path: dir.join("vault.enc"),
            salt_path: dir.join("vault.salt"),
        }
    }

    #[test]
    #[serial]
    fn decrypts_vault_file_with_password_env_var() {
        let dir = tempfile::tempdir().unwrap();
        let salt = b"0123456789abcdef";
        std::fs::write(dir.path().join("vault.salt"), salt).unwrap();

        let mut secrets = HashMap::new();
        secrets.insert("GEMINI_API_KEY".to_string(), "super-secret".to_string());
        let blob = encrypt_vault(&secrets, "correct horse", salt).unwrap();
        std::fs::write(dir.path().join("vault.enc"), blob).unwrap();

        std::env::set_var("VAULT_PASSWORD", "correct horse");
        let client = VaultClient::new(make_config(dir.path()));
        let value = client.get_secret("GEMINI_API_KEY", None);
        std::env::remove_var("VAULT_PASSWORD");

        assert_eq!(value, Some("super-secret".to_string()));
    }

    #[test]
    #[serial]
    fn wrong_password_falls_through_to_env_var() {
        let dir = tempfile::tempdir().unwrap();
        let salt = b"0123456789abcdef";
        std::fs::write(dir.path().join("vault.salt"), salt).unwrap();

        let mut secrets = HashMap::new();
        secrets.insert("GOOGLE_API_KEY".to_string(), "vault-value".to_string());
        let blob = encrypt_vault(&secrets, "right password", salt).unwrap();
        std::fs::write(dir.path().join("vault.enc"), blob).unwrap();

        std::env::set_var("VAULT_PASSWORD", "wrong password");
        std::env::set_var("GOOGLE_API_KEY", "env-value");
        let client = VaultClient::new(make_config(dir.path()));
        let value = client.get_secret("GOOGLE_API_KEY", None);
        std::env::remove_var("VAULT_PASSWORD");
        std::env::remove_var("GOOGLE_API_KEY");

        assert_eq!(value, Some("env-value".to_string()));
    }

    #[test]
    #[serial]
    fn missing_vault_falls_through_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let client = VaultClient::new(make_config(dir.path()));
        std::env::remove_var("VAULT_PASSWORD");
        std::env::remove_var("SOME_MISSING_KEY");
        let value = client.get_secret("SOME_MISSING_KEY", Some("fallback"));
        assert_eq!(value, Some("fallback".to_string()));
    }

    #[test]
    #[serial]
    fn explicit_env_path_is_consulted() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("custom.env");
        std::fs::write(&env_path, "NGROK_AUTH_TOKEN=abc123\n").unwrap();

        std::env::remove_var("VAULT_PASSWORD");
        std::env::remove_var("NGROK_AUTH_TOKEN");
        let client = VaultClient::new(make_config(dir.path()));
        let value = client.get_secret_with_env_discovery(
            "NGROK_AUTH_TOKEN",
            Some(&env_path),
            None,
            None,
        );
        assert_eq!(value, Some("abc123".to_string()));
    }

    #[test]
    #[serial]
    fn auto_discovers_env_one_level_up() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("app");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(dir.path().join(".env"), "SUPABASE_URL=https://example.test\n").unwrap();

        std::env::remove_var("VAULT_PASSWORD");
        std::env::remove_var("SUPABASE_URL");
        let client = VaultClient::new(make_config(&sub));
        let value = client.get_secret_with_env_discovery("SUPABASE_URL", None, Some(&sub), None);
        assert_eq!(value, Some("https://example.test".to_string()));
    }
}
