//! サイト認証情報の暗号化・復号化
//! AES-GCM-256 と PBKDF2 によるキー導出

#![allow(deprecated)] // generic-array v1.x移行中の一時的対応

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const FORMAT_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// 暗号化エラー
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),
    /// Wrong master key or tampered ciphertext
    #[error("Decryption failed: wrong master key or corrupted data")]
    Decryption,
    #[error("Malformed encrypted secret: {0}")]
    Malformed(String),
    #[error("Master key is empty")]
    EmptyKey,
}

/// Master key used to derive per-secret encryption keys
#[derive(Clone)]
pub struct MasterKey(SecretString);

impl MasterKey {
    pub fn new(key: SecretString) -> Result<Self, CryptoError> {
        if key.expose_secret().is_empty() {
            return Err(CryptoError::EmptyKey);
        }
        Ok(Self(key))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// 暗号化された秘密情報
///
/// 文字列表現は `v1.<salt>.<nonce>.<ciphertext>`（各フィールドはBase64）。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EncryptedSecret {
    pub version: u8,
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl fmt::Display for EncryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v{}.{}.{}.{}",
            self.version,
            general_purpose::STANDARD.encode(&self.salt),
            general_purpose::STANDARD.encode(&self.nonce),
            general_purpose::STANDARD.encode(&self.ciphertext)
        )
    }
}

impl fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedSecret")
            .field("version", &self.version)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

impl FromStr for EncryptedSecret {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        let [version, salt, nonce, ciphertext] = parts.as_slice() else {
            return Err(CryptoError::Malformed(format!(
                "expected 4 segments, got {}",
                parts.len()
            )));
        };

        let version = version
            .strip_prefix('v')
            .and_then(|v| v.parse::<u8>().ok())
            .ok_or_else(|| CryptoError::Malformed(format!("bad version tag '{version}'")))?;
        if version != FORMAT_VERSION {
            return Err(CryptoError::Malformed(format!(
                "unsupported version {version}"
            )));
        }

        let decode = |field: &str, value: &str| {
            general_purpose::STANDARD
                .decode(value)
                .map_err(|e| CryptoError::Malformed(format!("{field}: {e}")))
        };
        let salt = decode("salt", salt)?;
        let nonce = decode("nonce", nonce)?;
        let ciphertext = decode("ciphertext", ciphertext)?;

        if salt.len() != SALT_LEN || nonce.len() != NONCE_LEN {
            return Err(CryptoError::Malformed(
                "invalid salt or nonce size".to_string(),
            ));
        }

        Ok(Self {
            version,
            salt,
            nonce,
            ciphertext,
        })
    }
}

impl TryFrom<String> for EncryptedSecret {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EncryptedSecret> for String {
    fn from(value: EncryptedSecret) -> Self {
        value.to_string()
    }
}

/// Encrypts and decrypts site passwords with a master key
#[derive(Debug, Clone)]
pub struct CredentialCipher {
    master_key: MasterKey,
}

impl CredentialCipher {
    pub fn new(master_key: MasterKey) -> Self {
        Self { master_key }
    }

    pub fn encrypt(&self, secret: &SecretString) -> Result<EncryptedSecret, CryptoError> {
        // ランダムソルトを生成
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let key = derive_key(&self.master_key, &salt);
        let cipher = Aes256Gcm::new(&key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, secret.expose_secret().as_bytes())
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        Ok(EncryptedSecret {
            version: FORMAT_VERSION,
            salt: salt.to_vec(),
            nonce: nonce.to_vec(),
            ciphertext,
        })
    }

    pub fn decrypt(&self, encrypted: &EncryptedSecret) -> Result<SecretString, CryptoError> {
        if encrypted.nonce.len() != NONCE_LEN {
            return Err(CryptoError::Malformed("invalid nonce size".to_string()));
        }

        let key = derive_key(&self.master_key, &encrypted.salt);
        let cipher = Aes256Gcm::new(&key);
        let nonce = Nonce::from_slice(&encrypted.nonce);

        // 認証タグ不一致 = 鍵違いまたは改ざん
        let plaintext = cipher
            .decrypt(nonce, encrypted.ciphertext.as_ref())
            .map_err(|_| CryptoError::Decryption)?;

        let text = String::from_utf8(plaintext).map_err(|_| CryptoError::Decryption)?;
        Ok(SecretString::from(text))
    }
}

/// PBKDF2-HMAC-SHA256 でマスターキーからキーを派生
fn derive_key(master_key: &MasterKey, salt: &[u8]) -> Key<Aes256Gcm> {
    use pbkdf2::pbkdf2_hmac_array;
    use sha2::Sha256;

    // テスト環境では反復回数を減らして高速化
    #[cfg(test)]
    const ITERATIONS: u32 = 1_000;
    #[cfg(not(test))]
    const ITERATIONS: u32 = 100_000;

    let key_bytes: [u8; 32] = pbkdf2_hmac_array::<Sha256, 32>(
        master_key.0.expose_secret().as_bytes(),
        salt,
        ITERATIONS,
    );

    *Key::<Aes256Gcm>::from_slice(&key_bytes)
}
