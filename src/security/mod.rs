//! Credential encryption at rest

mod cipher;

pub use cipher::{CredentialCipher, CryptoError, EncryptedSecret, MasterKey};
