//! Key Material Generator
//!
//! Produces the asymmetric key pairs used at every level of the hierarchy. Key lengths are
//! checked against a [`KeyPolicy`] floor before anything is generated.
//!
//! # Passphrase protection
//! When a passphrase is supplied the private component is only ever held as an encrypted
//! PKCS#8 PEM (AES-256-CBC, PBES2). Retrieving it again requires the same passphrase; a wrong or
//! missing passphrase is [`PkiError::Decryption`].
//!
//! # Example
//! ```rust,no_run
//! use pki_testbed::key_material::{KeyAlgorithm, KeyGenerator, KeyPolicy};
//! use pki_testbed::provider::OpensslProvider;
//! use secrecy::SecretString;
//!
//! # fn example() -> pki_testbed::error::Result<()> {
//! let provider = OpensslProvider::new();
//! let generator = KeyGenerator::new(&provider, KeyPolicy::default());
//! let passphrase = SecretString::from("alice".to_string());
//! let ca_key = generator.generate(KeyAlgorithm::Rsa, 4096, Some(&passphrase))?;
//! let private_key = ca_key.private_key(Some(&passphrase))?;
//! # Ok(())
//! # }
//! ```

use std::fmt;

use openssl::pkey::{PKey, PKeyRef, Private, Public};
use openssl::symm::Cipher;
use secrecy::{ExposeSecret, SecretSlice, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{PkiError, Result};
use crate::provider::CryptoProvider;

const RSA_MIN_BITS_DEFAULT: u32 = 2048;
const EC_MIN_BITS_DEFAULT: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Rsa => f.write_str("RSA"),
            KeyAlgorithm::Ec => f.write_str("EC"),
        }
    }
}

/// Minimum key strength accepted by the generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPolicy {
    pub min_rsa_bits: u32,
    pub min_ec_bits: u32,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        KeyPolicy {
            min_rsa_bits: RSA_MIN_BITS_DEFAULT,
            min_ec_bits: EC_MIN_BITS_DEFAULT,
        }
    }
}

impl KeyPolicy {
    pub fn check(&self, algorithm: KeyAlgorithm, bits: u32) -> Result<()> {
        let minimum = match algorithm {
            KeyAlgorithm::Rsa => self.min_rsa_bits,
            KeyAlgorithm::Ec => self.min_ec_bits,
        };
        if bits < minimum {
            return Err(PkiError::WeakKey {
                algorithm: algorithm.to_string(),
                bits,
                minimum,
            });
        }
        Ok(())
    }
}

enum PrivateMaterial {
    /// Unencrypted PKCS#8 DER
    Clear(SecretSlice<u8>),
    /// Encrypted PKCS#8 PEM
    Encrypted(Vec<u8>),
}

/// Asymmetric key pair with an optionally passphrase-protected private half
pub struct KeyPair {
    algorithm: KeyAlgorithm,
    bits: u32,
    public_key: PKey<Public>,
    private: PrivateMaterial,
}

impl KeyPair {
    /// Wrap an existing private key, encrypting it right away if `passphrase` is given
    pub fn from_private_key(key: PKey<Private>, passphrase: Option<&SecretString>) -> Result<Self> {
        let algorithm = algorithm_of(&key)?;
        let bits = key.bits();
        let public_key = PKey::public_key_from_der(&key.public_key_to_der()?)?;

        let private = match passphrase {
            Some(passphrase) => PrivateMaterial::Encrypted(key.private_key_to_pem_pkcs8_passphrase(
                Cipher::aes_256_cbc(),
                passphrase.expose_secret().as_bytes(),
            )?),
            None => PrivateMaterial::Clear(SecretSlice::from(key.private_key_to_pkcs8()?)),
        };

        Ok(KeyPair {
            algorithm,
            bits,
            public_key,
            private,
        })
    }

    /// Load a PKCS#8 or PKCS#1 PEM private key, encrypted or not
    pub fn from_pem(pem: &[u8], passphrase: Option<&SecretString>) -> Result<Self> {
        let key = match passphrase {
            Some(passphrase) => {
                PKey::private_key_from_pem_passphrase(pem, passphrase.expose_secret().as_bytes())
                    .map_err(|e| {
                        PkiError::Decryption(format!("Failed to decrypt private key: {}", e))
                    })?
            }
            None => {
                if is_encrypted_pem(pem) {
                    return Err(PkiError::Decryption(
                        "Private key is encrypted but no passphrase was supplied".to_string(),
                    ));
                }
                PKey::private_key_from_pem_callback(pem, |_| Ok(0))?
            }
        };
        Self::from_private_key(key, passphrase)
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn public_key(&self) -> &PKeyRef<Public> {
        &self.public_key
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.private, PrivateMaterial::Encrypted(_))
    }

    /// Recover the private key
    ///
    /// Clear keys ignore `passphrase`; encrypted keys require the passphrase they were
    /// protected with.
    pub fn private_key(&self, passphrase: Option<&SecretString>) -> Result<PKey<Private>> {
        match &self.private {
            PrivateMaterial::Clear(der) => Ok(PKey::private_key_from_pkcs8(der.expose_secret())?),
            PrivateMaterial::Encrypted(pem) => {
                let passphrase = passphrase.ok_or_else(|| {
                    PkiError::Decryption("Passphrase required for encrypted private key".to_string())
                })?;
                PKey::private_key_from_pem_passphrase(pem, passphrase.expose_secret().as_bytes())
                    .map_err(|e| {
                        PkiError::Decryption(format!("Failed to decrypt private key: {}", e))
                    })
            }
        }
    }

    /// PEM export of the private key; encrypted keys stay encrypted
    pub fn private_key_pem(&self) -> Result<Vec<u8>> {
        match &self.private {
            PrivateMaterial::Clear(der) => {
                Ok(PKey::private_key_from_pkcs8(der.expose_secret())?.private_key_to_pem_pkcs8()?)
            }
            PrivateMaterial::Encrypted(pem) => Ok(pem.clone()),
        }
    }

    pub fn public_key_pem(&self) -> Result<Vec<u8>> {
        Ok(self.public_key.public_key_to_pem()?)
    }

    /// Whether `other` is the public half of this pair
    pub fn matches<T: openssl::pkey::HasPublic>(&self, other: &PKeyRef<T>) -> bool {
        self.public_key.public_eq(other)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm)
            .field("bits", &self.bits)
            .field("encrypted", &self.is_encrypted())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Generates key pairs that satisfy a [`KeyPolicy`]
pub struct KeyGenerator<'a> {
    provider: &'a dyn CryptoProvider,
    policy: KeyPolicy,
}

impl<'a> KeyGenerator<'a> {
    pub fn new(provider: &'a dyn CryptoProvider, policy: KeyPolicy) -> Self {
        KeyGenerator { provider, policy }
    }

    pub fn policy(&self) -> &KeyPolicy {
        &self.policy
    }

    pub fn generate(
        &self,
        algorithm: KeyAlgorithm,
        bits: u32,
        passphrase: Option<&SecretString>,
    ) -> Result<KeyPair> {
        self.policy.check(algorithm, bits)?;
        let key = self.provider.generate_key_pair(algorithm, bits)?;
        tracing::debug!(%algorithm, bits, encrypted = passphrase.is_some(), "Generated key pair");
        KeyPair::from_private_key(key, passphrase)
    }
}

fn algorithm_of<T>(key: &PKeyRef<T>) -> Result<KeyAlgorithm> {
    match key.id() {
        openssl::pkey::Id::RSA => Ok(KeyAlgorithm::Rsa),
        openssl::pkey::Id::EC => Ok(KeyAlgorithm::Ec),
        other => Err(PkiError::KeyGeneration(format!(
            "Unsupported key type: {:?}",
            other
        ))),
    }
}

fn is_encrypted_pem(pem: &[u8]) -> bool {
    String::from_utf8_lossy(pem).contains("ENCRYPTED")
}
