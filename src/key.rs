// Copyright 2016 Pierre-Étienne Meunier
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Host keys: parsing the public-key blob from KEXDH_REPLY and verifying
//! the server signature over the exchange hash.

use crate::encoding::{Encoding, Reader};
use crate::Error;
use cryptovec::CryptoVec;
use std::convert::TryInto;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Name(pub &'static str);
impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        self.0
    }
}

pub const ED25519: Name = Name("ssh-ed25519");

/// A public host key.
#[derive(Debug, Clone)]
pub enum PublicKey {
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PublicKey {
    pub fn name(&self) -> &'static str {
        match self {
            PublicKey::Ed25519(_) => ED25519.0,
        }
    }

    /// Append the standard wire blob for this key.
    /// https://tools.ietf.org/html/rfc8709#section-4
    pub fn push_to(&self, buffer: &mut CryptoVec) {
        match self {
            PublicKey::Ed25519(key) => {
                buffer.extend_ssh_string(ED25519.0.as_bytes());
                buffer.extend_ssh_string(key.as_bytes());
            }
        }
    }

    /// Check a server signature blob (`string algo, string blob`) against
    /// the exchange hash.
    pub fn verify_server_auth(&self, hash: &[u8], signature_blob: &[u8]) -> bool {
        match self {
            PublicKey::Ed25519(key) => {
                let mut r = signature_blob.reader(0);
                let sig_type = match r.read_string() {
                    Ok(s) => s,
                    Err(_) => return false,
                };
                if sig_type != ED25519.0.as_bytes() {
                    return false;
                }
                let sig = match r.read_string() {
                    Ok(s) => s,
                    Err(_) => return false,
                };
                let sig = match ed25519_dalek::Signature::from_slice(sig) {
                    Ok(s) => s,
                    Err(_) => return false,
                };
                key.verify_strict(hash, &sig).is_ok()
            }
        }
    }
}

/// Parse a public key blob as sent inside KEXDH_REPLY.
pub fn parse_public_key(blob: &[u8]) -> Result<PublicKey, Error> {
    let mut r = blob.reader(0);
    let t = r.read_string()?;
    if t == ED25519.0.as_bytes() {
        let raw = r.read_string()?;
        let raw: &[u8; 32] = raw.try_into().map_err(|_| Error::CouldNotReadKey)?;
        let key =
            ed25519_dalek::VerifyingKey::from_bytes(raw).map_err(|_| Error::CouldNotReadKey)?;
        return Ok(PublicKey::Ed25519(key));
    }
    Err(Error::CouldNotReadKey)
}

/// A host key pair. The transport engine itself only verifies; the pair is
/// here for tools that have to play the server side of the exchange.
pub enum KeyPair {
    Ed25519(ed25519_dalek::SigningKey),
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            KeyPair::Ed25519(key) => write!(
                f,
                "Ed25519 {{ public: {:?}, secret: (hidden) }}",
                key.verifying_key().as_bytes()
            ),
        }
    }
}

impl KeyPair {
    pub fn generate_ed25519() -> Self {
        KeyPair::Ed25519(ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng))
    }

    pub fn clone_public_key(&self) -> PublicKey {
        match self {
            KeyPair::Ed25519(key) => PublicKey::Ed25519(key.verifying_key()),
        }
    }

    /// Sign `data` and append the standard signature blob.
    pub fn sign_to(&self, data: &[u8], buffer: &mut CryptoVec) {
        match self {
            KeyPair::Ed25519(key) => {
                use ed25519_dalek::Signer;
                let sig = key.sign(data);
                buffer.extend_ssh_string(ED25519.0.as_bytes());
                buffer.extend_ssh_string(&sig.to_bytes());
            }
        }
    }
}
