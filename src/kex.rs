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

//! Classic Diffie-Hellman key agreement over the group 14 modulus, with
//! SHA-256 for the exchange hash and key derivation.
//! https://tools.ietf.org/html/rfc8268

use crate::cipher;
use crate::crypto::Exchange;
use crate::encoding::Encoding;
use crate::{Error, Sha256Hash};
use cryptovec::CryptoVec;
use num_bigint::BigUint;
use once_cell::sync::Lazy;
use rand::RngCore;
use sha2::Digest;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Name(&'static str);
impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        self.0
    }
}

pub const DH_GROUP14_SHA256: Name = Name("diffie-hellman-group14-sha256");

// The 2048-bit MODP group, generator 2.
// https://tools.ietf.org/html/rfc3526#section-3
const GROUP14_P_HEX: &[u8] = b"\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF";

pub(crate) static GROUP14_P: Lazy<BigUint> =
    Lazy::new(|| BigUint::parse_bytes(GROUP14_P_HEX, 16).expect("group 14 modulus"));

pub(crate) static GROUP_G: Lazy<BigUint> = Lazy::new(|| BigUint::from(2u32));

// Private exponent size; twice the strength of the strongest derived key.
// https://tools.ietf.org/html/rfc4419#section-6.2
const EXPONENT_BYTES: usize = 64;

pub(crate) fn init_groups() {
    Lazy::force(&GROUP14_P);
    Lazy::force(&GROUP_G);
}

/// The state of one Diffie-Hellman run: the private scalar `x`, the two
/// public values `e` and `f`, and the shared secret `k`. All buffers are
/// zeroed when the value is dropped; `x` is discarded as soon as `k` has
/// been derived.
pub struct Dh {
    x: Option<CryptoVec>,
    e: CryptoVec,
    f: CryptoVec,
    k: CryptoVec,
}

impl std::fmt::Debug for Dh {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Dh {{ x: [hidden], e, f, k: [hidden] }}")
    }
}

impl Dh {
    pub fn new() -> Self {
        Dh {
            x: None,
            e: CryptoVec::new(),
            f: CryptoVec::new(),
            k: CryptoVec::new(),
        }
    }

    /// Draw a fresh private scalar and compute `e = g^x mod p`. The scalar
    /// is never reused across sessions.
    pub fn generate_client(&mut self) -> Result<(), Error> {
        let mut x_bytes = CryptoVec::new_zeroed(EXPONENT_BYTES);
        rand::thread_rng().fill_bytes(&mut x_bytes);
        let x = BigUint::from_bytes_be(&x_bytes);
        if x < BigUint::from(2u32) {
            // All-zero randomness means something is deeply wrong.
            return Err(Error::KexInit);
        }
        let e = GROUP_G.modpow(&x, &GROUP14_P);
        self.e.clear();
        self.e.extend(&e.to_bytes_be());
        self.x = Some(x_bytes);
        Ok(())
    }

    /// Import the server public value, rejecting anything outside
    /// `(1, p-1)`.
    pub fn import_f(&mut self, f: &[u8]) -> Result<(), Error> {
        let fi = BigUint::from_bytes_be(f);
        if fi <= BigUint::from(1u32) || fi >= &*GROUP14_P - 1u32 {
            return Err(Error::BadF);
        }
        self.f.clear();
        self.f.extend(&fi.to_bytes_be());
        Ok(())
    }

    /// Derive the shared secret `k = f^x mod p` and discard `x`.
    pub fn build_k(&mut self) -> Result<(), Error> {
        let x_bytes = self.x.take().ok_or(Error::KexInit)?;
        let x = BigUint::from_bytes_be(&x_bytes);
        if self.f.is_empty() {
            return Err(Error::BadK);
        }
        let f = BigUint::from_bytes_be(&self.f);
        let k = f.modpow(&x, &GROUP14_P);
        if k <= BigUint::from(1u32) {
            return Err(Error::BadK);
        }
        self.k.clear();
        self.k.extend(&k.to_bytes_be());
        Ok(())
    }

    pub fn e(&self) -> &[u8] {
        &self.e
    }

    pub fn f(&self) -> &[u8] {
        &self.f
    }

    pub fn shared_secret(&self) -> Option<&[u8]> {
        if self.k.is_empty() {
            None
        } else {
            Some(&self.k)
        }
    }

    /// The exchange hash over both identification strings, both KEXINIT
    /// payloads, the host key and the DH values.
    pub fn compute_exchange_hash(
        &self,
        server_host_key_blob: &[u8],
        exchange: &Exchange,
    ) -> Result<Sha256Hash, Error> {
        if self.k.is_empty() {
            return Err(Error::BadK);
        }
        Ok(exchange_hash(
            server_host_key_blob,
            exchange,
            &self.e,
            &self.f,
            &self.k,
        ))
    }

    /// Derive the directional cipher state from `k`, the exchange hash and
    /// the session id.
    pub fn compute_keys(
        &self,
        session_id: &Sha256Hash,
        exchange_hash: &Sha256Hash,
        cipher: cipher::Name,
        is_server: bool,
    ) -> Result<cipher::CipherPair, Error> {
        if self.k.is_empty() {
            return Err(Error::BadK);
        }
        derive_keys(&self.k, session_id, exchange_hash, cipher, is_server)
    }
}

/// The exchange hash of RFC 4253 section 8, over explicit inputs.
pub(crate) fn exchange_hash(
    server_host_key_blob: &[u8],
    exchange: &Exchange,
    e: &[u8],
    f: &[u8],
    k: &[u8],
) -> Sha256Hash {
    let mut buffer = CryptoVec::new();
    buffer.extend_ssh_string(&exchange.client_id);
    buffer.extend_ssh_string(&exchange.server_id);
    buffer.extend_ssh_string(&exchange.client_kex_init);
    buffer.extend_ssh_string(&exchange.server_kex_init);
    buffer.extend_ssh_string(server_host_key_blob);
    buffer.extend_ssh_mpint(e);
    buffer.extend_ssh_mpint(f);
    buffer.extend_ssh_mpint(k);

    let mut hasher = sha2::Sha256::new();
    hasher.update(&buffer[..]);
    hasher.finalize()
}

/// Key derivation of RFC 4253 section 7.2.
pub(crate) fn derive_keys(
    k: &[u8],
    session_id: &Sha256Hash,
    exchange_hash: &Sha256Hash,
    cipher: cipher::Name,
    is_server: bool,
) -> Result<cipher::CipherPair, Error> {
    let cipher = cipher::by_name(cipher).ok_or(Error::NoCommonCipher)?;
    let mut buffer = CryptoVec::new();
    let mut key = CryptoVec::new();
    let mut nonce = CryptoVec::new();

    let mut compute_key = |c: u8, key: &mut CryptoVec, len: usize| {
        buffer.clear();
        key.clear();
        buffer.extend_ssh_mpint(k);
        buffer.extend(exchange_hash.as_ref());
        buffer.push(c);
        buffer.extend(session_id.as_ref());
        let hash = {
            let mut hasher = sha2::Sha256::new();
            hasher.update(&buffer[..]);
            hasher.finalize()
        };
        key.extend(hash.as_ref());

        while key.len() < len {
            buffer.clear();
            buffer.extend_ssh_mpint(k);
            buffer.extend(exchange_hash.as_ref());
            buffer.extend(key);
            let hash = {
                let mut hasher = sha2::Sha256::new();
                hasher.update(&buffer[..]);
                hasher.finalize()
            };
            key.extend(hash.as_ref());
        }
        key.resize(len);
    };

    let (local_to_remote, remote_to_local) = if is_server {
        (b'D', b'C')
    } else {
        (b'C', b'D')
    };
    let (local_to_remote_nonce, remote_to_local_nonce) = if is_server {
        (b'B', b'A')
    } else {
        (b'A', b'B')
    };

    compute_key(local_to_remote, &mut key, cipher.key_len);
    compute_key(local_to_remote_nonce, &mut nonce, cipher.nonce_len);
    let local_to_remote = (cipher.make_sealing_cipher)(&key, &nonce);

    compute_key(remote_to_local, &mut key, cipher.key_len);
    compute_key(remote_to_local_nonce, &mut nonce, cipher.nonce_len);
    let remote_to_local = (cipher.make_opening_cipher)(&key, &nonce);

    Ok(cipher::CipherPair {
        local_to_remote,
        remote_to_local,
    })
}
