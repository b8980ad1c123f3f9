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

//! The per-exchange crypto context. A session keeps two of these: the one
//! currently protecting the connection, and the one being prepared by an
//! ongoing key exchange; they are rotated when NEWKEYS is received.

use crate::session::Session;
use crate::{cipher, kex, key, negotiation, Error};
use cryptovec::CryptoVec;

/// The material hashed into the exchange hash: both identification
/// strings and both KEXINIT payloads.
#[derive(Debug)]
pub struct Exchange {
    pub client_id: CryptoVec,
    pub server_id: CryptoVec,
    pub client_kex_init: CryptoVec,
    pub server_kex_init: CryptoVec,
}

impl Exchange {
    pub fn new() -> Self {
        Exchange {
            client_id: CryptoVec::new(),
            server_id: CryptoVec::new(),
            client_kex_init: CryptoVec::new(),
            server_kex_init: CryptoVec::new(),
        }
    }
}

/// Everything one key exchange produces. All byte buffers are zeroed when
/// the context is released.
pub(crate) struct CryptoContext {
    pub exchange: Exchange,
    pub dh: kex::Dh,
    pub names: Option<negotiation::Names>,
    pub server_host_key: Option<key::PublicKey>,
    pub server_host_key_blob: CryptoVec,
    pub exchange_hash: Option<crate::Sha256Hash>,
    pub suite: Option<&'static cipher::Cipher>,
    pub cipher: Option<cipher::CipherPair>,
}

impl std::fmt::Debug for CryptoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "CryptoContext {{ names: {:?}, host_key: {:?}, .. }}",
            self.names, self.server_host_key
        )
    }
}

impl CryptoContext {
    pub fn new() -> Self {
        CryptoContext {
            exchange: Exchange::new(),
            dh: kex::Dh::new(),
            names: None,
            server_host_key: None,
            server_host_key_blob: CryptoVec::new(),
            exchange_hash: None,
            suite: None,
            cipher: None,
        }
    }
}

impl Session {
    /// Compute the exchange hash for the pending exchange. The first hash
    /// of a connection becomes the persistent session id.
    pub(crate) fn make_sessionid(&mut self) -> Result<(), Error> {
        let next = self.next_crypto.as_deref_mut().ok_or(Error::Inconsistent)?;
        let hash = next
            .dh
            .compute_exchange_hash(&next.server_host_key_blob, &next.exchange)?;
        next.exchange_hash = Some(hash);
        if self.session_id.is_none() {
            self.session_id = Some(hash);
        }
        Ok(())
    }

    /// Bind the negotiated cipher choice to the pending crypto context.
    /// This fixes the key lengths before the session keys are derived.
    pub(crate) fn crypt_set_algorithms(&mut self) -> Result<(), Error> {
        let next = self.next_crypto.as_deref_mut().ok_or(Error::Inconsistent)?;
        let names = next.names.as_ref().ok_or(Error::KexInit)?;
        let suite = cipher::by_name(names.cipher).ok_or(Error::NoCommonCipher)?;
        debug!("Set output algorithm to {}", suite.name.as_ref());
        next.suite = Some(suite);
        Ok(())
    }

    /// Derive the directional keys for the pending crypto context.
    pub(crate) fn generate_session_keys(&mut self) -> Result<(), Error> {
        let session_id = self.session_id.ok_or(Error::Inconsistent)?;
        let next = self.next_crypto.as_deref_mut().ok_or(Error::Inconsistent)?;
        let names = next.names.as_ref().ok_or(Error::KexInit)?;
        let hash = next.exchange_hash.ok_or(Error::Inconsistent)?;
        let pair = next
            .dh
            .compute_keys(&session_id, &hash, names.cipher, false)?;
        next.cipher = Some(pair);
        Ok(())
    }

    /// Verify the host signature over the exchange hash. Runs only once
    /// the hash is known, which is after NEWKEYS has been received.
    pub(crate) fn signature_verify(&mut self, signature: &[u8]) -> Result<(), Error> {
        let next = self.next_crypto.as_deref().ok_or(Error::Inconsistent)?;
        let key = next.server_host_key.as_ref().ok_or(Error::NoPublicKey)?;
        let hash = next.exchange_hash.ok_or(Error::Inconsistent)?;
        if key.verify_server_auth(hash.as_ref(), signature) {
            debug!("Host signature verified");
            Ok(())
        } else {
            Err(Error::WrongServerSig)
        }
    }
}
