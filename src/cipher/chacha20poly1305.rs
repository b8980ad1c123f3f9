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

// http://cvsweb.openbsd.org/cgi-bin/cvsweb/src/usr.bin/ssh/PROTOCOL.chacha20poly1305?annotate=HEAD

use super::Error;
use byteorder::{BigEndian, ByteOrder};
use chacha20::cipher::{NewCipher, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20Legacy;
use poly1305::universal_hash::KeyInit;
use poly1305::Poly1305;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 8;
const TAG_LEN: usize = 16;
const POLY_KEY_BYTES: usize = 32;

pub struct OpeningKey {
    k1: [u8; KEY_BYTES],
    k2: [u8; KEY_BYTES],
}

pub struct SealingKey {
    k1: [u8; KEY_BYTES],
    k2: [u8; KEY_BYTES],
}

impl Drop for OpeningKey {
    fn drop(&mut self) {
        self.k1.zeroize();
        self.k2.zeroize();
    }
}

impl Drop for SealingKey {
    fn drop(&mut self) {
        self.k1.zeroize();
        self.k2.zeroize();
    }
}

pub static CIPHER: super::Cipher = super::Cipher {
    name: NAME,
    key_len: 64,
    nonce_len: 0,
    make_sealing_cipher,
    make_opening_cipher,
};

pub const NAME: super::Name = super::Name("chacha20-poly1305@openssh.com");

fn split_keys(k: &[u8]) -> ([u8; KEY_BYTES], [u8; KEY_BYTES]) {
    // k1 seals the length field, k2 the payload.
    let mut k1 = [0; KEY_BYTES];
    let mut k2 = [0; KEY_BYTES];
    k1.clone_from_slice(&k[KEY_BYTES..]);
    k2.clone_from_slice(&k[..KEY_BYTES]);
    (k1, k2)
}

fn make_sealing_cipher(k: &[u8], _: &[u8]) -> super::SealingCipher {
    let (k1, k2) = split_keys(k);
    super::SealingCipher::Chacha20Poly1305(SealingKey { k1, k2 })
}

fn make_opening_cipher(k: &[u8], _: &[u8]) -> super::OpeningCipher {
    let (k1, k2) = split_keys(k);
    super::OpeningCipher::Chacha20Poly1305(OpeningKey { k1, k2 })
}

// The sequence number is the per-packet nonce.
fn make_nonce(sequence_number: u32) -> [u8; NONCE_BYTES] {
    let mut nonce = [0; NONCE_BYTES];
    BigEndian::write_u32(&mut nonce[NONCE_BYTES - 4..], sequence_number);
    nonce
}

fn cipher(key: &[u8; KEY_BYTES], nonce: &[u8; NONCE_BYTES]) -> ChaCha20Legacy {
    ChaCha20Legacy::new(
        chacha20::Key::from_slice(key),
        chacha20::LegacyNonce::from_slice(nonce),
    )
}

// The Poly1305 key is the first keystream block of the payload cipher.
fn poly_key(k2: &[u8; KEY_BYTES], nonce: &[u8; NONCE_BYTES]) -> poly1305::Key {
    let mut key = [0u8; POLY_KEY_BYTES];
    cipher(k2, nonce).apply_keystream(&mut key);
    let out = *poly1305::Key::from_slice(&key);
    key.zeroize();
    out
}

impl super::OpeningKey for OpeningKey {
    fn decrypt_packet_length(
        &self,
        sequence_number: u32,
        mut encrypted_packet_length: [u8; 4],
    ) -> [u8; 4] {
        let nonce = make_nonce(sequence_number);
        cipher(&self.k1, &nonce).apply_keystream(&mut encrypted_packet_length);
        encrypted_packet_length
    }

    fn tag_len(&self) -> usize {
        TAG_LEN
    }

    fn open<'a>(
        &self,
        sequence_number: u32,
        ciphertext_in_plaintext_out: &'a mut [u8],
        tag: &[u8],
    ) -> Result<&'a [u8], Error> {
        let nonce = make_nonce(sequence_number);
        let expected =
            Poly1305::new(&poly_key(&self.k2, &nonce)).compute_unpadded(ciphertext_in_plaintext_out);
        if !bool::from(expected.as_slice().ct_eq(tag)) {
            return Err(Error::DecryptionError);
        }
        // The payload starts at keystream block 1; block 0 was used up by
        // the Poly1305 key.
        let mut payload_cipher = cipher(&self.k2, &nonce);
        payload_cipher.seek(64u64);
        payload_cipher.apply_keystream(&mut ciphertext_in_plaintext_out[4..]);
        Ok(&ciphertext_in_plaintext_out[4..])
    }
}

impl super::SealingKey for SealingKey {
    fn padding_length(&self, payload: &[u8]) -> usize {
        let block_size = 8;
        let extra_len = super::PACKET_LENGTH_LEN + super::PADDING_LENGTH_LEN;
        let padding_len = if payload.len() + extra_len <= super::MINIMUM_PACKET_LEN {
            super::MINIMUM_PACKET_LEN - payload.len() - super::PADDING_LENGTH_LEN
        } else {
            block_size - ((super::PADDING_LENGTH_LEN + payload.len()) % block_size)
        };
        if padding_len < super::PACKET_LENGTH_LEN {
            padding_len + block_size
        } else {
            padding_len
        }
    }

    // The cipher runs in stateful counter mode, so the padding does not
    // need to be random.
    fn fill_padding(&self, padding_out: &mut [u8]) {
        for padding_byte in padding_out {
            *padding_byte = 0;
        }
    }

    fn tag_len(&self) -> usize {
        TAG_LEN
    }

    fn seal(
        &self,
        sequence_number: u32,
        plaintext_in_ciphertext_out: &mut [u8],
        tag_out: &mut [u8],
    ) {
        let nonce = make_nonce(sequence_number);
        {
            let (len, payload) = plaintext_in_ciphertext_out.split_at_mut(4);
            cipher(&self.k1, &nonce).apply_keystream(len);
            let mut payload_cipher = cipher(&self.k2, &nonce);
            payload_cipher.seek(64u64);
            payload_cipher.apply_keystream(payload);
        }
        let tag = Poly1305::new(&poly_key(&self.k2, &nonce))
            .compute_unpadded(plaintext_in_ciphertext_out);
        tag_out.clone_from_slice(tag.as_slice());
    }
}
