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

use crate::sshbuffer::SSHBuffer;
use crate::Error;
use std::num::Wrapping;

pub mod chacha20poly1305;

pub struct Cipher {
    pub name: Name,
    pub key_len: usize,
    pub nonce_len: usize,
    pub make_opening_cipher: fn(key: &[u8], nonce: &[u8]) -> OpeningCipher,
    pub make_sealing_cipher: fn(key: &[u8], nonce: &[u8]) -> SealingCipher,
}

pub enum OpeningCipher {
    Clear,
    Chacha20Poly1305(chacha20poly1305::OpeningKey),
}

impl OpeningCipher {
    fn as_opening_key(&self) -> &dyn OpeningKey {
        match *self {
            OpeningCipher::Clear => &Clear,
            OpeningCipher::Chacha20Poly1305(ref key) => key,
        }
    }
}

pub enum SealingCipher {
    Clear,
    Chacha20Poly1305(chacha20poly1305::SealingKey),
}

impl SealingCipher {
    fn as_sealing_key(&self) -> &dyn SealingKey {
        match *self {
            SealingCipher::Clear => &Clear,
            SealingCipher::Chacha20Poly1305(ref key) => key,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Name(&'static str);
impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        self.0
    }
}

pub struct CipherPair {
    pub local_to_remote: SealingCipher,
    pub remote_to_local: OpeningCipher,
}

impl std::fmt::Debug for CipherPair {
    fn fmt(&self, _: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        Ok(())
    }
}

pub const CLEAR_PAIR: CipherPair = CipherPair {
    local_to_remote: SealingCipher::Clear,
    remote_to_local: OpeningCipher::Clear,
};

pub trait OpeningKey {
    fn decrypt_packet_length(&self, seqn: u32, encrypted_packet_length: [u8; 4]) -> [u8; 4];

    fn tag_len(&self) -> usize;

    fn open<'a>(
        &self,
        seqn: u32,
        ciphertext_in_plaintext_out: &'a mut [u8],
        tag: &[u8],
    ) -> Result<&'a [u8], Error>;
}

pub trait SealingKey {
    fn padding_length(&self, plaintext: &[u8]) -> usize;

    fn fill_padding(&self, padding_out: &mut [u8]);

    fn tag_len(&self) -> usize;

    fn seal(&self, seqn: u32, plaintext_in_ciphertext_out: &mut [u8], tag_out: &mut [u8]);
}

/// The null cipher carrying everything up to the first NEWKEYS: frames are
/// still length-prefixed and padded, but nothing is encrypted and there is
/// no authentication tag.
struct Clear;

// Frames under the null cipher use an 8-byte block.
// https://tools.ietf.org/html/rfc4253#section-6
const CLEAR_BLOCK_LEN: usize = 8;

impl OpeningKey for Clear {
    fn decrypt_packet_length(&self, _seqn: u32, packet_length: [u8; 4]) -> [u8; 4] {
        packet_length
    }

    fn tag_len(&self) -> usize {
        0
    }

    fn open<'a>(
        &self,
        _seqn: u32,
        ciphertext_in_plaintext_out: &'a mut [u8],
        tag: &[u8],
    ) -> Result<&'a [u8], Error> {
        debug_assert!(tag.is_empty());
        Ok(&ciphertext_in_plaintext_out[PACKET_LENGTH_LEN..])
    }
}

impl SealingKey for Clear {
    fn padding_length(&self, payload: &[u8]) -> usize {
        let unpadded = PACKET_LENGTH_LEN + PADDING_LENGTH_LEN + payload.len();
        let padding = CLEAR_BLOCK_LEN - unpadded % CLEAR_BLOCK_LEN;
        if padding < MINIMUM_PAD_LEN {
            padding + CLEAR_BLOCK_LEN
        } else {
            padding
        }
    }

    // The peer can read the frame anyway; zero padding keeps RNG state out
    // of it.
    fn fill_padding(&self, padding_out: &mut [u8]) {
        for b in padding_out {
            *b = 0;
        }
    }

    fn tag_len(&self) -> usize {
        0
    }

    fn seal(&self, _seqn: u32, _plaintext_in_ciphertext_out: &mut [u8], tag_out: &mut [u8]) {
        debug_assert!(tag_out.is_empty());
    }
}

/// One framing step over buffered input: decrypt the length field, and if
/// the whole packet is available, authenticate, decrypt and unpad it.
/// Returns the consumed byte count and the cleartext payload, or `None`
/// when more input is needed.
pub fn read(
    pair: &CipherPair,
    buffer: &[u8],
    seqn: Wrapping<u32>,
    payload: &mut cryptovec::CryptoVec,
) -> Result<Option<usize>, Error> {
    let key = pair.remote_to_local.as_opening_key();
    if buffer.len() < PACKET_LENGTH_LEN {
        return Ok(None);
    }
    let mut len = [0; PACKET_LENGTH_LEN];
    len.clone_from_slice(&buffer[..PACKET_LENGTH_LEN]);
    let len = key.decrypt_packet_length(seqn.0, len);
    let packet_length = u32::from_be_bytes(len) as usize;

    // Maximum packet length:
    // https://tools.ietf.org/html/rfc4253#section-6.1
    if packet_length < 1 + MINIMUM_PAD_LEN || packet_length > MAXIMUM_PACKET_LEN {
        return Err(Error::DecryptionError);
    }

    let total = PACKET_LENGTH_LEN + packet_length + key.tag_len();
    if buffer.len() < total {
        return Ok(None);
    }

    // The opening key works in place; copy the frame out of the input
    // buffer first.
    payload.clear();
    payload.extend(&buffer[..PACKET_LENGTH_LEN + packet_length]);
    let tag = &buffer[PACKET_LENGTH_LEN + packet_length..total];
    let plaintext_len = {
        let plaintext = key.open(seqn.0, payload, tag)?;
        let padding_length = plaintext[0] as usize;
        plaintext
            .len()
            .checked_sub(1 + padding_length)
            .ok_or(Error::IndexOutOfBounds)?
    };

    // Drop the length field and the padding-length byte, keep the payload.
    let start = PACKET_LENGTH_LEN + PADDING_LENGTH_LEN;
    payload.copy_within(start..start + plaintext_len, 0);
    payload.resize(plaintext_len);
    Ok(Some(total))
}

impl CipherPair {
    pub fn write(&self, payload: &[u8], buffer: &mut SSHBuffer) {
        // https://tools.ietf.org/html/rfc4253#section-6
        //
        // The variables `payload`, `packet_length` and `padding_length`
        // refer to the protocol fields of the same names.
        let key = self.local_to_remote.as_sealing_key();

        let padding_length = key.padding_length(payload);
        let packet_length = PADDING_LENGTH_LEN + payload.len() + padding_length;
        let offset = buffer.buffer.len();

        debug_assert!(packet_length <= MAXIMUM_PACKET_LEN);
        buffer.buffer.push_u32_be(packet_length as u32);
        buffer.buffer.push(padding_length as u8);
        buffer.buffer.extend(payload);
        key.fill_padding(buffer.buffer.resize_mut(padding_length));
        buffer.buffer.resize_mut(key.tag_len());

        let (plaintext, tag) =
            buffer.buffer[offset..].split_at_mut(PACKET_LENGTH_LEN + packet_length);
        key.seal(buffer.seqn.0, plaintext, tag);

        buffer.bytes += payload.len();
        // Sequence numbers are on 32 bits and wrap.
        // https://tools.ietf.org/html/rfc4253#section-6.4
        buffer.seqn += Wrapping(1);
    }
}

pub fn by_name(name: Name) -> Option<&'static Cipher> {
    if name == chacha20poly1305::NAME {
        Some(&chacha20poly1305::CIPHER)
    } else {
        None
    }
}

pub const PACKET_LENGTH_LEN: usize = 4;

pub(crate) const MINIMUM_PACKET_LEN: usize = 16;

pub(crate) const PADDING_LENGTH_LEN: usize = 1;

const MINIMUM_PAD_LEN: usize = 4;

const MAXIMUM_PACKET_LEN: usize = 256 * 1024;
