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

use crate::encoding::{Encoding, Reader};
use crate::{cipher, kex, key, msg, Error};
use cryptovec::CryptoVec;
use rand::RngCore;
use std::str::from_utf8;

/// The algorithms picked for one key exchange.
#[derive(Debug)]
pub struct Names {
    pub kex: kex::Name,
    pub key: key::Name,
    pub cipher: cipher::Name,
    pub mac: Option<&'static str>,
    /// The peer guessed a kex packet and the guess was wrong; the next
    /// kex-range packet must be ignored.
    pub ignore_guessed: bool,
}

/// Lists of preferred algorithms. This is normally hard-coded into implementations.
#[derive(Debug)]
pub struct Preferred {
    /// Preferred key exchange algorithms.
    pub kex: &'static [kex::Name],
    /// Preferred host key algorithms.
    pub key: &'static [key::Name],
    /// Preferred symmetric ciphers.
    pub cipher: &'static [cipher::Name],
    /// Preferred MAC algorithms.
    pub mac: &'static [&'static str],
    /// Preferred compression algorithms.
    pub compression: &'static [&'static str],
}

impl Preferred {
    pub const DEFAULT: Preferred = Preferred {
        kex: &[kex::DH_GROUP14_SHA256],
        key: &[key::ED25519],
        cipher: &[cipher::chacha20poly1305::NAME],
        mac: &["none"],
        compression: &["none"],
    };
}

impl Default for Preferred {
    fn default() -> Preferred {
        Preferred::DEFAULT
    }
}

// A KEXINIT payload is the message number, a 16-byte cookie, ten name
// lists, the first_kex_packet_follows flag and a reserved word.
// https://tools.ietf.org/html/rfc4253#section-7.1
const KEXINIT_LISTS_OFFSET: usize = 17;

pub trait Select {
    /// Pick one name common to both sides, and whether it was the first
    /// choice of both.
    fn select<S: AsRef<str> + Copy>(a: &[S], b: &[u8]) -> Option<(bool, S)>;

    fn read_kex(buffer: &[u8], pref: &Preferred) -> Result<Names, Error> {
        let mut r = buffer.reader(KEXINIT_LISTS_OFFSET);

        let peer_kex = r.read_string()?;
        let (kex_guessable, kex) = match Self::select(pref.kex, peer_kex) {
            Some(x) => x,
            None => {
                debug!(
                    "no common kex algorithm; peer offers {:?}, preferred here: {:?}",
                    from_utf8(peer_kex),
                    pref.kex
                );
                return Err(Error::NoCommonKexAlgo);
            }
        };

        let peer_keys = r.read_string()?;
        let (key_guessable, key) = match Self::select(pref.key, peer_keys) {
            Some(x) => x,
            None => {
                debug!(
                    "no common host key algorithm; peer offers {:?}, preferred here: {:?}",
                    from_utf8(peer_keys),
                    pref.key
                );
                return Err(Error::NoCommonKeyAlgo);
            }
        };

        let peer_ciphers = r.read_string()?;
        let cipher = match Self::select(pref.cipher, peer_ciphers) {
            Some((_, c)) => c,
            None => {
                debug!(
                    "no common cipher; peer offers {:?}, preferred here: {:?}",
                    from_utf8(peer_ciphers),
                    pref.cipher
                );
                return Err(Error::NoCommonCipher);
            }
        };
        r.read_string()?; // cipher server-to-client

        let mac = Self::select(pref.mac, r.read_string()?).map(|(_, m)| m);
        r.read_string()?; // mac server-to-client

        // Only uncompressed sessions are negotiated, in both directions.
        for _ in 0..2 {
            if Self::select(pref.compression, r.read_string()?).is_none() {
                return Err(Error::NoCommonCompression);
            }
        }
        r.read_string()?; // languages client-to-server
        r.read_string()?; // languages server-to-client

        // If the peer sent a guessed kex packet and the guess was not the
        // first choice on both sides, that packet has to be dropped.
        let first_kex_packet_follows = r.read_byte()? != 0;
        Ok(Names {
            kex,
            key,
            cipher,
            mac,
            ignore_guessed: first_kex_packet_follows && !(kex_guessable && key_guessable),
        })
    }
}

pub struct Client;

impl Select for Client {
    // The client side keeps its own preference order: the first of our
    // names that the peer lists at all wins.
    fn select<S: AsRef<str> + Copy>(our_list: &[S], peer_list: &[u8]) -> Option<(bool, S)> {
        let mut first_everywhere = true;
        for &ours in our_list {
            for theirs in peer_list.split(|&x| x == b',') {
                if theirs == ours.as_ref().as_bytes() {
                    return Some((first_everywhere, ours));
                }
                first_everywhere = false
            }
        }
        None
    }
}

pub fn write_kex(prefs: &Preferred, buf: &mut CryptoVec) -> Result<(), Error> {
    buf.push(msg::KEXINIT);

    let mut cookie = [0; 16];
    rand::thread_rng().fill_bytes(&mut cookie);
    buf.extend(&cookie);

    buf.extend_list(prefs.kex.iter());
    buf.extend_list(prefs.key.iter());

    // Ciphers, MACs and compression are listed once per direction.
    for _ in 0..2 {
        buf.extend_list(prefs.cipher.iter());
    }
    for _ in 0..2 {
        buf.extend_list(prefs.mac.iter());
    }
    for _ in 0..2 {
        buf.extend_list(prefs.compression.iter());
    }

    // Languages, both directions.
    buf.write_empty_list();
    buf.write_empty_list();

    buf.push(0); // no guessed kex packet follows
    buf.extend(&[0, 0, 0, 0]); // reserved
    Ok(())
}
