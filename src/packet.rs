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

//! The binary packet layer: framing outgoing payloads through the current
//! cipher, reassembling inbound frames, and the blocking primitives the
//! state machines suspend on (`handle_packets`, `packet_wait`,
//! `packet_flush`).

use crate::banner;
use crate::cipher;
use crate::encoding::Reader;
use crate::msg;
use crate::session::{CaptureDirection, DataSink, Session, SessionState};
use crate::sshbuffer;
use crate::Error;
use cryptovec::CryptoVec;
use std::num::Wrapping;

// A cipher pair for a session: the one installed at NEWKEYS, cleartext
// before that.
macro_rules! current_cipher {
    ($session:expr) => {
        match $session.current_crypto {
            Some(ref crypto) => crypto.cipher.as_ref().unwrap_or(&cipher::CLEAR_PAIR),
            None => &cipher::CLEAR_PAIR,
        }
    };
}

impl Session {
    /// Process one socket event: block until bytes arrive, then run every
    /// state transition they enable. This is the engine's only suspension
    /// point for inbound data.
    pub(crate) fn handle_packets(&mut self) -> Result<(), Error> {
        let mut buf = [0u8; 8192];
        let n = self.socket.read(&mut buf)?;
        if n == 0 {
            return Err(Error::HUP);
        }
        self.capture_bytes(CaptureDirection::Incoming, &buf[..n]);
        self.in_buffer.extend(&buf[..n]);
        self.feed()
    }

    /// Drain as much of the input buffer as the current data consumer can
    /// use. The consumer reports how many bytes it took; zero means it
    /// needs more input.
    fn feed(&mut self) -> Result<(), Error> {
        loop {
            if self.in_buffer.is_empty() {
                return Ok(());
            }
            let consumed = match self.data_sink {
                DataSink::Banner => self.feed_banner()?,
                DataSink::Packets => self.feed_packet()?,
            };
            if consumed == 0 {
                return Ok(());
            }
            sshbuffer::consume(&mut self.in_buffer, consumed);
        }
    }

    fn feed_banner(&mut self) -> Result<usize, Error> {
        match banner::scan_line(&self.in_buffer)? {
            banner::Scan::Complete { line, consumed } => {
                debug!("Received banner: {}", line);
                self.server_banner = Some(line);
                self.session_state = SessionState::BannerReceived;
                self.connection_callback()?;
                Ok(consumed)
            }
            banner::Scan::Incomplete => Ok(0),
        }
    }

    fn feed_packet(&mut self) -> Result<usize, Error> {
        let mut payload = CryptoVec::new();
        let read = {
            let pair = current_cipher!(self);
            cipher::read(pair, &self.in_buffer, self.in_seqn, &mut payload)?
        };
        match read {
            Some(consumed) => {
                self.in_seqn += Wrapping(1);
                if !payload.is_empty() {
                    self.payloads.push_back(payload);
                }
                Ok(consumed)
            }
            None => Ok(0),
        }
    }

    /// Seal the payload under construction into the outbound queue.
    pub(crate) fn packet_send(&mut self) -> Result<(), Error> {
        {
            let pair = current_cipher!(self);
            pair.write(&self.out_payload, &mut self.out_buffer);
        }
        self.out_payload.clear();
        Ok(())
    }

    /// Drain the outbound queue into the socket and block until it is
    /// handed to the OS.
    pub(crate) fn packet_flush(&mut self) -> Result<(), Error> {
        if !self.out_buffer.buffer.is_empty() {
            if let Some(ref mut callback) = self.capture {
                callback(CaptureDirection::Outgoing, &self.out_buffer.buffer);
            }
            self.socket.write_all(&self.out_buffer.buffer)?;
            self.socket.flush()?;
            self.out_buffer.buffer.clear();
        }
        Ok(())
    }

    /// Block until a packet of the expected type arrives. The wait is
    /// one-shot: transport chatter (IGNORE, DEBUG, UNIMPLEMENTED, the
    /// authentication banner) is absorbed, a DISCONNECT terminates the
    /// session, and anything else is a protocol violation.
    pub(crate) fn packet_wait(&mut self, expected: u8) -> Result<CryptoVec, Error> {
        loop {
            while let Some(payload) = self.payloads.pop_front() {
                let ty = payload[0];
                if self.ignore_next_kex_packet
                    && (msg::KEX_SPECIFIC_FIRST..=msg::KEX_SPECIFIC_LAST).contains(&ty)
                {
                    debug!("Dropping badly guessed kex packet type {}", ty);
                    self.ignore_next_kex_packet = false;
                    continue;
                }
                if ty == expected {
                    return Ok(payload);
                }
                match ty {
                    msg::DISCONNECT => return Err(self.parse_disconnect(&payload)),
                    msg::IGNORE | msg::DEBUG | msg::UNIMPLEMENTED => {
                        debug!("Dropping transport message type {}", ty);
                    }
                    msg::USERAUTH_BANNER => self.store_issue_banner(&payload),
                    _ => {
                        warn!("Received packet type {} while waiting for {}", ty, expected);
                        return Err(Error::Inconsistent);
                    }
                }
            }
            self.handle_packets()?;
        }
    }

    fn parse_disconnect(&mut self, payload: &[u8]) -> Error {
        let mut r = payload.reader(1);
        let reason = r.read_u32().unwrap_or(0);
        let description = r
            .read_string()
            .map(|d| String::from_utf8_lossy(d).into_owned())
            .unwrap_or_default();
        info!("Received SSH_MSG_DISCONNECT: {} ({})", description, reason);
        Error::Disconnect(format!("{} ({})", description, reason))
    }

    fn store_issue_banner(&mut self, payload: &[u8]) {
        let mut r = payload.reader(1);
        if let Ok(text) = r.read_string() {
            debug!("Received authentication banner");
            self.issue_banner = Some(CryptoVec::from_slice(text));
        }
    }
}
