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

use cryptovec::CryptoVec;
use std::num::Wrapping;

#[derive(Debug)]
pub struct SSHBuffer {
    pub buffer: CryptoVec,
    pub bytes: usize,
    // Sequence numbers are on 32 bits and wrap.
    // https://tools.ietf.org/html/rfc4253#section-6.4
    pub seqn: Wrapping<u32>,
}

impl SSHBuffer {
    pub fn new() -> Self {
        SSHBuffer {
            buffer: CryptoVec::new(),
            bytes: 0,
            seqn: Wrapping(0),
        }
    }

    pub fn send_ssh_id(&mut self, id: &[u8]) {
        self.buffer.extend(id);
        self.buffer.push(b'\r');
        self.buffer.push(b'\n');
    }
}

/// Remove `n` consumed bytes from the front of `buffer`, keeping the rest.
pub fn consume(buffer: &mut CryptoVec, n: usize) {
    let len = buffer.len();
    debug_assert!(n <= len);
    buffer.copy_within(n..len, 0);
    buffer.resize(len - n);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_keeps_tail() {
        let mut buf = CryptoVec::new();
        buf.extend(b"abcdef");
        consume(&mut buf, 4);
        assert_eq!(&buf[..], b"ef");
        consume(&mut buf, 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn ssh_id_is_crlf_terminated() {
        let mut b = SSHBuffer::new();
        b.send_ssh_id(b"SSH-2.0-test");
        assert_eq!(&b.buffer[..], b"SSH-2.0-test\r\n");
    }
}
