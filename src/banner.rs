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

//! The identification string ("banner") exchanged by both peers before any
//! binary framing: `SSH-<protoversion>-<softwareversion>[ <comments>]\r\n`.
//! https://tools.ietf.org/html/rfc4253#section-4.2

use crate::Error;

/// Longest accepted banner line body, excluding the terminating LF.
pub const MAX_BANNER_LINE: usize = 128;

/// Longest banner this library will send, CRLF included.
/// https://tools.ietf.org/html/rfc4253#section-4.2
pub const MAX_BANNER_LEN: usize = 255;

/// One scan over accumulated bytes, looking for the banner terminator.
pub enum Scan {
    /// A full line was found; `line` is the banner with CR stripped and
    /// `consumed` is the number of input bytes used, LF included.
    Complete { line: String, consumed: usize },
    /// No LF yet; everything seen so far stays buffered.
    Incomplete,
}

/// Scan `buf` for a banner line. CR bytes are normalized away; the line
/// ends at the first LF. More than [`MAX_BANNER_LINE`] bytes without an LF
/// is an error.
pub fn scan_line(buf: &[u8]) -> Result<Scan, Error> {
    for (i, &c) in buf.iter().enumerate() {
        if c == b'\n' {
            // CR terminates the stored line, wherever it appears.
            let end = buf[..i]
                .iter()
                .position(|&c| c == b'\r')
                .unwrap_or(i);
            let line = String::from_utf8_lossy(&buf[..end]).into_owned();
            return Ok(Scan::Complete {
                line,
                consumed: i + 1,
            });
        }
        if i + 1 >= MAX_BANNER_LINE {
            return Err(Error::BannerTooLarge);
        }
    }
    Ok(Scan::Incomplete)
}

/// What a server banner tells us about the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BannerInfo {
    /// Peer supports SSH 1.
    pub ssh1: bool,
    /// Peer supports SSH 2.
    pub ssh2: bool,
    /// OpenSSH version encoded as `(major << 16) | (minor << 8)`, or 0.
    pub openssh: u32,
}

/// Analyze a received banner and classify the peer.
///
/// Typical banners are `SSH-1.5-blah`, `SSH-1.99-blah` and `SSH-2.0-blah`;
/// `1.99` declares support for both protocol versions.
pub fn analyze(banner: &str) -> Result<BannerInfo, Error> {
    debug!("Analyzing banner: {}", banner);

    let version = banner
        .strip_prefix("SSH-")
        .ok_or_else(|| Error::ProtocolMismatch(banner.to_string()))?;

    let (ssh1, ssh2) = match version.as_bytes().first() {
        Some(b'1') => (true, version.starts_with("1.9")),
        Some(b'2') => (false, true),
        _ => return Err(Error::ProtocolMismatch(banner.to_string())),
    };

    let openssh = openssh_version(banner);
    if openssh != 0 {
        debug!(
            "We are talking to an OpenSSH server version: {}.{} ({:#x})",
            openssh >> 16,
            (openssh >> 8) & 0xff,
            openssh
        );
    }

    Ok(BannerInfo {
        ssh1,
        ssh2,
        openssh,
    })
}

/// Parse the version out of an `OpenSSH_x.y` software string, encoded as
/// `(major << 16) | (minor << 8)`. Returns 0 for non-OpenSSH peers.
fn openssh_version(banner: &str) -> u32 {
    let rest = match banner.find("OpenSSH") {
        // Skip "OpenSSH" and the separator after it, usually '_'.
        Some(i) => match banner.get(i + 8..) {
            Some(rest) => rest,
            None => return 0,
        },
        None => return 0,
    };
    let (major, rest) = scan_u32(rest);
    // Skip the '.' between the fields.
    let (minor, _) = scan_u32(rest.get(1..).unwrap_or(""));
    ((major & 0xffff) << 16) | ((minor & 0xff) << 8)
}

fn scan_u32(s: &str) -> (u32, &str) {
    let end = s
        .as_bytes()
        .iter()
        .position(|c| !c.is_ascii_digit())
        .unwrap_or(s.len());
    (s[..end].parse().unwrap_or(0), &s[end..])
}
