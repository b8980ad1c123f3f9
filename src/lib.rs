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

//! Client-side SSH transport bring-up.
//!
//! This library drives a freshly opened TCP connection through the first
//! phases of the SSH protocol: identification string ("banner") exchange,
//! algorithm negotiation, Diffie-Hellman key exchange, host signature
//! verification and session-key installation. When [`Session::connect`]
//! returns successfully the connection is encrypted and ready for the
//! authentication layer; opening channels, authenticating users and moving
//! user data are out of scope and left to the caller.
//!
//! The engine is synchronous and single-threaded: it is driven entirely by
//! the caller's [`Session::connect`] / [`Session::disconnect`] entry points
//! and by the events the socket adapter delivers. There are no internal
//! threads and no executor. Between two blocking socket events the engine
//! runs to completion of whatever state transitions are possible.
//!
//! ```no_run
//! use ssh_transport::{Config, Session};
//!
//! let mut config = Config::default();
//! config.host = Some("localhost".to_string());
//! let mut session = Session::new(config);
//! session.connect().unwrap();
//! session.service_request("ssh-userauth").unwrap();
//! println!("server: {:?}", session.server_banner());
//! session.disconnect();
//! ```
//!
//! The socket is abstracted behind the [`socket::Socket`] trait; a blocking
//! implementation over `std::net::TcpStream` is provided, and a pre-opened
//! stream can be adopted instead of letting the session connect itself.

#[macro_use]
extern crate log;
#[macro_use]
extern crate thiserror;

pub use cryptovec::CryptoVec;

mod banner;
mod cipher;
mod client;
mod crypto;
mod encoding;
mod kex;
pub mod key;
mod msg;
mod negotiation;
mod packet;
mod session;
pub mod socket;
mod sshbuffer;

pub use client::LegacyKex;
pub use negotiation::Preferred;
pub use session::{CaptureDirection, Config, ProtocolVersion, Session, SessionState};

use std::sync::Once;

pub(crate) type Sha256Hash = sha2::digest::Output<sha2::Sha256>;

#[derive(Debug, Error)]
pub enum Error {
    /// Neither a pre-opened stream nor a host name was configured.
    #[error("Hostname required")]
    HostnameRequired,

    /// More than 128 bytes arrived before the banner line terminator.
    #[error("Receiving banner: too large banner")]
    BannerTooLarge,

    /// The identification line did not look like an SSH banner.
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// No overlap between the versions the peer advertises and the
    /// versions enabled locally.
    #[error("No version of SSH protocol usable (banner: {0})")]
    NoVersion(String),

    /// Unspecified problem with the beginning of key exchange.
    #[error("Key exchange init failed")]
    KexInit,

    /// No common key exchange algorithm.
    #[error("No common key exchange algorithm")]
    NoCommonKexAlgo,

    /// No common host key algorithm.
    #[error("No common host key algorithm")]
    NoCommonKeyAlgo,

    /// No common cipher.
    #[error("No common cipher")]
    NoCommonCipher,

    /// No common compression algorithm.
    #[error("No common compression algorithm")]
    NoCommonCompression,

    /// The KEXDH_REPLY carried no host key.
    #[error("No public key in packet")]
    NoPublicKey,

    /// The KEXDH_REPLY carried no server ephemeral.
    #[error("No F number in packet")]
    NoF,

    /// The KEXDH_REPLY carried no signature.
    #[error("No signature in packet")]
    NoSignature,

    /// The server ephemeral was outside the valid group range.
    #[error("Cannot import f number")]
    BadF,

    /// Shared-secret derivation failed.
    #[error("Cannot build k number")]
    BadK,

    /// The host signature did not verify against the exchange hash.
    #[error("Wrong server signature")]
    WrongServerSig,

    /// The host key blob could not be parsed.
    #[error("Could not read host key")]
    CouldNotReadKey,

    /// Expected SERVICE_ACCEPT was not received.
    #[error("Did not receive SERVICE_ACCEPT")]
    ServiceDenied,

    /// A packet failed authentication or decryption.
    #[error("Failed to decrypt a packet")]
    DecryptionError,

    /// The protocol is in an inconsistent state.
    #[error("Inconsistent state of the protocol")]
    Inconsistent,

    /// An unreachable-state assertion tripped.
    #[error("Invalid session state")]
    InvalidState,

    /// Index out of bounds while parsing a packet.
    #[error("Index out of bounds")]
    IndexOutOfBounds,

    /// Connection closed by the remote side.
    #[error("Connection closed by the remote side")]
    HUP,

    /// The peer sent SSH_MSG_DISCONNECT.
    #[error("Disconnected: {0}")]
    Disconnect(String),

    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),
}

/// A reason for disconnection.
/// https://tools.ietf.org/html/rfc4253#section-11.1
#[allow(missing_docs)] // This should be relatively self-explanatory.
#[derive(Debug, Clone, Copy)]
pub enum Disconnect {
    HostNotAllowedToConnect = 1,
    ProtocolError = 2,
    KeyExchangeFailed = 3,
    #[doc(hidden)]
    Reserved = 4,
    MACError = 5,
    CompressionError = 6,
    ServiceNotAvailable = 7,
    ProtocolVersionNotSupported = 8,
    HostKeyNotVerifiable = 9,
    ConnectionLost = 10,
    ByApplication = 11,
    TooManyConnections = 12,
    AuthCancelledByUser = 13,
    NoMoreAuthMethodsAvailable = 14,
    IllegalUserName = 15,
}

static INIT: Once = Once::new();

/// Process-wide one-time initialization. Idempotent; called by
/// [`Session::connect`], but may also be called ahead of time.
pub fn init() {
    INIT.call_once(|| {
        kex::init_groups();
        debug!("ssh-transport {} initialized", env!("CARGO_PKG_VERSION"));
    })
}

/// Static version and copyright string.
pub fn copyright() -> &'static str {
    concat!(
        "ssh-transport ",
        env!("CARGO_PKG_VERSION"),
        " Distributed under the Apache License, Version 2.0"
    )
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_is_idempotent() {
        super::init();
        super::init();
    }

    #[test]
    fn copyright_names_the_crate_version() {
        assert!(super::copyright().contains(env!("CARGO_PKG_VERSION")));
    }
}
