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

use crate::client::LegacyKex;
use crate::crypto::CryptoContext;
use crate::negotiation::Preferred;
use crate::socket::{Socket, TcpSocket};
use crate::sshbuffer::SSHBuffer;
use crate::{Error, Sha256Hash};
use cryptovec::CryptoVec;
use std::collections::VecDeque;
use std::num::Wrapping;

/// Progression of one connection, from creation to the hand-off to the
/// authentication layer. `Error` is absorbing; every other transition
/// moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    None,
    Connecting,
    SocketConnected,
    BannerReceived,
    InitialKex,
    Authenticating,
    Error,
}

/// The five stops of the DH handshake, plus its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DhState {
    Init,
    InitToSend,
    InitSent,
    NewkeysToSend,
    NewkeysSent,
    Finished,
}

/// The protocol version agreed with the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V1,
    V2,
}

/// Where inbound socket bytes go: the banner reader until the peer's
/// identification line is complete, the packet dispatcher afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DataSink {
    Banner,
    Packets,
}

/// Direction of traffic handed to the capture callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureDirection {
    Incoming,
    Outgoing,
}

/// The configuration of a client session.
#[derive(Debug)]
pub struct Config {
    /// Host to connect to. Not needed when a pre-opened stream is adopted.
    pub host: Option<String>,
    /// Port to connect to.
    pub port: u16,
    /// Source address to bind before connecting, if the adapter supports it.
    pub bind_addr: Option<String>,
    /// Whether protocol version 1 may be negotiated.
    pub ssh1: bool,
    /// Whether protocol version 2 may be negotiated.
    pub ssh2: bool,
    /// Override for the identification string sent to the server,
    /// without the trailing CRLF.
    pub client_id: Option<String>,
    /// Lists of preferred algorithms.
    pub preferred: Preferred,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            host: None,
            port: 22,
            bind_addr: None,
            ssh1: false,
            ssh2: true,
            client_id: None,
            preferred: Preferred::default(),
        }
    }
}

/// A client transport session. Created in [`SessionState::None`], driven
/// to [`SessionState::Authenticating`] by [`Session::connect`], and
/// reusable after [`Session::disconnect`].
pub struct Session {
    pub(crate) config: Config,
    pub(crate) socket: Box<dyn Socket>,
    pub(crate) session_state: SessionState,
    pub(crate) dh_state: DhState,
    pub(crate) version: Option<ProtocolVersion>,
    pub(crate) client_banner: Option<String>,
    pub(crate) server_banner: Option<String>,
    pub(crate) openssh_version: u32,
    pub(crate) data_sink: DataSink,
    pub(crate) in_buffer: CryptoVec,
    pub(crate) in_seqn: Wrapping<u32>,
    pub(crate) payloads: VecDeque<CryptoVec>,
    pub(crate) out_payload: CryptoVec,
    pub(crate) out_buffer: SSHBuffer,
    pub(crate) session_id: Option<Sha256Hash>,
    pub(crate) current_crypto: Option<Box<CryptoContext>>,
    pub(crate) next_crypto: Option<Box<CryptoContext>>,
    pub(crate) dh_server_signature: Option<CryptoVec>,
    pub(crate) ignore_next_kex_packet: bool,
    pub(crate) alive: bool,
    pub(crate) connected: bool,
    pub(crate) last_error: Option<String>,
    pub(crate) issue_banner: Option<CryptoVec>,
    pub(crate) status: Option<Box<dyn FnMut(f32) + Send>>,
    pub(crate) capture: Option<Box<dyn FnMut(CaptureDirection, &[u8]) + Send>>,
    pub(crate) legacy_kex: Option<Box<dyn LegacyKex>>,
}

impl Session {
    /// A session over the default blocking TCP adapter.
    pub fn new(config: Config) -> Session {
        Session::with_socket(config, Box::new(TcpSocket::new()))
    }

    /// A session over a caller-provided socket adapter. Adopting an
    /// already-open adapter skips the connect step.
    pub fn with_socket(config: Config, socket: Box<dyn Socket>) -> Session {
        Session {
            config,
            socket,
            session_state: SessionState::None,
            dh_state: DhState::Init,
            version: None,
            client_banner: None,
            server_banner: None,
            openssh_version: 0,
            data_sink: DataSink::Banner,
            in_buffer: CryptoVec::new(),
            in_seqn: Wrapping(0),
            payloads: VecDeque::new(),
            out_payload: CryptoVec::new(),
            out_buffer: SSHBuffer::new(),
            session_id: None,
            current_crypto: None,
            next_crypto: Some(Box::new(CryptoContext::new())),
            dh_server_signature: None,
            ignore_next_kex_packet: false,
            alive: false,
            connected: false,
            last_error: None,
            issue_banner: None,
            status: None,
            capture: None,
            legacy_kex: None,
        }
    }

    /// Install a connection progress callback. It is called with
    /// non-decreasing values between 0.2 and 1.0 as the bring-up advances.
    pub fn set_connect_status_callback<F: FnMut(f32) + Send + 'static>(&mut self, callback: F) {
        self.status = Some(Box::new(callback));
    }

    /// Install a traffic capture sink. It receives every raw byte read
    /// from and written to the socket, banner included.
    pub fn set_capture_callback<F: FnMut(CaptureDirection, &[u8]) + Send + 'static>(
        &mut self,
        callback: F,
    ) {
        self.capture = Some(Box::new(callback));
    }

    /// Install the engine used when the peer only speaks protocol
    /// version 1. Without one, resolving to version 1 is an error.
    pub fn set_legacy_kex<K: LegacyKex + 'static>(&mut self, kex: K) {
        self.legacy_kex = Some(Box::new(kex));
    }

    /// The identification line received from the server, once there is one.
    pub fn server_banner(&self) -> Option<&str> {
        self.server_banner.as_deref()
    }

    /// The identification line this session sent, once there is one.
    pub fn client_banner(&self) -> Option<&str> {
        self.client_banner.as_deref()
    }

    /// The protocol version agreed with the peer.
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.version
    }

    /// The version of an OpenSSH peer, encoded as
    /// `(major << 16) | (minor << 8)`, or 0 for other peers.
    pub fn openssh_version(&self) -> u32 {
        self.openssh_version
    }

    /// A copy of the issue banner the server sent during authentication,
    /// if any. This is the disclaimer text servers show users who log in.
    pub fn issue_banner(&self) -> Option<String> {
        self.issue_banner
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn state(&self) -> SessionState {
        self.session_state
    }

    /// True between a successful socket bring-up and either an error or
    /// [`Session::disconnect`].
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// True once the transport is fully established.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The last error recorded on this session.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub(crate) fn set_status(&mut self, status: f32) {
        if let Some(ref mut callback) = self.status {
            callback(status)
        }
    }

    pub(crate) fn capture_bytes(&mut self, direction: CaptureDirection, bytes: &[u8]) {
        if let Some(ref mut callback) = self.capture {
            callback(direction, bytes)
        }
    }

    pub(crate) fn set_error(&mut self, error: &Error) {
        self.last_error = Some(error.to_string());
    }

    /// Clear everything a previous connection left behind. A session can
    /// be connected again after a disconnect or an error.
    pub(crate) fn reset(&mut self) {
        self.session_state = SessionState::None;
        self.dh_state = DhState::Init;
        self.version = None;
        self.client_banner = None;
        self.server_banner = None;
        self.openssh_version = 0;
        self.data_sink = DataSink::Banner;
        self.in_buffer.clear();
        self.in_seqn = Wrapping(0);
        self.payloads.clear();
        self.out_payload.clear();
        self.out_buffer = SSHBuffer::new();
        self.session_id = None;
        self.current_crypto = None;
        self.next_crypto = Some(Box::new(CryptoContext::new()));
        self.dh_server_signature = None;
        self.ignore_next_kex_packet = false;
        self.alive = false;
        self.connected = false;
        self.last_error = None;
        self.issue_banner = None;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.session_state)
            .field("dh_state", &self.dh_state)
            .field("version", &self.version)
            .field("server_banner", &self.server_banner)
            .field("alive", &self.alive)
            .finish()
    }
}
