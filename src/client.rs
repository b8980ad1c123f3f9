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

//! The connection orchestrator: drives a session from `None` to
//! `Authenticating` through banner exchange, algorithm negotiation and the
//! Diffie-Hellman handshake.

use crate::banner;
use crate::crypto::CryptoContext;
use crate::encoding::{Encoding, Reader};
use crate::key;
use crate::msg;
use crate::negotiation::{self, Select};
use crate::session::{DataSink, DhState, ProtocolVersion, Session, SessionState};
use crate::{Disconnect, Error};
use cryptovec::CryptoVec;

/// The engine run in place of the version 2 key exchange when the peer
/// only speaks protocol version 1. This crate recognizes such peers and
/// dispatches; it does not implement the version 1 exchange itself.
pub trait LegacyKex: Send {
    fn run(&mut self, session: &mut Session) -> Result<(), Error>;
}

fn default_client_id(version: ProtocolVersion) -> String {
    match version {
        ProtocolVersion::V2 => format!(
            "SSH-2.0-{}_{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
        ProtocolVersion::V1 => format!(
            "SSH-1.5-{}_{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
    }
}

impl Session {
    /// Connect to the server and drive the transport all the way to the
    /// authentication-ready state. On failure the error is also recorded
    /// on the session, the socket is closed and the session state is
    /// `Error`; the session can be connected again after that.
    pub fn connect(&mut self) -> Result<(), Error> {
        crate::init();
        self.reset();
        match self.try_connect() {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("ssh_connect: {}", e);
                self.set_error(&e);
                self.socket.close();
                self.alive = false;
                self.session_state = SessionState::Error;
                Err(e)
            }
        }
    }

    fn try_connect(&mut self) -> Result<(), Error> {
        if !self.socket.is_open() && self.config.host.is_none() {
            return Err(Error::HostnameRequired);
        }
        self.session_state = SessionState::Connecting;
        self.data_sink = DataSink::Banner;
        if self.socket.is_open() {
            debug!("Adopting pre-opened socket");
            self.socket_connected();
        } else {
            let host = self.config.host.clone().ok_or(Error::HostnameRequired)?;
            let port = self.config.port;
            let bind_addr = self.config.bind_addr.clone();
            self.socket.connect(&host, port, bind_addr.as_deref())?;
            self.socket_connected();
        }
        self.set_status(0.2);
        self.alive = true;

        debug!("Socket connected, now waiting for the callbacks to work");
        loop {
            self.connection_callback()?;
            if self.session_state == SessionState::Error
                || self.session_state == SessionState::Authenticating
            {
                break;
            }
            self.handle_packets()?;
            debug!("ssh_connect: current state: {:?}", self.session_state);
        }
        Ok(())
    }

    fn socket_connected(&mut self) {
        debug!("Socket connection callback: connected");
        self.session_state = SessionState::SocketConnected;
    }

    /// Called after every socket event or handshake step; runs whatever
    /// the current state makes possible.
    pub(crate) fn connection_callback(&mut self) -> Result<(), Error> {
        match self.session_state {
            SessionState::None | SessionState::Connecting | SessionState::SocketConnected => Ok(()),
            SessionState::BannerReceived => {
                let server_banner = self.server_banner.clone().ok_or(Error::Inconsistent)?;
                info!("SSH server banner: {}", server_banner);

                // Here we analyse the different protocols the server allows.
                let info = banner::analyze(&server_banner)?;
                self.openssh_version = info.openssh;
                self.set_status(0.4);

                // Here we decide which version of the protocol to use.
                let version = if info.ssh2 && self.config.ssh2 {
                    ProtocolVersion::V2
                } else if info.ssh1 && self.config.ssh1 {
                    ProtocolVersion::V1
                } else {
                    return Err(Error::NoVersion(server_banner));
                };
                self.version = Some(version);

                // From now on, the packet layer is handling incoming data.
                self.data_sink = DataSink::Packets;
                self.send_banner(version)?;
                self.set_status(0.5);
                self.session_state = SessionState::InitialKex;
                Ok(())
            }
            SessionState::InitialKex => {
                match self.version {
                    Some(ProtocolVersion::V2) => {
                        self.get_kex()?;
                        self.set_status(0.6);

                        self.list_kex();
                        self.set_kex()?;
                        self.send_kex()?;
                        self.set_status(0.8);

                        self.dh_handshake()?;
                        self.set_status(1.0);
                        self.connected = true;
                    }
                    Some(ProtocolVersion::V1) => {
                        let mut legacy = match self.legacy_kex.take() {
                            Some(k) => k,
                            None => {
                                let banner = self.server_banner.clone().unwrap_or_default();
                                return Err(Error::NoVersion(banner));
                            }
                        };
                        let result = legacy.run(self);
                        self.legacy_kex = Some(legacy);
                        result?;
                        self.set_status(0.6);
                        self.connected = true;
                    }
                    None => return Err(Error::InvalidState),
                }
                self.session_state = SessionState::Authenticating;
                Ok(())
            }
            SessionState::Authenticating => Ok(()),
            SessionState::Error => Err(Error::InvalidState),
        }
    }

    /// Send our identification line, and record both identification
    /// strings for the exchange hash.
    fn send_banner(&mut self, version: ProtocolVersion) -> Result<(), Error> {
        let banner = match self.config.client_id {
            Some(ref b) => b.clone(),
            None => default_client_id(version),
        };
        // The cap covers whichever banner was chosen above, CRLF included.
        if banner.len() + 2 > banner::MAX_BANNER_LEN {
            warn!("Banner to send is over {} bytes", banner::MAX_BANNER_LEN);
            return Err(Error::Inconsistent);
        }
        {
            let next = self.next_crypto.as_deref_mut().ok_or(Error::Inconsistent)?;
            next.exchange.client_id.clear();
            next.exchange.client_id.extend(banner.as_bytes());
            next.exchange.server_id.clear();
            if let Some(ref server_banner) = self.server_banner {
                next.exchange.server_id.extend(server_banner.as_bytes());
            }
        }
        self.out_buffer.send_ssh_id(banner.as_bytes());
        self.packet_flush()?;
        debug!("Sent banner: {}", banner);
        self.client_banner = Some(banner);
        Ok(())
    }

    /// Wait for the peer's KEXINIT and keep its payload for the exchange
    /// hash.
    fn get_kex(&mut self) -> Result<(), Error> {
        let payload = self.packet_wait(msg::KEXINIT)?;
        debug!("Received SSH_MSG_KEXINIT");
        let next = self.next_crypto.as_deref_mut().ok_or(Error::Inconsistent)?;
        next.exchange.server_kex_init.clear();
        next.exchange.server_kex_init.extend(&payload);
        Ok(())
    }

    fn list_kex(&self) {
        debug!("kex preferences: {:?}", self.config.preferred);
        if let Some(ref next) = self.next_crypto {
            debug!(
                "peer kexinit payload: {} bytes",
                next.exchange.server_kex_init.len()
            );
        }
    }

    /// Pick the algorithms for this exchange from the peer's KEXINIT.
    fn set_kex(&mut self) -> Result<(), Error> {
        let next = self.next_crypto.as_deref_mut().ok_or(Error::Inconsistent)?;
        let names =
            negotiation::Client::read_kex(&next.exchange.server_kex_init, &self.config.preferred)?;
        debug!("Negotiated algorithms: {:?}", names);
        self.ignore_next_kex_packet = names.ignore_guessed;
        next.names = Some(names);
        Ok(())
    }

    /// Send our KEXINIT and keep its payload for the exchange hash.
    fn send_kex(&mut self) -> Result<(), Error> {
        let mut payload = CryptoVec::new();
        negotiation::write_kex(&self.config.preferred, &mut payload)?;
        {
            let next = self.next_crypto.as_deref_mut().ok_or(Error::Inconsistent)?;
            next.exchange.client_kex_init.clear();
            next.exchange.client_kex_init.extend(&payload);
        }
        self.out_payload.clear();
        self.out_payload.extend(&payload);
        self.packet_send()?;
        self.packet_flush()?;
        debug!("SSH_MSG_KEXINIT sent");
        Ok(())
    }

    /// The Diffie-Hellman handshake proper. Re-entrant: every call starts
    /// at the current state and keeps going for as long as progress is
    /// possible without a network event.
    fn dh_handshake(&mut self) -> Result<(), Error> {
        loop {
            match self.dh_state {
                DhState::Init => {
                    {
                        let next = self.next_crypto.as_deref_mut().ok_or(Error::Inconsistent)?;
                        next.dh.generate_client()?;
                        self.out_payload.clear();
                        self.out_payload.push(msg::KEXDH_INIT);
                        self.out_payload.extend_ssh_mpint(next.dh.e());
                    }
                    self.packet_send()?;
                    self.dh_state = DhState::InitToSend;
                }
                DhState::InitToSend => {
                    self.packet_flush()?;
                    self.dh_state = DhState::InitSent;
                }
                DhState::InitSent => {
                    let payload = self.packet_wait(msg::KEXDH_REPLY)?;
                    debug!("Received SSH_MSG_KEXDH_REPLY");
                    let mut r = payload.reader(1);
                    let pubkey_blob = r.read_string().map_err(|_| Error::NoPublicKey)?;
                    let f = r.read_string().map_err(|_| Error::NoF)?;
                    let signature = r.read_string().map_err(|_| Error::NoSignature)?;
                    if signature.is_empty() {
                        return Err(Error::NoSignature);
                    }
                    let host_key = key::parse_public_key(pubkey_blob)?;
                    debug!("Server host key: {:?}", host_key);
                    {
                        let next = self.next_crypto.as_deref_mut().ok_or(Error::Inconsistent)?;
                        next.server_host_key_blob.clear();
                        next.server_host_key_blob.extend(pubkey_blob);
                        next.server_host_key = Some(host_key);
                        next.dh.import_f(f)?;
                        // Verified after the session id is known.
                        self.dh_server_signature = Some(CryptoVec::from_slice(signature));
                        next.dh.build_k()?;
                    }
                    self.out_payload.clear();
                    self.out_payload.push(msg::NEWKEYS);
                    self.packet_send()?;
                    self.dh_state = DhState::NewkeysToSend;
                }
                DhState::NewkeysToSend => {
                    self.packet_flush()?;
                    debug!("SSH_MSG_NEWKEYS sent");
                    self.dh_state = DhState::NewkeysSent;
                }
                DhState::NewkeysSent => {
                    self.packet_wait(msg::NEWKEYS)?;
                    debug!("Received SSH_MSG_NEWKEYS");

                    self.make_sessionid()?;
                    // The cipher choice fixes the key lengths needed by
                    // generate_session_keys.
                    self.crypt_set_algorithms()?;
                    self.generate_session_keys()?;

                    let signature = self.dh_server_signature.take().ok_or(Error::NoSignature)?;
                    self.signature_verify(&signature)?;
                    drop(signature);

                    // NEWKEYS received; switch next_crypto and
                    // current_crypto.
                    self.current_crypto = self.next_crypto.take();
                    self.next_crypto = Some(Box::new(CryptoContext::new()));
                    self.dh_state = DhState::Finished;
                    return Ok(());
                }
                DhState::Finished => {
                    return Err(Error::InvalidState);
                }
            }
        }
    }

    /// Ask the server for a service, typically `ssh-userauth`, and wait
    /// for it to be accepted. The only bridge this crate exposes to the
    /// authentication and channel layers.
    pub fn service_request(&mut self, service: &str) -> Result<(), Error> {
        match self.try_service_request(service) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("ssh_service_request: {}", e);
                self.set_error(&e);
                self.session_state = SessionState::Error;
                Err(e)
            }
        }
    }

    fn try_service_request(&mut self, service: &str) -> Result<(), Error> {
        self.out_payload.clear();
        self.out_payload.push(msg::SERVICE_REQUEST);
        self.out_payload.extend_ssh_string(service.as_bytes());
        self.packet_send()?;
        self.packet_flush()?;
        debug!("Sent SSH_MSG_SERVICE_REQUEST (service {})", service);

        let payload = self.packet_wait(msg::SERVICE_ACCEPT).map_err(|e| match e {
            Error::IO(_) | Error::Disconnect(_) | Error::HUP => e,
            _ => Error::ServiceDenied,
        })?;
        let mut r = payload.reader(1);
        let accepted = r.read_string().map_err(|_| Error::ServiceDenied)?;
        if accepted != service.as_bytes() {
            return Err(Error::ServiceDenied);
        }
        debug!("Received SSH_MSG_SERVICE_ACCEPT (service {})", service);
        Ok(())
    }

    /// Tell the peer we are leaving, close the socket and mark the
    /// session reusable. Idempotent: calling it on a closed session does
    /// nothing.
    pub fn disconnect(&mut self) {
        if self.socket.is_open() {
            self.out_payload.clear();
            self.out_payload.push(msg::DISCONNECT);
            self.out_payload.push_u32_be(Disconnect::ByApplication as u32);
            self.out_payload.extend_ssh_string(b"Bye Bye");
            // Best effort; the peer may be gone already.
            let _ = self.packet_send();
            let _ = self.packet_flush();
            self.socket.close();
        }
        self.alive = false;
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher;
    use crate::crypto::Exchange;
    use crate::kex;
    use crate::socket::Socket;
    use crate::sshbuffer::SSHBuffer;
    use crate::Config;
    use num_bigint::BigUint;
    use rand::RngCore;
    use std::num::Wrapping;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// The server side of the exchange, spoken byte-for-byte through the
    /// crate's own wire primitives.
    struct TestServer {
        host_key: key::KeyPair,
        banner: String,
        raw_greeting: Option<Vec<u8>>,
        send_kexinit: bool,
        corrupt_signature: bool,
        duplicate_reply: bool,
        chatter_before_accept: bool,
        accept_service: Option<&'static str>,

        output: Vec<u8>,
        buffer: Vec<u8>,
        out: SSHBuffer,
        in_seqn: Wrapping<u32>,
        read_encrypted: bool,
        write_encrypted: bool,
        pair: Option<cipher::CipherPair>,

        client_id: Option<Vec<u8>>,
        client_kexinit: Option<Vec<u8>>,
        server_kexinit: CryptoVec,
        received_disconnect: Option<(u32, String)>,
    }

    impl TestServer {
        fn new(banner: &str) -> Self {
            TestServer {
                host_key: key::KeyPair::generate_ed25519(),
                banner: banner.to_string(),
                raw_greeting: None,
                send_kexinit: true,
                corrupt_signature: false,
                duplicate_reply: false,
                chatter_before_accept: false,
                accept_service: None,
                output: Vec::new(),
                buffer: Vec::new(),
                out: SSHBuffer::new(),
                in_seqn: Wrapping(0),
                read_encrypted: false,
                write_encrypted: false,
                pair: None,
                client_id: None,
                client_kexinit: None,
                server_kexinit: CryptoVec::new(),
                received_disconnect: None,
            }
        }

        fn start(&mut self) {
            if let Some(raw) = self.raw_greeting.take() {
                self.output.extend_from_slice(&raw);
                return;
            }
            self.output.extend_from_slice(self.banner.as_bytes());
            self.output.extend_from_slice(b"\r\n");
            if self.send_kexinit {
                let mut kexinit = CryptoVec::new();
                negotiation::write_kex(&negotiation::Preferred::DEFAULT, &mut kexinit).unwrap();
                self.server_kexinit.extend(&kexinit);
                self.push_packet(&kexinit);
            }
        }

        fn push_packet(&mut self, payload: &[u8]) {
            {
                let pair = if self.write_encrypted {
                    self.pair.as_ref().unwrap()
                } else {
                    &cipher::CLEAR_PAIR
                };
                pair.write(payload, &mut self.out);
            }
            self.output.extend_from_slice(&self.out.buffer);
            self.out.buffer.clear();
        }

        fn receive(&mut self, bytes: &[u8]) {
            self.buffer.extend_from_slice(bytes);
            loop {
                if self.client_id.is_none() {
                    match self.buffer.iter().position(|&c| c == b'\n') {
                        Some(i) => {
                            let mut line = self.buffer[..i].to_vec();
                            if line.last() == Some(&b'\r') {
                                line.pop();
                            }
                            self.client_id = Some(line);
                            self.buffer.drain(..=i);
                            continue;
                        }
                        None => return,
                    }
                }
                let mut payload = CryptoVec::new();
                let read = {
                    let pair = if self.read_encrypted {
                        self.pair.as_ref().unwrap()
                    } else {
                        &cipher::CLEAR_PAIR
                    };
                    cipher::read(pair, &self.buffer, self.in_seqn, &mut payload).unwrap()
                };
                match read {
                    Some(consumed) => {
                        self.in_seqn += Wrapping(1);
                        self.buffer.drain(..consumed);
                        if !payload.is_empty() {
                            self.handle(&payload);
                        }
                    }
                    None => return,
                }
            }
        }

        fn handle(&mut self, payload: &[u8]) {
            match payload[0] {
                msg::KEXINIT => {
                    self.client_kexinit = Some(payload.to_vec());
                }
                msg::KEXDH_INIT => self.kexdh_reply(payload),
                msg::NEWKEYS => {
                    self.read_encrypted = true;
                }
                msg::SERVICE_REQUEST => {
                    let mut r = payload.reader(1);
                    let requested = r.read_string().unwrap().to_vec();
                    if self.chatter_before_accept {
                        self.push_packet(&[msg::IGNORE]);
                        let mut auth_banner = CryptoVec::new();
                        auth_banner.push(msg::USERAUTH_BANNER);
                        auth_banner.extend_ssh_string(b"unauthorized access prohibited");
                        auth_banner.extend_ssh_string(b"");
                        self.push_packet(&auth_banner);
                    }
                    let echo: &[u8] = match self.accept_service {
                        Some(name) => name.as_bytes(),
                        None => &requested,
                    };
                    let mut accept = CryptoVec::new();
                    accept.push(msg::SERVICE_ACCEPT);
                    accept.extend_ssh_string(echo);
                    self.push_packet(&accept);
                }
                msg::DISCONNECT => {
                    let mut r = payload.reader(1);
                    let reason = r.read_u32().unwrap();
                    let desc = String::from_utf8(r.read_string().unwrap().to_vec()).unwrap();
                    self.received_disconnect = Some((reason, desc));
                }
                other => panic!("test server got unexpected packet type {}", other),
            }
        }

        fn kexdh_reply(&mut self, payload: &[u8]) {
            let mut r = payload.reader(1);
            let e_wire = r.read_string().unwrap();
            let e = BigUint::from_bytes_be(e_wire);

            let mut y = [0u8; 64];
            rand::thread_rng().fill_bytes(&mut y);
            let y = BigUint::from_bytes_be(&y);
            let f = kex::GROUP_G.modpow(&y, &kex::GROUP14_P);
            let k = e.modpow(&y, &kex::GROUP14_P);
            let e = e.to_bytes_be();
            let f = f.to_bytes_be();
            let k = k.to_bytes_be();

            let mut host_blob = CryptoVec::new();
            self.host_key.clone_public_key().push_to(&mut host_blob);

            let mut exchange = Exchange::new();
            exchange.client_id.extend(self.client_id.as_ref().unwrap());
            exchange.server_id.extend(self.banner.as_bytes());
            exchange
                .client_kex_init
                .extend(self.client_kexinit.as_ref().unwrap());
            exchange.server_kex_init.extend(&self.server_kexinit);
            let hash = kex::exchange_hash(&host_blob, &exchange, &e, &f, &k);

            let mut signature = CryptoVec::new();
            if self.corrupt_signature {
                self.host_key.sign_to(b"not the exchange hash", &mut signature);
            } else {
                self.host_key.sign_to(hash.as_ref(), &mut signature);
            }

            let mut reply = CryptoVec::new();
            reply.push(msg::KEXDH_REPLY);
            reply.extend_ssh_string(&host_blob);
            reply.extend_ssh_mpint(&f);
            reply.extend_ssh_string(&signature);
            self.push_packet(&reply);
            if self.duplicate_reply {
                self.push_packet(&reply);
            } else {
                self.push_packet(&[msg::NEWKEYS]);
            }

            self.pair = Some(
                kex::derive_keys(&k, &hash, &hash, cipher::chacha20poly1305::NAME, true).unwrap(),
            );
            self.write_encrypted = true;
        }
    }

    struct MockSocket {
        server: Arc<Mutex<TestServer>>,
        open: Arc<AtomicBool>,
        pos: usize,
    }

    impl MockSocket {
        fn new(server: TestServer) -> (Self, Arc<Mutex<TestServer>>, Arc<AtomicBool>) {
            let server = Arc::new(Mutex::new(server));
            let open = Arc::new(AtomicBool::new(false));
            let socket = MockSocket {
                server: server.clone(),
                open: open.clone(),
                pos: 0,
            };
            (socket, server, open)
        }
    }

    impl Socket for MockSocket {
        fn connect(
            &mut self,
            _host: &str,
            _port: u16,
            _bind_addr: Option<&str>,
        ) -> Result<(), std::io::Error> {
            self.open.store(true, Ordering::SeqCst);
            self.server.lock().unwrap().start();
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, std::io::Error> {
            let server = self.server.lock().unwrap();
            if self.pos >= server.output.len() {
                // The scripted server has nothing left to say.
                return Ok(0);
            }
            let n = buf.len().min(server.output.len() - self.pos);
            buf[..n].copy_from_slice(&server.output[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn write_all(&mut self, buf: &[u8]) -> Result<(), std::io::Error> {
            self.server.lock().unwrap().receive(buf);
            Ok(())
        }

        fn flush(&mut self) -> Result<(), std::io::Error> {
            Ok(())
        }

        fn close(&mut self) {
            self.open.store(false, Ordering::SeqCst);
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        session: Session,
        server: Arc<Mutex<TestServer>>,
        open: Arc<AtomicBool>,
        progress: Arc<Mutex<Vec<f32>>>,
    }

    fn session_with(server: TestServer, config: Config) -> Harness {
        let _ = env_logger::try_init();
        let mut config = config;
        if config.host.is_none() {
            config.host = Some("test".to_string());
        }
        let (socket, server, open) = MockSocket::new(server);
        let mut session = Session::with_socket(config, Box::new(socket));
        let progress = Arc::new(Mutex::new(Vec::new()));
        let progress2 = progress.clone();
        session.set_connect_status_callback(move |s| progress2.lock().unwrap().push(s));
        Harness {
            session,
            server,
            open,
            progress,
        }
    }

    struct MockV1 {
        ran: Arc<AtomicBool>,
    }

    impl LegacyKex for MockV1 {
        fn run(&mut self, _session: &mut Session) -> Result<(), Error> {
            self.ran.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn happy_path_v2() {
        let mut h = session_with(TestServer::new("SSH-2.0-OpenSSH_7.4"), Config::default());
        h.session.connect().unwrap();

        assert_eq!(h.session.state(), SessionState::Authenticating);
        assert_eq!(h.session.openssh_version(), 0x00070400);
        assert_eq!(h.session.protocol_version(), Some(ProtocolVersion::V2));
        assert!(h.session.is_alive());
        assert!(h.session.is_connected());
        assert_eq!(
            *h.progress.lock().unwrap(),
            vec![0.2, 0.4, 0.5, 0.6, 0.8, 1.0]
        );

        // The new keys are installed and a fresh empty context is waiting
        // for the next exchange.
        assert_eq!(h.session.dh_state, DhState::Finished);
        let current = h.session.current_crypto.as_ref().unwrap();
        assert!(current.names.is_some());
        assert!(current.cipher.is_some());
        assert!(current.exchange_hash.is_some());
        let next = h.session.next_crypto.as_ref().unwrap();
        assert!(next.names.is_none());
        assert!(next.cipher.is_none());
        assert!(h.session.dh_server_signature.is_none());

        // Our own banner parses back through the receive path.
        let client_banner = h.session.client_banner().unwrap().to_string();
        let mut wire = client_banner.clone().into_bytes();
        wire.extend_from_slice(b"\r\n");
        match banner::scan_line(&wire).unwrap() {
            banner::Scan::Complete { line, .. } => assert_eq!(line, client_banner),
            _ => panic!("banner should parse back"),
        }
        assert_eq!(
            h.server.lock().unwrap().client_id.as_deref(),
            Some(client_banner.as_bytes())
        );
    }

    #[test]
    fn service_request_roundtrip() {
        let mut h = session_with(TestServer::new("SSH-2.0-OpenSSH_8.9"), Config::default());
        h.session.connect().unwrap();
        h.session.service_request("ssh-userauth").unwrap();
        assert_eq!(h.session.state(), SessionState::Authenticating);
    }

    #[test]
    fn service_request_denied_on_wrong_echo() {
        let mut server = TestServer::new("SSH-2.0-OpenSSH_8.9");
        server.accept_service = Some("ssh-connection");
        let mut h = session_with(server, Config::default());
        h.session.connect().unwrap();
        match h.session.service_request("ssh-userauth") {
            Err(Error::ServiceDenied) => {}
            r => panic!("expected ServiceDenied, got {:?}", r.map(|_| ())),
        }
        assert_eq!(h.session.state(), SessionState::Error);
        assert!(h.session.last_error().unwrap().contains("SERVICE_ACCEPT"));
    }

    #[test]
    fn transport_chatter_is_absorbed_and_banner_stored() {
        let mut server = TestServer::new("SSH-2.0-OpenSSH_8.9");
        server.chatter_before_accept = true;
        let mut h = session_with(server, Config::default());
        h.session.connect().unwrap();
        h.session.service_request("ssh-userauth").unwrap();
        assert_eq!(
            h.session.issue_banner().as_deref(),
            Some("unauthorized access prohibited")
        );
    }

    #[test]
    fn capture_sees_both_directions() {
        let mut h = session_with(TestServer::new("SSH-2.0-OpenSSH_7.4"), Config::default());
        let captured = Arc::new(Mutex::new((0usize, 0usize)));
        let captured2 = captured.clone();
        h.session.set_capture_callback(move |direction, bytes| {
            let mut c = captured2.lock().unwrap();
            match direction {
                crate::CaptureDirection::Incoming => c.0 += bytes.len(),
                crate::CaptureDirection::Outgoing => c.1 += bytes.len(),
            }
        });
        h.session.connect().unwrap();
        let c = captured.lock().unwrap();
        assert!(c.0 > 0);
        assert!(c.1 > 0);
    }

    #[test]
    fn straddle_banner_prefers_v2() {
        let mut config = Config::default();
        config.ssh1 = true;
        let mut h = session_with(TestServer::new("SSH-1.99-foo"), config);
        h.session.connect().unwrap();
        assert_eq!(h.session.protocol_version(), Some(ProtocolVersion::V2));
        assert_eq!(h.session.state(), SessionState::Authenticating);
        assert_eq!(
            *h.progress.lock().unwrap(),
            vec![0.2, 0.4, 0.5, 0.6, 0.8, 1.0]
        );
    }

    #[test]
    fn straddle_banner_falls_back_to_v1() {
        let mut server = TestServer::new("SSH-1.99-foo");
        server.send_kexinit = false;
        let mut config = Config::default();
        config.ssh1 = true;
        config.ssh2 = false;
        let mut h = session_with(server, config);
        let ran = Arc::new(AtomicBool::new(false));
        h.session.set_legacy_kex(MockV1 { ran: ran.clone() });

        h.session.connect().unwrap();
        assert_eq!(h.session.protocol_version(), Some(ProtocolVersion::V1));
        assert_eq!(h.session.state(), SessionState::Authenticating);
        assert!(ran.load(Ordering::SeqCst));
        // The DH machine never ran.
        assert_eq!(h.session.dh_state, DhState::Init);
        assert_eq!(*h.progress.lock().unwrap(), vec![0.2, 0.4, 0.5, 0.6]);
        // And the banner we sent was the version 1 one.
        let sent = h.server.lock().unwrap().client_id.clone().unwrap();
        assert!(sent.starts_with(b"SSH-1.5-"));
    }

    #[test]
    fn v1_without_engine_is_an_error() {
        let mut server = TestServer::new("SSH-1.5-old");
        server.send_kexinit = false;
        let mut config = Config::default();
        config.ssh1 = true;
        config.ssh2 = false;
        let mut h = session_with(server, config);
        match h.session.connect() {
            Err(Error::NoVersion(_)) => {}
            r => panic!("expected NoVersion, got {:?}", r.map(|_| ())),
        }
        assert_eq!(h.session.state(), SessionState::Error);
    }

    #[test]
    fn protocol_mismatch() {
        let mut server = TestServer::new("");
        server.raw_greeting = Some(b"hello world\r\n".to_vec());
        let mut h = session_with(server, Config::default());
        match h.session.connect() {
            Err(Error::ProtocolMismatch(_)) => {}
            r => panic!("expected ProtocolMismatch, got {:?}", r.map(|_| ())),
        }
        assert_eq!(h.session.state(), SessionState::Error);
        assert!(h.session.last_error().unwrap().contains("Protocol mismatch"));
        assert!(!h.session.is_alive());
        assert!(!h.open.load(Ordering::SeqCst));
        assert_eq!(*h.progress.lock().unwrap(), vec![0.2]);
    }

    #[test]
    fn no_usable_version() {
        let mut server = TestServer::new("SSH-1.5-old");
        server.send_kexinit = false;
        let mut h = session_with(server, Config::default());
        match h.session.connect() {
            Err(Error::NoVersion(banner)) => assert_eq!(banner, "SSH-1.5-old"),
            r => panic!("expected NoVersion, got {:?}", r.map(|_| ())),
        }
        assert_eq!(h.session.state(), SessionState::Error);
    }

    #[test]
    fn overlong_banner() {
        let mut server = TestServer::new("");
        server.raw_greeting = Some(vec![b'x'; 129]);
        let mut h = session_with(server, Config::default());
        match h.session.connect() {
            Err(Error::BannerTooLarge) => {}
            r => panic!("expected BannerTooLarge, got {:?}", r.map(|_| ())),
        }
        assert_eq!(h.session.state(), SessionState::Error);
        assert_eq!(*h.progress.lock().unwrap(), vec![0.2]);
    }

    #[test]
    fn overlong_configured_banner_is_rejected() {
        let mut config = Config::default();
        config.client_id = Some(format!("SSH-2.0-{}", "x".repeat(300)));
        let mut h = session_with(TestServer::new("SSH-2.0-OpenSSH_7.4"), config);
        assert!(h.session.connect().is_err());
        assert_eq!(h.session.state(), SessionState::Error);
        // Nothing was sent past the cap.
        assert!(h.server.lock().unwrap().client_id.is_none());
    }

    #[test]
    fn bad_host_signature() {
        let mut server = TestServer::new("SSH-2.0-OpenSSH_7.4");
        server.corrupt_signature = true;
        let mut h = session_with(server, Config::default());
        match h.session.connect() {
            Err(Error::WrongServerSig) => {}
            r => panic!("expected WrongServerSig, got {:?}", r.map(|_| ())),
        }
        assert_eq!(h.session.state(), SessionState::Error);
        // The swap never happened and the stored signature was wiped.
        assert!(h.session.current_crypto.is_none());
        assert!(h.session.dh_server_signature.is_none());
        assert!(!h.session.is_connected());
    }

    #[test]
    fn missing_hostname() {
        let _ = env_logger::try_init();
        let mut session = Session::new(Config::default());
        match session.connect() {
            Err(Error::HostnameRequired) => {}
            r => panic!("expected HostnameRequired, got {:?}", r.map(|_| ())),
        }
        assert_eq!(session.state(), SessionState::Error);
    }

    #[test]
    fn disconnect_is_idempotent_and_announced() {
        let mut h = session_with(TestServer::new("SSH-2.0-OpenSSH_7.4"), Config::default());
        h.session.connect().unwrap();

        h.session.disconnect();
        assert!(!h.session.is_alive());
        assert!(!h.open.load(Ordering::SeqCst));
        let (reason, desc) = h
            .server
            .lock()
            .unwrap()
            .received_disconnect
            .clone()
            .expect("server should have seen DISCONNECT");
        assert_eq!(reason, Disconnect::ByApplication as u32);
        assert_eq!(desc, "Bye Bye");

        // A second call is a no-op.
        h.session.disconnect();
        assert!(!h.session.is_alive());
    }

    #[test]
    fn session_is_reusable_after_disconnect() {
        let mut h = session_with(TestServer::new("SSH-2.0-OpenSSH_7.4"), Config::default());
        h.session.connect().unwrap();
        h.session.disconnect();

        // Swap in a fresh scripted server and connect again.
        let (socket, _server, _open) = MockSocket::new(TestServer::new("SSH-2.0-OpenSSH_9.0"));
        h.session.socket = Box::new(socket);
        h.session.connect().unwrap();
        assert_eq!(h.session.state(), SessionState::Authenticating);
        assert_eq!(h.session.openssh_version(), 0x00090000);
    }

    #[test]
    fn duplicate_kexdh_reply_is_rejected() {
        // A second KEXDH_REPLY arrives while the engine is waiting for
        // NEWKEYS; the wait is one-shot, so this is a protocol violation.
        let mut server = TestServer::new("SSH-2.0-OpenSSH_7.4");
        server.duplicate_reply = true;
        let mut h = session_with(server, Config::default());
        match h.session.connect() {
            Err(Error::Inconsistent) => {}
            r => panic!("expected Inconsistent, got {:?}", r.map(|_| ())),
        }
        assert_eq!(h.session.state(), SessionState::Error);
    }
}
