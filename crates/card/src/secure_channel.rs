use std::fmt;

use bytes::{Bytes, BytesMut};
use cipher::{Iv, Key};
use k256::{PublicKey, SecretKey, ecdh::SharedSecret};
use rand_v8::thread_rng;
use tracing::{debug, trace, warn};

use crate::{
    Error, Result,
    apdu::{Command, Response},
    crypto::{PhononScp, decrypt_data, encrypt_data, generate_ecdh_shared_secret},
    session::Session,
};

/// Scalar of the fixed debug key used by
/// [`SecureChannel::generate_static_secret_insecure`].
const INSECURE_STATIC_SCALAR: [u8; 32] = [0x41; 32];

/// Lifecycle of a [`SecureChannel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No key agreement has happened yet
    Unpaired,
    /// An ECDH secret with the peer is available
    KeyAgreed,
    /// Session keys are installed, messages can flow
    Open,
    /// Closed and wiped, must be re-established
    Closed,
}

/// One side of an authenticated, encrypted channel.
///
/// Both ends of a channel are separate `SecureChannel` values holding the same
/// session keys. Every encrypt or decrypt replaces the IV with the MAC of the
/// last ciphertext, so frames must be processed strictly in order.
pub struct SecureChannel {
    state: ChannelState,
    /// Our key for the ECDH exchange
    private_key: Option<SecretKey>,
    shared_secret: Option<SharedSecret>,
    session: Option<Session>,
}

impl fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("state", &self.state)
            .field("has_shared_secret", &self.shared_secret.is_some())
            .finish()
    }
}

impl Default for SecureChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureChannel {
    pub const fn new() -> Self {
        Self {
            state: ChannelState::Unpaired,
            private_key: None,
            shared_secret: None,
            session: None,
        }
    }

    pub const fn state(&self) -> ChannelState {
        self.state
    }

    pub const fn is_open(&self) -> bool {
        matches!(self.state, ChannelState::Open)
    }

    /// Generate a fresh key pair and agree on a secret with `peer`.
    pub fn generate_ephemeral_secret(&mut self, peer: &PublicKey) {
        self.agree(SecretKey::random(&mut thread_rng()), peer);
    }

    /// Agree on a secret with `peer` using a fixed, publicly known key.
    ///
    /// Anyone can derive this secret. It exists only so that captured
    /// exchanges can be decrypted while debugging against real cards.
    pub fn generate_static_secret_insecure(&mut self, peer: &PublicKey) -> Result<()> {
        warn!("using the static insecure key for ECDH, traffic is NOT confidential");
        let key = SecretKey::from_slice(&INSECURE_STATIC_SCALAR)?;
        self.agree(key, peer);
        Ok(())
    }

    /// Agree on a secret with `peer` using a caller supplied key.
    pub fn agree(&mut self, private_key: SecretKey, peer: &PublicKey) {
        self.shared_secret = Some(generate_ecdh_shared_secret(&private_key, peer));
        self.private_key = Some(private_key);
        self.session = None;
        self.state = ChannelState::KeyAgreed;
        debug!("ECDH secret agreed");
    }

    /// Our side of the key agreement, if one has happened.
    pub fn public_key(&self) -> Option<PublicKey> {
        self.private_key.as_ref().map(SecretKey::public_key)
    }

    pub fn shared_secret(&self) -> Result<&SharedSecret> {
        self.shared_secret
            .as_ref()
            .ok_or(Error::KeyAgreementRequired)
    }

    /// Install session keys and open the channel.
    pub fn install_session_keys(
        &mut self,
        iv: Iv<PhononScp>,
        enc_key: Key<PhononScp>,
        mac_key: Key<PhononScp>,
    ) {
        self.session = Some(Session::new(enc_key, mac_key, iv));
        self.state = ChannelState::Open;
        debug!("secure channel open");
    }

    /// Current chained IV
    pub fn iv(&self) -> Option<&Iv<PhononScp>> {
        self.session.as_ref().map(Session::iv)
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        match (&self.state, self.session.as_mut()) {
            (ChannelState::Open, Some(session)) => Ok(session),
            _ => Err(Error::SecureChannelNotOpen),
        }
    }

    /// Encrypt `plaintext` and return `mac || ciphertext`.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Bytes> {
        let session = self.session_mut()?;

        let ciphertext = encrypt_data(
            &mut BytesMut::from(plaintext),
            session.keys().enc(),
            session.iv(),
        )?;
        let mac = session.mac(&ciphertext)?;
        session.set_iv(mac);

        let mut frame = BytesMut::with_capacity(16 + ciphertext.len());
        frame.extend_from_slice(&mac);
        frame.extend_from_slice(&ciphertext);
        trace!(plaintext_len = plaintext.len(), frame_len = frame.len(), "encrypted");
        Ok(frame.freeze())
    }

    /// Check the MAC of `mac || ciphertext` and decrypt it.
    ///
    /// The IV only advances when the frame authenticates and decrypts. A
    /// frame that fails the MAC, repeats an earlier MAC or does not decrypt
    /// closes the channel; it has to be opened again from a fresh pairing
    /// exchange.
    pub fn decrypt(&mut self, frame: &[u8]) -> Result<Bytes> {
        let session = self.session_mut()?;

        if frame.len() < 16 {
            return Err(Error::InvalidResponseLength {
                expected: 16,
                actual: frame.len(),
            });
        }
        let (mac, ciphertext) = frame.split_at(16);

        match Self::open_frame(session, mac, ciphertext) {
            Ok(plaintext) => {
                trace!(frame_len = frame.len(), plaintext_len = plaintext.len(), "decrypted");
                Ok(plaintext)
            }
            Err(err) => {
                warn!(%err, "secure channel frame rejected, closing channel");
                self.close();
                Err(err)
            }
        }
    }

    fn open_frame(session: &mut Session, mac: &[u8], ciphertext: &[u8]) -> Result<Bytes> {
        let expected = session.mac(ciphertext)?;
        if expected.as_slice() != mac || session.has_seen(&expected) {
            return Err(Error::InvalidResponseMac);
        }

        let plaintext = decrypt_data(
            &mut BytesMut::from(ciphertext),
            session.keys().enc(),
            session.iv(),
        )?;
        session.set_iv(expected);
        Ok(plaintext)
    }

    /// Close the channel and wipe all key material.
    pub fn close(&mut self) {
        self.session = None;
        self.shared_secret = None;
        self.private_key = None;
        self.state = ChannelState::Closed;
        debug!("secure channel closed");
    }

    /// Replace the command data with its encrypted form.
    pub fn protect_command(&mut self, command: Command) -> Result<Command> {
        let encrypted = self.encrypt(command.data())?;
        trace!(
            "Encrypted command: cla={:02X}, ins={:02X}, p1={:02X}, p2={:02X}, data_len={}",
            command.class(),
            command.instruction(),
            command.p1(),
            command.p2(),
            encrypted.len()
        );
        command.with_data(encrypted)
    }

    /// Unwrap a secure response.
    ///
    /// The outer status must be `9000`; the decrypted payload carries the
    /// inner `data || sw` that the caller actually cares about. Any other
    /// outer status means the card did not take the frame, so the chained IVs
    /// no longer agree and the channel is closed.
    pub fn process_response(&mut self, response: Response) -> Result<Response> {
        let response = match response.check() {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, "card refused a secure frame, closing channel");
                self.close();
                return Err(err);
            }
        };
        let plaintext = self.decrypt(response.data())?;
        Response::from_bytes(&plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::random_salt;
    use crate::status::StatusWord;

    fn channel_pair() -> (SecureChannel, SecureChannel) {
        let enc_key =
            hex::decode("FDBCB1637597CF3F8F5E8263007D4E45F64C12D44066D4576EB1443D60AEF441")
                .unwrap();
        let mac_key =
            hex::decode("2FB70219E6635EE0958AB3F7A428BA87E8CD6E6F873A5725A55F25B102D0F1F7")
                .unwrap();
        let iv = hex::decode("627E64358FA9BDCDAD4442BD8006E0A5").unwrap();

        let mut host = SecureChannel::new();
        let mut card = SecureChannel::new();
        for channel in [&mut host, &mut card] {
            channel.install_session_keys(
                *Iv::<PhononScp>::from_slice(&iv),
                *Key::<PhononScp>::from_slice(&enc_key),
                *Key::<PhononScp>::from_slice(&mac_key),
            );
        }
        (host, card)
    }

    #[test]
    fn test_not_open() {
        let mut channel = SecureChannel::new();
        assert_eq!(channel.state(), ChannelState::Unpaired);
        assert!(matches!(
            channel.encrypt(b"data"),
            Err(Error::SecureChannelNotOpen)
        ));
        assert!(matches!(
            channel.decrypt(&[0u8; 32]),
            Err(Error::SecureChannelNotOpen)
        ));
        assert!(matches!(
            channel.shared_secret(),
            Err(Error::KeyAgreementRequired)
        ));
    }

    #[test]
    fn test_symmetry() {
        let (mut host, mut card) = channel_pair();

        let messages: [&[u8]; 4] = [b"", b"phonon", &[0x5A; 16], &[0x01; 200]];
        for message in messages {
            let frame = host.encrypt(message).unwrap();
            assert_eq!(frame.len() % 16, 0);
            assert_eq!(card.decrypt(&frame).unwrap().as_ref(), message);
            assert_eq!(host.iv(), card.iv());

            let reply = card.encrypt(message).unwrap();
            assert_eq!(host.decrypt(&reply).unwrap().as_ref(), message);
            assert_eq!(host.iv(), card.iv());
        }
    }

    #[test]
    fn test_iv_chains_to_mac() {
        let (mut host, _) = channel_pair();
        let before = *host.iv().unwrap();
        let frame = host.encrypt(b"abc").unwrap();
        let after = *host.iv().unwrap();

        assert_ne!(before, after);
        assert_eq!(&frame[..16], after.as_slice());
    }

    #[test]
    fn test_tamper_detection() {
        for index in [0, 15, 16, 63] {
            let (mut host, mut card) = channel_pair();
            let frame = host.encrypt(&[0x11; 40]).unwrap();
            assert_eq!(frame.len(), 64);

            let mut tampered = frame.to_vec();
            tampered[index] ^= 0x80;
            assert!(matches!(
                card.decrypt(&tampered),
                Err(Error::InvalidResponseMac)
            ));
            assert_eq!(card.state(), ChannelState::Closed);
            assert!(card.iv().is_none());

            // No second attempt, not even with the genuine frame
            assert!(matches!(
                card.decrypt(&frame),
                Err(Error::SecureChannelNotOpen)
            ));
        }
    }

    #[test]
    fn test_replay_rejected() {
        let (mut host, mut card) = channel_pair();
        let first = host.encrypt(b"first").unwrap();
        let second = host.encrypt(&[0x22; 40]).unwrap();
        card.decrypt(&first).unwrap();
        card.decrypt(&second).unwrap();

        assert!(matches!(
            card.decrypt(&first),
            Err(Error::InvalidResponseMac)
        ));
        assert_eq!(card.state(), ChannelState::Closed);
    }

    #[test]
    fn test_replay_of_latest_frame_rejected() {
        let (mut host, mut card) = channel_pair();
        let frame = host.encrypt(&[0x33; 40]).unwrap();
        card.decrypt(&frame).unwrap();

        assert!(matches!(
            card.decrypt(&frame),
            Err(Error::InvalidResponseMac)
        ));
        assert!(!card.is_open());
    }

    #[test]
    fn test_refused_frame_closes() {
        let (mut host, _) = channel_pair();
        assert!(matches!(
            host.process_response(Response::status_only(0x6982u16)),
            Err(Error::Card(_))
        ));
        assert_eq!(host.state(), ChannelState::Closed);
    }

    #[test]
    fn test_short_frame() {
        let (_, mut card) = channel_pair();
        assert!(matches!(
            card.decrypt(&[0u8; 15]),
            Err(Error::InvalidResponseLength { expected: 16, actual: 15 })
        ));
    }

    #[test]
    fn test_close_wipes_state() {
        let (mut host, _) = channel_pair();
        host.close();
        assert_eq!(host.state(), ChannelState::Closed);
        assert!(host.iv().is_none());
        assert!(matches!(
            host.encrypt(b"data"),
            Err(Error::SecureChannelNotOpen)
        ));
    }

    #[test]
    fn test_key_agreement() {
        let card_key = SecretKey::random(&mut thread_rng());
        let mut host = SecureChannel::new();
        host.generate_ephemeral_secret(&card_key.public_key());
        assert_eq!(host.state(), ChannelState::KeyAgreed);

        let mut card = SecureChannel::new();
        card.agree(card_key, &host.public_key().unwrap());
        assert_eq!(
            host.shared_secret().unwrap().raw_secret_bytes(),
            card.shared_secret().unwrap().raw_secret_bytes()
        );
    }

    #[test]
    fn test_static_secret_is_reproducible() {
        let card_key = SecretKey::random(&mut thread_rng());
        let mut first = SecureChannel::new();
        let mut second = SecureChannel::new();
        first
            .generate_static_secret_insecure(&card_key.public_key())
            .unwrap();
        second
            .generate_static_secret_insecure(&card_key.public_key())
            .unwrap();
        assert_eq!(first.public_key(), second.public_key());
        assert_eq!(
            first.shared_secret().unwrap().raw_secret_bytes(),
            second.shared_secret().unwrap().raw_secret_bytes()
        );
    }

    #[test]
    fn test_protect_and_process() {
        let (mut host, mut card) = channel_pair();
        let salt = random_salt();

        let command = Command::new(0x80, 0x11, 0x00, 0x00)
            .with_data(salt.to_vec())
            .unwrap();
        let protected = host.protect_command(command).unwrap();
        assert_eq!(protected.instruction(), 0x11);
        assert_eq!(protected.data().len(), 16 + 48);

        let plain = card.decrypt(protected.data()).unwrap();
        assert_eq!(plain.as_ref(), salt.as_slice());

        let inner = Response::success(vec![0xAA; 32]).to_bytes();
        let outer = Response::success(card.encrypt(&inner).unwrap());
        let response = host.process_response(outer).unwrap();
        assert!(response.is_success());
        assert_eq!(response.data().as_ref(), &[0xAA; 32]);

        let inner = Response::status_only(StatusWord::from(0x9003)).to_bytes();
        let outer = Response::success(card.encrypt(&inner).unwrap());
        assert_eq!(host.process_response(outer).unwrap().status().value(), 0x9003);
    }
}
