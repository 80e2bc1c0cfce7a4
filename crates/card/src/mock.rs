//! In-memory phonon card.
//!
//! [`MockCard`] runs the card side of the applet protocol behind the
//! [`CardTransport`] seam: identity key and certificate, PIN, pairing slots,
//! the terminal secure channel, card to card pairing and a phonon table with
//! paged responses. It exists for tests and demos and keeps everything in
//! memory.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use cipher::{Iv, Key};
use k256::ecdsa::{Signature, SigningKey, signature::Signer};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand::RngCore;
use rand_v8::thread_rng;
use tracing::{debug, trace, warn};
use zeroize::Zeroizing;

use crate::apdu::{CardTransport, Command, Response, TransportError};
use crate::cert::{
    CardCertificate, CertificateError, CertificateSigner, MOCK_CA_PRIVATE_KEY,
    MOCK_CA_PUBLIC_KEY, SignerError,
};
use crate::commands::init::PAIRING_TOKEN_LENGTH;
use crate::commands::pin::{PIN_LENGTH, validate_pin};
use crate::commands::{
    CardPair2Data, CardPairData, CardPairSession, CardPairingInit, OpenSecureChannelResponse,
};
use crate::constants::status::*;
use crate::constants::{PAIRING_SLOTS, PHONON_AID, ins, tags};
use crate::crypto::{
    Cryptogram, PhononScp, Salt, calculate_cryptogram, card_pairing_cryptogram,
    derive_card_session_keys, derive_session_keys, generate_ecdh_shared_secret,
    one_shot_decrypt, random_salt, secret_hash, sign_prehash_der, verify_prehash_der,
};
use crate::secure_channel::SecureChannel;
use crate::tlv::{self, TlvCollection, TlvError};
use crate::types::{
    ApplicationInfo, AvailableMemory, INSTANCE_UID_LENGTH, KeyIndex, Phonon, PhononFilter,
    PrivatePhonon, Version, decode_transfer_packet, encode_transfer_packet,
};

/// Phonon slots of a fresh mock card
pub const DEFAULT_CAPACITY: usize = 64;

const PIN_TRIES: u8 = 3;

/// Descriptors per LIST frame. Kept small so continuation is exercised.
const LIST_PAGE_SIZE: usize = 3;

const APPLET_VERSION: Version = Version { major: 1, minor: 0 };

/// A status word the card answers with instead of data
#[derive(Debug, Clone, Copy)]
struct Reject(u16);

impl From<crate::Error> for Reject {
    fn from(err: crate::Error) -> Self {
        debug!(%err, "mock card rejecting command");
        Self(SW_WRONG_DATA)
    }
}

impl From<TlvError> for Reject {
    fn from(err: TlvError) -> Self {
        debug!(%err, "mock card rejecting malformed TLV");
        Self(SW_WRONG_DATA)
    }
}

impl From<CertificateError> for Reject {
    fn from(err: CertificateError) -> Self {
        debug!(%err, "mock card rejecting certificate");
        Self(SW_WRONG_DATA)
    }
}

type CardResult = std::result::Result<Response, Reject>;

/// Secret from the first PAIR step, consumed by the second
struct PendingPair {
    secret_hash: Cryptogram,
    card_salt: Salt,
}

/// Card side of card to card pairing
enum CardPairState {
    Idle,
    /// Sender after INIT_CARD_PAIRING
    Initiated { peer: PublicKey, salt: Salt },
    /// Receiver after CARD_PAIR, waiting for the sender's signature
    AwaitingFinalize {
        peer: PublicKey,
        cryptogram: Cryptogram,
    },
    Paired,
}

/// In-memory phonon card
pub struct MockCard {
    identity: SecretKey,
    certificate: Option<Bytes>,
    /// CA that counterparty card certificates must chain to
    ca_public_key: Bytes,
    instance_uid: [u8; INSTANCE_UID_LENGTH],

    pin: Option<Zeroizing<String>>,
    pin_tries: u8,
    pin_verified: bool,
    pairing_token: Option<Zeroizing<Vec<u8>>>,

    pairings: [Option<Key<PhononScp>>; PAIRING_SLOTS],
    pending_pair: Option<PendingPair>,
    channel: SecureChannel,
    authenticated: bool,

    card_pairing: CardPairState,
    card_channel: SecureChannel,

    phonons: Vec<Option<PrivatePhonon>>,
    /// Freed slots, reused most recent first
    free_slots: Vec<u16>,
    capacity: usize,
    /// Frames still owed for a continued LIST or SEND
    pending_frames: Option<(u8, VecDeque<Bytes>)>,
}

impl fmt::Debug for MockCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockCard")
            .field("initialized", &self.pin.is_some())
            .field("has_certificate", &self.certificate.is_some())
            .field("channel", &self.channel.state())
            .field("authenticated", &self.authenticated)
            .field("phonons", &self.phonons.iter().flatten().count())
            .finish()
    }
}

impl MockCard {
    /// Fresh, uninitialized card with a certificate from the mock CA.
    pub fn new() -> crate::Result<Self> {
        let ca = SigningKey::from_slice(&MOCK_CA_PRIVATE_KEY)?;
        let signer = move |preimage: &[u8]| -> Result<Vec<u8>, SignerError> {
            let signature: Signature = ca.sign(preimage);
            Ok(signature.to_der().as_bytes().to_vec())
        };
        Self::without_certificate().with_certificate_from(&signer)
    }

    /// Fresh card that still needs LOAD_CERT before it can pair.
    pub fn without_certificate() -> Self {
        let mut instance_uid = [0u8; INSTANCE_UID_LENGTH];
        rand::rng().fill_bytes(&mut instance_uid);

        Self {
            identity: SecretKey::random(&mut thread_rng()),
            certificate: None,
            ca_public_key: Bytes::from_static(&MOCK_CA_PUBLIC_KEY),
            instance_uid,
            pin: None,
            pin_tries: PIN_TRIES,
            pin_verified: false,
            pairing_token: None,
            pairings: [None; PAIRING_SLOTS],
            pending_pair: None,
            channel: SecureChannel::new(),
            authenticated: false,
            card_pairing: CardPairState::Idle,
            card_channel: SecureChannel::new(),
            phonons: Vec::new(),
            free_slots: Vec::new(),
            capacity: DEFAULT_CAPACITY,
            pending_frames: None,
        }
    }

    /// Replace the certificate with one minted by `signer`.
    pub fn with_certificate_from(mut self, signer: &impl CertificateSigner) -> crate::Result<Self> {
        self.certificate = Some(CardCertificate::create(&self.identity.public_key(), signer)?);
        Ok(self)
    }

    /// Trust a different CA for counterparty certificates.
    pub fn with_ca_public_key(mut self, ca_public_key: impl Into<Bytes>) -> Self {
        self.ca_public_key = ca_public_key.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.min(usize::from(u16::MAX));
        self
    }

    /// Identity key of the card
    pub fn public_key(&self) -> PublicKey {
        self.identity.public_key()
    }

    pub const fn certificate(&self) -> Option<&Bytes> {
        self.certificate.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.pin.is_some()
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from(&self.identity)
    }

    fn identity_point(&self) -> Bytes {
        Bytes::copy_from_slice(self.identity.public_key().to_encoded_point(false).as_bytes())
    }

    fn dispatch(&mut self, command: &Command) -> Response {
        let result = match command.instruction() {
            ins::SELECT => self.select(command),
            ins::INIT => self.init(command),
            ins::IDENTIFY_CARD => self.identify(command),
            ins::PAIR => self.pair(command),
            ins::OPEN_SECURE_CHANNEL => self.open_secure_channel(command),
            ins::LOAD_CERT => self.load_cert(command),
            ins::GET_AVAILABLE_MEMORY => Ok(self.available_memory()),
            _ => return self.dispatch_secure(command),
        };
        result.unwrap_or_else(|Reject(sw)| Response::status_only(sw))
    }

    /// Unwrap a secure channel command, run it and wrap the answer.
    fn dispatch_secure(&mut self, command: &Command) -> Response {
        if !self.channel.is_open() {
            return Response::status_only(SW_SECURITY_STATUS_NOT_SATISFIED);
        }
        let plaintext = match self.channel.decrypt(command.data()) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                warn!(%err, "mock card dropping secure channel");
                self.channel.close();
                self.authenticated = false;
                return Response::status_only(SW_SECURITY_STATUS_NOT_SATISFIED);
            }
        };

        let inner = Command::new(
            command.class(),
            command.instruction(),
            command.p1(),
            command.p2(),
        )
        .with_data(plaintext)
        .map_err(|_| Reject(SW_WRONG_LENGTH))
        .and_then(|inner| self.handle_secure(&inner))
        .unwrap_or_else(|Reject(sw)| Response::status_only(sw));

        match self.channel.encrypt(&inner.to_bytes()) {
            Ok(frame) => Response::success(frame),
            Err(err) => {
                warn!(%err, "mock card could not encrypt response");
                Response::status_only(SW_UNKNOWN)
            }
        }
    }

    fn handle_secure(&mut self, command: &Command) -> CardResult {
        match command.instruction() {
            ins::MUTUALLY_AUTHENTICATE => return self.mutually_authenticate(command),
            _ if !self.authenticated => return Err(Reject(SW_SECURITY_STATUS_NOT_SATISFIED)),
            ins::UNPAIR => return self.unpair(command),
            ins::VERIFY_PIN => return self.verify_pin(command),
            _ => {}
        }

        if !self.pin_verified {
            return Err(Reject(SW_SECURITY_STATUS_NOT_SATISFIED));
        }
        match command.instruction() {
            ins::CHANGE_PIN => self.change_pin(command),
            ins::CREATE_PHONON => self.create_phonon(),
            ins::SET_DESCRIPTOR => self.set_descriptor(command),
            ins::LIST_PHONONS => self.list_phonons(command),
            ins::GET_PHONON_PUB_KEY => self.get_phonon_pub_key(command),
            ins::DESTROY_PHONON => self.destroy_phonon(command),
            ins::SEND_PHONONS => self.send_phonons(command),
            ins::RECEIVE_PHONONS => self.receive_phonons(command),
            ins::INIT_CARD_PAIRING => self.init_card_pairing(command),
            ins::CARD_PAIR => self.card_pair(command),
            ins::CARD_PAIR_2 => self.card_pair_2(command),
            ins::FINALIZE_CARD_PAIR => self.finalize_card_pair(command),
            _ => Err(Reject(SW_INS_NOT_SUPPORTED)),
        }
    }

    fn select(&mut self, command: &Command) -> CardResult {
        if command.data().as_ref() != PHONON_AID {
            return Err(Reject(SW_FILE_NOT_FOUND));
        }

        self.channel.close();
        self.authenticated = false;
        self.pin_verified = false;
        self.pending_pair = None;
        self.pending_frames = None;

        let info = ApplicationInfo {
            instance_uid: Some(Bytes::copy_from_slice(&self.instance_uid)),
            public_key: self.identity.public_key(),
            version: Some(APPLET_VERSION),
            remaining_slots: u8::try_from(self.pairings.iter().filter(|s| s.is_none()).count())
                .ok(),
            initialized: self.is_initialized(),
        };
        Ok(Response::success(info.to_bytes()?))
    }

    fn init(&mut self, command: &Command) -> CardResult {
        if self.is_initialized() {
            return Err(Reject(SW_INS_NOT_SUPPORTED));
        }

        let plaintext = Zeroizing::new(one_shot_decrypt(&self.identity, command.data())?.to_vec());
        if plaintext.len() != PIN_LENGTH + PAIRING_TOKEN_LENGTH {
            return Err(Reject(SW_WRONG_DATA));
        }
        let (pin, token) = plaintext.split_at(PIN_LENGTH);
        let pin = std::str::from_utf8(pin).map_err(|_| Reject(SW_WRONG_DATA))?;
        validate_pin(pin)?;

        self.pin = Some(Zeroizing::new(pin.to_owned()));
        self.pin_tries = PIN_TRIES;
        self.pairing_token = Some(Zeroizing::new(token.to_vec()));
        debug!("mock card initialized");
        Ok(Response::success(Bytes::new()))
    }

    fn identify(&mut self, command: &Command) -> CardResult {
        if command.data().len() != 32 {
            return Err(Reject(SW_WRONG_DATA));
        }
        let digest = calculate_cryptogram(&[command.data().as_ref()]);
        let signature = sign_prehash_der(&self.signing_key(), &digest)?;

        let mut buf = BytesMut::new();
        buf.put(tlv::encode(tags::ECC_PUBLIC_KEY, &self.identity_point())?);
        buf.put(signature);
        Ok(Response::success(buf.freeze()))
    }

    fn pair(&mut self, command: &Command) -> CardResult {
        match command.p1() {
            0x00 => self.pair_step1(command.data()),
            0x01 => self.pair_step2(command.data()),
            _ => Err(Reject(SW_INCORRECT_P1P2)),
        }
    }

    fn pair_step1(&mut self, data: &[u8]) -> CardResult {
        if !self.is_initialized() {
            return Err(Reject(SW_INS_NOT_SUPPORTED));
        }
        let Some(certificate) = self.certificate.clone() else {
            return Err(Reject(SW_CERTIFICATE_NOT_LOADED));
        };
        if self.channel.is_open() {
            return Err(Reject(SW_CONDITIONS_NOT_SATISFIED));
        }
        if data.len() != 32 + 65 {
            return Err(Reject(SW_WRONG_DATA));
        }

        let client_salt = Salt::clone_from_slice(&data[..32]);
        let host = PublicKey::from_sec1_bytes(&data[32..]).map_err(|_| Reject(SW_WRONG_DATA))?;
        let shared_secret = generate_ecdh_shared_secret(&self.identity, &host);
        let secret = secret_hash(&client_salt, &shared_secret);

        let card_salt = random_salt();
        let signature = sign_prehash_der(&self.signing_key(), &secret)?;
        self.pending_pair = Some(PendingPair {
            secret_hash: secret,
            card_salt,
        });

        let mut buf = BytesMut::new();
        buf.put_slice(&card_salt);
        buf.put(certificate);
        buf.put(signature);
        Ok(Response::success(buf.freeze()))
    }

    fn pair_step2(&mut self, data: &[u8]) -> CardResult {
        let Some(pending) = self.pending_pair.take() else {
            return Err(Reject(SW_INCORRECT_P1P2));
        };
        let expected =
            calculate_cryptogram(&[pending.card_salt.as_slice(), pending.secret_hash.as_slice()]);
        if data != expected.as_slice() {
            warn!("mock card rejected client cryptogram");
            return Err(Reject(SW_SECURITY_STATUS_NOT_SATISFIED));
        }

        let Some(index) = self.pairings.iter().position(Option::is_none) else {
            return Err(Reject(SW_NOT_ENOUGH_MEMORY));
        };
        let salt = random_salt();
        self.pairings[index] =
            Some(calculate_cryptogram(&[salt.as_slice(), pending.secret_hash.as_slice()]));
        debug!(index, "mock card paired");

        let mut buf = BytesMut::with_capacity(33);
        // Bounded by PAIRING_SLOTS
        buf.put_u8(index as u8);
        buf.put_slice(&salt);
        Ok(Response::success(buf.freeze()))
    }

    fn open_secure_channel(&mut self, command: &Command) -> CardResult {
        let Some(pairing_key) = self
            .pairings
            .get(usize::from(command.p1()))
            .copied()
            .flatten()
        else {
            return Err(Reject(SW_INCORRECT_P1P2));
        };
        let host =
            PublicKey::from_sec1_bytes(command.data()).map_err(|_| Reject(SW_WRONG_DATA))?;

        let mut channel = SecureChannel::new();
        channel.agree(self.identity.clone(), &host);

        let salt = random_salt();
        let mut iv = Iv::<PhononScp>::default();
        rand::rng().fill_bytes(&mut iv);
        let (enc_key, mac_key) = derive_session_keys(channel.shared_secret()?, &pairing_key, &salt);
        channel.install_session_keys(iv, enc_key, mac_key);

        self.channel = channel;
        self.authenticated = false;
        self.pin_verified = false;
        Ok(Response::success(
            OpenSecureChannelResponse { salt, iv }.to_bytes(),
        ))
    }

    fn load_cert(&mut self, command: &Command) -> CardResult {
        let certificate = CardCertificate::parse(command.data())?;
        if certificate.public_key_bytes() != &self.identity_point() {
            warn!("certificate is for a different card");
            return Err(Reject(SW_WRONG_DATA));
        }
        self.certificate = Some(certificate.serialize());
        debug!("mock card certificate loaded");
        Ok(Response::success(Bytes::new()))
    }

    fn available_memory(&self) -> Response {
        let free = self.capacity - self.phonons.iter().flatten().count();
        let memory = AvailableMemory {
            persistent: u32::try_from(free * 128).unwrap_or(u32::MAX),
            on_reset: 1024,
            on_deselect: 512,
        };
        Response::success(memory.to_bytes())
    }

    fn mutually_authenticate(&mut self, command: &Command) -> CardResult {
        if command.data().len() != 32 {
            return Err(Reject(SW_SECURITY_STATUS_NOT_SATISFIED));
        }
        self.authenticated = true;
        Ok(Response::success(random_salt().to_vec()))
    }

    fn unpair(&mut self, command: &Command) -> CardResult {
        let slot = self
            .pairings
            .get_mut(usize::from(command.p1()))
            .ok_or(Reject(SW_INCORRECT_P1P2))?;
        *slot = None;
        Ok(Response::success(Bytes::new()))
    }

    fn verify_pin(&mut self, command: &Command) -> CardResult {
        let Some(pin) = &self.pin else {
            return Err(Reject(SW_CONDITIONS_NOT_SATISFIED));
        };
        if self.pin_tries == 0 {
            return Err(Reject(SW_INVALID_FILE));
        }
        if command.data().as_ref() == pin.as_bytes() {
            self.pin_tries = PIN_TRIES;
            self.pin_verified = true;
            return Ok(Response::success(Bytes::new()));
        }

        self.pin_tries -= 1;
        self.pin_verified = false;
        Err(Reject(SW_PIN_TRIES_BASE | u16::from(self.pin_tries)))
    }

    fn change_pin(&mut self, command: &Command) -> CardResult {
        let pin = std::str::from_utf8(command.data()).map_err(|_| Reject(SW_WRONG_DATA))?;
        validate_pin(pin)?;
        self.pin = Some(Zeroizing::new(pin.to_owned()));
        Ok(Response::success(Bytes::new()))
    }

    fn free_capacity(&self) -> usize {
        self.free_slots.len() + self.capacity.saturating_sub(self.phonons.len())
    }

    fn allocate_slot(&mut self) -> std::result::Result<u16, Reject> {
        if let Some(index) = self.free_slots.pop() {
            return Ok(index);
        }
        if self.phonons.len() >= self.capacity {
            return Err(Reject(SW_NOT_ENOUGH_MEMORY));
        }
        let index = u16::try_from(self.phonons.len()).map_err(|_| Reject(SW_NOT_ENOUGH_MEMORY))?;
        self.phonons.push(None);
        Ok(index)
    }

    fn store(&mut self, mut phonon: PrivatePhonon) -> std::result::Result<KeyIndex, Reject> {
        let index = self.allocate_slot()?;
        let key_index = KeyIndex::new(index);
        phonon.phonon.key_index = Some(key_index);
        self.phonons[usize::from(index)] = Some(phonon);
        Ok(key_index)
    }

    fn stored(&self, key_index: KeyIndex) -> std::result::Result<&PrivatePhonon, Reject> {
        self.phonons
            .get(usize::from(key_index.value()))
            .and_then(Option::as_ref)
            .ok_or(Reject(SW_RECORD_NOT_FOUND))
    }

    fn remove(&mut self, key_index: KeyIndex) -> std::result::Result<PrivatePhonon, Reject> {
        let phonon = self
            .phonons
            .get_mut(usize::from(key_index.value()))
            .and_then(Option::take)
            .ok_or(Reject(SW_RECORD_NOT_FOUND))?;
        self.free_slots.push(key_index.value());
        Ok(phonon)
    }

    fn requested_index(data: &[u8]) -> std::result::Result<KeyIndex, Reject> {
        let records = TlvCollection::parse(data, &[])?;
        Ok(KeyIndex::from_bytes(records.find_first(tags::KEY_INDEX)?)?)
    }

    fn create_phonon(&mut self) -> CardResult {
        let secret_key = SecretKey::random(&mut thread_rng());
        let public_key =
            Bytes::copy_from_slice(secret_key.public_key().to_encoded_point(false).as_bytes());
        let phonon = Phonon {
            pub_key: Some(public_key.clone()),
            ..Phonon::default()
        };
        let key_index = self.store(PrivatePhonon { secret_key, phonon })?;
        debug!(%key_index, "mock card created phonon");

        let mut body = BytesMut::new();
        body.put(tlv::encode(tags::KEY_INDEX, &key_index.to_bytes())?);
        body.put(tlv::encode(tags::PHONON_PUB_KEY, &public_key)?);
        Ok(Response::success(tlv::encode(tags::PHONON_KEY_COLLECTION, &body)?))
    }

    fn set_descriptor(&mut self, command: &Command) -> CardResult {
        let key_index = Self::requested_index(command.data())?;
        let curve_type = self.stored(key_index)?.phonon.curve_type;

        let mut records = TlvCollection::parse(command.data(), &[])?;
        records.push(tags::CURVE_TYPE, Bytes::copy_from_slice(&[u8::from(curve_type)]));
        let descriptor = Phonon::from_collection(&records)?;

        let Some(Some(stored)) = self.phonons.get_mut(usize::from(key_index.value())) else {
            return Err(Reject(SW_RECORD_NOT_FOUND));
        };
        let phonon = &mut stored.phonon;
        phonon.schema_version = descriptor.schema_version;
        phonon.extended_schema_version = descriptor.extended_schema_version;
        phonon.denomination = descriptor.denomination;
        phonon.currency_type = descriptor.currency_type;
        phonon.chain_id = descriptor.chain_id;
        phonon.extended_tlv = descriptor.extended_tlv;
        Ok(Response::success(Bytes::new()))
    }

    fn list_phonons(&mut self, command: &Command) -> CardResult {
        if command.p1() == 0x01 {
            return self.next_frame(ins::LIST_PHONONS);
        }

        let filter = PhononFilter::decode(command.p2(), command.data())?;
        let mut descriptors = Vec::new();
        for stored in self.phonons.iter().flatten() {
            if filter.matches(&stored.phonon) {
                let public = stored.phonon.encode_public()?;
                descriptors.push(tlv::encode(tags::PHONON_DESCRIPTOR, &public)?);
            }
        }
        trace!(matches = descriptors.len(), "mock card listing phonons");

        let mut frames = VecDeque::new();
        for page in descriptors.chunks(LIST_PAGE_SIZE) {
            let body: Vec<u8> = page.iter().flat_map(|d| d.iter().copied()).collect();
            frames.push_back(tlv::encode(tags::PHONON_COLLECTION, &body)?);
        }
        if frames.is_empty() {
            frames.push_back(tlv::encode(tags::PHONON_COLLECTION, &[])?);
        }
        Ok(self.respond_frames(ins::LIST_PHONONS, frames))
    }

    fn get_phonon_pub_key(&mut self, command: &Command) -> CardResult {
        let stored = self.stored(Self::requested_index(command.data())?)?;
        let public_key = stored
            .phonon
            .pub_key
            .clone()
            .ok_or(Reject(SW_RECORD_NOT_FOUND))?;

        let key = tlv::encode(tags::PHONON_PUB_KEY, &public_key)?;
        let description = tlv::encode(tags::PRIVATE_DESCRIPTION, &key)?;
        Ok(Response::success(tlv::encode(
            tags::TRANSFER_PHONON_PACKET,
            &description,
        )?))
    }

    fn destroy_phonon(&mut self, command: &Command) -> CardResult {
        let phonon = self.remove(Self::requested_index(command.data())?)?;
        Ok(Response::success(tlv::encode(
            tags::PHONON_PRIV_KEY,
            &phonon.secret_key.to_bytes(),
        )?))
    }

    fn send_phonons(&mut self, command: &Command) -> CardResult {
        if command.p1() == 0x01 {
            return self.next_frame(ins::SEND_PHONONS);
        }
        if !matches!(self.card_pairing, CardPairState::Paired) {
            return Err(Reject(SW_CONDITIONS_NOT_SATISFIED));
        }

        let records = TlvCollection::parse(command.data(), &[])?;
        let list = records.find_first(tags::KEY_INDEX_LIST)?;
        if list.is_empty() || list.len() % 2 != 0 || list.len() / 2 != usize::from(command.p2()) {
            return Err(Reject(SW_WRONG_DATA));
        }
        let indices: Vec<KeyIndex> = list
            .chunks_exact(2)
            .map(|pair| KeyIndex::new(u16::from_be_bytes([pair[0], pair[1]])))
            .collect();

        let unique: BTreeSet<_> = indices.iter().collect();
        if unique.len() != indices.len() {
            return Err(Reject(SW_WRONG_DATA));
        }
        for index in &indices {
            self.stored(*index)?;
        }

        let mut frames = VecDeque::with_capacity(indices.len());
        for index in indices {
            let phonon = self.remove(index)?;
            let packet = encode_transfer_packet(&[phonon])?;
            frames.push_back(self.card_channel.encrypt(&packet)?);
        }
        debug!(packets = frames.len(), "mock card sent phonons");
        Ok(self.respond_frames(ins::SEND_PHONONS, frames))
    }

    fn receive_phonons(&mut self, command: &Command) -> CardResult {
        if !matches!(self.card_pairing, CardPairState::Paired) {
            return Err(Reject(SW_CONDITIONS_NOT_SATISFIED));
        }
        let packet = match self.card_channel.decrypt(command.data()) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(%err, "mock card rejected transfer packet, dropping card pairing");
                self.card_pairing = CardPairState::Idle;
                return Err(Reject(SW_SECURITY_STATUS_NOT_SATISFIED));
            }
        };

        let phonons = decode_transfer_packet(&packet)?;
        if phonons.len() > self.free_capacity() {
            return Err(Reject(SW_NOT_ENOUGH_MEMORY));
        }
        for phonon in phonons {
            let key_index = self.store(phonon)?;
            debug!(%key_index, "mock card received phonon");
        }
        Ok(Response::success(Bytes::new()))
    }

    /// Answer with the first frame and keep the rest for continuation.
    fn respond_frames(&mut self, instruction: u8, mut frames: VecDeque<Bytes>) -> Response {
        let first = frames.pop_front().unwrap_or_default();
        let status = Self::frame_status(frames.len());
        self.pending_frames = (!frames.is_empty()).then_some((instruction, frames));
        Response::new(first, status)
    }

    fn next_frame(&mut self, instruction: u8) -> CardResult {
        let Some((pending, frames)) = self.pending_frames.as_mut() else {
            return Err(Reject(SW_INCORRECT_P1P2));
        };
        if *pending != instruction {
            return Err(Reject(SW_INCORRECT_P1P2));
        }
        let frame = frames.pop_front().unwrap_or_default();
        let remaining = frames.len();
        if remaining == 0 {
            self.pending_frames = None;
        }
        Ok(Response::new(frame, Self::frame_status(remaining)))
    }

    fn frame_status(remaining: usize) -> u16 {
        let hint = u16::try_from(remaining)
            .unwrap_or(u16::MAX)
            .min(SW_CONTINUATION_MAX - SW_NO_ERROR);
        SW_NO_ERROR + hint
    }

    fn validate_peer(&self, raw: &[u8]) -> std::result::Result<CardCertificate, Reject> {
        let certificate = CardCertificate::parse(raw)?;
        certificate
            .validate(&self.ca_public_key)
            .map_err(|_| Reject(SW_WRONG_DATA))?;
        Ok(certificate)
    }

    fn init_card_pairing(&mut self, command: &Command) -> CardResult {
        let records = TlvCollection::parse(command.data(), &[])?;
        let peer = self
            .validate_peer(records.find_first(tags::CARD_CERTIFICATE)?)?
            .public_key()?;
        let Some(own) = &self.certificate else {
            return Err(Reject(SW_CERTIFICATE_NOT_LOADED));
        };

        let init = CardPairingInit {
            certificate: CardCertificate::parse(own)?,
            salt: random_salt(),
        };
        self.card_pairing = CardPairState::Initiated {
            peer,
            salt: init.salt,
        };
        self.card_channel.close();
        Ok(Response::success(init.to_bytes()?))
    }

    fn card_pair(&mut self, command: &Command) -> CardResult {
        let init = CardPairingInit::parse(command.data())?;
        let peer = self.validate_peer(&init.certificate.serialize())?.public_key()?;
        let Some(own) = &self.certificate else {
            return Err(Reject(SW_CERTIFICATE_NOT_LOADED));
        };
        let certificate = CardCertificate::parse(own)?;

        let shared_secret = generate_ecdh_shared_secret(&self.identity, &peer);
        let salt = random_salt();
        let mut iv = Iv::<PhononScp>::default();
        rand::rng().fill_bytes(&mut iv);
        let (enc_key, mac_key) = derive_card_session_keys(&init.salt, &salt, &shared_secret);
        let cryptogram = card_pairing_cryptogram(&enc_key, &mac_key, &iv);
        let signature = sign_prehash_der(&self.signing_key(), &cryptogram)?;

        self.card_channel = SecureChannel::new();
        self.card_channel.install_session_keys(iv, enc_key, mac_key);
        self.card_pairing = CardPairState::AwaitingFinalize { peer, cryptogram };

        let data = CardPairData {
            certificate,
            session: CardPairSession {
                salt,
                iv,
                signature,
            },
        };
        Ok(Response::success(data.to_bytes()?))
    }

    fn card_pair_2(&mut self, command: &Command) -> CardResult {
        let CardPairState::Initiated { peer, salt } = self.card_pairing else {
            return Err(Reject(SW_CONDITIONS_NOT_SATISFIED));
        };
        self.card_pairing = CardPairState::Idle;

        let data = CardPairSession::parse(command.data())?;
        let shared_secret = generate_ecdh_shared_secret(&self.identity, &peer);
        let (enc_key, mac_key) = derive_card_session_keys(&salt, &data.salt, &shared_secret);
        let cryptogram = card_pairing_cryptogram(&enc_key, &mac_key, &data.iv);
        if verify_prehash_der(&peer, &cryptogram, &data.signature).is_err() {
            warn!("counterparty signature over the pairing cryptogram is invalid");
            return Err(Reject(SW_SECURITY_STATUS_NOT_SATISFIED));
        }

        let signature = sign_prehash_der(&self.signing_key(), &cryptogram)?;
        self.card_channel = SecureChannel::new();
        self.card_channel
            .install_session_keys(data.iv, enc_key, mac_key);
        self.card_pairing = CardPairState::Paired;
        debug!("mock card paired with counterparty as sender");

        Ok(Response::success(CardPair2Data { signature }.to_bytes()?))
    }

    fn finalize_card_pair(&mut self, command: &Command) -> CardResult {
        let CardPairState::AwaitingFinalize { peer, cryptogram } = self.card_pairing else {
            return Err(Reject(SW_CONDITIONS_NOT_SATISFIED));
        };

        let data = CardPair2Data::parse(command.data())?;
        if verify_prehash_der(&peer, &cryptogram, &data.signature).is_err() {
            warn!("counterparty signature over the pairing cryptogram is invalid");
            self.card_pairing = CardPairState::Idle;
            self.card_channel.close();
            return Err(Reject(SW_SECURITY_STATUS_NOT_SATISFIED));
        }

        self.card_pairing = CardPairState::Paired;
        debug!("mock card paired with counterparty as receiver");
        Ok(Response::success(Bytes::new()))
    }
}

impl CardTransport for MockCard {
    fn transmit_raw(&mut self, command: &[u8]) -> std::result::Result<Bytes, TransportError> {
        let response = match Command::from_bytes(command) {
            Ok(command) => self.dispatch(&command),
            Err(err) => {
                debug!(%err, "mock card received a malformed APDU");
                Response::status_only(SW_WRONG_LENGTH)
            }
        };
        Ok(response.to_bytes())
    }

    fn reset(&mut self) -> std::result::Result<(), TransportError> {
        self.channel.close();
        self.authenticated = false;
        self.pin_verified = false;
        self.pending_pair = None;
        self.pending_frames = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CLA_GP, CLA_ISO7816};

    fn send(card: &mut MockCard, command: Command) -> Response {
        Response::from_bytes(&card.transmit_raw(&command.to_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn test_certificate_chains_to_mock_ca() {
        let card = MockCard::new().unwrap();
        let certificate = CardCertificate::parse(card.certificate().unwrap()).unwrap();
        certificate.validate(&MOCK_CA_PUBLIC_KEY).unwrap();
        assert_eq!(certificate.public_key().unwrap(), card.public_key());
    }

    #[test]
    fn test_select_reports_state() {
        let mut card = MockCard::new().unwrap();
        let select = Command::new(CLA_ISO7816, ins::SELECT, 0x04, 0x00)
            .with_data(PHONON_AID)
            .unwrap();
        let response = send(&mut card, select);
        assert!(response.is_success());
        let info = ApplicationInfo::parse(response.data()).unwrap();
        assert_eq!(info.public_key, card.public_key());
        assert!(!info.initialized);

        let wrong = Command::new(CLA_ISO7816, ins::SELECT, 0x04, 0x00)
            .with_data(vec![0xA0, 0x00])
            .unwrap();
        assert_eq!(send(&mut card, wrong).status().value(), SW_FILE_NOT_FOUND);
    }

    #[test]
    fn test_secure_commands_need_channel() {
        let mut card = MockCard::new().unwrap();
        let list = Command::new(CLA_ISO7816, ins::LIST_PHONONS, 0x00, 0x00);
        assert_eq!(
            send(&mut card, list).status().value(),
            SW_SECURITY_STATUS_NOT_SATISFIED
        );
    }

    #[test]
    fn test_pair_step_order() {
        let mut card = MockCard::new().unwrap();
        let step2 = Command::new(CLA_GP, ins::PAIR, 0x01, 0x00)
            .with_data(vec![0u8; 32])
            .unwrap();
        assert_eq!(send(&mut card, step2).status().value(), SW_INCORRECT_P1P2);
    }

    #[test]
    fn test_load_cert_rejects_foreign_key() {
        let mut card = MockCard::without_certificate();
        let other = MockCard::new().unwrap();

        let load = Command::new(CLA_GP, ins::LOAD_CERT, 0x00, 0x00)
            .with_data(other.certificate().unwrap().clone())
            .unwrap();
        assert_eq!(send(&mut card, load).status().value(), SW_WRONG_DATA);
        assert!(card.certificate().is_none());
    }

    #[test]
    fn test_frame_status() {
        assert_eq!(MockCard::frame_status(0), 0x9000);
        assert_eq!(MockCard::frame_status(2), 0x9002);
        assert_eq!(MockCard::frame_status(1000), 0x9100);
    }

    #[test]
    fn test_slot_reuse_is_last_in_first_out() {
        let mut card = MockCard::new().unwrap();
        let phonon = || PrivatePhonon {
            secret_key: SecretKey::random(&mut thread_rng()),
            phonon: Phonon::default(),
        };
        for _ in 0..4 {
            card.store(phonon()).unwrap();
        }
        card.remove(KeyIndex::new(1)).unwrap();
        card.remove(KeyIndex::new(3)).unwrap();

        assert_eq!(card.store(phonon()).unwrap(), KeyIndex::new(3));
        assert_eq!(card.store(phonon()).unwrap(), KeyIndex::new(1));
        assert_eq!(card.store(phonon()).unwrap(), KeyIndex::new(4));
    }
}
