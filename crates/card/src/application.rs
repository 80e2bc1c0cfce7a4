//! Phonon card application
//!
//! [`PhononCard`] drives one card through its lifecycle and exposes every
//! applet command as a method. It owns the transport, the secure channel and
//! whatever pairing state the terminal holds for the card.

use bytes::Bytes;
use k256::{PublicKey, SecretKey};
use rand_v8::thread_rng;
use tracing::{debug, info, warn};

use crate::apdu::{CardTransport, Command, Response};
use crate::cert::CardCertificate;
use crate::commands::{
    CardCommand, CardPair2Command, CardPair2Data, CardPairCommand, CardPairData,
    CardPairingInit, ChangePinCommand, CreatePhononCommand, DestroyPhononCommand,
    FinalizeCardPairCommand, GetAvailableMemoryCommand, GetPhononPubKeyCommand,
    IdentifyCardCommand, IdentifyCardResponse, InitCardPairingCommand, InitCommand,
    ListPhononsCommand, LoadCertCommand, MutuallyAuthenticateCommand, OpenSecureChannelCommand,
    PairStep1Command, PairStep2Command, ReceivePhononsCommand, ResumeSendCommand,
    SelectCommand, SendPhononsCommand, SetDescriptorCommand, UnpairCommand, VerifyPinCommand,
};
use crate::config::CardConfig;
use crate::continuation::collect_frames_into;
use crate::crypto::{
    calculate_cryptogram, derive_session_keys, generate_ecdh_shared_secret, random_salt,
    secret_hash, verify_prehash_der,
};
use crate::secure_channel::SecureChannel;
use crate::status::PairingError;
use crate::types::{
    ApplicationInfo, AvailableMemory, KeyIndex, PairingInfo, Phonon, PhononFilter,
};
use crate::{Error, Result};

/// Where the terminal stands with the card
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PairingState {
    Unselected,
    Selected,
    Paired,
    ChannelOpen,
    Authenticated,
}

/// Phonon card application
#[derive(Debug)]
pub struct PhononCard<T: CardTransport> {
    /// Card transport
    transport: T,
    config: CardConfig,
    channel: SecureChannel,
    state: PairingState,
    /// Pairing information - optional to support unpaired states
    pairing_info: Option<PairingInfo>,
    /// Identity key reported by SELECT
    card_public_key: Option<PublicKey>,
    /// Application info from card selection
    application_info: Option<ApplicationInfo>,
    /// Certificate presented during pairing
    certificate: Option<CardCertificate>,
    /// Receiver certificate handed to INIT_CARD_PAIRING
    counterparty_certificate: Option<CardCertificate>,
}

impl<T: CardTransport> PhononCard<T> {
    /// Create a new instance with the default configuration
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, CardConfig::default())
    }

    pub fn with_config(transport: T, config: CardConfig) -> Self {
        Self {
            transport,
            config,
            channel: SecureChannel::new(),
            state: PairingState::Unselected,
            pairing_info: None,
            card_public_key: None,
            application_info: None,
            certificate: None,
            counterparty_certificate: None,
        }
    }

    /// Resume an earlier pairing. The card still has to be selected.
    pub fn with_pairing(transport: T, config: CardConfig, pairing_info: PairingInfo) -> Self {
        let mut card = Self::with_config(transport, config);
        card.pairing_info = Some(pairing_info);
        card
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub const fn config(&self) -> &CardConfig {
        &self.config
    }

    pub const fn state(&self) -> PairingState {
        self.state
    }

    pub const fn pairing_info(&self) -> Option<&PairingInfo> {
        self.pairing_info.as_ref()
    }

    pub const fn application_info(&self) -> Option<&ApplicationInfo> {
        self.application_info.as_ref()
    }

    pub const fn card_public_key(&self) -> Option<&PublicKey> {
        self.card_public_key.as_ref()
    }

    /// Certificate the card presented when it was paired
    pub const fn certificate(&self) -> Option<&CardCertificate> {
        self.certificate.as_ref()
    }

    /// Run a command, through the secure channel when it requires one, and
    /// follow continuation frames up to the configured cap.
    pub fn execute<C: CardCommand>(&mut self, command: &C) -> Result<C::Output> {
        let mut frames = Vec::new();
        self.execute_into(command, &mut frames)?;
        command.parse_frames(frames)
    }

    /// Like [`execute`](Self::execute), but leaves every frame received
    /// before a failure in `frames`.
    fn execute_into<C: CardCommand>(&mut self, command: &C, frames: &mut Vec<Bytes>) -> Result<()> {
        let first = self.exchange(&command.to_command()?, C::SECURE)?;

        let status = first.status();
        if !status.is_success() && !status.is_continuation() {
            return Err(command.map_status(status));
        }

        match command.continuation() {
            Some(next) => {
                let max_frames = self.config.max_continuation_frames();
                collect_frames_into(first, max_frames, frames, || self.exchange(&next, C::SECURE))
            }
            None if status.is_success() => {
                frames.push(first.into_data());
                Ok(())
            }
            None => Err(Error::UnexpectedStatus(status)),
        }
    }

    fn exchange(&mut self, command: &Command, secure: bool) -> Result<Response> {
        if !secure {
            return self.transport.transmit(command);
        }
        if !self.channel.is_open() {
            return Err(Error::SecureChannelNotOpen);
        }
        let protected = self.channel.protect_command(command.clone())?;
        let result = self
            .transport
            .transmit(&protected)
            .and_then(|response| self.channel.process_response(response));

        if let Err(err) = &result {
            // The command IV has advanced whether or not the card saw it
            warn!(%err, "secure exchange failed, the channel must be reopened");
            self.close();
        }
        result
    }

    fn require_public_key(&self) -> Result<PublicKey> {
        self.card_public_key.ok_or(Error::NotSelected)
    }

    fn require(&self, state: PairingState) -> Result<()> {
        if self.state >= state {
            return Ok(());
        }
        Err(match state {
            PairingState::Unselected | PairingState::Selected => Error::NotSelected,
            PairingState::Paired => Error::PairingRequired,
            PairingState::ChannelOpen | PairingState::Authenticated => {
                Error::SecureChannelNotOpen
            }
        })
    }

    /// Agree on an ECDH secret with the card identity key.
    fn agree_with_card(&mut self, card_public_key: &PublicKey) -> Result<()> {
        if self.config.insecure_static_keys() {
            self.channel.generate_static_secret_insecure(card_public_key)
        } else {
            self.channel.generate_ephemeral_secret(card_public_key);
            Ok(())
        }
    }

    /// Select the phonon applet. Any open channel is dropped.
    pub fn select(&mut self) -> Result<ApplicationInfo> {
        debug!(aid = ?self.config.aid(), "selecting phonon applet");
        if self.channel.is_open() {
            self.channel.close();
        }

        let info = self.execute(&SelectCommand::with_aid(self.config.aid().clone()))?;
        self.card_public_key = Some(info.public_key);
        self.application_info = Some(info.clone());
        self.state = if self.pairing_info.is_some() {
            PairingState::Paired
        } else {
            PairingState::Selected
        };
        info!(initialized = info.initialized, "phonon applet selected");
        Ok(info)
    }

    /// Set the PIN on a fresh card. The card is selected again afterwards.
    pub fn init(&mut self, pin: &str) -> Result<()> {
        self.require(PairingState::Selected)?;
        if self
            .application_info
            .as_ref()
            .is_some_and(|info| info.initialized)
        {
            return Err(Error::AlreadyInitialized);
        }

        let card_public_key = self.require_public_key()?;
        self.agree_with_card(&card_public_key)?;
        let host_public_key = self.channel.public_key().ok_or(Error::KeyAgreementRequired)?;
        let token = InitCommand::random_pairing_token();
        let command =
            InitCommand::with_secret(&host_public_key, self.channel.shared_secret()?, pin, &token)?;

        self.execute(&command)?;
        info!("card initialized");
        self.select()?;
        Ok(())
    }

    /// Ask the card to prove possession of its identity key.
    pub fn identify(&mut self) -> Result<IdentifyCardResponse> {
        self.require(PairingState::Selected)?;
        let response = self.execute(&IdentifyCardCommand::with_random_nonce())?;
        if self
            .card_public_key
            .is_some_and(|key| key != response.public_key)
        {
            warn!("identify key differs from the selected identity");
            return Err(Error::InvalidPublicKey);
        }
        Ok(response)
    }

    /// Pair with the card, validating its certificate against the configured
    /// CA.
    pub fn pair(&mut self) -> Result<PairingInfo> {
        self.require(PairingState::Selected)?;

        let client_salt = random_salt();
        let pairing_secret = SecretKey::random(&mut thread_rng());
        let step1 = self.execute(&PairStep1Command::new(client_salt, pairing_secret.public_key()))?;

        step1
            .certificate
            .validate(self.config.ca_public_key())
            .map_err(|_| PairingError::InvalidCardCertificate)?;
        let identity = step1.certificate.public_key()?;
        if self.card_public_key.is_some_and(|key| key != identity) {
            warn!("certificate does not belong to the selected card");
            return Err(PairingError::InvalidCardCertificate.into());
        }

        let shared_secret = generate_ecdh_shared_secret(&pairing_secret, &identity);
        let secret = secret_hash(&client_salt, &shared_secret);
        verify_prehash_der(&identity, &secret, &step1.signature)
            .map_err(|_| PairingError::InvalidCardSignature)?;

        let cryptogram = calculate_cryptogram(&[step1.card_salt.as_slice(), secret.as_slice()]);
        let step2 = self.execute(&PairStep2Command::with_cryptogram(cryptogram))?;

        let pairing_key = calculate_cryptogram(&[step2.salt.as_slice(), secret.as_slice()]);
        let pairing_info = PairingInfo::new(pairing_key, step2.index);

        self.certificate = Some(step1.certificate);
        self.pairing_info = Some(pairing_info.clone());
        self.state = PairingState::Paired;
        info!(index = step2.index, "paired with card");
        Ok(pairing_info)
    }

    /// Open the secure channel and mutually authenticate over it.
    pub fn open_secure_channel(&mut self) -> Result<()> {
        self.require(PairingState::Selected)?;
        let (index, pairing_key) = match &self.pairing_info {
            Some(pairing) => (pairing.index, pairing.key),
            None => return Err(Error::PairingRequired),
        };

        let card_public_key = self.require_public_key()?;
        self.agree_with_card(&card_public_key)?;
        let host_public_key = self.channel.public_key().ok_or(Error::KeyAgreementRequired)?;

        let response = self.execute(&OpenSecureChannelCommand::with_pairing_index_and_pubkey(
            index,
            host_public_key,
        ))?;
        let (enc_key, mac_key) =
            derive_session_keys(self.channel.shared_secret()?, &pairing_key, &response.salt);
        self.channel.install_session_keys(response.iv, enc_key, mac_key);
        self.state = PairingState::ChannelOpen;

        if let Err(err) = self.mutually_authenticate() {
            self.close();
            return Err(err);
        }
        Ok(())
    }

    /// Exchange challenges through a freshly opened channel.
    pub fn mutually_authenticate(&mut self) -> Result<()> {
        self.require(PairingState::ChannelOpen)?;
        self.execute(&MutuallyAuthenticateCommand::with_challenge(random_salt()))?;
        self.state = PairingState::Authenticated;
        debug!("mutual authentication complete");
        Ok(())
    }

    /// Close the secure channel, keeping the pairing.
    pub fn close(&mut self) {
        self.channel.close();
        if self.state > PairingState::Paired {
            self.state = PairingState::Paired;
        }
    }

    /// Free a pairing slot. Removing our own slot drops the pairing.
    pub fn unpair(&mut self, index: u8) -> Result<()> {
        self.require(PairingState::Authenticated)?;
        self.execute(&UnpairCommand::with_index(index)?)?;
        if self
            .pairing_info
            .as_ref()
            .is_some_and(|pairing| pairing.index == index)
        {
            self.pairing_info = None;
            self.channel.close();
            self.state = PairingState::Selected;
        }
        Ok(())
    }

    pub fn verify_pin(&mut self, pin: &str) -> Result<()> {
        self.execute(&VerifyPinCommand::with_pin(pin)?)
    }

    pub fn change_pin(&mut self, new_pin: &str) -> Result<()> {
        self.execute(&ChangePinCommand::with_pin(new_pin)?)
    }

    /// Create an empty phonon, returning its slot and public key.
    pub fn create_phonon(&mut self) -> Result<(KeyIndex, PublicKey)> {
        self.execute(&CreatePhononCommand)
    }

    pub fn set_descriptor(&mut self, key_index: KeyIndex, phonon: &Phonon) -> Result<()> {
        self.execute(&SetDescriptorCommand::new(key_index, phonon.clone()))
    }

    pub fn list_phonons(&mut self, filter: PhononFilter) -> Result<Vec<Phonon>> {
        let phonons = self.execute(&ListPhononsCommand::with_filter(filter))?;
        debug!(count = phonons.len(), "listed phonons");
        Ok(phonons)
    }

    pub fn get_phonon_pub_key(&mut self, key_index: KeyIndex) -> Result<Bytes> {
        self.execute(&GetPhononPubKeyCommand::with_key_index(key_index))
    }

    /// Delete a phonon and take its private key off the card.
    pub fn destroy_phonon(&mut self, key_index: KeyIndex) -> Result<SecretKey> {
        self.execute(&DestroyPhononCommand::with_key_index(key_index))
    }

    /// Export phonons to the card this one is paired with. The card deletes
    /// them once the packets are produced.
    ///
    /// The card releases one packet per continuation frame, so a send is
    /// limited to the configured frame cap. If the exchange breaks off after
    /// the first packet, the error is [`Error::IncompleteSend`] carrying the
    /// packets already received; the rest can be fetched with
    /// [`resume_send`](Self::resume_send) once the channel is open again.
    pub fn send_phonons(&mut self, indices: Vec<KeyIndex>) -> Result<Vec<Bytes>> {
        let max = self.config.max_continuation_frames();
        if indices.len() > max {
            return Err(Error::SendLimitExceeded {
                requested: indices.len(),
                max,
            });
        }
        self.collect_packets(&SendPhononsCommand::with_indices(indices)?)
    }

    /// Fetch the packets an interrupted send still owes.
    pub fn resume_send(&mut self) -> Result<Vec<Bytes>> {
        self.collect_packets(&ResumeSendCommand)
    }

    fn collect_packets<C>(&mut self, command: &C) -> Result<Vec<Bytes>>
    where
        C: CardCommand<Output = Vec<Bytes>>,
    {
        let mut packets = Vec::new();
        match self.execute_into(command, &mut packets) {
            Ok(()) => command.parse_frames(packets),
            Err(source) if packets.is_empty() => Err(source),
            Err(source) => {
                warn!(packets = packets.len(), %source, "send broke off mid-stream");
                Err(Error::IncompleteSend {
                    packets,
                    source: Box::new(source),
                })
            }
        }
    }

    pub fn receive_phonons(&mut self, packet: impl Into<Bytes>) -> Result<()> {
        self.execute(&ReceivePhononsCommand::with_packet(packet))
    }

    pub fn load_cert(&mut self, certificate: impl Into<Bytes>) -> Result<()> {
        self.require(PairingState::Selected)?;
        self.execute(&LoadCertCommand::with_certificate(certificate)?)
    }

    pub fn available_memory(&mut self) -> Result<AvailableMemory> {
        self.execute(&GetAvailableMemoryCommand)
    }

    /// Start card pairing as the sending card.
    pub fn init_card_pairing(&mut self, receiver_certificate: &[u8]) -> Result<CardPairingInit> {
        let expected = CardCertificate::parse(receiver_certificate)?;
        self.counterparty_certificate = None;
        let init = self.execute(&InitCardPairingCommand::with_certificate(
            Bytes::copy_from_slice(receiver_certificate),
        ))?;
        self.counterparty_certificate = Some(expected);
        Ok(init)
    }

    /// Answer a sender's INIT_CARD_PAIRING output as the receiving card.
    pub fn card_pair(&mut self, init: CardPairingInit) -> Result<CardPairData> {
        self.execute(&CardPairCommand::with_init(init))
    }

    /// Hand the receiver's answer to the sending card. The receiver must be
    /// the card whose certificate pairing started with.
    pub fn card_pair_2(&mut self, data: CardPairData) -> Result<CardPair2Data> {
        if self
            .counterparty_certificate
            .take()
            .is_some_and(|expected| expected != data.certificate)
        {
            warn!("CARD_PAIR answer came from a different card");
            return Err(Error::CounterpartyCertificateMismatch);
        }
        self.execute(&CardPair2Command::with_session(data.session))
    }

    pub fn finalize_card_pair(&mut self, data: CardPair2Data) -> Result<()> {
        self.execute(&FinalizeCardPairCommand::with_data(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu::TransportError;
    use crate::cert::MOCK_CA_PUBLIC_KEY;
    use crate::mock::MockCard;
    use crate::status::CardError;
    use crate::types::{CurrencyType, Denomination};

    const PIN: &str = "123456";

    fn mock_config() -> CardConfig {
        CardConfig::new().with_ca_public_key(MOCK_CA_PUBLIC_KEY.to_vec())
    }

    fn ready_card() -> PhononCard<MockCard> {
        let mut card = PhononCard::with_config(MockCard::new().unwrap(), mock_config());
        card.select().unwrap();
        card.init(PIN).unwrap();
        card.pair().unwrap();
        card.open_secure_channel().unwrap();
        card.verify_pin(PIN).unwrap();
        card
    }

    #[test]
    fn test_lifecycle_states() {
        let mut card = PhononCard::with_config(MockCard::new().unwrap(), mock_config());
        assert_eq!(card.state(), PairingState::Unselected);
        assert!(matches!(card.pair(), Err(Error::NotSelected)));

        let info = card.select().unwrap();
        assert!(!info.initialized);
        assert_eq!(card.state(), PairingState::Selected);
        assert!(matches!(card.open_secure_channel(), Err(Error::PairingRequired)));

        card.init(PIN).unwrap();
        assert!(card.application_info().unwrap().initialized);
        assert!(matches!(card.init(PIN), Err(Error::AlreadyInitialized)));

        card.pair().unwrap();
        assert_eq!(card.state(), PairingState::Paired);
        assert!(card.certificate().is_some());

        card.open_secure_channel().unwrap();
        assert_eq!(card.state(), PairingState::Authenticated);

        card.close();
        assert_eq!(card.state(), PairingState::Paired);
        assert!(matches!(
            card.verify_pin(PIN),
            Err(Error::SecureChannelNotOpen)
        ));
    }

    #[test]
    fn test_pair_rejects_foreign_ca() {
        let mut card = PhononCard::new(MockCard::new().unwrap());
        card.select().unwrap();
        card.init(PIN).unwrap();
        assert!(matches!(
            card.pair(),
            Err(Error::Pairing(PairingError::InvalidCardCertificate))
        ));
        assert_eq!(card.state(), PairingState::Selected);
    }

    #[test]
    fn test_pair_before_init() {
        let mut card = PhononCard::with_config(MockCard::new().unwrap(), mock_config());
        card.select().unwrap();
        assert!(matches!(
            card.pair(),
            Err(Error::Pairing(PairingError::PinNotSet))
        ));
    }

    #[test]
    fn test_identify() {
        let mut card = PhononCard::with_config(MockCard::new().unwrap(), mock_config());
        card.select().unwrap();
        let response = card.identify().unwrap();
        assert_eq!(Some(&response.public_key), card.card_public_key());
    }

    #[test]
    fn test_wrong_pin_reports_tries() {
        let mut card = PhononCard::with_config(MockCard::new().unwrap(), mock_config());
        card.select().unwrap();
        card.init(PIN).unwrap();
        card.pair().unwrap();
        card.open_secure_channel().unwrap();

        assert!(matches!(
            card.verify_pin("000000"),
            Err(Error::PinTriesRemaining(2))
        ));
        card.verify_pin(PIN).unwrap();
        card.change_pin("654321").unwrap();
        assert!(matches!(
            card.verify_pin(PIN),
            Err(Error::PinTriesRemaining(2))
        ));
        card.verify_pin("654321").unwrap();
    }

    #[test]
    fn test_resume_pairing() {
        let mut card = ready_card();
        let pairing = card.pairing_info().unwrap().clone();
        let mock = std::mem::replace(card.transport_mut(), MockCard::new().unwrap());

        let mut resumed = PhononCard::with_pairing(mock, mock_config(), pairing);
        resumed.select().unwrap();
        assert_eq!(resumed.state(), PairingState::Paired);
        resumed.open_secure_channel().unwrap();
        resumed.verify_pin(PIN).unwrap();
    }

    #[test]
    fn test_phonon_table() {
        let mut card = ready_card();

        let mut indices = Vec::new();
        for (base, currency) in [
            (1, CurrencyType::BITCOIN),
            (5, CurrencyType::ETHEREUM),
            (2, CurrencyType::BITCOIN),
            (9, CurrencyType::BITCOIN),
        ] {
            let (index, public_key) = card.create_phonon().unwrap();
            let phonon = Phonon::new(currency, Denomination::new(base, 3));
            card.set_descriptor(index, &phonon).unwrap();

            let reported = card.get_phonon_pub_key(index).unwrap();
            assert_eq!(PublicKey::from_sec1_bytes(&reported).unwrap(), public_key);
            indices.push(index);
        }

        // Four phonons span two LIST frames
        let all = card.list_phonons(PhononFilter::default()).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[1].currency_type, CurrencyType::ETHEREUM);

        let bitcoin = card
            .list_phonons(PhononFilter {
                currency_type: CurrencyType::BITCOIN,
                less_than: 0,
                greater_than: 1_500,
            })
            .unwrap();
        let values: Vec<_> = bitcoin.iter().filter_map(Phonon::value).collect();
        assert_eq!(values, vec![2_000, 9_000]);

        let destroyed = card.destroy_phonon(indices[0]).unwrap();
        assert!(matches!(
            card.get_phonon_pub_key(indices[0]),
            Err(Error::Card(CardError::KeyIndexInvalid))
        ));

        // The freed slot is handed out again
        let (reused, public_key) = card.create_phonon().unwrap();
        assert_eq!(reused, indices[0]);
        assert_ne!(public_key, destroyed.public_key());
    }

    #[test]
    fn test_phonon_table_full() {
        let mut card = PhononCard::with_config(
            MockCard::new().unwrap().with_capacity(2),
            mock_config(),
        );
        card.select().unwrap();
        card.init(PIN).unwrap();
        card.pair().unwrap();
        card.open_secure_channel().unwrap();
        card.verify_pin(PIN).unwrap();

        card.create_phonon().unwrap();
        card.create_phonon().unwrap();
        assert!(matches!(
            card.create_phonon(),
            Err(Error::Card(CardError::PhononTableFull))
        ));
    }

    #[test]
    fn test_phonon_commands_need_pin() {
        let mut card = PhononCard::with_config(MockCard::new().unwrap(), mock_config());
        card.select().unwrap();
        card.init(PIN).unwrap();
        card.pair().unwrap();
        card.open_secure_channel().unwrap();
        assert!(matches!(
            card.create_phonon(),
            Err(Error::Card(CardError::SecurityStatusNotSatisfied))
        ));
    }

    #[test]
    fn test_continuation_cap() {
        let mut card = ready_card();
        for _ in 0..7 {
            card.create_phonon().unwrap();
        }
        card.config = mock_config().with_max_continuation_frames(2);
        assert!(matches!(
            card.list_phonons(PhononFilter::default()),
            Err(Error::ContinuationLimitExceeded(2))
        ));
    }

    /// Forwards to a mock card and flips a response byte when asked to
    struct Corrupting {
        card: MockCard,
        corrupt_next: bool,
    }

    impl CardTransport for Corrupting {
        fn transmit_raw(&mut self, command: &[u8]) -> std::result::Result<Bytes, TransportError> {
            let response = self.card.transmit_raw(command)?;
            if !std::mem::take(&mut self.corrupt_next) {
                return Ok(response);
            }
            let mut response = response.to_vec();
            response[20] ^= 0x01;
            Ok(response.into())
        }
    }

    #[test]
    fn test_bad_mac_drops_channel() {
        let transport = Corrupting {
            card: MockCard::new().unwrap(),
            corrupt_next: false,
        };
        let mut card = PhononCard::with_config(transport, mock_config());
        card.select().unwrap();
        card.init(PIN).unwrap();
        card.pair().unwrap();
        card.open_secure_channel().unwrap();

        card.transport_mut().corrupt_next = true;
        assert!(matches!(
            card.verify_pin(PIN),
            Err(Error::InvalidResponseMac)
        ));
        assert_eq!(card.state(), PairingState::Paired);
        assert!(matches!(
            card.verify_pin(PIN),
            Err(Error::SecureChannelNotOpen)
        ));

        // A fresh channel works again
        card.open_secure_channel().unwrap();
        card.verify_pin(PIN).unwrap();
        card.create_phonon().unwrap();
    }

    #[test]
    fn test_send_limited_to_frame_cap() {
        let mut card = ready_card();
        card.config = mock_config().with_max_continuation_frames(2);
        let (index, _) = card.create_phonon().unwrap();

        assert!(matches!(
            card.send_phonons(vec![index, KeyIndex::new(1), KeyIndex::new(2)]),
            Err(Error::SendLimitExceeded { requested: 3, max: 2 })
        ));
        assert_eq!(card.list_phonons(PhononFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_unpair_own_slot() {
        let mut card = ready_card();
        let index = card.pairing_info().unwrap().index;
        card.unpair(index).unwrap();
        assert!(card.pairing_info().is_none());
        assert_eq!(card.state(), PairingState::Selected);
    }

    #[test]
    fn test_available_memory() {
        let mut card = PhononCard::with_config(MockCard::new().unwrap(), mock_config());
        card.select().unwrap();
        let memory = card.available_memory().unwrap();
        assert!(memory.persistent > 0);
    }
}
