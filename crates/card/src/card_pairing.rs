//! Card to card pairing.
//!
//! Two cards establish a channel of their own by relaying four messages
//! through their terminals. The local card plays the sender, the
//! counterparty the receiver. The counterparty may sit behind any relay; all
//! the flow needs is a [`CounterpartyCard`].
//!
//! Each step is a separate call so that an embedder can bound it with its
//! own timeout. A failed step, or a step called out of order, resets the flow
//! to [`CardPairingStage::Idle`].

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::apdu::CardTransport;
use crate::application::PhononCard;
use crate::commands::{CardPair2Data, CardPairData, CardPairingInit};
use crate::types::KeyIndex;
use crate::{Error, Result};

/// Progress of a [`CardPairing`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardPairingStage {
    Idle,
    /// Local card answered INIT_CARD_PAIRING
    Initiated,
    /// Counterparty answered CARD_PAIR
    CounterpartyPaired,
    /// Local card accepted the counterparty and answered CARD_PAIR_2
    LocalPaired,
    /// Counterparty accepted the local card
    Finalized,
}

/// The receiving side of a card pairing, as seen from the sender's terminal.
pub trait CounterpartyCard {
    /// Certificate the counterparty card presented to its terminal
    fn certificate(&self) -> Result<Bytes>;

    fn card_pair(&mut self, init: CardPairingInit) -> Result<CardPairData>;

    fn finalize_card_pair(&mut self, data: CardPair2Data) -> Result<()>;

    fn receive_phonons(&mut self, packet: Bytes) -> Result<()>;
}

impl<T: CardTransport> CounterpartyCard for PhononCard<T> {
    fn certificate(&self) -> Result<Bytes> {
        PhononCard::certificate(self)
            .map(|certificate| certificate.serialize())
            .ok_or(Error::PairingRequired)
    }

    fn card_pair(&mut self, init: CardPairingInit) -> Result<CardPairData> {
        PhononCard::card_pair(self, init)
    }

    fn finalize_card_pair(&mut self, data: CardPair2Data) -> Result<()> {
        PhononCard::finalize_card_pair(self, data)
    }

    fn receive_phonons(&mut self, packet: Bytes) -> Result<()> {
        PhononCard::receive_phonons(self, packet)
    }
}

impl<C: CounterpartyCard + ?Sized> CounterpartyCard for &mut C {
    fn certificate(&self) -> Result<Bytes> {
        (**self).certificate()
    }

    fn card_pair(&mut self, init: CardPairingInit) -> Result<CardPairData> {
        (**self).card_pair(init)
    }

    fn finalize_card_pair(&mut self, data: CardPair2Data) -> Result<()> {
        (**self).finalize_card_pair(data)
    }

    fn receive_phonons(&mut self, packet: Bytes) -> Result<()> {
        (**self).receive_phonons(packet)
    }
}

/// Pairing between a local card and a counterparty
pub struct CardPairing<'a, T: CardTransport, C: CounterpartyCard> {
    local: &'a mut PhononCard<T>,
    counterparty: &'a mut C,
    stage: CardPairingStage,
    init: Option<CardPairingInit>,
    pair_data: Option<CardPairData>,
    pair2_data: Option<CardPair2Data>,
}

impl<'a, T: CardTransport, C: CounterpartyCard> CardPairing<'a, T, C> {
    pub fn new(local: &'a mut PhononCard<T>, counterparty: &'a mut C) -> Self {
        Self {
            local,
            counterparty,
            stage: CardPairingStage::Idle,
            init: None,
            pair_data: None,
            pair2_data: None,
        }
    }

    pub const fn stage(&self) -> CardPairingStage {
        self.stage
    }

    fn reset(&mut self) {
        self.stage = CardPairingStage::Idle;
        self.init = None;
        self.pair_data = None;
        self.pair2_data = None;
    }

    /// Run one step from `expected`, resetting on any failure.
    fn step<R>(
        &mut self,
        expected: CardPairingStage,
        next: CardPairingStage,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        if self.stage != expected {
            let actual = self.stage;
            self.reset();
            return Err(Error::CardPairingOutOfOrder { expected, actual });
        }
        match f(self) {
            Ok(output) => {
                debug!(stage = ?next, "card pairing step complete");
                self.stage = next;
                Ok(output)
            }
            Err(err) => {
                warn!(%err, stage = ?expected, "card pairing failed, starting over");
                self.reset();
                Err(err)
            }
        }
    }

    /// INIT_CARD_PAIRING on the local card with the counterparty certificate
    pub fn initiate(&mut self) -> Result<()> {
        self.step(CardPairingStage::Idle, CardPairingStage::Initiated, |flow| {
            let certificate = flow.counterparty.certificate()?;
            flow.init = Some(flow.local.init_card_pairing(&certificate)?);
            Ok(())
        })
    }

    /// CARD_PAIR on the counterparty
    pub fn pair_counterparty(&mut self) -> Result<()> {
        self.step(
            CardPairingStage::Initiated,
            CardPairingStage::CounterpartyPaired,
            |flow| {
                let init = flow.init.take().ok_or(Error::InvalidData("missing pairing init"))?;
                flow.pair_data = Some(flow.counterparty.card_pair(init)?);
                Ok(())
            },
        )
    }

    /// CARD_PAIR_2 on the local card
    pub fn pair_local(&mut self) -> Result<()> {
        self.step(
            CardPairingStage::CounterpartyPaired,
            CardPairingStage::LocalPaired,
            |flow| {
                let data = flow
                    .pair_data
                    .take()
                    .ok_or(Error::InvalidData("missing card pair data"))?;
                flow.pair2_data = Some(flow.local.card_pair_2(data)?);
                Ok(())
            },
        )
    }

    /// FINALIZE_CARD_PAIR on the counterparty
    pub fn finalize(&mut self) -> Result<()> {
        self.step(
            CardPairingStage::LocalPaired,
            CardPairingStage::Finalized,
            |flow| {
                let data = flow
                    .pair2_data
                    .take()
                    .ok_or(Error::InvalidData("missing card pair 2 data"))?;
                flow.counterparty.finalize_card_pair(data)
            },
        )?;
        info!("card pairing complete");
        Ok(())
    }

    /// All four steps in order
    pub fn run(&mut self) -> Result<()> {
        self.initiate()?;
        self.pair_counterparty()?;
        self.pair_local()?;
        self.finalize()
    }

    /// The sending card, for reopening its channel after an interrupted
    /// transfer.
    pub fn local_mut(&mut self) -> &mut PhononCard<T> {
        self.local
    }

    fn require_finalized(&self) -> Result<()> {
        if self.stage != CardPairingStage::Finalized {
            return Err(Error::CardPairingOutOfOrder {
                expected: CardPairingStage::Finalized,
                actual: self.stage,
            });
        }
        Ok(())
    }

    /// Move phonons from the local card to the counterparty. Returns the
    /// number of packets delivered.
    ///
    /// When the send breaks off midway, whatever the local card released is
    /// still delivered and the error is [`Error::TransferInterrupted`]. Reopen
    /// the local channel and call [`resume_transfer`](Self::resume_transfer)
    /// for the rest.
    pub fn transfer_phonons(&mut self, indices: Vec<KeyIndex>) -> Result<usize> {
        self.require_finalized()?;
        let sent = self.local.send_phonons(indices);
        self.deliver(sent)
    }

    /// Deliver the packets an interrupted transfer still owes.
    pub fn resume_transfer(&mut self) -> Result<usize> {
        self.require_finalized()?;
        let sent = self.local.resume_send();
        self.deliver(sent)
    }

    fn deliver(&mut self, sent: Result<Vec<Bytes>>) -> Result<usize> {
        let (packets, interrupted) = match sent {
            Ok(packets) => (packets, None),
            Err(Error::IncompleteSend { packets, source }) => (packets, Some(source)),
            Err(err) => return Err(err),
        };

        let mut pending = packets.into_iter();
        let mut delivered = 0;
        while let Some(packet) = pending.next() {
            if let Err(err) = self.counterparty.receive_phonons(packet.clone()) {
                let mut packets = vec![packet];
                packets.extend(pending);
                warn!(delivered, undelivered = packets.len(), "counterparty refused a packet");
                return Err(Error::IncompleteSend {
                    packets,
                    source: Box::new(err),
                });
            }
            delivered += 1;
        }

        match interrupted {
            None => {
                info!(packets = delivered, "phonons transferred");
                Ok(delivered)
            }
            Some(source) => {
                warn!(delivered, "transfer interrupted");
                Err(Error::TransferInterrupted { delivered, source })
            }
        }
    }
}
