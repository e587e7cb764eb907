//! Command exchange with Le renegotiation
//!
//! Contactless cards disagree on how they want the response length announced.
//! Every command is first sent with a short Le probe (`F8`). A card that
//! answers `6700` gets the same command again with `Le = 00`. An exchange the
//! card leaves unanswered is repeated up to the retry budget of the
//! [`NegotiationPolicy`] before giving up with [`Error::NoResponse`].

use tracing::{debug, trace};

use crate::apdu::{ApduCommand, ApduResponse, LE_ANY, LE_SHORT_PROBE};
use crate::error::{Error, Result, TransportError};

/// Default number of retries after an unanswered exchange
pub const DEFAULT_RETRIES: u8 = 3;

/// Raw byte exchange with a contactless card
///
/// Responses include the trailing status word. An exchange the card does not
/// answer is reported as [`TransportError::Timeout`].
pub trait Transceiver {
    fn exchange(&mut self, command: &[u8]) -> std::result::Result<Vec<u8>, TransportError>;
}

impl<T: Transceiver + ?Sized> Transceiver for &mut T {
    fn exchange(&mut self, command: &[u8]) -> std::result::Result<Vec<u8>, TransportError> {
        (**self).exchange(command)
    }
}

/// Retry budget for unanswered exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationPolicy {
    pub retries: u8,
}

impl NegotiationPolicy {
    /// Total attempts per Le value, first try included
    pub const fn attempts(&self) -> u8 {
        self.retries.saturating_add(1)
    }
}

impl Default for NegotiationPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
        }
    }
}

/// A transceiver wrapped with the Le negotiation protocol
#[derive(Debug)]
pub struct CardChannel<T> {
    transceiver: T,
    policy: NegotiationPolicy,
}

impl<T: Transceiver> CardChannel<T> {
    pub fn new(transceiver: T) -> Self {
        Self::with_policy(transceiver, NegotiationPolicy::default())
    }

    pub const fn with_policy(transceiver: T, policy: NegotiationPolicy) -> Self {
        Self {
            transceiver,
            policy,
        }
    }

    pub const fn policy(&self) -> NegotiationPolicy {
        self.policy
    }

    pub fn into_inner(self) -> T {
        self.transceiver
    }

    /// Exchange `command` and return the response data of a 9000 answer.
    pub fn transmit(&mut self, command: &ApduCommand) -> Result<Vec<u8>> {
        let response = self.negotiate(command)?;
        if !response.is_success() {
            debug!(ins = command.ins(), status = %response.status, "card rejected command");
        }
        response.into_data()
    }

    /// Exchange `command`, renegotiating Le if the card asks for it.
    ///
    /// The returned response still carries whatever status the card answered.
    pub fn negotiate(&mut self, command: &ApduCommand) -> Result<ApduResponse> {
        let probe = command.clone().le(LE_SHORT_PROBE);
        let response = self.exchange_with_retries(&probe)?;

        if response.is_wrong_length() {
            debug!(ins = command.ins(), "card rejected short Le probe, resending with Le=00");
            let full = command.clone().le(LE_ANY);
            return self.exchange_with_retries(&full);
        }

        Ok(response)
    }

    fn exchange_with_retries(&mut self, command: &ApduCommand) -> Result<ApduResponse> {
        let apdu = command.build()?;
        let attempts = self.policy.attempts();

        for attempt in 1..=attempts {
            trace!(attempt, apdu = %hex::encode_upper(&apdu), "send");
            match self.transceiver.exchange(&apdu) {
                Ok(raw) => {
                    trace!(response = %hex::encode_upper(&raw), "recv");
                    return ApduResponse::from_raw(&raw);
                }
                Err(TransportError::Timeout) => {
                    debug!(attempt, attempts, "no response from card");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(Error::NoResponse { attempts })
    }
}

#[cfg(test)]
pub(crate) use mock::MockTransceiver;


#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu::{commands, StatusWord};
    use hex_literal::hex;

    const OK: [u8; 2] = [0x90, 0x00];

    #[test]
    fn test_probe_accepted() {
        let mut card = MockTransceiver::new().respond(&hex!("77 02 82 00"), OK);
        let mut channel = CardChannel::new(&mut card);

        let data = channel
            .transmit(&commands::get_processing_options(vec![0x83, 0x00]))
            .unwrap();

        assert_eq!(data, hex!("77 02 82 00"));
        assert_eq!(card.sent, vec![hex!("80 A8 00 00 02 83 00 F8").to_vec()]);
    }

    #[test]
    fn test_wrong_length_resends_with_le_zero() {
        let mut card = MockTransceiver::new()
            .respond(&[], [0x67, 0x00])
            .respond(&hex!("70 00"), OK);
        let mut channel = CardChannel::new(&mut card);

        let data = channel.transmit(&commands::read_record(1, 1)).unwrap();

        assert_eq!(data, hex!("70 00"));
        assert_eq!(
            card.sent,
            vec![hex!("00 B2 01 0C F8").to_vec(), hex!("00 B2 01 0C 00").to_vec()]
        );
    }

    #[test]
    fn test_timeout_is_retried_with_same_command() {
        let mut card = MockTransceiver::new()
            .fail(TransportError::Timeout)
            .fail(TransportError::Timeout)
            .respond(&[], OK);
        let mut channel = CardChannel::new(&mut card);

        channel.transmit(&commands::read_record(2, 1)).unwrap();

        assert_eq!(card.sent.len(), 3);
        assert!(card.sent.iter().all(|apdu| apdu == &hex!("00 B2 02 0C F8")));
    }

    #[test]
    fn test_retry_budget_is_bounded() {
        // The mock answers Timeout forever once its script is empty.
        let mut card = MockTransceiver::new();
        let mut channel = CardChannel::new(&mut card);

        let err = channel.transmit(&commands::read_record(1, 1)).unwrap_err();

        assert!(matches!(err, Error::NoResponse { attempts: 4 }));
        assert_eq!(card.sent.len(), 1 + DEFAULT_RETRIES as usize);
    }

    #[test]
    fn test_custom_retry_budget() {
        let mut card = MockTransceiver::new();
        let mut channel = CardChannel::with_policy(&mut card, NegotiationPolicy { retries: 0 });

        let err = channel.transmit(&commands::read_record(1, 1)).unwrap_err();

        assert!(matches!(err, Error::NoResponse { attempts: 1 }));
        assert_eq!(card.sent.len(), 1);
    }

    #[test]
    fn test_link_failure_is_not_retried() {
        let mut card = MockTransceiver::new().fail(TransportError::Failed("reader unplugged".into()));
        let mut channel = CardChannel::new(&mut card);

        let err = channel.transmit(&commands::read_record(1, 1)).unwrap_err();

        assert!(matches!(err, Error::Transport(TransportError::Failed(_))));
        assert_eq!(card.sent.len(), 1);
    }

    #[test]
    fn test_error_status_is_reported() {
        let mut card = MockTransceiver::new().respond(&[], [0x6A, 0x82]);
        let mut channel = CardChannel::new(&mut card);

        let err = channel.transmit(&commands::select(b"2PAY.SYS.DDF01")).unwrap_err();

        assert!(matches!(err, Error::Status(sw) if sw == StatusWord::new(0x6A, 0x82)));
    }

    #[test]
    fn test_wrong_length_twice_is_a_status_error() {
        let mut card = MockTransceiver::new()
            .respond(&[], [0x67, 0x00])
            .respond(&[], [0x67, 0x00]);
        let mut channel = CardChannel::new(&mut card);

        let err = channel.transmit(&commands::read_record(1, 1)).unwrap_err();

        assert!(matches!(err, Error::Status(StatusWord::WRONG_LENGTH)));
        assert_eq!(card.sent.len(), 2);
    }
}
