//! Transaction extra parsing.
//!
//! The extra field is a tag stream: `0x00` padding (must run to the
//! end), `0x01` followed by a 32-byte transaction public key, `0x02`
//! followed by a length byte and that many nonce bytes. A payment id
//! is a 33-byte nonce whose first byte is `0x00`.

//---------------------------------------------------------------------------------------------------- Import
use crate::{PaymentId, PublicKey};

//---------------------------------------------------------------------------------------------------- Constants
const TAG_PADDING: u8 = 0x00;
const TAG_PUBKEY: u8 = 0x01;
const TAG_NONCE: u8 = 0x02;

const NONCE_PAYMENT_ID: u8 = 0x00;

//---------------------------------------------------------------------------------------------------- Fields
/// One parsed extra field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField<'a> {
    Padding(usize),
    PublicKey(PublicKey),
    Nonce(&'a [u8]),
}

/// Iterator over the fields of an extra blob.
///
/// Stops at the first malformed byte; a half-parsed extra keeps
/// whatever well-formed fields preceded the damage, matching how
/// wallets scan it.
pub struct ExtraFieldIter<'a>(&'a [u8]);

impl<'a> ExtraFieldIter<'a> {
    pub fn new(extra: &'a [u8]) -> Self {
        Self(extra)
    }
}

impl<'a> Iterator for ExtraFieldIter<'a> {
    type Item = ExtraField<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (&tag, rest) = self.0.split_first()?;
        match tag {
            TAG_PADDING => {
                if rest.iter().any(|&b| b != 0) {
                    self.0 = &[];
                    return None;
                }
                let len = rest.len();
                self.0 = &[];
                Some(ExtraField::Padding(len + 1))
            }
            TAG_PUBKEY => {
                let key: &[u8; 32] = rest.get(..32)?.try_into().ok()?;
                self.0 = &rest[32..];
                Some(ExtraField::PublicKey(PublicKey(*key)))
            }
            TAG_NONCE => {
                let (&len, data) = rest.split_first()?;
                let nonce = data.get(..usize::from(len))?;
                self.0 = &data[usize::from(len)..];
                Some(ExtraField::Nonce(nonce))
            }
            _ => {
                self.0 = &[];
                None
            }
        }
    }
}

//---------------------------------------------------------------------------------------------------- Public API
/// Extract the payment id, if the extra carries one.
pub fn payment_id_from_extra(extra: &[u8]) -> Option<PaymentId> {
    ExtraFieldIter::new(extra).find_map(|field| match field {
        ExtraField::Nonce([NONCE_PAYMENT_ID, id @ ..]) => id.try_into().ok().map(PaymentId),
        ExtraField::Nonce(_) | ExtraField::Padding(_) | ExtraField::PublicKey(_) => None,
    })
}

/// Extract the transaction public key, if present.
pub fn pubkey_from_extra(extra: &[u8]) -> Option<PublicKey> {
    ExtraFieldIter::new(extra).find_map(|field| match field {
        ExtraField::PublicKey(key) => Some(key),
        ExtraField::Nonce(_) | ExtraField::Padding(_) => None,
    })
}

/// Build an extra blob carrying a public key and, optionally, a
/// payment id.
pub fn build_extra(pubkey: &PublicKey, payment_id: Option<&PaymentId>) -> Vec<u8> {
    let mut extra = Vec::with_capacity(33 + payment_id.map_or(0, |_| 35));
    extra.push(TAG_PUBKEY);
    extra.extend_from_slice(&pubkey.0);
    if let Some(id) = payment_id {
        extra.push(TAG_NONCE);
        extra.push(33);
        extra.push(NONCE_PAYMENT_ID);
        extra.extend_from_slice(&id.0);
    }
    extra
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_pubkey_and_payment_id() {
        let key = PublicKey([3; 32]);
        let id = PaymentId([7; 32]);
        let extra = build_extra(&key, Some(&id));

        assert_eq!(pubkey_from_extra(&extra), Some(key));
        assert_eq!(payment_id_from_extra(&extra), Some(id));
    }

    #[test]
    fn no_payment_id_without_nonce() {
        let extra = build_extra(&PublicKey([3; 32]), None);
        assert_eq!(payment_id_from_extra(&extra), None);
    }

    #[test]
    fn short_nonce_is_not_a_payment_id() {
        // Tag + len 4 + 4 bytes starting with the payment id marker.
        let extra = vec![0x02, 4, 0x00, 1, 2, 3];
        assert_eq!(payment_id_from_extra(&extra), None);
    }

    #[test]
    fn unknown_tag_stops_parsing() {
        let mut extra = vec![0xfe];
        extra.extend(build_extra(&PublicKey([3; 32]), None));
        assert_eq!(pubkey_from_extra(&extra), None);
    }

    #[test]
    fn truncated_pubkey_is_rejected() {
        let extra = vec![0x01, 1, 2, 3];
        assert_eq!(pubkey_from_extra(&extra), None);
    }
}
