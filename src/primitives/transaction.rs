// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::{Money, MAX_PROFILE_BYTES, TRANSACTION_LIMIT_SIZE};
use crate::primitives::{
    Address, Hash256, PublicKey, SerialPair, Signature, TicketStatus,
};
use bincode::{Decode, Encode};
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

/// Max outputs per transaction
pub const MAX_TX_OUTPUTS: usize = 1024;

/// Max inputs per transaction
pub const MAX_TX_INPUTS: usize = 1024;

/// Reference to an output of a previous transaction
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Encode, Decode, Serialize, Deserialize,
)]
pub struct OutPoint {
    pub txid: Hash256,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, index: u32) -> Self {
        Self { txid, index }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Encode, Decode, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: Address,
    pub amount: Money,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum TxKind {
    Coinbase,
    ValueTransfer,
    TicketCommit,
    TicketRedeemIdentity,
    TicketRedeemValue,
}

#[derive(Clone, PartialEq, Eq, Debug, Encode, Decode)]
pub enum TxBody {
    /// Block reward plus fees. Only valid as the first transaction of a block.
    Coinbase { height: u64, outputs: Vec<TxOutput> },

    ValueTransfer {
        inputs: Vec<OutPoint>,
        outputs: Vec<TxOutput>,
    },

    /// Registers a ticket. `locked_value` is funded by `inputs`, which must be
    /// owned by the signer. Remaining value goes to `change` and the fee.
    TicketCommit {
        serials: SerialPair,
        artifact_hash: Hash256,
        locked_value: Money,
        inputs: Vec<OutPoint>,
        change: Vec<TxOutput>,
    },

    /// Links the ticket to an identity profile. Carries no fee.
    TicketRedeemIdentity {
        serials: SerialPair,
        profile: Vec<u8>,
    },

    /// Burns the ticket and pays `locked_value - fee` to the signer.
    TicketRedeemValue { serials: SerialPair },
}

#[derive(Clone, PartialEq, Eq, Debug, Encode, Decode)]
pub struct Witness {
    pub public_key: PublicKey,
    pub signature: Signature,
}

#[derive(Clone, PartialEq, Eq, Debug, Encode, Decode)]
pub struct Transaction {
    pub body: TxBody,
    pub fee: Money,

    /// `None` only for coinbase transactions
    pub witness: Option<Witness>,
}

impl Transaction {
    pub fn new_coinbase(height: u64, outputs: Vec<TxOutput>) -> Self {
        Self {
            body: TxBody::Coinbase { height, outputs },
            fee: 0,
            witness: None,
        }
    }

    /// Build and sign a transaction with the given key
    pub fn new_signed(body: TxBody, fee: Money, key: &SigningKey) -> Self {
        let public_key = PublicKey(key.verifying_key());
        let message = Self::signing_message(&body, fee, &public_key);
        let signature = Signature(key.sign(message.as_bytes()));

        Self {
            body,
            fee,
            witness: Some(Witness {
                public_key,
                signature,
            }),
        }
    }

    /// Message covered by the signature
    pub fn signing_message(body: &TxBody, fee: Money, public_key: &PublicKey) -> Hash256 {
        let bytes = crate::codec::encode_to_vec(&(body, fee, public_key)).unwrap_or_default();
        Hash256::hash_from_slice(bytes, "tx.sighash")
    }

    pub fn kind(&self) -> TxKind {
        match self.body {
            TxBody::Coinbase { .. } => TxKind::Coinbase,
            TxBody::ValueTransfer { .. } => TxKind::ValueTransfer,
            TxBody::TicketCommit { .. } => TxKind::TicketCommit,
            TxBody::TicketRedeemIdentity { .. } => TxKind::TicketRedeemIdentity,
            TxBody::TicketRedeemValue { .. } => TxKind::TicketRedeemValue,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self.body, TxBody::Coinbase { .. })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(self).unwrap_or_default()
    }

    /// Content hash identifying the transaction
    pub fn hash(&self) -> Hash256 {
        Hash256::hash_from_slice(self.to_bytes(), "tx")
    }

    pub fn size(&self) -> usize {
        crate::codec::encoded_len(self)
    }

    pub fn signer(&self) -> Option<&PublicKey> {
        self.witness.as_ref().map(|w| &w.public_key)
    }

    pub fn signer_address(&self) -> Option<Address> {
        self.signer().map(PublicKey::to_address)
    }

    /// Outputs consumed by this transaction
    pub fn inputs(&self) -> &[OutPoint] {
        match &self.body {
            TxBody::ValueTransfer { inputs, .. } | TxBody::TicketCommit { inputs, .. } => inputs,
            _ => &[],
        }
    }

    /// Outputs declared in the body. Redemption payouts are created by the ledger.
    pub fn outputs(&self) -> &[TxOutput] {
        match &self.body {
            TxBody::Coinbase { outputs, .. } | TxBody::ValueTransfer { outputs, .. } => outputs,
            TxBody::TicketCommit { change, .. } => change,
            _ => &[],
        }
    }

    pub fn serials(&self) -> Option<&SerialPair> {
        match &self.body {
            TxBody::TicketCommit { serials, .. }
            | TxBody::TicketRedeemIdentity { serials, .. }
            | TxBody::TicketRedeemValue { serials } => Some(serials),
            _ => None,
        }
    }

    pub fn verify_signature(&self) -> Result<(), TxVerifyErr> {
        let witness = self.witness.as_ref().ok_or(TxVerifyErr::MissingWitness)?;
        let message = Self::signing_message(&self.body, self.fee, &witness.public_key);

        if witness.public_key.verify(message.as_bytes(), &witness.signature) {
            Ok(())
        } else {
            Err(TxVerifyErr::InvalidSignature)
        }
    }

    /// Checks that do not need chain state. Signatures are verified here too.
    pub fn validate_stateless(&self) -> Result<(), TxVerifyErr> {
        if self.size() > TRANSACTION_LIMIT_SIZE {
            return Err(TxVerifyErr::Oversized);
        }

        if self.inputs().len() > MAX_TX_INPUTS || self.outputs().len() > MAX_TX_OUTPUTS {
            return Err(TxVerifyErr::Oversized);
        }

        for output in self.outputs() {
            if output.amount == 0 {
                return Err(TxVerifyErr::ZeroOutputAmount);
            }
        }

        sum_outputs(self.outputs())?;

        let mut seen = HashSet::with_capacity(self.inputs().len());
        for input in self.inputs() {
            if !seen.insert(input) {
                return Err(TxVerifyErr::DuplicateInputs);
            }
        }

        match &self.body {
            TxBody::Coinbase { .. } => {
                if self.witness.is_some() {
                    return Err(TxVerifyErr::UnexpectedWitness);
                }

                if self.fee != 0 {
                    return Err(TxVerifyErr::FeeNotAllowed);
                }

                return Ok(());
            }

            TxBody::ValueTransfer { inputs, .. } => {
                if inputs.is_empty() {
                    return Err(TxVerifyErr::NoInputs);
                }
            }

            TxBody::TicketCommit {
                serials,
                inputs,
                locked_value,
                ..
            } => {
                if inputs.is_empty() {
                    return Err(TxVerifyErr::NoInputs);
                }

                if !serials.is_well_formed() {
                    return Err(TxVerifyErr::MalformedSerials);
                }

                if *locked_value == 0 {
                    return Err(TxVerifyErr::ZeroOutputAmount);
                }
            }

            TxBody::TicketRedeemIdentity { serials, profile } => {
                if !serials.is_well_formed() {
                    return Err(TxVerifyErr::MalformedSerials);
                }

                if profile.len() > MAX_PROFILE_BYTES {
                    return Err(TxVerifyErr::ProfileTooLarge);
                }

                if self.fee != 0 {
                    return Err(TxVerifyErr::FeeNotAllowed);
                }
            }

            TxBody::TicketRedeemValue { serials } => {
                if !serials.is_well_formed() {
                    return Err(TxVerifyErr::MalformedSerials);
                }
            }
        }

        self.verify_signature()
    }
}

/// Sum output amounts, failing on overflow
pub fn sum_outputs(outputs: &[TxOutput]) -> Result<Money, TxVerifyErr> {
    outputs.iter().try_fold(0 as Money, |acc, o| {
        acc.checked_add(o.amount).ok_or(TxVerifyErr::AmountOverflow)
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxVerifyErr {
    InvalidSignature,
    MissingWitness,
    UnexpectedWitness,
    ZeroOutputAmount,
    NoInputs,
    DuplicateInputs,
    AmountOverflow,
    Oversized,
    MalformedSerials,
    ProfileTooLarge,
    FeeNotAllowed,
    UnknownInput(OutPoint),
    InputSpent(OutPoint),
    InputNotOwned(OutPoint),
    CoinbaseOutSpentBeforeMaturation(OutPoint),
    InsufficientFunds,
    TicketExists,
    UnknownTicket,
    TicketNotCommitted(TicketStatus),
    OwnerMismatch,
    FeeExceedsLockedValue,
    InvalidCoinbase,
    UnexpectedCoinbase,
}

impl fmt::Display for TxVerifyErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSignature => f.write_str("invalid signature"),
            Self::MissingWitness => f.write_str("missing witness"),
            Self::UnexpectedWitness => f.write_str("coinbase must not carry a witness"),
            Self::ZeroOutputAmount => f.write_str("zero amount"),
            Self::NoInputs => f.write_str("no inputs"),
            Self::DuplicateInputs => f.write_str("duplicate inputs"),
            Self::AmountOverflow => f.write_str("amount overflow"),
            Self::Oversized => f.write_str("transaction too large"),
            Self::MalformedSerials => f.write_str("malformed ticket serials"),
            Self::ProfileTooLarge => f.write_str("profile payload too large"),
            Self::FeeNotAllowed => f.write_str("fee not allowed for this transaction kind"),
            Self::UnknownInput(o) => write!(f, "unknown input {}:{}", o.txid, o.index),
            Self::InputSpent(o) => write!(f, "input already spent {}:{}", o.txid, o.index),
            Self::InputNotOwned(o) => write!(f, "input not owned by signer {}:{}", o.txid, o.index),
            Self::CoinbaseOutSpentBeforeMaturation(o) => {
                write!(f, "immature coinbase output {}:{}", o.txid, o.index)
            }
            Self::InsufficientFunds => f.write_str("inputs do not cover outputs and fee"),
            Self::TicketExists => f.write_str("ticket serial pair already registered"),
            Self::UnknownTicket => f.write_str("unknown ticket serial pair"),
            Self::TicketNotCommitted(status) => write!(f, "ticket not COMMITTED (status {status})"),
            Self::OwnerMismatch => f.write_str("signer does not own ticket"),
            Self::FeeExceedsLockedValue => f.write_str("fee exceeds locked value"),
            Self::InvalidCoinbase => f.write_str("invalid coinbase"),
            Self::UnexpectedCoinbase => f.write_str("coinbase outside of block"),
        }
    }
}

/// Fee rate compared exactly as `fee / size` without rounding.
#[derive(Clone, Copy, Debug)]
pub struct FeeRate {
    pub fee: Money,
    pub size: u32,
}

impl FeeRate {
    pub fn new(fee: Money, size: usize) -> Self {
        Self {
            fee,
            size: size.max(1) as u32,
        }
    }

    pub fn per_byte(&self) -> f64 {
        self.fee as f64 / self.size as f64
    }
}

impl PartialEq for FeeRate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FeeRate {}

impl PartialOrd for FeeRate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FeeRate {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.fee as u128 * other.size as u128;
        let b = other.fee as u128 * self.size as u128;
        a.cmp(&b)
    }
}

#[derive(Clone, Debug)]
/// `TransactionWithFee` struct used for the mempool.
pub struct TransactionWithFee {
    pub(crate) tx: Transaction,
    pub(crate) hash: Hash256,
    pub(crate) fee_rate: FeeRate,
    pub(crate) tx_size: u32,
}

impl TransactionWithFee {
    pub fn from_transaction(tx: Transaction) -> Self {
        let tx_size = tx.size();
        Self {
            hash: tx.hash(),
            fee_rate: FeeRate::new(tx.fee, tx_size),
            tx_size: tx_size as u32,
            tx,
        }
    }

    #[must_use]
    pub fn hash(&self) -> &Hash256 {
        &self.hash
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }
}

impl From<TransactionWithFee> for Transaction {
    fn from(other: TransactionWithFee) -> Self {
        other.tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::COIN;
    use crate::test_util::*;

    #[test]
    fn signed_transaction_verifies() {
        let key = test_key(1);
        let tx = transfer(
            &key,
            vec![OutPoint::new(Hash256::zero(), 0)],
            vec![TxOutput { address: address_of(&test_key(2)), amount: COIN }],
            10,
        );
        assert_eq!(tx.kind(), TxKind::ValueTransfer);
        assert!(tx.validate_stateless().is_ok());
        assert_eq!(tx.signer_address(), Some(address_of(&key)));
    }

    #[test]
    fn tampering_breaks_signature() {
        let key = test_key(1);
        let mut tx = transfer(
            &key,
            vec![OutPoint::new(Hash256::zero(), 0)],
            vec![TxOutput { address: address_of(&key), amount: COIN }],
            10,
        );
        tx.fee = 11;
        assert_eq!(tx.validate_stateless(), Err(TxVerifyErr::InvalidSignature));
    }

    #[test]
    fn hash_is_content_bound() {
        let key = test_key(1);
        let a = transfer(&key, vec![OutPoint::new(Hash256::zero(), 0)], vec![], 1);
        let b = transfer(&key, vec![OutPoint::new(Hash256::zero(), 1)], vec![], 1);
        assert_eq!(a.hash(), a.clone().hash());
        assert_ne!(a.hash(), b.hash());
        let decoded: Transaction = crate::codec::decode(&a.to_bytes()).unwrap();
        assert_eq!(decoded, a);
    }

    #[test]
    fn duplicate_inputs_are_rejected() {
        let key = test_key(1);
        let input = OutPoint::new(Hash256::zero(), 0);
        let tx = transfer(&key, vec![input, input], vec![], 1);
        assert_eq!(tx.validate_stateless(), Err(TxVerifyErr::DuplicateInputs));
    }

    #[test]
    fn coinbase_rules() {
        let cb = Transaction::new_coinbase(1, vec![TxOutput { address: Address::zero(), amount: 1 }]);
        assert!(cb.validate_stateless().is_ok());
        let zero = Transaction::new_coinbase(1, vec![TxOutput { address: Address::zero(), amount: 0 }]);
        assert_eq!(zero.validate_stateless(), Err(TxVerifyErr::ZeroOutputAmount));
    }

    #[test]
    fn identity_redemption_carries_no_fee() {
        let key = test_key(3);
        let body = TxBody::TicketRedeemIdentity {
            serials: SerialPair::new("A1", "B1"),
            profile: b"alice".to_vec(),
        };
        let tx = Transaction::new_signed(body.clone(), 1, &key);
        assert_eq!(tx.validate_stateless(), Err(TxVerifyErr::FeeNotAllowed));
        let tx = Transaction::new_signed(body, 0, &key);
        assert!(tx.validate_stateless().is_ok());

        let tx = Transaction::new_signed(
            TxBody::TicketRedeemIdentity {
                serials: SerialPair::new("A1", "B1"),
                profile: vec![0; MAX_PROFILE_BYTES + 1],
            },
            0,
            &key,
        );
        assert_eq!(tx.validate_stateless(), Err(TxVerifyErr::ProfileTooLarge));
    }

    #[test]
    fn malformed_serials_are_rejected() {
        let tx = Transaction::new_signed(
            TxBody::TicketRedeemValue {
                serials: SerialPair::new("", "B1"),
            },
            0,
            &test_key(3),
        );
        assert_eq!(tx.validate_stateless(), Err(TxVerifyErr::MalformedSerials));
    }

    #[test]
    fn fee_rate_ordering_is_exact() {
        assert!(FeeRate::new(10, 100) > FeeRate::new(9, 100));
        assert!(FeeRate::new(1, 3) > FeeRate::new(33, 100));
        assert_eq!(FeeRate::new(2, 200), FeeRate::new(1, 100));
    }

    #[test]
    fn not_committed_message() {
        let err = TxVerifyErr::TicketNotCommitted(TicketStatus::Burned);
        assert!(err.to_string().starts_with("ticket not COMMITTED"));
    }
}
