// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Ticket redemption rules.
//!
//! Redemptions are ordinary transactions evaluated by every node against the
//! ticket registry. There is no privileged party: a claim either satisfies the
//! on-chain record or it is rejected outright.

use crate::consensus::Money;
use crate::primitives::{Address, Ticket, TicketStatus, TxBody, TxVerifyErr};

/// Result of a successful claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionOutcome {
    /// Ticket record after the transition
    pub updated: Ticket,

    /// Value credited to the claimant. Zero for identity links.
    pub payout: Money,
}

/// Checks that `ticket` exists, is still committed and is owned by `claimant`.
pub fn validate_claim<'a>(
    ticket: Option<&'a Ticket>,
    claimant: &Address,
) -> Result<&'a Ticket, TxVerifyErr> {
    let ticket = ticket.ok_or(TxVerifyErr::UnknownTicket)?;

    if ticket.status != TicketStatus::Committed {
        return Err(TxVerifyErr::TicketNotCommitted(ticket.status));
    }

    if &ticket.owner != claimant {
        return Err(TxVerifyErr::OwnerMismatch);
    }

    Ok(ticket)
}

/// Evaluates a redemption body against the current ticket record.
pub fn redeem(
    ticket: Option<&Ticket>,
    claimant: &Address,
    body: &TxBody,
    fee: Money,
) -> Result<RedemptionOutcome, TxVerifyErr> {
    let ticket = validate_claim(ticket, claimant)?;
    let mut updated = ticket.clone();

    match body {
        TxBody::TicketRedeemIdentity { profile, .. } => {
            debug_assert!(ticket.status.can_transition_to(TicketStatus::Linked));
            updated.status = TicketStatus::Linked;
            updated.profile = Some(profile.clone());

            Ok(RedemptionOutcome { updated, payout: 0 })
        }

        TxBody::TicketRedeemValue { .. } => {
            debug_assert!(ticket.status.can_transition_to(TicketStatus::Burned));
            let payout = ticket
                .locked_value
                .checked_sub(fee)
                .ok_or(TxVerifyErr::FeeExceedsLockedValue)?;
            updated.status = TicketStatus::Burned;

            Ok(RedemptionOutcome { updated, payout })
        }

        _ => Err(TxVerifyErr::UnknownTicket),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{Hash256, SerialPair};

    fn ticket(owner: Address, status: TicketStatus) -> Ticket {
        Ticket {
            serials: SerialPair::new("LKC-0001", "F-0001"),
            artifact_hash: Hash256::hash_from_slice(b"<svg/>", "artifact"),
            owner,
            locked_value: 1_000,
            status,
            profile: None,
            commit_tx: Hash256::zero(),
            commit_height: 1,
        }
    }

    fn value_claim() -> TxBody {
        TxBody::TicketRedeemValue {
            serials: SerialPair::new("LKC-0001", "F-0001"),
        }
    }

    #[test]
    fn it_burns_and_pays_out() {
        let owner = Address::random();
        let t = ticket(owner, TicketStatus::Committed);
        let outcome = redeem(Some(&t), &owner, &value_claim(), 10).unwrap();
        assert_eq!(outcome.payout, 990);
        assert_eq!(outcome.updated.status, TicketStatus::Burned);
    }

    #[test]
    fn it_links_identity() {
        let owner = Address::random();
        let t = ticket(owner, TicketStatus::Committed);
        let body = TxBody::TicketRedeemIdentity {
            serials: t.serials.clone(),
            profile: b"{\"name\":\"luna\"}".to_vec(),
        };
        let outcome = redeem(Some(&t), &owner, &body, 0).unwrap();
        assert_eq!(outcome.payout, 0);
        assert_eq!(outcome.updated.status, TicketStatus::Linked);
        assert_eq!(outcome.updated.profile.as_deref(), Some(&b"{\"name\":\"luna\"}"[..]));
    }

    #[test]
    fn it_rejects_bad_claims() {
        let owner = Address::random();
        assert_eq!(
            redeem(None, &owner, &value_claim(), 0),
            Err(TxVerifyErr::UnknownTicket)
        );

        let linked = ticket(owner, TicketStatus::Linked);
        assert_eq!(
            redeem(Some(&linked), &owner, &value_claim(), 0),
            Err(TxVerifyErr::TicketNotCommitted(TicketStatus::Linked))
        );

        let t = ticket(owner, TicketStatus::Committed);
        assert_eq!(
            redeem(Some(&t), &Address::random(), &value_claim(), 0),
            Err(TxVerifyErr::OwnerMismatch)
        );

        assert_eq!(
            redeem(Some(&t), &owner, &value_claim(), 1_001),
            Err(TxVerifyErr::FeeExceedsLockedValue)
        );
    }

    #[test]
    fn statuses_only_move_forward() {
        use TicketStatus::*;
        assert!(Committed.can_transition_to(Linked));
        assert!(Committed.can_transition_to(Burned));
        assert!(!Linked.can_transition_to(Burned));
        assert!(!Burned.can_transition_to(Committed));
        assert!(!Linked.can_transition_to(Linked));
    }
}
