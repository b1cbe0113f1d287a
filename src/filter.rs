//! Event categories and the consensus-node query each one subscribes with.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tendermint_rpc::query::Query;

use crate::{Error, Result};

const TX: &str = "tm.event='Tx'";
const NEW_BLOCK: &str = "tm.event='NewBlock'";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventCategory {
    NewBlock,
    NewTransaction,
    TransferReceived,
    TransferSent,
    DelegationCreated,
    DelegationUpdated,
    UndelegationStarted,
    UndelegationCompleted,
    RedelegationStarted,
    RewardsWithdrawn,
    ProposalCreated,
    ProposalVotingStarted,
    ProposalVoted,
    ProposalPassed,
    ProposalRejected,
    IbcTransferSent,
    IbcTransferReceived,
    ValidatorSlashed,
    ValidatorJailed,
    Custom,
}

impl EventCategory {
    pub const ALL: [EventCategory; 20] = [
        Self::NewBlock,
        Self::NewTransaction,
        Self::TransferReceived,
        Self::TransferSent,
        Self::DelegationCreated,
        Self::DelegationUpdated,
        Self::UndelegationStarted,
        Self::UndelegationCompleted,
        Self::RedelegationStarted,
        Self::RewardsWithdrawn,
        Self::ProposalCreated,
        Self::ProposalVotingStarted,
        Self::ProposalVoted,
        Self::ProposalPassed,
        Self::ProposalRejected,
        Self::IbcTransferSent,
        Self::IbcTransferReceived,
        Self::ValidatorSlashed,
        Self::ValidatorJailed,
        Self::Custom,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::NewBlock => "newBlock",
            Self::NewTransaction => "newTransaction",
            Self::TransferReceived => "transferReceived",
            Self::TransferSent => "transferSent",
            Self::DelegationCreated => "delegationCreated",
            Self::DelegationUpdated => "delegationUpdated",
            Self::UndelegationStarted => "undelegationStarted",
            Self::UndelegationCompleted => "undelegationCompleted",
            Self::RedelegationStarted => "redelegationStarted",
            Self::RewardsWithdrawn => "rewardsWithdrawn",
            Self::ProposalCreated => "proposalCreated",
            Self::ProposalVotingStarted => "proposalVotingStarted",
            Self::ProposalVoted => "proposalVoted",
            Self::ProposalPassed => "proposalPassed",
            Self::ProposalRejected => "proposalRejected",
            Self::IbcTransferSent => "ibcTransferSent",
            Self::IbcTransferReceived => "ibcTransferReceived",
            Self::ValidatorSlashed => "validatorSlashed",
            Self::ValidatorJailed => "validatorJailed",
            Self::Custom => "custom",
        }
    }

    /// Whether the template interpolates a watched account address.
    pub fn needs_address(self) -> bool {
        matches!(
            self,
            Self::TransferReceived
                | Self::TransferSent
                | Self::DelegationCreated
                | Self::DelegationUpdated
                | Self::UndelegationStarted
                | Self::RewardsWithdrawn
        )
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EventCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidFilter(format!("unknown event category {s:?}")))
    }
}

/// What the caller wants to watch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterParams {
    pub category: EventCategory,
    #[serde(default)]
    pub watch_address: Option<String>,
    #[serde(default)]
    pub validator_address: Option<String>,
    #[serde(default)]
    pub proposal_id: Option<u64>,
    #[serde(default)]
    pub custom_query: Option<String>,
}

impl FilterParams {
    pub fn new(category: EventCategory) -> Self {
        Self {
            category,
            watch_address: None,
            validator_address: None,
            proposal_id: None,
            custom_query: None,
        }
    }

    /// Resolve the query string. Values are interpolated verbatim; only a
    /// custom query is checked against the query grammar.
    pub fn build_query(&self) -> Result<String> {
        use EventCategory::*;

        let query = match self.category {
            NewBlock => NEW_BLOCK.to_string(),
            NewTransaction => TX.to_string(),
            TransferReceived => tx_and(format!("transfer.recipient='{}'", self.address()?)),
            TransferSent => tx_and(format!("transfer.sender='{}'", self.address()?)),
            DelegationCreated | DelegationUpdated => {
                tx_and(format!("delegate.delegator='{}'", self.address()?))
            }
            UndelegationStarted => tx_and(format!("unbond.delegator='{}'", self.address()?)),
            UndelegationCompleted => tx_and("complete_unbonding.delegator EXISTS"),
            RedelegationStarted => tx_and("redelegate.delegator EXISTS"),
            RewardsWithdrawn => {
                tx_and(format!("withdraw_rewards.delegator='{}'", self.address()?))
            }
            ProposalCreated => tx_and("submit_proposal.proposal_id EXISTS"),
            ProposalVotingStarted => tx_and("proposal_deposit.voting_period_start EXISTS"),
            ProposalVoted => match self.proposal_id {
                Some(id) if id > 0 => tx_and(format!("proposal_vote.proposal_id='{id}'")),
                _ => tx_and("proposal_vote.proposal_id EXISTS"),
            },
            ProposalPassed => tx_and("active_proposal.proposal_result='passed'"),
            ProposalRejected => tx_and("active_proposal.proposal_result='rejected'"),
            IbcTransferSent => tx_and("send_packet.packet_src_channel EXISTS"),
            IbcTransferReceived => tx_and("recv_packet.packet_dst_channel EXISTS"),
            ValidatorSlashed => match non_empty(&self.validator_address) {
                Some(validator) => tx_and(format!("slash.validator='{validator}'")),
                None => tx_and("slash.validator EXISTS"),
            },
            ValidatorJailed => tx_and("liveness.jailed_until EXISTS"),
            Custom => {
                let query = non_empty(&self.custom_query).ok_or_else(|| {
                    Error::InvalidFilter("custom category requires a query".to_string())
                })?;

                Query::from_str(query.trim())
                    .map_err(|e| Error::InvalidFilter(format!("{query:?}: {e}")))?;

                query.to_string()
            }
        };

        Ok(query)
    }

    fn address(&self) -> Result<&str> {
        non_empty(&self.watch_address).ok_or_else(|| {
            Error::InvalidFilter(format!("{} requires a watched address", self.category))
        })
    }
}

fn tx_and(condition: impl AsRef<str>) -> String {
    format!("{TX} AND {}", condition.as_ref())
}

/// The value as given, unless it is absent or blank.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}
