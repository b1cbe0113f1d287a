use std::{fmt, str::FromStr};

use cosmrs::{
    proto::cosmos::{
        bank::v1beta1::MsgSend,
        base::v1beta1::Coin as ProtoCoin,
        distribution::v1beta1::MsgWithdrawDelegatorReward,
        gov::v1beta1::{MsgVote, VoteOption as ProtoVoteOption},
        staking::v1beta1::{MsgBeginRedelegate, MsgDelegate, MsgUndelegate},
    },
    Any,
};
use ibc_proto::{
    cosmos::base::v1beta1::Coin as IbcCoin,
    ibc::{apps::transfer::v1::MsgTransfer, core::client::v1::Height},
};
use prost::Message;
use serde::{Deserialize, Serialize};

use crate::{amount::Coin, Error, Result};

pub const MSG_SEND: &str = "/cosmos.bank.v1beta1.MsgSend";
pub const MSG_DELEGATE: &str = "/cosmos.staking.v1beta1.MsgDelegate";
pub const MSG_UNDELEGATE: &str = "/cosmos.staking.v1beta1.MsgUndelegate";
pub const MSG_BEGIN_REDELEGATE: &str = "/cosmos.staking.v1beta1.MsgBeginRedelegate";
pub const MSG_WITHDRAW_DELEGATOR_REWARD: &str =
    "/cosmos.distribution.v1beta1.MsgWithdrawDelegatorReward";
pub const MSG_VOTE: &str = "/cosmos.gov.v1beta1.MsgVote";
pub const MSG_TRANSFER: &str = "/ibc.applications.transfer.v1.MsgTransfer";

/// Governance vote option.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VoteOption {
    Yes,
    Abstain,
    No,
    NoWithVeto,
}

impl VoteOption {
    pub fn as_proto(self) -> ProtoVoteOption {
        match self {
            Self::Yes => ProtoVoteOption::Yes,
            Self::Abstain => ProtoVoteOption::Abstain,
            Self::No => ProtoVoteOption::No,
            Self::NoWithVeto => ProtoVoteOption::NoWithVeto,
        }
    }
}

impl FromStr for VoteOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let normalized = normalized.strip_prefix("vote_option_").unwrap_or(&normalized);

        match normalized {
            "yes" | "1" => Ok(Self::Yes),
            "abstain" | "2" => Ok(Self::Abstain),
            "no" | "3" => Ok(Self::No),
            "no_with_veto" | "nowithveto" | "4" => Ok(Self::NoWithVeto),
            _ => Err(Error::Protocol(format!(
                "unknown vote option {s:?}, expected yes, abstain, no or no_with_veto"
            ))),
        }
    }
}

impl TryFrom<String> for VoteOption {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<VoteOption> for String {
    fn from(option: VoteOption) -> Self {
        option.to_string()
    }
}

impl fmt::Display for VoteOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => write!(f, "yes"),
            Self::Abstain => write!(f, "abstain"),
            Self::No => write!(f, "no"),
            Self::NoWithVeto => write!(f, "no_with_veto"),
        }
    }
}

/// Parameters of an ICS-20 transfer, with channel and port already canonical.
#[derive(Clone, Debug)]
pub struct TransferParams {
    pub source_port: String,
    pub source_channel: String,
    pub receiver: String,
    pub token: Coin,
    pub timeout_timestamp: u64,
    pub memo: String,
}

/// Messages the signing client knows how to build and sign.
#[derive(Clone, Debug)]
pub enum Msg {
    Send(MsgSend),
    Delegate(MsgDelegate),
    Undelegate(MsgUndelegate),
    Redelegate(MsgBeginRedelegate),
    WithdrawReward(MsgWithdrawDelegatorReward),
    Vote(MsgVote),
    Transfer(MsgTransfer),
    Other(Any),
}

impl Msg {
    pub fn send(from: &str, to: &str, amount: Coin) -> Self {
        Self::Send(MsgSend {
            from_address: from.to_string(),
            to_address: to.to_string(),
            amount: vec![proto_coin(amount)],
        })
    }

    pub fn delegate(delegator: &str, validator: &str, amount: Coin) -> Self {
        Self::Delegate(MsgDelegate {
            delegator_address: delegator.to_string(),
            validator_address: validator.to_string(),
            amount: Some(proto_coin(amount)),
        })
    }

    pub fn undelegate(delegator: &str, validator: &str, amount: Coin) -> Self {
        Self::Undelegate(MsgUndelegate {
            delegator_address: delegator.to_string(),
            validator_address: validator.to_string(),
            amount: Some(proto_coin(amount)),
        })
    }

    pub fn redelegate(delegator: &str, src: &str, dst: &str, amount: Coin) -> Self {
        Self::Redelegate(MsgBeginRedelegate {
            delegator_address: delegator.to_string(),
            validator_src_address: src.to_string(),
            validator_dst_address: dst.to_string(),
            amount: Some(proto_coin(amount)),
        })
    }

    pub fn withdraw_reward(delegator: &str, validator: &str) -> Self {
        Self::WithdrawReward(MsgWithdrawDelegatorReward {
            delegator_address: delegator.to_string(),
            validator_address: validator.to_string(),
        })
    }

    pub fn vote(voter: &str, proposal_id: u64, option: VoteOption) -> Self {
        Self::Vote(MsgVote {
            proposal_id,
            voter: voter.to_string(),
            option: option.as_proto() as i32,
        })
    }

    /// Timestamp-only timeout: the timeout height is left at zero.
    pub fn transfer(sender: &str, params: TransferParams) -> Self {
        Self::Transfer(MsgTransfer {
            source_port: params.source_port,
            source_channel: params.source_channel,
            token: Some(IbcCoin {
                denom: params.token.denom,
                amount: params.token.amount,
            }),
            sender: sender.to_string(),
            receiver: params.receiver,
            timeout_height: Some(Height {
                revision_number: 0,
                revision_height: 0,
            }),
            timeout_timestamp: params.timeout_timestamp,
            memo: params.memo,
        })
    }

    pub fn type_url(&self) -> &str {
        match self {
            Self::Send(_) => MSG_SEND,
            Self::Delegate(_) => MSG_DELEGATE,
            Self::Undelegate(_) => MSG_UNDELEGATE,
            Self::Redelegate(_) => MSG_BEGIN_REDELEGATE,
            Self::WithdrawReward(_) => MSG_WITHDRAW_DELEGATOR_REWARD,
            Self::Vote(_) => MSG_VOTE,
            Self::Transfer(_) => MSG_TRANSFER,
            Self::Other(any) => &any.type_url,
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Send(_) => "send",
            Self::Delegate(_) => "delegate",
            Self::Undelegate(_) => "undelegate",
            Self::Redelegate(_) => "redelegate",
            Self::WithdrawReward(_) => "withdraw_reward",
            Self::Vote(_) => "vote",
            Self::Transfer(_) => "ibc_transfer",
            Self::Other(_) => "other",
        }
    }

    pub fn signer(&self) -> Option<&str> {
        match self {
            Self::Send(msg) => Some(&msg.from_address),
            Self::Delegate(msg) => Some(&msg.delegator_address),
            Self::Undelegate(msg) => Some(&msg.delegator_address),
            Self::Redelegate(msg) => Some(&msg.delegator_address),
            Self::WithdrawReward(msg) => Some(&msg.delegator_address),
            Self::Vote(msg) => Some(&msg.voter),
            Self::Transfer(msg) => Some(&msg.sender),
            Self::Other(_) => None,
        }
    }

    pub fn to_any(&self) -> Any {
        let value = match self {
            Self::Send(msg) => msg.encode_to_vec(),
            Self::Delegate(msg) => msg.encode_to_vec(),
            Self::Undelegate(msg) => msg.encode_to_vec(),
            Self::Redelegate(msg) => msg.encode_to_vec(),
            Self::WithdrawReward(msg) => msg.encode_to_vec(),
            Self::Vote(msg) => msg.encode_to_vec(),
            Self::Transfer(msg) => msg.encode_to_vec(),
            Self::Other(any) => return any.clone(),
        };

        Any {
            type_url: self.type_url().to_string(),
            value,
        }
    }

    pub fn decode(msg: Any) -> Result<Self> {
        let bytes = msg.value.as_slice();
        let decoded = match msg.type_url.as_str() {
            MSG_SEND => MsgSend::decode(bytes).map(Msg::Send),
            MSG_DELEGATE => MsgDelegate::decode(bytes).map(Msg::Delegate),
            MSG_UNDELEGATE => MsgUndelegate::decode(bytes).map(Msg::Undelegate),
            MSG_BEGIN_REDELEGATE => MsgBeginRedelegate::decode(bytes).map(Msg::Redelegate),
            MSG_WITHDRAW_DELEGATOR_REWARD => {
                MsgWithdrawDelegatorReward::decode(bytes).map(Msg::WithdrawReward)
            }
            MSG_VOTE => MsgVote::decode(bytes).map(Msg::Vote),
            MSG_TRANSFER => MsgTransfer::decode(bytes).map(Msg::Transfer),
            _ => return Ok(Msg::Other(msg)),
        };

        decoded.map_err(|e| Error::Protocol(format!("cannot decode {}: {e}", msg.type_url)))
    }
}

impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Msg::Send(msg) => {
                let coins: Vec<String> = msg
                    .amount
                    .iter()
                    .map(|c| format!("{}{}", c.amount, c.denom))
                    .collect();

                write!(f, "Send: {} -> {} ({})", msg.from_address, msg.to_address, coins.join(", "))
            }

            Msg::Delegate(msg) => write!(f, "Delegate: {}", msg.validator_address),

            Msg::Undelegate(msg) => write!(f, "Undelegate: {}", msg.validator_address),

            Msg::Redelegate(msg) => write!(
                f,
                "Redelegate: {} -> {}",
                msg.validator_src_address, msg.validator_dst_address
            ),

            Msg::WithdrawReward(msg) => write!(f, "WithdrawReward: {}", msg.validator_address),

            Msg::Vote(msg) => write!(f, "Vote: proposal {} option {}", msg.proposal_id, msg.option),

            Msg::Transfer(msg) => {
                write!(f, "Transfer: {}/{} -> {}", msg.source_port, msg.source_channel, msg.receiver)
            }

            Msg::Other(msg) => write!(f, "Unhandled msg: {}", msg.type_url),
        }
    }
}

fn proto_coin(coin: Coin) -> ProtoCoin {
    ProtoCoin {
        denom: coin.denom,
        amount: coin.amount,
    }
}
