//! ABI bindings and calldata for the USDC token and the xReserve relay

use crate::bridge::address::RemoteRecipient;
use crate::bridge::correlation::CorrelationId;
use crate::error::{ChainError, ChainResult};

use ethers::abi::{AbiDecode, AbiEncode};
use ethers::prelude::abigen;
use ethers::types::{Address, Bytes, U256};
use serde::Serialize;
use std::fmt;

abigen!(
    Erc20,
    r#"[
        function approve(address spender, uint256 amount) external returns (bool)
        function allowance(address owner, address spender) external view returns (uint256)
        function balanceOf(address account) external view returns (uint256)
    ]"#
);

abigen!(
    XReserve,
    r#"[
        function depositToRemote(uint256 value, uint32 remoteDomain, bytes32 remoteRecipient, address localToken, uint256 maxFee, bytes hookData) external
    ]"#
);

/// What a signed transaction is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Approval,
    Deposit,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Approval => "approval",
            TxKind::Deposit => "deposit",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contract call ready to be signed by the source wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSpec {
    pub to: Address,
    pub data: Bytes,
    pub kind: TxKind,
}

/// Fixed parameters of every deposit on one network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositRoute {
    pub reserve: Address,
    pub token: Address,
    pub remote_domain: u32,
    /// Zero leaves the fee to the relay default
    pub max_fee: U256,
}

pub fn approve_tx(token: Address, spender: Address, amount: U256) -> TxSpec {
    let call = ApproveCall { spender, amount };
    TxSpec {
        to: token,
        data: call.encode().into(),
        kind: TxKind::Approval,
    }
}

pub fn deposit_tx(
    route: &DepositRoute,
    value: U256,
    recipient: &RemoteRecipient,
    correlation_id: &CorrelationId,
) -> TxSpec {
    let call = DepositToRemoteCall {
        value,
        remote_domain: route.remote_domain,
        remote_recipient: *recipient.as_bytes(),
        local_token: route.token,
        max_fee: route.max_fee,
        hook_data: Bytes::from(correlation_id.as_bytes().to_vec()),
    };
    TxSpec {
        to: route.reserve,
        data: call.encode().into(),
        kind: TxKind::Deposit,
    }
}

pub fn allowance_calldata(owner: Address, spender: Address) -> Bytes {
    AllowanceCall { owner, spender }.encode().into()
}

pub fn balance_of_calldata(account: Address) -> Bytes {
    BalanceOfCall { account }.encode().into()
}

/// Decode a single `uint256` return value
pub fn decode_uint(output: &Bytes) -> ChainResult<U256> {
    U256::decode(output.as_ref())
        .map_err(|e| ChainError::Rpc(format!("Malformed uint256 return data: {}", e)))
}
