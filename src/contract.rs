//! Fixed-selector contract calls: calldata packing, word decoding and the
//! token/exchange queries built on top of them

use std::sync::Arc;

use alloy::eips::BlockId;
use alloy::sol;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use tracing::warn;

use crate::error::{DistributorError, Result};
use crate::gateway::Gateway;

/// ABI word size in bytes
pub const WORD: usize = 32;

sol! {
    interface IERC20 {
        function totalSupply() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function transfer(address to, uint256 amount) external returns (bool);
    }

    interface IExchange {
        function tokenAddress() external view returns (address);
        function factoryAddress() external view returns (address);
    }
}

/// Shape of one calldata argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Address,
    Uint,
}

impl ArgKind {
    fn accepts(self, arg: &[u8]) -> bool {
        match self {
            ArgKind::Address => arg.len() == 20,
            ArgKind::Uint => arg.len() <= WORD,
        }
    }
}

/// Shape of the return data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Uint,
    Uint8,
    Address,
    String,
    Bool,
}

impl ReturnKind {
    /// Decode return data of this shape, starting at the first word
    pub fn decode(self, data: &[u8]) -> Result<ReturnValue> {
        match self {
            ReturnKind::Uint => decode_uint(data, 0).map(ReturnValue::Uint),
            ReturnKind::Uint8 => decode_fixed_word(data, 0).map(|word| ReturnValue::Uint8(word[WORD - 1])),
            ReturnKind::Address => decode_address(data, 0).map(ReturnValue::Address),
            ReturnKind::String => decode_string(data, 0).map(ReturnValue::String),
            ReturnKind::Bool => decode_uint(data, 0).map(|v| ReturnValue::Bool(!v.is_zero())),
        }
    }
}

/// Decoded return data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnValue {
    Uint(U256),
    Uint8(u8),
    Address(Address),
    String(String),
    Bool(bool),
}

impl ReturnValue {
    pub fn into_uint(self) -> Result<U256> {
        match self {
            ReturnValue::Uint(v) => Ok(v),
            other => Err(other.mismatch("uint256")),
        }
    }

    pub fn into_u8(self) -> Result<u8> {
        match self {
            ReturnValue::Uint8(v) => Ok(v),
            other => Err(other.mismatch("uint8")),
        }
    }

    pub fn into_address(self) -> Result<Address> {
        match self {
            ReturnValue::Address(v) => Ok(v),
            other => Err(other.mismatch("address")),
        }
    }

    pub fn into_string(self) -> Result<String> {
        match self {
            ReturnValue::String(v) => Ok(v),
            other => Err(other.mismatch("string")),
        }
    }

    fn mismatch(&self, wanted: &str) -> DistributorError {
        DistributorError::Decoding(format!("expected {} return value, got {:?}", wanted, self))
    }
}

/// Entry of the function table
#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub selector: [u8; 4],
    pub args: &'static [ArgKind],
    pub returns: ReturnKind,
}

/// Contract functions the distributor knows how to call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractFunction {
    TotalSupply,
    BalanceOf,
    TokenAddress,
    FactoryAddress,
    Name,
    Symbol,
    Decimals,
    Transfer,
}

impl ContractFunction {
    pub const fn spec(self) -> FunctionSpec {
        match self {
            ContractFunction::TotalSupply => FunctionSpec {
                selector: IERC20::totalSupplyCall::SELECTOR,
                args: &[],
                returns: ReturnKind::Uint,
            },
            ContractFunction::BalanceOf => FunctionSpec {
                selector: IERC20::balanceOfCall::SELECTOR,
                args: &[ArgKind::Address],
                returns: ReturnKind::Uint,
            },
            ContractFunction::TokenAddress => FunctionSpec {
                selector: IExchange::tokenAddressCall::SELECTOR,
                args: &[],
                returns: ReturnKind::Address,
            },
            ContractFunction::FactoryAddress => FunctionSpec {
                selector: IExchange::factoryAddressCall::SELECTOR,
                args: &[],
                returns: ReturnKind::Address,
            },
            ContractFunction::Name => FunctionSpec {
                selector: IERC20::nameCall::SELECTOR,
                args: &[],
                returns: ReturnKind::String,
            },
            ContractFunction::Symbol => FunctionSpec {
                selector: IERC20::symbolCall::SELECTOR,
                args: &[],
                returns: ReturnKind::String,
            },
            ContractFunction::Decimals => FunctionSpec {
                selector: IERC20::decimalsCall::SELECTOR,
                args: &[],
                returns: ReturnKind::Uint8,
            },
            ContractFunction::Transfer => FunctionSpec {
                selector: IERC20::transferCall::SELECTOR,
                args: &[ArgKind::Address, ArgKind::Uint],
                returns: ReturnKind::Bool,
            },
        }
    }

    pub const fn selector(self) -> [u8; 4] {
        self.spec().selector
    }

    pub fn name(self) -> &'static str {
        match self {
            ContractFunction::TotalSupply => "totalSupply",
            ContractFunction::BalanceOf => "balanceOf",
            ContractFunction::TokenAddress => "tokenAddress",
            ContractFunction::FactoryAddress => "factoryAddress",
            ContractFunction::Name => "name",
            ContractFunction::Symbol => "symbol",
            ContractFunction::Decimals => "decimals",
            ContractFunction::Transfer => "transfer",
        }
    }

    /// Encode a call, checking the arguments against the table
    pub fn encode(self, args: &[&[u8]]) -> Result<Bytes> {
        let spec = self.spec();
        if args.len() != spec.args.len() {
            return Err(DistributorError::Encoding(format!(
                "{} takes {} argument(s), got {}",
                self.name(),
                spec.args.len(),
                args.len()
            )));
        }
        for (i, (arg, kind)) in args.iter().zip(spec.args).enumerate() {
            if !kind.accepts(arg) {
                return Err(DistributorError::Encoding(format!(
                    "{} argument {} of {} bytes is not a valid {:?}",
                    self.name(),
                    i,
                    arg.len(),
                    kind
                )));
            }
        }
        encode_call(spec.selector, args)
    }

    /// Decode return data by the table's return shape
    pub fn decode(self, data: &[u8]) -> Result<ReturnValue> {
        self.spec().returns.decode(data)
    }
}

/// Selector followed by each argument left-padded to a 32-byte word
pub fn encode_call(selector: [u8; 4], args: &[&[u8]]) -> Result<Bytes> {
    let mut data = Vec::with_capacity(4 + args.len() * WORD);
    data.extend_from_slice(&selector);
    for arg in args {
        if arg.len() > WORD {
            return Err(DistributorError::Encoding(format!(
                "argument of {} bytes does not fit a word",
                arg.len()
            )));
        }
        data.resize(data.len() + WORD - arg.len(), 0);
        data.extend_from_slice(arg);
    }
    Ok(Bytes::from(data))
}

/// The 32-byte word at `index`
pub fn decode_fixed_word(data: &[u8], index: usize) -> Result<B256> {
    let start = index
        .checked_mul(WORD)
        .ok_or_else(|| DistributorError::Decoding(format!("word index {} overflows", index)))?;
    let end = start + WORD;
    if data.len() < end {
        return Err(DistributorError::Decoding(format!(
            "return data has {} bytes, word {} needs {}",
            data.len(),
            index,
            end
        )));
    }
    Ok(B256::from_slice(&data[start..end]))
}

pub fn decode_uint(data: &[u8], index: usize) -> Result<U256> {
    decode_fixed_word(data, index).map(|word| U256::from_be_bytes(word.0))
}

pub fn decode_address(data: &[u8], index: usize) -> Result<Address> {
    decode_fixed_word(data, index).map(|word| Address::from_word(word))
}

/// Dynamic ABI string whose offset word sits at `index`
pub fn decode_string(data: &[u8], index: usize) -> Result<String> {
    let offset = word_as_usize(decode_uint(data, index)?, "string offset")?;
    if offset % WORD != 0 {
        return Err(DistributorError::Decoding(format!("unaligned string offset {}", offset)));
    }
    let length = word_as_usize(decode_uint(data, offset / WORD)?, "string length")?;
    let start = offset + WORD;
    let end = start
        .checked_add(length)
        .ok_or_else(|| DistributorError::Decoding("string length overflows".to_string()))?;
    if data.len() < end {
        return Err(DistributorError::Decoding(format!(
            "string of {} bytes truncated at {} bytes",
            length,
            data.len().saturating_sub(start)
        )));
    }
    String::from_utf8(data[start..end].to_vec())
        .map_err(|e| DistributorError::Decoding(format!("invalid UTF-8 string: {}", e)))
}

fn word_as_usize(value: U256, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| DistributorError::Decoding(format!("{} {} too large", what, value)))
}

/// Token and exchange queries through the gateway
#[derive(Clone)]
pub struct ContractCaller {
    gateway: Arc<Gateway>,
}

impl ContractCaller {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    async fn query(
        &self,
        contract: Address,
        function: ContractFunction,
        args: &[&[u8]],
        block: BlockId,
    ) -> Result<ReturnValue> {
        let data = function.encode(args)?;
        let res = self
            .gateway
            .call_contract(contract, data, block)
            .await
            .inspect_err(|e| {
                warn!(%contract, function = function.name(), ?block, error = %e, "contract call failed")
            })?;
        function.decode(&res)
    }

    pub async fn coin_balance(&self, account: Address, block: BlockId) -> Result<U256> {
        self.gateway.coin_balance(account, block).await
    }

    pub async fn token_total_supply(&self, token: Address, block: BlockId) -> Result<U256> {
        self.query(token, ContractFunction::TotalSupply, &[], block)
            .await?
            .into_uint()
    }

    pub async fn token_balance(&self, token: Address, account: Address, block: BlockId) -> Result<U256> {
        self.query(token, ContractFunction::BalanceOf, &[account.as_slice()], block)
            .await?
            .into_uint()
    }

    /// Liquidity of an exchange is the total supply of its pool token
    pub async fn exchange_liquidity(&self, exchange: Address, block: BlockId) -> Result<U256> {
        self.token_total_supply(exchange, block).await
    }

    pub async fn exchange_token_balance(&self, exchange: Address, token: Address, block: BlockId) -> Result<U256> {
        self.token_balance(token, exchange, block).await
    }

    pub async fn liquidity_balance(&self, exchange: Address, account: Address, block: BlockId) -> Result<U256> {
        self.token_balance(exchange, account, block).await
    }

    /// Token traded by `exchange`; the zero address when it cannot be read
    pub async fn exchange_token_address(&self, exchange: Address) -> Address {
        self.query_address(exchange, ContractFunction::TokenAddress).await
    }

    /// Factory that created `exchange`; the zero address when it cannot be read
    pub async fn exchange_factory_address(&self, exchange: Address) -> Address {
        self.query_address(exchange, ContractFunction::FactoryAddress).await
    }

    async fn query_address(&self, contract: Address, function: ContractFunction) -> Address {
        self.query(contract, function, &[], BlockId::latest())
            .await
            .and_then(ReturnValue::into_address)
            .unwrap_or(Address::ZERO)
    }

    pub async fn erc20_name(&self, token: Address) -> Result<String> {
        self.query(token, ContractFunction::Name, &[], BlockId::latest())
            .await?
            .into_string()
    }

    pub async fn erc20_symbol(&self, token: Address) -> Result<String> {
        self.query(token, ContractFunction::Symbol, &[], BlockId::latest())
            .await?
            .into_string()
    }

    pub async fn erc20_decimals(&self, token: Address) -> Result<u8> {
        self.query(token, ContractFunction::Decimals, &[], BlockId::latest())
            .await?
            .into_u8()
    }

    pub async fn erc20_total_supply(&self, token: Address, block: BlockId) -> Result<U256> {
        self.token_total_supply(token, block).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn test_selectors_match_known_values() {
        assert_eq!(hex::encode(ContractFunction::TotalSupply.selector()), "18160ddd");
        assert_eq!(hex::encode(ContractFunction::BalanceOf.selector()), "70a08231");
        assert_eq!(hex::encode(ContractFunction::TokenAddress.selector()), "9d76ea58");
        assert_eq!(hex::encode(ContractFunction::FactoryAddress.selector()), "966dae0e");
        assert_eq!(hex::encode(ContractFunction::Name.selector()), "06fdde03");
        assert_eq!(hex::encode(ContractFunction::Symbol.selector()), "95d89b41");
        assert_eq!(hex::encode(ContractFunction::Decimals.selector()), "313ce567");
        assert_eq!(hex::encode(ContractFunction::Transfer.selector()), "a9059cbb");
    }

    #[test]
    fn test_encode_single_address_argument() {
        let account = address!("0x1111111111111111111111111111111111111111");
        let data = ContractFunction::BalanceOf.encode(&[account.as_slice()]).unwrap();

        assert_eq!(data.len(), 4 + 32);
        assert_eq!(hex::encode(&data[..4]), "70a08231");
        assert!(data[4..16].iter().all(|b| *b == 0));
        assert_eq!(&data[16..], account.as_slice());
    }

    #[test]
    fn test_encode_transfer_matches_sol_encoding() {
        let to = address!("0x2222222222222222222222222222222222222222");
        let amount = U256::from(1_000_000u64);
        let data = ContractFunction::Transfer
            .encode(&[to.as_slice(), &amount.to_be_bytes::<32>()])
            .unwrap();

        let expected = IERC20::transferCall { to, amount }.abi_encode();
        assert_eq!(data.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_encode_rejects_wrong_arity_and_oversized_args() {
        assert!(ContractFunction::Transfer.encode(&[&[1u8]]).is_err());
        assert!(encode_call([0; 4], &[&[0u8; 33]]).is_err());
    }

    #[test]
    fn test_encode_checks_argument_kinds() {
        let short_address = [0x11u8; 19];
        assert!(matches!(
            ContractFunction::BalanceOf.encode(&[&short_address]),
            Err(DistributorError::Encoding(_))
        ));
        let to = Address::repeat_byte(0x22);
        assert!(ContractFunction::Transfer.encode(&[to.as_slice(), &[0u8; 33]]).is_err());
        assert!(ContractFunction::Transfer.encode(&[to.as_slice(), &[7u8]]).is_ok());
    }

    #[test]
    fn test_decode_by_return_kind() {
        let mut word = [0u8; WORD];
        word[WORD - 1] = 1;

        assert_eq!(ContractFunction::Transfer.decode(&word).unwrap(), ReturnValue::Bool(true));
        assert_eq!(ContractFunction::Decimals.decode(&word).unwrap().into_u8().unwrap(), 1);
        assert_eq!(ContractFunction::BalanceOf.decode(&word).unwrap().into_uint().unwrap(), U256::from(1));
        assert_eq!(
            ContractFunction::TokenAddress.decode(&word).unwrap(),
            ReturnValue::Address(Address::with_last_byte(1))
        );
        assert!(ContractFunction::TokenAddress.decode(&word).unwrap().into_uint().is_err());
        assert!(ContractFunction::Symbol.decode(&word).is_err());
    }

    #[test]
    fn test_decode_words() {
        let mut data = vec![0u8; 64];
        data[31] = 18;
        data[44..64].copy_from_slice(&[0xab; 20]);

        assert_eq!(decode_uint(&data, 0).unwrap(), U256::from(18));
        assert_eq!(decode_address(&data, 1).unwrap(), Address::repeat_byte(0xab));
        assert!(decode_fixed_word(&data, 2).is_err());
    }

    fn abi_string(s: &str) -> Vec<u8> {
        let mut data = vec![0u8; 64];
        data[31] = 0x20;
        data[63] = s.len() as u8;
        let mut body = s.as_bytes().to_vec();
        body.resize(s.len().div_ceil(WORD) * WORD, 0);
        data.extend_from_slice(&body);
        data
    }

    #[test]
    fn test_decode_string() {
        assert_eq!(decode_string(&abi_string("Wrapped Ether"), 0).unwrap(), "Wrapped Ether");
        assert_eq!(decode_string(&abi_string(""), 0).unwrap(), "");
    }

    #[test]
    fn test_decode_string_shorter_than_declared_length() {
        let mut data = abi_string("ANY");
        data[63] = 40;
        assert!(matches!(decode_string(&data, 0), Err(DistributorError::Decoding(_))));
    }

    mod queries {
        use super::*;
        use crate::gateway::{GatewayConfig, HeaderSummary, RpcEndpoint};
        use alloy::eips::BlockNumberOrTag;
        use alloy::rpc::types::{SyncStatus, TransactionRequest};
        use alloy_primitives::TxHash;
        use async_trait::async_trait;
        use tokio_util::sync::CancellationToken;

        /// Token contract answering metadata calls; anything else reverts
        struct TokenNode;

        #[async_trait]
        impl RpcEndpoint for TokenNode {
            fn url(&self) -> &str {
                "token://node"
            }

            async fn balance(&self, _account: Address, _block: BlockId) -> Result<U256> {
                Ok(U256::ZERO)
            }

            async fn pending_nonce(&self, _account: Address) -> Result<u64> {
                Ok(0)
            }

            async fn gas_price(&self) -> Result<u128> {
                Ok(0)
            }

            async fn chain_id(&self) -> Result<u64> {
                Ok(1)
            }

            async fn header(&self, _number: BlockNumberOrTag) -> Result<Option<HeaderSummary>> {
                Ok(None)
            }

            async fn call(&self, request: TransactionRequest, _block: BlockId) -> Result<Bytes> {
                let input = request.input.input().cloned().unwrap_or_default();
                let selector: [u8; 4] = input[..4].try_into().unwrap();
                let mut word = [0u8; WORD];
                if selector == ContractFunction::Symbol.selector() {
                    return Ok(Bytes::from(abi_string("ANY")));
                } else if selector == ContractFunction::Decimals.selector() {
                    word[WORD - 1] = 18;
                } else if selector == ContractFunction::TotalSupply.selector() {
                    word[WORD - 2] = 0x01;
                } else {
                    return Err(DistributorError::Rpc {
                        endpoint: self.url().to_string(),
                        operation: "eth_call",
                        message: "execution reverted".to_string(),
                    });
                }
                Ok(Bytes::from(word.to_vec()))
            }

            async fn sync_status(&self) -> Result<SyncStatus> {
                Ok(SyncStatus::None)
            }

            async fn send_raw_transaction(&self, _encoded: Bytes) -> Result<TxHash> {
                Ok(TxHash::ZERO)
            }
        }

        fn caller() -> ContractCaller {
            let config = GatewayConfig {
                endpoints: Vec::new(),
                retry_count: 1,
                retry_interval_ms: 1,
            };
            let gateway = Gateway::from_endpoints(
                vec![Arc::new(TokenNode) as Arc<dyn RpcEndpoint>],
                &config,
                CancellationToken::new(),
            );
            ContractCaller::new(Arc::new(gateway))
        }

        #[tokio::test]
        async fn test_erc20_metadata() {
            let caller = caller();
            let token = Address::repeat_byte(0x42);

            assert_eq!(caller.erc20_symbol(token).await.unwrap(), "ANY");
            assert_eq!(caller.erc20_decimals(token).await.unwrap(), 18);
            assert_eq!(
                caller.erc20_total_supply(token, BlockId::latest()).await.unwrap(),
                U256::from(256)
            );
            assert_eq!(
                caller.exchange_liquidity(token, BlockId::latest()).await.unwrap(),
                U256::from(256)
            );
            assert!(caller.erc20_name(token).await.is_err());
        }

        #[tokio::test]
        async fn test_exchange_addresses_fall_back_to_zero() {
            let caller = caller();
            let exchange = Address::repeat_byte(0x43);

            assert_eq!(caller.exchange_token_address(exchange).await, Address::ZERO);
            assert_eq!(caller.exchange_factory_address(exchange).await, Address::ZERO);
        }
    }
}
