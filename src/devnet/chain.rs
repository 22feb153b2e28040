//! Automining in-memory ledger hosting a single registry contract.

use crate::address::Address;
use crate::digest::Fingerprint;
use crate::ledger::abi::{self, Getter};
use crate::ledger::rpc::{to_quantity_u128, to_quantity_u64, RpcError, Transport, TransportError};
use crate::ledger::tx::{decode_signed, DecodedTx};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

/// Chain id of a local development node.
pub const DEVNET_CHAIN_ID: u64 = 31337;
/// Gas price quoted by `eth_gasPrice`, 1 gwei.
pub const DEVNET_GAS_PRICE: u128 = 1_000_000_000;
/// Gas charged for a `register` call.
pub const REGISTER_GAS: u64 = 60_000;
const TRANSFER_GAS: u64 = 21_000;
const BLOCK_GAS_LIMIT: u64 = 30_000_000;
const DUPLICATE_REASON: &str = "Hash already registered";
// 0x5FbDB2315678afecb367f032d93F642f64180aa3, the first deployment address of a fresh local node.
const LOCAL_CONTRACT_BYTES: [u8; 20] = [
    0x5f, 0xbd, 0xb2, 0x31, 0x56, 0x78, 0xaf, 0xec, 0xb3, 0x67, 0xf0, 0x32, 0xd9, 0x3f, 0x64, 0x2f,
    0x64, 0x18, 0x0a, 0xa3,
];

/// Devnet parameters.
#[derive(Debug, Clone)]
pub struct DevnetConfig {
    /// Chain id enforced on incoming transactions.
    pub chain_id: u64,
    /// Address the registry contract lives at.
    pub contract: Address,
    /// Quoted gas price.
    pub gas_price: u128,
    /// Timestamp of block zero.
    pub genesis_timestamp: u64,
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            chain_id: DEVNET_CHAIN_ID,
            contract: Address::from_bytes(LOCAL_CONTRACT_BYTES),
            gas_price: DEVNET_GAS_PRICE,
            genesis_timestamp: now_secs(),
        }
    }
}

#[derive(Debug, Clone)]
struct Registration {
    owner: Address,
    timestamp: u64,
    metadata: String,
}

#[derive(Debug, Clone)]
struct Block {
    number: u64,
    timestamp: u64,
    hash: [u8; 32],
    parent_hash: [u8; 32],
    transactions: Vec<[u8; 32]>,
    gas_used: u64,
}

#[derive(Debug, Clone)]
struct Log {
    topics: Vec<[u8; 32]>,
    data: Vec<u8>,
}

#[derive(Debug, Clone)]
struct MinedTx {
    decoded: DecodedTx,
    block_number: u64,
    success: bool,
    gas_used: u64,
    logs: Vec<Log>,
}

#[derive(Debug)]
struct ChainState {
    blocks: Vec<Block>,
    nonces: HashMap<Address, u64>,
    registry: HashMap<Fingerprint, Registration>,
    txs: HashMap<[u8; 32], MinedTx>,
}

/// A single-node ledger that mines one block per accepted transaction.
#[derive(Debug)]
pub struct DevnetChain {
    config: DevnetConfig,
    state: Mutex<ChainState>,
}

impl Default for DevnetChain {
    fn default() -> Self {
        Self::new(DevnetConfig::default())
    }
}

impl DevnetChain {
    /// Creates the chain with its genesis block.
    pub fn new(config: DevnetConfig) -> Self {
        let genesis = Block {
            number: 0,
            timestamp: config.genesis_timestamp,
            hash: block_hash(0, config.genesis_timestamp, &[0u8; 32]),
            parent_hash: [0u8; 32],
            transactions: Vec::new(),
            gas_used: 0,
        };
        Self {
            config,
            state: Mutex::new(ChainState {
                blocks: vec![genesis],
                nonces: HashMap::new(),
                registry: HashMap::new(),
                txs: HashMap::new(),
            }),
        }
    }

    /// Chain parameters.
    pub fn config(&self) -> &DevnetConfig {
        &self.config
    }

    /// Registry contract address.
    pub fn contract(&self) -> Address {
        self.config.contract
    }

    /// Height of the latest block.
    pub fn block_number(&self) -> u64 {
        self.lock()
            .map(|state| state.blocks.len() as u64 - 1)
            .unwrap_or(0)
    }

    /// Number of fingerprints registered so far.
    pub fn registration_count(&self) -> usize {
        self.lock().map(|state| state.registry.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ChainState>, RpcError> {
        self.state
            .lock()
            .map_err(|_| RpcError::internal("devnet state lock poisoned"))
    }

    /// Dispatches one JSON-RPC method.
    pub fn handle(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        debug!(method, "devnet request");
        match method {
            "web3_clientVersion" => Ok(Value::String(format!(
                "proveit/{}/devnet",
                env!("CARGO_PKG_VERSION")
            ))),
            "net_version" => Ok(Value::String(self.config.chain_id.to_string())),
            "eth_chainId" => Ok(Value::String(to_quantity_u64(self.config.chain_id))),
            "eth_blockNumber" => Ok(Value::String(to_quantity_u64(self.block_number()))),
            "eth_gasPrice" => Ok(Value::String(to_quantity_u128(self.config.gas_price))),
            "eth_getTransactionCount" => {
                let address = param_address(params, 0, "eth_getTransactionCount")?;
                let state = self.lock()?;
                let nonce = state.nonces.get(&address).copied().unwrap_or(0);
                Ok(Value::String(to_quantity_u64(nonce)))
            }
            "eth_getCode" => {
                let address = param_address(params, 0, "eth_getCode")?;
                if address == self.config.contract {
                    Ok(Value::String("0x6080604052".to_string()))
                } else {
                    Ok(Value::String("0x".to_string()))
                }
            }
            "eth_estimateGas" => {
                let call = params
                    .get(0)
                    .ok_or_else(|| {
                        RpcError::invalid_params("eth_estimateGas expects call object")
                    })?;
                if call_target(call)? == Some(self.config.contract) {
                    self.execute_call(call)?;
                    Ok(Value::String(to_quantity_u64(REGISTER_GAS)))
                } else {
                    Ok(Value::String(to_quantity_u64(TRANSFER_GAS)))
                }
            }
            "eth_call" => {
                let call = params
                    .get(0)
                    .ok_or_else(|| RpcError::invalid_params("eth_call expects call object"))?;
                if call_target(call)? != Some(self.config.contract) {
                    return Ok(Value::String("0x".to_string()));
                }
                let out = self.execute_call(call)?;
                Ok(Value::String(format!("0x{}", hex::encode(out))))
            }
            "eth_sendRawTransaction" => {
                let raw_hex = param_str(params, 0)
                    .ok_or_else(|| {
                        RpcError::invalid_params("eth_sendRawTransaction expects hex payload")
                    })?;
                let raw = decode_hex_prefixed(raw_hex)?;
                self.send_raw_transaction(&raw)
            }
            "eth_getTransactionReceipt" => {
                let hash = param_hash(params, 0, "eth_getTransactionReceipt")?;
                let state = self.lock()?;
                Ok(state
                    .txs
                    .get(&hash)
                    .map(|tx| self.receipt_json(&state, tx))
                    .unwrap_or(Value::Null))
            }
            "eth_getTransactionByHash" => {
                let hash = param_hash(params, 0, "eth_getTransactionByHash")?;
                let state = self.lock()?;
                Ok(state
                    .txs
                    .get(&hash)
                    .map(|tx| self.transaction_json(&state, tx))
                    .unwrap_or(Value::Null))
            }
            "eth_getBlockByNumber" => {
                let tag = param_str(params, 0).unwrap_or("latest");
                let state = self.lock()?;
                let latest = state.blocks.len() as u64 - 1;
                let number = match tag {
                    "latest" | "pending" | "safe" | "finalized" => latest,
                    "earliest" => 0,
                    other => parse_quantity(other)
                        .ok_or_else(|| {
                            RpcError::invalid_params(format!("invalid block tag: {other}"))
                        })?,
                };
                Ok(state
                    .blocks
                    .get(number as usize)
                    .map(block_json)
                    .unwrap_or(Value::Null))
            }
            other => Err(RpcError::method_not_found(other)),
        }
    }

    /// Read-only contract execution against the latest state.
    fn execute_call(&self, call: &Value) -> Result<Vec<u8>, RpcError> {
        let data = match call.get("data").or_else(|| call.get("input")).and_then(Value::as_str) {
            Some(data) => decode_hex_prefixed(data)?,
            None => Vec::new(),
        };
        if data.len() < 4 {
            return Err(RpcError::reverted("missing function selector"));
        }
        let state = self.lock()?;
        if let Some(getter) = Getter::from_selector(&data[..4]) {
            let fp_word: [u8; 32] = data
                .get(4..36)
                .and_then(|w| w.try_into().ok())
                .ok_or_else(|| RpcError::reverted("missing bytes32 argument"))?;
            let fingerprint = Fingerprint::from_bytes(fp_word);
            return Ok(encode_getter_result(getter, state.registry.get(&fingerprint)));
        }
        match abi::decode_register_call(&data) {
            Ok((fingerprint, _)) if state.registry.contains_key(&fingerprint) => {
                Err(RpcError::reverted(DUPLICATE_REASON))
            }
            Ok(_) => Ok(Vec::new()),
            Err(_) => Err(RpcError::reverted("unknown function selector")),
        }
    }

    fn send_raw_transaction(&self, raw: &[u8]) -> Result<Value, RpcError> {
        let decoded = decode_signed(raw).map_err(|err| RpcError::invalid_params(err.to_string()))?;
        if decoded.tx.chain_id != self.config.chain_id {
            return Err(RpcError::invalid_params(format!(
                "chainId mismatch: tx={} rpc={}",
                decoded.tx.chain_id, self.config.chain_id
            )));
        }
        if decoded.tx.max_fee_per_gas < self.config.gas_price {
            return Err(RpcError::invalid_params("max fee per gas below base fee"));
        }

        let mut state = self.lock()?;
        if state.txs.contains_key(&decoded.hash) {
            return Ok(Value::String(hash_hex(&decoded.hash)));
        }
        let expected_nonce = state.nonces.get(&decoded.from).copied().unwrap_or(0);
        if decoded.tx.nonce != expected_nonce {
            return Err(RpcError::internal(format!(
                "nonce mismatch: expected {expected_nonce}, got {}",
                decoded.tx.nonce
            )));
        }

        let parent = state
            .blocks
            .last()
            .cloned()
            .ok_or_else(|| RpcError::internal("devnet has no genesis block"))?;
        let number = parent.number + 1;
        let timestamp = now_secs().max(parent.timestamp + 1);

        let (success, gas_used, logs) = if decoded.tx.to != self.config.contract {
            (true, TRANSFER_GAS, Vec::new())
        } else if decoded.tx.gas_limit < REGISTER_GAS {
            (false, decoded.tx.gas_limit, Vec::new())
        } else {
            match abi::decode_register_call(&decoded.tx.input) {
                Ok((fingerprint, _)) if state.registry.contains_key(&fingerprint) => {
                    (false, REGISTER_GAS, Vec::new())
                }
                Ok((fingerprint, metadata)) => {
                    let log = Log {
                        topics: vec![
                            abi::hash_registered_topic(),
                            *fingerprint.as_bytes(),
                            abi::word_address(&decoded.from),
                        ],
                        data: abi::encode_event_data(timestamp, &metadata),
                    };
                    info!(
                        fingerprint = %fingerprint,
                        owner = %decoded.from,
                        block = number,
                        "devnet registration"
                    );
                    state.registry.insert(
                        fingerprint,
                        Registration {
                            owner: decoded.from,
                            timestamp,
                            metadata,
                        },
                    );
                    (true, REGISTER_GAS, vec![log])
                }
                Err(_) => (false, REGISTER_GAS, Vec::new()),
            }
        };

        state.nonces.insert(decoded.from, expected_nonce + 1);
        state.blocks.push(Block {
            number,
            timestamp,
            hash: block_hash(number, timestamp, &parent.hash),
            parent_hash: parent.hash,
            transactions: vec![decoded.hash],
            gas_used,
        });
        let hash = decoded.hash;
        state.txs.insert(
            hash,
            MinedTx {
                decoded,
                block_number: number,
                success,
                gas_used,
                logs,
            },
        );
        Ok(Value::String(hash_hex(&hash)))
    }

    fn receipt_json(&self, state: &ChainState, tx: &MinedTx) -> Value {
        let block_hash = state
            .blocks
            .get(tx.block_number as usize)
            .map(|b| hash_hex(&b.hash))
            .unwrap_or_default();
        let logs: Vec<Value> = tx
            .logs
            .iter()
            .enumerate()
            .map(|(idx, log)| {
                json!({
                    "address": self.config.contract.to_lower_hex(),
                    "topics": log.topics.iter().map(hash_hex).collect::<Vec<_>>(),
                    "data": format!("0x{}", hex::encode(&log.data)),
                    "blockNumber": to_quantity_u64(tx.block_number),
                    "blockHash": block_hash,
                    "transactionHash": hash_hex(&tx.decoded.hash),
                    "transactionIndex": "0x0",
                    "logIndex": to_quantity_u64(idx as u64),
                    "removed": false
                })
            })
            .collect();
        json!({
            "transactionHash": hash_hex(&tx.decoded.hash),
            "transactionIndex": "0x0",
            "blockHash": block_hash,
            "blockNumber": to_quantity_u64(tx.block_number),
            "from": tx.decoded.from.to_lower_hex(),
            "to": tx.decoded.tx.to.to_lower_hex(),
            "cumulativeGasUsed": to_quantity_u64(tx.gas_used),
            "gasUsed": to_quantity_u64(tx.gas_used),
            "effectiveGasPrice": to_quantity_u128(self.config.gas_price),
            "contractAddress": Value::Null,
            "logs": logs,
            "logsBloom": format!("0x{}", "0".repeat(512)),
            "type": "0x2",
            "status": if tx.success { "0x1" } else { "0x0" }
        })
    }

    fn transaction_json(&self, state: &ChainState, tx: &MinedTx) -> Value {
        let block_hash = state
            .blocks
            .get(tx.block_number as usize)
            .map(|b| hash_hex(&b.hash))
            .unwrap_or_default();
        let body = &tx.decoded.tx;
        json!({
            "hash": hash_hex(&tx.decoded.hash),
            "nonce": to_quantity_u64(body.nonce),
            "blockHash": block_hash,
            "blockNumber": to_quantity_u64(tx.block_number),
            "transactionIndex": "0x0",
            "from": tx.decoded.from.to_lower_hex(),
            "to": body.to.to_lower_hex(),
            "value": to_quantity_u128(body.value),
            "gas": to_quantity_u64(body.gas_limit),
            "gasPrice": to_quantity_u128(self.config.gas_price),
            "maxFeePerGas": to_quantity_u128(body.max_fee_per_gas),
            "maxPriorityFeePerGas": to_quantity_u128(body.max_priority_fee_per_gas),
            "input": format!("0x{}", hex::encode(&body.input)),
            "chainId": to_quantity_u64(body.chain_id),
            "accessList": [],
            "type": "0x2"
        })
    }
}

impl Transport for DevnetChain {
    fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.handle(method, &params).map_err(TransportError::Rpc)
    }
}

fn encode_getter_result(getter: Getter, registration: Option<&Registration>) -> Vec<u8> {
    let (owner, timestamp, metadata) = registration
        .map(|r| (r.owner, r.timestamp, r.metadata.as_str()))
        .unwrap_or((Address::ZERO, 0, ""));
    match getter {
        Getter::Verify => abi::encode_registration_tuple(&owner, timestamp, metadata),
        Getter::IsRegistered => abi::word_u64(u64::from(registration.is_some())).to_vec(),
        Getter::Owner => abi::word_address(&owner).to_vec(),
        Getter::Timestamp => abi::word_u64(timestamp).to_vec(),
        Getter::Metadata => abi::encode_string_return(metadata),
    }
}

fn block_json(block: &Block) -> Value {
    json!({
        "number": to_quantity_u64(block.number),
        "hash": hash_hex(&block.hash),
        "parentHash": hash_hex(&block.parent_hash),
        "nonce": "0x0000000000000000",
        "miner": "0x0000000000000000000000000000000000000000",
        "difficulty": "0x0",
        "extraData": "0x",
        "gasLimit": to_quantity_u64(BLOCK_GAS_LIMIT),
        "gasUsed": to_quantity_u64(block.gas_used),
        "timestamp": to_quantity_u64(block.timestamp),
        "transactions": block.transactions.iter().map(hash_hex).collect::<Vec<_>>(),
        "uncles": [],
        "baseFeePerGas": to_quantity_u64(0)
    })
}

fn block_hash(number: u64, timestamp: u64, parent: &[u8; 32]) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(48);
    preimage.extend_from_slice(&number.to_be_bytes());
    preimage.extend_from_slice(&timestamp.to_be_bytes());
    preimage.extend_from_slice(parent);
    abi::keccak256(&preimage)
}

fn hash_hex(hash: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(hash))
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

fn param_str(params: &Value, index: usize) -> Option<&str> {
    params.as_array()?.get(index)?.as_str()
}

fn param_address(params: &Value, index: usize, method: &str) -> Result<Address, RpcError> {
    let raw = param_str(params, index)
        .ok_or_else(|| RpcError::invalid_params(format!("{method} expects address param")))?;
    Address::parse(raw).map_err(|err| RpcError::invalid_params(err.to_string()))
}

fn param_hash(params: &Value, index: usize, method: &str) -> Result<[u8; 32], RpcError> {
    let raw = param_str(params, index)
        .ok_or_else(|| RpcError::invalid_params(format!("{method} expects tx hash")))?;
    decode_hex_prefixed(raw)?
        .try_into()
        .map_err(|_| RpcError::invalid_params(format!("{method}: hash must be 32 bytes")))
}

fn call_target(call: &Value) -> Result<Option<Address>, RpcError> {
    match call.get("to").and_then(Value::as_str) {
        Some(to) => Address::parse(to)
            .map(Some)
            .map_err(|err| RpcError::invalid_params(err.to_string())),
        None => Ok(None),
    }
}

fn parse_quantity(tag: &str) -> Option<u64> {
    let raw = tag.strip_prefix("0x").or_else(|| tag.strip_prefix("0X"))?;
    u64::from_str_radix(raw, 16).ok()
}

fn decode_hex_prefixed(input: &str) -> Result<Vec<u8>, RpcError> {
    let trimmed = input.trim();
    let raw = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| RpcError::invalid_params("hex payload must start with 0x"))?;
    hex::decode(raw).map_err(|err| RpcError::invalid_params(format!("invalid hex payload: {err}")))
}

#[cfg(test)]
mod tests {
    use super::{DevnetChain, DevnetConfig, REGISTER_GAS};
    use crate::address::Address;
    use crate::digest::fingerprint_of_bytes;
    use crate::ledger::abi;
    use crate::ledger::signer::SigningIdentity;
    use crate::ledger::tx::Eip1559Tx;
    use crate::network::LOCAL_CONTRACT;
    use serde_json::{json, Value};

    fn signer() -> SigningIdentity {
        SigningIdentity::from_hex(
            "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
        )
        .unwrap()
    }

    fn register_tx(chain: &DevnetChain, nonce: u64, payload: &[u8], gas_limit: u64) -> String {
        let tx = Eip1559Tx {
            chain_id: chain.config().chain_id,
            nonce,
            max_priority_fee_per_gas: chain.config().gas_price,
            max_fee_per_gas: chain.config().gas_price,
            gas_limit,
            to: chain.contract(),
            value: 0,
            input: abi::encode_register(&fingerprint_of_bytes(payload), "note"),
        };
        let signed = tx.sign(&signer()).unwrap();
        chain
            .handle("eth_sendRawTransaction", &json!([signed.raw_hex()]))
            .unwrap()
            .as_str()
            .unwrap()
            .to_string()
    }

    fn status(chain: &DevnetChain, tx_id: &str) -> String {
        chain.handle("eth_getTransactionReceipt", &json!([tx_id])).unwrap()["status"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn default_contract_matches_local_deployment() {
        assert_eq!(
            DevnetConfig::default().contract,
            Address::parse(LOCAL_CONTRACT).unwrap()
        );
    }

    #[test]
    fn mines_one_block_per_transaction_with_increasing_timestamps() {
        let chain = DevnetChain::default();
        let first = register_tx(&chain, 0, b"one", REGISTER_GAS);
        let second = register_tx(&chain, 1, b"two", REGISTER_GAS);
        assert_eq!(chain.block_number(), 2);
        assert_eq!(status(&chain, &first), "0x1");
        assert_eq!(status(&chain, &second), "0x1");

        let ts = |n: &str| {
            let block = chain.handle("eth_getBlockByNumber", &json!([n, false])).unwrap();
            u64::from_str_radix(block["timestamp"].as_str().unwrap().trim_start_matches("0x"), 16)
                .unwrap()
        };
        assert!(ts("0x0") < ts("0x1"));
        assert!(ts("0x1") < ts("0x2"));
        assert_eq!(chain.registration_count(), 2);
    }

    #[test]
    fn duplicate_is_mined_as_failure_and_reverts_on_call() {
        let chain = DevnetChain::default();
        register_tx(&chain, 0, b"same", REGISTER_GAS);
        let dup = register_tx(&chain, 1, b"same", REGISTER_GAS);
        assert_eq!(status(&chain, &dup), "0x0");
        assert_eq!(chain.registration_count(), 1);

        let data = abi::encode_register(&fingerprint_of_bytes(b"same"), "");
        let err = chain
            .handle(
                "eth_call",
                &json!([
                    {
                        "to": chain.contract().to_lower_hex(),
                        "data": format!("0x{}", hex::encode(data)),
                    },
                    "latest"
                ]),
            )
            .unwrap_err();
        assert_eq!(err.code, 3);
        assert_eq!(err.message, "execution reverted: Hash already registered");
        assert_eq!(err.revert_reason(), "Hash already registered");
    }

    #[test]
    fn receipt_carries_hash_registered_event() {
        let chain = DevnetChain::default();
        let tx_id = register_tx(&chain, 0, b"event", REGISTER_GAS);
        let receipt = chain.handle("eth_getTransactionReceipt", &json!([tx_id])).unwrap();
        let log = &receipt["logs"][0];
        assert_eq!(
            log["topics"][0],
            Value::String(format!("0x{}", hex::encode(abi::hash_registered_topic())))
        );
        assert_eq!(
            log["topics"][1],
            Value::String(fingerprint_of_bytes(b"event").to_string())
        );
    }

    #[test]
    fn rejects_wrong_nonce_and_low_gas() {
        let chain = DevnetChain::default();
        let tx = Eip1559Tx {
            chain_id: 31337,
            nonce: 5,
            max_priority_fee_per_gas: 1_000_000_000,
            max_fee_per_gas: 1_000_000_000,
            gas_limit: REGISTER_GAS,
            to: chain.contract(),
            value: 0,
            input: Vec::new(),
        };
        let signed = tx.sign(&signer()).unwrap();
        assert!(chain
            .handle("eth_sendRawTransaction", &json!([signed.raw_hex()]))
            .is_err());

        let starved = register_tx(&chain, 0, b"starved", 30_000);
        assert_eq!(status(&chain, &starved), "0x0");
        assert_eq!(chain.registration_count(), 0);
    }

    #[test]
    fn unknown_method_and_pending_receipt() {
        let chain = DevnetChain::default();
        assert_eq!(chain.handle("eth_foo", &json!([])).unwrap_err().code, -32601);
        let missing = format!("0x{}", "11".repeat(32));
        assert_eq!(
            chain.handle("eth_getTransactionReceipt", &json!([missing])).unwrap(),
            Value::Null
        );
        assert_eq!(chain.handle("eth_chainId", &json!([])).unwrap(), json!("0x7a69"));
    }
}
