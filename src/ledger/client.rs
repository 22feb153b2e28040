//! Registry contract client: signed registration writes and total lookups.

use crate::address::Address;
use crate::digest::Fingerprint;
use crate::error::{ProveItError, Result};
use crate::ledger::abi::{self, Getter};
use crate::ledger::rpc::{
    decode_data, parse_quantity_u128, parse_quantity_u64, to_quantity_u64, HttpTransport,
    Transport, DEFAULT_REQUEST_TIMEOUT,
};
use crate::ledger::signer::SigningIdentity;
use crate::ledger::tx::Eip1559Tx;
use crate::network::{EndpointConfig, NetworkIdentity};
use serde_json::{json, Value};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Gas budget attached to every registration.
pub const DEFAULT_GAS_LIMIT: u64 = 200_000;
/// Receipt polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Upper bound on the confirmation wait.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

/// How long and how often to poll for a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    /// Delay between receipt polls.
    pub poll_interval: Duration,
    /// Give up after this long.
    pub timeout: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_CONFIRMATION_TIMEOUT,
        }
    }
}

/// Tunables for [`LedgerClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    /// Fixed gas limit for `register`.
    pub gas_limit: u64,
    /// Receipt wait policy.
    pub confirmation: ConfirmationPolicy,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_GAS_LIMIT,
            confirmation: ConfirmationPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Outcome of a confirmed registration transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTxResult {
    /// Registered fingerprint.
    pub fingerprint: Fingerprint,
    /// Transaction id.
    pub tx_id: String,
    /// Signer address, now the registered owner.
    pub owner: Address,
    /// Unix timestamp of the confirming block.
    pub timestamp: u64,
    /// Confirming block height.
    pub block_number: u64,
    /// Network the write landed on.
    pub network: NetworkIdentity,
    /// Metadata stored alongside the fingerprint.
    pub metadata: String,
}

/// Stored registration fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRegistration {
    /// Registering account.
    pub owner: Address,
    /// Unix timestamp recorded by the contract.
    pub timestamp: u64,
    /// Registrant-supplied metadata.
    pub metadata: String,
}

/// Lookup answer; `registration` is `None` when the fingerprint is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLookupResult {
    /// Normalized fingerprint that was looked up.
    pub fingerprint: Fingerprint,
    /// Registration, if one exists.
    pub registration: Option<RawRegistration>,
}

impl RawLookupResult {
    /// True when a registration was found.
    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }
}

/// JSON-RPC client for one registry contract on one network.
pub struct LedgerClient {
    transport: Box<dyn Transport>,
    network: NetworkIdentity,
    contract: Address,
    chain_id: u64,
    signer: Option<SigningIdentity>,
    settings: ClientSettings,
}

impl std::fmt::Debug for LedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerClient")
            .field("network", &self.network)
            .field("contract", &self.contract)
            .field("chain_id", &self.chain_id)
            .field("signer", &self.signer)
            .field("settings", &self.settings)
            .finish()
    }
}

impl LedgerClient {
    /// Opens an HTTP connection to `endpoint` and checks the node answers.
    pub fn connect(
        network: NetworkIdentity,
        endpoint: &EndpointConfig,
        signer: Option<SigningIdentity>,
        settings: ClientSettings,
    ) -> Result<Self> {
        let transport = HttpTransport::new(&endpoint.rpc_url, settings.request_timeout)?;
        info!(
            network = %network,
            rpc_url = %endpoint.rpc_url,
            contract = %endpoint.contract_address,
            "connecting to ledger"
        );
        Self::with_transport(transport, network, endpoint.contract_address, signer, settings)
    }

    /// Wraps an arbitrary transport and checks it with `eth_chainId`.
    pub fn with_transport<T: Transport + 'static>(
        transport: T,
        network: NetworkIdentity,
        contract: Address,
        signer: Option<SigningIdentity>,
        settings: ClientSettings,
    ) -> Result<Self> {
        let transport: Box<dyn Transport> = Box::new(transport);
        let chain_id = transport
            .request("eth_chainId", json!([]))
            .and_then(|v| parse_quantity_u64(&v))
            .map_err(|err| ProveItError::Connection(format!("node handshake failed: {err}")))?;
        if chain_id != network.chain_id() {
            warn!(
                network = %network,
                expected = network.chain_id(),
                reported = chain_id,
                "node chain id differs from network default"
            );
        }
        Ok(Self {
            transport,
            network,
            contract,
            chain_id,
            signer,
            settings,
        })
    }

    /// Network this client targets.
    pub fn network(&self) -> NetworkIdentity {
        self.network
    }

    /// Registry contract address.
    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Chain id reported by the node.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Address of the configured signer, if any.
    pub fn signer_address(&self) -> Option<Address> {
        self.signer.as_ref().map(SigningIdentity::address)
    }

    /// Active settings.
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    fn call(&self, method: &str, params: Value) -> Result<Value> {
        Ok(self.transport.request(method, params)?)
    }

    fn eth_call(&self, from: Option<Address>, data: &[u8]) -> Result<Vec<u8>> {
        let mut call = json!({
            "to": self.contract.to_lower_hex(),
            "data": format!("0x{}", hex::encode(data)),
        });
        if let Some(from) = from {
            call["from"] = Value::String(from.to_lower_hex());
        }
        let result = self.call("eth_call", json!([call, "latest"]))?;
        Ok(decode_data(&result)?)
    }

    /// Registers `fingerprint` with `metadata` and waits for confirmation.
    pub fn submit_registration(&self, fingerprint: &str, metadata: &str) -> Result<RawTxResult> {
        let signer = self.signer.as_ref().ok_or(ProveItError::MissingSigner)?;
        let fingerprint = Fingerprint::parse(fingerprint)?;
        let calldata = abi::encode_register(&fingerprint, metadata);
        let owner = signer.address();

        // Surfaces duplicate registrations with their revert reason before paying gas.
        self.eth_call(Some(owner), &calldata)?;

        let nonce = parse_quantity_u64(
            &self.call("eth_getTransactionCount", json!([owner.to_lower_hex(), "pending"]))?,
        )?;
        let gas_price = parse_quantity_u128(&self.call("eth_gasPrice", json!([]))?)?;
        let tx = Eip1559Tx {
            chain_id: self.chain_id,
            nonce,
            max_priority_fee_per_gas: gas_price,
            max_fee_per_gas: gas_price,
            gas_limit: self.settings.gas_limit,
            to: self.contract,
            value: 0,
            input: calldata,
        };
        let signed = tx.sign(signer)?;
        let submitted = self.call("eth_sendRawTransaction", json!([signed.raw_hex()]))?;
        let tx_id = submitted
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| signed.hash_hex());
        info!(
            network = %self.network,
            fingerprint = %fingerprint,
            tx_id = %tx_id,
            nonce,
            "registration submitted"
        );

        let receipt = self.wait_for_receipt(&tx_id)?;
        let status = receipt
            .get("status")
            .map(parse_quantity_u64)
            .transpose()?
            .unwrap_or(1);
        if status == 0 {
            return Err(ProveItError::Contract(format!(
                "transaction {tx_id} reverted on-chain"
            )));
        }
        let block_number = parse_quantity_u64(receipt.get("blockNumber").unwrap_or(&Value::Null))?;
        let timestamp = self.block_timestamp(block_number)?;
        info!(tx_id = %tx_id, block_number, timestamp, "registration confirmed");

        Ok(RawTxResult {
            fingerprint,
            tx_id,
            owner,
            timestamp,
            block_number,
            network: self.network,
            metadata: metadata.to_string(),
        })
    }

    fn wait_for_receipt(&self, tx_id: &str) -> Result<Value> {
        let policy = self.settings.confirmation;
        let started = Instant::now();
        loop {
            let receipt = self.call("eth_getTransactionReceipt", json!([tx_id]))?;
            if !receipt.is_null() {
                return Ok(receipt);
            }
            let waited = started.elapsed();
            if waited >= policy.timeout {
                warn!(tx_id, waited_ms = waited.as_millis() as u64, "confirmation timed out");
                return Err(ProveItError::Timeout {
                    tx_id: tx_id.to_string(),
                    waited,
                });
            }
            debug!(tx_id, "receipt pending");
            thread::sleep(policy.poll_interval.min(policy.timeout.saturating_sub(waited)));
        }
    }

    fn block_timestamp(&self, block_number: u64) -> Result<u64> {
        let block = self.call(
            "eth_getBlockByNumber",
            json!([to_quantity_u64(block_number), false]),
        )?;
        let timestamp = block
            .get("timestamp")
            .ok_or_else(|| ProveItError::protocol(format!("block {block_number} not available")))?;
        Ok(parse_quantity_u64(timestamp)?)
    }

    /// Looks up `fingerprint`. Only malformed input is an error; every other
    /// failure is logged and reported as "not registered".
    pub fn lookup(&self, fingerprint: &str) -> Result<RawLookupResult> {
        let fingerprint = Fingerprint::parse(fingerprint)?;
        let registration = match self.read_registration(&fingerprint) {
            Ok(registration) => registration,
            Err(err) => {
                warn!(
                    fingerprint = %fingerprint,
                    error = %err,
                    "lookup failed; reporting not registered"
                );
                None
            }
        };
        Ok(RawLookupResult {
            fingerprint,
            registration,
        })
    }

    fn read_registration(&self, fingerprint: &Fingerprint) -> Result<Option<RawRegistration>> {
        let data = self.eth_call(None, &abi::encode_getter(Getter::Verify, fingerprint))?;
        let (owner, timestamp, metadata) = abi::decode_registration_tuple(&data)?;
        if owner.is_zero() {
            return Ok(None);
        }
        Ok(Some(RawRegistration {
            owner,
            timestamp,
            metadata,
        }))
    }

    fn call_getter(&self, getter: Getter, fingerprint: &str) -> Result<Vec<u8>> {
        let fingerprint = Fingerprint::parse(fingerprint)?;
        self.eth_call(None, &abi::encode_getter(getter, &fingerprint))
    }

    /// `isRegistered(bytes32)`.
    pub fn is_registered(&self, fingerprint: &str) -> Result<bool> {
        abi::decode_bool(&self.call_getter(Getter::IsRegistered, fingerprint)?)
    }

    /// `getOwner(bytes32)`; the zero address when unregistered.
    pub fn owner_of(&self, fingerprint: &str) -> Result<Address> {
        let data = self.call_getter(Getter::Owner, fingerprint)?;
        abi::decode_address(&data)
    }

    /// `getTimestamp(bytes32)`; zero when unregistered.
    pub fn timestamp_of(&self, fingerprint: &str) -> Result<u64> {
        abi::decode_u64(&self.call_getter(Getter::Timestamp, fingerprint)?)
    }

    /// `getMetadata(bytes32)`; empty when unregistered.
    pub fn metadata_of(&self, fingerprint: &str) -> Result<String> {
        abi::decode_string(&self.call_getter(Getter::Metadata, fingerprint)?)
    }
}
