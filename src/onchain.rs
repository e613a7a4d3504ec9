use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::VerifyingKey;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{Creator, MintId, OnChainRecord};
use crate::error::GibError;
use crate::http::build_client;

pub const TOKEN_METADATA_PROGRAM_ID: &str = "metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s";

const METADATA_SEED: &[u8] = b"metadata";
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";
const METADATA_V1_KEY: u8 = 4;

pub trait ChainClient: Send + Sync {
    fn resolve(&self, mint: &MintId) -> Result<OnChainRecord, GibError>;
}

/// Resolves mints through a JSON-RPC node. No retries beyond what the
/// transport does.
#[derive(Clone)]
pub struct RpcChainClient {
    client: Client,
    endpoint: String,
}

impl RpcChainClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, GibError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn get_account_info(&self, address: &str) -> Result<AccountValue, GibError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "getAccountInfo",
            params: (address, AccountInfoConfig { encoding: "base64" }),
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|err| GibError::Resolution(format!("getAccountInfo {address}: {err}")))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "RPC request failed".to_string());
            return Err(GibError::RpcStatus { status, message });
        }
        let body: RpcResponse<AccountInfoResult> = response
            .json()
            .map_err(|err| GibError::Resolution(format!("getAccountInfo {address}: {err}")))?;
        if let Some(error) = body.error {
            return Err(GibError::Resolution(format!(
                "getAccountInfo {address}: {} ({})",
                error.message, error.code
            )));
        }
        body.result
            .and_then(|result| result.value)
            .ok_or_else(|| GibError::Resolution(format!("account {address} not found")))
    }
}

impl ChainClient for RpcChainClient {
    fn resolve(&self, mint: &MintId) -> Result<OnChainRecord, GibError> {
        let address = metadata_address(mint)?;
        tracing::debug!(mint = %mint, %address, "resolving metadata account");
        let account = self.get_account_info(&address)?;

        if account.owner != TOKEN_METADATA_PROGRAM_ID {
            return Err(GibError::Deserialization(format!(
                "account {address} is owned by {}",
                account.owner
            )));
        }
        let (encoded, encoding) = account.data;
        if encoding != "base64" {
            return Err(GibError::Deserialization(format!(
                "unexpected account encoding {encoding}"
            )));
        }
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(|err| GibError::Deserialization(err.to_string()))?;
        decode_metadata(&bytes)
    }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: (&'a str, AccountInfoConfig),
}

#[derive(Serialize)]
struct AccountInfoConfig {
    encoding: &'static str,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct AccountInfoResult {
    value: Option<AccountValue>,
}

#[derive(Deserialize)]
struct AccountValue {
    data: (String, String),
    owner: String,
}

/// Address of the token-metadata account for `mint`.
pub fn metadata_address(mint: &MintId) -> Result<String, GibError> {
    let program = decode_pubkey(TOKEN_METADATA_PROGRAM_ID)?;
    let mint_key = mint.to_bytes()?;
    let (address, _bump) =
        find_program_address(&[METADATA_SEED, &program, &mint_key], &program).ok_or_else(
            || GibError::Resolution(format!("no program address for mint {mint}")),
        )?;
    Ok(bs58::encode(address).into_string())
}

/// Searches bumps from 255 down for the first hash that is off the ed25519 curve.
pub fn find_program_address(seeds: &[&[u8]], program_id: &[u8; 32]) -> Option<([u8; 32], u8)> {
    (0..=u8::MAX)
        .rev()
        .find_map(|bump| create_program_address(seeds, bump, program_id).map(|key| (key, bump)))
}

fn create_program_address(seeds: &[&[u8]], bump: u8, program_id: &[u8; 32]) -> Option<[u8; 32]> {
    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update([bump]);
    hasher.update(program_id);
    hasher.update(PDA_MARKER);
    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize());
    (!is_on_curve(&key)).then_some(key)
}

pub fn is_on_curve(bytes: &[u8; 32]) -> bool {
    VerifyingKey::from_bytes(bytes).is_ok()
}

fn decode_pubkey(value: &str) -> Result<[u8; 32], GibError> {
    let decoded = bs58::decode(value)
        .into_vec()
        .map_err(|err| GibError::Resolution(format!("{value}: {err}")))?;
    decoded
        .try_into()
        .map_err(|_| GibError::Resolution(format!("{value} is not a 32-byte key")))
}

/// Decodes a `MetadataV1` account body.
pub fn decode_metadata(data: &[u8]) -> Result<OnChainRecord, GibError> {
    let mut reader = AccountReader::new(data);
    let key = reader.u8()?;
    if key != METADATA_V1_KEY {
        return Err(GibError::Deserialization(format!(
            "unexpected account key {key}"
        )));
    }
    let update_authority = reader.pubkey()?;
    let mint = reader.pubkey()?;
    let name = reader.string()?;
    let symbol = reader.string()?;
    let uri = reader.string()?;
    let seller_fee_basis_points = reader.u16()?;

    let mut creators = Vec::new();
    if reader.bool()? {
        let count = reader.u32()?;
        for _ in 0..count {
            let address = reader.pubkey()?;
            let verified = reader.bool()?;
            let share = reader.u8()?;
            creators.push(Creator {
                address,
                verified,
                share,
            });
        }
    }

    // Older accounts may end before the trailing flags.
    let primary_sale_happened = reader.optional_bool()?;
    let is_mutable = reader.optional_bool()?;

    Ok(OnChainRecord {
        mint,
        update_authority,
        name,
        symbol,
        uri,
        seller_fee_basis_points,
        creators,
        primary_sale_happened,
        is_mutable,
    })
}

struct AccountReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> AccountReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], GibError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                GibError::Deserialization(format!(
                    "account data truncated at offset {} (wanted {len} bytes of {})",
                    self.offset,
                    self.data.len()
                ))
            })?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, GibError> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> Result<bool, GibError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(GibError::Deserialization(format!(
                "invalid bool byte {other} at offset {}",
                self.offset - 1
            ))),
        }
    }

    fn optional_bool(&mut self) -> Result<bool, GibError> {
        if self.offset >= self.data.len() {
            return Ok(false);
        }
        self.bool()
    }

    fn u16(&mut self) -> Result<u16, GibError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, GibError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn pubkey(&mut self) -> Result<String, GibError> {
        Ok(bs58::encode(self.take(32)?).into_string())
    }

    fn string(&mut self) -> Result<String, GibError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        let text = std::str::from_utf8(bytes)
            .map_err(|err| GibError::Deserialization(err.to_string()))?;
        Ok(text.trim_end_matches('\0').to_string())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn push_string(buf: &mut Vec<u8>, value: &str, padded: usize) {
        let mut bytes = value.as_bytes().to_vec();
        bytes.resize(padded.max(bytes.len()), 0);
        buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&bytes);
    }

    fn sample_account() -> Vec<u8> {
        let mut buf = vec![METADATA_V1_KEY];
        buf.extend_from_slice(&[1u8; 32]);
        buf.extend_from_slice(&[2u8; 32]);
        push_string(&mut buf, "Degen #1", 32);
        push_string(&mut buf, "DGN", 10);
        push_string(&mut buf, "https://arweave.net/abc", 200);
        buf.extend_from_slice(&500u16.to_le_bytes());
        buf.push(1);
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&[3u8; 32]);
        buf.push(1);
        buf.push(100);
        buf.extend_from_slice(&[4u8; 32]);
        buf.push(0);
        buf.push(0);
        buf.push(1);
        buf.push(1);
        buf
    }

    #[test]
    fn decode_metadata_account() {
        let record = decode_metadata(&sample_account()).unwrap();
        assert_eq!(record.name, "Degen #1");
        assert_eq!(record.symbol, "DGN");
        assert_eq!(record.uri, "https://arweave.net/abc");
        assert_eq!(record.seller_fee_basis_points, 500);
        assert_eq!(record.mint, bs58::encode([2u8; 32]).into_string());
        assert_eq!(record.creators.len(), 2);
        assert!(record.creators[0].verified);
        assert_eq!(record.creators[0].share, 100);
        assert!(!record.creators[1].verified);
        assert!(record.primary_sale_happened);
        assert!(record.is_mutable);
    }

    #[test]
    fn decode_rejects_wrong_key() {
        let mut account = sample_account();
        account[0] = 6;
        assert_matches!(decode_metadata(&account), Err(GibError::Deserialization(_)));
    }

    #[test]
    fn decode_rejects_truncated_account() {
        let account = sample_account();
        assert_matches!(
            decode_metadata(&account[..80]),
            Err(GibError::Deserialization(_))
        );
    }

    #[test]
    fn trailing_flags_default_to_false() {
        let mut account = sample_account();
        account.truncate(account.len() - 2);
        let record = decode_metadata(&account).unwrap();
        assert!(!record.primary_sale_happened);
        assert!(!record.is_mutable);
    }

    #[test]
    fn basepoint_is_on_curve() {
        let mut basepoint = [0x66u8; 32];
        basepoint[0] = 0x58;
        assert!(is_on_curve(&basepoint));
    }

    #[test]
    fn program_address_is_off_curve_and_stable() {
        let program = decode_pubkey(TOKEN_METADATA_PROGRAM_ID).unwrap();
        let mint = [7u8; 32];
        let seeds: [&[u8]; 3] = [METADATA_SEED, &program, &mint];
        let (first, bump) = find_program_address(&seeds, &program).unwrap();
        let (second, again) = find_program_address(&seeds, &program).unwrap();
        assert_eq!(first, second);
        assert_eq!(bump, again);
        assert!(!is_on_curve(&first));
    }
}
