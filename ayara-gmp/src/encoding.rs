//! ABI encoding/decoding for controller calls
//!
//! Every field occupies one or more 32-byte words laid out the way Solidity's
//! `abi.encode` would for static types. Dynamic `bytes` are written inline as a
//! length word followed by the right-padded data.

use crate::{Address, Amount, FeeData, GmpError, Operation, RemoteExecution, SettlementReport};

const WORD: usize = 32;

// ═══════════════════════════════════════════════════════════════════════════════
// WRITER
// ═══════════════════════════════════════════════════════════════════════════════

/// Appends ABI words to a buffer.
#[derive(Debug, Default)]
pub struct AbiWriter {
    buf: Vec<u8>,
}

impl AbiWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_words(words: usize) -> Self {
        Self {
            buf: Vec::with_capacity(words * WORD),
        }
    }

    pub fn address(&mut self, value: &Address) -> &mut Self {
        self.buf.extend_from_slice(&value.to_word());
        self
    }

    pub fn uint64(&mut self, value: u64) -> &mut Self {
        let mut word = [0u8; WORD];
        word[24..].copy_from_slice(&value.to_be_bytes());
        self.buf.extend_from_slice(&word);
        self
    }

    pub fn uint128(&mut self, value: u128) -> &mut Self {
        let mut word = [0u8; WORD];
        word[16..].copy_from_slice(&value.to_be_bytes());
        self.buf.extend_from_slice(&word);
        self
    }

    pub fn boolean(&mut self, value: bool) -> &mut Self {
        self.uint64(u64::from(value))
    }

    pub fn bytes32(&mut self, value: &[u8; 32]) -> &mut Self {
        self.buf.extend_from_slice(value);
        self
    }

    /// Length word, then data padded to a 32-byte boundary.
    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.uint64(data.len() as u64);
        let padded_len = data.len().div_ceil(WORD) * WORD;
        let start = self.buf.len();
        self.buf.resize(start + padded_len, 0);
        self.buf[start..start + data.len()].copy_from_slice(data);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// READER
// ═══════════════════════════════════════════════════════════════════════════════

/// Bounds-checked cursor over ABI words.
#[derive(Debug)]
pub struct AbiReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> AbiReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8], GmpError> {
        if self.remaining() < len {
            return Err(GmpError::Decoding(format!(
                "{} truncated: need {} bytes at offset {}, have {}",
                field,
                len,
                self.offset,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn word(&mut self, field: &str) -> Result<&'a [u8], GmpError> {
        self.take(WORD, field)
    }

    pub fn address(&mut self, field: &str) -> Result<Address, GmpError> {
        let word = self.word(field)?;
        if word[..12].iter().any(|b| *b != 0) {
            return Err(GmpError::Decoding(format!("{}: dirty address padding", field)));
        }
        Address::from_slice(&word[12..])
    }

    pub fn uint64(&mut self, field: &str) -> Result<u64, GmpError> {
        let word = self.word(field)?;
        if word[..24].iter().any(|b| *b != 0) {
            return Err(GmpError::Decoding(format!("{}: value exceeds uint64", field)));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&word[24..]);
        Ok(u64::from_be_bytes(buf))
    }

    pub fn uint128(&mut self, field: &str) -> Result<u128, GmpError> {
        let word = self.word(field)?;
        if word[..16].iter().any(|b| *b != 0) {
            return Err(GmpError::Decoding(format!("{}: value exceeds uint128", field)));
        }
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&word[16..]);
        Ok(u128::from_be_bytes(buf))
    }

    pub fn boolean(&mut self, field: &str) -> Result<bool, GmpError> {
        match self.uint64(field)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(GmpError::Decoding(format!("{}: invalid bool {}", field, other))),
        }
    }

    pub fn bytes32(&mut self, field: &str) -> Result<[u8; 32], GmpError> {
        let word = self.word(field)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(word);
        Ok(out)
    }

    pub fn bytes(&mut self, field: &str) -> Result<Vec<u8>, GmpError> {
        let len = usize::try_from(self.uint64(field)?)
            .map_err(|_| GmpError::Decoding(format!("{}: length overflow", field)))?;
        if len > self.remaining() {
            return Err(GmpError::Decoding(format!(
                "{} truncated: length {} exceeds remaining {} bytes",
                field,
                len,
                self.remaining()
            )));
        }
        let padded_len = len
            .checked_next_multiple_of(WORD)
            .ok_or_else(|| GmpError::Decoding(format!("{}: length overflow", field)))?;
        let padded = self.take(padded_len, field)?;
        Ok(padded[..len].to_vec())
    }

    /// Fails if any bytes were left unread.
    pub fn finish(self) -> Result<(), GmpError> {
        if self.remaining() != 0 {
            return Err(GmpError::Decoding(format!(
                "{} trailing bytes after payload",
                self.remaining()
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROLLER CALL BODIES
// ═══════════════════════════════════════════════════════════════════════════════

fn write_fee(w: &mut AbiWriter, fee: &FeeData) {
    w.address(&fee.source_token)
        .address(&fee.destination_token)
        .uint128(fee.max_fee)
        .uint128(fee.relayer_fee)
        .uint64(fee.transport_gas_limit);
}

fn read_fee(r: &mut AbiReader<'_>) -> Result<FeeData, GmpError> {
    Ok(FeeData {
        source_token: r.address("fee.source_token")?,
        destination_token: r.address("fee.destination_token")?,
        max_fee: r.uint128("fee.max_fee")?,
        relayer_fee: r.uint128("fee.relayer_fee")?,
        transport_gas_limit: r.uint64("fee.transport_gas_limit")?,
    })
}

fn write_operation(w: &mut AbiWriter, op: &Operation) {
    w.uint64(op.destination_chain_id)
        .address(&op.target)
        .uint128(op.value)
        .uint64(op.signed_nonce)
        .bytes(&op.payload)
        .bytes(&op.signature);
}

fn read_operation(r: &mut AbiReader<'_>) -> Result<Operation, GmpError> {
    let destination_chain_id = r.uint64("operation.destination_chain_id")?;
    let target = r.address("operation.target")?;
    let value: Amount = r.uint128("operation.value")?;
    let signed_nonce = r.uint64("operation.signed_nonce")?;
    let payload = r.bytes("operation.payload")?;
    let signature = r.bytes("operation.signature")?;
    Ok(Operation {
        destination_chain_id,
        target,
        value,
        payload,
        signature,
        signed_nonce,
    })
}

/// Encode the body of an `ExecuteOperation` call
pub fn encode_remote_execution(exec: &RemoteExecution) -> Vec<u8> {
    // Layout: owner, wallet, fee (5 words), relayer, authorized_by_owner,
    //         operation (4 words + payload + signature)
    let mut w = AbiWriter::with_words(16);
    w.address(&exec.owner).address(&exec.wallet);
    write_fee(&mut w, &exec.fee);
    w.address(&exec.relayer).boolean(exec.authorized_by_owner);
    write_operation(&mut w, &exec.operation);
    w.finish()
}

/// Decode the body of an `ExecuteOperation` call
pub fn decode_remote_execution(bytes: &[u8]) -> Result<RemoteExecution, GmpError> {
    let mut r = AbiReader::new(bytes);
    let owner = r.address("owner")?;
    let wallet = r.address("wallet")?;
    let fee = read_fee(&mut r)?;
    let relayer = r.address("relayer")?;
    let authorized_by_owner = r.boolean("authorized_by_owner")?;
    let operation = read_operation(&mut r)?;
    r.finish()?;

    Ok(RemoteExecution {
        owner,
        wallet,
        fee,
        operation,
        relayer,
        authorized_by_owner,
    })
}

/// Encode the body of a `Settle` call
pub fn encode_settlement(report: &SettlementReport) -> Vec<u8> {
    let mut w = AbiWriter::with_words(5);
    w.address(&report.owner)
        .address(&report.source_token)
        .address(&report.destination_token)
        .uint128(report.allocated)
        .uint128(report.used_on_remote);
    w.finish()
}

/// Decode the body of a `Settle` call
pub fn decode_settlement(bytes: &[u8]) -> Result<SettlementReport, GmpError> {
    if bytes.len() != 5 * WORD {
        return Err(GmpError::Decoding(format!(
            "settlement payload must be {} bytes, got {}",
            5 * WORD,
            bytes.len()
        )));
    }

    let mut r = AbiReader::new(bytes);
    Ok(SettlementReport {
        owner: r.address("owner")?,
        source_token: r.address("source_token")?,
        destination_token: r.address("destination_token")?,
        allocated: r.uint128("allocated")?,
        used_on_remote: r.uint128("used_on_remote")?,
    })
}
