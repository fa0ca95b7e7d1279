use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, warn};

use codec::Codec;
use types::tx::SignedTransaction;
use types::Address;

use crate::error::TxPoolError;
use crate::TransactionRef;

// Records beyond this are treated as corruption, pool admission rejects
// transactions far below it.
const MAX_RECORD_SIZE: u32 = 1024 * 1024;

const LOAD_BATCH: usize = 1024;

/// Append-only file of locally submitted transactions, replayed on startup so
/// local submissions survive restarts. Records are length prefixed canonical
/// encodings; a truncated tail is treated as end of file.
pub struct TxJournal {
    path: PathBuf,
    writer: Option<Box<dyn Write + Send + Sync>>,
}

impl TxJournal {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
        }
    }

    /// Streams the journal into `add` in batches. Inserts triggered while
    /// replaying land in a sink writer until the next rotation.
    pub fn load<F>(&mut self, mut add: F) -> Result<()>
    where
        F: FnMut(Vec<SignedTransaction>) -> Vec<Result<(), TxPoolError>>,
    {
        if !self.path.exists() {
            return Ok(());
        }
        self.writer = Some(Box::new(io::sink()));

        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut total = 0_usize;
        let mut dropped = 0_usize;
        let mut batch: Vec<SignedTransaction> = Vec::with_capacity(LOAD_BATCH);

        loop {
            let mut len_buf = [0_u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            }
            let len = u32::from_le_bytes(len_buf);
            if len == 0 || len > MAX_RECORD_SIZE {
                warn!(len = len, "dropping corrupted journal tail");
                break;
            }
            let mut buf = vec![0_u8; len as usize];
            if reader.read_exact(&mut buf).is_err() {
                debug!("journal ends with a truncated record");
                break;
            }
            match SignedTransaction::decode(&buf) {
                Ok(tx) => {
                    total += 1;
                    batch.push(tx);
                    if batch.len() >= LOAD_BATCH {
                        for res in add(std::mem::take(&mut batch)) {
                            if res.is_err() {
                                dropped += 1;
                            }
                        }
                    }
                }
                Err(_) => {
                    warn!("dropping undecodable journal record");
                    break;
                }
            }
        }
        if !batch.is_empty() {
            for res in add(std::mem::take(&mut batch)) {
                if res.is_err() {
                    dropped += 1;
                }
            }
        }
        info!(
            transactions = total,
            dropped = dropped,
            "loaded local transaction journal"
        );
        Ok(())
    }

    /// Appends one transaction to the active journal file.
    pub fn insert(&mut self, tx: &TransactionRef) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(TxPoolError::NoActiveJournal)?;
        write_record(writer.as_mut(), tx)?;
        writer.flush()?;
        Ok(())
    }

    /// Atomically regenerates the journal from the pool's current local
    /// content: writes `<path>.new`, then renames it over the old file.
    pub fn rotate(&mut self, all: HashMap<Address, Vec<TransactionRef>>) -> Result<()> {
        self.writer = None;

        let replacement_path = self.path.with_extension("new");
        let mut replacement = File::create(&replacement_path)?;
        let mut journaled = 0_usize;
        for txs in all.values() {
            for tx in txs {
                write_record(&mut replacement, tx)?;
                journaled += 1;
            }
        }
        replacement.flush()?;
        drop(replacement);

        std::fs::rename(&replacement_path, &self.path)?;
        let active = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = Some(Box::new(active));

        info!(
            transactions = journaled,
            accounts = all.len(),
            "regenerated local transaction journal"
        );
        Ok(())
    }

    /// Flushes and closes the active journal file.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

fn write_record(writer: &mut dyn Write, tx: &SignedTransaction) -> Result<()> {
    let bytes = tx.encode()?;
    writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    writer.write_all(&bytes)?;
    Ok(())
}
