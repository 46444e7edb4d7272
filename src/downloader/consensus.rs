//! Signature consensus across nodes
//!
//! A file is certified when the nodes agreeing on one hash make up at least
//! two thirds of the address book: `3 * agreeing >= 2 * N`, with `N > 0`.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use super::signature::SignatureRecord;
use crate::addressbook::AddressBook;
use crate::domain::FileHash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusResult {
    pub filename: String,
    pub winning_hash: FileHash,
    pub agreeing_nodes: BTreeSet<String>,
    /// More than one hash reached the threshold
    pub contested: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusOutcome {
    Certified(ConsensusResult),
    /// Not enough agreement yet; the file is retried next cycle
    Pending {
        filename: String,
        best: usize,
        required: usize,
    },
}

pub struct ConsensusSelector;

impl ConsensusSelector {
    /// Smallest agreeing count that certifies with `nodes` known nodes
    pub fn required(nodes: usize) -> usize {
        ((2 * nodes + 2) / 3).max(1)
    }

    pub fn select(filename: &str, records: &[SignatureRecord], book: &AddressBook) -> ConsensusOutcome {
        let nodes = book.len();

        let mut by_hash: BTreeMap<FileHash, BTreeSet<String>> = BTreeMap::new();
        for record in records {
            if !record.is_valid() || !book.contains(&record.node_id) {
                continue;
            }
            if let Some(hash) = record.declared_hash {
                by_hash.entry(hash).or_default().insert(record.node_id.clone());
            }
        }

        let best = by_hash.values().map(BTreeSet::len).max().unwrap_or(0);
        let qualifying: Vec<(&FileHash, &BTreeSet<String>)> = by_hash
            .iter()
            .filter(|(_, agreeing)| nodes > 0 && 3 * agreeing.len() >= 2 * nodes)
            .collect();

        // BTreeMap iteration is hash-ascending, so the first maximum is the tie-break winner
        let winner = qualifying
            .iter()
            .fold(None::<(&FileHash, &BTreeSet<String>)>, |acc, (hash, agreeing)| match acc {
                Some((_, current)) if current.len() >= agreeing.len() => acc,
                _ => Some((*hash, *agreeing)),
            });

        let Some((hash, agreeing)) = winner else {
            return ConsensusOutcome::Pending {
                filename: filename.to_string(),
                best,
                required: Self::required(nodes),
            };
        };

        let contested = qualifying.len() > 1;
        if contested {
            warn!(
                filename,
                hashes = qualifying.len(),
                winner = %hash,
                "Multiple hashes reached consensus"
            );
        }

        ConsensusOutcome::Certified(ConsensusResult {
            filename: filename.to_string(),
            winning_hash: *hash,
            agreeing_nodes: agreeing.clone(),
            contested,
        })
    }
}
