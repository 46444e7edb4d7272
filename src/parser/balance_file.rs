//! Account balance snapshot files
//!
//! Plain CSV with a short preamble:
//!
//! ```text
//! TimeStamp:2019-08-30T18:15:00.016002001Z
//! shardNum,realmNum,accountNum,balance
//! 0,0,1,0
//! 0,0,2,4999999999999999
//! ```

use csv::{ReaderBuilder, Trim};

use crate::domain::{parse_instant_nanos, EntityId};

use super::ParseError;

const TIMESTAMP_PREFIX: &str = "TimeStamp:";
const HEADER: &str = "shardnum,realmnum,accountnum,balance";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountBalance {
    pub account: EntityId,
    pub balance: i64,
}

/// Decoded balance snapshot
#[derive(Debug, Clone)]
pub struct BalanceFile {
    /// Instant from the `TimeStamp:` preamble line, if present
    pub timestamp_ns: Option<i64>,
    pub balances: Vec<AccountBalance>,
}

pub fn decode(bytes: &[u8]) -> Result<BalanceFile, ParseError> {
    if bytes.is_empty() {
        return Err(ParseError::Empty);
    }
    let text = std::str::from_utf8(bytes).map_err(|e| ParseError::Balance {
        line: 0,
        reason: format!("not UTF-8: {}", e),
    })?;

    let mut timestamp_ns = None;
    let mut body_offset = None;
    let mut header_line = 0;
    let mut consumed = 0;
    for (index, line) in text.split_inclusive('\n').enumerate() {
        consumed += line.len();
        let trimmed = line.trim();
        if let Some(instant) = trimmed.strip_prefix(TIMESTAMP_PREFIX) {
            timestamp_ns = Some(parse_instant_nanos(instant.trim()).ok_or_else(|| {
                ParseError::Balance {
                    line: index + 1,
                    reason: format!("invalid timestamp '{}'", instant.trim()),
                }
            })?);
        } else if trimmed.replace(' ', "").eq_ignore_ascii_case(HEADER) {
            header_line = index + 1;
            body_offset = Some(consumed);
            break;
        }
    }

    let body_offset = body_offset.ok_or(ParseError::Balance {
        line: 0,
        reason: "missing shardNum,realmNum,accountNum,balance header".to_string(),
    })?;

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text[body_offset..].as_bytes());

    let mut balances = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| ParseError::Balance {
            line: header_line + e.position().map(|p| p.line() as usize).unwrap_or(0),
            reason: e.to_string(),
        })?;
        let line = header_line + record.position().map(|p| p.line() as usize).unwrap_or(0);
        if record.len() != 4 {
            return Err(ParseError::Balance {
                line,
                reason: format!("expected 4 columns, found {}", record.len()),
            });
        }
        let field = |i: usize| -> Result<i64, ParseError> {
            record[i].parse::<i64>().map_err(|e| ParseError::Balance {
                line,
                reason: format!("column {}: {}", i + 1, e),
            })
        };
        balances.push(AccountBalance {
            account: EntityId::new(field(0)?, field(1)?, field(2)?),
            balance: field(3)?,
        });
    }

    Ok(BalanceFile {
        timestamp_ns,
        balances,
    })
}

/// Render a snapshot in the same layout `decode` reads.
pub fn encode(timestamp: &str, balances: &[AccountBalance]) -> Vec<u8> {
    let mut out = format!("{}{}\nshardNum,realmNum,accountNum,balance\n", TIMESTAMP_PREFIX, timestamp);
    for b in balances {
        out.push_str(&format!(
            "{},{},{},{}\n",
            b.account.shard, b.account.realm, b.account.num, b.balance
        ));
    }
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_snapshot() {
        let text = "TimeStamp:2019-08-30T18:15:00.016002001Z\n\
                    shardNum,realmNum,accountNum,balance\n\
                    0,0,1,0\n\
                    0,0,2,4999999999999999\n";
        let file = decode(text.as_bytes()).unwrap();
        assert_eq!(file.balances.len(), 2);
        assert_eq!(file.balances[1].account, EntityId::new(0, 0, 2));
        assert_eq!(file.balances[1].balance, 4_999_999_999_999_999);
        assert_eq!(file.timestamp_ns.unwrap() % 1_000_000_000, 16_002_001);
    }

    #[test]
    fn test_comment_lines_before_header_ignored() {
        let text = "# exported by node 0.0.3\nshardNum,realmNum,accountNum,balance\n0,0,5,10\n";
        let file = decode(text.as_bytes()).unwrap();
        assert!(file.timestamp_ns.is_none());
        assert_eq!(file.balances.len(), 1);
    }

    #[test]
    fn test_missing_header_fails() {
        assert!(matches!(
            decode(b"0,0,1,0\n"),
            Err(ParseError::Balance { .. })
        ));
    }

    #[test]
    fn test_bad_row_reports_line() {
        let text = "shardNum,realmNum,accountNum,balance\n0,0,1,0\n0,0,x,5\n";
        match decode(text.as_bytes()) {
            Err(ParseError::Balance { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected balance error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_file_fails() {
        assert!(matches!(decode(b""), Err(ParseError::Empty)));
    }
}
