//! Downline aggregation
//!
//! The inverse view of chain resolution: starting from an owner, walk the
//! invitation graph downward level by level and report how many invitees sit
//! at each level and how much referral reward the owner has earned from it.

use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::db::{ledger, participants};
use crate::error::{GranaryError, Result};
use crate::types::{ParticipantId, MAX_CHAIN_DEPTH};

/// One level of an owner's downline
#[derive(Debug, Clone, Serialize)]
pub struct LevelSummary {
    pub level: u32,
    pub count: u64,
    pub total_rewards: Decimal,
}

/// Aggregate the subtree rooted at `owner_id`, level by level.
///
/// Stops at the first empty level or at the depth cap. Cycles in malformed
/// data are handled the same way as in chain resolution: a code is visited
/// at most once.
pub fn referral_structure(conn: &Connection, owner_id: ParticipantId) -> Result<Vec<LevelSummary>> {
    let owner = participants::get_participant(conn, owner_id)?
        .ok_or_else(|| GranaryError::NotFound(format!("Participant {}", owner_id)))?;

    let mut visited: std::collections::HashSet<String> = std::collections::HashSet::new();
    visited.insert(owner.public_code.clone());

    let mut frontier = vec![owner.public_code];
    let mut summaries = Vec::new();

    for level in 1..=(MAX_CHAIN_DEPTH as u32) {
        let children = children_of(conn, &frontier)?;
        let fresh: Vec<(ParticipantId, String)> = children
            .into_iter()
            .filter(|(_, code)| visited.insert(code.clone()))
            .collect();

        if fresh.is_empty() {
            break;
        }

        summaries.push(LevelSummary {
            level,
            count: fresh.len() as u64,
            total_rewards: ledger::referral_reward_sum_at_level(conn, owner_id, level)?,
        });

        frontier = fresh.into_iter().map(|(_, code)| code).collect();
    }

    Ok(summaries)
}

/// Direct invitees of any of the given public codes
fn children_of(conn: &Connection, codes: &[String]) -> Result<Vec<(ParticipantId, String)>> {
    let mut out = Vec::new();

    // Bounded IN-list chunks keep the statement size sane for wide levels
    for chunk in codes.chunks(500) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT id, public_code FROM participants WHERE parent_code IN ({}) ORDER BY id",
            placeholders
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| GranaryError::Database(format!("Prepare failed: {}", e)))?;

        let rows = stmt
            .query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, ParticipantId>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| GranaryError::Database(format!("Query failed: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| GranaryError::Database(format!("Row parse failed: {}", e)))?;

        out.extend(rows);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ledger::{entry_type, NewLedgerEntry}, participants::create_participant, Db};
    use crate::types::Currency;
    use rust_decimal_macros::dec;

    #[test]
    fn test_structure_counts_and_rewards() {
        let db = Db::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let owner = create_participant(conn, "STRUCOWN", None)?;
            create_participant(conn, "STRUC01A", Some("STRUCOWN"))?;
            create_participant(conn, "STRUC01B", Some("STRUCOWN"))?;
            create_participant(conn, "STRUC02A", Some("STRUC01A"))?;

            ledger::bulk_insert_entries(
                conn,
                &[
                    NewLedgerEntry {
                        participant_id: owner.id,
                        entry_type: entry_type::REFERRAL_REWARD,
                        currency: Currency::Coin,
                        amount: dec!(12.5),
                        source: Some("batch-a".into()),
                        category: Some("referral".into()),
                        ref_level: Some(1),
                    },
                    NewLedgerEntry {
                        participant_id: owner.id,
                        entry_type: entry_type::REFERRAL_REWARD,
                        currency: Currency::Coin,
                        amount: dec!(7.5),
                        source: Some("batch-b".into()),
                        category: Some("referral".into()),
                        ref_level: Some(1),
                    },
                    NewLedgerEntry {
                        participant_id: owner.id,
                        entry_type: entry_type::REFERRAL_REWARD,
                        currency: Currency::Coin,
                        amount: dec!(3),
                        source: Some("batch-b".into()),
                        category: Some("referral".into()),
                        ref_level: Some(2),
                    },
                ],
            )?;

            let levels = referral_structure(conn, owner.id)?;
            assert_eq!(levels.len(), 2);
            assert_eq!(levels[0].level, 1);
            assert_eq!(levels[0].count, 2);
            assert_eq!(levels[0].total_rewards, dec!(20));
            assert_eq!(levels[1].level, 2);
            assert_eq!(levels[1].count, 1);
            assert_eq!(levels[1].total_rewards, dec!(3));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_structure_empty_downline() {
        let db = Db::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let owner = create_participant(conn, "LONELY01", None)?;
            assert!(referral_structure(conn, owner.id)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_structure_missing_owner() {
        let db = Db::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let err = referral_structure(conn, 424242);
            assert!(matches!(err, Err(GranaryError::NotFound(_))));
            Ok(())
        })
        .unwrap();
    }
}
