//! Ancestor chain resolution
//!
//! Two interchangeable strategies behind one contract: a per-hop walk
//! (one query per level) and a single recursive-closure query. Both return
//! the same chains; the choice is made once at construction from config.

use std::collections::HashSet;

use rusqlite::{params, Connection};
use tracing::warn;

use crate::config::ResolverStrategy;
use crate::db::participants;
use crate::error::{GranaryError, Result};
use crate::types::{ParticipantId, MAX_CHAIN_DEPTH};

/// Resolves a participant's ordered ancestor chain (nearest inviter first).
///
/// Contract notes:
/// - chain length never exceeds [`MAX_CHAIN_DEPTH`];
/// - a broken link (parent code with no owner) truncates the chain instead
///   of failing the caller;
/// - a revisited participant terminates the walk, so a malformed cycle
///   yields a finite chain with each ancestor listed once.
pub trait ChainResolver: Send + Sync {
    fn resolve_chain(&self, conn: &Connection, participant_id: ParticipantId)
        -> Result<Vec<ParticipantId>>;
}

/// Construct the resolver selected by configuration
pub fn resolver_for(strategy: ResolverStrategy) -> Box<dyn ChainResolver> {
    match strategy {
        ResolverStrategy::Standard => Box::new(IterativeResolver),
        ResolverStrategy::Optimized => Box::new(RecursiveResolver),
    }
}

/// Per-hop lookups, O(depth) queries
pub struct IterativeResolver;

impl ChainResolver for IterativeResolver {
    fn resolve_chain(
        &self,
        conn: &Connection,
        participant_id: ParticipantId,
    ) -> Result<Vec<ParticipantId>> {
        let mut chain = Vec::new();
        let mut visited: HashSet<ParticipantId> = HashSet::new();
        visited.insert(participant_id);

        let Some(start) = participants::get_participant(conn, participant_id)? else {
            return Ok(chain);
        };

        let mut next_code = start.parent_code;
        while let Some(code) = next_code {
            if chain.len() >= MAX_CHAIN_DEPTH {
                break;
            }

            let Some(ancestor) = participants::get_by_public_code(conn, &code)? else {
                // Dangling pointer: truncate, the chain up to here is valid
                warn!(participant_id, parent_code = %code, "Broken referral link, truncating chain");
                break;
            };

            if !visited.insert(ancestor.id) {
                break;
            }

            chain.push(ancestor.id);
            next_code = ancestor.parent_code;
        }

        Ok(chain)
    }
}

/// Single recursive-closure query, O(1) round trips
pub struct RecursiveResolver;

impl ChainResolver for RecursiveResolver {
    fn resolve_chain(
        &self,
        conn: &Connection,
        participant_id: ParticipantId,
    ) -> Result<Vec<ParticipantId>> {
        let mut stmt = conn
            .prepare(
                "WITH RECURSIVE chain(id, parent_code, depth) AS (
                     SELECT p.id, p.parent_code, 0
                     FROM participants p WHERE p.id = ?1
                     UNION ALL
                     SELECT a.id, a.parent_code, c.depth + 1
                     FROM chain c
                     JOIN participants a ON a.public_code = c.parent_code
                     WHERE c.depth < ?2
                 )
                 SELECT id FROM chain WHERE depth > 0 ORDER BY depth",
            )
            .map_err(|e| GranaryError::Database(format!("Prepare failed: {}", e)))?;

        let raw: Vec<ParticipantId> = stmt
            .query_map(params![participant_id, MAX_CHAIN_DEPTH as i64], |row| row.get(0))
            .map_err(|e| GranaryError::Database(format!("Query failed: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| GranaryError::Database(format!("Row parse failed: {}", e)))?;

        // The closure query bounds the walk by depth; a cycle still repeats
        // ids inside that bound. Keep first occurrences only, so both
        // strategies return the same chain.
        let mut chain = Vec::with_capacity(raw.len());
        let mut visited: HashSet<ParticipantId> = HashSet::new();
        visited.insert(participant_id);
        for id in raw {
            if !visited.insert(id) {
                break;
            }
            chain.push(id);
            if chain.len() >= MAX_CHAIN_DEPTH {
                break;
            }
        }

        Ok(chain)
    }
}
