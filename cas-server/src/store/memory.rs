//! In-memory ticket store for single-node deployments and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use cas_core::{Ticket, TicketId, TicketKind};

use super::{StoreError, TicketModifier, TicketPredicate, TicketStore};

/// Tickets keyed by id. Per-entry locks make `consume` and `modify` atomic.
#[derive(Debug, Default)]
pub struct MemoryTicketStore {
    tickets: DashMap<TicketId, Ticket>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn put(&self, ticket: &Ticket) -> Result<(), StoreError> {
        match self.tickets.entry(ticket.id().clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(ticket.id().clone())),
            Entry::Vacant(entry) => {
                entry.insert(ticket.clone());
                Ok(())
            }
        }
    }

    async fn put_all(&self, tickets: &[Ticket]) -> Result<(), StoreError> {
        let mut inserted: Vec<&TicketId> = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            // The entry's shard lock is released at the end of the match,
            // before any rollback touches other entries.
            let taken = match self.tickets.entry(ticket.id().clone()) {
                Entry::Occupied(_) => true,
                Entry::Vacant(entry) => {
                    entry.insert(ticket.clone());
                    false
                }
            };
            if taken {
                for id in inserted {
                    self.tickets.remove(id);
                }
                return Err(StoreError::Duplicate(ticket.id().clone()));
            }
            inserted.push(ticket.id());
        }
        Ok(())
    }

    async fn get(&self, id: &TicketId) -> Result<Ticket, StoreError> {
        self.tickets
            .get(id)
            .map(|t| t.clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn modify(&self, id: &TicketId, f: TicketModifier<'_>) -> Result<Ticket, StoreError> {
        let mut entry = self
            .tickets
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        f(&mut *entry);
        Ok(entry.clone())
    }

    async fn delete(&self, id: &TicketId) -> Result<bool, StoreError> {
        Ok(self.tickets.remove(id).is_some())
    }

    async fn delete_many(&self, ids: &[TicketId]) -> Result<usize, StoreError> {
        Ok(ids
            .iter()
            .filter(|id| self.tickets.remove(*id).is_some())
            .count())
    }

    async fn delete_all(&self, predicate: TicketPredicate<'_>) -> Result<usize, StoreError> {
        let mut removed = 0;
        self.tickets.retain(|_, ticket| {
            let matched = predicate(ticket);
            removed += usize::from(matched);
            !matched
        });
        Ok(removed)
    }

    async fn consume(&self, id: &TicketId, now: DateTime<Utc>) -> Result<Ticket, StoreError> {
        let mut entry = self
            .tickets
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if entry.state.try_consume(now) {
            Ok(entry.clone())
        } else {
            Err(StoreError::AlreadyConsumed(id.clone()))
        }
    }

    async fn list(&self, kind: Option<TicketKind>) -> Result<Vec<Ticket>, StoreError> {
        Ok(self
            .tickets
            .iter()
            .filter(|t| kind.map_or(true, |k| t.kind() == k))
            .map(|t| t.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::testing;

    #[tokio::test]
    async fn store_contract() {
        testing::exercise(&MemoryTicketStore::new()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consume_has_one_winner() {
        testing::exercise_concurrent_consume(Arc::new(MemoryTicketStore::new())).await;
    }

    #[tokio::test]
    async fn put_all_rejects_whole_batch_on_duplicate() {
        let store = MemoryTicketStore::new();
        let now = Utc::now();
        store.put(&testing::tgt("TGT-1-a-node", now)).await.unwrap();
        let result = store
            .put_all(&[
                testing::st("ST-2-a-node", "TGT-1-a-node", now),
                testing::tgt("TGT-1-a-node", now),
            ])
            .await;
        assert!(matches!(result, Err(StoreError::Duplicate(_))));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn put_all_rejects_repeated_id_within_batch() {
        let store = MemoryTicketStore::new();
        let now = Utc::now();
        let result = store
            .put_all(&[
                testing::tgt("TGT-1-a-node", now),
                testing::st("ST-2-a-node", "TGT-1-a-node", now),
                testing::tgt("TGT-1-a-node", now),
            ])
            .await;
        assert_eq!(result, Err(StoreError::Duplicate(TicketId::new("TGT-1-a-node"))));
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_put_never_overwrites_batch() {
        let now = Utc::now();
        for round in 0..200 {
            let store = Arc::new(MemoryTicketStore::new());
            let tgt = format!("TGT-{round}-a-node");
            let st = format!("ST-{round}-a-node");

            let batch = {
                let store = store.clone();
                let (tgt, st) = (tgt.clone(), st.clone());
                tokio::spawn(async move {
                    store
                        .put_all(&[testing::tgt(&tgt, now), testing::st(&st, &tgt, now)])
                        .await
                })
            };
            let single = {
                let store = store.clone();
                let st = st.clone();
                tokio::spawn(async move { store.put(&testing::st(&st, "TGT-other-node", now)).await })
            };
            let batch = batch.await.unwrap();
            let single = single.await.unwrap();

            // Exactly one writer owns the contested id, and a failed batch leaves nothing.
            assert_ne!(batch.is_ok(), single.is_ok());
            let stored = store.get(&TicketId::new(&st)).await.unwrap();
            let parent = stored.parent().cloned();
            if batch.is_ok() {
                assert_eq!(parent, Some(TicketId::new(&tgt)));
                assert_eq!(store.len(), 2);
            } else {
                assert_eq!(parent, Some(TicketId::new("TGT-other-node")));
                assert_eq!(store.len(), 1);
            }
        }
    }
}
