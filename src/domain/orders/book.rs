//! Order map with per-order refetch sequencing.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::{OrderRecord, ViewFilter};
use crate::domain::foundation::OrderId;
use crate::domain::realtime::Row;

/// Identifies one issued scoped refetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefetchTicket {
    pub order_id: OrderId,
    pub seq: u64,
}

/// What applying a refetch result did to the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchOutcome {
    /// The fetched row replaced the snapshot.
    Applied,
    /// The order is gone or no longer matches the view.
    Removed,
    /// A newer refetch was issued (or the order was deleted) meanwhile.
    Discarded,
}

/// Orders keyed by id, plus the sequence of the one outstanding refetch per order.
///
/// An order has an entry in `latest_seq` only while a ticket for it is
/// outstanding; a missing entry means any ticket presented for it is stale.
/// Every mutation bumps `revision` so observers can tell when to re-render.
#[derive(Debug, Default)]
pub struct OrderBook {
    orders: HashMap<OrderId, OrderRecord>,
    latest_seq: HashMap<OrderId, u64>,
    next_seq: u64,
    revision: u64,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &OrderId) -> Option<&OrderRecord> {
        self.orders.get(id)
    }

    pub fn contains(&self, id: &OrderId) -> bool {
        self.orders.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn upsert(&mut self, record: OrderRecord) {
        self.orders.insert(record.id().clone(), record);
        self.revision += 1;
    }

    pub fn remove(&mut self, id: &OrderId) -> Option<OrderRecord> {
        let removed = self.orders.remove(id);
        if removed.is_some() {
            self.revision += 1;
        }
        removed
    }

    /// Copies `fields` from `after` into the stored snapshot.
    pub fn patch(&mut self, id: &OrderId, after: &Row, fields: &[String]) -> bool {
        match self.orders.get_mut(id) {
            Some(record) => {
                record.patch(after, fields);
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    pub fn mark_stale(&mut self, id: &OrderId) -> bool {
        match self.orders.get_mut(id) {
            Some(record) if !record.is_stale() => {
                record.mark_stale();
                self.revision += 1;
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Issues a new refetch ticket, superseding every earlier one for the order.
    pub fn issue(&mut self, order_id: &OrderId) -> RefetchTicket {
        self.next_seq += 1;
        self.latest_seq.insert(order_id.clone(), self.next_seq);
        RefetchTicket {
            order_id: order_id.clone(),
            seq: self.next_seq,
        }
    }

    /// Supersedes outstanding tickets for the order without issuing a new one.
    pub fn invalidate(&mut self, order_id: &OrderId) {
        self.latest_seq.remove(order_id);
    }

    /// Retires a ticket that will never be applied, e.g. after a failed fetch.
    pub fn release(&mut self, ticket: &RefetchTicket) {
        if self.is_current(ticket) {
            self.latest_seq.remove(&ticket.order_id);
        }
    }

    pub fn is_current(&self, ticket: &RefetchTicket) -> bool {
        self.latest_seq.get(&ticket.order_id) == Some(&ticket.seq)
    }

    /// Number of orders with a refetch ticket still outstanding.
    pub fn outstanding_tickets(&self) -> usize {
        self.latest_seq.len()
    }

    /// Applies a refetch result if its ticket is still the latest one.
    pub fn apply(
        &mut self,
        ticket: &RefetchTicket,
        fetched: Option<OrderRecord>,
        view: &ViewFilter,
        branch_column: &str,
    ) -> RefetchOutcome {
        if !self.is_current(ticket) {
            return RefetchOutcome::Discarded;
        }
        self.latest_seq.remove(&ticket.order_id);

        match fetched {
            Some(record) if record.id() != &ticket.order_id => RefetchOutcome::Discarded,
            Some(record) if view.matches(&record, branch_column) => {
                self.upsert(record);
                RefetchOutcome::Applied
            }
            _ => {
                self.remove(&ticket.order_id);
                RefetchOutcome::Removed
            }
        }
    }

    /// Replaces the whole book. Outstanding refetch tickets are superseded.
    pub fn replace_all(&mut self, records: impl IntoIterator<Item = OrderRecord>) {
        self.latest_seq.clear();
        self.orders = records
            .into_iter()
            .map(|record| (record.id().clone(), record))
            .collect();
        self.revision += 1;
    }

    /// Drops orders for which `keep` returns false; returns how many went.
    pub fn retain(&mut self, mut keep: impl FnMut(&OrderRecord) -> bool) -> usize {
        let before = self.orders.len();
        self.orders.retain(|_, record| keep(record));
        let removed = before - self.orders.len();
        if removed > 0 {
            self.revision += 1;
        }
        removed
    }

    /// Orders newest first; undated orders last, ties broken by id.
    pub fn sorted(&self) -> Vec<OrderRecord> {
        let mut records: Vec<OrderRecord> = self.orders.values().cloned().collect();
        records.sort_by(|a, b| match (a.created_at(), b.created_at()) {
            (Some(x), Some(y)) => y.cmp(&x).then_with(|| b.id().as_str().cmp(a.id().as_str())),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => b.id().as_str().cmp(a.id().as_str()),
        });
        records
    }
}
