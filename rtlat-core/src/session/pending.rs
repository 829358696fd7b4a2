//! In-flight request tracking
//!
//! Two maps, one per leg, keyed by correlation id. An id lives in at most one
//! of them at a time: the order entry is taken when BOOKED arrives, before the
//! cancel for the same id is inserted.

use crate::core::{CorrelationId, Leg, PendingError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Taken right after the request was written to the transport
    pub sent_at: Instant,
    pub instrument: Arc<str>,
}

#[derive(Debug, Default)]
pub struct PendingRequests {
    orders: HashMap<CorrelationId, PendingRequest>,
    cancels: HashMap<CorrelationId, PendingRequest>,
}

impl PendingRequests {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            orders: HashMap::with_capacity(capacity),
            cancels: HashMap::with_capacity(capacity),
        }
    }

    fn map(&self, leg: Leg) -> &HashMap<CorrelationId, PendingRequest> {
        match leg {
            Leg::Order => &self.orders,
            Leg::Cancel => &self.cancels,
        }
    }

    fn map_mut(&mut self, leg: Leg) -> &mut HashMap<CorrelationId, PendingRequest> {
        match leg {
            Leg::Order => &mut self.orders,
            Leg::Cancel => &mut self.cancels,
        }
    }

    /// Start tracking `id` on `leg`
    ///
    /// Fails without modifying anything if `id` is pending on either leg.
    pub fn insert(
        &mut self,
        leg: Leg,
        id: CorrelationId,
        request: PendingRequest,
    ) -> Result<(), PendingError> {
        if let Some(existing) = self.leg_of(&id) {
            return Err(PendingError::AlreadyPending { id, existing });
        }
        self.map_mut(leg).insert(id, request);
        Ok(())
    }

    /// Stop tracking `id` on `leg`, returning its entry if it was pending there
    pub fn take(&mut self, leg: Leg, id: &CorrelationId) -> Option<PendingRequest> {
        self.map_mut(leg).remove(id)
    }

    /// Leg `id` is currently pending on
    pub fn leg_of(&self, id: &CorrelationId) -> Option<Leg> {
        if self.orders.contains_key(id) {
            Some(Leg::Order)
        } else if self.cancels.contains_key(id) {
            Some(Leg::Cancel)
        } else {
            None
        }
    }

    pub fn contains(&self, leg: Leg, id: &CorrelationId) -> bool {
        self.map(leg).contains_key(id)
    }

    pub fn len(&self, leg: Leg) -> usize {
        self.map(leg).len()
    }

    pub fn total(&self) -> usize {
        self.orders.len() + self.cancels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
