use crate::bsc::BscId;
use crate::policy::MgcpVerb;
use crate::EndpointId;

/// An in-flight Call Agent transaction waiting for its BSC reply. The slot
/// binds the original transaction id and verb to the BSC that owes the
/// answer; the whole record exists iff a transaction is pending.
pub struct PendingTransaction {
    pub id: String,
    pub state: MgcpVerb,
    pub bsc: BscId,
}

/// Per network-side-endpoint pending slots, slot 0 reserved.
pub struct TransactionTable {
    slots: Vec<Option<PendingTransaction>>,
}

impl TransactionTable {
    pub fn new(number_endpoints: usize) -> TransactionTable {
        TransactionTable {
            slots: (0..number_endpoints).map(|_| None).collect(),
        }
    }

    #[inline]
    pub fn get(&self, endpoint: EndpointId) -> Option<&PendingTransaction> {
        self.slots.get(endpoint).and_then(|slot| slot.as_ref())
    }

    /// Records a pending transaction, replacing whatever was there.
    pub fn record(&mut self, endpoint: EndpointId, id: &str, state: MgcpVerb, bsc: BscId) {
        self.slots[endpoint] = Some(PendingTransaction {
            id: id.to_string(),
            state,
            bsc,
        });
    }

    /// Clears the slot, handing back the superseded transaction if any.
    pub fn free(&mut self, endpoint: EndpointId) -> Option<PendingTransaction> {
        self.slots.get_mut(endpoint).and_then(|slot| slot.take())
    }

    /// First endpoint waiting on `bsc` for the given transaction id.
    pub fn find(&self, bsc: BscId, transaction_id: &str) -> Option<EndpointId> {
        (1..self.slots.len()).find(|&endpoint| match &self.slots[endpoint] {
            Some(pending) => pending.bsc == bsc && pending.id == transaction_id,
            None => false,
        })
    }
}
