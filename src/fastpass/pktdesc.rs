//! Packet descriptors and their pool (C2).

use slab::Slab;

/// One destination/timeslot-count pair inside an allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocReq {
    pub dst_key: u16,
    pub tslot_count: u16,
}

/// State attached to every transmitted control packet, from `commit` until
/// it is ACKed, NACKed, or the session is torn down.
#[derive(Debug, Clone)]
pub struct PacketDescriptor {
    pub seqno: u64,
    pub sent_timestamp_ns: u64,
    /// True while the session was not yet in sync at commit time; controls
    /// whether a RESET payload was embedded in this packet.
    pub send_reset: bool,
    /// Epoch timestamp embedded in the RESET payload, if `send_reset`.
    pub reset_timestamp_ns: u64,
    pub areq: Vec<AllocReq>,
}

impl PacketDescriptor {
    pub fn new(areq: Vec<AllocReq>) -> Self {
        PacketDescriptor {
            seqno: 0,
            sent_timestamp_ns: 0,
            send_reset: false,
            reset_timestamp_ns: 0,
            areq,
        }
    }
}

/// Fixed-capacity-by-convention allocator for outbound descriptors.
///
/// Backed by `slab::Slab` rather than a free-standing `Vec`: the pool
/// hands out stable keys and avoids reallocating once it has grown to its
/// working size, matching the "fixed per-process object pool" from the
/// source's resource policy. Capacity is not hard-enforced here (the
/// session's outstanding window is what actually bounds in-flight
/// descriptors); the pool only avoids needless churn.
#[derive(Debug, Default)]
pub struct DescriptorPool {
    slab: Slab<PacketDescriptor>,
}

impl DescriptorPool {
    pub fn with_capacity(cap: usize) -> Self {
        DescriptorPool {
            slab: Slab::with_capacity(cap),
        }
    }

    pub fn alloc(&mut self, desc: PacketDescriptor) -> usize {
        self.slab.insert(desc)
    }

    pub fn take(&mut self, key: usize) -> PacketDescriptor {
        self.slab.remove(key)
    }

    pub fn get(&self, key: usize) -> Option<&PacketDescriptor> {
        self.slab.get(key)
    }

    pub fn get_mut(&mut self, key: usize) -> Option<&mut PacketDescriptor> {
        self.slab.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.slab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_take_roundtrip() {
        let mut pool = DescriptorPool::with_capacity(4);
        let key = pool.alloc(PacketDescriptor::new(vec![]));
        assert_eq!(pool.len(), 1);
        let desc = pool.take(key);
        assert_eq!(desc.seqno, 0);
        assert!(pool.is_empty());
    }
}
