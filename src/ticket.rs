// Healing ticket pool (spec §3, §4.I). A fixed-size pool of slots, each
// behind its own mutex; `allocate` walks with `try_lock` so a busy slot
// never blocks the caller.

use crate::denomination::{Denomination, Sn};
use crate::error::{NodeError, Result};
use parking_lot::Mutex;
use rand::RngCore;
use std::time::{Duration, Instant};

pub const TICKET_POOL_SIZE: usize = 1024;
pub const MAX_COINS_PER_TICKET: usize = 256;
pub const TOTAL_PEERS: usize = crate::healing::TOTAL_PEERS;

#[derive(Debug, Clone)]
pub struct Ticket {
    pub ticket_id: u32,
    pub created_at: Instant,
    pub coins: Vec<(Denomination, Sn)>,
    pub claims: [bool; TOTAL_PEERS],
}

impl Ticket {
    pub fn is_live(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() < ttl
    }
}

pub struct TicketPool {
    slots: Vec<Mutex<Option<Ticket>>>,
    ttl: Duration,
}

impl TicketPool {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: (0..TICKET_POOL_SIZE).map(|_| Mutex::new(None)).collect(),
            ttl,
        }
    }

    /// Allocate a new ticket for `coins`. Walks slots with `try_lock`;
    /// the first acquired empty-or-expired slot is reinitialized.
    pub fn allocate(&self, coins: Vec<(Denomination, Sn)>) -> Result<u32> {
        let ticket_id = rand::rng().next_u32();
        for slot in &self.slots {
            if let Some(mut guard) = slot.try_lock() {
                let is_free = match &*guard {
                    None => true,
                    Some(t) => !t.is_live(self.ttl),
                };
                if is_free {
                    *guard = Some(Ticket {
                        ticket_id,
                        created_at: Instant::now(),
                        coins,
                        claims: [false; TOTAL_PEERS],
                    });
                    return Ok(ticket_id);
                }
            }
        }
        Err(NodeError::TicketExhausted)
    }

    /// Mark peer `peer_id`'s claim bit and return the ticket's coin list.
    /// Fails with `TicketAlreadyClaimed` on a double-claim.
    pub fn validate_and_claim(
        &self,
        ticket_id: u32,
        peer_id: u8,
    ) -> Result<Vec<(Denomination, Sn)>> {
        if peer_id as usize >= TOTAL_PEERS {
            return Err(NodeError::WrongRaida);
        }
        for slot in &self.slots {
            let mut guard = slot.lock();
            let live = match &*guard {
                Some(t) if t.ticket_id == ticket_id && t.is_live(self.ttl) => true,
                _ => false,
            };
            if !live {
                continue;
            }
            let ticket = guard.as_mut().unwrap();
            if ticket.claims[peer_id as usize] {
                return Err(NodeError::TicketAlreadyClaimed(peer_id));
            }
            ticket.claims[peer_id as usize] = true;
            return Ok(ticket.coins.clone());
        }
        Err(NodeError::TicketNotFound(ticket_id))
    }

    /// Opportunistic sweep clearing expired tickets; safe to call from the
    /// flusher's periodic loop.
    pub fn sweep_expired(&self) {
        for slot in &self.slots {
            if let Some(mut guard) = slot.try_lock() {
                if let Some(t) = &*guard {
                    if !t.is_live(self.ttl) {
                        *guard = None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn den() -> Denomination {
        Denomination::new(0).unwrap()
    }

    #[test]
    fn allocate_then_validate_claims_once_per_peer() {
        let pool = TicketPool::new(Duration::from_secs(30));
        let id = pool.allocate(vec![(den(), Sn(1))]).unwrap();
        let coins = pool.validate_and_claim(id, 3).unwrap();
        assert_eq!(coins, vec![(den(), Sn(1))]);
        assert!(matches!(
            pool.validate_and_claim(id, 3),
            Err(NodeError::TicketAlreadyClaimed(3))
        ));
        // a different peer can still claim
        assert!(pool.validate_and_claim(id, 4).is_ok());
    }

    #[test]
    fn unknown_ticket_not_found() {
        let pool = TicketPool::new(Duration::from_secs(30));
        assert!(matches!(
            pool.validate_and_claim(999, 0),
            Err(NodeError::TicketNotFound(999))
        ));
    }

    #[test]
    fn expired_ticket_is_treated_as_absent() {
        let pool = TicketPool::new(Duration::from_millis(1));
        let id = pool.allocate(vec![(den(), Sn(1))]).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(
            pool.validate_and_claim(id, 0),
            Err(NodeError::TicketNotFound(_))
        ));
    }

    #[test]
    fn pool_exhaustion_is_reported() {
        let pool = TicketPool::new(Duration::from_secs(30));
        for _ in 0..TICKET_POOL_SIZE {
            pool.allocate(vec![]).unwrap();
        }
        assert!(matches!(
            pool.allocate(vec![]),
            Err(NodeError::TicketExhausted)
        ));
    }
}
