//! Persistent cell storage backed by sled (pure-Rust, no C dependencies).
//!
//! Named trees:
//!   ledger            — cell id utf8        → bincode(CellLedgerState)
//!   events            — seq u64 be          → bincode(Event)
//!   event_ids         — EventId bytes       → [] (dedup membership set)
//!   transactions      — TxId bytes          → bincode(SpotTransaction)
//!   tx_queue          — seq u64 be          → bincode(QueuedTransaction)
//!   commitments       — CommitmentId bytes  → bincode(Commitment)
//!   identities        — member id utf8      → bincode(Identity)
//!   identity_keys     — BLAKE3(pubkey)      → member id utf8
//!   proposals         — ProposalId bytes    → bincode(Proposal)
//!   disputes          — DisputeId bytes     → bincode(Dispute)
//!   council           — member id utf8      → bincode(CouncilMember)
//!   federation_state  — cell id utf8        → bincode(FederationState)
//!   federation_links  — peer cell id utf8   → bincode(FederationLink)
//!   federation_txs    — FederationTxId      → bincode(FederationTransaction)
//!   emergency_state   — cell id utf8        → bincode(EmergencyState)
//!   emergency_history — seq u64 be          → bincode(StateTransition)
//!   templates         — TemplateId bytes    → bincode(TaskTemplate)
//!   slots             — SlotId bytes        → bincode(TaskSlot)
//!   supplies          — member id utf8      → bincode(MemberSupply)
//!   meta              — utf8 key            → raw bytes (counters)
//!
//! Appends to `events` are at-least-once durable and deduplicated by event
//! id, so a retried append after a crash cannot double-record.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use credcell_core::cell::CellLedgerState;
use credcell_core::commitment::{Commitment, CommitmentStatus};
use credcell_core::emergency::{EmergencyState, StateTransition};
use credcell_core::error::CellError;
use credcell_core::events::Event;
use credcell_core::federation::{FederationLink, FederationState, FederationTransaction};
use credcell_core::governance::{CouncilMember, Dispute, DisputeStatus, Proposal};
use credcell_core::identity::Identity;
use credcell_core::scheduler::{MemberSupply, TaskSlot, TaskTemplate};
use credcell_core::transaction::{QueuedTransaction, SpotTransaction};
use credcell_core::types::{
    CellId, CommitmentId, DisputeId, FederationTxId, MemberId, ProposalId, PublicKey, SlotId,
    TemplateId, TimestampMs, TxId,
};

fn storage_err(e: sled::Error) -> CellError {
    CellError::Storage(e.to_string())
}

fn ser_err(e: bincode::Error) -> CellError {
    CellError::Serialization(e.to_string())
}

pub struct Store {
    _db: sled::Db,
    ledger: sled::Tree,
    events: sled::Tree,
    event_ids: sled::Tree,
    transactions: sled::Tree,
    tx_queue: sled::Tree,
    commitments: sled::Tree,
    identities: sled::Tree,
    identity_keys: sled::Tree,
    proposals: sled::Tree,
    disputes: sled::Tree,
    council: sled::Tree,
    federation_state: sled::Tree,
    federation_links: sled::Tree,
    federation_txs: sled::Tree,
    emergency_state: sled::Tree,
    emergency_history: sled::Tree,
    templates: sled::Tree,
    slots: sled::Tree,
    supplies: sled::Tree,
    meta: sled::Tree,
}

impl Store {
    /// Open or create the cell database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CellError> {
        let db = sled::open(path).map_err(storage_err)?;
        let tree = |name: &str| db.open_tree(name).map_err(storage_err);
        Ok(Self {
            ledger: tree("ledger")?,
            events: tree("events")?,
            event_ids: tree("event_ids")?,
            transactions: tree("transactions")?,
            tx_queue: tree("tx_queue")?,
            commitments: tree("commitments")?,
            identities: tree("identities")?,
            identity_keys: tree("identity_keys")?,
            proposals: tree("proposals")?,
            disputes: tree("disputes")?,
            council: tree("council")?,
            federation_state: tree("federation_state")?,
            federation_links: tree("federation_links")?,
            federation_txs: tree("federation_txs")?,
            emergency_state: tree("emergency_state")?,
            emergency_history: tree("emergency_history")?,
            templates: tree("templates")?,
            slots: tree("slots")?,
            supplies: tree("supplies")?,
            meta: tree("meta")?,
            _db: db,
        })
    }

    // ── Generic helpers ──────────────────────────────────────────────────────

    fn get_record<T: DeserializeOwned>(
        tree: &sled::Tree,
        key: &[u8],
    ) -> Result<Option<T>, CellError> {
        match tree.get(key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    fn put_record<T: Serialize>(tree: &sled::Tree, key: &[u8], value: &T) -> Result<(), CellError> {
        let bytes = bincode::serialize(value).map_err(ser_err)?;
        tree.insert(key, bytes).map_err(storage_err)?;
        Ok(())
    }

    fn iter_records<T: DeserializeOwned>(tree: &sled::Tree) -> Result<Vec<T>, CellError> {
        let mut out = Vec::new();
        for item in tree.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    fn next_counter(&self, key: &str) -> Result<u64, CellError> {
        let current = self
            .meta
            .get(key.as_bytes())
            .map_err(storage_err)?
            .map(|b| {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&b[..8]);
                u64::from_be_bytes(arr)
            })
            .unwrap_or(0);
        self.meta
            .insert(key.as_bytes(), &(current + 1).to_be_bytes())
            .map_err(storage_err)?;
        Ok(current)
    }

    /// Allocate a monotonically increasing value for salting derived record
    /// ids (commitments, proposals, slots, …).
    pub fn next_record_seq(&self) -> Result<u64, CellError> {
        self.next_counter("next_record_seq")
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), CellError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }

    // ── Ledger state ─────────────────────────────────────────────────────────

    pub fn get_ledger(&self, cell_id: &CellId) -> Result<Option<CellLedgerState>, CellError> {
        Self::get_record(&self.ledger, cell_id.as_str().as_bytes())
    }

    pub fn save_ledger(&self, state: &CellLedgerState) -> Result<(), CellError> {
        Self::put_record(&self.ledger, state.cell_id.as_str().as_bytes(), state)
    }

    // ── Events ───────────────────────────────────────────────────────────────

    /// Allocate the next event sequence number.
    pub fn next_event_seq(&self) -> Result<u64, CellError> {
        self.next_counter("next_event_seq")
    }

    /// Append an event. Re-appending an already-recorded event id is a no-op.
    pub fn append_event(&self, event: &Event) -> Result<(), CellError> {
        if self
            .event_ids
            .contains_key(event.event_id.as_bytes())
            .map_err(storage_err)?
        {
            return Ok(());
        }
        Self::put_record(&self.events, &event.seq.to_be_bytes(), event)?;
        self.event_ids
            .insert(event.event_id.as_bytes(), b"".as_ref())
            .map_err(storage_err)?;
        Ok(())
    }

    /// All events with `timestamp ≥ since`, in sequence order.
    pub fn events_since(&self, since: TimestampMs) -> Result<Vec<Event>, CellError> {
        let all: Vec<Event> = Self::iter_records(&self.events)?;
        Ok(all.into_iter().filter(|e| e.timestamp >= since).collect())
    }

    pub fn all_events(&self) -> Result<Vec<Event>, CellError> {
        Self::iter_records(&self.events)
    }

    // ── Transactions ─────────────────────────────────────────────────────────

    pub fn get_transaction(&self, id: &TxId) -> Result<Option<SpotTransaction>, CellError> {
        Self::get_record(&self.transactions, id.as_bytes())
    }

    pub fn put_transaction(&self, tx: &SpotTransaction) -> Result<(), CellError> {
        Self::put_record(&self.transactions, tx.tx_id.as_bytes(), tx)
    }

    /// Transactions involving `member` as payer or payee, newest first,
    /// paginated by (offset, limit).
    pub fn transactions_for_member(
        &self,
        member: &MemberId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<SpotTransaction>, CellError> {
        let mut txs: Vec<SpotTransaction> = Self::iter_records(&self.transactions)?
            .into_iter()
            .filter(|t: &SpotTransaction| t.payer == *member || t.payee == *member)
            .collect();
        txs.sort_by_key(|t| std::cmp::Reverse((t.created_at, t.tx_id)));
        Ok(txs.into_iter().skip(offset).take(limit).collect())
    }

    // ── Offline queue ────────────────────────────────────────────────────────

    pub fn queue_push(&self, item: &QueuedTransaction) -> Result<(), CellError> {
        let seq = self.next_counter("next_queue_seq")?;
        Self::put_record(&self.tx_queue, &seq.to_be_bytes(), item)
    }

    /// Remove and return the oldest queued transaction, if any.
    pub fn queue_pop_front(&self) -> Result<Option<QueuedTransaction>, CellError> {
        match self.tx_queue.pop_min().map_err(storage_err)? {
            Some((_, bytes)) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn queue_len(&self) -> usize {
        self.tx_queue.len()
    }

    // ── Commitments ──────────────────────────────────────────────────────────

    pub fn get_commitment(&self, id: &CommitmentId) -> Result<Option<Commitment>, CellError> {
        Self::get_record(&self.commitments, id.as_bytes())
    }

    pub fn put_commitment(&self, c: &Commitment) -> Result<(), CellError> {
        Self::put_record(&self.commitments, c.id.as_bytes(), c)
    }

    pub fn delete_commitment(&self, id: &CommitmentId) -> Result<(), CellError> {
        self.commitments.remove(id.as_bytes()).map_err(storage_err)?;
        Ok(())
    }

    pub fn all_commitments(&self) -> Result<Vec<Commitment>, CellError> {
        Self::iter_records(&self.commitments)
    }

    pub fn commitments_for_member(&self, member: &MemberId) -> Result<Vec<Commitment>, CellError> {
        Ok(self
            .all_commitments()?
            .into_iter()
            .filter(|c| c.is_party(member))
            .collect())
    }

    pub fn commitments_by_status(
        &self,
        status: CommitmentStatus,
    ) -> Result<Vec<Commitment>, CellError> {
        Ok(self
            .all_commitments()?
            .into_iter()
            .filter(|c| c.status == status)
            .collect())
    }

    // ── Identities ───────────────────────────────────────────────────────────

    pub fn get_identity(&self, id: &MemberId) -> Result<Option<Identity>, CellError> {
        Self::get_record(&self.identities, id.as_str().as_bytes())
    }

    pub fn put_identity(&self, identity: &Identity) -> Result<(), CellError> {
        Self::put_record(
            &self.identities,
            identity.member_id.as_str().as_bytes(),
            identity,
        )?;
        let key_hash = blake3::hash(&identity.public_key.0);
        self.identity_keys
            .insert(key_hash.as_bytes(), identity.member_id.as_str().as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn identity_by_public_key(&self, key: &PublicKey) -> Result<Option<Identity>, CellError> {
        let key_hash = blake3::hash(&key.0);
        match self
            .identity_keys
            .get(key_hash.as_bytes())
            .map_err(storage_err)?
        {
            Some(id_bytes) => {
                let id = MemberId::new(String::from_utf8_lossy(&id_bytes).into_owned());
                self.get_identity(&id)
            }
            None => Ok(None),
        }
    }

    pub fn identities_for_cell(&self, cell_id: &CellId) -> Result<Vec<Identity>, CellError> {
        Ok(Self::iter_records::<Identity>(&self.identities)?
            .into_iter()
            .filter(|i| i.cell_id == *cell_id)
            .collect())
    }

    // ── Governance ───────────────────────────────────────────────────────────

    pub fn get_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, CellError> {
        Self::get_record(&self.proposals, id.as_bytes())
    }

    pub fn put_proposal(&self, p: &Proposal) -> Result<(), CellError> {
        Self::put_record(&self.proposals, p.id.as_bytes(), p)
    }

    pub fn all_proposals(&self) -> Result<Vec<Proposal>, CellError> {
        Self::iter_records(&self.proposals)
    }

    pub fn get_dispute(&self, id: &DisputeId) -> Result<Option<Dispute>, CellError> {
        Self::get_record(&self.disputes, id.as_bytes())
    }

    pub fn put_dispute(&self, d: &Dispute) -> Result<(), CellError> {
        Self::put_record(&self.disputes, d.id.as_bytes(), d)
    }

    pub fn all_disputes(&self) -> Result<Vec<Dispute>, CellError> {
        Self::iter_records(&self.disputes)
    }

    /// Disputes not yet resolved — the numerator of the dispute-rate indicator.
    pub fn count_open_disputes(&self) -> Result<usize, CellError> {
        Ok(self
            .all_disputes()?
            .iter()
            .filter(|d| d.status != DisputeStatus::Resolved)
            .count())
    }

    pub fn get_council_member(&self, id: &MemberId) -> Result<Option<CouncilMember>, CellError> {
        Self::get_record(&self.council, id.as_str().as_bytes())
    }

    pub fn put_council_member(&self, m: &CouncilMember) -> Result<(), CellError> {
        Self::put_record(&self.council, m.member_id.as_str().as_bytes(), m)
    }

    pub fn remove_council_member(&self, id: &MemberId) -> Result<(), CellError> {
        self.council
            .remove(id.as_str().as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn all_council_members(&self) -> Result<Vec<CouncilMember>, CellError> {
        Self::iter_records(&self.council)
    }

    // ── Federation ───────────────────────────────────────────────────────────

    pub fn get_federation_state(
        &self,
        cell_id: &CellId,
    ) -> Result<Option<FederationState>, CellError> {
        Self::get_record(&self.federation_state, cell_id.as_str().as_bytes())
    }

    pub fn save_federation_state(&self, state: &FederationState) -> Result<(), CellError> {
        Self::put_record(
            &self.federation_state,
            state.cell_id.as_str().as_bytes(),
            state,
        )
    }

    pub fn get_link(&self, peer: &CellId) -> Result<Option<FederationLink>, CellError> {
        Self::get_record(&self.federation_links, peer.as_str().as_bytes())
    }

    pub fn put_link(&self, link: &FederationLink) -> Result<(), CellError> {
        Self::put_record(
            &self.federation_links,
            link.peer_cell.as_str().as_bytes(),
            link,
        )
    }

    pub fn remove_link(&self, peer: &CellId) -> Result<(), CellError> {
        self.federation_links
            .remove(peer.as_str().as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn all_links(&self) -> Result<Vec<FederationLink>, CellError> {
        Self::iter_records(&self.federation_links)
    }

    pub fn get_federation_tx(
        &self,
        id: &FederationTxId,
    ) -> Result<Option<FederationTransaction>, CellError> {
        Self::get_record(&self.federation_txs, id.as_bytes())
    }

    pub fn put_federation_tx(&self, tx: &FederationTransaction) -> Result<(), CellError> {
        Self::put_record(&self.federation_txs, tx.id.as_bytes(), tx)
    }

    pub fn all_federation_txs(&self) -> Result<Vec<FederationTransaction>, CellError> {
        Self::iter_records(&self.federation_txs)
    }

    // ── Emergency ────────────────────────────────────────────────────────────

    pub fn get_emergency_state(
        &self,
        cell_id: &CellId,
    ) -> Result<Option<EmergencyState>, CellError> {
        Self::get_record(&self.emergency_state, cell_id.as_str().as_bytes())
    }

    pub fn save_emergency_state(&self, state: &EmergencyState) -> Result<(), CellError> {
        Self::put_record(
            &self.emergency_state,
            state.cell_id.as_str().as_bytes(),
            state,
        )
    }

    pub fn append_state_transition(&self, entry: &StateTransition) -> Result<(), CellError> {
        let seq = self.next_counter("next_history_seq")?;
        Self::put_record(&self.emergency_history, &seq.to_be_bytes(), entry)
    }

    pub fn state_history(&self) -> Result<Vec<StateTransition>, CellError> {
        Self::iter_records(&self.emergency_history)
    }

    // ── Scheduler ────────────────────────────────────────────────────────────

    pub fn get_template(&self, id: &TemplateId) -> Result<Option<TaskTemplate>, CellError> {
        Self::get_record(&self.templates, id.as_bytes())
    }

    pub fn put_template(&self, t: &TaskTemplate) -> Result<(), CellError> {
        Self::put_record(&self.templates, t.template_id.as_bytes(), t)
    }

    pub fn all_templates(&self) -> Result<Vec<TaskTemplate>, CellError> {
        Self::iter_records(&self.templates)
    }

    pub fn get_slot(&self, id: &SlotId) -> Result<Option<TaskSlot>, CellError> {
        Self::get_record(&self.slots, id.as_bytes())
    }

    pub fn put_slot(&self, slot: &TaskSlot) -> Result<(), CellError> {
        Self::put_record(&self.slots, slot.slot_id.as_bytes(), slot)
    }

    pub fn all_slots(&self) -> Result<Vec<TaskSlot>, CellError> {
        Self::iter_records(&self.slots)
    }

    pub fn get_supply(&self, member: &MemberId) -> Result<Option<MemberSupply>, CellError> {
        Self::get_record(&self.supplies, member.as_str().as_bytes())
    }

    pub fn put_supply(&self, supply: &MemberSupply) -> Result<(), CellError> {
        Self::put_record(&self.supplies, supply.member_id.as_str().as_bytes(), supply)
    }

    pub fn all_supplies(&self) -> Result<Vec<MemberSupply>, CellError> {
        Self::iter_records(&self.supplies)
    }
}
