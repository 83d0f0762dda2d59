//! Minimal two-phase transaction coordinator
//!
//! Stands in for the host transaction manager: one current transaction per
//! thread, participants that join at most once, savepoints, and commit/abort
//! fan-out. Only the call contract the index queue relies on is modelled:
//!
//! - `register()` by a participant, zero or more times per transaction
//! - `prepare()` on every participant in sort-key order; any failure aborts
//!   all of them before anything became durable
//! - then exactly one of `commit()`/`abort()` on every joined participant;
//!   commits run in reverse sort-key order and a participant that finished
//!   is never aborted afterwards
//! - savepoint rollback restores participants that joined before the
//!   savepoint and aborts those that joined after it

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::{QueueError, QueueResult};

/// Something that takes part in a transaction
pub trait TransactionParticipant {
    /// Join the current transaction (idempotent within one transaction)
    fn register(&self);

    /// First commit phase: do everything that may still fail
    fn prepare(&self) -> QueueResult<()> {
        Ok(())
    }

    /// Second commit phase: make the prepared work durable
    fn commit(&self) -> QueueResult<()>;

    fn abort(&self);

    /// Capture enough state to roll back to this point
    fn savepoint(&self) -> QueueResult<Box<dyn RollbackPoint>>;

    /// Participants commit in ascending sort-key order
    fn sort_key(&self) -> String;
}

/// Participant-side half of a savepoint
pub trait RollbackPoint {
    fn rollback(&self) -> QueueResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Committing,
    Committed,
    Aborted,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Active => "active",
            TransactionStatus::Committing => "committing",
            TransactionStatus::Committed => "committed",
            TransactionStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

struct SavepointState {
    id: usize,
    valid: Cell<bool>,
    rollbacks: Vec<(Rc<dyn TransactionParticipant>, Box<dyn RollbackPoint>)>,
    /// Participants that joined after this savepoint was taken
    late_joiners: RefCell<Vec<Rc<dyn TransactionParticipant>>>,
}

/// One unit of work
pub struct Transaction {
    id: u64,
    status: Cell<TransactionStatus>,
    participants: RefCell<Vec<Rc<dyn TransactionParticipant>>>,
    savepoints: RefCell<Vec<Rc<SavepointState>>>,
    next_savepoint: Cell<usize>,
}

impl Transaction {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            id: NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed),
            status: Cell::new(TransactionStatus::Active),
            participants: RefCell::new(Vec::new()),
            savepoints: RefCell::new(Vec::new()),
            next_savepoint: Cell::new(1),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> TransactionStatus {
        self.status.get()
    }

    pub fn is_active(&self) -> bool {
        self.status.get() == TransactionStatus::Active
    }

    fn ensure_active(&self) -> QueueResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(QueueError::TransactionInactive {
                txn_id: self.id,
                status: self.status.get().to_string(),
            })
        }
    }

    /// Add `participant`; joining twice is a no-op
    pub fn join(&self, participant: Rc<dyn TransactionParticipant>) -> QueueResult<()> {
        self.ensure_active()?;

        if self.is_joined(&participant) {
            return Ok(());
        }

        for savepoint in self.savepoints.borrow().iter() {
            savepoint.late_joiners.borrow_mut().push(Rc::clone(&participant));
        }
        debug!("txn {}: participant '{}' joined", self.id, participant.sort_key());
        self.participants.borrow_mut().push(participant);
        Ok(())
    }

    pub fn is_joined(&self, participant: &Rc<dyn TransactionParticipant>) -> bool {
        self.participants
            .borrow()
            .iter()
            .any(|p| same_participant(p, participant))
    }

    pub fn participant_count(&self) -> usize {
        self.participants.borrow().len()
    }

    fn unjoin(&self, participant: &Rc<dyn TransactionParticipant>) {
        self.participants
            .borrow_mut()
            .retain(|p| !same_participant(p, participant));
    }

    /// Take a savepoint across every joined participant
    pub fn savepoint(self: &Rc<Self>) -> QueueResult<Savepoint> {
        self.ensure_active()?;

        let participants = self.participants.borrow().clone();
        let rollbacks = participants
            .iter()
            .map(|p| -> QueueResult<_> { Ok((Rc::clone(p), p.savepoint()?)) })
            .collect::<QueueResult<Vec<_>>>()?;

        let id = self.next_savepoint.get();
        self.next_savepoint.set(id + 1);

        let state = Rc::new(SavepointState {
            id,
            valid: Cell::new(true),
            rollbacks,
            late_joiners: RefCell::new(Vec::new()),
        });
        self.savepoints.borrow_mut().push(Rc::clone(&state));
        debug!("txn {}: savepoint {} taken", self.id, id);

        Ok(Savepoint {
            txn: Rc::downgrade(self),
            state,
        })
    }

    fn rollback_to(&self, state: &Rc<SavepointState>) -> QueueResult<()> {
        self.ensure_active()?;
        if !state.valid.get() {
            return Err(QueueError::InvalidSavepoint { savepoint_id: state.id });
        }

        // Newer savepoints die with this rollback
        {
            let mut savepoints = self.savepoints.borrow_mut();
            if let Some(pos) = savepoints.iter().position(|s| Rc::ptr_eq(s, state)) {
                for newer in savepoints.drain(pos + 1..) {
                    newer.valid.set(false);
                }
            }
        }

        let late_joiners = std::mem::take(&mut *state.late_joiners.borrow_mut());
        for participant in late_joiners {
            debug!("txn {}: aborting late participant '{}'", self.id, participant.sort_key());
            participant.abort();
            self.unjoin(&participant);
        }

        for (participant, rollback) in &state.rollbacks {
            if let Err(e) = rollback.rollback() {
                if e.is_fatal_for_transaction() {
                    warn!(
                        "txn {}: participant '{}' failed to roll back, aborting: {}",
                        self.id,
                        participant.sort_key(),
                        e
                    );
                    self.abort();
                }
                return Err(e);
            }
        }
        debug!("txn {}: rolled back to savepoint {}", self.id, state.id);
        Ok(())
    }

    /// Two-phase commit.
    ///
    /// Every participant prepares in sort-key order; a failed vote aborts
    /// all of them. Participants then commit in reverse order, so the first
    /// to prepare is the last to become durable. A commit failure aborts
    /// only the participants that have not committed yet.
    pub fn commit(&self) -> QueueResult<()> {
        self.ensure_active()?;
        self.status.set(TransactionStatus::Committing);

        let mut participants = self.participants.borrow().clone();
        participants.sort_by_key(|p| p.sort_key());

        for participant in &participants {
            if let Err(e) = participant.prepare() {
                warn!(
                    "txn {}: participant '{}' voted no, aborting: {}",
                    self.id,
                    participant.sort_key(),
                    e
                );
                for p in &participants {
                    p.abort();
                }
                self.finish(TransactionStatus::Aborted);
                return Err(e);
            }
        }

        for (committed, participant) in participants.iter().rev().enumerate() {
            if let Err(e) = participant.commit() {
                warn!(
                    "txn {}: participant '{}' failed to commit after {} others, aborting the rest: {}",
                    self.id,
                    participant.sort_key(),
                    committed,
                    e
                );
                for p in participants.iter().rev().skip(committed) {
                    p.abort();
                }
                self.finish(TransactionStatus::Aborted);
                return Err(e);
            }
        }

        self.finish(TransactionStatus::Committed);
        debug!("txn {}: committed ({} participants)", self.id, participants.len());
        Ok(())
    }

    /// Abort every participant
    pub fn abort(&self) {
        if !self.is_active() {
            return;
        }
        let participants = self.participants.borrow().clone();
        for participant in &participants {
            participant.abort();
        }
        self.finish(TransactionStatus::Aborted);
        debug!("txn {}: aborted ({} participants)", self.id, participants.len());
    }

    fn finish(&self, status: TransactionStatus) {
        self.status.set(status);
        self.participants.borrow_mut().clear();
        for savepoint in self.savepoints.borrow_mut().drain(..) {
            savepoint.valid.set(false);
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("status", &self.status.get())
            .field("participants", &self.participants.borrow().len())
            .finish()
    }
}

/// Handle on a savepoint of one transaction
pub struct Savepoint {
    txn: Weak<Transaction>,
    state: Rc<SavepointState>,
}

impl fmt::Debug for Savepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Savepoint")
            .field("id", &self.state.id)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl Savepoint {
    pub fn id(&self) -> usize {
        self.state.id
    }

    pub fn is_valid(&self) -> bool {
        self.state.valid.get() && self.txn.upgrade().is_some()
    }

    /// Restore every participant to this savepoint.
    ///
    /// The savepoint stays usable; later savepoints are invalidated.
    pub fn rollback(&self) -> QueueResult<()> {
        let txn = crate::require!(
            self.txn.upgrade(),
            QueueError::InvalidSavepoint { savepoint_id: self.state.id }
        );
        txn.rollback_to(&self.state)
    }
}

fn same_participant(a: &Rc<dyn TransactionParticipant>, b: &Rc<dyn TransactionParticipant>) -> bool {
    std::ptr::eq(
        Rc::as_ptr(a).cast::<()>(),
        Rc::as_ptr(b).cast::<()>(),
    )
}

thread_local! {
    /// Current transaction of this thread
    static CURRENT: RefCell<Option<Rc<Transaction>>> = const { RefCell::new(None) };
}

/// Current transaction, started lazily
pub fn get() -> Rc<Transaction> {
    CURRENT.with(|c| {
        let mut current = c.borrow_mut();
        match current.as_ref() {
            Some(txn) if txn.is_active() => Rc::clone(txn),
            _ => {
                let txn = Transaction::new();
                *current = Some(Rc::clone(&txn));
                txn
            }
        }
    })
}

/// Start a new transaction, aborting any active one
pub fn begin() -> Rc<Transaction> {
    let previous = CURRENT.with(|c| c.borrow_mut().take());
    if let Some(txn) = previous {
        if txn.is_active() {
            warn!("txn {}: implicitly aborted by begin()", txn.id());
            txn.abort();
        }
    }
    get()
}

/// Commit the current transaction
pub fn commit() -> QueueResult<()> {
    let txn = CURRENT.with(|c| c.borrow_mut().take());
    match txn {
        Some(txn) => txn.commit(),
        None => Ok(()),
    }
}

/// Abort the current transaction
pub fn abort() {
    let txn = CURRENT.with(|c| c.borrow_mut().take());
    if let Some(txn) = txn {
        txn.abort();
    }
}

/// Savepoint of the current transaction
pub fn savepoint() -> QueueResult<Savepoint> {
    get().savepoint()
}
