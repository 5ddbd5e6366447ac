//! Engine transactions
//!
//! A transaction reads a private copy of the catalog, records its writes and
//! queues remote commands. Nothing becomes visible to other transactions or
//! nodes until [`Transaction::commit`].

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::Result;
use crate::lock::{Acquired, LockMode, LockTag, TxnId};
use crate::metadata::{
    Catalog, CatalogWrite, ColocationId, GroupId, Node, NodeId, PlacementId, Sequences, ShardId,
};
use crate::remote::WorkerCommand;

/// A command waiting for commit
#[derive(Debug, Clone)]
pub struct OutboundCommand {
    pub node: Node,
    pub command: WorkerCommand,
}

pub struct Transaction<'e> {
    id: TxnId,
    engine: &'e Engine,
    catalog: Catalog,
    writes: Vec<CatalogWrite>,
    outbox: Vec<OutboundCommand>,
    lock_trace: Vec<(LockTag, LockMode)>,
    finished: bool,
}

impl<'e> Transaction<'e> {
    pub(crate) fn new(engine: &'e Engine, id: TxnId, catalog: Catalog) -> Self {
        debug!("Transaction {} started at catalog version {}", id, catalog.version);
        Self {
            id,
            engine,
            catalog,
            writes: Vec::new(),
            outbox: Vec::new(),
            lock_trace: Vec::new(),
            finished: false,
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn config(&self) -> &'e EngineConfig {
        self.engine.config()
    }

    /// Snapshot plus this transaction's own writes
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Acquire a lock held until commit or abort.
    ///
    /// A newly granted lock refreshes the snapshot so reads made under the
    /// lock see everything committed before it was granted.
    pub fn lock(&mut self, tag: LockTag, mode: LockMode) -> Result<()> {
        let acquired = self.engine.locks().acquire(self.id, tag, mode)?;
        self.lock_trace.push((tag, mode));
        if acquired == Acquired::Granted {
            self.refresh();
        }
        Ok(())
    }

    /// Locks requested by this transaction, in request order
    pub fn lock_trace(&self) -> &[(LockTag, LockMode)] {
        &self.lock_trace
    }

    fn refresh(&mut self) {
        let mut catalog = self.engine.committed_catalog();
        for write in &self.writes {
            catalog.apply(write);
        }
        self.catalog = catalog;
    }

    /// Record a catalog mutation
    pub fn write(&mut self, write: CatalogWrite) {
        self.catalog.apply(&write);
        self.writes.push(write);
    }

    pub fn writes(&self) -> &[CatalogWrite] {
        &self.writes
    }

    /// Queue a command for `node`, delivered at commit in issue order
    pub fn send(&mut self, node: &Node, command: WorkerCommand) {
        self.outbox.push(OutboundCommand {
            node: node.clone(),
            command,
        });
    }

    pub fn outbox(&self) -> &[OutboundCommand] {
        &self.outbox
    }

    // Sequences are not transactional: values handed out to an aborted
    // transaction are never reused.

    fn next<T>(&mut self, allocate: impl FnOnce(&mut Sequences) -> T) -> T {
        let value = self.engine.allocate(allocate);
        self.catalog.sequences = self.engine.committed_sequences();
        value
    }

    pub fn next_node_id(&mut self) -> NodeId {
        self.next(Sequences::node_id)
    }

    pub fn next_group_id(&mut self) -> GroupId {
        self.next(Sequences::group_id)
    }

    pub fn next_shard_id(&mut self) -> ShardId {
        self.next(Sequences::shard_id)
    }

    pub fn next_placement_id(&mut self) -> PlacementId {
        self.next(Sequences::placement_id)
    }

    pub fn next_colocation_id(&mut self) -> ColocationId {
        self.next(Sequences::colocation_id)
    }

    /// Deliver queued commands, then install the write set
    pub fn commit(mut self) -> Result<()> {
        let outbox = std::mem::take(&mut self.outbox);
        for (index, outbound) in outbox.iter().enumerate() {
            if let Err(e) = self
                .engine
                .executor()
                .execute(&outbound.node, &outbound.command)
            {
                warn!(
                    "Transaction {} aborted: command {} of {} failed on {}: {}",
                    self.id,
                    index + 1,
                    outbox.len(),
                    outbound.node.address(),
                    e
                );
                self.finish();
                return Err(e.into());
            }
        }

        let writes = std::mem::take(&mut self.writes);
        let version = self.engine.install(&writes);
        info!(
            "Transaction {} committed: {} writes, {} commands, catalog version {}",
            self.id,
            writes.len(),
            outbox.len(),
            version
        );
        self.finish();
        Ok(())
    }

    /// Discard writes and queued commands
    pub fn abort(mut self) {
        debug!(
            "Transaction {} aborted: {} writes discarded",
            self.id,
            self.writes.len()
        );
        self.finish();
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.writes.clear();
            self.outbox.clear();
            self.engine.locks().release_all(self.id);
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}
