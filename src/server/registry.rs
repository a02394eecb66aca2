//! Streaming registries
//!
//! Per STREAMING_MODEL.md §4:
//! - streaming clients: local sessions with an active streaming transaction,
//!   keyed by client id; the registry holds a non-owning back-reference
//! - streaming appliers: high-priority services hosting remote in-flight
//!   streaming transactions, keyed by (origin node, transaction id)
//! - Registering a duplicate key or removing a missing key is a programming
//!   error
//!
//! Both maps live inside the server mutex; `ServerState` serializes every
//! operation and never calls the provider while iterating them.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::client::ClientState;
use crate::service::HighPriorityService;
use crate::types::{ClientId, NodeId, TransactionId, View};

/// Registry of local streaming clients and remote streaming appliers.
pub(crate) struct StreamingRegistry {
    clients: HashMap<ClientId, Weak<ClientState>>,
    appliers: HashMap<(NodeId, TransactionId), Arc<dyn HighPriorityService>>,
}

impl StreamingRegistry {
    pub(crate) fn new() -> Self {
        Self {
            clients: HashMap::new(),
            appliers: HashMap::new(),
        }
    }

    /// Register a local streaming client.
    pub(crate) fn insert_client(&mut self, id: ClientId, client: Weak<ClientState>) {
        if self.clients.insert(id, client).is_some() {
            panic!("streaming client {} already registered", id);
        }
    }

    /// Remove a local streaming client.
    pub(crate) fn remove_client(&mut self, id: ClientId) -> Weak<ClientState> {
        match self.clients.remove(&id) {
            Some(client) => client,
            None => panic!("streaming client {} not registered", id),
        }
    }

    /// Register a streaming applier under its origin and transaction.
    pub(crate) fn insert_applier(
        &mut self,
        origin: NodeId,
        transaction_id: TransactionId,
        service: Arc<dyn HighPriorityService>,
    ) {
        if self
            .appliers
            .insert((origin, transaction_id), service)
            .is_some()
        {
            panic!(
                "streaming applier ({}, {}) already registered",
                origin, transaction_id
            );
        }
    }

    /// Remove a streaming applier.
    pub(crate) fn remove_applier(
        &mut self,
        origin: NodeId,
        transaction_id: TransactionId,
    ) -> Arc<dyn HighPriorityService> {
        match self.appliers.remove(&(origin, transaction_id)) {
            Some(service) => service,
            None => panic!(
                "streaming applier ({}, {}) not registered",
                origin, transaction_id
            ),
        }
    }

    /// Look up a streaming applier.
    pub(crate) fn find_applier(
        &self,
        origin: NodeId,
        transaction_id: TransactionId,
    ) -> Option<Arc<dyn HighPriorityService>> {
        self.appliers.get(&(origin, transaction_id)).cloned()
    }

    /// Keys of appliers whose origin is not a member of `view`.
    pub(crate) fn foreign_applier_keys(&self, view: &View) -> Vec<(NodeId, TransactionId)> {
        self.appliers
            .keys()
            .filter(|(origin, _)| !view.is_member(*origin))
            .copied()
            .collect()
    }

    /// Registered streaming client ids.
    pub(crate) fn client_ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    /// Registered streaming applier keys.
    pub(crate) fn applier_keys(&self) -> Vec<(NodeId, TransactionId)> {
        self.appliers.keys().copied().collect()
    }

    pub(crate) fn has_client(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }
}
