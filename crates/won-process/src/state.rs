//! Process state management.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, trace, warn};
use won_protocol::{Message, MessageKind, Uri};

use crate::entry::{
    AtomProcess, ConnectionProcess, LoadPhase, ProcessEntry, StatusInfo, SubResource,
};

/// Kinds of remote resources with a top-level load record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Atom,
    /// The connection list of an atom, keyed by the atom URI.
    ConnectionContainer,
    Connection,
    /// Any other fetched document, e.g. a dataset linked from an atom.
    ExternalData,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Atom => write!(f, "atom"),
            Self::ConnectionContainer => write!(f, "connectionContainer"),
            Self::Connection => write!(f, "connection"),
            Self::ExternalData => write!(f, "externalData"),
        }
    }
}

/// Result of asking to start a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStart {
    /// The caller owns the fetch and must report its outcome.
    Started,
    /// Another fetch is already in flight; do nothing.
    AlreadyLoading,
}

impl LoadStart {
    pub fn is_started(self) -> bool {
        self == Self::Started
    }
}

/// Result of reporting a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Recorded as failed to load.
    Failed,
    /// The node reported the resource gone; these entries were removed.
    Gone(Vec<(ResourceKind, Uri)>),
    /// No fetch was in flight any more; ignored.
    Stale,
}

/// How often a sub-resource may fail before reloads stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_failures: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_failures: 3 }
    }
}

/// Load state of every remote resource the client knows about.
///
/// All mutation goes through the methods here; each change bumps
/// [`version`](Self::version).
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessState {
    atoms: HashMap<Uri, AtomProcess>,
    connection_containers: HashMap<Uri, ProcessEntry>,
    connections: HashMap<Uri, ConnectionProcess>,
    external_data: HashMap<Uri, ProcessEntry>,
    #[serde(skip)]
    retry: RetryPolicy,
    version: u64,
}

impl ProcessState {
    /// Create empty state.
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Change counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Forget everything, e.g. on logout. Fetches still in flight will find
    /// no loading entry and their results are dropped.
    pub fn reset(&mut self) {
        debug!("resetting process state");
        self.atoms.clear();
        self.connection_containers.clear();
        self.connections.clear();
        self.external_data.clear();
        self.touch();
    }

    fn touch(&mut self) {
        self.version += 1;
    }

    // === Generic load cycle ===

    /// Load record of a resource.
    pub fn entry(&self, kind: ResourceKind, uri: &Uri) -> Option<&ProcessEntry> {
        match kind {
            ResourceKind::Atom => self.atoms.get(uri).map(|a| &a.entry),
            ResourceKind::ConnectionContainer => self.connection_containers.get(uri),
            ResourceKind::Connection => self.connections.get(uri).map(|c| &c.entry),
            ResourceKind::ExternalData => self.external_data.get(uri),
        }
    }

    fn entry_mut(&mut self, kind: ResourceKind, uri: &Uri) -> Option<&mut ProcessEntry> {
        match kind {
            ResourceKind::Atom => self.atoms.get_mut(uri).map(|a| &mut a.entry),
            ResourceKind::ConnectionContainer => self.connection_containers.get_mut(uri),
            ResourceKind::Connection => self.connections.get_mut(uri).map(|c| &mut c.entry),
            ResourceKind::ExternalData => self.external_data.get_mut(uri),
        }
    }

    fn entry_or_default(&mut self, kind: ResourceKind, uri: &Uri) -> &mut ProcessEntry {
        match kind {
            ResourceKind::Atom => &mut self.atoms.entry(uri.clone()).or_default().entry,
            ResourceKind::ConnectionContainer => {
                self.connection_containers.entry(uri.clone()).or_default()
            }
            ResourceKind::Connection => &mut self.connections.entry(uri.clone()).or_default().entry,
            ResourceKind::ExternalData => self.external_data.entry(uri.clone()).or_default(),
        }
    }

    /// Whether any record exists for the resource.
    pub fn is_known(&self, kind: ResourceKind, uri: &Uri) -> bool {
        self.entry(kind, uri).is_some()
    }

    pub fn phase(&self, kind: ResourceKind, uri: &Uri) -> Option<LoadPhase> {
        self.entry(kind, uri).map(|e| e.phase)
    }

    pub fn is_to_load(&self, kind: ResourceKind, uri: &Uri) -> bool {
        self.entry(kind, uri).is_some_and(ProcessEntry::is_to_load)
    }

    pub fn is_loading(&self, kind: ResourceKind, uri: &Uri) -> bool {
        self.entry(kind, uri).is_some_and(ProcessEntry::is_loading)
    }

    pub fn is_loaded(&self, kind: ResourceKind, uri: &Uri) -> bool {
        self.entry(kind, uri).is_some_and(ProcessEntry::is_loaded)
    }

    pub fn is_failed(&self, kind: ResourceKind, uri: &Uri) -> bool {
        self.entry(kind, uri).is_some_and(ProcessEntry::is_failed)
    }

    /// Status reported with the last completed fetch.
    pub fn status(&self, kind: ResourceKind, uri: &Uri) -> Option<&StatusInfo> {
        self.entry(kind, uri).and_then(|e| e.status.as_ref())
    }

    /// URIs of `kind` waiting to be fetched.
    pub fn to_load(&self, kind: ResourceKind) -> Vec<Uri> {
        let mut uris: Vec<Uri> = match kind {
            ResourceKind::Atom => self
                .atoms
                .iter()
                .filter(|(_, a)| a.entry.is_to_load())
                .map(|(u, _)| u.clone())
                .collect(),
            ResourceKind::ConnectionContainer => Self::pending(&self.connection_containers),
            ResourceKind::Connection => self
                .connections
                .iter()
                .filter(|(_, c)| c.entry.is_to_load())
                .map(|(u, _)| u.clone())
                .collect(),
            ResourceKind::ExternalData => Self::pending(&self.external_data),
        };
        uris.sort();
        uris
    }

    fn pending(entries: &HashMap<Uri, ProcessEntry>) -> Vec<Uri> {
        entries
            .iter()
            .filter(|(_, e)| e.is_to_load())
            .map(|(u, _)| u.clone())
            .collect()
    }

    /// Flag a resource for loading. Only unknown resources are flagged; a
    /// record that already exists keeps its phase.
    pub fn mark_to_load(&mut self, kind: ResourceKind, uri: &Uri) -> bool {
        if uri.is_empty() || self.is_known(kind, uri) {
            return false;
        }
        trace!(kind = %kind, uri = %uri, "marking to load");
        self.entry_or_default(kind, uri).phase = LoadPhase::ToLoad;
        self.touch();
        true
    }

    /// Claim the fetch of a resource.
    ///
    /// # Returns
    ///
    /// - [`LoadStart::Started`] - the caller must issue the fetch
    /// - [`LoadStart::AlreadyLoading`] - a fetch is in flight; no-op
    pub fn start_load(&mut self, kind: ResourceKind, uri: &Uri) -> LoadStart {
        if self.is_loading(kind, uri) {
            trace!(kind = %kind, uri = %uri, "fetch already in flight");
            return LoadStart::AlreadyLoading;
        }
        let entry = self.entry_or_default(kind, uri);
        entry.phase = LoadPhase::Loading;
        entry.status = None;
        self.touch();
        LoadStart::Started
    }

    /// Complete a fetch. Ignored (returns `false`) unless the resource is
    /// still loading, e.g. after a reset or a deletion.
    pub fn mark_loaded(&mut self, kind: ResourceKind, uri: &Uri, status: Option<StatusInfo>) -> bool {
        match self.entry_mut(kind, uri) {
            Some(entry) if entry.is_loading() => {
                entry.phase = LoadPhase::Loaded;
                entry.status = status;
            }
            _ => {
                debug!(kind = %kind, uri = %uri, "ignoring stale load completion");
                return false;
            }
        }
        self.touch();
        true
    }

    /// Record a failed fetch.
    ///
    /// A gone atom, connection or connection container is deleted rather
    /// than marked failed. Other failures are ignored unless the resource is
    /// still loading.
    pub fn mark_failed(&mut self, kind: ResourceKind, uri: &Uri, status: StatusInfo) -> FailureOutcome {
        if status.is_gone() && kind != ResourceKind::ExternalData {
            let removed = match kind {
                ResourceKind::Connection => self.remove_connection(uri),
                _ => self.remove_atom(uri),
            };
            debug!(kind = %kind, uri = %uri, removed = removed.len(), "resource gone");
            return FailureOutcome::Gone(removed);
        }
        match self.entry_mut(kind, uri) {
            Some(entry) if entry.is_loading() => {
                warn!(kind = %kind, uri = %uri, code = ?status.code, message = %status.message, "failed to load");
                entry.phase = LoadPhase::FailedToLoad;
                entry.status = Some(status);
            }
            _ => {
                debug!(kind = %kind, uri = %uri, "ignoring stale load failure");
                return FailureOutcome::Stale;
            }
        }
        self.touch();
        FailureOutcome::Failed
    }

    // === Deletion ===

    /// Remove an atom together with its connection container and every
    /// connection known to belong to it.
    pub fn remove_atom(&mut self, atom: &Uri) -> Vec<(ResourceKind, Uri)> {
        let mut removed = Vec::new();
        if self.atoms.remove(atom).is_some() {
            removed.push((ResourceKind::Atom, atom.clone()));
        }
        if self.connection_containers.remove(atom).is_some() {
            removed.push((ResourceKind::ConnectionContainer, atom.clone()));
        }
        let mut owned: Vec<Uri> = self
            .connections
            .iter()
            .filter(|(_, c)| c.atom.as_ref() == Some(atom))
            .map(|(u, _)| u.clone())
            .collect();
        owned.sort();
        for conn in owned {
            self.connections.remove(&conn);
            removed.push((ResourceKind::Connection, conn));
        }
        self.touch();
        removed
    }

    pub fn remove_connection(&mut self, connection: &Uri) -> Vec<(ResourceKind, Uri)> {
        let removed = match self.connections.remove(connection) {
            Some(_) => vec![(ResourceKind::Connection, connection.clone())],
            None => Vec::new(),
        };
        self.touch();
        removed
    }

    // === Atoms ===

    pub fn atom(&self, uri: &Uri) -> Option<&AtomProcess> {
        self.atoms.get(uri)
    }

    /// Flag that an edit of the atom is being submitted.
    pub fn start_atom_update(&mut self, uri: &Uri) {
        self.atoms.entry(uri.clone()).or_default().processing_update = true;
        self.touch();
    }

    pub fn finish_atom_update(&mut self, uri: &Uri) {
        if let Some(atom) = self.atoms.get_mut(uri) {
            atom.processing_update = false;
            self.touch();
        }
    }

    /// Flag the atoms behind the sender and target sockets of an incoming
    /// message for loading, if they are not known yet.
    pub fn add_message_atoms_to_load(&mut self, msg: &Message) {
        if matches!(msg.kind, MessageKind::Response { .. }) {
            return;
        }
        for atom in [msg.sender_atom(), msg.target_atom()].into_iter().flatten() {
            self.mark_to_load(ResourceKind::Atom, &atom);
        }
    }

    // === Connection containers ===

    /// Complete the fetch of an atom's connection container.
    ///
    /// Each listed connection is bound to the atom and, together with its
    /// target atom, flagged for loading if unknown.
    pub fn container_loaded(&mut self, atom: &Uri, connections: &[(Uri, Option<Uri>)]) -> bool {
        if !self.mark_loaded(ResourceKind::ConnectionContainer, atom, None) {
            return false;
        }
        for (conn, target_atom) in connections {
            self.mark_to_load(ResourceKind::Connection, conn);
            if let Some(process) = self.connections.get_mut(conn) {
                process.atom = Some(atom.clone());
            }
            if let Some(target) = target_atom {
                self.mark_to_load(ResourceKind::Atom, target);
            }
        }
        true
    }

    // === Connections ===

    pub fn connection(&self, uri: &Uri) -> Option<&ConnectionProcess> {
        self.connections.get(uri)
    }

    /// Bind a connection to the atom owning it.
    pub fn set_connection_atom(&mut self, connection: &Uri, atom: &Uri) {
        self.connections.entry(connection.clone()).or_default().atom = Some(atom.clone());
        self.touch();
    }

    /// Claim the fetch of the next message page of a connection.
    pub fn start_message_page(&mut self, connection: &Uri) -> LoadStart {
        let process = self.connections.entry(connection.clone()).or_default();
        if process.loading_messages {
            return LoadStart::AlreadyLoading;
        }
        process.loading_messages = true;
        process.entry.status = None;
        self.touch();
        LoadStart::Started
    }

    /// Complete a message page. Messages that failed earlier and are now
    /// present lose their failure mark.
    pub fn message_page_loaded(&mut self, connection: &Uri, messages: &[Uri], next_page: Option<String>) -> bool {
        let Some(process) = self.connections.get_mut(connection) else {
            return false;
        };
        if !process.loading_messages {
            debug!(connection = %connection, "ignoring stale message page");
            return false;
        }
        process.loading_messages = false;
        process.next_page = next_page;
        for msg in messages {
            process.failed_messages.remove(msg);
        }
        self.touch();
        true
    }

    /// Record a failed message page; each listed message is marked failed.
    pub fn message_page_failed(
        &mut self,
        connection: &Uri,
        messages: &[Uri],
        next_page: Option<String>,
        status: StatusInfo,
    ) -> bool {
        let Some(process) = self.connections.get_mut(connection) else {
            return false;
        };
        if !process.loading_messages {
            debug!(connection = %connection, "ignoring stale message page failure");
            return false;
        }
        warn!(connection = %connection, failed = messages.len(), message = %status.message, "failed to load messages");
        process.loading_messages = false;
        process.next_page = next_page;
        for msg in messages {
            process.failed_messages.insert(msg.clone(), status.clone());
        }
        process.entry.status = Some(status);
        self.touch();
        true
    }

    // === Sub-resources ===

    /// Claim the fetch of a connection sub-resource.
    pub fn start_sub_resource(&mut self, connection: &Uri, sub: SubResource) -> LoadStart {
        let process = self.connections.entry(connection.clone()).or_default();
        let record = process.sub_resource_mut(sub);
        if record.loading {
            return LoadStart::AlreadyLoading;
        }
        record.loading = true;
        self.touch();
        LoadStart::Started
    }

    /// Complete a sub-resource fetch; resets the failure count.
    pub fn sub_resource_loaded(&mut self, connection: &Uri, sub: SubResource) -> bool {
        let Some(process) = self.connections.get_mut(connection) else {
            return false;
        };
        let record = process.sub_resource_mut(sub);
        if !record.loading {
            debug!(connection = %connection, sub = %sub, "ignoring stale sub-resource completion");
            return false;
        }
        record.loading = false;
        record.loaded = true;
        record.dirty = false;
        record.fail_count = 0;
        self.touch();
        true
    }

    /// Record a failed sub-resource fetch. Returns the new failure count, or
    /// `None` when the fetch was no longer claimed.
    pub fn sub_resource_failed(&mut self, connection: &Uri, sub: SubResource) -> Option<u32> {
        let Some(process) = self.connections.get_mut(connection) else {
            debug!(connection = %connection, sub = %sub, "ignoring sub-resource failure for unknown connection");
            return None;
        };
        let record = process.sub_resource_mut(sub);
        if !record.loading {
            debug!(connection = %connection, sub = %sub, "ignoring stale sub-resource failure");
            return None;
        }
        record.loading = false;
        record.fail_count += 1;
        let count = record.fail_count;
        warn!(connection = %connection, sub = %sub, fail_count = count, "sub-resource failed to load");
        self.touch();
        Some(count)
    }

    /// Whether a sub-resource may be fetched again under the retry policy.
    pub fn may_retry_sub_resource(&self, connection: &Uri, sub: SubResource) -> bool {
        self.connections
            .get(connection)
            .map_or(true, |c| c.sub_resource(sub).fail_count < self.retry.max_failures)
    }

    /// Flag loaded petri net data as outdated, e.g. after a message that
    /// may have fired a transition.
    pub fn mark_petri_net_dirty(&mut self, connection: &Uri) {
        if let Some(process) = self.connections.get_mut(connection) {
            process.petri_net_data.dirty = true;
            self.touch();
        }
    }
}
