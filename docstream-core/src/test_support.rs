//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backend::{
    Backend, BackendResult, DocumentSnapshot, Listener, ListenerRegistration, MemoryBackend,
    QuerySnapshot, Source, WriteMode,
};
use crate::codec::Dictionary;
use crate::path::ResourcePath;
use crate::record::{Collection, Record};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    pub key: String,
    pub amount: i64,
    pub donor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<Note>,
}

impl Donation {
    pub fn new(key: &str, amount: i64, donor: &str) -> Self {
        Self {
            key: key.to_string(),
            amount,
            donor: donor.to_string(),
            note: None,
        }
    }

    pub fn with_note(mut self, note: Note) -> Self {
        self.note = Some(note);
        self
    }
}

impl Record for Donation {
    fn key(&self) -> &str {
        &self.key
    }
}

impl Collection for Donation {
    const NAME: &'static str = "donations";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub key: String,
    pub text: String,
}

impl Note {
    pub fn new(key: &str, text: &str) -> Self {
        Self {
            key: key.to_string(),
            text: text.to_string(),
        }
    }
}

impl Record for Note {
    fn key(&self) -> &str {
        &self.key
    }
}

impl Collection for Note {
    const NAME: &'static str = "notes";
}

pub fn dict(value: serde_json::Value) -> Dictionary {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected object, got {}", other),
    }
}

/// Memory backend that records every call made through the `Backend` trait.
///
/// Writes applied directly on [`RecordingBackend::memory`] are not recorded,
/// which lets tests seed data without polluting the log.
#[derive(Default)]
pub struct RecordingBackend {
    memory: MemoryBackend,
    reads: AtomicUsize,
    sources: Mutex<Vec<Source>>,
    writes: Mutex<Vec<(ResourcePath, Dictionary, WriteMode)>>,
    listens: AtomicUsize,
    removals: Arc<AtomicUsize>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> &MemoryBackend {
        &self.memory
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn sources(&self) -> Vec<Source> {
        self.sources.lock().clone()
    }

    pub fn writes(&self) -> Vec<(ResourcePath, Dictionary, WriteMode)> {
        self.writes.lock().clone()
    }

    pub fn listens(&self) -> usize {
        self.listens.load(Ordering::SeqCst)
    }

    pub fn removals(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }

    fn record_read(&self, source: Source) {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.sources.lock().push(source);
    }

    fn counted(&self, registration: ListenerRegistration) -> ListenerRegistration {
        self.listens.fetch_add(1, Ordering::SeqCst);
        let removals = Arc::clone(&self.removals);
        ListenerRegistration::new(move || {
            removals.fetch_add(1, Ordering::SeqCst);
            registration.remove();
        })
    }
}

impl Backend for RecordingBackend {
    fn get_document<'a>(
        &'a self,
        path: &'a ResourcePath,
        source: Source,
    ) -> BoxFuture<'a, BackendResult<DocumentSnapshot>> {
        self.record_read(source);
        self.memory.get_document(path, source)
    }

    fn get_collection<'a>(
        &'a self,
        path: &'a ResourcePath,
        source: Source,
    ) -> BoxFuture<'a, BackendResult<QuerySnapshot>> {
        self.record_read(source);
        self.memory.get_collection(path, source)
    }

    fn listen_document(
        &self,
        path: &ResourcePath,
        listener: Listener<DocumentSnapshot>,
    ) -> ListenerRegistration {
        self.counted(self.memory.listen_document(path, listener))
    }

    fn listen_collection(
        &self,
        path: &ResourcePath,
        listener: Listener<QuerySnapshot>,
    ) -> ListenerRegistration {
        self.counted(self.memory.listen_collection(path, listener))
    }

    fn write<'a>(
        &'a self,
        path: &'a ResourcePath,
        data: Dictionary,
        mode: WriteMode,
    ) -> BoxFuture<'a, BackendResult<()>> {
        self.writes.lock().push((path.clone(), data.clone(), mode));
        self.memory.write(path, data, mode)
    }
}
