//! Per-user working state: uploads, selection, generated rules and the last analysis.

use crate::pipeline::{AnalysisInput, AnalysisOutcome, GeneratedRules, UploadedFile};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("unknown session {0}")]
    UnknownSession(Uuid),

    #[error("unknown rules document {0}")]
    UnknownDocument(String),

    #[error("no rules have been generated for {0}")]
    NotGenerated(String),

    #[error("no analysis has been run in this session")]
    NoAnalysis,
}

#[derive(Debug, Clone)]
pub struct RulesDocument {
    pub file: UploadedFile,
    pub processed: bool,
    pub selected: bool,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    rules_documents: HashMap<String, RulesDocument>,
    /// Upload order, so listings are stable.
    upload_order: Vec<String>,
    /// Selected document names in the order they were selected.
    selection: Vec<String>,
    generated: HashMap<String, GeneratedRules>,
    transactions: Option<UploadedFile>,
    analysis: Option<Arc<AnalysisOutcome>>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            rules_documents: HashMap::new(),
            upload_order: Vec::new(),
            selection: Vec::new(),
            generated: HashMap::new(),
            transactions: None,
            analysis: None,
            created_at: now,
            last_active: now,
        }
    }

    /// Returns false, leaving the existing upload untouched, when `name` is already known.
    pub fn add_rules_document(&mut self, name: &str, bytes: impl Into<Arc<[u8]>>) -> bool {
        if self.rules_documents.contains_key(name) {
            return false;
        }
        self.rules_documents.insert(
            name.to_string(),
            RulesDocument {
                file: UploadedFile::new(name, bytes),
                processed: false,
                selected: false,
                uploaded_at: Utc::now(),
            },
        );
        self.upload_order.push(name.to_string());
        true
    }

    pub fn rules_document(&self, name: &str) -> Option<&RulesDocument> {
        self.rules_documents.get(name)
    }

    /// Uploaded documents in upload order.
    pub fn rules_documents(&self) -> impl Iterator<Item = &RulesDocument> + '_ {
        self.upload_order
            .iter()
            .filter_map(|name| self.rules_documents.get(name))
    }

    pub fn set_selected(&mut self, name: &str, selected: bool) -> Result<(), SessionError> {
        let doc = self
            .rules_documents
            .get_mut(name)
            .ok_or_else(|| SessionError::UnknownDocument(name.to_string()))?;
        doc.selected = selected;
        if selected {
            if !self.selection.iter().any(|n| n == name) {
                self.selection.push(name.to_string());
            }
        } else {
            self.selection.retain(|n| n != name);
        }
        Ok(())
    }

    pub fn selection(&self) -> &[String] {
        &self.selection
    }

    pub fn set_transactions(&mut self, name: &str, bytes: impl Into<Arc<[u8]>>) {
        self.transactions = Some(UploadedFile::new(name, bytes));
    }

    pub fn transactions(&self) -> Option<&UploadedFile> {
        self.transactions.as_ref()
    }

    pub fn record_generated(&mut self, name: &str, result: GeneratedRules) -> Result<(), SessionError> {
        let doc = self
            .rules_documents
            .get_mut(name)
            .ok_or_else(|| SessionError::UnknownDocument(name.to_string()))?;
        doc.processed = true;
        self.generated.insert(name.to_string(), result);
        Ok(())
    }

    pub fn generated(&self, name: &str) -> Option<&GeneratedRules> {
        self.generated.get(name)
    }

    /// File name and markdown content offered for download.
    pub fn generated_download(&self, name: &str) -> Result<(String, String), SessionError> {
        let result = self
            .generated
            .get(name)
            .ok_or_else(|| SessionError::NotGenerated(name.to_string()))?;
        Ok((result.download_name(), result.content.clone()))
    }

    /// Snapshot of what an analysis run needs, taken so the lock can be released before the
    /// completion call.
    pub fn analysis_input(&self) -> AnalysisInput {
        AnalysisInput {
            rules_documents: self
                .selection
                .iter()
                .filter_map(|name| self.rules_documents.get(name))
                .map(|doc| doc.file.clone())
                .collect(),
            transactions: self.transactions.clone(),
        }
    }

    pub fn record_analysis(&mut self, outcome: AnalysisOutcome) -> Arc<AnalysisOutcome> {
        let outcome = Arc::new(outcome);
        self.analysis = Some(outcome.clone());
        outcome
    }

    pub fn analysis(&self) -> Result<Arc<AnalysisOutcome>, SessionError> {
        self.analysis.clone().ok_or(SessionError::NoAnalysis)
    }

    fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}

/// All live sessions. Cloning shares the same map.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<Uuid, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().insert(id, Session::new(id));
        tracing::info!(session_id = %id, "session started");
        id
    }

    pub fn remove(&self, id: Uuid) -> Result<(), SessionError> {
        match self.lock().remove(&id) {
            Some(_) => {
                tracing::info!(session_id = %id, "session ended");
                Ok(())
            }
            None => Err(SessionError::UnknownSession(id)),
        }
    }

    /// Runs `f` against the session while holding the store lock. Keep `f` short: no I/O.
    pub fn with_session<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T, SessionError> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(&id).ok_or(SessionError::UnknownSession(id))?;
        session.touch();
        Ok(f(session))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops sessions idle for longer than `max_idle`; returns how many were removed.
    pub fn purge_idle(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now() - max_idle;
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| s.last_active >= cutoff);
        let purged = before - sessions.len();
        if purged > 0 {
            tracing::info!(purged, remaining = sessions.len(), "purged idle sessions");
        }
        purged
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
