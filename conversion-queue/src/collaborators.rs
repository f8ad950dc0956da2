//! Seams to the services the scheduler does not own: the conversion routine,
//! the conversion record store and the user notification channel.
//!
//! In-memory implementations are provided for single-process setups and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use crate::{
    worker::JobContext, CollaboratorError, ConversionError, ConversionOutcome, ConversionPayload,
    Progress,
};

/// The conversion routine. Any `Err` or an outcome with `success == false`
/// is treated as a failed attempt, whatever the cause.
#[async_trait]
pub trait ConversionExecutor: Send + Sync {
    async fn execute(
        &self,
        payload: &ConversionPayload,
        ctx: &JobContext,
    ) -> Result<ConversionOutcome, ConversionError>;
}

/// User-facing conversion status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Partial update of a conversion record; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionUpdate {
    pub status: Option<ConversionStatus>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_ended_at: Option<DateTime<Utc>>,
    pub result_file_id: Option<String>,
    pub page_count: Option<u32>,
    pub conversion_time: Option<Duration>,
    pub error: Option<String>,
}

impl ConversionUpdate {
    pub fn processing(started_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(ConversionStatus::Processing),
            processing_started_at: Some(started_at),
            ..Self::default()
        }
    }

    pub fn completed(outcome: &ConversionOutcome, ended_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(ConversionStatus::Completed),
            processing_ended_at: Some(ended_at),
            result_file_id: outcome.result_file_id.clone(),
            page_count: outcome.page_count,
            conversion_time: outcome.conversion_time,
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>, ended_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(ConversionStatus::Failed),
            processing_ended_at: Some(ended_at),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Latest attempt error only; status stays as it is
    pub fn attempt_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Store owning the user-facing conversion records, keyed by conversion ID
#[async_trait]
pub trait ConversionRecordStore: Send + Sync {
    async fn update_status(
        &self,
        conversion_id: &str,
        update: ConversionUpdate,
    ) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Progress,
    Completed,
    Error,
}

/// Message sent to the user notification channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub user_id: String,
    pub conversion_id: String,
    pub status: ConversionStatus,
    pub progress: Option<Progress>,
    pub message: Option<String>,
}

/// Fire-and-forget delivery of user notifications
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), CollaboratorError>;
}

/// Conversion record as kept by [`InMemoryConversionRecords`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRecord {
    pub conversion_id: String,
    pub status: ConversionStatus,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_ended_at: Option<DateTime<Utc>>,
    pub result_file_id: Option<String>,
    pub page_count: Option<u32>,
    pub conversion_time: Option<Duration>,
    pub error: Option<String>,
}

impl ConversionRecord {
    pub fn pending(conversion_id: impl Into<String>) -> Self {
        Self {
            conversion_id: conversion_id.into(),
            status: ConversionStatus::Pending,
            processing_started_at: None,
            processing_ended_at: None,
            result_file_id: None,
            page_count: None,
            conversion_time: None,
            error: None,
        }
    }

    fn apply(&mut self, update: ConversionUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if update.processing_started_at.is_some() {
            self.processing_started_at = update.processing_started_at;
        }
        if update.processing_ended_at.is_some() {
            self.processing_ended_at = update.processing_ended_at;
        }
        if update.result_file_id.is_some() {
            self.result_file_id = update.result_file_id;
        }
        if update.page_count.is_some() {
            self.page_count = update.page_count;
        }
        if update.conversion_time.is_some() {
            self.conversion_time = update.conversion_time;
        }
        if update.error.is_some() {
            self.error = update.error;
        }
    }
}

/// In-memory conversion record store
#[derive(Debug, Default)]
pub struct InMemoryConversionRecords {
    records: RwLock<HashMap<String, ConversionRecord>>,
}

impl InMemoryConversionRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a conversion in `pending` state, as the request handler would
    pub fn insert_pending(&self, conversion_id: &str) {
        self.records
            .write()
            .insert(conversion_id.to_string(), ConversionRecord::pending(conversion_id));
    }

    pub fn get(&self, conversion_id: &str) -> Option<ConversionRecord> {
        self.records.read().get(conversion_id).cloned()
    }
}

#[async_trait]
impl ConversionRecordStore for InMemoryConversionRecords {
    async fn update_status(
        &self,
        conversion_id: &str,
        update: ConversionUpdate,
    ) -> Result<(), CollaboratorError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(conversion_id)
            .ok_or_else(|| CollaboratorError::RecordNotFound(conversion_id.to_string()))?;
        record.apply(update);
        Ok(())
    }
}

/// Keeps every notification it receives
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sent.lock().iter().filter(|n| n.kind == kind).count()
    }
}

#[async_trait]
impl NotificationChannel for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), CollaboratorError> {
        self.sent.lock().push(notification);
        Ok(())
    }
}

/// Writes notifications to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationChannel for TracingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), CollaboratorError> {
        info!(
            kind = ?notification.kind,
            user_id = %notification.user_id,
            conversion_id = %notification.conversion_id,
            status = ?notification.status,
            "conversion notification"
        );
        Ok(())
    }
}
