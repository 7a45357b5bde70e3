/// JSON-RPC history
///
/// Every request this client sends or receives is recorded here until it is
/// answered or expires. Outbound responses are only accepted when a pending
/// record exists, which is what lets the relay interactor drop spoofed or
/// late responses.
///
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::Repository;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    Pending,
    Acknowledged,
    Resolved,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRecord {
    pub id: u64,
    pub topic: String,
    /// Topic the answer is expected on when it differs from `topic`.
    pub response_topic: Option<String>,
    pub method: String,
    pub body: String,
    pub response: Option<String>,
    pub expiry: Option<u64>,
    pub direction: Direction,
    pub status: RecordStatus,
}

impl JsonRpcRecord {
    pub fn is_pending(&self) -> bool {
        self.status != RecordStatus::Resolved
    }

    pub fn answers_on(&self, topic: &str) -> bool {
        self.topic == topic || self.response_topic.as_deref() == Some(topic)
    }
}

pub struct JsonRpcHistory {
    records: Arc<dyn Repository<u64, JsonRpcRecord>>,
}

impl JsonRpcHistory {
    pub fn new(records: Arc<dyn Repository<u64, JsonRpcRecord>>) -> Self {
        Self { records }
    }

    /// Insert-or-abort; a second record with the same id is rejected with
    /// `DuplicateRecord`.
    #[allow(clippy::too_many_arguments)]
    pub fn set_request(
        &self,
        id: u64,
        topic: &str,
        response_topic: Option<&str>,
        method: &str,
        body: &str,
        expiry: Option<u64>,
        direction: Direction,
    ) -> Result<()> {
        self.records
            .insert(
                id,
                JsonRpcRecord {
                    id,
                    topic: topic.to_string(),
                    response_topic: response_topic.map(str::to_string),
                    method: method.to_string(),
                    body: body.to_string(),
                    response: None,
                    expiry,
                    direction,
                    status: RecordStatus::Pending,
                },
            )
            .map_err(|_| Error::DuplicateRecord(id))
    }

    pub fn get_record(&self, id: u64) -> Option<JsonRpcRecord> {
        self.records.get(&id)
    }

    pub fn get_pending_records(&self) -> Vec<JsonRpcRecord> {
        let mut records: Vec<_> = self
            .records
            .values()
            .into_iter()
            .filter(JsonRpcRecord::is_pending)
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Pending outbound request `id` that expects its answer on `topic`.
    pub fn get_pending_request(
        &self,
        id: u64,
        topic: &str,
    ) -> Option<JsonRpcRecord> {
        self.records.get(&id).filter(|r| {
            r.direction == Direction::Outbound
                && r.is_pending()
                && r.answers_on(topic)
        })
    }

    pub fn update_record_to_acknowledged(&self, id: u64) -> Result<()> {
        self.records
            .update(&id, &mut |r| {
                if r.status == RecordStatus::Pending {
                    r.status = RecordStatus::Acknowledged;
                }
            })
            .map(|_| ())
    }

    pub fn update_request_with_response(
        &self,
        id: u64,
        response: &str,
    ) -> Result<JsonRpcRecord> {
        self.records.update(&id, &mut |r| {
            r.response = Some(response.to_string());
            r.status = RecordStatus::Resolved;
        })
    }

    /// Returns `false` when there was nothing to delete.
    pub fn delete_record_by_id(&self, id: u64) -> bool {
        self.records.delete(&id).is_some()
    }

    pub fn delete_records_by_topic(&self, topic: &str) -> usize {
        let ids: Vec<u64> = self
            .records
            .values()
            .into_iter()
            .filter(|r| r.answers_on(topic))
            .map(|r| r.id)
            .collect();
        for id in &ids {
            self.records.delete(id);
        }
        ids.len()
    }

    /// Drops pending records whose expiry passed and returns them.
    pub fn sweep_expired(&self, now: u64) -> Vec<JsonRpcRecord> {
        let expired: Vec<JsonRpcRecord> = self
            .records
            .values()
            .into_iter()
            .filter(|r| r.is_pending() && r.expiry.is_some_and(|e| e <= now))
            .collect();
        for record in &expired {
            debug!("json-rpc record {} on {} expired", record.id, record.topic);
            self.records.delete(&record.id);
        }
        expired
    }
}
