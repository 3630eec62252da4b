use crate::error::AuditError;
use crate::types::{PlanId, StepId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub plan_id: PlanId,
    pub step_id: Option<StepId>,
    pub action: String,
    pub result: String,
    pub prev_hash: [u8; 32],
    pub hash: [u8; 32],
}

impl AuditEvent {
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// Append-only, hash-chained record of every plan and step transition
#[derive(Debug, Default)]
pub struct AuditLog {
    inner: Mutex<Vec<AuditEvent>>,
}

impl AuditLog {
    pub fn append(
        &self,
        plan_id: PlanId,
        step_id: Option<StepId>,
        action: impl Into<String>,
        result: impl Into<String>,
    ) -> u64 {
        let mut guard = self.inner.lock();
        let prev_hash = guard.last().map(|e| e.hash).unwrap_or([0u8; 32]);
        let mut event = AuditEvent {
            sequence: guard.len() as u64,
            timestamp: Utc::now(),
            plan_id,
            step_id,
            action: action.into(),
            result: result.into(),
            prev_hash,
            hash: [0u8; 32],
        };
        event.hash = compute_hash(&event);
        let sequence = event.sequence;
        guard.push(event);
        sequence
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.inner.lock().clone()
    }

    pub fn events_for(&self, plan_id: PlanId) -> Vec<AuditEvent> {
        self.inner
            .lock()
            .iter()
            .filter(|e| e.plan_id == plan_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn verify_integrity(&self) -> Result<(), AuditError> {
        let guard = self.inner.lock();
        let mut prev = [0u8; 32];
        for e in guard.iter() {
            if e.prev_hash != prev || e.hash != compute_hash(e) {
                return Err(AuditError::IntegrityViolation(e.sequence));
            }
            prev = e.hash;
        }
        Ok(())
    }

    #[cfg(test)]
    fn tamper(&self, sequence: usize, result: &str) {
        self.inner.lock()[sequence].result = result.to_string();
    }
}

fn compute_hash(event: &AuditEvent) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(event.sequence.to_le_bytes());
    hasher.update(event.timestamp.timestamp_micros().to_le_bytes());
    hasher.update(event.plan_id.0.to_bytes());
    if let Some(step) = &event.step_id {
        hasher.update(step.0.as_bytes());
    }
    hasher.update([0]);
    hasher.update(event.action.as_bytes());
    hasher.update([0]);
    hasher.update(event.result.as_bytes());
    hasher.update([0]);
    hasher.update(event.prev_hash);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_verifies() {
        let log = AuditLog::default();
        let plan = PlanId::new();
        log.append(plan, None, "transition", "Draft -> Ready");
        log.append(plan, Some(StepId::new("s1")), "step", "Pending -> Running");
        assert_eq!(log.len(), 2);
        assert!(log.verify_integrity().is_ok());
        assert_eq!(log.events()[1].prev_hash, log.events()[0].hash);
    }

    #[test]
    fn tampering_is_detected() {
        let log = AuditLog::default();
        let plan = PlanId::new();
        log.append(plan, None, "transition", "Draft -> Ready");
        log.append(plan, None, "transition", "Ready -> Executing");
        log.tamper(0, "Draft -> Completed");
        assert_eq!(log.verify_integrity(), Err(AuditError::IntegrityViolation(0)));
    }

    #[test]
    fn filters_by_plan() {
        let log = AuditLog::default();
        let (a, b) = (PlanId::new(), PlanId::new());
        log.append(a, None, "transition", "x");
        log.append(b, None, "transition", "y");
        log.append(a, None, "transition", "z");
        assert_eq!(log.events_for(a).len(), 2);
    }
}
