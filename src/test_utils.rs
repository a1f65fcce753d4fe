//! Shared test utilities: fixtures, recording interpreters and generators.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;

use crate::effects::{
    ProtocolEffect, ProtocolInterpreter, ProtocolResponse, ServiceEffect, ServiceInterpreter,
    ServiceResponse,
};
use crate::engine::{Engine, EngineConfig, EngineContext};
use crate::gateway::{ErrorKind, ServiceError};
use crate::persistence::{DEFAULT_PROCESSED_CAP, DocumentStorage, MemoryStorage};
use crate::types::{
    AssetId, Deliverable, IdentityRef, ItemId, JobId, JobNotification, JobPhase, MintOrder,
    SourceContent, TxRef,
};

// ─── Fixtures ─────────────────────────────────────────────────────────────────

pub fn status_url(item: &str) -> String {
    format!("https://x.com/someone/status/{item}")
}

pub fn sample_order(job: &str, item: &str, categories: &[&str]) -> MintOrder {
    MintOrder {
        job_id: JobId::new(job),
        item: ItemId::new(item),
        source_url: status_url(item),
        categories: categories.iter().map(|c| c.to_string()).collect(),
        identity: None,
        title: None,
        description: None,
        payer: Some("0xbuyer".to_string()),
    }
}

/// A JSON memo in the protocol's requirement envelope.
pub fn request_memo(url: &str, categories: &[&str]) -> String {
    serde_json::json!({
        "requirement": {
            "sourceUrl": url,
            "categories": categories,
        }
    })
    .to_string()
}

pub fn notification(job: &str, phase: JobPhase, item: &str, categories: &[&str]) -> JobNotification {
    JobNotification::new(job, phase, vec![request_memo(&status_url(item), categories)])
        .with_client("0xbuyer")
}

// ─── Recording Interpreters ───────────────────────────────────────────────────

/// Protocol interpreter that records every effect.
#[derive(Debug, Default)]
pub struct MockProtocol {
    calls: Mutex<Vec<ProtocolEffect>>,
    phases: Mutex<HashMap<JobId, JobPhase>>,
    lookup_unavailable: AtomicBool,
    failing_deliveries: AtomicU32,
}

impl MockProtocol {
    pub fn calls(&self) -> Vec<ProtocolEffect> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|e| e.name() == name).count()
    }

    pub fn deliveries(&self) -> Vec<(JobId, Deliverable)> {
        self.calls()
            .into_iter()
            .filter_map(|e| match e {
                ProtocolEffect::Deliver {
                    job_id,
                    deliverable,
                } => Some((job_id, deliverable)),
                _ => None,
            })
            .collect()
    }

    pub fn rejections(&self) -> Vec<(JobId, String)> {
        self.calls()
            .into_iter()
            .filter_map(|e| match e {
                ProtocolEffect::Reject { job_id, reason } => Some((job_id, reason)),
                _ => None,
            })
            .collect()
    }

    /// Phase reported by `LookupJob`; unknown jobs report `None`.
    pub fn set_phase(&self, job: &str, phase: JobPhase) {
        self.phases.lock().unwrap().insert(JobId::new(job), phase);
    }

    pub fn set_lookup_unavailable(&self, unavailable: bool) {
        self.lookup_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fails the next `n` deliveries with a transient error.
    pub fn fail_deliveries(&self, n: u32) {
        self.failing_deliveries.store(n, Ordering::SeqCst);
    }

    fn respond(&self, effect: &ProtocolEffect) -> Result<ProtocolResponse, ServiceError> {
        match effect {
            ProtocolEffect::LookupJob { job_id } => {
                if self.lookup_unavailable.load(Ordering::SeqCst) {
                    return Err(ServiceError::transient("protocol unreachable"));
                }
                let phase = self.phases.lock().unwrap().get(job_id).copied();
                Ok(ProtocolResponse::Job(phase))
            }
            ProtocolEffect::Deliver { .. } => {
                let remaining = self.failing_deliveries.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.failing_deliveries.store(remaining - 1, Ordering::SeqCst);
                    return Err(ServiceError::transient("connection reset"));
                }
                Ok(ProtocolResponse::Ok)
            }
            _ => Ok(ProtocolResponse::Ok),
        }
    }
}

impl ProtocolInterpreter for MockProtocol {
    type Error = ServiceError;

    fn interpret(
        &self,
        effect: ProtocolEffect,
    ) -> impl Future<Output = Result<ProtocolResponse, Self::Error>> + Send {
        let result = self.respond(&effect);
        self.calls.lock().unwrap().push(effect);
        async move { result }
    }
}

/// Service interpreter that records every effect and mints sequential assets.
#[derive(Debug, Default)]
pub struct MockServices {
    calls: Mutex<Vec<ServiceEffect>>,
    minted: AtomicU32,
    failing_categories: Mutex<HashSet<String>>,
    mint_error: Mutex<Option<(ErrorKind, String)>>,
    fetch_error: Mutex<Option<(ErrorKind, String)>>,
    identity_fails: AtomicBool,
    fetch_delay: Mutex<Option<Duration>>,
}

impl MockServices {
    pub fn calls(&self) -> Vec<ServiceEffect> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|e| e.name() == name).count()
    }

    pub fn mint_count(&self) -> usize {
        self.count("mint")
    }

    /// Categories of every publish call, in call order.
    pub fn published(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|e| match e {
                ServiceEffect::Publish { entry, .. } => Some(entry.category),
                _ => None,
            })
            .collect()
    }

    pub fn fail_category(&self, category: &str) {
        self.failing_categories
            .lock()
            .unwrap()
            .insert(category.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_categories.lock().unwrap().clear();
        *self.mint_error.lock().unwrap() = None;
        *self.fetch_error.lock().unwrap() = None;
        self.identity_fails.store(false, Ordering::SeqCst);
    }

    pub fn fail_mint(&self, kind: ErrorKind, message: &str) {
        *self.mint_error.lock().unwrap() = Some((kind, message.to_string()));
    }

    pub fn fail_fetch(&self, kind: ErrorKind, message: &str) {
        *self.fetch_error.lock().unwrap() = Some((kind, message.to_string()));
    }

    pub fn fail_identity(&self) {
        self.identity_fails.store(true, Ordering::SeqCst);
    }

    /// Delays content fetches, widening the window for concurrent runs.
    pub fn delay_fetch(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    fn respond(&self, effect: &ServiceEffect) -> Result<ServiceResponse, ServiceError> {
        match effect {
            ServiceEffect::FetchContent { item, .. } => {
                if let Some((kind, message)) = self.fetch_error.lock().unwrap().clone() {
                    return Err(error_of(kind, message));
                }
                Ok(ServiceResponse::Content(SourceContent {
                    text: format!("post {item}"),
                    author: "someone".to_string(),
                    media_refs: vec![],
                }))
            }
            ServiceEffect::Mint { .. } => {
                if let Some((kind, message)) = self.mint_error.lock().unwrap().clone() {
                    return Err(error_of(kind, message));
                }
                let n = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(ServiceResponse::Minted {
                    tx_ref: TxRef::new(format!("0xtx{n}")),
                    asset_id: AssetId::new(n.to_string()),
                })
            }
            ServiceEffect::RecordOwnership { .. } => Ok(ServiceResponse::Ok),
            ServiceEffect::RegisterIdentity { name, .. } => {
                if self.identity_fails.load(Ordering::SeqCst) {
                    return Err(ServiceError::transient("identity registry timed out"));
                }
                Ok(ServiceResponse::Identity(IdentityRef::new(format!("id-{name}"))))
            }
            ServiceEffect::Publish { entry, .. } => {
                if self.failing_categories.lock().unwrap().contains(&entry.category) {
                    return Err(ServiceError::transient(format!(
                        "catalog rejected {}",
                        entry.category
                    )));
                }
                Ok(ServiceResponse::Ok)
            }
        }
    }
}

fn error_of(kind: ErrorKind, message: String) -> ServiceError {
    match kind {
        ErrorKind::Transient => ServiceError::transient(message),
        ErrorKind::Permanent => ServiceError::permanent(message),
        ErrorKind::InsufficientFunds => ServiceError::insufficient_funds(message),
    }
}

impl ServiceInterpreter for MockServices {
    type Error = ServiceError;

    fn interpret(
        &self,
        effect: ServiceEffect,
    ) -> impl Future<Output = Result<ServiceResponse, Self::Error>> + Send {
        let delay = match effect {
            ServiceEffect::FetchContent { .. } => *self.fetch_delay.lock().unwrap(),
            _ => None,
        };
        let result = self.respond(&effect);
        self.calls.lock().unwrap().push(effect);
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        }
    }
}

// ─── Engines ──────────────────────────────────────────────────────────────────

pub type TestEngine = Engine<MockProtocol, MockServices>;

pub fn test_engine() -> TestEngine {
    test_engine_on(Arc::new(MemoryStorage::new()), EngineConfig::default())
}

/// An engine over `storage`, as a process would open it after a restart.
pub fn test_engine_on(storage: Arc<dyn DocumentStorage>, config: EngineConfig) -> TestEngine {
    let ctx = EngineContext::open(storage, DEFAULT_PROCESSED_CAP).unwrap();
    Engine::new(
        Arc::new(ctx),
        MockProtocol::default(),
        MockServices::default(),
        config,
    )
}

// ─── Generators ───────────────────────────────────────────────────────────────

pub fn arb_category() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9-]{0,15}".prop_map(String::from)
}

pub fn arb_status_id() -> impl Strategy<Value = String> {
    "[1-9][0-9]{0,18}".prop_map(String::from)
}

pub fn arb_phase() -> impl Strategy<Value = JobPhase> {
    prop_oneof![
        Just(JobPhase::Requested),
        Just(JobPhase::Negotiating),
        Just(JobPhase::Paid),
        Just(JobPhase::Evaluating),
        Just(JobPhase::Completed),
        Just(JobPhase::Rejected),
        Just(JobPhase::Expired),
    ]
}
