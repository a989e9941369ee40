//! Deterministic pipeline tests over in-memory fakes.
//!
//! The submitter and worker are exercised through the same seam traits the
//! production clients implement, so the full submit → queue → worker →
//! storage flow runs without Postgres, Redis, or the inference service.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use photomatte::models::image::{ImageJob, JobStatus, NewImageJob};
use photomatte::pipeline::submit::{NewSubmission, SubmitError, Submitter};
use photomatte::pipeline::worker::{Worker, WorkerConfig};
use photomatte::pipeline::{BackgroundRemover, BlobStore, BoxError, JobStore, MessageQueue};
use photomatte::services::queue::{Delivery, JobMessage};

const MAX_BYTES: usize = 10 * 1024 * 1024;
const MAX_DELIVERIES: u32 = 3;
const MATTED: &[u8] = b"matted-png-bytes";

/// Just the PNG magic header plus padding; format sniffing only reads the
/// magic bytes.
fn png_bytes() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0u8; 64]);
    bytes
}

#[derive(Default)]
struct MemoryBlobStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryBlobStore {
    fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(bytes, _)| bytes.clone())
    }

    fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    fn insert(&self, key: &str, bytes: Vec<u8>, content_type: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (bytes, content_type.to_string()));
    }
}

impl BlobStore for MemoryBlobStore {
    async fn put_object(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), BoxError> {
        self.insert(key, bytes.to_vec(), content_type);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, BoxError> {
        self.object(key)
            .ok_or_else(|| format!("no object at {key}").into())
    }
}

#[derive(Default)]
struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, ImageJob>>,
    logs: Mutex<Vec<(String, String, Option<Uuid>)>>,
    /// When non-zero, that many upcoming inserts fail.
    failing_inserts: AtomicU32,
}

impl MemoryJobStore {
    fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    fn status_of(&self, id: Uuid) -> Option<JobStatus> {
        self.jobs.lock().unwrap().get(&id).map(|j| j.status)
    }

    fn log_count(&self) -> usize {
        self.logs.lock().unwrap().len()
    }

    fn fail_next_inserts(&self, count: u32) {
        self.failing_inserts.store(count, Ordering::SeqCst);
    }
}

impl JobStore for MemoryJobStore {
    async fn insert_job(&self, new: &NewImageJob) -> Result<ImageJob, BoxError> {
        if self.failing_inserts.load(Ordering::SeqCst) > 0 {
            self.failing_inserts.fetch_sub(1, Ordering::SeqCst);
            return Err("record store unavailable".into());
        }

        let now = Utc::now();
        let job = ImageJob {
            id: new.id,
            owner_id: new.owner_id.clone(),
            display_name: new.display_name.clone(),
            original_key: new.original_key.clone(),
            processed_key: new.processed_key.clone(),
            status: JobStatus::Processing,
            created_at: now,
            updated_at: now,
        };
        self.jobs.lock().unwrap().insert(new.id, job.clone());
        Ok(job)
    }

    async fn set_status(&self, id: Uuid, status: JobStatus) -> Result<(), BoxError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&id) {
            // Completed is terminal, matching the store's SQL guard.
            if job.status != JobStatus::Completed {
                job.status = status;
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn append_log(
        &self,
        owner_id: &str,
        description: &str,
        image_id: Option<Uuid>,
    ) -> Result<(), BoxError> {
        self.logs.lock().unwrap().push((
            owner_id.to_string(),
            description.to_string(),
            image_id,
        ));
        Ok(())
    }
}

/// VecDeque-backed queue with explicit visibility bookkeeping. Received
/// messages sit in-flight until acknowledged; `expire_visibility` plays
/// the role of the visibility window lapsing, returning unacknowledged
/// messages for redelivery or parking exhausted ones in the DLQ.
struct MemoryQueue {
    ready: Mutex<VecDeque<(String, JobMessage, u32)>>,
    in_flight: Mutex<HashMap<String, (JobMessage, u32)>>,
    dead_letters: Mutex<Vec<JobMessage>>,
    next_id: AtomicUsize,
    max_deliveries: u32,
}

impl MemoryQueue {
    fn new(max_deliveries: u32) -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(HashMap::new()),
            dead_letters: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            max_deliveries,
        }
    }

    fn expire_visibility(&self) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let mut ready = self.ready.lock().unwrap();
        let mut dead = self.dead_letters.lock().unwrap();

        for (receipt, (message, delivered)) in in_flight.drain() {
            if delivered >= self.max_deliveries {
                dead.push(message);
            } else {
                ready.push_back((receipt, message, delivered));
            }
        }
    }

    fn ready_count(&self) -> usize {
        self.ready.lock().unwrap().len()
    }

    fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    fn dead_letter_count(&self) -> usize {
        self.dead_letters.lock().unwrap().len()
    }

    fn first_ready(&self) -> Option<JobMessage> {
        self.ready
            .lock()
            .unwrap()
            .front()
            .map(|(_, message, _)| message.clone())
    }
}

impl MessageQueue for MemoryQueue {
    async fn send(&self, message: &JobMessage) -> Result<(), BoxError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.ready
            .lock()
            .unwrap()
            .push_back((format!("m-{id}"), message.clone(), 0));
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, BoxError> {
        let popped = self.ready.lock().unwrap().pop_front();
        match popped {
            Some((receipt, message, delivered)) => {
                let delivery_count = delivered + 1;
                self.in_flight
                    .lock()
                    .unwrap()
                    .insert(receipt.clone(), (message.clone(), delivery_count));
                Ok(Some(Delivery {
                    message,
                    receipt_handle: receipt,
                    delivery_count,
                }))
            }
            None => Ok(None),
        }
    }

    async fn acknowledge(&self, receipt_handle: &str) -> Result<(), BoxError> {
        self.in_flight.lock().unwrap().remove(receipt_handle);
        Ok(())
    }
}

/// Fails the first `failing` calls, then succeeds forever.
struct FlakyEngine {
    failures_remaining: AtomicU32,
    calls: AtomicU32,
}

impl FlakyEngine {
    fn failing(failures: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    fn reliable() -> Self {
        Self::failing(0)
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BackgroundRemover for FlakyEngine {
    async fn remove_background(&self, _image: &[u8], _mime_type: &str) -> Result<Vec<u8>, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failures_remaining.load(Ordering::SeqCst) > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err("inference backend unavailable".into());
        }
        Ok(MATTED.to_vec())
    }
}

fn submitter<'a>(
    blobs: &'a MemoryBlobStore,
    records: &'a MemoryJobStore,
    queue: &'a MemoryQueue,
) -> Submitter<&'a MemoryBlobStore, &'a MemoryJobStore, &'a MemoryQueue> {
    Submitter::new(blobs, records, queue, MAX_BYTES)
}

fn worker<'a>(
    queue: &'a MemoryQueue,
    blobs: &'a MemoryBlobStore,
    records: &'a MemoryJobStore,
    engine: &'a FlakyEngine,
) -> Worker<&'a MemoryQueue, &'a MemoryBlobStore, &'a MemoryJobStore, &'a FlakyEngine> {
    Worker::new(
        queue,
        blobs,
        records,
        engine,
        WorkerConfig {
            max_deliveries: MAX_DELIVERIES,
            max_object_bytes: MAX_BYTES,
        },
    )
}

async fn submit_png(
    blobs: &MemoryBlobStore,
    records: &MemoryJobStore,
    queue: &MemoryQueue,
) -> ImageJob {
    submitter(blobs, records, queue)
        .submit(NewSubmission {
            owner_id: "u1",
            display_name: "cat",
            mime_type: "image/png",
            bytes: &png_bytes(),
        })
        .await
        .expect("submission failed")
}

#[tokio::test]
async fn submission_creates_one_record_and_one_message() {
    let blobs = MemoryBlobStore::default();
    let records = MemoryJobStore::default();
    let queue = MemoryQueue::new(MAX_DELIVERIES);

    let job = submit_png(&blobs, &records, &queue).await;

    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.owner_id, "u1");
    assert_eq!(records.job_count(), 1);
    assert_eq!(queue.ready_count(), 1);

    let message = queue.first_ready().unwrap();
    assert_eq!(message.image_id, job.id);
    assert_eq!(message.original_key, job.original_key);
    assert_eq!(message.processed_key, job.processed_key);
    assert_eq!(message.mime_type, "image/png");

    // Original bytes landed before anything else.
    assert_eq!(blobs.object(&job.original_key).unwrap(), png_bytes());
    assert_eq!(records.log_count(), 1);
}

#[tokio::test]
async fn record_insert_failure_prevents_enqueue() {
    let blobs = MemoryBlobStore::default();
    let records = MemoryJobStore::default();
    let queue = MemoryQueue::new(MAX_DELIVERIES);
    records.fail_next_inserts(1);

    let result = submitter(&blobs, &records, &queue)
        .submit(NewSubmission {
            owner_id: "u1",
            display_name: "cat",
            mime_type: "image/png",
            bytes: &png_bytes(),
        })
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, SubmitError::Infrastructure(_)));
    assert!(!err.is_validation());

    // The record write must precede the enqueue: no message was left
    // referencing a record that does not exist.
    assert_eq!(queue.ready_count(), 0);
    assert_eq!(records.job_count(), 0);
}

#[tokio::test]
async fn invalid_mime_rejected_before_any_write() {
    let blobs = MemoryBlobStore::default();
    let records = MemoryJobStore::default();
    let queue = MemoryQueue::new(MAX_DELIVERIES);

    let result = submitter(&blobs, &records, &queue)
        .submit(NewSubmission {
            owner_id: "u1",
            display_name: "notes",
            mime_type: "text/plain",
            bytes: b"hello",
        })
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, SubmitError::UnsupportedMediaType(_)));
    assert!(err.is_validation());

    assert_eq!(records.job_count(), 0);
    assert_eq!(queue.ready_count(), 0);
    assert_eq!(blobs.object_count(), 0);
    assert_eq!(records.log_count(), 0);
}

#[tokio::test]
async fn oversize_payload_rejected_before_any_write() {
    let blobs = MemoryBlobStore::default();
    let records = MemoryJobStore::default();
    let queue = MemoryQueue::new(MAX_DELIVERIES);

    let mut bytes = png_bytes();
    bytes.resize(64, 0);
    let result = Submitter::new(&blobs, &records, &queue, 16)
        .submit(NewSubmission {
            owner_id: "u1",
            display_name: "big",
            mime_type: "image/png",
            bytes: &bytes,
        })
        .await;

    assert!(matches!(
        result.unwrap_err(),
        SubmitError::PayloadTooLarge { limit: 16 }
    ));
    assert_eq!(blobs.object_count(), 0);
    assert_eq!(queue.ready_count(), 0);
}

#[tokio::test]
async fn declared_mime_must_match_magic_bytes() {
    let blobs = MemoryBlobStore::default();
    let records = MemoryJobStore::default();
    let queue = MemoryQueue::new(MAX_DELIVERIES);

    let result = submitter(&blobs, &records, &queue)
        .submit(NewSubmission {
            owner_id: "u1",
            display_name: "fake",
            mime_type: "image/png",
            bytes: b"GIF89a not actually a png",
        })
        .await;

    assert!(matches!(result.unwrap_err(), SubmitError::MimeMismatch));
    assert_eq!(blobs.object_count(), 0);
}

#[tokio::test]
async fn first_attempt_success_completes_and_acknowledges() {
    let blobs = MemoryBlobStore::default();
    let records = MemoryJobStore::default();
    let queue = MemoryQueue::new(MAX_DELIVERIES);
    let engine = FlakyEngine::reliable();

    let job = submit_png(&blobs, &records, &queue).await;
    let worker = worker(&queue, &blobs, &records, &engine);

    assert!(worker.poll_once().await.unwrap());

    assert_eq!(records.status_of(job.id), Some(JobStatus::Completed));
    assert_eq!(blobs.object(&job.processed_key).unwrap(), MATTED);

    // Acknowledged: nothing left to redeliver.
    assert_eq!(queue.ready_count(), 0);
    assert_eq!(queue.in_flight_count(), 0);
    queue.expire_visibility();
    assert!(!worker.poll_once().await.unwrap());

    // Submission log plus completion log.
    assert_eq!(records.log_count(), 2);
}

#[tokio::test]
async fn two_failures_then_success_ends_completed() {
    let blobs = MemoryBlobStore::default();
    let records = MemoryJobStore::default();
    let queue = MemoryQueue::new(MAX_DELIVERIES);
    let engine = FlakyEngine::failing(2);

    let job = submit_png(&blobs, &records, &queue).await;
    let worker = worker(&queue, &blobs, &records, &engine);

    // Attempts one and two fail: status goes provisional-failed, message
    // stays unacknowledged and comes back after the visibility window.
    for _ in 0..2 {
        assert!(worker.poll_once().await.unwrap());
        assert_eq!(records.status_of(job.id), Some(JobStatus::Failed));
        assert_eq!(queue.in_flight_count(), 1);
        queue.expire_visibility();
        assert_eq!(queue.ready_count(), 1);
    }

    // Third delivery succeeds and overwrites the provisional failure.
    assert!(worker.poll_once().await.unwrap());
    assert_eq!(records.status_of(job.id), Some(JobStatus::Completed));
    assert_eq!(blobs.object(&job.processed_key).unwrap(), MATTED);
    assert_eq!(queue.in_flight_count(), 0);
    assert_eq!(queue.dead_letter_count(), 0);
    assert_eq!(engine.call_count(), 3);
}

#[tokio::test]
async fn exhausted_deliveries_dead_letter_and_stay_failed() {
    let blobs = MemoryBlobStore::default();
    let records = MemoryJobStore::default();
    let queue = MemoryQueue::new(MAX_DELIVERIES);
    let engine = FlakyEngine::failing(u32::MAX);

    let job = submit_png(&blobs, &records, &queue).await;
    let worker = worker(&queue, &blobs, &records, &engine);

    for _ in 0..MAX_DELIVERIES {
        assert!(worker.poll_once().await.unwrap());
        queue.expire_visibility();
    }

    // No fourth delivery: the queue escalated instead.
    assert!(!worker.poll_once().await.unwrap());
    assert_eq!(queue.dead_letter_count(), 1);
    assert_eq!(records.status_of(job.id), Some(JobStatus::Failed));
    assert_eq!(engine.call_count(), MAX_DELIVERIES);
    assert!(blobs.object(&job.processed_key).is_none());
}

#[tokio::test]
async fn duplicate_delivery_is_idempotent() {
    let blobs = MemoryBlobStore::default();
    let records = MemoryJobStore::default();
    let queue = MemoryQueue::new(MAX_DELIVERIES);
    let engine = FlakyEngine::reliable();

    let job = submit_png(&blobs, &records, &queue).await;
    let worker = worker(&queue, &blobs, &records, &engine);

    assert!(worker.poll_once().await.unwrap());
    let objects_after_first = blobs.object_count();

    // At-least-once delivery: the same payload arrives again.
    let duplicate = JobMessage {
        image_id: job.id,
        user_id: job.owner_id.clone(),
        image_name: job.display_name.clone(),
        original_key: job.original_key.clone(),
        processed_key: job.processed_key.clone(),
        mime_type: "image/png".to_string(),
    };
    queue.send(&duplicate).await.unwrap();
    assert!(worker.poll_once().await.unwrap());

    // Same key, same record: nothing new was created.
    assert_eq!(blobs.object_count(), objects_after_first);
    assert_eq!(records.job_count(), 1);
    assert_eq!(records.status_of(job.id), Some(JobStatus::Completed));
}

#[tokio::test]
async fn oversized_stored_object_fails_processing() {
    let blobs = MemoryBlobStore::default();
    let records = MemoryJobStore::default();
    let queue = MemoryQueue::new(MAX_DELIVERIES);
    let engine = FlakyEngine::reliable();

    let job = submit_png(&blobs, &records, &queue).await;
    // The stored original grew past the processing cap (e.g. overwritten
    // through the direct-upload path).
    let oversized = vec![0u8; 32];
    blobs.insert(&job.original_key, oversized, "image/png");

    let worker = Worker::new(
        &queue,
        &blobs,
        &records,
        &engine,
        WorkerConfig {
            max_deliveries: MAX_DELIVERIES,
            max_object_bytes: 16,
        },
    );

    assert!(worker.poll_once().await.unwrap());
    assert_eq!(records.status_of(job.id), Some(JobStatus::Failed));
    assert_eq!(engine.call_count(), 0);
    assert_eq!(queue.in_flight_count(), 1);
}

#[tokio::test]
async fn run_stops_on_signal_between_iterations() {
    let blobs = MemoryBlobStore::default();
    let records = MemoryJobStore::default();
    let queue = MemoryQueue::new(MAX_DELIVERIES);
    let engine = FlakyEngine::reliable();

    let worker = worker(&queue, &blobs, &records, &engine);

    let (stop_tx, stop_rx) = watch::channel(false);
    stop_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(1), worker.run(stop_rx))
        .await
        .expect("worker did not stop on signal");
}
