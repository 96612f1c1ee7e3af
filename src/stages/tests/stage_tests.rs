use super::*;
use crate::bus::{Bus, InMemoryBus};
use crate::domain::{ContextId, WorkflowId};
use crate::protocol::TopicNames;
use crate::publisher::RetryPolicy;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct Echo;

#[async_trait]
impl StageHandler for Echo {
    fn role(&self) -> StageRole {
        StageRole::Weather
    }

    async fn handle(&self, task: &Message) -> anyhow::Result<Map<String, Value>> {
        let mut out = Map::new();
        out.insert("seen".into(), json!(task.payload.get("destination")));
        Ok(out)
    }
}

struct Broken;

#[async_trait]
impl StageHandler for Broken {
    fn role(&self) -> StageRole {
        StageRole::Flight
    }

    async fn handle(&self, _task: &Message) -> anyhow::Result<Map<String, Value>> {
        anyhow::bail!("supplier offline")
    }
}

/// Tracks how many calls overlap.
#[derive(Default)]
struct Slow {
    running: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl StageHandler for Slow {
    fn role(&self) -> StageRole {
        StageRole::Hotel
    }

    async fn handle(&self, _task: &Message) -> anyhow::Result<Map<String, Value>> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(Map::new())
    }
}

fn publisher(bus: Arc<InMemoryBus>, stage: StageRole) -> ReliablePublisher {
    ReliablePublisher::new(
        bus,
        TopicNames::default(),
        RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        },
        Role::Stage(stage),
    )
}

fn task_for(stage: StageRole, n: usize) -> Message {
    let mut payload = Map::new();
    payload.insert("destination".into(), json!("Goa"));
    Message::task(
        stage,
        ContextId::from("ctx"),
        WorkflowId::from(format!("wf_ctx_{}", n)),
        payload,
    )
}

fn results(bus: &InMemoryBus) -> Vec<Message> {
    bus.records(&TopicNames::default().for_role(&Role::Orchestrator))
        .iter()
        .map(|r| r.decode::<Message>().unwrap())
        .collect()
}

fn fast_poll() -> PollSettings {
    PollSettings {
        max_batch: 10,
        block: Duration::from_millis(20),
        error_backoff: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_result_goes_to_orchestrator_with_workflow_id() {
    let bus = Arc::new(InMemoryBus::new());
    let worker = StageWorker::new(Arc::new(Echo), publisher(bus.clone(), StageRole::Weather), 2);

    let result = worker.process(task_for(StageRole::Weather, 1)).await.unwrap();
    assert_eq!(result.kind, MessageKind::Result);
    assert_eq!(result.sender, Role::Stage(StageRole::Weather));
    assert_eq!(result.workflow_id, Some(WorkflowId::from("wf_ctx_1")));
    assert_eq!(result.payload["workflow_id"], "wf_ctx_1");
    assert_eq!(result.payload["seen"], "Goa");

    assert_eq!(results(&bus), vec![result]);
}

#[tokio::test]
async fn test_handler_error_becomes_failed_result() {
    let bus = Arc::new(InMemoryBus::new());
    let worker = StageWorker::new(Arc::new(Broken), publisher(bus.clone(), StageRole::Flight), 1);

    let result = worker.process(task_for(StageRole::Flight, 1)).await.unwrap();
    assert_eq!(result.payload["success"], false);
    assert_eq!(result.payload["status"], "failed");
    assert_eq!(result.payload["error"], "supplier offline");
    assert_eq!(results(&bus).len(), 1);
}

#[tokio::test]
async fn test_messages_for_other_stages_are_skipped() {
    let bus = Arc::new(InMemoryBus::new());
    let worker = StageWorker::new(Arc::new(Echo), publisher(bus.clone(), StageRole::Weather), 1);

    assert!(worker.process(task_for(StageRole::Hotel, 1)).await.is_none());

    let mut not_a_task = task_for(StageRole::Weather, 2);
    not_a_task.kind = MessageKind::Result;
    assert!(worker.process(not_a_task).await.is_none());

    assert!(results(&bus).is_empty());
}

#[tokio::test]
async fn test_spawned_worker_answers_tasks_on_the_bus() {
    let bus = Arc::new(InMemoryBus::new());
    let pubr = publisher(bus.clone(), StageRole::Weather);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = spawn_stage_workers(vec![Arc::new(Echo)], &pubr, 2, fast_poll(), shutdown_rx)
        .await
        .unwrap();

    let topic = TopicNames::default().for_stage(StageRole::Weather);
    bus.publish(&topic, &task_for(StageRole::Weather, 7)).await.unwrap();

    for _ in 0..200 {
        if !results(&bus).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let answered = results(&bus);
    assert_eq!(answered.len(), 1);
    assert_eq!(answered[0].workflow_id, Some(WorkflowId::from("wf_ctx_7")));

    shutdown_tx.send(true).unwrap();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should stop")
            .unwrap();
    }
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let bus = Arc::new(InMemoryBus::new());
    let slow = Arc::new(Slow::default());
    let worker = StageWorker::new(slow.clone(), publisher(bus.clone(), StageRole::Hotel), 2);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = worker.spawn(fast_poll(), shutdown_rx).await.unwrap();

    let topic = TopicNames::default().for_stage(StageRole::Hotel);
    for n in 0..6 {
        bus.publish(&topic, &task_for(StageRole::Hotel, n)).await.unwrap();
    }

    for _ in 0..300 {
        if results(&bus).len() == 6 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(results(&bus).len(), 6);
    assert!(slow.peak.load(Ordering::SeqCst) <= 2);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
