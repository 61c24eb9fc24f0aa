//! Response delivery pipeline.
//!
//! Every submitted turn runs on its own detached worker task. Workers push
//! [`StreamEvent`]s onto one bounded queue that the UI loop drains; they never
//! touch UI state directly. Events for one slot arrive in the order they were
//! produced, while events for different slots may interleave.

use crate::config::Config;
use crate::llm::{CompletionClient, LlmError};
use crate::message::{Message, StreamEvent};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the delivery queue. A full queue blocks producers.
pub const DELIVERY_QUEUE_CAPACITY: usize = 10;

/// Build the request for a turn: system prompt, prior transcript, new message.
pub fn build_request(system_prompt: &str, snapshot: Vec<Message>, user_text: String) -> Vec<Message> {
    let mut messages = Vec::with_capacity(snapshot.len() + 2);
    messages.push(Message::system(system_prompt));
    messages.extend(snapshot);
    messages.push(Message::user(user_text));
    messages
}

/// Spawns response workers and tracks the ones still in flight.
pub struct ResponsePipeline {
    client: Arc<dyn CompletionClient>,
    config: Arc<Config>,
    tx: mpsc::Sender<StreamEvent>,
    registry: HashMap<usize, CancellationToken>,
}

impl ResponsePipeline {
    /// Create a pipeline and the receiving end of its delivery queue.
    pub fn new(
        client: Arc<dyn CompletionClient>,
        config: Arc<Config>,
    ) -> (Self, mpsc::Receiver<StreamEvent>) {
        Self::with_capacity(client, config, DELIVERY_QUEUE_CAPACITY)
    }

    pub fn with_capacity(
        client: Arc<dyn CompletionClient>,
        config: Arc<Config>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let pipeline = Self {
            client,
            config,
            tx,
            registry: HashMap::new(),
        };
        (pipeline, rx)
    }

    /// Start a worker that fills slot `index` with the reply to `user_text`.
    ///
    /// `snapshot` is the transcript before this turn. Results arrive only
    /// through the delivery queue.
    pub fn submit(&mut self, snapshot: Vec<Message>, user_text: String, index: usize) {
        let messages = build_request(&self.config.system_prompt, snapshot, user_text);
        let token = CancellationToken::new();
        if let Some(previous) = self.registry.insert(index, token.clone()) {
            previous.cancel();
        }

        info!(
            index,
            context = messages.len(),
            streaming = self.config.stream,
            "Submitting turn"
        );

        let worker = Worker {
            client: Arc::clone(&self.client),
            model: self.config.model.clone(),
            streaming: self.config.stream,
            messages,
            index,
            tx: self.tx.clone(),
            token,
        };
        tokio::spawn(worker.run());
    }

    /// Ask the worker for `index` to stop. Returns false if none is running.
    pub fn cancel(&mut self, index: usize) -> bool {
        match self.registry.get(&index) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel the most recently submitted turn that is still running.
    ///
    /// Workers cancel their own token when they stop, so a finished turn whose
    /// terminal event has not been applied yet is skipped.
    pub fn cancel_latest(&mut self) -> Option<usize> {
        let index = self
            .registry
            .iter()
            .filter(|(_, token)| !token.is_cancelled())
            .map(|(index, _)| *index)
            .max()?;
        self.cancel(index);
        Some(index)
    }

    /// Cancel every worker, e.g. on shutdown.
    pub fn cancel_all(&mut self) {
        for token in self.registry.values() {
            token.cancel();
        }
        self.registry.clear();
    }

    /// Forget a worker once its terminal event has been applied.
    pub fn retire(&mut self, index: usize) {
        self.registry.remove(&index);
    }

    /// Number of submissions that have not delivered a terminal event yet.
    pub fn outstanding(&self) -> usize {
        self.registry.len()
    }
}

/// How a worker's delivery ended when it was not cancelled.
enum Delivery {
    Finished,
    /// The UI dropped the receiving end; nobody is listening any more.
    Disconnected,
}

struct Worker {
    client: Arc<dyn CompletionClient>,
    model: String,
    streaming: bool,
    messages: Vec<Message>,
    index: usize,
    tx: mpsc::Sender<StreamEvent>,
    token: CancellationToken,
}

impl Worker {
    async fn run(self) {
        let index = self.index;
        let outcome = tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            result = self.produce() => Some(result),
        };
        // Nothing runs for this slot any more, even if its terminal event is
        // still waiting in the queue.
        self.token.cancel();

        let terminal = match outcome {
            None => {
                debug!(index, "Turn cancelled");
                StreamEvent::cancelled(index)
            }
            Some(Ok(Delivery::Finished)) => {
                debug!(index, "Turn finished");
                StreamEvent::finished(index)
            }
            Some(Ok(Delivery::Disconnected)) => {
                debug!(index, "Delivery queue closed, dropping turn");
                return;
            }
            Some(Err(e)) => {
                warn!(index, backend = self.client.name(), error = %e, "Turn failed");
                StreamEvent::failed(index, e.to_string())
            }
        };

        // The receiver may already be gone on shutdown; that is fine.
        let _ = self.tx.send(terminal).await;
    }

    async fn produce(&self) -> Result<Delivery, LlmError> {
        if !self.streaming {
            let reply = self.client.complete(&self.model, &self.messages).await?;
            return Ok(self.deliver(reply.content).await);
        }

        let mut deltas = self.client.stream(&self.model, &self.messages).await?;
        let mut accumulated = String::new();
        while let Some(fragment) = deltas.next().await {
            accumulated.push_str(&fragment?);
            if let Delivery::Disconnected = self.deliver(accumulated.clone()).await {
                return Ok(Delivery::Disconnected);
            }
        }
        Ok(Delivery::Finished)
    }

    /// Push the text so far, waiting for room in the queue.
    async fn deliver(&self, accumulated: String) -> Delivery {
        match self.tx.send(StreamEvent::delta(self.index, accumulated)).await {
            Ok(()) => Delivery::Finished,
            Err(_) => Delivery::Disconnected,
        }
    }
}
