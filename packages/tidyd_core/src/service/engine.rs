//! Seam to the text generation engine plus the host that serializes access
//! to it. Engines are swappable; everything above this module only sees
//! [`EngineHost`].

use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::service::history::{ConversationHistory, Turn};
use tidyd_proto::{ENGINE_ERROR_DOMAIN, MarshaledError};

#[derive(Debug)]
pub enum GenerationError {
    ModelNotFound,
    ModelNotInitialized,
    Failed(String),
}

impl Display for GenerationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationError::ModelNotFound => write!(f, "model not found"),
            GenerationError::ModelNotInitialized => write!(f, "model not initialized"),
            GenerationError::Failed(reason) => write!(f, "generation failed: {}", reason),
        }
    }
}

impl std::error::Error for GenerationError {}

impl From<&GenerationError> for MarshaledError {
    fn from(error: &GenerationError) -> Self {
        let code = match error {
            GenerationError::ModelNotFound => 1,
            GenerationError::ModelNotInitialized => 2,
            GenerationError::Failed(_) => 3,
        };
        MarshaledError::new(ENGINE_ERROR_DOMAIN, code, error.to_string())
    }
}

/// A text generation engine. Implementations are not assumed to tolerate
/// concurrent calls; [`EngineHost`] guarantees one generation at a time.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// One-shot completion for `prompt` given the prior conversation.
    async fn generate(&self, prompt: &str, history: &[Turn]) -> Result<String, GenerationError>;

    /// Streamed completion. Chunks go to `chunks` in production order; the
    /// returned result is the terminal signal and always comes after the
    /// last chunk.
    async fn generate_stream(
        &self,
        prompt: &str,
        history: &[Turn],
        chunks: mpsc::Sender<String>,
    ) -> Result<(), GenerationError>;
}

/// Deterministic stand-in engine that repeats the prompt back, streamed
/// word by word. Default engine for development builds.
pub struct EchoEngine;

#[async_trait]
impl GenerationEngine for EchoEngine {
    async fn generate(&self, prompt: &str, _history: &[Turn]) -> Result<String, GenerationError> {
        Ok(prompt.to_string())
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _history: &[Turn],
        chunks: mpsc::Sender<String>,
    ) -> Result<(), GenerationError> {
        for piece in prompt.split_inclusive(' ') {
            if chunks.send(piece.to_string()).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

struct HostInner {
    engine: Box<dyn GenerationEngine>,
    history: ConversationHistory,
}

/// Serialization point in front of the engine. Overlapping requests queue
/// here instead of reaching the engine concurrently, and the shared
/// conversation history only records exchanges that completed.
pub struct EngineHost {
    inner: Mutex<HostInner>,
}

impl EngineHost {
    pub fn new(engine: Box<dyn GenerationEngine>, max_history_pairs: usize) -> Self {
        EngineHost {
            inner: Mutex::new(HostInner {
                engine,
                history: ConversationHistory::new(max_history_pairs),
            }),
        }
    }

    /// Chat request: generation with history, recorded on success.
    pub async fn chat(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut inner = self.inner.lock().await;
        let HostInner { engine, history } = &mut *inner;

        let reply = engine.generate(prompt, history.turns()).await?;
        history.record(prompt, &reply);
        Ok(reply)
    }

    /// Streaming chat request. Chunks are forwarded as they are produced
    /// and the assembled reply is recorded on success. If the receiver goes
    /// away mid-stream the generation still runs to completion.
    pub async fn chat_stream(
        &self,
        prompt: &str,
        chunks: mpsc::Sender<String>,
    ) -> Result<(), GenerationError> {
        let mut inner = self.inner.lock().await;
        let HostInner { engine, history } = &mut *inner;

        let (tee, mut collect) = mpsc::channel::<String>(32);
        let mut reply = String::new();

        let forward = async {
            while let Some(chunk) = collect.recv().await {
                reply.push_str(&chunk);
                let _ = chunks.send(chunk).await;
            }
        };

        let (result, ()) =
            tokio::join!(engine.generate_stream(prompt, history.turns(), tee), forward);
        result?;

        history.record(prompt, &reply);
        Ok(())
    }

    /// One-shot utility call (file naming and the like): no history in, no
    /// history recorded.
    pub async fn suggest(&self, prompt: &str) -> Result<String, GenerationError> {
        let inner = self.inner.lock().await;
        inner.engine.generate(prompt, &[]).await
    }

    pub async fn history(&self) -> Vec<Turn> {
        self.inner.lock().await.history.turns().to_vec()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    struct FlakyEngine {
        fail: AtomicBool,
    }

    #[async_trait]
    impl GenerationEngine for FlakyEngine {
        async fn generate(&self, prompt: &str, _: &[Turn]) -> Result<String, GenerationError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(GenerationError::Failed("backend offline".to_string()));
            }
            Ok(format!("re: {}", prompt))
        }

        async fn generate_stream(
            &self,
            prompt: &str,
            history: &[Turn],
            chunks: mpsc::Sender<String>,
        ) -> Result<(), GenerationError> {
            let reply = self.generate(prompt, history).await?;
            let _ = chunks.send(reply).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_exchanges_are_not_recorded() {
        let host = EngineHost::new(
            Box::new(FlakyEngine { fail: AtomicBool::new(true) }),
            10,
        );

        assert!(host.chat("first").await.is_err());
        assert!(host.history().await.is_empty());
    }

    #[tokio::test]
    async fn successful_exchanges_accumulate() {
        let engine = FlakyEngine { fail: AtomicBool::new(false) };
        let host = EngineHost::new(Box::new(engine), 10);

        host.chat("first").await.unwrap();
        host.chat("second").await.unwrap();

        let history = host.history().await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "first");
        assert_eq!(history[3].content, "re: second");
    }

    #[tokio::test]
    async fn streamed_reply_is_recorded_whole() {
        let host = EngineHost::new(Box::new(EchoEngine), 10);
        let (tx, mut rx) = mpsc::channel(8);

        host.chat_stream("Hello streaming world", tx).await.unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(chunks, vec!["Hello ", "streaming ", "world"]);

        let history = host.history().await;
        assert_eq!(history[1].content, "Hello streaming world");
    }

    struct NoOverlapEngine {
        in_flight: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl GenerationEngine for NoOverlapEngine {
        async fn generate(&self, prompt: &str, _: &[Turn]) -> Result<String, GenerationError> {
            let active = self.in_flight.fetch_add(1, Ordering::SeqCst);
            assert_eq!(active, 0, "engine saw overlapping generations");

            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(prompt.to_string())
        }

        async fn generate_stream(
            &self,
            prompt: &str,
            history: &[Turn],
            chunks: mpsc::Sender<String>,
        ) -> Result<(), GenerationError> {
            let reply = self.generate(prompt, history).await?;
            let _ = chunks.send(reply).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn overlapping_requests_queue() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let host = Arc::new(EngineHost::new(
            Box::new(NoOverlapEngine { in_flight: in_flight.clone() }),
            10,
        ));

        let mut handles = Vec::new();
        for i in 0..4 {
            let host = host.clone();
            handles.push(tokio::spawn(async move {
                host.chat(&format!("prompt {}", i)).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(host.history().await.len(), 8);
    }

    #[tokio::test]
    async fn suggest_does_not_touch_history() {
        let host = EngineHost::new(Box::new(EchoEngine), 10);

        host.suggest("name this file").await.unwrap();
        assert!(host.history().await.is_empty());
    }
}
