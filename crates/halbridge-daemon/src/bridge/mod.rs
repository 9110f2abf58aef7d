//! Chat-to-MegaHAL bridge.
//!
//! A single task owns every piece of mutable state: the response
//! correlator, the checkpoint scheduler, the nickname cache and the
//! subprocess handle. Chat events, subprocess output and the shutdown
//! signal are processed one at a time, so ordering alone keeps requests and
//! replies paired.

mod types;

pub use types::{BridgeError, BridgeSummary, PendingReply};

use halbridge_core::config::Config;
use halbridge_core::greeting::pick_greeting;
use halbridge_core::names::NAMES_KEY;
use halbridge_core::text::strip_formatting;
use halbridge_core::{
    Admission, AdmissionHeuristics, CheckpointScheduler, ControlCommand, NameCache,
    ResponseCorrelator, sanitize,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::chat::{ChatEvent, Outbound};
use crate::storage::KeyValueStore;
use crate::subprocess::{OutputEvent, ProcessHandle};

/// The bridge event loop state.
pub struct Bridge<S> {
    process: ProcessHandle,
    correlator: ResponseCorrelator<PendingReply>,
    checkpoint: CheckpointScheduler,
    admission: AdmissionHeuristics,
    names: NameCache,
    store: S,
    bot_nick: String,
    learning_replies: bool,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    rng: StdRng,
    #[cfg(feature = "metrics")]
    metrics: halbridge_core::metrics::BridgeMetrics,
}

impl<S: KeyValueStore> Bridge<S> {
    /// Create a bridge, loading the nickname cache from `store`.
    pub async fn new(
        config: &Config,
        process: ProcessHandle,
        store: S,
        outbound_tx: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        let names = load_names(&store).await;
        info!(known_names = names.len(), "Loaded nickname cache");

        Self {
            process,
            correlator: ResponseCorrelator::new(
                config.correlation.order,
                config.correlation.pending_warn_threshold,
            ),
            checkpoint: CheckpointScheduler::new(config.learning.checkpoint_interval),
            admission: AdmissionHeuristics::new(config.learning.min_message_length),
            names,
            store,
            bot_nick: config.bot.nickname.clone(),
            learning_replies: config.learning.learning_replies,
            outbound_tx,
            rng: StdRng::seed_from_u64(rand::random()),
            #[cfg(feature = "metrics")]
            metrics: halbridge_core::metrics::BridgeMetrics::new(),
        }
    }

    /// Replace the greeting random source.
    #[must_use]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub const fn names(&self) -> &NameCache {
        &self.names
    }

    /// Sends since the last checkpoint.
    pub const fn messages_since_checkpoint(&self) -> u32 {
        self.checkpoint.counter()
    }

    pub fn outstanding(&self) -> usize {
        self.correlator.outstanding()
    }

    /// Process events until shutdown, end of chat input, or subprocess exit.
    ///
    /// The subprocess itself is not stopped here; the caller owns the
    /// supervisor and quits it afterwards.
    pub async fn run(
        mut self,
        mut chat_rx: mpsc::Receiver<ChatEvent>,
        mut output_rx: mpsc::Receiver<OutputEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<BridgeSummary, BridgeError> {
        info!(bot = %self.bot_nick, order = ?self.correlator.order(), "Bridge running");

        loop {
            tokio::select! {
                biased;
                Ok(()) = shutdown.changed() => {
                    info!("Bridge shutdown requested");
                    break;
                }
                event = output_rx.recv() => match event {
                    Some(OutputEvent::Data(bytes)) => self.handle_output(&bytes),
                    Some(OutputEvent::Closed) | None => {
                        let stats = self.correlator.stats();
                        warn!(outstanding = stats.outstanding, "Subprocess closed its output");
                        return Err(BridgeError::SubprocessExited);
                    }
                },
                event = chat_rx.recv() => match event {
                    Some(event) => self.handle_chat(event).await,
                    None => {
                        info!("Chat input ended");
                        break;
                    }
                },
            }
        }

        let abandoned = self.correlator.abandon();
        if abandoned > 0 {
            warn!(abandoned, "Abandoning pending responses");
        }
        Ok(BridgeSummary {
            stats: self.correlator.stats(),
            abandoned,
            checkpoints: self.checkpoint.checkpoints(),
        })
    }

    /// Handle one chat network event.
    pub async fn handle_chat(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::Message {
                user,
                channel,
                text,
            } => self.handle_message(user, channel, &text),
            ChatEvent::UserEntered { channel, user } => {
                if self.names.insert(user.clone()) {
                    self.persist_names().await;
                }
                let greeting = pick_greeting(&mut self.rng);
                debug!(%channel, %user, greeting, "Greeting arriving user");
                self.tell(
                    greeting,
                    Some(PendingReply::Reply {
                        channel,
                        nick: user,
                    }),
                );
            }
            ChatEvent::UserLeft { user, .. } | ChatEvent::UserQuit { user, .. } => {
                if self.names.remove(&user) {
                    self.persist_names().await;
                }
            }
            ChatEvent::RosterSync { channel, users } => {
                let added = self.names.extend(users);
                debug!(%channel, added, total = self.names.len(), "Roster synced");
                if added > 0 {
                    self.persist_names().await;
                }
            }
        }
    }

    fn handle_message(&mut self, user: String, channel: String, text: &str) {
        match self
            .admission
            .classify(&self.bot_nick, text, self.names.as_slice())
        {
            Admission::Direct(query) => {
                debug!(%user, %channel, "Direct query");
                self.tell(
                    &query,
                    Some(PendingReply::Reply {
                        channel,
                        nick: user,
                    }),
                );
            }
            Admission::Learn(message) => {
                debug!(message = %message, "Passively learning");
                let reply = self.learning_replies.then_some(PendingReply::Discard);
                self.tell(&message, reply);
            }
            Admission::Skip(reason) => {
                debug!(?reason, text, "Skipped message");
                #[cfg(feature = "metrics")]
                self.metrics.record_skip(reason);
            }
        }
    }

    /// Sanitize and send one payload; register `reply` if an answer is
    /// expected. Returns `false` if nothing was sent.
    fn tell(&mut self, message: &str, reply: Option<PendingReply>) -> bool {
        let payload = sanitize(message);
        if payload.is_empty() {
            debug!("Dropping payload that is empty after sanitizing");
            return false;
        }
        if let Err(e) = self.process.send(&payload) {
            warn!(error = %e, "Failed to send to subprocess");
            return false;
        }
        #[cfg(feature = "metrics")]
        self.metrics.record_send();

        // Checked before this payload's own handler is queued.
        if self.checkpoint.on_send(self.correlator.is_idle()) {
            info!("Saving brain");
            match self.process.send_command(ControlCommand::Save) {
                Ok(()) => {
                    #[cfg(feature = "metrics")]
                    self.metrics.record_checkpoint();
                }
                Err(e) => warn!(error = %e, "Failed to send save command"),
            }
        }

        if let Some(reply) = reply {
            self.correlator.register(reply);
        }
        true
    }

    /// Feed subprocess output and deliver completed replies.
    pub fn handle_output(&mut self, bytes: &[u8]) {
        #[cfg(feature = "metrics")]
        let before = self.correlator.stats();

        for dispatch in self.correlator.on_data(bytes) {
            let PendingReply::Reply { channel, nick } = dispatch.handler else {
                debug!(line = %dispatch.line, "Discarding reply to learning input");
                continue;
            };
            let response = strip_formatting(&dispatch.line);
            if response.is_empty() {
                debug!(%nick, "Subprocess gave an empty reply");
                continue;
            }
            let outbound = Outbound {
                channel,
                text: format!("{nick}: {response}"),
            };
            if self.outbound_tx.send(outbound).is_err() {
                warn!("Chat output closed, dropping reply");
            }
        }

        #[cfg(feature = "metrics")]
        self.record_output_metrics(before);
    }

    #[cfg(feature = "metrics")]
    fn record_output_metrics(&self, before: halbridge_core::CorrelatorStats) {
        let after = self.correlator.stats();
        self.metrics.record_output(
            after.dispatched - before.dispatched,
            after.unsolicited - before.unsolicited,
        );
    }

    async fn persist_names(&self) {
        let value = serde_json::json!(self.names.as_slice());
        if let Err(e) = self.store.set(NAMES_KEY, value).await {
            warn!(error = %e, "Failed to persist nickname cache");
        }
    }
}

async fn load_names<S: KeyValueStore>(store: &S) -> NameCache {
    match store.get(NAMES_KEY).await {
        Ok(Some(value)) => match serde_json::from_value::<Vec<String>>(value) {
            Ok(names) => NameCache::from_names(names),
            Err(e) => {
                warn!(error = %e, "Stored nickname cache is malformed, starting empty");
                NameCache::new()
            }
        },
        Ok(None) => NameCache::new(),
        Err(e) => {
            warn!(error = %e, "Failed to load nickname cache, starting empty");
            NameCache::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use halbridge_core::CorrelationOrder;
    use halbridge_core::greeting::GREETINGS;
    use serde_json::json;

    use super::*;
    use crate::storage::MemoryStore;
    use crate::subprocess::WriterCommand;

    struct Harness {
        bridge: Bridge<MemoryStore>,
        frames: mpsc::UnboundedReceiver<WriterCommand>,
        said: mpsc::UnboundedReceiver<Outbound>,
        store: MemoryStore,
    }

    impl Harness {
        async fn new(config: Config) -> Self {
            Self::with_store(config, MemoryStore::new()).await
        }

        async fn with_store(config: Config, store: MemoryStore) -> Self {
            let (process, frames) = ProcessHandle::detached();
            let (outbound_tx, said) = mpsc::unbounded_channel();
            let bridge = Bridge::new(&config, process, store.clone(), outbound_tx)
                .await
                .with_rng(StdRng::seed_from_u64(1));
            Self {
                bridge,
                frames,
                said,
                store,
            }
        }

        fn sent(&mut self) -> Vec<String> {
            let mut frames = Vec::new();
            while let Ok(command) = self.frames.try_recv() {
                if let WriterCommand::Frame(frame) = command {
                    frames.push(frame);
                }
            }
            frames
        }

        fn said(&mut self) -> Vec<Outbound> {
            std::iter::from_fn(|| self.said.try_recv().ok()).collect()
        }

        async fn message(&mut self, user: &str, text: &str) {
            self.bridge
                .handle_chat(ChatEvent::Message {
                    user: user.into(),
                    channel: "#lobby".into(),
                    text: text.into(),
                })
                .await;
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.bot.nickname = "hal".into();
        config
    }

    #[tokio::test]
    async fn direct_query_is_answered_to_speaker() {
        let mut h = Harness::new(config()).await;
        h.message("alice", "hal: how are you?").await;
        assert_eq!(h.sent(), vec!["how are you?\n\n"]);
        assert_eq!(h.bridge.outstanding(), 1);

        h.bridge.handle_output(b"I am \x02fine\x02");
        assert!(h.said().is_empty());
        h.bridge.handle_output(b", thanks\n");
        assert_eq!(
            h.said(),
            vec![Outbound {
                channel: "#lobby".into(),
                text: "alice: I am fine, thanks".into(),
            }]
        );
        assert_eq!(h.bridge.outstanding(), 0);
    }

    #[tokio::test]
    async fn injected_commands_never_reach_subprocess() {
        let mut h = Harness::new(config()).await;
        h.message("mallory", "hal: #QUIT").await;
        h.message("mallory", "this is a long line with #save inside").await;
        assert_eq!(h.sent(), vec!["this is a long line with  inside\n\n"]);
        assert_eq!(h.bridge.outstanding(), 0);
    }

    #[tokio::test]
    async fn passive_learning_follows_heuristics() {
        let mut h = Harness::new(config()).await;
        h.bridge
            .handle_chat(ChatEvent::RosterSync {
                channel: "#lobby".into(),
                users: vec!["alice".into(), "bob".into()],
            })
            .await;

        h.message("bob", "alice: did you see the game").await;
        h.message("bob", "short text!").await;
        h.message("bob", "!seen somebody important").await;
        h.message("bob", "read https://example.com today").await;
        h.message("bob", "what a lovely morning it is").await;

        assert_eq!(
            h.sent(),
            vec!["did you see the game\n\n", "what a lovely morning it is\n\n"]
        );
        assert_eq!(h.bridge.outstanding(), 0);
    }

    #[tokio::test]
    async fn learning_replies_are_consumed() {
        let mut config = config();
        config.learning.learning_replies = true;
        let mut h = Harness::new(config).await;

        h.message("bob", "what a lovely morning it is").await;
        h.message("alice", "hal: and you?").await;
        h.bridge.handle_output(b"mornings are lovely\nI am well\n");

        assert_eq!(
            h.said(),
            vec![Outbound {
                channel: "#lobby".into(),
                text: "alice: I am well".into(),
            }]
        );
    }

    #[tokio::test]
    async fn lifo_order_reproduces_legacy_pairing() {
        let mut config = config();
        config.correlation.order = CorrelationOrder::Lifo;
        let mut h = Harness::new(config).await;

        h.message("alice", "hal: first question").await;
        h.message("bob", "hal: second question").await;
        h.bridge.handle_output(b"answer one\nanswer two\n");

        let texts: Vec<String> = h.said().into_iter().map(|o| o.text).collect();
        assert_eq!(texts, vec!["bob: answer one", "alice: answer two"]);
    }

    #[tokio::test]
    async fn checkpoint_after_thirty_one_idle_sends() {
        let mut h = Harness::new(config()).await;
        for i in 0..31 {
            h.message("bob", &format!("this is learning line {i}")).await;
        }
        let sent = h.sent();
        assert_eq!(sent.len(), 32);
        assert_eq!(sent.iter().filter(|f| *f == "#save\n\n").count(), 1);
        assert_eq!(sent.last().map(String::as_str), Some("#save\n\n"));
        assert_eq!(h.bridge.messages_since_checkpoint(), 0);
    }

    #[tokio::test]
    async fn checkpoint_deferred_while_reply_pending() {
        let mut h = Harness::new(config()).await;
        h.message("alice", "hal: hold on").await;
        for i in 0..30 {
            h.message("bob", &format!("this is learning line {i}")).await;
        }
        assert!(!h.sent().iter().any(|f| f == "#save\n\n"));
        assert_eq!(h.bridge.messages_since_checkpoint(), 31);

        h.bridge.handle_output(b"ok\n");
        h.message("bob", "one more learning line").await;
        let sent = h.sent();
        assert_eq!(sent, vec!["one more learning line\n\n", "#save\n\n"]);
        assert_eq!(h.bridge.messages_since_checkpoint(), 0);
    }

    #[tokio::test]
    async fn arrival_greets_and_caches_user() {
        let mut h = Harness::new(config()).await;
        h.bridge
            .handle_chat(ChatEvent::UserEntered {
                channel: "#lobby".into(),
                user: "carol".into(),
            })
            .await;

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        let greeting = sent[0].trim_end();
        assert!(GREETINGS.contains(&greeting));
        assert!(h.bridge.names().contains("carol"));
        assert_eq!(h.store.snapshot(NAMES_KEY), Some(json!(["carol"])));

        h.bridge.handle_output(b"velkommen carol\n");
        assert_eq!(h.said()[0].text, "carol: velkommen carol");
    }

    #[tokio::test]
    async fn departures_update_persisted_names() {
        let store = MemoryStore::new();
        store.set(NAMES_KEY, json!(["alice", "bob"])).await.unwrap();
        let mut h = Harness::with_store(config(), store).await;
        assert_eq!(h.bridge.names().len(), 2);

        h.bridge
            .handle_chat(ChatEvent::UserLeft {
                channel: "#lobby".into(),
                user: "alice".into(),
            })
            .await;
        h.bridge
            .handle_chat(ChatEvent::UserQuit {
                channel: "#lobby".into(),
                user: "bob".into(),
            })
            .await;
        assert_eq!(h.store.snapshot(NAMES_KEY), Some(json!([])));
    }

    #[tokio::test]
    async fn run_stops_when_subprocess_exits() {
        let h = Harness::new(config()).await;
        let (_chat_tx, chat_rx) = mpsc::channel(4);
        let (output_tx, output_rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        output_tx.send(OutputEvent::Closed).await.unwrap();
        let result = h.bridge.run(chat_rx, output_rx, shutdown_rx).await;
        assert!(matches!(result, Err(BridgeError::SubprocessExited)));
    }

    #[tokio::test]
    async fn run_reports_abandoned_handlers_on_shutdown() {
        let h = Harness::new(config()).await;
        let (chat_tx, chat_rx) = mpsc::channel(4);
        let (_output_tx, output_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        chat_tx
            .send(ChatEvent::Message {
                user: "alice".into(),
                channel: "#lobby".into(),
                text: "hal: are you there".into(),
            })
            .await
            .unwrap();
        drop(chat_tx);

        let summary = h.bridge.run(chat_rx, output_rx, shutdown_rx).await.unwrap();
        assert_eq!(summary.abandoned, 1);
        assert_eq!(summary.stats.registered, 1);
        drop(shutdown_tx);
    }
}
