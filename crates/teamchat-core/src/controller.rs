//! Request lifecycle: at most one chat request in flight, cancellable, with the
//! reply rendered progressively.
//!
//! The controller itself never awaits. [`LifecycleController::start`] spawns a
//! turn task (transport, classifier, renderer) that reports back through a
//! channel of [`TurnEvent`]s; the owner feeds those into
//! [`LifecycleController::apply`]. Events of a turn that is no longer active are
//! dropped, so a stopped reply stops changing as soon as `stop` returns.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::attachment::{compose_message, Attachment};
use crate::classifier::{classify, AgentIdentity};
use crate::error::ChatError;
use crate::markup::Markup;
use crate::renderer::{Completion, ProgressiveRenderer, RenderSurface};
use crate::session::{SessionId, SessionStore};
use crate::state::MessageLog;
use crate::transport::Transport;

pub type TurnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Generating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Progress reported by a turn task
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Frame {
        turn: TurnId,
        identity: AgentIdentity,
        markup: Markup,
    },
    ScrollToEnd {
        turn: TurnId,
    },
    Failed {
        turn: TurnId,
        error: ChatError,
    },
    Finished {
        turn: TurnId,
        outcome: TurnOutcome,
    },
}

impl TurnEvent {
    pub fn turn(&self) -> TurnId {
        match self {
            TurnEvent::Frame { turn, .. }
            | TurnEvent::ScrollToEnd { turn }
            | TurnEvent::Failed { turn, .. }
            | TurnEvent::Finished { turn, .. } => *turn,
        }
    }
}

/// The assistant reply currently being revealed
#[derive(Debug, Clone, PartialEq)]
pub struct LiveReply {
    pub identity: AgentIdentity,
    pub markup: Markup,
}

struct ActiveTurn {
    id: TurnId,
    token: CancellationToken,
}

pub struct LifecycleController {
    state: RequestState,
    active: Option<ActiveTurn>,
    next_turn: TurnId,
    requests_started: u64,
    log: MessageLog,
    live: Option<LiveReply>,
    scroll_pending: bool,
    session: SessionStore,
    transport: Arc<dyn Transport>,
    renderer: ProgressiveRenderer,
    events: mpsc::UnboundedSender<TurnEvent>,
}

impl LifecycleController {
    /// Returns the controller and the receiving end of its turn events.
    pub fn new(
        transport: Arc<dyn Transport>,
        renderer: ProgressiveRenderer,
    ) -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let controller = Self {
            state: RequestState::Idle,
            active: None,
            next_turn: 0,
            requests_started: 0,
            log: MessageLog::new(),
            live: None,
            scroll_pending: false,
            session: SessionStore::new(),
            transport,
            renderer,
            events,
        };
        (controller, rx)
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn can_send(&self) -> bool {
        self.state == RequestState::Idle
    }

    pub fn can_stop(&self) -> bool {
        self.state == RequestState::Generating
    }

    /// Generating but nothing rendered yet: the request is still on the wire
    pub fn is_waiting(&self) -> bool {
        self.state == RequestState::Generating && self.live.is_none()
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn live(&self) -> Option<&LiveReply> {
        self.live.as_ref()
    }

    pub fn session(&self) -> Option<&SessionId> {
        self.session.current()
    }

    pub fn requests_started(&self) -> u64 {
        self.requests_started
    }

    /// True once after the renderer asked for the view to follow the reply
    pub fn take_scroll_request(&mut self) -> bool {
        std::mem::take(&mut self.scroll_pending)
    }

    /// Begin a turn. Returns false, doing nothing, when a request is already in
    /// flight or there is neither text nor attachment to send.
    pub fn start(&mut self, user_text: &str, attachment: Option<Attachment>) -> bool {
        if self.state != RequestState::Idle {
            log::debug!("start ignored: request already in flight");
            return false;
        }

        let text = user_text.trim();
        if text.is_empty() && attachment.is_none() {
            return false;
        }

        let message = compose_message(text, attachment.as_ref());
        let display = match &attachment {
            Some(file) if text.is_empty() => format!("📎 {}", file.name()),
            Some(file) => format!("{}\n📎 {}", text, file.name()),
            None => text.to_string(),
        };
        self.log.push_user(display);

        let session = self.session.get_or_create();
        let id = self.next_turn;
        self.next_turn += 1;
        let token = CancellationToken::new();

        self.active = Some(ActiveTurn {
            id,
            token: token.clone(),
        });
        self.live = None;
        self.state = RequestState::Generating;
        self.requests_started += 1;
        self.scroll_pending = true;
        log::info!("turn {} started in session {}", id, session);

        let task = TurnTask {
            turn: id,
            transport: Arc::clone(&self.transport),
            renderer: self.renderer.clone(),
            events: self.events.clone(),
        };
        tokio::spawn(task.run(message, session, token));
        true
    }

    /// Cancel the in-flight request. The partial reply stays in the log and
    /// the controller is Idle when this returns.
    pub fn stop(&mut self) -> bool {
        if self.state != RequestState::Generating {
            return false;
        }

        if let Some(active) = self.active.take() {
            log::info!("turn {} stopped", active.id);
            active.token.cancel();
        }
        self.commit_live();
        self.state = RequestState::Idle;
        true
    }

    /// Forget the conversation and its session id
    pub fn new_chat(&mut self) {
        self.stop();
        self.log.clear();
        self.live = None;
        self.session.clear();
        log::info!("new chat");
    }

    pub fn apply(&mut self, event: TurnEvent) {
        let is_current = self
            .active
            .as_ref()
            .map(|active| active.id == event.turn())
            .unwrap_or(false);
        if !is_current {
            log::trace!("dropping event of inactive turn {}", event.turn());
            return;
        }

        match event {
            TurnEvent::Frame {
                identity, markup, ..
            } => {
                self.live = Some(LiveReply { identity, markup });
            }
            TurnEvent::ScrollToEnd { .. } => self.scroll_pending = true,
            TurnEvent::Failed { error, .. } => {
                self.log.push_error(&error.to_string());
                self.scroll_pending = true;
            }
            TurnEvent::Finished { turn, outcome } => {
                log::info!("turn {} finished: {:?}", turn, outcome);
                self.commit_live();
                self.active = None;
                self.state = RequestState::Idle;
            }
        }
    }

    fn commit_live(&mut self) {
        if let Some(live) = self.live.take() {
            self.log.push_reply(live.identity, live.markup);
            self.scroll_pending = true;
        }
    }
}

/// Sends renderer output to the controller
struct ChannelSurface {
    turn: TurnId,
    events: mpsc::UnboundedSender<TurnEvent>,
}

impl RenderSurface for ChannelSurface {
    fn present(&mut self, identity: &AgentIdentity, markup: Markup) {
        let _ = self.events.send(TurnEvent::Frame {
            turn: self.turn,
            identity: identity.clone(),
            markup,
        });
    }

    fn scroll_to_end(&mut self) {
        let _ = self.events.send(TurnEvent::ScrollToEnd { turn: self.turn });
    }
}

/// Reports `Finished` when dropped, so the controller returns to Idle even if
/// the turn task panics. A task that never reached `finish` also reports a
/// failure, which shows up as an error turn.
struct FinishGuard {
    turn: TurnId,
    outcome: TurnOutcome,
    finished: bool,
    events: mpsc::UnboundedSender<TurnEvent>,
}

impl FinishGuard {
    fn finish(mut self, outcome: TurnOutcome) {
        self.outcome = outcome;
        self.finished = true;
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if !self.finished {
            log::error!("turn {} aborted", self.turn);
            let _ = self.events.send(TurnEvent::Failed {
                turn: self.turn,
                error: ChatError::Transport("turn task aborted".to_string()),
            });
        }
        let _ = self.events.send(TurnEvent::Finished {
            turn: self.turn,
            outcome: self.outcome,
        });
    }
}

struct TurnTask {
    turn: TurnId,
    transport: Arc<dyn Transport>,
    renderer: ProgressiveRenderer,
    events: mpsc::UnboundedSender<TurnEvent>,
}

impl TurnTask {
    async fn run(self, message: String, session: SessionId, token: CancellationToken) {
        let guard = FinishGuard {
            turn: self.turn,
            outcome: TurnOutcome::Failed,
            finished: false,
            events: self.events.clone(),
        };
        let outcome = self.execute(&message, &session, &token).await;
        guard.finish(outcome);
    }

    async fn execute(
        &self,
        message: &str,
        session: &SessionId,
        token: &CancellationToken,
    ) -> TurnOutcome {
        let raw = match self.transport.send(message, Some(session), token).await {
            Ok(raw) => raw,
            Err(ChatError::Cancelled) => return TurnOutcome::Cancelled,
            Err(error) => {
                log::warn!("turn {} failed: {}", self.turn, error);
                let _ = self.events.send(TurnEvent::Failed {
                    turn: self.turn,
                    error,
                });
                return TurnOutcome::Failed;
            }
        };

        let (identity, cleaned) = classify(&raw);
        log::debug!(
            "turn {} routed to {} ({} chars)",
            self.turn,
            identity.display_name,
            cleaned.chars().count()
        );

        let mut surface = ChannelSurface {
            turn: self.turn,
            events: self.events.clone(),
        };
        let completion = self
            .renderer
            .render(&mut surface, &cleaned, &identity, || token.is_cancelled())
            .await;

        match completion {
            Completion::Finished(_) => TurnOutcome::Completed,
            Completion::Cancelled { .. } => TurnOutcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::Pacing;
    use crate::state::{ChatRole, TurnContent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedTransport {
        reply: Result<String, ChatError>,
        latency: Duration,
        calls: AtomicUsize,
        cancelled: AtomicUsize,
        last_message: Mutex<Option<String>>,
        last_session: Mutex<Option<SessionId>>,
    }

    impl ScriptedTransport {
        fn new(reply: Result<String, ChatError>, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                reply,
                latency,
                calls: AtomicUsize::new(0),
                cancelled: AtomicUsize::new(0),
                last_message: Mutex::new(None),
                last_session: Mutex::new(None),
            })
        }

        fn replying(text: &str) -> Arc<Self> {
            Self::new(Ok(text.to_string()), Duration::ZERO)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            text: &str,
            session_id: Option<&SessionId>,
            cancel: &CancellationToken,
        ) -> Result<String, ChatError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_message.lock().unwrap() = Some(text.to_string());
            *self.last_session.lock().unwrap() = session_id.cloned();
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.cancelled.fetch_add(1, Ordering::SeqCst);
                    Err(ChatError::Cancelled)
                }
                _ = tokio::time::sleep(self.latency) => self.reply.clone(),
            }
        }
    }

    fn controller_with(
        transport: Arc<ScriptedTransport>,
        pacing: Pacing,
    ) -> (LifecycleController, mpsc::UnboundedReceiver<TurnEvent>) {
        LifecycleController::new(transport, ProgressiveRenderer::new(pacing))
    }

    async fn run_until_idle(
        controller: &mut LifecycleController,
        rx: &mut mpsc::UnboundedReceiver<TurnEvent>,
    ) {
        while controller.state() == RequestState::Generating {
            let event = rx.recv().await.expect("turn task dropped its sender");
            controller.apply(event);
        }
    }

    fn drain(controller: &mut LifecycleController, rx: &mut mpsc::UnboundedReceiver<TurnEvent>) {
        while let Ok(event) = rx.try_recv() {
            controller.apply(event);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_is_classified_and_rendered() {
        let transport = ScriptedTransport::replying("[[TECH]] fix this bug");
        let (mut controller, mut rx) =
            controller_with(transport.clone(), Pacing::Fixed(Duration::from_millis(2)));

        assert!(controller.start("my build fails", None));
        assert_eq!(controller.state(), RequestState::Generating);
        run_until_idle(&mut controller, &mut rx).await;

        let turns = controller.log().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role(), ChatRole::User);
        assert_eq!(turns[0].text(), "my build fails");
        assert_eq!(turns[1].role(), ChatRole::Assistant);
        assert_eq!(turns[1].identity().unwrap().display_name, "Tech Agent");
        assert_eq!(turns[1].text(), "fix this bug");
        assert!(controller.live().is_none());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_id_sent_and_reused() {
        let transport = ScriptedTransport::replying("ok");
        let (mut controller, mut rx) = controller_with(transport.clone(), Pacing::default());

        controller.start("one", None);
        run_until_idle(&mut controller, &mut rx).await;
        let first = transport.last_session.lock().unwrap().clone();
        assert!(first.is_some());
        assert_eq!(first.as_ref(), controller.session());

        controller.start("two", None);
        run_until_idle(&mut controller, &mut rx).await;
        let second = transport.last_session.lock().unwrap().clone();
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_generating_is_noop() {
        let transport = ScriptedTransport::new(Ok("done".to_string()), Duration::from_millis(50));
        let (mut controller, mut rx) = controller_with(transport.clone(), Pacing::default());

        assert!(controller.start("first", None));
        assert!(!controller.start("second", None));
        assert_eq!(controller.requests_started(), 1);

        run_until_idle(&mut controller, &mut rx).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.log().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let transport = ScriptedTransport::replying("unused");
        let (mut controller, _rx) = controller_with(transport.clone(), Pacing::default());

        assert!(!controller.start("   \n", None));
        assert_eq!(controller.state(), RequestState::Idle);
        assert_eq!(controller.requests_started(), 0);
        assert!(controller.log().is_empty());
        assert!(controller.session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_becomes_assistant_message() {
        let transport = ScriptedTransport::new(
            Err(ChatError::Transport("API Key is missing".to_string())),
            Duration::ZERO,
        );
        let (mut controller, mut rx) = controller_with(transport, Pacing::default());

        controller.start("hello", None);
        run_until_idle(&mut controller, &mut rx).await;

        let last = controller.log().last().unwrap();
        assert_eq!(last.role(), ChatRole::Assistant);
        assert!(last.text().starts_with("Error:"));
        assert!(last.text().contains("API Key is missing"));
        assert_eq!(controller.state(), RequestState::Idle);
        assert!(controller.can_send());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_response_returns_to_idle() {
        let transport = ScriptedTransport::new(
            Err(ChatError::MalformedResponse("missing choices".to_string())),
            Duration::ZERO,
        );
        let (mut controller, mut rx) = controller_with(transport, Pacing::default());

        controller.start("hello", None);
        run_until_idle(&mut controller, &mut rx).await;

        assert!(controller.log().last().unwrap().text().contains("missing choices"));
        assert_eq!(controller.state(), RequestState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_render_keeps_partial_reply() {
        let transport = ScriptedTransport::replying(&"x".repeat(100));
        let (mut controller, mut rx) =
            controller_with(transport, Pacing::Fixed(Duration::from_millis(5)));

        controller.start("long answer please", None);
        tokio::time::sleep(Duration::from_millis(10)).await;
        drain(&mut controller, &mut rx);

        assert!(controller.stop());
        assert_eq!(controller.state(), RequestState::Idle);
        assert!(controller.can_send());

        let partial = controller.log().last().unwrap().text();
        let shown = partial.chars().count();
        assert!(shown > 0 && shown < 100, "shown {} chars", shown);

        // Later frames of the stopped turn change nothing
        tokio::time::sleep(Duration::from_millis(200)).await;
        drain(&mut controller, &mut rx);
        assert_eq!(controller.log().last().unwrap().text(), partial);
        assert!(controller.live().is_none());
        assert_eq!(controller.state(), RequestState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_waiting_cancels_request() {
        let transport = ScriptedTransport::new(Ok("late".to_string()), Duration::from_secs(5));
        let (mut controller, mut rx) = controller_with(transport.clone(), Pacing::default());

        controller.start("hello", None);
        assert!(controller.is_waiting());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(controller.stop());
        assert_eq!(controller.state(), RequestState::Idle);

        tokio::time::sleep(Duration::from_secs(10)).await;
        drain(&mut controller, &mut rx);
        assert_eq!(transport.cancelled.load(Ordering::SeqCst), 1);
        // Only the user turn; cancellation is not reported as a failure
        assert_eq!(controller.log().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let transport = ScriptedTransport::replying("unused");
        let (mut controller, _rx) = controller_with(transport, Pacing::default());
        assert!(!controller.stop());
        assert_eq!(controller.state(), RequestState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_turn_after_stop_ignores_old_events() {
        let transport = ScriptedTransport::replying("abcdefghij");
        let (mut controller, mut rx) =
            controller_with(transport, Pacing::Fixed(Duration::from_millis(5)));

        controller.start("first", None);
        tokio::time::sleep(Duration::from_millis(6)).await;
        controller.stop();

        assert!(controller.start("second", None));
        run_until_idle(&mut controller, &mut rx).await;

        let last = controller.log().last().unwrap();
        assert_eq!(last.text(), "abcdefghij");
        assert_eq!(controller.requests_started(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_affordances_follow_state() {
        let transport = ScriptedTransport::replying("hi");
        let (mut controller, mut rx) = controller_with(transport, Pacing::default());

        assert!(controller.can_send() && !controller.can_stop());
        controller.start("hello", None);
        assert!(!controller.can_send() && controller.can_stop());
        run_until_idle(&mut controller, &mut rx).await;
        assert!(controller.can_send() && !controller.can_stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attachment_only_turn() {
        let transport = ScriptedTransport::replying("[[DATA]] two columns");
        let (mut controller, mut rx) = controller_with(transport.clone(), Pacing::default());

        let attachment = Attachment::from_text("sales.csv", "region,total\n");
        assert!(controller.start("", Some(attachment)));
        run_until_idle(&mut controller, &mut rx).await;

        let sent = transport.last_message.lock().unwrap().clone().unwrap();
        assert!(sent.contains("[File: sales.csv]\nregion,total"));
        assert_eq!(controller.log().turns()[0].text(), "📎 sales.csv");
        assert_eq!(
            controller.log().last().unwrap().identity().unwrap().display_name,
            "Data Agent"
        );
    }

    #[tokio::test]
    async fn test_oversized_attachment_never_reaches_transport() {
        use std::io::Write;

        let transport = ScriptedTransport::replying("unused");
        let (mut controller, _rx) = controller_with(transport.clone(), Pacing::default());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![b'z'; 5 * 1024 * 1024 + 10]).unwrap();

        match Attachment::load(file.path(), crate::config::DEFAULT_MAX_ATTACHMENT_BYTES) {
            Ok(attachment) => {
                controller.start("", Some(attachment));
            }
            Err(e) => assert!(matches!(e, ChatError::AttachmentTooLarge { .. })),
        }

        assert_eq!(controller.requests_started(), 0);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_chat_clears_log_and_session() {
        let transport = ScriptedTransport::replying("hi");
        let (mut controller, mut rx) = controller_with(transport, Pacing::default());

        controller.start("hello", None);
        run_until_idle(&mut controller, &mut rx).await;
        let old_session = controller.session().cloned();
        assert!(old_session.is_some());

        controller.new_chat();
        assert!(controller.log().is_empty());
        assert!(controller.session().is_none());

        controller.start("again", None);
        run_until_idle(&mut controller, &mut rx).await;
        assert_ne!(controller.session().cloned(), old_session);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_markup_matches_full_render() {
        let text = "## Steps\n\n- run `cargo fmt`\n- commit";
        let transport = ScriptedTransport::replying(text);
        let (mut controller, mut rx) = controller_with(transport, Pacing::default());

        controller.start("how?", None);
        run_until_idle(&mut controller, &mut rx).await;

        match controller.log().last().unwrap().content() {
            TurnContent::Markup(markup) => {
                assert_eq!(markup, &crate::markup::render_markdown(text));
            }
            other => panic!("expected markup, got {:?}", other),
        }
    }

    struct PanickingTransport;

    #[async_trait]
    impl Transport for PanickingTransport {
        async fn send(
            &self,
            _text: &str,
            _session_id: Option<&SessionId>,
            _cancel: &CancellationToken,
        ) -> Result<String, ChatError> {
            panic!("transport blew up");
        }
    }

    #[tokio::test]
    async fn test_panicking_turn_reports_error_and_goes_idle() {
        let (mut controller, mut rx) =
            LifecycleController::new(Arc::new(PanickingTransport), ProgressiveRenderer::default());

        assert!(controller.start("hello", None));
        run_until_idle(&mut controller, &mut rx).await;

        assert!(controller.can_send());
        let last = controller.log().last().unwrap();
        assert_eq!(last.role(), ChatRole::Assistant);
        assert_eq!(last.text(), "Error: turn task aborted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_turn_reports_error_once() {
        let transport = ScriptedTransport::new(
            Err(ChatError::Transport("boom".to_string())),
            Duration::ZERO,
        );
        let (mut controller, mut rx) = controller_with(transport, Pacing::default());

        controller.start("hello", None);
        run_until_idle(&mut controller, &mut rx).await;
        drain(&mut controller, &mut rx);

        assert_eq!(controller.log().len(), 2);
        assert_eq!(controller.log().last().unwrap().text(), "Error: boom");
    }
}
