//! 主控循环（actor）
//!
//! 一个 tokio 任务独占 TurnMachine 与 MessageStore。用户命令从 `Command` 通道进来；
//! 计时器与网络请求在派生任务中运行，只通过内部通道回送 `ControllerEvent`，从不直接写日志。
//! 每个内部事件都带派生时的 epoch，拆除后旧事件一律丢弃。每处理完一个事件就在 watch 上发布一次 UiState。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::config::AppConfig;
use crate::core::orchestrator::Command;
use crate::core::state::{project, ProjectionInput};
use crate::core::{
    GenerationError, RevealEvent, RoundScheduler, SessionSupervisor, TransitionError, UiState,
};
use crate::debate::{
    choice_text, debate_history, Action, DebateSession, DebateStyle, EpilogueRequest,
    EpilogueSequencer, EpilogueStage, EpilogueStep, EpilogueTimings, Event, Phase, TurnMachine,
};
use crate::llm::{
    ChatTurnRequest, DebateRoundRequest, GenerationClient, GenerationReply, HistoryEntry, Sanitize,
};
use crate::memory::{Message, MessageKind, MessageStore};
use crate::persona::{Persona, PersonaId};

pub const SCENE_SET_TEXT: &str = "The two of them sit face to face. The air is frozen.";
pub const PERSUASION_QUERY_TEXT: &str = "Which side do you find more persuasive?";

/// 待揭示的一条台词（已清洗）
#[derive(Debug, Clone)]
pub struct RevealItem {
    pub agent_id: PersonaId,
    pub text: String,
}

/// 派生任务回送给主控循环的事件
#[derive(Debug)]
pub enum ControllerEvent {
    TurnResolved {
        epoch: u64,
        result: Result<GenerationReply, GenerationError>,
    },
    RoundDue {
        epoch: u64,
        round: u32,
    },
    RoundResolved {
        epoch: u64,
        round: u32,
        result: Result<GenerationReply, GenerationError>,
    },
    Reveal {
        epoch: u64,
        event: RevealEvent<RevealItem>,
    },
    SummaryResolved {
        epoch: u64,
        result: Result<String, GenerationError>,
    },
    FinalStatementResolved {
        epoch: u64,
        index: usize,
        result: Result<String, GenerationError>,
    },
    EpilogueDue {
        epoch: u64,
        stage: EpilogueStage,
    },
}

impl ControllerEvent {
    fn epoch(&self) -> u64 {
        match self {
            ControllerEvent::TurnResolved { epoch, .. }
            | ControllerEvent::RoundDue { epoch, .. }
            | ControllerEvent::RoundResolved { epoch, .. }
            | ControllerEvent::Reveal { epoch, .. }
            | ControllerEvent::SummaryResolved { epoch, .. }
            | ControllerEvent::FinalStatementResolved { epoch, .. }
            | ControllerEvent::EpilogueDue { epoch, .. } => *epoch,
        }
    }
}

/// 主控循环持有的全部状态
pub struct Controller {
    client: Arc<dyn GenerationClient>,
    sanitizer: Arc<dyn Sanitize>,
    user_display_name: String,
    prompt_on_intervention: bool,
    epilogue_timings: EpilogueTimings,

    machine: TurnMachine,
    store: MessageStore,
    scheduler: RoundScheduler,
    supervisor: SessionSupervisor,
    epilogue: Option<EpilogueSequencer>,
    personas: Vec<Persona>,
    /// 同一时刻最多一个聊天 / 辩论请求在途
    request_in_flight: bool,
    notice: Option<String>,

    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    state_tx: watch::Sender<UiState>,
}

impl Controller {
    pub fn new(
        cfg: &AppConfig,
        client: Arc<dyn GenerationClient>,
        sanitizer: Arc<dyn Sanitize>,
        events_tx: mpsc::UnboundedSender<ControllerEvent>,
        state_tx: watch::Sender<UiState>,
    ) -> Self {
        let personas = match validate_roster(&cfg.app.personas) {
            Ok(()) => cfg.app.personas.clone(),
            Err(e) if cfg.app.personas.is_empty() => {
                tracing::debug!("{}", e);
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("Configured personas ignored: {}", e);
                Vec::new()
            }
        };
        Self {
            client,
            sanitizer,
            user_display_name: cfg.app.user_display_name.clone(),
            prompt_on_intervention: cfg.debate.prompt_on_intervention,
            epilogue_timings: cfg.debate.epilogue_timings(),
            machine: TurnMachine::new(
                cfg.debate.recovery_policy(),
                cfg.debate.machine_timings(),
            ),
            store: MessageStore::new(),
            scheduler: RoundScheduler::new(cfg.pacing.to_pacing()),
            supervisor: SessionSupervisor::new(),
            epilogue: None,
            personas,
            request_in_flight: false,
            notice: None,
            events_tx,
            state_tx,
        }
    }

    /// 主循环：命令通道关闭或收到 Quit 时退出
    pub async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    ) {
        self.publish();
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Quit) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(event) = events_rx.recv() => self.handle_event(event),
            }
            self.publish();
        }
        self.supervisor.shutdown();
        tracing::info!("controller stopped");
    }

    fn publish(&self) {
        let busy = self.request_in_flight || self.scheduler.is_active() || self.epilogue.is_some();
        let state = project(
            &self.machine,
            ProjectionInput {
                personas: &self.personas,
                busy,
                notice: self.notice.clone(),
                history: self.store.messages().to_vec(),
            },
        );
        let _ = self.state_tx.send(state);
    }

    // ---- 用户命令 ----

    fn handle_command(&mut self, cmd: Command) {
        tracing::debug!(?cmd, phase = ?self.machine.phase(), "command");
        let result = match cmd {
            Command::SelectPersonas(list) => self.select_personas(list),
            Command::Submit(text) => self.submit(&text),
            Command::ConfirmDebate { topic, style } => self.confirm_debate(&topic, style),
            Command::Intervene(number) => self.intervene(number),
            Command::ToggleGate => self.toggle_gate(),
            Command::EndDebate => self.end_debate(),
            Command::LeaveScreen => self.leave_screen(),
            Command::Export { from, to, reply } => {
                let _ = reply.send(self.store.export(from, to));
                Ok(())
            }
            Command::Quit => Ok(()),
        };
        match result {
            Ok(()) => self.notice = None,
            Err(e) => {
                tracing::info!(error = %e, "command rejected");
                self.notice = Some(e.to_string());
            }
        }
    }

    fn select_personas(&mut self, list: Vec<Persona>) -> Result<(), TransitionError> {
        if self.machine.phase() != Phase::UserTurn {
            return Err(TransitionError::NotAllowed {
                phase: self.machine.phase(),
                event: "select_personas",
            });
        }
        validate_roster(&list)?;
        tracing::info!(count = list.len(), "personas selected");
        self.personas = list;
        Ok(())
    }

    fn submit(&mut self, text: &str) -> Result<(), TransitionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TransitionError::EmptyInput);
        }
        match self.machine.phase() {
            Phase::UserTurn => {
                if self.personas.is_empty() {
                    return Err(TransitionError::PersonaCount(0));
                }
                let step = self.machine.dispatch(Event::UserSubmitted)?;
                self.store.push(Message::user(text));
                self.perform(step.action);
                Ok(())
            }
            Phase::DebateAwaitingUser => self.debate_submit(text),
            phase => Err(TransitionError::NotAllowed {
                phase,
                event: "user_submitted",
            }),
        }
    }

    /// 等待用户时的提交（自由输入或介入选项）：原样写入用户消息，再请求下一轮
    fn debate_submit(&mut self, text: &str) -> Result<(), TransitionError> {
        let step = self.machine.dispatch(Event::UserIntervened)?;
        self.store.push(Message::user(text));
        self.perform(step.action);
        Ok(())
    }

    fn confirm_debate(&mut self, topic: &str, style: DebateStyle) -> Result<(), TransitionError> {
        let session = DebateSession::new(topic, style, &self.personas)?;
        let display_topic = session.display_topic();
        let step = self.machine.dispatch(Event::DebateConfirmed(session))?;

        let start = self
            .store
            .push(Message::system(MessageKind::SceneSet, SCENE_SET_TEXT));
        self.store.push(Message::system(
            MessageKind::DebateStart,
            format!("Debate started: \"{display_topic}\""),
        ));
        if let Some(session) = self.machine.debate_mut() {
            session.set_start_marker(start);
        }
        self.perform(step.action);
        Ok(())
    }

    fn intervene(&mut self, number: usize) -> Result<(), TransitionError> {
        let session = self.machine.debate().ok_or(TransitionError::NoDebate)?;
        let text = choice_text(session.participants(), number)
            .ok_or(TransitionError::UnknownChoice(number))?;
        self.debate_submit(&text)
    }

    fn toggle_gate(&mut self) -> Result<(), TransitionError> {
        let session = self.machine.debate_mut().ok_or(TransitionError::NoDebate)?;
        let visible = session.gate.toggle()?;
        tracing::debug!(visible, "intervention gate toggled");
        Ok(())
    }

    fn end_debate(&mut self) -> Result<(), TransitionError> {
        let step = self.machine.dispatch(Event::EndRequested)?;
        self.perform(step.action);
        Ok(())
    }

    fn leave_screen(&mut self) -> Result<(), TransitionError> {
        let step = self.machine.dispatch(Event::Aborted)?;
        self.perform(step.action);
        Ok(())
    }

    // ---- 状态机动作 ----

    fn perform(&mut self, action: Action) {
        match action {
            Action::None => {}
            Action::RequestTurn => self.request_turn(),
            Action::RequestRound { round, delay } => self.schedule_round(round, delay),
            Action::RetryRound { round, delay } => {
                tracing::info!(round, ?delay, "retrying round");
                self.schedule_round(round, delay);
            }
            Action::AwaitUser { round } => {
                tracing::info!(round, "waiting for user");
                if self.prompt_on_intervention {
                    self.store.push(Message::system(
                        MessageKind::PersuasionQuery,
                        PERSUASION_QUERY_TEXT,
                    ));
                }
            }
            Action::StartEpilogue => self.start_epilogue(),
            Action::ReturnToUser => {
                if let Ok(step) = self.machine.dispatch(Event::Reset) {
                    self.perform(step.action);
                }
            }
            Action::Teardown => self.teardown(),
        }
    }

    /// 取消所有挂起工作：揭示批次、计时器、在途请求、收尾流程
    fn teardown(&mut self) {
        self.scheduler.invalidate();
        let epoch = self.supervisor.teardown();
        self.epilogue = None;
        self.request_in_flight = false;
        let removed = self.store.remove_all_transient();
        tracing::info!(epoch, removed, "session torn down");
    }

    fn request_turn(&mut self) {
        let req = ChatTurnRequest {
            participant_ids: self.personas.iter().map(|p| p.id.clone()).collect(),
            history: self
                .store
                .messages()
                .iter()
                .filter(|m| !m.kind.is_transient())
                .map(HistoryEntry::from)
                .collect(),
            user_display_name: self.user_display_name.clone(),
        };
        let epoch = self.supervisor.epoch();
        let token = self.supervisor.child_token();
        let client = self.client.clone();
        let tx = self.events_tx.clone();
        self.request_in_flight = true;
        tracing::info!(epoch, participants = req.participant_ids.len(), "chat turn requested");
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                result = client.chat_turn(&req) => {
                    let _ = tx.send(ControllerEvent::TurnResolved { epoch, result });
                }
            }
        });
    }

    fn schedule_round(&self, round: u32, delay: Duration) {
        let epoch = self.supervisor.epoch();
        self.spawn_after(delay, ControllerEvent::RoundDue { epoch, round });
    }

    fn spawn_after(&self, delay: Duration, event: ControllerEvent) {
        let token = self.supervisor.child_token();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(event);
                }
            }
        });
    }

    fn request_round(&mut self, round: u32) {
        let Some(session) = self.machine.debate() else {
            return;
        };
        if !self.machine.phase().is_debate_round() || session.round() != round {
            tracing::debug!(round, phase = ?self.machine.phase(), "round no longer due");
            return;
        }
        if self.request_in_flight {
            tracing::warn!(round, "round already in flight, skipped");
            return;
        }
        let req = DebateRoundRequest {
            participant_ids: session.participant_ids(),
            topic: session.topic().to_string(),
            style: session.style(),
            history: debate_history(&self.store, session),
            round,
            user_display_name: self.user_display_name.clone(),
        };
        let epoch = self.supervisor.epoch();
        let token = self.supervisor.child_token();
        let client = self.client.clone();
        let tx = self.events_tx.clone();
        self.request_in_flight = true;
        tracing::info!(epoch, round, history = req.history.len(), "debate round requested");
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                result = client.debate_round(&req) => {
                    let _ = tx.send(ControllerEvent::RoundResolved { epoch, round, result });
                }
            }
        });
    }

    // ---- 内部事件 ----

    fn handle_event(&mut self, event: ControllerEvent) {
        let epoch = event.epoch();
        if !self.supervisor.is_current(epoch) {
            tracing::debug!(epoch, current = self.supervisor.epoch(), "stale event dropped");
            return;
        }
        match event {
            ControllerEvent::TurnResolved { result, .. } => self.on_turn_resolved(result),
            ControllerEvent::RoundDue { round, .. } => self.request_round(round),
            ControllerEvent::RoundResolved { round, result, .. } => {
                self.on_round_resolved(round, result)
            }
            ControllerEvent::Reveal { event, .. } => self.on_reveal(event),
            ControllerEvent::SummaryResolved { result, .. } => {
                let result = self.sanitize_result(result);
                if let Some(seq) = self.epilogue.as_mut() {
                    let step = seq.on_summary(result, &mut self.store);
                    self.drive_epilogue(step);
                }
            }
            ControllerEvent::FinalStatementResolved { index, result, .. } => {
                let result = self.sanitize_result(result);
                if let Some(seq) = self.epilogue.as_mut() {
                    let step = seq.on_final_statement(index, result, &mut self.store);
                    self.drive_epilogue(step);
                }
            }
            ControllerEvent::EpilogueDue { stage, .. } => {
                if let Some(seq) = self.epilogue.as_mut() {
                    let step = seq.advance(stage, &mut self.store);
                    self.drive_epilogue(step);
                }
            }
        }
    }

    fn on_turn_resolved(&mut self, result: Result<GenerationReply, GenerationError>) {
        self.request_in_flight = false;
        if self.machine.phase() != Phase::AgentTurn {
            tracing::debug!("chat reply arrived outside agent turn, dropped");
            return;
        }
        let read = self.store.mark_user_read();
        tracing::debug!(read, "user messages marked read");

        let items = result.and_then(|reply| {
            let items = self.chat_items(reply);
            if items.is_empty() {
                Err(GenerationError::Malformed("no usable utterances".to_string()))
            } else {
                Ok(items)
            }
        });
        match items {
            Ok(items) => self.reveal(items),
            Err(err) => {
                tracing::warn!(error = %err, "chat turn failed");
                self.store.push(Message::system(
                    MessageKind::Error,
                    format!("Failed to get a reply: {}", err.message()),
                ));
                self.dispatch(Event::AgentTurnFinished);
            }
        }
    }

    fn on_round_resolved(&mut self, round: u32, result: Result<GenerationReply, GenerationError>) {
        self.request_in_flight = false;
        let current = self.machine.debate().map(|d| d.round());
        if !self.machine.phase().is_debate_round() || current != Some(round) {
            tracing::debug!(round, ?current, "round reply no longer wanted, dropped");
            return;
        }
        let items = result.and_then(|reply| {
            let items = self.round_items(reply);
            if items.is_empty() {
                Err(GenerationError::Malformed("no usable utterances".to_string()))
            } else {
                Ok(items)
            }
        });
        match items {
            Ok(items) => {
                tracing::info!(round, count = items.len(), "debate round received");
                self.reveal(items);
            }
            Err(err) => {
                tracing::warn!(round, error = %err, "debate round failed");
                self.store.push(Message::system(
                    MessageKind::Error,
                    format!("Round {round} failed: {}", err.message()),
                ));
                self.dispatch(Event::RoundFailed(err));
            }
        }
    }

    fn reveal(&mut self, items: Vec<RevealItem>) {
        let epoch = self.supervisor.epoch();
        let parent = self.supervisor.cancel_token();
        self.scheduler.schedule(items, &parent, self.events_tx.clone(), move |event| {
            ControllerEvent::Reveal { epoch, event }
        });
    }

    fn on_reveal(&mut self, event: RevealEvent<RevealItem>) {
        match event {
            RevealEvent::Item { batch, index, item } => {
                if !self.scheduler.is_current(batch) {
                    tracing::debug!(?batch, index, "stale reveal dropped");
                    return;
                }
                self.store.push(Message::agent(&item.agent_id, item.text));
            }
            RevealEvent::Complete { batch, len } => {
                if !self.scheduler.is_current(batch) {
                    return;
                }
                self.scheduler.finish(batch);
                tracing::debug!(?batch, len, "reveal batch complete");
                match self.machine.phase() {
                    Phase::AgentTurn => self.dispatch(Event::AgentTurnFinished),
                    p if p.is_debate_round() => self.dispatch(Event::RoundRevealed),
                    p => tracing::debug!(phase = ?p, "batch completed outside a turn"),
                }
            }
        }
    }

    fn dispatch(&mut self, event: Event) {
        match self.machine.dispatch(event) {
            Ok(step) => self.perform(step.action),
            Err(e) => tracing::warn!(error = %e, "transition rejected"),
        }
    }

    /// 聊天回合：所有参与者的所有文本依次揭示；未知角色丢弃
    fn chat_items(&self, reply: GenerationReply) -> Vec<RevealItem> {
        reply
            .utterances
            .into_iter()
            .filter(|u| self.personas.iter().any(|p| p.id == u.participant_id))
            .flat_map(|u| {
                let id = u.participant_id;
                u.texts.into_iter().map(move |t| (id.clone(), t))
            })
            .filter_map(|(agent_id, text)| self.item(agent_id, &text))
            .collect()
    }

    /// 辩论轮次：每位参与者只取第一段
    fn round_items(&self, reply: GenerationReply) -> Vec<RevealItem> {
        let Some(session) = self.machine.debate() else {
            return Vec::new();
        };
        reply
            .utterances
            .into_iter()
            .filter(|u| session.is_participant(&u.participant_id))
            .filter_map(|u| {
                let first = u.texts.into_iter().next()?;
                self.item(u.participant_id, &first)
            })
            .collect()
    }

    fn item(&self, agent_id: PersonaId, raw: &str) -> Option<RevealItem> {
        let text = self.sanitizer.sanitize(raw, &self.user_display_name);
        (!text.is_empty()).then_some(RevealItem { agent_id, text })
    }

    fn sanitize_result(
        &self,
        result: Result<String, GenerationError>,
    ) -> Result<String, GenerationError> {
        result.map(|t| self.sanitizer.sanitize(&t, &self.user_display_name))
    }

    // ---- 收尾 ----

    fn start_epilogue(&mut self) {
        // 结束辩论：作废未完成的揭示、重试计时器与在途轮次
        self.scheduler.invalidate();
        let epoch = self.supervisor.teardown();
        self.request_in_flight = false;

        let Some(session) = self.machine.debate().cloned() else {
            return;
        };
        tracing::info!(epoch, round = session.round(), "epilogue started");
        let (seq, step) = EpilogueSequencer::begin(
            session,
            self.epilogue_timings,
            &mut self.store,
        );
        self.epilogue = Some(seq);
        self.drive_epilogue(step);
    }

    fn drive_epilogue(&mut self, step: EpilogueStep) {
        let epoch = self.supervisor.epoch();
        match step {
            EpilogueStep::Request(EpilogueRequest::Summary(req)) => {
                let token = self.supervisor.child_token();
                let client = self.client.clone();
                let tx = self.events_tx.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        result = client.debate_summary(&req) => {
                            let _ = tx.send(ControllerEvent::SummaryResolved { epoch, result });
                        }
                    }
                });
            }
            EpilogueStep::Request(EpilogueRequest::FinalStatement { index, request }) => {
                let token = self.supervisor.child_token();
                let client = self.client.clone();
                let tx = self.events_tx.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        result = client.final_statement(&request) => {
                            let _ = tx.send(ControllerEvent::FinalStatementResolved { epoch, index, result });
                        }
                    }
                });
            }
            EpilogueStep::Wait(delay, stage) => {
                self.spawn_after(delay, ControllerEvent::EpilogueDue { epoch, stage });
            }
            EpilogueStep::Idle => {}
            EpilogueStep::Finished => {
                self.epilogue = None;
                tracing::info!("epilogue finished");
                self.dispatch(Event::EpilogueFinished);
            }
        }
    }
}

/// 聊天需要 1 或 2 位互不相同的角色
fn validate_roster(list: &[Persona]) -> Result<(), TransitionError> {
    if list.is_empty() || list.len() > 2 {
        return Err(TransitionError::PersonaCount(list.len()));
    }
    if let [a, b] = list {
        if a.id == b.id {
            return Err(TransitionError::DuplicateParticipant(a.id.to_string()));
        }
    }
    Ok(())
}
