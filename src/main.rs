//! Duet - 陪伴聊天控制台
//!
//! 入口：初始化日志、加载配置、启动主控循环，并运行行式控制台。
//! 普通文本直接提交；以 `/` 开头的是命令（见 `HELP`）。

use std::collections::HashSet;

use anyhow::Context;
use duet::core::{create_duet, Command, UiState};
use duet::debate::DebateStyle;
use duet::memory::{Message, MessageId, Sender};
use duet::persona::Persona;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

const HELP: &str = "\
/personas id:Name,id:Name   select one or two personas
/debate <style> <topic>     start a debate (aggressive|calm|playful|balanced)
/pick <1|2|3>               choose an intervention option
/gate                       hide / show the intervention options
/end                        end the debate
/leave                      leave the debate screen
/export                     print the transcript as JSON
/quit                       exit";

/// 控制台输入解析结果
#[derive(Debug, PartialEq)]
enum Input {
    Personas(Vec<Persona>),
    Submit(String),
    Debate { style: DebateStyle, topic: String },
    Pick(usize),
    Gate,
    End,
    Leave,
    Export,
    Help,
    Quit,
}

fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Input::Submit(line.to_string()));
    };
    let (cmd, args) = match rest.split_once(char::is_whitespace) {
        Some((c, a)) => (c, a.trim()),
        None => (rest, ""),
    };
    match cmd {
        "personas" => {
            let list = args
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|entry| match entry.split_once(':') {
                    Some((id, name)) => Persona::new(id.trim(), name.trim()),
                    None => Persona::new(entry.trim(), entry.trim()),
                })
                .collect();
            Ok(Input::Personas(list))
        }
        "debate" => {
            let (style, topic) = args
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: /debate <style> <topic>".to_string())?;
            Ok(Input::Debate {
                style: style.parse()?,
                topic: topic.trim().to_string(),
            })
        }
        "pick" => args
            .parse()
            .map(Input::Pick)
            .map_err(|_| "usage: /pick <1|2|3>".to_string()),
        "gate" => Ok(Input::Gate),
        "end" => Ok(Input::End),
        "leave" => Ok(Input::Leave),
        "export" => Ok(Input::Export),
        "help" => Ok(Input::Help),
        "quit" | "exit" => Ok(Input::Quit),
        other => Err(format!("unknown command '/{other}', try /help")),
    }
}

fn render(msg: &Message, personas: &[Persona]) -> String {
    match msg.sender {
        Sender::User => format!("> {}", msg.text),
        Sender::System => format!("[{}]", msg.text),
        Sender::Agent => {
            let name = msg
                .agent_id
                .as_ref()
                .map(|id| {
                    personas
                        .iter()
                        .find(|p| &p.id == id)
                        .map(|p| p.short_name().to_string())
                        .unwrap_or_else(|| id.to_string())
                })
                .unwrap_or_default();
            format!("{name}: {}", msg.text)
        }
    }
}

/// 打印新出现的消息、提示与介入选项
struct Printer {
    seen: HashSet<MessageId>,
    last_notice: Option<String>,
    gate_shown: bool,
    personas: Vec<Persona>,
}

impl Printer {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            last_notice: None,
            gate_shown: false,
            personas: Vec::new(),
        }
    }

    fn show(&mut self, state: &UiState) {
        // 记住出现过的角色，辩论结束后仍能显示名字
        for p in &state.personas {
            if !self.personas.iter().any(|q| q.id == p.id) {
                self.personas.push(p.clone());
            }
        }
        for msg in &state.history {
            if self.seen.insert(msg.id) {
                println!("{}", render(msg, &self.personas));
            }
        }
        if state.notice != self.last_notice {
            if let Some(notice) = &state.notice {
                println!("! {notice}");
            }
            self.last_notice = state.notice.clone();
        }
        let gate_visible = state.gate.as_ref().is_some_and(|g| g.visible);
        if gate_visible && !self.gate_shown {
            if let (Some(gate), Some(debate)) = (&state.gate, &state.debate) {
                println!("-- round {} -- your turn:", debate.round);
                for choice in &gate.choices {
                    println!("  {}. {}", choice.number, choice.text);
                }
            }
        }
        self.gate_shown = gate_visible;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    duet::observability::init();

    let (cfg, cmd_tx, mut state_rx) = create_duet(None)
        .await
        .context("Failed to start controller")?;
    tracing::info!(user = %cfg.app.user_display_name, "duet ready");
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printer = Printer::new();

    loop {
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                printer.show(&state);
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let cmd = match parse_input(&line) {
                    Ok(Input::Help) => {
                        println!("{HELP}");
                        continue;
                    }
                    Ok(Input::Quit) => break,
                    Ok(Input::Export) => {
                        let (reply, rx) = oneshot::channel();
                        cmd_tx.send(Command::Export { from: None, to: None, reply })?;
                        let transcript = rx.await.context("Controller stopped")?;
                        println!("{}", serde_json::to_string_pretty(&transcript)?);
                        continue;
                    }
                    Ok(Input::Personas(list)) => Command::SelectPersonas(list),
                    Ok(Input::Submit(text)) => Command::Submit(text),
                    Ok(Input::Debate { style, topic }) => Command::ConfirmDebate { topic, style },
                    Ok(Input::Pick(n)) => Command::Intervene(n),
                    Ok(Input::Gate) => Command::ToggleGate,
                    Ok(Input::End) => Command::EndDebate,
                    Ok(Input::Leave) => Command::LeaveScreen,
                    Err(e) => {
                        println!("! {e}");
                        continue;
                    }
                };
                cmd_tx.send(cmd).context("Controller stopped")?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = cmd_tx.send(Command::Quit);
    Ok(())
}
