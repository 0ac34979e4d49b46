//! Command dispatch: map `/command args` to the manager subcommand, gate it on the
//! allow-list, and relay the result. Free text is routed to an open `/create` dialogue.

use crate::auth::AllowList;
use crate::channels::InboundMessage;
use crate::config::Timeouts;
use crate::dialogue::{Advance, CreateDialogue, CreateRequest, CreateStep};
use crate::exec::{ExecError, ManagerRunner};
use crate::relay::{self, Reply, StreamPick, Truncate, DONE, NO_DATA, NO_LOGS, NO_OUTPUT};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

const HEAD_200: Truncate = Truncate::Head(200);
const TAIL_200: Truncate = Truncate::Tail(200);
const TAIL_50: Truncate = Truncate::Tail(50);

const HELP_TEXT: &str = "WINGS Manager Bot\nCommands:\n\
/list - list bots\n\
/info <name> - show details\n\
/logs <name> - last 200 lines\n\
/startbot <name> | /stopbot <name> | /restart <name>\n\
/setexpiry <name> <days|YYYY-MM-DD|0>\n\
/renew <name> <days>\n\
/create - interactive create\n\
/setenv <name> <KEY> <VALUE>\n\
/getenv <name> [KEY]\n\
/rm <name>\n\
/rebuild <name>\n\
/updateall - update vendor + rebuild all\n\
/id - show your numeric ID\n";

/// A `/command arg...` message split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Lowercased command name without the slash or `@botname` suffix.
    pub name: String,
    /// Bot username from a `/command@botname` suffix, if present.
    pub addressee: Option<String>,
    pub args: Vec<String>,
}

/// Parse a slash command; returns None for free text.
pub fn parse_command(text: &str) -> Option<ParsedCommand> {
    let rest = text.trim_start().strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let head = parts.next()?;
    let (name, addressee) = match head.split_once('@') {
        Some((name, bot)) => (name, Some(bot.to_string())),
        None => (head, None),
    };
    if name.is_empty() {
        return None;
    }
    Some(ParsedCommand {
        name: name.to_lowercase(),
        addressee,
        args: parts.map(str::to_string).collect(),
    })
}

/// Operator-facing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Start,
    Id,
    List,
    Info,
    Logs,
    StartBot,
    StopBot,
    Restart,
    Rebuild,
    Rm,
    SetEnv,
    GetEnv,
    SetExpiry,
    Renew,
    UpdateAll,
    Create,
}

impl Command {
    pub const ALL: [Command; 16] = [
        Command::Start,
        Command::Id,
        Command::List,
        Command::Info,
        Command::Logs,
        Command::StartBot,
        Command::StopBot,
        Command::Restart,
        Command::Rebuild,
        Command::Rm,
        Command::SetEnv,
        Command::GetEnv,
        Command::SetExpiry,
        Command::Renew,
        Command::UpdateAll,
        Command::Create,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Id => "id",
            Command::List => "list",
            Command::Info => "info",
            Command::Logs => "logs",
            Command::StartBot => "startbot",
            Command::StopBot => "stopbot",
            Command::Restart => "restart",
            Command::Rebuild => "rebuild",
            Command::Rm => "rm",
            Command::SetEnv => "setenv",
            Command::GetEnv => "getenv",
            Command::SetExpiry => "setexpiry",
            Command::Renew => "renew",
            Command::UpdateAll => "updateall",
            Command::Create => "create",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Everything except `/id` is restricted to allow-listed operators.
    pub fn requires_auth(self) -> bool {
        self != Command::Id
    }
}

/// One manager invocation and how to present its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerCall {
    pub args: Vec<String>,
    pub pick: StreamPick,
    pub truncate: Truncate,
    pub placeholder: &'static str,
    /// Show as a monospace block rather than plain text.
    pub pre: bool,
}

impl ManagerCall {
    fn new(args: Vec<String>, truncate: Truncate, placeholder: &'static str, pre: bool) -> Self {
        Self {
            args,
            pick: StreamPick::ByExitCode,
            truncate,
            placeholder,
            pre,
        }
    }
}

/// What a command resolves to once its arguments are checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Help,
    WhoAmI,
    BeginCreate,
    Manager(ManagerCall),
}

/// Dispatch table. Returns the usage string when required arguments are missing.
pub fn plan(cmd: Command, args: &[String]) -> Result<Action, &'static str> {
    let s = |v: &str| v.to_string();
    let action = match cmd {
        Command::Start => Action::Help,
        Command::Id => Action::WhoAmI,
        Command::Create => Action::BeginCreate,
        Command::List => Action::Manager(ManagerCall {
            pick: StreamPick::StdoutElseStderr,
            ..ManagerCall::new(vec![s("list")], Truncate::None, NO_OUTPUT, true)
        }),
        Command::UpdateAll => {
            Action::Manager(ManagerCall::new(vec![s("update-all")], Truncate::None, DONE, true))
        }
        Command::Info => {
            let [name, ..] = args else {
                return Err("Usage: /info <name>");
            };
            Action::Manager(ManagerCall::new(
                vec![s("info"), name.clone()],
                HEAD_200,
                NO_OUTPUT,
                true,
            ))
        }
        Command::Logs => {
            let [name, ..] = args else {
                return Err("Usage: /logs <name>");
            };
            Action::Manager(ManagerCall::new(
                vec![s("logs-once"), name.clone()],
                TAIL_200,
                NO_LOGS,
                true,
            ))
        }
        Command::StartBot | Command::StopBot | Command::Restart | Command::Rebuild => {
            let (sub, usage) = match cmd {
                Command::StartBot => ("start", "Usage: /startbot <name>"),
                Command::StopBot => ("stop", "Usage: /stopbot <name>"),
                Command::Restart => ("restart", "Usage: /restart <name>"),
                _ => ("rebuild", "Usage: /rebuild <name>"),
            };
            let [name, ..] = args else {
                return Err(usage);
            };
            Action::Manager(ManagerCall::new(
                vec![s(sub), name.clone()],
                Truncate::None,
                DONE,
                true,
            ))
        }
        Command::Rm => {
            let [name, ..] = args else {
                return Err("Usage: /rm <name>");
            };
            Action::Manager(ManagerCall::new(
                vec![s("rm"), name.clone()],
                Truncate::None,
                DONE,
                false,
            ))
        }
        Command::SetEnv => {
            let [name, key, value @ ..] = args else {
                return Err("Usage: /setenv <name> <KEY> <VALUE>");
            };
            if value.is_empty() {
                return Err("Usage: /setenv <name> <KEY> <VALUE>");
            }
            Action::Manager(ManagerCall::new(
                vec![s("set-env"), name.clone(), key.clone(), value.join(" ")],
                Truncate::None,
                DONE,
                false,
            ))
        }
        Command::GetEnv => {
            let [name, rest @ ..] = args else {
                return Err("Usage: /getenv <name> [KEY]");
            };
            let mut call_args = vec![s("get-env"), name.clone()];
            if let Some(key) = rest.first().filter(|k| !k.is_empty()) {
                call_args.push(key.clone());
            }
            Action::Manager(ManagerCall::new(call_args, HEAD_200, NO_DATA, true))
        }
        Command::SetExpiry => {
            let [name, value, ..] = args else {
                return Err("Usage: /setexpiry <name> <days|YYYY-MM-DD|0>");
            };
            Action::Manager(ManagerCall::new(
                vec![s("set-expiry"), name.clone(), value.clone()],
                Truncate::None,
                DONE,
                false,
            ))
        }
        Command::Renew => {
            let [name, days, ..] = args else {
                return Err("Usage: /renew <name> <days>");
            };
            Action::Manager(ManagerCall::new(
                vec![s("renew"), name.clone(), days.clone()],
                Truncate::None,
                DONE,
                false,
            ))
        }
    };
    Ok(action)
}

fn display_id(id: Option<i64>) -> String {
    id.map(|i| i.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn unauthorized(cmd: Option<Command>, sender: Option<i64>) -> Reply {
    let id = display_id(sender);
    if cmd == Some(Command::Start) {
        return Reply::Plain(format!(
            "Unauthorized. Your ID: {}\nAsk the server admin to add it:\n  wingsbot-manager admin-bot set-env ADMIN_IDS <id1,id2>",
            id
        ));
    }
    Reply::Plain(format!(
        "Unauthorized (your ID: {}). Use /id to get your numeric ID.",
        id
    ))
}

fn exec_failure(args: &[String], err: &ExecError) -> Reply {
    let sub = args.first().map(String::as_str).unwrap_or("manager");
    Reply::Plain(format!("{} failed: {}", sub, err))
}

/// Dialogues are scoped to one sender in one chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DialogueKey {
    conversation_id: String,
    sender_id: Option<i64>,
}

impl DialogueKey {
    fn of(msg: &InboundMessage) -> Self {
        Self {
            conversation_id: msg.conversation_id.clone(),
            sender_id: msg.sender_id,
        }
    }
}

/// Routes inbound messages to manager calls or the create dialogue.
pub struct Dispatcher {
    allow_list: AllowList,
    runner: Arc<dyn ManagerRunner>,
    timeouts: Timeouts,
    /// This bot's username; commands addressed to any other bot are ignored.
    bot_username: Option<String>,
    dialogues: Mutex<HashMap<DialogueKey, CreateDialogue>>,
}

impl Dispatcher {
    pub fn new(allow_list: AllowList, runner: Arc<dyn ManagerRunner>, timeouts: Timeouts) -> Self {
        Self {
            allow_list,
            runner,
            timeouts,
            bot_username: None,
            dialogues: Mutex::new(HashMap::new()),
        }
    }

    /// Only accept `/command@name` when `name` is this bot (case-insensitive).
    /// Without a username every addressed command is accepted.
    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into().trim_start_matches('@').to_string());
        self
    }

    fn addressed_elsewhere(&self, parsed: &ParsedCommand) -> bool {
        match (&parsed.addressee, &self.bot_username) {
            (Some(to), Some(me)) => !to.eq_ignore_ascii_case(me),
            _ => false,
        }
    }

    /// Handle one message; returns the reply to send, if any.
    pub async fn handle(&self, msg: &InboundMessage) -> Option<Reply> {
        match parse_command(&msg.text) {
            Some(parsed) if self.addressed_elsewhere(&parsed) => {
                log::debug!("ignoring /{} addressed to another bot", parsed.name);
                None
            }
            Some(parsed) => match Command::from_name(&parsed.name) {
                Some(cmd) => Some(self.run_command(cmd, &parsed.args, msg).await),
                None => {
                    log::debug!("ignoring unknown command /{}", parsed.name);
                    None
                }
            },
            None => self.continue_dialogue(msg).await,
        }
    }

    /// Current step of the dialogue open for this sender in this chat.
    pub async fn dialogue_step(&self, conversation_id: &str, sender_id: Option<i64>) -> Option<CreateStep> {
        let key = DialogueKey {
            conversation_id: conversation_id.to_string(),
            sender_id,
        };
        self.dialogues.lock().await.get(&key).map(CreateDialogue::step)
    }

    async fn run_command(&self, cmd: Command, args: &[String], msg: &InboundMessage) -> Reply {
        if cmd.requires_auth() && !self.allow_list.is_authorized(msg.sender_id) {
            log::info!(
                "rejected /{} from unauthorized sender {}",
                cmd.name(),
                display_id(msg.sender_id)
            );
            return unauthorized(Some(cmd), msg.sender_id);
        }
        let action = match plan(cmd, args) {
            Ok(action) => action,
            Err(usage) => return Reply::Plain(usage.to_string()),
        };
        match action {
            Action::Help => Reply::Plain(HELP_TEXT.to_string()),
            Action::WhoAmI => Reply::Plain(format!("Your user ID: {}", display_id(msg.sender_id))),
            Action::BeginCreate => {
                let replaced = self
                    .dialogues
                    .lock()
                    .await
                    .insert(DialogueKey::of(msg), CreateDialogue::new());
                if replaced.is_some() {
                    log::info!("create dialogue restarted in chat {}", msg.conversation_id);
                }
                Reply::Plain(CreateStep::Name.prompt().to_string())
            }
            Action::Manager(call) => self.run_manager(call).await,
        }
    }

    async fn run_manager(&self, call: ManagerCall) -> Reply {
        let result = self
            .runner
            .invoke(&call.args, None, self.timeouts.ordinary)
            .await;
        match result {
            Ok(inv) => {
                let text = relay::relay(&inv, call.pick, call.truncate, call.placeholder);
                if call.pre {
                    Reply::Pre(text)
                } else {
                    Reply::Plain(text)
                }
            }
            Err(e) => exec_failure(&call.args, &e),
        }
    }

    async fn continue_dialogue(&self, msg: &InboundMessage) -> Option<Reply> {
        let key = DialogueKey::of(msg);
        let mut dialogues = self.dialogues.lock().await;
        let dialogue = dialogues.get_mut(&key)?;
        if !self.allow_list.is_authorized(msg.sender_id) {
            return Some(unauthorized(Some(Command::Create), msg.sender_id));
        }
        match dialogue.advance(&msg.text) {
            Advance::Ask(prompt) => Some(Reply::Plain(prompt.to_string())),
            Advance::Done(request) => {
                dialogues.remove(&key);
                drop(dialogues);
                Some(self.run_create(request).await)
            }
        }
    }

    async fn run_create(&self, request: CreateRequest) -> Reply {
        log::info!("create dialogue complete, creating bot {}", request.name);
        let args = request.args();
        match self
            .runner
            .invoke(&args, Some(&request.stdin), self.timeouts.create)
            .await
        {
            Ok(inv) => Reply::Pre(relay::relay(
                &inv,
                StreamPick::CombineOnFailure,
                TAIL_50,
                NO_OUTPUT,
            )),
            Err(e) => exec_failure(&args, &e),
        }
    }
}
