//! Guided `/create` dialogue: a linear form collector that feeds `wingsbot-manager create`.
//!
//! Each [`CreateStep`] owns exactly one field of [`CreateSession`]. A reply stores the trimmed
//! text, and the step's transition names the next step (or completion). Once the expiry is
//! collected the session is serialized into the answer lines the manager's interactive
//! prompt reads from stdin, in this order:
//!
//! ```text
//! token
//! admin id
//! channel id
//! true|false                 (use webhook)
//! webhook url                \
//! webhook path                |
//! webhook port                | only when webhook is used
//! webhook secret              |
//! Y|n                         | (auto-assign host port)
//! host port                  /  only when auto-assign is declined
//! expire days
//! ```

/// Steps of the dialogue, in the order they are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStep {
    Name,
    Token,
    AdminId,
    ChannelId,
    ChannelUsername,
    WebhookYn,
    WebhookUrl,
    WebhookPath,
    WebhookPort,
    WebhookSecret,
    HostPortAuto,
    HostPortValue,
    ExpireDays,
}

impl CreateStep {
    /// Prompt shown to the operator when entering this step.
    pub fn prompt(self) -> &'static str {
        match self {
            CreateStep::Name => "Bot name (slug friendly):",
            CreateStep::Token => "BOT_TOKEN:",
            CreateStep::AdminId => "ADMIN_ID (numeric):",
            CreateStep::ChannelId => "CHANNEL_ID (optional, e.g. @mychannel or -100...):",
            CreateStep::ChannelUsername => {
                "CHANNEL_USERNAME (optional, e.g. mychannel or @mychannel):"
            }
            CreateStep::WebhookYn => "Use webhook? (yes/no) [no]:",
            CreateStep::WebhookUrl => "WEBHOOK_URL (public base, e.g. https://example.com):",
            CreateStep::WebhookPath => "WEBHOOK_PATH (optional, default token):",
            CreateStep::WebhookPort => "WEBHOOK_PORT [8080]:",
            CreateStep::WebhookSecret => "WEBHOOK_SECRET (optional):",
            CreateStep::HostPortAuto => "Auto-assign HOST_PORT? [Y/n]:",
            CreateStep::HostPortValue => "HOST_PORT:",
            CreateStep::ExpireDays => "Expire in days [0]:",
        }
    }
}

pub const DEFAULT_WEBHOOK_PORT: &str = "8080";
pub const DEFAULT_EXPIRE_DAYS: &str = "0";

/// Fields collected by the dialogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSession {
    pub name: String,
    pub token: String,
    pub admin_id: String,
    pub channel_id: String,
    pub channel_username: String,
    pub use_webhook: bool,
    pub webhook_url: String,
    pub webhook_path: String,
    pub webhook_port: String,
    pub webhook_secret: String,
    pub hostport_auto: bool,
    pub host_port: String,
    pub expire_days: String,
}

impl Default for CreateSession {
    fn default() -> Self {
        Self {
            name: String::new(),
            token: String::new(),
            admin_id: String::new(),
            channel_id: String::new(),
            channel_username: String::new(),
            use_webhook: false,
            webhook_url: String::new(),
            webhook_path: String::new(),
            webhook_port: DEFAULT_WEBHOOK_PORT.to_string(),
            webhook_secret: String::new(),
            hostport_auto: true,
            host_port: String::new(),
            expire_days: DEFAULT_EXPIRE_DAYS.to_string(),
        }
    }
}

impl CreateSession {
    /// Answer lines for `wingsbot-manager create`, newline-joined with a trailing newline.
    pub fn answers(&self) -> String {
        let mut lines: Vec<&str> = vec![
            self.token.as_str(),
            self.admin_id.as_str(),
            self.channel_id.as_str(),
            if self.use_webhook { "true" } else { "false" },
        ];
        if self.use_webhook {
            lines.extend([
                self.webhook_url.as_str(),
                self.webhook_path.as_str(),
                self.webhook_port.as_str(),
                self.webhook_secret.as_str(),
                if self.hostport_auto { "Y" } else { "n" },
            ]);
            if !self.hostport_auto {
                lines.push(self.host_port.as_str());
            }
        }
        lines.push(self.expire_days.as_str());
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

/// `y`, `yes`, `true`, `1` (any case) are yes; everything else is no.
pub fn parse_yes(reply: &str) -> bool {
    matches!(
        reply.trim().to_lowercase().as_str(),
        "y" | "yes" | "true" | "1"
    )
}

/// Like [`parse_yes`], but an empty reply means yes.
pub fn parse_yes_default_yes(reply: &str) -> bool {
    reply.trim().is_empty() || parse_yes(reply)
}

fn or_default(reply: &str, default: &str) -> String {
    let t = reply.trim();
    if t.is_empty() {
        default.to_string()
    } else {
        t.to_string()
    }
}

/// A finished dialogue, ready to hand to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub name: String,
    pub stdin: String,
}

impl CreateRequest {
    pub fn args(&self) -> Vec<String> {
        vec!["create".to_string(), self.name.clone()]
    }
}

/// Result of feeding one reply to the dialogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Ask the prompt of the new current step.
    Ask(&'static str),
    /// All fields collected.
    Done(CreateRequest),
}

/// An in-progress dialogue: the current step plus the fields collected so far.
#[derive(Debug, Clone)]
pub struct CreateDialogue {
    step: CreateStep,
    session: CreateSession,
}

impl Default for CreateDialogue {
    fn default() -> Self {
        Self::new()
    }
}

impl CreateDialogue {
    /// Fresh dialogue positioned at the name prompt.
    pub fn new() -> Self {
        Self {
            step: CreateStep::Name,
            session: CreateSession::default(),
        }
    }

    pub fn step(&self) -> CreateStep {
        self.step
    }

    pub fn session(&self) -> &CreateSession {
        &self.session
    }

    /// Store `reply` in the current step's field and move on.
    pub fn advance(&mut self, reply: &str) -> Advance {
        let next = match self.step {
            CreateStep::Name => self.on_name(reply),
            CreateStep::Token => self.on_token(reply),
            CreateStep::AdminId => self.on_admin_id(reply),
            CreateStep::ChannelId => self.on_channel_id(reply),
            CreateStep::ChannelUsername => self.on_channel_username(reply),
            CreateStep::WebhookYn => self.on_webhook_yn(reply),
            CreateStep::WebhookUrl => self.on_webhook_url(reply),
            CreateStep::WebhookPath => self.on_webhook_path(reply),
            CreateStep::WebhookPort => self.on_webhook_port(reply),
            CreateStep::WebhookSecret => self.on_webhook_secret(reply),
            CreateStep::HostPortAuto => self.on_hostport_auto(reply),
            CreateStep::HostPortValue => self.on_hostport_value(reply),
            CreateStep::ExpireDays => self.on_expire_days(reply),
        };
        match next {
            Some(step) => {
                self.step = step;
                Advance::Ask(step.prompt())
            }
            None => Advance::Done(CreateRequest {
                name: self.session.name.clone(),
                stdin: self.session.answers(),
            }),
        }
    }

    fn on_name(&mut self, reply: &str) -> Option<CreateStep> {
        self.session.name = reply.trim().to_string();
        Some(CreateStep::Token)
    }

    fn on_token(&mut self, reply: &str) -> Option<CreateStep> {
        self.session.token = reply.trim().to_string();
        Some(CreateStep::AdminId)
    }

    fn on_admin_id(&mut self, reply: &str) -> Option<CreateStep> {
        self.session.admin_id = reply.trim().to_string();
        Some(CreateStep::ChannelId)
    }

    fn on_channel_id(&mut self, reply: &str) -> Option<CreateStep> {
        self.session.channel_id = reply.trim().to_string();
        Some(CreateStep::ChannelUsername)
    }

    fn on_channel_username(&mut self, reply: &str) -> Option<CreateStep> {
        self.session.channel_username = reply.trim().to_string();
        Some(CreateStep::WebhookYn)
    }

    fn on_webhook_yn(&mut self, reply: &str) -> Option<CreateStep> {
        self.session.use_webhook = parse_yes(reply);
        if self.session.use_webhook {
            Some(CreateStep::WebhookUrl)
        } else {
            Some(CreateStep::ExpireDays)
        }
    }

    fn on_webhook_url(&mut self, reply: &str) -> Option<CreateStep> {
        self.session.webhook_url = reply.trim().to_string();
        Some(CreateStep::WebhookPath)
    }

    fn on_webhook_path(&mut self, reply: &str) -> Option<CreateStep> {
        self.session.webhook_path = reply.trim().to_string();
        Some(CreateStep::WebhookPort)
    }

    fn on_webhook_port(&mut self, reply: &str) -> Option<CreateStep> {
        self.session.webhook_port = or_default(reply, DEFAULT_WEBHOOK_PORT);
        Some(CreateStep::WebhookSecret)
    }

    fn on_webhook_secret(&mut self, reply: &str) -> Option<CreateStep> {
        self.session.webhook_secret = reply.trim().to_string();
        Some(CreateStep::HostPortAuto)
    }

    fn on_hostport_auto(&mut self, reply: &str) -> Option<CreateStep> {
        self.session.hostport_auto = parse_yes_default_yes(reply);
        if self.session.hostport_auto {
            Some(CreateStep::ExpireDays)
        } else {
            Some(CreateStep::HostPortValue)
        }
    }

    fn on_hostport_value(&mut self, reply: &str) -> Option<CreateStep> {
        self.session.host_port = reply.trim().to_string();
        Some(CreateStep::ExpireDays)
    }

    fn on_expire_days(&mut self, reply: &str) -> Option<CreateStep> {
        self.session.expire_days = or_default(reply, DEFAULT_EXPIRE_DAYS);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed every reply; all but the last must ask, the last must finish.
    fn run(replies: &[&str]) -> (Vec<&'static str>, CreateRequest) {
        let mut d = CreateDialogue::new();
        let mut prompts = Vec::new();
        let (last, rest) = replies.split_last().unwrap();
        for r in rest {
            match d.advance(r) {
                Advance::Ask(p) => prompts.push(p),
                Advance::Done(_) => panic!("finished early at {:?}", r),
            }
        }
        match d.advance(last) {
            Advance::Done(req) => (prompts, req),
            Advance::Ask(p) => panic!("still asking: {}", p),
        }
    }

    #[test]
    fn without_webhook() {
        let (prompts, req) = run(&["demo", "T", "1", "-100", "x", "no", "0"]);
        assert_eq!(req.name, "demo");
        assert_eq!(req.stdin, "T\n1\n-100\nfalse\n0\n");
        assert_eq!(req.args(), vec!["create", "demo"]);
        assert_eq!(prompts.last(), Some(&"Expire in days [0]:"));
    }

    #[test]
    fn with_webhook_and_auto_hostport() {
        let (_, req) = run(&[
            "demo", "T", "1", "-100", "x", "yes", "https://e.com", "p", "9090", "s", "yes", "7",
        ]);
        assert_eq!(req.stdin, "T\n1\n-100\ntrue\nhttps://e.com\np\n9090\ns\nY\n7\n");
    }

    #[test]
    fn with_webhook_and_explicit_hostport() {
        let (prompts, req) = run(&[
            "demo", "T", "1", "-100", "x", "yes", "https://e.com", "p", "9090", "s", "no", "9999",
            "7",
        ]);
        assert_eq!(
            req.stdin,
            "T\n1\n-100\ntrue\nhttps://e.com\np\n9090\ns\nn\n9999\n7\n"
        );
        assert!(prompts.contains(&"HOST_PORT:"));
    }

    #[test]
    fn empty_replies_take_bracketed_defaults() {
        let (_, req) = run(&["demo", "T", "1", "", "", "YES", "https://e.com", "", " ", "", "", ""]);
        assert_eq!(req.stdin, "T\n1\n\ntrue\nhttps://e.com\n\n8080\n\nY\n0\n");
    }

    #[test]
    fn replies_are_trimmed() {
        let (_, req) = run(&["  demo \n", " T ", "1", "-100", "x", "n", " 3 "]);
        assert_eq!(req.name, "demo");
        assert_eq!(req.stdin, "T\n1\n-100\nfalse\n3\n");
    }

    #[test]
    fn prompts_follow_step_order() {
        let mut d = CreateDialogue::new();
        assert_eq!(d.step(), CreateStep::Name);
        assert_eq!(d.advance("demo"), Advance::Ask("BOT_TOKEN:"));
        assert_eq!(d.advance("T"), Advance::Ask("ADMIN_ID (numeric):"));
        assert_eq!(d.step(), CreateStep::ChannelId);
        d.advance("-100");
        d.advance("x");
        assert_eq!(d.step(), CreateStep::WebhookYn);
        assert_eq!(d.session().channel_username, "x");
        assert_eq!(d.advance("no"), Advance::Ask("Expire in days [0]:"));
        assert_eq!(d.step(), CreateStep::ExpireDays);
    }

    #[test]
    fn yes_parsing() {
        for yes in ["y", "Yes", "TRUE", "1", " y "] {
            assert!(parse_yes(yes), "{yes}");
        }
        for no in ["", "no", "n", "0", "yep", "false"] {
            assert!(!parse_yes(no), "{no}");
        }
        assert!(parse_yes_default_yes(""));
        assert!(parse_yes_default_yes("  "));
        assert!(!parse_yes_default_yes("n"));
    }
}
