//! Line-oriented front end over the client core.
//!
//! Lines starting with `/` are commands; anything else is sent to the
//! active conversation.

use std::collections::HashMap;
use std::io::Write;

use agentdesk_client::{ClientCore, ClientError, SessionContext, SubmitOutcome};
use agentdesk_protocol::{Agent, Conversation, Message, NewAgent, Role, ToolCallStatus};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tokio::io::{AsyncBufReadExt, BufReader};

pub const HELP: &str = "\
commands:
  /agents                                   list agents
  /agent add <name> <api_url> <token> <project_id>
  /agent use <n>                            select agent n
  /agent rename <n> <name>
  /agent delete <n>
  /convs                                    list conversations of the selected agent
  /new                                      start a conversation
  /switch <n>                               select conversation n
  /rename <title>                           rename the active conversation
  /delete [n]                               delete conversation n (default: active)
  /history                                  print the active conversation
  /help
  /quit
anything else is sent to the active conversation";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ShellError {
    #[snafu(display("usage: {usage}"))]
    Usage {
        stage: &'static str,
        usage: &'static str,
    },
    #[snafu(display("unknown command `/{name}`, try /help"))]
    UnknownCommand { stage: &'static str, name: String },
    #[snafu(display("no {kind} numbered {index}"))]
    NoSuchItem {
        stage: &'static str,
        kind: &'static str,
        index: usize,
    },
    #[snafu(display("{source}"))]
    Client {
        stage: &'static str,
        source: ClientError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}

impl ShellError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Usage { stage, .. }
            | Self::UnknownCommand { stage, .. }
            | Self::NoSuchItem { stage, .. }
            | Self::Client { stage, .. }
            | Self::ReadInput { stage, .. } => stage,
        }
    }
}

pub type ShellResult<T> = Result<T, ShellError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    ListAgents,
    AddAgent(NewAgent),
    UseAgent(usize),
    RenameAgent { index: usize, name: String },
    DeleteAgent(usize),
    ListConversations,
    NewConversation,
    SwitchConversation(usize),
    RenameConversation(String),
    DeleteConversation(Option<usize>),
    History,
    Send(String),
}

impl Command {
    /// Parses one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> ShellResult<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Self::Send(line.to_string())));
        };

        let (name, args) = split_word(rest);
        let command = match name {
            "help" | "h" => Self::Help,
            "quit" | "q" | "exit" => Self::Quit,
            "agents" => Self::ListAgents,
            "agent" => Self::parse_agent(args)?,
            "convs" | "conversations" => Self::ListConversations,
            "new" => Self::NewConversation,
            "switch" => Self::SwitchConversation(parse_index(args, "/switch <n>")?),
            "rename" => {
                ensure!(
                    !args.is_empty(),
                    UsageSnafu {
                        stage: "parse-rename",
                        usage: "/rename <title>",
                    }
                );
                Self::RenameConversation(args.to_string())
            }
            "delete" => {
                if args.is_empty() {
                    Self::DeleteConversation(None)
                } else {
                    Self::DeleteConversation(Some(parse_index(args, "/delete [n]")?))
                }
            }
            "history" => Self::History,
            other => {
                return UnknownCommandSnafu {
                    stage: "parse-command",
                    name: other.to_string(),
                }
                .fail();
            }
        };
        Ok(Some(command))
    }

    fn parse_agent(args: &str) -> ShellResult<Self> {
        let (action, rest) = split_word(args);
        match action {
            "add" => {
                let fields = rest.split_whitespace().collect::<Vec<_>>();
                let [name, api_url, auth_token, project_id] = fields.as_slice() else {
                    return UsageSnafu {
                        stage: "parse-agent-add",
                        usage: "/agent add <name> <api_url> <token> <project_id>",
                    }
                    .fail();
                };
                Ok(Self::AddAgent(NewAgent::new(
                    *name,
                    *api_url,
                    *auth_token,
                    *project_id,
                )))
            }
            "use" => Ok(Self::UseAgent(parse_index(rest, "/agent use <n>")?)),
            "rename" => {
                let (index, name) = split_word(rest);
                ensure!(
                    !name.is_empty(),
                    UsageSnafu {
                        stage: "parse-agent-rename",
                        usage: "/agent rename <n> <name>",
                    }
                );
                Ok(Self::RenameAgent {
                    index: parse_index(index, "/agent rename <n> <name>")?,
                    name: name.to_string(),
                })
            }
            "delete" => Ok(Self::DeleteAgent(parse_index(rest, "/agent delete <n>")?)),
            _ => UsageSnafu {
                stage: "parse-agent",
                usage: "/agent add|use|rename|delete ...",
            }
            .fail(),
        }
    }
}

fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim();
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    }
}

// Indices shown to the user start at 1.
fn parse_index(raw: &str, usage: &'static str) -> ShellResult<usize> {
    raw.trim()
        .parse::<usize>()
        .ok()
        .filter(|index| *index > 0)
        .context(UsageSnafu {
            stage: "parse-index",
            usage,
        })
}

pub struct Shell {
    core: ClientCore,
    context: SessionContext,
}

impl Shell {
    pub fn new(core: ClientCore) -> Self {
        Self {
            core,
            context: SessionContext::default(),
        }
    }

    /// Loads agents and selects the most recent one.
    pub async fn start(&mut self) -> ShellResult<()> {
        if !self.core.directory.load_agents().await {
            self.flush_notices();
            return Ok(());
        }
        let Some(agent) = self.core.store.agents().first().cloned() else {
            println!("no agents yet; add one with /agent add");
            return Ok(());
        };
        self.select_agent(agent).await
    }

    /// Reads commands from stdin until end of input or `/quit`.
    pub async fn run(&mut self) -> ShellResult<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("{HELP}");
        self.print_prompt();

        while let Some(line) = lines.next_line().await.context(ReadInputSnafu {
            stage: "read-stdin-line",
        })? {
            match Command::parse(&line) {
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => {
                    if let Err(error) = self.execute(command).await {
                        tracing::debug!(stage = error.stage(), error = %error, "command failed");
                        eprintln!("error: {error}");
                    }
                }
                Ok(None) => {}
                Err(error) => eprintln!("{error}"),
            }
            self.flush_notices();
            self.print_prompt();
        }
        Ok(())
    }

    pub async fn execute(&mut self, command: Command) -> ShellResult<()> {
        match command {
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
            Command::ListAgents => {
                self.core.directory.load_agents().await;
                self.print_agents();
            }
            Command::AddAgent(input) => {
                let agent = self
                    .core
                    .directory
                    .create_agent(input)
                    .await
                    .context(ClientSnafu {
                        stage: "add-agent",
                    })?;
                println!("added agent {}", agent.name);
                if self.context.agent.is_none() {
                    self.select_agent(agent).await?;
                }
            }
            Command::UseAgent(index) => {
                let agent = self.agent_at(index)?;
                self.select_agent(agent).await?;
            }
            Command::RenameAgent { index, name } => {
                let agent = Agent {
                    name,
                    ..self.agent_at(index)?
                };
                self.core
                    .directory
                    .update_agent(&mut self.context, agent)
                    .await
                    .context(ClientSnafu {
                        stage: "rename-agent",
                    })?;
            }
            Command::DeleteAgent(index) => {
                let agent = self.agent_at(index)?;
                self.core
                    .directory
                    .delete_agent(&mut self.context, &self.core.selector, &agent)
                    .await
                    .context(ClientSnafu {
                        stage: "delete-agent",
                    })?;
                println!("deleted agent {}", agent.name);
            }
            Command::ListConversations => self.print_conversations(),
            Command::NewConversation => {
                self.core
                    .selector
                    .new_conversation(&mut self.context)
                    .await
                    .context(ClientSnafu {
                        stage: "new-conversation",
                    })?;
            }
            Command::SwitchConversation(index) => {
                let conversation = self.conversation_at(index)?;
                self.core
                    .selector
                    .select_conversation(&mut self.context, conversation)
                    .await;
                self.print_history();
            }
            Command::RenameConversation(title) => {
                let conversation = self.context.conversation.clone().context(UsageSnafu {
                    stage: "rename-conversation",
                    usage: "select a conversation first",
                })?;
                self.core
                    .selector
                    .rename_conversation(&mut self.context, conversation, &title)
                    .await
                    .context(ClientSnafu {
                        stage: "rename-conversation",
                    })?;
            }
            Command::DeleteConversation(index) => {
                let conversation = match index {
                    Some(index) => self.conversation_at(index)?,
                    None => self.context.conversation.clone().context(UsageSnafu {
                        stage: "delete-conversation",
                        usage: "/delete <n>",
                    })?,
                };
                self.core
                    .selector
                    .delete_conversation(&mut self.context, &conversation)
                    .await
                    .context(ClientSnafu {
                        stage: "delete-conversation",
                    })?;
            }
            Command::History => self.print_history(),
            Command::Send(text) => self.send(&text).await?,
        }
        Ok(())
    }

    async fn select_agent(&mut self, agent: Agent) -> ShellResult<()> {
        let selected = self
            .core
            .selector
            .select_agent(&mut self.context, agent)
            .await
            .context(ClientSnafu {
                stage: "select-agent",
            })?;
        if selected {
            self.print_history();
        }
        Ok(())
    }

    async fn send(&mut self, text: &str) -> ShellResult<()> {
        let Some(conversation_id) = self.context.conversation_id() else {
            println!("select an agent first");
            return Ok(());
        };

        let store = &self.core.store;
        let mut progress = Progress::default();
        let outcome = {
            let mut revisions = store.subscribe();
            let submit = self.core.exchanges.submit(&self.context, text);
            tokio::pin!(submit);

            loop {
                tokio::select! {
                    outcome = &mut submit => break outcome,
                    Ok(()) = revisions.changed() => {
                        if let Some(assistant) = store
                            .messages(conversation_id)
                            .into_iter()
                            .rev()
                            .find(|message| message.role == Role::Assistant && message.is_placeholder())
                        {
                            progress.render(&assistant);
                        }
                    }
                }
            }
        };

        match outcome.context(ClientSnafu {
            stage: "send-message",
        })? {
            SubmitOutcome::Ignored(reason) => println!("not sent: {reason:?}"),
            SubmitOutcome::Completed { conversation } => {
                if let Some(reply) = store
                    .messages(conversation_id)
                    .into_iter()
                    .rev()
                    .find(|message| message.role == Role::Assistant)
                {
                    progress.finish(&reply);
                }
                if let Some(conversation) = conversation {
                    println!("[{}]", conversation.display_title());
                    self.context.conversation = Some(conversation);
                }
            }
        }
        Ok(())
    }

    fn agent_at(&self, index: usize) -> ShellResult<Agent> {
        self.core
            .store
            .agents()
            .get(index - 1)
            .cloned()
            .context(NoSuchItemSnafu {
                stage: "lookup-agent",
                kind: "agent",
                index,
            })
    }

    fn conversation_at(&self, index: usize) -> ShellResult<Conversation> {
        let agent_id = self.context.agent_id().context(UsageSnafu {
            stage: "lookup-conversation",
            usage: "select an agent first",
        })?;
        self.core
            .store
            .conversations(agent_id)
            .get(index - 1)
            .cloned()
            .context(NoSuchItemSnafu {
                stage: "lookup-conversation",
                kind: "conversation",
                index,
            })
    }

    fn print_agents(&self) {
        let agents = self.core.store.agents();
        if agents.is_empty() {
            println!("no agents");
        }
        for (position, agent) in agents.iter().enumerate() {
            let marker = if self.context.agent_id() == Some(agent.id) {
                '*'
            } else {
                ' '
            };
            println!("{marker}{:>3}  {}  {}", position + 1, agent.name, agent.api_url);
        }
    }

    fn print_conversations(&self) {
        let Some(agent_id) = self.context.agent_id() else {
            println!("select an agent first");
            return;
        };
        for (position, conversation) in self
            .core
            .store
            .conversations(agent_id)
            .iter()
            .enumerate()
        {
            let marker = if self.context.is_active(conversation.id) {
                '*'
            } else {
                ' '
            };
            println!(
                "{marker}{:>3}  {}",
                position + 1,
                conversation.display_title()
            );
        }
    }

    fn print_history(&self) {
        let Some(conversation) = self.context.conversation.as_ref() else {
            return;
        };
        println!("[{}]", conversation.display_title());
        for message in self.core.store.messages(conversation.id) {
            print_message(&message);
        }
    }

    fn print_prompt(&self) {
        match (&self.context.agent, &self.context.conversation) {
            (Some(agent), Some(conversation)) => {
                println!("{} / {} >", agent.name, conversation.display_title());
            }
            (Some(agent), None) => println!("{} >", agent.name),
            _ => println!(">"),
        }
    }

    fn flush_notices(&self) {
        while let Some(notice) = self.core.store.take_notice() {
            eprintln!("! {}", notice.message);
        }
    }
}

fn print_message(message: &Message) {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "agent",
    };
    for call in &message.tool_calls {
        println!("  [tool {} {}]", call.tool_name, status_label(call.status));
    }
    println!("{speaker}: {}", message.content);
}

fn status_label(status: ToolCallStatus) -> &'static str {
    match status {
        ToolCallStatus::Running => "running",
        ToolCallStatus::Success => "ok",
        ToolCallStatus::Error => "failed",
    }
}

/// Prints the part of the streamed answer that has not been shown yet.
#[derive(Default)]
struct Progress {
    printed: usize,
    tools: HashMap<String, ToolCallStatus>,
}

impl Progress {
    fn render(&mut self, assistant: &Message) {
        for call in &assistant.tool_calls {
            if self.tools.get(&call.id) != Some(&call.status) {
                self.tools.insert(call.id.clone(), call.status);
                println!("  [tool {} {}]", call.tool_name, status_label(call.status));
            }
        }

        if self.printed == 0 && !assistant.content.is_empty() {
            print!("agent: ");
        }
        if let Some(fresh) = assistant.content.get(self.printed..) {
            if !fresh.is_empty() {
                print!("{fresh}");
                self.printed = assistant.content.len();
            }
        }
        let _ = std::io::stdout().flush();
    }

    fn finish(&mut self, reply: &Message) {
        if self.printed == 0 {
            print_message(reply);
        } else {
            if let Some(rest) = reply.content.get(self.printed..) {
                print!("{rest}");
            }
            println!();
        }
    }
}
