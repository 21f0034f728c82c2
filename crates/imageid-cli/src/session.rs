//! Line-oriented interactive session over a pipeline controller

use crate::render;
use imageid_classifiers::{IdentifyOutcome, PipelineController, Readiness};
use imageid_core::Error;
use metrics_exporter_prometheus::PrometheusHandle;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

pub const HELP: &str = "\
Commands:
  upload <path>   select a local image file
  url <url>       select a remote image (empty clears the selection)
  identify        classify the current image
  history         list previous selections, most recent first
  select <n>      re-select history entry n
  status          show model, selection and results
  stats           show pipeline metrics
  help            show this message
  quit            leave the session
";

/// A parsed session command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Upload(PathBuf),
    Url(String),
    Identify,
    History,
    Select(usize),
    Status,
    Stats,
    Help,
    Quit,
}

impl FromStr for SessionCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word.to_lowercase().as_str() {
            "upload" if !rest.is_empty() => Ok(Self::Upload(PathBuf::from(rest))),
            "upload" => Err("usage: upload <path>".to_string()),
            "url" => Ok(Self::Url(rest.to_string())),
            "identify" | "id" => Ok(Self::Identify),
            "history" => Ok(Self::History),
            "select" => rest
                .parse()
                .map(Self::Select)
                .map_err(|_| "usage: select <n>".to_string()),
            "status" => Ok(Self::Status),
            "stats" => Ok(Self::Stats),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!("unknown command '{}'; type 'help'", other)),
        }
    }
}

/// Result of executing one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Output(String),
    Quit,
}

/// Interactive session state
pub struct Session {
    controller: Arc<PipelineController>,
    prometheus: Option<PrometheusHandle>,
}

impl Session {
    pub fn new(controller: Arc<PipelineController>, prometheus: Option<PrometheusHandle>) -> Self {
        Self {
            controller,
            prometheus,
        }
    }

    /// Execute one command against the controller
    pub async fn execute(&self, command: SessionCommand) -> Reply {
        let output = match command {
            SessionCommand::Upload(path) => match self.controller.upload_file(&path).await {
                Ok(reference) => format!("Selected {} ({})\n", path.display(), reference),
                Err(e) => error_text(&e),
            },
            SessionCommand::Url(url) => match self.controller.enter_url(&url) {
                Ok(Some(reference)) => format!("Selected {}\n", reference),
                Ok(None) => "Selection cleared\n".to_string(),
                Err(e) => error_text(&e),
            },
            SessionCommand::Identify => match self.controller.identify().await {
                Ok(IdentifyOutcome::Completed(scores)) => {
                    render::class_table(&scores.to_class_scores())
                }
                Ok(IdentifyOutcome::AlreadyRunning) => "Classification in progress\n".to_string(),
                Err(e) => error_text(&e),
            },
            SessionCommand::History => render::history(&self.controller.history()),
            SessionCommand::Select(index) => match self.controller.select_history(index) {
                Ok(reference) => format!("Selected {}\n", reference),
                Err(e) => error_text(&e),
            },
            SessionCommand::Status => render::status(&self.controller.snapshot()),
            SessionCommand::Stats => {
                let mut out = render::stats(&self.controller.metrics().snapshot());
                if let Some(handle) = &self.prometheus {
                    out.push('\n');
                    out.push_str(&handle.render());
                }
                out
            }
            SessionCommand::Help => HELP.to_string(),
            SessionCommand::Quit => return Reply::Quit,
        };

        Reply::Output(output)
    }

    /// Read commands from stdin until `quit` or end of input
    pub async fn run(&self) -> anyhow::Result<()> {
        let store = self.controller.model_store().clone();
        println!("{}", render::readiness(&store.readiness()));

        let mut readiness = store.subscribe();
        let watcher = tokio::spawn(async move {
            if let Ok(state) = readiness.wait_for(|r| *r != Readiness::Loading).await {
                println!("\n{}", render::readiness(&state));
            }
        });

        println!("Type 'help' for commands.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            print!("> ");
            std::io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }

            debug!("Session command: {}", line.trim());
            match line.parse::<SessionCommand>() {
                Ok(command) => match self.execute(command).await {
                    Reply::Output(text) => print!("{}", text),
                    Reply::Quit => break,
                },
                Err(message) => println!("{}", message),
            }
        }

        watcher.abort();
        Ok(())
    }
}

fn error_text(error: &Error) -> String {
    match error {
        Error::NotReady(_) => "Model Loading...\n".to_string(),
        other => format!("Error: {}\n", other),
    }
}
