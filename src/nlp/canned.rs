//! Fallback responder answering from static robot facts.

use super::{NLP_COMMANDS, NLP_EVENTS, excerpt, plain_response};
use crate::capability::CapabilityId;
use crate::config::RobotConfig;
use crate::error::Result;
use crate::resolver::{ProviderKind, WorkerProvider};
use crate::worker::{Command, Event, NlpResponse, Worker, WorkerContext, unsupported};
use async_trait::async_trait;
use tracing::debug;

/// Facts the robot can state about itself.
#[derive(Debug, Clone)]
pub struct RobotFacts {
    pub robot_name: String,
    pub creator_name: String,
    pub creator_id: String,
    pub creator_title: String,
}

impl Default for RobotFacts {
    fn default() -> Self {
        Self {
            robot_name: "Updog".to_owned(),
            creator_name: "Umar Ibrahim".to_owned(),
            creator_id: "062".to_owned(),
            creator_title: "Boss".to_owned(),
        }
    }
}

impl RobotFacts {
    /// Answer a question about the robot, if it is one.
    pub fn answer(&self, query: &str) -> Option<String> {
        let q = query.to_lowercase();
        let names_creator =
            q.contains(&self.creator_name.to_lowercase()) && q.contains(&self.creator_id);
        if names_creator || q.contains("boss") {
            return Some(format!("Greetings, {}!", self.creator_title));
        }
        if q.contains("creator") || q.contains("who made you") || q.contains("who built you") {
            return Some(format!("I was created by {}.", self.creator_name));
        }
        if q.contains("who are you") || q.contains("name") {
            return Some(format!("My name is {}.", self.robot_name));
        }
        None
    }

    /// Build the response for `input`.
    pub fn respond(&self, input: &str) -> NlpResponse {
        match self.answer(input) {
            Some(text) => plain_response("info_response", input, text),
            None => plain_response(
                "fallback_info",
                input,
                format!(
                    "I received '{}' but can only give a generic reply right now.",
                    excerpt(input, 50)
                ),
            ),
        }
    }
}

/// Worker answering every input from [`RobotFacts`].
#[derive(Default)]
pub struct CannedNlpWorker {
    facts: RobotFacts,
}

impl CannedNlpWorker {
    pub fn new(facts: RobotFacts) -> Self {
        Self { facts }
    }
}

#[async_trait]
impl Worker for CannedNlpWorker {
    fn capability(&self) -> CapabilityId {
        CapabilityId::Nlp
    }

    async fn handle(&mut self, command: Command, ctx: &WorkerContext) -> Result<()> {
        let text = match command {
            Command::ProcessInput { text } => text,
            other => return Err(unsupported(CapabilityId::Nlp, &other)),
        };
        debug!(text = text.as_str(), "fallback call: process_input");
        ctx.emit(Event::ProcessingComplete(self.facts.respond(&text)));
        Ok(())
    }
}

pub struct CannedNlpProvider;

impl WorkerProvider for CannedNlpProvider {
    fn name(&self) -> &str {
        "canned-nlp"
    }

    fn capability(&self) -> CapabilityId {
        CapabilityId::Nlp
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Fallback
    }

    fn commands(&self) -> &'static [&'static str] {
        NLP_COMMANDS
    }

    fn events(&self) -> &'static [&'static str] {
        NLP_EVENTS
    }

    fn probe(&self, _config: &RobotConfig) -> Result<()> {
        Ok(())
    }

    fn build(&self, _config: &RobotConfig) -> Result<Box<dyn Worker>> {
        Ok(Box::new(CannedNlpWorker::default()))
    }
}
