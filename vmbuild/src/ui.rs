//! Progress narration sinks.
//!
//! A [`Ui`] is fire-and-forget: implementations must never block or fail
//! the pipeline.

use parking_lot::Mutex;
use std::sync::Arc;

pub trait Ui: Send + Sync {
    /// Report progress.
    fn say(&self, message: &str);

    /// Report a problem that does not by itself stop the build.
    fn error(&self, message: &str);
}

pub type SharedUi = Arc<dyn Ui>;

/// Forwards narration to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUi;

impl Ui for TracingUi {
    fn say(&self, message: &str) {
        tracing::info!(target: "vmbuild::ui", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "vmbuild::ui", "{}", message);
    }
}

/// Prints narration to stdout/stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleUi;

impl Ui for ConsoleUi {
    fn say(&self, message: &str) {
        println!("==> {}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("==> {}", message);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiMessage {
    Say(String),
    Error(String),
}

/// Keeps every message in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingUi {
    messages: Mutex<Vec<UiMessage>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<UiMessage> {
        self.messages.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter_map(|m| match m {
                UiMessage::Error(e) => Some(e.clone()),
                UiMessage::Say(_) => None,
            })
            .collect()
    }
}

impl Ui for RecordingUi {
    fn say(&self, message: &str) {
        self.messages.lock().push(UiMessage::Say(message.to_string()));
    }

    fn error(&self, message: &str) {
        self.messages
            .lock()
            .push(UiMessage::Error(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_ui_keeps_order() {
        let ui = RecordingUi::new();
        ui.say("Creating VM...");
        ui.error("boom");
        ui.say("Destroying VM...");

        assert_eq!(
            ui.messages(),
            vec![
                UiMessage::Say("Creating VM...".into()),
                UiMessage::Error("boom".into()),
                UiMessage::Say("Destroying VM...".into()),
            ]
        );
        assert_eq!(ui.errors(), vec!["boom".to_string()]);
    }
}
