//! Host lifecycle notifications
//!
//! These are the shapes the host test framework hands us. They are plain
//! values: the reporter copies whatever it needs, so the host is free to
//! mutate or drop them after notifying.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use stepmirror_common::{Attribute, ItemStatus, LogLevel};

/// Longest label sent for a step or meta-step
pub const MAX_LABEL_CHARS: usize = 300;

/// A group of tests
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Suite {
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Suite {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            tags: Vec::new(),
        }
    }

    pub fn attributes(&self) -> Vec<Attribute> {
        self.tags.iter().map(|t| Attribute::from_tag(t)).collect()
    }
}

/// A single test case, or one retry attempt of it
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Test {
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Current retry attempt; zero for the first run
    #[serde(default)]
    pub retry_index: u32,
    /// Status the host assigned, if any
    #[serde(default)]
    pub status: Option<ItemStatus>,
}

impl Test {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_retry(mut self, retry_index: u32) -> Self {
        self.retry_index = retry_index;
        self
    }

    /// Title shown remotely; retries carry their attempt number
    pub fn display_title(&self) -> String {
        if self.retry_index > 0 {
            format!("{} (Retry {})", self.title, self.retry_index)
        } else {
            self.title.clone()
        }
    }

    pub fn is_retry(&self) -> bool {
        self.retry_index > 0
    }

    pub fn attributes(&self) -> Vec<Attribute> {
        self.tags.iter().map(|t| Attribute::from_tag(t)).collect()
    }
}

/// A composite action wrapping finer-grained steps
///
/// `parent` points outward: the chain runs from the innermost meta-step to
/// the outermost one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetaStep {
    pub actor: String,
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub parent: Option<Box<MetaStep>>,
}

impl MetaStep {
    pub fn new(actor: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Nest this meta-step inside `parent`
    pub fn within(mut self, parent: MetaStep) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// Walk from this meta-step outward
    pub fn chain(&self) -> impl Iterator<Item = &MetaStep> {
        std::iter::successors(Some(self), |m| m.parent.as_deref())
    }

}

/// An atomic action
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Step {
    pub actor: String,
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Innermost enclosing meta-step
    #[serde(default)]
    pub meta_step: Option<MetaStep>,
    #[serde(default)]
    pub status: Option<ItemStatus>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(actor: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn within(mut self, meta_step: MetaStep) -> Self {
        self.meta_step = Some(meta_step);
        self
    }

    pub fn label(&self) -> String {
        label(&self.actor, &self.name, &self.args)
    }
}

/// Error reported with a failed test
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestFailure {
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
}

impl TestFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    /// Descriptive text sent to the failed item
    pub fn text(&self) -> String {
        match &self.stack {
            Some(stack) if !stack.is_empty() => format!("{}\n{}", self.message, stack),
            _ => self.message.clone(),
        }
    }
}

/// Every notification the host can emit, in wire form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    RunStarted,
    SuiteStarted {
        suite: Suite,
    },
    TestStarted {
        test: Test,
    },
    StepStarted {
        step: Step,
    },
    StepPassed {
        step: Step,
    },
    StepFailed {
        step: Step,
    },
    StepFinished {
        step: Step,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    TestPassed {
        test: Test,
    },
    TestFailed {
        test: Test,
        #[serde(default)]
        failure: TestFailure,
    },
    TestFinished {
        test: Test,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    SuiteFinished {
        suite: Suite,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    RunFinished,
    Log {
        #[serde(default)]
        level: LogLevel,
        message: String,
        #[serde(default)]
        file: Option<PathBuf>,
    },
}

fn label(actor: &str, name: &str, args: &[String]) -> String {
    let mut text = match (actor.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (false, true) => actor.to_string(),
        (false, false) => format!("{} {}", actor, name),
    };
    if !args.is_empty() {
        text.push(' ');
        text.push_str(&args.join(", "));
    }
    truncate_label(&text)
}

/// Cut a label down to [`MAX_LABEL_CHARS`] characters
pub fn truncate_label(text: &str) -> String {
    match text.char_indices().nth(MAX_LABEL_CHARS) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
