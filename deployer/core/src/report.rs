//! Operator-facing progress reporting.
//!
//! Progress messages carry a nesting context (`[system][deployment]`)
//! built up as the orchestrator recurses. The context is an explicit value
//! threaded through the call chain: each scope derives a child context and
//! the parent's value is untouched, so there is no shared prefix state to
//! save and restore.

use tracing::info;

/// Nesting context for status messages.
#[derive(Debug, Clone, Default)]
pub struct StatusContext {
    prefix: String,
}

impl StatusContext {
    /// Context for the top of a cluster deployment.
    pub fn root() -> Self {
        Self::default()
    }

    /// Derive a child context labelled with one more scope.
    pub fn child(&self, label: &str) -> Self {
        Self {
            prefix: format!("{}[{}]", self.prefix, label),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Sink for operator-facing progress messages.
pub trait StatusReporter: Send + Sync {
    fn status(&self, context: &StatusContext, message: &str);
}

/// Reporter that forwards progress to the tracing subscriber.
#[derive(Debug, Default)]
pub struct LogReporter;

impl StatusReporter for LogReporter {
    fn status(&self, context: &StatusContext, message: &str) {
        if context.prefix().is_empty() {
            info!("{message}");
        } else {
            info!("{} {message}", context.prefix());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_contexts_nest_without_mutating_parent() {
        let root = StatusContext::root();
        let system = root.child("systems/base.morph");
        let deployment = system.child("host1");

        assert_eq!(root.prefix(), "");
        assert_eq!(system.prefix(), "[systems/base.morph]");
        assert_eq!(deployment.prefix(), "[systems/base.morph][host1]");
    }
}
