//! Scripted command runner for tests.
//!
//! Answers commands from substring rules instead of spawning processes
//! and records every invocation, so allocator and deployer behavior can
//! be asserted without a cluster or cloud account.

use std::sync::Mutex;

use async_trait::async_trait;

use fullnet_core::{ReconcileError, ReconcileResult};

use crate::runner::{CommandRunner, render};

#[derive(Debug, Clone)]
enum Reply {
    Stdout(String),
    Stderr(String),
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    reply: Reply,
    /// `None` answers forever; `Some(n)` answers n more times.
    remaining: Option<usize>,
}

/// In-memory `CommandRunner`.
///
/// Rules are checked in insertion order; the first rule whose pattern is
/// a substring of the rendered command line answers. Unmatched commands
/// succeed with empty stdout.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer matching commands with `stdout`.
    pub fn on(&self, pattern: &str, stdout: &str) -> &Self {
        self.push(pattern, Reply::Stdout(stdout.to_string()), None)
    }

    /// Fail matching commands with `stderr`.
    pub fn on_err(&self, pattern: &str, stderr: &str) -> &Self {
        self.push(pattern, Reply::Stderr(stderr.to_string()), None)
    }

    /// Answer matching commands with `stdout` for the next `times` calls only.
    pub fn on_times(&self, pattern: &str, stdout: &str, times: usize) -> &Self {
        self.push(pattern, Reply::Stdout(stdout.to_string()), Some(times))
    }

    /// Fail matching commands with `stderr` for the next `times` calls only.
    pub fn on_err_times(&self, pattern: &str, stderr: &str, times: usize) -> &Self {
        self.push(pattern, Reply::Stderr(stderr.to_string()), Some(times))
    }

    /// Every command line executed so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Executed command lines containing `pattern`.
    pub fn calls_matching(&self, pattern: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.contains(pattern))
            .collect()
    }

    /// Position of the first executed command containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.contains(pattern))
    }

    fn push(&self, pattern: &str, reply: Reply, remaining: Option<usize>) -> &Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                pattern: pattern.to_string(),
                reply,
                remaining,
            });
        }
        self
    }

    fn answer(&self, line: &str) -> Option<Reply> {
        let mut rules = self.rules.lock().ok()?;
        let rule = rules
            .iter_mut()
            .find(|r| r.remaining != Some(0) && line.contains(&r.pattern))?;
        if let Some(n) = rule.remaining.as_mut() {
            *n -= 1;
        }
        Some(rule.reply.clone())
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> ReconcileResult<String> {
        let line = render(program, args);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(line.clone());
        }
        match self.answer(&line) {
            Some(Reply::Stdout(out)) => Ok(out),
            Some(Reply::Stderr(err)) => Err(ReconcileError::command(line, err)),
            None => Ok(String::new()),
        }
    }
}
