use crate::error::Result;
use crate::runner::{CommandOutput, CommandRunner};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct Rule {
    prefix: Vec<String>,
    output: CommandOutput,
    remaining: Option<usize>,
}

/// Scripted command runner for tests
///
/// Responses are matched against the rendered command line ("zpool import cstor-a")
/// by prefix. The most recently registered matching rule wins; one-shot rules are
/// consumed when used. Unmatched commands succeed with empty output.
#[derive(Debug, Clone, Default)]
pub struct MockRunner {
    rules: Arc<Mutex<Vec<Rule>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, prefix: &str, output: CommandOutput, remaining: Option<usize>) {
        self.rules.lock().push(Rule {
            prefix: prefix.split_whitespace().map(String::from).collect(),
            output,
            remaining,
        });
    }

    /// Always answer commands starting with `prefix` with a successful `output`
    pub fn succeed(&self, prefix: &str, output: &str) -> &Self {
        self.push(prefix, CommandOutput::success(output), None);
        self
    }

    /// Always fail commands starting with `prefix`
    pub fn fail(&self, prefix: &str, output: &str) -> &Self {
        self.push(prefix, CommandOutput::failure(output, 1), None);
        self
    }

    /// Answer the next `times` matching commands, then fall through to older rules
    pub fn respond_times(&self, prefix: &str, output: CommandOutput, times: usize) -> &Self {
        self.push(prefix, output, Some(times));
        self
    }

    /// Every command line run so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Command lines starting with `prefix`
    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(program.to_string());
        argv.extend(args.iter().cloned());
        let line = argv.join(" ");
        debug!("Mock: {}", line);
        self.calls.lock().push(line);

        let mut rules = self.rules.lock();
        let hit = rules.iter_mut().rev().find(|r| {
            r.remaining != Some(0)
                && r.prefix.len() <= argv.len()
                && r.prefix.iter().zip(argv.iter()).all(|(a, b)| a == b)
        });

        Ok(match hit {
            Some(rule) => {
                if let Some(n) = rule.remaining.as_mut() {
                    *n -= 1;
                }
                rule.output.clone()
            }
            None => CommandOutput::success(""),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[tokio::test]
    async fn test_latest_rule_wins_and_one_shots_expire() {
        let mock = MockRunner::new();
        mock.fail("zpool get", "no such pool");
        mock.respond_times("zpool get", CommandOutput::success("cstor-a\n"), 1);

        let first = mock.run("zpool", &args("get -Hp -o name name")).await.unwrap();
        assert!(first.is_success());
        let second = mock.run("zpool", &args("get -Hp -o name name")).await.unwrap();
        assert!(!second.is_success());
        assert_eq!(mock.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_unmatched_commands_succeed() {
        let mock = MockRunner::new();
        mock.fail("zpool import", "cannot import");
        let out = mock.run("zfs", &args("get -Hp -o name name")).await.unwrap();
        assert!(out.is_success());
        assert_eq!(mock.calls_matching("zfs get"), vec!["zfs get -Hp -o name name"]);
    }
}
