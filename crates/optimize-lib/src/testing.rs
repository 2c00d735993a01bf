//! Scripted collaborators for unit tests

use crate::adapter::{AdapterKind, InsightAdapter};
use crate::error::{Error, Result};
use crate::models::{Approval, ContainerKey, Insight, ResourceBlock};
use crate::process::{CommandOutput, CommandRunner, CommandSpec};
use crate::prompt::Prompter;
use crate::secrets::{SecretBag, SecretStore};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

enum Reply {
    Ok(String),
    Fail(i32, String),
}

/// Command runner answering by command-line prefix
///
/// Later rules take precedence; unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<(String, Reply)>>,
    calls: Mutex<Vec<String>>,
    attached_status: Mutex<i32>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, prefix: &str, stdout: &str) {
        self.rules
            .lock()
            .unwrap()
            .push((prefix.to_string(), Reply::Ok(stdout.to_string())));
    }

    pub fn fail(&self, prefix: &str, status: i32, stderr: &str) {
        self.rules
            .lock()
            .unwrap()
            .push((prefix.to_string(), Reply::Fail(status, stderr.to_string())));
    }

    pub fn set_attached_status(&self, status: i32) {
        *self.attached_status.lock().unwrap() = status;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(&self, command: &CommandSpec) -> Result<CommandOutput> {
        let line = command.to_string();
        self.calls.lock().unwrap().push(line.clone());

        let rules = self.rules.lock().unwrap();
        match rules.iter().rev().find(|(prefix, _)| line.starts_with(prefix)) {
            Some((_, Reply::Ok(stdout))) => Ok(CommandOutput {
                stdout: stdout.clone(),
                stderr: String::new(),
                status: 0,
            }),
            Some((_, Reply::Fail(status, stderr))) => Err(Error::Exec {
                program: command.program.clone(),
                status: Some(*status),
                stderr: stderr.clone(),
            }),
            None => Ok(CommandOutput::default()),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        self.answer(command)
    }

    async fn pipe(&self, producer: &CommandSpec, consumer: &CommandSpec) -> Result<String> {
        self.answer(producer)?;
        Ok(self.answer(consumer)?.stdout)
    }

    async fn run_attached(&self, command: &CommandSpec) -> Result<i32> {
        self.calls.lock().unwrap().push(command.to_string());
        Ok(*self.attached_status.lock().unwrap())
    }
}

/// Secret store held in memory
#[derive(Default)]
pub struct MemorySecretStore {
    bags: Mutex<HashMap<String, SecretBag>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn read(&self, name: &str) -> Result<Option<SecretBag>> {
        Ok(self.bags.lock().unwrap().get(name).cloned())
    }

    async fn write(&self, name: &str, values: &SecretBag) -> Result<()> {
        let mut bags = self.bags.lock().unwrap();
        let bag = bags.entry(name.to_string()).or_default();
        bag.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn delete_key(&self, name: &str, key: &str) -> Result<()> {
        if let Some(bag) = self.bags.lock().unwrap().get_mut(name) {
            bag.remove(key);
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.bags.lock().unwrap().remove(name);
        Ok(())
    }
}

/// Prompter replaying queued answers; an exhausted queue answers with the default
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }

    fn next(&self, message: &str) -> Option<String> {
        self.asked.lock().unwrap().push(message.to_string());
        self.answers.lock().unwrap().pop_front()
    }
}

impl Prompter for ScriptedPrompter {
    fn input(&self, message: &str, default: Option<&str>) -> Result<String> {
        let answer = self.next(message).unwrap_or_default();
        if answer.is_empty() {
            return Ok(default.unwrap_or_default().to_string());
        }
        Ok(answer)
    }

    fn secret(&self, message: &str) -> Result<String> {
        Ok(self.next(message).unwrap_or_default())
    }

    fn confirm(&self, message: &str, default: bool) -> Result<bool> {
        match self.next(message).as_deref() {
            None | Some("") => Ok(default),
            Some(answer) => Ok(answer.eq_ignore_ascii_case("y")),
        }
    }
}

/// In-memory insight repository
#[derive(Default)]
pub struct FakeAdapter {
    records: Mutex<HashMap<ContainerKey, (ResourceBlock, ResourceBlock, Approval)>>,
    set_calls: Mutex<Vec<(bool, ContainerKey)>>,
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container with its current and recommended blocks
    pub fn insert(
        &self,
        key: ContainerKey,
        current: ResourceBlock,
        recommended: ResourceBlock,
        approval: Approval,
    ) {
        self.records
            .lock()
            .unwrap()
            .insert(key, (current, recommended, approval));
    }

    pub fn set_calls(&self) -> Vec<(bool, ContainerKey)> {
        self.set_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl InsightAdapter for FakeAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Analytics
    }

    async fn initialize(&mut self, _prompter: &dyn Prompter) -> Result<()> {
        Ok(())
    }

    async fn get_insight(&self, key: &ContainerKey) -> Result<Insight> {
        let records = self.records.lock().unwrap();
        let (current, recommended, approval) = records
            .get(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;

        Ok(Insight {
            resources: if approval.is_approved() {
                *recommended
            } else {
                *current
            },
            approval: *approval,
        })
    }

    async fn get_approval(&self, key: &ContainerKey) -> Result<Approval> {
        Ok(self.get_insight(key).await?.approval)
    }

    async fn set_approval(&self, approved: bool, key: &ContainerKey) -> Result<()> {
        self.set_calls
            .lock()
            .unwrap()
            .push((approved, key.clone()));

        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        record.2 = Approval::from(approved);
        Ok(())
    }
}
