//! Mock platform and text generator for testing

use async_trait::async_trait;
use curfew_api::Notification;
use curfew_util::SubjectId;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{Platform, PlatformError, PlatformResult, TextGenerator};

/// Mock transport for unit/integration testing
///
/// Tracks who is present in the monitored state and records every outbound
/// call. A successful `force_exit` removes the subject from the presence set,
/// like the real transport would.
#[derive(Default)]
pub struct MockPlatform {
    present: Mutex<HashSet<SubjectId>>,
    exits: Mutex<Vec<SubjectId>>,
    notifications: Mutex<Vec<Notification>>,

    /// Configure force_exit to fail
    pub fail_force_exit: Arc<Mutex<bool>>,

    /// Configure notify to fail
    pub fail_notify: Arc<Mutex<bool>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a subject into (or take them out of) the monitored state
    pub fn set_present(&self, subject: SubjectId, present: bool) {
        let mut set = self.present.lock().unwrap();
        if present {
            set.insert(subject);
        } else {
            set.remove(&subject);
        }
    }

    /// Subjects force-exited so far, in call order
    pub fn exits(&self) -> Vec<SubjectId> {
        self.exits.lock().unwrap().clone()
    }

    pub fn exit_count(&self, subject: SubjectId) -> usize {
        self.exits.lock().unwrap().iter().filter(|s| **s == subject).count()
    }

    /// Notifications posted so far, in call order
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn force_exit(&self, subject: SubjectId) -> PlatformResult<()> {
        if *self.fail_force_exit.lock().unwrap() {
            return Err(PlatformError::Delivery("Mock force_exit failure".into()));
        }

        self.exits.lock().unwrap().push(subject);
        self.present.lock().unwrap().remove(&subject);
        Ok(())
    }

    async fn notify(&self, notification: Notification) -> PlatformResult<()> {
        if *self.fail_notify.lock().unwrap() {
            return Err(PlatformError::Delivery("Mock notify failure".into()));
        }

        self.notifications.lock().unwrap().push(notification);
        Ok(())
    }

    fn is_in_monitored_state(&self, subject: SubjectId) -> bool {
        self.present.lock().unwrap().contains(&subject)
    }
}

/// One scripted generator reply
#[derive(Debug, Clone)]
pub enum Script {
    Reply(String),
    Fail,
    /// Sleep before replying (for timeout tests)
    Delay(Duration, String),
}

/// Text generator that plays back a script, then repeats the last step
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Script>>,
    last: Mutex<Option<Script>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(script: impl IntoIterator<Item = Script>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always reply with `text`
    pub fn replying(text: impl Into<String>) -> Self {
        Self::new([Script::Reply(text.into())])
    }

    /// Always fail
    pub fn failing() -> Self {
        Self::new([Script::Fail])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, after any caller-side sanitizing
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn next_step(&self) -> Option<Script> {
        let step = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match step {
            Some(step) => {
                *last = Some(step.clone());
                Some(step)
            }
            None => last.clone(),
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, _system: &str, prompt: &str) -> PlatformResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        match self.next_step() {
            Some(Script::Reply(text)) => Ok(text),
            Some(Script::Delay(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Some(Script::Fail) | None => {
                Err(PlatformError::Generation("Mock generation failure".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curfew_api::{ChannelHint, NotificationKind};

    #[tokio::test]
    async fn mock_force_exit_clears_presence() {
        let platform = MockPlatform::new();
        let subject = SubjectId::new(1);
        platform.set_present(subject, true);
        assert!(platform.is_in_monitored_state(subject));

        platform.force_exit(subject).await.unwrap();

        assert!(!platform.is_in_monitored_state(subject));
        assert_eq!(platform.exits(), vec![subject]);
    }

    #[tokio::test]
    async fn mock_failures_record_nothing() {
        let platform = MockPlatform::new();
        *platform.fail_notify.lock().unwrap() = true;

        let result = platform
            .notify(Notification {
                channel: ChannelHint::General,
                kind: NotificationKind::Violation,
                subject: None,
                text: "hi".into(),
            })
            .await;

        assert!(result.is_err());
        assert!(platform.notifications().is_empty());
    }

    #[tokio::test]
    async fn scripted_generator_repeats_last_step() {
        let generator = ScriptedGenerator::new([
            Script::Reply("first".into()),
            Script::Fail,
        ]);

        assert_eq!(generator.generate("sys", "a").await.unwrap(), "first");
        assert!(generator.generate("sys", "b").await.is_err());
        assert!(generator.generate("sys", "c").await.is_err());
        assert_eq!(generator.call_count(), 3);
        assert_eq!(generator.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_generator_delay() {
        let generator = ScriptedGenerator::new([Script::Delay(
            Duration::from_secs(10),
            "late".into(),
        )]);

        let start = tokio::time::Instant::now();
        assert_eq!(generator.generate("sys", "x").await.unwrap(), "late");
        assert!(start.elapsed() >= Duration::from_secs(10));
    }
}
