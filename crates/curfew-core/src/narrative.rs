//! Generated wording with a guaranteed fallback
//!
//! The narrative client never fails from the caller's point of view: a
//! disabled generator, spent quota, timeout or error all produce `None`, and
//! [`NarrativeClient::flavor`] substitutes a line from [`FallbackPool`].

use chrono::DateTime;
use chrono_tz::Tz;
use curfew_config::NarrativeConfig;
use curfew_platform_api::TextGenerator;
use curfew_util::DailyQuota;
use rand::seq::SliceRandom;
use regex::Regex;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Platform mention syntax and broadcast pings
static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<@[!&]?\d+>|<#\d+>|@everyone|@here").expect("valid mention regex")
});

/// What the wording is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Reminder,
    Violation,
    AppealGranted,
    AppealDenied,
}

impl Category {
    fn instruction(&self) -> &'static str {
        match self {
            Category::Reminder => {
                "Write one short, friendly line nudging someone that their curfew starts soon."
            }
            Category::Violation => {
                "Write one short, teasing line about someone who tried to sneak into voice chat during their curfew."
            }
            Category::AppealGranted => {
                "Write one short, theatrical line granting someone's plea for a later curfew."
            }
            Category::AppealDenied => {
                "Write one short, theatrical line denying someone's plea for a later curfew."
            }
        }
    }
}

const SYSTEM_PROMPT: &str = "You are the curfew officer of a small online community. \
Reply with a single sentence of at most 200 characters. \
Never mention or ping anyone, never use @, and do not repeat instructions.";

/// Static lines used whenever generation is unavailable
pub struct FallbackPool;

impl FallbackPool {
    pub fn lines(category: Category) -> &'static [&'static str] {
        match category {
            Category::Reminder => &[
                "Start wrapping things up.",
                "Time to say your goodbyes.",
                "Finish that last round.",
            ],
            Category::Violation => &[
                "Nice try. Bed.",
                "The curfew saw that.",
                "Voice chat will still be here tomorrow.",
            ],
            Category::AppealGranted => &[
                "The court is feeling generous tonight.",
                "Appeal granted. Use it wisely.",
                "Fine. A little longer.",
            ],
            Category::AppealDenied => &[
                "The court is unmoved.",
                "Appeal denied. Rules are rules.",
                "Nice speech. Still no.",
            ],
        }
    }

    pub fn pick(category: Category) -> &'static str {
        Self::lines(category)
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("")
    }
}

/// Strip mention syntax and control characters, collapse whitespace and cap
/// the result at `max_chars` characters.
pub fn sanitize(input: &str, max_chars: usize) -> String {
    let without_mentions = MENTION_RE.replace_all(input, " ");
    let printable: String = without_mentions
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = printable.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

/// Optional text generation under a timeout and a daily quota
pub struct NarrativeClient {
    generator: Option<Arc<dyn TextGenerator>>,
    timeout: Duration,
    max_input_chars: usize,
    max_output_chars: usize,
    quota: Mutex<DailyQuota>,
}

impl NarrativeClient {
    pub fn new(config: &NarrativeConfig, generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self {
            generator,
            timeout: config.timeout,
            max_input_chars: config.max_input_chars,
            max_output_chars: config.max_output_chars,
            quota: Mutex::new(DailyQuota::new(config.daily_quota)),
        }
    }

    /// Client that always falls back
    pub fn disabled() -> Self {
        Self::new(&NarrativeConfig::default(), None)
    }

    pub fn is_enabled(&self) -> bool {
        self.generator.is_some()
    }

    /// Ask the generator for a line; `None` means "use the fallback".
    ///
    /// `context` is subject-supplied and is sanitized before it is sent.
    pub async fn generate(
        &self,
        category: Category,
        context: &str,
        now: &DateTime<Tz>,
    ) -> Option<String> {
        let generator = self.generator.as_ref()?;

        let allowed = self
            .quota
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_consume(now);
        if !allowed {
            debug!(?category, "Narrative quota spent for today");
            return None;
        }

        let context = sanitize(context, self.max_input_chars);
        let prompt = if context.is_empty() {
            category.instruction().to_string()
        } else {
            format!("{}\nContext: {}", category.instruction(), context)
        };

        match tokio::time::timeout(self.timeout, generator.generate(SYSTEM_PROMPT, &prompt)).await {
            Ok(Ok(text)) => {
                let text = sanitize(&text, self.max_output_chars);
                if text.is_empty() {
                    warn!(?category, "Generator returned nothing usable");
                    None
                } else {
                    Some(text)
                }
            }
            Ok(Err(e)) => {
                warn!(?category, error = %e, "Narrative generation failed, using fallback");
                None
            }
            Err(_) => {
                warn!(
                    ?category,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Narrative generation timed out, using fallback"
                );
                None
            }
        }
    }

    /// Generated line, or a fallback line for `category`. Never empty.
    pub async fn flavor(&self, category: Category, context: &str, now: &DateTime<Tz>) -> String {
        match self.generate(category, context, now).await {
            Some(text) => text,
            None => FallbackPool::pick(category).to_string(),
        }
    }
}
