use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::{BotConfig, ReplyConfig};
use crate::platform::webhook::{Event, MessageContent, MessageEvent};
use crate::platform::MessagingApi;
use crate::profiles::ProfileCache;

/// Fill `{name}` and `{text}` in a single pass, so placeholders that appear
/// inside the substituted values are left alone.
fn render(template: &str, name: &str, text: &str) -> String {
    let mut out = String::with_capacity(template.len() + name.len() + text.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("{name}") {
            out.push_str(name);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{text}") {
            out.push_str(text);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Handles verified webhook events: keeps the profile cache current and
/// answers text messages.
pub struct Bot {
    api: Arc<dyn MessagingApi>,
    profiles: Arc<ProfileCache>,
    replies: ReplyConfig,
    refresh_profiles: bool,
}

impl Bot {
    pub fn new(
        api: Arc<dyn MessagingApi>,
        profiles: Arc<ProfileCache>,
        replies: ReplyConfig,
        bot: &BotConfig,
    ) -> Self {
        Self {
            api,
            profiles,
            replies,
            refresh_profiles: bot.refresh_profiles,
        }
    }

    pub async fn handle_event(&self, event: &Event) -> Result<()> {
        match event {
            Event::Message(message) => self.handle_message(message).await,
            Event::Other => {
                debug!("Ignoring non-message event");
                Ok(())
            }
        }
    }

    async fn handle_message(&self, event: &MessageEvent) -> Result<()> {
        let text = match &event.message {
            MessageContent::Text { text } => text,
            MessageContent::Other => {
                debug!("Ignoring non-text message");
                return Ok(());
            }
        };

        let Some(user_id) = event.source.user_id.as_deref() else {
            debug!("Ignoring {} message without a user id", event.source.kind);
            return Ok(());
        };

        let display_name = self.resolve_display_name(user_id).await;
        self.profiles.upsert(user_id, &display_name).await;

        info!("LINE message from {} ({}): {}", display_name, user_id, text);

        let Some(reply_token) = event.reply_token.as_deref() else {
            debug!("No reply token for message from {}, not replying", user_id);
            return Ok(());
        };

        let reply = self.compose_reply(&display_name, text);
        self.api.reply_text(reply_token, &reply).await
    }

    /// Profile fetch with local recovery: a failed fetch falls back to the
    /// cached name, then to the configured placeholder.
    async fn resolve_display_name(&self, user_id: &str) -> String {
        let cached = self.profiles.get(user_id).await;
        if !self.refresh_profiles {
            if let Some(name) = cached {
                return name;
            }
        }

        match self.api.get_display_name(user_id).await {
            Ok(name) => name,
            Err(e) => {
                warn!("Failed to fetch profile for {}: {:#}", user_id, e);
                cached.unwrap_or_else(|| self.replies.fallback_name.clone())
            }
        }
    }

    pub fn compose_reply(&self, display_name: &str, text: &str) -> String {
        if text == self.replies.greeting {
            render(&self.replies.greeting_template, display_name, text)
        } else {
            render(&self.replies.echo_template, display_name, text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::FakeApi;
    use crate::platform::webhook::Source;
    use std::sync::atomic::Ordering;

    fn bot_with(refresh_profiles: bool) -> (Bot, Arc<FakeApi>, Arc<ProfileCache>) {
        let api = Arc::new(FakeApi::new());
        let profiles = Arc::new(ProfileCache::in_memory());
        let bot = Bot::new(
            api.clone(),
            profiles.clone(),
            ReplyConfig::default(),
            &BotConfig { refresh_profiles },
        );
        (bot, api, profiles)
    }

    fn text_event(user_id: Option<&str>, token: &str, text: &str) -> Event {
        Event::Message(MessageEvent {
            reply_token: Some(token.to_string()),
            source: Source {
                kind: "user".to_string(),
                user_id: user_id.map(str::to_string),
            },
            message: MessageContent::Text {
                text: text.to_string(),
            },
        })
    }

    #[test]
    fn test_render_substitutes_once() {
        assert_eq!(render("{name}，您说了：{text}", "Ann", "hi"), "Ann，您说了：hi");
        assert_eq!(render("{text} {text}", "Ann", "x"), "x x");
        // Values containing placeholders are not expanded again
        assert_eq!(render("{name}: {text}", "{text}", "{name}"), "{text}: {name}");
        assert_eq!(render("{unknown} {", "Ann", "x"), "{unknown} {");
    }

    #[test]
    fn test_greeting_and_echo_branches() {
        let (bot, _, _) = bot_with(true);
        assert_eq!(
            bot.compose_reply("小明", "你好"),
            "小明，你好！有什么我可以帮助您的吗？"
        );
        assert_eq!(bot.compose_reply("小明", "你好!"), "小明，您说了：你好!");
        assert_eq!(bot.compose_reply("小明", " 你好"), "小明，您说了： 你好");
    }

    #[tokio::test]
    async fn test_text_message_caches_profile_and_replies() {
        let (bot, api, profiles) = bot_with(true);
        api.set_name("U1", "Alice");

        bot.handle_event(&text_event(Some("U1"), "tok-1", "weather?"))
            .await
            .unwrap();

        assert_eq!(profiles.get("U1").await.as_deref(), Some("Alice"));
        let replies = api.replies.lock().unwrap().clone();
        assert_eq!(
            replies,
            vec![("tok-1".to_string(), "Alice，您说了：weather?".to_string())]
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_uses_placeholder() {
        let (bot, api, profiles) = bot_with(true);

        bot.handle_event(&text_event(Some("U9"), "tok", "你好"))
            .await
            .unwrap();

        assert_eq!(profiles.get("U9").await.as_deref(), Some("用户"));
        assert_eq!(api.reply_texts(), vec!["用户，你好！有什么我可以帮助您的吗？"]);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_last_fetched_name() {
        let (bot, api, profiles) = bot_with(true);
        api.set_name("U1", "Alice");
        bot.handle_event(&text_event(Some("U1"), "t1", "a"))
            .await
            .unwrap();

        api.remove_name("U1");
        bot.handle_event(&text_event(Some("U1"), "t2", "b"))
            .await
            .unwrap();

        assert_eq!(profiles.get("U1").await.as_deref(), Some("Alice"));
        assert_eq!(api.reply_texts()[1], "Alice，您说了：b");
    }

    #[tokio::test]
    async fn test_refresh_picks_up_renamed_user() {
        let (bot, api, profiles) = bot_with(true);
        api.set_name("U1", "Alice");
        bot.handle_event(&text_event(Some("U1"), "t1", "a"))
            .await
            .unwrap();

        api.set_name("U1", "Alicia");
        bot.handle_event(&text_event(Some("U1"), "t2", "a"))
            .await
            .unwrap();

        assert_eq!(profiles.get("U1").await.as_deref(), Some("Alicia"));
        assert_eq!(api.profile_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_fetch_without_refresh() {
        let (bot, api, _) = bot_with(false);
        api.set_name("U1", "Alice");

        bot.handle_event(&text_event(Some("U1"), "t1", "a"))
            .await
            .unwrap();
        api.set_name("U1", "Alicia");
        bot.handle_event(&text_event(Some("U1"), "t2", "a"))
            .await
            .unwrap();

        assert_eq!(api.profile_calls.load(Ordering::SeqCst), 1);
        assert_eq!(api.reply_texts()[1], "Alice，您说了：a");
    }

    #[tokio::test]
    async fn test_missing_reply_token_caches_without_replying() {
        let (bot, api, profiles) = bot_with(true);
        api.set_name("U1", "Alice");

        bot.handle_event(&Event::Message(MessageEvent {
            reply_token: None,
            source: Source {
                kind: "user".to_string(),
                user_id: Some("U1".to_string()),
            },
            message: MessageContent::Text {
                text: "hi".to_string(),
            },
        }))
        .await
        .unwrap();

        assert_eq!(profiles.get("U1").await.as_deref(), Some("Alice"));
        assert!(api.reply_texts().is_empty());
    }

    #[tokio::test]
    async fn test_replayed_event_is_idempotent() {
        let (bot, api, profiles) = bot_with(true);
        api.set_name("U1", "Alice");
        let event = text_event(Some("U1"), "tok", "same text");

        bot.handle_event(&event).await.unwrap();
        bot.handle_event(&event).await.unwrap();

        let texts = api.reply_texts();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0], texts[1]);
        assert_eq!(profiles.count().await, 1);
    }

    #[tokio::test]
    async fn test_non_text_and_other_events_are_noops() {
        let (bot, api, profiles) = bot_with(true);
        api.set_name("U1", "Alice");

        bot.handle_event(&Event::Other).await.unwrap();
        bot.handle_event(&Event::Message(MessageEvent {
            reply_token: Some("tok".to_string()),
            source: Source {
                kind: "user".to_string(),
                user_id: Some("U1".to_string()),
            },
            message: MessageContent::Other,
        }))
        .await
        .unwrap();
        bot.handle_event(&text_event(None, "tok", "hello from a group"))
            .await
            .unwrap();

        assert!(api.reply_texts().is_empty());
        assert_eq!(profiles.count().await, 0);
        assert_eq!(api.profile_calls.load(Ordering::SeqCst), 0);
    }
}
