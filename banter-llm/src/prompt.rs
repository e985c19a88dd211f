//! Prompt templates and reply clean-up.
//!
//! The system half carries the persona and the live character context; the
//! user half carries the recent history and the message to answer. Both are
//! plain `{key}` templates filled by [`render_template`].

use banter_core::personality::PersonalityProfile;
use banter_core::types::{ChatScope, Participant};

use crate::types::GenerationRequest;

/// Longest line a reply may occupy in chat.
pub const MAX_REPLY_CHARS: usize = 255;

/// Persona and rules.
pub const CHAT_SYSTEM: &str = r"{personality_prompt}

You are {bot_description}. You are a player in a fantasy online world, chatting with other players.
Stay in character for this world, but like any real player you may also talk about everyday topics, jokes and the game itself.

RULES:
- Reply with a single short chat line, at most two sentences.
- Do not prefix the reply with your name and do not use quotation marks.
- Never mention being an AI, a model or a bot.
- Tone: {response_style}.";

/// Optional lines appended to the system half.
pub const TRAITS_LINE: &str = "Your traits: {traits}.";
/// Interests line.
pub const INTERESTS_LINE: &str = "You like talking about: {interests}.";
/// Example phrasing line.
pub const STYLE_LINE: &str = "You tend to say things like: {examples}.";
/// Backstory line.
pub const BACKSTORY_LINE: &str = "Your backstory: {backstory}";
/// Standing line.
pub const STANDING_LINE: &str = "Your opinion of {sender_name}: {standing}.";

/// History and message.
pub const CHAT_USER: &str = r#"{history_block}{sender_description} says to you in {channel} chat: "{message}"

Reply as {bot_name}:"#;

/// History block template, used only when there is history.
pub const HISTORY_BLOCK: &str = "Your recent conversation with {sender_name} (newest first):\n{history}\n";

/// Style hint used when the emotion table has none.
pub const DEFAULT_RESPONSE_STYLE: &str = "casual and friendly";

/// Simple template interpolation for prompts.
///
/// Replaces `{key}` with the corresponding value in a single left-to-right
/// pass. Inserted values are never scanned again, so braces in player text
/// survive verbatim; unknown `{...}` sequences are left as they are.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let hit = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, value)| (*value, close))
        });
        match hit {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Everything a prompt is composed from.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    /// Selected personality.
    pub profile: &'a PersonalityProfile,
    /// Bot that will answer.
    pub responder: &'a Participant,
    /// Who spoke.
    pub sender: &'a Participant,
    /// Where they spoke.
    pub scope: &'a ChatScope,
    /// Style hint for the detected emotion.
    pub response_style: Option<&'a str>,
    /// Rendered recent history (may be empty).
    pub history: &'a str,
    /// Persisted backstory of the responder.
    pub backstory: Option<&'a str>,
    /// Responder's standing towards the sender.
    pub standing: i64,
    /// The message being answered.
    pub message: &'a str,
}

fn standing_label(standing: i64) -> &'static str {
    match standing {
        i64::MIN..=-50 => "you dislike them",
        -49..=-10 => "you are wary of them",
        -9..=9 => "neutral",
        10..=49 => "you like them",
        _ => "they are a good friend",
    }
}

/// Compose the two prompt halves.
#[must_use]
pub fn compose(inputs: &PromptInputs<'_>) -> GenerationRequest {
    let bot_description = inputs.responder.describe();
    let style = inputs.response_style.unwrap_or(DEFAULT_RESPONSE_STYLE);
    let mut system = render_template(
        CHAT_SYSTEM,
        &[
            ("personality_prompt", inputs.profile.prompt.trim()),
            ("bot_description", &bot_description),
            ("response_style", style),
        ],
    );

    let mut extra = Vec::new();
    let traits = inputs.profile.traits_summary();
    if !traits.is_empty() {
        extra.push(render_template(TRAITS_LINE, &[("traits", &traits)]));
    }
    if !inputs.profile.interests.is_empty() {
        extra.push(render_template(
            INTERESTS_LINE,
            &[("interests", &inputs.profile.interests.join(", "))],
        ));
    }
    if !inputs.profile.chat_style.is_empty() {
        extra.push(render_template(
            STYLE_LINE,
            &[("examples", &inputs.profile.chat_style.join(" / "))],
        ));
    }
    if let Some(backstory) = inputs.backstory.filter(|b| !b.trim().is_empty()) {
        extra.push(render_template(BACKSTORY_LINE, &[("backstory", backstory.trim())]));
    }
    if inputs.standing != 0 {
        extra.push(render_template(
            STANDING_LINE,
            &[
                ("sender_name", &inputs.sender.name),
                ("standing", standing_label(inputs.standing)),
            ],
        ));
    }
    if !extra.is_empty() {
        system.push_str("\n\n");
        system.push_str(&extra.join("\n"));
    }

    let history_block = if inputs.history.is_empty() {
        String::new()
    } else {
        render_template(
            HISTORY_BLOCK,
            &[("sender_name", &inputs.sender.name), ("history", inputs.history)],
        )
    };
    let user = render_template(
        CHAT_USER,
        &[
            ("history_block", &history_block),
            ("sender_description", &inputs.sender.describe()),
            ("channel", inputs.scope.label()),
            ("message", inputs.message),
            ("bot_name", &inputs.responder.name),
        ],
    );

    GenerationRequest::new(system, user, inputs.responder.name.clone())
}

fn strip_speaker<'a>(text: &'a str, speaker: &str) -> &'a str {
    if speaker.is_empty() {
        return text;
    }
    match (text.get(..speaker.len()), text.get(speaker.len()..)) {
        (Some(head), Some(rest)) if head.eq_ignore_ascii_case(speaker) => {
            rest.strip_prefix(':').map_or(text, str::trim_start)
        }
        _ => text,
    }
}

/// Turn raw model output into a single chat line.
///
/// Trims, keeps only the first paragraph, strips a leading `"<speaker>:"`
/// and wrapping quotes, joins remaining lines and clamps to
/// [`MAX_REPLY_CHARS`]. Returns `None` when nothing is left.
#[must_use]
pub fn sanitize_reply(raw: &str, speaker: &str) -> Option<String> {
    let paragraph: Vec<&str> = raw
        .trim()
        .lines()
        .map(str::trim)
        .take_while(|line| !line.is_empty())
        .collect();
    let joined = paragraph.join(" ");
    let mut text = strip_speaker(&joined, speaker).to_string();

    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            text = text[1..text.len() - 1].trim().to_string();
        }
    }

    if text.chars().count() > MAX_REPLY_CHARS {
        text = text.chars().take(MAX_REPLY_CHARS).collect::<String>().trim_end().to_string();
    }

    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use banter_core::types::ParticipantId;

    fn inputs<'a>(
        profile: &'a PersonalityProfile,
        responder: &'a Participant,
        sender: &'a Participant,
        history: &'a str,
    ) -> PromptInputs<'a> {
        PromptInputs {
            profile,
            responder,
            sender,
            scope: &ChatScope::Say,
            response_style: Some("gentle"),
            history,
            backstory: None,
            standing: 0,
            message: "hello there",
        }
    }

    #[test]
    fn compose_fills_every_placeholder() {
        let profile = PersonalityProfile::fallback();
        let bot = Participant::new(ParticipantId(2), "Goran", true);
        let player = Participant::new(ParticipantId(1), "Alice", false);
        let request = compose(&inputs(&profile, &bot, &player, "Alice: hi\nGoran: hey\n"));

        assert!(request.system.contains("friendly adventurer"));
        assert!(request.system.contains("Stay in character"));
        assert!(request.system.contains("gentle"));
        assert!(request.user.contains("Alice: hi"));
        assert!(request.user.contains("\"hello there\""));
        assert!(request.user.ends_with("Reply as Goran:"));
        assert!(!request.system.contains('{') && !request.user.contains('{'));
        assert_eq!(request.speaker, "Goran");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let out = render_template(
            "{a} then {b} and {c",
            &[("a", "{b}"), ("b", "x{a}")],
        );
        assert_eq!(out, "{b} then x{a} and {c");
        assert_eq!(render_template("{missing} {}", &[("a", "1")]), "{missing} {}");
    }

    #[test]
    fn compose_omits_empty_sections() {
        let profile = PersonalityProfile::fallback();
        let bot = Participant::new(ParticipantId(2), "Goran", true);
        let player = Participant::new(ParticipantId(1), "Alice", false);
        let request = compose(&inputs(&profile, &bot, &player, ""));
        assert!(!request.user.contains("recent conversation"));
        assert!(!request.system.contains("backstory"));
        assert!(!request.system.contains("opinion"));
    }

    #[test]
    fn compose_includes_backstory_and_standing() {
        let profile = PersonalityProfile::fallback();
        let bot = Participant::new(ParticipantId(2), "Goran", true);
        let player = Participant::new(ParticipantId(1), "Alice", false);
        let mut i = inputs(&profile, &bot, &player, "");
        i.backstory = Some("Lost an arm to a troll.");
        i.standing = 60;
        let request = compose(&i);
        assert!(request.system.contains("Lost an arm to a troll."));
        assert!(request.system.contains("Your opinion of Alice: they are a good friend."));
    }

    #[test]
    fn sanitize_strips_name_quotes_and_extra_paragraphs() {
        assert_eq!(
            sanitize_reply("  Goran: \"Well met, friend!\"\n\nAs an AI...", "Goran").as_deref(),
            Some("Well met, friend!")
        );
        assert_eq!(sanitize_reply("line one\nline two", "X").as_deref(), Some("line one line two"));
        assert_eq!(sanitize_reply("   \n\n  ", "Goran"), None);
        assert_eq!(sanitize_reply("\"\"", "Goran"), None);
    }

    #[test]
    fn sanitize_clamps_long_replies() {
        let long = "ä".repeat(400);
        let out = sanitize_reply(&long, "Goran").expect("non-empty");
        assert_eq!(out.chars().count(), MAX_REPLY_CHARS);
    }
}
