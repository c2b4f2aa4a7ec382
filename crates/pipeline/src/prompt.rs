//! System-prompt and context assembly.

use chrono::{DateTime, Local, Timelike};
use hearth_core::{ChatMessage, Role};
use hearth_storage::{ExperienceKind, UserRecord};

/// Runtime facts injected into every system prompt.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub time_of_day: &'static str,
    pub day_of_week: String,
    pub local_date: String,
    pub local_time: String,
}

impl RuntimeContext {
    pub fn now() -> Self {
        Self::at(Local::now())
    }

    pub fn at(now: DateTime<Local>) -> Self {
        let time_of_day = match now.hour() {
            5..=11 => "morning",
            12..=16 => "afternoon",
            17..=20 => "evening",
            _ => "night",
        };
        Self {
            time_of_day,
            day_of_week: now.format("%A").to_string(),
            local_date: now.format("%Y-%m-%d").to_string(),
            local_time: now.format("%H:%M").to_string(),
        }
    }
}

/// Behavioral constraints appended to the persona prompt. Varies by
/// experience kind and active model.
pub fn behavior_constraints(
    kind: ExperienceKind,
    allow_paralinguistic: bool,
    thinking_model: bool,
) -> String {
    let mut out = String::from(
        "You always respond with short sentences. \
         Avoid punctuation like parentheses or colons or markdown that would not appear \
         in conversational speech. Do not use Markdown formatting (no *, **, _, __, backticks). ",
    );

    if allow_paralinguistic {
        out.push_str(
            "To add expressivity, you should occasionally use ONLY these paralinguistic cues \
             in brackets: [laugh], [chuckle], [sigh], [gasp], [cough], [clear throat], [sniff], \
             [groan], [shush]. Use only these cues naturally in context to enhance the \
             conversational flow. Examples: [chuckle] That is funny. [sigh] That was a long day.",
        );
    }

    match kind {
        ExperienceKind::Game => {
            out.push_str(
                " You are the game host and you do everything needed to run the game. \
                 Do NOT put any setup tasks on the user. Do NOT ask the user to choose a mode \
                 or category unless they ask for it. Start the game immediately after greeting; \
                 greet in one short line and then begin the first move. Never ask the user to \
                 think of something; you choose any secret item or answer internally. \
                 If the user says begin, start, ready, or hi, immediately start the game. \
                 Keep the game moving with one clear prompt at a time.",
            );
        }
        ExperienceKind::Story => {
            out.push_str(
                " You are a bedtime-style storyteller for young kids. Tell the story yourself \
                 without asking questions or waiting for input. Do NOT ask the user to pick a \
                 setting, name, or choice; you decide and continue. If the user gives unclear \
                 input, gently keep the story going. Keep sentences short, warm, and simple. \
                 Avoid scary or complex themes.",
            );
        }
        ExperienceKind::Personality => {}
    }

    if thinking_model {
        out.push_str(" Do not output <think> or reasoning text. Respond with the final answer only.");
    }

    out
}

/// Synthetic system-authored prompt for the greeting turn.
pub fn greeting_instruction(kind: ExperienceKind) -> &'static str {
    match kind {
        ExperienceKind::Game => {
            "[System] The user just connected. Give a short greeting (under 8 words) and \
             immediately start the game with the first move. Do NOT ask if they are ready."
        }
        ExperienceKind::Story => {
            "[System] The user just connected. Start the story immediately with a warm, \
             kid-friendly opening. Use 1-2 short sentences and end with a full stop. \
             Do NOT ask a question or wait for input."
        }
        ExperienceKind::Personality => {
            "[System] The user just connected. Greet them with a short friendly sentence \
             (under 8 words)."
        }
    }
}

/// Assemble the system prompt: persona, behavioral constraints, runtime
/// facts, then user facts.
pub fn build_system_prompt(
    personality_name: Option<&str>,
    personality_prompt: Option<&str>,
    user: Option<&UserRecord>,
    runtime: &RuntimeContext,
    extra: Option<&str>,
) -> String {
    let name = personality_name.unwrap_or("Assistant");
    let mut parts: Vec<String> = Vec::new();

    if let Some(base) = personality_prompt.map(str::trim).filter(|s| !s.is_empty()) {
        parts.push(base.to_string());
    }
    if let Some(extra) = extra.map(str::trim).filter(|s| !s.is_empty()) {
        parts.push(extra.to_string());
    }

    parts.push(format!(
        "You are {name}.\nIt is {} on {}.\nLocal date: {}.\nLocal time: {}.",
        runtime.time_of_day, runtime.day_of_week, runtime.local_date, runtime.local_time
    ));

    if let Some(user) = user {
        let mut facts = vec![format!("name: {}", user.name)];
        if let Some(age) = user.age {
            facts.push(format!("age: {age}"));
        }
        if !user.about_you.is_empty() {
            facts.push(format!("about: {}", user.about_you));
        }
        facts.push(format!("user_type: {}", user.user_type));
        parts.push(format!("User context:\n{}", facts.join("\n")));
    }

    parts.join("\n\n")
}

/// Build the full message list: system prompt, capped alternating
/// history, then the new user utterance. Entries with empty content or
/// non-conversational roles are skipped.
pub fn build_messages(
    system_prompt: &str,
    history: &[ChatMessage],
    user_text: &str,
    max_history_messages: usize,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt)];

    let start = history.len().saturating_sub(max_history_messages);
    for msg in &history[start..] {
        if msg.content.trim().is_empty() {
            continue;
        }
        if !matches!(msg.role, Role::User | Role::Assistant) {
            continue;
        }
        messages.push(msg.clone());
    }

    messages.push(ChatMessage::user(user_text));
    messages
}
