//! Prompt text and message assembly for the three model calls.

use serde::Deserialize;

use crate::{
    error::{PlanError, Result},
    model::ChatMessage,
    models::{Context, ConvoMessage, Replacement, Role},
};

pub const SYS_PLANNER: &str = "You are a software engineer working on the user's project. \
Answer questions directly. When a change to a file is needed, write the file's path on its own line as \
'- path/to/file:' and follow it immediately with a fenced code block holding the code for that file. \
Only label real project files this way. A file that needs edits in several places may get several blocks, \
each introduced by its own path line. Blocks for existing files may contain only the changed region.";

pub const SYS_BUILDER: &str = "You apply a proposed change to one file. Respond with a JSON object of the form \
{\"replacements\": [{\"old\": \"...\", \"new\": \"...\", \"summary\": \"...\"}]}. \
Each 'old' must be an exact substring of the current file. Replacements are applied in order, top to bottom, \
and each 'old' is searched for only after the previous replacement, so list them in file order and never \
overlap them. Each 'new' must be complete text with no placeholders.";

pub const SYS_DESCRIBER: &str = "Summarize the proposed changes as a short git commit message. \
Respond with the message text only.";

/// Messages for the planner: system prompt, loaded contexts, the stored
/// conversation, then the new prompt.
pub fn reply_messages(contexts: &[Context], convo: &[ConvoMessage], prompt: &str) -> Vec<ChatMessage> {
    let mut system = SYS_PLANNER.to_string();
    for context in contexts {
        system.push_str("\n\n");
        system.push_str(&format!("{}:\n```\n{}\n```", context.name, context.body));
    }

    let mut messages = vec![ChatMessage::system(system)];
    messages.extend(convo.iter().map(|m| match m.role {
        Role::User => ChatMessage::user(m.message.clone()),
        Role::Assistant => ChatMessage::assistant(m.message.clone()),
    }));
    messages.push(ChatMessage::user(prompt));
    messages
}

/// Tokens the planner request will use before the model says anything.
pub fn reply_tokens(contexts: &[Context], convo: &[ConvoMessage], prompt: &str) -> usize {
    crate::tokens::estimate(SYS_PLANNER)
        + contexts.iter().map(|c| c.num_tokens).sum::<usize>()
        + convo.iter().map(|m| m.tokens).sum::<usize>()
        + crate::tokens::estimate(prompt)
}

/// Messages for the builder: the current file and the proposed block.
pub fn build_messages(path: &str, current: &str, proposed: &str, description: &str) -> Vec<ChatMessage> {
    let mut change = String::new();
    if !description.is_empty() {
        change.push_str(description);
        change.push_str("\n\n");
    }
    change.push_str(&format!("Proposed update for {path}:\n```\n{proposed}```"));

    vec![
        ChatMessage::system(SYS_BUILDER),
        ChatMessage::user(format!("Current state of {path}:\n```\n{current}\n```\n\n{change}")),
    ]
}

pub fn describe_messages(reply: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::system(SYS_DESCRIBER), ChatMessage::user(reply)]
}

#[derive(Deserialize)]
struct ReplacementList {
    replacements: Vec<ReplacementItem>,
}

#[derive(Deserialize)]
struct ReplacementItem {
    old: String,
    new: String,
    #[serde(default)]
    summary: String,
}

/// Parses the builder's JSON response.
///
/// # Errors
///
/// Returns `PlanError::Model` when the response is not a replacement list
/// or the list is empty.
pub fn parse_replacements(response: &str) -> Result<Vec<Replacement>> {
    let trimmed = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let list: ReplacementList = serde_json::from_str(trimmed)
        .map_err(|e| PlanError::model(format!("invalid replacement list: {e}")))?;
    if list.replacements.is_empty() {
        return Err(PlanError::model("replacement list is empty"));
    }
    Ok(list
        .replacements
        .into_iter()
        .map(|item| Replacement::new(item.old, item.new).with_summary(item.summary))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_replacements() {
        let reps = parse_replacements(
            r#"{"replacements":[{"old":"a","new":"b","summary":"rename"},{"old":"c","new":"d"}]}"#,
        )
        .unwrap();
        assert_eq!(reps.len(), 2);
        assert_eq!(reps[0].summary, "rename");
        assert!(reps[1].summary.is_empty());
    }

    #[test]
    fn test_parse_replacements_in_fence() {
        let reps = parse_replacements("```json\n{\"replacements\":[{\"old\":\"x\",\"new\":\"y\"}]}\n```").unwrap();
        assert_eq!(reps[0].new, "y");
    }

    #[test]
    fn test_parse_replacements_rejects_garbage() {
        assert!(parse_replacements("sure, here you go").is_err());
        assert!(parse_replacements(r#"{"replacements":[]}"#).is_err());
    }

    #[test]
    fn test_reply_messages_order() {
        let contexts = [Context::file(1, "a.rs", "fn a() {}")];
        let convo = [
            ConvoMessage::new(1, Role::User, 1, "first"),
            ConvoMessage::new(1, Role::Assistant, 2, "reply"),
        ];
        let messages = reply_messages(&contexts, &convo, "next");

        assert_eq!(messages.len(), 4);
        assert!(messages[0].content.contains("fn a() {}"));
        assert_eq!(messages[2], ChatMessage::assistant("reply"));
        assert_eq!(messages[3], ChatMessage::user("next"));
    }
}
