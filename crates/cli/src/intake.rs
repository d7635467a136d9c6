//! Built-in `intake` dialogue: ask for a name, then a topic, then confirm.

use converse::{CatalogError, Script, StepAction, Template, TemplateCatalog, TurnInput};

pub const NAME: &str = "intake";

/// All templates the CLI can run.
pub fn catalog() -> Result<TemplateCatalog, CatalogError> {
    let mut catalog = TemplateCatalog::new();
    catalog.insert(Template::build(Some(NAME), script()))?;
    Ok(catalog)
}

fn reply(turn: &TurnInput<'_>, text: &str) {
    println!("[{}] bot -> {}: {}", turn.channel_id, turn.user_id, text);
}

fn script() -> Script {
    Script::new()
        .step("greet", |_, turn| {
            let greeting = turn
                .options
                .get("greeting")
                .and_then(|v| v.as_str())
                .unwrap_or("hi");
            reply(turn, &format!("{} {}! what's your name?", greeting, turn.user_id));
            Ok(StepAction::Next)
        })
        .step("name", |state, turn| {
            let name = turn.text.trim();
            if name.is_empty() {
                reply(turn, "sorry, I didn't catch that. what's your name?");
                return Ok(StepAction::Repeat);
            }
            state.put("name", name)?;
            reply(turn, &format!("thanks {}. what would you like to talk about?", name));
            Ok(StepAction::Next)
        })
        .step("topic", |state, turn| {
            let name: String = state.get("name").unwrap_or_default();
            let mut topics: Vec<String> = state.get("topics").unwrap_or_default();
            topics.push(turn.text.trim().to_string());
            reply(
                turn,
                &format!(
                    "got it: {} wants to talk about {}. anything else? (yes/no)",
                    name,
                    topics.join(", ")
                ),
            );
            state.put("topics", topics)?;
            Ok(StepAction::Next)
        })
        .step("confirm", |state, turn| {
            let name: String = state.get("name").unwrap_or_default();
            if turn.text.trim().eq_ignore_ascii_case("yes") {
                reply(turn, "ok, what else?");
                Ok(StepAction::Goto("topic".to_string()))
            } else {
                reply(turn, &format!("all set, bye {}!", name));
                Ok(StepAction::Finish)
            }
        })
}
