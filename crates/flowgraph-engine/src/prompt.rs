use crate::context::StepContext;

/// Build a prompt with the outputs of completed steps injected ahead of it.
///
/// Each key names an upstream step. Steps that have not produced an output
/// are left out. With no keys the template is returned unchanged.
pub fn render_with_outputs(template: &str, ctx: &StepContext, keys: &[&str]) -> String {
    let mut prompt = String::new();

    if !keys.is_empty() {
        prompt.push_str("## Context Data\n\n");
        for key in keys {
            if let Some(value) = ctx.output(key) {
                let display = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                prompt.push_str(&format!("**{}**: {}\n", key, display));
            }
        }
        prompt.push_str("\n---\n\n");
    }

    prompt.push_str(template);
    prompt
}
