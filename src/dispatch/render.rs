// Template placeholder substitution.
//
// `{{field}}` markers resolve against a JSON context; dot notation reaches
// into nested objects. Unresolved markers are left in place so a bad
// context is visible in the delivered text instead of silently blanked.

/// Replace `{{field}}` markers in `input` from `context`.
pub fn render_str(input: &str, context: &serde_json::Value) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let field = after[..end].trim();
                match lookup(context, field) {
                    Some(value) => output.push_str(&value),
                    None => {
                        output.push_str("{{");
                        output.push_str(&after[..end]);
                        output.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                output.push_str("{{");
                rest = after;
            }
        }
    }

    output.push_str(rest);
    output
}

fn lookup(context: &serde_json::Value, field: &str) -> Option<String> {
    let mut current = context;
    for segment in field.split('.') {
        current = current.get(segment)?;
    }
    Some(match current {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => return None,
        other => other.to_string(),
    })
}
