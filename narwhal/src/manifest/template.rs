use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use crate::error::BuildError;

/// Render a job template against a serializable context.
///
/// Undefined variables are errors so a typo in a template never produces a
/// silently empty field.
pub(crate) fn render<S: Serialize>(
    template: &'static str,
    source: &str,
    ctx: &S,
) -> Result<String, BuildError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_keep_trailing_newline(true);

    let wrap = |source| BuildError::Template { template, source };
    let compiled = env.template_from_named_str(template, source).map_err(wrap)?;
    compiled.render(ctx).map_err(wrap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_substitutes_fields() {
        let out = render("job", "name: {{ name }}\n", &json!({ "name": "e1" })).unwrap();
        assert_eq!(out, "name: e1\n");
    }

    #[test]
    fn test_block_lines_leave_no_blank_lines() {
        let source = "a: 1\n{% if flag %}\nb: 2\n{% endif %}\nc: 3\n";
        let out = render("job", source, &json!({ "flag": true })).unwrap();
        assert_eq!(out, "a: 1\nb: 2\nc: 3\n");
    }

    #[test]
    fn test_missing_field_is_template_error() {
        let err = render("job", "name: {{ missing }}", &json!({})).unwrap_err();
        assert!(matches!(err, BuildError::Template { template: "job", .. }));
    }

    #[test]
    fn test_syntax_error_is_template_error() {
        let err = render("job", "name: {{ name", &json!({ "name": "x" })).unwrap_err();
        assert!(matches!(err, BuildError::Template { .. }));
    }
}
