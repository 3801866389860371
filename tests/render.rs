use serde_json::json;
use twine::{Context, Environment, TemplateError};

fn render(source: &str, ctx: &Context) -> String {
    Environment::new().render_str(source, ctx).unwrap()
}

fn render_err(source: &str) -> TemplateError {
    Environment::new()
        .render_str(source, &Context::new())
        .unwrap_err()
}

#[test]
fn raw_text_renders_unchanged() {
    let source = "plain { text } with braces,\n quotes \" ' and 100% noise\n";
    assert_eq!(render(source, &Context::new()), source);
}

#[test]
fn rendering_is_deterministic() {
    let source = "{% for k, v in items %}{{ k }}={{ v|upper }};{% endfor %}{{ items|json_encode }}";
    let ctx = Context::from_json(json!({"items": {"z": "a", "y": "b", "x": "c"}}));
    let template = twine::compile(source).unwrap();
    let first = template.render(&ctx).unwrap();
    for _ in 0..10 {
        assert_eq!(template.render(&ctx).unwrap(), first);
    }
    assert_eq!(first, r#"z=A;y=B;x=C;{"z":"a","y":"b","x":"c"}"#);
}

#[test]
fn unterminated_directive_fails_to_compile() {
    assert!(matches!(
        twine::compile("{% if true %}x").unwrap_err(),
        TemplateError::UnterminatedScope { .. }
    ));
    assert!(matches!(
        twine::compile("{% for x in xs %}{% if x %}{% endfor %}").unwrap_err(),
        TemplateError::UnexpectedDirective { .. }
    ));
    assert!(twine::compile("{% if true %}x{% endif %}").is_ok());
}

#[test]
fn if_elseif_else_chain() {
    let ctx = Context::new();
    assert_eq!(
        render("{% if false %}A{% elseif true %}B{% else %}C{% endif %}", &ctx),
        "B"
    );
    assert_eq!(
        render("{% if false %}A{% elseif false %}B{% else %}C{% endif %}", &ctx),
        "C"
    );
    assert_eq!(
        render("{% if true %}A{% elseif true %}B{% else %}C{% endif %}", &ctx),
        "A"
    );
}

#[test]
fn for_else_runs_only_for_empty_sequences() {
    let ctx = Context::new();
    assert_eq!(render("{% for x in [] %}Y{% else %}Z{% endfor %}", &ctx), "Z");
    assert_eq!(
        render("{% for x in [1, 2] %}Y{{ x }}{% else %}Z{% endfor %}", &ctx),
        "Y1Y2"
    );
}

#[test]
fn operator_precedence() {
    let ctx = Context::new();
    assert_eq!(render("{{ 1 + 2 * 3 }}", &ctx), "7");
    assert_eq!(render("{{ (1 + 2) * 3 }}", &ctx), "9");
    assert_eq!(render("{{ 1 + 8 % 3 }}", &ctx), "3");
    assert_eq!(render("{{ 10 - 4 - 3 }}", &ctx), "3");
}

#[test]
fn nested_ternary_in_then_branch() {
    let ctx = Context::from_json(json!({"a": true, "b": false}));
    assert_eq!(render("{{ a ? b ? 1 : 2 : 3 }}", &ctx), "2");
    assert_eq!(render("{{ 1 ? 0 ? 'a' : 'b' : 'c' }}", &ctx), "b");
    assert_eq!(render("{{ 1 ? (0 ? 'a' : 'b') : 'c' }}", &ctx), "b");
}

#[test]
fn large_integers_print_in_full() {
    let ctx = Context::new();
    assert_eq!(render("{{ 100000000000000000000 }}", &ctx), "100000000000000000000");
    assert_eq!(render("{{ 0.5 * 4 }}", &ctx), "2");
}

#[test]
fn map_literals_keep_their_order() {
    assert_eq!(
        render(r#"{{ {"b": 1, "a": 2}|keys|json_encode }}"#, &Context::new()),
        r#"["b","a"]"#
    );
}

#[test]
fn unknown_capabilities_are_errors() {
    assert!(matches!(
        render_err("{{ 'x'|shout }}"),
        TemplateError::UnknownCapability { name, .. } if name == "shout"
    ));
    assert!(matches!(
        render_err("{{ 1 is prime }}"),
        TemplateError::UnknownCapability { name, .. } if name == "prime"
    ));
}

#[test]
fn escaped_quotes_stay_inside_strings() {
    let ctx = Context::new();
    assert_eq!(render(r#"{{ "a\"b" }}"#, &ctx), r#"a"b"#);
    assert_eq!(render(r"{{ 'it\'s' }}", &ctx), "it's");
}

#[test]
fn key_access_on_context_data() {
    let ctx = Context::from_json(json!({
        "user": {"name": "ada", "tags": ["x", "y"]},
        "field": "name"
    }));
    assert_eq!(render("{{ user.name|capitalize }}", &ctx), "Ada");
    assert_eq!(render("{{ user[field] }}", &ctx), "ada");
    assert_eq!(render("{{ user.tags|join('-') }}", &ctx), "x-y");
    assert_eq!(render("{{ user.missing }}", &ctx), "");
    assert!(matches!(
        Environment::new()
            .render_str("{{ nothing.name }}", &ctx)
            .unwrap_err(),
        TemplateError::NullKeyAccess { .. }
    ));
}

#[test]
fn callable_values_are_resolved_lazily() {
    let mut ctx = Context::new().with("first", "Ada");
    ctx.insert_fn("greeting", |ctx| {
        let name = ctx.get("first").map(ToString::to_string).unwrap_or_default();
        format!("hello {name}").into()
    });
    assert_eq!(render("{{ greeting|upper }}", &ctx), "HELLO ADA");
}

#[test]
fn set_and_filter_directives() {
    let ctx = Context::new();
    assert_eq!(
        render("{% set n = 3 %}{% filter upper %}n={{ n * 2 }}{% endfilter %}", &ctx),
        "N=6"
    );
}

#[test]
fn strict_mode_rejects_undefined_variables() {
    let mut env = Environment::new();
    assert_eq!(env.render_str("[{{ ghost }}]", &Context::new()).unwrap(), "[]");
    env.set_strict_variables(true);
    assert!(matches!(
        env.render_str("[{{ ghost }}]", &Context::new()).unwrap_err(),
        TemplateError::UndefinedVariable(name) if name == "ghost"
    ));
}

#[test]
fn word_operators_and_ternary() {
    let ctx = Context::from_json(json!({"a": true, "b": false, "n": 4}));
    assert_eq!(render("{{ a and not b ? 'yes' : 'no' }}", &ctx), "yes");
    assert_eq!(render("{{ n is even ? 'even' }}", &ctx), "even");
    assert_eq!(render("{{ n is odd ? 'odd' }}", &ctx), "");
}
