use template_pdf::variables::{
    self, catalogue, substitute_markup, substitute_text, token, tokens_in, unresolved_tokens,
};
use template_pdf::{DocumentModel, EditorState, EditorSurface, MarkupSurface, ObjectKind, ValueMap};

fn values(pairs: &[(&str, &str)]) -> ValueMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn unmapped_tokens_stay_verbatim() {
    let out = substitute_text(
        "Paciente: {{paciente}}, CPF: {{cpf}}",
        &values(&[("{{paciente}}", "Maria Silva")]),
    );
    assert_eq!(out, "Paciente: Maria Silva, CPF: {{cpf}}");
    assert_eq!(substitute_text("{{x}}", &ValueMap::new()), "{{x}}");
}

#[test]
fn dotted_tokens_match_only_literally() {
    let map = values(&[("{{a.b}}", "ok")]);
    assert_eq!(substitute_text("{{a.b}} {{aXb}} {{a.bc}} {a.b}", &map), "ok {{aXb}} {{a.bc}} {a.b}");
}

#[test]
fn keys_may_omit_the_braces() {
    let map = values(&[("medico", "Dr. Souza"), ("{{crm}}", "12345")]);
    assert_eq!(substitute_text("{{medico}} CRM {{crm}}", &map), "Dr. Souza CRM 12345");
}

#[test]
fn braced_key_wins_over_its_bare_twin() {
    // Every map gets its own hash seed, so iteration order varies between runs.
    for _ in 0..32 {
        let map = values(&[("paciente", "bare"), ("{{paciente}}", "braced")]);
        assert_eq!(substitute_text("{{paciente}}", &map), "braced");
        assert_eq!(substitute_markup("<p>{{paciente}}</p>", &map), "<p>braced</p>");
    }
}

#[test]
fn longer_tokens_win_over_prefixes() {
    let map = values(&[("data", "01/02/2024"), ("data_nascimento", "03/04/1990")]);
    assert_eq!(
        substitute_text("{{data_nascimento}} / {{data}}", &map),
        "03/04/1990 / 01/02/2024"
    );
}

#[test]
fn markup_values_are_escaped() {
    let map = values(&[("paciente", "<b>Ana</b> & cia")]);
    assert_eq!(
        substitute_markup("<p>{{paciente}}</p>", &map),
        "<p>&lt;b&gt;Ana&lt;/b&gt; &amp; cia</p>"
    );
    assert_eq!(substitute_text("{{paciente}}", &map), "<b>Ana</b> & cia");
}

#[test]
fn resolve_leaves_the_source_model_untouched() {
    let mut ed = EditorState::new(MarkupSurface::default());
    ed.insert_variable("paciente");
    let rect = ed.insert_rectangle(0.0, 0.0);
    ed.insert_variable_into_rectangle(&rect.id, 0, "medico").unwrap();

    let model = ed.snapshot();
    let before = model.clone();
    let resolved = variables::resolve(&model, &values(&[("paciente", "João"), ("medico", "Dra. Lima")]));

    assert_eq!(model, before);
    assert_eq!(resolved.content, "João");
    let ObjectKind::Rectangle(style) = &resolved.objects[0].kind else {
        panic!("expected a rectangle");
    };
    assert_eq!(style.text, "Dra. Lima");
    assert!(ed.surface().content().contains("{{paciente}}"));
}

#[test]
fn unresolved_tokens_are_reported_once() {
    let mut model = DocumentModel::default();
    model.content = "<p>{{paciente}} {{cpf}} {{cpf}} {{clinica}}</p>".to_string();
    let missing = unresolved_tokens(&model, &values(&[("paciente", "x")]));
    assert_eq!(missing, vec!["{{cpf}}".to_string(), "{{clinica}}".to_string()]);
}

#[test]
fn catalogue_entries_are_tokens() {
    let catalogue = catalogue();
    assert!(catalogue.len() >= 10);
    for variable in &catalogue {
        assert_eq!(token(&variable.key), variable.key);
        assert_eq!(tokens_in(&variable.key), vec![variable.key.clone()]);
    }
    assert!(catalogue.iter().any(|v| v.key == "{{paciente}}" && v.group == "Paciente"));
}

#[test]
fn rectangle_insertion_respects_the_caret() {
    let mut ed = EditorState::new(MarkupSurface::default());
    let rect = ed.insert_rectangle(0.0, 0.0);
    let mut draft = ed.begin_edit(&rect.id).unwrap();
    draft.patch.text = Some("Dr.  - CRM".to_string());
    ed.apply_draft(draft).unwrap();

    let caret = ed.insert_variable_into_rectangle(&rect.id, 4, "medico").unwrap();
    assert_eq!(caret, 4 + "{{medico}}".len());
    let ObjectKind::Rectangle(style) = &ed.objects().get(&rect.id).unwrap().kind else {
        panic!("expected a rectangle");
    };
    assert_eq!(style.text, "Dr. {{medico}} - CRM");
}
