use super::*;

#[test]
fn table_names_are_sanitized() {
    assert_eq!(table_name_for("docs"), "vectors_docs");
    assert_eq!(table_name_for("runs/2024"), "vectors_runs_2024");
    assert_eq!(table_name_for("a b.c"), "vectors_a_b_c");
    assert_eq!(table_name_for("already_safe-1"), "vectors_already_safe-1");
}

#[test]
fn sql_literals_escape_quotes() {
    assert_eq!(sql_literal("plain"), "plain");
    assert_eq!(sql_literal("o'brien"), "o''brien");
    assert_eq!(sql_literal("'; DROP TABLE x; --"), "''; DROP TABLE x; --");
}

#[test]
fn predicates_cover_each_filter_shape() {
    assert_eq!(predicate_for(&QueryFilter::default()), "");
    assert_eq!(
        predicate_for(&QueryFilter::by_doc_id("doc-1")),
        "source_doc_id = 'doc-1'"
    );
    assert_eq!(
        predicate_for(&QueryFilter::by_doc_name("notes.md")),
        "source_doc_name = 'notes.md'"
    );

    let both = QueryFilter {
        source_doc_id: Some("doc-1".to_string()),
        source_doc_name: Some("it's.md".to_string()),
    };
    assert_eq!(
        predicate_for(&both),
        "source_doc_id = 'doc-1' AND source_doc_name = 'it''s.md'"
    );
}
