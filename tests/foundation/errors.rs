//! Error taxonomy.

use discern_foundation::{Error, ErrorCategory, ErrorContext, ErrorKind, FactId, Type};

#[test]
fn constructors_land_in_their_category() {
    assert_eq!(Error::parse("x").category(), ErrorCategory::Parse);
    assert_eq!(Error::undefined_type("T").category(), ErrorCategory::Semantic);
    assert_eq!(
        Error::undefined_field("T", "f").category(),
        ErrorCategory::Semantic
    );
    assert_eq!(
        Error::missing_dependency("temp_1").category(),
        ErrorCategory::Structural
    );
    assert_eq!(
        Error::type_mismatch(Type::Number, Type::String).category(),
        ErrorCategory::Evaluation
    );
    assert_eq!(
        Error::unknown_fact(FactId::new("T", "a")).category(),
        ErrorCategory::Lifecycle
    );
    assert_eq!(Error::unknown_rule("r").category(), ErrorCategory::Lifecycle);
    assert_eq!(
        Error::new(ErrorKind::TransactionNotActive).category(),
        ErrorCategory::Transaction
    );
    assert_eq!(Error::internal("bug").category(), ErrorCategory::Internal);
}

#[test]
fn evaluation_errors_do_not_abort_ingestion() {
    assert!(!ErrorCategory::Evaluation.aborts_ingestion());
    for category in [
        ErrorCategory::Parse,
        ErrorCategory::Semantic,
        ErrorCategory::Structural,
        ErrorCategory::Lifecycle,
        ErrorCategory::Transaction,
        ErrorCategory::Storage,
        ErrorCategory::Internal,
    ] {
        assert!(category.aborts_ingestion(), "{category}");
    }
}

#[test]
fn messages_name_the_subject() {
    let error = Error::undefined_field("Person", "email");
    assert_eq!(error.to_string(), "undefined field: Person.email");

    let error = Error::new(ErrorKind::FootprintExceeded {
        used: 200,
        limit: 100,
    });
    assert!(error.to_string().contains("200"));
    assert!(error.to_string().contains("100"));
}

#[test]
fn context_is_attached() {
    let error = Error::undefined_type("Ghost").with_context(
        ErrorContext::new()
            .with_rule("r1")
            .with_node("alpha_1"),
    );
    let context = error.context.unwrap();
    assert_eq!(context.rule.as_deref(), Some("r1"));
    assert_eq!(context.to_string(), "rule r1, node alpha_1");
}
