//! Property tests for the pure classification functions.

use proptest::prelude::*;

use sentinel::domain::models::{NewAlert, Severity};
use sentinel::services::parsers::severity_from_keywords;
use sentinel::services::pipeline::recommended_action;

proptest! {
    /// The syslog map is total over u8 and fixed over 0..=7.
    #[test]
    fn syslog_map_is_total(code: u8) {
        let severity = Severity::from_syslog(code);
        match code {
            0..=2 => prop_assert_eq!(severity, Severity::Critical),
            3 => prop_assert_eq!(severity, Severity::High),
            4 => prop_assert_eq!(severity, Severity::Medium),
            5 => prop_assert_eq!(severity, Severity::Low),
            _ => prop_assert_eq!(severity, Severity::Info),
        }
    }

    /// The keyword heuristic is a pure function of its input.
    #[test]
    fn keyword_heuristic_is_deterministic(text in ".{0,200}") {
        prop_assert_eq!(severity_from_keywords(&text), severity_from_keywords(&text));
    }

    /// Case never changes the classification.
    #[test]
    fn keyword_heuristic_is_case_insensitive(text in "[a-zA-Z ]{0,80}") {
        prop_assert_eq!(
            severity_from_keywords(&text.to_uppercase()),
            severity_from_keywords(&text.to_lowercase())
        );
    }

    /// recommended_action depends on severity alone, and only info has none.
    #[test]
    fn recommended_action_is_pure(event_type in "[a-z-]{0,30}") {
        for severity in [
            Severity::Info,
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            let action = recommended_action(severity, &event_type);
            prop_assert_eq!(&action, &recommended_action(severity, "other"));
            prop_assert_eq!(action.is_none(), severity == Severity::Info);
        }
    }

    /// Titles never exceed 100 characters, whatever the message.
    #[test]
    fn titles_are_bounded(message in ".{0,400}") {
        prop_assert!(NewAlert::title_from_message(&message).chars().count() <= 100);
    }
}
